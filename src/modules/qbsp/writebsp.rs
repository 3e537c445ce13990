//! Assembles the compiled trees into the typed lump file, narrowing to the
//! requested dialect and auto-upgrading v29 to BSP2 on index overflow.

use std::collections::HashMap;

use glam::DVec3;

use bsp::{BspError, BspFormat};
use map::Map;

use crate::{
    game::GameId,
    utils::{constants::DETAIL_CLASSNAMES, simple_calculs::Winding},
};

use super::{
    portals::{leaf_collapses, leaf_numbering},
    CompileContext, Contents, CsgFace, ModelEntity, QbspOptions, Tree,
};

pub struct ModelTrees {
    pub tree: Tree,
    pub clip_trees: Vec<Tree>,
    pub origin: DVec3,
}

/// A face emitted into the lump, remembered for marksurface filtering.
struct EmittedFace {
    face_index: u32,
    tree_node: usize,
    winding: Winding,
    /// 1 when the face normal opposes the canonical node plane.
    side: u32,
}

struct Assembler<'a> {
    ctx: &'a mut CompileContext,
    options: &'a QbspOptions,
    bsp: bsp::Bsp,
    vertex_map: HashMap<(i64, i64, i64), u32>,
    edge_map: HashMap<(u32, u32), u32>,
    collapse_detail: bool,
}

fn vertex_key(point: DVec3) -> (i64, i64, i64) {
    (
        (point.x * 8.).round() as i64,
        (point.y * 8.).round() as i64,
        (point.z * 8.).round() as i64,
    )
}

impl<'a> Assembler<'a> {
    fn vertex_id(&mut self, point: DVec3) -> u32 {
        let key = vertex_key(point);

        if let Some(&id) = self.vertex_map.get(&key) {
            return id;
        }

        let id = self.bsp.vertices.len() as u32;
        self.bsp
            .vertices
            .push(glam::Vec3::new(point.x as f32, point.y as f32, point.z as f32));
        self.vertex_map.insert(key, id);
        id
    }

    /// Emits the surfedge for `a -> b`, reusing an existing edge backwards
    /// when its owner ran the other way.
    fn surfedge_for(&mut self, a: u32, b: u32) -> i32 {
        if let Some(edge) = self.edge_map.remove(&(b, a)) {
            return -(edge as i32);
        }

        let edge = self.bsp.edges.len() as u32;
        self.bsp.edges.push([a, b]);
        self.edge_map.insert((a, b), edge);
        edge as i32
    }

    fn emit_face(&mut self, face: &CsgFace) -> Option<u32> {
        if face.skip {
            return None;
        }
        if face.winding.len() < 3 {
            return None;
        }

        let (plane_id, flipped) = self.ctx.planes.id_for(&face.plane);

        let first_edge = self.bsp.surf_edges.len() as i32;
        let points = face.winding.points();

        for i in 0..points.len() {
            let a = self.vertex_id(points[i]);
            let b = self.vertex_id(points[(i + 1) % points.len()]);

            if a == b {
                continue;
            }

            let surfedge = self.surfedge_for(a, b);
            self.bsp.surf_edges.push(surfedge);
        }

        let edge_count = self.bsp.surf_edges.len() as i32 - first_edge;
        if edge_count < 3 {
            self.bsp.surf_edges.truncate(first_edge as usize);
            return None;
        }

        let face_index = self.bsp.faces.len() as u32;
        self.bsp.faces.push(bsp::Face {
            plane: plane_id,
            side: flipped as u32,
            first_edge,
            edge_count: edge_count as u32,
            texinfo: face.texinfo,
            styles: [255; 4],
            lightmap_offset: -1,
        });

        Some(face_index)
    }

    /// Emits a subtree; returns a node index or `-(leaf+1)`.
    fn emit_node(
        &mut self,
        tree: &Tree,
        node: usize,
        numbers: &[Option<usize>],
        leaf_map: &mut Vec<Option<u32>>,
        emitted: &mut Vec<EmittedFace>,
    ) -> i32 {
        let tree_node = &tree.nodes[node];

        if tree.is_leaf(node) {
            let contents = tree_node.contents.unwrap_or(Contents::Solid);

            if leaf_collapses(contents, self.collapse_detail) {
                return -1;
            }

            let leaf_index = self.bsp.leaves.len();
            let cluster = numbers[node].map(|n| n as i32).unwrap_or(-1);

            self.bsp.leaves.push(bsp::Leaf {
                contents: self.options.game.contents_to_disk(contents),
                vis_offset: -1,
                mins: bounds_f32(tree_node.bounds.mins),
                maxs: bounds_f32(tree_node.bounds.maxs),
                first_mark_surface: 0,
                mark_surface_count: 0,
                ambient_levels: [0; 4],
                cluster,
                area: if self.options.game.is_quake2() { 1 } else { 0 },
                first_leaf_brush: 0,
                leaf_brush_count: 0,
            });

            leaf_map[node] = Some(leaf_index as u32);
            return -(leaf_index as i32) - 1;
        }

        // Pre-order: parents precede children, the way engines expect.
        let node_index = self.bsp.nodes.len();
        self.bsp.nodes.push(bsp::Node {
            plane: 0,
            children: [0, 0],
            mins: [0.; 3],
            maxs: [0.; 3],
            first_face: 0,
            face_count: 0,
        });

        let first_face = self.bsp.faces.len() as u32;

        for face in &tree_node.faces {
            if let Some(face_index) = self.emit_face(face) {
                emitted.push(EmittedFace {
                    face_index,
                    tree_node: node,
                    winding: face.winding.clone(),
                    side: self.bsp.faces[face_index as usize].side,
                });
            }
        }

        let face_count = self.bsp.faces.len() as u32 - first_face;

        let front = self.emit_node(tree, tree_node.children[0], numbers, leaf_map, emitted);
        let back = self.emit_node(tree, tree_node.children[1], numbers, leaf_map, emitted);

        let record = &mut self.bsp.nodes[node_index];
        record.plane = tree_node.plane_id.unwrap();
        record.children = [front, back];
        record.mins = bounds_f32(tree_node.bounds.mins);
        record.maxs = bounds_f32(tree_node.bounds.maxs);
        record.first_face = first_face;
        record.face_count = face_count;

        node_index as i32
    }

    /// Pushes each emitted face's winding down to the leaves on its front
    /// side and marks it there.
    fn mark_surfaces(
        &mut self,
        tree: &Tree,
        leaf_map: &[Option<u32>],
        emitted: &[EmittedFace],
        marks: &mut Vec<Vec<u32>>,
    ) {
        for face in emitted {
            let tree_node = &tree.nodes[face.tree_node];
            let start = tree_node.children[face.side as usize];

            self.mark_recursive(tree, leaf_map, start, face.winding.clone(), face.face_index, marks);
        }
    }

    fn mark_recursive(
        &self,
        tree: &Tree,
        leaf_map: &[Option<u32>],
        node: usize,
        winding: Winding,
        face_index: u32,
        marks: &mut Vec<Vec<u32>>,
    ) {
        if tree.is_leaf(node) {
            if let Some(leaf_index) = leaf_map[node] {
                let list = &mut marks[leaf_index as usize];
                if !list.contains(&face_index) {
                    list.push(face_index);
                }
            }
            return;
        }

        let plane = self.ctx.planes.get(tree.nodes[node].plane_id.unwrap());
        let (front, back) = winding.split(plane);

        if let Some(front) = front {
            self.mark_recursive(tree, leaf_map, tree.nodes[node].children[0], front, face_index, marks);
        }
        if let Some(back) = back {
            self.mark_recursive(tree, leaf_map, tree.nodes[node].children[1], back, face_index, marks);
        }
    }

    fn emit_clipnodes(&mut self, tree: &Tree, node: usize) -> i32 {
        let tree_node = &tree.nodes[node];

        if tree.is_leaf(node) {
            let contents = tree_node.contents.unwrap_or(Contents::Solid);
            return if contents == Contents::Empty {
                bsp::LeafContents::Empty as i32
            } else {
                bsp::LeafContents::Solid as i32
            };
        }

        let index = self.bsp.clipnodes.len();
        self.bsp.clipnodes.push(bsp::ClipNode {
            plane: tree_node.plane_id.unwrap() as i32,
            children: [0, 0],
        });

        let front = self.emit_clipnodes(tree, tree_node.children[0]);
        let back = self.emit_clipnodes(tree, tree_node.children[1]);

        self.bsp.clipnodes[index].children = [front, back];
        index as i32
    }
}

fn bounds_f32(v: DVec3) -> [f32; 3] {
    [v.x as f32, v.y as f32, v.z as f32]
}

pub(crate) fn entity_lump(map: &Map, model_entities: &[ModelEntity]) -> Vec<bsp::Entity> {
    let mut out = vec![];
    let mut source_to_model: HashMap<usize, usize> = HashMap::new();

    for (model_index, model) in model_entities.iter().enumerate() {
        source_to_model.insert(model.source_index, model_index);
    }

    for (index, entity) in map.entities.iter().enumerate() {
        let classname = entity.classname();

        if DETAIL_CLASSNAMES.contains(&classname) {
            continue;
        }

        let is_brush_entity = entity.brushes.is_some() && classname != "worldspawn";
        let model_index = source_to_model.get(&index).copied();

        if is_brush_entity && model_index.is_none() {
            // Compiled away (e.g. every brush invalid).
            continue;
        }

        let mut pairs = bsp::Entity::new();
        for (key, value) in entity.attributes.iter() {
            pairs.insert(key.clone(), value.clone());
        }

        if let Some(model_index) = model_index {
            if model_index > 0 {
                pairs.set("model", format!("*{}", model_index));
            }
        }

        out.push(pairs);
    }

    out
}

pub fn write_bsp(
    map: &Map,
    model_entities: &[ModelEntity],
    models: Vec<ModelTrees>,
    ctx: &mut CompileContext,
    options: &QbspOptions,
) -> eyre::Result<bsp::Bsp> {
    let format = options.format.unwrap_or(options.game.default_format);
    let collapse_detail = !options.game.is_quake2();

    let mut assembler = Assembler {
        options,
        bsp: bsp::Bsp {
            format,
            ..Default::default()
        },
        vertex_map: HashMap::new(),
        edge_map: HashMap::new(),
        collapse_detail,
        ctx,
    };

    // Edge 0 is reserved; a surfedge of 0 would be ambiguous.
    assembler.bsp.edges.push([0, 0]);

    // The shared solid leaf 0.
    assembler.bsp.leaves.push(bsp::Leaf {
        contents: bsp::LeafContents::Solid as i32,
        vis_offset: -1,
        mins: [0.; 3],
        maxs: [0.; 3],
        first_mark_surface: 0,
        mark_surface_count: 0,
        ambient_levels: [0; 4],
        cluster: -1,
        area: 0,
        first_leaf_brush: 0,
        leaf_brush_count: 0,
    });

    let mut marks: Vec<Vec<u32>> = vec![vec![]];

    for (model_index, model) in models.iter().enumerate() {
        let tree = &model.tree;
        let (numbers, visleafs) = leaf_numbering(tree, collapse_detail);

        let mut leaf_map = vec![None; tree.nodes.len()];
        let mut emitted = vec![];

        let first_face = assembler.bsp.faces.len() as i32;
        let root = assembler.emit_node(tree, tree.root, &numbers, &mut leaf_map, &mut emitted);
        let face_count = assembler.bsp.faces.len() as i32 - first_face;

        marks.resize(assembler.bsp.leaves.len(), vec![]);
        assembler.mark_surfaces(tree, &leaf_map, &emitted, &mut marks);

        let mut head_nodes = [-1i32; bsp::MAX_MAP_HULLS];
        head_nodes[0] = root;

        for (hull_index, clip_tree) in model.clip_trees.iter().enumerate() {
            head_nodes[1 + hull_index] = assembler.emit_clipnodes(clip_tree, clip_tree.root);
        }
        // Unused hull slots fall back to the point hull convention.
        let fallback_hull = if model.clip_trees.is_empty() { 0 } else { head_nodes[1] };
        for slot in head_nodes.iter_mut().skip(1 + model.clip_trees.len()) {
            *slot = fallback_hull;
        }

        let bounds = tree.nodes[tree.root].bounds;
        assembler.bsp.models.push(bsp::Model {
            mins: glam::Vec3::from(bounds_f32(bounds.mins)),
            maxs: glam::Vec3::from(bounds_f32(bounds.maxs)),
            origin: glam::Vec3::from(bounds_f32(model.origin)),
            head_nodes,
            vis_leaves_count: visleafs as i32,
            first_face,
            face_count,
        });

        // Q2 collision lumps for this model's brushes.
        if options.game.id == GameId::Quake2 {
            emit_q2_brushes(&mut assembler, &model_entities[model_index]);
        }
    }

    // Patch leaf marksurface ranges.
    for (leaf_index, list) in marks.iter().enumerate() {
        let first = assembler.bsp.mark_surfaces.len() as u32;
        assembler.bsp.mark_surfaces.extend(list.iter().copied());

        let leaf = &mut assembler.bsp.leaves[leaf_index];
        leaf.first_mark_surface = first;
        leaf.mark_surface_count = list.len() as u32;
    }

    // Planes and texinfo tables built up during compilation.
    assembler.bsp.planes = assembler
        .ctx
        .planes
        .all()
        .iter()
        .map(|plane| {
            let normal = glam::Vec3::new(
                plane.normal.x as f32,
                plane.normal.y as f32,
                plane.normal.z as f32,
            );
            bsp::Plane {
                normal,
                distance: plane.distance as f32,
                type_: bsp::PlaneType::from_normal(normal),
            }
        })
        .collect();

    let quake2 = options.game.is_quake2();
    assembler.bsp.texinfo = assembler
        .ctx
        .texinfos
        .all()
        .iter()
        .map(|record| bsp::TexInfo {
            u: glam::Vec3::new(record.s.x as f32, record.s.y as f32, record.s.z as f32),
            u_offset: record.s.w as f32,
            v: glam::Vec3::new(record.t.x as f32, record.t.y as f32, record.t.z as f32),
            v_offset: record.t.w as f32,
            texture_index: record.miptex,
            flags: record.flags,
            value: record.value,
            texture_name: if quake2 {
                record.name.clone()
            } else {
                String::new()
            },
            next_texinfo: -1,
        })
        .collect();

    if !quake2 {
        // Header-only miptex entries; the engine resolves pixels from WADs.
        assembler.bsp.textures = assembler
            .ctx
            .miptex_names
            .iter()
            .map(|name| {
                Some(bsp::MipTex {
                    name: name.clone(),
                    width: 64,
                    height: 64,
                    offsets: [0; 4],
                    data: vec![],
                })
            })
            .collect();
    } else {
        // Two areas: 0 is the void, 1 holds the whole map until areaportals
        // split it further.
        assembler.bsp.areas = vec![
            bsp::Q2Area {
                portal_count: 0,
                first_portal: 0,
            },
            bsp::Q2Area {
                portal_count: 0,
                first_portal: 0,
            },
        ];
    }

    assembler.bsp.entities = entity_lump(map, model_entities);

    let Assembler { mut bsp, ctx, .. } = assembler;

    // Overflow of 16-bit fields auto-upgrades within the Quake family.
    if let Err(BspError::FormatOverflow { what, .. }) = bsp.write_to_bytes() {
        let upgradable = options.format.is_none() && matches!(bsp.format, BspFormat::V29);

        if !upgradable {
            return crate::err!("{} overflows the {} format", what, bsp.format);
        }

        ctx.warn(format!("{} overflows v29, upgrading to BSP2", what));
        bsp.format = BspFormat::Bsp2;
    }

    Ok(bsp)
}

fn emit_q2_brushes(assembler: &mut Assembler, model: &ModelEntity) {
    for brush in &model.brushes {
        let first_side = assembler.bsp.brush_sides.len() as i32;

        for face in &brush.faces {
            let (plane_id, _) = assembler.ctx.planes.id_for(&face.plane);

            assembler.bsp.brush_sides.push(bsp::Q2BrushSide {
                plane: plane_id as u16,
                texinfo: face.texinfo as i16,
            });
        }

        assembler.bsp.brushes.push(bsp::Q2Brush {
            first_side,
            side_count: (assembler.bsp.brush_sides.len() as i32) - first_side,
            contents: assembler.options.game.contents_to_disk(brush.contents),
        });
    }

    // Leaf brush lists: brushes whose bounds touch the leaf bounds.
    let brush_base = assembler.bsp.brushes.len() - model.brushes.len();

    for leaf_index in 0..assembler.bsp.leaves.len() {
        if assembler.bsp.leaves[leaf_index].leaf_brush_count > 0 {
            continue;
        }

        let (mins, maxs) = (
            assembler.bsp.leaves[leaf_index].mins,
            assembler.bsp.leaves[leaf_index].maxs,
        );

        let first = assembler.bsp.leaf_brushes.len() as u32;

        for (offset, brush) in model.brushes.iter().enumerate() {
            let overlaps = (0..3).all(|axis| {
                brush.bounds.mins[axis] <= maxs[axis] as f64
                    && brush.bounds.maxs[axis] >= mins[axis] as f64
            });

            if overlaps {
                assembler
                    .bsp
                    .leaf_brushes
                    .push((brush_base + offset) as u32);
            }
        }

        let leaf = &mut assembler.bsp.leaves[leaf_index];
        leaf.first_leaf_brush = first;
        leaf.leaf_brush_count = assembler.bsp.leaf_brushes.len() as u32 - first;
    }
}
