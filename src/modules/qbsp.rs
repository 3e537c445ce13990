//! The geometry compiler: .map in, .bsp (plus .prt / .pts sidecars) out.
//!
//! Pipeline: brushes to polyhedra, CSG chop by content priority, recursive
//! BSP partition, outside-fill sealing, portal graph, face merge /
//! subdivide / T-junction weld, clip hulls, lump assembly.

use std::{
    path::{Path, PathBuf},
    time::Instant,
};

use glam::{DVec3, DVec4};

use bsp::BspFormat;
use map::{axes, Map, TextureAlignment};

use crate::{
    entity::ModelInfo,
    err,
    game::GameDef,
    utils::{
        constants::{
            DEFAULT_MAX_NODE_SIZE, DEFAULT_SUBDIVIDE_SIZE, DETAIL_CLASSNAMES, ON_EPSILON,
        },
        map_stuffs::{
            brush_planes, brush_windings, contents_from_texture, is_skip_texture,
            origin_brush_centroid, transform_brush, BrushPlanesError,
        },
        misc::{parse_vec3, with_extension},
        simple_calculs::{Aabb, Plane3D, Winding},
    },
};

pub mod csg;
pub mod hulls;
pub mod merge;
pub mod outside;
pub mod portals;
pub mod solidbsp;
pub mod surfaces;
pub mod tjunc;
pub mod writebsp;

/// Compiler-internal contents. One value per brush; the game def lowers it
/// to the on-disk representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Contents {
    Empty,
    Solid,
    Sky,
    DetailWall,
    Window,
    DetailSolid,
    Lava,
    Slime,
    Water,
    Mist,
    DetailIllusionary,
    PlayerClip,
    MonsterClip,
    Areaportal,
    Origin,
}

impl Contents {
    /// CSG chop priority; a higher-priority brush eats the faces of a
    /// lower-priority one where they overlap.
    pub fn priority(&self) -> u8 {
        match self {
            Contents::Solid | Contents::Sky => 13,
            Contents::DetailWall => 12,
            Contents::Window => 11,
            Contents::DetailSolid => 10,
            Contents::Lava => 9,
            Contents::Slime => 8,
            Contents::Water => 7,
            Contents::Mist | Contents::DetailIllusionary => 6,
            Contents::PlayerClip => 5,
            Contents::MonsterClip => 4,
            Contents::Areaportal => 3,
            Contents::Origin => 1,
            Contents::Empty => 0,
        }
    }

    /// Blocks the outside-fill flood. Detail deliberately does not: a map
    /// sealed only by detail brushes leaks.
    pub fn seals(&self) -> bool {
        matches!(self, Contents::Solid | Contents::Sky)
    }

    pub fn is_solid_like(&self) -> bool {
        matches!(
            self,
            Contents::Solid | Contents::Sky | Contents::DetailWall | Contents::DetailSolid
        )
    }

    pub fn is_liquid(&self) -> bool {
        matches!(self, Contents::Water | Contents::Slime | Contents::Lava)
    }

    pub fn is_detail(&self) -> bool {
        matches!(
            self,
            Contents::DetailWall | Contents::DetailSolid | Contents::DetailIllusionary
        )
    }

    /// Shows up as renderable space in the portal file.
    pub fn is_visible_space(&self) -> bool {
        matches!(self, Contents::Empty | Contents::Mist | Contents::DetailIllusionary)
            || self.is_liquid()
    }
}

/// One face of a prepared brush.
#[derive(Debug, Clone)]
pub struct BrushFace {
    pub plane: Plane3D,
    pub winding: Winding,
    pub texinfo: u32,
    pub skip: bool,
}

/// A brush after planes, windings, texinfo and contents are resolved.
#[derive(Debug, Clone)]
pub struct CompiledBrush {
    pub faces: Vec<BrushFace>,
    pub planes: Vec<Plane3D>,
    pub contents: Contents,
    pub bounds: Aabb,
    pub map_order: usize,
    pub mirror_inside: bool,
}

impl CompiledBrush {
    pub fn contains_point(&self, point: DVec3) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.distance_to(point) <= ON_EPSILON)
    }
}

/// A face flowing through CSG, BSP and post-processing.
#[derive(Debug, Clone)]
pub struct CsgFace {
    pub plane: Plane3D,
    pub winding: Winding,
    pub texinfo: u32,
    /// Contents of the brush this face fronts.
    pub contents: Contents,
    pub detail: bool,
    pub skip: bool,
}

/// Canonical plane storage: the dominant normal component is positive, and
/// faces remember whether they use the flipped orientation.
#[derive(Debug, Default)]
pub struct PlaneTable {
    planes: Vec<Plane3D>,
}

impl PlaneTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: u32) -> &Plane3D {
        &self.planes[id as usize]
    }

    pub fn len(&self) -> usize {
        self.planes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.planes.is_empty()
    }

    pub fn all(&self) -> &[Plane3D] {
        &self.planes
    }

    /// Returns `(id, flipped)`.
    pub fn id_for(&mut self, plane: &Plane3D) -> (u32, bool) {
        let (canonical, flipped) = Self::canonicalize(plane);

        for (id, existing) in self.planes.iter().enumerate() {
            if existing.equals(&canonical) {
                return (id as u32, flipped);
            }
        }

        self.planes.push(canonical);
        ((self.planes.len() - 1) as u32, flipped)
    }

    fn canonicalize(plane: &Plane3D) -> (Plane3D, bool) {
        let axis = plane.dominant_axis();

        if plane.normal[axis] < 0. {
            (plane.flip(), true)
        } else {
            (*plane, false)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TexInfoRecord {
    pub s: DVec4,
    pub t: DVec4,
    pub miptex: u32,
    pub flags: u32,
    pub value: i32,
    pub name: String,
}

#[derive(Debug, Default)]
pub struct TexInfoTable {
    records: Vec<TexInfoRecord>,
}

impl TexInfoTable {
    pub fn get(&self, id: u32) -> &TexInfoRecord {
        &self.records[id as usize]
    }

    pub fn all(&self) -> &[TexInfoRecord] {
        &self.records
    }

    pub fn add(&mut self, record: TexInfoRecord) -> u32 {
        for (id, existing) in self.records.iter().enumerate() {
            if *existing == record {
                return id as u32;
            }
        }

        self.records.push(record);
        (self.records.len() - 1) as u32
    }
}

/// BSP tree arena. A node with `plane_id == None` is a leaf.
#[derive(Debug, Default)]
pub struct Tree {
    pub nodes: Vec<TreeNode>,
    pub root: usize,
}

#[derive(Debug, Default)]
pub struct TreeNode {
    pub plane_id: Option<u32>,
    pub children: [usize; 2],
    /// Faces lying on this node's plane.
    pub faces: Vec<CsgFace>,
    pub bounds: Aabb,
    /// Leaf fields.
    pub contents: Option<Contents>,
    pub detail: bool,
    pub occupied: bool,
    pub cluster: i32,
}

impl Tree {
    pub fn is_leaf(&self, index: usize) -> bool {
        self.nodes[index].plane_id.is_none()
    }

    pub fn leaf_at(&self, planes: &PlaneTable, point: DVec3) -> usize {
        let mut index = self.root;

        while let Some(plane_id) = self.nodes[index].plane_id {
            let plane = planes.get(plane_id);
            let child = if plane.distance_to(point) >= 0. { 0 } else { 1 };
            index = self.nodes[index].children[child];
        }

        index
    }

    pub fn leaves(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.nodes.len()).filter(|&i| self.is_leaf(i))
    }
}

/// The per-run compiler state: the spiritual replacement for the original
/// tools' file-scope globals, reset simply by building a new one.
#[derive(Debug, Default)]
pub struct CompileContext {
    pub planes: PlaneTable,
    pub texinfos: TexInfoTable,
    pub miptex_names: Vec<String>,
    pub warnings: Vec<String>,
}

impl CompileContext {
    pub fn miptex_id(&mut self, name: &str) -> u32 {
        if let Some(id) = self.miptex_names.iter().position(|n| n == name) {
            return id as u32;
        }

        self.miptex_names.push(name.to_string());
        (self.miptex_names.len() - 1) as u32
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        // One line per occurrence class keeps big maps readable.
        if !self.warnings.contains(&message) {
            log::warn!("{}", message);
            self.warnings.push(message);
        }
    }
}

/// A model-producing entity after brush preparation. Index 0 is the world.
#[derive(Debug)]
pub struct ModelEntity {
    pub entity: map::Entity,
    /// Index into the source map's entity list.
    pub source_index: usize,
    pub brushes: Vec<CompiledBrush>,
    pub origin: DVec3,
    pub info: ModelInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertFormat {
    Quake,
    Quake2,
    Valve,
    BrushPrimitives,
}

#[derive(Debug, Clone)]
pub struct QbspOptions {
    pub game: GameDef,
    pub format: Option<BspFormat>,
    pub fill: bool,
    pub clip_hulls: bool,
    pub remove_skip: bool,
    /// `-nodetail`: treat detail brushes as structural.
    pub detail_as_structural: bool,
    pub omit_detail: bool,
    pub omit_detail_wall: bool,
    pub omit_detail_illusionary: bool,
    pub omit_detail_fence: bool,
    pub only_ents: bool,
    pub split_sky: bool,
    pub split_turb: bool,
    pub trans_water: bool,
    pub subdivide_size: f64,
    pub max_node_size: f64,
    pub leak_dist: f64,
    pub leak_test: bool,
    pub force_prt1: bool,
    pub wad_paths: Vec<PathBuf>,
    pub convert: Option<ConvertFormat>,
}

impl Default for QbspOptions {
    fn default() -> Self {
        Self {
            game: GameDef::quake(),
            format: None,
            fill: true,
            clip_hulls: true,
            remove_skip: true,
            detail_as_structural: false,
            omit_detail: false,
            omit_detail_wall: false,
            omit_detail_illusionary: false,
            omit_detail_fence: false,
            only_ents: false,
            split_sky: false,
            split_turb: false,
            trans_water: true,
            subdivide_size: DEFAULT_SUBDIVIDE_SIZE,
            max_node_size: DEFAULT_MAX_NODE_SIZE,
            leak_dist: 2.,
            leak_test: false,
            force_prt1: false,
            wad_paths: vec![],
            convert: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct CompileStats {
    pub brushes: usize,
    pub csg_faces: usize,
    pub nodes: usize,
    pub leaves: usize,
    pub portals: usize,
    pub merged: usize,
    pub subdivided: usize,
    pub tjunc_points: usize,
}

pub struct CompileOutput {
    pub bsp: bsp::Bsp,
    pub portal_file: Option<String>,
    pub leak: Option<Vec<DVec3>>,
    pub stats: CompileStats,
    pub warnings: Vec<String>,
}

#[derive(Debug, Default)]
pub struct Qbsp {
    options: QbspOptions,
}

impl Qbsp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn game(&mut self, game: GameDef) -> &mut Self {
        self.options.game = game;
        self
    }

    pub fn format(&mut self, format: BspFormat) -> &mut Self {
        self.options.format = Some(format);
        self
    }

    pub fn no_fill(&mut self) -> &mut Self {
        self.options.fill = false;
        self
    }

    pub fn no_clip(&mut self) -> &mut Self {
        self.options.clip_hulls = false;
        self
    }

    pub fn no_skip(&mut self) -> &mut Self {
        self.options.remove_skip = false;
        self
    }

    pub fn no_detail(&mut self) -> &mut Self {
        self.options.detail_as_structural = true;
        self
    }

    pub fn omit_detail(&mut self, all: bool, wall: bool, illusionary: bool, fence: bool) -> &mut Self {
        self.options.omit_detail = all;
        self.options.omit_detail_wall = wall;
        self.options.omit_detail_illusionary = illusionary;
        self.options.omit_detail_fence = fence;
        self
    }

    pub fn only_ents(&mut self) -> &mut Self {
        self.options.only_ents = true;
        self
    }

    pub fn split_special(&mut self) -> &mut Self {
        self.options.split_sky = true;
        self.options.split_turb = true;
        self
    }

    pub fn split_sky(&mut self) -> &mut Self {
        self.options.split_sky = true;
        self
    }

    pub fn split_turb(&mut self) -> &mut Self {
        self.options.split_turb = true;
        self
    }

    pub fn trans_water(&mut self, enabled: bool) -> &mut Self {
        self.options.trans_water = enabled;
        self
    }

    pub fn subdivide(&mut self, size: f64) -> &mut Self {
        self.options.subdivide_size = size;
        self
    }

    pub fn max_node_size(&mut self, size: f64) -> &mut Self {
        self.options.max_node_size = size;
        self
    }

    pub fn leak_dist(&mut self, dist: f64) -> &mut Self {
        self.options.leak_dist = dist;
        self
    }

    pub fn leak_test(&mut self) -> &mut Self {
        self.options.leak_test = true;
        self
    }

    pub fn force_prt1(&mut self) -> &mut Self {
        self.options.force_prt1 = true;
        self
    }

    pub fn wad_path(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.options.wad_paths.push(path.into());
        self
    }

    pub fn convert(&mut self, format: ConvertFormat) -> &mut Self {
        self.options.convert = Some(format);
        self
    }

    pub fn options(&self) -> &QbspOptions {
        &self.options
    }

    /// File front end: compiles `input` and writes the .bsp next to it (or
    /// at `output`), plus .prt and, on a leak, .pts.
    pub fn run(&self, input: impl AsRef<Path>, output: Option<PathBuf>) -> eyre::Result<CompileStats> {
        let input = input.as_ref();
        let start = Instant::now();

        log::info!("---- qbsp / {} ----", input.display());

        let map = Map::from_file(input)?;

        if let Some(target) = self.options.convert {
            let converted = convert_map(&map, target);
            let out = output.unwrap_or_else(|| with_extension(input, "converted.map"));
            converted.write(&out)?;
            log::info!("Converted {} -> {}", input.display(), out.display());
            return Ok(CompileStats::default());
        }

        let output = output.unwrap_or_else(|| with_extension(input, "bsp"));

        if self.options.only_ents {
            // Refresh the entity lump of an existing .bsp, nothing else.
            let mut bsp = bsp::Bsp::from_file(&output)
                .map_err(|e| eyre::eyre!("Cannot load {}: {}", output.display(), e))?;

            let mut ctx = CompileContext::default();
            let model_entities = prepare_entities(&map, &self.options, &mut ctx)?;
            bsp.entities = writebsp::entity_lump(&map, &model_entities);

            bsp.write_to_file(&output)
                .map_err(|e| eyre::eyre!("Cannot write {}: {}", output.display(), e))?;

            return Ok(CompileStats::default());
        }

        let out = self.compile(&map)?;

        if let Some(trail) = &out.leak {
            let pts_path = with_extension(&output, "pts");
            let mut pts = String::new();
            for point in trail {
                pts += &format!("{} {} {}\n", point.x, point.y, point.z);
            }
            std::fs::write(&pts_path, pts)?;
            log::warn!("Map leaked, wrote {}", pts_path.display());

            if self.options.leak_test {
                return err!("Map leaked with -leaktest enabled");
            }
        }

        if let Some(prt) = &out.portal_file {
            std::fs::write(with_extension(&output, "prt"), prt)?;
        }

        out.bsp
            .write_to_file(&output)
            .map_err(|e| eyre::eyre!("Cannot write {}: {}", output.display(), e))?;

        let summary = format!(
            "{} brushes, {} faces, {} nodes, {} leaves, {} portals in {:.3}s",
            out.stats.brushes,
            out.stats.csg_faces,
            out.stats.nodes,
            out.stats.leaves,
            out.stats.portals,
            start.elapsed().as_secs_f32()
        );
        log::info!("qbsp: {}", summary);

        // The .log sibling keeps the full transcript of the run.
        let mut transcript = format!("---- qbsp / {} ----\n", input.display());
        for warning in &out.warnings {
            transcript += &format!("WARNING: {}\n", warning);
        }
        transcript += &summary;
        transcript += "\n";
        std::fs::write(with_extension(&output, "log"), transcript)?;

        Ok(out.stats)
    }

    /// The whole compile as a pure function of the parsed map.
    pub fn compile(&self, map: &Map) -> eyre::Result<CompileOutput> {
        let options = &self.options;
        let mut ctx = CompileContext::default();
        let mut stats = CompileStats::default();

        let mut model_entities = prepare_entities(map, options, &mut ctx)?;

        if model_entities.is_empty() {
            return err!("Map has no worldspawn");
        }

        stats.brushes = model_entities.iter().map(|e| e.brushes.len()).sum();

        let mut models = vec![];
        let mut world_portal_file = None;
        let mut leak = None;

        for (model_index, model_entity) in model_entities.iter_mut().enumerate() {
            let is_world = model_index == 0;

            // CSG: chop overlapping brushes by content priority.
            let faces = csg::csg_chop(&model_entity.brushes, &mut ctx);
            stats.csg_faces += faces.len();

            let mut tree = solidbsp::build_tree(
                faces,
                &model_entity.brushes,
                &mut ctx.planes,
                options.max_node_size,
            );

            let mut portal_graph = portals::portalize(&tree, &ctx.planes);

            if is_world {
                let occupants = occupant_points(map);

                let fill =
                    outside::fill_outside(&mut tree, &portal_graph, &ctx.planes, &occupants, options);

                match fill {
                    outside::FillResult::Sealed { filled } => {
                        if filled > 0 {
                            // Void leaves became solid; portals are stale.
                            portal_graph = portals::portalize(&tree, &ctx.planes);
                        }
                    }
                    outside::FillResult::Leaked { trail } => {
                        ctx.warn("Map leaked: no .prt written, outside not filled");
                        leak = Some(trail);
                    }
                    outside::FillResult::NoOccupants => {
                        ctx.warn("No entities in empty space, skipping outside fill");
                    }
                }

                stats.portals = portal_graph.live_portal_count();

                if leak.is_none() {
                    world_portal_file =
                        Some(portals::write_prt(&tree, &portal_graph, &ctx.planes));
                }
            }

            // Face post-processing on every node's face list.
            stats.merged += merge::merge_tree_faces(&mut tree, &ctx.texinfos);
            stats.subdivided += surfaces::subdivide_tree_faces(&mut tree, &ctx, options)?;
            stats.tjunc_points += tjunc::fix_tjuncs(&mut tree);

            let clip_trees = if options.clip_hulls && !options.game.is_quake2() {
                hulls::build_clip_hulls(model_entity, options, &mut ctx)
            } else {
                vec![]
            };

            models.push(writebsp::ModelTrees {
                tree,
                clip_trees,
                origin: model_entity.origin,
            });
        }

        stats.nodes = models.iter().map(|m| m.tree.nodes.len()).sum();
        stats.leaves = models
            .iter()
            .map(|m| m.tree.leaves().count())
            .sum();

        let bsp = writebsp::write_bsp(map, &model_entities, models, &mut ctx, options)?;

        Ok(CompileOutput {
            bsp,
            portal_file: world_portal_file,
            leak,
            stats,
            warnings: ctx.warnings,
        })
    }
}

/// Origins of all point entities; the seeds for the outside-fill flood.
fn occupant_points(map: &Map) -> Vec<DVec3> {
    map.entities
        .iter()
        .filter(|e| e.brushes.is_none() && e.classname() != "worldspawn")
        .filter_map(|e| e.attributes.get("origin"))
        .filter_map(|origin| parse_vec3(origin))
        .collect()
}

/// Groups map entities into model entities: world (with grafted details)
/// first, then brush entities, point entities pass through.
fn prepare_entities(
    map: &Map,
    options: &QbspOptions,
    ctx: &mut CompileContext,
) -> eyre::Result<Vec<ModelEntity>> {
    let mut world_brushes: Vec<CompiledBrush> = vec![];
    let mut world_entity = None;
    let mut bmodels: Vec<ModelEntity> = vec![];
    let mut map_order = 0;

    for (source_index, map_entity) in map.entities.iter().enumerate() {
        let mut map_entity = map_entity.clone();
        let classname = map_entity.classname().to_string();

        if classname == "misc_external_map" {
            if let Err(e) = graft_external_map(&mut map_entity) {
                ctx.warn(format!("misc_external_map: {}", e));
                continue;
            }
        }

        let is_world = classname == "worldspawn";
        let is_detail = DETAIL_CLASSNAMES.contains(&classname.as_str());

        if is_world {
            world_entity = Some((source_index, map_entity.clone()));
        }

        let Some(brushes) = &map_entity.brushes else {
            continue;
        };

        let detail_kind = detail_contents_for(&classname, options);

        if is_detail && detail_kind.is_none() {
            // Omitted detail variant: drop the brushes entirely.
            continue;
        }

        let info = ModelInfo::from_entity(&map_entity.attributes);
        let mut compiled = vec![];
        let mut origin = DVec3::ZERO;

        for brush in brushes {
            map_order += 1;

            let Some(mut prepared) = prepare_brush(brush, map_order, &info, options, ctx) else {
                continue;
            };

            if prepared.contents == Contents::Origin {
                if let Some(centroid) = origin_brush_centroid(brush) {
                    origin = centroid;
                }
                // Origin brushes are stripped after recording the centroid.
                continue;
            }

            if is_detail || is_world {
                if let Some(kind) = detail_kind {
                    if is_detail && prepared.contents == Contents::Solid {
                        prepared.contents = kind;
                    }
                }
                world_brushes.push(prepared);
            } else {
                compiled.push(prepared);
            }
        }

        if !is_world && !is_detail {
            bmodels.push(ModelEntity {
                entity: map_entity.clone(),
                source_index,
                brushes: compiled,
                origin,
                info,
            });
        }
    }

    let Some((world_index, world_entity)) = world_entity else {
        return err!("Map has no worldspawn");
    };

    let world_info = ModelInfo::from_entity(&world_entity.attributes);

    let mut out = vec![ModelEntity {
        entity: world_entity,
        source_index: world_index,
        brushes: world_brushes,
        origin: DVec3::ZERO,
        info: world_info,
    }];
    out.extend(bmodels);

    Ok(out)
}

/// The structural-or-detail contents a detail classname maps to; `None`
/// when the variant is omitted by options.
fn detail_contents_for(classname: &str, options: &QbspOptions) -> Option<Contents> {
    let kind = match classname {
        "func_detail" => Contents::DetailSolid,
        "func_detail_wall" => Contents::DetailWall,
        "func_detail_illusionary" => Contents::DetailIllusionary,
        "func_detail_fence" => Contents::Window,
        _ => return Some(Contents::Solid),
    };

    if options.omit_detail {
        return None;
    }
    match kind {
        Contents::DetailWall if options.omit_detail_wall => return None,
        Contents::DetailIllusionary if options.omit_detail_illusionary => return None,
        Contents::Window if options.omit_detail_fence => return None,
        _ => {}
    }

    if options.detail_as_structural {
        return Some(Contents::Solid);
    }

    Some(kind)
}

fn prepare_brush(
    brush: &map::Brush,
    map_order: usize,
    info: &ModelInfo,
    options: &QbspOptions,
    ctx: &mut CompileContext,
) -> Option<CompiledBrush> {
    let (planes, problems) = brush_planes(brush);

    let mut degenerate = false;
    for problem in problems {
        match problem {
            BrushPlanesError::Duplicate(index) => {
                ctx.warn(format!("Brush {}: duplicate plane {} dropped", map_order, index));
            }
            BrushPlanesError::Degenerate => degenerate = true,
        }
    }

    if degenerate {
        ctx.warn(format!("Brush {}: opposite duplicate planes, skipped", map_order));
        return None;
    }

    if planes.len() < 4 {
        ctx.warn(format!("Brush {}: fewer than 4 usable planes, skipped", map_order));
        return None;
    }

    // Contents comes from the highest-priority face texture.
    let mut contents = Contents::Empty;
    for face in &brush.planes {
        let face_contents = contents_from_texture(&face.texture_name, face.extension.as_ref());
        if face_contents.priority() > contents.priority() || contents == Contents::Empty {
            contents = face_contents;
        }
    }

    if contents == Contents::Water && !options.trans_water {
        // Opaque water behaves like a visibility blocker.
        contents = Contents::Solid;
    }

    let windings = brush_windings(&planes);

    // The map face list and the plane list can disagree when duplicates
    // were dropped; rebuild face records by matching planes back up.
    let mut faces = vec![];
    let mut bounds = Aabb::new();
    let mut plane_cursor = 0;

    for face in &brush.planes {
        let Ok(face_plane) = Plane3D::from_three_points(face.p1, face.p2, face.p3) else {
            continue;
        };

        if plane_cursor >= planes.len() || !planes[plane_cursor].equals(&face_plane) {
            // This face's plane was dropped as a duplicate.
            continue;
        }

        let winding = windings[plane_cursor].clone();
        let plane = planes[plane_cursor];
        plane_cursor += 1;

        let Some(winding) = winding else {
            continue;
        };

        let (vecs, corrected) = axes::checked_tex_vecs(face, axes::DEFAULT_TEXTURE_SIZE);
        if corrected {
            ctx.warn(format!(
                "Face with texture {} has a degenerate projection, using the default",
                face.texture_name
            ));
        }

        let mut flags = 0u32;
        let mut value = 0i32;
        if let Some(ext) = &face.extension {
            flags = ext.flags as u32;
            value = ext.value;
        } else if options.game.is_quake2() {
            // No trailer on a Q2 map face: all flags clear.
        } else if contents.is_liquid() || contents == Contents::Sky {
            flags = bsp::TexInfo::SPECIAL;
        }

        let miptex = ctx.miptex_id(&face.texture_name);
        let texinfo = ctx.texinfos.add(TexInfoRecord {
            s: vecs.s,
            t: vecs.t,
            miptex,
            flags,
            value,
            name: face.texture_name.clone(),
        });

        for &point in winding.points() {
            bounds.add_point(point);
        }

        faces.push(BrushFace {
            plane,
            winding,
            texinfo,
            skip: options.remove_skip && is_skip_texture(&face.texture_name),
        });
    }

    if faces.is_empty() || !bounds.is_valid() {
        ctx.warn(format!("Brush {}: all faces clipped away, skipped", map_order));
        return None;
    }

    Some(CompiledBrush {
        faces,
        planes,
        contents,
        bounds,
        map_order,
        mirror_inside: info.mirror_inside,
    })
}

/// Loads the referenced map, transforms its worldspawn brushes, and grafts
/// them into this entity.
fn graft_external_map(target: &mut map::Entity) -> eyre::Result<()> {
    let Some(path) = target.attributes.get("_external_map") else {
        return err!("no _external_map key");
    };

    let external = Map::from_file(path)?;
    let Some(world) = external.worldspawn() else {
        return err!("external map {} has no worldspawn", path);
    };
    let Some(brushes) = &world.brushes else {
        return err!("external map {} has no brushes", path);
    };

    let scale = target
        .attributes
        .get("_external_map_scale")
        .and_then(|s| {
            parse_vec3(s).or_else(|| s.parse::<f64>().ok().map(DVec3::splat))
        })
        .unwrap_or(DVec3::ONE);
    let angles = target
        .attributes
        .get("_external_map_angles")
        .and_then(|s| parse_vec3(s))
        .or_else(|| {
            target
                .attributes
                .get("_external_map_angle")
                .and_then(|s| s.parse::<f64>().ok())
                .map(|yaw| DVec3::new(0., yaw, 0.))
        })
        .unwrap_or(DVec3::ZERO);
    let translate = target
        .attributes
        .get("origin")
        .and_then(|s| parse_vec3(s))
        .unwrap_or(DVec3::ZERO);

    let mut grafted = brushes.clone();
    for brush in grafted.iter_mut() {
        transform_brush(brush, scale, angles, translate);
    }

    if let Some(classname) = target
        .attributes
        .get("_external_map_classname")
        .map(|s| s.to_string())
    {
        target.attributes.insert("classname", classname);
    }

    match &mut target.brushes {
        Some(existing) => existing.extend(grafted),
        None => target.brushes = Some(grafted),
    }

    Ok(())
}

/// `-convert`: re-expresses every face's texture alignment in the target
/// syntax without compiling.
pub fn convert_map(map: &Map, target: ConvertFormat) -> Map {
    let mut out = map.clone();

    for entity in out.entities.iter_mut() {
        let Some(brushes) = &mut entity.brushes else {
            continue;
        };

        for brush in brushes.iter_mut() {
            for face in brush.planes.iter_mut() {
                face.alignment = match target {
                    ConvertFormat::Quake | ConvertFormat::Quake2 => TextureAlignment::Standard(
                        axes::to_standard(face, axes::DEFAULT_TEXTURE_SIZE),
                    ),
                    ConvertFormat::Valve => TextureAlignment::Valve220(axes::to_valve220(
                        face,
                        axes::DEFAULT_TEXTURE_SIZE,
                    )),
                    ConvertFormat::BrushPrimitives => TextureAlignment::BrushPrimitives(
                        axes::to_brush_primitives(face, axes::DEFAULT_TEXTURE_SIZE),
                    ),
                };

                if target == ConvertFormat::Quake2 && face.extension.is_none() {
                    face.extension = Some(Default::default());
                }
                if target != ConvertFormat::Quake2 {
                    face.extension = None;
                }
            }
        }
    }

    out
}

/// Leaf sample points need an interior point of a convex cell bounded by
/// outward-facing planes: the average of the cell's face centroids.
pub(crate) fn cell_interior_point(cell_planes: &[Plane3D], fallback: DVec3) -> DVec3 {
    let mut sum = DVec3::ZERO;
    let mut count = 0;

    for (index, plane) in cell_planes.iter().enumerate() {
        let mut winding = Some(Winding::base_for_plane(plane));

        for (other_index, other) in cell_planes.iter().enumerate() {
            if other_index == index {
                continue;
            }

            winding = match winding {
                Some(w) => w.clip(&other.flip(), false),
                None => None,
            };
        }

        if let Some(w) = winding {
            sum += w.centroid();
            count += 1;
        }
    }

    if count == 0 {
        fallback
    } else {
        sum / count as f64
    }
}

/// Highest-priority contents among the brushes containing `point`.
pub(crate) fn contents_at_point(brushes: &[CompiledBrush], point: DVec3) -> (Contents, bool) {
    let mut best = Contents::Empty;
    let mut best_order = 0;
    let mut detail = false;

    for brush in brushes {
        if !brush.bounds.expand(ON_EPSILON).contains_point(point) {
            continue;
        }
        if !brush.contains_point(point) {
            continue;
        }

        if brush.contents.priority() > best.priority()
            || (brush.contents.priority() == best.priority() && brush.map_order > best_order)
        {
            best = brush.contents;
            best_order = brush.map_order;
            detail = brush.contents.is_detail();
        }
    }

    (best, detail)
}

/// Map-text builders shared by the compiler and baker tests.
#[cfg(test)]
pub(crate) mod test_maps {
    use glam::DVec3;

    pub(crate) fn box_brush_text(mins: DVec3, maxs: DVec3, texture: &str) -> String {
        let (a, b) = (mins, maxs);
        format!(
            "{{\n\
             ( {ax} {ay} {az} ) ( {ax} {by} {az} ) ( {ax} {ay} {bz} ) {t} 0 0 0 1 1\n\
             ( {bx} {ay} {az} ) ( {bx} {ay} {bz} ) ( {bx} {by} {az} ) {t} 0 0 0 1 1\n\
             ( {ax} {ay} {az} ) ( {ax} {ay} {bz} ) ( {bx} {ay} {az} ) {t} 0 0 0 1 1\n\
             ( {ax} {by} {az} ) ( {bx} {by} {az} ) ( {ax} {by} {bz} ) {t} 0 0 0 1 1\n\
             ( {ax} {ay} {az} ) ( {bx} {ay} {az} ) ( {ax} {by} {az} ) {t} 0 0 0 1 1\n\
             ( {ax} {ay} {bz} ) ( {ax} {by} {bz} ) ( {bx} {ay} {bz} ) {t} 0 0 0 1 1\n\
             }}\n",
            ax = a.x, ay = a.y, az = a.z,
            bx = b.x, by = b.y, bz = b.z,
            t = texture,
        )
    }

    /// Six 16-unit-thick walls around a 256^3 empty room centered at the
    /// origin, with a light inside so the fill has an occupant. The
    /// ceiling brush gets its own texture for the sky scenarios.
    pub(crate) fn room_map_with(ceiling_texture: &str, extra: &str) -> String {
        let mut brushes = String::new();
        // floor, ceiling, four walls
        brushes += &box_brush_text(
            DVec3::new(-144., -144., -144.),
            DVec3::new(144., 144., -128.),
            "wall2",
        );
        brushes += &box_brush_text(
            DVec3::new(-144., -144., 128.),
            DVec3::new(144., 144., 144.),
            ceiling_texture,
        );
        brushes += &box_brush_text(
            DVec3::new(-144., -144., -128.),
            DVec3::new(-128., 144., 128.),
            "wall2",
        );
        brushes += &box_brush_text(
            DVec3::new(128., -144., -128.),
            DVec3::new(144., 144., 128.),
            "wall2",
        );
        brushes += &box_brush_text(
            DVec3::new(-128., -144., -128.),
            DVec3::new(128., -128., 128.),
            "wall2",
        );
        brushes += &box_brush_text(
            DVec3::new(-128., 128., -128.),
            DVec3::new(128., 144., 128.),
            "wall2",
        );

        format!(
            "{{\n\"classname\" \"worldspawn\"\n{brushes}}}\n\
             {{\n\"classname\" \"light\"\n\"origin\" \"0 0 0\"\n\"light\" \"300\"\n}}\n\
             {extra}"
        )
    }

    pub(crate) fn room_map(extra: &str) -> String {
        room_map_with("wall2", extra)
    }
}

#[cfg(test)]
mod test {
    use super::test_maps::{box_brush_text, room_map, room_map_with};
    use super::*;

    #[test]
    fn simple_room_compiles_sealed() {
        let map = Map::from_text(&room_map("")).unwrap();
        let out = Qbsp::new().compile(&map).unwrap();

        assert!(out.leak.is_none());
        assert!(out.portal_file.is_some());
        assert!(out.bsp.models.len() == 1);

        // Room center is empty, inside a wall is solid, void is solid.
        let bsp = &out.bsp;
        let head = bsp.models[0].head_nodes[0];

        let center = bsp.leaf_at(head, glam::Vec3::new(0., 0., 0.));
        assert_eq!(bsp.leaves[center].contents, -1, "center leaf should be empty");

        let in_wall = bsp.leaf_at(head, glam::Vec3::new(0., 0., -136.));
        assert_eq!(bsp.leaves[in_wall].contents, -2, "wall leaf should be solid");

        let void = bsp.leaf_at(head, glam::Vec3::new(0., 0., 2000.));
        assert_eq!(bsp.leaves[void].contents, -2, "void should be sealed solid");
    }

    #[test]
    fn open_map_leaks_and_writes_a_trail() {
        // Drop the -y wall: the room opens to the void.
        let full = room_map("");
        let hole_marker = full.find("( -128 -144 -128 )").unwrap();
        let brush_open = full[..hole_marker].rfind('{').unwrap();
        let brush_close = full[hole_marker..].find('}').unwrap() + hole_marker;

        let mut text = String::new();
        text += &full[..brush_open];
        text += &full[brush_close + 1..];

        let map = Map::from_text(&text).unwrap();
        let out = Qbsp::new().compile(&map).unwrap();

        let trail = out.leak.expect("open room must leak");
        assert!(trail.len() >= 2);
        assert!(out.portal_file.is_none(), "no .prt on a leaked map");
    }

    #[test]
    fn sky_ceiling_room_keeps_sky_inside() {
        // The S1 room with the ceiling swapped to sky: sky gets its own
        // leaf, the void beyond still seals solid, and sky must not
        // "fill outward".
        let map = Map::from_text(&room_map_with("sky1", "")).unwrap();
        let out = Qbsp::new().compile(&map).unwrap();

        assert!(out.leak.is_none());

        let bsp = &out.bsp;
        let head = bsp.models[0].head_nodes[0];

        let below = bsp.leaf_at(head, glam::Vec3::new(0., 0., 100.));
        assert_eq!(bsp.leaves[below].contents, -1, "below ceiling is empty");

        let inside = bsp.leaf_at(head, glam::Vec3::new(0., 0., 136.));
        assert_eq!(bsp.leaves[inside].contents, -6, "inside ceiling is sky");

        let above = bsp.leaf_at(head, glam::Vec3::new(0., 0., 1000.));
        assert_eq!(bsp.leaves[above].contents, -2, "above ceiling is solid");
    }

    #[test]
    fn detail_button_keeps_world_sealed() {
        let button = "\
{\n\"classname\" \"func_detail\"\n{\n\
( -16 -16 -128 ) ( -16 16 -128 ) ( -16 -16 -96 ) wall2 0 0 0 1 1\n\
( 16 -16 -128 ) ( 16 -16 -96 ) ( 16 16 -128 ) wall2 0 0 0 1 1\n\
( -16 -16 -128 ) ( -16 -16 -96 ) ( 16 -16 -128 ) wall2 0 0 0 1 1\n\
( -16 16 -128 ) ( 16 16 -128 ) ( -16 16 -96 ) wall2 0 0 0 1 1\n\
( -16 -16 -128 ) ( 16 -16 -128 ) ( -16 16 -128 ) wall2 0 0 0 1 1\n\
( -16 -16 -96 ) ( -16 16 -96 ) ( 16 -16 -96 ) wall2 0 0 0 1 1\n\
}\n}\n";

        let map = Map::from_text(&room_map(button)).unwrap();
        let out = Qbsp::new().compile(&map).unwrap();

        assert!(out.leak.is_none());

        let bsp = &out.bsp;
        let head = bsp.models[0].head_nodes[0];

        // Inside the button: solid (Q1 lowers detail to solid).
        let inside = bsp.leaf_at(head, glam::Vec3::new(0., 0., -112.));
        assert_eq!(bsp.leaves[inside].contents, -2);
    }

    #[test]
    fn bmodel_gets_its_own_model() {
        let door = "\
{\n\"classname\" \"func_door\"\n{\n\
( 32 -16 -64 ) ( 32 16 -64 ) ( 32 -16 0 ) door1 0 0 0 1 1\n\
( 48 -16 -64 ) ( 48 -16 0 ) ( 48 16 -64 ) door1 0 0 0 1 1\n\
( 32 -16 -64 ) ( 32 -16 0 ) ( 48 -16 -64 ) door1 0 0 0 1 1\n\
( 32 16 -64 ) ( 48 16 -64 ) ( 32 16 0 ) door1 0 0 0 1 1\n\
( 32 -16 -64 ) ( 48 -16 -64 ) ( 32 16 -64 ) door1 0 0 0 1 1\n\
( 32 -16 0 ) ( 32 16 0 ) ( 48 -16 0 ) door1 0 0 0 1 1\n\
}\n}\n";

        let map = Map::from_text(&room_map(door)).unwrap();
        let out = Qbsp::new().compile(&map).unwrap();

        assert_eq!(out.bsp.models.len(), 2);

        // The entity lump points at the submodel.
        let door_entity = out
            .bsp
            .entities
            .iter()
            .find(|e| e.classname() == "func_door")
            .unwrap();
        assert_eq!(door_entity.get("model"), Some("*1"));
    }

    #[test]
    fn water_room_stays_open_for_fill() {
        // A pool inside the room: liquids never seal, so the map still
        // floods and the pool leaf keeps water contents.
        let pool = box_brush_text(
            DVec3::new(-64., -64., -128.),
            DVec3::new(64., 64., -64.),
            "*water1",
        );

        let full = room_map("");
        let insert_at = full.find("}\n{\n\"classname\" \"light\"").unwrap();
        let mut text = String::new();
        text += &full[..insert_at];
        text += &pool;
        text += &full[insert_at..];

        let map = Map::from_text(&text).unwrap();
        let out = Qbsp::new().compile(&map).unwrap();

        assert!(out.leak.is_none());

        let bsp = &out.bsp;
        let head = bsp.models[0].head_nodes[0];

        let water = bsp.leaf_at(head, glam::Vec3::new(0., 0., -100.));
        assert_eq!(bsp.leaves[water].contents, -3, "pool leaf is water");

        let air = bsp.leaf_at(head, glam::Vec3::new(0., 0., 32.));
        assert_eq!(bsp.leaves[air].contents, -1);
    }

    #[test]
    fn edges_shared_in_opposite_directions() {
        let map = Map::from_text(&room_map("")).unwrap();
        let out = Qbsp::new().compile(&map).unwrap();
        let bsp = &out.bsp;

        // Tally surfedge references per edge and direction.
        let mut forward = vec![0usize; bsp.edges.len()];
        let mut backward = vec![0usize; bsp.edges.len()];

        for &surfedge in &bsp.surf_edges {
            if surfedge >= 0 {
                forward[surfedge as usize] += 1;
            } else {
                backward[(-surfedge) as usize] += 1;
            }
        }

        let mut shared = 0;
        for edge in 1..bsp.edges.len() {
            assert!(forward[edge] <= 1, "edge {} reused forward", edge);
            assert!(backward[edge] <= 1, "edge {} reused backward", edge);

            if forward[edge] == 1 && backward[edge] == 1 {
                shared += 1;
            }
        }

        assert!(shared > 0, "a sealed room must share edges between faces");
    }

    #[test]
    fn priority_tie_breaks_by_map_order() {
        assert_eq!(Contents::Solid.priority(), Contents::Sky.priority());

        let (contents, _) = contents_at_point(&[], DVec3::ZERO);
        assert_eq!(contents, Contents::Empty);
    }
}
