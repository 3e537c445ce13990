//! Recursive BSP partitioning with heuristic splitter selection and the
//! midsplit fallback that bounds tree depth on pathological input.

use glam::DVec3;

use crate::utils::{
    constants::ON_EPSILON,
    simple_calculs::{Aabb, Plane3D, Side},
};

use super::{
    cell_interior_point, contents_at_point, CompiledBrush, Contents, CsgFace, PlaneTable, Tree,
    TreeNode,
};

/// Penalty per face split by a candidate plane.
const SPLIT_PENALTY: f64 = 5.;
/// Non-axial planes pay a flat surcharge.
const NON_AXIAL_PENALTY: f64 = 8.;
/// Above this many faces in a node, balance beats split avoidance.
const MIDSPLIT_FACE_THRESHOLD: usize = 1024;
/// Room left around the map so outer cells stay bounded.
const SIDESPACE: f64 = 24.;

struct Builder<'a> {
    nodes: Vec<TreeNode>,
    planes: &'a mut PlaneTable,
    brushes: &'a [CompiledBrush],
    max_node_size: f64,
}

/// How a face relates to a candidate plane.
fn face_side(face: &CsgFace, plane: &Plane3D) -> Side {
    if face.plane.equals(plane) || face.plane.equals(&plane.flip()) {
        return Side::On;
    }

    let mut front = false;
    let mut back = false;

    for &point in face.winding.points() {
        match plane.side_of(point) {
            Side::Front => front = true,
            Side::Back => back = true,
            Side::On => {}
        }
    }

    match (front, back) {
        (true, true) => Side::Front, // straddling; the caller counts it as a split
        (true, false) => Side::Front,
        (false, true) => Side::Back,
        (false, false) => Side::On,
    }
}

fn straddles(face: &CsgFace, plane: &Plane3D) -> bool {
    let mut front = false;
    let mut back = false;

    for &point in face.winding.points() {
        match plane.side_of(point) {
            Side::Front => front = true,
            Side::Back => back = true,
            Side::On => {}
        }

        if front && back {
            return true;
        }
    }

    false
}

impl<'a> Builder<'a> {
    /// Lowest-scoring face plane: few splits, good balance, axial bonus.
    fn choose_splitter(&mut self, faces: &[CsgFace]) -> Option<Plane3D> {
        let mut best: Option<(f64, Plane3D)> = None;

        let mut candidates: Vec<Plane3D> = vec![];
        for face in faces {
            let (id, _) = self.planes.id_for(&face.plane);
            let canonical = *self.planes.get(id);

            if !candidates.iter().any(|c| c.equals(&canonical)) {
                candidates.push(canonical);
            }
        }

        for candidate in candidates {
            let mut fronts = 0i64;
            let mut backs = 0i64;
            let mut splits = 0i64;
            let mut on = 0i64;

            for face in faces {
                if face.plane.equals(&candidate) || face.plane.equals(&candidate.flip()) {
                    on += 1;
                } else if straddles(face, &candidate) {
                    splits += 1;
                } else if face_side(face, &candidate) == Side::Front {
                    fronts += 1;
                } else {
                    backs += 1;
                }
            }

            if on == 0 {
                // Progress guarantee: the splitter must consume faces.
                continue;
            }

            let mut score = SPLIT_PENALTY * splits as f64 + (fronts - backs).abs() as f64;
            if !candidate.is_axial() {
                score += NON_AXIAL_PENALTY;
            }

            match best {
                Some((best_score, _)) if best_score <= score => {}
                _ => best = Some((score, candidate)),
            }
        }

        best.map(|(_, plane)| plane)
    }

    /// The midsplit fallback: an axial plane through the center of the
    /// box's longest axis. Only useful if it separates the faces.
    fn midsplit_plane(&self, faces: &[CsgFace], bounds: &Aabb) -> Option<Plane3D> {
        let axis = bounds.longest_axis();
        let mut normal = DVec3::ZERO;
        normal[axis] = 1.;

        let plane = Plane3D::new(normal, bounds.center()[axis].round());

        let mut front = false;
        let mut back = false;

        for face in faces {
            match face_side(face, &plane) {
                Side::Front => front = true,
                Side::Back => back = true,
                Side::On => return Some(plane),
            }
            if straddles(face, &plane) {
                return Some(plane);
            }
        }

        (front && back).then_some(plane)
    }

    fn make_leaf(&mut self, cell_planes: &[Plane3D], bounds: Aabb) -> usize {
        let sample = cell_interior_point(cell_planes, bounds.center());
        let (contents, detail) = contents_at_point(self.brushes, sample);

        self.nodes.push(TreeNode {
            plane_id: None,
            children: [0, 0],
            faces: vec![],
            bounds,
            contents: Some(contents),
            detail,
            occupied: false,
            cluster: -1,
        });

        self.nodes.len() - 1
    }

    fn build(&mut self, faces: Vec<CsgFace>, cell_planes: Vec<Plane3D>, bounds: Aabb) -> usize {
        if faces.is_empty() {
            return self.make_leaf(&cell_planes, bounds);
        }

        let oversized = bounds.is_valid() && bounds.size().max_element() > self.max_node_size;
        let crowded = faces.len() > MIDSPLIT_FACE_THRESHOLD;

        let splitter = if oversized || crowded {
            self.midsplit_plane(&faces, &bounds)
                .or_else(|| self.choose_splitter(&faces))
        } else {
            self.choose_splitter(&faces)
        };

        let Some(splitter) = splitter else {
            // Faces remain but nothing partitions them; the cell is done.
            return self.make_leaf(&cell_planes, bounds);
        };

        let (plane_id, _) = self.planes.id_for(&splitter);
        let splitter = *self.planes.get(plane_id);

        let mut node_faces = vec![];
        let mut front_faces = vec![];
        let mut back_faces = vec![];

        for face in faces {
            if face.plane.equals(&splitter) || face.plane.equals(&splitter.flip()) {
                node_faces.push(face);
                continue;
            }

            let (front, back) = face.winding.split(&splitter);

            match (front, back) {
                (Some(front), Some(back)) => {
                    front_faces.push(CsgFace {
                        winding: front,
                        ..face.clone()
                    });
                    back_faces.push(CsgFace {
                        winding: back,
                        ..face
                    });
                }
                (Some(front), None) => front_faces.push(CsgFace {
                    winding: front,
                    ..face
                }),
                (None, Some(back)) => back_faces.push(CsgFace {
                    winding: back,
                    ..face
                }),
                // Degenerate after split; drop it.
                (None, None) => {}
            }
        }

        let front_bounds = side_bounds(&bounds, &splitter, true);
        let back_bounds = side_bounds(&bounds, &splitter, false);

        let mut front_cell = cell_planes.clone();
        front_cell.push(splitter.flip());
        let mut back_cell = cell_planes;
        back_cell.push(splitter);

        let front_child = self.build(front_faces, front_cell, front_bounds);
        let back_child = self.build(back_faces, back_cell, back_bounds);

        let bounds = self.nodes[front_child]
            .bounds
            .union(&self.nodes[back_child].bounds);

        self.nodes.push(TreeNode {
            plane_id: Some(plane_id),
            children: [front_child, back_child],
            faces: node_faces,
            bounds,
            contents: None,
            detail: false,
            occupied: false,
            cluster: -1,
        });

        self.nodes.len() - 1
    }
}

/// Halves a box along an axial plane; non-axial splits keep the parent box.
fn side_bounds(bounds: &Aabb, plane: &Plane3D, front: bool) -> Aabb {
    if !plane.is_axial() || !bounds.is_valid() {
        return *bounds;
    }

    let axis = plane.dominant_axis();
    let positive = plane.normal[axis] > 0.;
    let mut out = *bounds;

    if front == positive {
        out.mins[axis] = out.mins[axis].max(plane.distance * plane.normal[axis].signum());
    } else {
        out.maxs[axis] = out.maxs[axis].min(plane.distance * plane.normal[axis].signum());
    }

    out
}

/// Builds the BSP for one model from its CSG-trimmed faces.
pub fn build_tree(
    faces: Vec<CsgFace>,
    brushes: &[CompiledBrush],
    planes: &mut PlaneTable,
    max_node_size: f64,
) -> Tree {
    let mut world_bounds = Aabb::new();
    for face in &faces {
        world_bounds = world_bounds.union(&face.winding.bounds());
    }
    for brush in brushes {
        world_bounds = world_bounds.union(&brush.bounds);
    }
    if !world_bounds.is_valid() {
        world_bounds.add_point(DVec3::splat(-64.));
        world_bounds.add_point(DVec3::splat(64.));
    }
    let world_bounds = world_bounds.expand(SIDESPACE);

    // Outward box planes keep every recursion cell bounded.
    let mut cell_planes = vec![];
    for axis in 0..3 {
        let mut normal = DVec3::ZERO;

        normal[axis] = 1.;
        cell_planes.push(Plane3D::new(normal, world_bounds.maxs[axis]));

        normal[axis] = -1.;
        cell_planes.push(Plane3D::new(normal, -world_bounds.mins[axis]));
    }

    let mut builder = Builder {
        nodes: vec![],
        planes,
        brushes,
        max_node_size,
    };

    let root = builder.build(faces, cell_planes, world_bounds);

    Tree {
        nodes: builder.nodes,
        root,
    }
}

/// Structural leaf test used by the fill and by leaf assignment: anything
/// at or past `ON_EPSILON` outside every brush is open space.
pub fn point_in_any_solid(brushes: &[CompiledBrush], point: DVec3) -> bool {
    brushes.iter().any(|brush| {
        brush.contents.is_solid_like()
            && brush.bounds.expand(ON_EPSILON).contains_point(point)
            && brush.contains_point(point)
    })
}

#[cfg(test)]
mod test {
    use map::Map;

    use crate::modules::qbsp::{csg, test_maps::room_map, CompileContext, ModelEntity, QbspOptions};
    use crate::modules::qbsp::prepare_entities;

    use super::*;

    fn build_room() -> (Tree, CompileContext, Vec<ModelEntity>) {
        let map = Map::from_text(&room_map("")).unwrap();
        let options = QbspOptions::default();
        let mut ctx = CompileContext::default();

        let entities = prepare_entities(&map, &options, &mut ctx).unwrap();
        let faces = csg::csg_chop(&entities[0].brushes, &mut ctx);
        let tree = build_tree(
            faces,
            &entities[0].brushes,
            &mut ctx.planes,
            options.max_node_size,
        );

        (tree, ctx, entities)
    }

    #[test]
    fn room_center_is_empty_leaf() {
        let (tree, ctx, _) = build_room();

        let leaf = tree.leaf_at(&ctx.planes, DVec3::ZERO);
        assert_eq!(tree.nodes[leaf].contents, Some(Contents::Empty));
    }

    #[test]
    fn wall_interior_is_solid_leaf() {
        let (tree, ctx, _) = build_room();

        let leaf = tree.leaf_at(&ctx.planes, DVec3::new(0., 0., -136.));
        assert_eq!(tree.nodes[leaf].contents, Some(Contents::Solid));
    }

    #[test]
    fn every_point_lands_in_exactly_one_leaf() {
        let (tree, ctx, _) = build_room();

        // Probe a grid; leaf_at is total by construction, so this checks
        // the leaves exist and carry contents.
        for x in [-100., 0., 100.] {
            for z in [-140., 0., 140.] {
                let leaf = tree.leaf_at(&ctx.planes, DVec3::new(x, 0., z));
                assert!(tree.is_leaf(leaf));
                assert!(tree.nodes[leaf].contents.is_some());
            }
        }
    }

    #[test]
    fn node_faces_live_on_node_planes() {
        let (tree, ctx, _) = build_room();

        for node in &tree.nodes {
            let Some(plane_id) = node.plane_id else {
                continue;
            };
            let plane = ctx.planes.get(plane_id);

            for face in &node.faces {
                for &point in face.winding.points() {
                    assert!(plane.distance_to(point).abs() < ON_EPSILON * 2.);
                }
            }
        }
    }
}
