//! Outside-fill sealing: flood from the point entities through the portal
//! graph; whatever empty space the flood never reaches is void and turns
//! solid. Reaching the outside pseudo-node is a leak.

use std::collections::{HashMap, VecDeque};

use glam::DVec3;

use super::{
    portals::{PortalGraph, OUTSIDE_NODE},
    Contents, PlaneTable, QbspOptions, Tree,
};

pub enum FillResult {
    Sealed { filled: usize },
    Leaked { trail: Vec<DVec3> },
    NoOccupants,
}

/// Contents the fill flood can pass through. Liquids do not seal; neither
/// does detail, deliberately.
fn passable(contents: Contents) -> bool {
    !contents.seals()
}

pub fn fill_outside(
    tree: &mut Tree,
    graph: &PortalGraph,
    planes: &PlaneTable,
    occupants: &[DVec3],
    options: &QbspOptions,
) -> FillResult {
    if !options.fill {
        return FillResult::Sealed { filled: 0 };
    }
    if occupants.is_empty() {
        return FillResult::NoOccupants;
    }

    let mut visited = vec![false; tree.nodes.len()];
    let mut queue = VecDeque::new();
    // leaf -> (portal crossed, previous leaf); for the leak trail.
    let mut came_from: HashMap<usize, (usize, usize)> = HashMap::new();
    let mut origin_of: HashMap<usize, DVec3> = HashMap::new();

    for &origin in occupants {
        let leaf = tree.leaf_at(planes, origin);
        let contents = tree.nodes[leaf].contents.unwrap_or(Contents::Solid);

        if contents.seals() {
            // An entity buried in solid cannot seed the flood.
            continue;
        }

        if !visited[leaf] {
            visited[leaf] = true;
            origin_of.insert(leaf, origin);
            queue.push_back(leaf);
        }
    }

    if queue.is_empty() {
        return FillResult::NoOccupants;
    }

    while let Some(leaf) = queue.pop_front() {
        for &portal_id in graph.portals_of(leaf) {
            let other = graph.other_side(portal_id, leaf);

            if other == OUTSIDE_NODE {
                return FillResult::Leaked {
                    trail: leak_trail(graph, &came_from, &origin_of, leaf, portal_id, options),
                };
            }

            if visited[other] {
                continue;
            }

            let contents = tree.nodes[other].contents.unwrap_or(Contents::Solid);
            if !passable(contents) {
                continue;
            }

            visited[other] = true;
            came_from.insert(other, (portal_id, leaf));
            queue.push_back(other);
        }
    }

    // The flood stayed inside: everything unreached is void.
    let mut filled = 0;
    for index in 0..tree.nodes.len() {
        if !tree.is_leaf(index) || visited[index] {
            continue;
        }

        let node = &mut tree.nodes[index];
        if node.contents == Some(Contents::Empty) {
            node.contents = Some(Contents::Solid);
            node.detail = false;
            filled += 1;
        }
    }

    for index in 0..tree.nodes.len() {
        if tree.is_leaf(index) {
            tree.nodes[index].occupied = visited[index];
        }
    }

    FillResult::Sealed { filled }
}

/// Walks the flood's breadcrumb chain back to the seeding entity and emits
/// a dense point trail from the entity toward the escape portal.
fn leak_trail(
    graph: &PortalGraph,
    came_from: &HashMap<usize, (usize, usize)>,
    origin_of: &HashMap<usize, DVec3>,
    leaf: usize,
    escape_portal: usize,
    options: &QbspOptions,
) -> Vec<DVec3> {
    let mut waypoints = vec![graph.portals[escape_portal].winding.centroid()];
    let mut cursor = leaf;

    while let Some(&(portal_id, previous)) = came_from.get(&cursor) {
        waypoints.push(graph.portals[portal_id].winding.centroid());
        cursor = previous;
    }

    let seed = origin_of
        .get(&cursor)
        .copied()
        .unwrap_or_else(|| waypoints.last().copied().unwrap_or(DVec3::ZERO));
    waypoints.push(seed);
    waypoints.reverse();

    // Interpolate so the engine draws a continuous line.
    let step = options.leak_dist.max(0.5);
    let mut trail = vec![];

    for pair in waypoints.windows(2) {
        let (from, to) = (pair[0], pair[1]);
        let length = (to - from).length();
        let count = (length / step).ceil() as usize;

        for i in 0..count.max(1) {
            trail.push(from + (to - from) * (i as f64 / count.max(1) as f64));
        }
    }
    if let Some(&last) = waypoints.last() {
        trail.push(last);
    }

    trail
}

#[cfg(test)]
mod test {
    use map::Map;

    use crate::modules::qbsp::{
        csg, portals, prepare_entities, solidbsp, test_maps::room_map, CompileContext, QbspOptions,
    };

    use super::*;

    fn compile_room(map_text: &str) -> (Tree, PortalGraph, CompileContext, Vec<DVec3>) {
        let map = Map::from_text(map_text).unwrap();
        let options = QbspOptions::default();
        let mut ctx = CompileContext::default();

        let entities = prepare_entities(&map, &options, &mut ctx).unwrap();
        let faces = csg::csg_chop(&entities[0].brushes, &mut ctx);
        let tree = solidbsp::build_tree(
            faces,
            &entities[0].brushes,
            &mut ctx.planes,
            options.max_node_size,
        );
        let graph = portals::portalize(&tree, &ctx.planes);

        let occupants = crate::modules::qbsp::occupant_points(&map);

        (tree, graph, ctx, occupants)
    }

    #[test]
    fn sealed_room_fills_void() {
        let (mut tree, graph, ctx, occupants) = compile_room(&room_map(""));
        let options = QbspOptions::default();

        match fill_outside(&mut tree, &graph, &ctx.planes, &occupants, &options) {
            FillResult::Sealed { filled } => assert!(filled > 0, "void should fill"),
            _ => panic!("room should be sealed"),
        }

        // After filling, every leaf outside the walls is solid.
        let void = tree.leaf_at(&ctx.planes, DVec3::new(0., 0., 1000.));
        assert_eq!(tree.nodes[void].contents, Some(Contents::Solid));
    }

    #[test]
    fn hole_in_room_leaks_with_trail() {
        // Drop one wall brush: the room opens to the void.
        let full = room_map("");
        let open_wall_start = full.find("( -128 -144 -128 )").unwrap();
        let brush_open = full[..open_wall_start].rfind('{').unwrap();
        let brush_close = full[open_wall_start..].find('}').unwrap() + open_wall_start;

        let mut text = String::new();
        text += &full[..brush_open];
        text += &full[brush_close + 1..];

        let (mut tree, graph, ctx, occupants) = compile_room(&text);
        let options = QbspOptions::default();

        match fill_outside(&mut tree, &graph, &ctx.planes, &occupants, &options) {
            FillResult::Leaked { trail } => {
                assert!(trail.len() >= 2);
                // The trail starts at the occupant.
                assert!((trail[0] - DVec3::ZERO).length() < 1e-6);
            }
            _ => panic!("open room should leak"),
        }
    }

    #[test]
    fn nofill_skips_everything() {
        let (mut tree, graph, ctx, occupants) = compile_room(&room_map(""));
        let mut options = QbspOptions::default();
        options.fill = false;

        match fill_outside(&mut tree, &graph, &ctx.planes, &occupants, &options) {
            FillResult::Sealed { filled } => assert_eq!(filled, 0),
            _ => panic!("nofill must not flood"),
        }
    }
}
