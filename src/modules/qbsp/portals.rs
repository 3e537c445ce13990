//! Portal construction between leafs, the scaffold the external vis tool
//! flows through, and the outside-fill's adjacency structure.

use glam::DVec3;

use crate::utils::simple_calculs::{Plane3D, Winding};

use super::{PlaneTable, Tree};

/// Pseudo-node on the far side of the head-node portals.
pub const OUTSIDE_NODE: usize = usize::MAX;

#[derive(Debug, Clone)]
pub struct Portal {
    pub plane: Plane3D,
    pub winding: Winding,
    /// `nodes[0]` is on the front of `plane`, `nodes[1]` on the back.
    pub nodes: [usize; 2],
    pub alive: bool,
}

#[derive(Debug, Default)]
pub struct PortalGraph {
    pub portals: Vec<Portal>,
    /// Per tree node; the extra last slot belongs to the outside node.
    node_portals: Vec<Vec<usize>>,
}

impl PortalGraph {
    fn slot(&self, node: usize) -> usize {
        if node == OUTSIDE_NODE {
            self.node_portals.len() - 1
        } else {
            node
        }
    }

    pub fn portals_of(&self, node: usize) -> &[usize] {
        &self.node_portals[self.slot(node)]
    }

    fn add(&mut self, portal: Portal) -> usize {
        let id = self.portals.len();
        let nodes = portal.nodes;
        self.portals.push(portal);

        let front = self.slot(nodes[0]);
        self.node_portals[front].push(id);
        let back = self.slot(nodes[1]);
        self.node_portals[back].push(id);

        id
    }

    fn remove(&mut self, id: usize) {
        let nodes = self.portals[id].nodes;
        self.portals[id].alive = false;

        for node in nodes {
            let slot = self.slot(node);
            self.node_portals[slot].retain(|&p| p != id);
        }
    }

    pub fn live_portal_count(&self) -> usize {
        self.portals.iter().filter(|p| p.alive).count()
    }

    /// The leaf on the other side of a portal from `node`.
    pub fn other_side(&self, id: usize, node: usize) -> usize {
        let portal = &self.portals[id];
        if portal.nodes[0] == node {
            portal.nodes[1]
        } else {
            portal.nodes[0]
        }
    }
}

/// The winding of a would-be portal on `plane`, clipped to the convex cell
/// bounded by the portals currently attached to `node`.
fn clipped_base_winding(
    graph: &PortalGraph,
    node: usize,
    plane: &Plane3D,
) -> Option<Winding> {
    let mut winding = Some(Winding::base_for_plane(plane));

    for &portal_id in graph.portals_of(node) {
        let portal = &graph.portals[portal_id];
        let keep_front = portal.nodes[0] == node;

        winding = match winding {
            Some(w) => {
                if keep_front {
                    w.clip(&portal.plane, true)
                } else {
                    w.clip(&portal.plane.flip(), true)
                }
            }
            None => None,
        };
    }

    winding.filter(|w| !w.is_tiny())
}

fn cut_node_portals(tree: &Tree, planes: &PlaneTable, graph: &mut PortalGraph, node: usize) {
    if tree.is_leaf(node) {
        return;
    }

    let tree_node = &tree.nodes[node];
    let plane = *planes.get(tree_node.plane_id.unwrap());
    let [front_child, back_child] = tree_node.children;

    // The new portal separating the two children.
    if let Some(winding) = clipped_base_winding(graph, node, &plane) {
        graph.add(Portal {
            plane,
            winding,
            nodes: [front_child, back_child],
            alive: true,
        });
    }

    // Split every portal attached to this node between the children.
    let attached: Vec<usize> = graph.portals_of(node).to_vec();

    for portal_id in attached {
        let portal = graph.portals[portal_id].clone();
        let this_side = if portal.nodes[0] == node { 0 } else { 1 };

        let (front_w, back_w) = portal.winding.split(&plane);

        graph.remove(portal_id);

        if let Some(front_w) = front_w {
            if !front_w.is_tiny() {
                let mut nodes = portal.nodes;
                nodes[this_side] = front_child;
                graph.add(Portal {
                    plane: portal.plane,
                    winding: front_w,
                    nodes,
                    alive: true,
                });
            }
        }

        if let Some(back_w) = back_w {
            if !back_w.is_tiny() {
                let mut nodes = portal.nodes;
                nodes[this_side] = back_child;
                graph.add(Portal {
                    plane: portal.plane,
                    winding: back_w,
                    nodes,
                    alive: true,
                });
            }
        }
    }

    cut_node_portals(tree, planes, graph, front_child);
    cut_node_portals(tree, planes, graph, back_child);
}

/// Builds the leaf-to-leaf portal graph for a tree.
pub fn portalize(tree: &Tree, planes: &PlaneTable) -> PortalGraph {
    let mut graph = PortalGraph {
        portals: vec![],
        node_portals: vec![vec![]; tree.nodes.len() + 1],
    };

    // Head-node portals: the faces of the world box, leading outside.
    let bounds = tree.nodes[tree.root].bounds.expand(8.);
    let mut box_planes = vec![];
    for axis in 0..3 {
        let mut normal = DVec3::ZERO;

        normal[axis] = 1.;
        box_planes.push(Plane3D::new(normal, bounds.maxs[axis]));

        normal[axis] = -1.;
        box_planes.push(Plane3D::new(normal, -bounds.mins[axis]));
    }

    for (index, plane) in box_planes.iter().enumerate() {
        let mut winding = Some(Winding::base_for_plane(plane));

        for (other_index, other) in box_planes.iter().enumerate() {
            if other_index == index {
                continue;
            }

            winding = match winding {
                Some(w) => w.clip(&other.flip(), false),
                None => None,
            };
        }

        if let Some(winding) = winding {
            // Front of an outward box plane is the void.
            graph.add(Portal {
                plane: *plane,
                winding,
                nodes: [OUTSIDE_NODE, tree.root],
                alive: true,
            });
        }
    }

    cut_node_portals(tree, planes, &mut graph, tree.root);

    graph
}

/// True when a leaf collapses into the shared solid leaf 0 on disk and so
/// never gets a number. The Quake family lowers detail to plain solid;
/// Q2 keeps detail leafs (they carry the DETAIL contents bit).
pub fn leaf_collapses(contents: super::Contents, collapse_detail: bool) -> bool {
    contents == super::Contents::Solid
        || (collapse_detail
            && matches!(
                contents,
                super::Contents::DetailSolid | super::Contents::DetailWall
            ))
}

/// Sequential numbers for the leaves that get their own on-disk entry, in
/// the same DFS order the BSP writer emits them.
pub fn leaf_numbering(tree: &Tree, collapse_detail: bool) -> (Vec<Option<usize>>, usize) {
    let mut numbers = vec![None; tree.nodes.len()];
    let mut next = 0;

    fn walk(
        tree: &Tree,
        node: usize,
        collapse_detail: bool,
        numbers: &mut Vec<Option<usize>>,
        next: &mut usize,
    ) {
        if tree.is_leaf(node) {
            let contents = tree.nodes[node].contents.unwrap_or(super::Contents::Solid);
            if !leaf_collapses(contents, collapse_detail) {
                numbers[node] = Some(*next);
                *next += 1;
            }
            return;
        }

        walk(tree, tree.nodes[node].children[0], collapse_detail, numbers, next);
        walk(tree, tree.nodes[node].children[1], collapse_detail, numbers, next);
    }

    walk(tree, tree.root, collapse_detail, &mut numbers, &mut next);

    (numbers, next)
}

/// The PRT1 text consumed by the vis tool.
pub fn write_prt(tree: &Tree, graph: &PortalGraph, _planes: &PlaneTable) -> String {
    let (numbers, leaf_count) = leaf_numbering(tree, true);

    let mut lines = vec![];

    for portal in graph.portals.iter().filter(|p| p.alive) {
        let [front, back] = portal.nodes;
        if front == OUTSIDE_NODE || back == OUTSIDE_NODE {
            continue;
        }

        let (Some(front_num), Some(back_num)) = (
            numbers.get(front).copied().flatten(),
            numbers.get(back).copied().flatten(),
        ) else {
            continue;
        };

        let front_contents = tree.nodes[front].contents.unwrap_or(super::Contents::Solid);
        let back_contents = tree.nodes[back].contents.unwrap_or(super::Contents::Solid);
        if !front_contents.is_visible_space() || !back_contents.is_visible_space() {
            continue;
        }

        let mut line = format!("{} {} {}", portal.winding.len(), front_num, back_num);
        for point in portal.winding.points() {
            line += &format!(" ({} {} {})", point.x, point.y, point.z);
        }
        lines.push(line);
    }

    let mut out = String::from("PRT1\n");
    out += &format!("{}\n", leaf_count);
    out += &format!("{}\n", lines.len());
    for line in lines {
        out += &line;
        out += "\n";
    }

    out
}

#[cfg(test)]
mod test {
    use map::Map;

    use crate::modules::qbsp::{
        csg, prepare_entities, solidbsp, test_maps::room_map, CompileContext, Contents, QbspOptions,
    };

    use super::*;

    fn room_graph() -> (Tree, PortalGraph, CompileContext) {
        let map = Map::from_text(&room_map("")).unwrap();
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

        let graph = portalize(&tree, &ctx.planes);
        (tree, graph, ctx)
    }

    #[test]
    fn portals_attach_only_to_leaves() {
        let (tree, graph, _) = room_graph();

        for portal in graph.portals.iter().filter(|p| p.alive) {
            for &node in &portal.nodes {
                if node != OUTSIDE_NODE {
                    assert!(tree.is_leaf(node));
                }
            }
        }
    }

    #[test]
    fn sealed_room_interior_has_no_outside_portal() {
        let (tree, graph, ctx) = room_graph();

        // The leaf at the room center: none of its portals lead outside,
        // and every neighbor is another leaf of the room or a wall.
        let center = tree.leaf_at(&ctx.planes, glam::DVec3::ZERO);
        assert_eq!(tree.nodes[center].contents, Some(Contents::Empty));

        for &portal_id in graph.portals_of(center) {
            let other = graph.other_side(portal_id, center);
            assert_ne!(other, OUTSIDE_NODE);
        }
    }

    #[test]
    fn prt_has_header_and_counts() {
        let (tree, graph, ctx) = room_graph();
        let prt = write_prt(&tree, &graph, &ctx.planes);

        let mut lines = prt.lines();
        assert_eq!(lines.next(), Some("PRT1"));

        let leafs: usize = lines.next().unwrap().parse().unwrap();
        let portals: usize = lines.next().unwrap().parse().unwrap();

        assert!(leafs >= 1);
        // A plain box room is one empty cell: no interior portals needed.
        let _ = portals;
    }
}
