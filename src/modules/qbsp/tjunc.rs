//! T-junction repair: vertices of neighboring faces that land on the open
//! interior of an edge are welded into that edge, so the engine's integer
//! rasterizer cannot crack a seam there.

use std::collections::HashMap;

use glam::DVec3;

use crate::utils::{constants::EQUAL_EPSILON, simple_calculs::Winding};

use super::Tree;

/// Splitting instead of a hard cap: the on-disk face format stores the
/// vertex count in a small field, and legacy tools aborted at 64.
const MAX_FACE_VERTICES: usize = 64;

const CELL: f64 = 64.;

fn cell_of(p: DVec3) -> (i64, i64, i64) {
    (
        (p.x / CELL).floor() as i64,
        (p.y / CELL).floor() as i64,
        (p.z / CELL).floor() as i64,
    )
}

#[derive(Default)]
struct VertexGrid {
    cells: HashMap<(i64, i64, i64), Vec<DVec3>>,
}

impl VertexGrid {
    fn insert(&mut self, p: DVec3) {
        let cell = self.cells.entry(cell_of(p)).or_default();

        if !cell.iter().any(|&q| (q - p).abs().max_element() < EQUAL_EPSILON) {
            cell.push(p);
        }
    }

    /// Every stored vertex within the AABB of segment (a, b), padded.
    fn near_segment(&self, a: DVec3, b: DVec3) -> Vec<DVec3> {
        let mins = a.min(b) - DVec3::splat(1.);
        let maxs = a.max(b) + DVec3::splat(1.);

        let mut out = vec![];
        let lo = cell_of(mins);
        let hi = cell_of(maxs);

        for x in lo.0..=hi.0 {
            for y in lo.1..=hi.1 {
                for z in lo.2..=hi.2 {
                    if let Some(points) = self.cells.get(&(x, y, z)) {
                        out.extend(points.iter().copied());
                    }
                }
            }
        }

        out
    }
}

/// Parameter of `v` along the open segment `(a, b)`, when `v` lies on it.
fn on_segment(a: DVec3, b: DVec3, v: DVec3) -> Option<f64> {
    let ab = b - a;
    let av = v - a;
    let len = ab.length();

    if len < EQUAL_EPSILON {
        return None;
    }

    let t = av.dot(ab) / (len * len);
    if t <= EQUAL_EPSILON || t >= 1. - EQUAL_EPSILON / len {
        return None;
    }

    // Perpendicular distance from the segment.
    let closest = a + ab * t;
    if (v - closest).length() > EQUAL_EPSILON {
        return None;
    }

    Some(t)
}

/// Welds grid vertices into one winding. Returns the number of inserted
/// points.
fn weld_winding(winding: &mut Winding, grid: &VertexGrid) -> usize {
    let mut inserted = 0;
    let mut i = 0;

    while i < winding.len() {
        let a = winding[i];
        let b = winding[(i + 1) % winding.len()];

        let mut on_edge: Vec<(f64, DVec3)> = grid
            .near_segment(a, b)
            .into_iter()
            .filter_map(|v| on_segment(a, b, v).map(|t| (t, v)))
            .collect();

        if on_edge.is_empty() {
            i += 1;
            continue;
        }

        on_edge.sort_by(|(t1, _), (t2, _)| t1.total_cmp(t2));

        // Insert the closest one and revisit this edge for the rest.
        let (_, v) = on_edge[0];
        winding.insert(i + 1, v);
        inserted += 1;
    }

    inserted
}

/// A face that outgrew the vertex cap splits in half along its longest
/// axis and both halves get rewelded.
fn split_oversized(winding: Winding) -> Vec<Winding> {
    if winding.len() <= MAX_FACE_VERTICES {
        return vec![winding];
    }

    let bounds = winding.bounds();
    let axis = bounds.longest_axis();
    let mut normal = DVec3::ZERO;
    normal[axis] = 1.;

    let plane = crate::utils::simple_calculs::Plane3D::new(normal, bounds.center()[axis]);
    let (front, back) = winding.split(&plane);

    let mut out = vec![];
    for part in [front, back].into_iter().flatten() {
        out.extend(split_oversized(part));
    }

    out
}

/// Fixes T-junctions across every face in the tree.
pub fn fix_tjuncs(tree: &mut Tree) -> usize {
    let mut grid = VertexGrid::default();

    for node in &tree.nodes {
        for face in &node.faces {
            for &point in face.winding.points() {
                grid.insert(point);
            }
        }
    }

    let mut inserted = 0;

    for node in tree.nodes.iter_mut() {
        let mut rebuilt = vec![];

        for mut face in node.faces.drain(..) {
            inserted += weld_winding(&mut face.winding, &grid);

            if face.winding.len() > MAX_FACE_VERTICES {
                for part in split_oversized(face.winding.clone()) {
                    let mut sub = face.clone();
                    sub.winding = part;
                    inserted += weld_winding(&mut sub.winding, &grid);
                    rebuilt.push(sub);
                }
            } else {
                rebuilt.push(face);
            }
        }

        node.faces = rebuilt;
    }

    inserted
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn midpoint_welded_into_edge() {
        let mut grid = VertexGrid::default();
        grid.insert(DVec3::new(32., 0., 0.));

        let mut winding = Winding::new(vec![
            DVec3::new(0., 64., 0.),
            DVec3::new(64., 64., 0.),
            DVec3::new(64., 0., 0.),
            DVec3::new(0., 0., 0.),
        ]);

        let inserted = weld_winding(&mut winding, &grid);

        assert_eq!(inserted, 1);
        assert_eq!(winding.len(), 5);
        // Welded between (64,0,0) and (0,0,0).
        assert_eq!(winding[3], DVec3::new(32., 0., 0.));
    }

    #[test]
    fn vertex_off_edge_ignored() {
        let mut grid = VertexGrid::default();
        grid.insert(DVec3::new(32., 1., 0.));

        let mut winding = Winding::new(vec![
            DVec3::new(0., 64., 0.),
            DVec3::new(64., 64., 0.),
            DVec3::new(64., 0., 0.),
            DVec3::new(0., 0., 0.),
        ]);

        assert_eq!(weld_winding(&mut winding, &grid), 0);
        assert_eq!(winding.len(), 4);
    }

    #[test]
    fn endpoints_do_not_reinsert() {
        let mut grid = VertexGrid::default();
        grid.insert(DVec3::new(0., 0., 0.));
        grid.insert(DVec3::new(64., 0., 0.));

        let mut winding = Winding::new(vec![
            DVec3::new(0., 64., 0.),
            DVec3::new(64., 64., 0.),
            DVec3::new(64., 0., 0.),
            DVec3::new(0., 0., 0.),
        ]);

        assert_eq!(weld_winding(&mut winding, &grid), 0);
    }

    #[test]
    fn multiple_points_sorted_along_edge() {
        let mut grid = VertexGrid::default();
        grid.insert(DVec3::new(48., 0., 0.));
        grid.insert(DVec3::new(16., 0., 0.));

        let mut winding = Winding::new(vec![
            DVec3::new(0., 64., 0.),
            DVec3::new(64., 64., 0.),
            DVec3::new(64., 0., 0.),
            DVec3::new(0., 0., 0.),
        ]);

        assert_eq!(weld_winding(&mut winding, &grid), 2);

        // Edge ran 64->0 in x, so 48 comes before 16.
        assert_eq!(winding[3], DVec3::new(48., 0., 0.));
        assert_eq!(winding[4], DVec3::new(16., 0., 0.));
    }

    #[test]
    fn oversized_face_splits() {
        // A long, thin strip with a vertex welded every half unit.
        let mut points = vec![DVec3::new(0., 1., 0.), DVec3::new(100., 1., 0.)];
        for i in (0..=200).rev() {
            points.push(DVec3::new(i as f64 * 0.5, 0., 0.));
        }

        let parts = split_oversized(Winding::new(points));

        assert!(parts.len() > 1);
        for part in parts {
            assert!(part.len() <= MAX_FACE_VERTICES);
        }
    }
}
