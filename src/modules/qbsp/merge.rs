//! Coplanar neighbor merging: two faces sharing an edge, plane, texinfo
//! and contents collapse into one while the result stays convex.

use crate::utils::{
    constants::{ANGLE_EPSILON, EQUAL_EPSILON},
    simple_calculs::Winding,
};

use super::{CsgFace, TexInfoTable, Tree};

fn points_equal(a: glam::DVec3, b: glam::DVec3) -> bool {
    (a - b).abs().max_element() < EQUAL_EPSILON
}

/// The merged winding of two polygons sharing edge `(a, b)` in one and
/// `(b, a)` in the other, or `None` when the union goes non-convex.
fn merge_windings(f1: &Winding, f2: &Winding, normal: glam::DVec3) -> Option<Winding> {
    for i in 0..f1.len() {
        let a = f1[i];
        let b = f1[(i + 1) % f1.len()];

        for j in 0..f2.len() {
            let c = f2[j];
            let d = f2[(j + 1) % f2.len()];

            if !points_equal(a, d) || !points_equal(b, c) {
                continue;
            }

            // Shared edge found: f1 runs a->b, f2 runs b->a.
            let mut merged = vec![];

            // b ... a around f1.
            for k in 0..f1.len() {
                merged.push(f1[(i + 1 + k) % f1.len()]);
            }
            // interior of a ... b around f2 (endpoints already present).
            for k in 1..f2.len() - 1 {
                merged.push(f2[(j + 1 + k) % f2.len()]);
            }

            // Convexity check, dropping collinear vertices as we go.
            let mut cleaned: Vec<glam::DVec3> = vec![];
            let n = merged.len();

            for k in 0..n {
                let prev = merged[(k + n - 1) % n];
                let cur = merged[k];
                let next = merged[(k + 1) % n];

                let e1 = cur - prev;
                let e2 = next - cur;
                let cross = e1.cross(e2);

                if cross.length_squared() < ANGLE_EPSILON {
                    // Collinear: drop the middle vertex.
                    continue;
                }
                // The winding is clockwise from the front, so turns go
                // against the normal.
                if cross.dot(normal) > 0. {
                    return None;
                }

                cleaned.push(cur);
            }

            if cleaned.len() < 3 {
                return None;
            }

            return Some(Winding::new(cleaned));
        }
    }

    None
}

fn mergeable(f1: &CsgFace, f2: &CsgFace) -> bool {
    f1.texinfo == f2.texinfo
        && f1.contents == f2.contents
        && f1.detail == f2.detail
        && f1.skip == f2.skip
        && (f1.plane.normal - f2.plane.normal).abs().max_element() < EQUAL_EPSILON
}

/// Merges a node's face list to fixpoint. Returns how many merges happened.
fn merge_face_list(faces: &mut Vec<CsgFace>, _texinfos: &TexInfoTable) -> usize {
    let mut merged_count = 0;
    let mut changed = true;

    while changed {
        changed = false;

        'outer: for i in 0..faces.len() {
            for j in (i + 1)..faces.len() {
                if !mergeable(&faces[i], &faces[j]) {
                    continue;
                }

                let Some(winding) =
                    merge_windings(&faces[i].winding, &faces[j].winding, faces[i].plane.normal)
                else {
                    continue;
                };

                faces[i].winding = winding;
                faces.remove(j);
                merged_count += 1;
                changed = true;
                break 'outer;
            }
        }
    }

    merged_count
}

pub fn merge_tree_faces(tree: &mut Tree, texinfos: &TexInfoTable) -> usize {
    let mut merged = 0;

    for node in tree.nodes.iter_mut() {
        if node.plane_id.is_some() {
            merged += merge_face_list(&mut node.faces, texinfos);
        }
    }

    merged
}

#[cfg(test)]
mod test {
    use glam::DVec3;

    use crate::utils::simple_calculs::Plane3D;

    use super::*;

    fn quad(x0: f64, x1: f64) -> Winding {
        // On z=0, clockwise from +z.
        Winding::new(vec![
            DVec3::new(x0, 64., 0.),
            DVec3::new(x1, 64., 0.),
            DVec3::new(x1, 0., 0.),
            DVec3::new(x0, 0., 0.),
        ])
    }

    fn face(winding: Winding) -> CsgFace {
        CsgFace {
            plane: Plane3D::new(DVec3::Z, 0.),
            winding,
            texinfo: 0,
            contents: crate::modules::qbsp::Contents::Solid,
            detail: false,
            skip: false,
        }
    }

    #[test]
    fn adjacent_quads_merge_to_one() {
        let mut faces = vec![face(quad(0., 64.)), face(quad(64., 128.))];

        let merged = merge_face_list(&mut faces, &TexInfoTable::default());

        assert_eq!(merged, 1);
        assert_eq!(faces.len(), 1);
        // Collinear midpoints removed: a clean quad remains.
        assert_eq!(faces[0].winding.len(), 4);
        assert!((faces[0].winding.area() - 128. * 64.).abs() < 1e-6);
    }

    #[test]
    fn different_texinfo_does_not_merge() {
        let mut faces = vec![face(quad(0., 64.)), face(quad(64., 128.))];
        faces[1].texinfo = 1;

        assert_eq!(merge_face_list(&mut faces, &TexInfoTable::default()), 0);
        assert_eq!(faces.len(), 2);
    }

    #[test]
    fn non_convex_union_rejected() {
        // An L-shape: the pieces share an edge but the union is concave.
        let a = Winding::new(vec![
            DVec3::new(0., 64., 0.),
            DVec3::new(64., 64., 0.),
            DVec3::new(64., 0., 0.),
            DVec3::new(0., 0., 0.),
        ]);
        let b = Winding::new(vec![
            DVec3::new(64., 64., 0.),
            DVec3::new(128., 64., 0.),
            DVec3::new(128., 32., 0.),
            DVec3::new(64., 32., 0.),
        ]);

        let mut faces = vec![face(a), face(b)];
        assert_eq!(merge_face_list(&mut faces, &TexInfoTable::default()), 0);
    }

    #[test]
    fn merge_is_orientation_sensitive() {
        let w1 = quad(0., 64.);
        let w2 = quad(64., 128.);

        // Shared edge must run in opposite directions in the two faces.
        assert!(merge_windings(&w1, &w2, DVec3::Z).is_some());
        assert!(merge_windings(&w1, &w2.flip(), DVec3::Z).is_none());
    }
}
