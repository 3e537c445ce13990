//! Texture-space subdivision and surface-extent validation.
//!
//! The fixed-point lightmap sampler caps a face's texture-space extent;
//! anything larger is bisected along the exceeding axis until it fits.

use glam::DVec4;

use crate::{
    err,
    utils::{
        constants::{DEFAULT_LIGHTMAP_SCALE, MAX_SURFACE_EXTENT},
        simple_calculs::{Plane3D, Winding},
    },
};

use super::{CompileContext, CsgFace, QbspOptions, Tree};

fn uv_extents(winding: &Winding, s: DVec4, t: DVec4) -> [(f64, f64); 2] {
    let mut out = [(f64::INFINITY, f64::NEG_INFINITY); 2];

    for &point in winding.points() {
        let u = s.truncate().dot(point) + s.w;
        let v = t.truncate().dot(point) + t.w;

        out[0].0 = out[0].0.min(u);
        out[0].1 = out[0].1.max(u);
        out[1].0 = out[1].0.min(v);
        out[1].1 = out[1].1.max(v);
    }

    out
}

fn exempt(name: &str, options: &QbspOptions) -> bool {
    let lower = name.to_ascii_lowercase();

    if lower.starts_with("sky") {
        return !options.split_sky;
    }
    if lower.starts_with('*') || lower.starts_with('!') {
        return !options.split_turb;
    }

    false
}

/// Splits `face` until neither texture axis exceeds `subdivide_size`.
fn subdivide_face(face: CsgFace, s: DVec4, t: DVec4, size: f64, out: &mut Vec<CsgFace>) -> usize {
    let extents = uv_extents(&face.winding, s, t);

    for (axis, &(min, max)) in extents.iter().enumerate() {
        if max - min <= size {
            continue;
        }

        // World-space plane with u(p) == split constant.
        let vec = if axis == 0 { s } else { t };
        let axis_len = vec.truncate().length();
        if axis_len < 1e-9 {
            break;
        }

        let split_value = min + size - DEFAULT_LIGHTMAP_SCALE;
        let plane = Plane3D::new(
            vec.truncate() / axis_len,
            (split_value - vec.w) / axis_len,
        );

        let (front, back) = face.winding.split(&plane);

        match (front, back) {
            (Some(front), Some(back)) => {
                let mut a = face.clone();
                a.winding = back;
                let mut b = face;
                b.winding = front;

                let splits = 1
                    + subdivide_face(a, s, t, size, out)
                    + subdivide_face(b, s, t, size, out);
                return splits;
            }
            // Did not actually split; fall through to the other axis.
            _ => continue,
        }
    }

    out.push(face);
    0
}

/// Subdivides oversized faces in place. Returns the number of splits.
pub fn subdivide_tree_faces(
    tree: &mut Tree,
    ctx: &CompileContext,
    options: &QbspOptions,
) -> eyre::Result<usize> {
    let mut splits = 0;

    for node in tree.nodes.iter_mut() {
        if node.plane_id.is_none() {
            continue;
        }

        let mut rebuilt = vec![];

        for face in node.faces.drain(..) {
            let record = ctx.texinfos.get(face.texinfo);

            if exempt(&record.name, options) {
                rebuilt.push(face);
                continue;
            }

            splits += subdivide_face(face, record.s, record.t, options.subdivide_size, &mut rebuilt);
        }

        node.faces = rebuilt;
    }

    // Post-condition: every lightmapped face fits the sampler.
    for node in &tree.nodes {
        for face in &node.faces {
            let record = ctx.texinfos.get(face.texinfo);

            if exempt(&record.name, options) {
                continue;
            }

            let extents = uv_extents(&face.winding, record.s, record.t);
            for &(min, max) in &extents {
                let luxels = ((max - min) / DEFAULT_LIGHTMAP_SCALE).ceil() as i32;
                if luxels > MAX_SURFACE_EXTENT {
                    return err!(
                        "Bad surface extents: face with texture {} spans {} luxels",
                        record.name,
                        luxels
                    );
                }
            }
        }
    }

    Ok(splits)
}

#[cfg(test)]
mod test {
    use glam::DVec3;

    use crate::modules::qbsp::Contents;

    use super::*;

    fn big_face(width: f64) -> CsgFace {
        CsgFace {
            plane: Plane3D::new(DVec3::Z, 0.),
            winding: Winding::new(vec![
                DVec3::new(0., 128., 0.),
                DVec3::new(width, 128., 0.),
                DVec3::new(width, 0., 0.),
                DVec3::new(0., 0., 0.),
            ]),
            texinfo: 0,
            contents: Contents::Solid,
            detail: false,
            skip: false,
        }
    }

    fn identity_axes() -> (DVec4, DVec4) {
        (
            DVec4::new(1., 0., 0., 0.),
            DVec4::new(0., -1., 0., 0.),
        )
    }

    #[test]
    fn small_face_untouched() {
        let (s, t) = identity_axes();
        let mut out = vec![];

        let splits = subdivide_face(big_face(128.), s, t, 240., &mut out);

        assert_eq!(splits, 0);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn wide_face_bisected() {
        let (s, t) = identity_axes();
        let mut out = vec![];

        let splits = subdivide_face(big_face(512.), s, t, 240., &mut out);

        assert!(splits >= 2);
        assert!(out.len() >= 3);

        // Area is conserved and every piece fits.
        let total: f64 = out.iter().map(|f| f.winding.area()).sum();
        assert!((total - 512. * 128.).abs() < 1e-6);

        for face in &out {
            let [su, _] = uv_extents(&face.winding, s, t);
            assert!(su.1 - su.0 <= 240. + 1e-9);
        }
    }

    #[test]
    fn scale_multiplies_subdivision() {
        // 0.1 texture scale: the projection magnifies 10x, so a 128-unit
        // quad spans 1280 texels and needs several pieces per axis.
        let s = DVec4::new(10., 0., 0., 0.);
        let t = DVec4::new(0., -10., 0., 0.);
        let mut out = vec![];

        let face = CsgFace {
            winding: Winding::new(vec![
                DVec3::new(0., 128., 0.),
                DVec3::new(128., 128., 0.),
                DVec3::new(128., 0., 0.),
                DVec3::new(0., 0., 0.),
            ]),
            ..big_face(128.)
        };

        subdivide_face(face, s, t, 240., &mut out);

        // 1280 texels per axis with a 240-texel limit: at least a 6x6 grid.
        assert!(out.len() >= 36, "got {} pieces", out.len());
    }
}
