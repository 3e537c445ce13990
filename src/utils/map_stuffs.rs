//! From .map brush definitions to convex polyhedra the compiler can chop.

use glam::DVec3;

use map::{Brush, SurfaceExtension};

use crate::{
    modules::qbsp::Contents,
    utils::{
        constants::{CLIP_TEXTURE, HINT_TEXTURE, ORIGIN_TEXTURE, SKIP_TEXTURE},
        simple_calculs::{Plane3D, Winding},
    },
};

use bsp::Q2Contents;

/// Deduced from the texture name the way the Quake-family compilers do it.
/// A Q2 `contents flags value` trailer overrides the name.
pub fn contents_from_texture(name: &str, extension: Option<&SurfaceExtension>) -> Contents {
    if let Some(ext) = extension {
        if ext.contents != 0 {
            return contents_from_q2_bits(ext.contents as u32);
        }
    }

    let lower = name.to_ascii_lowercase();
    // Liquid and sky prefixes; '!' is the GoldSrc liquid marker.
    let stripped = lower.trim_start_matches(['*', '!']);

    if lower.starts_with("sky") {
        Contents::Sky
    } else if lower.starts_with('*') || lower.starts_with('!') {
        if stripped.starts_with("lava") {
            Contents::Lava
        } else if stripped.starts_with("slime") {
            Contents::Slime
        } else {
            Contents::Water
        }
    } else if lower == CLIP_TEXTURE {
        Contents::PlayerClip
    } else if lower == ORIGIN_TEXTURE {
        Contents::Origin
    } else {
        Contents::Solid
    }
}

fn contents_from_q2_bits(bits: u32) -> Contents {
    let flags = Q2Contents::from_bits_truncate(bits);

    if flags.contains(Q2Contents::ORIGIN) {
        Contents::Origin
    } else if flags.contains(Q2Contents::PLAYERCLIP) {
        Contents::PlayerClip
    } else if flags.contains(Q2Contents::MONSTERCLIP) {
        Contents::MonsterClip
    } else if flags.contains(Q2Contents::AREAPORTAL) {
        Contents::Areaportal
    } else if flags.contains(Q2Contents::LAVA) {
        Contents::Lava
    } else if flags.contains(Q2Contents::SLIME) {
        Contents::Slime
    } else if flags.contains(Q2Contents::WATER) {
        Contents::Water
    } else if flags.contains(Q2Contents::MIST) {
        Contents::Mist
    } else if flags.contains(Q2Contents::WINDOW) {
        Contents::Window
    } else if flags.contains(Q2Contents::DETAIL) {
        Contents::DetailSolid
    } else {
        Contents::Solid
    }
}

/// A face is dropped from the output but still clips the world.
pub fn is_skip_texture(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower == SKIP_TEXTURE || lower == HINT_TEXTURE || lower == "null"
}

pub enum BrushPlanesError {
    /// Two faces share a plane; the duplicate index is dropped.
    Duplicate(usize),
    /// Opposite-facing duplicate: the brush has no volume.
    Degenerate,
}

/// Face planes from the brush's point triples, with duplicates reported.
pub fn brush_planes(brush: &Brush) -> (Vec<Plane3D>, Vec<BrushPlanesError>) {
    let mut planes: Vec<Plane3D> = Vec::with_capacity(brush.planes.len());
    let mut problems = vec![];

    for (index, face) in brush.planes.iter().enumerate() {
        let plane = match Plane3D::from_three_points(face.p1, face.p2, face.p3) {
            Ok(plane) => plane,
            Err(_) => {
                problems.push(BrushPlanesError::Duplicate(index));
                continue;
            }
        };

        if planes.iter().any(|p| p.equals(&plane)) {
            problems.push(BrushPlanesError::Duplicate(index));
            continue;
        }

        if planes.iter().any(|p| p.equals(&plane.flip())) {
            problems.push(BrushPlanesError::Degenerate);
        }

        planes.push(plane);
    }

    (planes, problems)
}

/// Clips a base winding on each plane by every other half-space. `None`
/// entries are faces that clipped away entirely.
///
/// Plane normals point out of the brush; the interior is the back side.
pub fn brush_windings(planes: &[Plane3D]) -> Vec<Option<Winding>> {
    planes
        .iter()
        .enumerate()
        .map(|(index, plane)| {
            let mut winding = Some(Winding::base_for_plane(plane));

            for (other_index, other) in planes.iter().enumerate() {
                if other_index == index {
                    continue;
                }

                winding = match winding {
                    // Keep the interior side of the other plane.
                    Some(w) => w.clip(&other.flip(), false),
                    None => None,
                };
            }

            winding.filter(|w| !w.is_tiny() && w.area() > 1e-5)
        })
        .collect()
}

/// Centroid of an origin brush, the rotation origin of its bmodel.
pub fn origin_brush_centroid(brush: &Brush) -> Option<DVec3> {
    let (planes, _) = brush_planes(brush);
    let windings = brush_windings(&planes);

    let mut sum = DVec3::ZERO;
    let mut count = 0;

    for winding in windings.into_iter().flatten() {
        for &point in winding.points() {
            sum += point;
            count += 1;
        }
    }

    (count > 0).then(|| sum / count as f64)
}

/// Scale, rotate (yaw/pitch/roll degrees), then translate a set of brush
/// point triples, for `misc_external_map` grafting.
pub fn transform_brush(brush: &mut Brush, scale: DVec3, angles: DVec3, translate: DVec3) {
    let transform = |p: DVec3| rotate_by_angles(p * scale, angles) + translate;

    for face in brush.planes.iter_mut() {
        face.p1 = transform(face.p1);
        face.p2 = transform(face.p2);
        face.p3 = transform(face.p3);
    }
}

/// Quake entity angle order: pitch around Y, yaw around Z, roll around X.
pub fn rotate_by_angles(point: DVec3, angles: DVec3) -> DVec3 {
    let pitch = angles.x.to_radians();
    let yaw = angles.y.to_radians();
    let roll = angles.z.to_radians();

    let rolled = {
        let (sin, cos) = roll.sin_cos();
        DVec3::new(point.x, cos * point.y - sin * point.z, sin * point.y + cos * point.z)
    };
    let pitched = {
        let (sin, cos) = pitch.sin_cos();
        DVec3::new(
            cos * rolled.x + sin * rolled.z,
            rolled.y,
            -sin * rolled.x + cos * rolled.z,
        )
    };

    let (sin, cos) = yaw.sin_cos();
    DVec3::new(
        cos * pitched.x - sin * pitched.y,
        sin * pitched.x + cos * pitched.y,
        pitched.z,
    )
}

#[cfg(test)]
mod test {
    use map::{BrushPlane, StandardAlignment, TextureAlignment};

    use super::*;

    fn cube_brush(mins: DVec3, maxs: DVec3, texture: &str) -> Brush {
        // Point triples the way an editor writes an axial box.
        let face = |p1, p2, p3| BrushPlane {
            p1,
            p2,
            p3,
            texture_name: texture.to_string(),
            alignment: TextureAlignment::Standard(StandardAlignment {
                shift: Default::default(),
                rotation: 0.,
                scale: glam::DVec2::ONE,
            }),
            extension: None,
        };

        let (a, b) = (mins, maxs);

        Brush {
            planes: vec![
                // -x
                face(
                    DVec3::new(a.x, a.y, a.z),
                    DVec3::new(a.x, b.y, a.z),
                    DVec3::new(a.x, a.y, b.z),
                ),
                // +x
                face(
                    DVec3::new(b.x, a.y, a.z),
                    DVec3::new(b.x, a.y, b.z),
                    DVec3::new(b.x, b.y, a.z),
                ),
                // -y
                face(
                    DVec3::new(a.x, a.y, a.z),
                    DVec3::new(a.x, a.y, b.z),
                    DVec3::new(b.x, a.y, a.z),
                ),
                // +y
                face(
                    DVec3::new(a.x, b.y, a.z),
                    DVec3::new(b.x, b.y, a.z),
                    DVec3::new(a.x, b.y, b.z),
                ),
                // -z
                face(
                    DVec3::new(a.x, a.y, a.z),
                    DVec3::new(b.x, a.y, a.z),
                    DVec3::new(a.x, b.y, a.z),
                ),
                // +z
                face(
                    DVec3::new(a.x, a.y, b.z),
                    DVec3::new(a.x, b.y, b.z),
                    DVec3::new(b.x, a.y, b.z),
                ),
            ],
        }
    }

    #[test]
    fn cube_produces_six_quads() {
        let brush = cube_brush(DVec3::splat(-64.), DVec3::splat(64.), "wall");
        let (planes, problems) = brush_planes(&brush);

        assert_eq!(planes.len(), 6);
        assert!(problems.is_empty());

        let windings = brush_windings(&planes);
        for winding in &windings {
            let winding = winding.as_ref().unwrap();
            assert_eq!(winding.len(), 4);
            assert!((winding.area() - 128. * 128.).abs() < 1e-6);
        }
    }

    #[test]
    fn cube_normals_point_out() {
        let brush = cube_brush(DVec3::splat(-64.), DVec3::splat(64.), "wall");
        let (planes, _) = brush_planes(&brush);

        for plane in &planes {
            // The center is inside, so every plane sees it on the back.
            assert!(plane.distance_to(DVec3::ZERO) < 0.);
        }
    }

    #[test]
    fn contents_classification() {
        assert_eq!(contents_from_texture("sky4", None), Contents::Sky);
        assert_eq!(contents_from_texture("*lava1", None), Contents::Lava);
        assert_eq!(contents_from_texture("*04water1", None), Contents::Water);
        assert_eq!(contents_from_texture("!slime0", None), Contents::Slime);
        assert_eq!(contents_from_texture("clip", None), Contents::PlayerClip);
        assert_eq!(contents_from_texture("city2_5", None), Contents::Solid);

        let ext = SurfaceExtension {
            contents: (Q2Contents::WATER | Q2Contents::TRANSLUCENT).bits() as i32,
            flags: 0,
            value: 0,
        };
        assert_eq!(
            contents_from_texture("e1u1/water4", Some(&ext)),
            Contents::Water
        );
    }

    #[test]
    fn origin_centroid() {
        let brush = cube_brush(
            DVec3::new(16., 16., 16.),
            DVec3::new(48., 48., 48.),
            "origin",
        );

        let centroid = origin_brush_centroid(&brush).unwrap();
        assert!((centroid - DVec3::splat(32.)).length() < 1e-6);
    }

    #[test]
    fn degenerate_brush_detected() {
        let mut brush = cube_brush(DVec3::splat(-64.), DVec3::splat(64.), "wall");
        brush.planes.truncate(2);
        // A brush with too few planes produces unbounded windings that the
        // area filter kills; the caller then rejects the brush.
        let (planes, _) = brush_planes(&brush);
        let windings = brush_windings(&planes);

        // Two parallel-ish planes leave huge windings, not a closed solid;
        // the brush loader rejects those by bounds check.
        assert_eq!(windings.len(), 2);
    }

    #[test]
    fn rotation_yaw_90() {
        let p = rotate_by_angles(DVec3::new(1., 0., 0.), DVec3::new(0., 90., 0.));
        assert!((p - DVec3::new(0., 1., 0.)).length() < 1e-9);
    }
}
