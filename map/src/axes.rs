//! Texture-axis derivation and conversion between alignment syntaxes.
//!
//! The projection of a face is a pair of 4-component vectors: `uv(p) =
//! (s.xyz() . p + s.w, t.xyz() . p + t.w)`. Every alignment syntax decodes
//! to that pair; conversions go through it.

use glam::{DVec2, DVec3, DVec4};

use crate::{
    BrushPlane, BrushPrimitivesAlignment, QuarkStyle, StandardAlignment, TextureAlignment,
    Valve220Alignment,
};

/// Fallback texture dimensions for Brush Primitives when no WAD is consulted.
pub const DEFAULT_TEXTURE_SIZE: [f64; 2] = [64., 64.];

const ZERO_EPSILON: f64 = 0.001;

/// One `(s, t, snapped_normal)` triple per cardinal face direction:
/// floor, ceiling, west, east, south, north.
pub const BASEAXIS: [[DVec3; 3]; 6] = [
    [
        DVec3::new(0., 0., 1.),
        DVec3::new(1., 0., 0.),
        DVec3::new(0., -1., 0.),
    ],
    [
        DVec3::new(0., 0., -1.),
        DVec3::new(1., 0., 0.),
        DVec3::new(0., -1., 0.),
    ],
    [
        DVec3::new(1., 0., 0.),
        DVec3::new(0., 1., 0.),
        DVec3::new(0., 0., -1.),
    ],
    [
        DVec3::new(-1., 0., 0.),
        DVec3::new(0., 1., 0.),
        DVec3::new(0., 0., -1.),
    ],
    [
        DVec3::new(0., 1., 0.),
        DVec3::new(1., 0., 0.),
        DVec3::new(0., 0., -1.),
    ],
    [
        DVec3::new(0., -1., 0.),
        DVec3::new(1., 0., 0.),
        DVec3::new(0., 0., -1.),
    ],
];

/// Picks the dominant cardinal direction for `normal`. Ties go to the later
/// table entry, matching the compilers this format grew up with.
pub fn texture_axis_from_plane(normal: DVec3) -> (DVec3, DVec3, DVec3) {
    let mut best = 0.;
    let mut best_axis = 0;

    for (i, axis) in BASEAXIS.iter().enumerate() {
        let dot = normal.dot(axis[0]);
        if dot >= best {
            best = dot;
            best_axis = i;
        }
    }

    let [snapped, s, t] = BASEAXIS[best_axis];
    (s, t, snapped)
}

/// World-axis indices carrying the S and T base directions for a snapped
/// normal; the third axis has no projection component.
fn st_axes(snapped: DVec3) -> (usize, usize) {
    if snapped.z != 0. {
        (0, 1)
    } else if snapped.x != 0. {
        (1, 2)
    } else {
        (0, 2)
    }
}

/// Decoded world-space texture projection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TexVecs {
    pub s: DVec4,
    pub t: DVec4,
}

impl TexVecs {
    pub fn uv_at(&self, point: DVec3) -> DVec2 {
        DVec2::new(
            self.s.truncate().dot(point) + self.s.w,
            self.t.truncate().dot(point) + self.t.w,
        )
    }

    /// A projection is unusable when an axis vanished or when the texture
    /// plane is edge-on to the face.
    pub fn is_degenerate(&self, face_normal: DVec3) -> bool {
        let s = self.s.truncate();
        let t = self.t.truncate();

        if s.length_squared() < ZERO_EPSILON || t.length_squared() < ZERO_EPSILON {
            return true;
        }

        let tex_normal = s.cross(t);
        if tex_normal.length_squared() < ZERO_EPSILON {
            return true;
        }

        tex_normal.normalize().dot(face_normal.normalize()).abs() < ZERO_EPSILON
    }
}

fn rotate_deg(v: DVec2, degrees: f64) -> DVec2 {
    let (sin, cos) = degrees.to_radians().sin_cos();
    DVec2::new(cos * v.x - sin * v.y, sin * v.x + cos * v.y)
}

fn standard_tex_vecs(normal: DVec3, standard: &StandardAlignment) -> TexVecs {
    let (base_s, base_t, snapped) = texture_axis_from_plane(normal);
    let (sv, tv) = st_axes(snapped);

    // Zero scale reads as no scaling.
    let sx = if standard.scale.x != 0. {
        standard.scale.x
    } else {
        1.
    };
    let sy = if standard.scale.y != 0. {
        standard.scale.y
    } else {
        1.
    };

    let mut vecs = [base_s, base_t];
    for vec in vecs.iter_mut() {
        let rotated = rotate_deg(DVec2::new(vec[sv], vec[tv]), standard.rotation);
        vec[sv] = rotated.x;
        vec[tv] = rotated.y;
    }

    TexVecs {
        s: (vecs[0] / sx).extend(standard.shift.x),
        t: (vecs[1] / sy).extend(standard.shift.y),
    }
}

fn valve220_tex_vecs(valve: &Valve220Alignment) -> TexVecs {
    let sx = if valve.scale.x != 0. { valve.scale.x } else { 1. };
    let sy = if valve.scale.y != 0. { valve.scale.y } else { 1. };

    TexVecs {
        s: (valve.u.truncate() / sx).extend(valve.u.w),
        t: (valve.v.truncate() / sy).extend(valve.v.w),
    }
}

fn quark_tex_vecs(points: [DVec3; 3], style: QuarkStyle) -> Option<TexVecs> {
    // 128 is the scaling factor assumed by QuArK.
    let (va, vb) = match style {
        QuarkStyle::Type1 => (points[2] - points[0], points[1] - points[0]),
        QuarkStyle::Type2 => (points[1] - points[0], points[2] - points[0]),
    };
    let va = va / 128.;
    let vb = vb / 128.;

    // Solve the 2x2 Gram system for world vectors that project the edge
    // vectors onto the unit texture square.
    let a = va.dot(va);
    let b = va.dot(vb);
    let d = vb.dot(vb);
    let determinant = a * d - b * b;

    if determinant.abs() < 1e-6 {
        return None;
    }

    let s = (d * va - b * vb) / determinant;
    let t = -(a * vb - b * va) / determinant;

    Some(TexVecs {
        s: s.extend(-s.dot(points[0])),
        t: t.extend(-t.dot(points[0])),
    })
}

/// The Brush Primitives plane basis; editors and compilers must agree on it
/// bit for bit, so this follows the q3map2 derivation.
pub fn compute_axis_base(normal: DVec3) -> (DVec3, DVec3) {
    let mut normal = normal;
    if normal.x.abs() < 1e-6 {
        normal.x = 0.;
    }
    if normal.y.abs() < 1e-6 {
        normal.y = 0.;
    }
    if normal.z.abs() < 1e-6 {
        normal.z = 0.;
    }

    let rot_y = -normal.z.atan2((normal.x * normal.x + normal.y * normal.y).sqrt());
    let rot_z = normal.y.atan2(normal.x);

    let tex_x = DVec3::new(-rot_z.sin(), rot_z.cos(), 0.);
    let tex_y = DVec3::new(
        -rot_y.sin() * rot_z.cos(),
        -rot_y.sin() * rot_z.sin(),
        -rot_y.cos(),
    );

    (tex_x, tex_y)
}

fn brush_primitives_tex_vecs(
    normal: DVec3,
    bp: &BrushPrimitivesAlignment,
    tex_size: [f64; 2],
) -> TexVecs {
    let (tex_x, tex_y) = compute_axis_base(normal);
    let [width, height] = tex_size;

    let s = (tex_x * bp.rows[0][0] + tex_y * bp.rows[0][1]) * width;
    let t = (tex_x * bp.rows[1][0] + tex_y * bp.rows[1][1]) * height;

    TexVecs {
        s: s.extend(width * bp.rows[0][2]),
        t: t.extend(height * bp.rows[1][2]),
    }
}

/// Decodes a face's texture projection. `None` only for a degenerate QuArK
/// definition; callers fall back to [`default_tex_vecs`].
pub fn tex_vecs(face: &BrushPlane, tex_size: [f64; 2]) -> Option<TexVecs> {
    let normal = face.raw_normal();

    match &face.alignment {
        TextureAlignment::Standard(standard) => Some(standard_tex_vecs(normal, standard)),
        TextureAlignment::Valve220(valve) => Some(valve220_tex_vecs(valve)),
        TextureAlignment::Quark(style) => quark_tex_vecs([face.p1, face.p2, face.p3], *style),
        TextureAlignment::BrushPrimitives(bp) => {
            Some(brush_primitives_tex_vecs(normal, bp, tex_size))
        }
    }
}

/// The dominant-axis projection with no shift, rotation or scaling; the
/// auto-correction target for broken texture definitions.
pub fn default_tex_vecs(normal: DVec3) -> TexVecs {
    standard_tex_vecs(
        normal,
        &StandardAlignment {
            shift: DVec2::ZERO,
            rotation: 0.,
            scale: DVec2::ONE,
        },
    )
}

/// Decode with validation: a degenerate projection is replaced by the
/// default one and flagged so the caller can warn once.
pub fn checked_tex_vecs(face: &BrushPlane, tex_size: [f64; 2]) -> (TexVecs, bool) {
    let normal = face.raw_normal();

    match tex_vecs(face, tex_size) {
        Some(vecs) if !vecs.is_degenerate(normal) => (vecs, false),
        _ => (default_tex_vecs(normal), true),
    }
}

/// (rotation degrees, signed scale) recovered from projected 2D axes, or
/// `None` when the axes shear.
fn reverse_projection(
    s_proj: DVec2,
    t_proj: DVec2,
    base_s: DVec2,
    base_t: DVec2,
) -> Option<(f64, DVec2)> {
    let s_len = s_proj.length();
    let t_len = t_proj.length();

    if s_len < ZERO_EPSILON || t_len < ZERO_EPSILON {
        return None;
    }

    let s_hat = s_proj / s_len;
    let t_hat = t_proj / t_len;

    for sgn_x in [1., -1.] {
        // Angle rotating base_s onto sgn_x * s_hat.
        let target = s_hat * sgn_x;
        let angle = target.y.atan2(target.x) - base_s.y.atan2(base_s.x);

        for sgn_y in [1., -1.] {
            let check = rotate_deg(base_t, angle.to_degrees());
            if (check - t_hat * sgn_y).length() < ZERO_EPSILON {
                let mut degrees = angle.to_degrees();
                if degrees <= -180. {
                    degrees += 360.;
                } else if degrees > 180. {
                    degrees -= 360.;
                }

                // Projected length is texels per world unit: invert for the
                // editor's world-units-per-texel scale.
                return Some((degrees, DVec2::new(sgn_x / s_len, sgn_y / t_len)));
            }
        }
    }

    None
}

/// Converts any projection to Standard. Shear that Standard cannot express
/// is removed by keeping the S axis and re-orthogonalizing T against it.
pub fn to_standard(face: &BrushPlane, tex_size: [f64; 2]) -> StandardAlignment {
    let normal = face.raw_normal();
    let (base_s, base_t, snapped) = texture_axis_from_plane(normal);
    let (sv, tv) = st_axes(snapped);

    let vecs = match tex_vecs(face, tex_size) {
        Some(v) => v,
        None => default_tex_vecs(normal),
    };

    let s_proj = DVec2::new(vecs.s[sv], vecs.s[tv]);
    let mut t_proj = DVec2::new(vecs.t[sv], vecs.t[tv]);
    let base_s2 = DVec2::new(base_s[sv], base_s[tv]);
    let base_t2 = DVec2::new(base_t[sv], base_t[tv]);

    let reversed = reverse_projection(s_proj, t_proj, base_s2, base_t2).or_else(|| {
        // Shear removal: T becomes S rotated a quarter turn, keeping its
        // original length and pointing as close to the old T as possible.
        let ortho = DVec2::new(-s_proj.y, s_proj.x).normalize_or_zero();
        let sign = if ortho.dot(t_proj) < 0. { -1. } else { 1. };
        t_proj = ortho * sign * t_proj.length().max(ZERO_EPSILON);

        reverse_projection(s_proj, t_proj, base_s2, base_t2)
    });

    match reversed {
        Some((rotation, scale)) => StandardAlignment {
            shift: DVec2::new(vecs.s.w, vecs.t.w),
            rotation,
            scale,
        },
        None => StandardAlignment {
            shift: DVec2::new(vecs.s.w, vecs.t.w),
            rotation: 0.,
            scale: DVec2::ONE,
        },
    }
}

/// Converts any projection to Valve 220 (lossless: the axes are explicit).
pub fn to_valve220(face: &BrushPlane, tex_size: [f64; 2]) -> Valve220Alignment {
    let normal = face.raw_normal();
    let vecs = match tex_vecs(face, tex_size) {
        Some(v) => v,
        None => default_tex_vecs(normal),
    };

    let s = vecs.s.truncate();
    let t = vecs.t.truncate();
    let s_len = s.length().max(1e-12);
    let t_len = t.length().max(1e-12);

    // The editor keeps unit axes and a separate world-units-per-texel scale.
    let rotation = match &face.alignment {
        TextureAlignment::Standard(standard) => standard.rotation,
        TextureAlignment::Valve220(valve) => valve.rotation,
        _ => 0.,
    };

    Valve220Alignment {
        u: (s / s_len).extend(vecs.s.w),
        v: (t / t_len).extend(vecs.t.w),
        rotation,
        scale: DVec2::new(1. / s_len, 1. / t_len),
    }
}

/// Converts any projection to a Brush Primitives matrix.
pub fn to_brush_primitives(face: &BrushPlane, tex_size: [f64; 2]) -> BrushPrimitivesAlignment {
    let normal = face.raw_normal().normalize();
    let vecs = match tex_vecs(face, tex_size) {
        Some(v) => v,
        None => default_tex_vecs(face.raw_normal()),
    };
    let (tex_x, tex_y) = compute_axis_base(normal);
    let [width, height] = tex_size;

    // On-plane points satisfy normal.p = dist; the normal component of the
    // world axes folds into the matrix translation.
    let dist = normal.dot(face.p1);
    let s = vecs.s.truncate();
    let t = vecs.t.truncate();

    BrushPrimitivesAlignment {
        rows: [
            [
                tex_x.dot(s) / width,
                tex_y.dot(s) / width,
                (vecs.s.w + dist * normal.dot(s)) / width,
            ],
            [
                tex_x.dot(t) / height,
                tex_y.dot(t) / height,
                (vecs.t.w + dist * normal.dot(t)) / height,
            ],
        ],
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn floor_face(alignment: TextureAlignment) -> BrushPlane {
        // +z facing floor quad corner points, clockwise from the front.
        BrushPlane {
            p1: DVec3::new(0., 0., 0.),
            p2: DVec3::new(0., 128., 0.),
            p3: DVec3::new(128., 0., 0.),
            texture_name: "tech01".to_string(),
            alignment,
            extension: None,
        }
    }

    fn equal_degrees(a: f64, b: f64) -> bool {
        ((a - b).rem_euclid(360.)).min((b - a).rem_euclid(360.)) < 0.01
    }

    #[test]
    fn floor_base_axes() {
        let (s, t, snapped) = texture_axis_from_plane(DVec3::Z);
        assert_eq!(s, DVec3::new(1., 0., 0.));
        assert_eq!(t, DVec3::new(0., -1., 0.));
        assert_eq!(snapped, DVec3::Z);
    }

    #[test]
    fn tie_prefers_later_axis() {
        // Exactly diagonal between floor and west wall.
        let n = DVec3::new(1., 0., 1.).normalize();
        let (_, _, snapped) = texture_axis_from_plane(n);
        assert_eq!(snapped, DVec3::X);
    }

    #[test]
    fn standard_projection_identity() {
        let face = floor_face(TextureAlignment::Standard(StandardAlignment {
            shift: DVec2::new(16., 32.),
            rotation: 0.,
            scale: DVec2::ONE,
        }));

        let vecs = tex_vecs(&face, DEFAULT_TEXTURE_SIZE).unwrap();
        let uv = vecs.uv_at(DVec3::new(10., 20., 0.));

        assert!((uv.x - 26.).abs() < 1e-9);
        assert!((uv.y - 12.).abs() < 1e-9);
    }

    #[test]
    fn standard_scale_halves_density() {
        let face = floor_face(TextureAlignment::Standard(StandardAlignment {
            shift: DVec2::ZERO,
            rotation: 0.,
            scale: DVec2::new(2., 2.),
        }));

        let vecs = tex_vecs(&face, DEFAULT_TEXTURE_SIZE).unwrap();
        let uv = vecs.uv_at(DVec3::new(128., 0., 0.));

        assert!((uv.x - 64.).abs() < 1e-9);
    }

    #[test]
    fn standard_valve_round_trip() {
        for rotation in [0., 45., 90., 270., 17.5] {
            for scale in [DVec2::ONE, DVec2::new(0.5, 2.), DVec2::new(-1., 1.)] {
                let source = StandardAlignment {
                    shift: DVec2::new(16., -48.),
                    rotation,
                    scale,
                };
                let face = floor_face(TextureAlignment::Standard(source));

                let valve = to_valve220(&face, DEFAULT_TEXTURE_SIZE);
                let face220 = floor_face(TextureAlignment::Valve220(valve));
                let back = to_standard(&face220, DEFAULT_TEXTURE_SIZE);

                // Same projection modulo the rot+180/flip-both ambiguity.
                let direct = tex_vecs(&face, DEFAULT_TEXTURE_SIZE).unwrap();
                let round = tex_vecs(
                    &floor_face(TextureAlignment::Standard(back)),
                    DEFAULT_TEXTURE_SIZE,
                )
                .unwrap();

                assert!((direct.s - round.s).length() < 1e-3, "rot {rotation}");
                assert!((direct.t - round.t).length() < 1e-3, "rot {rotation}");

                if scale.x > 0. && scale.y > 0. {
                    assert!(equal_degrees(back.rotation, rotation), "rot {rotation}");
                    assert!((back.scale - scale).length() < 1e-3);
                    assert!((back.shift - source.shift).length() < 1e-3);
                }
            }
        }
    }

    #[test]
    fn sheared_valve_to_standard_keeps_s_axis() {
        // 45-degree sheared T axis: representable in 220, not in Standard.
        let face = floor_face(TextureAlignment::Valve220(Valve220Alignment {
            u: DVec4::new(1., 0., 0., 0.),
            v: DVec4::new(1., -1., 0., 0.).normalize(),
            rotation: 0.,
            scale: DVec2::ONE,
        }));

        let standard = to_standard(&face, DEFAULT_TEXTURE_SIZE);
        let vecs = tex_vecs(
            &floor_face(TextureAlignment::Standard(standard)),
            DEFAULT_TEXTURE_SIZE,
        )
        .unwrap();

        // S preserved exactly, T re-orthogonalized.
        assert!((vecs.s.truncate() - DVec3::new(1., 0., 0.)).length() < 1e-6);
        assert!(vecs.t.truncate().dot(vecs.s.truncate()).abs() < 1e-6);
    }

    #[test]
    fn quark_type1_axes() {
        let face = floor_face(TextureAlignment::Quark(QuarkStyle::Type1));
        let vecs = tex_vecs(&face, DEFAULT_TEXTURE_SIZE).unwrap();

        // The 128-unit edges span one QuArK texture square of 128 texels:
        // p3 - p1 runs along S, p2 - p1 along T.
        let uv0 = vecs.uv_at(face.p1);
        let uv_s = vecs.uv_at(face.p3);
        let uv_t = vecs.uv_at(face.p2);

        assert!((uv0 - DVec2::ZERO).length() < 1e-9);
        assert!((uv_s - DVec2::new(128., 0.)).length() < 1e-9);
        assert!((uv_t - DVec2::new(0., 128.)).length() < 1e-9);
    }

    #[test]
    fn brush_primitives_round_trip() {
        let face = floor_face(TextureAlignment::Standard(StandardAlignment {
            shift: DVec2::new(8., 24.),
            rotation: 30.,
            scale: DVec2::new(1., 1.),
        }));

        let bp = to_brush_primitives(&face, DEFAULT_TEXTURE_SIZE);
        let bp_face = floor_face(TextureAlignment::BrushPrimitives(bp));

        let direct = tex_vecs(&face, DEFAULT_TEXTURE_SIZE).unwrap();
        let round = tex_vecs(&bp_face, DEFAULT_TEXTURE_SIZE).unwrap();

        for p in [
            DVec3::new(0., 0., 0.),
            DVec3::new(64., 32., 0.),
            DVec3::new(-16., 112., 0.),
        ] {
            assert!((direct.uv_at(p) - round.uv_at(p)).length() < 1e-6);
        }
    }

    #[test]
    fn degenerate_axes_fall_back() {
        // Axes in the face plane's normal direction project to nothing.
        let face = floor_face(TextureAlignment::Valve220(Valve220Alignment {
            u: DVec4::new(0., 0., 1., 0.),
            v: DVec4::new(0., 0., 1., 0.),
            rotation: 0.,
            scale: DVec2::ONE,
        }));

        let (vecs, corrected) = checked_tex_vecs(&face, DEFAULT_TEXTURE_SIZE);
        assert!(corrected);
        assert_eq!(vecs, default_tex_vecs(face.raw_normal()));
    }
}
