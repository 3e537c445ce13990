//! CSG chop: between two intersecting brushes, the lower-priority one loses
//! the face area buried inside the higher-priority one.

use crate::utils::simple_calculs::{Plane3D, Winding};

use super::{CompileContext, CompiledBrush, Contents, CsgFace};

/// True when `eater` removes the overlapped faces of `eaten`. Equal
/// priority falls back to map order: the later brush wins.
fn chops(eater: &CompiledBrush, eaten: &CompiledBrush) -> bool {
    if eater.contents.priority() != eaten.contents.priority() {
        return eater.contents.priority() > eaten.contents.priority();
    }

    eater.map_order > eaten.map_order
}

/// Contributes faces to the visible hull. Clip-only and origin brushes do
/// not; they matter to collision hulls and bmodel setup instead.
fn emits_faces(contents: Contents) -> bool {
    !matches!(
        contents,
        Contents::PlayerClip | Contents::MonsterClip | Contents::Origin | Contents::Areaportal
    )
}

/// Subtracts `eater`'s volume from the fragments of a face.
///
/// Fragments outside any of the eater's planes survive; what remains inside
/// all of them is buried and dropped. Coplanar cases resolve by map order
/// through `eater_is_later`.
fn subtract_brush(
    fragments: Vec<Winding>,
    face_plane: &Plane3D,
    eater: &CompiledBrush,
    eater_is_later: bool,
) -> Vec<Winding> {
    let mut survivors = vec![];

    'fragment: for fragment in fragments {
        let mut inside = fragment;

        for plane in &eater.planes {
            let same_plane = plane.equals(face_plane);
            let opposite_plane = plane.equals(&face_plane.flip());

            if same_plane || opposite_plane {
                // The fragment lies on the eater's boundary. An
                // opposite-facing boundary means the faces are glued
                // back to back and the area is never visible. A
                // same-facing boundary is a shared visible plane: the
                // later brush keeps its face.
                if opposite_plane || eater_is_later {
                    continue;
                }

                survivors.push(inside);
                continue 'fragment;
            }

            let (front, back) = inside.split(plane);

            if let Some(front) = front {
                survivors.push(front);
            }

            match back {
                Some(back) => inside = back,
                // Nothing left inside the eater.
                None => continue 'fragment,
            }
        }

        // `inside` fell through every plane: buried inside the eater.
    }

    survivors
}

/// Chops every brush's faces against every other chopping brush and
/// returns the surviving face fragments.
pub fn csg_chop(brushes: &[CompiledBrush], ctx: &mut CompileContext) -> Vec<CsgFace> {
    let mut out = vec![];

    for brush in brushes {
        if !emits_faces(brush.contents) {
            continue;
        }

        for face in &brush.faces {
            let mut fragments = vec![face.winding.clone()];

            for other in brushes {
                if std::ptr::eq(other, brush) || !emits_faces(other.contents) {
                    continue;
                }
                if !chops(other, brush) {
                    continue;
                }
                if !other.bounds.intersects(&brush.bounds) {
                    continue;
                }
                // Same contents never eat their own kind's shared interior
                // unless they actually overlap, which the plane subtraction
                // below works out geometrically.

                fragments = subtract_brush(fragments, &face.plane, other, other.map_order > brush.map_order);

                if fragments.is_empty() {
                    break;
                }
            }

            for winding in fragments {
                if winding.is_tiny() {
                    continue;
                }

                out.push(CsgFace {
                    plane: face.plane,
                    winding: winding.clone(),
                    texinfo: face.texinfo,
                    contents: brush.contents,
                    detail: brush.contents.is_detail(),
                    skip: face.skip,
                });

                // An inside-mirrored brush shows its faces from within.
                if brush.mirror_inside {
                    out.push(CsgFace {
                        plane: face.plane.flip(),
                        winding: winding.flip(),
                        texinfo: face.texinfo,
                        contents: brush.contents,
                        detail: brush.contents.is_detail(),
                        skip: face.skip,
                    });
                }
            }
        }
    }

    if out.is_empty() && brushes.iter().any(|b| emits_faces(b.contents)) {
        ctx.warn("CSG removed every face of a model");
    }

    out
}

#[cfg(test)]
mod test {
    use glam::DVec3;

    use crate::{
        entity::ModelInfo,
        modules::qbsp::{prepare_brush, QbspOptions},
    };

    use super::*;

    fn box_brush(mins: DVec3, maxs: DVec3, texture: &str, map_order: usize) -> CompiledBrush {
        let text = format!(
            "{{\n\
             ( {ax} {ay} {az} ) ( {ax} {by} {az} ) ( {ax} {ay} {bz} ) {t} 0 0 0 1 1\n\
             ( {bx} {ay} {az} ) ( {bx} {ay} {bz} ) ( {bx} {by} {az} ) {t} 0 0 0 1 1\n\
             ( {ax} {ay} {az} ) ( {ax} {ay} {bz} ) ( {bx} {ay} {az} ) {t} 0 0 0 1 1\n\
             ( {ax} {by} {az} ) ( {bx} {by} {az} ) ( {ax} {by} {bz} ) {t} 0 0 0 1 1\n\
             ( {ax} {ay} {az} ) ( {bx} {ay} {az} ) ( {ax} {by} {az} ) {t} 0 0 0 1 1\n\
             ( {ax} {ay} {bz} ) ( {ax} {by} {bz} ) ( {bx} {ay} {bz} ) {t} 0 0 0 1 1\n\
             }}",
            ax = mins.x, ay = mins.y, az = mins.z,
            bx = maxs.x, by = maxs.y, bz = maxs.z,
            t = texture,
        );

        let brush = map_brush(&text);
        let options = QbspOptions::default();
        let mut ctx = CompileContext::default();

        prepare_brush(&brush, map_order, &ModelInfo::default(), &options, &mut ctx).unwrap()
    }

    fn map_brush(text: &str) -> map::Brush {
        let wrapped = format!("{{\n\"classname\" \"worldspawn\"\n{}\n}}\n", text);
        let parsed = map::Map::from_text(&wrapped).unwrap();

        parsed.entities[0].brushes.as_ref().unwrap()[0].clone()
    }

    #[test]
    fn lone_brush_keeps_all_faces() {
        let brush = box_brush(DVec3::splat(-32.), DVec3::splat(32.), "wall", 1);
        let mut ctx = CompileContext::default();

        let faces = csg_chop(&[brush], &mut ctx);
        assert_eq!(faces.len(), 6);

        let total_area: f64 = faces.iter().map(|f| f.winding.area()).sum();
        assert!((total_area - 6. * 64. * 64.).abs() < 1e-6);
    }

    #[test]
    fn buried_faces_removed() {
        // A small solid box fully inside a big one loses every face;
        // the big one, being later, keeps all of its own.
        let small = box_brush(DVec3::splat(-16.), DVec3::splat(16.), "wall", 1);
        let big = box_brush(DVec3::splat(-64.), DVec3::splat(64.), "wall", 2);

        let mut ctx = CompileContext::default();
        let faces = csg_chop(&[small, big], &mut ctx);

        assert_eq!(faces.len(), 6);
        let total_area: f64 = faces.iter().map(|f| f.winding.area()).sum();
        assert!((total_area - 6. * 128. * 128.).abs() < 1e-6);
    }

    #[test]
    fn overlapping_solids_chop_by_map_order() {
        // Two 64-wide boxes overlapping by 32 on x. The later one eats
        // the earlier one's buried area.
        let first = box_brush(
            DVec3::new(-64., -32., -32.),
            DVec3::new(0., 32., 32.),
            "wall",
            1,
        );
        let second = box_brush(
            DVec3::new(-32., -32., -32.),
            DVec3::new(32., 32., 32.),
            "wall",
            2,
        );

        let mut ctx = CompileContext::default();
        let faces = csg_chop(&[first, second], &mut ctx);

        // The first brush's +x face was inside the second: gone.
        let plus_x_faces: Vec<_> = faces
            .iter()
            .filter(|f| (f.plane.normal - DVec3::X).length() < 1e-6)
            .collect();

        // Only the second brush's +x face at x=32 remains on that axis.
        assert_eq!(plus_x_faces.len(), 1);
        assert!((plus_x_faces[0].plane.distance - 32.).abs() < 1e-6);
    }

    #[test]
    fn water_does_not_chop_solid() {
        let water = box_brush(DVec3::splat(-64.), DVec3::splat(64.), "*water1", 2);
        let solid = box_brush(DVec3::splat(-16.), DVec3::splat(16.), "wall", 1);

        assert_eq!(water.contents, Contents::Water);
        assert!(!chops(&water, &solid));
        assert!(chops(&solid, &water));
    }
}
