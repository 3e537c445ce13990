//! Collision hulls: brushes inflated by a per-hull bounding box, re-chopped
//! and rebuilt into coarser trees written out as clipnodes.

use glam::DVec3;

use crate::utils::simple_calculs::{Aabb, Plane3D};

use super::{
    csg, solidbsp, BrushFace, CompileContext, CompiledBrush, Contents, ModelEntity, QbspOptions,
    Tree,
};

use crate::game::HullSize;

/// Contents that block movement and therefore exist in clip hulls.
fn collides(contents: Contents) -> bool {
    contents.is_solid_like()
        || matches!(
            contents,
            Contents::PlayerClip | Contents::MonsterClip | Contents::Window
        )
}

/// Minkowski expansion of a half-space by the hull box: push the plane out
/// to the box corner deepest behind it.
fn expand_plane(plane: &Plane3D, hull: &HullSize) -> Plane3D {
    let mut corner = DVec3::ZERO;

    for axis in 0..3 {
        corner[axis] = if plane.normal[axis] > 0. {
            hull.mins[axis]
        } else {
            hull.maxs[axis]
        };
    }

    Plane3D::new(plane.normal, plane.distance - plane.normal.dot(corner))
}

/// Inflates one brush. Missing axial planes are added at the expanded
/// bounds so box corners clip like boxes, not like knife edges.
fn expand_brush(brush: &CompiledBrush, hull: &HullSize) -> Option<CompiledBrush> {
    let mut planes: Vec<Plane3D> = brush.planes.iter().map(|p| expand_plane(p, hull)).collect();

    let expanded_bounds = Aabb {
        mins: brush.bounds.mins + hull.mins,
        maxs: brush.bounds.maxs + hull.maxs,
    };

    for axis in 0..3 {
        let mut normal = DVec3::ZERO;

        normal[axis] = 1.;
        if !planes.iter().any(|p| (p.normal - normal).length() < 1e-6) {
            planes.push(Plane3D::new(normal, expanded_bounds.maxs[axis]));
        }

        normal[axis] = -1.;
        if !planes.iter().any(|p| (p.normal - normal).length() < 1e-6) {
            planes.push(Plane3D::new(normal, -expanded_bounds.mins[axis]));
        }
    }

    let windings = crate::utils::map_stuffs::brush_windings(&planes);

    let mut faces = vec![];
    let mut bounds = Aabb::new();

    for (plane, winding) in planes.iter().zip(windings) {
        let Some(winding) = winding else {
            continue;
        };

        for &point in winding.points() {
            bounds.add_point(point);
        }

        faces.push(BrushFace {
            plane: *plane,
            winding,
            texinfo: 0,
            skip: false,
        });
    }

    if faces.is_empty() || !bounds.is_valid() {
        return None;
    }

    Some(CompiledBrush {
        planes: faces.iter().map(|f| f.plane).collect(),
        faces,
        // Everything that collides is plain solid to the movement code.
        contents: Contents::Solid,
        bounds,
        map_order: brush.map_order,
        mirror_inside: false,
    })
}

/// Builds the trees for hulls 1.. of one model.
pub fn build_clip_hulls(
    model: &ModelEntity,
    options: &QbspOptions,
    ctx: &mut CompileContext,
) -> Vec<Tree> {
    let hull_sizes = options.game.hull_sizes;
    let mut out = vec![];

    for hull in hull_sizes.iter().skip(1) {
        let expanded: Vec<CompiledBrush> = model
            .brushes
            .iter()
            .filter(|b| collides(b.contents))
            .filter_map(|b| expand_brush(b, hull))
            .collect();

        let faces = csg::csg_chop(&expanded, ctx);
        let tree = solidbsp::build_tree(faces, &expanded, &mut ctx.planes, options.max_node_size);

        out.push(tree);
    }

    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn floor_plane_rises_by_hull_depth() {
        // Quake hull 1 reaches 24 units below the origin: a floor's top
        // plane moves up by 24 so the point hull stands at eye origin.
        let hull = HullSize {
            mins: DVec3::new(-16., -16., -24.),
            maxs: DVec3::new(16., 16., 32.),
        };

        let floor_top = Plane3D::new(DVec3::Z, 64.);
        let expanded = expand_plane(&floor_top, &hull);

        assert!((expanded.distance - 88.).abs() < 1e-9);
    }

    #[test]
    fn side_wall_moves_out_by_half_width() {
        let hull = HullSize {
            mins: DVec3::new(-16., -16., -24.),
            maxs: DVec3::new(16., 16., 32.),
        };

        let east_wall = Plane3D::new(DVec3::new(-1., 0., 0.), -128.);
        let expanded = expand_plane(&east_wall, &hull);

        // The wall face at x=128 faces -x; it moves 16 units toward the
        // room, to x=112.
        assert!((expanded.distance - -112.).abs() < 1e-9);
    }

    #[test]
    fn ceiling_drops_by_head_height() {
        let hull = HullSize {
            mins: DVec3::new(-16., -16., -24.),
            maxs: DVec3::new(16., 16., 32.),
        };

        let ceiling_bottom = Plane3D::new(DVec3::new(0., 0., -1.), -128.);
        let expanded = expand_plane(&ceiling_bottom, &hull);

        // Faces down: moves down by the 32-unit head clearance.
        assert!((expanded.distance - -96.).abs() < 1e-9);
    }
}
