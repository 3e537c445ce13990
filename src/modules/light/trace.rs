//! Ray service for the baker: a median-split BVH over the shadow-casting
//! triangles, with channel-mask filtering and translucent tinting.

use glam::DVec3;

use bsp::Bsp;

use crate::{
    entity::ModelInfo,
    utils::{palette::palette_rgb, simple_calculs::Aabb},
};

use super::{face_plane, face_vertex};

const TRACE_EPSILON: f64 = 0.01;

#[derive(Debug, Clone)]
pub struct Triangle {
    pub a: DVec3,
    pub b: DVec3,
    pub c: DVec3,
    pub normal: DVec3,
    pub face_index: u32,
    pub model_index: u32,
    pub channel_mask: u32,
    pub sky: bool,
    /// Multiplicative filter color for translucent faces; `None` blocks.
    pub tint: Option<DVec3>,
}

#[derive(Debug)]
enum BvhNode {
    Leaf {
        start: usize,
        count: usize,
    },
    Inner {
        bounds: [Aabb; 2],
        children: [usize; 2],
    },
}

#[derive(Debug)]
pub struct Bvh {
    nodes: Vec<BvhNode>,
    triangles: Vec<Triangle>,
    root_bounds: Aabb,
}

pub struct Hit {
    pub t: f64,
    pub point: DVec3,
    pub normal: DVec3,
    pub face_index: u32,
    pub sky: bool,
}

/// Result of an occlusion query: fully blocked, or visible through a
/// multiplicative tint (white when nothing translucent intervened).
pub struct Occlusion {
    pub visible: bool,
    pub tint: DVec3,
}

pub(crate) fn face_texture_name<'a>(bsp: &'a Bsp, face: &bsp::Face) -> &'a str {
    let ti = &bsp.texinfo[face.texinfo as usize];

    if bsp.format.is_quake2() {
        return &ti.texture_name;
    }

    bsp.textures
        .get(ti.texture_index as usize)
        .and_then(|t| t.as_ref())
        .map(|t| t.name.as_str())
        .unwrap_or("")
}

/// Average palette color of a miptex, for translucent tints and bounce.
pub(crate) fn texture_average_color(bsp: &Bsp, face: &bsp::Face) -> DVec3 {
    let ti = &bsp.texinfo[face.texinfo as usize];

    let Some(Some(miptex)) = bsp.textures.get(ti.texture_index as usize) else {
        return DVec3::splat(127.);
    };

    let pixels = (miptex.width * miptex.height) as usize;
    if miptex.data.len() < pixels || pixels == 0 {
        return DVec3::splat(127.);
    }

    let mut sum = DVec3::ZERO;
    for &index in &miptex.data[..pixels] {
        let [r, g, b] = palette_rgb(index);
        sum += DVec3::new(r as f64, g as f64, b as f64);
    }

    sum / pixels as f64
}

fn face_is_sky(bsp: &Bsp, face: &bsp::Face) -> bool {
    if bsp.format.is_quake2() {
        let flags = bsp.texinfo[face.texinfo as usize].flags;
        return flags & bsp::Q2Surface::SKY.bits() != 0;
    }

    face_texture_name(bsp, face).to_ascii_lowercase().starts_with("sky")
}

fn face_tint(bsp: &Bsp, face: &bsp::Face, info: &ModelInfo) -> Option<DVec3> {
    let name = face_texture_name(bsp, face).to_ascii_lowercase();
    let translucent_texture = name.starts_with('*')
        || name.starts_with('!')
        || name.starts_with('{');

    let alpha = match info.light_alpha {
        Some(alpha) => alpha.clamp(0., 1.),
        None if translucent_texture => 0.7,
        None => return None,
    };

    if alpha >= 1. {
        return None;
    }

    // Texture color blended toward white by the transmitted fraction.
    let color = texture_average_color(bsp, face) / 255.;
    Some(color * alpha + DVec3::ONE * (1. - alpha))
}

impl Bvh {
    /// Gathers shadow-casting triangles: the world always, bmodels when
    /// tagged `_shadow` (or `_shadowself`, filtered at query time).
    pub fn build(bsp: &Bsp, infos: &[ModelInfo], face_models: &[u32]) -> Self {
        let mut triangles = vec![];

        for (face_index, face) in bsp.faces.iter().enumerate() {
            let model_index = face_models.get(face_index).copied().unwrap_or(0) as usize;
            let info = &infos[model_index.min(infos.len().saturating_sub(1))];

            let casts = model_index == 0 || info.shadow || info.shadow_self;
            if !casts {
                continue;
            }

            let (normal, _) = face_plane(bsp, face);
            let sky = face_is_sky(bsp, face);
            let tint = if sky { None } else { face_tint(bsp, face, info) };

            // Fan triangulation of the convex face.
            let v0 = face_vertex(bsp, face, 0);
            for i in 1..(face.edge_count as usize).saturating_sub(1) {
                triangles.push(Triangle {
                    a: v0,
                    b: face_vertex(bsp, face, i),
                    c: face_vertex(bsp, face, i + 1),
                    normal,
                    face_index: face_index as u32,
                    model_index: model_index as u32,
                    channel_mask: info.channel_mask,
                    sky,
                    tint,
                });
            }
        }

        let mut bvh = Self {
            nodes: vec![],
            root_bounds: bounds_of(&triangles),
            triangles,
        };

        if !bvh.triangles.is_empty() {
            let count = bvh.triangles.len();
            bvh.split_node(0, count);
        }

        bvh
    }

    /// Recursive median split; returns the node index.
    fn split_node(&mut self, start: usize, count: usize) -> usize {
        const LEAF_SIZE: usize = 4;

        if count <= LEAF_SIZE {
            self.nodes.push(BvhNode::Leaf { start, count });
            return self.nodes.len() - 1;
        }

        let slice = &mut self.triangles[start..start + count];
        let bounds = bounds_of(slice);
        let axis = bounds.longest_axis();

        slice.sort_by(|t1, t2| {
            let c1 = (t1.a[axis] + t1.b[axis] + t1.c[axis]) / 3.;
            let c2 = (t2.a[axis] + t2.b[axis] + t2.c[axis]) / 3.;
            c1.total_cmp(&c2)
        });

        let half = count / 2;
        let index = self.nodes.len();
        self.nodes.push(BvhNode::Leaf { start: 0, count: 0 }); // placeholder

        let left = self.split_node(start, half);
        let right = self.split_node(start + half, count - half);

        self.nodes[index] = BvhNode::Inner {
            bounds: [
                bounds_of(&self.triangles[start..start + half]),
                bounds_of(&self.triangles[start + half..start + count]),
            ],
            children: [left, right],
        };

        index
    }

    /// All triangle intersections along the segment, visited through the
    /// BVH with mask and model filtering.
    fn for_hits(
        &self,
        origin: DVec3,
        dir: DVec3,
        t_max: f64,
        channel_mask: u32,
        skip_model: Option<u32>,
        visit: &mut impl FnMut(&Triangle, f64) -> bool,
    ) {
        if self.nodes.is_empty() {
            return;
        }

        let inv_dir = DVec3::new(
            1. / non_zero(dir.x),
            1. / non_zero(dir.y),
            1. / non_zero(dir.z),
        );

        let mut stack = vec![0usize];

        while let Some(node) = stack.pop() {
            match &self.nodes[node] {
                BvhNode::Leaf { start, count } => {
                    for triangle in &self.triangles[*start..start + count] {
                        if triangle.channel_mask & channel_mask == 0 {
                            continue;
                        }
                        if skip_model == Some(triangle.model_index) {
                            continue;
                        }

                        if let Some(t) = ray_triangle(origin, dir, triangle) {
                            if t > TRACE_EPSILON && t < t_max && !visit(triangle, t) {
                                return;
                            }
                        }
                    }
                }
                BvhNode::Inner { bounds, children } => {
                    for side in 0..2 {
                        if ray_box(origin, inv_dir, t_max, &bounds[side]) {
                            stack.push(children[side]);
                        }
                    }
                }
            }
        }
    }

    /// Segment occlusion with translucent filtering.
    pub fn occluded(
        &self,
        from: DVec3,
        to: DVec3,
        channel_mask: u32,
        skip_model: Option<u32>,
    ) -> Occlusion {
        let delta = to - from;
        let len = delta.length();

        if len < TRACE_EPSILON {
            return Occlusion {
                visible: true,
                tint: DVec3::ONE,
            };
        }

        let dir = delta / len;
        let mut tint = DVec3::ONE;
        let mut blocked = false;

        self.for_hits(from, dir, len, channel_mask, skip_model, &mut |tri, _t| {
            match tri.tint {
                Some(filter) => {
                    tint *= filter;
                    true
                }
                None => {
                    blocked = true;
                    false
                }
            }
        });

        Occlusion {
            visible: !blocked,
            tint,
        }
    }

    /// Nearest hit along a ray.
    pub fn first_hit(
        &self,
        origin: DVec3,
        dir: DVec3,
        t_max: f64,
        channel_mask: u32,
        skip_model: Option<u32>,
    ) -> Option<Hit> {
        let mut best: Option<(f64, Triangle)> = None;

        self.for_hits(origin, dir, t_max, channel_mask, skip_model, &mut |tri, t| {
            match &best {
                Some((best_t, _)) if *best_t <= t => {}
                _ => best = Some((t, tri.clone())),
            }
            true
        });

        best.map(|(t, tri)| Hit {
            t,
            point: origin + dir * t,
            normal: tri.normal,
            face_index: tri.face_index,
            sky: tri.sky,
        })
    }

    /// Whether a ray from `point` reaches the sky (for sun contributions).
    pub fn sky_visible(&self, point: DVec3, toward_sun: DVec3, channel_mask: u32) -> bool {
        match self.first_hit(point, toward_sun, 65536., channel_mask, None) {
            Some(hit) => hit.sky,
            // Nothing at all in the way: open void counts as sky.
            None => true,
        }
    }

    pub fn bounds(&self) -> &Aabb {
        &self.root_bounds
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }
}

fn non_zero(v: f64) -> f64 {
    if v.abs() < 1e-12 {
        1e-12_f64.copysign(v)
    } else {
        v
    }
}

fn bounds_of(triangles: &[Triangle]) -> Aabb {
    let mut bounds = Aabb::new();
    for tri in triangles {
        bounds.add_point(tri.a);
        bounds.add_point(tri.b);
        bounds.add_point(tri.c);
    }
    bounds
}

/// Möller-Trumbore, double-sided.
fn ray_triangle(origin: DVec3, dir: DVec3, tri: &Triangle) -> Option<f64> {
    let e1 = tri.b - tri.a;
    let e2 = tri.c - tri.a;

    let p = dir.cross(e2);
    let det = e1.dot(p);

    if det.abs() < 1e-12 {
        return None;
    }

    let inv_det = 1. / det;
    let s = origin - tri.a;
    let u = s.dot(p) * inv_det;
    if !(-1e-6..=1.0 + 1e-6).contains(&u) {
        return None;
    }

    let q = s.cross(e1);
    let v = dir.dot(q) * inv_det;
    if v < -1e-6 || u + v > 1. + 1e-6 {
        return None;
    }

    let t = e2.dot(q) * inv_det;
    (t > 0.).then_some(t)
}

fn ray_box(origin: DVec3, inv_dir: DVec3, t_max: f64, bounds: &Aabb) -> bool {
    if !bounds.is_valid() {
        return false;
    }

    let t1 = (bounds.mins - origin) * inv_dir;
    let t2 = (bounds.maxs - origin) * inv_dir;

    let t_near = t1.min(t2).max_element().max(0.);
    let t_far = t1.max(t2).min_element().min(t_max);

    t_near <= t_far
}

#[cfg(test)]
mod test {
    use super::*;

    fn tri(a: DVec3, b: DVec3, c: DVec3, tint: Option<DVec3>) -> Triangle {
        Triangle {
            a,
            b,
            c,
            normal: (b - a).cross(c - a).normalize(),
            face_index: 0,
            model_index: 0,
            channel_mask: 1,
            sky: false,
            tint,
        }
    }

    fn wall_bvh(tint: Option<DVec3>) -> Bvh {
        // A quad at x=0 spanning y,z in [-64, 64], as two triangles.
        let quad = [
            tri(
                DVec3::new(0., -64., -64.),
                DVec3::new(0., 64., -64.),
                DVec3::new(0., 64., 64.),
                tint,
            ),
            tri(
                DVec3::new(0., -64., -64.),
                DVec3::new(0., 64., 64.),
                DVec3::new(0., -64., 64.),
                tint,
            ),
        ];

        let mut bvh = Bvh {
            nodes: vec![],
            root_bounds: bounds_of(&quad),
            triangles: quad.to_vec(),
        };
        bvh.split_node(0, 2);
        bvh
    }

    #[test]
    fn segment_through_wall_blocked() {
        let bvh = wall_bvh(None);

        let occ = bvh.occluded(
            DVec3::new(-32., 0., 0.),
            DVec3::new(32., 0., 0.),
            1,
            None,
        );
        assert!(!occ.visible);
    }

    #[test]
    fn segment_beside_wall_clear() {
        let bvh = wall_bvh(None);

        let occ = bvh.occluded(
            DVec3::new(-32., 100., 0.),
            DVec3::new(32., 100., 0.),
            1,
            None,
        );
        assert!(occ.visible);
        assert_eq!(occ.tint, DVec3::ONE);
    }

    #[test]
    fn translucent_wall_tints() {
        let bvh = wall_bvh(Some(DVec3::new(0.5, 0.25, 1.)));

        // Off the quad's shared diagonal, so exactly one triangle filters.
        let occ = bvh.occluded(
            DVec3::new(-32., 8., 0.),
            DVec3::new(32., 8., 0.),
            1,
            None,
        );

        assert!(occ.visible);
        assert!((occ.tint - DVec3::new(0.5, 0.25, 1.)).length() < 1e-9);
    }

    #[test]
    fn channel_mask_skips_faces() {
        let bvh = wall_bvh(None);

        let occ = bvh.occluded(
            DVec3::new(-32., 0., 0.),
            DVec3::new(32., 0., 0.),
            2, // wall is on channel 1
            None,
        );
        assert!(occ.visible);
    }

    #[test]
    fn first_hit_reports_distance() {
        let bvh = wall_bvh(None);

        let hit = bvh
            .first_hit(DVec3::new(-40., 8., 8.), DVec3::X, 1000., 1, None)
            .unwrap();

        assert!((hit.t - 40.).abs() < 1e-9);
        assert!((hit.point.x).abs() < 1e-9);
    }
}
