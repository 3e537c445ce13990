//! Per-face luxel grids: texture-space extents, the texture-to-world
//! transform, occlusion nudging and oversampling.

use glam::{DMat3, DVec3, DVec4};

use bsp::Bsp;

use super::{face_plane, face_vertex, Scene};

/// Offset along the face normal before any ray leaves a sample.
pub const SURFACE_OFFSET: f64 = 1.;

#[derive(Debug)]
pub struct LightSurface {
    pub face_index: usize,
    pub normal: DVec3,
    pub dist: f64,
    pub s: DVec4,
    pub t: DVec4,
    /// Texture mins in luxel units.
    pub tex_mins: [i32; 2],
    /// Luxel spans; the grid is `(extents+1) x (extents+1)` corners.
    pub extents: [i32; 2],
    pub width: usize,
    pub height: usize,
    /// World units per luxel for this face.
    pub scale: f64,
    pub points: Vec<DVec3>,
    pub normals: Vec<DVec3>,
    pub occluded: Vec<bool>,
    /// Sub-samples per luxel axis.
    pub oversample: u32,
    /// Luxel-major `oversample^2` sub-points per luxel.
    pub sub_points: Vec<DVec3>,
    pub sub_occluded: Vec<bool>,
    pub centroid: DVec3,
}

impl LightSurface {
    pub fn luxel_count(&self) -> usize {
        self.width * self.height
    }

    pub fn subs_per_luxel(&self) -> usize {
        (self.oversample * self.oversample) as usize
    }

    /// The 2x4 world-to-lightmap matrix for the DECOUPLED_LM lump.
    pub fn world_to_lm(&self) -> [[f32; 4]; 2] {
        let s = self.s / self.scale;
        let t = self.t / self.scale;

        [
            [
                s.x as f32,
                s.y as f32,
                s.z as f32,
                (s.w - self.tex_mins[0] as f64) as f32,
            ],
            [
                t.x as f32,
                t.y as f32,
                t.z as f32,
                (t.w - self.tex_mins[1] as f64) as f32,
            ],
        ]
    }
}

pub(crate) fn texinfo_vecs(bsp: &Bsp, face: &bsp::Face) -> (DVec4, DVec4) {
    let ti = &bsp.texinfo[face.texinfo as usize];

    (
        DVec4::new(
            ti.u.x as f64,
            ti.u.y as f64,
            ti.u.z as f64,
            ti.u_offset as f64,
        ),
        DVec4::new(
            ti.v.x as f64,
            ti.v.y as f64,
            ti.v.z as f64,
            ti.v_offset as f64,
        ),
    )
}

/// Inverse of the S/T projection restricted to the face plane.
struct TexToWorld {
    inverse: DMat3,
    offsets: DVec3,
}

impl TexToWorld {
    fn new(s: DVec4, t: DVec4, normal: DVec3, dist: f64) -> Option<Self> {
        let m = DMat3::from_cols(
            DVec3::new(s.x, t.x, normal.x),
            DVec3::new(s.y, t.y, normal.y),
            DVec3::new(s.z, t.z, normal.z),
        );

        if m.determinant().abs() < 1e-9 {
            return None;
        }

        Some(Self {
            inverse: m.inverse(),
            offsets: DVec3::new(s.w, t.w, -dist),
        })
    }

    fn world_at(&self, u: f64, v: f64) -> DVec3 {
        self.inverse * (DVec3::new(u, v, 0.) - self.offsets)
    }
}

fn point_in_solid(bsp: &Bsp, point: DVec3) -> bool {
    if bsp.nodes.is_empty() {
        return false;
    }

    let head = bsp.models[0].head_nodes[0];
    let leaf = bsp.leaf_at(
        head,
        glam::Vec3::new(point.x as f32, point.y as f32, point.z as f32),
    );
    let contents = bsp.leaves[leaf].contents;

    if bsp.format.is_quake2() {
        return contents as u32 & bsp::Q2Contents::SOLID.bits() != 0;
    }

    contents == bsp::LeafContents::Solid as i32
}

/// Pulls an in-solid sample toward the face centroid until it escapes; a
/// sample that never does is occluded and gets neighbor-averaged later.
fn nudge_point(bsp: &Bsp, point: DVec3, centroid: DVec3, scale: f64) -> (DVec3, bool) {
    if !point_in_solid(bsp, point) {
        return (point, false);
    }

    let steps = 6;
    for step in 1..=steps {
        let f = step as f64 / steps as f64;
        let candidate = point + (centroid - point) * f * (scale / 16.).min(1.);

        if !point_in_solid(bsp, candidate) {
            return (candidate, false);
        }
    }

    // Last resort: the centroid itself, nudged off the plane.
    if !point_in_solid(bsp, centroid) {
        return (centroid, false);
    }

    (point, true)
}

/// Builds the luxel grid for one face.
pub fn build_surface(scene: &Scene, face_index: usize) -> LightSurface {
    let bsp = scene.bsp;
    let face = &bsp.faces[face_index];
    let (normal, dist) = face_plane(bsp, face);
    let (s, t) = texinfo_vecs(bsp, face);

    let info = scene.model_info_for_face(face_index);
    let scale = info.lightmap_scale.unwrap_or(scene.luxel_scale);

    // Texture-space extents over the face's vertices.
    let mut min_u = f64::INFINITY;
    let mut max_u = f64::NEG_INFINITY;
    let mut min_v = f64::INFINITY;
    let mut max_v = f64::NEG_INFINITY;
    let mut centroid = DVec3::ZERO;

    for i in 0..face.edge_count as usize {
        let p = face_vertex(bsp, face, i);
        centroid += p;

        let u = s.truncate().dot(p) + s.w;
        let v = t.truncate().dot(p) + t.w;

        min_u = min_u.min(u);
        max_u = max_u.max(u);
        min_v = min_v.min(v);
        max_v = max_v.max(v);
    }
    centroid /= (face.edge_count as f64).max(1.);
    let centroid_off = centroid + normal * SURFACE_OFFSET;

    let tex_mins = [
        (min_u / scale).floor() as i32,
        (min_v / scale).floor() as i32,
    ];
    let extents = [
        ((max_u / scale).ceil() as i32 - tex_mins[0]).max(0),
        ((max_v / scale).ceil() as i32 - tex_mins[1]).max(0),
    ];

    let width = (extents[0] + 1) as usize;
    let height = (extents[1] + 1) as usize;
    let oversample = scene.options.oversample.max(1);

    let to_world = TexToWorld::new(s, t, normal, dist);

    let mut points = Vec::with_capacity(width * height);
    let mut normals = Vec::with_capacity(width * height);
    let mut occluded = Vec::with_capacity(width * height);
    let mut sub_points = Vec::with_capacity(width * height * (oversample * oversample) as usize);
    let mut sub_occluded = Vec::with_capacity(sub_points.capacity());

    for j in 0..height as i32 {
        for i in 0..width as i32 {
            let u = (tex_mins[0] + i) as f64 * scale;
            let v = (tex_mins[1] + j) as f64 * scale;

            let world = match &to_world {
                Some(tw) => tw.world_at(u, v) + normal * SURFACE_OFFSET,
                None => centroid_off,
            };

            let (world, blocked) = nudge_point(bsp, world, centroid_off, scale);

            let sample_normal = scene
                .phong
                .sample_with(bsp, face_index, world)
                .unwrap_or(normal);

            points.push(world);
            normals.push(sample_normal);
            occluded.push(blocked);

            // Oversampling subdivides the luxel around its corner point.
            for sj in 0..oversample {
                for si in 0..oversample {
                    if oversample == 1 {
                        sub_points.push(world);
                        sub_occluded.push(blocked);
                        continue;
                    }

                    let fu = u + ((si as f64 + 0.5) / oversample as f64 - 0.5) * scale;
                    let fv = v + ((sj as f64 + 0.5) / oversample as f64 - 0.5) * scale;

                    let sub = match &to_world {
                        Some(tw) => tw.world_at(fu, fv) + normal * SURFACE_OFFSET,
                        None => centroid_off,
                    };

                    let (sub, sub_blocked) = nudge_point(bsp, sub, centroid_off, scale);
                    sub_points.push(sub);
                    sub_occluded.push(sub_blocked);
                }
            }
        }
    }

    LightSurface {
        face_index,
        normal,
        dist,
        s,
        t,
        tex_mins,
        extents,
        width,
        height,
        scale,
        points,
        normals,
        occluded,
        oversample,
        sub_points,
        sub_occluded,
        centroid: centroid_off,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tex_to_world_inverts_projection() {
        let s = DVec4::new(1., 0., 0., 16.);
        let t = DVec4::new(0., -1., 0., -8.);
        let normal = DVec3::Z;
        let dist = 64.;

        let tw = TexToWorld::new(s, t, normal, dist).unwrap();

        let p = tw.world_at(48., 0.);
        // u = x + 16 = 48 -> x = 32; v = -y - 8 = 0 -> y = -8; z = 64.
        assert!((p - DVec3::new(32., -8., 64.)).length() < 1e-9);

        // Round trip.
        let u = s.truncate().dot(p) + s.w;
        let v = t.truncate().dot(p) + t.w;
        assert!((u - 48.).abs() < 1e-9);
        assert!((v - 0.).abs() < 1e-9);
    }

    #[test]
    fn degenerate_projection_detected() {
        // T parallel to S: no inverse.
        let s = DVec4::new(1., 0., 0., 0.);
        let t = DVec4::new(2., 0., 0., 0.);

        assert!(TexToWorld::new(s, t, DVec3::Z, 0.).is_none());
    }
}
