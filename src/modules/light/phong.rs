//! Phong-smoothed vertex normals, interpolated per sample with barycentric
//! weights over the face's fan triangulation.

use std::collections::HashMap;

use glam::DVec3;

use bsp::Bsp;

use crate::{
    entity::ModelInfo,
    utils::simple_calculs::barycentric,
};

use super::{face_plane, face_vertex};

fn vertex_key(point: DVec3) -> (i64, i64, i64) {
    (
        (point.x * 8.).round() as i64,
        (point.y * 8.).round() as i64,
        (point.z * 8.).round() as i64,
    )
}

#[derive(Debug, Default)]
pub struct PhongNormals {
    /// (face, vertex position) -> smoothed normal.
    normals: HashMap<(u32, (i64, i64, i64)), DVec3>,
    faces: Vec<bool>,
}

struct IncidentFace {
    normal: DVec3,
    area: f64,
}

impl PhongNormals {
    pub fn build(bsp: &Bsp, infos: &[ModelInfo], face_models: &[u32]) -> Self {
        let mut phong_faces = vec![false; bsp.faces.len()];
        for (face_index, &model) in face_models.iter().enumerate() {
            if let Some(info) = infos.get(model as usize) {
                phong_faces[face_index] = info.phong && info.phong_angle > 0.;
            }
        }

        if !phong_faces.iter().any(|&p| p) {
            return Self {
                normals: HashMap::new(),
                faces: phong_faces,
            };
        }

        // Vertex -> incident faces, with area weights for the blend.
        let mut incident: HashMap<(i64, i64, i64), Vec<IncidentFace>> = HashMap::new();

        for face in &bsp.faces {
            let (normal, _) = face_plane(bsp, face);

            let mut area = 0.;
            let v0 = face_vertex(bsp, face, 0);
            for i in 1..(face.edge_count as usize).saturating_sub(1) {
                let e1 = face_vertex(bsp, face, i) - v0;
                let e2 = face_vertex(bsp, face, i + 1) - v0;
                area += e1.cross(e2).length() * 0.5;
            }

            for i in 0..face.edge_count as usize {
                incident
                    .entry(vertex_key(face_vertex(bsp, face, i)))
                    .or_default()
                    .push(IncidentFace { normal, area });
            }
        }

        let mut normals = HashMap::new();

        for (face_index, face) in bsp.faces.iter().enumerate() {
            if !phong_faces[face_index] {
                continue;
            }

            let model = face_models[face_index] as usize;
            let cos_threshold = infos[model].phong_angle.to_radians().cos();
            let (face_normal, _) = face_plane(bsp, face);

            for i in 0..face.edge_count as usize {
                let key = vertex_key(face_vertex(bsp, face, i));

                let mut sum = DVec3::ZERO;
                for other in incident.get(&key).into_iter().flatten() {
                    if face_normal.dot(other.normal) >= cos_threshold {
                        sum += other.normal * other.area;
                    }
                }

                let smoothed = if sum.length_squared() > 1e-12 {
                    sum.normalize()
                } else {
                    face_normal
                };

                normals.insert((face_index as u32, key), smoothed);
            }
        }

        Self {
            normals,
            faces: phong_faces,
        }
    }

    pub fn face_is_smoothed(&self, face_index: usize) -> bool {
        self.faces.get(face_index).copied().unwrap_or(false)
    }

    /// Barycentric interpolation over the face's triangle fan.
    pub fn sample_with(&self, bsp: &Bsp, face_index: usize, point: DVec3) -> Option<DVec3> {
        if !self.face_is_smoothed(face_index) {
            return None;
        }

        let face = &bsp.faces[face_index];
        let v0 = face_vertex(bsp, face, 0);
        let n0 = self.vertex_normal(face_index, v0)?;

        for i in 1..(face.edge_count as usize).saturating_sub(1) {
            let v1 = face_vertex(bsp, face, i);
            let v2 = face_vertex(bsp, face, i + 1);

            let Some(weights) = barycentric(point, v0, v1, v2) else {
                continue;
            };

            let inside = weights.min_element() >= -0.01;
            if !inside && i + 2 < face.edge_count as usize {
                continue;
            }

            let n1 = self.vertex_normal(face_index, v1)?;
            let n2 = self.vertex_normal(face_index, v2)?;

            let blended = n0 * weights.x + n1 * weights.y + n2 * weights.z;
            return (blended.length_squared() > 1e-12).then(|| blended.normalize());
        }

        None
    }

    fn vertex_normal(&self, face_index: usize, vertex: DVec3) -> Option<DVec3> {
        self.normals
            .get(&(face_index as u32, vertex_key(vertex)))
            .copied()
    }
}
