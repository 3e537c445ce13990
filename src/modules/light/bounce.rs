//! Radiosity bounce: after a pass, every lit face re-emits from its
//! centroid, scaled by its area and texture color.

use glam::DVec3;

use super::{face_plane, face_vertex, ltface::FaceLight, trace::texture_average_color, Scene};

#[derive(Debug, Clone)]
pub struct BounceLight {
    pub position: DVec3,
    /// Pre-multiplied emission color, 0..1 per channel.
    pub color: DVec3,
    /// Area-scaled intensity; the gather divides by `d^2 + 128^2`.
    pub intensity: f64,
    pub source_face: usize,
}

/// One bounce light per face that ended the previous pass with light on it.
pub fn collect_bounce_lights(
    scene: &Scene,
    lightmapped: &[usize],
    face_lights: &[Option<FaceLight>],
) -> Vec<BounceLight> {
    let bsp = scene.bsp;
    let mut out = vec![];

    for (&face_index, face_light) in lightmapped.iter().zip(face_lights) {
        let Some(face_light) = face_light else {
            continue;
        };
        let Some(style0) = face_light.styles.iter().find(|m| m.style == 0) else {
            continue;
        };

        let luxels = style0.samples.len().max(1);
        let mut average = DVec3::ZERO;
        let mut average_light = 0.;

        for sample in &style0.samples {
            average += sample.color;
            average_light += sample.light;
        }
        average /= luxels as f64;
        average_light /= luxels as f64;

        if average_light < 1. {
            continue;
        }

        let face = &bsp.faces[face_index];
        let (normal, _) = face_plane(bsp, face);

        let mut area = 0.;
        let mut centroid = DVec3::ZERO;
        let v0 = face_vertex(bsp, face, 0);
        for i in 1..(face.edge_count as usize).saturating_sub(1) {
            let v1 = face_vertex(bsp, face, i);
            let v2 = face_vertex(bsp, face, i + 1);
            area += (v1 - v0).cross(v2 - v0).length() * 0.5;
        }
        for i in 0..face.edge_count as usize {
            centroid += face_vertex(bsp, face, i);
        }
        centroid /= (face.edge_count as f64).max(1.);

        if area < 1. {
            continue;
        }

        // The surface reflects its texture color.
        let reflectivity = texture_average_color(bsp, face) / 255.;
        let emitted = average / average.max_element().max(1e-6) * reflectivity;

        out.push(BounceLight {
            position: centroid + normal * 4.,
            color: emitted,
            intensity: average_light * area * scene.world.bounce_scale,
            source_face: face_index,
        });
    }

    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bounce_gather_falls_off_with_distance() {
        let bounce = BounceLight {
            position: DVec3::ZERO,
            color: DVec3::ONE,
            intensity: 100_000.,
            source_face: 0,
        };

        // The gather formula: intensity * cos / (d^2 + 128^2).
        let near = bounce.intensity / (64_f64.powi(2) + 128_f64.powi(2));
        let far = bounce.intensity / (512_f64.powi(2) + 128_f64.powi(2));

        assert!(near > far);
        assert!(near < bounce.intensity);
    }
}
