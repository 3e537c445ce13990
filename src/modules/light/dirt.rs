//! Dirtmapping: short ambient-occlusion rays in a cone around the sample
//! normal, darkening crevices.

use glam::DVec3;
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::entity::WorldLightConfig;

use super::{trace::Bvh, Scene};

const DIRT_NUM_ANGLE_STEPS: usize = 16;
const DIRT_NUM_ELEVATION_STEPS: usize = 3;
pub const DIRT_NUM_VECTORS: usize = DIRT_NUM_ANGLE_STEPS * DIRT_NUM_ELEVATION_STEPS;

#[derive(Debug)]
pub struct DirtContext {
    pub enabled: bool,
    /// 0 = the ordered vector set, 1 = random per sample.
    pub mode: i32,
    pub depth: f64,
    pub scale: f64,
    pub gain: f64,
    pub angle: f64,
    /// Tangent-space cone vectors for the ordered mode.
    vectors: Vec<DVec3>,
}

impl DirtContext {
    pub fn new(world: &WorldLightConfig) -> Self {
        let angle = world.dirt_angle.clamp(1., 90.);

        let mut vectors = Vec::with_capacity(DIRT_NUM_VECTORS);
        let angle_step = (360. / DIRT_NUM_ANGLE_STEPS as f64).to_radians();
        let elevation_step = (angle / DIRT_NUM_ELEVATION_STEPS as f64).to_radians();

        for i in 0..DIRT_NUM_ANGLE_STEPS {
            let azimuth = i as f64 * angle_step;

            for j in 0..DIRT_NUM_ELEVATION_STEPS {
                let elevation = elevation_step * 0.5 + j as f64 * elevation_step;

                vectors.push(DVec3::new(
                    elevation.sin() * azimuth.cos(),
                    elevation.sin() * azimuth.sin(),
                    elevation.cos(),
                ));
            }
        }

        Self {
            enabled: world.dirt,
            mode: world.dirt_mode,
            depth: world.dirt_depth.max(1.),
            scale: world.dirt_scale,
            gain: world.dirt_gain,
            angle,
            vectors,
        }
    }

    /// Tangent basis for a sample normal.
    fn basis(normal: DVec3) -> (DVec3, DVec3) {
        if normal.x == 0. && normal.y == 0. {
            if normal.z > 0. {
                (DVec3::X, DVec3::Y)
            } else {
                (-DVec3::X, DVec3::Y)
            }
        } else {
            let right = normal.cross(DVec3::Z).normalize();
            let up = right.cross(normal);
            (right, up)
        }
    }

    /// Mean occlusion in `[0, 1]`: 1 means fully hemmed in at zero range.
    pub fn occlusion_at(&self, bvh: &Bvh, point: DVec3, normal: DVec3, seed: u64) -> f64 {
        let (right, up) = Self::basis(normal);
        let inv_depth = 1. / self.depth;

        let mut gathered = 0.;
        let mut rng = StdRng::seed_from_u64(seed);

        for i in 0..DIRT_NUM_VECTORS {
            let tangent = if self.mode == 1 {
                // Random cone sample, deterministically seeded.
                let azimuth = rng.gen_range(0.0..std::f64::consts::TAU);
                let elevation = rng.gen_range(0.0..self.angle.to_radians());
                DVec3::new(
                    azimuth.cos() * elevation.sin(),
                    azimuth.sin() * elevation.sin(),
                    elevation.cos(),
                )
            } else {
                self.vectors[i]
            };

            let direction = right * tangent.x + up * tangent.y + normal * tangent.z;

            if let Some(hit) = bvh.first_hit(point, direction, self.depth, u32::MAX, None) {
                gathered += (1. - inv_depth * hit.t).max(0.);
            }
        }

        gathered / DIRT_NUM_VECTORS as f64
    }

    /// The factor that multiplies a sample's color.
    pub fn scale_factor(&self, occlusion: f64, light_dirt: i32, surface_no_dirt: bool) -> f64 {
        if !self.enabled && light_dirt != 1 {
            return 1.;
        }
        if surface_no_dirt || light_dirt == -1 {
            return 1.;
        }

        let mut out = occlusion.powf(self.gain);
        out = out.min(1.);
        out *= self.scale;
        out = out.min(1.);

        (1. - out).clamp(0., 1.)
    }
}

/// Per-luxel occlusion values for one surface.
pub fn surface_occlusion(scene: &Scene, points: &[DVec3], normals: &[DVec3]) -> Vec<f64> {
    let needs_dirt = scene.dirt.enabled
        || scene.lights.iter().any(|l| l.config.dirt == 1)
        || scene.suns.iter().any(|s| s.dirt);

    if !needs_dirt {
        return vec![0.; points.len()];
    }

    points
        .iter()
        .zip(normals)
        .enumerate()
        .map(|(index, (&point, &normal))| {
            scene
                .dirt
                .occlusion_at(&scene.bvh, point, normal, index as u64)
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    fn context(world_dirt: bool) -> DirtContext {
        DirtContext::new(&WorldLightConfig {
            dirt: world_dirt,
            ..Default::default()
        })
    }

    #[test]
    fn vector_set_is_in_cone() {
        let ctx = context(true);

        assert_eq!(ctx.vectors.len(), DIRT_NUM_VECTORS);
        for v in &ctx.vectors {
            assert!((v.length() - 1.).abs() < 1e-9);
            // Default 88-degree cone: all vectors above the tangent plane.
            assert!(v.z > 0.);
        }
    }

    #[test]
    fn unoccluded_sample_keeps_full_brightness() {
        let ctx = context(true);

        assert_eq!(ctx.scale_factor(0., 0, false), 1.);
    }

    #[test]
    fn fully_occluded_sample_goes_dark() {
        let ctx = context(true);

        assert!(ctx.scale_factor(1., 0, false) < 1e-9);
    }

    #[test]
    fn per_surface_and_per_light_opt_outs() {
        let ctx = context(true);

        assert_eq!(ctx.scale_factor(1., -1, false), 1.);
        assert_eq!(ctx.scale_factor(1., 0, true), 1.);
    }

    #[test]
    fn disabled_dirt_only_applies_to_opted_in_lights() {
        let ctx = context(false);

        assert_eq!(ctx.scale_factor(0.8, 0, false), 1.);
        assert!(ctx.scale_factor(0.8, 1, false) < 1.);
    }
}
