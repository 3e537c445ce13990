//! Light source preparation: entity lights with jitter expansion, style
//! allocation, spotlight targeting, sun and sky-dome setup, and surface
//! light spawning from `_surface` templates.

use glam::DVec3;
use rand::{rngs::StdRng, Rng, SeedableRng};

use bsp::Bsp;

use crate::{
    entity::{mangle_to_direction, LightConfig, LightFormula, WorldLightConfig},
    utils::{misc::parse_vec3, simple_calculs::{Plane3D, Winding}},
};

use super::{face_plane, face_vertex, trace::face_texture_name, LightOptions};

/// Attenuation reference scale; formulas divide distances by it.
pub const LF_SCALE: f64 = 128.;

#[derive(Debug, Clone)]
pub struct PreparedLight {
    pub config: LightConfig,
    pub position: DVec3,
    pub style: u8,
    pub projected: Option<ProjectedSampler>,
}

/// A light's texture projection frustum with palette-resolved pixels.
#[derive(Debug, Clone)]
pub struct ProjectedSampler {
    right: DVec3,
    up: DVec3,
    forward: DVec3,
    tan_half_fov: f64,
    width: usize,
    height: usize,
    pixels: Vec<[u8; 3]>,
}

impl ProjectedSampler {
    fn build(bsp: &Bsp, projected: &crate::entity::ProjectedTexture) -> Option<Self> {
        let miptex = bsp.textures.iter().flatten().find(|t| {
            t.name.eq_ignore_ascii_case(&projected.name)
                && t.data.len() >= (t.width * t.height) as usize
                && t.width > 0
        })?;

        let pixels = miptex.data[..(miptex.width * miptex.height) as usize]
            .iter()
            .map(|&i| crate::utils::palette::palette_rgb(i))
            .collect();

        let forward = mangle_to_direction(projected.mangle);
        let right = if forward.x.abs() < 0.99 {
            forward.cross(DVec3::Z).normalize()
        } else {
            forward.cross(DVec3::Y).normalize()
        };
        let up = right.cross(forward);

        Some(Self {
            right,
            up,
            forward,
            tan_half_fov: (projected.fov.clamp(1., 179.).to_radians() / 2.).tan(),
            width: miptex.width as usize,
            height: miptex.height as usize,
            pixels,
        })
    }

    /// Bilinearly sampled texel at the luxel's projection, `ZERO` outside
    /// the frustum or behind the near plane.
    pub fn sample(&self, light_pos: DVec3, point: DVec3) -> DVec3 {
        let delta = point - light_pos;
        let depth = delta.dot(self.forward);

        if depth < 1. {
            return DVec3::ZERO;
        }

        let u = delta.dot(self.right) / (depth * self.tan_half_fov) * 0.5 + 0.5;
        let v = delta.dot(self.up) / (depth * self.tan_half_fov) * 0.5 + 0.5;

        if !(0.0..1.0).contains(&u) || !(0.0..1.0).contains(&v) {
            return DVec3::ZERO;
        }

        let fx = u * (self.width as f64 - 1.);
        let fy = (1. - v) * (self.height as f64 - 1.);
        let x0 = fx.floor() as usize;
        let y0 = fy.floor() as usize;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);
        let tx = fx - x0 as f64;
        let ty = fy - y0 as f64;

        let texel = |x: usize, y: usize| {
            let [r, g, b] = self.pixels[y * self.width + x];
            DVec3::new(r as f64, g as f64, b as f64) / 255.
        };

        let top = texel(x0, y0) * (1. - tx) + texel(x1, y0) * tx;
        let bottom = texel(x0, y1) * (1. - tx) + texel(x1, y1) * tx;

        top * (1. - ty) + bottom * ty
    }
}

#[derive(Debug, Clone)]
pub struct Sun {
    /// Direction the light travels (from sky toward the ground).
    pub direction: DVec3,
    pub light: f64,
    pub color: DVec3,
    pub anglescale: f64,
    pub dirt: bool,
    pub style: u8,
}

pub struct BuiltLights {
    pub lights: Vec<PreparedLight>,
    pub styles: Vec<String>,
}

/// Attenuation at distance `dist` per the light's formula.
///
/// `scale_dist` is the global `-dist` / `_dist` multiplier.
pub fn light_value(config: &LightConfig, scale_dist: f64, dist: f64) -> f64 {
    if matches!(config.formula, LightFormula::Infinite | LightFormula::LocalMin) {
        return config.light;
    }

    let value = scale_dist * config.atten * dist;

    match config.formula {
        LightFormula::Inverse => config.light / (value / LF_SCALE),
        LightFormula::Inverse2A => {
            let value = value + LF_SCALE;
            config.light / ((value * value) / (LF_SCALE * LF_SCALE))
        }
        LightFormula::Inverse2 => config.light / ((value * value) / (LF_SCALE * LF_SCALE)),
        LightFormula::Linear => {
            if config.light > 0. {
                (config.light - value).max(0.)
            } else {
                (config.light + value).min(0.)
            }
        }
        _ => unreachable!(),
    }
}

/// The spotlight cone factor: 1 inside the inner cone, 0 beyond the outer
/// cone, linear in between.
pub fn spot_factor(config: &LightConfig, to_surface: DVec3) -> f64 {
    let Some(spot) = &config.spot else {
        return 1.;
    };

    let cos_angle = to_surface.dot(spot.direction);
    let inner = (spot.angle.to_radians() / 2.).cos();
    let outer = if spot.soft_angle > 0. {
        (spot.soft_angle.to_radians() / 2.).cos()
    } else {
        // The classic hard edge softened over a few degrees.
        ((spot.angle + 5.).to_radians() / 2.).cos()
    };

    if cos_angle >= inner {
        1.
    } else if cos_angle <= outer {
        0.
    } else {
        (cos_angle - outer) / (inner - outer)
    }
}

/// Uniform point in the unit ball, deterministic per light and sample.
fn jitter_offset(rng: &mut StdRng, radius: f64) -> DVec3 {
    loop {
        let candidate = DVec3::new(
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
        );

        if candidate.length_squared() <= 1. {
            return candidate * radius;
        }
    }
}

/// Styles 32..63, assigned to targetnames in source order.
fn allocate_style(styles: &mut Vec<String>, targetname: &str, warnings: &mut Vec<String>) -> u8 {
    if let Some(index) = styles.iter().position(|s| s == targetname) {
        return bsp::FIRST_SWITCHABLE_STYLE + index as u8;
    }

    let next = bsp::FIRST_SWITCHABLE_STYLE as usize + styles.len();
    if next > bsp::LAST_SWITCHABLE_STYLE as usize {
        warnings.push(format!(
            "Too many switchable light targets, \"{}\" falls back to style 0",
            targetname
        ));
        return 0;
    }

    styles.push(targetname.to_string());
    next as u8
}

pub fn build_lights(bsp: &Bsp, world: &WorldLightConfig, warnings: &mut Vec<String>) -> BuiltLights {
    let mut lights = vec![];
    let mut styles: Vec<String> = vec![];

    for (entity_index, entity) in bsp.entities.iter().enumerate() {
        if !entity.classname().starts_with("light") {
            continue;
        }

        let mut config = LightConfig::from_entity(entity);

        if config.unknown_formula {
            warnings.push(format!(
                "light at {} has an unknown delay formula, using linear",
                config.origin
            ));
        }

        // A "target" aims the light, making it a spotlight if it was not
        // one already.
        if !config.target.is_empty() {
            let target_origin = bsp
                .entities
                .iter()
                .find(|e| e.get("targetname") == Some(config.target.as_str()))
                .and_then(|e| e.get("origin"))
                .and_then(parse_vec3);

            if let Some(target_origin) = target_origin {
                let direction = (target_origin - config.origin).normalize_or_zero();
                match &mut config.spot {
                    Some(spot) => spot.direction = direction,
                    None => {
                        config.spot = Some(crate::entity::SpotConfig {
                            direction,
                            angle: crate::entity::DEFAULT_SPOT_ANGLE,
                            soft_angle: 0.,
                        });
                    }
                }
            }
        }

        let style = if config.is_switchable() {
            allocate_style(&mut styles, &config.targetname.clone(), warnings)
        } else {
            config.style
        };

        let projected = match &config.projected {
            Some(texture) => {
                let sampler = ProjectedSampler::build(bsp, texture);
                if sampler.is_none() {
                    warnings.push(format!(
                        "Projected texture {} not found, spot at {} stays unlit",
                        texture.name, config.origin
                    ));
                    config.light = 0.;
                }
                sampler
            }
            None => None,
        };

        // Jitter: replace by N copies in a deviance-radius ball, each
        // carrying light/N. Seeded by entity index for determinism.
        if config.deviance > 0. && config.samples > 1 {
            let mut rng = StdRng::seed_from_u64(entity_index as u64);
            let per_sample = config.light / config.samples as f64;

            for _ in 0..config.samples {
                let mut copy = config.clone();
                copy.light = per_sample;

                lights.push(PreparedLight {
                    position: config.origin + jitter_offset(&mut rng, config.deviance),
                    config: copy,
                    style,
                    projected: projected.clone(),
                });
            }
        } else {
            lights.push(PreparedLight {
                position: config.origin,
                config,
                style,
                projected,
            });
        }
    }

    let _ = world;

    BuiltLights { lights, styles }
}

/// Sun plus sky dome. The dome distributes `iterations^2 + 1` suns over
/// the upper hemisphere, splitting `_sunlight2` between them.
pub fn build_suns(world: &WorldLightConfig, options: &LightOptions) -> Vec<Sun> {
    let mut suns = vec![];

    if world.sunlight > 0. {
        // The mangle vector is already the travel direction: "0 -90 0"
        // shines straight down.
        suns.push(Sun {
            direction: mangle_to_direction(world.sun_mangle),
            light: world.sunlight,
            color: world.sunlight_color,
            anglescale: world.anglescale,
            dirt: world.dirt,
            style: 0,
        });
    }

    if world.sun2 > 0. {
        // Pick iterations so the dome count tracks -sunsamples.
        let iterations =
            (((options.sun_samples.max(1) as f64 - 1.) / 4.).sqrt().round() as i32).max(2) + 1;
        let iterations = iterations.max(2);

        let mut directions = vec![DVec3::new(0., 0., -1.)];
        let elevation_steps = iterations - 1;

        for elevation in 1..=elevation_steps {
            // Rings of equal angular spacing, more suns near the horizon.
            let pitch = (elevation as f64 / elevation_steps as f64) * 90.;
            let ring = elevation * 4;

            for step in 0..ring {
                let yaw = step as f64 / ring as f64 * 360.;
                let dir = mangle_to_direction(DVec3::new(yaw, pitch, 0.));
                directions.push(-dir);
            }
        }

        let per_sun = world.sun2 / directions.len() as f64;
        for direction in directions {
            suns.push(Sun {
                direction,
                light: per_sun,
                color: world.sun2_color,
                anglescale: world.anglescale,
                dirt: world.dirt,
                style: 0,
            });
        }
    }

    suns
}

/// Spawns point lights over every face whose texture matches a `_surface`
/// template: the face is diced into patches, each patch centroid emits.
pub fn build_surface_lights(
    bsp: &Bsp,
    world: &WorldLightConfig,
    built: &BuiltLights,
    warnings: &mut Vec<String>,
) -> Vec<PreparedLight> {
    let templates: Vec<&PreparedLight> = built
        .lights
        .iter()
        .filter(|light| light.config.surface_template.is_some())
        .collect();

    if templates.is_empty() {
        return vec![];
    }

    let mut out = vec![];

    for face in &bsp.faces {
        let name = face_texture_name(bsp, face).to_ascii_lowercase();

        let Some(template) = templates.iter().find(|t| {
            t.config
                .surface_template
                .as_deref()
                .map(|s| s.eq_ignore_ascii_case(&name))
                .unwrap_or(false)
        }) else {
            continue;
        };

        let (normal, _) = face_plane(bsp, face);
        let winding = Winding::new(
            (0..face.edge_count as usize)
                .map(|i| face_vertex(bsp, face, i))
                .collect(),
        );

        for patch in dice_winding(winding, world.surflight_subdivide) {
            let area = patch.area();
            if area < 1. {
                continue;
            }

            let mut config = template.config.clone();
            // Patch intensity scales with the emitting area.
            config.light = template.config.light * (area / (world.surflight_subdivide * world.surflight_subdivide))
                * template.config.surflight_minlight_scale;
            config.formula = LightFormula::Inverse2;
            config.spot = None;

            out.push(PreparedLight {
                position: patch.centroid() + normal * 2.,
                config,
                style: template.style,
                projected: None,
            });
        }
    }

    if out.is_empty() {
        warnings.push("_surface template matched no faces".to_string());
    }

    out
}

/// Splits a winding into patches no larger than `size` on any world axis.
fn dice_winding(winding: Winding, size: f64) -> Vec<Winding> {
    let bounds = winding.bounds();

    for axis in 0..3 {
        if bounds.maxs[axis] - bounds.mins[axis] <= size {
            continue;
        }

        let mut normal = DVec3::ZERO;
        normal[axis] = 1.;
        let mid = (bounds.mins[axis] + bounds.maxs[axis]) * 0.5;

        let (front, back) = winding.split(&Plane3D::new(normal, mid));
        let mut out = vec![];
        for part in [front, back].into_iter().flatten() {
            out.extend(dice_winding(part, size));
        }
        return out;
    }

    vec![winding]
}

#[cfg(test)]
mod test {
    use super::*;

    fn point_light(formula: LightFormula, light: f64) -> LightConfig {
        let mut config = LightConfig::from_entity(&bsp::Entity::new());
        config.light = light;
        config.formula = formula;
        config
    }

    #[test]
    fn linear_falloff_reaches_zero() {
        let config = point_light(LightFormula::Linear, 200.);

        assert_eq!(light_value(&config, 1., 0.), 200.);
        assert_eq!(light_value(&config, 1., 100.), 100.);
        assert_eq!(light_value(&config, 1., 200.), 0.);
        assert_eq!(light_value(&config, 1., 300.), 0.);
    }

    #[test]
    fn inverse2_matches_reference_point() {
        // 200 * 128^2 / 200^2 = 81.92
        let config = point_light(LightFormula::Inverse2, 200.);

        let value = light_value(&config, 1., 200.);
        assert!((value - 81.92).abs() < 1e-9);
    }

    #[test]
    fn infinite_ignores_distance() {
        let config = point_light(LightFormula::Infinite, 150.);

        assert_eq!(light_value(&config, 1., 10.), 150.);
        assert_eq!(light_value(&config, 1., 10000.), 150.);
    }

    #[test]
    fn spot_cone_edges() {
        let mut config = point_light(LightFormula::Linear, 200.);
        config.spot = Some(crate::entity::SpotConfig {
            direction: DVec3::new(0., 0., -1.),
            angle: 40.,
            soft_angle: 0.,
        });

        // Straight down the axis.
        assert_eq!(spot_factor(&config, DVec3::new(0., 0., -1.)), 1.);
        // Far outside the cone.
        assert_eq!(spot_factor(&config, DVec3::new(1., 0., 0.)), 0.);
    }

    #[test]
    fn jitter_splits_intensity() {
        let mut entity = bsp::Entity::new();
        entity.insert("classname", "light");
        entity.insert("light", "320");
        entity.insert("deviance", "4");
        entity.insert("samples", "8");
        entity.insert("origin", "0 0 0");

        let bsp = bsp::Bsp {
            entities: vec![entity],
            ..Default::default()
        };

        let built = build_lights(&bsp, &WorldLightConfig::default(), &mut vec![]);

        assert_eq!(built.lights.len(), 8);
        for light in &built.lights {
            assert!((light.config.light - 40.).abs() < 1e-9);
            assert!(light.position.length() <= 4. + 1e-9);
        }

        // Deterministic: same input, same positions.
        let again = build_lights(&bsp, &WorldLightConfig::default(), &mut vec![]);
        for (a, b) in built.lights.iter().zip(&again.lights) {
            assert_eq!(a.position, b.position);
        }
    }

    #[test]
    fn switchable_styles_by_source_order() {
        let mut e1 = bsp::Entity::new();
        e1.insert("classname", "light");
        e1.insert("targetname", "hall");
        let mut e2 = bsp::Entity::new();
        e2.insert("classname", "light");
        e2.insert("targetname", "cellar");
        let mut e3 = bsp::Entity::new();
        e3.insert("classname", "light");
        e3.insert("targetname", "hall");

        let bsp = bsp::Bsp {
            entities: vec![e1, e2, e3],
            ..Default::default()
        };

        let built = build_lights(&bsp, &WorldLightConfig::default(), &mut vec![]);

        assert_eq!(built.lights[0].style, 32);
        assert_eq!(built.lights[1].style, 33);
        assert_eq!(built.lights[2].style, 32);
    }

    #[test]
    fn sky_dome_partitions_intensity() {
        let world = WorldLightConfig {
            sun2: 100.,
            ..Default::default()
        };

        let suns = build_suns(&world, &LightOptions::default());

        assert!(!suns.is_empty());
        let total: f64 = suns.iter().map(|s| s.light).sum();
        assert!((total - 100.).abs() < 1e-9);

        // All dome suns shine downward or level.
        for sun in &suns {
            assert!(sun.direction.z <= 1e-9);
        }
    }

    #[test]
    fn dice_winding_patch_size() {
        let winding = Winding::new(vec![
            DVec3::new(0., 256., 0.),
            DVec3::new(256., 256., 0.),
            DVec3::new(256., 0., 0.),
            DVec3::new(0., 0., 0.),
        ]);

        let patches = dice_winding(winding, 128.);
        assert_eq!(patches.len(), 4);

        let total: f64 = patches.iter().map(|p| p.area()).sum();
        assert!((total - 256. * 256.).abs() < 1e-6);
    }
}
