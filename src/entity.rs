//! Typed views over entity epairs. Keys are parsed once at a phase
//! boundary; the rest of the pipeline works with these structs.

use glam::DVec3;

use crate::utils::misc::{parse_angles, parse_vec3};

/// Key lookup shared between `map::Attributes` and `bsp::Entity`.
pub trait EpairSource {
    fn value(&self, key: &str) -> Option<&str>;
}

impl EpairSource for map::Attributes {
    fn value(&self, key: &str) -> Option<&str> {
        self.get(key)
    }
}

impl EpairSource for bsp::Entity {
    fn value(&self, key: &str) -> Option<&str> {
        self.get(key)
    }
}

fn float_key(source: &impl EpairSource, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .find_map(|key| source.value(key))
        .and_then(|v| v.trim().parse::<f64>().ok())
}

fn int_key(source: &impl EpairSource, keys: &[&str]) -> Option<i32> {
    float_key(source, keys).map(|v| v as i32)
}

fn vec3_key(source: &impl EpairSource, keys: &[&str]) -> Option<DVec3> {
    keys.iter()
        .find_map(|key| source.value(key))
        .and_then(parse_vec3)
}

fn bool_key(source: &impl EpairSource, keys: &[&str]) -> Option<bool> {
    int_key(source, keys).map(|v| v != 0)
}

/// Per-bmodel compile and light behavior.
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub mirror_inside: bool,
    /// Casts shadows on the world.
    pub shadow: bool,
    /// Casts shadows on itself.
    pub shadow_self: bool,
    pub minlight: f64,
    pub minlight_color: DVec3,
    pub phong: bool,
    pub phong_angle: f64,
    /// -1 off, 0 inherit, 1 on.
    pub dirt: i32,
    pub lightmap_scale: Option<f64>,
    pub light_alpha: Option<f64>,
    pub channel_mask: u32,
}

impl Default for ModelInfo {
    fn default() -> Self {
        Self {
            mirror_inside: false,
            shadow: false,
            shadow_self: false,
            minlight: 0.,
            minlight_color: DVec3::splat(255.),
            phong: false,
            phong_angle: 0.,
            dirt: 0,
            lightmap_scale: None,
            light_alpha: None,
            channel_mask: 1,
        }
    }
}

impl ModelInfo {
    pub fn from_entity(source: &impl EpairSource) -> Self {
        let phong_angle = float_key(source, &["_phong_angle"]).unwrap_or(0.);
        let phong = bool_key(source, &["_phong"]).unwrap_or(false) || phong_angle > 0.;

        Self {
            mirror_inside: bool_key(source, &["_mirrorinside"]).unwrap_or(false),
            shadow: bool_key(source, &["_shadow"]).unwrap_or(false),
            shadow_self: bool_key(source, &["_shadowself", "_selfshadow"]).unwrap_or(false),
            minlight: float_key(source, &["_minlight"]).unwrap_or(0.),
            minlight_color: vec3_key(source, &["_minlight_color", "_mincolor"])
                .unwrap_or(DVec3::splat(255.)),
            phong,
            phong_angle: if phong && phong_angle == 0. {
                89.
            } else {
                phong_angle
            },
            dirt: int_key(source, &["_dirt"]).unwrap_or(0),
            lightmap_scale: float_key(source, &["_lightmap_scale", "_lmscale"]),
            light_alpha: float_key(source, &["_light_alpha", "_alpha"]),
            channel_mask: int_key(source, &["_object_channel_mask"]).unwrap_or(1) as u32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightFormula {
    Linear,
    Inverse,
    Inverse2,
    Infinite,
    LocalMin,
    Inverse2A,
}

impl LightFormula {
    /// The "delay" key: a number or a name. Unknown values fall back to
    /// linear; the caller warns.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "0" | "linear" => Some(Self::Linear),
            "1" | "inverse" => Some(Self::Inverse),
            "2" | "inverse2" => Some(Self::Inverse2),
            "3" | "infinite" => Some(Self::Infinite),
            "4" | "localmin" => Some(Self::LocalMin),
            "5" | "inverse2a" => Some(Self::Inverse2A),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SpotConfig {
    pub direction: DVec3,
    /// Inner cone full angle, degrees.
    pub angle: f64,
    /// Outer cone full angle; 0 derives the classic soft edge.
    pub soft_angle: f64,
}

#[derive(Debug, Clone)]
pub struct ProjectedTexture {
    pub name: String,
    pub fov: f64,
    pub mangle: DVec3,
}

/// A light entity, decoded with the original key set.
#[derive(Debug, Clone)]
pub struct LightConfig {
    pub origin: DVec3,
    pub light: f64,
    pub color: DVec3,
    pub formula: LightFormula,
    pub atten: f64,
    /// Negative means inherit the global value.
    pub anglescale: f64,
    pub style: u8,
    pub targetname: String,
    pub target: String,
    pub spot: Option<SpotConfig>,
    pub deviance: f64,
    pub samples: i32,
    pub dirt: i32,
    pub dirt_scale: f64,
    pub dirt_gain: f64,
    pub bleed: bool,
    pub bounce_scale: f64,
    pub channel_mask: u32,
    pub shadow_channel_mask: u32,
    pub projected: Option<ProjectedTexture>,
    pub surface_template: Option<String>,
    pub surflight_minlight_scale: f64,
    pub nonudge: bool,
    pub unknown_formula: bool,
}

pub const DEFAULT_LIGHT_LEVEL: f64 = 300.;
/// Default spotlight cone, degrees.
pub const DEFAULT_SPOT_ANGLE: f64 = 40.;

impl LightConfig {
    pub fn from_entity(source: &impl EpairSource) -> Self {
        let raw_formula = source.value("delay");
        let formula = raw_formula.and_then(LightFormula::parse);
        let unknown_formula = raw_formula.is_some() && formula.is_none();

        let mut light = float_key(source, &["light", "_light"]).unwrap_or(DEFAULT_LIGHT_LEVEL);
        if light == 0. {
            light = DEFAULT_LIGHT_LEVEL;
        }

        // Color may be 0..1 or 0..255; normalize to 0..255.
        let mut color = vec3_key(source, &["_color", "color"]).unwrap_or(DVec3::splat(255.));
        if color.max_element() <= 1. && color.max_element() > 0. {
            color *= 255.;
        }

        let mut deviance = float_key(source, &["deviance"]).unwrap_or(0.);
        let mut samples = int_key(source, &["samples"]).unwrap_or(0);
        if deviance > 0. && samples == 0 {
            samples = 16;
        }
        if deviance <= 0. || samples <= 1 {
            deviance = 0.;
            samples = 1;
        }

        let spot = Self::spot_from(source);

        let projected = source.value("project_texture").map(|name| ProjectedTexture {
            name: name.to_string(),
            fov: float_key(source, &["project_fov"]).unwrap_or(90.),
            mangle: vec3_key(source, &["project_mangle"]).unwrap_or(DVec3::new(20., 0., 0.)),
        });

        Self {
            origin: vec3_key(source, &["origin"]).unwrap_or(DVec3::ZERO),
            light,
            color,
            formula: formula.unwrap_or(LightFormula::Linear),
            atten: float_key(source, &["wait"]).unwrap_or(1.).max(0.),
            anglescale: float_key(source, &["anglesense", "anglescale"]).unwrap_or(-1.),
            style: int_key(source, &["style"]).unwrap_or(0).clamp(0, 254) as u8,
            targetname: source.value("targetname").unwrap_or("").to_string(),
            target: source.value("target").unwrap_or("").to_string(),
            spot,
            deviance,
            samples,
            dirt: int_key(source, &["_dirt"]).unwrap_or(0),
            dirt_scale: float_key(source, &["_dirtscale"]).unwrap_or(0.),
            dirt_gain: float_key(source, &["_dirtgain"]).unwrap_or(0.),
            bleed: bool_key(source, &["_bleed"]).unwrap_or(false),
            bounce_scale: float_key(source, &["_bouncescale"]).unwrap_or(1.),
            channel_mask: int_key(source, &["light_channel_mask"]).unwrap_or(1) as u32,
            shadow_channel_mask: int_key(source, &["shadow_channel_mask"]).unwrap_or(1) as u32,
            projected,
            surface_template: source.value("_surface").map(|s| s.to_string()),
            surflight_minlight_scale: float_key(source, &["_surflight_minlight_scale"])
                .unwrap_or(1.),
            nonudge: bool_key(source, &["_nonudge"]).unwrap_or(false),
            unknown_formula,
        }
    }

    fn spot_from(source: &impl EpairSource) -> Option<SpotConfig> {
        let mangle = source.value("mangle").and_then(parse_angles);
        let has_cone = source.value("angle").is_some() || mangle.is_some();

        if !has_cone {
            return None;
        }

        let direction = mangle
            .map(mangle_to_direction)
            .unwrap_or(DVec3::new(0., 0., -1.));

        Some(SpotConfig {
            direction,
            angle: float_key(source, &["angle"]).unwrap_or(DEFAULT_SPOT_ANGLE),
            soft_angle: float_key(source, &["softangle"]).unwrap_or(0.),
        })
    }

    pub fn is_switchable(&self) -> bool {
        !self.targetname.is_empty()
    }
}

/// "yaw pitch roll" sky/sun orientation to a unit direction vector.
pub fn mangle_to_direction(mangle: DVec3) -> DVec3 {
    let yaw = mangle.x.to_radians();
    let pitch = mangle.y.to_radians();

    DVec3::new(
        yaw.cos() * pitch.cos(),
        yaw.sin() * pitch.cos(),
        pitch.sin(),
    )
}

/// Worldspawn-wide light settings.
#[derive(Debug, Clone)]
pub struct WorldLightConfig {
    pub sunlight: f64,
    pub sunlight_color: DVec3,
    pub sun_mangle: DVec3,
    pub sun_deviance: f64,
    pub sun2: f64,
    pub sun2_color: DVec3,
    pub anglescale: f64,
    pub dist: f64,
    pub range: f64,
    pub minlight: f64,
    pub minlight_color: DVec3,
    pub minlight_dirt: bool,
    pub dirt: bool,
    pub dirt_mode: i32,
    pub dirt_depth: f64,
    pub dirt_scale: f64,
    pub dirt_gain: f64,
    pub dirt_angle: f64,
    pub bounce: i32,
    pub bounce_scale: f64,
    pub surflight_subdivide: f64,
}

impl Default for WorldLightConfig {
    fn default() -> Self {
        Self {
            sunlight: 0.,
            sunlight_color: DVec3::splat(255.),
            sun_mangle: DVec3::new(0., -90., 0.),
            sun_deviance: 0.,
            sun2: 0.,
            sun2_color: DVec3::splat(255.),
            anglescale: 0.5,
            dist: 1.,
            range: 0.5,
            minlight: 0.,
            minlight_color: DVec3::splat(255.),
            minlight_dirt: false,
            dirt: false,
            dirt_mode: 0,
            dirt_depth: 128.,
            dirt_scale: 1.,
            dirt_gain: 1.,
            dirt_angle: 88.,
            bounce: 0,
            bounce_scale: 1.,
            surflight_subdivide: 128.,
        }
    }
}

impl WorldLightConfig {
    pub fn from_entity(source: &impl EpairSource) -> Self {
        let defaults = Self::default();

        Self {
            sunlight: float_key(source, &["_sunlight", "_sun_light"]).unwrap_or(defaults.sunlight),
            sunlight_color: vec3_key(source, &["_sunlight_color", "_sun_color"])
                .unwrap_or(defaults.sunlight_color),
            sun_mangle: source
                .value("_sunlight_mangle")
                .or_else(|| source.value("_sun_mangle"))
                .and_then(parse_angles)
                .unwrap_or(defaults.sun_mangle),
            sun_deviance: float_key(source, &["_sunlight_penumbra"]).unwrap_or(0.),
            sun2: float_key(source, &["_sunlight2"]).unwrap_or(0.),
            sun2_color: vec3_key(source, &["_sunlight2_color"]).unwrap_or(defaults.sun2_color),
            anglescale: float_key(source, &["_anglescale", "_anglesense"])
                .unwrap_or(defaults.anglescale),
            dist: float_key(source, &["_dist"]).unwrap_or(defaults.dist),
            range: float_key(source, &["_range"]).unwrap_or(defaults.range),
            minlight: float_key(source, &["_minlight", "light"]).unwrap_or(0.),
            minlight_color: vec3_key(source, &["_minlight_color", "_mincolor"])
                .unwrap_or(defaults.minlight_color),
            minlight_dirt: bool_key(source, &["_minlight_dirt"]).unwrap_or(false),
            dirt: int_key(source, &["_dirt"]).unwrap_or(0) > 0,
            dirt_mode: int_key(source, &["_dirtmode"]).unwrap_or(0),
            dirt_depth: float_key(source, &["_dirtdepth"]).unwrap_or(defaults.dirt_depth),
            dirt_scale: float_key(source, &["_dirtscale"]).unwrap_or(defaults.dirt_scale),
            dirt_gain: float_key(source, &["_dirtgain"]).unwrap_or(defaults.dirt_gain),
            dirt_angle: float_key(source, &["_dirtangle"]).unwrap_or(defaults.dirt_angle),
            bounce: int_key(source, &["_bounce"]).unwrap_or(0),
            bounce_scale: float_key(source, &["_bouncescale"]).unwrap_or(1.),
            surflight_subdivide: float_key(source, &["_surflight_subdivide"])
                .unwrap_or(defaults.surflight_subdivide)
                .clamp(64., 2048.),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn entity(pairs: &[(&str, &str)]) -> bsp::Entity {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn light_defaults() {
        let light = LightConfig::from_entity(&entity(&[("classname", "light")]));

        assert_eq!(light.light, 300.);
        assert_eq!(light.formula, LightFormula::Linear);
        assert_eq!(light.color, DVec3::splat(255.));
        assert_eq!(light.samples, 1);
        assert!(light.spot.is_none());
    }

    #[test]
    fn formula_names_and_numbers() {
        assert_eq!(LightFormula::parse("2"), Some(LightFormula::Inverse2));
        assert_eq!(
            LightFormula::parse("inverse2a"),
            Some(LightFormula::Inverse2A)
        );
        assert_eq!(LightFormula::parse("cubic"), None);

        let light = LightConfig::from_entity(&entity(&[("delay", "cubic")]));
        assert!(light.unknown_formula);
        assert_eq!(light.formula, LightFormula::Linear);
    }

    #[test]
    fn jitter_defaults_kick_in() {
        let light = LightConfig::from_entity(&entity(&[("deviance", "8")]));
        assert_eq!(light.samples, 16);
        assert_eq!(light.deviance, 8.);

        let off = LightConfig::from_entity(&entity(&[("deviance", "8"), ("samples", "1")]));
        assert_eq!(off.deviance, 0.);
        assert_eq!(off.samples, 1);
    }

    #[test]
    fn unit_scale_color_normalized() {
        let light = LightConfig::from_entity(&entity(&[("_color", "1 0.5 0.25")]));
        assert_eq!(light.color, DVec3::new(255., 127.5, 63.75));
    }

    #[test]
    fn spot_from_mangle() {
        let light = LightConfig::from_entity(&entity(&[
            ("mangle", "0 -90 0"),
            ("angle", "30"),
        ]));

        let spot = light.spot.unwrap();
        assert!((spot.direction - DVec3::new(0., 0., -1.)).length() < 1e-9);
        assert_eq!(spot.angle, 30.);
    }

    #[test]
    fn model_info_phong_angle_default() {
        let info = ModelInfo::from_entity(&entity(&[("_phong", "1")]));
        assert!(info.phong);
        assert_eq!(info.phong_angle, 89.);
    }

    #[test]
    fn world_config_sun() {
        let world = WorldLightConfig::from_entity(&entity(&[
            ("_sunlight", "200"),
            ("_sunlight_mangle", "90 -45 0"),
        ]));

        assert_eq!(world.sunlight, 200.);
        assert_eq!(world.sun_mangle, DVec3::new(90., -45., 0.));
    }
}
