//! The lightmap baker: direct, sun, sky-dome, surface and bounced light
//! integrated onto per-face luxel grids, packed as paletted, RGB or HDR
//! lightmaps plus the .lit/.lux sidecars.

use std::path::{Path, PathBuf};

use glam::DVec3;
use rayon::prelude::*;

use bsp::Bsp;

use crate::{
    entity::{ModelInfo, WorldLightConfig},
    err,
    utils::{constants::DEFAULT_LIGHTMAP_SCALE, misc::with_extension},
};

pub mod bounce;
pub mod dirt;
pub mod lights;
pub mod ltface;
pub mod phong;
pub mod sample;
pub mod trace;
pub mod write;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisApprox {
    None,
    Vis,
    Rays,
}

#[derive(Debug, Clone)]
pub struct LightOptions {
    pub threads: Option<usize>,
    /// 1, 2 (-extra) or 4 (-extra4) samples per luxel axis.
    pub oversample: u32,
    /// Global distance scale applied to every attenuation ("-dist").
    pub scale_dist: f64,
    /// Post-accumulation range scale ("-range").
    pub range_scale: f64,
    /// Fade gate: lights dimmer than this at a surface are culled.
    pub gate: f64,
    /// Global minlight override ("-light").
    pub minlight: Option<f64>,
    /// Add minlight instead of clamping to it.
    pub add_min: bool,
    pub gamma: f64,
    pub write_lit: bool,
    pub write_lit2: bool,
    pub write_bspx_rgb: bool,
    pub write_lux: bool,
    /// Box-filter radius; 0 disables.
    pub soft: u32,
    pub dirt: Option<bool>,
    pub dirt_debug: bool,
    pub dirt_mode: Option<i32>,
    pub dirt_depth: Option<f64>,
    pub dirt_scale: Option<f64>,
    pub dirt_gain: Option<f64>,
    pub dirt_angle: Option<f64>,
    pub sun_samples: u32,
    pub world_units_per_luxel: Option<f64>,
    pub bounce: Option<i32>,
    pub hdr_lit: bool,
    pub hdr_bspx: bool,
    pub vis_approx: VisApprox,
    /// Skip writing the vanilla greyscale lump when a BSPX variant exists.
    pub no_vanilla: bool,
    /// Minlight and sky only; point lights ignored.
    pub no_lights: bool,
    pub phong_debug: bool,
    /// Allow 16 styles per face via the LMSTYLE16 lump.
    pub extended_styles: bool,
}

impl Default for LightOptions {
    fn default() -> Self {
        Self {
            threads: None,
            oversample: 1,
            scale_dist: 1.,
            range_scale: 0.5,
            gate: 0.001,
            minlight: None,
            add_min: false,
            gamma: 1.,
            write_lit: false,
            write_lit2: false,
            write_bspx_rgb: false,
            write_lux: false,
            soft: 0,
            dirt: None,
            dirt_debug: false,
            dirt_mode: None,
            dirt_depth: None,
            dirt_scale: None,
            dirt_gain: None,
            dirt_angle: None,
            sun_samples: 64,
            world_units_per_luxel: None,
            bounce: None,
            hdr_lit: false,
            hdr_bspx: false,
            vis_approx: VisApprox::None,
            no_vanilla: false,
            no_lights: false,
            phong_debug: false,
            extended_styles: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct BakeReport {
    pub faces_lit: usize,
    pub lightdata_bytes: usize,
    pub styles_used: usize,
    pub warnings: Vec<String>,
}

/// Everything the per-face integrators read; built once, then shared
/// read-only across the worker pool.
pub struct Scene<'a> {
    pub bsp: &'a Bsp,
    pub options: &'a LightOptions,
    pub world: WorldLightConfig,
    pub lights: Vec<lights::PreparedLight>,
    pub suns: Vec<lights::Sun>,
    pub bvh: trace::Bvh,
    pub model_infos: Vec<ModelInfo>,
    /// Face index -> model index.
    pub face_models: Vec<u32>,
    pub phong: phong::PhongNormals,
    pub dirt: dirt::DirtContext,
    pub luxel_scale: f64,
}

impl<'a> Scene<'a> {
    pub fn model_info_for_face(&self, face: usize) -> &ModelInfo {
        &self.model_infos[self.face_models[face] as usize]
    }
}

#[derive(Debug, Default)]
pub struct Light {
    options: LightOptions,
}

impl Light {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn threads(&mut self, n: usize) -> &mut Self {
        self.options.threads = Some(n);
        self
    }

    pub fn extra(&mut self) -> &mut Self {
        self.options.oversample = 2;
        self
    }

    pub fn extra4(&mut self) -> &mut Self {
        self.options.oversample = 4;
        self
    }

    pub fn dist(&mut self, v: f64) -> &mut Self {
        self.options.scale_dist = v;
        self
    }

    pub fn range(&mut self, v: f64) -> &mut Self {
        self.options.range_scale = v;
        self
    }

    pub fn gate(&mut self, v: f64) -> &mut Self {
        self.options.gate = v;
        self
    }

    pub fn minlight(&mut self, v: f64) -> &mut Self {
        self.options.minlight = Some(v);
        self
    }

    pub fn add_min(&mut self) -> &mut Self {
        self.options.add_min = true;
        self
    }

    pub fn gamma(&mut self, v: f64) -> &mut Self {
        self.options.gamma = v;
        self
    }

    pub fn lit(&mut self) -> &mut Self {
        self.options.write_lit = true;
        self
    }

    pub fn lit2(&mut self) -> &mut Self {
        self.options.write_lit2 = true;
        self
    }

    pub fn bspx(&mut self) -> &mut Self {
        self.options.write_bspx_rgb = true;
        self
    }

    pub fn lux(&mut self) -> &mut Self {
        self.options.write_lux = true;
        self
    }

    pub fn soft(&mut self, radius: u32) -> &mut Self {
        self.options.soft = radius;
        self
    }

    pub fn dirt(&mut self, enabled: bool) -> &mut Self {
        self.options.dirt = Some(enabled);
        self
    }

    pub fn dirt_debug(&mut self) -> &mut Self {
        self.options.dirt_debug = true;
        self.options.dirt = Some(true);
        self
    }

    pub fn dirt_params(
        &mut self,
        mode: Option<i32>,
        depth: Option<f64>,
        scale: Option<f64>,
        gain: Option<f64>,
        angle: Option<f64>,
    ) -> &mut Self {
        self.options.dirt_mode = mode;
        self.options.dirt_depth = depth;
        self.options.dirt_scale = scale;
        self.options.dirt_gain = gain;
        self.options.dirt_angle = angle;
        self
    }

    pub fn sun_samples(&mut self, n: u32) -> &mut Self {
        self.options.sun_samples = n.max(1);
        self
    }

    pub fn world_units_per_luxel(&mut self, v: f64) -> &mut Self {
        self.options.world_units_per_luxel = Some(v);
        self
    }

    pub fn bounce(&mut self, passes: i32) -> &mut Self {
        self.options.bounce = Some(passes);
        self
    }

    pub fn hdr(&mut self) -> &mut Self {
        self.options.hdr_lit = true;
        self
    }

    pub fn bspx_hdr(&mut self) -> &mut Self {
        self.options.hdr_bspx = true;
        self
    }

    pub fn vis_approx(&mut self, mode: VisApprox) -> &mut Self {
        self.options.vis_approx = mode;
        self
    }

    pub fn no_vanilla(&mut self) -> &mut Self {
        self.options.no_vanilla = true;
        self
    }

    pub fn no_lights(&mut self) -> &mut Self {
        self.options.no_lights = true;
        self
    }

    pub fn phong_debug(&mut self) -> &mut Self {
        self.options.phong_debug = true;
        self
    }

    pub fn extended_styles(&mut self) -> &mut Self {
        self.options.extended_styles = true;
        self
    }

    pub fn options(&self) -> &LightOptions {
        &self.options
    }

    /// File front end: bakes `input` in place, writing sidecars next to it.
    pub fn run(&self, input: impl AsRef<Path>) -> eyre::Result<BakeReport> {
        let input: PathBuf = input.as_ref().into();

        log::info!("---- light / {} ----", input.display());

        let mut bsp =
            Bsp::from_file(&input).map_err(|e| eyre::eyre!("Cannot load {}: {}", input.display(), e))?;

        let (report, sidecars) = self.bake(&mut bsp)?;

        bsp.write_to_file(&input)
            .map_err(|e| eyre::eyre!("Cannot write {}: {}", input.display(), e))?;

        if let Some(rgb) = &sidecars.lit {
            bsp::lit::write_lit_v1(with_extension(&input, "lit"), rgb)
                .map_err(|e| eyre::eyre!("Cannot write .lit: {}", e))?;
        }
        if let Some((faces, rgb, dirs)) = &sidecars.lit2 {
            bsp::lit::write_lit_v2(with_extension(&input, "lit"), faces, rgb, dirs)
                .map_err(|e| eyre::eyre!("Cannot write .lit: {}", e))?;
        }
        if let Some(packed) = &sidecars.lit_hdr {
            bsp::lit::write_lit_hdr(with_extension(&input, "lit"), packed)
                .map_err(|e| eyre::eyre!("Cannot write HDR .lit: {}", e))?;
        }
        if let Some(dirs) = &sidecars.lux {
            bsp::lit::write_lux(with_extension(&input, "lux"), dirs)
                .map_err(|e| eyre::eyre!("Cannot write .lux: {}", e))?;
        }

        let summary = format!(
            "{} faces, {} bytes of light data, {} styles",
            report.faces_lit, report.lightdata_bytes, report.styles_used
        );
        log::info!("light: {}", summary);

        // The .log sibling keeps the full transcript of the run.
        let mut transcript = format!("---- light / {} ----\n", input.display());
        for warning in &report.warnings {
            transcript += &format!("WARNING: {}\n", warning);
        }
        transcript += &summary;
        transcript += "\n";
        std::fs::write(with_extension(&input, "log"), transcript)?;

        Ok(report)
    }

    /// The whole bake as a function of the in-memory BSP.
    pub fn bake(&self, bsp: &mut Bsp) -> eyre::Result<(BakeReport, write::Sidecars)> {
        let options = &self.options;

        if bsp.models.is_empty() {
            return err!("BSP has no models");
        }

        if let Some(threads) = options.threads {
            // A process-global pool; a second call with the same count is a
            // no-op, mismatches are not fatal.
            let _ = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build_global();
        }

        let worldspawn = bsp
            .entities
            .first()
            .cloned()
            .unwrap_or_default();

        let mut world = WorldLightConfig::from_entity(&worldspawn);
        world.dist = options.scale_dist * world.dist;
        if let Some(minlight) = options.minlight {
            world.minlight = minlight;
        }
        if let Some(dirt) = options.dirt {
            world.dirt = dirt;
        }
        if let Some(v) = options.dirt_mode {
            world.dirt_mode = v;
        }
        if let Some(v) = options.dirt_depth {
            world.dirt_depth = v;
        }
        if let Some(v) = options.dirt_scale {
            world.dirt_scale = v;
        }
        if let Some(v) = options.dirt_gain {
            world.dirt_gain = v;
        }
        if let Some(v) = options.dirt_angle {
            world.dirt_angle = v;
        }
        if let Some(v) = options.bounce {
            world.bounce = v;
        }

        let mut warnings = vec![];

        let luxel_scale = options
            .world_units_per_luxel
            .or_else(|| {
                worldspawn
                    .get("_lightmap_scale")
                    .and_then(|s| s.parse().ok())
            })
            .unwrap_or(DEFAULT_LIGHTMAP_SCALE);

        // Per-model shadow/phong/minlight behavior.
        let model_infos = model_infos(bsp);
        let face_models = face_model_table(bsp);

        let (lights, suns) = if options.no_lights {
            (vec![], lights::build_suns(&world, options))
        } else {
            let mut built = lights::build_lights(bsp, &world, &mut warnings);
            let surface = lights::build_surface_lights(bsp, &world, &built, &mut warnings);
            built.lights.extend(surface);
            (built.lights, lights::build_suns(&world, options))
        };

        // The scene borrows the bsp read-only for the whole parallel part;
        // the mutable patch-up happens after it drops.
        let (packed, faces_lit) = {
            let bvh = trace::Bvh::build(bsp, &model_infos, &face_models);
            let phong = phong::PhongNormals::build(bsp, &model_infos, &face_models);
            let dirt_ctx = dirt::DirtContext::new(&world);

            let scene = Scene {
                bsp,
                options,
                world,
                lights,
                suns,
                bvh,
                model_infos,
                face_models,
                phong,
                dirt: dirt_ctx,
                luxel_scale,
            };

            // Per-face luxel integration is embarrassingly parallel;
            // results come back in face order so packing is deterministic.
            let lightmapped: Vec<usize> = (0..bsp.faces.len())
                .filter(|&i| ltface::face_is_lightmapped(bsp, i))
                .collect();

            let mut face_lights: Vec<Option<ltface::FaceLight>> = lightmapped
                .par_iter()
                .map(|&face_index| Some(ltface::light_face(&scene, face_index)))
                .collect();

            // Bounce: each pass reads the previous pass's lit buffer.
            let bounce_passes = scene.world.bounce.max(0);
            for _pass in 0..bounce_passes {
                let bounce_lights =
                    bounce::collect_bounce_lights(&scene, &lightmapped, &face_lights);

                if bounce_lights.is_empty() {
                    break;
                }

                let bounced: Vec<Option<ltface::FaceLight>> = lightmapped
                    .par_iter()
                    .zip(face_lights.par_iter())
                    .map(|(&face_index, prior)| {
                        prior.as_ref().map(|prior| {
                            ltface::add_bounce(&scene, face_index, prior, &bounce_lights)
                        })
                    })
                    .collect();

                face_lights = bounced;
            }

            let packed = write::pack_lighting(&scene, &lightmapped, face_lights, &mut warnings)?;
            (packed, lightmapped.len())
        };

        let lightdata_bytes = packed.lump.len();
        let styles_used = packed.styles_used;
        let sidecars = write::apply_to_bsp(bsp, options, packed);

        let report = BakeReport {
            faces_lit,
            lightdata_bytes,
            styles_used,
            warnings,
        };

        Ok((report, sidecars))
    }
}

/// Model info per bsp model: worldspawn first, then by "model" "*N" keys.
fn model_infos(bsp: &Bsp) -> Vec<ModelInfo> {
    let mut out = vec![ModelInfo::default(); bsp.models.len()];

    if let Some(worldspawn) = bsp.entities.first() {
        if !out.is_empty() {
            out[0] = ModelInfo::from_entity(worldspawn);
            // The world always casts and receives shadows.
            out[0].shadow = true;
            out[0].shadow_self = true;
        }
    }

    for entity in &bsp.entities {
        let Some(model_key) = entity.get("model") else {
            continue;
        };
        let Some(index) = model_key
            .strip_prefix('*')
            .and_then(|n| n.parse::<usize>().ok())
        else {
            continue;
        };

        if index < out.len() {
            out[index] = ModelInfo::from_entity(entity);
        }
    }

    out
}

fn face_model_table(bsp: &Bsp) -> Vec<u32> {
    let mut out = vec![0u32; bsp.faces.len()];

    for (model_index, model) in bsp.models.iter().enumerate() {
        let start = model.first_face.max(0) as usize;
        let end = (model.first_face + model.face_count).max(0) as usize;

        for face in start..end.min(out.len()) {
            out[face] = model_index as u32;
        }
    }

    out
}

/// Walks a leaf's run-length-encoded PVS row; `true` when `to_leaf` is
/// visible (or no vis data exists, the usual case at light time).
pub(crate) fn leaf_pvs_visible(bsp: &Bsp, from_leaf: usize, to_leaf: usize) -> bool {
    if from_leaf == 0 || to_leaf == 0 || bsp.visibility.is_empty() {
        return true;
    }

    let offset = bsp.leaves[from_leaf].vis_offset;
    if offset < 0 {
        return true;
    }

    let target_byte = (to_leaf - 1) / 8;
    let target_bit = (to_leaf - 1) % 8;

    let mut decompressed = 0usize;
    let mut cursor = offset as usize;

    while decompressed <= target_byte && cursor < bsp.visibility.len() {
        let byte = bsp.visibility[cursor];
        cursor += 1;

        if byte == 0 {
            // A zero byte is followed by its repeat count.
            let run = bsp.visibility.get(cursor).copied().unwrap_or(1).max(1) as usize;
            cursor += 1;

            if (decompressed..decompressed + run).contains(&target_byte) {
                return false;
            }
            decompressed += run;
        } else {
            if decompressed == target_byte {
                return byte & (1 << target_bit) != 0;
            }
            decompressed += 1;
        }
    }

    true
}

/// World position of a face vertex by surfedge index.
pub(crate) fn face_vertex(bsp: &Bsp, face: &bsp::Face, index: usize) -> DVec3 {
    let surfedge = bsp.surf_edges[(face.first_edge as usize) + index];

    let vertex = if surfedge >= 0 {
        bsp.edges[surfedge as usize][0]
    } else {
        bsp.edges[(-surfedge) as usize][1]
    };

    let v = bsp.vertices[vertex as usize];
    DVec3::new(v.x as f64, v.y as f64, v.z as f64)
}

/// The face's plane with the side bit applied.
pub(crate) fn face_plane(bsp: &Bsp, face: &bsp::Face) -> (DVec3, f64) {
    let plane = &bsp.planes[face.plane as usize];
    let normal = DVec3::new(
        plane.normal.x as f64,
        plane.normal.y as f64,
        plane.normal.z as f64,
    );

    if face.side != 0 {
        (-normal, -(plane.distance as f64))
    } else {
        (normal, plane.distance as f64)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::modules::qbsp::{test_maps::room_map, Qbsp};

    fn room_bsp(map_text: &str) -> Bsp {
        let map = map::Map::from_text(map_text).unwrap();
        Qbsp::new().compile(&map).unwrap().bsp
    }

    #[test]
    fn bake_is_deterministic() {
        let mut first = room_bsp(&room_map(""));
        let mut second = first.clone();

        Light::new().bake(&mut first).unwrap();
        Light::new().bake(&mut second).unwrap();

        assert!(!first.lighting.is_empty());
        assert_eq!(
            first.write_to_bytes().unwrap(),
            second.write_to_bytes().unwrap()
        );
    }

    #[test]
    fn lightmapped_faces_get_offsets_and_style0() {
        let mut bsp = room_bsp(&room_map(""));
        let (report, _) = Light::new().bake(&mut bsp).unwrap();

        assert!(report.faces_lit > 0);
        assert_eq!(report.lightdata_bytes, bsp.lighting.len());

        for (index, face) in bsp.faces.iter().enumerate() {
            if ltface::face_is_lightmapped(&bsp, index) {
                assert!(face.lightmap_offset >= 0);
                assert_eq!(face.styles[0], 0);
            }
        }
    }

    #[test]
    fn inverse_square_light_level_matches_formula() {
        // One light 128 above the floor, inverse-square falloff: the luxel
        // right underneath sees 200 * (128/127)^2 (the sample sits one
        // unit off the surface), halved by the default range scale.
        let text = room_map("").replace(
            "\"light\" \"300\"",
            "\"light\" \"200\"\n\"delay\" \"2\"\n\"wait\" \"1\"",
        );

        let mut bsp = room_bsp(&text);
        Light::new().bake(&mut bsp).unwrap();

        let max = bsp.lighting.iter().copied().max().unwrap();
        assert!(
            (100..=104).contains(&max),
            "expected the peak luxel near 102, got {}",
            max
        );
    }

    #[test]
    fn minlight_clamp_floors_every_luxel() {
        let mut bsp = room_bsp(&room_map(""));

        let mut light = Light::new();
        light.minlight(100.).no_lights();
        light.bake(&mut bsp).unwrap();

        assert!(!bsp.lighting.is_empty());
        assert!(
            bsp.lighting.iter().all(|&b| b == 50),
            "minlight 100 at range 0.5 stores 50 everywhere"
        );
    }

    #[test]
    fn lit_sidecar_parallels_the_lump() {
        let mut bsp = room_bsp(&room_map(""));

        let mut light = Light::new();
        light.lit().lux();
        let (_, sidecars) = light.bake(&mut bsp).unwrap();

        let rgb = sidecars.lit.expect(".lit requested");
        assert_eq!(rgb.len(), bsp.lighting.len() * 3);

        let lux = sidecars.lux.expect(".lux requested");
        assert_eq!(lux.len(), bsp.lighting.len() * 3);
    }

    #[test]
    fn bspx_rgb_lump_written() {
        let mut bsp = room_bsp(&room_map(""));

        let mut light = Light::new();
        light.bspx();
        light.bake(&mut bsp).unwrap();

        let lump = bsp.bspx_lump("RGBLIGHTING").expect("RGBLIGHTING lump");
        assert_eq!(lump.len(), bsp.lighting.len() * 3);
    }

    #[test]
    fn switchable_light_adds_a_style_layer() {
        let extra = "\
{\n\"classname\" \"light\"\n\"origin\" \"64 64 0\"\n\"light\" \"200\"\n\"targetname\" \"cellar\"\n}\n";

        let mut bsp = room_bsp(&room_map(extra));
        Light::new().bake(&mut bsp).unwrap();

        let styled = bsp
            .faces
            .iter()
            .any(|face| face.styles.contains(&bsp::FIRST_SWITCHABLE_STYLE));
        assert!(styled, "some face should carry style 32");
    }
}
