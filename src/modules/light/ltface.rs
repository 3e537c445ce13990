//! Per-face lighting: direct entity lights, suns and sky dome, dirt,
//! minlight, accumulated per luxel into per-style buffers.

use glam::DVec3;

use bsp::Bsp;

use super::{
    bounce::BounceLight,
    dirt,
    lights::{light_value, spot_factor, PreparedLight},
    sample::{self, LightSurface},
    Scene,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct LightSample {
    /// Scalar intensity; minlight compares against this.
    pub light: f64,
    pub color: DVec3,
    pub direction: DVec3,
}

#[derive(Debug, Clone)]
pub struct StyleMap {
    pub style: u8,
    pub samples: Vec<LightSample>,
}

/// The result of lighting one face, everything the packer needs.
#[derive(Debug, Clone)]
pub struct FaceLight {
    pub face_index: usize,
    pub width: usize,
    pub height: usize,
    pub tex_mins: [i32; 2],
    pub extents: [i32; 2],
    pub scale: f64,
    pub world_to_lm: [[f32; 4]; 2],
    pub occluded: Vec<bool>,
    pub points: Vec<DVec3>,
    pub normals: Vec<DVec3>,
    pub styles: Vec<StyleMap>,
}

impl FaceLight {
    fn style_map(&mut self, style: u8) -> &mut StyleMap {
        if let Some(index) = self.styles.iter().position(|m| m.style == style) {
            return &mut self.styles[index];
        }

        self.styles.push(StyleMap {
            style,
            samples: vec![LightSample::default(); self.width * self.height],
        });
        self.styles.last_mut().unwrap()
    }
}

pub fn face_is_lightmapped(bsp: &Bsp, face_index: usize) -> bool {
    let face = &bsp.faces[face_index];
    let ti = &bsp.texinfo[face.texinfo as usize];

    if bsp.format.is_quake2() {
        let unlit = bsp::Q2Surface::SKY.bits()
            | bsp::Q2Surface::WARP.bits()
            | bsp::Q2Surface::NODRAW.bits();
        return ti.flags & unlit == 0;
    }

    ti.flags & bsp::TexInfo::SPECIAL == 0
}

/// Cheapest possible upper bound for a light against a surface's bounds:
/// its value at the closest approach. Below the gate the light is culled.
fn light_reaches(scene: &Scene, light: &PreparedLight, surf: &LightSurface) -> bool {
    let mut bounds = crate::utils::simple_calculs::Aabb::new();
    for &p in &surf.points {
        bounds.add_point(p);
    }
    if !bounds.is_valid() {
        return false;
    }

    let closest = light.position.clamp(bounds.mins, bounds.maxs);
    let dist = (light.position - closest).length();

    light_value(&light.config, scene.world.dist, dist).abs() > scene.options.gate
}

fn accumulate_light(scene: &Scene, surf: &LightSurface, out: &mut FaceLight, light: &PreparedLight, occlusion: &[f64]) {
    let info = scene.model_info_for_face(surf.face_index);

    // Channel-gated surfaces never see this light.
    if light.config.channel_mask & info.channel_mask == 0 {
        return;
    }
    if !light_reaches(scene, light, surf) {
        return;
    }

    // PVS cull: skip lights whose leaf cannot see the surface's leaf.
    if scene.options.vis_approx == super::VisApprox::Vis && !scene.bsp.visibility.is_empty() {
        let head = scene.bsp.models[0].head_nodes[0];
        let as_f32 =
            |p: DVec3| glam::Vec3::new(p.x as f32, p.y as f32, p.z as f32);

        let light_leaf = scene.bsp.leaf_at(head, as_f32(light.position));
        let surf_leaf = scene.bsp.leaf_at(head, as_f32(surf.centroid));

        if !super::leaf_pvs_visible(scene.bsp, light_leaf, surf_leaf) {
            return;
        }
    }

    let model_index = scene.face_models[surf.face_index];
    let skip_model = if info.shadow_self {
        None
    } else {
        Some(model_index)
    };

    let anglescale = if light.config.anglescale >= 0. {
        light.config.anglescale
    } else {
        scene.world.anglescale
    };

    let curved = scene.phong.face_is_smoothed(surf.face_index);
    let subs = surf.subs_per_luxel();
    let style_map = out.style_map(light.style);

    for luxel in 0..surf.luxel_count() {
        if surf.occluded[luxel] {
            continue;
        }

        let normal = surf.normals[luxel];
        let mut total = LightSample::default();
        let mut lit_subs = 0u32;

        for sub in 0..subs {
            let point = surf.sub_points[luxel * subs + sub];
            if surf.sub_occluded[luxel * subs + sub] {
                continue;
            }

            let to_light = light.position - point;
            let dist = to_light.length().max(1e-6);
            let dir = to_light / dist;

            let cos_incidence = dir.dot(normal);
            if cos_incidence <= 0. && !light.config.bleed && !curved {
                lit_subs += 1;
                continue;
            }

            let angle_term = if light.config.bleed {
                1.
            } else {
                (1. - anglescale) + anglescale * cos_incidence.max(0.)
            };

            let mut value = light_value(&light.config, scene.world.dist, dist) * angle_term;
            value *= spot_factor(&light.config, -dir);

            let mut tint = DVec3::ONE;
            if let Some(projected) = &light.projected {
                tint = projected.sample(light.position, point);
                if tint == DVec3::ZERO {
                    lit_subs += 1;
                    continue;
                }
            }

            value *= scene.dirt.scale_factor(
                occlusion[luxel],
                light.config.dirt,
                info.dirt == -1,
            );

            if value.abs() <= scene.options.gate {
                lit_subs += 1;
                continue;
            }

            let occ = scene
                .bvh
                .occluded(point, light.position, light.config.shadow_channel_mask, skip_model);
            if !occ.visible {
                lit_subs += 1;
                continue;
            }
            tint *= occ.tint;

            total.light += value;
            total.color += light.config.color / 255. * value * tint;
            total.direction += dir * value.abs();
            lit_subs += 1;
        }

        if lit_subs > 0 {
            let scale = 1. / lit_subs as f64;
            let sample = &mut style_map.samples[luxel];
            sample.light += total.light * scale;
            sample.color += total.color * scale;
            sample.direction += total.direction * scale;
        }
    }
}

fn accumulate_suns(scene: &Scene, surf: &LightSurface, out: &mut FaceLight, occlusion: &[f64]) {
    let info = scene.model_info_for_face(surf.face_index);
    let curved = scene.phong.face_is_smoothed(surf.face_index);

    for sun in &scene.suns {
        if sun.light <= 0. {
            continue;
        }

        let toward_sun = -sun.direction;
        let style_map = out.style_map(sun.style);

        for luxel in 0..surf.luxel_count() {
            if surf.occluded[luxel] {
                continue;
            }

            let normal = surf.normals[luxel];
            let cos_incidence = toward_sun.dot(normal);
            if cos_incidence <= 0. && !curved {
                continue;
            }

            let point = surf.points[luxel];
            if !scene.bvh.sky_visible(point, toward_sun, u32::MAX) {
                continue;
            }

            let angle_term =
                (1. - sun.anglescale) + sun.anglescale * cos_incidence.max(0.);
            let mut value = sun.light * angle_term;

            if sun.dirt {
                value *= scene
                    .dirt
                    .scale_factor(occlusion[luxel], 0, info.dirt == -1);
            }

            if value <= scene.options.gate {
                continue;
            }

            let sample = &mut style_map.samples[luxel];
            sample.light += value;
            sample.color += sun.color / 255. * value;
            sample.direction += toward_sun * value;
        }
    }
}

fn apply_minlight(scene: &Scene, surf: &LightSurface, out: &mut FaceLight, occlusion: &[f64]) {
    let info = scene.model_info_for_face(surf.face_index);

    let minlight = scene.world.minlight.max(info.minlight);
    if minlight <= 0. {
        return;
    }

    let color = if info.minlight > scene.world.minlight {
        info.minlight_color
    } else {
        scene.world.minlight_color
    };

    let dirt_minlight = scene.world.minlight_dirt;
    let luxels = surf.luxel_count();
    let style_map = out.style_map(0);

    for luxel in 0..luxels {
        let mut value = minlight;

        if dirt_minlight {
            value *= scene
                .dirt
                .scale_factor(occlusion[luxel], 0, info.dirt == -1);
        }

        let sample = &mut style_map.samples[luxel];

        if scene.options.add_min {
            sample.light += value;
            sample.color += color / 255. * value;
        } else if sample.light < value {
            let missing = value - sample.light;
            sample.light = value;
            sample.color += color / 255. * missing;
        }
    }
}

/// Lights one face from scratch: direct lights, suns, minlight, debug
/// overlays. Bounce passes come later through [`add_bounce`].
pub fn light_face(scene: &Scene, face_index: usize) -> FaceLight {
    let surf = sample::build_surface(scene, face_index);
    let occlusion = dirt::surface_occlusion(scene, &surf.points, &surf.normals);

    let mut out = FaceLight {
        face_index,
        width: surf.width,
        height: surf.height,
        tex_mins: surf.tex_mins,
        extents: surf.extents,
        scale: surf.scale,
        world_to_lm: surf.world_to_lm(),
        occluded: surf.occluded.clone(),
        points: surf.points.clone(),
        normals: surf.normals.clone(),
        styles: vec![],
    };

    // Style 0 always exists; switchable styles appear as lights hit.
    out.style_map(0);

    if scene.options.phong_debug {
        let style_map = out.style_map(0);
        for (luxel, normal) in surf.normals.iter().enumerate() {
            style_map.samples[luxel].light = 255.;
            style_map.samples[luxel].color = (*normal + DVec3::ONE) * 128. / 255. * 255.;
        }
        return out;
    }

    if scene.options.dirt_debug {
        let style_map = out.style_map(0);
        for luxel in 0..surf.luxel_count() {
            let factor = scene.dirt.scale_factor(occlusion[luxel], 0, false);
            style_map.samples[luxel].light = factor * 255.;
            style_map.samples[luxel].color = DVec3::splat(factor * 255.);
        }
        return out;
    }

    for light in &scene.lights {
        accumulate_light(scene, &surf, &mut out, light, &occlusion);
    }

    accumulate_suns(scene, &surf, &mut out, &occlusion);
    apply_minlight(scene, &surf, &mut out, &occlusion);

    // Switchable layers that never got any light are dead weight.
    out.styles
        .retain(|m| m.style == 0 || m.samples.iter().any(|s| s.light > 0.));

    out
}

/// Adds one bounce pass's gathered light on top of a prior result.
pub fn add_bounce(
    scene: &Scene,
    face_index: usize,
    prior: &FaceLight,
    bounce_lights: &[BounceLight],
) -> FaceLight {
    let mut out = prior.clone();
    let info = scene.model_info_for_face(face_index);

    let model_index = scene.face_models[face_index];
    let skip_model = if info.shadow_self {
        None
    } else {
        Some(model_index)
    };

    let style_map = out.style_map(0);

    for bounce in bounce_lights {
        if bounce.source_face == face_index {
            continue;
        }

        for luxel in 0..prior.points.len() {
            if prior.occluded[luxel] {
                continue;
            }

            let point = prior.points[luxel];
            let normal = prior.normals[luxel];

            let to_light = bounce.position - point;
            let dist2 = to_light.length_squared();
            let dist = dist2.sqrt().max(1e-6);
            let dir = to_light / dist;

            let cos_incidence = dir.dot(normal);
            if cos_incidence <= 0. {
                continue;
            }

            // Area-scaled falloff, softened near the patch.
            let value = bounce.intensity * cos_incidence / (dist2 + 128. * 128.);
            if value <= scene.options.gate {
                continue;
            }

            let occ = scene.bvh.occluded(point, bounce.position, u32::MAX, skip_model);
            if !occ.visible {
                continue;
            }

            let sample = &mut style_map.samples[luxel];
            sample.light += value;
            sample.color += bounce.color * value * occ.tint;
            sample.direction += dir * value;
        }
    }

    out
}
