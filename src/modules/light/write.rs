//! Final packing: per-face style selection, soft filtering, occluded-luxel
//! healing, gamma and range, and the paletted / RGB / HDR encodings with
//! their BSPX lumps and sidecars.

use glam::DVec3;

use bsp::{lit::LitFaceInfo, Bsp};

use byte_writer::ByteWriter;

use super::{
    ltface::{FaceLight, LightSample},
    LightOptions, Scene,
};

pub struct Sidecars {
    pub lit: Option<Vec<u8>>,
    pub lit2: Option<(Vec<LitFaceInfo>, Vec<u8>, Vec<u8>)>,
    pub lit_hdr: Option<Vec<u32>>,
    pub lux: Option<Vec<u8>>,
}

pub struct FacePatch {
    pub face: usize,
    pub lightofs: i32,
    pub styles: [u8; 4],
    pub styles16: [u16; 16],
    pub extents: [u16; 2],
    pub lmshift: u8,
    pub lm_size: [u16; 2],
    pub world_to_lm: [[f32; 4]; 2],
}

pub struct PackedLighting {
    /// The native lighting lump: greyscale for Quake, RGB for GoldSrc/Q2.
    pub lump: Vec<u8>,
    pub patches: Vec<FacePatch>,
    pub rgb: Vec<u8>,
    pub directions: Vec<u8>,
    pub hdr: Vec<u32>,
    pub styles_used: usize,
}

/// Average unoccluded neighbors into occluded luxels so seams stay sane.
fn heal_occluded(samples: &mut [LightSample], occluded: &[bool], width: usize, height: usize) {
    let healed: Vec<Option<LightSample>> = (0..samples.len())
        .map(|index| {
            if !occluded[index] {
                return None;
            }

            let x = (index % width) as i32;
            let y = (index / width) as i32;

            let mut sum = LightSample::default();
            let mut count = 0.;

            for dy in -1..=1i32 {
                for dx in -1..=1i32 {
                    let nx = x + dx;
                    let ny = y + dy;

                    if nx < 0 || ny < 0 || nx >= width as i32 || ny >= height as i32 {
                        continue;
                    }

                    let neighbor = (ny as usize) * width + nx as usize;
                    if occluded[neighbor] {
                        continue;
                    }

                    sum.light += samples[neighbor].light;
                    sum.color += samples[neighbor].color;
                    sum.direction += samples[neighbor].direction;
                    count += 1.;
                }
            }

            if count > 0. {
                sum.light /= count;
                sum.color /= count;
                sum.direction /= count;
            }

            Some(sum)
        })
        .collect();

    for (sample, healed) in samples.iter_mut().zip(healed) {
        if let Some(healed) = healed {
            *sample = healed;
        }
    }
}

/// Box filter with the given radius.
fn soft_filter(samples: &[LightSample], width: usize, height: usize, radius: u32) -> Vec<LightSample> {
    let r = radius as i32;

    (0..samples.len())
        .map(|index| {
            let x = (index % width) as i32;
            let y = (index / width) as i32;

            let mut sum = LightSample::default();
            let mut count = 0.;

            for dy in -r..=r {
                for dx in -r..=r {
                    let nx = x + dx;
                    let ny = y + dy;

                    if nx < 0 || ny < 0 || nx >= width as i32 || ny >= height as i32 {
                        continue;
                    }

                    let neighbor = &samples[(ny as usize) * width + nx as usize];
                    sum.light += neighbor.light;
                    sum.color += neighbor.color;
                    sum.direction += neighbor.direction;
                    count += 1.;
                }
            }

            LightSample {
                light: sum.light / count,
                color: sum.color / count,
                direction: sum.direction / count,
            }
        })
        .collect()
}

/// Range scale, gamma, and the hue-preserving clamp to `[0, 255]`.
fn postprocess(color: DVec3, options: &LightOptions) -> DVec3 {
    let mut rgb = color * options.range_scale;

    if options.gamma != 1. && options.gamma > 0. {
        rgb = DVec3::new(
            (rgb.x / 255.).max(0.).powf(1. / options.gamma) * 255.,
            (rgb.y / 255.).max(0.).powf(1. / options.gamma) * 255.,
            (rgb.z / 255.).max(0.).powf(1. / options.gamma) * 255.,
        );
    }

    let max = rgb.max_element();
    if max > 255. {
        rgb *= 255. / max;
    }

    rgb.max(DVec3::ZERO)
}

fn direction_bytes(direction: DVec3) -> [u8; 3] {
    let dir = direction.normalize_or_zero();

    [
        ((dir.x + 1.) * 128.).clamp(0., 255.) as u8,
        ((dir.y + 1.) * 128.).clamp(0., 255.) as u8,
        ((dir.z + 1.) * 128.).clamp(0., 255.) as u8,
    ]
}

/// Keeps the brightest `cap` style layers, style 0 always first.
fn cap_styles(face_light: &mut FaceLight, cap: usize, warnings: &mut Vec<String>) {
    if face_light.styles.len() <= cap {
        return;
    }

    let mut brightness: Vec<(usize, f64)> = face_light
        .styles
        .iter()
        .enumerate()
        .map(|(index, map)| {
            let avg = map.samples.iter().map(|s| s.light).sum::<f64>()
                / map.samples.len().max(1) as f64;
            (index, avg)
        })
        .collect();

    // Style 0 is pinned; the rest rank by average brightness.
    brightness.sort_by(|a, b| {
        let a_pinned = face_light.styles[a.0].style == 0;
        let b_pinned = face_light.styles[b.0].style == 0;
        b_pinned
            .cmp(&a_pinned)
            .then(b.1.total_cmp(&a.1))
    });

    let keep: Vec<usize> = brightness.iter().take(cap).map(|&(i, _)| i).collect();

    warnings.push(format!(
        "Face has {} light styles, dropping the dimmest {}",
        face_light.styles.len(),
        face_light.styles.len() - cap
    ));

    let mut index = 0;
    face_light.styles.retain(|_| {
        let kept = keep.contains(&index);
        index += 1;
        kept
    });
}

pub fn pack_lighting(
    scene: &Scene,
    lightmapped: &[usize],
    face_lights: Vec<Option<FaceLight>>,
    warnings: &mut Vec<String>,
) -> eyre::Result<PackedLighting> {
    let options = scene.options;
    let channels = scene.bsp.format.lighting_channels();
    let style_cap = if options.extended_styles {
        bsp::MAX_LIGHTMAPS_EXT
    } else {
        bsp::MAX_LIGHTMAPS
    };

    let mut lump = vec![];
    let mut rgb = vec![];
    let mut directions = vec![];
    let mut hdr = vec![];
    let mut patches = vec![];
    let mut styles_seen = std::collections::BTreeSet::new();

    for (&face_index, face_light) in lightmapped.iter().zip(face_lights) {
        let Some(mut face_light) = face_light else {
            continue;
        };

        cap_styles(&mut face_light, style_cap, warnings);

        // Luxel offsets count luxels, not bytes, so every encoding lines up.
        let luxel_offset = if channels == 1 {
            lump.len()
        } else {
            lump.len() / 3
        };

        let width = face_light.width;
        let height = face_light.height;

        let mut styles = [255u8; 4];
        let mut styles16 = [0xffffu16; 16];

        for (slot, style_map) in face_light.styles.iter_mut().enumerate() {
            if slot < 4 {
                styles[slot] = style_map.style;
            }
            if slot < 16 {
                styles16[slot] = style_map.style as u16;
            }
            styles_seen.insert(style_map.style);

            heal_occluded(&mut style_map.samples, &face_light.occluded, width, height);

            let samples = if options.soft > 0 {
                soft_filter(&style_map.samples, width, height, options.soft)
            } else {
                std::mem::take(&mut style_map.samples)
            };

            for sample in &samples {
                let out = postprocess(sample.color, options);

                if channels == 1 {
                    let luma = ((out.x + out.y + out.z) / 3.).round() as u8;
                    lump.push(luma);
                } else {
                    lump.push(out.x.round() as u8);
                    lump.push(out.y.round() as u8);
                    lump.push(out.z.round() as u8);
                }

                rgb.push(out.x.round() as u8);
                rgb.push(out.y.round() as u8);
                rgb.push(out.z.round() as u8);

                directions.extend(direction_bytes(sample.direction));

                // HDR keeps linear values before the 255 clamp.
                let linear = sample.color * options.range_scale;
                hdr.push(bsp::lit::pack_e5bgr9([
                    linear.x as f32,
                    linear.y as f32,
                    linear.z as f32,
                ]));
            }
        }

        let lightofs = if channels == 1 {
            luxel_offset as i32
        } else {
            (luxel_offset * 3) as i32
        };

        patches.push(FacePatch {
            face: face_index,
            lightofs,
            styles,
            styles16,
            extents: [
                face_light.extents[0].max(0) as u16,
                face_light.extents[1].max(0) as u16,
            ],
            lmshift: (face_light.scale.max(1.).log2().round() as u8).min(15),
            lm_size: [width as u16, height as u16],
            world_to_lm: face_light.world_to_lm,
        });
    }

    Ok(PackedLighting {
        lump,
        patches,
        rgb,
        directions,
        hdr,
        styles_used: styles_seen.len(),
    })
}

/// Stamps the packed data into the BSP and returns the sidecars to write.
pub fn apply_to_bsp(bsp: &mut Bsp, options: &LightOptions, packed: PackedLighting) -> Sidecars {
    // Reset every face first; unlit faces keep no stale offsets.
    for face in bsp.faces.iter_mut() {
        face.lightmap_offset = -1;
        face.styles = [255; 4];
    }

    for patch in &packed.patches {
        let face = &mut bsp.faces[patch.face];
        face.lightmap_offset = patch.lightofs;
        face.styles = patch.styles;
    }

    bsp.lighting = if options.no_vanilla && (options.write_bspx_rgb || options.hdr_bspx) {
        vec![0; packed.lump.len()]
    } else {
        packed.lump
    };

    if options.write_bspx_rgb && !bsp.format.is_quake2() {
        bsp.set_bspx_lump("RGBLIGHTING", packed.rgb.clone());

        if options.write_lux {
            bsp.set_bspx_lump("LIGHTINGDIR", packed.directions.clone());
        }
    }

    if options.hdr_bspx {
        let mut writer = ByteWriter::new();
        for &luxel in &packed.hdr {
            writer.append_u32(luxel);
        }
        bsp.set_bspx_lump("LIGHTING_E5BGR9", writer.data);
    }

    // Per-face lightmap scales, only when they differ from the default.
    let non_default_scale = packed.patches.iter().any(|p| p.lmshift != 4);
    if non_default_scale || options.world_units_per_luxel.is_some() {
        let mut shifts = vec![4u8; bsp.faces.len()];
        for patch in &packed.patches {
            shifts[patch.face] = patch.lmshift;
        }
        bsp.set_bspx_lump("LMSHIFT", shifts);

        let mut offsets = ByteWriter::new();
        for face in &bsp.faces {
            offsets.append_i32(face.lightmap_offset);
        }
        bsp.set_bspx_lump("LMOFFSET", offsets.data);

        let mut style_bytes = vec![];
        for face in &bsp.faces {
            style_bytes.extend_from_slice(&face.styles);
        }
        bsp.set_bspx_lump("LMSTYLE", style_bytes);
    }

    if options.extended_styles {
        let mut writer = ByteWriter::new();
        let mut table = vec![[0xffffu16; 16]; bsp.faces.len()];
        for patch in &packed.patches {
            table[patch.face] = patch.styles16;
        }
        for entry in table {
            writer.append_u16_slice(&entry);
        }
        bsp.set_bspx_lump("LMSTYLE16", writer.data);
    }

    // The decoupled lightmap frees engines from re-deriving the sampler.
    if options.world_units_per_luxel.is_some() {
        let mut writer = ByteWriter::new();
        let mut table: Vec<Option<&FacePatch>> = vec![None; bsp.faces.len()];
        for patch in &packed.patches {
            table[patch.face] = Some(patch);
        }

        for entry in table {
            match entry {
                Some(patch) => {
                    writer.append_u16(patch.lm_size[0]);
                    writer.append_u16(patch.lm_size[1]);
                    writer.append_i32(patch.lightofs);
                    for row in patch.world_to_lm {
                        writer.append_f32_slice(&row);
                    }
                }
                None => {
                    writer.append_u16(0);
                    writer.append_u16(0);
                    writer.append_i32(-1);
                    writer.append_f32_slice(&[0.; 8]);
                }
            }
        }

        bsp.set_bspx_lump("DECOUPLED_LM", writer.data);
    }

    let lit2 = options.write_lit2.then(|| {
        let faces: Vec<LitFaceInfo> = bsp
            .faces
            .iter()
            .enumerate()
            .map(|(index, face)| {
                let patch = packed.patches.iter().find(|p| p.face == index);
                LitFaceInfo {
                    light_offset: face.lightmap_offset,
                    styles: face.styles,
                    extent: patch.map(|p| p.extents).unwrap_or([0, 0]),
                    lmshift: patch.map(|p| p.lmshift).unwrap_or(4),
                }
            })
            .collect();

        (faces, packed.rgb.clone(), packed.directions.clone())
    });

    Sidecars {
        lit: (options.write_lit && !options.write_lit2 && !options.hdr_lit)
            .then(|| packed.rgb.clone()),
        lit2,
        lit_hdr: options.hdr_lit.then(|| packed.hdr.clone()),
        lux: options.write_lux.then(|| packed.directions.clone()),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn flat_samples(value: f64, count: usize) -> Vec<LightSample> {
        vec![
            LightSample {
                light: value,
                color: DVec3::splat(value),
                direction: DVec3::Z,
            };
            count
        ]
    }

    #[test]
    fn postprocess_clamps_preserving_hue() {
        let options = LightOptions {
            range_scale: 0.5,
            ..Default::default()
        };

        // 600,300,150 halves to 300,150,75; the clamp then scales every
        // channel by 255/300.
        let out = postprocess(DVec3::new(600., 300., 150.), &options);

        assert!((out.x - 255.).abs() < 1e-9);
        assert!((out.y - 127.5).abs() < 1e-9);
        assert!((out.z - 63.75).abs() < 1e-9);
    }

    #[test]
    fn gamma_brightens_midtones() {
        let options = LightOptions {
            range_scale: 0.5,
            gamma: 2.,
            ..Default::default()
        };

        let out = postprocess(DVec3::splat(128.), &options);
        // (64/255)^(1/2) * 255 ~ 127.7
        assert!((out.x - 127.74).abs() < 0.1);
    }

    #[test]
    fn heal_fills_occluded_from_neighbors() {
        let mut samples = flat_samples(100., 4);
        samples[3] = LightSample::default();
        let occluded = vec![false, false, false, true];

        heal_occluded(&mut samples, &occluded, 2, 2);

        assert!((samples[3].light - 100.).abs() < 1e-9);
        assert!((samples[3].color.x - 100.).abs() < 1e-9);
    }

    #[test]
    fn soft_filter_preserves_flat_fields() {
        let samples = flat_samples(77., 9);
        let blurred = soft_filter(&samples, 3, 3, 1);

        for sample in &blurred {
            assert!((sample.light - 77.).abs() < 1e-9);
        }
    }

    #[test]
    fn direction_encoding_is_centered() {
        assert_eq!(direction_bytes(DVec3::ZERO), [128, 128, 128]);
        assert_eq!(direction_bytes(DVec3::Z), [128, 128, 255]);
    }
}
