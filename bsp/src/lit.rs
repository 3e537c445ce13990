//! .lit / .lux sidecar files and the E5BGR9 shared-exponent HDR packing.
//!
//! A v1 .lit is the RGB mirror of the .bsp lighting lump. v2 adds a
//! per-face table plus dual data blocks (color then direction). The HDR
//! variant keeps the v1 layout with 32-bit E5BGR9 luxels.

use std::{io::Write, path::Path};

use byte_writer::ByteWriter;

use crate::{
    constants::{LIT_IDENT, LIT_VERSION, LIT_VERSION_E5BGR9, LIT_VERSION_V2},
    error::BspError,
};

/// Per-face record for the v2 .lit table.
#[derive(Debug, Clone, Copy, Default)]
pub struct LitFaceInfo {
    pub light_offset: i32,
    pub styles: [u8; 4],
    pub extent: [u16; 2],
    /// log2 of the lightmap scale in world units per luxel.
    pub lmshift: u8,
}

fn write_file(path: &Path, data: &[u8]) -> Result<(), BspError> {
    let io_err = |source| BspError::Io {
        source,
        path: path.to_path_buf(),
    };

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .map_err(io_err)?;
    file.write_all(data).map_err(io_err)?;
    file.flush().map_err(io_err)
}

pub fn write_lit_v1(path: impl AsRef<Path>, rgb: &[u8]) -> Result<(), BspError> {
    let mut writer = ByteWriter::new();
    writer.append_u8_slice(LIT_IDENT);
    writer.append_i32(LIT_VERSION);
    writer.append_u8_slice(rgb);

    write_file(path.as_ref(), &writer.data)
}

pub fn write_lit_v2(
    path: impl AsRef<Path>,
    faces: &[LitFaceInfo],
    rgb: &[u8],
    directions: &[u8],
) -> Result<(), BspError> {
    let mut writer = ByteWriter::new();
    writer.append_u8_slice(LIT_IDENT);
    writer.append_i32(LIT_VERSION_V2);
    writer.append_i32(faces.len() as i32);
    writer.append_i32((rgb.len() / 3) as i32);

    for face in faces {
        writer.append_i32(face.light_offset);
        writer.append_u8_slice(&face.styles);
        writer.append_u16(face.extent[0]);
        writer.append_u16(face.extent[1]);
        writer.append_u8(face.lmshift);
    }

    writer.append_u8_slice(rgb);
    writer.append_u8_slice(directions);

    write_file(path.as_ref(), &writer.data)
}

pub fn write_lit_hdr(path: impl AsRef<Path>, packed: &[u32]) -> Result<(), BspError> {
    let mut writer = ByteWriter::new();
    writer.append_u8_slice(LIT_IDENT);
    writer.append_i32(LIT_VERSION_E5BGR9);
    for &luxel in packed {
        writer.append_u32(luxel);
    }

    write_file(path.as_ref(), &writer.data)
}

/// Dominant light directions, `(dir + 1) * 128` per component.
pub fn write_lux(path: impl AsRef<Path>, directions: &[u8]) -> Result<(), BspError> {
    let mut writer = ByteWriter::new();
    writer.append_u8_slice(LIT_IDENT);
    writer.append_i32(LIT_VERSION);
    writer.append_u8_slice(directions);

    write_file(path.as_ref(), &writer.data)
}

/// Largest value representable in E5BGR9: mantissa 511, exponent 31.
pub const E5BGR9_MAX: f32 = 65408.;

/// Packs linear RGB into the 32-bit shared-exponent layout
/// `(e << 27) | (b << 18) | (g << 9) | r`, bias 15, 9 mantissa bits.
pub fn pack_e5bgr9(rgb: [f32; 3]) -> u32 {
    let clamp = |v: f32| {
        if v.is_nan() {
            0.
        } else {
            v.clamp(0., E5BGR9_MAX)
        }
    };

    let r = clamp(rgb[0]);
    let g = clamp(rgb[1]);
    let b = clamp(rgb[2]);

    let max = r.max(g).max(b);

    // floor(log2(max)) clamped so denormals still encode.
    let exp_base = if max > 0. {
        (max.log2().floor() as i32).max(-16)
    } else {
        -16
    };
    let mut exp_shared = exp_base + 1 + 15;
    let mut denom = 2f32.powi(exp_shared - 15 - 9);

    // Rounding can push the max mantissa to 512; bump the exponent once.
    if (max / denom).round() >= 512. {
        denom *= 2.;
        exp_shared += 1;
    }

    let mantissa = |v: f32| ((v / denom).round() as u32).min(511);

    ((exp_shared as u32) << 27) | (mantissa(b) << 18) | (mantissa(g) << 9) | mantissa(r)
}

pub fn unpack_e5bgr9(packed: u32) -> [f32; 3] {
    let exp = (packed >> 27) as i32;
    let scale = 2f32.powi(exp - 15 - 9);

    [
        (packed & 0x1ff) as f32 * scale,
        ((packed >> 9) & 0x1ff) as f32 * scale,
        ((packed >> 18) & 0x1ff) as f32 * scale,
    ]
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pack_exact() {
        let packed = pack_e5bgr9([511., 1., 0.]);
        let expected = (24 << 27) | (1 << 9) | 511;
        assert_eq!(packed, expected);

        let rgb = unpack_e5bgr9(packed);
        assert_eq!(rgb, [511., 1., 0.]);
    }

    #[test]
    fn pack_clamps_to_max() {
        let packed = pack_e5bgr9([1_000_000., 0., 0.]);
        let expected = (0x1f << 27) | 0x1ff;
        assert_eq!(packed, expected);

        let rgb = unpack_e5bgr9(packed);
        assert_eq!(rgb[0], 65408.);
    }

    #[test]
    fn pack_small_values() {
        let input = [0.1f32, 0.01, 0.001];
        let rgb = unpack_e5bgr9(pack_e5bgr9(input));

        assert!((rgb[0] - input[0]).abs() < 0.000098);
        assert!((rgb[1] - input[1]).abs() < 0.00001);
        assert!((rgb[2] - input[2]).abs() < 0.000025);
    }

    #[test]
    fn pack_zero() {
        assert_eq!(unpack_e5bgr9(pack_e5bgr9([0., 0., 0.])), [0., 0., 0.]);
    }
}
