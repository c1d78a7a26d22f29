//! Image decoders
//!
//! Loads 16-bit RGB pixel grids from TIFF and linear DNG files, plus the
//! EXIF exposure triple and (for DNGs) the color-calibration tags the
//! developer needs. Camera-raw CFA DNGs are not supported; demosaic them
//! to linear DNG or 16-bit TIFF first.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::color::gray_u16;
use crate::exposure::{ExposureValue, Rational};
use crate::math::{catmull_rom_kernel, Mat3, Rect, Vec3};

/// DNG tag numbers the TIFF/EXIF containers file under plain TIFF IFD0
const TAG_AS_SHOT_NEUTRAL: u16 = 0xC628;
const TAG_FORWARD_MATRIX_1: u16 = 0xC714;
const TAG_FORWARD_MATRIX_2: u16 = 0xC715;

/// Decoded 16-bit RGB image data, row-major interleaved
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u16>,
}

impl DecodedImage {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * 3],
        }
    }

    pub fn bounds(&self) -> Rect {
        Rect::from_size(self.width as i64, self.height as i64)
    }

    /// Pixel at integer coordinates; black outside the image
    #[inline]
    pub fn rgb_at(&self, x: i64, y: i64) -> [u16; 3] {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return [0, 0, 0];
        }
        let i = (y as usize * self.width as usize + x as usize) * 3;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }

    #[inline]
    pub fn set_rgb(&mut self, x: i64, y: i64, rgb: [u16; 3]) {
        let i = (y as usize * self.width as usize + x as usize) * 3;
        self.data[i] = rgb[0];
        self.data[i + 1] = rgb[1];
        self.data[i + 2] = rgb[2];
    }

    /// Gray value at integer coordinates, [0, 0xFFFF]
    #[inline]
    pub fn gray_at(&self, x: i64, y: i64) -> u16 {
        gray_u16(self.rgb_at(x, y))
    }

    /// Catmull-Rom sample at fractional coordinates, per channel in
    /// [0, 65535]. Taps outside the image read as black, which is the
    /// right answer for sky beyond the frame edge.
    pub fn sample_catmull_rom(&self, x: f64, y: f64) -> [f64; 3] {
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;
        let x0 = x0 as i64;
        let y0 = y0 as i64;

        let wx = [
            catmull_rom_kernel(fx + 1.0),
            catmull_rom_kernel(fx),
            catmull_rom_kernel(fx - 1.0),
            catmull_rom_kernel(fx - 2.0),
        ];
        let wy = [
            catmull_rom_kernel(fy + 1.0),
            catmull_rom_kernel(fy),
            catmull_rom_kernel(fy - 1.0),
            catmull_rom_kernel(fy - 2.0),
        ];

        let mut out = [0.0f64; 3];
        for (j, &wyj) in wy.iter().enumerate() {
            let py = y0 - 1 + j as i64;
            for (i, &wxi) in wx.iter().enumerate() {
                let px = x0 - 1 + i as i64;
                let rgb = self.rgb_at(px, py);
                let w = wxi * wyj;
                out[0] += rgb[0] as f64 * w;
                out[1] += rgb[1] as f64 * w;
                out[2] += rgb[2] as f64 * w;
            }
        }

        // The spline can overshoot near hard edges
        [
            out[0].clamp(0.0, 65535.0),
            out[1].clamp(0.0, 65535.0),
            out[2].clamp(0.0, 65535.0),
        ]
    }
}

/// Everything extracted from one input file
#[derive(Debug, Clone)]
pub struct LoadedFrame {
    /// Base filename, used for log lines and alignment cache keys
    pub filename: String,

    pub image: DecodedImage,
    pub exposure: ExposureValue,

    /// DNG AsShotNeutral, when present
    pub camera_white: Option<Vec3>,

    /// DNG ForwardMatrix (D65 preferred), when present
    pub forward_matrix: Option<Mat3>,
}

/// Load a layer from a TIFF or DNG file
pub fn load_frame<P: AsRef<Path>>(path: P) -> Result<LoadedFrame, String> {
    let path = path.as_ref();
    let filename = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unnamed")
        .to_string();

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .ok_or_else(|| format!("{}: no file extension", path.display()))?;

    let is_dng = match extension.as_str() {
        "tif" | "tiff" => false,
        "dng" => true,
        _ => return Err(format!("{}: unsupported format '{}'", path.display(), extension)),
    };

    let image = decode_tiff_pixels(path)?;
    let metadata = read_metadata(path, is_dng)?;

    let mut exposure = metadata.exposure;
    exposure
        .validate()
        .map_err(|e| format!("{}: invalid EV: {}", path.display(), e))?;

    Ok(LoadedFrame {
        filename,
        image,
        exposure,
        camera_white: metadata.camera_white,
        forward_matrix: metadata.forward_matrix,
    })
}

/// Read the 16-bit RGB pixel grid via the TIFF container (linear DNGs
/// share the container format)
fn decode_tiff_pixels(path: &Path) -> Result<DecodedImage, String> {
    use tiff::decoder::{Decoder, DecodingResult, Limits};

    let file =
        File::open(path).map_err(|e| format!("{}: open failed: {}", path.display(), e))?;

    // Big sensors produce big frames; raise the decode limits well above
    // the defaults
    let mut limits = Limits::default();
    limits.decoding_buffer_size = 1024 * 1024 * 1024;
    limits.ifd_value_size = 1024 * 1024 * 1024;
    limits.intermediate_buffer_size = 1024 * 1024 * 1024;

    let mut decoder = Decoder::new(BufReader::new(file))
        .map_err(|e| format!("{}: not a TIFF container: {}", path.display(), e))?
        .with_limits(limits);

    let (width, height) = decoder
        .dimensions()
        .map_err(|e| format!("{}: no dimensions: {}", path.display(), e))?;

    let color_type = decoder
        .colortype()
        .map_err(|e| format!("{}: no color type: {}", path.display(), e))?;

    let channels = match color_type {
        tiff::ColorType::RGB(_) => 3usize,
        tiff::ColorType::RGBA(_) => 4,
        other => {
            return Err(format!(
                "{}: color type {:?} not supported; need RGB (demosaiced) data",
                path.display(),
                other
            ))
        }
    };

    let result = decoder
        .read_image()
        .map_err(|e| format!("{}: pixel read failed: {}", path.display(), e))?;

    let raw: Vec<u16> = match result {
        DecodingResult::U16(buf) => buf,
        // Widen 8-bit data so the rest of the pipeline only sees 16-bit
        DecodingResult::U8(buf) => buf.iter().map(|&v| (v as u16) << 8 | v as u16).collect(),
        _ => {
            return Err(format!(
                "{}: sample format not supported; need 8- or 16-bit integer data",
                path.display()
            ))
        }
    };

    let expected = width as usize * height as usize * channels;
    if raw.len() != expected {
        return Err(format!(
            "{}: buffer size mismatch: expected {}, got {}",
            path.display(),
            expected,
            raw.len()
        ));
    }

    let data = if channels == 3 {
        raw
    } else {
        // Drop the alpha channel
        let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
        for px in raw.chunks_exact(4) {
            rgb.extend_from_slice(&px[..3]);
        }
        rgb
    };

    Ok(DecodedImage {
        width,
        height,
        data,
    })
}

struct FrameMetadata {
    exposure: ExposureValue,
    camera_white: Option<Vec3>,
    forward_matrix: Option<Mat3>,
}

/// Pull the exposure triple (and DNG color tags, when asked) out of the
/// file's EXIF/TIFF metadata
fn read_metadata(path: &Path, want_dng_color: bool) -> Result<FrameMetadata, String> {
    let file =
        File::open(path).map_err(|e| format!("{}: open failed: {}", path.display(), e))?;
    let mut reader = BufReader::new(&file);
    let exif = exif::Reader::new()
        .read_from_container(&mut reader)
        .map_err(|e| format!("{}: EXIF parsing failed: {}", path.display(), e))?;

    let iso = exif
        .get_field(exif::Tag::PhotographicSensitivity, exif::In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .ok_or_else(|| format!("{}: EXIF ISOSpeedRatings missing", path.display()))?
        as i64;

    let fnumber = rational_field(&exif, exif::Tag::FNumber)
        .ok_or_else(|| format!("{}: EXIF FNumber missing", path.display()))?;
    let aperture_x10 = fnumber_to_x10(fnumber.0, fnumber.1)
        .map_err(|e| format!("{}: {}", path.display(), e))?;

    let shutter = rational_field(&exif, exif::Tag::ExposureTime)
        .ok_or_else(|| format!("{}: EXIF ExposureTime missing", path.display()))?;

    // Note: ExposureBiasValue is informational only; the triple fully
    // defines how much light exposes a pixel.
    let exposure = ExposureValue::new(iso, aperture_x10, Rational(shutter.0, shutter.1));

    let (camera_white, forward_matrix) = if want_dng_color {
        (as_shot_neutral(&exif), dng_forward_matrix(&exif))
    } else {
        (None, None)
    };

    Ok(FrameMetadata {
        exposure,
        camera_white,
        forward_matrix,
    })
}

fn rational_field(exif: &exif::Exif, tag: exif::Tag) -> Option<(i64, i64)> {
    match exif.get_field(tag, exif::In::PRIMARY)?.value {
        exif::Value::Rational(ref v) if !v.is_empty() => {
            Some((v[0].num as i64, v[0].denom as i64))
        }
        _ => None,
    }
}

/// EXIF FNumber denominators seen in the wild: 56/10, 28/5, 8/1
fn fnumber_to_x10(num: i64, denom: i64) -> Result<i64, String> {
    match denom {
        10 => Ok(num),
        5 => Ok(num * 2),
        1 => Ok(num * 10),
        _ => Err(format!("EXIF FNumber denominator unhandled: {}/{}", num, denom)),
    }
}

fn as_shot_neutral(exif: &exif::Exif) -> Option<Vec3> {
    let field = exif.get_field(
        exif::Tag(exif::Context::Tiff, TAG_AS_SHOT_NEUTRAL),
        exif::In::PRIMARY,
    )?;
    match field.value {
        exif::Value::Rational(ref v) if v.len() >= 3 => Some([
            v[0].to_f64(),
            v[1].to_f64(),
            v[2].to_f64(),
        ]),
        _ => None,
    }
}

/// ForwardMatrix2 is normally calibrated against D65, which is the one
/// the sRGB conversion wants; fall back to ForwardMatrix1.
fn dng_forward_matrix(exif: &exif::Exif) -> Option<Mat3> {
    for tag in [TAG_FORWARD_MATRIX_2, TAG_FORWARD_MATRIX_1] {
        if let Some(field) =
            exif.get_field(exif::Tag(exif::Context::Tiff, tag), exif::In::PRIMARY)
        {
            if let exif::Value::SRational(ref v) = field.value {
                if v.len() >= 9 {
                    let mut m = [0.0; 9];
                    for (i, r) in v.iter().take(9).enumerate() {
                        m[i] = r.to_f64();
                    }
                    return Some(m);
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_image(width: u32, height: u32) -> DecodedImage {
        let mut img = DecodedImage::new(width, height);
        for y in 0..height as i64 {
            for x in 0..width as i64 {
                let v = (x * 1000) as u16;
                img.set_rgb(x, y, [v, v / 2, v / 4]);
            }
        }
        img
    }

    #[test]
    fn test_rgb_at_out_of_bounds_is_black() {
        let img = gradient_image(4, 4);
        assert_eq!(img.rgb_at(-1, 0), [0, 0, 0]);
        assert_eq!(img.rgb_at(0, 4), [0, 0, 0]);
        assert_eq!(img.rgb_at(99, 99), [0, 0, 0]);
    }

    #[test]
    fn test_catmull_rom_at_integer_coords_is_exact() {
        // An interpolating spline must reproduce the samples themselves
        let img = gradient_image(8, 8);
        for (x, y) in [(2, 2), (3, 5), (5, 3)] {
            let sampled = img.sample_catmull_rom(x as f64, y as f64);
            let exact = img.rgb_at(x, y);
            for c in 0..3 {
                assert!(
                    (sampled[c] - exact[c] as f64).abs() < 1e-6,
                    "({}, {}) channel {}: {} vs {}",
                    x,
                    y,
                    c,
                    sampled[c],
                    exact[c]
                );
            }
        }
    }

    #[test]
    fn test_catmull_rom_linear_ramp_midpoint() {
        // On a linear ramp the spline interpolates linearly
        let img = gradient_image(8, 8);
        let mid = img.sample_catmull_rom(3.5, 4.0);
        assert!((mid[0] - 3500.0).abs() < 1e-6, "got {}", mid[0]);
    }

    #[test]
    fn test_fnumber_denominators() {
        assert_eq!(fnumber_to_x10(56, 10).unwrap(), 56);
        assert_eq!(fnumber_to_x10(28, 5).unwrap(), 56);
        assert_eq!(fnumber_to_x10(8, 1).unwrap(), 80);
        assert!(fnumber_to_x10(4970854, 1000000).is_err());
    }

    #[test]
    fn test_unsupported_extension() {
        let err = load_frame("photo.jpg").unwrap_err();
        assert!(err.contains("unsupported format"), "{}", err);
    }
}
