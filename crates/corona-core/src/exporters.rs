//! Image exporters
//!
//! Writes the final 16-bit PNGs, the Radiance HDR artifact holding the
//! developed floating-point pixels, and the 8-bit debug overlays.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use crate::math::Vec3;

/// Write LDR pixels ([0, 1] per channel) as a 16-bit RGB PNG
pub fn write_png16<P: AsRef<Path>>(
    path: P,
    width: u32,
    height: u32,
    pixels: &[Vec3],
) -> Result<(), String> {
    let path = path.as_ref();
    if pixels.len() != (width * height) as usize {
        return Err(format!(
            "PNG export size mismatch: {}x{} vs {} pixels",
            width,
            height,
            pixels.len()
        ));
    }

    // Quantize to big-endian u16 bytes
    let mut bytes = Vec::with_capacity(pixels.len() * 6);
    for px in pixels {
        for &c in px {
            let q = (c.clamp(0.0, 1.0) * 65535.0).round() as u16;
            bytes.extend_from_slice(&q.to_be_bytes());
        }
    }

    let file =
        File::create(path).map_err(|e| format!("{}: create failed: {}", path.display(), e))?;
    let writer = BufWriter::new(file);

    let mut encoder = png::Encoder::new(writer, width, height);
    encoder.set_color(png::ColorType::Rgb);
    encoder.set_depth(png::BitDepth::Sixteen);

    let mut png_writer = encoder
        .write_header()
        .map_err(|e| format!("{}: PNG header failed: {}", path.display(), e))?;
    png_writer
        .write_image_data(&bytes)
        .map_err(|e| format!("{}: PNG write failed: {}", path.display(), e))?;

    Ok(())
}

/// Write an 8-bit RGB PNG (debug overlays)
pub fn write_png8_rgb<P: AsRef<Path>>(
    path: P,
    width: u32,
    height: u32,
    rgb: &[u8],
) -> Result<(), String> {
    let path = path.as_ref();
    if rgb.len() != (width * height * 3) as usize {
        return Err(format!(
            "PNG export size mismatch: {}x{} vs {} bytes",
            width,
            height,
            rgb.len()
        ));
    }

    let file =
        File::create(path).map_err(|e| format!("{}: create failed: {}", path.display(), e))?;
    let writer = BufWriter::new(file);

    let mut encoder = png::Encoder::new(writer, width, height);
    encoder.set_color(png::ColorType::Rgb);
    encoder.set_depth(png::BitDepth::Eight);

    let mut png_writer = encoder
        .write_header()
        .map_err(|e| format!("{}: PNG header failed: {}", path.display(), e))?;
    png_writer
        .write_image_data(rgb)
        .map_err(|e| format!("{}: PNG write failed: {}", path.display(), e))?;

    Ok(())
}

/// Write the developed (pre-tone-map) HDR pixels as a Radiance RGBE
/// file. Loads into Photoshop and the usual HDR tools.
pub fn write_hdr<P: AsRef<Path>>(
    path: P,
    width: u32,
    height: u32,
    pixels: &[Vec3],
) -> Result<(), String> {
    use image::codecs::hdr::HdrEncoder;
    use image::Rgb;

    let path = path.as_ref();
    if pixels.len() != (width * height) as usize {
        return Err(format!(
            "HDR export size mismatch: {}x{} vs {} pixels",
            width,
            height,
            pixels.len()
        ));
    }

    let data: Vec<Rgb<f32>> = pixels
        .iter()
        .map(|px| Rgb([px[0] as f32, px[1] as f32, px[2] as f32]))
        .collect();

    let file =
        File::create(path).map_err(|e| format!("{}: create failed: {}", path.display(), e))?;
    let writer = BufWriter::new(file);

    HdrEncoder::new(writer)
        .encode(&data, width as usize, height as usize)
        .map_err(|e| format!("{}: RGBE encode failed: {}", path.display(), e))?;

    Ok(())
}
