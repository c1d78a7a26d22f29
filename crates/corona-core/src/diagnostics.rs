//! Diagnostic dumps
//!
//! In verbose mode every interesting intermediate grid gets written out
//! as a grayscale PNG, filename prefixed by its stage number, so a bad
//! render can be walked back to the stage that broke.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use crate::color::gamma_expand;
use crate::math::FloatGrid;

/// Write a grid as a normalized grayscale PNG. The value range is
/// stretched to full scale and gamma-encoded so the mid-tones are
/// actually visible.
pub fn dump_grid<P: AsRef<Path>>(grid: &FloatGrid, path: P) -> Result<(), String> {
    let path = path.as_ref();
    let (min, max) = grid.min_max();
    let range = max - min;

    let mut bytes = Vec::with_capacity(grid.width() * grid.height() * 2);
    for y in 0..grid.height() {
        for x in 0..grid.width() {
            let normalized = if range > 0.0 {
                (grid.get(x, y) - min) / range
            } else {
                0.0
            };
            let gray = (gamma_expand(normalized) * 65535.0).round() as u16;
            bytes.extend_from_slice(&gray.to_be_bytes());
        }
    }

    let file =
        File::create(path).map_err(|e| format!("{}: create failed: {}", path.display(), e))?;
    let writer = BufWriter::new(file);

    let mut encoder = png::Encoder::new(writer, grid.width() as u32, grid.height() as u32);
    encoder.set_color(png::ColorType::Grayscale);
    encoder.set_depth(png::BitDepth::Sixteen);

    let mut png_writer = encoder
        .write_header()
        .map_err(|e| format!("{}: PNG header failed: {}", path.display(), e))?;
    png_writer
        .write_image_data(&bytes)
        .map_err(|e| format!("{}: PNG write failed: {}", path.display(), e))?;

    Ok(())
}

/// Min / max / mean of a pixel buffer channel-wise, for stage logging
pub fn buffer_stats(pixels: &[[f64; 3]]) -> (f64, f64, f64) {
    if pixels.is_empty() {
        return (0.0, 0.0, 0.0);
    }

    let mut min = f64::MAX;
    let mut max = f64::MIN;
    let mut sum = 0.0;

    for px in pixels {
        for &c in px {
            min = min.min(c);
            max = max.max(c);
            sum += c;
        }
    }

    (min, max, sum / (pixels.len() * 3) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_dump_grid_writes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("grid.png");

        let mut grid = FloatGrid::new(16, 8);
        for y in 0..8 {
            for x in 0..16 {
                grid.set(x, y, (x + y) as f64);
            }
        }
        dump_grid(&grid, &path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_dump_flat_grid_does_not_divide_by_zero() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flat.png");
        let grid = FloatGrid::new(4, 4);
        dump_grid(&grid, &path).unwrap();
    }

    #[test]
    fn test_buffer_stats() {
        let pixels = [[0.0, 0.5, 1.0], [0.25, 0.25, 0.25]];
        let (min, max, mean) = buffer_stats(&pixels);
        assert!(min.abs() < 1e-12);
        assert!((max - 1.0).abs() < 1e-12);
        assert!((mean - 2.25 / 6.0).abs() < 1e-12);
    }
}
