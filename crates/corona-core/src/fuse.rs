//! Per-pixel exposure fusion
//!
//! Each output pixel sees one camera-native sample per layer, sorted
//! ascending by EV (largest exposures first: most photons, least noise,
//! most likely to be blown out). The fuser picks or combines them into a
//! single HDR value.

use crate::color::{average_balanced, rec709_luminance, CameraNative};
use crate::config::Fuser;
use crate::math::Rect;

/// Over-exposure gate for the averaging fuser: a layer is dropped if any
/// channel recorded more than this
const AVERAGE_CHANNEL_MAX: f64 = 0.8;

/// Pie slices per layer for the sector fuser
const SECTORS_PER_LAYER: usize = 5;

/// The fused value plus which layer it came from (or, for the averaging
/// fuser, how many layers went in) for the by-layer debug developer.
#[derive(Debug, Clone, Copy)]
pub struct FusedPixel {
    pub fused: CameraNative,
    pub layer_number: usize,
}

/// Fuse one output pixel from its per-layer samples.
///
/// `inputs` must be in ascending-EV order. `pos` is the pixel's output
/// coordinate and `output_area` the full output rectangle (the sector
/// fuser slices angles about its center).
pub fn fuse_pixel(
    fuser: Fuser,
    inputs: &[CameraNative],
    pos: (i64, i64),
    output_area: Rect,
    fuser_luminance: f64,
) -> FusedPixel {
    match fuser {
        Fuser::MostExposed => fuse_most_exposed(inputs, fuser_luminance),
        Fuser::Sector => fuse_sector(inputs, pos, output_area),
        Fuser::Average => fuse_average(inputs),
    }
}

/// The default: walk the layers most-exposed first and take the first
/// that isn't over-exposed here. The last layer is taken regardless so
/// every pixel produces a value.
fn fuse_most_exposed(inputs: &[CameraNative], max_y: f64) -> FusedPixel {
    for (i, cn) in inputs.iter().enumerate() {
        if i < inputs.len() - 1 && rec709_luminance(cn.rgb) > max_y {
            continue;
        }
        return FusedPixel {
            fused: *cn,
            layer_number: i,
        };
    }
    unreachable!("fuse_pixel is never called with zero layers")
}

/// Cut the image into pie slices and pick a source layer by slice.
/// Useful for eyeballing how well the layers were aligned.
fn fuse_sector(inputs: &[CameraNative], pos: (i64, i64), output_area: Rect) -> FusedPixel {
    let (cx, cy) = output_area.center();
    let theta = ((pos.1 - cy) as f64).atan2((pos.0 - cx) as f64);
    let theta_deg = 180.0 + theta.to_degrees();

    let num_segments = inputs.len() * SECTORS_PER_LAYER;
    let segment_width = 360.0 / num_segments as f64;
    let segment = (theta_deg / segment_width) as usize;

    let layer_number = segment % inputs.len();
    FusedPixel {
        fused: inputs[layer_number],
        layer_number,
    }
}

/// Average the non-over-exposed layers. Produces visible color fringes
/// near each layer's boundary; kept as a diagnostic.
fn fuse_average(inputs: &[CameraNative]) -> FusedPixel {
    let mut to_avg: Vec<CameraNative> = Vec::with_capacity(inputs.len());

    for (i, cn) in inputs.iter().enumerate() {
        if i < inputs.len() - 1 {
            let [r, g, b] = cn.rgb;
            if r > AVERAGE_CHANNEL_MAX || g > AVERAGE_CHANNEL_MAX || b > AVERAGE_CHANNEL_MAX {
                continue;
            }
        }
        to_avg.push(*cn);
    }

    FusedPixel {
        fused: average_balanced(&to_avg),
        layer_number: to_avg.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cn(level: f64, illum: f64) -> CameraNative {
        CameraNative {
            rgb: [level, level, level],
            illum_at_max: illum,
        }
    }

    #[test]
    fn test_most_exposed_skips_blown_layer() {
        // Layer 0 (low EV, long exposure) is blown at this pixel; layer 1
        // is fine. The fuser moves on and records layer 1.
        let inputs = [cn(0.9, 40960.0), cn(0.3, 81920.0)];
        let out = fuse_pixel(
            Fuser::MostExposed,
            &inputs,
            (0, 0),
            Rect::from_size(10, 10),
            0.8,
        );
        assert_eq!(out.layer_number, 1);
        assert!((out.fused.rgb[0] - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_most_exposed_prefers_first_acceptable() {
        let inputs = [cn(0.5, 40960.0), cn(0.1, 81920.0)];
        let out = fuse_pixel(
            Fuser::MostExposed,
            &inputs,
            (0, 0),
            Rect::from_size(10, 10),
            0.8,
        );
        assert_eq!(out.layer_number, 0);
    }

    #[test]
    fn test_most_exposed_last_layer_rule() {
        // A single over-exposed layer is still selected: every pixel must
        // produce a value
        let inputs = [cn(0.95, 40960.0)];
        let out = fuse_pixel(
            Fuser::MostExposed,
            &inputs,
            (0, 0),
            Rect::from_size(10, 10),
            0.8,
        );
        assert_eq!(out.layer_number, 0);
        assert!((out.fused.rgb[0] - 0.95).abs() < 1e-12);
    }

    #[test]
    fn test_average_gates_blown_layers() {
        let inputs = [cn(0.9, 40960.0), cn(0.4, 40960.0), cn(0.2, 40960.0)];
        let out = fuse_pixel(
            Fuser::Average,
            &inputs,
            (0, 0),
            Rect::from_size(10, 10),
            0.8,
        );
        // Only the two clean layers average; equal illuminances so no
        // rescale is involved
        assert_eq!(out.layer_number, 2);
        assert!((out.fused.rgb[0] - 0.3).abs() < 1e-12, "{}", out.fused.rgb[0]);
    }

    #[test]
    fn test_sector_covers_all_layers() {
        let inputs = [cn(0.1, 40960.0), cn(0.2, 81920.0), cn(0.3, 163840.0)];
        let area = Rect::from_size(100, 100);

        let mut seen = [false; 3];
        for y in 0..100 {
            for x in 0..100 {
                let out = fuse_pixel(Fuser::Sector, &inputs, (x, y), area, 0.8);
                seen[out.layer_number] = true;
            }
        }
        assert!(seen.iter().all(|&s| s), "seen = {:?}", seen);
    }
}
