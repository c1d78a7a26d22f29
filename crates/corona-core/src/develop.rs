//! Color development
//!
//! Turns the fused camera-native HDR pixel into an output-referred RGB
//! value, ahead of tone mapping. The real policy is `Dng`; the others
//! exist for setups without color metadata and for debugging.

use crate::color::{apply_as_shot_neutral, xyz_to_srgb, CameraNative};
use crate::config::Developer;
use crate::math::{mat3_apply, vec3_floor_at, Mat3, Vec3};

/// Develop one fused pixel. `layer_number` feeds the by-layer debug
/// developer.
pub fn develop_pixel(
    developer: Developer,
    fused: &CameraNative,
    layer_number: usize,
    camera_white: &Vec3,
    camera_to_pcs: &Mat3,
) -> Vec3 {
    match developer {
        Developer::Dng => develop_dng(fused, camera_to_pcs),
        Developer::WhiteBalanceOnly => apply_as_shot_neutral(fused.rgb, *camera_white),
        Developer::None => fused.rgb,
        Developer::ByLayer => develop_by_layer(fused, layer_number, camera_white),
    }
}

/// The DNG spec's development: camera native -> XYZ(D50) via the
/// camera-to-PCS matrix, then down to linear sRGB(D65).
///
/// Eclipse shots are full of near-black pixels, which these transforms
/// can leave slightly negative; left alone they'd wrap around into
/// really bright pixels at quantization, so floor them here.
fn develop_dng(fused: &CameraNative, camera_to_pcs: &Mat3) -> Vec3 {
    let xyz_d50 = mat3_apply(camera_to_pcs, fused.rgb);
    let srgb = xyz_to_srgb(xyz_d50);
    vec3_floor_at(srgb, 0.0)
}

/// Debug: white balance, then color-key by which layer the fuser chose
fn develop_by_layer(fused: &CameraNative, layer_number: usize, camera_white: &Vec3) -> Vec3 {
    let [mut r, mut g, mut b] = apply_as_shot_neutral(fused.rgb, *camera_white);

    match layer_number {
        0 => {
            g = 0.0;
            b = 0.0;
        }
        1 => {
            r = 0.0;
            b = 0.0;
        }
        2 => {
            r = 0.0;
            g = 0.0;
        }
        3 => b = 0.0,
        4 => g = 0.0,
        5 => r = 0.0,
        _ => {}
    }

    [r, g, b]
}
