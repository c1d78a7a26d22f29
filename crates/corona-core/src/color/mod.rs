//! Color model
//!
//! Camera-native RGB readings, exposure rescaling, DNG-style white
//! balance and forward-matrix development into the XYZ(D50) profile
//! connection space, and the fixed conversion down to linear sRGB(D65).

use crate::math::{mat3_apply, mat3_mul, vec3_invert_diag, Mat3, Vec3};


/// Translates XYZ(D50) to linear sRGB(D65).
///
/// This is Bruce Lindbloom's second XYZ->sRGB table; it bundles in the
/// Bradford chromatic adaptation needed to move from the D50 reference
/// white of the DNG PCS to sRGB's D65 without shifting the white
/// balance. (Most XYZ->sRGB matrices on the web ignore the change of
/// reference white, so come out looking wrong.)
pub const XYZ_D50_TO_LINEAR_SRGB_D65: Mat3 = [
    3.1338561, -1.6168667, -0.4906146,
    -0.9787684, 1.9161415, 0.0334540,
    0.0719453, -0.2289914, 1.4052427,
];

/// Relative luminance weights used to collapse RGB to a gray value
pub const GRAY_WEIGHTS: Vec3 = [0.2989, 0.5870, 0.1140];

/// A sensor reading plus the exposure it was taken at. It has not been
/// white balanced or color corrected, so it lives in an RGB basis
/// specific to the camera.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CameraNative {
    /// Channel values mapped from photosite counts [0, 0xFFFF] to [0, 1]
    pub rgb: Vec3,

    /// Illuminance (lux) needed to drive a photosite to 0xFFFF
    pub illum_at_max: f64,
}

impl CameraNative {
    /// Build from 16-bit integer channels
    pub fn from_u16(rgb: [u16; 3], illum_at_max: f64) -> Self {
        Self {
            rgb: [
                rgb[0] as f64 / 65535.0,
                rgb[1] as f64 / 65535.0,
                rgb[2] as f64 / 65535.0,
            ],
            illum_at_max,
        }
    }

    /// Rescale the channels so this reading is expressed against a new
    /// saturation illuminance. After two readings are rescaled to the
    /// same value they are directly comparable, whatever exposures they
    /// came from.
    pub fn rescale_to_illum(&mut self, new_illum_at_max: f64) {
        let scale = self.illum_at_max / new_illum_at_max;
        self.rgb[0] *= scale;
        self.rgb[1] *= scale;
        self.rgb[2] *= scale;
        self.illum_at_max = new_illum_at_max;
    }

    /// Develop into the XYZ(D50) profile connection space using a
    /// pre-baked camera-to-PCS matrix (see [`make_camera_to_pcs`]).
    pub fn to_pcs(&self, camera_to_pcs: &Mat3) -> Vec3 {
        mat3_apply(camera_to_pcs, self.rgb)
    }

    /// Luminance (the Y of XYZ) after development
    pub fn luminance(&self, camera_to_pcs: &Mat3) -> f64 {
        self.to_pcs(camera_to_pcs)[1]
    }
}

/// White balancing: divide each channel by the camera's neutral color.
/// The result is camera-neutral RGB, still in the camera's basis.
pub fn apply_as_shot_neutral(rgb: Vec3, as_shot_neutral: Vec3) -> Vec3 {
    [
        rgb[0] / as_shot_neutral[0],
        rgb[1] / as_shot_neutral[1],
        rgb[2] / as_shot_neutral[2],
    ]
}

/// The DNG ForwardMatrix maps camera-neutral RGB to XYZ(D50)
pub fn apply_forward_matrix(rgb: Vec3, forward_matrix: &Mat3) -> Vec3 {
    mat3_apply(forward_matrix, rgb)
}

/// Pre-bake white balance and color correction into a single matrix:
/// `ForwardMatrix * diag(1 / AsShotNeutral)`
pub fn make_camera_to_pcs(as_shot_neutral: Vec3, forward_matrix: &Mat3) -> Mat3 {
    mat3_mul(forward_matrix, &vec3_invert_diag(as_shot_neutral))
}

/// XYZ(D50) down to linear sRGB(D65), including the reference-white
/// adaptation. Out-of-gamut colors can come out negative; callers floor
/// them before gamma expansion so they can't wrap around.
pub fn xyz_to_srgb(xyz: Vec3) -> Vec3 {
    mat3_apply(&XYZ_D50_TO_LINEAR_SRGB_D65, xyz)
}

/// Piecewise sRGB gamma expansion for a single linear channel in [0, 1]
pub fn gamma_expand(v: f64) -> f64 {
    if v <= 0.0031308 {
        12.92 * v
    } else {
        1.055 * v.powf(1.0 / 2.4) - 0.055
    }
}

/// Gamma-expand all three channels
pub fn gamma_expand_rgb(rgb: Vec3) -> Vec3 {
    [
        gamma_expand(rgb[0]),
        gamma_expand(rgb[1]),
        gamma_expand(rgb[2]),
    ]
}

/// Rec.709 relative luminance of a linear RGB value. Used where a quick
/// brightness estimate is wanted before any real color development has
/// happened (e.g. the over-exposure gate during fusion).
pub fn rec709_luminance(rgb: Vec3) -> f64 {
    0.2126 * rgb[0] + 0.7152 * rgb[1] + 0.0722 * rgb[2]
}

/// Map a 16-bit color to a gray value in [0, 0xFFFF]. If we had more of
/// a handle on the color we might develop it to XYZ and pick out the
/// luminance, but this works just fine.
pub fn gray_u16(rgb: [u16; 3]) -> u16 {
    let gray = rgb[0] as f64 * GRAY_WEIGHTS[0]
        + rgb[1] as f64 * GRAY_WEIGHTS[1]
        + rgb[2] as f64 * GRAY_WEIGHTS[2];
    gray.min(65535.0) as u16
}

/// Average several camera-native readings, accounting for the different
/// exposures each may have. Channels are rescaled to the largest
/// saturation illuminance in the set before averaging.
pub fn average_balanced(readings: &[CameraNative]) -> CameraNative {
    let max_illum = readings
        .iter()
        .map(|cn| cn.illum_at_max)
        .fold(0.0, f64::max);

    let mut out = CameraNative {
        rgb: [0.0; 3],
        illum_at_max: max_illum,
    };

    for cn in readings {
        let scale = cn.illum_at_max / max_illum;
        out.rgb[0] += cn.rgb[0] * scale;
        out.rgb[1] += cn.rgb[1] * scale;
        out.rgb[2] += cn.rgb[2] * scale;
    }

    let n = readings.len() as f64;
    out.rgb[0] /= n;
    out.rgb[1] /= n;
    out.rgb[2] /= n;

    out
}
