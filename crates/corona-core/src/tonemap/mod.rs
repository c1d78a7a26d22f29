//! HDR -> LDR tone mapping
//!
//! The real operator is Fattal '02 gradient-domain compression; `linear`
//! passes the developed values straight through and lets the publish
//! step handle gamma and clipping.

mod fattal02;
mod poisson;

pub use fattal02::Fattal02;
pub use poisson::solve_pde_dct;

use serde::{Deserialize, Serialize};

use crate::config::Tonemapper;
use crate::math::Vec3;

/// Parameters for the Fattal '02 operator.
///
/// The defaults are tuned for eclipse shots, where the interesting
/// bright features are small: no white-point clipping at all (the corona
/// must not blow out), gamma deferred to the publish stage, and
/// saturation pulled down to stop prominences going pure red.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FattalParams {
    /// Pyramid levels that keep their gradients untouched; higher values
    /// attenuate only coarser structure. Below ~3 the attenuation grids
    /// start amplifying sensor noise.
    pub detail_level: u32,
    pub noise: f64,
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
    /// Percent of darkest pixels clipped during renormalization
    pub black_point: f64,
    /// Percent of brightest pixels clipped during renormalization
    pub white_point: f64,
    pub saturation: f64,
    /// Apply sRGB gamma inside the operator rather than at publish
    pub gamma_expand: bool,
}

impl Default for FattalParams {
    fn default() -> Self {
        Self::eclipse()
    }
}

impl FattalParams {
    /// The values this pipeline actually runs with
    pub fn eclipse() -> Self {
        Self {
            detail_level: 4,
            noise: 0.002,
            alpha: 1.0,
            beta: 0.9,
            gamma: 1.0,
            black_point: 0.1,
            white_point: 0.0,
            saturation: 0.4,
            gamma_expand: false,
        }
    }

    /// The stock PFSTMO FFT-solver defaults, for comparison runs
    /// (see https://www.mankier.com/1/pfstmo_fattal02)
    pub fn pfstmo() -> Self {
        Self {
            detail_level: 3,
            noise: 0.002,
            alpha: 1.0,
            beta: 0.9,
            gamma: 0.8,
            black_point: 0.1,
            white_point: 0.5,
            saturation: 0.8,
            gamma_expand: false,
        }
    }

    pub(crate) fn sanitize(&mut self) {
        self.detail_level = self.detail_level.min(10);
        self.noise = self.noise.max(0.0);
        self.alpha = self.alpha.max(1e-3);
        self.beta = self.beta.clamp(0.0, 1.0);
        self.gamma = self.gamma.clamp(0.1, 4.0);
        self.black_point = self.black_point.clamp(0.0, 50.0);
        self.white_point = self.white_point.clamp(0.0, 50.0);
        self.saturation = self.saturation.clamp(0.0, 2.0);
    }
}

/// The result of tone mapping: LDR pixels in [0, 1], plus whether the
/// operator already applied sRGB gamma (so publish doesn't do it twice).
pub struct TonemappedImage {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<Vec3>,
    pub gamma_encoded: bool,
}

/// Run one operator over the developed HDR pixels
pub fn tonemap(
    operator: Tonemapper,
    params: &FattalParams,
    width: usize,
    height: usize,
    pixels: &[Vec3],
) -> TonemappedImage {
    match operator {
        Tonemapper::Fattal02 => {
            let f02 = Fattal02::new(*params, width, height);
            let out = f02.perform(pixels);
            TonemappedImage {
                width,
                height,
                pixels: out,
                gamma_encoded: params.gamma_expand,
            }
        }
        Tonemapper::Linear | Tonemapper::All => TonemappedImage {
            width,
            height,
            pixels: pixels.to_vec(),
            gamma_encoded: false,
        },
    }
}
