//! Fattal '02, "Gradient Domain High Dynamic Range Compression"
//!
//! A port of the PFSTMO implementation's FFT-solver path. All the
//! intermediate grids operate on a single channel, the log-luminance;
//! color is re-attached per pixel at the end.

use rayon::prelude::*;

use crate::color::{gamma_expand_rgb, rec709_luminance};
use crate::config::is_verbose;
use crate::diagnostics::dump_grid;
use crate::math::{FloatGrid, Vec3};
use crate::tonemap::poisson::solve_pde_dct;
use crate::tonemap::FattalParams;
use crate::verbose_println;

/// Gradients below this are left alone by the attenuation field
const GRADIENT_EPSILON: f64 = 1e-4;

/// Floor used throughout the luminance reconstruction
const LUM_EPSILON: f64 = 1e-4;

/// One run of the operator over one image
pub struct Fattal02 {
    params: FattalParams,
    width: usize,
    height: usize,
}

impl Fattal02 {
    pub fn new(params: FattalParams, width: usize, height: usize) -> Self {
        Self {
            params,
            width,
            height,
        }
    }

    /// Tone-map `pixels` (developed linear RGB, row-major) down to LDR.
    /// Every output channel lands in [0, 1].
    pub fn perform(&self, pixels: &[Vec3]) -> Vec<Vec3> {
        let h_grid = self.log_luminance(pixels);
        let pyramid = self.gaussian_pyramid(&h_grid);

        let mut gradients = Vec::with_capacity(pyramid.len());
        let mut avg_grads = Vec::with_capacity(pyramid.len());
        for (k, level) in pyramid.iter().enumerate() {
            let (g, avg) = level.gradients(k as u32);
            self.dump(&g, &format!("003-gradient{:02}.png", k));
            gradients.push(g);
            avg_grads.push(avg);
        }

        let attenuation = self.attenuation_field(&gradients, &avg_grads);
        let div_g = self.divergence(&h_grid, &attenuation);

        let u = solve_pde_dct(div_g, false);
        self.dump(&u, "006-solved-PDE.png");

        let out_lum = self.reconstructed_luminance(&u);
        self.fill_output(pixels, &out_lum)
    }

    fn dump(&self, grid: &FloatGrid, filename: &str) {
        if is_verbose() {
            if let Err(e) = dump_grid(grid, filename) {
                verbose_println!("[tonemap] grid dump failed: {}", e);
            }
        }
    }

    /// Stage 1: H = ln(100 * normalized luminance + epsilon).
    /// Black pixels land at ln(epsilon) = -9.2.
    fn log_luminance(&self, pixels: &[Vec3]) -> FloatGrid {
        let mut lum_grid = FloatGrid::new(self.width, self.height);
        let mut min_lum = f64::MAX;
        let mut max_lum = f64::MIN;

        for y in 0..self.height {
            for x in 0..self.width {
                let lum = rec709_luminance(pixels[y * self.width + x]);
                min_lum = min_lum.min(lum);
                max_lum = max_lum.max(lum);
                lum_grid.set(x, y, lum);
            }
        }

        let range = max_lum - min_lum;
        let mut h_grid = FloatGrid::new(self.width, self.height);
        for y in 0..self.height {
            for x in 0..self.width {
                // A flat image normalizes to zero rather than 0/0
                let normalized = if range > 0.0 {
                    100.0 * (lum_grid.get(x, y) - min_lum) / range
                } else {
                    0.0
                };
                h_grid.set(x, y, (normalized + LUM_EPSILON).ln());
            }
        }

        self.dump(&lum_grid, "001-luminance.png");
        self.dump(&h_grid, "001-logLuminance.png");
        h_grid
    }

    /// Stage 2: Gaussian pyramid of H, deep enough that the smallest
    /// level still has a min-dimension of 8
    fn gaussian_pyramid(&self, h_grid: &FloatGrid) -> Vec<FloatGrid> {
        let mut n_levels = 0;
        let mut min_dim = self.width.min(self.height);
        while min_dim >= 8 {
            min_dim /= 2;
            n_levels += 1;
        }
        let n_levels = n_levels.max(1);

        let mut pyramid = Vec::with_capacity(n_levels);
        pyramid.push(h_grid.clone());
        self.dump(&pyramid[0], "002-pyramid00.png");

        for k in 1..n_levels {
            let next = pyramid[k - 1].gaussian_blur().downsample();
            self.dump(&next, &format!("002-pyramid{:02}.png", k));
            pyramid.push(next);
        }

        pyramid
    }

    /// Stage 4: the attenuation field PHI, built top-down from the
    /// pyramid's gradients. Attenuation is only applied to levels at or
    /// above `detail_level` (and always to the coarsest), then carried
    /// down by upsample + blur.
    fn attenuation_field(&self, gradients: &[FloatGrid], avg_grads: &[f64]) -> FloatGrid {
        let n_levels = gradients.len();
        let top = n_levels - 1;
        let noise = self.params.noise;

        let mut phi = gradients[top].same_shape();
        phi.fill(1.0);

        for k in (0..n_levels).rev() {
            if k >= self.params.detail_level as usize || k == top {
                let a = self.params.alpha * avg_grads[k];
                for y in 0..gradients[k].height() {
                    for x in 0..gradients[k].width() {
                        let grad = gradients[k].get(x, y);
                        if grad > GRADIENT_EPSILON {
                            let value =
                                a / (grad + noise) * ((grad + noise) / a).powf(self.params.beta);
                            phi.set(x, y, phi.get(x, y) * value);
                        }
                    }
                }
            }

            self.dump(&phi, &format!("004-attenuation{:02}.png", k));

            if k > 0 {
                let mut upsampled = gradients[k - 1].same_shape();
                phi.upsample_into(&mut upsampled);
                phi = upsampled.gaussian_blur();
            }
        }

        phi
    }

    /// Stage 5: attenuated forward-difference gradients and their
    /// divergence, assembled with the boundary conventions the FFT
    /// solver assumes (H(n) = H(n-2) rather than zero-Neumann).
    fn divergence(&self, h_grid: &FloatGrid, phi: &FloatGrid) -> FloatGrid {
        let (w, h) = (self.width, self.height);
        let mut gx = FloatGrid::new(w, h);
        let mut gy = FloatGrid::new(w, h);

        for y in 0..h {
            for x in 0..w {
                let xp1 = if x + 1 >= w { w - 2 } else { x + 1 };
                let yp1 = if y + 1 >= h { h - 2 } else { y + 1 };

                // Forward differences in H, so use the between-points
                // average of PHI
                let dx = (h_grid.get(xp1, y) - h_grid.get(x, y))
                    * 0.5
                    * (phi.get(xp1, y) + phi.get(x, y));
                let dy = (h_grid.get(x, yp1) - h_grid.get(x, y))
                    * 0.5
                    * (phi.get(x, yp1) + phi.get(x, y));

                gx.set(x, y, dx);
                gy.set(x, y, dy);
            }
        }

        self.dump(&gx, "005-divGx.png");
        self.dump(&gy, "005-divGy.png");

        let mut div = FloatGrid::new(w, h);
        for y in 0..h {
            for x in 0..w {
                let mut val = gx.get(x, y) + gy.get(x, y);
                if x > 0 {
                    val -= gx.get(x - 1, y);
                }
                if y > 0 {
                    val -= gy.get(x, y - 1);
                }
                // The missing backward term at the border doubles the
                // forward one under the solver's reflection convention
                if x == 0 {
                    val += gx.get(x, y);
                }
                if y == 0 {
                    val += gy.get(x, y);
                }
                div.set(x, y, val);
            }
        }

        self.dump(&div, "005-divG.png");
        div
    }

    /// Stage 7: exponentiate the solved log-luminance and renormalize
    /// between percentile bounds
    fn reconstructed_luminance(&self, u: &FloatGrid) -> FloatGrid {
        let mut lum = u.same_shape();
        for y in 0..self.height {
            for x in 0..self.width {
                lum.set(x, y, (self.params.gamma * u.get(x, y)).exp() - LUM_EPSILON);
            }
        }

        let cut_min = 0.01 * self.params.black_point;
        let cut_max = 1.0 - 0.01 * self.params.white_point;
        let (min_lum, max_lum) = lum.percentile_min_max(cut_min, cut_max);

        let range = max_lum - min_lum;
        for y in 0..self.height {
            for x in 0..self.width {
                // Degenerate range means a flat solve: everything maps
                // to full luminance
                let val = if range > 1e-12 {
                    (lum.get(x, y) - min_lum) / range
                } else {
                    1.0
                };
                lum.set(x, y, if val <= 0.0 { LUM_EPSILON } else { val });
            }
        }

        self.dump(&lum, "007-exponentiated.png");
        lum
    }

    /// Stage 8: scale each pixel's original color by the ratio of new to
    /// old luminance: `C_out = (C_in / L_before)^saturation * L_after`
    fn fill_output(&self, pixels: &[Vec3], out_lum: &FloatGrid) -> Vec<Vec3> {
        let width = self.width;
        let params = self.params;

        let mut out = vec![[0.0; 3]; pixels.len()];
        out.par_chunks_mut(width)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, out_px) in row.iter_mut().enumerate() {
                    let c_in = pixels[y * width + x];
                    let l_before = rec709_luminance(c_in).max(LUM_EPSILON);
                    let l_after = out_lum.get(x, y).max(LUM_EPSILON);

                    let mut c_out = [0.0; 3];
                    for ch in 0..3 {
                        c_out[ch] =
                            (c_in[ch] / l_before).max(0.0).powf(params.saturation) * l_after;
                    }

                    if params.gamma_expand {
                        c_out = gamma_expand_rgb(c_out);
                    }

                    // Clipping, else high values wrap around at
                    // quantization
                    for v in c_out.iter_mut() {
                        *v = v.min(1.0);
                    }

                    *out_px = c_out;
                }
            });

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(params: FattalParams, width: usize, height: usize, pixels: &[Vec3]) -> Vec<Vec3> {
        Fattal02::new(params, width, height).perform(pixels)
    }

    #[test]
    fn test_flat_white_image_passes_through() {
        // Uniform luminance: all gradients zero, PHI stays 1, the solve
        // is flat, and renormalization maps everything to luminance 1
        let mut params = FattalParams::eclipse();
        params.saturation = 1.0;

        let pixels = vec![[1.0, 1.0, 1.0]; 32 * 32];
        let out = run(params, 32, 32, &pixels);

        for (i, px) in out.iter().enumerate() {
            for ch in 0..3 {
                assert!(
                    (px[ch] - 1.0).abs() < 1e-6,
                    "pixel {} channel {}: {}",
                    i,
                    ch,
                    px[ch]
                );
            }
        }
    }

    #[test]
    fn test_output_bounded() {
        // A harsh HDR ramp with a hot spot: every output channel must
        // stay inside [0, 1]
        let (w, h) = (48, 32);
        let mut pixels = vec![[0.0; 3]; w * h];
        for y in 0..h {
            for x in 0..w {
                let v = ((x + 1) * (y + 1)) as f64 / (w * h) as f64;
                pixels[y * w + x] = [v * 400.0, v * 350.0, v * 300.0];
            }
        }
        pixels[w * 10 + 20] = [20000.0, 18000.0, 15000.0];

        let out = run(FattalParams::eclipse(), w, h, &pixels);
        for (i, px) in out.iter().enumerate() {
            for ch in 0..3 {
                assert!(
                    (0.0..=1.0).contains(&px[ch]),
                    "pixel {} channel {} out of range: {}",
                    i,
                    ch,
                    px[ch]
                );
            }
        }
    }

    #[test]
    fn test_compresses_dynamic_range() {
        // Two regions five orders of magnitude apart must end up within
        // a displayable ratio of each other
        let (w, h) = (32, 32);
        let mut pixels = vec![[0.0; 3]; w * h];
        for y in 0..h {
            for x in 0..w {
                let v = if x < w / 2 { 1e-3 } else { 1e2 };
                pixels[y * w + x] = [v, v, v];
            }
        }

        let out = run(FattalParams::eclipse(), w, h, &pixels);

        let dim = rec709_luminance(out[16 * w + 4]);
        let bright = rec709_luminance(out[16 * w + 28]);
        assert!(bright > dim, "bright {} vs dim {}", bright, dim);
        assert!(
            bright / dim.max(1e-9) < 2e4,
            "range not compressed: {} / {}",
            bright,
            dim
        );
    }

    #[test]
    fn test_gamma_expand_flag() {
        let mut params = FattalParams::eclipse();
        params.gamma_expand = true;
        let pixels = vec![[0.25, 0.25, 0.25]; 16 * 16];
        let out = run(params, 16, 16, &pixels);
        // Gamma expansion brightens mid-tones
        assert!(out[0][0] > 0.25, "got {}", out[0][0]);
    }
}
