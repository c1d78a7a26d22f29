//! 2D grid of floats used by the tone mapper
//!
//! The blur, resampling and gradient operations follow the PFSTMO
//! formulation of Fattal '02; they only ever run on single-channel
//! luminance data.

/// Row-major grid of f64 values
#[derive(Debug, Clone)]
pub struct FloatGrid {
    width: usize,
    height: usize,
    values: Vec<f64>,
}

impl FloatGrid {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            values: vec![0.0; width * height],
        }
    }

    /// A zeroed grid with the same dimensions as this one
    pub fn same_shape(&self) -> Self {
        Self::new(self.width, self.height)
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f64 {
        self.values[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, v: f64) {
        self.values[y * self.width + x] = v;
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    pub fn fill(&mut self, v: f64) {
        self.values.fill(v);
    }

    pub fn min_max(&self) -> (f64, f64) {
        let mut min = f64::MAX;
        let mut max = f64::MIN;
        for &v in &self.values {
            min = min.min(v);
            max = max.max(v);
        }
        (min, max)
    }

    /// Separable 1-2-1 Gaussian blur. Interior pixels get
    /// `(2c + l + r) / 4`; edge pixels get `(3 edge + neighbor) / 4`.
    pub fn gaussian_blur(&self) -> FloatGrid {
        let (w, h) = (self.width, self.height);
        let mut t = self.same_shape();
        let mut out = self.same_shape();

        if w < 2 || h < 2 {
            return self.clone();
        }

        // X pass into t
        for y in 0..h {
            for x in 1..w - 1 {
                let v = 2.0 * self.get(x, y) + self.get(x - 1, y) + self.get(x + 1, y);
                t.set(x, y, v / 4.0);
            }
            t.set(0, y, (3.0 * self.get(0, y) + self.get(1, y)) / 4.0);
            t.set(w - 1, y, (3.0 * self.get(w - 1, y) + self.get(w - 2, y)) / 4.0);
        }

        // Y pass from t
        for x in 0..w {
            for y in 1..h - 1 {
                let v = 2.0 * t.get(x, y) + t.get(x, y - 1) + t.get(x, y + 1);
                out.set(x, y, v / 4.0);
            }
            out.set(x, 0, (3.0 * t.get(x, 0) + t.get(x, 1)) / 4.0);
            out.set(x, h - 1, (3.0 * t.get(x, h - 1) + t.get(x, h - 2)) / 4.0);
        }

        out
    }

    /// Half-size grid, each output value the mean of a 2x2 input block
    pub fn downsample(&self) -> FloatGrid {
        let w = self.width / 2;
        let h = self.height / 2;
        let mut out = FloatGrid::new(w, h);

        for y in 0..h {
            for x in 0..w {
                let sum = self.get(2 * x, 2 * y)
                    + self.get(2 * x + 1, 2 * y)
                    + self.get(2 * x, 2 * y + 1)
                    + self.get(2 * x + 1, 2 * y + 1);
                out.set(x, y, sum / 4.0);
            }
        }

        out
    }

    /// Fill `dst` (assumed ~2x this grid's size) by replicating each value
    /// into a 2x2 block
    pub fn upsample_into(&self, dst: &mut FloatGrid) {
        let (sw, sh) = (self.width, self.height);
        let (dw, dh) = (dst.width, dst.height);

        for y in 0..dh {
            let sy = (y / 2).min(sh - 1);
            for x in 0..dw {
                let sx = (x / 2).min(sw - 1);
                dst.set(x, y, self.get(sx, sy));
            }
        }
    }

    /// Central-difference gradient magnitude at pyramid level `depth`,
    /// with replicated edges and divider `2^(depth+1)`. Also returns the
    /// grid-wide average gradient.
    pub fn gradients(&self, depth: u32) -> (FloatGrid, f64) {
        let (w, h) = (self.width, self.height);
        let mut g = self.same_shape();
        let divider = 2f64.powi(depth as i32 + 1);
        let mut avg = 0.0;

        for y in 0..h {
            for x in 0..w {
                let west = x.saturating_sub(1);
                let east = if x + 1 < w { x + 1 } else { x };
                let north = y.saturating_sub(1);
                let south = if y + 1 < h { y + 1 } else { y };

                let gx = (self.get(west, y) - self.get(east, y)) / divider;
                let gy = (self.get(x, south) - self.get(x, north)) / divider;

                let mag = (gx * gx + gy * gy).sqrt();
                g.set(x, y, mag);
                avg += mag;
            }
        }

        (g, avg / (w * h) as f64)
    }

    /// Values at the `min_pct` / `max_pct` percentiles of the non-zero
    /// entries. Percentiles are fractions in [0, 1].
    pub fn percentile_min_max(&self, min_pct: f64, max_pct: f64) -> (f64, f64) {
        let mut nonzero: Vec<f64> = self.values.iter().copied().filter(|&v| v != 0.0).collect();
        if nonzero.is_empty() {
            return (0.0, 0.0);
        }

        nonzero.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let i_min = ((min_pct * nonzero.len() as f64) as usize).min(nonzero.len() - 1);
        let i_max = ((max_pct * nonzero.len() as f64) as usize).min(nonzero.len() - 1);

        (nonzero[i_min], nonzero[i_max])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blur_preserves_constant() {
        let mut g = FloatGrid::new(7, 5);
        g.fill(3.25);
        let b = g.gaussian_blur();
        for y in 0..5 {
            for x in 0..7 {
                assert!((b.get(x, y) - 3.25).abs() < 1e-12, "({}, {})", x, y);
            }
        }
    }

    #[test]
    fn test_blur_interior_weights() {
        // Single impulse: the separable 1-2-1 kernel spreads 4/16 to the
        // center, 2/16 to edge-neighbors, 1/16 to corners
        let mut g = FloatGrid::new(5, 5);
        g.set(2, 2, 16.0);
        let b = g.gaussian_blur();
        assert!((b.get(2, 2) - 4.0).abs() < 1e-12);
        assert!((b.get(1, 2) - 2.0).abs() < 1e-12);
        assert!((b.get(2, 1) - 2.0).abs() < 1e-12);
        assert!((b.get(1, 1) - 1.0).abs() < 1e-12);
        assert!(b.get(4, 4).abs() < 1e-12);
    }

    #[test]
    fn test_downsample_averages_blocks() {
        let mut g = FloatGrid::new(4, 2);
        for (i, v) in [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0].iter().enumerate() {
            g.set(i % 4, i / 4, *v);
        }
        let d = g.downsample();
        assert_eq!(d.width(), 2);
        assert_eq!(d.height(), 1);
        assert!((d.get(0, 0) - (1.0 + 2.0 + 5.0 + 6.0) / 4.0).abs() < 1e-12);
        assert!((d.get(1, 0) - (3.0 + 4.0 + 7.0 + 8.0) / 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_upsample_replicates() {
        let mut small = FloatGrid::new(2, 2);
        small.set(0, 0, 1.0);
        small.set(1, 0, 2.0);
        small.set(0, 1, 3.0);
        small.set(1, 1, 4.0);

        let mut big = FloatGrid::new(5, 4);
        small.upsample_into(&mut big);

        assert!((big.get(0, 0) - 1.0).abs() < 1e-12);
        assert!((big.get(1, 1) - 1.0).abs() < 1e-12);
        assert!((big.get(2, 0) - 2.0).abs() < 1e-12);
        assert!((big.get(0, 2) - 3.0).abs() < 1e-12);
        assert!((big.get(3, 3) - 4.0).abs() < 1e-12);
        // Odd column clamps to the last source column
        assert!((big.get(4, 0) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_gradients_flat_grid_is_zero() {
        let mut g = FloatGrid::new(8, 8);
        g.fill(2.5);
        let (grad, avg) = g.gradients(0);
        assert!(avg.abs() < 1e-12);
        assert!(grad.get(4, 4).abs() < 1e-12);
    }

    #[test]
    fn test_gradients_linear_ramp() {
        // H(x, y) = x: central difference is 1 px/px, divider 2^(0+1) = 2,
        // so interior gradient magnitude is 1.0
        let mut g = FloatGrid::new(8, 8);
        for y in 0..8 {
            for x in 0..8 {
                g.set(x, y, x as f64);
            }
        }
        let (grad, _) = g.gradients(0);
        assert!((grad.get(4, 4) - 1.0).abs() < 1e-12);
        // Replicated edge: one-sided difference halves the magnitude
        assert!((grad.get(0, 4) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_percentile_ignores_zeros() {
        let mut g = FloatGrid::new(10, 1);
        for x in 0..5 {
            g.set(x, 0, (x + 1) as f64); // 1..5, plus five zeros
        }
        let (lo, hi) = g.percentile_min_max(0.0, 1.0);
        assert!((lo - 1.0).abs() < 1e-12);
        assert!((hi - 5.0).abs() < 1e-12);

        let (lo, _) = g.percentile_min_max(0.4, 1.0);
        assert!((lo - 3.0).abs() < 1e-12);
    }
}
