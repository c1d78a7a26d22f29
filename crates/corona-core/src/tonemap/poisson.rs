//! DCT-based Poisson solver
//!
//! Solves `laplace(U) = F` with even-reflection (REDFT00) boundary
//! conditions, as the PFSTMO Fattal implementation does. The discrete
//! cosine transform diagonalizes the 5-point Laplacian under those
//! boundaries, so the solve is a forward transform, a pointwise divide
//! by the operator's eigenvalues, and an inverse transform.
//!
//! The DCT-I itself is built on rustfft via the even extension: a
//! REDFT00 of n points is the real part of a length 2(n-1) FFT.

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::math::FloatGrid;

/// One-dimensional unnormalized DCT-I (FFTW REDFT00 semantics).
/// Plans are cheap to build and are owned by a single solve call; the
/// underlying FFT plan is not shared across threads.
struct Dct1d {
    n: usize,
    fft: Arc<dyn Fft<f64>>,
    buf: Vec<Complex<f64>>,
    scratch: Vec<Complex<f64>>,
}

impl Dct1d {
    fn new(planner: &mut FftPlanner<f64>, n: usize) -> Self {
        let m = 2 * (n - 1);
        let fft = planner.plan_fft_forward(m);
        let scratch = vec![Complex::default(); fft.get_inplace_scratch_len()];
        Self {
            n,
            fft,
            buf: vec![Complex::default(); m],
            scratch,
        }
    }

    /// In-place DCT-I of `data` (length n)
    fn transform(&mut self, data: &mut [f64]) {
        let n = self.n;
        let m = 2 * (n - 1);

        for j in 0..n {
            self.buf[j] = Complex::new(data[j], 0.0);
        }
        for j in 1..n - 1 {
            self.buf[m - j] = Complex::new(data[j], 0.0);
        }

        self.fft
            .process_with_scratch(&mut self.buf, &mut self.scratch);

        for (k, v) in data.iter_mut().enumerate() {
            *v = self.buf[k].re;
        }
    }
}

/// 2D DCT-I: transform every row, then every column
fn dct2d(grid: &mut FloatGrid) {
    let width = grid.width();
    let height = grid.height();

    let mut planner = FftPlanner::new();
    let mut row_dct = Dct1d::new(&mut planner, width);
    let mut col_dct = Dct1d::new(&mut planner, height);

    let mut row = vec![0.0; width];
    for y in 0..height {
        for (x, v) in row.iter_mut().enumerate() {
            *v = grid.get(x, y);
        }
        row_dct.transform(&mut row);
        for (x, &v) in row.iter().enumerate() {
            grid.set(x, y, v);
        }
    }

    let mut col = vec![0.0; height];
    for x in 0..width {
        for (y, v) in col.iter_mut().enumerate() {
            *v = grid.get(x, y);
        }
        col_dct.transform(&mut col);
        for (y, &v) in col.iter().enumerate() {
            grid.set(x, y, v);
        }
    }
}

/// Forward step of the solve: DCT into eigenvector space, then apply the
/// normalization PFSTMO expects (scale by 1/((h-1)(w-1)), halve the
/// border rows and columns).
fn transform_normal2ev(grid: &mut FloatGrid) {
    let width = grid.width();
    let height = grid.height();

    dct2d(grid);

    let scale = 1.0 / ((height - 1) as f64 * (width - 1) as f64);
    for v in grid.values_mut() {
        *v *= scale;
    }
    for x in 0..width {
        grid.set(x, 0, grid.get(x, 0) * 0.5);
        grid.set(x, height - 1, grid.get(x, height - 1) * 0.5);
    }
    for y in 0..height {
        grid.set(0, y, grid.get(0, y) * 0.5);
        grid.set(width - 1, y, grid.get(width - 1, y) * 0.5);
    }
}

/// Inverse step: pre-scale (0.25 interior, 0.5 edges, corners untouched)
/// then DCT back to normal space.
fn transform_ev2normal(grid: &mut FloatGrid) {
    let width = grid.width();
    let height = grid.height();

    for y in 1..height - 1 {
        for x in 1..width - 1 {
            grid.set(x, y, grid.get(x, y) * 0.25);
        }
    }
    for x in 1..width - 1 {
        grid.set(x, 0, grid.get(x, 0) * 0.5);
        grid.set(x, height - 1, grid.get(x, height - 1) * 0.5);
    }
    for y in 1..height - 1 {
        grid.set(0, y, grid.get(0, y) * 0.5);
        grid.set(width - 1, y, grid.get(width - 1, y) * 0.5);
    }

    dct2d(grid);
}

/// Eigenvalues of the 1D reflected-boundary Laplacian:
/// `lambda[i] = -4 sin^2(i pi / (2 (n-1)))`
fn laplacian_eigenvalues(n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| {
            let u = (i as f64 / (2 * (n - 1)) as f64 * std::f64::consts::PI).sin();
            -4.0 * u * u
        })
        .collect()
}

/// A Neumann Poisson problem only has a solution when the right-hand
/// side integrates to zero; spread the imbalance over the boundary so
/// the condition holds exactly.
fn make_compatible_boundary(f: &mut FloatGrid) {
    let width = f.width();
    let height = f.height();

    let mut sum = 0.0;
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            sum += f.get(x, y);
        }
    }
    for x in 1..width - 1 {
        sum += 0.5 * (f.get(x, 0) + f.get(x, height - 1));
    }
    for y in 1..height - 1 {
        sum += 0.5 * (f.get(0, y) + f.get(width - 1, y));
    }
    sum += 0.25
        * (f.get(0, 0)
            + f.get(0, height - 1)
            + f.get(width - 1, 0)
            + f.get(width - 1, height - 1));

    let add = -sum / (height + width - 3) as f64;

    for x in 0..width {
        f.set(x, 0, f.get(x, 0) + add);
        f.set(x, height - 1, f.get(x, height - 1) + add);
    }
    for y in 1..height - 1 {
        f.set(0, y, f.get(0, y) + add);
        f.set(width - 1, y, f.get(width - 1, y) + add);
    }
}

/// Solve `laplace(U) = F` with even-reflection boundaries.
///
/// If `adjust_bound` is set, the boundary of F is first modified so an
/// exact solution exists; otherwise a minimum-error solution comes out.
/// The returned U is shifted so `max(U) = 0`, which keeps the later
/// `exp(U)` step tame. Note the input grid is consumed as scratch.
pub fn solve_pde_dct(mut f: FloatGrid, adjust_bound: bool) -> FloatGrid {
    let width = f.width();
    let height = f.height();

    if adjust_bound {
        make_compatible_boundary(&mut f);
    }

    // Into eigenvector space
    transform_normal2ev(&mut f);

    // In the eigenvector space the solve is a pointwise divide. The
    // (0,0) eigenvalue is zero; forcing that coefficient to zero pins
    // the solution's arbitrary constant (and keeps NaN out).
    let ly = laplacian_eigenvalues(height);
    let lx = laplacian_eigenvalues(width);
    let mut u = f;
    for y in 0..height {
        for x in 0..width {
            if x == 0 && y == 0 {
                u.set(0, 0, 0.0);
            } else {
                u.set(x, y, u.get(x, y) / (ly[y] + lx[x]));
            }
        }
    }

    // Back to normal space
    transform_ev2normal(&mut u);

    // U is only defined up to a constant; prefer the one with no
    // positive values since we later take exp(U) of log-space data
    let (_, max) = u.min_max();
    for v in u.values_mut() {
        *v -= max;
    }

    u
}
