use criterion::{criterion_group, criterion_main, Criterion};

use corona_core::math::FloatGrid;
use corona_core::tonemap::solve_pde_dct;

fn noise_grid(width: usize, height: usize) -> FloatGrid {
    let mut grid = FloatGrid::new(width, height);
    let mut state: u64 = 0x9E3779B97F4A7C15;
    for y in 0..height {
        for x in 0..width {
            // xorshift, good enough for a benchmark payload
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            grid.set(x, y, (state % 10_000) as f64 / 10_000.0);
        }
    }
    grid
}

fn bench_gaussian_blur(c: &mut Criterion) {
    let grid = noise_grid(1024, 1024);
    c.bench_function("gaussian_blur_1024", |b| {
        b.iter(|| std::hint::black_box(grid.gaussian_blur()))
    });
}

fn bench_downsample(c: &mut Criterion) {
    let grid = noise_grid(1024, 1024);
    c.bench_function("downsample_1024", |b| {
        b.iter(|| std::hint::black_box(grid.downsample()))
    });
}

fn bench_poisson_solve(c: &mut Criterion) {
    let grid = noise_grid(512, 512);
    c.bench_function("poisson_solve_512", |b| {
        b.iter(|| std::hint::black_box(solve_pde_dct(grid.clone(), false)))
    });
}

criterion_group!(benches, bench_gaussian_blur, bench_downsample, bench_poisson_solve);
criterion_main!(benches);
