//! Layer alignment
//!
//! Maps every non-base layer onto the base layer's sky coordinates. The
//! coarse pass just superimposes the lunar-limb centers, which works
//! better than you'd think given that the moon itself moves relative to
//! the sun during totality. The optional fine-tune pass grid-searches
//! small translations and rotations, scoring each candidate by the
//! luminance difference over the pixels both exposures captured well.
//!
//! If you shoot on an equatorial mount, all of this is redundant.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::color::CameraNative;
use crate::config::is_verbose;
use crate::decoders::DecodedImage;
use crate::exposure::ExposureValue;
use crate::math::{Aff3, FloatGrid, Mat3, Rect};
use crate::verbose_println;

/// Channel values below this are noise, above this are into the
/// sensor's non-linear/clipped range; either way the pixel can't be
/// compared across exposures.
const DIFF_TOO_LOW: f64 = 0x0200 as f64;
const DIFF_TOO_HIGH: f64 = 0x8000 as f64;

/// Error metrics usually land in the 10,000 - 100,000 range; this scale
/// factor puts them there.
const DIFF_METRIC_SCALE: f64 = 1e7;

/// A residual above this after fine-tuning suggests the layers never
/// really lined up (clouds, bumped tripod); the transform is still used.
const HIGH_RESIDUAL_WARNING: f64 = 100_000.0;

/// How a layer is moved into the base layer's frame: first translate,
/// then rotate about the (base layer's lunar-limb) rotation center.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AlignmentTransform {
    pub name: String,

    pub translate_x: f64,
    pub translate_y: f64,

    /// Fixed to the base layer's lunar-limb center by the coarse pass;
    /// the fine-tune search never perturbs it
    pub rotation_center_x: f64,
    pub rotation_center_y: f64,
    pub rotate_deg: f64,

    pub error_metric: f64,
}

impl AlignmentTransform {
    /// The 2x3 matrix form; operations compose right-to-left
    pub fn to_matrix(&self) -> Aff3 {
        let mut m = Aff3::identity().translate(self.translate_x, self.translate_y);
        if self.rotate_deg != 0.0 {
            m = Aff3::rotate_about(self.rotate_deg, self.rotation_center_x, self.rotation_center_y)
                .mul(m);
        }
        m
    }

    pub fn describe(&self) -> String {
        let mut s = format!(
            "align[{} ({:6.2},{:6.2})",
            self.name, self.translate_x, self.translate_y
        );
        if self.rotate_deg != 0.0 {
            s += &format!(", {:5.2}deg", self.rotate_deg);
        }
        if self.error_metric != 0.0 {
            s += &format!(", err:{:6.0}", self.error_metric);
        }
        s + "]"
    }
}

/// The coarse alignment: translate so the limb centers coincide,
/// rotation zero about the base limb center.
pub fn coarse_transform(
    name: String,
    base_center: (i64, i64),
    layer_center: (i64, i64),
) -> AlignmentTransform {
    AlignmentTransform {
        name,
        translate_x: (base_center.0 - layer_center.0) as f64,
        translate_y: (base_center.1 - layer_center.1) as f64,
        rotation_center_x: base_center.0 as f64,
        rotation_center_y: base_center.1 as f64,
        rotate_deg: 0.0,
        error_metric: 0.0,
    }
}

/// Apply a transform to a whole image via Catmull-Rom resampling. Each
/// destination pixel is sampled through the inverse mapping, which gives
/// the fractional-pixel accuracy the fine alignment needs.
pub fn resample(src: &DecodedImage, xform: &AlignmentTransform) -> DecodedImage {
    let inverse = xform.to_matrix().invert();
    let width = src.width;
    let mut dst = DecodedImage::new(src.width, src.height);

    dst.data
        .par_chunks_mut(width as usize * 3)
        .enumerate()
        .for_each(|(y, row)| {
            for x in 0..width as usize {
                let (sx, sy) = inverse.apply(x as f64, y as f64);
                let rgb = src.sample_catmull_rom(sx, sy);
                row[x * 3] = rgb[0].round() as u16;
                row[x * 3 + 1] = rgb[1].round() as u16;
                row[x * 3 + 2] = rgb[2].round() as u16;
            }
        });

    dst
}

/// Everything the candidate scorer needs to compare two layers
pub struct DiffContext<'a> {
    pub base_image: &'a DecodedImage,
    pub cand_image: &'a DecodedImage,
    pub input_area: Rect,
    pub base_ev: ExposureValue,
    pub cand_ev: ExposureValue,
    pub camera_to_pcs: Mat3,
}

/// Compare the base layer against a candidate transform of the other
/// layer; the less similar, the higher the value. The difference is in
/// XYZ luminance after normalizing for the EV difference, averaged over
/// the pixels both exposures captured cleanly. `None` when no pixels
/// were comparable.
pub fn img_diff(
    ctx: &DiffContext,
    xform: &AlignmentTransform,
    mut dump: Option<&mut FloatGrid>,
) -> Option<f64> {
    let inverse = xform.to_matrix().invert();

    // Illuminance at max over the two differently-exposed layers
    let ev_max = if ctx.cand_ev.illum_at_max > ctx.base_ev.illum_at_max {
        ctx.cand_ev
    } else {
        ctx.base_ev
    };

    let mut tot_err = 0.0;
    let mut n_err: u64 = 0;

    for y in ctx.input_area.min_y..ctx.input_area.max_y {
        for x in ctx.input_area.min_x..ctx.input_area.max_x {
            let c1 = ctx.base_image.rgb_at(x, y);
            let (sx, sy) = inverse.apply(x as f64, y as f64);
            let c2 = ctx.cand_image.sample_catmull_rom(sx, sy);

            let c1f = [c1[0] as f64, c1[1] as f64, c1[2] as f64];
            if !comparable(&c1f) || !comparable(&c2) {
                continue;
            }

            let y1 = luminance_at_ev(&c1f, ctx.base_ev, ev_max, &ctx.camera_to_pcs);
            let y2 = luminance_at_ev(&c2, ctx.cand_ev, ev_max, &ctx.camera_to_pcs);
            let pix_err = (y1 - y2).abs();

            if let Some(grid) = dump.as_deref_mut() {
                grid.set(
                    (x - ctx.input_area.min_x) as usize,
                    (y - ctx.input_area.min_y) as usize,
                    pix_err,
                );
            }

            tot_err += pix_err;
            n_err += 1;
        }
    }

    if n_err == 0 {
        return None;
    }

    Some(tot_err * DIFF_METRIC_SCALE / n_err as f64)
}

#[inline]
fn comparable(rgb: &[f64; 3]) -> bool {
    rgb.iter()
        .all(|&v| (DIFF_TOO_LOW..=DIFF_TOO_HIGH).contains(&v))
}

/// Develop the raw sample far enough to read off the XYZ luminance,
/// rescaled to the larger of the two exposures.
fn luminance_at_ev(rgb: &[f64; 3], ev: ExposureValue, ev_max: ExposureValue, pcs: &Mat3) -> f64 {
    let mut cn = CameraNative {
        rgb: [rgb[0] / 65535.0, rgb[1] / 65535.0, rgb[2] / 65535.0],
        illum_at_max: ev.illum_at_max,
    };
    cn.rescale_to_illum(ev_max.illum_at_max);
    cn.luminance(pcs)
}

/// Grid-search refinement of a coarse transform. Four passes, each
/// seeded by the previous winner: whole-pixel translations, fractional
/// translations, coarse rotations, fine rotations.
pub fn fine_tune(
    ctx: &DiffContext,
    base_radius: i64,
    cand_radius: i64,
    base_xform: AlignmentTransform,
) -> AlignmentTransform {
    // The limbs have to line up, so the radius difference bounds how far
    // the translation search needs to look.
    let rad_delta = ((base_radius - cand_radius).abs() as f64).max(2.0);

    eprintln!("[align] finetune orig  : {}", base_xform.describe());

    let mut best = base_xform;

    // Pass 1a: whole-pixel translations
    best = score_candidates(ctx, translation_candidates(&best, rad_delta, 1.0), "pass1a");

    // Pass 1b: fractional translations; this is what the Catmull-Rom
    // resampling is for
    best = score_candidates(ctx, translation_candidates(&best, 2.0, 0.10), "pass1b");

    // Pass 2a: coarse rotations, only useful when the shots were
    // separated by quite a lot of time
    best = score_candidates(ctx, rotation_candidates(&best, 5.0, 1.0, false), "pass2a");

    // Pass 2b: fine rotations around the winner
    best = score_candidates(ctx, rotation_candidates(&best, 1.0, 0.05, true), "pass2b");

    eprintln!("[align] finetune final : {}", best.describe());

    if best.error_metric > HIGH_RESIDUAL_WARNING {
        eprintln!(
            "[align] warning: residual error {:.0} is high; layers may not really align",
            best.error_metric
        );
    }

    best
}

fn translation_candidates(
    seed: &AlignmentTransform,
    width: f64,
    step: f64,
) -> Vec<AlignmentTransform> {
    let mut out = Vec::new();
    let n = (2.0 * width / step).round() as i64;
    for iy in 0..=n {
        let dy = -width + iy as f64 * step;
        for ix in 0..=n {
            let dx = -width + ix as f64 * step;
            let mut xform = seed.clone();
            xform.translate_x += dx;
            xform.translate_y += dy;
            out.push(xform);
        }
    }
    out
}

fn rotation_candidates(
    seed: &AlignmentTransform,
    width_deg: f64,
    step: f64,
    relative: bool,
) -> Vec<AlignmentTransform> {
    let mut out = Vec::new();
    let n = (2.0 * width_deg / step).round() as i64;
    for i in 0..=n {
        let theta = -width_deg + i as f64 * step;
        let mut xform = seed.clone();
        if relative {
            xform.rotate_deg += theta;
        } else {
            xform.rotate_deg = theta;
        }
        out.push(xform);
    }
    out
}

/// Score every candidate in parallel and keep the minimum. Ties break to
/// the earliest candidate in enumeration order, so the result is
/// deterministic however the work was scheduled.
fn score_candidates(
    ctx: &DiffContext,
    candidates: Vec<AlignmentTransform>,
    pass_name: &str,
) -> AlignmentTransform {
    let n_candidates = candidates.len();

    let best = candidates
        .into_par_iter()
        .enumerate()
        .map(|(i, xform)| {
            let score = img_diff(ctx, &xform, None).unwrap_or(f64::MAX);
            (i, score, xform)
        })
        .min_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        })
        .expect("candidate list is never empty");

    let mut xform = best.2;
    xform.error_metric = best.1;

    eprintln!(
        "[align] {}: {} ({} tried)",
        pass_name,
        xform.describe(),
        n_candidates
    );

    if is_verbose() {
        let mut grid = FloatGrid::new(ctx.input_area.dx() as usize, ctx.input_area.dy() as usize);
        if img_diff(ctx, &xform, Some(&mut grid)).is_some() {
            let path = format!("diff-{}-{}.png", xform.name, pass_name);
            if let Err(e) = crate::diagnostics::dump_grid(&grid, &path) {
                verbose_println!("[align] diff dump failed: {}", e);
            }
        }
    }

    xform
}
