//! Lunar-limb detection
//!
//! During totality the moon is a dark disc surrounded by corona. We find
//! the centroid of the image's luminance (which lands inside the disc),
//! then flood-fill outward until the corona stops us. The bounding box of
//! the fill is the limb, and its center is the alignment reference for
//! the whole stack.

use std::collections::VecDeque;

use crate::decoders::DecodedImage;
use crate::math::Rect;
use crate::verbose_println;

/// Pixels with gray outside this window are ignored by the centroid:
/// below is sensor noise, above is blown-out inner corona that pulls the
/// centroid too far one way. What's left is mostly corona.
const CENTROID_GRAY_MIN: u16 = 0x0300;
const CENTROID_GRAY_MAX: u16 = 0xFFF0;

/// Flood-fill boundary threshold. Set kinda high because some shots have
/// a lot of earthshine (luminance inside the limb).
const FLOOD_THRESHOLD: u16 = 0x1000;

/// When the whole photo is very dim, the corona may sit below the normal
/// threshold and the flood would flow over it and cover the image; use
/// this much lower boundary instead.
const FLOOD_THRESHOLD_DIM: u16 = 0x0040;
const DIM_BRIGHTNESS_CUTOFF: u16 = 0x0015;

/// The detected outline of the moon
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LunarLimb {
    /// Luminance-weighted center of the image; inside the limb for any
    /// reasonable totality shot
    pub luminal_center: (i64, i64),

    /// Rough mean brightness inside the limb (earthshine level)
    pub brightness: u16,

    /// Box around the limb
    pub bounds: Rect,
}

impl LunarLimb {
    pub fn radius(&self) -> i64 {
        (self.bounds.dx() + self.bounds.dy()) / 4
    }

    pub fn center(&self) -> (i64, i64) {
        self.bounds.center()
    }
}

/// Locate the lunar limb. This is a fairly dumb routine: it finds the
/// centroid of all the luminance in the image, assumes that is inside
/// the limb, and flood-fills out until it sees bright pixels.
///
/// Fails when the fill never grows, which means there is no dark disc to
/// align on.
pub fn find_lunar_limb(
    img: &DecodedImage,
    mut overlay: Option<&mut LimbOverlay>,
) -> Result<LunarLimb, String> {
    let (center, brightness) = luminal_center(img);

    if let Some(ov) = overlay.as_deref_mut() {
        ov.start_frame(center);
    }

    let thresh = if brightness < DIM_BRIGHTNESS_CUTOFF {
        FLOOD_THRESHOLD_DIM
    } else {
        FLOOD_THRESHOLD
    };

    let w = img.width as i64;
    let h = img.height as i64;
    let mut seen = vec![false; (w * h) as usize];
    let mut bounds: Option<Rect> = None;

    let mut to_visit = VecDeque::new();
    to_visit.push_back(center);

    while let Some((x, y)) = to_visit.pop_front() {
        let idx = (y * w + x) as usize;
        if seen[idx] {
            continue;
        }
        seen[idx] = true;

        // A bit of luminance means we've hit the corona: the edge of
        // the limb
        if img.gray_at(x, y) > thresh {
            continue;
        }

        match bounds.as_mut() {
            Some(r) => r.grow_to(x, y),
            None => bounds = Some(Rect::new(x, y, x + 1, y + 1)),
        }
        if let Some(ov) = overlay.as_deref_mut() {
            ov.plot(x, y);
        }

        if x > 0 {
            to_visit.push_back((x - 1, y));
        }
        if y > 0 {
            to_visit.push_back((x, y - 1));
        }
        if x + 1 < w {
            to_visit.push_back((x + 1, y));
        }
        if y + 1 < h {
            to_visit.push_back((x, y + 1));
        }
    }

    let bounds = bounds.unwrap_or_default();
    let limb = LunarLimb {
        luminal_center: center,
        brightness,
        bounds,
    };

    if let Some(ov) = overlay.as_deref_mut() {
        ov.plot_rect(bounds);
    }

    if limb.radius() == 0 {
        return Err("could not locate lunar limb".to_string());
    }

    verbose_println!(
        "[limb] center ({}, {}), radius {}, brightness 0x{:04x}",
        limb.center().0,
        limb.center().1,
        limb.radius(),
        limb.brightness
    );

    Ok(limb)
}

/// The 'center of mass' of the image illumination, plus the average gray
/// level of a short strip there (used to spot very dim frames).
fn luminal_center(img: &DecodedImage) -> ((i64, i64), u16) {
    let mut sum_x: i64 = 0;
    let mut sum_y: i64 = 0;
    let mut n: i64 = 0;

    for y in 0..img.height as i64 {
        for x in 0..img.width as i64 {
            let gray = img.gray_at(x, y);
            if gray > CENTROID_GRAY_MIN && gray < CENTROID_GRAY_MAX {
                sum_x += x;
                sum_y += y;
                n += 1;
            }
        }
    }

    if n == 0 {
        return ((0, 0), 0);
    }

    let cx = sum_x / n;
    let cy = sum_y / n;

    let mut brightness: u32 = 0;
    for i in -5..5 {
        brightness += img.gray_at(cx + i, cy) as u32;
    }

    ((cx, cy), (brightness / 10) as u16)
}

/// Debug composite: overlays every layer's flood fill (in a distinct
/// color, sliced into angular segments so overlaps stay readable) plus
/// each centroid marker and limb box. Written once per run in verbose
/// mode.
pub struct LimbOverlay {
    width: usize,
    height: usize,
    rgb: Vec<u8>,
    frame: usize,
    started: bool,
    center: (i64, i64),
}

const OVERLAY_COLORS: [[u8; 3]; 7] = [
    [0xa0, 0x00, 0x00],
    [0x00, 0xa0, 0x00],
    [0x00, 0x00, 0xa0],
    [0x70, 0x70, 0x00],
    [0x70, 0x00, 0x70],
    [0x00, 0x70, 0x70],
    [0xb0, 0x30, 0x70],
];

/// How many frames share the angular slicing
const OVERLAY_MAX_FRAMES: usize = 5;

impl LimbOverlay {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width as usize,
            height: height as usize,
            rgb: vec![0; width as usize * height as usize * 3],
            frame: 0,
            started: false,
            center: (0, 0),
        }
    }

    fn color(&self) -> [u8; 3] {
        OVERLAY_COLORS[self.frame % OVERLAY_COLORS.len()]
    }

    fn start_frame(&mut self, center: (i64, i64)) {
        if self.started {
            self.frame += 1;
        } else {
            self.started = true;
            self.center = center;
        }
        self.plot_marker(center);
    }

    fn set(&mut self, x: i64, y: i64, col: [u8; 3]) {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return;
        }
        let i = (y as usize * self.width + x as usize) * 3;
        self.rgb[i..i + 3].copy_from_slice(&col);
    }

    fn plot(&mut self, x: i64, y: i64) {
        // Only draw this frame's share of the angular segments
        let theta = ((y - self.center.1) as f64).atan2((x - self.center.0) as f64);
        let deg = 180.0 + theta.to_degrees();
        let segment = (deg / 12.0) as usize;
        if segment % OVERLAY_MAX_FRAMES != self.frame % OVERLAY_MAX_FRAMES {
            return;
        }
        self.set(x, y, self.color());
    }

    fn plot_rect(&mut self, r: Rect) {
        let col = self.color();
        for x in r.min_x..r.max_x {
            self.set(x, r.min_y, col);
            self.set(x, r.max_y - 1, col);
        }
        for y in r.min_y..r.max_y {
            self.set(r.min_x, y, col);
            self.set(r.max_x - 1, y, col);
        }
    }

    fn plot_marker(&mut self, p: (i64, i64)) {
        for d in [2i64, 4, 6] {
            self.plot_rect(Rect::new(p.0 - d, p.1 - d, p.0 + d + 1, p.1 + d + 1));
        }
    }

    /// Write the composite as an 8-bit RGB PNG
    pub fn write(&self, path: &str) -> Result<(), String> {
        crate::exporters::write_png8_rgb(path, self.width as u32, self.height as u32, &self.rgb)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A synthetic totality frame: dark disc of `radius` at `(cx, cy)`,
    /// surrounded by a bright corona ring, black sky beyond.
    pub(crate) fn synthetic_eclipse(
        width: u32,
        height: u32,
        cx: i64,
        cy: i64,
        radius: i64,
    ) -> DecodedImage {
        let mut img = DecodedImage::new(width, height);
        for y in 0..height as i64 {
            for x in 0..width as i64 {
                let dx = (x - cx) as f64;
                let dy = (y - cy) as f64;
                let r = (dx * dx + dy * dy).sqrt();
                let v: u16 = if r < radius as f64 {
                    0x0010 // lunar disc: near-black
                } else if r < radius as f64 * 2.0 {
                    // corona, fading with distance
                    let fade = 1.0 - (r - radius as f64) / radius as f64;
                    (0x2000 as f64 + 0xA000 as f64 * fade) as u16
                } else {
                    0x0000 // sky
                };
                img.set_rgb(x, y, [v, v, v]);
            }
        }
        img
    }

    #[test]
    fn test_finds_centered_disc() {
        let img = synthetic_eclipse(100, 100, 50, 50, 10);
        let limb = find_lunar_limb(&img, None).unwrap();

        let (cx, cy) = limb.center();
        assert!((cx - 50).abs() <= 2, "center x = {}", cx);
        assert!((cy - 50).abs() <= 2, "center y = {}", cy);
        assert!(
            (limb.radius() - 10).abs() <= 2,
            "radius = {}",
            limb.radius()
        );
    }

    #[test]
    fn test_finds_offset_disc() {
        let img = synthetic_eclipse(120, 90, 40, 55, 12);
        let limb = find_lunar_limb(&img, None).unwrap();
        let (cx, cy) = limb.center();
        assert!((cx - 40).abs() <= 2, "center x = {}", cx);
        assert!((cy - 55).abs() <= 2, "center y = {}", cy);
    }

    #[test]
    fn test_bounds_stay_inside_image() {
        let img = synthetic_eclipse(64, 64, 8, 8, 6); // disc near the corner
        let limb = find_lunar_limb(&img, None).unwrap();
        let b = limb.bounds;
        assert!(b.min_x >= 0 && b.min_y >= 0);
        assert!(b.max_x <= 64 && b.max_y <= 64);
    }

    #[test]
    fn test_featureless_image_fails() {
        // Uniform brightness: the centroid lands on a bright pixel and
        // the fill never grows
        let mut img = DecodedImage::new(32, 32);
        for y in 0..32 {
            for x in 0..32 {
                img.set_rgb(x, y, [0x4000, 0x4000, 0x4000]);
            }
        }
        assert!(find_lunar_limb(&img, None).is_err());
    }
}
