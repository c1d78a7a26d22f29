//! Pipeline orchestration
//!
//! `FusedImage` owns the layer stack and the output pixel buffer, and
//! drives the stages in order: limb detection and alignment, per-pixel
//! fusion, the global radiometric rescale, color development, tone
//! mapping, and the final publish.

use std::path::Path;

use rayon::prelude::*;

use crate::align::{self, AlignmentTransform, DiffContext};
use crate::color::{gamma_expand_rgb, make_camera_to_pcs, CameraNative};
use crate::config::{is_verbose, Config};
use crate::decoders::{DecodedImage, LoadedFrame};
use crate::develop::develop_pixel;
use crate::diagnostics::buffer_stats;
use crate::exporters;
use crate::exposure::ExposureValue;
use crate::fuse::fuse_pixel;
use crate::limb::{self, LimbOverlay, LunarLimb};
use crate::math::{Mat3, Rect, Vec3};
use crate::tonemap::{self, TonemappedImage};
use crate::verbose_println;

/// Sun radius is the lunar radius plus this; during totality they are
/// within a percent of each other
const SOLAR_RADIUS_MARGIN: i64 = 3;

/// One input photo with everything needed to fuse it
#[derive(Debug, Clone)]
pub struct Layer {
    pub filename: String,
    pub original: DecodedImage,
    pub exposure: ExposureValue,

    /// Per-image color metadata, present when the source was a DNG
    pub camera_white: Option<Vec3>,
    pub forward_matrix: Option<Mat3>,

    /// Where the moon is in this photo
    pub limb: Option<LunarLimb>,

    /// How to map this layer onto the base layer
    pub transform: AlignmentTransform,

    /// The transformed image; a pixel at (x, y) here relates to the
    /// same bit of sky on every layer. `None` until aligned (the base
    /// layer never needs it).
    aligned: Option<DecodedImage>,
}

impl Layer {
    pub fn from_frame(frame: LoadedFrame) -> Self {
        Self {
            filename: frame.filename,
            original: frame.image,
            exposure: frame.exposure,
            camera_white: frame.camera_white,
            forward_matrix: frame.forward_matrix,
            limb: None,
            transform: AlignmentTransform::default(),
            aligned: None,
        }
    }

    /// The aligned image, falling back to the original for the base
    /// layer and unaligned runs
    pub fn aligned(&self) -> &DecodedImage {
        self.aligned.as_ref().unwrap_or(&self.original)
    }

    pub fn describe(&self) -> String {
        format!(
            "{}: {}, {}, lunar radius {}",
            self.filename,
            self.exposure,
            self.transform.describe(),
            self.limb.map(|l| l.radius()).unwrap_or(0),
        )
    }
}

/// One output pixel as it moves through the stages
#[derive(Debug, Clone, Copy, Default)]
struct Pixel {
    fused: CameraNative,
    layer_number: usize,
    developed: Vec3,
}

/// The layer stack plus the fused output buffer
pub struct FusedImage {
    pub config: Config,
    pub layers: Vec<Layer>,

    /// Which pixels we care about in the (aligned) source images
    pub input_area: Rect,

    /// The bounding box for the output; `input_area` shifted to origin
    pub output_area: Rect,

    pixels: Vec<Pixel>,
    camera_white: Vec3,
    camera_to_pcs: Mat3,
}

impl FusedImage {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            layers: Vec::new(),
            input_area: Rect::default(),
            output_area: Rect::default(),
            pixels: Vec::new(),
            camera_white: [1.0; 3],
            camera_to_pcs: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        }
    }

    /// Add a layer, keeping the stack sorted ascending by EV (largest
    /// exposures first)
    pub fn add_layer(&mut self, frame: LoadedFrame) {
        self.layers.push(Layer::from_frame(frame));
        self.layers.sort_by_key(|l| l.exposure.ev);
    }

    /// Decide where the color-correction data comes from: the base
    /// layer's DNG metadata when present, else the manual overrides in
    /// the config. Fatal when neither exists.
    pub fn resolve_color(&mut self) -> Result<(), String> {
        if self.layers.is_empty() {
            return Err("no input layers loaded".to_string());
        }

        let base = &self.layers[0];
        if let (Some(white), Some(forward)) = (base.camera_white, base.forward_matrix) {
            eprintln!(
                "[color] taking CameraWhite/CameraToPCS from DNG data in {}",
                base.filename
            );
            self.camera_white = white;
            self.camera_to_pcs = make_camera_to_pcs(white, &forward);
            return Ok(());
        }

        if let (Some(white), Some(forward)) = (self.config.as_shot_neutral, self.config.forward_matrix)
        {
            eprintln!("[color] taking CameraWhite/CameraToPCS from manual config overrides");
            self.camera_white = white;
            self.camera_to_pcs = make_camera_to_pcs(white, &forward);
            return Ok(());
        }

        Err(
            "no color correction info; need DNG inputs, or as_shot_neutral + forward_matrix \
             in the config YAML"
                .to_string(),
        )
    }

    /// Figure out how to align the layers, and generate the transformed
    /// image for each one
    pub fn align(&mut self) -> Result<(), String> {
        eprintln!("[align] aligning {} image layers", self.layers.len());

        if self.config.rendering.align_eclipse {
            let mut overlay = if is_verbose() {
                let base = &self.layers[0].original;
                Some(LimbOverlay::new(base.width, base.height))
            } else {
                None
            };

            for layer in self.layers.iter_mut() {
                let found = limb::find_lunar_limb(&layer.original, overlay.as_mut())
                    .map_err(|e| format!("{}: {}", layer.filename, e))?;
                layer.limb = Some(found);
            }

            if let Some(ov) = overlay {
                ov.write("010-lunarlimb-composite.png")?;
            }

            self.input_area = self.calculate_input_area();

            for i in 1..self.layers.len() {
                self.align_layer(i)?;
            }

            if self.config.rendering.fine_tune {
                eprintln!(
                    "[align] fine tune alignments:\n\n{}",
                    self.config.as_yaml()
                );
            }
        } else {
            self.input_area = self.layers[0].original.bounds();
        }

        self.output_area = Rect::from_size(self.input_area.dx(), self.input_area.dy());

        for layer in &self.layers {
            eprintln!("[align]   {}", layer.describe());
        }

        Ok(())
    }

    /// A square around the base layer's solar disc, sized by the
    /// configured output width
    fn calculate_input_area(&self) -> Rect {
        let limb = self.layers[0].limb.expect("align() detects limbs first");
        let (cx, cy) = limb.center();
        let radius = limb.radius() + SOLAR_RADIUS_MARGIN;
        let width =
            (radius as f64 * self.config.rendering.output_width_in_solar_diameters) as i64;

        Rect::new(cx - width, cy - width, cx + width, cy + width)
    }

    /// Work out the transform for one non-base layer and resample it
    fn align_layer(&mut self, index: usize) -> Result<(), String> {
        let name = format!(
            "{}-{}",
            self.layers[0].filename, self.layers[index].filename
        );

        let base_limb = self.layers[0].limb.expect("limbs found before alignment");
        let layer_limb = self.layers[index].limb.expect("limbs found before alignment");

        let coarse =
            align::coarse_transform(name.clone(), base_limb.center(), layer_limb.center());

        let xform = if self.config.rendering.fine_tune {
            let ctx = DiffContext {
                base_image: &self.layers[0].original,
                cand_image: &self.layers[index].original,
                input_area: self.input_area,
                base_ev: self.layers[0].exposure,
                cand_ev: self.layers[index].exposure,
                camera_to_pcs: self.camera_to_pcs,
            };
            let tuned = align::fine_tune(
                &ctx,
                base_limb.radius(),
                layer_limb.radius(),
                coarse,
            );
            self.config.alignments.insert(name, tuned.clone());
            tuned
        } else if let Some(cached) = self.config.alignments.get(&name) {
            eprintln!(
                "[align] using fine alignment from config: {}",
                cached.describe()
            );
            cached.clone()
        } else {
            coarse
        };

        let layer = &mut self.layers[index];
        layer.aligned = Some(align::resample(&layer.original, &xform));
        layer.transform = xform;
        Ok(())
    }

    /// Fuse every output pixel from the aligned layers, then rescale the
    /// whole buffer to a common saturation illuminance so tone mapping
    /// sees physically comparable values
    pub fn fuse(&mut self) -> Result<(), String> {
        if self.layers.is_empty() {
            return Err("no input layers loaded".to_string());
        }

        let out_w = self.output_area.dx() as usize;
        let out_h = self.output_area.dy() as usize;
        eprintln!(
            "[fuse] fusing {} layers over {}x{}",
            self.layers.len(),
            out_w,
            out_h
        );

        let layers = &self.layers;
        let input_area = self.input_area;
        let output_area = self.output_area;
        let fuser = self.config.rendering.fuser;
        let fuser_luminance = self.config.rendering.fuser_luminance;

        let mut pixels = vec![Pixel::default(); out_w * out_h];

        pixels
            .par_chunks_mut(out_w)
            .enumerate()
            .for_each(|(y, row)| {
                let mut inputs: Vec<CameraNative> = Vec::with_capacity(layers.len());
                for (x, px) in row.iter_mut().enumerate() {
                    inputs.clear();
                    for layer in layers {
                        let rgb = layer.aligned().rgb_at(
                            x as i64 + input_area.min_x,
                            y as i64 + input_area.min_y,
                        );
                        inputs
                            .push(CameraNative::from_u16(rgb, layer.exposure.illum_at_max));
                    }

                    let fused = fuse_pixel(
                        fuser,
                        &inputs,
                        (x as i64, y as i64),
                        output_area,
                        fuser_luminance,
                    );
                    px.fused = fused.fused;
                    px.layer_number = fused.layer_number;
                }
            });

        // The global rescale: every pixel ends up expressed against the
        // same saturation illuminance
        let global_illum = pixels
            .iter()
            .map(|p| p.fused.illum_at_max)
            .fold(0.0, f64::max);
        for px in pixels.iter_mut() {
            px.fused.rescale_to_illum(global_illum);
        }

        verbose_println!("[fuse] global illuminance-at-max: {:.0} lux", global_illum);

        self.pixels = pixels;
        Ok(())
    }

    /// Color-correct the fused buffer
    pub fn develop(&mut self) {
        let developer = self.config.rendering.developer;
        eprintln!("[develop] {:?}", developer);

        let camera_white = self.camera_white;
        let camera_to_pcs = self.camera_to_pcs;

        self.pixels.par_iter_mut().for_each(|px| {
            px.developed = develop_pixel(
                developer,
                &px.fused,
                px.layer_number,
                &camera_white,
                &camera_to_pcs,
            );
        });

        if is_verbose() {
            let developed: Vec<Vec3> = self.pixels.iter().map(|p| p.developed).collect();
            let (min, max, mean) = buffer_stats(&developed);
            eprintln!(
                "[develop] buffer stats: min {:.6}, max {:.6}, mean {:.6}",
                min, max, mean
            );
        }

        let debug_pixels = self.config.rendering.debug_pixels.clone();
        for (x, y) in debug_pixels {
            self.trace_pixel(x, y);
        }
    }

    /// Write the developed floating-point buffer as a Radiance HDR file
    pub fn write_hdr<P: AsRef<Path>>(&self, path: P) -> Result<(), String> {
        let developed: Vec<Vec3> = self.pixels.iter().map(|p| p.developed).collect();
        exporters::write_hdr(
            path,
            self.output_area.dx() as u32,
            self.output_area.dy() as u32,
            &developed,
        )
    }

    /// Tone-map with every selected operator, writing one PNG each.
    /// Publish applies sRGB gamma (unless the operator already did) and
    /// the 16-bit quantization happens in the encoder.
    pub fn tonemap_and_publish<P: AsRef<Path>>(&self, out_dir: P) -> Result<(), String> {
        let developed: Vec<Vec3> = self.pixels.iter().map(|p| p.developed).collect();
        let width = self.output_area.dx() as usize;
        let height = self.output_area.dy() as usize;

        for op in self.config.rendering.tonemapper.selected() {
            eprintln!("[tonemap] {}", op.name());
            let mapped = tonemap::tonemap(
                op,
                &self.config.rendering.fattal,
                width,
                height,
                &developed,
            );

            let path = out_dir.as_ref().join(format!("tmo-{}.png", op.name()));
            self.publish(&mapped, &path)?;
        }

        Ok(())
    }

    fn publish(&self, mapped: &TonemappedImage, path: &Path) -> Result<(), String> {
        let pixels: Vec<Vec3> = if mapped.gamma_encoded {
            mapped.pixels.clone()
        } else {
            mapped
                .pixels
                .iter()
                .map(|&px| {
                    gamma_expand_rgb([
                        px[0].clamp(0.0, 1.0),
                        px[1].clamp(0.0, 1.0),
                        px[2].clamp(0.0, 1.0),
                    ])
                })
                .collect()
        };

        exporters::write_png16(
            path,
            mapped.width as u32,
            mapped.height as u32,
            &pixels,
        )?;
        eprintln!("[publish] wrote {}", path.display());
        Ok(())
    }

    /// The whole pipeline, in order
    pub fn run<P: AsRef<Path>>(&mut self, out_dir: P) -> Result<(), String> {
        let out_dir = out_dir.as_ref();

        self.resolve_color()?;
        self.align()?;
        self.fuse()?;
        self.develop();
        self.write_hdr(out_dir.join("fused.hdr"))?;
        self.tonemap_and_publish(out_dir)?;

        Ok(())
    }

    /// Print one output pixel's journey through the stages
    fn trace_pixel(&self, x: i64, y: i64) {
        if !self.output_area.contains(x, y) {
            eprintln!("[trace] pixel ({}, {}) outside output area", x, y);
            return;
        }

        let px = &self.pixels[(y * self.output_area.dx() + x) as usize];
        eprintln!("----- pixel @({}, {}) -----", x, y);
        for (i, layer) in self.layers.iter().enumerate() {
            let rgb = layer
                .aligned()
                .rgb_at(x + self.input_area.min_x, y + self.input_area.min_y);
            eprintln!(
                "  layer {} raw     : [0x{:04X}, 0x{:04X}, 0x{:04X}] @{:.0} lux",
                i, rgb[0], rgb[1], rgb[2], layer.exposure.illum_at_max
            );
        }
        eprintln!(
            "  fused (layer {}) : [{:.10}, {:.10}, {:.10}] @{:.0} lux",
            px.layer_number,
            px.fused.rgb[0],
            px.fused.rgb[1],
            px.fused.rgb[2],
            px.fused.illum_at_max
        );
        eprintln!(
            "  developed       : [{:.10}, {:.10}, {:.10}]",
            px.developed[0], px.developed[1], px.developed[2]
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Developer, Fuser};
    use crate::exposure::Rational;

    fn frame_from_image(
        name: &str,
        image: DecodedImage,
        iso: i64,
        shutter: Rational,
    ) -> LoadedFrame {
        let mut exposure = ExposureValue::new(iso, 56, shutter);
        exposure.validate().unwrap();
        LoadedFrame {
            filename: name.to_string(),
            image,
            exposure,
            camera_white: Some([1.0, 1.0, 1.0]),
            forward_matrix: Some([1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]),
        }
    }

    fn flat_image(width: u32, height: u32, level: u16) -> DecodedImage {
        let mut img = DecodedImage::new(width, height);
        for y in 0..height as i64 {
            for x in 0..width as i64 {
                img.set_rgb(x, y, [level, level, level]);
            }
        }
        img
    }

    fn two_layer_stack() -> FusedImage {
        let mut config = Config::default();
        config.rendering.align_eclipse = false;
        config.rendering.developer = Developer::None;

        let mut fi = FusedImage::new(config);
        // Added out of EV order on purpose
        fi.add_layer(frame_from_image(
            "short",
            flat_image(16, 16, 0x2000),
            100,
            Rational(1, 4000), // EV 17
        ));
        fi.add_layer(frame_from_image(
            "long",
            flat_image(16, 16, 0x8000),
            100,
            Rational(1, 125), // EV 12
        ));
        fi
    }

    #[test]
    fn test_layers_sorted_ascending_ev() {
        let fi = two_layer_stack();
        assert_eq!(fi.layers[0].filename, "long");
        assert_eq!(fi.layers[1].filename, "short");
        assert!(fi.layers[0].exposure.ev <= fi.layers[1].exposure.ev);
    }

    #[test]
    fn test_fuse_rescales_to_common_illuminance() {
        let mut fi = two_layer_stack();
        fi.resolve_color().unwrap();
        fi.align().unwrap();
        fi.fuse().unwrap();

        // Every pixel fused from the long exposure (EV 12, 10240 lux);
        // the buffer-wide maximum is therefore 10240 and every pixel
        // must be expressed against it
        let illum = fi.pixels[0].fused.illum_at_max;
        assert!((illum - 10240.0).abs() < 1e-6, "illum {}", illum);
        assert!(fi
            .pixels
            .iter()
            .all(|p| (p.fused.illum_at_max - illum).abs() < 1e-6));
    }

    #[test]
    fn test_fuse_picks_most_exposed_clean_layer() {
        let mut fi = two_layer_stack();
        fi.config.rendering.fuser = Fuser::MostExposed;
        fi.resolve_color().unwrap();
        fi.align().unwrap();
        fi.fuse().unwrap();

        // The long exposure (0x8000 = 0.5 < 0.8) wins everywhere
        assert!(fi.pixels.iter().all(|p| p.layer_number == 0));
    }

    #[test]
    fn test_fuse_skips_blown_long_exposure() {
        let mut config = Config::default();
        config.rendering.align_eclipse = false;
        config.rendering.developer = Developer::None;

        let mut fi = FusedImage::new(config);
        fi.add_layer(frame_from_image(
            "long",
            flat_image(8, 8, 0xF000), // blown: 0.94 > 0.8
            100,
            Rational(1, 125),
        ));
        fi.add_layer(frame_from_image(
            "short",
            flat_image(8, 8, 0x3000),
            100,
            Rational(1, 4000),
        ));

        fi.resolve_color().unwrap();
        fi.align().unwrap();
        fi.fuse().unwrap();

        // Layer 0 (long) is over-exposed; layer 1 must be chosen
        assert!(fi.pixels.iter().all(|p| p.layer_number == 1));
    }

    #[test]
    fn test_develop_none_keeps_fused_values() {
        let mut fi = two_layer_stack();
        fi.resolve_color().unwrap();
        fi.align().unwrap();
        fi.fuse().unwrap();
        fi.develop();

        let px = &fi.pixels[0];
        for c in 0..3 {
            assert!((px.developed[c] - px.fused.rgb[c]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_missing_color_info_is_fatal() {
        let mut config = Config::default();
        config.rendering.align_eclipse = false;

        let mut fi = FusedImage::new(config);
        let mut frame = frame_from_image("bare", flat_image(8, 8, 0x2000), 100, Rational(1, 500));
        frame.camera_white = None;
        frame.forward_matrix = None;
        fi.add_layer(frame);

        assert!(fi.resolve_color().is_err());
    }

    #[test]
    fn test_input_area_from_limb() {
        use crate::limb::tests::synthetic_eclipse;

        let mut config = Config::default();
        config.rendering.align_eclipse = true;
        config.rendering.output_width_in_solar_diameters = 2.0;
        config.rendering.developer = Developer::None;

        let mut fi = FusedImage::new(config);
        fi.add_layer(frame_from_image(
            "only",
            synthetic_eclipse(200, 200, 100, 100, 20),
            100,
            Rational(1, 500),
        ));

        fi.resolve_color().unwrap();
        fi.align().unwrap();

        // Half-side = (radius + 3) * 2; radius detects as ~19-20
        let half = fi.input_area.dx() / 2;
        assert!((40..=50).contains(&half), "half-side {}", half);
        let (cx, cy) = fi.input_area.center();
        assert!((cx - 100).abs() <= 2 && (cy - 100).abs() <= 2);

        // Output area is the input area shifted to origin
        assert_eq!(fi.output_area.min_x, 0);
        assert_eq!(fi.output_area.dx(), fi.input_area.dx());
    }
}
