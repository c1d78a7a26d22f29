//! Run configuration
//!
//! The YAML config carries manual color-correction overrides (for when
//! the inputs are TIFFs without DNG color metadata), cached alignment
//! transforms from earlier fine-tune runs, and the rendering options.
//! Strategy names are parsed into enums here, before the pipeline runs.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::align::AlignmentTransform;
use crate::tonemap::FattalParams;

// Global verbose flag for controlling debug output and grid dumps
static VERBOSE: AtomicBool = AtomicBool::new(false);

/// Set the global verbose flag. When true, stage diagnostics are printed
/// and intermediate grids are dumped as grayscale PNGs.
pub fn set_verbose(verbose: bool) {
    VERBOSE.store(verbose, Ordering::SeqCst);
}

/// Check if verbose mode is enabled.
pub fn is_verbose() -> bool {
    VERBOSE.load(Ordering::SeqCst)
}

/// Print a message to stderr only if verbose mode is enabled.
#[macro_export]
macro_rules! verbose_println {
    ($($arg:tt)*) => {
        if $crate::config::is_verbose() {
            eprintln!($($arg)*);
        }
    };
}

/// Per-pixel exposure-fusion policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Fuser {
    /// Pick the most-exposed layer that isn't over-exposed at this pixel
    #[default]
    MostExposed,
    /// Pie-slice the image by source layer; alignment diagnostic
    Sector,
    /// Average the non-over-exposed layers; shows fringes, diagnostic
    Average,
}

impl FromStr for Fuser {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mostexposed" | "most-exposed" => Ok(Self::MostExposed),
            "sector" => Ok(Self::Sector),
            "avg" | "average" => Ok(Self::Average),
            _ => Err(format!("no fuser strategy named '{}'", s)),
        }
    }
}

/// Color development policy applied to the fused HDR pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Developer {
    /// DNG white balance + forward matrix + XYZ(D50)->linear sRGB(D65)
    #[default]
    Dng,
    /// Divide by the camera white only
    WhiteBalanceOnly,
    /// Pass the camera-native value through
    None,
    /// Color-key the output by source layer; debug
    ByLayer,
}

impl FromStr for Developer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dng" => Ok(Self::Dng),
            "wb" | "white-balance-only" => Ok(Self::WhiteBalanceOnly),
            "none" | "" => Ok(Self::None),
            "layer" | "by-layer" => Ok(Self::ByLayer),
            _ => Err(format!("no developer strategy named '{}'", s)),
        }
    }
}

/// HDR -> LDR tone mapping operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Tonemapper {
    /// Fattal '02 gradient-domain compression
    #[default]
    Fattal02,
    /// Pass-through; publish applies gamma and clipping
    Linear,
    /// Run every operator, one output file each
    All,
}

impl Tonemapper {
    /// The concrete operators this selection expands to
    pub fn selected(&self) -> Vec<Tonemapper> {
        match self {
            Tonemapper::All => vec![Tonemapper::Fattal02, Tonemapper::Linear],
            other => vec![*other],
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Tonemapper::Fattal02 => "fattal02",
            Tonemapper::Linear => "linear",
            Tonemapper::All => "all",
        }
    }
}

impl FromStr for Tonemapper {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fattal02" => Ok(Self::Fattal02),
            "linear" => Ok(Self::Linear),
            "all" => Ok(Self::All),
            _ => Err(format!(
                "tonemapper '{}' not recognized, wanted fattal02|linear|all",
                s
            )),
        }
    }
}

/// Rendering options (the `rendering:` YAML section)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Rendering {
    /// Assume the pictures are of an eclipse and align on the lunar limb
    pub align_eclipse: bool,

    /// Run the slow exhaustive (dx, dy, theta) alignment search
    pub fine_tune: bool,

    pub fuser: Fuser,
    pub developer: Developer,
    pub tonemapper: Tonemapper,

    /// A layer is discarded during fusion if its luminance exceeds this
    pub fuser_luminance: f64,

    /// Half-width of the output crop, in solar diameters
    pub output_width_in_solar_diameters: f64,

    /// Fattal '02 parameters, pre-tuned for eclipse shots
    pub fattal: FattalParams,

    /// Output-coordinate pixels to trace through the fusion stages
    pub debug_pixels: Vec<(i64, i64)>,
}

impl Default for Rendering {
    fn default() -> Self {
        Self {
            align_eclipse: true,
            fine_tune: false,
            fuser: Fuser::default(),
            developer: Developer::default(),
            tonemapper: Tonemapper::default(),
            fuser_luminance: 0.8,
            output_width_in_solar_diameters: 4.0,
            fattal: FattalParams::eclipse(),
            debug_pixels: Vec::new(),
        }
    }
}

impl Rendering {
    pub(crate) fn sanitize(&mut self) {
        if !(self.fuser_luminance > 0.0 && self.fuser_luminance <= 1.0) {
            self.fuser_luminance = 0.8;
        }
        self.output_width_in_solar_diameters =
            self.output_width_in_solar_diameters.clamp(1.0, 20.0);
        self.fattal.sanitize();
    }
}

/// Complete configuration file structure. Unknown keys are ignored.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Manual white point, for when the inputs carry no DNG color data.
    /// These values are found in the output of `dng_validate -v`.
    pub as_shot_neutral: Option<[f64; 3]>,

    /// Manual forward matrix (row-major), ideally the one for the D65
    /// illuminant
    pub forward_matrix: Option<[f64; 9]>,

    /// Fine-tune alignment results, keyed by layer pair, reusable
    /// across runs
    pub alignments: BTreeMap<String, AlignmentTransform>,

    pub rendering: Rendering,
}

impl Config {
    pub fn from_yaml(contents: &str) -> Result<Config, String> {
        let mut config: Config = serde_yaml::from_str(contents)
            .map_err(|e| format!("failed to parse config YAML: {}", e))?;
        config.rendering.sanitize();
        Ok(config)
    }

    /// Serialize, so learned alignments can be pasted back into the
    /// config file
    pub fn as_yaml(&self) -> String {
        serde_yaml::to_string(self).unwrap_or_else(|e| format!("# unserializable config: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_roundtrip() {
        let config = Config::default();
        let yaml = config.as_yaml();
        let back = Config::from_yaml(&yaml).unwrap();
        assert_eq!(back.rendering.fuser, Fuser::MostExposed);
        assert_eq!(back.rendering.developer, Developer::Dng);
        assert!((back.rendering.fuser_luminance - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_parse_rendering_options() {
        let yaml = r#"
as_shot_neutral: [0.5010, 1.0, 0.7014]
rendering:
  fuser: average
  developer: white-balance-only
  tonemapper: linear
  fuser_luminance: 0.6
  fine_tune: true
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.rendering.fuser, Fuser::Average);
        assert_eq!(config.rendering.developer, Developer::WhiteBalanceOnly);
        assert_eq!(config.rendering.tonemapper, Tonemapper::Linear);
        assert!(config.rendering.fine_tune);
        assert!((config.rendering.fuser_luminance - 0.6).abs() < 1e-12);
        let neutral = config.as_shot_neutral.unwrap();
        assert!((neutral[0] - 0.5010).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let yaml = r#"
some_future_option: 42
rendering:
  fuser: sector
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.rendering.fuser, Fuser::Sector);
    }

    #[test]
    fn test_sanitize_out_of_range_luminance() {
        let yaml = r#"
rendering:
  fuser_luminance: 7.5
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert!((config.rendering.fuser_luminance - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!(Fuser::from_str("mostexposed").unwrap(), Fuser::MostExposed);
        assert_eq!(Fuser::from_str("avg").unwrap(), Fuser::Average);
        assert!(Fuser::from_str("bogus").is_err());

        assert_eq!(Developer::from_str("dng").unwrap(), Developer::Dng);
        assert_eq!(Developer::from_str("wb").unwrap(), Developer::WhiteBalanceOnly);

        assert_eq!(
            Tonemapper::from_str("fattal02").unwrap(),
            Tonemapper::Fattal02
        );
        assert_eq!(
            Tonemapper::from_str("all").unwrap().selected(),
            vec![Tonemapper::Fattal02, Tonemapper::Linear]
        );
    }
}
