//! Corona Core Library
//!
//! Fuses a stack of bracketed exposures of a total solar eclipse into a
//! single HDR image, then tone-maps it down to a displayable LDR image.
//! The stages are: lunar-limb alignment, per-pixel exposure fusion in
//! linear radiometric units, DNG-style color development, and
//! gradient-domain (Fattal '02) tone mapping.

pub mod align;
pub mod color;
pub mod config;
pub mod decoders;
pub mod develop;
pub mod diagnostics;
pub mod exporters;
pub mod exposure;
pub mod fuse;
pub mod limb;
pub mod math;
pub mod pipeline;
pub mod tonemap;

// Re-export commonly used types
pub use align::AlignmentTransform;
pub use color::CameraNative;
pub use config::{Config, Developer, Fuser, Rendering, Tonemapper};
pub use exposure::ExposureValue;
pub use limb::LunarLimb;
pub use pipeline::{FusedImage, Layer};
