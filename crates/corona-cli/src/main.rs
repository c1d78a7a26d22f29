use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::Parser;

use corona_core::config::{set_verbose, Config};
use corona_core::decoders::load_frame;
use corona_core::pipeline::FusedImage;

#[derive(Parser)]
#[command(name = "corona")]
#[command(version, about = "Fuse bracketed eclipse exposures into a tone-mapped HDR image", long_about = None)]
struct Cli {
    /// Input images (.tif/.dng), config files (.yaml), or directories
    /// to expand recursively
    #[arg(value_name = "INPUTS", required = true)]
    inputs: Vec<PathBuf>,

    /// Output directory for fused.hdr and the tone-mapped PNGs
    #[arg(short, long, value_name = "DIR", default_value = ".")]
    out: PathBuf,

    /// Width of the output image, in solar diameters
    #[arg(long, value_name = "FLOAT")]
    width: Option<f64>,

    /// Skip lunar-limb detection and alignment (equatorial-mount shots)
    #[arg(long)]
    no_align: bool,

    /// Run the very slow exhaustive alignment search
    #[arg(long)]
    fine_tune: bool,

    /// How to fuse the exposures: mostexposed, sector, or avg
    #[arg(long, value_name = "NAME")]
    fuser: Option<String>,

    /// How to develop the color: dng, wb, none, or layer
    #[arg(long, value_name = "NAME")]
    developer: Option<String>,

    /// How to tone-map from HDR to LDR: fattal02, linear, or all
    #[arg(long, value_name = "NAME")]
    tonemapper: Option<String>,

    /// Layer discarded during fusion if pixel luminance exceeds this
    #[arg(long, value_name = "FLOAT")]
    fuser_luminance: Option<f64>,

    /// Enable verbose output and intermediate grid dumps
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("corona: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let cli = Cli::parse();
    set_verbose(cli.verbose);

    let files = expand_inputs(&cli.inputs)?;

    // Config files apply first (last one wins), so command-line flags
    // can override them below
    let mut config = Config::default();
    for path in files.iter().filter(|p| is_config(p)) {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("{}: read failed: {}", path.display(), e))?;
        config = Config::from_yaml(&contents)
            .map_err(|e| format!("{}: {}", path.display(), e))?;
        eprintln!("[config] loaded {}", path.display());
    }

    apply_flags(&cli, &mut config)?;

    let mut fused = FusedImage::new(config);

    let image_files: Vec<&PathBuf> = files.iter().filter(|p| is_image(p)).collect();
    if image_files.is_empty() {
        return Err("no input images given (want .tif or .dng files)".to_string());
    }

    let start = Instant::now();
    for path in image_files {
        let frame = load_frame(path)?;
        eprintln!("[load] {}: {}", frame.filename, frame.exposure);
        fused.add_layer(frame);
    }
    eprintln!(
        "[load] {} layers in {:.1}s",
        fused.layers.len(),
        start.elapsed().as_secs_f64()
    );

    std::fs::create_dir_all(&cli.out)
        .map_err(|e| format!("{}: create failed: {}", cli.out.display(), e))?;

    let start = Instant::now();
    fused.run(&cli.out)?;
    eprintln!("[done] pipeline in {:.1}s", start.elapsed().as_secs_f64());

    Ok(())
}

fn apply_flags(cli: &Cli, config: &mut Config) -> Result<(), String> {
    let rendering = &mut config.rendering;

    if cli.no_align {
        rendering.align_eclipse = false;
    }
    if cli.fine_tune {
        rendering.fine_tune = true;
    }
    if let Some(width) = cli.width {
        rendering.output_width_in_solar_diameters = width;
    }
    if let Some(lum) = cli.fuser_luminance {
        rendering.fuser_luminance = lum;
    }
    if let Some(name) = &cli.fuser {
        rendering.fuser = name.parse()?;
    }
    if let Some(name) = &cli.developer {
        rendering.developer = name.parse()?;
    }
    if let Some(name) = &cli.tonemapper {
        rendering.tonemapper = name.parse()?;
    }

    Ok(())
}

/// Recursively expand directories into their files, keeping everything
/// in a deterministic order
fn expand_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>, String> {
    let mut out = Vec::new();
    for input in inputs {
        expand_one(input, &mut out)?;
    }
    Ok(out)
}

fn expand_one(path: &Path, out: &mut Vec<PathBuf>) -> Result<(), String> {
    let meta = std::fs::metadata(path)
        .map_err(|e| format!("{}: {}", path.display(), e))?;

    if meta.is_dir() {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(path)
            .map_err(|e| format!("{}: readdir failed: {}", path.display(), e))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .collect();
        entries.sort();
        for entry in entries {
            expand_one(&entry, out)?;
        }
    } else {
        out.push(path.to_path_buf());
    }

    Ok(())
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default()
}

fn is_image(path: &Path) -> bool {
    matches!(extension_of(path).as_str(), "tif" | "tiff" | "dng")
}

fn is_config(path: &Path) -> bool {
    matches!(extension_of(path).as_str(), "yaml" | "yml")
}
