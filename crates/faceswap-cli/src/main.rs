use anyhow::{Context, Result};
use clap::Parser;
use faceswap_core::{
    CodeFormer, CodeFormerRestorer, FaceAnalyser, FaceDetector, InSwapper, IndexSelection, Pipeline,
    RestoreOptions, SwapOutcome, SwapRequest, Upsampler,
};
use image::RgbImage;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser, Debug)]
#[command(name = "faceswap", about = "Swap face identities from source images onto a target image")]
struct Cli {
    /// Source image(s). With several, image i feeds target face i (left to right).
    #[arg(short, long, num_args = 1.., required = true)]
    source: Vec<PathBuf>,

    /// Target image whose faces are replaced
    #[arg(short, long)]
    target: PathBuf,

    /// Source face positions, e.g. "0,1", or -1 for all
    #[arg(long, default_value = "-1", allow_hyphen_values = true)]
    source_indexes: IndexSelection,

    /// Target face positions, e.g. "1,0", or -1 for all
    #[arg(long, default_value = "-1", allow_hyphen_values = true)]
    target_indexes: IndexSelection,

    /// Run CodeFormer restoration on the swapped image
    #[arg(long)]
    face_restore: bool,

    /// Upsample the background with Real-ESRGAN (requires --face-restore)
    #[arg(long)]
    background_enhance: bool,

    /// Upsample restored faces with Real-ESRGAN (requires --face-restore)
    #[arg(long)]
    face_upsample: bool,

    /// Output scale factor, 1 to 4 (requires --face-restore)
    #[arg(long, default_value_t = 1)]
    upscale: u32,

    /// CodeFormer fidelity: 0 favours quality, 1 favours identity
    #[arg(long, default_value_t = 0.5)]
    codeformer_fidelity: f32,

    /// Where to write the result
    #[arg(short, long, default_value = "result.png")]
    output: PathBuf,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory containing the ONNX models (overrides config and FACESWAP_MODEL_DIR)
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// Print the resolved swap pairs as JSON on stdout
    #[arg(long)]
    report: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(dir) = &cli.model_dir {
        config.model_dir = dir.clone();
    }
    tracing::debug!(?config, "configuration resolved");

    let restore = restore_options(&cli)?;

    let sources = cli
        .source
        .iter()
        .map(|path| load_image(path))
        .collect::<Result<Vec<_>>>()?;
    let target = load_image(&cli.target)?;

    let mut analyser = FaceAnalyser::load(
        &config.detector_model_path(),
        &config.recognizer_model_path(),
        config.detector_options(),
    )
    .context("failed to load face analysis models")?;
    let mut swapper = InSwapper::load(&config.swapper_model_path(), &config.emap_path(), config.intra_threads)
        .context("failed to load face swap model")?;
    let mut restorer = match &restore {
        Some(options) => Some(load_restorer(&config, options)?),
        None => None,
    };

    let mut pipeline = Pipeline::new(&mut analyser, &mut swapper);
    if let Some(restorer) = restorer.as_mut() {
        pipeline = pipeline.with_restorer(restorer);
    }

    let request = SwapRequest {
        sources: &sources,
        target: &target,
        source_selection: &cli.source_indexes,
        target_selection: &cli.target_indexes,
        restore,
    };

    match pipeline.run(&request)? {
        SwapOutcome::Swapped { image, resolution } => {
            image
                .save(&cli.output)
                .with_context(|| format!("failed to write {}", cli.output.display()))?;
            tracing::info!(
                output = %cli.output.display(),
                swaps = resolution.pairs.len(),
                "result written"
            );
            if cli.report {
                println!("{}", serde_json::to_string_pretty(&resolution)?);
            }
        }
        SwapOutcome::NoTargetFaces => {
            println!("No target faces found; nothing written.");
        }
    }

    Ok(())
}

/// Restoration settings, or `None` when `--face-restore` is off.
fn restore_options(cli: &Cli) -> Result<Option<RestoreOptions>> {
    if !cli.face_restore {
        if cli.background_enhance || cli.face_upsample || cli.upscale != 1 {
            tracing::warn!("--background-enhance, --face-upsample and --upscale have no effect without --face-restore");
        }
        return Ok(None);
    }
    let options = RestoreOptions::new(
        cli.background_enhance,
        cli.face_upsample,
        cli.upscale,
        cli.codeformer_fidelity,
    )?;
    Ok(Some(options))
}

fn load_restorer(config: &Config, options: &RestoreOptions) -> Result<CodeFormerRestorer> {
    let detector = FaceDetector::load(&config.detector_model_path(), config.detector_options())
        .context("failed to load restoration face detector")?;
    let codeformer = CodeFormer::load(&config.codeformer_model_path(), config.intra_threads)
        .context("failed to load CodeFormer model")?;

    let upsampler = if options.background_enhance || options.face_upsample {
        match Upsampler::load(&config.upsampler_model_path(), config.upsampler_scale, config.intra_threads) {
            Ok(upsampler) => Some(upsampler),
            Err(e) => {
                tracing::warn!(error = %e, "Real-ESRGAN unavailable; continuing without upsampling");
                None
            }
        }
    } else {
        None
    };

    Ok(CodeFormerRestorer::new(detector, codeformer, upsampler))
}

fn load_image(path: &Path) -> Result<RgbImage> {
    let image = image::open(path).with_context(|| format!("failed to open image {}", path.display()))?;
    Ok(image.to_rgb8())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["faceswap", "-s", "a.jpg", "-t", "b.jpg"]).unwrap();
        assert_eq!(cli.source, vec![PathBuf::from("a.jpg")]);
        assert!(cli.source_indexes.is_all());
        assert!(cli.target_indexes.is_all());
        assert_eq!(cli.upscale, 1);
        assert_eq!(cli.codeformer_fidelity, 0.5);
        assert_eq!(cli.output, PathBuf::from("result.png"));
        assert!(!cli.report);
    }

    #[test]
    fn test_cli_multiple_sources_and_indexes() {
        let cli = Cli::try_parse_from([
            "faceswap",
            "--source",
            "a.jpg",
            "b.jpg",
            "--target",
            "t.jpg",
            "--source-indexes",
            "1,0",
            "--target-indexes",
            "-1",
        ])
        .unwrap();
        assert_eq!(cli.source.len(), 2);
        assert_eq!(cli.source_indexes, IndexSelection::Explicit(vec![1, 0]));
        assert!(cli.target_indexes.is_all());
    }

    #[test]
    fn test_cli_rejects_bad_index() {
        let result = Cli::try_parse_from(["faceswap", "-s", "a.jpg", "-t", "b.jpg", "--source-indexes", "0,x"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_requires_source() {
        assert!(Cli::try_parse_from(["faceswap", "-t", "b.jpg"]).is_err());
    }

    #[test]
    fn test_restore_options_off_without_flag() {
        let cli = Cli::try_parse_from(["faceswap", "-s", "a.jpg", "-t", "b.jpg", "--upscale", "2"]).unwrap();
        assert_eq!(restore_options(&cli).unwrap(), None);
    }

    #[test]
    fn test_restore_options_validated() {
        let cli = Cli::try_parse_from([
            "faceswap", "-s", "a.jpg", "-t", "b.jpg", "--face-restore", "--upscale", "8",
        ])
        .unwrap();
        assert!(restore_options(&cli).is_err());

        let cli = Cli::try_parse_from([
            "faceswap",
            "-s",
            "a.jpg",
            "-t",
            "b.jpg",
            "--face-restore",
            "--background-enhance",
            "--upscale",
            "2",
        ])
        .unwrap();
        let options = restore_options(&cli).unwrap().unwrap();
        assert!(options.background_enhance);
        assert_eq!(options.upscale, 2);
    }
}
