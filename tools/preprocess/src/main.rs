//! Command-line driver for the GTSRB data pipeline.
//!
//! Subcommands map onto pipeline stages:
//! - `clean`: blur/size filtering of the raw training tree
//! - `build`: ingest, split and normalize into train/val/test bundles
//! - `augment`: oversample minority classes of the train bundle
//! - `inspect`: summarize a bundle and optionally export previews
//! - `run`: clean, build and augment in sequence

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;
use gtsrb_core::{setup_cli_logging, to_toml_string, AugmentationPresets, ImageDimensions, PipelineConfig};
use gtsrb_dataset::{inspect, run_augment, run_build, run_clean};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "gtsrb-preprocess")]
#[command(version)]
#[command(about = "Clean, split, normalize and oversample the GTSRB dataset", long_about = None)]
struct Cli {
    /// Pipeline configuration file (TOML); defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Override the random seed
    #[arg(long, global = true)]
    seed: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Filter blurry and undersized images out of the raw training tree
    Clean {
        /// Raw class-partitioned training directory
        #[arg(short, long)]
        source: Option<PathBuf>,

        /// Output directory for the cleaned tree
        #[arg(short, long)]
        target: Option<PathBuf>,

        /// Laplacian variance below which an image is blurry
        #[arg(long)]
        blur_threshold: Option<f64>,

        /// Count blurry images but keep them
        #[arg(long, default_value = "false")]
        keep_blurry: bool,
    },

    /// Build the train/val/test bundles
    Build {
        /// Training tree to use instead of the configured candidates
        #[arg(short, long)]
        source: Option<PathBuf>,

        /// Fraction of the training data held out for validation
        #[arg(long)]
        val_ratio: Option<f64>,

        /// Square image size in pixels
        #[arg(long)]
        image_size: Option<u32>,
    },

    /// Oversample minority classes of the train bundle
    Augment {
        /// Classes with fewer samples are oversampled
        #[arg(long)]
        threshold: Option<usize>,

        /// Augmented copies per minority sample
        #[arg(long)]
        augs: Option<usize>,

        /// Augmentation preset: gentle, strong, none
        #[arg(short, long)]
        preset: Option<String>,

        /// Output bundle path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Collect samples individually instead of reserving one large array
        #[arg(long, default_value = "false")]
        low_memory: bool,
    },

    /// Summarize a bundle
    Inspect {
        /// Bundle to inspect
        path: PathBuf,

        /// Directory for PNG previews of the first samples
        #[arg(long)]
        preview_dir: Option<PathBuf>,

        /// Number of previews to export
        #[arg(long, default_value = "5")]
        samples: usize,

        /// Print the report as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Run clean, build and augment in sequence
    Run {
        /// Skip the cleaning stage
        #[arg(long, default_value = "false")]
        skip_clean: bool,
    },

    /// Print the effective configuration as TOML
    Config,
}

fn load_config(path: Option<&Path>, seed: Option<u64>) -> Result<PipelineConfig> {
    let mut config = match path {
        Some(path) => PipelineConfig::from_toml_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(seed) = seed {
        config.seed = seed;
    }
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_cli_logging(cli.verbose).context("Failed to initialize logging")?;

    let mut config = load_config(cli.config.as_deref(), cli.seed)?;

    match cli.command {
        Commands::Clean {
            source,
            target,
            blur_threshold,
            keep_blurry,
        } => {
            if let Some(source) = source {
                config.paths.raw_train_dir = source;
            }
            if let Some(target) = target {
                config.paths.cleaned_train_dir = target;
            }
            if let Some(threshold) = blur_threshold {
                config.cleaning.blur_threshold = threshold;
            }
            if keep_blurry {
                config.cleaning.remove_blurry = false;
            }
            clean(&config)?;
        }

        Commands::Build {
            source,
            val_ratio,
            image_size,
        } => {
            if let Some(source) = source {
                config.paths.train_sources = vec![source];
            }
            if let Some(ratio) = val_ratio {
                config.split.validation_fraction = ratio;
            }
            if let Some(size) = image_size {
                config.image_size = ImageDimensions::rgb(size, size);
            }
            config.validate().context("Invalid configuration")?;
            build(&config)?;
        }

        Commands::Augment {
            threshold,
            augs,
            preset,
            output,
            low_memory,
        } => {
            if let Some(threshold) = threshold {
                config.oversampling.minority_threshold = threshold;
            }
            if let Some(augs) = augs {
                config.oversampling.augmentations_per_minority = augs;
            }
            if let Some(name) = preset {
                match AugmentationPresets::by_name(&name) {
                    Some(params) => config.augmentation = params,
                    None => bail!("Unknown preset: {}. Use gentle, strong or none", name),
                }
            }
            if let Some(output) = output {
                config.paths.augmented_bundle = output;
            }
            if low_memory {
                config.oversampling.low_memory = true;
            }
            config.validate().context("Invalid configuration")?;
            augment(&config)?;
        }

        Commands::Inspect {
            path,
            preview_dir,
            samples,
            json,
        } => inspect_bundle(&path, preview_dir.as_deref(), samples, json)?,

        Commands::Run { skip_clean } => {
            config.validate().context("Invalid configuration")?;
            if !skip_clean {
                clean(&config)?;
            }
            build(&config)?;
            augment(&config)?;
            println!("\n{}", "Pipeline complete.".green().bold());
        }

        Commands::Config => {
            print!("{}", to_toml_string(&config)?);
        }
    }

    Ok(())
}

fn clean(config: &PipelineConfig) -> Result<()> {
    println!("{}", "Cleaning training images...".cyan());
    let report = run_clean(config).with_context(|| {
        format!(
            "Cleaning {} failed",
            config.paths.raw_train_dir.display()
        )
    })?;

    println!("  Scanned:   {}", report.scanned);
    println!("  Kept:      {}", report.kept.to_string().green());
    println!(
        "  Blurry:    {}{}",
        report.blurry,
        if config.cleaning.remove_blurry { " (removed)" } else { " (kept)" }
    );
    println!("  Too small: {}", report.too_small);
    if report.errors > 0 {
        println!("  Errors:    {}", report.errors.to_string().red());
    }
    println!("  Output:    {}", config.paths.cleaned_train_dir.display());
    Ok(())
}

fn build(config: &PipelineConfig) -> Result<()> {
    println!("{}", "Building train/val/test bundles...".cyan());
    let report = run_build(config).context("Building bundles failed")?;

    println!("  Source:     {}", report.train_source.display());
    println!(
        "  Ingested:   {} train images ({} skipped), {} test images ({} skipped)",
        report.train_ingest.loaded,
        report.train_ingest.skipped,
        report.test_ingest.loaded,
        report.test_ingest.skipped
    );
    println!("  Train:      {}", report.train.to_string().green());
    println!("  Validation: {}", report.validation.to_string().green());
    println!("  Test:       {}", report.test.to_string().green());
    if report.dropped > 0 {
        println!(
            "  Dropped:    {} (labels outside [0, {}))",
            report.dropped.to_string().yellow(),
            config.num_classes
        );
    }
    println!("  Output:     {}", config.paths.processed_dir.display());
    Ok(())
}

fn augment(config: &PipelineConfig) -> Result<()> {
    println!("{}", "Oversampling minority classes...".cyan());
    info!("Seeding augmentation with {}", config.seed);
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let report = run_augment(config, &mut rng).context("Oversampling failed")?;

    println!("  Original:         {}", report.original);
    println!(
        "  Minority classes: {} {:?}",
        report.minority_classes.len(),
        report.minority_classes
    );
    println!("  Added:            {}", report.added.to_string().green());
    println!("  Final:            {}", report.final_count.to_string().green().bold());
    if report.fallback_used {
        println!("  {}", "Used per-sample fallback buffer".yellow());
    }
    println!("  Output:           {}", config.paths.augmented_bundle.display());
    Ok(())
}

fn inspect_bundle(path: &Path, preview_dir: Option<&Path>, samples: usize, json: bool) -> Result<()> {
    let report = inspect(path, preview_dir.map(|dir| (dir, samples)))
        .with_context(|| format!("Failed to inspect {}", path.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{} {}", "Bundle:".cyan().bold(), report.path.display());
    println!("  Keys: {}", report.keys.join(", "));
    print!("{}", report.stats);
    if !report.exported.is_empty() {
        println!("\n  Exported {} previews:", report.exported.len());
        for file in &report.exported {
            println!("    {}", file.display());
        }
    }
    Ok(())
}
