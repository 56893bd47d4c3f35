// Deepfake Prep CLI binary

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use deepfake_prep::config::PipelineConfig;
use deepfake_prep::constants::DEFAULT_BATCH_SIZE;
use deepfake_prep::dataset::{self, inventory, UnmatchedPolicy};
use deepfake_prep::extract::{self, frames::FfmpegBackend, ExtractionReport};
use deepfake_prep::loader::{DataLoader, FaceDataset, MatchMode, SampleSource, TransformPipeline};
use deepfake_prep::{metadata, tools};

#[derive(Parser)]
#[command(name = "dfprep")]
#[command(about = "Deepfake Prep - dataset splits, face extraction and face-crop loading", long_about = None)]
#[command(version)]
struct Cli {
    /// JSON config file (camelCase keys); flags override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Default)]
struct LayoutArgs {
    /// Dataset root with one directory per category
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Output directory for train/test manifests
    #[arg(long)]
    manifest_dir: Option<PathBuf>,
    /// Root of the real/ and fake/ crop folders
    #[arg(long)]
    faces_dir: Option<PathBuf>,
}

#[derive(Args, Debug, Default)]
struct SplitArgs {
    /// Fraction of real identities assigned to train
    #[arg(long)]
    train_fraction: Option<f64>,
    /// Shuffle seed
    #[arg(long, conflicts_with = "random_seed")]
    seed: Option<u64>,
    /// Draw the shuffle seed from entropy (logged)
    #[arg(long)]
    random_seed: bool,
    /// Split for fakes without a matching real video: train, test or exclude
    #[arg(long)]
    unmatched: Option<UnmatchedPolicy>,
}

#[derive(Args, Debug, Default)]
struct ExtractArgs {
    /// Faces to extract per video
    #[arg(short = 'n', long)]
    faces_per_video: Option<usize>,
    /// Process only the first K videos of each category
    #[arg(long)]
    limit: Option<usize>,
    /// Parallel extraction workers
    #[arg(short, long)]
    workers: Option<usize>,
    /// Per-video timeout in seconds (0 disables)
    #[arg(long)]
    timeout_secs: Option<u64>,
    /// Face model (.bin for rustface, .xml for the OpenCV cascade)
    #[arg(long)]
    model: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that every category directory exists and count its videos
    Verify {
        #[command(flatten)]
        layout: LayoutArgs,
    },

    /// Create train/test manifests split by source identity
    Manifest {
        #[command(flatten)]
        layout: LayoutArgs,
        #[command(flatten)]
        split: SplitArgs,
    },

    /// Extract face crops from videos
    Extract {
        /// Extract only the videos listed in this manifest
        #[arg(long)]
        manifest: Option<PathBuf>,
        #[command(flatten)]
        layout: LayoutArgs,
        #[command(flatten)]
        extract: ExtractArgs,
    },

    /// Load one batch from a manifest and report what resolved
    CheckLoader {
        /// Manifest file to load
        manifest: PathBuf,
        #[command(flatten)]
        layout: LayoutArgs,
        #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,
        /// Crop matching: substring or exact
        #[arg(long, default_value = "substring")]
        match_mode: MatchMode,
        /// Apply training augmentation
        #[arg(long)]
        augment: bool,
    },

    /// Create manifests, then extract faces for every category
    Pipeline {
        #[command(flatten)]
        layout: LayoutArgs,
        #[command(flatten)]
        split: SplitArgs,
        #[command(flatten)]
        extract: ExtractArgs,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    match cli.command {
        Commands::Verify { layout } => {
            apply_layout(&mut config, layout);
            cmd_verify(&config)
        }
        Commands::Manifest { layout, split } => {
            apply_layout(&mut config, layout);
            apply_split(&mut config, split);
            cmd_manifest(&config)
        }
        Commands::Extract { manifest, layout, extract } => {
            apply_layout(&mut config, layout);
            apply_extract(&mut config, extract);
            cmd_extract(&config, manifest)
        }
        Commands::CheckLoader { manifest, layout, batch_size, match_mode, augment } => {
            apply_layout(&mut config, layout);
            cmd_check_loader(&config, manifest, batch_size, match_mode, augment)
        }
        Commands::Pipeline { layout, split, extract } => {
            apply_layout(&mut config, layout);
            apply_split(&mut config, split);
            apply_extract(&mut config, extract);
            cmd_pipeline(&config)
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();
}

fn apply_layout(config: &mut PipelineConfig, layout: LayoutArgs) {
    if let Some(dir) = layout.data_dir {
        config.data_dir = dir;
    }
    if let Some(dir) = layout.manifest_dir {
        config.manifest_dir = dir;
    }
    if let Some(dir) = layout.faces_dir {
        config.faces_dir = dir;
    }
}

fn apply_split(config: &mut PipelineConfig, split: SplitArgs) {
    if let Some(fraction) = split.train_fraction {
        config.train_fraction = fraction;
    }
    if split.random_seed {
        config.seed = None;
    } else if let Some(seed) = split.seed {
        config.seed = Some(seed);
    }
    if let Some(policy) = split.unmatched {
        config.unmatched_policy = policy;
    }
}

fn apply_extract(config: &mut PipelineConfig, extract: ExtractArgs) {
    if let Some(n) = extract.faces_per_video {
        config.faces_per_video = n;
    }
    if extract.limit.is_some() {
        config.videos_per_category = extract.limit;
    }
    if let Some(workers) = extract.workers {
        config.workers = workers;
    }
    if let Some(secs) = extract.timeout_secs {
        config.video_timeout_secs = secs;
    }
    if extract.model.is_some() {
        config.model_path = extract.model;
    }
}

fn cmd_verify(config: &PipelineConfig) -> Result<()> {
    println!("Dataset: {}", config.data_dir.display());
    println!();

    let inventory = inventory::scan_inventory(&config.data_dir, &config.categories())?;
    for category in config.categories() {
        match inventory.listing(&category.name) {
            Some(listing) => println!("  [ok]      {:<20} {} videos", category.name, listing.videos.len()),
            None => println!("  [missing] {:<20} NOT FOUND", category.name),
        }
    }

    println!();
    println!("Total videos: {}", inventory.total_videos());

    if !inventory.is_complete() {
        anyhow::bail!("{} category directories missing", inventory.missing.len());
    }
    Ok(())
}

fn cmd_manifest(config: &PipelineConfig) -> Result<()> {
    let summary = dataset::create_manifests(config)?;

    println!();
    println!("Manifests written to {}", config.manifest_dir.display());
    println!("  Seed:            {}", summary.seed);
    println!("  Train:           {} real, {} fake", summary.train_real, summary.train_fake);
    println!("  Test:            {} real, {} fake", summary.test_real, summary.test_fake);
    println!("  Unmatched fakes: {} ({} excluded)", summary.unmatched_fakes, summary.excluded_fakes);
    Ok(())
}

fn cmd_extract(config: &PipelineConfig, manifest: Option<PathBuf>) -> Result<()> {
    check_tools();
    let backend = Arc::new(FfmpegBackend::new());
    let factory = extract::detector_factory(config);

    let report = match manifest {
        Some(path) => extract::extract_from_manifest(config, &path, backend, &factory)?,
        None => extract::extract_categories(config, backend, &factory)?,
    };
    print_report(&report);
    Ok(())
}

fn cmd_check_loader(
    config: &PipelineConfig,
    manifest: PathBuf,
    batch_size: usize,
    match_mode: MatchMode,
    augment: bool,
) -> Result<()> {
    let transform = if augment {
        TransformPipeline::train_default()
    } else {
        TransformPipeline::eval_default()
    };
    let ds = FaceDataset::from_manifest(&manifest, &config.faces_dir, transform, match_mode)?;
    println!("Dataset size: {}", ds.len());
    if ds.is_empty() {
        println!("Manifest is empty; nothing to load.");
        return Ok(());
    }

    let seed = config.seed.unwrap_or(0);
    let loader = DataLoader::new(&ds, batch_size)?.shuffled(seed);
    let batch = loader
        .epoch(0)
        .next()
        .context("loader produced no batch")??;

    println!("Batch shape:  {:?}", batch.images.shape());
    println!("Labels:       {:?}", batch.labels.to_vec());
    println!("Placeholders: {} of {}", batch.placeholders, batch.len());
    ds.log_summary();
    Ok(())
}

fn cmd_pipeline(config: &PipelineConfig) -> Result<()> {
    println!("Step 1/2: creating manifests");
    cmd_manifest(config)?;
    println!();
    println!("Step 2/2: extracting faces");
    cmd_extract(config, None)
}

fn check_tools() {
    if !metadata::ffprobe::is_available() {
        log::warn!("ffprobe not found at {}", tools::ffprobe_path().display());
    }
    if !tools::is_tool_available("ffmpeg") {
        log::warn!("ffmpeg not found at {}", tools::ffmpeg_path().display());
    }
}

fn print_report(report: &ExtractionReport) {
    println!();
    println!("{:<20} {:>7} {:>7} {:>9} {:>10} {:>6}", "Category", "Videos", "Faces", "No faces", "Unreadable", "Empty");
    println!("{}", "-".repeat(64));
    for (name, stats) in &report.categories {
        println!(
            "{:<20} {:>7} {:>7} {:>9} {:>10} {:>6}",
            name, stats.videos, stats.faces_written, stats.no_faces, stats.unreadable, stats.empty
        );
    }
    for name in &report.skipped_categories {
        println!("{:<20} skipped (directory not found)", name);
    }
    println!();
    println!("Total faces extracted: {}", report.total_faces());
    if report.totals.timed_out > 0 || report.totals.failed > 0 {
        println!(
            "Timed out: {}, failed: {}",
            report.totals.timed_out, report.totals.failed
        );
    }
}
