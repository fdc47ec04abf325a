use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::{
    EnrollmentFlow, EuclideanMatcher, FramePipeline, GalleryStore, OnnxAnalyzer, SnapshotArchive,
};
use rollcall_hw::Camera;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod config;
mod prompt;
mod source;
mod window;

use config::Config;
use prompt::ConsolePrompt;
use source::CameraSource;
use window::PreviewWindow;

#[derive(Parser)]
#[command(name = "rollcall", about = "Recognize faces on a webcam and name the ones it has not seen")]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/rollcall/config.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the camera and recognize faces until Esc is pressed (default)
    Run,
    /// List enrolled identities in enrollment order
    List,
    /// List V4L2 capture devices
    Devices,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(&config),
        Commands::List => list(&config),
        Commands::Devices => {
            devices();
            Ok(())
        }
    }
}

fn run(config: &Config) -> Result<()> {
    let store = GalleryStore::new(&config.store_path);
    let gallery = store
        .load()
        .with_context(|| format!("loading face gallery {}", config.store_path.display()))?;

    let mut analyzer = OnnxAnalyzer::load(&config.model_dir).context("loading face models")?;

    let camera = Camera::open(&config.camera_device)
        .with_context(|| format!("opening camera {}", config.camera_device))?;
    tracing::info!(
        device = %config.camera_device,
        width = camera.width,
        height = camera.height,
        format = ?camera.pixel_format(),
        "starting camera"
    );
    let mut source = CameraSource::new(camera.stream()?);
    let mut window = PreviewWindow::open(camera.width, camera.height)?;

    let enrollment = EnrollmentFlow::new(
        ConsolePrompt,
        SnapshotArchive::new(&config.archive_dir),
        store,
    );
    let mut pipeline = FramePipeline::new(
        gallery,
        EuclideanMatcher::new(config.tolerance),
        enrollment,
    )
    .with_detection_scale(config.detection_scale);

    let summary = pipeline.run(&mut source, &mut analyzer, &mut window)?;

    tracing::info!(
        frames = summary.frames,
        enrolled = summary.enrolled,
        identities = pipeline.gallery().len(),
        "camera released"
    );
    Ok(())
}

fn list(config: &Config) -> Result<()> {
    let gallery = GalleryStore::new(&config.store_path)
        .load()
        .with_context(|| format!("loading face gallery {}", config.store_path.display()))?;

    if gallery.is_empty() {
        println!("No faces enrolled");
        return Ok(());
    }
    for (i, record) in gallery.iter().enumerate() {
        println!("{i:>4}  {}  ({}-d)", record.name, record.embedding.dim());
    }
    Ok(())
}

fn devices() {
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
    }
    for d in devices {
        println!("{}  {}  [{} @ {}]", d.path, d.name, d.driver, d.bus);
    }
}
