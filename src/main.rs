use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use shelfscan::config::{CONFIG_ENV, Settings};
use shelfscan::core::stats::DEFAULT_WINDOW_DAYS;
use shelfscan::detection::annotate::LabelFont;
use shelfscan::{Detector, EventStore, ModelHandle, ModelLoadError, ShelfService, server};

#[derive(Parser)]
#[command(name = "shelfscan")]
#[command(about = "Count books on bookshelf photos and track the counts over time")]
struct Cli {
    /// TOML config file
    #[arg(long, global = true, value_name = "FILE", env = CONFIG_ENV)]
    config: Option<PathBuf>,

    /// SQLite database holding detection events
    #[arg(long, global = true, value_name = "FILE")]
    db: Option<PathBuf>,

    /// Detection model (.rten)
    #[arg(long, global = true, value_name = "FILE")]
    model: Option<PathBuf>,

    /// Minimum confidence for a box to count
    #[arg(long, global = true)]
    confidence: Option<f32>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP service
    Serve {
        /// Address to listen on
        #[arg(long, value_name = "ADDR")]
        bind: Option<String>,

        /// Directory holding the built frontend
        #[arg(long, value_name = "DIR")]
        frontend: Option<PathBuf>,
    },
    /// Count books in a single image
    Detect {
        /// Path to input image file
        #[arg(value_name = "IMAGE")]
        image_path: PathBuf,

        /// Write a short report to this file
        #[arg(long, value_name = "FILE")]
        report: Option<PathBuf>,

        /// Also record the count in the database
        #[arg(long)]
        record: bool,
    },
    /// Print the recorded counts of the last N days
    Stats {
        #[arg(long, default_value_t = DEFAULT_WINDOW_DAYS)]
        days: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    init_tracing(args.verbose);

    let mut settings = Settings::load(args.config.as_deref())?;
    if let Some(db) = args.db {
        settings.db_path = db;
    }
    if let Some(model) = args.model {
        settings.model.path = model;
    }
    if let Some(confidence) = args.confidence {
        settings.model.confidence_threshold = confidence;
    }

    match args.command {
        Command::Serve { bind, frontend } => {
            if let Some(bind) = bind {
                settings.bind_addr = bind;
            }
            if let Some(frontend) = frontend {
                settings.frontend_dir = frontend;
            }
            settings.validate()?;
            run_server(&settings).await
        }
        Command::Detect {
            image_path,
            report,
            record,
        } => {
            settings.validate()?;
            run_detect(&settings, &image_path, report.as_deref(), record).await
        }
        Command::Stats { days } => run_stats(&settings, days).await,
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "shelfscan=debug,tower_http=debug"
    } else {
        "shelfscan=info,tower_http=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_detector(settings: &Settings) -> anyhow::Result<Detector> {
    let handle = ModelHandle::load_with(&settings.model.path, settings.model.options())?;
    let font = LabelFont::discover(settings.render.font_path.as_deref());
    match &font {
        Some(font) => tracing::debug!(font = %font.source().display(), "Label font loaded"),
        None => tracing::warn!("No label font found, boxes will carry untitled tags"),
    }

    let detector = Detector::new(Arc::new(handle))
        .with_target_class(settings.model.target_class.clone())
        .with_confidence_threshold(settings.model.confidence_threshold)
        .with_jpeg_quality(settings.render.jpeg_quality)
        .with_box_order(settings.render.box_order)
        .with_font(font);

    if !detector.supports_target_class() {
        return Err(ModelLoadError::UnknownTargetClass(detector.target_class.clone()).into());
    }
    Ok(detector)
}

async fn open_service(settings: &Settings) -> anyhow::Result<ShelfService> {
    let detector = build_detector(settings)?;
    let store = EventStore::open(&settings.db_path)
        .await
        .with_context(|| format!("Failed to open database {}", settings.db_path.display()))?;
    tracing::info!(db = %store.db_file().display(), "Event store ready");
    Ok(ShelfService::new(
        Arc::new(detector),
        store,
        settings.inference.workers,
        settings.inference.timeout,
        settings.uploads_dir.clone(),
    ))
}

async fn run_server(settings: &Settings) -> anyhow::Result<()> {
    let service = open_service(settings).await?;
    let store = service.store().clone();
    let router = server::create_router(service, Some(&settings.frontend_dir));

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", settings.bind_addr))?;
    let served = server::serve(listener, router).await;
    store.close().await;
    served
}

async fn run_detect(settings: &Settings, image_path: &Path, report: Option<&Path>, record: bool) -> anyhow::Result<()> {
    let service = open_service(settings).await?;
    let result = if record {
        let analysis = service.analyze(image_path).await?;
        tracing::debug!(event_id = analysis.event.id, "Event recorded");
        analysis.result
    } else {
        service.detect(image_path).await?
    };

    println!("\n=== Bookshelf Detection Results ===");
    println!("Image: {} ({}x{})", image_path.display(), result.width, result.height);
    println!("Books detected: {}", result.count);
    for (i, b) in result.boxes.iter().enumerate() {
        println!("  Book {} at ({}, {}) - ({}, {})", i + 1, b.x1, b.y1, b.x2, b.y2);
    }
    println!("Annotated image: {} base64 chars", result.annotated_image.len());

    if let Some(report) = report {
        let mut text = format!("Count: {}\n", result.count);
        if let Some(first) = result.boxes.first() {
            text.push_str(&format!("First box coordinates: {:?}\n", first.to_array()));
        }
        text.push_str(&format!("Image size: {} chars\n", result.annotated_image.len()));
        tokio::fs::write(report, text)
            .await
            .with_context(|| format!("Failed to write report {}", report.display()))?;
        println!("Report written to {}", report.display());
    }

    service.store().close().await;
    Ok(())
}

async fn run_stats(settings: &Settings, days: i64) -> anyhow::Result<()> {
    let store = EventStore::open(&settings.db_path)
        .await
        .with_context(|| format!("Failed to open database {}", settings.db_path.display()))?;
    let points = shelfscan::StatsAggregator::new(store.clone()).window_stats(days).await?;

    println!("\n=== Book counts, last {} days ===", days);
    if points.is_empty() {
        println!("No detections recorded.");
    }
    for point in &points {
        println!("  {}  {}", point.timestamp, point.count);
    }

    store.close().await;
    Ok(())
}
