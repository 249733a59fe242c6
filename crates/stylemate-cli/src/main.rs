use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use stylemate_core::recommendation::{self, OverlaySpec};
use stylemate_core::{ModelId, OnnxModelLoader};
use stylemate_hw::V4l2CameraProvider;
use stylemate_session::{
    Capabilities, CaptureMode, FrameScheduler, Overlay, RefreshClock, Session, SessionConfig,
};
use tracing_subscriber::EnvFilter;

mod render;

/// Give up on live analysis after this many failed ticks in a row.
const MAX_CONSECUTIVE_ERRORS: usize = 30;

#[derive(Parser)]
#[command(name = "stylemate", about = "StyleMate face shape and color tone analysis")]
struct Cli {
    /// Model directory (overrides STYLEMATE_MODEL_DIR)
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,
    /// Overlay asset directory (overrides STYLEMATE_ASSET_DIR)
    #[arg(long, global = true)]
    asset_dir: Option<PathBuf>,
    /// Camera device (overrides STYLEMATE_CAMERA_DEVICE)
    #[arg(long, global = true)]
    device: Option<String>,
    /// AR camera device (overrides STYLEMATE_AR_CAMERA_DEVICE)
    #[arg(long, global = true)]
    ar_device: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a photo
    Analyze {
        image: PathBuf,
        /// face-shape or tone
        #[arg(short, long, default_value = "face-shape")]
        model: ModelId,
    },
    /// Analyze the live camera feed
    Live {
        #[arg(short, long, default_value = "face-shape")]
        model: ModelId,
        /// Stop after this many published results
        #[arg(short, long, default_value_t = 10)]
        results: usize,
        /// Switch to the other model after this many results
        #[arg(long)]
        switch_model_after: Option<usize>,
    },
    /// Try on an overlay and save a screenshot
    TryOn {
        /// Overlay id, or a label whose recommendation names one
        asset: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long)]
        x: Option<i64>,
        #[arg(long)]
        y: Option<i64>,
        #[arg(long)]
        width: Option<u32>,
        #[arg(long)]
        height: Option<u32>,
    },
    /// Show the recommendation for a label
    Recommend { label: String },
    /// List camera devices
    Devices,
    /// Show configuration and session status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = SessionConfig::from_env();
    if let Some(dir) = cli.model_dir {
        config.model_dir = dir;
    }
    if let Some(dir) = cli.asset_dir {
        config.asset_dir = dir;
    }
    if let Some(device) = cli.device {
        config.camera_device = device;
    }
    if let Some(device) = cli.ar_device {
        config.ar_camera_device = device;
    }

    match cli.command {
        Commands::Analyze { image, model } => analyze(config, image, model),
        Commands::Live {
            model,
            results,
            switch_model_after,
        } => live(config, model, results, switch_model_after).await,
        Commands::TryOn {
            asset,
            output,
            x,
            y,
            width,
            height,
        } => {
            let mut spec = resolve_overlay(&asset)?;
            spec.x = x.unwrap_or(spec.x);
            spec.y = y.unwrap_or(spec.y);
            spec.width = width.unwrap_or(spec.width);
            spec.height = height.unwrap_or(spec.height);
            try_on(config, &spec, output)
        }
        Commands::Recommend { label } => {
            let Some(rec) = recommendation::lookup(&label) else {
                bail!("no recommendation for {label:?}");
            };
            render::print_recommendation(rec);
            Ok(())
        }
        Commands::Devices => {
            let devices = V4l2CameraProvider::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
            Ok(())
        }
        Commands::Status => {
            let (_clock, scheduler) = RefreshClock::new(config.refresh_hz);
            let session = build_session(config.clone(), Box::new(scheduler));
            let status = serde_json::json!({
                "config": config,
                "session": session.status(),
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
    }
}

fn build_session(config: SessionConfig, scheduler: Box<dyn FrameScheduler>) -> Session {
    let caps = Capabilities {
        models: Box::new(OnnxModelLoader::new(&config.model_dir)),
        cameras: Box::new(V4l2CameraProvider::new()),
        scheduler,
    };
    Session::new(config, caps)
}

fn analyze(config: SessionConfig, image: PathBuf, model: ModelId) -> Result<()> {
    let bytes =
        std::fs::read(&image).with_context(|| format!("failed to read {}", image.display()))?;

    let (_clock, scheduler) = RefreshClock::new(config.refresh_hz);
    let mut session = build_session(config, Box::new(scheduler));
    session.switch_mode(CaptureMode::Static);
    session.set_active_model(model)?;
    session.upload_image(&bytes)?;

    let Some(result) = session.process_static_image()? else {
        bail!("result was discarded");
    };
    render::print_result(&result);
    render::print_top_recommendation(&result.evaluation);
    session.dispose();
    Ok(())
}

async fn live(
    config: SessionConfig,
    model: ModelId,
    results: usize,
    switch_model_after: Option<usize>,
) -> Result<()> {
    let (mut clock, scheduler) = RefreshClock::new(config.refresh_hz);
    let mut session = build_session(config, Box::new(scheduler));
    let mut events = session.subscribe();

    session.set_active_model(model)?;
    session.toggle_analysis()?;
    tracing::info!(period = ?clock.period(), "live analysis running");

    let mut published = 0;
    let mut failures = 0;
    while published < results {
        let tick = tokio::select! {
            tick = clock.next_tick() => tick,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
        };
        let Some(tick) = tick else {
            break;
        };

        match session.on_tick(tick) {
            Ok(Some(result)) => {
                failures = 0;
                published += 1;
                render::print_result(&result);
                if switch_model_after == Some(published) {
                    let next = match session.active_model() {
                        ModelId::FaceShape => ModelId::PersonalTone,
                        ModelId::PersonalTone => ModelId::FaceShape,
                    };
                    session.set_active_model(next)?;
                }
            }
            Ok(None) => {}
            Err(e) => {
                failures += 1;
                if failures >= MAX_CONSECUTIVE_ERRORS {
                    session.dispose();
                    return Err(e).context("live analysis keeps failing");
                }
            }
        }

        while let Ok(event) = events.try_recv() {
            tracing::debug!(?event, "session event");
        }
    }

    session.pause();
    if let Some(result) = session.last_result() {
        render::print_top_recommendation(&result.evaluation);
    }
    session.dispose();
    Ok(())
}

fn resolve_overlay(asset: &str) -> Result<OverlaySpec> {
    let table = recommendation::table();
    table
        .overlay(asset)
        .or_else(|| {
            table
                .lookup(asset)
                .and_then(|rec| rec.overlay.as_deref())
                .and_then(|id| table.overlay(id))
        })
        .cloned()
        .with_context(|| format!("unknown overlay asset {asset:?}"))
}

fn try_on(config: SessionConfig, spec: &OverlaySpec, output: Option<PathBuf>) -> Result<()> {
    let overlay = Overlay::load(spec, &config.asset_dir)?;
    let warmup = config.warmup_frames;

    let (_clock, scheduler) = RefreshClock::new(config.refresh_hz);
    let mut session = build_session(config, Box::new(scheduler));
    session.start_ar_try_on(overlay)?;
    for _ in 0..warmup {
        session.ar_preview()?;
    }

    let shot = session.capture_ar_screenshot()?;
    let path = output.unwrap_or_else(|| {
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        PathBuf::from(format!("stylemate-tryon-{stamp}.png"))
    });
    shot.save(&path)
        .with_context(|| format!("failed to save {}", path.display()))?;
    println!("Saved {}", path.display());

    session.dispose();
    Ok(())
}
