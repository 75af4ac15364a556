use anyhow::{Context, Result};
use clap::Parser;
use rollcall_core::{
    ArcFaceEmbedder, EmotionClassifier, FaceAnalyzer, FerPlusClassifier, Gallery, GalleryError,
};
use rollcall_hw::{CalibrationError, Camera, Undistorter};
use rollcall_ledger::{AttendanceLedger, MemoryLedger, SessionId, SqliteLedger};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dedup;
mod display;
mod frame_loop;
mod gateway;
mod gesture;
mod input;
mod scheduler;
#[cfg(test)]
mod testing;

use config::Config;
use display::{DisplaySink, NullSink, SnapshotSink};
use frame_loop::{ExitReason, FrameLoop, LoopPolicy, LoopSummary};
use gesture::{GestureController, NoHandTracker, SimulatedVolume};
use input::{KeySource, NoKeys, StdinKeys};
use scheduler::InferenceScheduler;

#[derive(Parser, Debug, Clone, Copy)]
#[command(name = "rollcall-kiosk", about = "Webcam attendance kiosk")]
struct Cli {
    /// Do not write preview snapshots; overlay text goes to the log only
    #[arg(long)]
    headless: bool,
    /// Keep attendance in memory instead of writing the ledger database
    #[arg(long)]
    dry_run: bool,
    /// Ignore operator keys on stdin (q: quit, g: gesture mode)
    #[arg(long)]
    no_keys: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    tracing::info!(
        camera = %config.camera_device,
        models = %config.model_dir.display(),
        faces = %config.faces_dir.display(),
        sampling_interval = config.sampling_interval,
        "rollcall-kiosk starting"
    );

    let cancel = Arc::new(AtomicBool::new(false));
    let loop_cancel = cancel.clone();

    // The camera and the loop stay on this blocking thread for their whole life.
    let mut frame_loop = tokio::task::spawn_blocking(move || -> Result<LoopSummary> {
        let frame_loop = build_loop(&config, cli)?.with_cancel_flag(loop_cancel);
        Ok(frame_loop.run())
    });

    let summary = tokio::select! {
        joined = &mut frame_loop => joined??,
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => {
                    tracing::info!("interrupt received; stopping");
                    cancel.store(true, Ordering::SeqCst);
                }
                Err(e) => tracing::warn!(error = %e, "cannot listen for ctrl-c"),
            }
            frame_loop.await??
        }
    };

    println!(
        "{} frames, {} recognitions, {} marked present",
        summary.frames,
        summary.inferences,
        summary.logged.len()
    );
    for identity in &summary.logged {
        println!("  {identity}");
    }

    match summary.exit {
        Some(ExitReason::CameraFailed(reason)) => anyhow::bail!("camera failed: {reason}"),
        exit => {
            tracing::info!(?exit, "rollcall-kiosk stopped");
            Ok(())
        }
    }
}

fn build_loop(config: &Config, cli: Cli) -> Result<FrameLoop> {
    let mut embedder = ArcFaceEmbedder::load(&config.arcface_model_path())
        .context("failed to load face recognition model")?;

    let gallery = match Gallery::enroll_dir(&config.faces_dir, &mut embedder) {
        Ok(gallery) => gallery,
        Err(GalleryError::NotFound(dir)) => {
            tracing::warn!(dir = %dir, "faces directory not found");
            Gallery::new(Vec::new())
        }
        Err(e) => return Err(e).context("failed to load face gallery"),
    };

    let emotion: Option<Box<dyn EmotionClassifier>> =
        match FerPlusClassifier::load(&config.emotion_model_path()) {
            Ok(classifier) => Some(Box::new(classifier)),
            Err(e) => {
                tracing::warn!(error = %e, "emotion model unavailable; emotion will read unknown");
                None
            }
        };

    let analyzer = FaceAnalyzer::new(Box::new(embedder), emotion, gallery, config.match_threshold);
    let scheduler =
        InferenceScheduler::spawn(analyzer, config.sampling_interval, config.inference_width)?;

    let ledger: Box<dyn AttendanceLedger> = if cli.dry_run {
        tracing::info!("dry run: attendance kept in memory");
        Box::new(MemoryLedger::new())
    } else {
        Box::new(SqliteLedger::open(&config.db_path).context("failed to open attendance ledger")?)
    };

    let display: Box<dyn DisplaySink> = if cli.headless {
        Box::new(NullSink::default())
    } else {
        tracing::info!(path = %config.snapshot_path.display(), "writing preview snapshots");
        Box::new(SnapshotSink::new(
            config.snapshot_path.clone(),
            config.snapshot_every,
        ))
    };

    let keys: Box<dyn KeySource> = if cli.no_keys {
        Box::new(NoKeys)
    } else {
        Box::new(StdinKeys::spawn().context("failed to start key reader")?)
    };

    let camera = Camera::open(
        &config.camera_device,
        config.capture_width,
        config.capture_height,
    )
    .with_context(|| format!("failed to open camera {}", config.camera_device))?;

    let session = SessionId::now();
    tracing::info!(session = %session, "attendance session started");

    let policy = LoopPolicy {
        log_threshold: config.log_threshold,
        shutdown_grace: config.shutdown_grace,
    };
    let frame_loop = FrameLoop::new(
        Box::new(camera),
        scheduler,
        ledger,
        session,
        display,
        keys,
        policy,
    )
    .with_gesture(GestureController::new(
        Box::new(NoHandTracker),
        Box::<SimulatedVolume>::default(),
    ));
    tracing::debug!("no hand model available; gesture mode shows the volume bar only");

    Ok(match Undistorter::load(&config.calibration_path) {
        Ok(undistorter) => {
            tracing::info!(path = %config.calibration_path.display(), "lens undistortion enabled");
            frame_loop.with_undistorter(undistorter)
        }
        Err(CalibrationError::NotFound(path)) => {
            tracing::info!(path = %path, "no calibration file; undistortion off");
            frame_loop
        }
        Err(e) => {
            tracing::warn!(error = %e, "calibration unusable; undistortion off");
            frame_loop
        }
    })
}
