// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for scanner operations
//!
//! This module provides command-line functionality for:
//! - Listing available cameras
//! - Running a scan session
//! - Reading the pending scan slot

use chrono::Local;
use hyperpos_scanner::app::frame_processor::{DecoderBackedDetector, QrFrameDecoder};
use hyperpos_scanner::backends::camera::CameraPlatform;
use hyperpos_scanner::backends::virtual_camera::{VirtualCamera, VirtualPlatform};
use hyperpos_scanner::constants::StrategyKind;
use hyperpos_scanner::feedback::{FeedbackDispatcher, SystemFeedback};
use hyperpos_scanner::storage::{FileStore, MemoryStore, PendingScanSlot};
use hyperpos_scanner::{
    Config, ScanCallbacks, ScanResult, ScanSessionBuilder, ScanSessionController,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{info, warn};

/// Load the configuration from `path`, or the default location
pub fn load_config(path: Option<&Path>) -> Result<Config, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(Config::load_from(path)?),
        None => Ok(Config::load()),
    }
}

fn pending_slot(config: &Config) -> PendingScanSlot {
    match config.storage_path() {
        Some(path) => PendingScanSlot::new(Arc::new(FileStore::new(path))),
        None => {
            warn!("No data directory, pending scans will not survive this process");
            PendingScanSlot::new(Arc::new(MemoryStore::new()))
        }
    }
}

/// List all available cameras
#[cfg(all(target_os = "linux", feature = "v4l2"))]
pub fn list_cameras() -> Result<(), Box<dyn std::error::Error>> {
    use hyperpos_scanner::backends::camera::v4l2::V4l2Platform;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let platform = V4l2Platform::new();
    let cameras = rt.block_on(platform.enumerate_devices())?;

    if cameras.is_empty() {
        println!("No cameras found.");
        return Ok(());
    }

    println!("Available cameras:");
    println!();
    for (index, camera) in cameras.iter().enumerate() {
        println!("  [{}] {}", index, camera.label);
        println!("      Device: {}", camera.id);
        if let Some(facing) = camera.facing {
            println!("      Facing: {}", facing);
        }
        println!();
    }

    Ok(())
}

#[cfg(not(all(target_os = "linux", feature = "v4l2")))]
pub fn list_cameras() -> Result<(), Box<dyn std::error::Error>> {
    println!("No camera platform in this build. Use `scan --image` instead.");
    Ok(())
}

/// Run one scan session until it closes, times out or is interrupted
pub fn scan(
    config: &Config,
    images: &[PathBuf],
    timeout: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    rt.block_on(async {
        if !images.is_empty() {
            let platform = VirtualPlatform::new();
            platform.add_camera(VirtualCamera::from_images("image-0", "Image files", images)?);
            return run_session(Arc::new(platform), config, timeout).await;
        }
        run_device_session(config, timeout).await
    })
}

#[cfg(all(target_os = "linux", feature = "v4l2"))]
async fn run_device_session(
    config: &Config,
    timeout: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    use hyperpos_scanner::backends::camera::v4l2::V4l2Platform;
    run_session(Arc::new(V4l2Platform::new()), config, timeout).await
}

#[cfg(not(all(target_os = "linux", feature = "v4l2")))]
async fn run_device_session(
    _config: &Config,
    _timeout: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    Err("no camera platform in this build, pass --image".into())
}

async fn run_session<P: CameraPlatform>(
    platform: Arc<P>,
    config: &Config,
    timeout: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let profile = config.profile();
    let feedback = FeedbackDispatcher::new(Arc::new(SystemFeedback::detect()), profile.haptic_pulse)
        .with_settings(config.sound_enabled, config.haptics_enabled);

    let mut builder = ScanSessionBuilder::from_config(platform, config)
        .pending_slot(pending_slot(config))
        .feedback(feedback);
    if profile.strategy == StrategyKind::NativePoll {
        // No host detector on the desktop, stand one up from the bundled decoder
        builder = builder.detector(Arc::new(DecoderBackedDetector::new(Arc::new(
            QrFrameDecoder::new(),
        ))));
    }

    let closed = Arc::new(Notify::new());
    let closed_signal = Arc::clone(&closed);
    let controller = builder.build(ScanCallbacks::new(
        |value| {
            println!("{}  {}", Local::now().format("%H:%M:%S%.3f"), value);
        },
        move || closed_signal.notify_one(),
    ));

    // Set up Ctrl+C handler, acquisition can wait on a slow device
    let interrupted = Arc::new(Notify::new());
    let interrupted_clone = Arc::clone(&interrupted);
    ctrlc::set_handler(move || {
        interrupted_clone.notify_one();
    })?;

    info!(variant = %profile.variant.display_name(), "Opening scanner");
    match open_interruptible(&controller, &interrupted).await {
        None => {
            eprintln!("Stopping...");
            return Ok(());
        }
        Some(Err(e)) => {
            eprintln!("Scanner failed: {}", e);
            if let Some(message) = controller.error_message() {
                eprintln!("{}", message);
            }
            println!("{}", serde_json::to_string_pretty(&controller.snapshot())?);
            controller.close();
            return Err(e.into());
        }
        Some(Ok(())) => {}
    }
    eprintln!("Scanning... (press Ctrl+C to stop)");

    let deadline = async {
        match timeout {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = closed.notified() => {}
        _ = deadline => {
            eprintln!("Timed out");
        }
        _ = interrupted.notified() => {
            eprintln!();
            eprintln!("Stopping...");
        }
    }

    let snapshot = controller.snapshot();
    controller.close();
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    Ok(())
}

/// Open the session unless `interrupted` fires first, in which case the
/// session is closed and `None` returned
async fn open_interruptible<P: CameraPlatform>(
    controller: &ScanSessionController<P>,
    interrupted: &Notify,
) -> Option<ScanResult<()>> {
    tokio::select! {
        result = controller.open() => Some(result),
        _ = interrupted.notified() => {
            controller.close();
            None
        }
    }
}

/// Print the pending scan, optionally consuming it
pub fn show_pending(config: &Config, clear: bool) -> Result<(), Box<dyn std::error::Error>> {
    let slot = pending_slot(config);
    let value = if clear { slot.take()? } else { slot.peek()? };

    match value {
        Some(value) => println!("{}", value),
        None => println!("No pending scan."),
    }

    Ok(())
}
