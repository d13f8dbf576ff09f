// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for scanning
//!
//! This module provides command-line functionality for:
//! - Listing available cameras
//! - Scanning a code from a live camera
//! - Scanning codes from still images

use scancam::Config;
use scancam::backends::camera::virtual_camera::{VirtualDevice, VirtualPlatform};
use scancam::backends::camera::{CameraPlatform, DeviceId, default_platform};
use scancam::constants::file_formats;
use scancam::scanner::{
    CaptureSession, DecoderAdapter, DecoderMode, DeviceCatalog, Facing, SessionState,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Options of the `scan` command
pub struct ScanArgs {
    pub device: Option<String>,
    pub zoom: Option<f64>,
    pub mode: Option<DecoderMode>,
    pub timeout: Option<u64>,
    pub json: bool,
}

/// How a scan ended
enum Outcome {
    Detected(String),
    Cancelled,
}

/// List all available cameras
pub fn list_cameras() -> CliResult {
    let rt = tokio::runtime::Runtime::new()?;
    let catalog = DeviceCatalog::new(default_platform());

    let cameras = match rt.block_on(catalog.list_cameras()) {
        Ok(cameras) => cameras,
        Err(e) => return Err(e.user_message().into()),
    };

    if cameras.is_empty() {
        println!("No cameras found.");
        return Ok(());
    }

    let preferred = rt.block_on(catalog.preferred_camera()).ok();

    println!("Available cameras:");
    println!();
    for (index, camera) in cameras.iter().enumerate() {
        let marker = if preferred.as_ref().is_some_and(|p| p.id == camera.id) {
            " (default)"
        } else {
            ""
        };
        let label = if camera.label.is_empty() {
            "<unnamed>"
        } else {
            camera.label.as_str()
        };
        println!("  [{}] {}{}", index, label, marker);
        let facing = match camera.facing {
            Facing::Back => "back",
            Facing::Front => "front",
            Facing::Unknown => "unknown",
        };
        println!("      Device: {}", camera.id);
        println!("      Facing: {}, lens: {}", facing, camera.lens);
        println!();
    }

    Ok(())
}

/// Scan a single code from a live camera
pub fn scan(args: ScanArgs) -> CliResult {
    let mut config = Config::load()?;
    if let Some(device) = &args.device {
        config.last_device = Some(DeviceId::new(device.clone()));
    }
    if let Some(zoom) = args.zoom {
        config.initial_zoom = Some(zoom);
    }
    let mode = args.mode.unwrap_or(config.decoder_mode);

    let rt = tokio::runtime::Runtime::new()?;
    let outcome = rt.block_on(run_session(
        default_platform(),
        &config,
        mode,
        args.timeout.map(Duration::from_secs),
        true,
    ))?;

    match outcome {
        Some((code, session)) => {
            print_detection(&code, &session, args.json)?;
            let snapshot = session.snapshot();
            if let Some(device) = snapshot.device {
                config.last_device = Some(device.id);
                if let Err(e) = config.save() {
                    warn!(error = %e, "Failed to remember last device");
                }
            }
            Ok(())
        }
        None => {
            if !args.json {
                println!("Scan cancelled.");
            }
            Ok(())
        }
    }
}

/// Scan codes from still images, one file at a time
pub fn scan_image(files: Vec<PathBuf>, json: bool) -> CliResult {
    let config = Config::load()?;
    let rt = tokio::runtime::Runtime::new()?;
    let mut found = 0usize;

    for path in files {
        let supported = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(file_formats::is_image_extension);
        if !supported {
            eprintln!("Skipping unsupported file: {}", path.display());
            continue;
        }

        let device = VirtualDevice::from_images(
            path.display().to_string(),
            "Back Camera (image)",
            std::slice::from_ref(&path),
        )?;
        let platform = Arc::new(VirtualPlatform::new().with_device(device));

        // Still images either decode on the first ticks or never
        let timeout = config.tick_interval() * 5;
        let outcome = rt.block_on(run_session(
            platform,
            &config,
            DecoderMode::Pull,
            Some(timeout),
            false,
        ))?;

        match outcome {
            Some((code, session)) => {
                found += 1;
                if json {
                    print_detection(&code, &session, true)?;
                } else {
                    println!("{}: {}", path.display(), code);
                }
            }
            None => println!("{}: no code found", path.display()),
        }
    }

    if found == 0 {
        return Err("No codes found".into());
    }
    Ok(())
}

/// Open a session and wait for a detection, cancellation or timeout
async fn run_session(
    platform: Arc<dyn CameraPlatform>,
    config: &Config,
    mode: DecoderMode,
    timeout: Option<Duration>,
    handle_ctrlc: bool,
) -> Result<Option<(String, CaptureSession)>, Box<dyn std::error::Error>> {
    let options = config.session_options()?;
    let session = CaptureSession::with_options(platform, DecoderAdapter::qr(mode), options);

    let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel();
    let cancel_tx = outcome_tx.clone();

    if handle_ctrlc {
        let session = session.clone();
        let handle = tokio::runtime::Handle::current();
        ctrlc::set_handler(move || {
            let session = session.clone();
            handle.spawn(async move { session.close_scanner().await });
        })?;
    }

    if let Err(e) = session
        .open_scanner(
            move |code| {
                let _ = outcome_tx.send(Outcome::Detected(code));
            },
            move || {
                let _ = cancel_tx.send(Outcome::Cancelled);
            },
        )
        .await
    {
        return Err(e.user_message().into());
    }

    info!(snapshot = ?session.snapshot(), "Waiting for a code");
    if handle_ctrlc {
        eprintln!("Scanning... (press Ctrl+C to cancel)");
    }

    let outcome = match timeout {
        Some(timeout) => match tokio::time::timeout(timeout, outcome_rx.recv()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                session.close_scanner().await;
                outcome_rx.recv().await
            }
        },
        None => outcome_rx.recv().await,
    };

    match outcome {
        Some(Outcome::Detected(code)) => Ok(Some((code, session))),
        Some(Outcome::Cancelled) => Ok(None),
        // Callbacks are dropped when the session fails
        None => match session.last_error() {
            Some(e) if session.state() == SessionState::Error => Err(e.user_message().into()),
            _ => Ok(None),
        },
    }
}

fn print_detection(code: &str, session: &CaptureSession, json: bool) -> CliResult {
    if json {
        let snapshot = session.snapshot();
        let value = serde_json::json!({
            "code": code,
            "session_id": snapshot.session_id,
            "device": snapshot.device,
        });
        println!("{}", serde_json::to_string(&value)?);
    } else {
        println!("{}", code);
    }
    Ok(())
}
