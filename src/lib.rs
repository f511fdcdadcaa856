//! StreamCap - capture-card station.
//!
//! Pairs a capture device with its audio input, negotiates a working
//! resolution/framerate, keeps one live session and records it to a
//! duration-corrected container.

pub mod capture;
pub mod commands;
pub mod config;
pub mod export;
pub mod recorder;
pub mod session;
pub mod settings;
pub mod utils;

use capture::traits::CapturePlatform;
use commands::CaptureStation;
use config::StationConfig;
use export::DirectorySink;
use settings::JsonFileStore;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn platform() -> anyhow::Result<Arc<dyn CapturePlatform>> {
    #[cfg(feature = "hardware")]
    {
        Ok(Arc::new(capture::HardwarePlatform::new()?))
    }

    #[cfg(not(feature = "hardware"))]
    {
        tracing::warn!("Built without the hardware feature, using simulated devices");
        Ok(Arc::new(capture::FakePlatform::demo()))
    }
}

/// Run the console station
pub async fn run() -> anyhow::Result<()> {
    let config = StationConfig::load();

    // Initialize tracing/logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting StreamCap v{}", env!("CARGO_PKG_VERSION"));

    let station = CaptureStation::new(
        platform()?,
        Arc::new(JsonFileStore::new(&config.settings_path)),
        Arc::new(DirectorySink::new(&config.output_dir)),
        &config,
    );

    // a failed first open is reported; the user can still pick other settings
    if let Err(e) = station.initialize().await {
        println!("error [{}]: {}", e.code, e.message);
    }

    commands::console::run_console(&station, BufReader::new(tokio::io::stdin())).await?;

    if station.recording_status().await.state == recorder::RecordingState::Recording {
        station
            .stop_recording()
            .await
            .map_err(|e| anyhow::anyhow!("{}: {}", e.code, e.message))?;
    }

    tracing::info!("Shutting down");
    Ok(())
}
