//! End-to-end station flow on simulated devices

use std::sync::Arc;
use streamcap_lib::capture::traits::{DeviceInfo, Resolution};
use streamcap_lib::capture::FakePlatform;
use streamcap_lib::commands::{CaptureStation, RecordingToggle};
use streamcap_lib::config::StationConfig;
use streamcap_lib::export::DirectorySink;
use streamcap_lib::recorder::duration::read_duration_ms;
use streamcap_lib::recorder::ebml::{live_cluster, live_stream_header};
use streamcap_lib::settings::{JsonFileStore, SettingsStore};
use streamcap_lib::utils::ManualClock;
use tempfile::tempdir;

fn devices() -> Vec<DeviceInfo> {
    vec![
        DeviceInfo::video("webcam", "FaceTime HD Camera"),
        DeviceInfo::video("v1", "Cam Link 4K"),
        DeviceInfo::audio("default", "Default - Built-in Microphone"),
        DeviceInfo::audio("m1", "Built-in Microphone"),
        DeviceInfo::audio("a1", "Cam Link 4K Audio"),
    ]
}

#[tokio::test]
async fn test_first_run_record_and_reload() {
    let dir = tempdir().unwrap();
    let config = StationConfig {
        settings_path: dir.path().join("settings.json"),
        output_dir: dir.path().join("captures"),
        ..Default::default()
    };
    let platform = FakePlatform::new(devices());
    let clock = ManualClock::new(1_000_000);

    let station = CaptureStation::with_clock(
        Arc::new(platform.clone()),
        Arc::new(JsonFileStore::new(&config.settings_path)),
        Arc::new(DirectorySink::new(&config.output_dir)),
        &config,
        Arc::new(clock.clone()),
    );

    // capture card and its own audio are picked on first run
    let info = station.initialize().await.unwrap();
    assert_eq!(info.video_device_id, "v1");
    assert_eq!(info.audio_device_id, "a1");
    assert_eq!(info.resolution, Resolution::new(1920, 1080));

    assert_eq!(station.toggle_recording().await.unwrap(), RecordingToggle::Started);
    platform.emit_chunk(live_stream_header("integration"));
    for i in 0..3 {
        clock.advance(500);
        platform.emit_chunk(live_cluster(i * 500, &[0x81, 0, 0, 0x80]));
    }

    let RecordingToggle::Stopped {
        artifact: Some(artifact),
        duration_fixed: true,
    } = station.toggle_recording().await.unwrap()
    else {
        panic!("expected a duration-fixed recording");
    };
    let bytes = std::fs::read(&artifact.location).unwrap();
    assert_eq!(read_duration_ms(&bytes).unwrap(), Some(1_500.0));
    assert!(artifact.name.ends_with(".webm"));

    // choose a smaller mode; persisted for the next start
    station.select_framerate(30).await.unwrap();
    let stored = JsonFileStore::new(&config.settings_path).load().unwrap().unwrap();
    assert_eq!(stored.framerate, 30);
    assert_eq!(stored.video_device_id.as_deref(), Some("v1"));
    drop(station);
    assert_eq!(platform.open_streams(), 0);

    let reopened = CaptureStation::new(
        Arc::new(platform.clone()),
        Arc::new(JsonFileStore::new(&config.settings_path)),
        Arc::new(DirectorySink::new(&config.output_dir)),
        &config,
    );
    let info = reopened.initialize().await.unwrap();
    assert_eq!(info.framerate, 30);
    assert_eq!(platform.permission_requests(), 1);

    let view = reopened.view().await.unwrap();
    assert_eq!(view.selected_framerate, 30);
    assert_eq!(view.audio_options.len(), 3);
    assert_eq!(
        view.audio_options.iter().find(|o| o.selected).map(|o| o.value.as_str()),
        Some("a1")
    );
}
