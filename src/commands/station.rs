//! Station actions
//!
//! Entry points the presenter calls. The session controller and the recording
//! engine sit behind one async mutex, so actions never interleave.

use super::view::{SessionInfo, StationView};
use crate::capture::traits::{CapturePlatform, Resolution};
use crate::config::StationConfig;
use crate::export::artifact::{ArtifactSink, DeliveredArtifact};
use crate::export::screenshot::{encode_png, screenshot_file_name};
use crate::recorder::duration::WebmDurationFixer;
use crate::recorder::engine::RecordingEngine;
use crate::recorder::state::RecordingStatus;
use crate::session::SessionController;
use crate::settings::SettingsStore;
use crate::utils::clock::{Clock, SystemClock};
use crate::utils::error::{CaptureError, CaptureResult, ErrorResponse};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

/// Severity of a status line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLevel {
    Loading,
    Success,
    Error,
}

/// Events broadcast to the presenter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StationEvent {
    Status { level: StatusLevel, message: String },
    RecordingStarted,
    ArtifactSaved(DeliveredArtifact),
}

/// Outcome of a recording toggle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum RecordingToggle {
    Started,
    Stopped {
        artifact: Option<DeliveredArtifact>,
        duration_fixed: bool,
    },
}

struct StationCore {
    controller: SessionController,
    engine: RecordingEngine,
}

/// The capture station
pub struct CaptureStation {
    core: Mutex<StationCore>,
    sink: Arc<dyn ArtifactSink>,
    clock: Arc<dyn Clock>,
    event_tx: broadcast::Sender<StationEvent>,
}

impl CaptureStation {
    pub fn new(
        platform: Arc<dyn CapturePlatform>,
        store: Arc<dyn SettingsStore>,
        sink: Arc<dyn ArtifactSink>,
        config: &StationConfig,
    ) -> Self {
        Self::with_clock(platform, store, sink, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        platform: Arc<dyn CapturePlatform>,
        store: Arc<dyn SettingsStore>,
        sink: Arc<dyn ArtifactSink>,
        config: &StationConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        let controller = SessionController::new(platform, store, config.video_bits_per_second);
        let engine = RecordingEngine::with_parts(
            config.chunk_interval(),
            Arc::clone(&clock),
            Box::new(WebmDurationFixer),
        );
        Self {
            core: Mutex::new(StationCore { controller, engine }),
            sink,
            clock,
            event_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StationEvent> {
        self.event_tx.subscribe()
    }

    fn status(&self, level: StatusLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            StatusLevel::Error => tracing::error!("{}", message),
            _ => tracing::info!("{}", message),
        }
        let _ = self.event_tx.send(StationEvent::Status { level, message });
    }

    /// Report the outcome of an open/restart and map it for the presenter
    fn report_open(&self, result: CaptureResult<SessionInfo>) -> Result<SessionInfo, ErrorResponse> {
        match result {
            Ok(info) => {
                self.status(
                    StatusLevel::Success,
                    format!(
                        "Video stream loaded: {} @ {}fps",
                        info.resolution, info.framerate
                    ),
                );
                Ok(info)
            }
            Err(e) => {
                self.status(StatusLevel::Error, format!("Error loading video stream: {}", e));
                Err(ErrorResponse::from(e))
            }
        }
    }

    /// Load preferences, run first-time setup if needed and open the session
    pub async fn initialize(&self) -> Result<SessionInfo, ErrorResponse> {
        self.status(StatusLevel::Loading, "Loading video stream...");
        let mut core = self.core.lock().await;
        self.finish_before_restart(&mut core);
        let result = core.controller.initialize().await.map(SessionInfo::from);
        self.report_open(result)
    }

    /// Stop an in-progress recording and hand the artifact to the sink
    fn finish_recording(&self, core: &mut StationCore) -> CaptureResult<RecordingToggle> {
        let StationCore { controller, engine } = core;
        let Some(artifact) = engine.stop(controller.session_mut()) else {
            return Ok(RecordingToggle::Stopped {
                artifact: None,
                duration_fixed: false,
            });
        };

        if artifact.data.is_empty() {
            self.status(StatusLevel::Success, "Recording stopped; nothing was recorded");
            return Ok(RecordingToggle::Stopped {
                artifact: None,
                duration_fixed: false,
            });
        }

        if let Some(e) = &artifact.duration_fix_error {
            self.status(
                StatusLevel::Error,
                format!("Recording saved without duration metadata: {}", e),
            );
        }

        let name = artifact.file_name(self.clock.now_ms());
        let delivered = self.sink.deliver(&name, &artifact.mime_type, &artifact.data)?;
        self.status(StatusLevel::Success, format!("Recording saved: {}", delivered.name));
        let _ = self.event_tx.send(StationEvent::ArtifactSaved(delivered.clone()));

        Ok(RecordingToggle::Stopped {
            artifact: Some(delivered),
            duration_fixed: artifact.duration_fixed(),
        })
    }

    /// Deliver a running recording before its session goes away
    fn finish_before_restart(&self, core: &mut StationCore) {
        if !core.engine.is_recording() {
            return;
        }
        tracing::info!("Finalizing recording before restart");
        if let Err(e) = self.finish_recording(core) {
            self.status(StatusLevel::Error, format!("Failed to save recording: {}", e));
        }
    }

    pub async fn start_recording(&self) -> Result<(), ErrorResponse> {
        let mut core = self.core.lock().await;
        self.start_locked(&mut core)
    }

    fn start_locked(&self, core: &mut StationCore) -> Result<(), ErrorResponse> {
        let StationCore { controller, engine } = core;
        match engine.start(controller.session_mut()) {
            Ok(()) => {
                let _ = self.event_tx.send(StationEvent::RecordingStarted);
                self.status(StatusLevel::Success, "Recording...");
                Ok(())
            }
            Err(e) => {
                self.status(StatusLevel::Error, format!("Error starting recording: {}", e));
                Err(ErrorResponse::from(e))
            }
        }
    }

    pub async fn stop_recording(&self) -> Result<RecordingToggle, ErrorResponse> {
        let mut core = self.core.lock().await;
        self.stop_locked(&mut core)
    }

    fn stop_locked(&self, core: &mut StationCore) -> Result<RecordingToggle, ErrorResponse> {
        self.finish_recording(core).map_err(|e| {
            self.status(StatusLevel::Error, format!("Failed to save recording: {}", e));
            ErrorResponse::from(e)
        })
    }

    pub async fn toggle_recording(&self) -> Result<RecordingToggle, ErrorResponse> {
        let mut core = self.core.lock().await;
        if core.engine.is_recording() {
            self.stop_locked(&mut core)
        } else {
            self.start_locked(&mut core).map(|()| RecordingToggle::Started)
        }
    }

    /// Move queued encoder output into the engine
    pub async fn pump(&self) -> usize {
        self.core.lock().await.engine.drain()
    }

    pub async fn select_resolution(&self, resolution: Resolution) -> Result<SessionInfo, ErrorResponse> {
        self.status(StatusLevel::Loading, format!("Switching to {}...", resolution));
        let mut core = self.core.lock().await;
        if let Err(e) = core.controller.ensure_resolution(resolution) {
            return self.report_open(Err(e));
        }
        self.finish_before_restart(&mut core);
        let result = core
            .controller
            .select_resolution(resolution)
            .await
            .map(SessionInfo::from);
        self.report_open(result)
    }

    pub async fn select_framerate(&self, framerate: u32) -> Result<SessionInfo, ErrorResponse> {
        self.status(StatusLevel::Loading, format!("Switching to {}fps...", framerate));
        let mut core = self.core.lock().await;
        if let Err(e) = core.controller.ensure_framerate(framerate) {
            return self.report_open(Err(e));
        }
        self.finish_before_restart(&mut core);
        let result = core
            .controller
            .select_framerate(framerate)
            .await
            .map(SessionInfo::from);
        self.report_open(result)
    }

    pub async fn select_audio_device(&self, device_id: &str) -> Result<SessionInfo, ErrorResponse> {
        self.status(StatusLevel::Loading, "Switching audio input...");
        let mut core = self.core.lock().await;
        self.finish_before_restart(&mut core);
        let result = core
            .controller
            .select_audio_device(device_id)
            .await
            .map(SessionInfo::from);
        self.report_open(result)
    }

    /// Reopen the session with the current preferences
    pub async fn restart(&self) -> Result<SessionInfo, ErrorResponse> {
        self.status(StatusLevel::Loading, "Restarting video stream...");
        let mut core = self.core.lock().await;
        self.finish_before_restart(&mut core);
        let result = core.controller.restart().await.map(SessionInfo::from);
        self.report_open(result)
    }

    /// PNG of the live video frame
    pub async fn take_screenshot(&self) -> Result<DeliveredArtifact, ErrorResponse> {
        let core = self.core.lock().await;
        let result = Self::capture_png(&core.controller).and_then(|png| {
            let name = screenshot_file_name(self.clock.now_ms());
            Ok(self.sink.deliver(&name, "image/png", &png)?)
        });

        match result {
            Ok(delivered) => {
                self.status(StatusLevel::Success, format!("Screenshot saved: {}", delivered.name));
                let _ = self.event_tx.send(StationEvent::ArtifactSaved(delivered.clone()));
                Ok(delivered)
            }
            Err(e) => {
                self.status(StatusLevel::Error, format!("Screenshot failed: {}", e));
                Err(ErrorResponse::from(e))
            }
        }
    }

    fn capture_png(controller: &SessionController) -> CaptureResult<Vec<u8>> {
        let session = controller
            .session()
            .ok_or_else(|| CaptureError::Screenshot("No video is playing".to_string()))?;
        let frame = session
            .grab_frame()
            .map_err(|e| CaptureError::Screenshot(e.to_string()))?;
        encode_png(&frame).map_err(|e| CaptureError::Screenshot(e.to_string()))
    }

    /// Forget all preferences and release the session
    pub async fn reset(&self) -> Result<(), ErrorResponse> {
        let mut core = self.core.lock().await;
        self.finish_before_restart(&mut core);
        core.controller.reset().map_err(|e| {
            self.status(StatusLevel::Error, format!("Reset failed: {}", e));
            ErrorResponse::from(e)
        })?;
        self.status(StatusLevel::Success, "Settings reset");
        Ok(())
    }

    pub async fn recording_status(&self) -> RecordingStatus {
        let mut core = self.core.lock().await;
        core.engine.drain();
        core.engine.status()
    }

    /// Everything the presenter renders
    pub async fn view(&self) -> Result<StationView, ErrorResponse> {
        let core = self.core.lock().await;
        let audio_options = core.controller.audio_options().await?;
        Ok(StationView::build(&core.controller, audio_options, core.engine.status()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::fake::FakePlatform;
    use crate::capture::traits::{DeviceInfo, Frame, PlatformError};
    use crate::export::artifact::MemorySink;
    use crate::recorder::ebml::{live_cluster, live_stream_header};
    use crate::recorder::state::RecordingState;
    use crate::settings::MemoryStore;
    use crate::utils::clock::ManualClock;

    struct Fixture {
        platform: FakePlatform,
        store: Arc<MemoryStore>,
        sink: Arc<MemorySink>,
        clock: ManualClock,
        station: CaptureStation,
    }

    fn fixture() -> Fixture {
        let platform = FakePlatform::new(vec![
            DeviceInfo::video("v1", "Cam Link 4K"),
            DeviceInfo::audio("default", "Default"),
            DeviceInfo::audio("a1", "Cam Link 4K Audio"),
        ]);
        let store = Arc::new(MemoryStore::default());
        let sink = Arc::new(MemorySink::default());
        let clock = ManualClock::new(1_700_000_000_000);
        let station = CaptureStation::with_clock(
            Arc::new(platform.clone()),
            store.clone(),
            sink.clone(),
            &StationConfig::default(),
            Arc::new(clock.clone()),
        );
        Fixture {
            platform,
            store,
            sink,
            clock,
            station,
        }
    }

    fn drain_statuses(rx: &mut broadcast::Receiver<StationEvent>) -> Vec<(StatusLevel, String)> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let StationEvent::Status { level, message } = event {
                out.push((level, message));
            }
        }
        out
    }

    #[tokio::test]
    async fn test_initialize_reports_loading_then_success() {
        let f = fixture();
        let mut rx = f.station.subscribe();

        let info = f.station.initialize().await.unwrap();
        assert_eq!(info.video_device_id, "v1");
        assert_eq!(info.audio_device_id, "a1");

        let statuses = drain_statuses(&mut rx);
        assert_eq!(statuses[0].0, StatusLevel::Loading);
        assert_eq!(statuses.last().unwrap().0, StatusLevel::Success);
    }

    #[tokio::test]
    async fn test_initialize_failure_is_reported() {
        let f = fixture();
        f.platform.hold_device("v1");
        let mut rx = f.station.subscribe();

        let err = f.station.initialize().await.unwrap_err();
        assert_eq!(err.code, "DEVICE_IN_USE");
        let statuses = drain_statuses(&mut rx);
        assert_eq!(statuses.last().unwrap().0, StatusLevel::Error);

        f.platform.release_device("v1");
        assert!(f.station.restart().await.is_ok());
    }

    #[tokio::test]
    async fn test_toggle_records_and_delivers() {
        let f = fixture();
        f.station.initialize().await.unwrap();

        assert_eq!(
            f.station.toggle_recording().await.unwrap(),
            RecordingToggle::Started
        );
        f.platform.emit_chunk(live_stream_header("test"));
        f.clock.advance(1_000);
        f.platform.emit_chunk(live_cluster(0, &[0x81, 0, 0, 0x80]));
        assert_eq!(f.station.pump().await, 2);

        let toggle = f.station.toggle_recording().await.unwrap();
        let RecordingToggle::Stopped {
            artifact: Some(artifact),
            duration_fixed,
        } = toggle
        else {
            panic!("expected a delivered recording");
        };
        assert!(duration_fixed);
        assert_eq!(artifact.name, "recording_1700000001000.webm");
        assert!(f.sink.data(&artifact.name).is_some());
        assert_eq!(
            f.station.recording_status().await.state,
            RecordingState::Idle
        );
    }

    #[tokio::test]
    async fn test_resolution_change_while_recording_delivers_first() {
        let f = fixture();
        f.station.initialize().await.unwrap();
        f.station.start_recording().await.unwrap();
        f.platform.emit_chunk(vec![1, 2, 3]);

        let info = f.station.select_resolution(Resolution::new(640, 480)).await.unwrap();
        assert_eq!(info.resolution, Resolution::new(640, 480));

        let delivered = f.sink.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(f.sink.data(&delivered[0].name).unwrap(), vec![1, 2, 3]);
        assert_eq!(
            f.station.recording_status().await.state,
            RecordingState::Idle
        );
        assert_eq!(f.platform.open_streams(), 1);
    }

    #[tokio::test]
    async fn test_unoffered_resolution_keeps_recording() {
        let f = fixture();
        f.station.initialize().await.unwrap();
        f.station.start_recording().await.unwrap();

        let err = f.station.select_resolution(Resolution::new(7, 7)).await.unwrap_err();
        assert_eq!(err.code, "UNSUPPORTED_CONSTRAINT");
        let err = f.station.select_framerate(999).await.unwrap_err();
        assert_eq!(err.code, "UNSUPPORTED_CONSTRAINT");

        assert_eq!(
            f.station.recording_status().await.state,
            RecordingState::Recording
        );
        assert!(f.sink.delivered().is_empty());
        let stored = f.store.snapshot().unwrap();
        assert_ne!(stored.resolution, Resolution::new(7, 7));
        assert_ne!(stored.framerate, 999);
    }

    #[tokio::test]
    async fn test_empty_recording_reports_nothing_recorded() {
        let f = fixture();
        f.station.initialize().await.unwrap();
        f.station.start_recording().await.unwrap();
        let mut rx = f.station.subscribe();

        let toggle = f.station.stop_recording().await.unwrap();
        assert_eq!(
            toggle,
            RecordingToggle::Stopped {
                artifact: None,
                duration_fixed: false
            }
        );
        assert!(f.sink.delivered().is_empty());
        let statuses = drain_statuses(&mut rx);
        assert_eq!(statuses.last().unwrap().0, StatusLevel::Success);
        assert!(statuses.last().unwrap().1.contains("nothing was recorded"));
    }

    #[tokio::test]
    async fn test_initialize_while_recording_delivers_first() {
        let f = fixture();
        f.station.initialize().await.unwrap();
        f.station.start_recording().await.unwrap();
        f.platform.emit_chunk(vec![4, 5, 6]);

        f.station.initialize().await.unwrap();
        let delivered = f.sink.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(f.sink.data(&delivered[0].name).unwrap(), vec![4, 5, 6]);
        assert_eq!(
            f.station.recording_status().await.state,
            RecordingState::Idle
        );

        assert_eq!(f.platform.open_streams(), 1);
        // the new session's encoder starts cleanly
        assert_eq!(
            f.station.toggle_recording().await.unwrap(),
            RecordingToggle::Started
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_toggles_alternate() {
        let f = fixture();
        f.station.initialize().await.unwrap();
        let station = Arc::new(f.station);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let station = Arc::clone(&station);
                tokio::spawn(async move { station.toggle_recording().await })
            })
            .collect();

        let mut started = 0;
        for handle in handles {
            match handle.await.unwrap().unwrap() {
                RecordingToggle::Started => started += 1,
                RecordingToggle::Stopped { .. } => {}
            }
        }
        assert_eq!(started, 4);
        assert_eq!(
            station.recording_status().await.state,
            RecordingState::Idle
        );
    }

    #[tokio::test]
    async fn test_screenshot_needs_live_video() {
        let f = fixture();
        let err = f.station.take_screenshot().await.unwrap_err();
        assert_eq!(err.code, "SCREENSHOT_ERROR");
        assert!(err.message.contains("No video is playing"));

        f.station.initialize().await.unwrap();
        f.platform.set_frame(Frame {
            width: 4,
            height: 2,
            rgb: vec![200; 24],
        });
        let shot = f.station.take_screenshot().await.unwrap();
        assert_eq!(shot.name, "screenshot_1700000000000.png");
        assert_eq!(shot.mime_type, "image/png");
        let png = f.sink.data(&shot.name).unwrap();
        assert_eq!(&png[1..4], b"PNG");
    }

    #[tokio::test]
    async fn test_start_without_session_is_reported() {
        let f = fixture();
        let err = f.station.start_recording().await.unwrap_err();
        assert_eq!(err.code, "RECORDER_UNINITIALIZED");
    }

    #[tokio::test]
    async fn test_stop_while_idle_delivers_nothing() {
        let f = fixture();
        f.station.initialize().await.unwrap();
        let toggle = f.station.stop_recording().await.unwrap();
        assert_eq!(
            toggle,
            RecordingToggle::Stopped {
                artifact: None,
                duration_fixed: false
            }
        );
        assert!(f.sink.delivered().is_empty());
    }

    #[tokio::test]
    async fn test_reset_clears_store_and_session() {
        let f = fixture();
        f.station.initialize().await.unwrap();
        assert!(f.store.snapshot().is_some());

        f.station.reset().await.unwrap();
        assert!(f.store.snapshot().is_none());
        assert_eq!(f.platform.open_streams(), 0);
        assert!(f.station.view().await.unwrap().session.is_none());
    }

    #[tokio::test]
    async fn test_failed_audio_switch_leaves_no_session() {
        let f = fixture();
        f.station.initialize().await.unwrap();
        f.platform.fail_next_acquire(PlatformError::overconstrained("nope"));
        f.platform.fail_next_acquire(PlatformError::not_found("Requested device not found"));

        let err = f.station.select_audio_device("a1").await.unwrap_err();
        assert_eq!(err.code, "DEVICE_NOT_FOUND");
        assert_eq!(f.platform.open_streams(), 0);
        assert!(f.station.view().await.unwrap().session.is_none());
    }
}
