//! Session controller
//!
//! Owns the single live capture session. Opening negotiates against the
//! device with a full constraint set first and a device-id-only set second,
//! then reads back what the device actually delivered.

use super::preferences::Preferences;
use crate::capture::catalog::{
    is_default_alias, select_default_audio, select_default_video, DeviceCatalog,
};
use crate::capture::probe::{CapabilityProber, CapabilitySet};
use crate::capture::traits::{
    CapturePlatform, ChunkEncoder, DeviceInfo, DeviceKind, Frame, MediaStream, PlatformError,
    PlatformErrorKind, Resolution, StreamConstraints, TrackSettings,
};
use crate::recorder::encoder::negotiate_encoder_config;
use crate::settings::SettingsStore;
use crate::utils::error::{CaptureError, CaptureResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// The live acquisition of a video + audio device pair
///
/// Dropping a session stops its encoder and releases every track.
pub struct Session {
    id: Uuid,
    stream: Box<dyn MediaStream>,
    video_device_id: String,
    audio_device_id: String,
    active_resolution: Resolution,
    active_framerate: u32,
    encoder: Option<Box<dyn ChunkEncoder>>,
    opened_at: DateTime<Utc>,
}

impl Session {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn video_device_id(&self) -> &str {
        &self.video_device_id
    }

    /// Audio device that was requested
    pub fn audio_device_id(&self) -> &str {
        &self.audio_device_id
    }

    /// Resolution the device actually negotiated
    pub fn active_resolution(&self) -> Resolution {
        self.active_resolution
    }

    /// Framerate the device actually negotiated, rounded
    pub fn active_framerate(&self) -> u32 {
        self.active_framerate
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub fn video_settings(&self) -> TrackSettings {
        self.stream.video_settings()
    }

    /// Concrete device the audio track reports, which may differ from the request
    pub fn audio_track_device_id(&self) -> Option<String> {
        self.stream.audio_settings().and_then(|s| s.device_id)
    }

    pub fn has_encoder(&self) -> bool {
        self.encoder.is_some()
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.encoder.as_ref().map(|e| e.mime_type())
    }

    pub fn encoder_mut(&mut self) -> Option<&mut Box<dyn ChunkEncoder>> {
        self.encoder.as_mut()
    }

    pub fn grab_frame(&self) -> Result<Frame, PlatformError> {
        self.stream.grab_frame()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(encoder) = self.encoder.as_mut() {
            if encoder.is_recording() {
                if let Err(e) = encoder.stop() {
                    tracing::warn!("Failed to stop encoder on release: {}", e);
                }
            }
        }
        self.stream.release();
        tracing::debug!("Released session {}", self.id);
    }
}

/// Audio input entry for the presenter's selector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioOption {
    pub value: String,
    pub label: String,
    pub selected: bool,
}

impl AudioOption {
    fn from_device(device: &DeviceInfo, selected_id: Option<&str>) -> Self {
        let label = if device.label.is_empty() {
            let short: String = device.id.chars().take(8).collect();
            format!("Audio device ({}...)", short)
        } else {
            device.label.clone()
        };
        Self {
            value: device.id.clone(),
            label,
            selected: selected_id == Some(device.id.as_str()),
        }
    }
}

/// Map a failed minimal acquisition onto the station's error kinds
///
/// The structured kind wins; adapters that only report text are classified by
/// the usual platform wording.
pub fn classify_acquisition_error(err: PlatformError) -> CaptureError {
    match err.kind {
        PlatformErrorKind::Busy => CaptureError::DeviceInUse(err.message),
        PlatformErrorKind::NotFound => CaptureError::DeviceNotFound(err.message),
        _ => {
            let text = err.message.to_lowercase();
            if text.contains("in use") || text.contains("busy") {
                CaptureError::DeviceInUse(err.message)
            } else if text.contains("not found") {
                CaptureError::DeviceNotFound(err.message)
            } else {
                CaptureError::Platform(err)
            }
        }
    }
}

/// Single owner of the capture session
pub struct SessionController {
    platform: Arc<dyn CapturePlatform>,
    store: Arc<dyn SettingsStore>,
    preferences: Preferences,
    capabilities: CapabilitySet,
    /// Video device the capability set belongs to
    probed_device: Option<String>,
    session: Option<Session>,
    video_bits_per_second: u64,
}

impl SessionController {
    pub fn new(
        platform: Arc<dyn CapturePlatform>,
        store: Arc<dyn SettingsStore>,
        video_bits_per_second: u64,
    ) -> Self {
        Self {
            platform,
            store,
            preferences: Preferences::default(),
            capabilities: CapabilitySet::fallback(),
            probed_device: None,
            session: None,
            video_bits_per_second,
        }
    }

    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    pub fn set_preferences(&mut self, preferences: Preferences) {
        self.preferences = preferences;
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn session_mut(&mut self) -> Option<&mut Session> {
        self.session.as_mut()
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    fn persist(&self) {
        if let Err(e) = self.store.save(&self.preferences) {
            tracing::warn!("Failed to save settings: {}", e);
        }
    }

    /// Startup: stored preferences, first-run device pairing, probe, open
    pub async fn initialize(&mut self) -> CaptureResult<&Session> {
        self.close();
        match self.store.load() {
            Ok(Some(stored)) => self.preferences = stored,
            Ok(None) => tracing::debug!("No stored settings"),
            Err(e) => tracing::warn!("Ignoring unreadable settings: {}", e),
        }

        if !self.preferences.has_devices() {
            tracing::info!("First time setup");
            let platform = Arc::clone(&self.platform);
            platform.request_permission().await?;

            let pair = DeviceCatalog::new(platform.as_ref()).select_default_pair().await?;
            self.preferences.video_device_id = Some(pair.video.id.clone());
            self.preferences.audio_device_id = Some(pair.audio.id.clone());
            self.probe(&pair.video.id).await;
            self.persist();
        } else if let Some(video_id) = self.preferences.video_device_id.clone() {
            self.probe(&video_id).await;
        }

        self.open().await
    }

    async fn probe(&mut self, video_device_id: &str) {
        let platform = Arc::clone(&self.platform);
        self.capabilities = CapabilityProber::new(platform.as_ref())
            .probe(video_device_id)
            .await;
        self.probed_device = Some(video_device_id.to_string());
    }

    /// Release the current session, if any
    pub fn close(&mut self) {
        if let Some(session) = self.session.take() {
            tracing::info!("Closing session {}", session.id());
        }
    }

    /// Open a session for the current preferences
    ///
    /// Any previous session is released first. On failure no session is left
    /// installed and the controller is ready for another attempt.
    pub async fn open(&mut self) -> CaptureResult<&Session> {
        self.close();

        let platform = Arc::clone(&self.platform);
        let devices = DeviceCatalog::new(platform.as_ref()).devices().await?;

        let video_id = self.resolve_video(&devices)?;
        let audio_id = self.resolve_audio(&devices, &video_id)?;

        if self.probed_device.as_deref() != Some(video_id.as_str()) {
            self.probe(&video_id).await;
        }

        let mut stream = self
            .acquire(platform.as_ref(), &video_id, &audio_id)
            .await?;

        let settings = stream.video_settings();
        let active_resolution = settings.resolution().unwrap_or(self.preferences.resolution);
        let active_framerate = settings
            .rounded_frame_rate()
            .unwrap_or(self.preferences.framerate);

        if active_resolution != self.preferences.resolution
            || active_framerate != self.preferences.framerate
        {
            tracing::info!(
                "Device negotiated {}@{} instead of requested {}@{}",
                active_resolution,
                active_framerate,
                self.preferences.resolution,
                self.preferences.framerate
            );
        }

        self.preferences.video_device_id = Some(video_id.clone());
        self.preferences.audio_device_id = Some(audio_id.clone());
        self.preferences.resolution = active_resolution;
        self.preferences.framerate = active_framerate;
        self.capabilities.resolutions.insert(active_resolution);
        self.capabilities.framerates.insert(active_framerate);

        if !self.preferences.manual_audio_selection {
            let reported = stream.audio_settings().and_then(|s| s.device_id);
            if let Some(reported) = reported.filter(|id| !id.is_empty() && *id != audio_id) {
                tracing::info!(
                    "Platform substituted audio device {} for {}, adopting it",
                    reported,
                    audio_id
                );
                self.preferences.audio_device_id = Some(reported);
            }
        }

        let encoder = match negotiate_encoder_config(platform.as_ref(), self.video_bits_per_second) {
            Some(config) => match stream.create_encoder(&config) {
                Ok(encoder) => Some(encoder),
                Err(e) => {
                    tracing::error!("MediaRecorder error: {}", e);
                    None
                }
            },
            None => {
                tracing::warn!("No supported recording format on {}", platform.name());
                None
            }
        };

        self.persist();

        let session = Session {
            id: Uuid::new_v4(),
            stream,
            video_device_id: video_id,
            audio_device_id: audio_id,
            active_resolution,
            active_framerate,
            encoder,
            opened_at: Utc::now(),
        };

        tracing::info!(
            "Session {} open: {} @ {}fps, video {}, audio {}",
            session.id,
            session.active_resolution,
            session.active_framerate,
            session.video_device_id,
            session.audio_device_id
        );

        Ok(&*self.session.insert(session))
    }

    /// Stored video device, or the default pick when none is stored yet
    fn resolve_video(&self, devices: &[DeviceInfo]) -> CaptureResult<String> {
        match &self.preferences.video_device_id {
            Some(id) => {
                let present = devices
                    .iter()
                    .any(|d| d.kind == DeviceKind::Video && d.id == *id);
                if present {
                    Ok(id.clone())
                } else {
                    Err(CaptureError::DeviceNotFound(format!(
                        "Video device {} not found or disconnected",
                        id
                    )))
                }
            }
            None => Ok(select_default_video(devices)?.id.clone()),
        }
    }

    fn resolve_audio(&self, devices: &[DeviceInfo], video_id: &str) -> CaptureResult<String> {
        let mut audio = devices.iter().filter(|d| d.kind == DeviceKind::Audio);

        let mut audio_id = match &self.preferences.audio_device_id {
            Some(id) if audio.clone().any(|d| d.id == *id) => id.clone(),
            Some(id) => {
                let replacement = audio
                    .next()
                    .ok_or_else(|| CaptureError::NoDeviceFound("No audio device found".to_string()))?;
                tracing::warn!(
                    "Audio device {} is gone, falling back to {}",
                    id,
                    replacement.id
                );
                replacement.id.clone()
            }
            None => {
                let video_label = devices
                    .iter()
                    .find(|d| d.id == video_id)
                    .map(|d| d.label.as_str())
                    .unwrap_or_default();
                select_default_audio(devices, video_label)?.id.clone()
            }
        };

        if !self.preferences.manual_audio_selection && is_default_alias(&audio_id) {
            if let Some(better) = devices
                .iter()
                .find(|d| d.kind == DeviceKind::Audio && !is_default_alias(&d.id))
            {
                tracing::debug!("Replacing audio alias {} with {}", audio_id, better.id);
                audio_id = better.id.clone();
            }
        }

        Ok(audio_id)
    }

    async fn acquire(
        &self,
        platform: &dyn CapturePlatform,
        video_id: &str,
        audio_id: &str,
    ) -> CaptureResult<Box<dyn MediaStream>> {
        let full = StreamConstraints::full(
            video_id,
            audio_id,
            self.preferences.resolution,
            self.preferences.framerate,
        );

        let first_error = match platform.acquire(&full).await {
            Ok(stream) => return Ok(stream),
            Err(e) => e,
        };
        tracing::warn!(
            "{}; retrying with minimal constraints",
            CaptureError::UnsupportedConstraint(first_error.message)
        );

        platform
            .acquire(&StreamConstraints::minimal(video_id, audio_id))
            .await
            .map_err(|e| {
                let err = classify_acquisition_error(e);
                tracing::error!("Stream loading error: {}", err);
                err
            })
    }

    /// Tear down and reopen with the current preferences
    ///
    /// The live audio track's concrete device id is kept unless the user chose
    /// the audio device.
    pub async fn restart(&mut self) -> CaptureResult<&Session> {
        if !self.preferences.manual_audio_selection {
            if let Some(device_id) = self.session.as_ref().and_then(Session::audio_track_device_id) {
                self.preferences.audio_device_id = Some(device_id);
            }
        }
        self.close();
        self.open().await
    }

    /// Fails unless the resolution is one the current capability set offers
    pub fn ensure_resolution(&self, resolution: Resolution) -> CaptureResult<()> {
        if self.capabilities.resolutions.contains(&resolution) {
            Ok(())
        } else {
            Err(CaptureError::UnsupportedConstraint(format!(
                "Resolution {} is not offered by the device",
                resolution
            )))
        }
    }

    /// Fails unless the framerate is one the current capability set offers
    pub fn ensure_framerate(&self, framerate: u32) -> CaptureResult<()> {
        if self.capabilities.framerates.contains(&framerate) {
            Ok(())
        } else {
            Err(CaptureError::UnsupportedConstraint(format!(
                "Framerate {}fps is not offered by the device",
                framerate
            )))
        }
    }

    pub async fn select_resolution(&mut self, resolution: Resolution) -> CaptureResult<&Session> {
        self.ensure_resolution(resolution)?;
        self.preferences.resolution = resolution;
        self.persist();
        self.restart().await
    }

    pub async fn select_framerate(&mut self, framerate: u32) -> CaptureResult<&Session> {
        self.ensure_framerate(framerate)?;
        self.preferences.framerate = framerate;
        self.persist();
        self.restart().await
    }

    /// Explicit user choice; switches off automatic audio substitution
    pub async fn select_audio_device(&mut self, device_id: &str) -> CaptureResult<&Session> {
        self.preferences.audio_device_id = Some(device_id.to_string());
        self.preferences.manual_audio_selection = true;
        self.persist();
        self.restart().await
    }

    /// Forget everything: release the session and clear stored preferences
    pub fn reset(&mut self) -> CaptureResult<()> {
        self.close();
        self.store.clear()?;
        self.preferences = Preferences::default();
        self.capabilities = CapabilitySet::fallback();
        self.probed_device = None;
        tracing::info!("Settings reset");
        Ok(())
    }

    /// Audio inputs with the live (or preferred) one marked selected
    pub async fn audio_options(&self) -> CaptureResult<Vec<AudioOption>> {
        let selected = self
            .session
            .as_ref()
            .and_then(Session::audio_track_device_id)
            .or_else(|| self.preferences.audio_device_id.clone());

        let inputs = DeviceCatalog::new(self.platform.as_ref()).audio_inputs().await?;
        Ok(inputs
            .iter()
            .map(|d| AudioOption::from_device(d, selected.as_deref()))
            .collect())
    }
}
