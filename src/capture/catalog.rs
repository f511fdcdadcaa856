//! Device catalog
//!
//! Picks the most likely capture-card video input and the audio input that
//! belongs to it. Device lists are enumerated fresh for every query.

use super::traits::{CapturePlatform, DeviceInfo, DeviceKind};
use crate::utils::error::{CaptureError, CaptureResult};

/// Label fragments that identify capture hardware
pub const CAPTURE_HARDWARE_TERMS: &[&str] = &["capture", "hdmi", "elgato", "avermedia", "cam link"];

/// Label fragments of generic microphones, never picked automatically
pub const GENERIC_MICROPHONE_TERMS: &[&str] = &["microphone", "mic", "línea"];

/// Platform aliases that follow the system default rather than a device
pub const DEFAULT_DEVICE_ALIASES: &[&str] = &["default", "communications"];

/// A selected video + audio pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePair {
    pub video: DeviceInfo,
    pub audio: DeviceInfo,
}

pub fn is_default_alias(device_id: &str) -> bool {
    DEFAULT_DEVICE_ALIASES.contains(&device_id)
}

fn label_matches(label: &str, terms: &[&str]) -> bool {
    let label = label.to_lowercase();
    terms.iter().any(|term| label.contains(term))
}

fn of_kind(devices: &[DeviceInfo], kind: DeviceKind) -> impl Iterator<Item = &DeviceInfo> {
    devices.iter().filter(move |d| d.kind == kind)
}

/// First video device with a capture-hardware label, else the first video device
pub fn select_default_video(devices: &[DeviceInfo]) -> CaptureResult<&DeviceInfo> {
    let mut videos = of_kind(devices, DeviceKind::Video).peekable();
    let first = *videos
        .peek()
        .ok_or_else(|| CaptureError::NoDeviceFound("No video devices found".to_string()))?;

    Ok(videos
        .find(|d| label_matches(&d.label, CAPTURE_HARDWARE_TERMS))
        .unwrap_or(first))
}

/// Audio input that most likely belongs to the chosen video device
///
/// Preference order: a non-alias, non-microphone input whose label contains the
/// first word of the video label; any such input; then the first concrete
/// device of the enumeration, looking past the leading entry (usually the
/// default alias) first; the first entry only when every input is an alias.
pub fn select_default_audio<'a>(
    devices: &'a [DeviceInfo],
    chosen_video_label: &str,
) -> CaptureResult<&'a DeviceInfo> {
    let audio: Vec<&DeviceInfo> = of_kind(devices, DeviceKind::Audio).collect();
    let first = *audio
        .first()
        .ok_or_else(|| CaptureError::NoDeviceFound("No audio device found".to_string()))?;

    let candidates: Vec<&DeviceInfo> = audio
        .iter()
        .copied()
        .filter(|d| !is_default_alias(&d.id) && !label_matches(&d.label, GENERIC_MICROPHONE_TERMS))
        .collect();

    let video_word = chosen_video_label
        .split_whitespace()
        .next()
        .map(str::to_lowercase);

    if let Some(word) = video_word {
        if let Some(matching) = candidates
            .iter()
            .copied()
            .find(|d| d.label.to_lowercase().contains(&word))
        {
            return Ok(matching);
        }
    }

    if let Some(candidate) = candidates.first().copied() {
        return Ok(candidate);
    }

    Ok(audio
        .iter()
        .skip(1)
        .chain(audio.first())
        .find(|d| !is_default_alias(&d.id))
        .copied()
        .unwrap_or(first))
}

/// Enumerates devices through the platform adapter
pub struct DeviceCatalog<'a> {
    platform: &'a dyn CapturePlatform,
}

impl<'a> DeviceCatalog<'a> {
    pub fn new(platform: &'a dyn CapturePlatform) -> Self {
        Self { platform }
    }

    /// Fresh enumeration; never cached
    pub async fn devices(&self) -> CaptureResult<Vec<DeviceInfo>> {
        let devices = self.platform.enumerate_devices().await?;
        tracing::debug!(
            "{} enumerated {} devices",
            self.platform.name(),
            devices.len()
        );
        Ok(devices)
    }

    pub async fn audio_inputs(&self) -> CaptureResult<Vec<DeviceInfo>> {
        Ok(self
            .devices()
            .await?
            .into_iter()
            .filter(|d| d.kind == DeviceKind::Audio)
            .collect())
    }

    /// First-run pairing of a video device with its audio input
    pub async fn select_default_pair(&self) -> CaptureResult<DevicePair> {
        let devices = self.devices().await?;
        let video = select_default_video(&devices)?.clone();
        let audio = select_default_audio(&devices, &video.label)?.clone();

        tracing::info!(
            "Selected default devices: video '{}' ({}), audio '{}' ({})",
            video.label,
            video.id,
            audio.label,
            audio.id
        );

        Ok(DevicePair { video, audio })
    }
}
