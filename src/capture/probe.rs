//! Capability probing
//!
//! Opens a short-lived, video-only test stream on a device and checks the
//! canonical resolution/framerate ladder against the ranges the device reports.
//! The result is never empty: a hard fallback set is always merged in.

use super::traits::{
    CapturePlatform, MediaStream, Resolution, StreamConstraints, TrackCapabilities, TrackSettings,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Canonical resolutions, largest first
pub const RESOLUTION_LADDER: [Resolution; 3] = [
    Resolution::new(1920, 1080),
    Resolution::new(1280, 720),
    Resolution::new(640, 480),
];

/// Canonical framerates, highest first
pub const FRAMERATE_LADDER: [u32; 3] = [60, 30, 25];

/// Always offered, whatever the device reports
pub const FALLBACK_RESOLUTIONS: [Resolution; 2] =
    [Resolution::new(1280, 720), Resolution::new(640, 480)];

pub const FALLBACK_FRAMERATES: [u32; 1] = [30];

/// Resolutions and framerates a video device accepts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet {
    pub resolutions: BTreeSet<Resolution>,
    pub framerates: BTreeSet<u32>,
}

impl CapabilitySet {
    /// The hard fallback set on its own
    pub fn fallback() -> Self {
        let mut set = Self::default();
        set.add_fallback();
        set
    }

    pub fn add_fallback(&mut self) {
        self.resolutions.extend(FALLBACK_RESOLUTIONS);
        self.framerates.extend(FALLBACK_FRAMERATES);
    }

    /// Widest first
    pub fn sorted_resolutions(&self) -> Vec<Resolution> {
        let mut resolutions: Vec<Resolution> = self.resolutions.iter().copied().collect();
        resolutions.sort_by(|a, b| b.width.cmp(&a.width).then(b.height.cmp(&a.height)));
        resolutions
    }

    /// Fastest first
    pub fn sorted_framerates(&self) -> Vec<u32> {
        self.framerates.iter().rev().copied().collect()
    }

    /// Ladder entries inside the reported ranges, plus what was negotiated
    ///
    /// Without width/height (or framerate) ranges only the negotiated value is
    /// taken for that axis.
    pub fn from_track(capabilities: Option<&TrackCapabilities>, settings: &TrackSettings) -> Self {
        let mut set = Self::default();

        let size_ranges = capabilities.and_then(|caps| caps.width.zip(caps.height));
        if let Some((width, height)) = size_ranges {
            set.resolutions.extend(RESOLUTION_LADDER.iter().copied().filter(|res| {
                width.contains(f64::from(res.width)) && height.contains(f64::from(res.height))
            }));
        }
        if let Some(actual) = settings.resolution() {
            set.resolutions.insert(actual);
        }

        if let Some(range) = capabilities.and_then(|caps| caps.frame_rate) {
            set.framerates.extend(
                FRAMERATE_LADDER
                    .iter()
                    .copied()
                    .filter(|fps| range.contains(f64::from(*fps))),
            );
        }
        if let Some(actual) = settings.rounded_frame_rate() {
            set.framerates.insert(actual);
        }

        set
    }
}

/// Releases the wrapped stream on every exit path
pub(crate) struct StreamGuard {
    stream: Box<dyn MediaStream>,
}

impl StreamGuard {
    pub(crate) fn new(stream: Box<dyn MediaStream>) -> Self {
        Self { stream }
    }
}

impl std::ops::Deref for StreamGuard {
    type Target = dyn MediaStream;

    fn deref(&self) -> &Self::Target {
        self.stream.as_ref()
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.stream.release();
    }
}

/// Checks what a video device can actually do
pub struct CapabilityProber<'a> {
    platform: &'a dyn CapturePlatform,
}

impl<'a> CapabilityProber<'a> {
    pub fn new(platform: &'a dyn CapturePlatform) -> Self {
        Self { platform }
    }

    /// Probe never fails; errors are logged and absorbed into the fallback set
    pub async fn probe(&self, video_device_id: &str) -> CapabilitySet {
        let mut set = match self
            .platform
            .acquire(&StreamConstraints::probe(video_device_id))
            .await
        {
            Ok(stream) => {
                let stream = StreamGuard::new(stream);
                let settings = stream.video_settings();
                let capabilities = stream.video_capabilities();
                if capabilities.is_none() {
                    tracing::debug!(
                        "Device {} reports no capability ranges, using negotiated settings only",
                        video_device_id
                    );
                }
                CapabilitySet::from_track(capabilities.as_ref(), &settings)
            }
            Err(e) => {
                tracing::warn!("Failed to detect capabilities for {}: {}", video_device_id, e);
                CapabilitySet::default()
            }
        };

        set.add_fallback();

        tracing::info!(
            "Capabilities for {}: resolutions [{}], framerates {:?}",
            video_device_id,
            set.sorted_resolutions()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", "),
            set.sorted_framerates()
        );

        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::fake::{FakeCamera, FakePlatform};
    use crate::capture::traits::{CapabilityRange, DeviceInfo, PlatformError};

    fn res(s: &str) -> Resolution {
        s.parse().unwrap()
    }

    #[test]
    fn test_ladder_filtered_by_ranges_plus_actual() {
        let caps = TrackCapabilities {
            width: Some(CapabilityRange::new(640.0, 1920.0)),
            height: Some(CapabilityRange::new(480.0, 1080.0)),
            frame_rate: None,
        };
        let settings = TrackSettings {
            width: Some(1600),
            height: Some(900),
            ..Default::default()
        };

        let set = CapabilitySet::from_track(Some(&caps), &settings);
        let expected: BTreeSet<Resolution> = ["1920x1080", "1280x720", "640x480", "1600x900"]
            .into_iter()
            .map(res)
            .collect();
        assert_eq!(set.resolutions, expected);
    }

    #[test]
    fn test_width_and_height_checked_independently() {
        let caps = TrackCapabilities {
            width: Some(CapabilityRange::new(640.0, 1920.0)),
            height: Some(CapabilityRange::new(480.0, 720.0)),
            frame_rate: Some(CapabilityRange::new(1.0, 30.0)),
        };
        let settings = TrackSettings {
            width: Some(1280),
            height: Some(720),
            frame_rate: Some(29.97),
            ..Default::default()
        };

        let set = CapabilitySet::from_track(Some(&caps), &settings);
        assert!(!set.resolutions.contains(&res("1920x1080")));
        assert!(set.resolutions.contains(&res("1280x720")));
        assert_eq!(set.framerates.iter().copied().collect::<Vec<_>>(), vec![25, 30]);
    }

    #[test]
    fn test_without_ranges_only_actual() {
        let settings = TrackSettings {
            width: Some(1024),
            height: Some(768),
            frame_rate: Some(50.0),
            ..Default::default()
        };
        let set = CapabilitySet::from_track(None, &settings);
        assert_eq!(set.resolutions.len(), 1);
        assert!(set.resolutions.contains(&res("1024x768")));
        assert_eq!(set.framerates.iter().copied().collect::<Vec<_>>(), vec![50]);
    }

    #[test]
    fn test_sorting_for_presenter() {
        let mut set = CapabilitySet::fallback();
        set.resolutions.insert(res("1920x1080"));
        set.resolutions.insert(res("1600x900"));
        set.framerates.extend([60, 25]);

        let sorted: Vec<String> = set.sorted_resolutions().iter().map(ToString::to_string).collect();
        assert_eq!(sorted, vec!["1920x1080", "1600x900", "1280x720", "640x480"]);
        assert_eq!(set.sorted_framerates(), vec![60, 30, 25]);
    }

    #[tokio::test]
    async fn test_probe_never_empty() {
        let degenerate = [
            None,
            Some(TrackCapabilities::default()),
            Some(TrackCapabilities {
                width: Some(CapabilityRange::new(2000.0, 100.0)),
                height: Some(CapabilityRange::new(0.0, 0.0)),
                frame_rate: Some(CapabilityRange::new(f64::NAN, f64::NAN)),
            }),
        ];

        for capabilities in degenerate {
            let platform = FakePlatform::new(vec![DeviceInfo::video("v1", "Capture")]);
            platform.set_camera(
                "v1",
                FakeCamera {
                    capabilities,
                    negotiated: None,
                    frame_rate: None,
                },
            );

            let set = CapabilityProber::new(&platform).probe("v1").await;
            assert!(!set.resolutions.is_empty());
            assert!(!set.framerates.is_empty());
            assert!(set.resolutions.contains(&res("1280x720")));
            assert!(set.framerates.contains(&30));
        }
    }

    #[tokio::test]
    async fn test_probe_failure_falls_back_and_releases() {
        let platform = FakePlatform::new(vec![DeviceInfo::video("v1", "Capture")]);
        platform.fail_next_acquire(PlatformError::busy("Could not start video source"));

        let set = CapabilityProber::new(&platform).probe("v1").await;
        assert_eq!(set, CapabilitySet::fallback());
        assert_eq!(platform.open_streams(), 0);
    }

    #[tokio::test]
    async fn test_probe_stream_is_video_only_and_released() {
        let platform = FakePlatform::new(vec![
            DeviceInfo::video("v1", "Cam Link 4K"),
            DeviceInfo::audio("a1", "Cam Link 4K Audio"),
        ]);

        let set = CapabilityProber::new(&platform).probe("v1").await;
        assert!(set.resolutions.contains(&res("1920x1080")));
        assert_eq!(platform.open_streams(), 0);

        let acquisitions = platform.acquisitions();
        assert_eq!(acquisitions.len(), 1);
        assert!(acquisitions[0].audio.is_none());
    }
}
