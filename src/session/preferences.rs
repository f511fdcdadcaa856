//! Capture preferences
//!
//! Serialized with the same keys the settings store has always used.

use crate::capture::traits::Resolution;
use serde::{Deserialize, Serialize};

pub const DEFAULT_RESOLUTION: Resolution = Resolution::new(1920, 1080);
pub const DEFAULT_FRAMERATE: u32 = 60;

fn default_resolution() -> Resolution {
    DEFAULT_RESOLUTION
}

fn default_framerate() -> u32 {
    DEFAULT_FRAMERATE
}

/// Device and format choice for the capture session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    #[serde(default)]
    pub video_device_id: Option<String>,

    #[serde(default)]
    pub audio_device_id: Option<String>,

    #[serde(rename = "selectedResolution", default = "default_resolution")]
    pub resolution: Resolution,

    #[serde(rename = "selectedFramerate", default = "default_framerate")]
    pub framerate: u32,

    /// Set once the user picks an audio input; disables automatic substitution
    #[serde(default)]
    pub manual_audio_selection: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            video_device_id: None,
            audio_device_id: None,
            resolution: DEFAULT_RESOLUTION,
            framerate: DEFAULT_FRAMERATE,
            manual_audio_selection: false,
        }
    }
}

impl Preferences {
    /// Both devices chosen; otherwise first-run setup is needed
    pub fn has_devices(&self) -> bool {
        self.video_device_id.is_some() && self.audio_device_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stored_keys() {
        let prefs = Preferences {
            video_device_id: Some("v1".to_string()),
            audio_device_id: Some("a1".to_string()),
            resolution: Resolution::new(1280, 720),
            framerate: 30,
            manual_audio_selection: false,
        };
        let json = serde_json::to_value(&prefs).unwrap();
        assert_eq!(json["videoDeviceId"], "v1");
        assert_eq!(json["audioDeviceId"], "a1");
        assert_eq!(json["selectedResolution"], "1280x720");
        assert_eq!(json["selectedFramerate"], 30);
    }

    #[test]
    fn test_missing_fields_default() {
        let prefs: Preferences = serde_json::from_str(r#"{"videoDeviceId":"v1"}"#).unwrap();
        assert_eq!(prefs.resolution, DEFAULT_RESOLUTION);
        assert_eq!(prefs.framerate, 60);
        assert!(!prefs.has_devices());
        assert!(!prefs.manual_audio_selection);
    }
}
