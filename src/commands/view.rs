//! Presenter view model

use crate::capture::traits::Resolution;
use crate::recorder::state::RecordingStatus;
use crate::session::{AudioOption, Session, SessionController};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The live session as the presenter sees it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: Uuid,
    pub video_device_id: String,
    pub audio_device_id: String,
    pub resolution: Resolution,
    pub framerate: u32,
    pub mime_type: Option<String>,
    pub opened_at: DateTime<Utc>,
}

impl From<&Session> for SessionInfo {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id(),
            video_device_id: session.video_device_id().to_string(),
            audio_device_id: session.audio_device_id().to_string(),
            resolution: session.active_resolution(),
            framerate: session.active_framerate(),
            mime_type: session.mime_type().map(str::to_string),
            opened_at: session.opened_at(),
        }
    }
}

/// Option sets, selections and state for rendering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationView {
    /// Widest first
    pub resolutions: Vec<Resolution>,
    /// Fastest first
    pub framerates: Vec<u32>,
    pub selected_resolution: Resolution,
    pub selected_framerate: u32,
    pub audio_options: Vec<AudioOption>,
    pub recording: RecordingStatus,
    pub session: Option<SessionInfo>,
}

impl StationView {
    pub fn build(
        controller: &SessionController,
        audio_options: Vec<AudioOption>,
        recording: RecordingStatus,
    ) -> Self {
        let capabilities = controller.capabilities();
        let preferences = controller.preferences();
        Self {
            resolutions: capabilities.sorted_resolutions(),
            framerates: capabilities.sorted_framerates(),
            selected_resolution: preferences.resolution,
            selected_framerate: preferences.framerate,
            audio_options,
            recording,
            session: controller.session().map(SessionInfo::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::fake::FakePlatform;
    use crate::capture::traits::DeviceInfo;
    use crate::recorder::state::RecordingState;
    use crate::settings::MemoryStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_view_sorted_and_selected() {
        let platform = FakePlatform::new(vec![
            DeviceInfo::video("v1", "Elgato HD60"),
            DeviceInfo::audio("a1", "Elgato HD60 Audio"),
        ]);
        let mut controller =
            SessionController::new(Arc::new(platform), Arc::new(MemoryStore::default()), 1);
        controller.initialize().await.unwrap();

        let options = controller.audio_options().await.unwrap();
        let view = StationView::build(
            &controller,
            options,
            RecordingStatus {
                state: RecordingState::Idle,
                duration_ms: 0,
                chunk_count: 0,
            },
        );

        let widths: Vec<u32> = view.resolutions.iter().map(|r| r.width).collect();
        assert!(widths.windows(2).all(|w| w[0] >= w[1]));
        assert!(view.framerates.windows(2).all(|w| w[0] > w[1]));
        assert_eq!(view.selected_resolution, Resolution::new(1920, 1080));
        assert_eq!(view.selected_framerate, 60);
        assert!(view.resolutions.contains(&view.selected_resolution));
        assert!(view.audio_options[0].selected);
        assert_eq!(view.recording, RecordingStatus::default());

        let again = StationView::build(
            &controller,
            controller.audio_options().await.unwrap(),
            RecordingStatus::default(),
        );
        assert_eq!(again, view);
        assert_eq!(view.session.unwrap().video_device_id, "v1");
    }
}
