//! Encoder negotiation
//!
//! Picks the first container/codec pair the platform can encode. Bitrate is a
//! fixed configured value and does not follow the negotiated resolution.

use crate::capture::traits::{CapturePlatform, EncoderConfig};
use std::time::Duration;

/// Tried in order; the first supported one wins
pub const MIME_TYPE_CANDIDATES: [&str; 4] = [
    "video/webm;codecs=vp9,opus",
    "video/webm;codecs=vp8,opus",
    "video/webm",
    "video/mp4",
];

pub const DEFAULT_VIDEO_BITS_PER_SECOND: u64 = 8_000_000;

/// Encoder emits one chunk per interval of capture
pub const DEFAULT_CHUNK_INTERVAL: Duration = Duration::from_millis(500);

pub fn negotiate_mime_type(platform: &dyn CapturePlatform) -> Option<&'static str> {
    MIME_TYPE_CANDIDATES
        .into_iter()
        .find(|mime| platform.is_type_supported(mime))
}

pub fn negotiate_encoder_config(
    platform: &dyn CapturePlatform,
    video_bits_per_second: u64,
) -> Option<EncoderConfig> {
    let mime_type = negotiate_mime_type(platform)?;
    tracing::debug!(
        "Negotiated encoder {} @ {} bps on {}",
        mime_type,
        video_bits_per_second,
        platform.name()
    );
    Some(EncoderConfig {
        mime_type: mime_type.to_string(),
        video_bits_per_second,
    })
}

/// File extension for a container mime type
pub fn container_extension(mime_type: &str) -> &'static str {
    let mime = mime_type.to_ascii_lowercase();
    if mime.starts_with("video/mp4") || mime.starts_with("audio/mp4") {
        "mp4"
    } else {
        "webm"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::fake::FakePlatform;

    #[test]
    fn test_first_supported_candidate_wins() {
        let platform = FakePlatform::new(vec![]);
        platform.set_supported_mime_types(&["video/mp4", "video/webm;codecs=vp8,opus"]);
        assert_eq!(negotiate_mime_type(&platform), Some("video/webm;codecs=vp8,opus"));

        platform.set_supported_mime_types(&["video/mp4"]);
        let config = negotiate_encoder_config(&platform, DEFAULT_VIDEO_BITS_PER_SECOND).unwrap();
        assert_eq!(config.mime_type, "video/mp4");
        assert_eq!(config.video_bits_per_second, 8_000_000);

        platform.set_supported_mime_types(&[]);
        assert_eq!(negotiate_encoder_config(&platform, 1), None);
    }

    #[test]
    fn test_container_extension() {
        assert_eq!(container_extension("video/webm;codecs=vp9,opus"), "webm");
        assert_eq!(container_extension("video/mp4"), "mp4");
        assert_eq!(container_extension(""), "webm");
    }
}
