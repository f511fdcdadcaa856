//! Duration correction for chunked recordings
//!
//! Chunked encoders start writing before they know how long the recording will
//! be, so the container carries no duration. After stop, the measured
//! wall-clock time is written into `Segment/Info/Duration`: overwritten in place
//! when the element exists, inserted at the end of `Info` otherwise.

use super::ebml::{self, EbmlError, ElementHeader};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationFixError {
    #[error("container '{0}' has no duration fix")]
    UnsupportedContainer(String),

    #[error("buffer is not an EBML document")]
    NotEbml,

    #[error("no Segment element")]
    MissingSegment,

    #[error("no Info element before the first cluster")]
    MissingInfo,

    #[error("Duration element has unexpected size {0}")]
    InvalidDuration(u64),

    #[error("{0} size no longer fits its size field")]
    SizeOverflow(&'static str),

    #[error("malformed container: {0}")]
    Malformed(#[from] EbmlError),
}

/// Rewrites a finished buffer so it reports `duration_ms`
pub trait DurationFixer: Send + Sync {
    fn fix(&self, buffer: &[u8], mime_type: &str, duration_ms: u64)
        -> Result<Vec<u8>, DurationFixError>;
}

/// EBML rewrite for WebM/Matroska output
#[derive(Debug, Default, Clone, Copy)]
pub struct WebmDurationFixer;

struct InfoLayout {
    segment: ElementHeader,
    info: ElementHeader,
    timecode_scale: u64,
    duration: Option<ElementHeader>,
}

fn locate_info(buf: &[u8]) -> Result<InfoLayout, DurationFixError> {
    let header = ebml::read_header(buf, 0).map_err(|_| DurationFixError::NotEbml)?;
    if header.id != ebml::EBML || header.size.is_none() {
        return Err(DurationFixError::NotEbml);
    }

    let segment = ebml::children(buf, header.data_end(buf.len()), buf.len())?
        .into_iter()
        .find(|el| el.id == ebml::SEGMENT)
        .ok_or(DurationFixError::MissingSegment)?;

    let segment_end = segment.data_end(buf.len()).min(buf.len());
    let info = ebml::children(buf, segment.data_start(), segment_end)?
        .into_iter()
        .find(|el| el.id == ebml::INFO && el.size.is_some())
        .ok_or(DurationFixError::MissingInfo)?;

    let info_end = info.data_end(segment_end);
    if info_end > buf.len() {
        return Err(EbmlError::Truncated(info.offset).into());
    }

    let mut timecode_scale = ebml::DEFAULT_TIMECODE_SCALE;
    let mut duration = None;
    for child in ebml::children(buf, info.data_start(), info_end)? {
        let data = buf
            .get(child.data_start()..child.data_end(info_end))
            .ok_or(EbmlError::Truncated(child.offset))?;
        match child.id {
            ebml::TIMECODE_SCALE => {
                let scale = ebml::read_uint(data);
                if scale > 0 {
                    timecode_scale = scale;
                }
            }
            ebml::DURATION => duration = Some(child),
            _ => {}
        }
    }

    Ok(InfoLayout {
        segment,
        info,
        timecode_scale,
        duration,
    })
}

/// Duration stored in a WebM buffer, in milliseconds
pub fn read_duration_ms(buf: &[u8]) -> Result<Option<f64>, DurationFixError> {
    let layout = locate_info(buf)?;
    let Some(duration) = layout.duration else {
        return Ok(None);
    };
    let data = &buf[duration.data_start()..duration.data_end(buf.len())];
    let ticks = ebml::read_float(data)
        .ok_or(DurationFixError::InvalidDuration(duration.size.unwrap_or(0)))?;
    Ok(Some(ticks * layout.timecode_scale as f64 / 1_000_000.0))
}

fn resize(header: &ElementHeader, new_size: u64, what: &'static str) -> Result<Vec<u8>, DurationFixError> {
    ebml::encode_size(new_size, header.size_len)
        .or_else(|| ebml::encode_size_minimal(new_size))
        .ok_or(DurationFixError::SizeOverflow(what))
}

impl DurationFixer for WebmDurationFixer {
    fn fix(
        &self,
        buffer: &[u8],
        mime_type: &str,
        duration_ms: u64,
    ) -> Result<Vec<u8>, DurationFixError> {
        let mime = mime_type.to_ascii_lowercase();
        if !(mime.contains("webm") || mime.contains("matroska")) {
            return Err(DurationFixError::UnsupportedContainer(mime_type.to_string()));
        }

        let layout = locate_info(buffer)?;
        let ticks = duration_ms as f64 * 1_000_000.0 / layout.timecode_scale as f64;

        if let Some(existing) = layout.duration {
            let mut out = buffer.to_vec();
            let start = existing.data_start();
            match existing.size {
                Some(8) => out[start..start + 8].copy_from_slice(&ticks.to_be_bytes()),
                Some(4) => out[start..start + 4].copy_from_slice(&(ticks as f32).to_be_bytes()),
                other => return Err(DurationFixError::InvalidDuration(other.unwrap_or(0))),
            }
            return Ok(out);
        }

        let inserted = ebml::float_element(ebml::DURATION, ticks);
        let info = layout.info;
        let segment = layout.segment;
        let info_end = info.data_end(buffer.len());

        let old_info_size = info.size.unwrap_or(0);
        let info_size = resize(&info, old_info_size + inserted.len() as u64, "Info")?;
        let info_growth = inserted.len() + info_size.len() - info.size_len;

        let segment_size = match segment.size {
            Some(size) => resize(&segment, size + info_growth as u64, "Segment")?,
            None => buffer[segment.offset + segment.id_len..segment.data_start()].to_vec(),
        };

        let mut out = Vec::with_capacity(buffer.len() + info_growth + 8);
        out.extend_from_slice(&buffer[..segment.offset + segment.id_len]);
        out.extend_from_slice(&segment_size);
        out.extend_from_slice(&buffer[segment.data_start()..info.offset + info.id_len]);
        out.extend_from_slice(&info_size);
        out.extend_from_slice(&buffer[info.data_start()..info_end]);
        out.extend_from_slice(&inserted);
        out.extend_from_slice(&buffer[info_end..]);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::ebml::*;

    fn live_recording(clusters: u64) -> Vec<u8> {
        let mut buf = live_stream_header("streamcap-test");
        for i in 0..clusters {
            buf.extend(live_cluster(i * 500, &[0x81, 0x00, 0x00, 0x80, i as u8]));
        }
        buf
    }

    #[test]
    fn test_inserts_missing_duration() {
        let buf = live_recording(3);
        assert_eq!(read_duration_ms(&buf).unwrap(), None);

        let fixed = WebmDurationFixer.fix(&buf, "video/webm;codecs=vp9,opus", 1_500).unwrap();
        assert_eq!(fixed.len(), buf.len() + 11);
        assert_eq!(read_duration_ms(&fixed).unwrap(), Some(1_500.0));

        // clusters after Info are untouched
        assert!(fixed.ends_with(&buf[buf.len() - 40..]));
    }

    #[test]
    fn test_overwrites_existing_duration() {
        let mut info = uint_element(TIMECODE_SCALE, DEFAULT_TIMECODE_SCALE);
        info.extend(float_element(DURATION, 0.0));
        let mut buf = element(EBML, &string_element(EBML_DOC_TYPE, "webm"));
        buf.extend(unknown_size_start(SEGMENT));
        buf.extend(element(INFO, &info));
        buf.extend(live_cluster(0, &[1, 2, 3]));

        let fixed = WebmDurationFixer.fix(&buf, "video/webm", 2_750).unwrap();
        assert_eq!(fixed.len(), buf.len());
        assert_eq!(read_duration_ms(&fixed).unwrap(), Some(2_750.0));
    }

    #[test]
    fn test_four_byte_duration_and_custom_scale() {
        let mut info = uint_element(TIMECODE_SCALE, 1_000);
        info.extend(element(DURATION, &0f32.to_be_bytes()));
        let mut buf = element(EBML, &string_element(EBML_DOC_TYPE, "webm"));
        buf.extend(unknown_size_start(SEGMENT));
        buf.extend(element(INFO, &info));

        let fixed = WebmDurationFixer.fix(&buf, "video/webm", 4_000).unwrap();
        let read = read_duration_ms(&fixed).unwrap().unwrap();
        assert!((read - 4_000.0).abs() < 0.01);
    }

    #[test]
    fn test_known_size_segment_grows() {
        let info = uint_element(TIMECODE_SCALE, DEFAULT_TIMECODE_SCALE);
        let mut body = element(SEEK_HEAD, &[]);
        body.extend(element(INFO, &info));
        body.extend(element(TRACKS, &[]));
        let mut buf = element(EBML, &string_element(EBML_DOC_TYPE, "webm"));
        buf.extend(element(SEGMENT, &body));

        let fixed = WebmDurationFixer.fix(&buf, "video/webm", 900).unwrap();
        assert_eq!(read_duration_ms(&fixed).unwrap(), Some(900.0));

        let ebml_header = read_header(&fixed, 0).unwrap();
        let segment = read_header(&fixed, ebml_header.data_end(fixed.len())).unwrap();
        assert_eq!(segment.data_end(usize::MAX), fixed.len());
    }

    #[test]
    fn test_rejects_non_webm() {
        let buf = live_recording(1);
        assert_eq!(
            WebmDurationFixer.fix(&buf, "video/mp4", 1_000),
            Err(DurationFixError::UnsupportedContainer("video/mp4".to_string()))
        );
        assert_eq!(
            WebmDurationFixer.fix(b"ftypisom", "video/webm", 1_000),
            Err(DurationFixError::NotEbml)
        );
    }

    #[test]
    fn test_missing_info() {
        let mut buf = element(EBML, &string_element(EBML_DOC_TYPE, "webm"));
        buf.extend(unknown_size_start(SEGMENT));
        buf.extend(live_cluster(0, &[1]));
        assert_eq!(
            WebmDurationFixer.fix(&buf, "video/webm", 1_000),
            Err(DurationFixError::MissingInfo)
        );
    }
}
