//! Minimal EBML (Matroska/WebM) element codec
//!
//! Just enough reading and writing to locate and rewrite header elements of a
//! chunked WebM recording. Element payloads are never decoded beyond unsigned
//! integers and floats.

use thiserror::Error;

pub const EBML: u32 = 0x1A45_DFA3;
pub const EBML_DOC_TYPE: u32 = 0x4282;
pub const SEGMENT: u32 = 0x1853_8067;
pub const SEEK_HEAD: u32 = 0x114D_9B74;
pub const INFO: u32 = 0x1549_A966;
pub const TIMECODE_SCALE: u32 = 0x2A_D7B1;
pub const DURATION: u32 = 0x4489;
pub const MUXING_APP: u32 = 0x4D80;
pub const WRITING_APP: u32 = 0x5741;
pub const TRACKS: u32 = 0x1654_AE6B;
pub const CLUSTER: u32 = 0x1F43_B675;
pub const TIMECODE: u32 = 0xE7;
pub const SIMPLE_BLOCK: u32 = 0xA3;
pub const VOID: u32 = 0xEC;

/// Matroska default: timestamps in milliseconds
pub const DEFAULT_TIMECODE_SCALE: u64 = 1_000_000;

/// Size field meaning "until the parent ends", as written by live muxers
pub const UNKNOWN_SIZE: [u8; 8] = [0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EbmlError {
    #[error("buffer truncated at offset {0}")]
    Truncated(usize),

    #[error("invalid element id at offset {0}")]
    InvalidId(usize),

    #[error("invalid element size at offset {0}")]
    InvalidSize(usize),
}

/// Position and extent of one element inside a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementHeader {
    pub id: u32,
    /// Offset of the first id byte
    pub offset: usize,
    pub id_len: usize,
    pub size_len: usize,
    /// `None` for unknown-size elements
    pub size: Option<u64>,
}

impl ElementHeader {
    pub fn header_len(&self) -> usize {
        self.id_len + self.size_len
    }

    pub fn data_start(&self) -> usize {
        self.offset + self.header_len()
    }

    /// End of the payload, clamped to `limit` for unknown sizes
    pub fn data_end(&self, limit: usize) -> usize {
        match self.size {
            Some(size) => self.data_start().saturating_add(size as usize),
            None => limit,
        }
    }
}

fn vint_len(first: u8) -> usize {
    first.leading_zeros() as usize + 1
}

pub fn read_id(buf: &[u8], pos: usize) -> Result<(u32, usize), EbmlError> {
    let first = *buf.get(pos).ok_or(EbmlError::Truncated(pos))?;
    let len = vint_len(first);
    if len > 4 {
        return Err(EbmlError::InvalidId(pos));
    }
    let bytes = buf.get(pos..pos + len).ok_or(EbmlError::Truncated(pos))?;
    let id = bytes.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b));
    Ok((id, len))
}

pub fn read_size(buf: &[u8], pos: usize) -> Result<(Option<u64>, usize), EbmlError> {
    let first = *buf.get(pos).ok_or(EbmlError::Truncated(pos))?;
    if first == 0 {
        return Err(EbmlError::InvalidSize(pos));
    }
    let len = vint_len(first);
    let bytes = buf.get(pos..pos + len).ok_or(EbmlError::Truncated(pos))?;

    let mask = if len >= 8 { 0 } else { 0xFFu8 >> len };
    let mut value = u64::from(first & mask);
    for b in &bytes[1..] {
        value = (value << 8) | u64::from(*b);
    }

    let all_ones = (1u64 << (7 * len)) - 1;
    if value == all_ones {
        Ok((None, len))
    } else {
        Ok((Some(value), len))
    }
}

pub fn read_header(buf: &[u8], pos: usize) -> Result<ElementHeader, EbmlError> {
    let (id, id_len) = read_id(buf, pos)?;
    let (size, size_len) = read_size(buf, pos + id_len)?;
    Ok(ElementHeader {
        id,
        offset: pos,
        id_len,
        size_len,
        size,
    })
}

/// Children of `[start, end)`, stopping after the first unknown-size child
pub fn children(buf: &[u8], start: usize, end: usize) -> Result<Vec<ElementHeader>, EbmlError> {
    let mut out = Vec::new();
    let mut pos = start;
    while pos < end {
        let header = read_header(buf, pos)?;
        out.push(header);
        match header.size {
            Some(_) => pos = header.data_end(end),
            None => break,
        }
    }
    Ok(out)
}

pub fn read_uint(data: &[u8]) -> u64 {
    data.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}

/// 4 or 8 byte big-endian float
pub fn read_float(data: &[u8]) -> Option<f64> {
    match data.len() {
        4 => Some(f64::from(f32::from_be_bytes(data.try_into().ok()?))),
        8 => Some(f64::from_be_bytes(data.try_into().ok()?)),
        _ => None,
    }
}

/// Size field of exactly `width` bytes, if `value` fits
pub fn encode_size(value: u64, width: usize) -> Option<Vec<u8>> {
    if !(1..=8).contains(&width) {
        return None;
    }
    let max = (1u64 << (7 * width)) - 2;
    if value > max {
        return None;
    }
    let encoded = value | (1u64 << (7 * width));
    Some(encoded.to_be_bytes()[8 - width..].to_vec())
}

/// Shortest size field for `value`
pub fn encode_size_minimal(value: u64) -> Option<Vec<u8>> {
    (1..=8).find_map(|width| encode_size(value, width))
}

pub fn encode_id(id: u32) -> Vec<u8> {
    let bytes = id.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count().min(3);
    bytes[skip..].to_vec()
}

pub fn element(id: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = encode_id(id);
    // payloads built here are far below the 8-byte limit
    out.extend(encode_size_minimal(payload.len() as u64).unwrap_or_else(|| UNKNOWN_SIZE.to_vec()));
    out.extend_from_slice(payload);
    out
}

pub fn uint_element(id: u32, value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count().min(7);
    element(id, &bytes[skip..])
}

pub fn float_element(id: u32, value: f64) -> Vec<u8> {
    element(id, &value.to_be_bytes())
}

pub fn string_element(id: u32, value: &str) -> Vec<u8> {
    element(id, value.as_bytes())
}

/// Id and unknown size of a streaming master element; children follow
pub fn unknown_size_start(id: u32) -> Vec<u8> {
    let mut out = encode_id(id);
    out.extend_from_slice(&UNKNOWN_SIZE);
    out
}

/// Opening chunk of a live WebM stream
///
/// EBML header, unknown-size Segment, Info without a Duration and an empty
/// Tracks element: the layout browsers and live muxers emit.
pub fn live_stream_header(writing_app: &str) -> Vec<u8> {
    let mut out = element(EBML, &string_element(EBML_DOC_TYPE, "webm"));
    out.extend(unknown_size_start(SEGMENT));

    let mut info = uint_element(TIMECODE_SCALE, DEFAULT_TIMECODE_SCALE);
    info.extend(string_element(MUXING_APP, writing_app));
    info.extend(string_element(WRITING_APP, writing_app));
    out.extend(element(INFO, &info));
    out.extend(element(TRACKS, &[]));
    out
}

/// Unknown-size cluster holding one block
pub fn live_cluster(timecode: u64, block: &[u8]) -> Vec<u8> {
    let mut out = unknown_size_start(CLUSTER);
    out.extend(uint_element(TIMECODE, timecode));
    out.extend(element(SIMPLE_BLOCK, block));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_vint() {
        assert_eq!(encode_size(0x10, 1), Some(vec![0x90]));
        assert_eq!(encode_size(0x7F, 1), None);
        assert_eq!(encode_size(0x7F, 2), Some(vec![0x40, 0x7F]));

        let (size, len) = read_size(&[0x40, 0x7F], 0).unwrap();
        assert_eq!((size, len), (Some(0x7F), 2));

        let (size, len) = read_size(&UNKNOWN_SIZE, 0).unwrap();
        assert_eq!((size, len), (None, 8));
    }

    #[test]
    fn test_ids_keep_marker_bits() {
        assert_eq!(encode_id(SEGMENT), vec![0x18, 0x53, 0x80, 0x67]);
        assert_eq!(encode_id(TIMECODE), vec![0xE7]);
        assert_eq!(read_id(&[0x44, 0x89], 0).unwrap(), (DURATION, 2));
        assert_eq!(read_id(&[0x00, 0x01], 0), Err(EbmlError::InvalidId(0)));
    }

    #[test]
    fn test_children_walk() {
        let mut buf = uint_element(TIMECODE_SCALE, 1_000_000);
        buf.extend(string_element(MUXING_APP, "streamcap"));
        let kids = children(&buf, 0, buf.len()).unwrap();
        assert_eq!(kids.len(), 2);
        assert_eq!(kids[0].id, TIMECODE_SCALE);
        assert_eq!(
            read_uint(&buf[kids[0].data_start()..kids[0].data_end(buf.len())]),
            1_000_000
        );
        assert_eq!(kids[1].id, MUXING_APP);
    }

    #[test]
    fn test_truncated_header() {
        assert_eq!(read_header(&[0x1A, 0x45], 0), Err(EbmlError::Truncated(0)));
    }
}
