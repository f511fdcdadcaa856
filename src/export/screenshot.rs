//! Screenshot encoding

use crate::capture::traits::Frame;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScreenshotError {
    #[error("Frame is empty")]
    EmptyFrame,

    #[error("Frame data is {actual} bytes, expected {expected}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("PNG encode error: {0}")]
    Encoding(#[from] png::EncodingError),
}

/// `screenshot_<epoch-millis>.png`
pub fn screenshot_file_name(epoch_ms: u64) -> String {
    format!("screenshot_{}.png", epoch_ms)
}

/// Encode an RGB8 frame as PNG
pub fn encode_png(frame: &Frame) -> Result<Vec<u8>, ScreenshotError> {
    if frame.width == 0 || frame.height == 0 {
        return Err(ScreenshotError::EmptyFrame);
    }
    let expected = frame.width as usize * frame.height as usize * 3;
    if frame.rgb.len() != expected {
        return Err(ScreenshotError::SizeMismatch {
            expected,
            actual: frame.rgb.len(),
        });
    }

    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, frame.width, frame.height);
        encoder.set_color(png::ColorType::Rgb);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(&frame.rgb)?;
        writer.finish()?;
    }
    Ok(out)
}
