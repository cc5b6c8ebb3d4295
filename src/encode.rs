//! JPEG encoding and multipart framing for the live feed.

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use crate::error::CoreError;
use crate::frame::{Frame, PixelFormat};

/// Multipart boundary token shared by the chunk framing and the response header.
pub const BOUNDARY: &str = "frame";

pub const MULTIPART_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Stateless JPEG encoder. Cheap to copy into every consumer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamEncoder {
    quality: u8,
}

impl StreamEncoder {
    /// `quality` is clamped to the 1..=100 range the JPEG encoder accepts.
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn encode(&self, frame: &Frame) -> Result<Vec<u8>, CoreError> {
        let color = match frame.format {
            PixelFormat::Rgb24 => ExtendedColorType::Rgb8,
            PixelFormat::Gray8 => ExtendedColorType::L8,
        };
        let mut out = Vec::with_capacity(frame.byte_len() / 8);
        JpegEncoder::new_with_quality(&mut out, self.quality)
            .encode(frame.pixels(), frame.width, frame.height, color)
            .map_err(|err| CoreError::Encode(err.to_string()))?;
        Ok(out)
    }
}

impl Default for StreamEncoder {
    fn default() -> Self {
        Self::new(95)
    }
}

/// Wrap one JPEG image as a multipart part so clients can split the stream.
pub fn multipart_chunk(jpeg: &[u8]) -> Vec<u8> {
    let header = format!("--{}\r\nContent-Type: image/jpeg\r\n\r\n", BOUNDARY);
    let mut chunk = Vec::with_capacity(header.len() + jpeg.len() + 2);
    chunk.extend_from_slice(header.as_bytes());
    chunk.extend_from_slice(jpeg);
    chunk.extend_from_slice(b"\r\n");
    chunk
}
