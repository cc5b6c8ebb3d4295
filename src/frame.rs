//! Captured frames.
//!
//! - `Frame`: one decoded image from the capture device. Pixel bytes are
//!   private and immutable after construction; consumers read them through
//!   `pixels()` or convert to an `image::RgbImage`.
//! - `PixelFormat`: the channel layouts capture backends produce.
//!
//! A frame is produced by `FrameSource` and consumed by exactly one caller.
//! There is no `Clone`; a consumer that needs to keep pixels must copy them
//! explicitly.

use anyhow::{anyhow, Result};
use image::{GrayImage, RgbImage};
use std::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb24,
    Gray8,
}

impl PixelFormat {
    pub fn channels(self) -> u32 {
        match self {
            PixelFormat::Rgb24 => 3,
            PixelFormat::Gray8 => 1,
        }
    }
}

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    captured_at: Instant,
}

impl Frame {
    /// Wrap a pixel buffer, checking that its length matches the geometry.
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("frame dimensions must be non-zero"));
        }
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(format.channels() as usize))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            format,
            captured_at: Instant::now(),
        })
    }

    pub fn from_rgb_image(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
            format: PixelFormat::Rgb24,
            captured_at: Instant::now(),
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn channels(&self) -> u32 {
        self.format.channels()
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// True when every byte is zero. Devices that are open but not yet
    /// streaming commonly return such frames.
    pub fn is_blank(&self) -> bool {
        self.data.iter().all(|&b| b == 0)
    }

    pub fn age_ms(&self) -> u128 {
        self.captured_at.elapsed().as_millis()
    }

    /// Copy into an RGB image, expanding grayscale frames.
    pub fn to_rgb_image(&self) -> Result<RgbImage> {
        match self.format {
            PixelFormat::Rgb24 => RgbImage::from_raw(self.width, self.height, self.data.clone())
                .ok_or_else(|| anyhow!("rgb buffer does not match frame geometry")),
            PixelFormat::Gray8 => {
                let gray = GrayImage::from_raw(self.width, self.height, self.data.clone())
                    .ok_or_else(|| anyhow!("gray buffer does not match frame geometry"))?;
                Ok(image::DynamicImage::ImageLuma8(gray).to_rgb8())
            }
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("bytes", &self.data.len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
