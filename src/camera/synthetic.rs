//! Synthetic capture device for `stub://` paths.
//!
//! - `stub://<name>` produces a moving gradient.
//! - `stub://blank` opens but only ever yields all-zero frames.
//! - `stub://offline` refuses to open.

use anyhow::{anyhow, Result};

use super::device::{CaptureDevice, DeviceSettings, NegotiatedFormat};
use crate::frame::{Frame, PixelFormat};

pub struct SyntheticDevice {
    format: NegotiatedFormat,
    blank: bool,
    frame_count: u64,
    /// Simulated scene state, changes every 50 frames.
    scene_state: u8,
}

impl SyntheticDevice {
    pub fn open(settings: &DeviceSettings) -> Result<Self> {
        let name = settings
            .device
            .strip_prefix("stub://")
            .ok_or_else(|| anyhow!("not a stub device path: {}", settings.device))?;
        if name == "offline" {
            return Err(anyhow!("synthetic device {} is offline", settings.device));
        }
        log::info!(
            "SyntheticDevice: opened {} ({}x{} @ {} fps)",
            settings.device,
            settings.width,
            settings.height,
            settings.fps
        );
        Ok(Self {
            format: NegotiatedFormat {
                width: settings.width,
                height: settings.height,
                fps: settings.fps,
            },
            blank: name == "blank",
            frame_count: 0,
            scene_state: 0,
        })
    }

    fn generate_pixels(&mut self) -> Vec<u8> {
        let pixel_count = (self.format.width * self.format.height * 3) as usize;
        if self.blank {
            return vec![0u8; pixel_count];
        }

        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }

        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            // Offset by one so the very first pixel is never zero.
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 255 + 1) as u8;
        }
        pixels
    }
}

impl CaptureDevice for SyntheticDevice {
    fn negotiated(&self) -> NegotiatedFormat {
        self.format
    }

    fn read_frame(&mut self) -> Result<Frame> {
        self.frame_count += 1;
        let pixels = self.generate_pixels();
        Frame::new(
            pixels,
            self.format.width,
            self.format.height,
            PixelFormat::Rgb24,
        )
    }
}
