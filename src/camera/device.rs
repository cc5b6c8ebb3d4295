use anyhow::Result;

use super::synthetic::SyntheticDevice;
use crate::frame::Frame;

/// Requested capture settings for one device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceSettings {
    /// Device path (e.g., "/dev/video0"), or `stub://<name>` for the synthetic device.
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: 640,
            height: 480,
            fps: 30,
        }
    }
}

/// Format the driver actually agreed to, which may differ from the request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NegotiatedFormat {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// An open, exclusively owned capture device.
///
/// Dropping the value releases the underlying handle.
pub trait CaptureDevice: Send {
    fn negotiated(&self) -> NegotiatedFormat;

    /// Block until the next frame is available.
    fn read_frame(&mut self) -> Result<Frame>;
}

/// Opens capture devices. `FrameSource` calls this every time it needs a fresh
/// handle, so implementations must not cache devices themselves.
pub trait DeviceOpener: Send + Sync {
    fn open(&self, settings: &DeviceSettings) -> Result<Box<dyn CaptureDevice>>;
}

/// Picks a backend from the device path: `stub://` uses the synthetic
/// device, anything else needs the `camera-v4l2` feature.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemOpener;

impl DeviceOpener for SystemOpener {
    fn open(&self, settings: &DeviceSettings) -> Result<Box<dyn CaptureDevice>> {
        if settings.device.starts_with("stub://") {
            return Ok(Box::new(SyntheticDevice::open(settings)?));
        }
        #[cfg(feature = "camera-v4l2")]
        {
            Ok(Box::new(super::v4l2::V4l2Device::open(settings)?))
        }
        #[cfg(not(feature = "camera-v4l2"))]
        {
            Err(anyhow::anyhow!(
                "device {} requires the camera-v4l2 feature",
                settings.device
            ))
        }
    }
}
