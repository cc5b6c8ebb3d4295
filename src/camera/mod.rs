//! Camera acquisition.
//!
//! - `device`: the `CaptureDevice` / `DeviceOpener` seam and requested settings
//! - `synthetic`: `stub://` devices for tests and bench setups
//! - `v4l2`: USB/V4L2 devices (feature: camera-v4l2)
//! - `diagnostics`: device-node enumeration when opens keep failing
//! - `source`: `FrameSource`, the single serialized owner of the device handle
//!
//! Every consumer (live stream, inference, time-lapse, snapshot) obtains frames
//! only through `FrameSource::acquire()`.

mod device;
pub mod diagnostics;
mod source;
mod synthetic;
#[cfg(feature = "camera-v4l2")]
mod v4l2;

pub use device::{CaptureDevice, DeviceOpener, DeviceSettings, NegotiatedFormat, SystemOpener};
pub use diagnostics::{DeviceDiagnostics, DevicePermission};
pub use source::{DeviceState, FrameSource, RetryPolicy, SourceStatus};
pub use synthetic::SyntheticDevice;
#[cfg(feature = "camera-v4l2")]
pub use v4l2::V4l2Device;
