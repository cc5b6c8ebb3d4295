//! Canopy: a plant-monitoring camera dashboard
//!
//! One physical camera is shared by three consumers: the live MJPEG feed,
//! on-demand image classification, and a background time-lapse job. All of
//! them go through `FrameSource`, which serializes device access and keeps
//! at most one open handle.
//!
//! # Module Structure
//!
//! - `camera`: capture backends, diagnostics, and the shared `FrameSource`
//! - `frame`: captured pixel buffers
//! - `encode`: JPEG encoding and multipart framing
//! - `stream`: the pausable, cancellable live feed
//! - `inference`: classifiers, the model registry, detection history
//! - `timelapse`: the start/stop capture scheduler
//! - `storage`, `sensors`, `plants`: telemetry and plant data
//! - `dashboard`: the facade the HTTP layer calls
//! - `api`: the HTTP surface
//! - `config`: file + environment configuration

pub mod api;
pub mod camera;
pub mod cancel;
pub mod config;
pub mod dashboard;
pub mod encode;
pub mod error;
pub mod frame;
pub mod inference;
pub mod media;
pub mod plants;
pub mod sensors;
pub mod storage;
pub mod stream;
pub mod timelapse;

pub use camera::{
    CaptureDevice, DeviceOpener, DeviceSettings, DeviceState, FrameSource, RetryPolicy,
    SourceStatus, SystemOpener,
};
pub use cancel::CancelToken;
pub use config::DashboardConfig;
pub use dashboard::{Dashboard, DashboardParts, HealthReport};
pub use encode::StreamEncoder;
pub use error::CoreError;
pub use frame::{Frame, PixelFormat};
pub use inference::{Category, DetectionRecord, InferenceEngine, ModelRegistry};
pub use storage::{InMemoryTelemetryStore, SqliteTelemetryStore, TelemetryStore};
pub use stream::{FeedControl, MjpegStream};
pub use timelapse::{TimeLapseScheduler, TimeLapseStatus};
