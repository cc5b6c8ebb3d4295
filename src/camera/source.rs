//! Shared, serialized access to the single capture device.
//!
//! `FrameSource` owns at most one open `CaptureDevice`. Every device
//! touching operation (open, warm-up, read, release) runs under one mutex, so
//! the live stream, inference, and time-lapse paths never interleave reads.
//!
//! The handle moves through `Closed -> Open -> Degraded -> Open ...`:
//! - `acquire()` opens lazily, with a warm-up read and bounded retries.
//! - A failed live read drops the handle and marks the source `Degraded`; the
//!   next `acquire()` reopens it.
//! - `release()` drops the handle and returns to `Closed`.

use serde::Serialize;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::device::{CaptureDevice, DeviceOpener, DeviceSettings, NegotiatedFormat};
use super::diagnostics;
use crate::error::CoreError;
use crate::frame::Frame;

/// Open attempts and the pause between them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(3),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    Closed,
    Open,
    Degraded,
}

#[derive(Clone, Debug, Serialize)]
pub struct SourceStatus {
    pub device: String,
    pub state: DeviceState,
    pub frames_captured: u64,
    pub opens: u64,
    pub read_failures: u64,
    pub last_error: Option<String>,
}

enum Handle {
    Closed,
    Open(Box<dyn CaptureDevice>),
    Degraded(String),
}

struct Inner {
    handle: Handle,
    frames_captured: u64,
    opens: u64,
    read_failures: u64,
}

pub struct FrameSource {
    settings: DeviceSettings,
    retry: RetryPolicy,
    opener: Box<dyn DeviceOpener>,
    inner: Mutex<Inner>,
    diagnostics_enabled: bool,
}

impl FrameSource {
    pub fn new(settings: DeviceSettings, retry: RetryPolicy, opener: Box<dyn DeviceOpener>) -> Self {
        Self {
            settings,
            retry,
            opener,
            inner: Mutex::new(Inner {
                handle: Handle::Closed,
                frames_captured: 0,
                opens: 0,
                read_failures: 0,
            }),
            diagnostics_enabled: true,
        }
    }

    /// Skip `/dev` probing when opens are exhausted. Used for synthetic setups.
    pub fn without_diagnostics(mut self) -> Self {
        self.diagnostics_enabled = false;
        self
    }

    pub fn settings(&self) -> &DeviceSettings {
        &self.settings
    }

    /// Read one frame, opening the device first if needed.
    ///
    /// `DeviceUnavailable` is a normal outcome: callers sleep and retry or
    /// report a degraded response. A failed read drops the handle so the next
    /// call starts from a fresh open.
    pub fn acquire(&self) -> Result<Frame, CoreError> {
        let mut inner = self.lock();
        self.ensure_open(&mut inner)?;

        let Handle::Open(device) = &mut inner.handle else {
            return Err(CoreError::DeviceUnavailable("device not open".to_string()));
        };
        match device.read_frame() {
            // Only the warm-up read rejects blank frames; a dark scene is valid.
            Ok(frame) => {
                inner.frames_captured += 1;
                Ok(frame)
            }
            Err(err) => {
                inner.read_failures += 1;
                log::warn!(
                    "FrameSource: read from {} failed: {:#}",
                    self.settings.device,
                    err
                );
                let reason = err.to_string();
                inner.handle = Handle::Degraded(reason.clone());
                Err(CoreError::DeviceUnavailable(reason))
            }
        }
    }

    /// Open the device if it is not already open, without consuming a frame
    /// beyond the warm-up read. Returns whether the device is usable.
    pub fn probe(&self) -> bool {
        let mut inner = self.lock();
        self.ensure_open(&mut inner).is_ok()
    }

    /// Close the device handle. Safe to call when already closed.
    pub fn release(&self) {
        let mut inner = self.lock();
        if matches!(inner.handle, Handle::Open(_)) {
            log::info!("FrameSource: released {}", self.settings.device);
        }
        inner.handle = Handle::Closed;
    }

    pub fn is_open(&self) -> bool {
        matches!(self.lock().handle, Handle::Open(_))
    }

    pub fn status(&self) -> SourceStatus {
        let inner = self.lock();
        let (state, last_error) = match &inner.handle {
            Handle::Closed => (DeviceState::Closed, None),
            Handle::Open(_) => (DeviceState::Open, None),
            Handle::Degraded(reason) => (DeviceState::Degraded, Some(reason.clone())),
        };
        SourceStatus {
            device: self.settings.device.clone(),
            state,
            frames_captured: inner.frames_captured,
            opens: inner.opens,
            read_failures: inner.read_failures,
            last_error,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // The handle enum is consistent between statements; poisoning is recovered.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_open(&self, inner: &mut Inner) -> Result<(), CoreError> {
        if matches!(inner.handle, Handle::Open(_)) {
            return Ok(());
        }

        let attempts = self.retry.attempts.max(1);
        let mut last_error = String::from("no attempt made");
        for attempt in 1..=attempts {
            log::info!(
                "FrameSource: opening {} (attempt {}/{})",
                self.settings.device,
                attempt,
                attempts
            );
            match self.open_and_warm_up() {
                Ok(device) => {
                    inner.opens += 1;
                    inner.handle = Handle::Open(device);
                    return Ok(());
                }
                Err(reason) => {
                    log::error!("FrameSource: {}", reason);
                    last_error = reason;
                }
            }
            if attempt < attempts {
                std::thread::sleep(self.retry.delay);
            }
        }

        log::error!(
            "FrameSource: failed to initialize {} after {} attempts",
            self.settings.device,
            attempts
        );
        if self.diagnostics_enabled {
            let report = diagnostics::diagnose(diagnostics::MAX_PROBED_DEVICES);
            diagnostics::log_report(&self.settings.device, &report);
        }
        inner.handle = Handle::Degraded(last_error.clone());
        Err(CoreError::DeviceUnavailable(last_error))
    }

    /// One open attempt. The device is dropped (released) on any failure.
    fn open_and_warm_up(&self) -> Result<Box<dyn CaptureDevice>, String> {
        let mut device = self
            .opener
            .open(&self.settings)
            .map_err(|err| format!("failed to open {}: {:#}", self.settings.device, err))?;

        let negotiated = device.negotiated();
        self.check_negotiated(negotiated);

        match device.read_frame() {
            Ok(frame) if !frame.is_blank() => {
                log::info!(
                    "FrameSource: initial frame {}x{} ({} channels)",
                    frame.width,
                    frame.height,
                    frame.channels()
                );
                Ok(device)
            }
            Ok(_) => Err(format!(
                "initial frame read from {} returned an empty frame",
                self.settings.device
            )),
            Err(err) => Err(format!(
                "initial frame read from {} failed: {:#}",
                self.settings.device, err
            )),
        }
    }

    fn check_negotiated(&self, negotiated: NegotiatedFormat) {
        log::info!(
            "FrameSource: camera initialized: {}x{} @ {} fps",
            negotiated.width,
            negotiated.height,
            negotiated.fps
        );
        if negotiated.width != self.settings.width || negotiated.height != self.settings.height {
            log::warn!(
                "FrameSource: requested {}x{}, driver negotiated {}x{}",
                self.settings.width,
                self.settings.height,
                negotiated.width,
                negotiated.height
            );
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.release();
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;
    use anyhow::{anyhow, Result};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Scripted device: each read pops the next outcome, then repeats the last.
    struct ScriptedDevice {
        reads: Vec<Result<bool, ()>>,
    }

    impl CaptureDevice for ScriptedDevice {
        fn negotiated(&self) -> NegotiatedFormat {
            NegotiatedFormat {
                width: 2,
                height: 2,
                fps: 1,
            }
        }

        fn read_frame(&mut self) -> Result<Frame> {
            let next = if self.reads.len() > 1 {
                self.reads.remove(0)
            } else {
                self.reads[0]
            };
            match next {
                Ok(lit) => {
                    let byte = if lit { 9 } else { 0 };
                    Frame::new(vec![byte; 12], 2, 2, PixelFormat::Rgb24)
                }
                Err(()) => Err(anyhow!("scripted read failure")),
            }
        }
    }

    struct ScriptedOpener {
        opens: Arc<AtomicU32>,
        fail_first: u32,
        script: Vec<Result<bool, ()>>,
        reopen_script: Vec<Result<bool, ()>>,
    }

    impl DeviceOpener for ScriptedOpener {
        fn open(&self, _settings: &DeviceSettings) -> Result<Box<dyn CaptureDevice>> {
            let n = self.opens.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(anyhow!("device busy"));
            }
            let reads = if n == self.fail_first {
                self.script.clone()
            } else {
                self.reopen_script.clone()
            };
            Ok(Box::new(ScriptedDevice { reads }))
        }
    }

    fn source(fail_first: u32, script: Vec<Result<bool, ()>>) -> (FrameSource, Arc<AtomicU32>) {
        scripted_source(fail_first, script.clone(), script)
    }

    fn scripted_source(
        fail_first: u32,
        script: Vec<Result<bool, ()>>,
        reopen_script: Vec<Result<bool, ()>>,
    ) -> (FrameSource, Arc<AtomicU32>) {
        let opens = Arc::new(AtomicU32::new(0));
        let opener = ScriptedOpener {
            opens: opens.clone(),
            fail_first,
            script,
            reopen_script,
        };
        let retry = RetryPolicy {
            attempts: 3,
            delay: Duration::from_millis(1),
        };
        let source = FrameSource::new(DeviceSettings::default(), retry, Box::new(opener))
            .without_diagnostics();
        (source, opens)
    }

    #[test]
    fn opens_lazily_and_reuses_the_handle() {
        let (source, opens) = source(0, vec![Ok(true)]);
        assert_eq!(source.status().state, DeviceState::Closed);
        assert_eq!(opens.load(Ordering::SeqCst), 0);

        source.acquire().unwrap();
        source.acquire().unwrap();
        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert_eq!(source.status().state, DeviceState::Open);
        assert_eq!(source.status().frames_captured, 2);
    }

    #[test]
    fn retries_failed_opens_up_to_the_limit() {
        let (source, opens) = source(2, vec![Ok(true)]);
        assert!(source.acquire().is_ok());
        assert_eq!(opens.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn exhausted_retries_report_unavailable() {
        let (source, opens) = source(10, vec![Ok(true)]);
        let err = source.acquire().unwrap_err();
        assert!(matches!(err, CoreError::DeviceUnavailable(_)));
        assert_eq!(opens.load(Ordering::SeqCst), 3);
        assert_eq!(source.status().state, DeviceState::Degraded);
    }

    #[test]
    fn blank_warm_up_frame_counts_as_failed_open() {
        let (source, opens) = source(0, vec![Ok(false)]);
        assert!(source.acquire().is_err());
        assert_eq!(opens.load(Ordering::SeqCst), 3);
        assert!(!source.is_open());
    }

    #[test]
    fn failed_live_read_degrades_then_reopens() {
        // first handle: warm-up ok, live read fails; second handle always reads
        let (source, opens) = scripted_source(0, vec![Ok(true), Err(())], vec![Ok(true)]);
        let err = source.acquire().unwrap_err();
        assert!(matches!(err, CoreError::DeviceUnavailable(_)));
        assert_eq!(source.status().state, DeviceState::Degraded);
        assert_eq!(source.status().read_failures, 1);

        source.acquire().unwrap();
        assert_eq!(opens.load(Ordering::SeqCst), 2);
        assert_eq!(source.status().state, DeviceState::Open);
    }

    #[test]
    fn dark_live_frame_is_returned_without_reopening() {
        let (source, opens) = scripted_source(0, vec![Ok(true), Ok(false)], vec![Ok(true)]);
        let frame = source.acquire().unwrap();
        assert!(frame.is_blank());
        assert_eq!(source.status().state, DeviceState::Open);
        assert_eq!(source.status().read_failures, 0);
        assert_eq!(opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn release_is_idempotent() {
        let (source, _) = source(0, vec![Ok(true)]);
        source.release();
        source.acquire().unwrap();
        source.release();
        source.release();
        assert_eq!(source.status().state, DeviceState::Closed);
    }

    #[test]
    fn probe_opens_without_counting_a_frame() {
        let (source, _) = source(0, vec![Ok(true)]);
        assert!(source.probe());
        assert!(source.is_open());
        assert_eq!(source.status().frames_captured, 0);
    }
}
