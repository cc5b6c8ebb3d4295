//! Live MJPEG feed.
//!
//! `MjpegStream` is a lazy, unbounded iterator of multipart chunks. Each call
//! to `next()` blocks until one encoded frame is ready. It ends only when its
//! `CancelToken` fires; a consumer disconnect is handled by the caller
//! dropping the iterator.
//!
//! While paused, or while the camera is unavailable, the stream polls at
//! `poll_interval` and emits nothing. Encode failures drop the frame.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::camera::FrameSource;
use crate::cancel::CancelToken;
use crate::encode::{multipart_chunk, StreamEncoder};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Pause state of the live feed, shared by every stream and the API.
#[derive(Debug, Default)]
pub struct FeedControl {
    paused: Mutex<bool>,
}

impl FeedControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        *self.paused.lock().unwrap_or_else(|p| p.into_inner()) = true;
        log::info!("live feed paused");
    }

    pub fn resume(&self) {
        *self.paused.lock().unwrap_or_else(|p| p.into_inner()) = false;
        log::info!("live feed resumed");
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub chunks_emitted: u64,
    pub unavailable_polls: u64,
    pub encode_failures: u64,
}

pub struct MjpegStream {
    source: Arc<FrameSource>,
    control: Arc<FeedControl>,
    encoder: StreamEncoder,
    cancel: CancelToken,
    poll_interval: Duration,
    stats: StreamStats,
}

impl MjpegStream {
    pub fn new(
        source: Arc<FrameSource>,
        control: Arc<FeedControl>,
        encoder: StreamEncoder,
        cancel: CancelToken,
    ) -> Self {
        Self {
            source,
            control,
            encoder,
            cancel,
            poll_interval: DEFAULT_POLL_INTERVAL,
            stats: StreamStats::default(),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn stats(&self) -> StreamStats {
        self.stats
    }
}

impl Iterator for MjpegStream {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        loop {
            if self.cancel.is_cancelled() {
                log::debug!("live stream cancelled after {} chunks", self.stats.chunks_emitted);
                return None;
            }
            if self.control.is_paused() {
                std::thread::sleep(self.poll_interval);
                continue;
            }

            let frame = match self.source.acquire() {
                Ok(frame) => frame,
                Err(err) => {
                    self.stats.unavailable_polls += 1;
                    log::warn!("live stream: {}", err);
                    std::thread::sleep(self.poll_interval);
                    continue;
                }
            };

            match self.encoder.encode(&frame) {
                Ok(jpeg) => {
                    self.stats.chunks_emitted += 1;
                    return Some(multipart_chunk(&jpeg));
                }
                Err(err) => {
                    self.stats.encode_failures += 1;
                    log::warn!("live stream: dropping frame: {}", err);
                }
            }
        }
    }
}
