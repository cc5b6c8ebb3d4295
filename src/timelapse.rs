//! Background time-lapse capture.
//!
//! At most one job runs at a time. The job owns a `CancelToken` that lives
//! in the scheduler state next to the job's thread handle; `start` and `stop`
//! and the worker's per-iteration check all go through the same mutex.
//! Interval sleeps happen outside the lock and wake early on cancellation.

use anyhow::Result;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::camera::FrameSource;
use crate::cancel::CancelToken;
use crate::encode::StreamEncoder;
use crate::error::CoreError;
use crate::media::write_private_jpeg;
use crate::sensors::now_local;
use crate::storage::{CaptureRecord, SharedStore};

pub const DEFAULT_INTERVAL_SECS: f64 = 30.0;
pub const DEFAULT_IMAGE_COUNT: i64 = 10;

const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Progress of the current job, or of the last one once it has finished.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TimeLapseStatus {
    pub running: bool,
    pub stopping: bool,
    pub folder: Option<PathBuf>,
    pub interval_secs: f64,
    pub requested: u64,
    pub captured: u64,
    pub failed: u64,
    pub last_file: Option<PathBuf>,
}

struct ActiveJob {
    id: u64,
    cancel: CancelToken,
    handle: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct SchedulerState {
    job: Option<ActiveJob>,
    status: TimeLapseStatus,
    next_id: u64,
}

#[derive(Clone)]
struct Worker {
    source: Arc<FrameSource>,
    encoder: StreamEncoder,
    store: Option<SharedStore>,
    state: Arc<Mutex<SchedulerState>>,
}

pub struct TimeLapseScheduler {
    worker: Worker,
}

impl TimeLapseScheduler {
    pub fn new(source: Arc<FrameSource>, encoder: StreamEncoder, store: Option<SharedStore>) -> Self {
        Self {
            worker: Worker {
                source,
                encoder,
                store,
                state: Arc::new(Mutex::new(SchedulerState::default())),
            },
        }
    }

    /// Launch a job capturing `count` images, `interval_secs` apart, into
    /// `folder`. Returns as soon as the worker thread is running.
    pub fn start(&self, folder: &Path, interval_secs: f64, count: i64) -> Result<(), CoreError> {
        if !interval_secs.is_finite() || interval_secs <= 0.0 {
            return Err(CoreError::InvalidArgument(
                "interval must be positive".to_string(),
            ));
        }
        if count <= 0 {
            return Err(CoreError::InvalidArgument(
                "number of images must be positive".to_string(),
            ));
        }
        let interval = Duration::try_from_secs_f64(interval_secs)
            .map_err(|_| CoreError::InvalidArgument("interval out of range".to_string()))?;
        let count = count as u64;

        let mut state = lock(&self.worker.state);
        if state.job.is_some() {
            return Err(CoreError::AlreadyRunning);
        }

        state.next_id += 1;
        let id = state.next_id;
        let cancel = CancelToken::new();
        state.status = TimeLapseStatus {
            running: true,
            folder: Some(folder.to_path_buf()),
            interval_secs,
            requested: count,
            ..TimeLapseStatus::default()
        };

        let worker = self.worker.clone();
        let token = cancel.clone();
        let folder = folder.to_path_buf();
        let handle = std::thread::Builder::new()
            .name("timelapse".to_string())
            .spawn(move || worker.run(id, token, folder, interval, count))
            .map_err(|e| {
                CoreError::Persistence(format!("failed to spawn time-lapse worker: {}", e))
            });
        let handle = match handle {
            Ok(handle) => handle,
            Err(err) => {
                state.status.running = false;
                return Err(err);
            }
        };

        state.job = Some(ActiveJob {
            id,
            cancel,
            handle: Some(handle),
        });
        log::info!(
            "timelapse: started job {} ({} images every {:.1}s)",
            id,
            count,
            interval_secs
        );
        Ok(())
    }

    /// Ask the running job to finish. The worker observes the request at its
    /// next iteration boundary.
    pub fn stop(&self) -> Result<(), CoreError> {
        let mut state = lock(&self.worker.state);
        let job = match state.job.as_ref() {
            Some(job) if !job.cancel.is_cancelled() => job,
            _ => return Err(CoreError::NotRunning),
        };
        job.cancel.cancel();
        log::info!("timelapse: stop requested for job {}", job.id);
        state.status.stopping = true;
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        lock(&self.worker.state).job.is_some()
    }

    pub fn status(&self) -> TimeLapseStatus {
        lock(&self.worker.state).status.clone()
    }

    /// Block until the current job's worker exits. Returns immediately when
    /// idle.
    pub fn join(&self) {
        let handle = lock(&self.worker.state)
            .job
            .as_mut()
            .and_then(|job| job.handle.take());
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("timelapse: worker panicked");
            }
        }
    }

    /// Cancel any running job and wait for it.
    pub fn shutdown(&self) {
        if let Some(job) = lock(&self.worker.state).job.as_ref() {
            job.cancel.cancel();
        }
        self.join();
    }
}

impl Worker {
    fn run(self, id: u64, cancel: CancelToken, folder: PathBuf, interval: Duration, count: u64) {
        for i in 0..count {
            {
                let _state = lock(&self.state);
                if cancel.is_cancelled() {
                    log::info!("timelapse: job {} stopped after {} of {} images", id, i, count);
                    break;
                }
            }

            match self.capture(&folder) {
                Ok(path) => {
                    log::info!("timelapse: captured {}", path.display());
                    let mut state = lock(&self.state);
                    state.status.captured += 1;
                    state.status.last_file = Some(path);
                }
                Err(err) => {
                    log::warn!("timelapse: capture {} of {} failed: {:#}", i + 1, count, err);
                    lock(&self.state).status.failed += 1;
                }
            }

            if i + 1 < count && !cancel.sleep(interval, SLEEP_SLICE) {
                log::info!("timelapse: job {} stopped during interval", id);
                break;
            }
        }

        let mut state = lock(&self.state);
        state.status.running = false;
        state.status.stopping = false;
        if state.job.as_ref().map(|job| job.id) == Some(id) {
            state.job = None;
        }
        log::info!(
            "timelapse: job {} finished ({} captured, {} failed)",
            id,
            state.status.captured,
            state.status.failed
        );
    }

    fn capture(&self, folder: &Path) -> Result<PathBuf> {
        let frame = self.source.acquire()?;
        let jpeg = self.encoder.encode(&frame)?;
        let timestamp = now_local();
        let path = write_private_jpeg(folder, "timelapse", timestamp, &jpeg)?;

        if let Some(store) = &self.store {
            let record = CaptureRecord {
                timestamp,
                path: path.clone(),
                width: frame.width,
                height: frame.height,
            };
            let result = store
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .record_capture(&record);
            if let Err(err) = result {
                log::warn!("timelapse: failed to record capture: {:#}", err);
            }
        }
        Ok(path)
    }
}

fn lock(state: &Mutex<SchedulerState>) -> MutexGuard<'_, SchedulerState> {
    state.lock().unwrap_or_else(|p| p.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{DeviceSettings, RetryPolicy, SystemOpener};
    use crate::storage::{shared, InMemoryTelemetryStore, TelemetryStore};

    fn source(device: &str) -> Arc<FrameSource> {
        let settings = DeviceSettings {
            device: device.to_string(),
            width: 16,
            height: 12,
            fps: 10,
        };
        let retry = RetryPolicy {
            attempts: 1,
            delay: Duration::from_millis(1),
        };
        Arc::new(FrameSource::new(settings, retry, Box::new(SystemOpener)).without_diagnostics())
    }

    fn jpgs(dir: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .map(|rd| rd.filter_map(|e| e.ok()).map(|e| e.path()).collect())
            .unwrap_or_default();
        files.retain(|p| p.extension().map_or(false, |e| e == "jpg"));
        files.sort();
        files
    }

    #[test]
    fn rejects_non_positive_arguments() {
        let scheduler = TimeLapseScheduler::new(source("stub://cam"), StreamEncoder::default(), None);
        let dir = tempfile::tempdir().unwrap();
        for (interval, count) in [(0.0, 3), (-1.0, 3), (1.0, 0), (1.0, -2), (f64::NAN, 1)] {
            assert!(matches!(
                scheduler.start(dir.path(), interval, count),
                Err(CoreError::InvalidArgument(_))
            ));
        }
        assert!(!scheduler.is_running());
    }

    #[test]
    fn captures_requested_number_of_distinct_files() {
        let store = shared(InMemoryTelemetryStore::new());
        let scheduler = TimeLapseScheduler::new(
            source("stub://cam"),
            StreamEncoder::default(),
            Some(store.clone()),
        );
        let dir = tempfile::tempdir().unwrap();
        scheduler.start(dir.path(), 0.05, 3).unwrap();
        scheduler.join();

        let files = jpgs(dir.path());
        assert_eq!(files.len(), 3);
        for file in &files {
            let name = file.file_name().unwrap().to_string_lossy().to_string();
            assert!(name.starts_with("timelapse_"), "{}", name);
        }
        let status = scheduler.status();
        assert!(!status.running);
        assert_eq!(status.captured, 3);
        assert!(!scheduler.is_running());
        assert_eq!(store.lock().unwrap().captures().unwrap().len(), 3);
    }

    #[test]
    fn second_start_is_rejected_while_running() {
        let scheduler = TimeLapseScheduler::new(source("stub://cam"), StreamEncoder::default(), None);
        let dir = tempfile::tempdir().unwrap();
        scheduler.start(dir.path(), 5.0, 10).unwrap();
        assert_eq!(
            scheduler.start(dir.path(), 5.0, 10),
            Err(CoreError::AlreadyRunning)
        );
        scheduler.stop().unwrap();
        assert_eq!(scheduler.stop(), Err(CoreError::NotRunning));
        scheduler.join();
        assert!(jpgs(dir.path()).len() <= 1);
    }

    #[test]
    fn stop_interrupts_the_interval_sleep() {
        let scheduler = TimeLapseScheduler::new(source("stub://cam"), StreamEncoder::default(), None);
        let dir = tempfile::tempdir().unwrap();
        scheduler.start(dir.path(), 30.0, 5).unwrap();
        std::thread::sleep(Duration::from_millis(200));
        let started = std::time::Instant::now();
        scheduler.stop().unwrap();
        scheduler.join();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!scheduler.is_running());
        assert_eq!(scheduler.status().captured, 1);
    }

    #[test]
    fn stop_when_idle_is_not_running() {
        let scheduler = TimeLapseScheduler::new(source("stub://cam"), StreamEncoder::default(), None);
        assert_eq!(scheduler.stop(), Err(CoreError::NotRunning));
    }

    #[test]
    fn capture_failures_are_counted_not_fatal() {
        let scheduler =
            TimeLapseScheduler::new(source("stub://offline"), StreamEncoder::default(), None);
        let dir = tempfile::tempdir().unwrap();
        scheduler.start(dir.path(), 0.01, 2).unwrap();
        scheduler.join();
        let status = scheduler.status();
        assert_eq!(status.failed, 2);
        assert_eq!(status.captured, 0);
        assert!(jpgs(dir.path()).is_empty());
    }

    #[test]
    fn can_restart_after_completion() {
        let scheduler = TimeLapseScheduler::new(source("stub://cam"), StreamEncoder::default(), None);
        let dir = tempfile::tempdir().unwrap();
        scheduler.start(dir.path(), 0.01, 1).unwrap();
        scheduler.join();
        scheduler.start(dir.path(), 0.01, 1).unwrap();
        scheduler.join();
        assert_eq!(jpgs(dir.path()).len(), 2);
    }
}
