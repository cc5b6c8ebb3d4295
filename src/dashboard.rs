//! The object the HTTP layer talks to.
//!
//! `Dashboard` owns one `FrameSource` and hands it to the live stream, the
//! inference engine, and the time-lapse scheduler. Store failures never fail
//! a request that can be answered without the store.

use anyhow::{anyhow, Result};
use chrono::Local;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::camera::{FrameSource, RetryPolicy, SourceStatus, SystemOpener};
use crate::cancel::CancelToken;
use crate::config::DashboardConfig;
use crate::encode::StreamEncoder;
use crate::error::CoreError;
use crate::inference::{DetectionRecord, InferenceEngine, ModelRegistry};
use crate::media::write_private_jpeg;
use crate::plants::{
    harvest_schedule, seasonal_status, GrowthRecord, HarvestPrediction, SeasonalStatus,
};
use crate::sensors::{now_local, SensorSample};
use crate::storage::{shared, SharedStore, SqliteTelemetryStore};
use crate::stream::{FeedControl, MjpegStream, DEFAULT_POLL_INTERVAL};
use crate::timelapse::{TimeLapseScheduler, TimeLapseStatus};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HealthReport {
    pub database: bool,
    pub camera: bool,
    pub inference: bool,
    pub timestamp: String,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.database && self.camera && self.inference
    }
}

/// Everything a `Dashboard` is assembled from.
pub struct DashboardParts {
    pub source: Arc<FrameSource>,
    pub models: ModelRegistry,
    pub store: Option<SharedStore>,
    pub encoder: StreamEncoder,
    pub time_lapse_folder: PathBuf,
    pub snapshot_dir: PathBuf,
}

pub struct Dashboard {
    source: Arc<FrameSource>,
    feed: Arc<FeedControl>,
    encoder: StreamEncoder,
    inference: InferenceEngine,
    timelapse: TimeLapseScheduler,
    store: Option<SharedStore>,
    time_lapse_folder: PathBuf,
    snapshot_dir: PathBuf,
    shutdown: CancelToken,
    stream_poll: Duration,
}

impl Dashboard {
    pub fn new(parts: DashboardParts) -> Self {
        let DashboardParts {
            source,
            models,
            store,
            encoder,
            time_lapse_folder,
            snapshot_dir,
        } = parts;
        Self {
            inference: InferenceEngine::new(source.clone(), models),
            timelapse: TimeLapseScheduler::new(source.clone(), encoder, store.clone()),
            feed: Arc::new(FeedControl::new()),
            source,
            encoder,
            store,
            time_lapse_folder,
            snapshot_dir,
            shutdown: CancelToken::new(),
            stream_poll: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Build from configuration. A store or model that fails to load degrades
    /// its feature; only the camera settings are required.
    pub fn from_config(cfg: &DashboardConfig) -> Self {
        let store = match SqliteTelemetryStore::open(&cfg.db_path) {
            Ok(store) => Some(shared(store)),
            Err(err) => {
                log::error!("storage: database unavailable ({:#}); telemetry will not persist", err);
                None
            }
        };
        let source = FrameSource::new(
            cfg.camera.device_settings(),
            cfg.camera.retry_policy(),
            Box::new(SystemOpener),
        );
        Self::new(DashboardParts {
            source: Arc::new(source),
            models: ModelRegistry::load(&cfg.models),
            store,
            encoder: StreamEncoder::new(cfg.camera.jpeg_quality),
            time_lapse_folder: cfg.time_lapse_folder.clone(),
            snapshot_dir: cfg.snapshot_dir.clone(),
        })
    }

    pub fn with_inference_retry(mut self, retry: RetryPolicy) -> Self {
        self.inference = self.inference.with_retry(retry);
        self
    }

    pub fn with_stream_poll(mut self, poll: Duration) -> Self {
        self.stream_poll = poll;
        self
    }

    // ------------------------------------------------------------------------
    // Live feed
    // ------------------------------------------------------------------------

    /// Start a live stream. Fails up front when paused or when the camera
    /// cannot be opened; once started the stream degrades silently.
    pub fn live_stream(&self) -> Result<MjpegStream, CoreError> {
        if self.feed.is_paused() {
            return Err(CoreError::FeedPaused);
        }
        if !self.source.probe() {
            return Err(CoreError::DeviceUnavailable(
                "camera unavailable".to_string(),
            ));
        }
        Ok(MjpegStream::new(
            self.source.clone(),
            self.feed.clone(),
            self.encoder,
            self.shutdown.clone(),
        )
        .with_poll_interval(self.stream_poll))
    }

    pub fn pause_feed(&self) {
        self.feed.pause();
    }

    pub fn resume_feed(&self) {
        self.feed.resume();
    }

    pub fn is_feed_paused(&self) -> bool {
        self.feed.is_paused()
    }

    pub fn camera_status(&self) -> SourceStatus {
        self.source.status()
    }

    /// Capture one frame into the snapshot directory.
    pub fn snapshot(&self) -> Result<PathBuf, CoreError> {
        let frame = self.source.acquire()?;
        let jpeg = self.encoder.encode(&frame)?;
        let path = write_private_jpeg(&self.snapshot_dir, "snapshot", now_local(), &jpeg)
            .map_err(|e| CoreError::Persistence(format!("{:#}", e)))?;
        log::info!("snapshot: saved {}", path.display());
        Ok(path)
    }

    // ------------------------------------------------------------------------
    // Inference
    // ------------------------------------------------------------------------

    pub fn infer(&self) -> Result<Vec<DetectionRecord>, CoreError> {
        self.inference.infer()
    }

    pub fn detections(&self) -> Vec<DetectionRecord> {
        self.inference.history()
    }

    pub fn inference_available(&self) -> bool {
        self.inference.is_available()
    }

    // ------------------------------------------------------------------------
    // Time-lapse
    // ------------------------------------------------------------------------

    pub fn start_time_lapse(&self, interval_secs: f64, count: i64) -> Result<(), CoreError> {
        self.timelapse
            .start(&self.time_lapse_folder, interval_secs, count)
    }

    pub fn stop_time_lapse(&self) -> Result<(), CoreError> {
        self.timelapse.stop()
    }

    pub fn time_lapse_status(&self) -> TimeLapseStatus {
        self.timelapse.status()
    }

    pub fn time_lapse(&self) -> &TimeLapseScheduler {
        &self.timelapse
    }

    // ------------------------------------------------------------------------
    // Telemetry
    // ------------------------------------------------------------------------

    /// Generate a reading and try to persist it. The reading is returned
    /// whether or not the store accepted it.
    pub fn sample_sensors(&self) -> SensorSample {
        let sample = SensorSample::synthetic();
        match &self.store {
            Some(store) => {
                let result = store
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .record_sensor_sample(&sample);
                if let Err(err) = result {
                    log::warn!("storage: failed to store sensor data: {:#}", err);
                }
            }
            None => log::debug!("storage: no database, sensor sample not persisted"),
        }
        sample
    }

    pub fn growth_records(&self) -> Result<Vec<GrowthRecord>> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| anyhow!("database unavailable"))?;
        let records = store
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .growth_records()?;
        Ok(records)
    }

    pub fn seasonal_status(&self) -> Result<Vec<SeasonalStatus>> {
        let records = self.growth_records()?;
        Ok(seasonal_status(&records, Local::now().date_naive()))
    }

    pub fn harvest_schedule(&self) -> Result<Vec<HarvestPrediction>> {
        let records = self.growth_records()?;
        Ok(harvest_schedule(&records, Local::now().date_naive()))
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    pub fn health(&self) -> HealthReport {
        let database = match &self.store {
            Some(store) => store
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .ping()
                .is_ok(),
            None => false,
        };
        HealthReport {
            database,
            camera: self.source.probe(),
            inference: self.inference.is_available(),
            timestamp: Local::now().to_rfc3339(),
        }
    }

    pub fn shutdown_token(&self) -> CancelToken {
        self.shutdown.clone()
    }

    /// End live streams and the time-lapse job, then release the camera.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.timelapse.shutdown();
        self.source.release();
        log::info!("dashboard: shut down");
    }
}
