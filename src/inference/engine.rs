use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::history::{DetectionHistory, DetectionRecord};
use super::registry::{select_detections, Category, ModelRegistry};
use crate::camera::{FrameSource, RetryPolicy};
use crate::error::CoreError;
use crate::frame::Frame;

/// Attempts for one `infer()` call and the pause between them.
pub const INFERENCE_RETRY: RetryPolicy = RetryPolicy {
    attempts: 3,
    delay: Duration::from_millis(500),
};

/// Runs the loaded classifiers against fresh camera frames and keeps the
/// rolling history served by `/inference_data`.
pub struct InferenceEngine {
    source: Arc<FrameSource>,
    models: Mutex<ModelRegistry>,
    history: Mutex<DetectionHistory>,
    retry: RetryPolicy,
    available: bool,
}

impl InferenceEngine {
    pub fn new(source: Arc<FrameSource>, models: ModelRegistry) -> Self {
        Self {
            source,
            available: !models.is_empty(),
            models: Mutex::new(models),
            history: Mutex::new(DetectionHistory::default()),
            retry: INFERENCE_RETRY,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// False when no model loaded at startup. Fixed for the process lifetime.
    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn categories(&self) -> Vec<Category> {
        self.lock_models().categories()
    }

    /// Capture a frame, classify it with every loaded model, append the
    /// qualifying detections to the history, and return the whole history.
    pub fn infer(&self) -> Result<Vec<DetectionRecord>, CoreError> {
        if !self.available {
            return Err(CoreError::ModelUnavailable);
        }

        let attempts = self.retry.attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match self.attempt() {
                Ok(records) => {
                    let mut history = self.lock_history();
                    history.extend(records);
                    return Ok(history.snapshot());
                }
                Err(err) => {
                    log::warn!("inference: attempt {}/{} failed: {:#}", attempt, attempts, err);
                    last_error = format!("{:#}", err);
                    self.source.release();
                    if attempt < attempts {
                        std::thread::sleep(self.retry.delay);
                    }
                }
            }
        }
        log::error!("inference: giving up after {} attempts", attempts);
        Err(CoreError::InferenceFailed {
            attempts,
            last_error,
        })
    }

    /// Recent detections without triggering a capture.
    pub fn history(&self) -> Vec<DetectionRecord> {
        self.lock_history().snapshot()
    }

    fn attempt(&self) -> Result<Vec<DetectionRecord>> {
        // The device lock is released before the models lock is taken.
        let frame = self.source.acquire()?;

        let mut models = self.lock_models();
        let mut records = Vec::new();
        for (category, entry) in models.iter_mut() {
            let (width, height) = entry.input_size();
            let rgb = preprocess(&frame, width, height)?;
            let scores = entry
                .classifier_mut()
                .classify(&rgb, width, height)
                .with_context(|| format!("{} classification", category))?;
            for (label, confidence) in select_detections(&scores, entry.labels(), entry.threshold())
            {
                records.push(DetectionRecord {
                    category,
                    label,
                    confidence,
                });
            }
        }
        log::debug!("inference: {} detection(s) from {:?}", records.len(), frame);
        Ok(records)
    }

    fn lock_models(&self) -> MutexGuard<'_, ModelRegistry> {
        self.models.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_history(&self) -> MutexGuard<'_, DetectionHistory> {
        self.history.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Resize to the model geometry and flatten to packed RGB.
pub fn preprocess(frame: &Frame, width: u32, height: u32) -> Result<Vec<u8>> {
    if width == 0 || height == 0 {
        return Err(anyhow!("model input size must be non-zero"));
    }
    let rgb = frame.to_rgb_image()?;
    if rgb.dimensions() == (width, height) {
        return Ok(rgb.into_raw());
    }
    Ok(imageops::resize(&rgb, width, height, FilterType::Triangle).into_raw())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{DeviceSettings, SystemOpener};
    use crate::frame::PixelFormat;
    use crate::inference::backends::StubClassifier;
    use crate::inference::registry::ModelEntry;

    fn source(device: &str) -> Arc<FrameSource> {
        let settings = DeviceSettings {
            device: device.to_string(),
            width: 32,
            height: 24,
            fps: 10,
        };
        let retry = RetryPolicy {
            attempts: 1,
            delay: Duration::from_millis(1),
        };
        Arc::new(FrameSource::new(settings, retry, Box::new(SystemOpener)).without_diagnostics())
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            delay: Duration::from_millis(1),
        }
    }

    fn registry(classifier: StubClassifier, labels: &[&str]) -> ModelRegistry {
        let mut registry = ModelRegistry::new();
        let labels = labels.iter().map(|s| s.to_string()).collect();
        registry.register(
            Category::Plant,
            ModelEntry::new(Box::new(classifier.with_input_size(8, 8)), labels, 0.3).unwrap(),
        );
        registry
    }

    #[test]
    fn without_models_reports_unavailable() {
        let engine = InferenceEngine::new(source("stub://cam"), ModelRegistry::new());
        assert!(!engine.is_available());
        assert_eq!(engine.infer().unwrap_err(), CoreError::ModelUnavailable);
    }

    #[test]
    fn reports_labels_above_threshold() {
        let classifier = StubClassifier::new(vec![0.1, 0.7, 0.2, 0.95]);
        let engine = InferenceEngine::new(
            source("stub://cam"),
            registry(classifier, &["moss", "basil", "fern", "tomato"]),
        )
        .with_retry(fast_retry());

        let records = engine.infer().unwrap();
        let labels: Vec<&str> = records.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["basil", "tomato"]);
        assert!(records.iter().all(|r| r.category == Category::Plant));
    }

    #[test]
    fn history_is_bounded_across_calls() {
        let classifier = StubClassifier::new(vec![0.9, 0.8, 0.7]);
        let engine =
            InferenceEngine::new(source("stub://cam"), registry(classifier, &["a", "b", "c"]))
                .with_retry(fast_retry());
        engine.infer().unwrap();
        let records = engine.infer().unwrap();
        assert_eq!(records.len(), 5);
        let labels: Vec<&str> = records.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["b", "c", "a", "b", "c"]);
    }

    #[test]
    fn transient_failures_are_retried() {
        let classifier = StubClassifier::new(vec![0.9]).failing_first(2);
        let engine = InferenceEngine::new(source("stub://cam"), registry(classifier, &["basil"]))
            .with_retry(fast_retry());
        assert_eq!(engine.infer().unwrap().len(), 1);
    }

    #[test]
    fn exhausted_retries_are_distinct_from_missing_model() {
        let classifier = StubClassifier::new(vec![0.9]).failing_first(10);
        let engine = InferenceEngine::new(source("stub://cam"), registry(classifier, &["basil"]))
            .with_retry(fast_retry());
        match engine.infer().unwrap_err() {
            CoreError::InferenceFailed { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(engine.history().is_empty());
    }

    #[test]
    fn camera_outage_exhausts_retries() {
        let classifier = StubClassifier::new(vec![0.9]);
        let engine =
            InferenceEngine::new(source("stub://offline"), registry(classifier, &["basil"]))
                .with_retry(fast_retry());
        assert!(matches!(
            engine.infer().unwrap_err(),
            CoreError::InferenceFailed { .. }
        ));
    }

    #[test]
    fn preprocess_resizes_to_model_geometry() {
        let frame = Frame::new(vec![200u8; 4 * 2 * 3], 4, 2, PixelFormat::Rgb24).unwrap();
        let rgb = preprocess(&frame, 8, 8).unwrap();
        assert_eq!(rgb.len(), 8 * 8 * 3);
        assert!(rgb.iter().all(|&b| b == 200));
    }
}
