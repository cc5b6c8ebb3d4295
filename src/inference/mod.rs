//! Image classification on captured frames.
//!
//! - `backend`: the `Classifier` trait
//! - `backends`: stub and tract (feature: backend-tract) implementations
//! - `registry`: typed category -> (classifier, labels, threshold) mapping
//! - `history`: the bounded rolling buffer of recent detections
//! - `engine`: `InferenceEngine`, capture + classify with retries

mod backend;
pub mod backends;
mod engine;
mod history;
mod labels;
mod registry;

pub use backend::Classifier;
pub use backends::StubClassifier;
#[cfg(feature = "backend-tract")]
pub use backends::TractClassifier;
pub use engine::{preprocess, InferenceEngine, INFERENCE_RETRY};
pub use history::{DetectionHistory, DetectionRecord, DetectionReport, HISTORY_CAPACITY};
pub use labels::{load_labels, parse_labels};
pub use registry::{
    select_detections, Category, ModelEntry, ModelRegistry, ModelSpec, DEFAULT_SCORE_THRESHOLD,
};
