use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use super::backend::Classifier;
use super::labels::load_labels;

/// Default score a class must exceed to be reported.
pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Plant,
    Pest,
    Disease,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Plant => "plant",
            Category::Pest => "pest",
            Category::Disease => "disease",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "plant" | "plants" => Ok(Category::Plant),
            "pest" | "pests" => Ok(Category::Pest),
            "disease" | "diseases" => Ok(Category::Disease),
            other => Err(anyhow!("unknown model category '{}'", other)),
        }
    }
}

/// Where to find one category's model and how to score it.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelSpec {
    pub category: Category,
    pub model_path: PathBuf,
    pub label_path: PathBuf,
    /// Square input edge in pixels.
    pub input_size: u32,
    pub threshold: f32,
}

/// A loaded classifier with its labels. Immutable after load apart from the
/// backend's own scratch state.
pub struct ModelEntry {
    classifier: Box<dyn Classifier>,
    labels: Vec<String>,
    threshold: f32,
}

impl ModelEntry {
    pub fn new(classifier: Box<dyn Classifier>, labels: Vec<String>, threshold: f32) -> Result<Self> {
        if labels.is_empty() {
            return Err(anyhow!("model '{}' has no labels", classifier.name()));
        }
        if !(0.0..=1.0).contains(&threshold) {
            return Err(anyhow!("threshold {} outside 0..=1", threshold));
        }
        Ok(Self {
            classifier,
            labels,
            threshold,
        })
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn classifier_mut(&mut self) -> &mut dyn Classifier {
        self.classifier.as_mut()
    }

    pub fn input_size(&self) -> (u32, u32) {
        self.classifier.input_size()
    }
}

/// Typed mapping from category to loaded model.
#[derive(Default)]
pub struct ModelRegistry {
    models: BTreeMap<Category, ModelEntry>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, category: Category, entry: ModelEntry) {
        log::info!(
            "inference: registered {} model ({} labels, threshold {:.2})",
            category,
            entry.labels.len(),
            entry.threshold
        );
        self.models.insert(category, entry);
    }

    /// Load every spec, skipping (and logging) the ones that fail. An empty
    /// registry leaves inference unavailable without stopping the process.
    pub fn load(specs: &[ModelSpec]) -> Self {
        let mut registry = Self::new();
        for spec in specs {
            match load_entry(spec) {
                Ok(entry) => registry.register(spec.category, entry),
                Err(err) => log::error!(
                    "inference: failed to load {} model {}: {:#}",
                    spec.category,
                    spec.model_path.display(),
                    err
                ),
            }
        }
        if registry.is_empty() {
            log::warn!("inference: no models loaded; inference endpoints will report unavailable");
        }
        registry
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn categories(&self) -> Vec<Category> {
        self.models.keys().copied().collect()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Category, &mut ModelEntry)> {
        self.models.iter_mut().map(|(category, entry)| (*category, entry))
    }
}

fn load_entry(spec: &ModelSpec) -> Result<ModelEntry> {
    if !spec.model_path.exists() {
        return Err(anyhow!("model file not found"));
    }
    let labels = load_labels(&spec.label_path)?;
    let classifier = load_classifier(spec)?;
    ModelEntry::new(classifier, labels, spec.threshold)
}

#[cfg(feature = "backend-tract")]
fn load_classifier(spec: &ModelSpec) -> Result<Box<dyn Classifier>> {
    let classifier =
        super::backends::TractClassifier::load(&spec.model_path, spec.input_size, spec.input_size)?;
    Ok(Box::new(classifier))
}

#[cfg(not(feature = "backend-tract"))]
fn load_classifier(_spec: &ModelSpec) -> Result<Box<dyn Classifier>> {
    Err(anyhow!("model loading requires the backend-tract feature"))
}

/// Pair every score above `threshold` with its label. Indices past the end of
/// the label list are dropped.
pub fn select_detections(scores: &[f32], labels: &[String], threshold: f32) -> Vec<(String, f32)> {
    scores
        .iter()
        .enumerate()
        .filter(|(_, score)| **score > threshold)
        .filter_map(|(idx, &score)| match labels.get(idx) {
            Some(label) => Some((label.clone(), score)),
            None => {
                log::debug!("inference: score index {} has no label, dropped", idx);
                None
            }
        })
        .collect()
}
