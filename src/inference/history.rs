use serde::Serialize;
use std::collections::VecDeque;

use super::registry::Category;

/// Number of detections kept for `/inference_data`.
pub const HISTORY_CAPACITY: usize = 5;

/// One qualifying class score. `confidence` is the raw model score in 0..=1.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionRecord {
    pub category: Category,
    pub label: String,
    pub confidence: f32,
}

/// External representation: confidence scaled to a 0..=100 percentage.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DetectionReport {
    pub category: Category,
    pub label: String,
    pub confidence: f32,
}

impl DetectionRecord {
    pub fn to_report(&self) -> DetectionReport {
        DetectionReport {
            category: self.category,
            label: self.label.clone(),
            confidence: self.confidence * 100.0,
        }
    }
}

/// Fixed-capacity FIFO of recent detections; the oldest record is evicted first.
#[derive(Debug)]
pub struct DetectionHistory {
    records: VecDeque<DetectionRecord>,
    capacity: usize,
}

impl DetectionHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, record: DetectionRecord) {
        while self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn extend(&mut self, records: impl IntoIterator<Item = DetectionRecord>) {
        for record in records {
            self.push(record);
        }
    }

    /// Oldest first.
    pub fn snapshot(&self) -> Vec<DetectionRecord> {
        self.records.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for DetectionHistory {
    fn default() -> Self {
        Self::new(HISTORY_CAPACITY)
    }
}
