use anyhow::{anyhow, Result};

use crate::inference::backend::Classifier;

/// Returns a fixed score vector. Used for tests and dry runs without a model.
pub struct StubClassifier {
    scores: Vec<f32>,
    input: (u32, u32),
    failures_remaining: u32,
    calls: u32,
}

impl StubClassifier {
    pub fn new(scores: Vec<f32>) -> Self {
        Self {
            scores,
            input: (224, 224),
            failures_remaining: 0,
            calls: 0,
        }
    }

    pub fn with_input_size(mut self, width: u32, height: u32) -> Self {
        self.input = (width, height);
        self
    }

    /// Fail the first `count` calls before returning scores.
    pub fn failing_first(mut self, count: u32) -> Self {
        self.failures_remaining = count;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls
    }
}

impl Classifier for StubClassifier {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn input_size(&self) -> (u32, u32) {
        self.input
    }

    fn classify(&mut self, rgb: &[u8], width: u32, height: u32) -> Result<Vec<f32>> {
        self.calls += 1;
        if (width, height) != self.input {
            return Err(anyhow!(
                "input {}x{} does not match model input {}x{}",
                width,
                height,
                self.input.0,
                self.input.1
            ));
        }
        if rgb.len() != (width * height * 3) as usize {
            return Err(anyhow!("expected packed RGB input"));
        }
        if self.failures_remaining > 0 {
            self.failures_remaining -= 1;
            return Err(anyhow!("stub inference failure"));
        }
        Ok(self.scores.clone())
    }
}
