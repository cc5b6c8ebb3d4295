use anyhow::Result;

/// Image classification backend.
///
/// `classify` receives tightly packed RGB pixels already resized to
/// `input_size()` and returns one score per class, in label order. Scores are
/// expected in 0..=1.
pub trait Classifier: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Square or rectangular model input geometry (width, height).
    fn input_size(&self) -> (u32, u32);

    fn classify(&mut self, rgb: &[u8], width: u32, height: u32) -> Result<Vec<f32>>;
}
