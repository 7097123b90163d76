use anyhow::Result;

use crate::detect::result::DetectionResult;

/// Fixed invocation parameters handed to every detector call.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectorParams {
    /// Square model input size in pixels.
    pub input_size: u32,
    /// Detections scoring below this are dropped by the backend.
    pub confidence_floor: f32,
    /// Class ids to keep. Everything else is dropped by the backend.
    pub class_filter: Vec<usize>,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            input_size: 640,
            confidence_floor: 0.5,
            class_filter: vec![0],
        }
    }
}

impl DetectorParams {
    pub fn accepts(&self, class_id: usize, confidence: f32) -> bool {
        confidence >= self.confidence_floor && self.class_filter.contains(&class_id)
    }
}

/// Detector backend trait.
///
/// Backends may be slow relative to the source frame rate and may fail; the
/// caller treats any error as "no inference this cycle".
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a packed RGB8 frame of `width * height * 3` bytes.
    ///
    /// Returned boxes are in the pixel space of the buffer passed in.
    fn detect(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        params: &DetectorParams,
    ) -> Result<DetectionResult>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
