use std::borrow::Cow;
use std::time::{Duration, Instant};

use image::imageops::{self, FilterType};

use crate::detect::{class_label, BoxDetection, Detection};
use crate::frame::Frame;

/// Decides which frames reach the detector and maps results back to the source frame.
#[derive(Clone, Debug)]
pub struct InferenceScheduler {
    every_nth_frame: u64,
    min_interval: Duration,
    max_width: u32,
}

impl InferenceScheduler {
    pub fn new(every_nth_frame: u64, min_interval: Duration, max_width: u32) -> Self {
        Self {
            every_nth_frame: every_nth_frame.max(1),
            min_interval,
            max_width: max_width.max(1),
        }
    }

    /// Infer on every Nth frame, and only once `min_interval` has passed since the last run.
    pub fn should_infer(
        &self,
        frame_index: u64,
        now: Instant,
        last_inference_at: Option<Instant>,
    ) -> bool {
        if frame_index % self.every_nth_frame != 0 {
            return false;
        }
        match last_inference_at {
            Some(last) => now.saturating_duration_since(last) > self.min_interval,
            None => true,
        }
    }

    /// Downscale frames wider than `max_width`, keeping aspect ratio.
    ///
    /// Returns the detector input and the factor that maps its coordinates
    /// back to the source frame.
    pub fn prepare<'a>(&self, frame: &'a Frame) -> (Cow<'a, Frame>, f32) {
        let (width, height) = frame.dimensions();
        if width <= self.max_width {
            return (Cow::Borrowed(frame), 1.0);
        }
        let scale = self.max_width as f32 / width as f32;
        let new_height = ((height as f32 * scale) as u32).max(1);
        let resized = imageops::resize(frame, self.max_width, new_height, FilterType::Triangle);
        (Cow::Owned(resized), width as f32 / self.max_width as f32)
    }

    /// Map detector boxes back to source-frame pixels and attach display labels.
    pub fn rescale(&self, detections: &[BoxDetection], scale_back: f32) -> Vec<Detection> {
        detections
            .iter()
            .map(|det| Detection {
                x1: (det.x1 * scale_back) as i32,
                y1: (det.y1 * scale_back) as i32,
                x2: (det.x2 * scale_back) as i32,
                y2: (det.y2 * scale_back) as i32,
                confidence: det.confidence,
                label: class_label(det.class_id),
            })
            .collect()
    }
}

impl Default for InferenceScheduler {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500), 640)
    }
}
