use std::time::{Duration, Instant};

use crate::detect::Detection;

/// Rendering opacity never falls below this.
pub const MIN_ALPHA: f32 = 0.3;

#[derive(Clone, Debug, PartialEq)]
pub struct TrackedDetection {
    pub detection: Detection,
    pub first_observed_at: Instant,
}

impl TrackedDetection {
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.first_observed_at)
    }
}

/// Holds the detections currently shown on the stream.
///
/// Every inference batch replaces the whole set; there is no per-object
/// identity across batches. Between batches entries fade and expire after
/// `max_age`.
#[derive(Clone, Debug)]
pub struct DetectionTracker {
    entries: Vec<TrackedDetection>,
    max_age: Duration,
}

impl DetectionTracker {
    pub fn new(max_age: Duration) -> Self {
        Self {
            entries: Vec::new(),
            max_age,
        }
    }

    /// `Some(batch)` when an inference ran this cycle, `None` otherwise.
    pub fn update(&mut self, batch: Option<Vec<Detection>>, now: Instant) {
        if let Some(batch) = batch {
            self.entries = batch
                .into_iter()
                .map(|detection| TrackedDetection {
                    detection,
                    first_observed_at: now,
                })
                .collect();
        }
        let max_age = self.max_age;
        self.entries.retain(|entry| entry.age(now) <= max_age);
    }

    /// Unexpired detections with their rendering opacity.
    pub fn visible(&self, now: Instant) -> Vec<(Detection, f32)> {
        self.entries
            .iter()
            .filter(|entry| entry.age(now) <= self.max_age)
            .map(|entry| (entry.detection.clone(), self.alpha(entry.age(now))))
            .collect()
    }

    pub fn visible_count(&self, now: Instant) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.age(now) <= self.max_age)
            .count()
    }

    pub fn entries(&self) -> &[TrackedDetection] {
        &self.entries
    }

    /// Linear fade from 1.0 at age zero to `MIN_ALPHA`.
    pub fn alpha(&self, age: Duration) -> f32 {
        if self.max_age.is_zero() {
            return MIN_ALPHA;
        }
        let fade = 1.0 - age.as_secs_f32() / self.max_age.as_secs_f32();
        fade.max(MIN_ALPHA)
    }
}

impl Default for DetectionTracker {
    fn default() -> Self {
        Self::new(Duration::from_millis(1500))
    }
}
