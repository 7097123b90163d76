use std::collections::VecDeque;

use anyhow::{anyhow, Result};

use crate::detect::backend::{DetectorBackend, DetectorParams};
use crate::detect::result::{BoxDetection, DetectionResult};

/// Scripted backend for tests and camera-less runs.
///
/// Queued results are returned in order, then every call returns an empty
/// result. Params are honoured, so queued boxes outside the class filter or
/// below the confidence floor are dropped the same way a real model would.
#[derive(Default)]
pub struct StubBackend {
    scripted: VecDeque<Vec<BoxDetection>>,
    fail_next: usize,
    calls: u64,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one detector result.
    pub fn push_result(&mut self, detections: Vec<BoxDetection>) {
        self.scripted.push_back(detections);
    }

    pub fn with_results(mut self, results: Vec<Vec<BoxDetection>>) -> Self {
        self.scripted.extend(results);
        self
    }

    /// Make the next `count` calls fail.
    pub fn fail_next(&mut self, count: usize) {
        self.fail_next = count;
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        params: &DetectorParams,
    ) -> Result<DetectionResult> {
        self.calls += 1;
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(anyhow!("stub detector failure injected"));
        }
        let expected = (width as usize) * (height as usize) * 3;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes, received {}",
                expected,
                pixels.len()
            ));
        }
        let detections = self
            .scripted
            .pop_front()
            .unwrap_or_default()
            .into_iter()
            .filter(|det| params.accepts(det.class_id, det.confidence))
            .collect();
        Ok(DetectionResult { detections })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(confidence: f32) -> BoxDetection {
        BoxDetection {
            x1: 1.0,
            y1: 1.0,
            x2: 5.0,
            y2: 5.0,
            confidence,
            class_id: 0,
        }
    }

    #[test]
    fn returns_scripted_results_then_empty() {
        let mut backend = StubBackend::new().with_results(vec![vec![person(0.9)]]);
        let params = DetectorParams::default();
        let pixels = vec![0u8; 4 * 4 * 3];

        let first = backend.detect(&pixels, 4, 4, &params).unwrap();
        assert_eq!(first.detections.len(), 1);
        let second = backend.detect(&pixels, 4, 4, &params).unwrap();
        assert!(second.detections.is_empty());
        assert_eq!(backend.calls(), 2);
    }

    #[test]
    fn applies_confidence_floor_and_class_filter() {
        let mut car = person(0.95);
        car.class_id = 2;
        let mut backend =
            StubBackend::new().with_results(vec![vec![person(0.4), person(0.6), car]]);
        let pixels = vec![0u8; 4 * 4 * 3];

        let result = backend
            .detect(&pixels, 4, 4, &DetectorParams::default())
            .unwrap();
        assert_eq!(result.detections, vec![person(0.6)]);
    }

    #[test]
    fn injected_failures_are_errors() {
        let mut backend = StubBackend::new();
        backend.fail_next(1);
        let pixels = vec![0u8; 4 * 4 * 3];
        let params = DetectorParams::default();
        assert!(backend.detect(&pixels, 4, 4, &params).is_err());
        assert!(backend.detect(&pixels, 4, 4, &params).is_ok());
    }

    #[test]
    fn rejects_mismatched_buffer() {
        let mut backend = StubBackend::new();
        let err = backend
            .detect(&[0u8; 5], 4, 4, &DetectorParams::default())
            .unwrap_err();
        assert!(err.to_string().contains("RGB bytes"));
    }
}
