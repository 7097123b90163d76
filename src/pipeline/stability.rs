use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub const WINDOW_CAPACITY: usize = 10;
pub const UPDATE_INTERVAL: Duration = Duration::from_millis(500);
pub const MIN_SAMPLES: usize = 3;
/// A mode seen this many times in the window is accepted outright.
pub const STRONG_MAJORITY: usize = 5;

/// Smooths raw per-inference detection counts into a flicker-resistant count.
///
/// The stable value only moves at most once per `UPDATE_INTERVAL`, and only to
/// the most frequent count in the sliding window. Ties between equally
/// frequent counts go to the one that appears first in the window (oldest).
#[derive(Clone, Debug)]
pub struct StabilityEstimator {
    window: VecDeque<usize>,
    stable: usize,
    last_update_at: Option<Instant>,
}

impl StabilityEstimator {
    pub fn new() -> Self {
        Self {
            window: VecDeque::with_capacity(WINDOW_CAPACITY),
            stable: 0,
            last_update_at: None,
        }
    }

    pub fn observe(&mut self, raw: usize, now: Instant) -> usize {
        if self.window.len() == WINDOW_CAPACITY {
            self.window.pop_front();
        }
        self.window.push_back(raw);

        let due = match self.last_update_at {
            Some(last) => now.saturating_duration_since(last) > UPDATE_INTERVAL,
            None => true,
        };
        if !due || self.window.len() < MIN_SAMPLES {
            return self.stable;
        }

        if let Some((mode, occurrences)) = self.mode() {
            if mode.abs_diff(self.stable) >= 1 || occurrences >= STRONG_MAJORITY {
                if mode != self.stable {
                    log::info!("stable detection count {} -> {}", self.stable, mode);
                }
                self.stable = mode;
                self.last_update_at = Some(now);
            }
        }
        self.stable
    }

    pub fn stable(&self) -> usize {
        self.stable
    }

    /// Most frequent value and its count; earliest in the window wins ties.
    fn mode(&self) -> Option<(usize, usize)> {
        let mut best: Option<(usize, usize)> = None;
        for (idx, value) in self.window.iter().enumerate() {
            if self.window.iter().take(idx).any(|v| v == value) {
                continue;
            }
            let occurrences = self.window.iter().filter(|v| *v == value).count();
            match best {
                Some((_, top)) if top >= occurrences => {}
                _ => best = Some((*value, occurrences)),
            }
        }
        best
    }
}

impl Default for StabilityEstimator {
    fn default() -> Self {
        Self::new()
    }
}
