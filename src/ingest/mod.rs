//! Frame acquisition.
//!
//! Sources produce decoded RGB frames for the pipeline worker:
//! - HTTP MJPEG streams and single-JPEG snapshot endpoints (`http://`, `https://`)
//! - Synthetic frames (`stub://`) for camera-less runs and tests
//!
//! A source never retries on its own. The pipeline worker owns reconnect and
//! back-off policy; a source only reports what happened.

mod mjpeg;
mod synthetic;

use anyhow::{anyhow, Context, Result};
use std::time::Duration;
use url::Url;

use crate::config::CameraSettings;
use crate::frame::Frame;

pub use mjpeg::MjpegSource;
pub use synthetic::SyntheticSource;

/// Reads slower than this count as stalls.
pub const SLOW_READ_THRESHOLD: Duration = Duration::from_millis(100);
/// Consecutive stalled frames dropped before one is processed anyway.
pub const MAX_SLOW_READ_SKIPS: u32 = 2;

/// A producer of decoded frames.
pub trait FrameSource: Send {
    /// Release any prior connection, open a fresh one, and confirm that frames decode.
    fn connect(&mut self) -> Result<()>;

    /// Next frame. `Ok(None)` means the upstream ended the stream cleanly.
    fn read_frame(&mut self) -> Result<Option<Frame>>;

    fn is_connected(&self) -> bool;

    /// Drop the upstream connection. Safe to call when not connected.
    fn disconnect(&mut self);

    fn stats(&self) -> SourceStats;
}

/// Counters for a frame source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub connects: u64,
    pub url: String,
}

/// Open the source matching the camera URL scheme.
pub fn open_source(camera: &CameraSettings) -> Result<Box<dyn FrameSource>> {
    let url = Url::parse(&camera.url).context("parse camera url")?;
    match url.scheme() {
        "http" | "https" => Ok(Box::new(MjpegSource::new(camera.clone()))),
        "stub" => Ok(Box::new(SyntheticSource::new(&camera.url))),
        other => Err(anyhow!(
            "unsupported camera scheme '{}'; expected http(s) or stub",
            other
        )),
    }
}

/// Drops frames after slow reads so a stalled upstream does not build backlog.
///
/// A slow read drops its frame, up to `MAX_SLOW_READ_SKIPS` in a row; the next
/// slow frame after that is processed and the count restarts. A fast read
/// also restarts the count.
#[derive(Debug)]
pub struct SlowReadGuard {
    threshold: Duration,
    max_skips: u32,
    skipped: u32,
}

impl SlowReadGuard {
    pub fn new(threshold: Duration, max_skips: u32) -> Self {
        Self {
            threshold,
            max_skips,
            skipped: 0,
        }
    }

    /// Returns `true` when the frame that took `read_time` should be processed.
    pub fn admit(&mut self, read_time: Duration) -> bool {
        if read_time <= self.threshold {
            self.skipped = 0;
            return true;
        }
        if self.skipped < self.max_skips {
            self.skipped += 1;
            return false;
        }
        self.skipped = 0;
        true
    }
}

impl Default for SlowReadGuard {
    fn default() -> Self {
        Self::new(SLOW_READ_THRESHOLD, MAX_SLOW_READ_SKIPS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SLOW: Duration = Duration::from_millis(150);
    const FAST: Duration = Duration::from_millis(20);

    #[test]
    fn slow_reads_skip_at_most_two_frames() {
        let mut guard = SlowReadGuard::default();
        assert!(!guard.admit(SLOW));
        assert!(!guard.admit(SLOW));
        assert!(guard.admit(SLOW));
        assert!(!guard.admit(SLOW));
    }

    #[test]
    fn fast_read_restarts_skip_count() {
        let mut guard = SlowReadGuard::default();
        assert!(!guard.admit(SLOW));
        assert!(guard.admit(FAST));
        assert!(!guard.admit(SLOW));
        assert!(!guard.admit(SLOW));
        assert!(guard.admit(SLOW));
    }

    #[test]
    fn open_source_rejects_unknown_scheme() {
        let camera = CameraSettings {
            url: "rtsp://camera/stream".to_string(),
            connect_timeout: Duration::from_secs(1),
            read_timeout: Duration::from_secs(1),
        };
        assert!(open_source(&camera).is_err());
    }

    #[test]
    fn open_source_selects_synthetic_for_stub_urls() {
        let camera = CameraSettings {
            url: "stub://front".to_string(),
            connect_timeout: Duration::from_secs(1),
            read_timeout: Duration::from_secs(1),
        };
        let mut source = open_source(&camera).unwrap();
        source.connect().unwrap();
        assert!(source.read_frame().unwrap().is_some());
    }
}
