//! Frames, published stats, and the shared hand-off slot.
//!
//! - `Frame`: decoded RGB8 image owned by the pipeline.
//! - `Stats`: per-cycle metrics published alongside each encoded frame.
//! - `FrameBuffer`: the single most recent `(jpeg, stats)` pair, shared between
//!   the pipeline thread (only writer) and any number of HTTP readers.
//!
//! Lock discipline: the slot mutex is held only to swap in or clone out an
//! `Arc` pair. Encoding happens before `publish`, never under the lock.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use serde::Serialize;
use std::sync::{Arc, Mutex};

use crate::render::draw_text;

/// Decoded RGB8 frame.
pub type Frame = RgbImage;

/// JPEG quality for every frame handed to consumers.
pub const JPEG_QUALITY: u8 = 80;

pub const PLACEHOLDER_WIDTH: u32 = 640;
pub const PLACEHOLDER_HEIGHT: u32 = 480;
pub const PLACEHOLDER_CAPTION: &str = "CONNECTING TO CAMERA...";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    #[default]
    Connecting,
    Active,
}

/// Metrics recomputed every cycle and published with the frame they describe.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Stats {
    /// Detections currently drawn on the frame (tracked and not yet expired).
    #[serde(rename = "detections")]
    pub visible_detections: usize,
    /// Smoothed, flicker-resistant detection count.
    #[serde(rename = "stable_detections")]
    pub stable_detections: usize,
    pub fps: f32,
    #[serde(rename = "latency")]
    pub last_inference_latency_ms: f32,
    pub status: StreamStatus,
}

impl Stats {
    /// FPS rounded to one decimal place, as reported over the API.
    pub fn rounded(&self) -> Self {
        Self {
            fps: (self.fps * 10.0).round() / 10.0,
            last_inference_latency_ms: (self.last_inference_latency_ms * 10.0).round() / 10.0,
            ..self.clone()
        }
    }
}

/// One published `(jpeg, stats)` pair. Cloning shares the JPEG bytes.
#[derive(Clone, Debug)]
pub struct PublishedFrame {
    pub jpeg: Arc<Vec<u8>>,
    pub stats: Stats,
}

/// Single-slot frame hand-off between the pipeline thread and HTTP readers.
#[derive(Debug)]
pub struct FrameBuffer {
    slot: Mutex<Option<PublishedFrame>>,
    placeholder: Arc<Vec<u8>>,
}

impl FrameBuffer {
    pub fn new() -> Result<Self> {
        let placeholder = encode_jpeg(&placeholder_frame()).context("encode placeholder frame")?;
        Ok(Self {
            slot: Mutex::new(None),
            placeholder: Arc::new(placeholder),
        })
    }

    /// Replace the published pair. Frame and stats become visible together.
    pub fn publish(&self, jpeg: Vec<u8>, mut stats: Stats) {
        stats.status = StreamStatus::Active;
        let published = PublishedFrame {
            jpeg: Arc::new(jpeg),
            stats,
        };
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(published);
    }

    /// Publish the placeholder image with fresh stats, used when encoding fails.
    pub fn publish_placeholder(&self, mut stats: Stats) {
        stats.status = StreamStatus::Active;
        let published = PublishedFrame {
            jpeg: self.placeholder.clone(),
            stats,
        };
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(published);
    }

    /// The last published pair, or `None` before the first publish.
    pub fn latest(&self) -> Option<PublishedFrame> {
        self.slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// The last published pair, or the "connecting" placeholder before the first publish.
    pub fn read_latest(&self) -> PublishedFrame {
        self.latest().unwrap_or_else(|| PublishedFrame {
            jpeg: self.placeholder.clone(),
            stats: Stats::default(),
        })
    }

    pub fn has_published(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    pub fn placeholder_jpeg(&self) -> Arc<Vec<u8>> {
        self.placeholder.clone()
    }
}

/// Encode an RGB frame as JPEG at `JPEG_QUALITY`.
pub fn encode_jpeg(frame: &Frame) -> Result<Vec<u8>> {
    if frame.width() == 0 || frame.height() == 0 {
        return Err(anyhow!(
            "cannot encode empty frame {}x{}",
            frame.width(),
            frame.height()
        ));
    }
    let mut buffer = Vec::with_capacity(64 * 1024);
    JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY)
        .encode_image(frame)
        .map_err(|err| anyhow!("jpeg encode failed: {err}"))?;
    Ok(buffer)
}

/// Black 640x480 frame with a green "connecting" caption.
pub fn placeholder_frame() -> Frame {
    let mut frame = RgbImage::new(PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT);
    draw_text(&mut frame, 150, 230, PLACEHOLDER_CAPTION, Rgb([0, 255, 0]), 2);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn stats_with(count: usize) -> Stats {
        Stats {
            visible_detections: count,
            stable_detections: count,
            fps: count as f32,
            last_inference_latency_ms: count as f32,
            status: StreamStatus::Connecting,
        }
    }

    #[test]
    fn read_latest_returns_placeholder_before_first_publish() {
        let buffer = FrameBuffer::new().unwrap();
        assert!(buffer.latest().is_none());
        let latest = buffer.read_latest();
        assert_eq!(latest.stats.status, StreamStatus::Connecting);
        assert_eq!(latest.jpeg, buffer.placeholder_jpeg());
        assert_eq!(&latest.jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn publish_marks_stream_active() {
        let buffer = FrameBuffer::new().unwrap();
        buffer.publish(vec![0xFF, 0xD8, 0xFF, 0xD9], stats_with(2));
        let latest = buffer.read_latest();
        assert_eq!(latest.stats.status, StreamStatus::Active);
        assert_eq!(latest.stats.visible_detections, 2);
        assert_eq!(latest.jpeg.as_slice(), &[0xFF, 0xD8, 0xFF, 0xD9]);
    }

    #[test]
    fn publish_placeholder_keeps_stats() {
        let buffer = FrameBuffer::new().unwrap();
        buffer.publish_placeholder(stats_with(3));
        let latest = buffer.read_latest();
        assert_eq!(latest.jpeg, buffer.placeholder_jpeg());
        assert_eq!(latest.stats.visible_detections, 3);
        assert_eq!(latest.stats.status, StreamStatus::Active);
    }

    #[test]
    fn concurrent_readers_never_see_torn_pairs() {
        let buffer = Arc::new(FrameBuffer::new().unwrap());
        let writer = {
            let buffer = buffer.clone();
            thread::spawn(move || {
                for i in 0..500usize {
                    let tag = (i % 251) as u8;
                    buffer.publish(vec![tag; 16], stats_with(i));
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let buffer = buffer.clone();
                thread::spawn(move || {
                    for _ in 0..500 {
                        if let Some(frame) = buffer.latest() {
                            let expected = (frame.stats.visible_detections % 251) as u8;
                            assert!(frame.jpeg.iter().all(|b| *b == expected));
                            assert_eq!(frame.stats.fps, frame.stats.visible_detections as f32);
                        }
                    }
                })
            })
            .collect();
        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    }

    #[test]
    fn stats_serialize_with_api_field_names() {
        let stats = Stats {
            visible_detections: 2,
            stable_detections: 1,
            fps: 29.97,
            last_inference_latency_ms: 41.26,
            status: StreamStatus::Active,
        }
        .rounded();
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["detections"], 2);
        assert_eq!(json["stable_detections"], 1);
        assert_eq!(json["status"], "active");
        assert!((json["fps"].as_f64().unwrap() - 30.0).abs() < 1e-3);
        assert!((json["latency"].as_f64().unwrap() - 41.3).abs() < 1e-3);
    }

    #[test]
    fn encode_rejects_empty_frame() {
        assert!(encode_jpeg(&RgbImage::new(0, 0)).is_err());
    }
}
