use anyhow::Result;
use image::{Rgb, RgbImage};
use rand::Rng;

use super::{FrameSource, SourceStats};
use crate::frame::Frame;

const WIDTH: u32 = 640;
const HEIGHT: u32 = 480;
const BLOCK_W: u32 = 80;
const BLOCK_H: u32 = 200;

/// Synthetic source for `stub://` URLs.
///
/// Produces a dark noisy background with a bright block sweeping left to
/// right, so the overlay and stream path can be exercised without a camera.
pub struct SyntheticSource {
    url: String,
    connected: bool,
    frame_count: u64,
    connects: u64,
}

impl SyntheticSource {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            connected: false,
            frame_count: 0,
            connects: 0,
        }
    }

    fn generate(&self) -> Frame {
        let mut rng = rand::thread_rng();
        let mut frame = RgbImage::from_fn(WIDTH, HEIGHT, |_, _| {
            let v = rng.gen_range(20..36);
            Rgb([v, v, v + 8])
        });
        let travel = (WIDTH - BLOCK_W) as u64;
        let step = (self.frame_count * 4) % (travel * 2);
        let x0 = if step < travel { step } else { travel * 2 - step } as u32;
        let y0 = (HEIGHT - BLOCK_H) / 2;
        for y in y0..y0 + BLOCK_H {
            for x in x0..x0 + BLOCK_W {
                frame.put_pixel(x, y, Rgb([210, 180, 150]));
            }
        }
        frame
    }
}

impl FrameSource for SyntheticSource {
    /// Synthetic sources are always reachable.
    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        self.connects += 1;
        log::info!("camera connected (synthetic): {}", self.url);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        if !self.connected {
            return Err(anyhow::anyhow!("synthetic source not connected"));
        }
        let frame = self.generate();
        self.frame_count += 1;
        Ok(Some(frame))
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            connects: self.connects,
            url: self.url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_moves_between_frames() {
        let mut source = SyntheticSource::new("stub://test");
        source.connect().unwrap();
        let first = source.read_frame().unwrap().unwrap();
        for _ in 0..9 {
            source.read_frame().unwrap();
        }
        let later = source.read_frame().unwrap().unwrap();
        assert_eq!(first.dimensions(), (WIDTH, HEIGHT));
        assert_eq!(first.get_pixel(0, HEIGHT / 2).0, [210, 180, 150]);
        assert_ne!(later.get_pixel(0, HEIGHT / 2).0, [210, 180, 150]);
        assert_eq!(source.stats().frames_captured, 11);
    }

    #[test]
    fn read_requires_connect() {
        let mut source = SyntheticSource::new("stub://test");
        assert!(source.read_frame().is_err());
        source.connect().unwrap();
        source.disconnect();
        assert!(source.read_frame().is_err());
    }
}
