//! HTTP MJPEG / snapshot frame source.
//!
//! `multipart/*` responses are parsed as a continuous MJPEG stream. Any other
//! content type is treated as a snapshot endpoint and fetched once per frame.

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::time::Instant;

use super::{FrameSource, SourceStats};
use crate::config::CameraSettings;
use crate::frame::Frame;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;
/// Read granularity. Small reads keep the parse buffer close to the newest frame.
const READ_CHUNK_BYTES: usize = 8 * 1024;

/// Frame source for HTTP cameras (IP Webcam style `/video` endpoints).
pub struct MjpegSource {
    config: CameraSettings,
    agent: ureq::Agent,
    stream: Option<HttpStream>,
    connected_at: Option<Instant>,
    frame_count: u64,
    connects: u64,
}

enum HttpStream {
    Mjpeg(MjpegStream),
    SingleJpeg,
}

impl MjpegSource {
    pub fn new(config: CameraSettings) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(config.connect_timeout)
            .timeout_read(config.read_timeout)
            .build();
        Self {
            config,
            agent,
            stream: None,
            connected_at: None,
            frame_count: 0,
            connects: 0,
        }
    }

    fn open(&mut self) -> Result<()> {
        let response = self
            .agent
            .get(&self.config.url)
            .call()
            .with_context(|| format!("connect to camera stream {}", self.config.url))?;
        let content_type = response.header("Content-Type").unwrap_or("").to_lowercase();
        if content_type.contains("multipart") {
            let mut stream = MjpegStream::new(response.into_reader());
            // Exploratory read: the stream must yield a decodable frame.
            let jpeg = stream
                .read_newest_jpeg()?
                .ok_or_else(|| anyhow!("mjpeg stream ended before first frame"))?;
            decode_jpeg(&jpeg)?;
            self.stream = Some(HttpStream::Mjpeg(stream));
        } else {
            let jpeg = read_body(response)?;
            decode_jpeg(&jpeg)?;
            self.stream = Some(HttpStream::SingleJpeg);
        }
        Ok(())
    }
}

impl FrameSource for MjpegSource {
    fn connect(&mut self) -> Result<()> {
        self.disconnect();
        self.connects += 1;
        log::info!("connecting to camera {}", self.config.url);
        self.open()?;
        self.connected_at = Some(Instant::now());
        let mode = match self.stream {
            Some(HttpStream::Mjpeg(_)) => "mjpeg",
            _ => "snapshot",
        };
        log::info!("camera connected ({}): {}", mode, self.config.url);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| anyhow!("camera source not connected; call connect() first"))?;
        let jpeg = match stream {
            HttpStream::Mjpeg(stream) => match stream.read_newest_jpeg()? {
                Some(jpeg) => jpeg,
                None => return Ok(None),
            },
            HttpStream::SingleJpeg => fetch_single_jpeg(&self.agent, &self.config.url)?,
        };
        let frame = decode_jpeg(&jpeg)?;
        self.frame_count += 1;
        Ok(Some(frame))
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn disconnect(&mut self) {
        if self.stream.take().is_some() {
            log::info!("camera connection released: {}", self.config.url);
        }
        self.connected_at = None;
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            connects: self.connects,
            url: self.config.url.clone(),
        }
    }
}

/// Incremental multipart JPEG splitter.
///
/// Parts are located by JPEG SOI/EOI markers, so boundary strings and part
/// headers are skipped without being parsed.
struct MjpegStream {
    reader: Box<dyn Read + Send + Sync>,
    buffer: Vec<u8>,
}

impl MjpegStream {
    fn new(reader: Box<dyn Read + Send + Sync>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    /// Newest complete JPEG. Older complete frames already buffered are dropped.
    fn read_newest_jpeg(&mut self) -> Result<Option<Vec<u8>>> {
        let mut chunk = vec![0u8; READ_CHUNK_BYTES];
        loop {
            if let Some(frame) = take_newest_jpeg(&mut self.buffer) {
                return Ok(Some(frame));
            }

            let read = self.reader.read(&mut chunk).context("read mjpeg chunk")?;
            if read == 0 {
                return Ok(None);
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let keep = 2.min(self.buffer.len());
                let drain_len = self.buffer.len() - keep;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

/// Remove every complete JPEG from the front of `buffer` and return the last one.
fn take_newest_jpeg(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let mut offset = 0;
    let mut newest = None;
    while let Some((start, end)) = find_jpeg_bounds(&buffer[offset..]) {
        newest = Some((offset + start, offset + end));
        offset += end;
    }
    let (start, end) = newest?;
    let frame = buffer[start..end].to_vec();
    buffer.drain(..end);
    Some(frame)
}

fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}

fn fetch_single_jpeg(agent: &ureq::Agent, url: &str) -> Result<Vec<u8>> {
    let response = agent
        .get(url)
        .call()
        .with_context(|| format!("fetch jpeg snapshot from {}", url))?;
    read_body(response)
}

fn read_body(response: ureq::Response) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_JPEG_BYTES as u64)
        .read_to_end(&mut bytes)
        .context("read jpeg snapshot")?;
    if bytes.is_empty() {
        return Err(anyhow!("empty jpeg snapshot"));
    }
    Ok(bytes)
}

fn decode_jpeg(bytes: &[u8]) -> Result<Frame> {
    let image = image::load_from_memory_with_format(bytes, image::ImageFormat::Jpeg)
        .context("decode jpeg")?;
    Ok(image.into_rgb8())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encode_jpeg;
    use image::{Rgb, RgbImage};
    use std::io::Cursor;

    fn part(jpeg: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
        out.extend_from_slice(jpeg);
        out.extend_from_slice(b"\r\n");
        out
    }

    #[test]
    fn finds_jpeg_bounds_between_markers() {
        let data = [0x00, 0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9, 0x00];
        assert_eq!(find_jpeg_bounds(&data), Some((1, 7)));
        assert_eq!(find_jpeg_bounds(&data[..5]), None);
    }

    #[test]
    fn take_newest_drops_older_complete_frames() {
        let mut buffer = Vec::new();
        buffer.extend(part(&[0xFF, 0xD8, 0x01, 0xFF, 0xD9]));
        buffer.extend(part(&[0xFF, 0xD8, 0x02, 0xFF, 0xD9]));
        buffer.extend_from_slice(&[0xFF, 0xD8, 0x03]);

        let newest = take_newest_jpeg(&mut buffer).unwrap();
        assert_eq!(newest, vec![0xFF, 0xD8, 0x02, 0xFF, 0xD9]);
        // The partial third frame stays buffered.
        assert!(buffer.ends_with(&[0xFF, 0xD8, 0x03]));
    }

    #[test]
    fn stream_yields_frames_then_end_of_stream() {
        let jpeg = encode_jpeg(&RgbImage::from_pixel(16, 8, Rgb([10, 20, 30]))).unwrap();
        let body = part(&jpeg);
        let mut stream = MjpegStream::new(Box::new(Cursor::new(body)));

        let frame = stream.read_newest_jpeg().unwrap().unwrap();
        let decoded = decode_jpeg(&frame).unwrap();
        assert_eq!(decoded.dimensions(), (16, 8));
        assert!(stream.read_newest_jpeg().unwrap().is_none());
    }

    #[test]
    fn read_before_connect_is_an_error() {
        let mut source = MjpegSource::new(CameraSettings {
            url: "http://127.0.0.1:9/video".to_string(),
            connect_timeout: std::time::Duration::from_millis(100),
            read_timeout: std::time::Duration::from_millis(100),
        });
        assert!(!source.is_connected());
        assert!(source.read_frame().is_err());
    }
}
