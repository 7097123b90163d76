//! HTTP surface: the MJPEG re-stream, detection stats, and the auxiliary
//! location endpoints.
//!
//! Every accepted connection is served on its own thread. Streaming
//! connections poll the `FrameBuffer` at a fixed cadence and never block the
//! pipeline; a slow client simply sees the same frame more than once.

mod location;

pub use location::{Location, LocationStore};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::frame::FrameBuffer;

const MAX_HEADER_BYTES: usize = 8192;
const MAX_BODY_BYTES: usize = 4096;
const BOUNDARY: &str = "frame";

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    /// Delay between multipart parts on each `/video_feed` connection.
    pub stream_interval: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:5000".to_string(),
            stream_interval: Duration::from_millis(33),
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    /// Stop accepting connections and end open video streams.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("stream server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    frame_buffer: Arc<FrameBuffer>,
}

/// State shared by connection threads.
#[derive(Clone)]
struct ConnectionContext {
    frame_buffer: Arc<FrameBuffer>,
    location: LocationStore,
    stream_interval: Duration,
    shutdown: Arc<AtomicBool>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, frame_buffer: Arc<FrameBuffer>) -> Self {
        Self { cfg, frame_buffer }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .with_context(|| format!("invalid api address '{}'", self.cfg.addr))?;
        let listener = TcpListener::bind(configured_addr)
            .with_context(|| format!("bind stream server on {}", configured_addr))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let ctx = ConnectionContext {
            frame_buffer: self.frame_buffer,
            location: LocationStore::spawn()?,
            stream_interval: self.cfg.stream_interval,
            shutdown: shutdown.clone(),
        };
        let join = std::thread::Builder::new()
            .name("skydra-api".to_string())
            .spawn(move || {
                if let Err(err) = run_api(listener, ctx) {
                    log::error!("stream server stopped: {}", err);
                }
            })
            .context("spawn stream server thread")?;

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(listener: TcpListener, ctx: ConnectionContext) -> Result<()> {
    loop {
        if ctx.shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let ctx = ctx.clone();
                let spawned = std::thread::Builder::new()
                    .name("skydra-conn".to_string())
                    .spawn(move || {
                        if let Err(err) = handle_connection(stream, &ctx) {
                            log::warn!("request from {} failed: {:#}", peer, err);
                        }
                    });
                if let Err(err) = spawned {
                    log::warn!("could not spawn connection thread: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, ctx: &ConnectionContext) -> Result<()> {
    stream.set_nonblocking(false)?;
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            write_json_response(&mut stream, 400, r#"{"error":"bad_request"}"#)?;
            return Err(err);
        }
    };

    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/video_feed") => stream_video(stream, ctx),
        ("GET", "/api/detection_stats") => {
            let stats = ctx.frame_buffer.read_latest().stats.rounded();
            let payload = serde_json::to_vec(&stats)?;
            write_response(&mut stream, 200, "application/json", &payload)
        }
        ("GET", "/api/gps_data") => {
            let payload = serde_json::to_vec(&ctx.location.get()?)?;
            write_response(&mut stream, 200, "application/json", &payload)
        }
        ("POST", "/update_location") => update_location(&mut stream, ctx, &request.body),
        ("GET", "/health") => write_json_response(&mut stream, 200, r#"{"status":"ok"}"#),
        (_, "/video_feed" | "/api/detection_stats" | "/api/gps_data" | "/update_location"
        | "/health") => write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#),
        _ => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
    }
}

/// Body of `POST /update_location`. Updates missing either field are ignored.
#[derive(Debug, Deserialize)]
struct LocationUpdate {
    latitude: Option<f64>,
    longitude: Option<f64>,
}

fn update_location(stream: &mut TcpStream, ctx: &ConnectionContext, body: &[u8]) -> Result<()> {
    let update: LocationUpdate = match serde_json::from_slice(body) {
        Ok(update) => update,
        Err(err) => {
            write_json_response(stream, 400, r#"{"error":"invalid_json"}"#)?;
            return Err(anyhow!("invalid location update: {}", err));
        }
    };
    match (update.latitude, update.longitude) {
        (Some(lat), Some(lon)) => ctx.location.update(Location {
            lat: Some(lat),
            lon: Some(lon),
        })?,
        _ => log::debug!("partial location update ignored"),
    }
    write_json_response(stream, 200, r#"{"status":"ok"}"#)
}

/// Serve `multipart/x-mixed-replace` until the client goes away or the server stops.
fn stream_video(mut stream: TcpStream, ctx: &ConnectionContext) -> Result<()> {
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary={BOUNDARY}\r\nCache-Control: no-cache, no-store, must-revalidate\r\nPragma: no-cache\r\nExpires: 0\r\nConnection: close\r\n\r\n"
    );
    stream.write_all(header.as_bytes())?;
    let mut parts = 0u64;
    while !ctx.shutdown.load(Ordering::SeqCst) {
        let latest = ctx.frame_buffer.read_latest();
        if let Err(err) = write_part(&mut stream, &latest.jpeg) {
            log::debug!("video client left after {} parts: {}", parts, err);
            return Ok(());
        }
        parts += 1;
        std::thread::sleep(ctx.stream_interval);
    }
    Ok(())
}

fn write_part(stream: &mut TcpStream, jpeg: &[u8]) -> std::io::Result<()> {
    let header = format!(
        "--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        jpeg.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(jpeg)?;
    stream.write_all(b"\r\n")?;
    stream.flush()
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    let header_end = loop {
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before end of headers"));
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_HEADER_BYTES {
            return Err(anyhow!("request too large"));
        }
    };

    let text = String::from_utf8_lossy(&data[..header_end]);
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| anyhow!("invalid content-length '{}'", value))?,
        None => 0,
    };
    if content_length > MAX_BODY_BYTES {
        return Err(anyhow!("request body too large"));
    }
    let mut body = data[header_end..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before end of body"));
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(content_length);

    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        body,
    })
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    body: Vec<u8>,
}
