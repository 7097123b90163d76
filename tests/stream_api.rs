use anyhow::{anyhow, Result};
use serde_json::Value;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use skydra_cam::api::{ApiConfig, ApiHandle, ApiServer};
use skydra_cam::frame::{FrameBuffer, Stats};

fn start_server(frame_buffer: Arc<FrameBuffer>) -> Result<ApiHandle> {
    let cfg = ApiConfig {
        addr: "127.0.0.1:0".to_string(),
        stream_interval: Duration::from_millis(10),
    };
    ApiServer::new(cfg, frame_buffer).spawn()
}

fn read_response(stream: &mut TcpStream) -> Result<(String, String)> {
    let mut response = String::new();
    stream.read_to_string(&mut response)?;
    let mut parts = response.splitn(2, "\r\n\r\n");
    let header = parts.next().unwrap_or_default().to_string();
    let body = parts.next().unwrap_or_default().to_string();
    Ok((header, body))
}

fn send(handle: &ApiHandle, method: &str, path: &str, body: &str) -> Result<(String, String)> {
    let mut stream = TcpStream::connect(handle.addr)?;
    write!(
        stream,
        "{method} {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    )?;
    read_response(&mut stream)
}

fn get_json(handle: &ApiHandle, path: &str) -> Result<Value> {
    let (header, body) = send(handle, "GET", path, "")?;
    if !header.starts_with("HTTP/1.1 200") {
        return Err(anyhow!("unexpected response: {}", header));
    }
    Ok(serde_json::from_str(&body)?)
}

/// Read the multipart response header and the first part's body.
fn read_first_part(stream: &mut TcpStream) -> Result<(String, String, Vec<u8>)> {
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("stream closed early"));
        }
        data.extend_from_slice(&buf[..n]);

        let Some(header_end) = find(&data, b"\r\n\r\n") else {
            continue;
        };
        let part_start = header_end + 4;
        let Some(part_header_len) = find(&data[part_start..], b"\r\n\r\n") else {
            continue;
        };
        let part_header =
            String::from_utf8_lossy(&data[part_start..part_start + part_header_len]).to_string();
        let length: usize = part_header
            .lines()
            .find_map(|line| line.strip_prefix("Content-Length: "))
            .ok_or_else(|| anyhow!("part without content length"))?
            .trim()
            .parse()?;
        let body_start = part_start + part_header_len + 4;
        if data.len() < body_start + length {
            continue;
        }
        let header = String::from_utf8_lossy(&data[..header_end]).to_string();
        return Ok((header, part_header, data[body_start..body_start + length].to_vec()));
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[test]
fn stats_report_connecting_until_first_publish() -> Result<()> {
    let frame_buffer = Arc::new(FrameBuffer::new()?);
    let handle = start_server(frame_buffer.clone())?;

    let stats = get_json(&handle, "/api/detection_stats")?;
    assert_eq!(stats["status"], "connecting");
    assert_eq!(stats["detections"], 0);

    frame_buffer.publish(
        vec![0xFF, 0xD8, 0xFF, 0xD9],
        Stats {
            visible_detections: 2,
            stable_detections: 1,
            fps: 14.26,
            last_inference_latency_ms: 38.0,
            ..Stats::default()
        },
    );
    let stats = get_json(&handle, "/api/detection_stats")?;
    assert_eq!(stats["status"], "active");
    assert_eq!(stats["detections"], 2);
    assert_eq!(stats["stable_detections"], 1);
    assert!((stats["fps"].as_f64().unwrap() - 14.3).abs() < 1e-3);
    assert!((stats["latency"].as_f64().unwrap() - 38.0).abs() < 1e-3);

    handle.stop()?;
    Ok(())
}

#[test]
fn video_feed_serves_placeholder_before_first_publish() -> Result<()> {
    let frame_buffer = Arc::new(FrameBuffer::new()?);
    let handle = start_server(frame_buffer.clone())?;

    let mut stream = TcpStream::connect(handle.addr)?;
    write!(stream, "GET /video_feed HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
    let (header, part_header, jpeg) = read_first_part(&mut stream)?;

    assert!(header.starts_with("HTTP/1.1 200 OK"));
    assert!(header.contains("Content-Type: multipart/x-mixed-replace; boundary=frame"));
    assert!(header.contains("Cache-Control: no-cache, no-store, must-revalidate"));
    assert!(header.contains("Pragma: no-cache"));
    assert!(header.contains("Expires: 0"));
    assert!(part_header.starts_with("--frame"));
    assert!(part_header.contains("Content-Type: image/jpeg"));
    assert_eq!(jpeg, *frame_buffer.placeholder_jpeg());

    drop(stream);
    handle.stop()?;
    Ok(())
}

#[test]
fn video_feed_switches_to_published_frames() -> Result<()> {
    let frame_buffer = Arc::new(FrameBuffer::new()?);
    frame_buffer.publish(vec![0xFF, 0xD8, 0x42, 0xFF, 0xD9], Stats::default());
    let handle = start_server(frame_buffer)?;

    let mut stream = TcpStream::connect(handle.addr)?;
    write!(stream, "GET /video_feed HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
    let (_, part_header, jpeg) = read_first_part(&mut stream)?;
    assert!(part_header.contains("Content-Length: 5"));
    assert_eq!(jpeg, vec![0xFF, 0xD8, 0x42, 0xFF, 0xD9]);

    drop(stream);
    handle.stop()?;
    Ok(())
}

#[test]
fn location_updates_round_trip() -> Result<()> {
    let handle = start_server(Arc::new(FrameBuffer::new()?))?;

    let location = get_json(&handle, "/api/gps_data")?;
    assert!(location["lat"].is_null());
    assert!(location["lon"].is_null());

    let (header, body) = send(
        &handle,
        "POST",
        "/update_location",
        r#"{"latitude": 37.7749, "longitude": -122.4194}"#,
    )?;
    assert!(header.starts_with("HTTP/1.1 200"));
    assert_eq!(serde_json::from_str::<Value>(&body)?["status"], "ok");

    let location = get_json(&handle, "/api/gps_data")?;
    assert!((location["lat"].as_f64().unwrap() - 37.7749).abs() < 1e-9);
    assert!((location["lon"].as_f64().unwrap() + 122.4194).abs() < 1e-9);

    handle.stop()?;
    Ok(())
}

#[test]
fn partial_location_update_keeps_previous_fix() -> Result<()> {
    let handle = start_server(Arc::new(FrameBuffer::new()?))?;

    send(
        &handle,
        "POST",
        "/update_location",
        r#"{"latitude": 1.5, "longitude": 2.5}"#,
    )?;
    let (header, body) = send(&handle, "POST", "/update_location", r#"{"latitude": 9.0}"#)?;
    assert!(header.starts_with("HTTP/1.1 200"));
    assert_eq!(serde_json::from_str::<Value>(&body)?["status"], "ok");

    let location = get_json(&handle, "/api/gps_data")?;
    assert_eq!(location["lat"].as_f64(), Some(1.5));
    assert_eq!(location["lon"].as_f64(), Some(2.5));

    handle.stop()?;
    Ok(())
}

#[test]
fn malformed_location_is_rejected() -> Result<()> {
    let handle = start_server(Arc::new(FrameBuffer::new()?))?;

    let (header, _) = send(&handle, "POST", "/update_location", "{latitude:")?;
    assert!(header.starts_with("HTTP/1.1 400"));

    let location = get_json(&handle, "/api/gps_data")?;
    assert!(location["lat"].is_null());

    handle.stop()?;
    Ok(())
}

#[test]
fn unknown_paths_and_methods() -> Result<()> {
    let handle = start_server(Arc::new(FrameBuffer::new()?))?;

    let (header, _) = send(&handle, "GET", "/nope", "")?;
    assert!(header.starts_with("HTTP/1.1 404"));

    let (header, _) = send(&handle, "GET", "/update_location", "")?;
    assert!(header.starts_with("HTTP/1.1 405"));

    let (header, _) = send(&handle, "DELETE", "/api/detection_stats", "")?;
    assert!(header.starts_with("HTTP/1.1 405"));

    let health = get_json(&handle, "/health")?;
    assert_eq!(health["status"], "ok");

    handle.stop()?;
    Ok(())
}
