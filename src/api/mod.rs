use anyhow::{anyhow, Result};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::dashboard::Dashboard;
use crate::encode::MULTIPART_CONTENT_TYPE;
use crate::error::CoreError;
use crate::inference::DetectionReport;
use crate::stream::MjpegStream;
use crate::timelapse::{DEFAULT_IMAGE_COUNT, DEFAULT_INTERVAL_SECS};

const MAX_REQUEST_BYTES: usize = 8192;
const ACCEPT_POLL: Duration = Duration::from_millis(50);
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:5000".to_string(),
        }
    }
}

pub struct ApiHandle {
    pub addr: SocketAddr,
    dashboard: Arc<Dashboard>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    /// Shut the dashboard down (ending live streams and the time-lapse job),
    /// then wait for the accept loop and its connections to finish.
    pub fn stop(mut self) -> Result<()> {
        self.dashboard.shutdown();
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    dashboard: Arc<Dashboard>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, dashboard: Arc<Dashboard>) -> Self {
        Self { cfg, dashboard }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;
        log::info!("api: listening on http://{}", addr);

        let dashboard = self.dashboard.clone();
        let shutdown = dashboard.shutdown_token();
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, dashboard, shutdown) {
                log::error!("api: server stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            dashboard: self.dashboard,
            join: Some(join),
        })
    }
}

fn run_api(listener: TcpListener, dashboard: Arc<Dashboard>, shutdown: CancelToken) -> Result<()> {
    let mut connections: Vec<JoinHandle<()>> = Vec::new();
    loop {
        if shutdown.is_cancelled() {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let dashboard = dashboard.clone();
                connections.retain(|c| !c.is_finished());
                connections.push(std::thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &dashboard) {
                        log::warn!("api: request from {} failed: {}", peer, err);
                    }
                }));
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    for connection in connections {
        let _ = connection.join();
    }
    Ok(())
}

enum Reply {
    Json(u16, Value),
    Stream(MjpegStream),
}

fn handle_connection(mut stream: TcpStream, dashboard: &Dashboard) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
    let request = read_request(&mut stream)?;
    log::debug!(
        "api: {} {} ({})",
        request.method,
        request.path,
        request
            .headers
            .get("user-agent")
            .map(String::as_str)
            .unwrap_or("-")
    );

    match route(dashboard, &request) {
        Reply::Json(status, body) => {
            let payload = serde_json::to_vec(&body)?;
            write_response(&mut stream, status, "application/json", &payload)
        }
        Reply::Stream(frames) => stream_frames(&mut stream, frames),
    }
}

fn route(dashboard: &Dashboard, request: &HttpRequest) -> Reply {
    let method = request.method.as_str();
    match (method, request.path.as_str()) {
        ("GET", "/health") => {
            let report = dashboard.health();
            let status = if report.is_healthy() { 200 } else { 503 };
            Reply::Json(status, to_value(&report))
        }
        ("GET", "/video_feed") => match dashboard.live_stream() {
            Ok(frames) => Reply::Stream(frames),
            Err(err) => error_reply(&err),
        },
        ("POST", "/pause_feed") => {
            dashboard.pause_feed();
            success("Live feed paused")
        }
        ("POST", "/resume_feed") => {
            dashboard.resume_feed();
            success("Live feed resumed")
        }
        ("GET", "/camera_status") => Reply::Json(200, to_value(&dashboard.camera_status())),
        ("POST", "/snapshot") => match dashboard.snapshot() {
            Ok(path) => {
                let file = path
                    .file_name()
                    .map(|f| f.to_string_lossy().to_string())
                    .unwrap_or_default();
                Reply::Json(
                    200,
                    json!({"success": true, "message": "Snapshot saved", "file": file}),
                )
            }
            Err(err) => failure(&err),
        },
        ("GET", "/inference_data") => match dashboard.infer() {
            Ok(records) => {
                let reports: Vec<DetectionReport> = records.iter().map(|r| r.to_report()).collect();
                Reply::Json(200, to_value(&reports))
            }
            Err(err) => error_reply(&err),
        },
        ("POST", "/start_time_lapse") => match time_lapse_args(&request.body) {
            Ok((interval, count)) => match dashboard.start_time_lapse(interval, count) {
                Ok(()) => success("Time-lapse started"),
                Err(err) => failure(&err),
            },
            Err(err) => failure(&err),
        },
        ("POST", "/stop_time_lapse") => match dashboard.stop_time_lapse() {
            Ok(()) => success("Time-lapse stopped"),
            Err(err) => failure(&err),
        },
        ("GET", "/time_lapse_status") => {
            Reply::Json(200, to_value(&dashboard.time_lapse_status()))
        }
        ("GET", "/sensor_data") => Reply::Json(200, to_value(&dashboard.sample_sensors())),
        ("GET", "/growth_rate") => store_reply(dashboard.growth_records()),
        ("GET", "/seasonal_status") => store_reply(dashboard.seasonal_status()),
        ("GET", "/harvest_scheduler") => store_reply(dashboard.harvest_schedule()),
        (_, path) if is_known_path(path) => {
            Reply::Json(405, json!({"error": "method_not_allowed"}))
        }
        _ => Reply::Json(404, json!({"error": "not_found"})),
    }
}

fn is_known_path(path: &str) -> bool {
    matches!(
        path,
        "/health"
            | "/video_feed"
            | "/pause_feed"
            | "/resume_feed"
            | "/camera_status"
            | "/snapshot"
            | "/inference_data"
            | "/start_time_lapse"
            | "/stop_time_lapse"
            | "/time_lapse_status"
            | "/sensor_data"
            | "/growth_rate"
            | "/seasonal_status"
            | "/harvest_scheduler"
    )
}

/// `{interval, num_images}` with the usual defaults when absent.
fn time_lapse_args(body: &[u8]) -> Result<(f64, i64), CoreError> {
    let invalid = |msg: &str| CoreError::InvalidArgument(msg.to_string());
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok((DEFAULT_INTERVAL_SECS, DEFAULT_IMAGE_COUNT));
    }
    let value: Value =
        serde_json::from_slice(body).map_err(|_| invalid("request body must be JSON"))?;
    let interval = match value.get("interval") {
        None | Some(Value::Null) => DEFAULT_INTERVAL_SECS,
        Some(v) => number_arg(v).ok_or_else(|| invalid("interval must be a number"))?,
    };
    let count = match value.get("num_images") {
        None | Some(Value::Null) => DEFAULT_IMAGE_COUNT,
        Some(v) => integer_arg(v).ok_or_else(|| invalid("num_images must be an integer"))?,
    };
    Ok((interval, count))
}

/// A JSON number or a numeric string such as `"2.5"`.
fn number_arg(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// An integer, an integral float (`3.0`), or an integer string (`"5"`).
fn integer_arg(value: &Value) -> Option<i64> {
    if let Some(n) = value.as_i64() {
        return Some(n);
    }
    if let Value::String(s) = value {
        if let Ok(n) = s.trim().parse::<i64>() {
            return Some(n);
        }
    }
    let f = number_arg(value)?;
    if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

fn to_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn success(message: &str) -> Reply {
    Reply::Json(200, json!({"success": true, "message": message}))
}

fn failure(err: &CoreError) -> Reply {
    Reply::Json(
        err.http_status(),
        json!({"success": false, "message": err.to_string()}),
    )
}

fn error_reply(err: &CoreError) -> Reply {
    Reply::Json(err.http_status(), json!({"error": err.to_string()}))
}

fn store_reply<T: Serialize>(result: Result<Vec<T>>) -> Reply {
    match result {
        Ok(rows) => Reply::Json(200, to_value(&rows)),
        Err(err) => {
            log::error!("api: database error: {:#}", err);
            Reply::Json(500, json!([]))
        }
    }
}

fn stream_frames(stream: &mut TcpStream, frames: MjpegStream) -> Result<()> {
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        MULTIPART_CONTENT_TYPE
    );
    stream.write_all(header.as_bytes())?;
    let mut sent = 0u64;
    for chunk in frames {
        if let Err(err) = stream.write_all(&chunk) {
            log::debug!("api: video consumer went away after {} frames: {}", sent, err);
            return Ok(());
        }
        sent += 1;
    }
    log::debug!("api: video stream ended after {} frames", sent);
    Ok(())
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    let mut header_end: Option<usize> = None;
    loop {
        if let Some(end) = header_end {
            if data.len() >= end.saturating_add(content_length(&data[..end])?) {
                break;
            }
        }
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if header_end.is_none() {
            header_end = data.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4);
        }
    }
    parse_request(&data)
}

fn content_length(head: &[u8]) -> Result<usize> {
    let text = String::from_utf8_lossy(head);
    for line in text.split("\r\n") {
        if let Some((k, v)) = line.split_once(':') {
            if k.trim().eq_ignore_ascii_case("content-length") {
                let len: usize = v
                    .trim()
                    .parse()
                    .map_err(|_| anyhow!("invalid content-length"))?;
                if len > MAX_REQUEST_BYTES {
                    return Err(anyhow!("content-length {} exceeds limit", len));
                }
                return Ok(len);
            }
        }
    }
    Ok(0)
}

fn parse_request(data: &[u8]) -> Result<HttpRequest> {
    let header_end = data
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .ok_or_else(|| anyhow!("incomplete request"))?;
    let text = String::from_utf8_lossy(&data[..header_end]);
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    let body_len = headers
        .get("content-length")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);
    let body_start = header_end + 4;
    let body_end = body_start.saturating_add(body_len).min(data.len());
    Ok(HttpRequest {
        method: method.to_ascii_uppercase(),
        path,
        headers,
        body: data[body_start..body_end].to_vec(),
    })
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
        503 => "HTTP/1.1 503 Service Unavailable",
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
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_request_line_and_body() {
        let raw = b"POST /start_time_lapse?x=1 HTTP/1.1\r\nHost: x\r\nContent-Length: 14\r\n\r\n{\"interval\":2}";
        let req = parse_request(raw).unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.path, "/start_time_lapse");
        assert_eq!(req.body, b"{\"interval\":2}");
        assert_eq!(req.headers.get("host").map(String::as_str), Some("x"));
    }

    #[test]
    fn incomplete_request_is_rejected() {
        assert!(parse_request(b"GET /health HTTP/1.1\r\n").is_err());
    }

    #[test]
    fn time_lapse_args_default_and_validate() {
        assert_eq!(
            time_lapse_args(b"").unwrap(),
            (DEFAULT_INTERVAL_SECS, DEFAULT_IMAGE_COUNT)
        );
        assert_eq!(
            time_lapse_args(br#"{"interval": 1.5, "num_images": 3}"#).unwrap(),
            (1.5, 3)
        );
        assert_eq!(time_lapse_args(br#"{"num_images": 4}"#).unwrap(), (30.0, 4));
        assert!(time_lapse_args(br#"{"interval": "soon"}"#).is_err());
        assert!(time_lapse_args(b"not json").is_err());
    }

    #[test]
    fn time_lapse_args_coerce_numeric_strings_and_integral_floats() {
        assert_eq!(
            time_lapse_args(br#"{"interval": "2.5", "num_images": "5"}"#).unwrap(),
            (2.5, 5)
        );
        assert_eq!(
            time_lapse_args(br#"{"interval": 1, "num_images": 3.0}"#).unwrap(),
            (1.0, 3)
        );
        assert!(time_lapse_args(br#"{"num_images": 2.5}"#).is_err());
        assert!(time_lapse_args(br#"{"num_images": "many"}"#).is_err());
        assert!(time_lapse_args(br#"{"interval": true}"#).is_err());
    }

    #[test]
    fn oversized_content_length_is_rejected_without_panicking() {
        let raw = b"POST /start_time_lapse HTTP/1.1\r\nContent-Length: 18446744073709551615\r\n\r\n";
        let req = parse_request(raw).unwrap();
        assert!(req.body.is_empty());
        assert!(content_length(raw).is_err());
        assert_eq!(content_length(b"Content-Length: 12\r\n\r\n").unwrap(), 12);
    }
}
