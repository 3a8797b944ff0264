//! Blocking HTTP client for the engine's Unix socket.
//!
//! Deliberately speaks HTTP/1.0 with `Connection: close`: the engine
//! answers with a bounded, unchunked body and closes the stream, so one
//! `read_to_end` is the whole response. Requests and reads carry socket
//! timeouts; a check can legitimately take minutes, so the budget is
//! generous but never infinite.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Client-side budget for one request (a check runs two five-minute tools
/// in sequence at worst; the engine's own watchdogs bound the rest).
const REQUEST_TIMEOUT: Duration = Duration::from_secs(660);

/// Largest response body the client will read.
const MAX_RESPONSE_SIZE: usize = 16 * 1024 * 1024;

/// Client failures.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The engine socket does not exist or refuses connections.
    #[error("engine is not running")]
    EngineNotRunning,

    /// I/O failure mid-exchange.
    #[error("engine I/O error: {0}")]
    Io(std::io::Error),

    /// The response was not parseable HTTP.
    #[error("malformed engine response: {0}")]
    MalformedResponse(String),
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused => {
                Self::EngineNotRunning
            },
            _ => Self::Io(err),
        }
    }
}

/// A parsed HTTP response.
#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Extracts the `error` field from a JSON error body, falling back to
    /// the raw body.
    #[must_use]
    pub fn error_message(&self) -> String {
        serde_json::from_slice::<serde_json::Value>(&self.body)
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
            .unwrap_or_else(|| String::from_utf8_lossy(&self.body).into_owned())
    }
}

/// HTTP-over-UDS client for one engine socket.
#[derive(Debug, Clone)]
pub struct EngineClient {
    socket_path: PathBuf,
}

impl EngineClient {
    #[must_use]
    pub const fn new(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }

    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Whether the socket accepts connections right now.
    #[must_use]
    pub fn is_socket_live(&self) -> bool {
        UnixStream::connect(&self.socket_path).is_ok()
    }

    /// Issues a GET.
    ///
    /// # Errors
    ///
    /// Any [`ClientError`].
    pub fn get(&self, path: &str) -> Result<HttpResponse, ClientError> {
        self.request("GET", path, None)
    }

    /// Issues a POST with a JSON body.
    ///
    /// # Errors
    ///
    /// Any [`ClientError`]; serialization failures surface as
    /// [`ClientError::MalformedResponse`].
    pub fn post_json<T: Serialize>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<HttpResponse, ClientError> {
        let payload = serde_json::to_vec(body)
            .map_err(|e| ClientError::MalformedResponse(format!("request encode failed: {e}")))?;
        self.request("POST", path, Some(&payload))
    }

    fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<&[u8]>,
    ) -> Result<HttpResponse, ClientError> {
        let mut stream = UnixStream::connect(&self.socket_path)?;
        stream.set_read_timeout(Some(REQUEST_TIMEOUT))?;
        stream.set_write_timeout(Some(REQUEST_TIMEOUT))?;

        let mut request = format!(
            "{method} {path} HTTP/1.0\r\nHost: zax\r\nConnection: close\r\n"
        );
        if let Some(body) = body {
            request.push_str("Content-Type: application/json\r\n");
            request.push_str(&format!("Content-Length: {}\r\n", body.len()));
        }
        request.push_str("\r\n");

        stream.write_all(request.as_bytes())?;
        if let Some(body) = body {
            stream.write_all(body)?;
        }
        stream.flush()?;

        let mut raw = Vec::new();
        stream
            .take(MAX_RESPONSE_SIZE as u64 + 1)
            .read_to_end(&mut raw)?;
        if raw.len() > MAX_RESPONSE_SIZE {
            return Err(ClientError::MalformedResponse(
                "response exceeds size cap".into(),
            ));
        }

        parse_response(&raw)
    }
}

/// Splits a raw HTTP/1.x response into status and body.
fn parse_response(raw: &[u8]) -> Result<HttpResponse, ClientError> {
    let header_end = find_header_end(raw)
        .ok_or_else(|| ClientError::MalformedResponse("no header terminator".into()))?;
    let head = String::from_utf8_lossy(&raw[..header_end]);
    let status_line = head
        .lines()
        .next()
        .ok_or_else(|| ClientError::MalformedResponse("empty response".into()))?;

    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| {
            ClientError::MalformedResponse(format!("bad status line: {status_line}"))
        })?;

    Ok(HttpResponse {
        status,
        body: raw[header_end + 4..].to_vec(),
    })
}

fn find_header_end(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|w| w == b"\r\n\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_response_splits_status_and_body() {
        let raw = b"HTTP/1.0 200 OK\r\nContent-Type: application/json\r\n\r\n{\"status\":\"ok\"}";
        let response = parse_response(raw).unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, br#"{"status":"ok"}"#);
    }

    #[test]
    fn parse_response_handles_error_statuses() {
        let raw = b"HTTP/1.1 409 Conflict\r\n\r\n{\"error\":\"check already in progress\"}";
        let response = parse_response(raw).unwrap();
        assert_eq!(response.status, 409);
        assert_eq!(response.error_message(), "check already in progress");
    }

    #[test]
    fn parse_response_rejects_garbage() {
        assert!(parse_response(b"not http").is_err());
        assert!(parse_response(b"HTTP/1.0 XYZ\r\n\r\n").is_err());
    }

    #[test]
    fn error_message_falls_back_to_raw_body() {
        let response = HttpResponse {
            status: 500,
            body: b"plain text failure".to_vec(),
        };
        assert_eq!(response.error_message(), "plain text failure");
    }

    #[test]
    fn missing_socket_maps_to_engine_not_running() {
        let client = EngineClient::new(PathBuf::from("/nonexistent/zax.sock"));
        assert!(!client.is_socket_live());
        assert!(matches!(
            client.get("/health"),
            Err(ClientError::EngineNotRunning)
        ));
    }
}
