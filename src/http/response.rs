//! HTTP responses with JSON bodies and permissive CORS headers.

use serde::Serialize;
use serde_json::json;
use tokio::io::{AsyncWrite, AsyncWriteExt};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: u16,
    headers: Vec<(&'static str, String)>,
    body: Vec<u8>,
}

impl Response {
    /// Serialize `value` as the body. Falls back to a 500 if that fails.
    pub fn json<T: Serialize + ?Sized>(status: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self {
                status,
                headers: vec![("Content-Type", "application/json".to_string())],
                body,
            },
            Err(e) => {
                log::error!(target: "stockbridge::http", "Failed to serialize response: {}", e);
                Self::error(500, "Internal server error")
            }
        }
    }

    /// `{"error": message}` with the given status.
    pub fn error(status: u16, message: impl AsRef<str>) -> Self {
        let body = json!({ "error": message.as_ref() }).to_string().into_bytes();
        Self {
            status,
            headers: vec![("Content-Type", "application/json".to_string())],
            body,
        }
    }

    /// Answer to a CORS preflight.
    pub fn preflight() -> Self {
        Self {
            status: 204,
            headers: vec![
                ("Access-Control-Allow-Methods", "GET, POST, OPTIONS".to_string()),
                ("Access-Control-Allow-Headers", "Content-Type".to_string()),
                ("Access-Control-Max-Age", "86400".to_string()),
            ],
            body: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Full wire form, including the status line.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut head = format!("HTTP/1.1 {} {}\r\n", self.status, reason(self.status));
        head.push_str("Access-Control-Allow-Origin: *\r\n");
        for (name, value) in &self.headers {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        head.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        head.push_str("Connection: close\r\n\r\n");

        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }

    pub async fn write_to<W>(&self, writer: &mut W) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        writer.write_all(&self.to_bytes()).await?;
        writer.flush().await
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_response_wire_format() {
        let response = Response::json(200, &json!({"ok": true}));
        let wire = String::from_utf8(response.to_bytes()).unwrap();

        assert!(wire.starts_with("HTTP/1.1 200 OK\r\n"), "{wire}");
        assert!(wire.contains("Access-Control-Allow-Origin: *\r\n"));
        assert!(wire.contains("Content-Type: application/json\r\n"));
        assert!(wire.contains("Content-Length: 11\r\n"));
        assert!(wire.contains("Connection: close\r\n"));
        assert!(wire.ends_with("\r\n\r\n{\"ok\":true}"));
    }

    #[test]
    fn error_body_carries_message() {
        let response = Response::error(400, "Missing fields");
        assert_eq!(response.status(), 400);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body, json!({"error": "Missing fields"}));
    }

    #[test]
    fn preflight_has_no_body() {
        let wire = String::from_utf8(Response::preflight().to_bytes()).unwrap();
        assert!(wire.starts_with("HTTP/1.1 204 No Content\r\n"));
        assert!(wire.contains("Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n"));
        assert!(wire.ends_with("Content-Length: 0\r\nConnection: close\r\n\r\n"));
    }
}
