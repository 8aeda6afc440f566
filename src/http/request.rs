//! HTTP/1.1 request parsing.
//!
//! Only what the dashboard needs: a request line, headers, and an optional
//! `Content-Length` body. One request per connection.

use tokio::io::{AsyncRead, AsyncReadExt};

use super::HttpError;

pub const MAX_HEAD_BYTES: usize = 16 * 1024;
pub const MAX_BODY_BYTES: usize = 64 * 1024;

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    /// Path without the query string, still percent-encoded.
    pub path: String,
    pub query: Option<String>,
    /// Header names are lowercased.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Read one request from `reader`.
pub async fn read_request<R>(reader: &mut R) -> Result<Request, HttpError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 4096];

    let head_end = loop {
        if let Some(pos) = find(&buf, HEAD_TERMINATOR) {
            break pos;
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err(HttpError::TooLarge {
                limit: MAX_HEAD_BYTES,
            });
        }
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            if buf.is_empty() {
                return Err(HttpError::Io(std::io::ErrorKind::UnexpectedEof.into()));
            }
            return Err(HttpError::Malformed(
                "connection closed before end of headers".to_string(),
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
    };
    if head_end > MAX_HEAD_BYTES {
        return Err(HttpError::TooLarge {
            limit: MAX_HEAD_BYTES,
        });
    }

    let (method, target, headers) = parse_head(&buf[..head_end])?;
    let mut request = Request {
        method,
        path: String::new(),
        query: None,
        headers,
        body: Vec::new(),
    };
    match target.split_once('?') {
        Some((path, query)) => {
            request.path = path.to_string();
            request.query = Some(query.to_string());
        }
        None => request.path = target,
    }

    if request
        .header("transfer-encoding")
        .is_some_and(|v| !v.eq_ignore_ascii_case("identity"))
    {
        return Err(HttpError::Malformed(
            "transfer-encoding is not supported".to_string(),
        ));
    }

    let content_length = match request.header("content-length") {
        Some(value) => value
            .trim()
            .parse::<usize>()
            .map_err(|_| HttpError::Malformed(format!("invalid content-length: {value}")))?,
        None => 0,
    };
    if content_length > MAX_BODY_BYTES {
        return Err(HttpError::TooLarge {
            limit: MAX_BODY_BYTES,
        });
    }

    let mut body = buf.split_off(head_end + HEAD_TERMINATOR.len());
    if body.len() < content_length {
        let already = body.len();
        body.resize(content_length, 0);
        reader
            .read_exact(&mut body[already..])
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::UnexpectedEof => {
                    HttpError::Malformed("body shorter than content-length".to_string())
                }
                _ => HttpError::Io(e),
            })?;
    }
    body.truncate(content_length);
    request.body = body;

    Ok(request)
}

type Head = (String, String, Vec<(String, String)>);

fn parse_head(head: &[u8]) -> Result<Head, HttpError> {
    let head = std::str::from_utf8(head)
        .map_err(|_| HttpError::Malformed("request head is not UTF-8".to_string()))?;
    let mut lines = head.split("\r\n");

    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(HttpError::Malformed(format!(
            "bad request line: {request_line}"
        )));
    };
    if !version.starts_with("HTTP/1.") {
        return Err(HttpError::Malformed(format!(
            "unsupported version: {version}"
        )));
    }
    if !target.starts_with('/') {
        return Err(HttpError::Malformed(format!("bad request target: {target}")));
    }

    let mut headers = Vec::new();
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            return Err(HttpError::Malformed(format!("bad header line: {line}")));
        };
        headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
    }

    Ok((method.to_string(), target.to_string(), headers))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
