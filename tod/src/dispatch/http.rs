//! Minimal HTTP/1.1 handling for the dispatch server
//!
//! Only what the wire format needs: one request line, headers, a
//! content-length body, and a JSON response with permissive CORS headers on
//! every reply.

use std::io;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

/// Headers shared by every HTTP response
const CORS_HEADERS: &str = "Access-Control-Allow-Origin: *\r\n\
Access-Control-Allow-Methods: POST, OPTIONS\r\n\
Access-Control-Allow-Headers: Authorization, Content-Type\r\n";

/// Caps keeping a hostile peer from ballooning memory
const MAX_HEADERS: usize = 64;
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// A parsed HTTP request
#[derive(Debug)]
pub struct HttpRequest {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpRequest {
    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The token from an `Authorization: Bearer <token>` header
    pub fn bearer_token(&self) -> Option<&str> {
        self.header("authorization")?.strip_prefix("Bearer ").map(str::trim)
    }
}

/// Read headers and body, given the already-consumed request line
pub async fn read_request<R>(reader: &mut R, request_line: &str) -> io::Result<HttpRequest>
where
    R: AsyncBufReadExt + Unpin,
{
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default().to_string();

    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        let read = reader.read_line(&mut line).await?;
        if read == 0 {
            break;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if headers.len() >= MAX_HEADERS {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "too many headers"));
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    let content_length: usize = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse().ok())
        .unwrap_or(0);
    if content_length > MAX_BODY_BYTES {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "body too large"));
    }

    let mut body_bytes = vec![0u8; content_length];
    tokio::io::AsyncReadExt::read_exact(reader, &mut body_bytes).await?;
    let body = String::from_utf8(body_bytes).map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "body not utf-8"))?;

    Ok(HttpRequest {
        method,
        target,
        headers,
        body,
    })
}

/// Write a JSON response with CORS headers
pub async fn write_response<W>(writer: &mut W, status: u16, reason: &str, body: &str) -> io::Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\n{}Content-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        CORS_HEADERS,
        body.len(),
        body
    );
    writer.write_all(response.as_bytes()).await?;
    writer.flush().await
}

/// Answer a CORS preflight
pub async fn write_options_response<W>(writer: &mut W) -> io::Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    let response = format!("HTTP/1.1 204 No Content\r\n{}Content-Length: 0\r\n\r\n", CORS_HEADERS);
    writer.write_all(response.as_bytes()).await?;
    writer.flush().await
}
