//! Hand-rolled HTTP/1.1 framing for persistent long-poll connections.
//!
//! The config long-poll engine keeps one TCP connection per watched entry
//! alive across many request/response exchanges, so it cannot use a
//! request-scoped HTTP client. This module formats outbound POSTs and reads
//! responses off a buffered stream, handling `Content-Length`, chunked
//! transfer coding and read-to-EOF bodies.
//!
//! Record splitting downstream works on *bytes*, never on codepoints: the
//! registry's separators (0x01/0x02) are control bytes that may sit next to
//! arbitrary URL-decoded payload.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use berth_common::protocol::error::{HostError, Result};

/// A parsed HTTP response: status, headers, raw body bytes.
#[derive(Debug)]
pub struct RawResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RawResponse {
    /// First header value matching `name`, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether the server asked for this connection to be torn down.
    pub fn wants_close(&self) -> bool {
        self.header("connection")
            .map(|v| v.eq_ignore_ascii_case("close"))
            .unwrap_or(false)
    }
}

/// Format a `POST` request with a form body onto a keep-alive connection.
pub fn format_post(host: &str, path: &str, headers: &[(&str, String)], body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(256 + body.len());
    out.extend_from_slice(format!("POST {path} HTTP/1.1\r\n").as_bytes());
    out.extend_from_slice(format!("Host: {host}\r\n").as_bytes());
    for (name, value) in headers {
        out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    out.extend_from_slice(
        b"Content-Type: application/x-www-form-urlencoded;charset=UTF-8\r\n",
    );
    out.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
    out.extend_from_slice(b"Connection: keep-alive\r\n\r\n");
    out.extend_from_slice(body);
    out
}

/// Read one HTTP response off the stream.
///
/// The body is fully materialized: per `Content-Length` when present,
/// dechunked when `Transfer-Encoding: chunked`, and to EOF when the server
/// signalled `Connection: close` without a length.
pub async fn read_response<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<RawResponse> {
    let status_line = read_crlf_line(reader).await?;
    // Tolerate stray blank lines between keep-alive exchanges.
    let status_line = if status_line.is_empty() {
        read_crlf_line(reader).await?
    } else {
        status_line
    };
    let status = parse_status_line(&status_line)?;

    let mut headers = Vec::new();
    loop {
        let line = read_crlf_line(reader).await?;
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    let response = RawResponse {
        status,
        headers,
        body: Vec::new(),
    };

    let body = if response
        .header("transfer-encoding")
        .map(|v| v.to_ascii_lowercase().contains("chunked"))
        .unwrap_or(false)
    {
        read_chunked(reader).await?
    } else if let Some(length) = response.header("content-length") {
        let length: usize = length.parse().map_err(|_| {
            HostError::ConfigStream(format!("unparseable content-length {length:?}"))
        })?;
        let mut buf = vec![0u8; length];
        reader.read_exact(&mut buf).await?;
        buf
    } else if response.wants_close() {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;
        buf
    } else {
        Vec::new()
    };

    Ok(RawResponse { body, ..response })
}

fn parse_status_line(line: &str) -> Result<u16> {
    if !line.starts_with("HTTP/") {
        return Err(HostError::ConfigStream(format!(
            "malformed status line {line:?}"
        )));
    }
    line.split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| HostError::ConfigStream(format!("malformed status line {line:?}")))
}

/// Read a line and strip the CRLF terminator. EOF mid-headers is an error.
async fn read_crlf_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<String> {
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Err(HostError::ConfigStream(
            "connection closed mid-response".into(),
        ));
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(line)
}

/// Decode a chunked body: `<hex-size>\r\n<bytes>\r\n` until a zero chunk.
async fn read_chunked<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    loop {
        let size_line = read_crlf_line(reader).await?;
        let size_hex = size_line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_hex, 16).map_err(|_| {
            HostError::ConfigStream(format!("bad chunk size {size_line:?}"))
        })?;
        if size == 0 {
            // Trailers, then the final empty line.
            loop {
                if read_crlf_line(reader).await?.is_empty() {
                    break;
                }
            }
            return Ok(body);
        }
        let start = body.len();
        body.resize(start + size, 0);
        reader.read_exact(&mut body[start..]).await?;
        // Chunk data is followed by its own CRLF.
        read_crlf_line(reader).await?;
    }
}
