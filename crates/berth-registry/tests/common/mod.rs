//! In-process mock of the Nacos HTTP surface.
//!
//! Serves canned responses over real TCP so both the `reqwest`-based client
//! and the hand-framed long-poll engine can be exercised end to end.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

/// One request the mock saw, decoded just enough for assertions.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: String,
    pub body: String,
}

/// Chooses the response for a recorded request.
pub type Responder = Arc<dyn Fn(&RecordedRequest) -> (u16, String) + Send + Sync>;

pub struct MockRegistry {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockRegistry {
    /// Start a mock registry whose non-login routes are decided by
    /// `responder`. Login always succeeds with a fixed token.
    pub async fn start(responder: Responder) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests: Arc<Mutex<Vec<RecordedRequest>>> = Arc::new(Mutex::new(Vec::new()));

        let log = requests.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let responder = responder.clone();
                let log = log.clone();
                tokio::spawn(async move {
                    let (read_half, mut write_half) = stream.into_split();
                    let mut reader = BufReader::new(read_half);
                    while let Some(request) = read_request(&mut reader).await {
                        log.lock().unwrap().push(request.clone());
                        let (status, body) = if request.path == "/nacos/v1/auth/login" {
                            (
                                200,
                                r#"{"accessToken":"test-token","tokenTtl":18000}"#.to_string(),
                            )
                        } else {
                            responder(&request)
                        };
                        // A real registry parks empty long-poll answers for up
                        // to 30 s; a short park keeps test clients from
                        // spinning without slowing the suite down.
                        if request.path.ends_with("/listener") && body.is_empty() {
                            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                        }
                        let frame = format!(
                            "HTTP/1.1 {status} {}\r\nContent-Length: {}\r\nContent-Type: text/plain\r\n\r\n{body}",
                            reason(status),
                            body.len(),
                        );
                        if write_half.write_all(frame.as_bytes()).await.is_err() {
                            return;
                        }
                        let _ = write_half.flush().await;
                    }
                });
            }
        });

        Self { addr, requests }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count_path(&self, path: &str) -> usize {
        self.requests().iter().filter(|r| r.path == path).count()
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        _ => "Unknown",
    }
}

/// Read one HTTP request off the stream; `None` when the peer is gone.
/// Stray blank lines (the engine's keepalive probes) are skipped.
async fn read_request<R: tokio::io::AsyncBufRead + Unpin>(
    reader: &mut R,
) -> Option<RecordedRequest> {
    let mut request_line = String::new();
    loop {
        request_line.clear();
        let n = reader.read_line(&mut request_line).await.ok()?;
        if n == 0 {
            return None;
        }
        if !request_line.trim().is_empty() {
            break;
        }
    }

    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_string();
    let target = parts.next()?.to_string();
    let (path, query) = match target.split_once('?') {
        Some((p, q)) => (p.to_string(), q.to_string()),
        None => (target, String::new()),
    };

    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).await.ok()?;
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }

    let mut body = vec![0u8; content_length];
    if content_length > 0 {
        reader.read_exact(&mut body).await.ok()?;
    }

    Some(RecordedRequest {
        method,
        path,
        query,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}
