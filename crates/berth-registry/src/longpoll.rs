//! Config-center change notifications via long polling.
//!
//! One [`ConfigWatcher`] task runs per watched entry. It keeps a persistent
//! TCP connection to the registry and repeats the exchange:
//!
//! 1. POST `/nacos/v1/cs/configs/listener` with the watch digest
//!    `dataId 0x02 group 0x02 md5(content) 0x01` and the
//!    `Long-Pulling-Timeout: 30000` header;
//! 2. the registry parks the request for up to 30 s and answers with an
//!    empty body (no change) or a URL-encoded list of changed records;
//! 3. a matching record triggers a `get_config` fetch; if the content
//!    actually differs the stored copy is updated and the sink invoked
//!    exactly once.
//!
//! The connection is re-armed in place after each exchange. Any I/O error or
//! malformed response tears the stream down; the watcher then reconnects,
//! pacing attempts at least five seconds apart (three after a failure). A
//! bare `"\r\n"` keepalive probe goes out when the stream has been silent
//! suspiciously long.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{
    tcp::{OwnedReadHalf, OwnedWriteHalf},
    TcpStream,
};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use berth_common::protocol::error::{HostError, Result};

use crate::client::NacosClient;
use crate::wire;

/// Separator between fields of one change record (`⟨WS⟩`).
pub const FIELD_SEP: u8 = 0x02;
/// Separator between change records (`⟨LS⟩`).
pub const RECORD_SEP: u8 = 0x01;
/// Server-side park time requested by the listener call.
pub const LONG_PULLING_TIMEOUT_MS: u64 = 30_000;

/// Floor between two connection attempts for one entry.
const ATTEMPT_SPACING: Duration = Duration::from_secs(5);
/// Extra delay after an attempt that failed.
const FAILURE_DELAY: Duration = Duration::from_secs(3);
/// Delay before retrying after a 401/403.
const AUTH_RETRY_DELAY: Duration = Duration::from_secs(2);
/// Delay before retrying after a 400.
const BAD_REQUEST_DELAY: Duration = Duration::from_secs(3);
/// Silence on the stream after which a keepalive probe is sent.
const KEEPALIVE_IDLE: Duration = Duration::from_secs(55);

/// Receives the new content whenever a watched entry changes.
///
/// Invoked synchronously from the watcher task; a slow sink delays only its
/// own entry's next poll.
pub type ConfigSink = Box<dyn Fn(&str) + Send + Sync>;

/// What to watch, and the last content we know about.
#[derive(Debug, Clone)]
pub struct WatchSpec {
    /// Config entry name, for logging only
    pub name: String,
    pub data_id: String,
    pub group: String,
    pub tenant: String,
    /// Seed for the first listener digest (typically the local file's
    /// content, empty when there is none)
    pub initial_content: String,
}

/// One changed entry reported by the listener endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    pub data_id: String,
    pub group: String,
}

/// Build the `Listening-Configs` digest for one watched entry.
pub fn listening_digest(data_id: &str, group: &str, content: &str) -> String {
    format!(
        "{data_id}{fs}{group}{fs}{md5:x}{rs}",
        fs = FIELD_SEP as char,
        rs = RECORD_SEP as char,
        md5 = md5::compute(content.as_bytes()),
    )
}

/// Split a URL-decoded listener response body into change records.
///
/// Splitting is byte-level: the separators are control bytes that may abut
/// arbitrary payload. An absent or empty group normalizes to `"default"`.
pub fn parse_change_records(decoded: &[u8]) -> Vec<ChangeRecord> {
    decoded
        .split(|b| *b == RECORD_SEP)
        .filter(|record| !record.is_empty())
        .filter_map(|record| {
            let mut fields = record.split(|b| *b == FIELD_SEP);
            let data_id = String::from_utf8_lossy(fields.next()?).into_owned();
            if data_id.is_empty() {
                return None;
            }
            let group = fields
                .next()
                .map(|g| String::from_utf8_lossy(g).into_owned())
                .filter(|g| !g.is_empty())
                .unwrap_or_else(|| "default".to_string());
            Some(ChangeRecord { data_id, group })
        })
        .collect()
}

/// Long-poll watcher for one config entry.
pub struct ConfigWatcher {
    client: Arc<NacosClient>,
    spec: WatchSpec,
    content: String,
    sink: ConfigSink,
}

enum Exchange {
    /// Connection still good, poll again on it.
    Continue,
    /// Server asked to close; reconnect through the retry pacing.
    Reconnect,
}

impl ConfigWatcher {
    pub fn new(client: Arc<NacosClient>, spec: WatchSpec, sink: ConfigSink) -> Self {
        let content = spec.initial_content.clone();
        Self {
            client,
            spec,
            content,
            sink,
        }
    }

    /// Run the watcher until the task is aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        let mut last_attempt: Option<Instant> = None;
        loop {
            if let Some(at) = last_attempt {
                let since = at.elapsed();
                if since < ATTEMPT_SPACING {
                    sleep(ATTEMPT_SPACING - since).await;
                }
            }
            last_attempt = Some(Instant::now());

            match self.session().await {
                Ok(()) => {
                    debug!(entry = %self.spec.name, "config stream closed by peer");
                }
                Err(e) => {
                    warn!(entry = %self.spec.name, error = %e, "config stream failed");
                    sleep(FAILURE_DELAY).await;
                }
            }
        }
    }

    /// One connection's lifetime: connect, then exchange until torn down.
    async fn session(&mut self) -> Result<()> {
        let (host, port) = self.client.authority()?;
        let stream = TcpStream::connect((host.as_str(), port)).await?;
        debug!(entry = %self.spec.name, %host, port, "config stream connected");
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        loop {
            match self.exchange(&mut reader, &mut write_half, &host, port).await? {
                Exchange::Continue => continue,
                Exchange::Reconnect => return Ok(()),
            }
        }
    }

    /// Send one listener request and handle its response.
    async fn exchange(
        &mut self,
        reader: &mut BufReader<OwnedReadHalf>,
        writer: &mut OwnedWriteHalf,
        host: &str,
        port: u16,
    ) -> Result<Exchange> {
        let token = self.client.access_token().await?;
        let digest = listening_digest(&self.spec.data_id, &self.spec.group, &self.content);
        let body = format!(
            "Listening-Configs={}&tenant={}&accessToken={}",
            urlencoding::encode(&digest),
            urlencoding::encode(&self.spec.tenant),
            urlencoding::encode(&token),
        );
        let request = wire::format_post(
            &format!("{host}:{port}"),
            "/nacos/v1/cs/configs/listener",
            &[("Long-Pulling-Timeout", LONG_PULLING_TIMEOUT_MS.to_string())],
            body.as_bytes(),
        );
        writer.write_all(&request).await?;
        writer.flush().await?;

        let response = self.await_response(reader, writer).await?;
        let outcome = match response.status {
            401 | 403 => {
                warn!(entry = %self.spec.name, status = response.status, "listener token rejected");
                self.client.invalidate_token().await;
                sleep(AUTH_RETRY_DELAY).await;
                Exchange::Continue
            }
            400 => {
                warn!(entry = %self.spec.name, "listener rejected the watch payload");
                sleep(BAD_REQUEST_DELAY).await;
                Exchange::Continue
            }
            200 => {
                if !response.body.is_empty() {
                    self.process_notification(&response.body).await;
                }
                Exchange::Continue
            }
            status => {
                return Err(HostError::ConfigStream(format!(
                    "listener returned unexpected status {status}"
                )));
            }
        };

        if response.wants_close() {
            return Ok(Exchange::Reconnect);
        }
        Ok(outcome)
    }

    /// Wait for the long-poll response, probing a suspiciously silent
    /// connection once with a bare CRLF before giving up.
    async fn await_response(
        &self,
        reader: &mut BufReader<OwnedReadHalf>,
        writer: &mut OwnedWriteHalf,
    ) -> Result<wire::RawResponse> {
        match timeout(KEEPALIVE_IDLE, wire::read_response(reader)).await {
            Ok(response) => response,
            Err(_) => {
                debug!(entry = %self.spec.name, "stream idle, sending keepalive probe");
                writer.write_all(b"\r\n").await?;
                writer.flush().await?;
                match timeout(KEEPALIVE_IDLE, wire::read_response(reader)).await {
                    Ok(response) => response,
                    Err(_) => Err(HostError::ConfigStream(
                        "long-poll response timed out".into(),
                    )),
                }
            }
        }
    }

    /// A non-empty 200 body: decode, match, fetch, maybe invoke the sink.
    async fn process_notification(&mut self, body: &[u8]) {
        let decoded = urlencoding::decode_binary(body);
        let records = parse_change_records(&decoded);
        if records.is_empty() {
            warn!(entry = %self.spec.name, "listener body carried no readable records");
            return;
        }
        let matches = records
            .iter()
            .any(|r| r.data_id == self.spec.data_id && r.group == self.spec.group);
        if !matches {
            debug!(entry = %self.spec.name, ?records, "notification for a different entry");
            return;
        }

        let content = match self
            .client
            .get_config(&self.spec.data_id, &self.spec.group, &self.spec.tenant)
            .await
        {
            Ok(content) => content,
            Err(e) => {
                warn!(entry = %self.spec.name, error = %e, "failed to fetch changed config");
                return;
            }
        };
        if content == self.content {
            debug!(entry = %self.spec.name, "notified but content is unchanged");
            return;
        }
        info!(entry = %self.spec.name, data_id = %self.spec.data_id, "config changed");
        self.content = content;
        (self.sink)(&self.content);
    }
}
