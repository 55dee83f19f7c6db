//! Line-framed TCP transport.
//!
//! The listener binds `0.0.0.0:<port>` (the advertised IP may differ) with
//! `SO_REUSEADDR` and a backlog of 100. Each accepted connection gets its
//! own task that reads newline-terminated request frames, hands them to the
//! dispatcher and writes the newline-terminated response back. Peer close
//! or any I/O error ends the connection; the host itself never does.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use berth_common::protocol::error::{HostError, Result};

use crate::dispatch::Dispatcher;

const ACCEPT_BACKLOG: u32 = 100;

/// Listener for inbound JSON-RPC connections.
pub struct RpcServer {
    listener: TcpListener,
}

impl RpcServer {
    /// Bind `0.0.0.0:port`. Port 0 picks an ephemeral port, which
    /// `local_addr` reports.
    pub fn bind(port: u16) -> Result<Self> {
        let addr: SocketAddr = format!("0.0.0.0:{port}")
            .parse()
            .map_err(|e| HostError::Transport(format!("invalid bind address: {e}")))?;
        let socket = TcpSocket::new_v4()
            .map_err(|e| HostError::Transport(format!("socket creation failed: {e}")))?;
        socket
            .set_reuseaddr(true)
            .map_err(|e| HostError::Transport(format!("SO_REUSEADDR failed: {e}")))?;
        socket
            .bind(addr)
            .map_err(|e| HostError::Transport(format!("failed to bind {addr}: {e}")))?;
        let listener = socket
            .listen(ACCEPT_BACKLOG)
            .map_err(|e| HostError::Transport(format!("listen failed: {e}")))?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| HostError::Transport(format!("local_addr failed: {e}")))
    }

    /// Accept connections forever, one task per peer.
    ///
    /// Connection tasks live in a `JoinSet`, so cancelling the accept loop
    /// also closes every accepted client.
    pub async fn run(self, dispatcher: Arc<Dispatcher>) {
        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        info!(%peer, "connection established");
                        let dispatcher = dispatcher.clone();
                        connections.spawn(async move {
                            if let Err(e) = handle_connection(stream, dispatcher).await {
                                debug!(%peer, error = %e, "connection ended");
                            }
                        });
                    }
                    Err(e) => {
                        // Transient accept failures (EMFILE and friends) must
                        // not kill the listener.
                        warn!(error = %e, "accept failed");
                    }
                },
                Some(_) = connections.join_next() => {}
            }
        }
    }
}

/// Serve one connection until the peer closes or errors.
async fn handle_connection(stream: TcpStream, dispatcher: Arc<Dispatcher>) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            debug!("connection closed by peer");
            return Ok(());
        }
        let frame = line.trim_end_matches(['\r', '\n']);
        if frame.is_empty() {
            continue;
        }
        let response = dispatcher.dispatch_line(frame);
        write_half.write_all(response.to_frame().as_bytes()).await?;
        write_half.flush().await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{ParamSpec, ParamType, ServiceBuilder, ServiceEntry};
    use berth_health::HealthLedger;
    use serde_json::{json, Value};
    use std::collections::BTreeMap;
    use std::time::Duration;

    async fn start_server() -> SocketAddr {
        let service = ServiceBuilder::new("examples.demo.DemoService")
            .method(
                "add",
                vec![
                    ParamSpec::required("name", ParamType::String),
                    ParamSpec::required("age", ParamType::Int),
                ],
                |args| Ok(json!([args[0].clone(), args[1].clone()])),
            )
            .build();
        let mut entries = BTreeMap::new();
        entries.insert(
            "demo".to_string(),
            Arc::new(ServiceEntry::new("demo", "public", BTreeMap::new(), service)),
        );
        let ledger = Arc::new(HealthLedger::new(100.0, 10, Duration::from_secs(5)));
        ledger.register("demo");
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(entries),
            ledger,
            Duration::from_secs(1),
        ));

        let server = RpcServer::bind(0).unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run(dispatcher));
        addr
    }

    async fn roundtrip(addr: SocketAddr, frame: &str) -> Value {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        write_half.write_all(frame.as_bytes()).await.unwrap();
        write_half.write_all(b"\n").await.unwrap();
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test]
    async fn serves_one_frame_per_line() {
        let addr = start_server().await;
        let response = roundtrip(
            addr,
            r#"{"jsonrpc":"2.0","method":"demo.add","params":["tom",18],"id":"r1"}"#,
        )
        .await;
        assert_eq!(response["id"], "r1");
        assert_eq!(response["result"], json!(["tom", 18]));
    }

    #[tokio::test]
    async fn connection_survives_error_responses() {
        let addr = start_server().await;
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        write_half.write_all(b"garbage\n").await.unwrap();
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        let first: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(first["error"]["code"], -32700);

        // The same connection still serves well-formed requests.
        write_half
            .write_all(
                b"{\"jsonrpc\":\"2.0\",\"method\":\"demo.add\",\"params\":[\"x\",1],\"id\":\"r2\"}\n",
            )
            .await
            .unwrap();
        line.clear();
        reader.read_line(&mut line).await.unwrap();
        let second: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(second["id"], "r2");
    }

    #[tokio::test]
    async fn concurrent_connections_are_served() {
        let addr = start_server().await;
        let mut handles = Vec::new();
        for i in 0..8 {
            handles.push(tokio::spawn(async move {
                let frame = format!(
                    r#"{{"jsonrpc":"2.0","method":"demo.add","params":["c",{i}],"id":"c{i}"}}"#
                );
                roundtrip(addr, &frame).await
            }));
        }
        for (i, handle) in handles.into_iter().enumerate() {
            let response = handle.await.unwrap();
            assert_eq!(response["id"], format!("c{i}"));
            assert_eq!(response["result"][1], json!(i));
        }
    }
}
