//! In-process mock node for transport tests.
//!
//! Binds a WebSocket server to `127.0.0.1:0` and answers a handful of
//! JSON-RPC methods the way a development node does.

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::debug;

// ============================================================================
// MockBehaviour
// ============================================================================

/// How the mock node treats clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MockBehaviour {
    /// Speaks JSON-RPC like a development node.
    Healthy,
    /// Upgrades to WebSocket but answers the readiness probe with the wrong shape.
    NotRpc,
    /// Accepts TCP and never completes the WebSocket upgrade.
    Silent,
}

// ============================================================================
// MockNode
// ============================================================================

/// A running mock node. Stops accepting when dropped.
pub(crate) struct MockNode {
    port: u16,
    drop_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl MockNode {
    /// Binds to a random localhost port and starts accepting.
    pub(crate) async fn start(behaviour: MockBehaviour) -> Self {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let listener = TcpListener::bind(addr).await.expect("bind mock node");
        let port = listener.local_addr().expect("local addr").port();
        let (drop_tx, _) = broadcast::channel(4);

        let accept_tx = drop_tx.clone();
        let task = tokio::spawn(async move {
            let mut silent = Vec::new();
            while let Ok((stream, addr)) = listener.accept().await {
                debug!(?addr, ?behaviour, "Mock node accepted");
                if behaviour == MockBehaviour::Silent {
                    silent.push(stream);
                    continue;
                }
                let drop_rx = accept_tx.subscribe();
                tokio::spawn(serve(stream, behaviour, drop_rx));
            }
        });

        Self {
            port,
            drop_tx,
            task,
        }
    }

    /// Returns the WebSocket URL for this node.
    pub(crate) fn ws_url(&self) -> String {
        format!("ws://127.0.0.1:{}", self.port)
    }

    /// Closes every open client socket with a close frame.
    pub(crate) fn drop_connections(&self) {
        let _ = self.drop_tx.send(());
    }
}

impl Drop for MockNode {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Returns a localhost URL nothing is listening on.
pub(crate) async fn refused_url() -> String {
    let listener = TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
        .await
        .expect("bind probe port");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);
    format!("ws://127.0.0.1:{port}")
}

// ============================================================================
// Connection Handling
// ============================================================================

async fn serve(stream: TcpStream, behaviour: MockBehaviour, mut drop_rx: broadcast::Receiver<()>) {
    let Ok(ws_stream) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            _ = drop_rx.recv() => {
                let frame = CloseFrame {
                    code: CloseCode::Away,
                    reason: "node restart".into(),
                };
                let _ = write.send(Message::Close(Some(frame))).await;
                break;
            }

            message = read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        for reply in respond(&text, behaviour) {
                            if write.send(Message::Text(reply.to_string().into())).await.is_err() {
                                return;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }
}

fn respond(text: &str, behaviour: MockBehaviour) -> Vec<Value> {
    let Ok(request) = serde_json::from_str::<Value>(text) else {
        return Vec::new();
    };
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let method = request.get("method").and_then(Value::as_str).unwrap_or_default();

    match (method, behaviour) {
        ("rpc_methods", MockBehaviour::NotRpc) => {
            vec![json!({ "jsonrpc": "2.0", "id": id, "result": "not a node" })]
        }
        ("rpc_methods", _) => vec![json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "version": 1,
                "methods": ["rpc_methods", "system_chain", "chain_subscribeNewHeads"]
            }
        })],
        ("system_chain", _) => vec![json!({ "jsonrpc": "2.0", "id": id, "result": "Development" })],
        ("chain_subscribeNewHeads", _) => vec![
            json!({ "jsonrpc": "2.0", "id": id, "result": "sub-1" }),
            json!({
                "jsonrpc": "2.0",
                "method": "chain_newHead",
                "params": { "subscription": "sub-1", "result": { "number": "0x1" } }
            }),
        ],
        ("chain_unsubscribeNewHeads", _) => {
            vec![json!({ "jsonrpc": "2.0", "id": id, "result": true })]
        }
        _ => vec![json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": -32601, "message": "Method not found" }
        })],
    }
}
