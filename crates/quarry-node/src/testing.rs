//! Loopback fixtures shared by the unit tests.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use quarry_proto::{Envelope, NodeMessage};
use quarry_transfer::{TransportConfig, TransportHandle};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use crate::config::RosterConfig;
use crate::directory::{DirectoryRequest, DirectoryResponse, SessionConfig};
use crate::grid::GridSettings;
use crate::roster::{PeerEndpoint, PeerRoster, RosterHandle};

pub async fn loopback() -> TransportHandle {
    TransportHandle::new(TransportConfig {
        bind: "127.0.0.1:0".parse().unwrap(),
        ..Default::default()
    })
    .await
    .unwrap()
}

/// Next datagram on `t`, unwrapped.
pub async fn recv_message(t: &TransportHandle, envelope: &dyn Envelope) -> NodeMessage {
    let mut buf = [0u8; 2048];
    let (len, _) = tokio::time::timeout(Duration::from_secs(2), t.recv_from(&mut buf))
        .await
        .expect("datagram should arrive")
        .unwrap();
    envelope.unwrap(&buf[..len]).unwrap()
}

/// True if nothing arrives on `t` within `wait`.
pub async fn stays_silent(t: &TransportHandle, wait: Duration) -> bool {
    let mut buf = [0u8; 2048];
    tokio::time::timeout(wait, t.recv_from(&mut buf)).await.is_err()
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// A roster holding `ids`, all pointing at one sink socket.
pub async fn roster_with(ids: &[&str]) -> (RosterHandle, TransportHandle) {
    let local = loopback().await;
    let sink = loopback().await;
    let roster = PeerRoster::spawn(&RosterConfig::default());
    for id in ids {
        roster
            .add(PeerEndpoint::new(*id, sink.local_addr().unwrap(), local.clone()))
            .await
            .unwrap();
    }
    assert_eq!(roster.peers().await.unwrap().len(), ids.len());
    (roster, sink)
}

#[derive(Debug, Default)]
pub struct FakeDirectoryState {
    pub registrations: usize,
    pub heartbeats: usize,
    pub fail_heartbeats: usize,
    pub nodes: HashMap<String, String>,
}

/// In-process directory server speaking the JSON-lines RPC.
pub struct FakeDirectory {
    pub addr: SocketAddr,
    pub state: Arc<Mutex<FakeDirectoryState>>,
}

impl FakeDirectory {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(FakeDirectoryState::default()));
        let shared = Arc::clone(&state);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, Arc::clone(&shared)));
            }
        });
        Self { addr, state }
    }

    pub fn registrations(&self) -> usize {
        self.state.lock().unwrap().registrations
    }
}

async fn serve(stream: TcpStream, state: Arc<Mutex<FakeDirectoryState>>) {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    while reader.read_line(&mut line).await.unwrap_or(0) > 0 {
        let request: DirectoryRequest = serde_json::from_str(&line).unwrap();
        let response = {
            let mut state = state.lock().unwrap();
            match request {
                DirectoryRequest::Register { .. } => {
                    state.registrations += 1;
                    DirectoryResponse::Registered {
                        config: SessionConfig {
                            identifier: state.registrations.to_string(),
                            heartbeat_interval_ms: 10,
                            grid: GridSettings::default(),
                        },
                    }
                }
                DirectoryRequest::GetNodes { .. } => DirectoryResponse::Nodes {
                    nodes: state.nodes.clone(),
                },
                DirectoryRequest::Heartbeat { .. } => {
                    state.heartbeats += 1;
                    if state.fail_heartbeats > 0 {
                        state.fail_heartbeats -= 1;
                        DirectoryResponse::Error {
                            error: "unknown key".into(),
                        }
                    } else {
                        DirectoryResponse::Ack
                    }
                }
            }
        };
        let out = serde_json::to_string(&response).unwrap() + "\n";
        if writer.write_all(out.as_bytes()).await.is_err() {
            break;
        }
        line.clear();
    }
}
