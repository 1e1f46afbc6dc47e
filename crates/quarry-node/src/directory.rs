//! Directory client: registration, peer discovery and heartbeat.
//!
//! The directory server hands out identifiers and peer lists and expires
//! nodes that stop heartbeating. It is reached over a single TCP connection
//! carrying newline-delimited JSON requests and responses.

use std::collections::HashMap;
use std::time::Duration;

use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::commit::public_key_to_string;
use crate::error::{Error, Result};
use crate::grid::GridSettings;

/// Request sent to the directory server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum DirectoryRequest {
    /// Join the session
    Register { addr: String, public_key: String },
    /// List the other nodes
    GetNodes { public_key: String },
    /// Liveness ping
    Heartbeat { public_key: String },
}

/// Response from the directory server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DirectoryResponse {
    Registered { config: SessionConfig },
    Nodes { nodes: HashMap<String, String> },
    Ack,
    Error { error: String },
}

/// Session parameters assigned at registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub identifier: String,
    pub heartbeat_interval_ms: u64,
    #[serde(default)]
    pub grid: GridSettings,
}

/// Floor for the heartbeat period a directory may assign.
pub const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(10);

impl SessionConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms).max(MIN_HEARTBEAT_INTERVAL)
    }
}

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Connection {
    async fn dial(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
        })
    }

    async fn call(&mut self, request: &DirectoryRequest) -> Result<DirectoryResponse> {
        let line = serde_json::to_string(request)? + "\n";
        self.writer.write_all(line.as_bytes()).await?;

        let mut reply = String::new();
        if self.reader.read_line(&mut reply).await? == 0 {
            return Err(Error::Directory("connection closed by server".into()));
        }
        Ok(serde_json::from_str(&reply)?)
    }
}

/// Client side of the directory RPC.
pub struct DirectoryClient {
    server_addr: String,
    advertise_addr: String,
    public_key: String,
    reregister_delay: Duration,
    conn: Mutex<Option<Connection>>,
    session: RwLock<Option<SessionConfig>>,
}

impl DirectoryClient {
    pub fn new(
        server_addr: impl Into<String>,
        advertise_addr: impl Into<String>,
        public_key: &VerifyingKey,
        reregister_delay: Duration,
    ) -> Self {
        Self {
            server_addr: server_addr.into(),
            advertise_addr: advertise_addr.into(),
            public_key: public_key_to_string(public_key),
            reregister_delay,
            conn: Mutex::new(None),
            session: RwLock::new(None),
        }
    }

    /// Dial the server and register this node.
    ///
    /// On success the connection and session are kept for later calls. Any
    /// failure is [`Error::Registration`]; the caller decides whether that
    /// is fatal.
    pub async fn register(&self) -> Result<SessionConfig> {
        let mut conn = Connection::dial(&self.server_addr)
            .await
            .map_err(|e| Error::Registration(format!("dial {}: {e}", self.server_addr)))?;

        let request = DirectoryRequest::Register {
            addr: self.advertise_addr.clone(),
            public_key: self.public_key.clone(),
        };
        let config = match conn.call(&request).await {
            Ok(DirectoryResponse::Registered { config }) => config,
            Ok(DirectoryResponse::Error { error }) => return Err(Error::Registration(error)),
            Ok(other) => {
                return Err(Error::Registration(format!("unexpected response {other:?}")))
            }
            Err(e) => return Err(Error::Registration(e.to_string())),
        };

        info!(
            identifier = %config.identifier,
            heartbeat_ms = config.heartbeat_interval_ms,
            server = %self.server_addr,
            "registered with directory"
        );
        *self.conn.lock().await = Some(conn);
        *self.session.write().await = Some(config.clone());
        Ok(config)
    }

    /// Current peer list: identifier to address. Includes this node.
    pub async fn get_nodes(&self) -> Result<HashMap<String, String>> {
        let request = DirectoryRequest::GetNodes {
            public_key: self.public_key.clone(),
        };
        match self.call(&request).await? {
            DirectoryResponse::Nodes { nodes } => Ok(nodes),
            DirectoryResponse::Error { error } => Err(Error::Directory(error)),
            other => Err(Error::Directory(format!("unexpected response {other:?}"))),
        }
    }

    /// One liveness call.
    pub async fn heartbeat(&self) -> Result<()> {
        let request = DirectoryRequest::Heartbeat {
            public_key: self.public_key.clone(),
        };
        match self.call(&request).await? {
            DirectoryResponse::Ack => Ok(()),
            DirectoryResponse::Error { error } => Err(Error::Directory(error)),
            other => Err(Error::Directory(format!("unexpected response {other:?}"))),
        }
    }

    /// Register again, retrying with a fixed delay until it succeeds.
    pub async fn reregister(&self) -> SessionConfig {
        let mut attempt = 0u64;
        loop {
            attempt += 1;
            match self.register().await {
                Ok(config) => return config,
                Err(e) => {
                    warn!(attempt, "re-registration failed: {e}");
                    tokio::time::sleep(self.reregister_delay).await;
                }
            }
        }
    }

    pub async fn session(&self) -> Option<SessionConfig> {
        self.session.read().await.clone()
    }

    /// Heartbeat on the session's interval until `shutdown` flips to true
    /// or its sender goes away. A failed heartbeat blocks on
    /// [`reregister`](Self::reregister); shutdown interrupts any wait.
    pub async fn run_heartbeat(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            let interval = match self.session().await {
                Some(session) => session.heartbeat_interval(),
                None => self.reregister_delay,
            };

            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            let result = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                result = self.heartbeat() => result,
            };

            match result {
                Ok(()) => debug!("heartbeat acknowledged"),
                Err(e) => {
                    warn!("heartbeat failed, re-registering: {e}");
                    tokio::select! {
                        biased;
                        _ = shutdown.changed() => break,
                        _ = self.reregister() => {}
                    }
                }
            }
        }
        info!("heartbeat stopped");
    }

    async fn call(&self, request: &DirectoryRequest) -> Result<DirectoryResponse> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(Error::NotRegistered)?;
        let result = conn.call(request).await;
        if result.is_err() {
            // Broken stream; the next register() dials a fresh one.
            *guard = None;
        }
        result
    }
}

impl std::fmt::Debug for DirectoryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryClient")
            .field("server_addr", &self.server_addr)
            .field("advertise_addr", &self.advertise_addr)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{eventually, FakeDirectory};
    use ed25519_dalek::SigningKey;
    use std::sync::Arc;

    fn client(addr: impl Into<String>) -> DirectoryClient {
        let key = SigningKey::from_bytes(&[7u8; 32]);
        DirectoryClient::new(
            addr,
            "127.0.0.1:9999",
            &key.verifying_key(),
            Duration::from_millis(10),
        )
    }

    #[tokio::test]
    async fn test_register_stores_session() {
        let dir = FakeDirectory::start().await;
        let client = client(dir.addr.to_string());

        assert!(client.session().await.is_none());
        let config = client.register().await.unwrap();
        assert_eq!(config.identifier, "1");
        assert_eq!(config.heartbeat_interval(), Duration::from_millis(10));
        assert_eq!(client.session().await, Some(config));
        assert_eq!(dir.registrations(), 1);
    }

    #[test]
    fn test_zero_heartbeat_interval_is_clamped() {
        let session = SessionConfig {
            identifier: "1".into(),
            heartbeat_interval_ms: 0,
            grid: GridSettings::default(),
        };
        assert_eq!(session.heartbeat_interval(), MIN_HEARTBEAT_INTERVAL);

        let slow = SessionConfig {
            heartbeat_interval_ms: 250,
            ..session
        };
        assert_eq!(slow.heartbeat_interval(), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_register_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = client(addr.to_string());
        assert!(matches!(client.register().await, Err(Error::Registration(_))));
        assert!(client.session().await.is_none());
    }

    #[tokio::test]
    async fn test_calls_require_registration() {
        let dir = FakeDirectory::start().await;
        let client = client(dir.addr.to_string());

        assert!(matches!(client.get_nodes().await, Err(Error::NotRegistered)));
        assert!(matches!(client.heartbeat().await, Err(Error::NotRegistered)));
    }

    #[tokio::test]
    async fn test_get_nodes() {
        let dir = FakeDirectory::start().await;
        dir.state
            .lock()
            .unwrap()
            .nodes
            .insert("prey".into(), "127.0.0.1:4000".into());
        let client = client(dir.addr.to_string());
        client.register().await.unwrap();

        let nodes = client.get_nodes().await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes["prey"], "127.0.0.1:4000");
    }

    #[tokio::test]
    async fn test_heartbeat_error_reported() {
        let dir = FakeDirectory::start().await;
        dir.state.lock().unwrap().fail_heartbeats = 1;
        let client = client(dir.addr.to_string());
        client.register().await.unwrap();

        assert!(matches!(client.heartbeat().await, Err(Error::Directory(_))));
        client.heartbeat().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_heartbeat_reregisters() {
        let dir = FakeDirectory::start().await;
        dir.state.lock().unwrap().fail_heartbeats = 1;
        let client = Arc::new(client(dir.addr.to_string()));
        client.register().await.unwrap();

        let (stop, shutdown) = watch::channel(false);
        let task = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.run_heartbeat(shutdown).await })
        };

        let c = &client;
        assert!(
            eventually(|| async move {
                c.session().await.map(|s| s.identifier) == Some("2".to_string())
            })
            .await
        );
        assert_eq!(dir.registrations(), 2);
        let state = &dir.state;
        assert!(eventually(|| async move { state.lock().unwrap().heartbeats >= 3 }).await);

        stop.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_reregistration() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead = listener.local_addr().unwrap();
        drop(listener);
        // Never registered: the first heartbeat fails and reregistration
        // keeps dialing a closed port.
        let client = Arc::new(client(dead.to_string()));

        let (stop, shutdown) = watch::channel(false);
        let task = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.run_heartbeat(shutdown).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished());

        stop.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert!(client.session().await.is_none());
    }
}
