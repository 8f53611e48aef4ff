//! RPC client and peer discovery
//!
//! A client handle is bound to one peer address; each call opens a fresh
//! TCP connection, sends one request frame and reads one response frame.
//! That keeps concurrent callers independent: a status poll is never
//! queued behind a long-running `run_command` on the same socket.
//!
//! Discovery ([`connect_to_end`]) never raises: "peer not yet running" is
//! an expected steady state, so every failure path returns `None`.

use std::time::Duration;

use serde_json::Value;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::queue::TaskStatus;
use crate::registry::{AddressRegistry, NodeAddress};
use crate::role::Role;
use crate::rpc::protocol::{self, Request, Response};

/// Client handle to a peer node's RPC server
#[derive(Debug, Clone)]
pub struct RpcClient {
    address: NodeAddress,
    connect_timeout: Duration,
}

impl RpcClient {
    /// Bind to an address and verify liveness with a ping
    pub async fn connect(address: NodeAddress, connect_timeout: Duration) -> Result<Self> {
        let client = Self {
            address,
            connect_timeout,
        };

        let pong = client.ping().await?;
        if pong != 1 {
            return Err(Error::Protocol(format!(
                "Unexpected ping reply from {}: {pong}",
                client.address
            )));
        }

        Ok(client)
    }

    /// The peer address this handle is bound to
    pub fn address(&self) -> &NodeAddress {
        &self.address
    }

    /// One request, one response, over a fresh connection.
    ///
    /// No read deadline: `run_command` may legitimately take as long as
    /// the submitted work does. Callers needing a deadline abandon the
    /// call; the task still completes server-side.
    async fn call(&self, request: Request) -> Result<Value> {
        let addr = self.address.socket_addr();

        let mut stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::Connection {
                addr: self.address.to_string(),
                message: format!("connect timed out after {:?}", self.connect_timeout),
            })?
            .map_err(|e| Error::Connection {
                addr: self.address.to_string(),
                message: e.to_string(),
            })?;

        debug!(addr = %self.address, method = request.method(), "RPC call");

        protocol::write_frame(&mut stream, &request).await?;
        let response: Response = protocol::read_frame(&mut stream).await?;

        match response {
            Response::Ok { value } => Ok(value),
            Response::Err { trace } => Err(Error::RemoteTask { trace }),
        }
    }

    /// Liveness probe; a healthy peer answers `1`
    pub async fn ping(&self) -> Result<i64> {
        let value = self.call(Request::Ping).await?;
        value
            .as_i64()
            .ok_or_else(|| Error::Protocol(format!("Non-integer ping reply: {value}")))
    }

    /// Ask the peer's server to stop
    pub async fn stop(&self) -> Result<()> {
        self.call(Request::Stop).await.map(|_| ())
    }

    /// Ask the peer to re-attempt discovery of its own counterpart
    /// (the second half of the two-way handshake)
    pub async fn try_setup_client(&self, warn: bool) -> Result<()> {
        self.call(Request::TrySetupClient { warn }).await.map(|_| ())
    }

    /// Run a command synchronously; returns its result or fails with the
    /// peer-side trace
    pub async fn run_command(&self, command: impl Into<String>) -> Result<Value> {
        self.call(Request::RunCommand {
            command: command.into(),
        })
        .await
    }

    /// Enqueue a command; returns the assigned task id immediately
    pub async fn enqueue_command(&self, command: impl Into<String>) -> Result<u64> {
        let value = self
            .call(Request::EnqueueCommand {
                command: command.into(),
            })
            .await?;
        value
            .as_u64()
            .ok_or_else(|| Error::Protocol(format!("Non-integer task id: {value}")))
    }

    pub async fn get_task_status(&self, task_id: u64) -> Result<TaskStatus> {
        let value = self.call(Request::GetTaskStatus { task_id }).await?;
        let text = value
            .as_str()
            .ok_or_else(|| Error::Protocol(format!("Non-string task status: {value}")))?;
        text.parse().map_err(Error::Protocol)
    }

    pub async fn get_task_error(&self, task_id: u64) -> Result<Option<String>> {
        let value = self.call(Request::GetTaskError { task_id }).await?;
        Ok(value.as_str().map(str::to_string))
    }

    pub async fn get_task_result(&self, task_id: u64) -> Result<Value> {
        self.call(Request::GetTaskResult { task_id }).await
    }
}

// ─────────────────────────────────────────────────────────────────
// Peer discovery
// ─────────────────────────────────────────────────────────────────

/// Resolve a logical end's address: a static non-default configured
/// address wins; otherwise the last-known address from the registry
pub fn resolve_end_address(
    end: Role,
    config: &NodeConfig,
    registry: &AddressRegistry,
) -> Result<NodeAddress> {
    if let Some(static_addr) = config.end(end).static_address() {
        return static_addr.parse();
    }
    registry.read(end)
}

/// Try to connect to a logical end's server. Every failure (missing or
/// malformed address file, refused connection, timeout, bad ping) returns
/// `None`; with `warn` set, a warning is logged.
pub async fn connect_to_end(
    end: Role,
    config: &NodeConfig,
    registry: &AddressRegistry,
    warn_on_failure: bool,
) -> Option<RpcClient> {
    let connect_timeout = Duration::from_millis(config.rpc.connect_timeout_ms);

    let attempt = async {
        let address = resolve_end_address(end, config, registry)?;
        RpcClient::connect(address, connect_timeout).await
    };

    match attempt.await {
        Ok(client) => {
            debug!(end = %end, address = %client.address(), "Connected to peer");
            Some(client)
        }
        Err(e) => {
            if warn_on_failure {
                warn!(end = %end, error = %e, "Could not connect to peer server; ensure the counterpart process is running");
            }
            None
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_setup() -> (TempDir, NodeConfig, AddressRegistry) {
        let dir = TempDir::new().unwrap();
        let registry = AddressRegistry::new(Some(dir.path().to_path_buf()));
        (dir, NodeConfig::default(), registry)
    }

    #[test]
    fn test_resolution_prefers_static_address() {
        let (_dir, mut config, registry) = test_setup();
        config.blender.ip = "10.0.0.5".to_string();
        config.blender.port = 7200;

        // Registry has a different address; static config must win
        registry
            .save(
                Role::Blender,
                Some(&"tcp://127.0.0.1:1234".parse().unwrap()),
            )
            .unwrap();

        let resolved = resolve_end_address(Role::Blender, &config, &registry).unwrap();
        assert_eq!(resolved.to_string(), "tcp://10.0.0.5:7200");
    }

    #[test]
    fn test_resolution_falls_back_to_registry() {
        let (_dir, config, registry) = test_setup();
        registry
            .save(
                Role::Blender,
                Some(&"tcp://127.0.0.1:1234".parse().unwrap()),
            )
            .unwrap();

        let resolved = resolve_end_address(Role::Blender, &config, &registry).unwrap();
        assert_eq!(resolved.port, 1234);
    }

    #[test]
    fn test_resolution_without_any_address_fails() {
        let (_dir, config, registry) = test_setup();
        assert!(resolve_end_address(Role::Blender, &config, &registry).is_err());
    }

    #[tokio::test]
    async fn test_connect_returns_none_when_no_address_file() {
        let (_dir, config, registry) = test_setup();
        let client = connect_to_end(Role::Blender, &config, &registry, false).await;
        assert!(client.is_none());
    }

    #[tokio::test]
    async fn test_connect_tolerates_stale_address_file() {
        let (_dir, config, registry) = test_setup();

        // Grab a port that was listening and no longer is
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        registry
            .save(
                Role::Blender,
                Some(&format!("tcp://127.0.0.1:{port}").parse().unwrap()),
            )
            .unwrap();

        let client = connect_to_end(Role::Blender, &config, &registry, false).await;
        assert!(client.is_none());
    }
}
