//! The communication node embedded in each host process
//!
//! A [`CommNode`] pairs a serving role with a client role. Serving roles
//! (NEURON, Blender) bind an RPC server, publish its address and run the
//! queue drain loop; control roles only hold a client to the end they
//! steer. Either side may start first: discovery never raises, and the
//! side that comes up second completes the link during its own startup
//! by asking the already-running peer to connect back.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::executor::{CommandExecutor, CommandOutcome, ScriptExecutor};
use crate::queue::{TaskQueue, TaskStatus};
use crate::registry::{AddressRegistry, NodeAddress};
use crate::role::Role;
use crate::rpc::client::{self, RpcClient};
use crate::rpc::server::{self, Dispatcher};

/// Callback invoked each time a fresh client handle to the counterpart
/// is established (initial discovery or a later re-attempt)
pub type ConnectedHook = Arc<dyn Fn(&RpcClient) + Send + Sync>;

// ─────────────────────────────────────────────────────────────────
// Peer Link
// ─────────────────────────────────────────────────────────────────

/// The node's mutable link to its counterpart.
///
/// Shared between the owning node and its RPC server, because the peer
/// may call `try_setup_client` at any time to make this side (re)connect.
pub(crate) struct PeerLink {
    client_end: Role,
    config: NodeConfig,
    registry: AddressRegistry,
    client: RwLock<Option<RpcClient>>,
    on_connected: Option<ConnectedHook>,
}

impl PeerLink {
    fn new(
        client_end: Role,
        config: NodeConfig,
        registry: AddressRegistry,
        on_connected: Option<ConnectedHook>,
    ) -> Self {
        Self {
            client_end,
            config,
            registry,
            client: RwLock::new(None),
            on_connected,
        }
    }

    /// Current client handle, if the counterpart was reachable at the
    /// last attempt
    pub fn client(&self) -> Option<RpcClient> {
        self.client.read().clone()
    }

    /// (Re)attempt discovery of the counterpart. Never raises: on any
    /// failure the slot is cleared, so a stale handle is not kept around
    /// after the peer moved or died.
    pub async fn try_setup_client(&self, warn: bool) {
        let client =
            client::connect_to_end(self.client_end, &self.config, &self.registry, warn).await;

        // Publish first: a hook that reads back through the node must
        // observe the connection it is being told about
        *self.client.write() = client.clone();

        if let (Some(client), Some(hook)) = (&client, &self.on_connected) {
            hook(client);
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────

/// Builder for a [`CommNode`]
pub struct CommNodeBuilder {
    role: Role,
    config: Option<NodeConfig>,
    executor: Option<Arc<dyn CommandExecutor>>,
    on_connected: Option<ConnectedHook>,
    exit_on_shutdown: bool,
}

impl CommNodeBuilder {
    fn new(role: Role) -> Self {
        Self {
            role,
            config: None,
            executor: None,
            on_connected: None,
            exit_on_shutdown: true,
        }
    }

    pub fn config(mut self, config: NodeConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Replace the built-in [`ScriptExecutor`] with a host-bound executor
    pub fn executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Run a callback whenever a client handle to the counterpart is
    /// established
    pub fn on_client_connected<F>(mut self, hook: F) -> Self
    where
        F: Fn(&RpcClient) + Send + Sync + 'static,
    {
        self.on_connected = Some(Arc::new(hook));
        self
    }

    /// Whether an intentional shutdown command terminates the process
    /// (the default). Embedders that own their own lifecycle disable this.
    pub fn exit_on_shutdown(mut self, enabled: bool) -> Self {
        self.exit_on_shutdown = enabled;
        self
    }

    /// Build and start the node: connect to the counterpart if it is
    /// already up, then (for serving roles) bind the server, publish the
    /// address and complete the two-way handshake.
    pub async fn start(self) -> Result<CommNode> {
        let config = match self.config {
            Some(config) => config,
            None => NodeConfig::default(),
        };
        config.validate()?;

        let server_end = self.role;
        let client_end = server_end.counterpart();

        let registry = AddressRegistry::new(config.registry.dir.clone().map(Into::into));
        let link = Arc::new(PeerLink::new(
            client_end,
            config.clone(),
            registry.clone(),
            self.on_connected,
        ));

        // First half of the handshake: reach the counterpart if it is
        // already serving. Absence is normal; it will reach us instead.
        link.try_setup_client(true).await;

        let mut node = CommNode {
            server_end,
            client_end,
            config: config.clone(),
            registry: registry.clone(),
            link: Arc::clone(&link),
            queue: Arc::new(TaskQueue::new()),
            server: None,
            stopped: false,
        };

        if server_end.is_control() {
            info!(role = %server_end, "Control node started (client only)");
            return Ok(node);
        }

        // Serving path: bind, drain, publish, handshake back
        let end = config.end(server_end);
        let bind_ip: IpAddr = end
            .ip
            .parse()
            .map_err(|_| Error::ConfigValidation(format!("Invalid bind IP '{}'", end.ip)))?;
        let bind = SocketAddr::new(bind_ip, end.port);

        let executor = match self.executor {
            Some(executor) => executor,
            None => Arc::new(ScriptExecutor::new(server_end, end.prelude.clone())),
        };

        let (server_stop, _) = watch::channel(false);
        let dispatcher = Arc::new(Dispatcher {
            queue: Arc::clone(&node.queue),
            link: Arc::clone(&link),
            stop_tx: server_stop.clone(),
            poll_interval: Duration::from_millis(config.rpc.poll_interval_ms),
        });

        let parts = server::start(bind, dispatcher).await?;
        let address = NodeAddress::new(bind_ip, parts.addr.port());

        let (drain_stop, drain_rx) = watch::channel(false);
        let drain_task = server::spawn_drain_loop(
            Arc::clone(&node.queue),
            executor,
            Duration::from_millis(config.rpc.drain_idle_ms),
            self.exit_on_shutdown,
            drain_rx,
        );

        registry.save(server_end, Some(&address))?;
        info!(role = %server_end, address = %address, "Node server started");

        // Second half of the handshake: our server now exists, so a peer
        // found in the first half can connect back to it.
        if let Some(peer) = link.client() {
            match peer.try_setup_client(true).await {
                Ok(()) => info!(
                    "Two-way communication between {server_end} and {client_end} established"
                ),
                Err(e) => warn!(error = %e, "Peer could not connect back"),
            }
        }

        node.server = Some(ServerHandle {
            address,
            accept_task: parts.accept_task,
            drain_task,
            server_stop,
            drain_stop,
        });

        Ok(node)
    }
}

// ─────────────────────────────────────────────────────────────────
// Comm Node
// ─────────────────────────────────────────────────────────────────

struct ServerHandle {
    address: NodeAddress,
    accept_task: JoinHandle<()>,
    drain_task: JoinHandle<()>,
    server_stop: watch::Sender<bool>,
    drain_stop: watch::Sender<bool>,
}

/// One end of the bridge, embedded in a host process
pub struct CommNode {
    server_end: Role,
    client_end: Role,
    config: NodeConfig,
    registry: AddressRegistry,
    link: Arc<PeerLink>,
    queue: Arc<TaskQueue>,
    server: Option<ServerHandle>,
    stopped: bool,
}

impl CommNode {
    pub fn builder(role: Role) -> CommNodeBuilder {
        CommNodeBuilder::new(role)
    }

    /// Start a node with default configuration
    pub async fn start(role: Role) -> Result<Self> {
        Self::builder(role).start().await
    }

    /// The role this node serves as
    pub fn server_end(&self) -> Role {
        self.server_end
    }

    /// The counterpart role this node holds a client for
    pub fn client_end(&self) -> Role {
        self.client_end
    }

    /// Address the node's server listens on (None for control roles or a
    /// stopped node)
    pub fn server_address(&self) -> Option<&NodeAddress> {
        self.server.as_ref().map(|s| &s.address)
    }

    /// Client handle to the counterpart, if it was reachable at the last
    /// discovery attempt
    pub fn client(&self) -> Option<RpcClient> {
        self.link.client()
    }

    pub fn registry(&self) -> &AddressRegistry {
        &self.registry
    }

    /// Re-attempt discovery of the counterpart
    pub async fn try_setup_client(&self, warn: bool) {
        self.link.try_setup_client(warn).await;
    }

    /// Enqueue a pre-bound callable on this node's own queue. It runs on
    /// the drain loop, ordered with commands arriving over RPC.
    pub fn enqueue_call<F>(&self, call: F) -> Result<u64>
    where
        F: FnOnce() -> CommandOutcome + Send + 'static,
    {
        if self.server.is_none() {
            return Err(Error::Internal(
                "This node runs no task queue (control role or stopped)".to_string(),
            ));
        }
        Ok(self.queue.enqueue_call(call))
    }

    pub fn task_status(&self, task_id: u64) -> TaskStatus {
        self.queue.status(task_id)
    }

    pub fn task_result(&self, task_id: u64) -> Option<Value> {
        self.queue.result(task_id)
    }

    pub fn task_error(&self, task_id: u64) -> Option<String> {
        self.queue.error(task_id)
    }

    /// Stop the node: wind down the drain loop, tear down the queue, stop
    /// the server via a local stop call and clear the published address.
    /// Idempotent; stopping a control node only marks it stopped.
    pub async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        let Some(server) = self.server.take() else {
            return;
        };

        // Drain loop first, so no task is mid-execution while the queue
        // is torn down
        let _ = server.drain_stop.send(true);
        if let Err(e) = server.drain_task.await {
            warn!(error = %e, "Drain task did not exit cleanly");
        }
        self.queue.reset();

        // Stop the server the same way a peer would, so the accept loop
        // observes the signal even while parked on accept
        let connect_timeout = Duration::from_millis(self.config.rpc.connect_timeout_ms);
        match RpcClient::connect(server.address.clone(), connect_timeout).await {
            Ok(local) => {
                if let Err(e) = local.stop().await {
                    warn!(error = %e, "Local stop call failed");
                }
            }
            Err(e) => warn!(error = %e, "Could not reach own server to stop it"),
        }
        let _ = server.server_stop.send(true);
        if let Err(e) = server.accept_task.await {
            warn!(error = %e, "Accept task did not exit cleanly");
        }

        if let Err(e) = self.registry.save(self.server_end, None) {
            warn!(error = %e, "Failed to clear address file");
        }

        info!(role = %self.server_end, "Node stopped");
    }
}

impl Drop for CommNode {
    /// Best-effort teardown for nodes dropped without [`CommNode::stop`]:
    /// signal both loops and clear the published address so a later
    /// process does not dial a dead server.
    fn drop(&mut self) {
        if self.stopped {
            return;
        }
        if let Some(server) = self.server.take() {
            let _ = server.drain_stop.send(true);
            let _ = server.server_stop.send(true);
            let _ = std::fs::remove_file(self.registry.address_file(self.server_end));
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
