//! neurobridge - bidirectional RPC bridge between two long-running host
//! processes: a neuronal simulator ("NEURON" end) and a 3D visualization
//! tool ("Blender" end).
//!
//! Each host embeds one [`CommNode`]. A node pairs a serving role with a
//! client role: it exposes a small RPC surface (ping, stop, synchronous and
//! queued command execution, task status queries) and holds an optional
//! client handle to its counterpart. Discovery goes through per-role
//! address files in a shared directory, so either process may start first;
//! once one side reaches the other it asks it to connect back, completing
//! the two-way handshake.
//!
//! ## Module map
//!
//! - [`role`]: the fixed set of logical ends and their pairing table.
//! - [`registry`]: address file persistence for peer discovery.
//! - [`queue`]: the ordered, single-consumer task queue and task records.
//! - [`executor`]: the command execution seam ([`executor::CommandExecutor`])
//!   and the built-in [`executor::ScriptExecutor`].
//! - [`script`]: the sandboxed statement language behind text commands.
//! - [`rpc`]: wire protocol, server (accept + drain loops), and client.
//! - [`node`]: the [`CommNode`] orchestrator composing all of the above.

pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod node;
pub mod queue;
pub mod registry;
pub mod role;
pub mod rpc;
pub mod script;

pub use config::NodeConfig;
pub use error::{Error, Result};
pub use executor::{CommandExecutor, CommandOutcome, ScriptExecutor};
pub use node::{CommNode, CommNodeBuilder};
pub use queue::TaskStatus;
pub use role::Role;
pub use rpc::client::RpcClient;
