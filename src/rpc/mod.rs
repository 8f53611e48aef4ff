//! Peer-to-peer RPC layer
//!
//! Length-prefixed JSON frames over TCP carry a small method-call
//! protocol. [`server`] hosts the accept loop and the queue drain loop;
//! [`client`] resolves a counterpart's address and issues calls.

pub mod client;
pub mod protocol;
pub mod server;
