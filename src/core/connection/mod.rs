// src/core/connection/mod.rs

//! The single-node connection surface consumed by the monitor and the router.
//!
//! `NodeConnection` is the seam between replica set logic and the transport:
//! the monitor and router only ever talk to a node through this trait, which
//! keeps both testable against scripted implementations. `NodeClient` is the
//! real TCP implementation.

pub mod node;

pub use node::{NodeClient, TcpConnector};

use crate::core::ClientError;
use crate::core::protocol::{
    Document, HelloReply, HostAndPort, QueryOptions, QueryRequest, ReplyMessage, RequestMessage,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// A connection to one node. Implementations are expected to reconnect on
/// demand: a failed transport is re-established by the next operation, and
/// `is_failed` reports the state of the last attempt.
#[async_trait]
pub trait NodeConnection: Send {
    /// (Re)establishes the transport to the node's address.
    async fn connect(&mut self) -> Result<(), ClientError>;

    /// Runs the `hello` handshake, returning the parsed reply alongside the
    /// raw document for introspection snapshots.
    async fn hello(&mut self) -> Result<(HelloReply, Document), ClientError>;

    /// Runs a command against `db` and returns the first reply document.
    async fn run_command(&mut self, db: &str, cmd: Document) -> Result<Document, ClientError>;

    async fn auth(
        &mut self,
        db: &str,
        user: &str,
        pwd: &str,
        digest: bool,
    ) -> Result<(), ClientError>;

    async fn insert(
        &mut self,
        ns: &str,
        docs: Vec<Document>,
        flags: u32,
    ) -> Result<(), ClientError>;

    async fn update(
        &mut self,
        ns: &str,
        query: Document,
        update: Document,
        upsert: bool,
        multi: bool,
    ) -> Result<(), ClientError>;

    async fn remove(&mut self, ns: &str, query: Document, just_one: bool)
    -> Result<(), ClientError>;

    async fn query(&mut self, req: QueryRequest) -> Result<ReplyMessage, ClientError>;

    async fn find_one(
        &mut self,
        ns: &str,
        query: Document,
        fields: Option<Document>,
        options: QueryOptions,
    ) -> Result<Option<Document>, ClientError>;

    /// Sends a request without waiting for the reply.
    async fn say(&mut self, msg: &RequestMessage) -> Result<(), ClientError>;

    /// Reads the next reply off the transport. Pairs with `say`.
    async fn recv(&mut self) -> Result<ReplyMessage, ClientError>;

    /// A full send/receive round trip.
    async fn call(&mut self, msg: &RequestMessage) -> Result<ReplyMessage, ClientError>;

    /// True when the last transport operation failed and the connection needs
    /// to be re-established.
    fn is_failed(&self) -> bool;

    fn server_address(&self) -> &HostAndPort;
}

/// Factory for node connections; swapping it out is how tests replace the
/// transport. `open` constructs an unconnected client and performs no I/O.
pub trait Connector: Send + Sync {
    fn open(&self, addr: HostAndPort, timeout: Option<Duration>) -> Box<dyn NodeConnection>;
}

/// A node connection as shared inside a monitor: a snapshot of the handle is
/// taken under the monitor's lock, then the I/O happens without holding it.
pub type SharedConnection = Arc<tokio::sync::Mutex<Box<dyn NodeConnection>>>;
