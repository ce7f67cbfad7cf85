// src/core/errors.rs

//! Defines the primary error type for the entire client.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within the client.
/// `std::io::Error` is wrapped in an `Arc` so the enum stays cheaply cloneable.
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Incomplete data in stream")]
    IncompleteData,

    #[error("Timeout while talking to {0}")]
    Timeout(String),

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("need at least 1 node for a replica set")]
    EmptySeedList,

    #[error("config change hook already specified")]
    HookAlreadySet,

    #[error("no master found for set: {0}")]
    NoMaster(String),

    #[error("no reachable node for set: {0}")]
    NoReachableNode(String),

    #[error("can't connect to new replica set {role} [{addr}] err: {msg}")]
    ConnectFailed {
        role: &'static str,
        addr: String,
        msg: String,
    },

    #[error("slave {0} is no longer secondary")]
    NotSecondary(String),

    #[error("authentication failed for db '{db}' as '{user}': {msg}")]
    AuthFailed {
        db: String,
        user: String,
        msg: String,
    },

    #[error("invalid host:port string '{0}'")]
    BadHostAndPort(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("server error {code}: {msg}")]
    ServerError { code: i64, msg: String },
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        ClientError::Io(Arc::new(e))
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Protocol(format!("document serialization error: {e}"))
    }
}
