// src/core/mod.rs

//! The central module containing the client's core logic and data structures.

pub mod connection;
pub mod errors;
pub mod metrics;
pub mod monitor;
pub mod protocol;
pub mod router;

pub use errors::ClientError;
pub use protocol::{Document, HostAndPort};
