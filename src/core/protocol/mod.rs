// src/core/protocol/mod.rs

pub mod codec;
pub mod message;

pub use codec::WireCodec;
pub use message::{QueryRequest, ReplyMessage, RequestBody, RequestMessage};

use crate::core::ClientError;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error code a member replies with when it is neither a primary nor a
/// usable secondary. Must stay in sync with the server.
pub const NOT_PRIMARY_OR_SECONDARY: i64 = 13436;

/// A document as exchanged with the server: an ordered JSON object.
pub type Document = serde_json::Map<String, serde_json::Value>;

bitflags! {
    /// Option bits carried by a query request.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct QueryOptions: u32 {
        /// The cursor stays open after the initial batch is exhausted.
        const TAILABLE   = 1 << 1;
        /// The read may be served by a secondary.
        const SLAVE_OK   = 1 << 2;
        /// The server should not time the cursor out while idle.
        const NO_TIMEOUT = 1 << 4;
        /// Stream the results without waiting for further get-more requests.
        const EXHAUST    = 1 << 6;
    }
}

/// An immutable (host, port) pair identifying a replica set member.
/// Equality on this type drives all membership checks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostAndPort {
    pub host: String,
    pub port: u16,
}

impl HostAndPort {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for HostAndPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for HostAndPort {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| ClientError::BadHostAndPort(s.to_string()))?;
        if host.is_empty() {
            return Err(ClientError::BadHostAndPort(s.to_string()));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| ClientError::BadHostAndPort(s.to_string()))?;
        Ok(Self::new(host, port))
    }
}

/// A member's self-description, as returned by the `hello` handshake.
///
/// Unknown members of the set show up in `hosts` (electable members) and
/// `passives` (members that replicate but never stand for election).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HelloReply {
    pub set_name: Option<String>,
    pub ismaster: bool,
    pub secondary: bool,
    pub hidden: bool,
    pub primary: Option<String>,
    pub hosts: Vec<String>,
    pub passives: Vec<String>,
}

/// The subset of the `replSetGetStatus` admin reply the monitor consumes.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplSetStatus {
    pub members: Vec<MemberStatus>,
}

/// One entry of the status `members` array. A member is usable when
/// `health == 1` and `state` is 1 (primary) or 2 (secondary).
#[derive(Debug, Clone, Deserialize)]
pub struct MemberStatus {
    pub name: String,
    #[serde(default)]
    pub health: f64,
    #[serde(default)]
    pub state: f64,
}

impl MemberStatus {
    pub fn is_usable(&self) -> bool {
        self.health == 1.0 && (self.state == 1.0 || self.state == 2.0)
    }
}
