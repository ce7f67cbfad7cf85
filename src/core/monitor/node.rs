// src/core/monitor/node.rs

//! Per-member bookkeeping for a monitored replica set.

use crate::core::connection::SharedConnection;
use crate::core::protocol::{Document, HostAndPort};

/// The monitor's record of one replica set member. Records are appended as
/// members are discovered and never removed, so their indices stay stable.
pub struct Node {
    /// The member's address. Immutable after insertion.
    pub addr: HostAndPort,
    /// Shared handle to the connection the monitor uses for health checks.
    pub conn: SharedConnection,
    /// Liveness flag: true while the last handshake or status check succeeded.
    /// A freshly added member is assumed up until a check says otherwise.
    pub ok: bool,
    pub ismaster: bool,
    pub secondary: bool,
    pub hidden: bool,
    /// Wall-clock duration of the last handshake round trip.
    pub ping_time_millis: u64,
    /// Snapshot of the latest handshake document, kept for introspection.
    pub last_hello: Option<Document>,
}

impl Node {
    pub fn new(addr: HostAndPort, conn: SharedConnection) -> Self {
        Self {
            addr,
            conn,
            ok: true,
            ismaster: false,
            secondary: false,
            hidden: false,
            ping_time_millis: 0,
            last_hello: None,
        }
    }

    /// A member can serve reads iff it is up, a secondary, and not hidden.
    pub fn ok_for_secondary_queries(&self) -> bool {
        self.ok && self.secondary && !self.hidden
    }
}
