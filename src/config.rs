// src/config.rs

//! Client configuration: tunables for user-facing traffic.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings applied to connections a `ReplicaSetClient` opens for user
/// operations. Monitor-internal connections use their own fixed timeouts.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ClientConfig {
    /// Socket timeout for user traffic, in seconds. `0` disables the timeout.
    #[serde(default = "default_socket_timeout_secs")]
    pub socket_timeout_secs: f64,
}

impl ClientConfig {
    /// The socket timeout as a `Duration`, or `None` when disabled.
    pub fn socket_timeout(&self) -> Option<Duration> {
        if self.socket_timeout_secs > 0.0 {
            Some(Duration::from_secs_f64(self.socket_timeout_secs))
        } else {
            None
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            socket_timeout_secs: default_socket_timeout_secs(),
        }
    }
}

fn default_socket_timeout_secs() -> f64 {
    0.0
}
