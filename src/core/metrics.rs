// src/core/metrics.rs

//! Defines and registers Prometheus metrics for the replica set client.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only
//! once globally for the entire process lifecycle.

use lazy_static::lazy_static;
use prometheus::{Counter, register_counter};

lazy_static! {
    /// The total number of member handshakes attempted by monitors.
    pub static ref HANDSHAKES_TOTAL: Counter =
        register_counter!("vellumdb_client_handshakes_total", "Total member handshakes attempted.").unwrap();
    /// The total number of member handshakes that failed.
    pub static ref HANDSHAKE_FAILURES_TOTAL: Counter =
        register_counter!("vellumdb_client_handshake_failures_total", "Total member handshakes that failed.").unwrap();
    /// Times a believed primary was cleared after a failure report.
    pub static ref PRIMARY_FAILURES_TOTAL: Counter =
        register_counter!("vellumdb_client_primary_failures_total", "Times the believed primary was cleared after a failure report.").unwrap();
    /// The total number of successful secondary selections.
    pub static ref SECONDARY_SELECTIONS_TOTAL: Counter =
        register_counter!("vellumdb_client_secondary_selections_total", "Total successful secondary selections.").unwrap();
}
