// src/core/monitor/mod.rs

//! Replica set topology discovery, health checking, and member selection.
//!
//! A `ReplicaSetMonitor` tracks the membership and roles of one replica set.
//! Monitors are shared process-wide through the [`registry`], and the
//! [`watcher`] re-checks every registered monitor on a fixed cadence. The
//! monitor observes elections, it never participates in them.

pub mod node;
pub mod registry;
pub mod watcher;

pub use node::Node;

use crate::core::connection::{Connector, SharedConnection, TcpConnector};
use crate::core::errors::ClientError;
use crate::core::metrics;
use crate::core::protocol::{Document, HostAndPort, ReplSetStatus};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

/// Socket timeout for connections the monitor opens for its own checks.
const CHECK_SOCKET_TIMEOUT: Duration = Duration::from_secs(5);
/// Pause between the two rounds of a full check.
const CHECK_RETRY_PAUSE: Duration = Duration::from_secs(1);
/// Passes over the member ring before secondary selection gives up.
const SELECTION_PASSES: usize = 3;

/// Process-wide callback invoked after a monitor learns of new members.
pub type ConfigChangeHook = Arc<dyn Fn(&ReplicaSetMonitor) + Send + Sync>;

/// The mutable topology of one monitored set. Guarded by the monitor's
/// primary mutex; never held across I/O.
struct Topology {
    /// Known members in discovery order. Only ever grows.
    nodes: Vec<Node>,
    /// Index of the believed primary, if any.
    master: Option<usize>,
    /// Rotating cursor for secondary selection.
    next_slave: usize,
}

/// Tracks the members and roles of a single replica set.
pub struct ReplicaSetMonitor {
    name: String,
    state: Mutex<Topology>,
    /// Serializes handshakes against this set. Held across I/O, so it is an
    /// async mutex; never acquired while holding `state`.
    check_lock: AsyncMutex<()>,
    connector: Arc<dyn Connector>,
}

impl std::fmt::Debug for ReplicaSetMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicaSetMonitor")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Introspection snapshot of a monitor, see [`ReplicaSetMonitor::append_info`].
#[derive(Debug, Clone, Serialize)]
pub struct MonitorInfo {
    pub hosts: Vec<NodeInfo>,
    /// Index of the believed primary, `-1` when there is none.
    pub master: i64,
    pub next_slave: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeInfo {
    pub addr: String,
    pub ok: bool,
    pub ismaster: bool,
    pub hidden: bool,
    pub secondary: bool,
    pub ping_time_millis: u64,
}

impl ReplicaSetMonitor {
    /// Builds a monitor over a seed list using the real TCP transport.
    /// Prefer [`registry::get_or_create`], which deduplicates by set name.
    pub async fn new(name: &str, seeds: &[HostAndPort]) -> Result<Arc<Self>, ClientError> {
        Self::with_connector(name, seeds, Arc::new(TcpConnector)).await
    }

    /// Builds a monitor with an explicit transport factory.
    ///
    /// Construction is best-effort: seeds that cannot be reached are skipped,
    /// and members learned from the first handshakes are appended. Only an
    /// empty seed list is an error.
    pub async fn with_connector(
        name: &str,
        seeds: &[HostAndPort],
        connector: Arc<dyn Connector>,
    ) -> Result<Arc<Self>, ClientError> {
        if seeds.is_empty() {
            return Err(ClientError::EmptySeedList);
        }
        if name.is_empty() {
            warn!("replica set name empty, first node: {}", seeds[0]);
        }

        let monitor = Arc::new(Self {
            name: name.to_string(),
            state: Mutex::new(Topology {
                nodes: Vec::new(),
                master: None,
                next_slave: 0,
            }),
            check_lock: AsyncMutex::new(()),
            connector,
        });

        for seed in seeds {
            if monitor.find(seed).is_some() {
                continue;
            }

            let mut conn = monitor
                .connector
                .open(seed.clone(), Some(CHECK_SOCKET_TIMEOUT));
            if let Err(e) = conn.connect().await {
                debug!("error connecting to seed {seed}: {e}");
                continue;
            }

            let index = {
                let mut st = monitor.state.lock();
                st.nodes
                    .push(Node::new(seed.clone(), Arc::new(AsyncMutex::new(conn))));
                st.nodes.len() - 1
            };
            monitor.check_connection(index, false).await;
        }

        Ok(monitor)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `"<name>/host1,host2,…"`, or just the host list when the set name is
    /// empty.
    pub fn server_address(&self) -> String {
        let mut out = String::new();
        if !self.name.is_empty() {
            out.push_str(&self.name);
            out.push('/');
        }
        let st = self.state.lock();
        for (i, node) in st.nodes.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(&node.addr.to_string());
        }
        out
    }

    pub fn contains(&self, addr: &HostAndPort) -> bool {
        self.find(addr).is_some()
    }

    /// Reports that the primary at `addr` failed. Clears the believed primary
    /// when the address matches; secondaries are unaffected.
    pub fn notify_failure(&self, addr: &HostAndPort) {
        let mut st = self.state.lock();
        if let Some(m) = st.master {
            if st.nodes.get(m).map(|n| &n.addr) == Some(addr) {
                st.nodes[m].ok = false;
                st.master = None;
                metrics::PRIMARY_FAILURES_TOTAL.inc();
            }
        }
    }

    /// Reports that the member at `addr` failed a read. Marks it down without
    /// touching the believed primary.
    pub fn notify_slave_failure(&self, addr: &HostAndPort) {
        let mut st = self.state.lock();
        if let Some(node) = st.nodes.iter_mut().find(|n| n.addr == *addr) {
            node.ok = false;
        }
    }

    /// The current primary's address. Answers from the cached topology when
    /// the believed primary is still up; otherwise runs a full check first.
    pub async fn get_master(&self) -> Result<HostAndPort, ClientError> {
        {
            let st = self.state.lock();
            if let Some(m) = st.master {
                if st.nodes[m].ok {
                    return Ok(st.nodes[m].addr.clone());
                }
            }
        }

        self.full_check(false).await;

        let st = self.state.lock();
        match st.master {
            Some(m) => Ok(st.nodes[m].addr.clone()),
            None => Err(ClientError::NoMaster(self.name.clone())),
        }
    }

    /// Selects a secondary, sticking with `prev` while it is still usable so
    /// cursors keep their member affinity.
    pub async fn get_slave(&self, prev: Option<&HostAndPort>) -> Result<HostAndPort, ClientError> {
        if let Some(prev) = prev {
            let mut was_found = false;
            {
                let st = self.state.lock();
                for node in &st.nodes {
                    if node.addr != *prev {
                        continue;
                    }
                    was_found = true;
                    if node.ok_for_secondary_queries() {
                        return Ok(prev.clone());
                    }
                    break;
                }
            }
            if was_found {
                debug!("slave '{prev}' is no longer ok to use");
            } else {
                debug!("slave '{prev}' was not found in the replica set");
            }
        }

        self.select_slave().await
    }

    /// Rotates `next_slave` over the member ring, up to [`SELECTION_PASSES`]
    /// passes. The final pass also accepts members that are merely up, which
    /// may hand back a primary. Falls back to the first known member.
    async fn select_slave(&self) -> Result<HostAndPort, ClientError> {
        debug!(
            "selecting new slave from replica set {}",
            self.server_address()
        );

        for pass in 0..SELECTION_PASSES {
            {
                let mut st = self.state.lock();
                let n = st.nodes.len();
                for _ in 0..n {
                    st.next_slave = (st.next_slave + 1) % n;
                    let idx = st.next_slave;
                    if Some(idx) == st.master {
                        debug!(
                            "not selecting {} as it is the current master",
                            st.nodes[idx].addr
                        );
                        continue;
                    }
                    let node = &st.nodes[idx];
                    if node.ok_for_secondary_queries() || (node.ok && pass + 1 >= SELECTION_PASSES)
                    {
                        metrics::SECONDARY_SELECTIONS_TOTAL.inc();
                        return Ok(node.addr.clone());
                    }
                    debug!("not selecting {} as it is not ok to use", node.addr);
                }
            }

            self.check(false).await;
        }

        let st = self.state.lock();
        match st.nodes.first() {
            Some(node) => {
                debug!(
                    "no suitable slave nodes found, returning default node {}",
                    node.addr
                );
                Ok(node.addr.clone())
            }
            None => Err(ClientError::NoReachableNode(self.name.clone())),
        }
    }

    /// Re-checks the set. When a believed primary exists and its handshake
    /// still succeeds, a non-full check stops there; otherwise every member
    /// is re-checked.
    pub async fn check(&self, check_all_secondaries: bool) {
        let master = self.state.lock().master;
        if let Some(m) = master {
            let (still_master, _) = self.check_connection(m, false).await;
            if still_master && !check_all_secondaries {
                // current master is fine, so we're done
                return;
            }
        }

        self.full_check(check_all_secondaries).await;
    }

    /// Handshakes every member looking for a primary, in up to two rounds
    /// with a pause in between. A `primary` hint from a handshake is chased
    /// at most once per invocation.
    async fn full_check(&self, check_all_secondaries: bool) {
        debug!("full check of replica set {}", self.server_address());

        let mut tried_quick_check = false;
        let mut new_master: Option<usize> = None;

        for round in 0..2 {
            let mut i = 0;
            // The node list can grow while we iterate, so re-read the length.
            while i < self.node_count() {
                let (ismaster, maybe_primary) = self.check_connection(i, round > 0).await;
                if ismaster {
                    self.set_master(i);
                    new_master = Some(i);
                    if !check_all_secondaries {
                        return;
                    }
                }

                if !tried_quick_check {
                    if let Some(hint) = &maybe_primary {
                        if let Some(x) = self.find_by_name(hint) {
                            tried_quick_check = true;
                            let (hinted_is_master, _) = self.check_connection(x, false).await;
                            if hinted_is_master {
                                self.set_master(x);
                                new_master = Some(x);
                                if !check_all_secondaries {
                                    return;
                                }
                            }
                        }
                    }
                }

                i += 1;
            }

            if new_master.is_some() {
                return;
            }
            if round == 0 {
                tokio::time::sleep(CHECK_RETRY_PAUSE).await;
            }
        }
    }

    /// Handshakes the member at `index` and folds the reply into the
    /// topology. Serialized on the check lock. Returns whether the member
    /// reported itself primary, plus any `primary` hint from the reply.
    ///
    /// Handshake failures are a signal, not an error: the member is marked
    /// down and the failure is swallowed.
    async fn check_connection(&self, index: usize, verbose: bool) -> (bool, Option<String>) {
        let _guard = self.check_lock.lock().await;

        let conn = {
            let st = self.state.lock();
            match st.nodes.get(index) {
                Some(node) => node.conn.clone(),
                None => return (false, None),
            }
        };

        metrics::HANDSHAKES_TOTAL.inc();

        let mut maybe_primary = None;
        let mut changed = false;
        let ismaster = match self
            .handshake(index, &conn, verbose, &mut maybe_primary, &mut changed)
            .await
        {
            Ok(ismaster) => ismaster,
            Err(e) => {
                metrics::HANDSHAKE_FAILURES_TOTAL.inc();
                if verbose {
                    info!("handshake with node {index} of set {} failed: {e}", self.name);
                } else {
                    debug!("handshake with node {index} of set {} failed: {e}", self.name);
                }
                self.set_node_ok(index, false);
                false
            }
        };

        if changed {
            if let Some(hook) = registry::config_change_hook() {
                hook(self);
            }
        }

        (ismaster, maybe_primary)
    }

    async fn handshake(
        &self,
        index: usize,
        conn: &SharedConnection,
        verbose: bool,
        maybe_primary: &mut Option<String>,
        changed: &mut bool,
    ) -> Result<bool, ClientError> {
        let started = Instant::now();
        let (hello, raw) = {
            let mut c = conn.lock().await;
            c.hello().await?
        };

        if hello.set_name.as_deref() != Some(self.name.as_str()) {
            warn!(
                "node {} isn't a part of set {}: reported set {:?}",
                self.node_addr(index),
                self.name,
                hello.set_name
            );
            self.set_node_ok(index, false);
            return Ok(false);
        }

        {
            let mut st = self.state.lock();
            if let Some(node) = st.nodes.get_mut(index) {
                node.ping_time_millis = started.elapsed().as_millis() as u64;
                node.hidden = hello.hidden;
                node.secondary = hello.secondary;
                node.ismaster = hello.ismaster;
                node.ok = true;
                node.last_hello = Some(raw);
            }
        }

        if verbose {
            info!(
                "handshake {} of set {}: ismaster={} secondary={} hidden={}",
                self.node_addr(index),
                self.name,
                hello.ismaster,
                hello.secondary,
                hello.hidden
            );
        } else {
            debug!(
                "handshake {} of set {}: ismaster={} secondary={} hidden={}",
                self.node_addr(index),
                self.name,
                hello.ismaster,
                hello.secondary,
                hello.hidden
            );
        }

        if !hello.hosts.is_empty() {
            if let Some(primary) = &hello.primary {
                *maybe_primary = Some(primary.clone());
            }
            self.check_hosts(&hello.hosts, changed).await;
        }
        if !hello.passives.is_empty() {
            self.check_hosts(&hello.passives, changed).await;
        }

        self.check_status(conn).await;

        Ok(hello.ismaster)
    }

    /// Appends previously unknown addresses as new members. A failed connect
    /// does not stop the append: the node's client retries the connect on the
    /// next handshake attempt.
    async fn check_hosts(&self, hosts: &[String], changed: &mut bool) {
        for raw in hosts {
            let addr: HostAndPort = match raw.parse() {
                Ok(addr) => addr,
                Err(_) => {
                    warn!("bad member address '{raw}' reported in set {}", self.name);
                    continue;
                }
            };
            if self.find(&addr).is_some() {
                continue;
            }

            let mut conn = self
                .connector
                .open(addr.clone(), Some(CHECK_SOCKET_TIMEOUT));
            if let Err(e) = conn.connect().await {
                debug!("connect to discovered member {addr} failed: {e}");
            }

            {
                let mut st = self.state.lock();
                // Re-check under the lock so concurrent growth can't add the
                // same address twice.
                if st.nodes.iter().any(|n| n.addr == addr) {
                    continue;
                }
                st.nodes
                    .push(Node::new(addr.clone(), Arc::new(AsyncMutex::new(conn))));
            }

            info!("updated set ({}) to: {}", self.name, self.server_address());
            *changed = true;
        }
    }

    /// Runs the replica set status command on `conn` and refreshes the
    /// liveness flag of every member named in the reply. Failures are
    /// ignored; the handshake already established basic liveness.
    async fn check_status(&self, conn: &SharedConnection) {
        let mut cmd = Document::new();
        cmd.insert("replSetGetStatus".to_string(), Value::from(1));

        let reply = {
            let mut c = conn.lock().await;
            match c.run_command("admin", cmd).await {
                Ok(reply) => reply,
                Err(_) => return,
            }
        };

        let Ok(status) = serde_json::from_value::<ReplSetStatus>(Value::Object(reply)) else {
            return;
        };

        for member in status.members {
            let Ok(addr) = member.name.parse::<HostAndPort>() else {
                continue;
            };
            let usable = member.is_usable();
            let mut st = self.state.lock();
            if let Some(node) = st.nodes.iter_mut().find(|n| n.addr == addr) {
                node.ok = usable;
            }
        }
    }

    /// Emits the monitor's introspection document.
    pub fn append_info(&self) -> MonitorInfo {
        let st = self.state.lock();
        MonitorInfo {
            hosts: st
                .nodes
                .iter()
                .map(|node| NodeInfo {
                    addr: node.addr.to_string(),
                    ok: node.ok,
                    ismaster: node.ismaster,
                    hidden: node.hidden,
                    secondary: node.secondary,
                    ping_time_millis: node.ping_time_millis,
                })
                .collect(),
            master: st.master.map(|m| m as i64).unwrap_or(-1),
            next_slave: st.next_slave,
        }
    }

    fn find(&self, addr: &HostAndPort) -> Option<usize> {
        let st = self.state.lock();
        st.nodes.iter().position(|n| n.addr == *addr)
    }

    fn find_by_name(&self, raw: &str) -> Option<usize> {
        let addr: HostAndPort = raw.parse().ok()?;
        self.find(&addr)
    }

    fn node_count(&self) -> usize {
        self.state.lock().nodes.len()
    }

    fn node_addr(&self, index: usize) -> String {
        let st = self.state.lock();
        st.nodes
            .get(index)
            .map(|n| n.addr.to_string())
            .unwrap_or_else(|| format!("#{index}"))
    }

    fn set_master(&self, index: usize) {
        self.state.lock().master = Some(index);
    }

    fn set_node_ok(&self, index: usize, ok: bool) {
        let mut st = self.state.lock();
        if let Some(node) = st.nodes.get_mut(index) {
            node.ok = ok;
        }
    }
}
