// src/core/monitor/registry.rs

//! Process-wide registry of replica set monitors.
//!
//! The registry holds the canonical reference to every monitor, keyed by set
//! name; routers hold clones of these handles. Creating the first monitor
//! also starts the background [`watcher`](super::watcher).

use super::watcher;
use super::{ConfigChangeHook, ReplicaSetMonitor};
use crate::core::connection::{Connector, TcpConnector};
use crate::core::errors::ClientError;
use crate::core::protocol::HostAndPort;
use lazy_static::lazy_static;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

lazy_static! {
    // An async mutex: creation holds the map across the construction I/O so
    // two monitors for the same name can never coexist.
    static ref SETS: AsyncMutex<HashMap<String, Arc<ReplicaSetMonitor>>> =
        AsyncMutex::new(HashMap::new());
    static ref CONFIG_HOOK: parking_lot::Mutex<Option<ConfigChangeHook>> =
        parking_lot::Mutex::new(None);
}

/// Returns the monitor for `name`, creating it from `seeds` when it does not
/// exist yet. Ensures the background watcher is running.
pub async fn get_or_create(
    name: &str,
    seeds: &[HostAndPort],
) -> Result<Arc<ReplicaSetMonitor>, ClientError> {
    get_or_create_with(name, seeds, Arc::new(TcpConnector)).await
}

/// Like [`get_or_create`], with an explicit transport factory.
pub async fn get_or_create_with(
    name: &str,
    seeds: &[HostAndPort],
    connector: Arc<dyn Connector>,
) -> Result<Arc<ReplicaSetMonitor>, ClientError> {
    let monitor = {
        let mut sets = SETS.lock().await;
        match sets.get(name) {
            Some(monitor) => monitor.clone(),
            None => {
                let monitor = ReplicaSetMonitor::with_connector(name, seeds, connector).await?;
                sets.insert(name.to_string(), monitor.clone());
                monitor
            }
        }
    };

    watcher::safe_go();

    Ok(monitor)
}

/// The monitor for `name`, if one was ever registered.
pub async fn get(name: &str) -> Option<Arc<ReplicaSetMonitor>> {
    SETS.lock().await.get(name).cloned()
}

/// Re-checks every registered monitor, each exactly once. The map is
/// re-snapshotted between monitors so concurrent registrations neither block
/// the walk nor prevent it from terminating.
pub async fn check_all(check_all_secondaries: bool) {
    let mut seen: HashSet<String> = HashSet::new();

    loop {
        let next = {
            let sets = SETS.lock().await;
            sets.iter()
                .find(|(name, _)| !seen.contains(*name))
                .map(|(name, monitor)| (name.clone(), monitor.clone()))
        };

        let Some((name, monitor)) = next else {
            break;
        };

        debug!("checking replica set: {name}");
        seen.insert(name);
        monitor.check(check_all_secondaries).await;
    }
}

/// Installs the process-wide config change hook. May be called at most once;
/// callers that need multiple subscribers must multiplex in their hook.
pub fn set_config_change_hook(hook: ConfigChangeHook) -> Result<(), ClientError> {
    let mut slot = CONFIG_HOOK.lock();
    if slot.is_some() {
        return Err(ClientError::HookAlreadySet);
    }
    *slot = Some(hook);
    Ok(())
}

pub(crate) fn config_change_hook() -> Option<ConfigChangeHook> {
    CONFIG_HOOK.lock().clone()
}
