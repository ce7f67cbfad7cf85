// src/core/router/mod.rs

//! Routes operations across a replica set.
//!
//! A `ReplicaSetClient` sends writes to the primary and, when a request
//! carries the `SLAVE_OK` option, reads to a rotating secondary with retry
//! and primary fallback. It caches one primary and one secondary connection,
//! replays authentication on every connection it opens, and reports member
//! failures back to the shared monitor.
//!
//! A client is not thread-safe; in particular the split `say`/`recv` state
//! assumes the pair is issued from one thread. Clients are cheap, monitors
//! are shared: open one client per worker instead of sharing one.

use crate::config::ClientConfig;
use crate::core::connection::{Connector, NodeConnection, TcpConnector};
use crate::core::errors::ClientError;
use crate::core::monitor::{ReplicaSetMonitor, registry};
use crate::core::protocol::{
    Document, HostAndPort, QueryOptions, QueryRequest, ReplyMessage, RequestMessage,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Attempts against secondaries before a SlaveOk read falls back to the
/// primary.
const SECONDARY_ATTEMPTS: usize = 3;

/// One credential applied to the primary, replayed on every connection the
/// client opens afterwards.
#[derive(Debug, Clone)]
pub struct AuthInfo {
    pub db: String,
    pub user: String,
    pub pwd: String,
    pub digest: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LastUsed {
    Master,
    Slave,
}

/// Bridges a `say` to the matching `recv`/`check_response`.
#[derive(Debug, Default)]
struct LazyState {
    was_query: bool,
    slave_ok: bool,
    retries: usize,
    last_used: Option<LastUsed>,
}

/// Outcome of [`ReplicaSetClient::check_response`]: whether the caller should
/// replay the request, and which member served the last attempt.
#[derive(Debug, Clone, Default)]
pub struct ResponseCheck {
    pub retry: bool,
    pub target_host: Option<HostAndPort>,
}

/// A connection to a replica set as a whole.
pub struct ReplicaSetClient {
    monitor: Arc<ReplicaSetMonitor>,
    connector: Arc<dyn Connector>,
    so_timeout: Option<Duration>,
    master_host: Option<HostAndPort>,
    master: Option<Box<dyn NodeConnection>>,
    slave_host: Option<HostAndPort>,
    slave: Option<Box<dyn NodeConnection>>,
    auths: Vec<AuthInfo>,
    lazy: LazyState,
}

impl ReplicaSetClient {
    /// Opens a client over the shared monitor for `name`, creating the
    /// monitor from `seeds` if this is the first client for the set.
    pub async fn new(name: &str, seeds: &[HostAndPort]) -> Result<Self, ClientError> {
        Self::with_config(name, seeds, &ClientConfig::default()).await
    }

    pub async fn with_config(
        name: &str,
        seeds: &[HostAndPort],
        config: &ClientConfig,
    ) -> Result<Self, ClientError> {
        let monitor = registry::get_or_create(name, seeds).await?;
        Ok(Self::from_monitor(
            monitor,
            Arc::new(TcpConnector),
            config.socket_timeout(),
        ))
    }

    /// Builds a client over an existing monitor with an explicit transport
    /// factory. Several clients may share one monitor.
    pub fn from_monitor(
        monitor: Arc<ReplicaSetMonitor>,
        connector: Arc<dyn Connector>,
        so_timeout: Option<Duration>,
    ) -> Self {
        Self {
            monitor,
            connector,
            so_timeout,
            master_host: None,
            master: None,
            slave_host: None,
            slave: None,
            auths: Vec::new(),
            lazy: LazyState::default(),
        }
    }

    pub fn monitor(&self) -> &Arc<ReplicaSetMonitor> {
        &self.monitor
    }

    /// Verifies that a primary is reachable. Returns `false` (after telling
    /// the monitor) instead of an error, for callers probing availability.
    pub async fn connect(&mut self) -> bool {
        match self.check_master().await {
            Ok(_) => true,
            Err(_) => {
                if self.master.is_some() {
                    if let Some(host) = &self.master_host {
                        self.monitor.notify_failure(host);
                    }
                }
                false
            }
        }
    }

    /// Authenticates against the primary. On success the credential joins the
    /// replay list so every future connection receives it too.
    pub async fn auth(
        &mut self,
        db: &str,
        user: &str,
        pwd: &str,
        digest: bool,
    ) -> Result<(), ClientError> {
        let conn = self.check_master().await?;
        conn.auth(db, user, pwd, digest).await?;

        self.auths.push(AuthInfo {
            db: db.to_string(),
            user: user.to_string(),
            pwd: pwd.to_string(),
            digest,
        });
        Ok(())
    }

    // ------------- simple operations -----------------

    pub async fn insert(&mut self, ns: &str, doc: Document) -> Result<(), ClientError> {
        self.insert_many(ns, vec![doc], 0).await
    }

    pub async fn insert_many(
        &mut self,
        ns: &str,
        docs: Vec<Document>,
        flags: u32,
    ) -> Result<(), ClientError> {
        self.check_master().await?.insert(ns, docs, flags).await
    }

    pub async fn update(
        &mut self,
        ns: &str,
        query: Document,
        update: Document,
        upsert: bool,
        multi: bool,
    ) -> Result<(), ClientError> {
        self.check_master()
            .await?
            .update(ns, query, update, upsert, multi)
            .await
    }

    pub async fn remove(
        &mut self,
        ns: &str,
        query: Document,
        just_one: bool,
    ) -> Result<(), ClientError> {
        self.check_master().await?.remove(ns, query, just_one).await
    }

    /// Runs a query. With `SLAVE_OK` set, up to [`SECONDARY_ATTEMPTS`]
    /// secondaries are tried (each failure rotates the selection) before the
    /// primary serves the read.
    pub async fn query(&mut self, req: QueryRequest) -> Result<ReplyMessage, ClientError> {
        if req.options.contains(QueryOptions::SLAVE_OK) {
            for attempt in 0..SECONDARY_ATTEMPTS {
                match self.try_slave_query(&req).await {
                    Ok(reply) => return Ok(reply),
                    Err(e) => debug!(
                        "can't query replica set slave {attempt}: {:?}: {e}",
                        self.slave_host
                    ),
                }
            }
        }

        self.check_master().await?.query(req).await
    }

    pub async fn find_one(
        &mut self,
        ns: &str,
        query: Document,
        fields: Option<Document>,
        options: QueryOptions,
    ) -> Result<Option<Document>, ClientError> {
        if options.contains(QueryOptions::SLAVE_OK) {
            for attempt in 0..SECONDARY_ATTEMPTS {
                let result = async {
                    self.check_slave()
                        .await?
                        .find_one(ns, query.clone(), fields.clone(), options)
                        .await
                }
                .await;
                match result {
                    Ok(doc) => return Ok(doc),
                    Err(e) => debug!(
                        "can't findone replica set slave {attempt}: {:?}: {e}",
                        self.slave_host
                    ),
                }
            }
        }

        self.check_master()
            .await?
            .find_one(ns, query, fields, options)
            .await
    }

    /// This layer cannot know which member owns a cursor: cursors survive
    /// primary changes and secondary rotation. Calling this is a programming
    /// error.
    pub fn kill_cursor(&mut self, _cursor_id: i64) -> ! {
        panic!("kill_cursor cannot be routed through a replica set client");
    }

    // ------------- connection management -----------------

    /// The cached primary connection, reconnecting and re-authenticating as
    /// needed.
    pub async fn master_conn(&mut self) -> Result<&mut Box<dyn NodeConnection>, ClientError> {
        self.check_master().await
    }

    /// The cached secondary connection, sticky while the member stays usable.
    pub async fn slave_conn(&mut self) -> Result<&mut Box<dyn NodeConnection>, ClientError> {
        self.check_slave().await
    }

    /// Tells the monitor the primary is gone and drops the cached connection
    /// so the next use reselects.
    pub fn isnt_master(&mut self) {
        info!("got not master for: {:?}", self.master_host);
        if let Some(host) = &self.master_host {
            self.monitor.notify_failure(host);
        }
        self.master = None;
    }

    /// Tells the monitor the cached secondary lost its role and drops the
    /// connection so the next use rotates.
    pub fn isnt_secondary(&mut self) {
        info!("slave no longer has secondary status: {:?}", self.slave_host);
        if let Some(host) = &self.slave_host {
            self.monitor.notify_slave_failure(host);
        }
        self.slave = None;
    }

    async fn check_master(&mut self) -> Result<&mut Box<dyn NodeConnection>, ClientError> {
        let elected = self.monitor.get_master().await?;

        let reusable = self.master_host.as_ref() == Some(&elected)
            && self.master.as_ref().is_some_and(|c| !c.is_failed());
        if !reusable {
            if self.master_host.as_ref() == Some(&elected) && self.master.is_some() {
                // a master is selected but our connection to it has died
                self.monitor.notify_failure(&elected);
            }

            let master_host = self.monitor.get_master().await?;
            let mut conn = self.connector.open(master_host.clone(), self.so_timeout);
            if let Err(e) = conn.connect().await {
                self.monitor.notify_failure(&master_host);
                return Err(ClientError::ConnectFailed {
                    role: "master",
                    addr: master_host.to_string(),
                    msg: e.to_string(),
                });
            }
            self.replay_auth(conn.as_mut()).await;

            self.master_host = Some(master_host);
            self.master = Some(conn);
        }

        Ok(self.master.as_mut().expect("primary connection just cached"))
    }

    async fn check_slave(&mut self) -> Result<&mut Box<dyn NodeConnection>, ClientError> {
        let selected = self.monitor.get_slave(self.slave_host.as_ref()).await?;

        let mut target = selected;
        if self.slave_host.as_ref() == Some(&target) && self.slave.is_some() {
            if self.slave.as_ref().is_some_and(|c| !c.is_failed()) {
                return Ok(self
                    .slave
                    .as_mut()
                    .expect("secondary connection still cached"));
            }
            self.monitor.notify_slave_failure(&target);
            target = self.monitor.get_slave(None).await?;
        }

        let mut conn = self.connector.open(target.clone(), self.so_timeout);
        if let Err(e) = conn.connect().await {
            self.monitor.notify_slave_failure(&target);
            return Err(ClientError::ConnectFailed {
                role: "slave",
                addr: target.to_string(),
                msg: e.to_string(),
            });
        }
        self.replay_auth(conn.as_mut()).await;

        self.slave_host = Some(target);
        self.slave = Some(conn);
        Ok(self
            .slave
            .as_mut()
            .expect("secondary connection just cached"))
    }

    /// Replays cached credentials, in the order they were added, against a
    /// freshly opened connection. Individual failures are logged, not fatal.
    async fn replay_auth(&self, conn: &mut dyn NodeConnection) {
        for a in &self.auths {
            if let Err(e) = conn.auth(&a.db, &a.user, &a.pwd, a.digest).await {
                warn!(
                    "cached auth failed for set: {} db: {} user: {}: {e}",
                    self.monitor.name(),
                    a.db,
                    a.user
                );
            }
        }
    }

    async fn try_slave_query(&mut self, req: &QueryRequest) -> Result<ReplyMessage, ClientError> {
        let conn = self.check_slave().await?;
        let reply = conn.query(req.clone()).await?;
        self.check_slave_query_result(reply)
    }

    /// Peeks at a secondary's reply; a "not primary or secondary" error drops
    /// the member and surfaces as an error so the read loop rotates.
    fn check_slave_query_result(
        &mut self,
        reply: ReplyMessage,
    ) -> Result<ReplyMessage, ClientError> {
        if reply.is_not_primary_or_secondary() {
            let host = self
                .slave_host
                .as_ref()
                .map(|h| h.to_string())
                .unwrap_or_default();
            self.isnt_secondary();
            return Err(ClientError::NotSecondary(host));
        }
        Ok(reply)
    }

    // ------------- lazy send/receive -----------------

    /// Sends a request without waiting for the reply; `recv` reads it later.
    /// Pass `is_retry` when replaying after `check_response` asked for it, so
    /// the attempt budget carries over.
    pub async fn say(&mut self, msg: &RequestMessage, is_retry: bool) -> Result<(), ClientError> {
        if !is_retry {
            self.lazy = LazyState::default();
        }

        let slave_ok = msg.is_slave_ok_query();
        if slave_ok {
            for attempt in self.lazy.retries..SECONDARY_ATTEMPTS {
                let result = async {
                    let conn = self.check_slave().await?;
                    conn.say(msg).await
                }
                .await;
                match result {
                    Ok(()) => {
                        self.lazy = LazyState {
                            was_query: true,
                            slave_ok: true,
                            retries: attempt,
                            last_used: Some(LastUsed::Slave),
                        };
                        return Ok(());
                    }
                    Err(e) => debug!(
                        "can't lazily send to replica set slave {attempt}: {:?}: {e}",
                        self.slave_host
                    ),
                }
            }
        }

        let was_query = msg.is_query();
        let conn = self.check_master().await?;
        conn.say(msg).await?;

        self.lazy = LazyState {
            was_query,
            slave_ok,
            retries: SECONDARY_ATTEMPTS,
            last_used: Some(LastUsed::Master),
        };
        Ok(())
    }

    /// Reads the reply to the last `say`. Connection errors are logged and
    /// surfaced as `None`.
    ///
    /// # Panics
    /// Panics when called without a preceding `say`.
    pub async fn recv(&mut self) -> Option<ReplyMessage> {
        let last = self.lazy.last_used.expect("recv called before say");

        let conn = match last {
            LastUsed::Master => self.master.as_mut(),
            LastUsed::Slave => self.slave.as_mut(),
        };
        let Some(conn) = conn else {
            warn!("lazy receive with no cached connection");
            return None;
        };

        match conn.recv().await {
            Ok(reply) => Some(reply),
            Err(e) => {
                info!("could not receive data from {}: {e}", conn.server_address());
                None
            }
        }
    }

    /// Decides whether the reply to a lazy request warrants a replay. Pass
    /// `None` when `recv` produced nothing. A "not primary or secondary"
    /// reply drops the member that served the request; up to
    /// [`SECONDARY_ATTEMPTS`] replays are granted in total.
    pub fn check_response(&mut self, reply: Option<&ReplyMessage>) -> ResponseCheck {
        let mut out = ResponseCheck::default();

        let Some(last) = self.lazy.last_used else {
            return out;
        };
        out.target_host = match last {
            LastUsed::Master => self.master_host.clone(),
            LastUsed::Slave => self.slave_host.clone(),
        };

        if !(self.lazy.was_query && self.lazy.slave_ok) {
            return out;
        }

        let role_lost = match reply {
            None => true,
            Some(r) if r.n_returned == -1 => true,
            Some(r) if r.n_returned == 1 => r.is_not_primary_or_secondary(),
            Some(_) => return out,
        };
        if !role_lost {
            return out;
        }

        match last {
            LastUsed::Slave => self.isnt_secondary(),
            LastUsed::Master => self.isnt_master(),
        }

        if self.lazy.retries < SECONDARY_ATTEMPTS {
            self.lazy.retries += 1;
            out.retry = true;
        } else {
            info!(
                "too many retries ({}), could not get data from replica set {}",
                self.lazy.retries,
                self.monitor.name()
            );
        }

        out
    }

    /// A full round trip, with the same secondary preference as `query` for
    /// SlaveOk reads. Returns the reply and the member that served it.
    pub async fn call(
        &mut self,
        msg: &RequestMessage,
    ) -> Result<(ReplyMessage, HostAndPort), ClientError> {
        if msg.is_slave_ok_query() {
            for attempt in 0..SECONDARY_ATTEMPTS {
                let result = async {
                    let conn = self.check_slave().await?;
                    let addr = conn.server_address().clone();
                    let reply = conn.call(msg).await?;
                    Ok::<_, ClientError>((reply, addr))
                }
                .await;
                match result {
                    Ok(pair) => return Ok(pair),
                    Err(e) => debug!(
                        "can't call replica set slave {attempt}: {:?}: {e}",
                        self.slave_host
                    ),
                }
            }
        }

        let conn = self.check_master().await?;
        let addr = conn.server_address().clone();
        let reply = conn.call(msg).await?;
        Ok((reply, addr))
    }
}
