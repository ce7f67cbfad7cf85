// tests/common/mod.rs

//! Shared test fixtures: a scripted in-memory replica set and the mock
//! transport that serves it.
//!
//! **Note:** Not every test binary uses every helper here.
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use vellumdb_client::core::ClientError;
use vellumdb_client::core::connection::{Connector, NodeConnection};
use vellumdb_client::core::protocol::{
    Document, HelloReply, HostAndPort, NOT_PRIMARY_OR_SECONDARY, QueryOptions, QueryRequest,
    ReplyMessage, RequestMessage,
};

pub fn host(s: &str) -> HostAndPort {
    s.parse().expect("valid host:port literal")
}

/// Builds a `Document` from a `json!` object literal.
pub fn doc(v: Value) -> Document {
    match v {
        Value::Object(m) => m,
        other => panic!("expected a JSON object, got {other:?}"),
    }
}

/// A reply whose single document carries the member that served it.
pub fn reply_from(addr: &HostAndPort) -> ReplyMessage {
    ReplyMessage {
        responding_to: 0,
        n_returned: 1,
        documents: vec![doc(json!({ "from": addr.to_string() }))],
        cursor_id: 0,
    }
}

/// The error reply a member sends when it is neither primary nor a usable
/// secondary.
pub fn not_primary_reply() -> ReplyMessage {
    ReplyMessage {
        responding_to: 0,
        n_returned: 1,
        documents: vec![doc(json!({
            "$err": "not master or secondary",
            "code": NOT_PRIMARY_OR_SECONDARY,
        }))],
        cursor_id: 0,
    }
}

/// Scripted state of one member.
#[derive(Clone)]
pub struct NodeScript {
    pub reachable: bool,
    pub set_name: Option<String>,
    pub ismaster: bool,
    pub secondary: bool,
    pub hidden: bool,
    pub hosts: Vec<String>,
    pub passives: Vec<String>,
    pub primary: Option<String>,
    /// Reply served for queries and lazy receives. `None` serves a default
    /// reply naming the member.
    pub query_reply: Option<ReplyMessage>,
    pub fail_auth: bool,
    pub fail_recv: bool,
}

impl NodeScript {
    pub fn new(set: &str) -> Self {
        Self {
            reachable: true,
            set_name: Some(set.to_string()),
            ismaster: false,
            secondary: false,
            hidden: false,
            hosts: Vec::new(),
            passives: Vec::new(),
            primary: None,
            query_reply: None,
            fail_auth: false,
            fail_recv: false,
        }
    }

    pub fn primary(set: &str, hosts: &[&str]) -> Self {
        let mut s = Self::new(set);
        s.ismaster = true;
        s.hosts = hosts.iter().map(|h| h.to_string()).collect();
        s
    }

    pub fn secondary(set: &str, hosts: &[&str]) -> Self {
        let mut s = Self::new(set);
        s.secondary = true;
        s.hosts = hosts.iter().map(|h| h.to_string()).collect();
        s
    }
}

/// A scripted replica set, shared by every mock connection a test opens.
pub struct MockCluster {
    nodes: Mutex<HashMap<HostAndPort, NodeScript>>,
    hellos: AtomicUsize,
    /// Ordered log of (member, operation) pairs across all connections.
    log: Mutex<Vec<(HostAndPort, String)>>,
}

impl MockCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            nodes: Mutex::new(HashMap::new()),
            hellos: AtomicUsize::new(0),
            log: Mutex::new(Vec::new()),
        })
    }

    pub fn add(&self, addr: &str, script: NodeScript) {
        self.nodes.lock().insert(host(addr), script);
    }

    pub fn update(&self, addr: &str, f: impl FnOnce(&mut NodeScript)) {
        let mut nodes = self.nodes.lock();
        let script = nodes.get_mut(&host(addr)).expect("scripted member");
        f(script);
    }

    /// Makes `addr` the primary and demotes every other member to secondary,
    /// updating the `primary` hint everywhere.
    pub fn set_primary(&self, addr: &str) {
        let target = host(addr);
        let mut nodes = self.nodes.lock();
        for (member, script) in nodes.iter_mut() {
            if *member == target {
                script.ismaster = true;
                script.secondary = false;
            } else {
                script.ismaster = false;
                script.secondary = true;
            }
            script.primary = Some(addr.to_string());
        }
    }

    pub fn hello_count(&self) -> usize {
        self.hellos.load(Ordering::SeqCst)
    }

    pub fn log_entries(&self) -> Vec<(HostAndPort, String)> {
        self.log.lock().clone()
    }

    pub fn connector(self: &Arc<Self>) -> Arc<MockConnector> {
        Arc::new(MockConnector {
            cluster: self.clone(),
        })
    }

    fn record(&self, addr: &HostAndPort, op: impl Into<String>) {
        self.log.lock().push((addr.clone(), op.into()));
    }

    fn script(&self, addr: &HostAndPort) -> Option<NodeScript> {
        self.nodes.lock().get(addr).cloned()
    }

    /// Builds the `replSetGetStatus` members array from the scripted state.
    fn status_doc(&self) -> Document {
        let members: Vec<Value> = self
            .nodes
            .lock()
            .iter()
            .map(|(addr, s)| {
                let state = if s.ismaster {
                    1
                } else if s.secondary {
                    2
                } else {
                    3
                };
                json!({
                    "name": addr.to_string(),
                    "health": if s.reachable { 1 } else { 0 },
                    "state": state,
                })
            })
            .collect();
        doc(json!({ "ok": 1, "members": members }))
    }
}

pub struct MockConnector {
    cluster: Arc<MockCluster>,
}

impl Connector for MockConnector {
    fn open(&self, addr: HostAndPort, _timeout: Option<Duration>) -> Box<dyn NodeConnection> {
        Box::new(MockConnection {
            cluster: self.cluster.clone(),
            addr,
            connected: false,
            failed: false,
            pending: None,
        })
    }
}

pub struct MockConnection {
    cluster: Arc<MockCluster>,
    addr: HostAndPort,
    connected: bool,
    failed: bool,
    pending: Option<ReplyMessage>,
}

impl MockConnection {
    fn refused(&self) -> ClientError {
        ClientError::Io(Arc::new(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            format!("connection refused: {}", self.addr),
        )))
    }

    fn try_connect(&mut self) -> Result<(), ClientError> {
        let reachable = self
            .cluster
            .script(&self.addr)
            .map(|s| s.reachable)
            .unwrap_or(false);
        if !reachable {
            return Err(self.refused());
        }
        self.connected = true;
        self.failed = false;
        Ok(())
    }

    /// Pre-operation check mirroring the real client's lazy reconnect.
    fn ensure(&mut self) -> Result<NodeScript, ClientError> {
        if !self.connected || self.failed {
            self.try_connect()?;
        }
        match self.cluster.script(&self.addr) {
            Some(s) if s.reachable => Ok(s),
            _ => {
                self.failed = true;
                Err(ClientError::ConnectionClosed)
            }
        }
    }

    fn reply_for(&self, script: &NodeScript) -> ReplyMessage {
        script
            .query_reply
            .clone()
            .unwrap_or_else(|| reply_from(&self.addr))
    }
}

#[async_trait]
impl NodeConnection for MockConnection {
    async fn connect(&mut self) -> Result<(), ClientError> {
        self.try_connect()
    }

    async fn hello(&mut self) -> Result<(HelloReply, Document), ClientError> {
        self.cluster.hellos.fetch_add(1, Ordering::SeqCst);
        let script = self.ensure()?;
        self.cluster.record(&self.addr, "hello");

        let reply = HelloReply {
            set_name: script.set_name.clone(),
            ismaster: script.ismaster,
            secondary: script.secondary,
            hidden: script.hidden,
            primary: script.primary.clone(),
            hosts: script.hosts.clone(),
            passives: script.passives.clone(),
        };
        let raw = doc(serde_json::to_value(&reply).expect("hello reply serializes"));
        Ok((reply, raw))
    }

    async fn run_command(&mut self, _db: &str, cmd: Document) -> Result<Document, ClientError> {
        self.ensure()?;
        if cmd.contains_key("replSetGetStatus") {
            self.cluster.record(&self.addr, "replSetGetStatus");
            return Ok(self.cluster.status_doc());
        }
        Ok(doc(json!({ "ok": 1 })))
    }

    async fn auth(
        &mut self,
        db: &str,
        user: &str,
        _pwd: &str,
        _digest: bool,
    ) -> Result<(), ClientError> {
        let script = self.ensure()?;
        if script.fail_auth {
            return Err(ClientError::AuthFailed {
                db: db.to_string(),
                user: user.to_string(),
                msg: "scripted auth failure".to_string(),
            });
        }
        self.cluster.record(&self.addr, format!("auth {db} {user}"));
        Ok(())
    }

    async fn insert(
        &mut self,
        ns: &str,
        _docs: Vec<Document>,
        _flags: u32,
    ) -> Result<(), ClientError> {
        self.ensure()?;
        self.cluster.record(&self.addr, format!("insert {ns}"));
        Ok(())
    }

    async fn update(
        &mut self,
        ns: &str,
        _query: Document,
        _update: Document,
        _upsert: bool,
        _multi: bool,
    ) -> Result<(), ClientError> {
        self.ensure()?;
        self.cluster.record(&self.addr, format!("update {ns}"));
        Ok(())
    }

    async fn remove(
        &mut self,
        ns: &str,
        _query: Document,
        _just_one: bool,
    ) -> Result<(), ClientError> {
        self.ensure()?;
        self.cluster.record(&self.addr, format!("remove {ns}"));
        Ok(())
    }

    async fn query(&mut self, req: QueryRequest) -> Result<ReplyMessage, ClientError> {
        let script = self.ensure()?;
        self.cluster.record(&self.addr, format!("query {}", req.ns));
        Ok(self.reply_for(&script))
    }

    async fn find_one(
        &mut self,
        ns: &str,
        _query: Document,
        _fields: Option<Document>,
        _options: QueryOptions,
    ) -> Result<Option<Document>, ClientError> {
        let script = self.ensure()?;
        self.cluster.record(&self.addr, format!("findone {ns}"));
        let reply = self.reply_for(&script);
        if let Some(code) = reply.error_code() {
            return Err(ClientError::ServerError {
                code,
                msg: "scripted error reply".to_string(),
            });
        }
        Ok(reply.documents.into_iter().next())
    }

    async fn say(&mut self, _msg: &RequestMessage) -> Result<(), ClientError> {
        let script = self.ensure()?;
        self.cluster.record(&self.addr, "say");
        self.pending = Some(self.reply_for(&script));
        Ok(())
    }

    async fn recv(&mut self) -> Result<ReplyMessage, ClientError> {
        let script = self.ensure()?;
        if script.fail_recv {
            self.failed = true;
            return Err(ClientError::ConnectionClosed);
        }
        self.cluster.record(&self.addr, "recv");
        self.pending.take().ok_or(ClientError::ConnectionClosed)
    }

    async fn call(&mut self, msg: &RequestMessage) -> Result<ReplyMessage, ClientError> {
        self.say(msg).await?;
        self.recv().await
    }

    fn is_failed(&self) -> bool {
        self.failed
    }

    fn server_address(&self) -> &HostAndPort {
        &self.addr
    }
}
