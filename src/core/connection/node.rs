// src/core/connection/node.rs

//! The concrete TCP client for a single VellumDB node.

use super::{Connector, NodeConnection};
use crate::core::ClientError;
use crate::core::protocol::{
    Document, HelloReply, HostAndPort, QueryOptions, QueryRequest, ReplyMessage, RequestBody,
    RequestMessage, WireCodec,
};
use async_trait::async_trait;
use bytes::BytesMut;
use serde_json::Value;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder};

/// Bound on the initial TCP connect when no socket timeout is configured.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// A connection to one node. Reconnects lazily: any operation on a failed or
/// never-connected client first re-establishes the transport.
pub struct NodeClient {
    addr: HostAndPort,
    timeout: Option<Duration>,
    stream: Option<TcpStream>,
    codec: WireCodec,
    read_buf: BytesMut,
    failed: bool,
    next_id: u64,
}

impl NodeClient {
    pub fn new(addr: HostAndPort, timeout: Option<Duration>) -> Self {
        Self {
            addr,
            timeout,
            stream: None,
            codec: WireCodec,
            read_buf: BytesMut::with_capacity(4096),
            failed: false,
            next_id: 0,
        }
    }

    fn next_request(&mut self, body: RequestBody) -> RequestMessage {
        self.next_id += 1;
        RequestMessage::new(self.next_id, body)
    }

    async fn ensure_connected(&mut self) -> Result<(), ClientError> {
        if self.stream.is_none() || self.failed {
            self.connect().await?;
        }
        Ok(())
    }

    async fn send(&mut self, msg: &RequestMessage) -> Result<(), ClientError> {
        self.ensure_connected().await?;

        let mut write_buf = BytesMut::new();
        self.codec.encode(msg.clone(), &mut write_buf)?;

        let stream = self.stream.as_mut().ok_or(ClientError::ConnectionClosed)?;
        let result = match self.timeout {
            Some(t) => match tokio::time::timeout(t, stream.write_all(&write_buf)).await {
                Ok(r) => r.map_err(ClientError::from),
                Err(_) => Err(ClientError::Timeout(self.addr.to_string())),
            },
            None => stream.write_all(&write_buf).await.map_err(ClientError::from),
        };
        if result.is_err() {
            self.failed = true;
        }
        result
    }

    async fn read_reply(&mut self) -> Result<ReplyMessage, ClientError> {
        loop {
            if let Some(reply) = self.codec.decode(&mut self.read_buf)? {
                return Ok(reply);
            }

            let stream = self.stream.as_mut().ok_or(ClientError::ConnectionClosed)?;
            let read = stream.read_buf(&mut self.read_buf);
            let n = match self.timeout {
                Some(t) => match tokio::time::timeout(t, read).await {
                    Ok(Ok(n)) => n,
                    Ok(Err(e)) => {
                        self.failed = true;
                        return Err(e.into());
                    }
                    Err(_) => {
                        self.failed = true;
                        return Err(ClientError::Timeout(self.addr.to_string()));
                    }
                },
                None => match read.await {
                    Ok(n) => n,
                    Err(e) => {
                        self.failed = true;
                        return Err(e.into());
                    }
                },
            };
            if n == 0 {
                self.failed = true;
                return Err(ClientError::ConnectionClosed);
            }
        }
    }

    async fn round_trip(&mut self, body: RequestBody) -> Result<ReplyMessage, ClientError> {
        let msg = self.next_request(body);
        self.send(&msg).await?;
        self.read_reply().await
    }

    /// Runs a round trip and surfaces a command failure (`ok != 1`) as a
    /// server error with the peer's code and message.
    async fn command_round_trip(&mut self, body: RequestBody) -> Result<Document, ClientError> {
        let reply = self.round_trip(body).await?;
        let doc = reply
            .documents
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::Protocol("empty command reply".to_string()))?;
        Ok(doc)
    }

    fn expect_ok(doc: &Document) -> Result<(), ClientError> {
        if doc.get("ok").and_then(Value::as_f64) == Some(1.0) {
            return Ok(());
        }
        Err(ClientError::ServerError {
            code: doc.get("code").and_then(Value::as_i64).unwrap_or(0),
            msg: doc
                .get("errmsg")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        })
    }
}

#[async_trait]
impl NodeConnection for NodeClient {
    async fn connect(&mut self) -> Result<(), ClientError> {
        let connect_timeout = self.timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        let connect = TcpStream::connect((self.addr.host.as_str(), self.addr.port));
        let stream = tokio::time::timeout(connect_timeout, connect)
            .await
            .map_err(|_| ClientError::Timeout(self.addr.to_string()))??;

        self.stream = Some(stream);
        self.read_buf.clear();
        self.failed = false;
        Ok(())
    }

    async fn hello(&mut self) -> Result<(HelloReply, Document), ClientError> {
        let reply = self.round_trip(RequestBody::Hello).await?;
        let doc = reply
            .documents
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::Protocol("empty hello reply".to_string()))?;
        let hello: HelloReply = serde_json::from_value(Value::Object(doc.clone()))?;
        Ok((hello, doc))
    }

    async fn run_command(&mut self, db: &str, cmd: Document) -> Result<Document, ClientError> {
        self.command_round_trip(RequestBody::Command {
            db: db.to_string(),
            cmd,
        })
        .await
    }

    async fn auth(
        &mut self,
        db: &str,
        user: &str,
        pwd: &str,
        digest: bool,
    ) -> Result<(), ClientError> {
        let doc = self
            .command_round_trip(RequestBody::Auth {
                db: db.to_string(),
                user: user.to_string(),
                pwd: pwd.to_string(),
                digest,
            })
            .await?;
        Self::expect_ok(&doc).map_err(|e| ClientError::AuthFailed {
            db: db.to_string(),
            user: user.to_string(),
            msg: e.to_string(),
        })
    }

    async fn insert(
        &mut self,
        ns: &str,
        docs: Vec<Document>,
        flags: u32,
    ) -> Result<(), ClientError> {
        let doc = self
            .command_round_trip(RequestBody::Insert {
                ns: ns.to_string(),
                docs,
                flags,
            })
            .await?;
        Self::expect_ok(&doc)
    }

    async fn update(
        &mut self,
        ns: &str,
        query: Document,
        update: Document,
        upsert: bool,
        multi: bool,
    ) -> Result<(), ClientError> {
        let doc = self
            .command_round_trip(RequestBody::Update {
                ns: ns.to_string(),
                query,
                update,
                upsert,
                multi,
            })
            .await?;
        Self::expect_ok(&doc)
    }

    async fn remove(
        &mut self,
        ns: &str,
        query: Document,
        just_one: bool,
    ) -> Result<(), ClientError> {
        let doc = self
            .command_round_trip(RequestBody::Remove {
                ns: ns.to_string(),
                query,
                just_one,
            })
            .await?;
        Self::expect_ok(&doc)
    }

    async fn query(&mut self, req: QueryRequest) -> Result<ReplyMessage, ClientError> {
        // Error replies are returned as-is; the routing layer peeks at them.
        self.round_trip(RequestBody::Query(req)).await
    }

    async fn find_one(
        &mut self,
        ns: &str,
        query: Document,
        fields: Option<Document>,
        options: QueryOptions,
    ) -> Result<Option<Document>, ClientError> {
        let mut req = QueryRequest::new(ns, query).with_options(options);
        req.n_to_return = 1;
        req.fields = fields;

        let reply = self.query(req).await?;
        if let Some(code) = reply.error_code() {
            let msg = reply
                .documents
                .first()
                .and_then(|d| d.get("$err"))
                .and_then(Value::as_str)
                .unwrap_or("query failed")
                .to_string();
            return Err(ClientError::ServerError { code, msg });
        }
        Ok(reply.documents.into_iter().next())
    }

    async fn say(&mut self, msg: &RequestMessage) -> Result<(), ClientError> {
        self.send(msg).await
    }

    async fn recv(&mut self) -> Result<ReplyMessage, ClientError> {
        self.read_reply().await
    }

    async fn call(&mut self, msg: &RequestMessage) -> Result<ReplyMessage, ClientError> {
        self.send(msg).await?;
        self.read_reply().await
    }

    fn is_failed(&self) -> bool {
        self.failed
    }

    fn server_address(&self) -> &HostAndPort {
        &self.addr
    }
}

/// The default `Connector`, producing real TCP clients.
#[derive(Debug, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn open(&self, addr: HostAndPort, timeout: Option<Duration>) -> Box<dyn NodeConnection> {
        Box::new(NodeClient::new(addr, timeout))
    }
}
