// src/core/protocol/message.rs

//! Request and reply envelopes exchanged with a single node.

use super::{Document, NOT_PRIMARY_OR_SECONDARY, QueryOptions};
use serde::{Deserialize, Serialize};

/// The operation carried by a request message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RequestBody {
    /// The `hello` handshake used for discovery and role inspection.
    Hello,
    /// An arbitrary database command run against `db`.
    Command { db: String, cmd: Document },
    /// Authenticate against `db`. When `digest` is set the password has been
    /// pre-digested by the caller.
    Auth {
        db: String,
        user: String,
        pwd: String,
        digest: bool,
    },
    Insert {
        ns: String,
        docs: Vec<Document>,
        flags: u32,
    },
    Update {
        ns: String,
        query: Document,
        update: Document,
        upsert: bool,
        multi: bool,
    },
    Remove {
        ns: String,
        query: Document,
        just_one: bool,
    },
    Query(QueryRequest),
    KillCursor {
        cursor_id: i64,
    },
}

/// A read request. `options` carries the routing-relevant `SLAVE_OK` bit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub ns: String,
    pub query: Document,
    #[serde(default)]
    pub n_to_return: i32,
    #[serde(default)]
    pub n_to_skip: i32,
    #[serde(default)]
    pub fields: Option<Document>,
    #[serde(default)]
    pub options: QueryOptions,
    #[serde(default)]
    pub batch_size: i32,
}

impl QueryRequest {
    pub fn new(ns: impl Into<String>, query: Document) -> Self {
        Self {
            ns: ns.into(),
            query,
            n_to_return: 0,
            n_to_skip: 0,
            fields: None,
            options: QueryOptions::empty(),
            batch_size: 0,
        }
    }

    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }
}

/// A framed request as sent on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMessage {
    pub id: u64,
    pub body: RequestBody,
}

impl RequestMessage {
    pub fn new(id: u64, body: RequestBody) -> Self {
        Self { id, body }
    }

    pub fn is_query(&self) -> bool {
        matches!(self.body, RequestBody::Query(_))
    }

    /// True for a query whose options permit routing to a secondary.
    pub fn is_slave_ok_query(&self) -> bool {
        match &self.body {
            RequestBody::Query(q) => q.options.contains(QueryOptions::SLAVE_OK),
            _ => false,
        }
    }
}

/// A framed reply. Error replies carry a single document with an `$err`
/// field and a numeric `code`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyMessage {
    pub responding_to: u64,
    pub n_returned: i64,
    pub documents: Vec<Document>,
    #[serde(default)]
    pub cursor_id: i64,
}

impl ReplyMessage {
    /// The error code of the first document, when the reply is an error reply.
    pub fn error_code(&self) -> Option<i64> {
        let doc = self.documents.first()?;
        if !doc.contains_key("$err") {
            return None;
        }
        doc.get("code")?.as_i64()
    }

    /// True when the reply signals that the member is neither primary nor a
    /// usable secondary.
    pub fn is_not_primary_or_secondary(&self) -> bool {
        self.error_code() == Some(NOT_PRIMARY_OR_SECONDARY)
    }
}
