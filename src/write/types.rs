//! Write request model

use crate::common::blake3_hash;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Properties attached to a vertex or edge
pub type Properties = BTreeMap<String, Value>;

/// Identity of a vertex: its label plus primary-key values
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VertexRecordKey {
    pub label: String,
    pub primary_keys: BTreeMap<String, String>,
}

impl VertexRecordKey {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            primary_keys: BTreeMap::new(),
        }
    }

    pub fn with_key(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.primary_keys.insert(name.into(), value.into());
        self
    }

    /// Canonical string used for partition hashing
    pub fn routing_key(&self) -> String {
        let mut key = self.label.clone();
        for (name, value) in &self.primary_keys {
            key.push('|');
            key.push_str(name);
            key.push('=');
            key.push_str(value);
        }
        key
    }
}

/// Identity of an edge: label plus both endpoints
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeRecordKey {
    pub label: String,
    pub src: VertexRecordKey,
    pub dst: VertexRecordKey,
}

impl EdgeRecordKey {
    pub fn new(label: impl Into<String>, src: VertexRecordKey, dst: VertexRecordKey) -> Self {
        Self {
            label: label.into(),
            src,
            dst,
        }
    }
}

/// One mutation inside a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WriteRequest {
    InsertVertex {
        key: VertexRecordKey,
        #[serde(default)]
        properties: Properties,
    },
    InsertEdge {
        key: EdgeRecordKey,
        #[serde(default)]
        properties: Properties,
    },
}

impl WriteRequest {
    /// Key deciding the partition. Edges are stored with their source vertex.
    pub fn routing_key(&self) -> String {
        match self {
            WriteRequest::InsertVertex { key, .. } => key.routing_key(),
            WriteRequest::InsertEdge { key, .. } => key.src.routing_key(),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            WriteRequest::InsertVertex { key, .. } => &key.label,
            WriteRequest::InsertEdge { key, .. } => &key.label,
        }
    }
}

/// A client's batch, committed as one atomic unit.
///
/// `seq` numbers a session's batches from 1. A resend with the seq of the
/// client's last committed batch gets that batch's snapshot id back instead
/// of being applied again; 0 opts out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteBatch {
    pub client_id: String,
    #[serde(default)]
    pub seq: u64,
    pub requests: Vec<WriteRequest>,
}

impl WriteBatch {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            seq: 0,
            requests: Vec::new(),
        }
    }

    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = seq;
        self
    }

    /// Content hash of the requests, used to tell a resend from a reused seq
    pub fn digest(&self) -> crate::Result<String> {
        Ok(blake3_hash(&serde_json::to_vec(&self.requests)?))
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }
}
