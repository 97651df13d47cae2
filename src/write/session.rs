//! Client-side write session
//!
//! A session owns its client id and pending batch. Sessions are independent
//! values; any number can share one [`WriteService`].
//!
//! Every batch carries a sequence number that only advances after a commit
//! is acknowledged, so a resend after a lost reply is recognised by the
//! coordinator and answered with the original snapshot id.

use crate::common::{retry_with_backoff, Result, SnapshotId, NO_SNAPSHOT};
use crate::write::types::{EdgeRecordKey, Properties, VertexRecordKey, WriteBatch, WriteRequest};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// The three calls a session makes to the coordinator
#[async_trait]
pub trait WriteService: Send + Sync {
    async fn get_client_id(&self) -> Result<String>;

    async fn batch_write(&self, batch: &WriteBatch) -> Result<SnapshotId>;

    async fn remote_flush(&self, snapshot_id: SnapshotId) -> Result<()>;
}

pub struct WriteSession {
    service: Arc<dyn WriteService>,
    batch: WriteBatch,
}

impl WriteSession {
    /// Handshake with the coordinator and start with an empty batch
    pub async fn init(service: Arc<dyn WriteService>) -> Result<Self> {
        let client_id = service.get_client_id().await?;
        tracing::debug!("Write session {} opened", client_id);
        Ok(Self {
            service,
            batch: WriteBatch::new(client_id).with_seq(1),
        })
    }

    /// Fresh handshake; pending requests are dropped
    pub async fn reinit(&mut self) -> Result<()> {
        let client_id = self.service.get_client_id().await?;
        self.batch = WriteBatch::new(client_id).with_seq(1);
        Ok(())
    }

    pub fn client_id(&self) -> &str {
        &self.batch.client_id
    }

    /// Sequence number the pending batch will be sent with
    pub fn seq(&self) -> u64 {
        self.batch.seq
    }

    pub fn pending(&self) -> &[WriteRequest] {
        &self.batch.requests
    }

    pub fn add(&mut self, request: WriteRequest) {
        self.batch.requests.push(request);
    }

    pub fn add_vertex(&mut self, key: VertexRecordKey, properties: Properties) {
        self.add(WriteRequest::InsertVertex { key, properties });
    }

    pub fn add_edge(&mut self, key: EdgeRecordKey, properties: Properties) {
        self.add(WriteRequest::InsertEdge { key, properties });
    }

    /// Send the pending batch as one unit.
    ///
    /// Returns 0 without contacting the coordinator when nothing is pending.
    /// On failure the batch is left as it was so the caller can retry.
    pub async fn commit(&mut self) -> Result<SnapshotId> {
        if self.batch.is_empty() {
            return Ok(NO_SNAPSHOT);
        }
        let snapshot_id = self.service.batch_write(&self.batch).await?;
        self.advance();
        Ok(snapshot_id)
    }

    /// [`commit`](Self::commit), retrying retryable failures with backoff
    pub async fn commit_with_retry(&mut self, attempts: usize) -> Result<SnapshotId> {
        if self.batch.is_empty() {
            return Ok(NO_SNAPSHOT);
        }
        let service = &self.service;
        let batch = &self.batch;
        let snapshot_id = retry_with_backoff(
            move || service.batch_write(batch),
            attempts.max(1),
            Duration::from_millis(100),
        )
        .await?;
        self.advance();
        Ok(snapshot_id)
    }

    fn advance(&mut self) {
        self.batch.requests.clear();
        self.batch.seq += 1;
    }

    pub async fn remote_flush(&self, snapshot_id: SnapshotId) -> Result<()> {
        self.service.remote_flush(snapshot_id).await
    }
}
