//! Server side of the write protocol
//!
//! Batches are stamped with a snapshot id and fanned out to partition owners
//! in two phases. The commit lock is held across the whole fan-out so batches
//! are totally ordered and a rejected batch never consumes an id.
//!
//! Once the watermark is persisted the snapshot is durable. Owners that miss
//! the commit decision are recorded as in doubt and re-driven until they
//! acknowledge; until then no later batch may touch their partitions.

use crate::common::{
    generate_client_id, partition_for_key, retry_with_backoff, MetricsRegistry, NodeId,
    PartitionId, Result, SnapshotId, NO_SNAPSHOT,
};
use crate::executor::engine::ExecutorEngine;
use crate::write::dispatch::{PartitionDispatcher, SubBatch};
use crate::write::flush::FlushBarrier;
use crate::write::recovery::{InDoubtCommit, InDoubtSet};
use crate::write::session::WriteService;
use crate::write::tracker::SnapshotTracker;
use crate::write::types::WriteBatch;
use async_trait::async_trait;
use futures_util::future::join_all;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

const COMMIT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Last batch a client got committed
#[derive(Debug, Clone)]
struct CommittedBatch {
    seq: u64,
    digest: String,
    snapshot_id: SnapshotId,
}

pub struct WriteCoordinator {
    engine: Arc<ExecutorEngine>,
    dispatcher: Arc<dyn PartitionDispatcher>,
    tracker: Arc<SnapshotTracker>,
    metrics: Arc<MetricsRegistry>,
    flush: FlushBarrier,
    clients: RwLock<HashMap<String, Option<CommittedBatch>>>,
    /// Last durable snapshot id
    commit_lock: tokio::sync::Mutex<SnapshotId>,
    in_doubt: Mutex<InDoubtSet>,
    num_partitions: u32,
    dispatch_timeout: Duration,
    commit_retries: usize,
}

impl WriteCoordinator {
    /// Build over an initialized engine, resuming from the persisted watermark
    /// and any commits still in doubt
    pub fn new(
        engine: Arc<ExecutorEngine>,
        dispatcher: Arc<dyn PartitionDispatcher>,
        metrics: Arc<MetricsRegistry>,
        config: &crate::common::CoordinatorConfig,
    ) -> Result<Self> {
        let metadata = engine.metadata()?;
        let last = metadata.last_snapshot()?;
        let in_doubt = InDoubtSet::new(metadata.list_in_doubt()?);
        metrics.last_snapshot_id.set(last);
        metrics.commits_in_doubt.set(in_doubt.len() as u64);

        let tracker = Arc::new(SnapshotTracker::new());
        for commit in in_doubt.iter() {
            tracing::warn!(
                "Snapshot {} still in doubt on {} owners",
                commit.snapshot_id,
                commit.owners.len()
            );
            tracker.record(commit.snapshot_id, commit.partitions());
        }
        let flush = FlushBarrier::new(
            engine.routing(),
            dispatcher.clone(),
            tracker.clone(),
            metrics.clone(),
            config.flush_timeout(),
            config.flush_poll_interval(),
        );
        Ok(Self {
            engine,
            dispatcher,
            tracker,
            metrics,
            flush,
            clients: RwLock::new(HashMap::new()),
            commit_lock: tokio::sync::Mutex::new(last),
            in_doubt: Mutex::new(in_doubt),
            num_partitions: config.num_partitions,
            dispatch_timeout: config.dispatch_timeout(),
            commit_retries: config.commit_retries,
        })
    }

    /// Issue a new client id for a write session
    pub fn get_client_id(&self) -> String {
        let id = generate_client_id();
        self.clients
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), None);
        tracing::debug!("Issued client id {}", id);
        id
    }

    fn is_known_client(&self, client_id: &str) -> bool {
        self.clients
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(client_id)
    }

    fn in_doubt(&self) -> MutexGuard<'_, InDoubtSet> {
        self.in_doubt.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Last snapshot id made durable
    pub async fn last_snapshot(&self) -> SnapshotId {
        *self.commit_lock.lock().await
    }

    /// Durable snapshots some owner has not yet acknowledged
    pub fn in_doubt_count(&self) -> usize {
        self.in_doubt().len()
    }

    /// Run `f` with no batch in flight, passing the last durable snapshot id
    pub async fn checkpoint<R>(&self, f: impl FnOnce(SnapshotId) -> R) -> R {
        let guard = self.commit_lock.lock().await;
        f(*guard)
    }

    /// Raise the watermark after a restore; ids never move backward.
    /// Commits in doubt before the restore are dropped with the old state.
    pub async fn restore_watermark(&self, snapshot_id: SnapshotId) -> Result<()> {
        let mut last = self.commit_lock.lock().await;
        let metadata = self.engine.metadata()?;
        if snapshot_id > *last {
            metadata.put_last_snapshot(snapshot_id)?;
            *last = snapshot_id;
            self.metrics.last_snapshot_id.set(snapshot_id);
        }
        let dropped: Vec<SnapshotId> = self.in_doubt().iter().map(|c| c.snapshot_id).collect();
        for id in dropped {
            metadata.delete_in_doubt(id)?;
        }
        self.in_doubt().clear();
        self.metrics.commits_in_doubt.set(0);
        self.tracker.clear();
        Ok(())
    }

    pub async fn remote_flush(&self, snapshot_id: SnapshotId) -> Result<()> {
        self.flush.remote_flush(snapshot_id).await
    }

    /// Re-deliver in-doubt commits; returns how many snapshots remain in doubt
    pub async fn recover_in_doubt(&self) -> usize {
        let _guard = self.commit_lock.lock().await;
        self.redeliver().await;
        self.in_doubt_count()
    }

    /// Keep re-driving in-doubt commits every `interval`
    pub fn spawn_redelivery(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let writes = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if writes.in_doubt_count() > 0 {
                    let remaining = writes.recover_in_doubt().await;
                    if remaining > 0 {
                        tracing::debug!("{} snapshots still in doubt", remaining);
                    }
                }
            }
        })
    }

    /// Group requests by owner, then by partition
    fn route(&self, batch: &WriteBatch) -> Result<BTreeMap<NodeId, SubBatch>> {
        let routing = self.engine.routing().snapshot();
        let mut by_owner: BTreeMap<NodeId, SubBatch> = BTreeMap::new();
        for req in &batch.requests {
            let pid = partition_for_key(&req.routing_key(), self.num_partitions);
            let owner = routing
                .get(&pid)
                .map(|p| p.owner.clone())
                .ok_or(crate::Error::PartitionNotFound(pid))?;
            by_owner
                .entry(owner)
                .or_default()
                .entry(pid)
                .or_default()
                .push(req.clone());
        }
        Ok(by_owner)
    }

    /// The snapshot id of an already committed resend of `batch`
    fn replayed(&self, batch: &WriteBatch, digest: &str) -> Result<Option<SnapshotId>> {
        if batch.seq == 0 {
            return Ok(None);
        }
        let clients = self.clients.read().unwrap_or_else(|e| e.into_inner());
        let Some(Some(last)) = clients.get(&batch.client_id) else {
            return Ok(None);
        };
        if batch.seq > last.seq {
            return Ok(None);
        }
        if batch.seq == last.seq && last.digest == digest {
            return Ok(Some(last.snapshot_id));
        }
        Err(crate::Error::InvalidState {
            expected: format!("batch seq above {} for {}", last.seq, batch.client_id),
            actual: format!("seq {} with different content", batch.seq),
        })
    }

    fn remember(&self, batch: &WriteBatch, digest: String, snapshot_id: SnapshotId) {
        if batch.seq == 0 {
            return;
        }
        if let Some(slot) = self
            .clients
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(&batch.client_id)
        {
            *slot = Some(CommittedBatch {
                seq: batch.seq,
                digest,
                snapshot_id,
            });
        }
    }

    /// Commit one batch atomically; returns its snapshot id (0 if empty).
    ///
    /// A resend of the client's last committed batch returns the original id.
    pub async fn batch_write(&self, batch: &WriteBatch) -> Result<SnapshotId> {
        self.engine.ensure_serving()?;
        if !self.is_known_client(&batch.client_id) {
            return Err(crate::Error::UnknownClient(batch.client_id.clone()));
        }
        if batch.is_empty() {
            return Ok(NO_SNAPSHOT);
        }

        let started = Instant::now();
        let digest = batch.digest()?;
        let mut last = self.commit_lock.lock().await;
        if let Some(snapshot_id) = self.replayed(batch, &digest)? {
            tracing::debug!(
                "Batch {} from {} already committed at snapshot {}",
                batch.seq,
                batch.client_id,
                snapshot_id
            );
            return Ok(snapshot_id);
        }
        let snapshot_id = *last + 1;

        let by_owner = self.route(batch)?;
        let partitions: BTreeSet<PartitionId> = by_owner
            .values()
            .flat_map(|sub| sub.keys().copied())
            .collect();

        self.redeliver().await;
        let blocked = self.in_doubt().blocking(&partitions);
        if let Some((held, partition)) = blocked {
            self.metrics.record_commit(started.elapsed(), batch.len(), false);
            return Err(crate::Error::BatchRejected {
                snapshot_id,
                partition,
                reason: format!("snapshot {} is not yet committed there", held),
            });
        }

        if let Err(e) = self.prepare_all(snapshot_id, &by_owner).await {
            self.abort_all(snapshot_id, by_owner.keys()).await;
            self.metrics.record_commit(started.elapsed(), batch.len(), false);
            tracing::warn!("Batch from {} rejected: {}", batch.client_id, e);
            return Err(e);
        }

        // Commit point
        if let Err(e) = self
            .engine
            .metadata()
            .and_then(|m| m.put_last_snapshot(snapshot_id))
        {
            self.abort_all(snapshot_id, by_owner.keys()).await;
            self.metrics.record_commit(started.elapsed(), batch.len(), false);
            return Err(e);
        }
        *last = snapshot_id;
        self.tracker.record(snapshot_id, partitions.iter().copied());
        self.metrics.last_snapshot_id.set(snapshot_id);
        self.remember(batch, digest, snapshot_id);

        let undelivered = self.commit_all(snapshot_id, &by_owner).await;
        if !undelivered.is_empty() {
            self.hold_in_doubt(undelivered);
        }

        self.metrics.record_commit(started.elapsed(), batch.len(), true);
        tracing::debug!(
            "Snapshot {} committed ({} requests, {} partitions, {} owners)",
            snapshot_id,
            batch.len(),
            partitions.len(),
            by_owner.len()
        );
        Ok(snapshot_id)
    }

    async fn prepare_all(
        &self,
        snapshot_id: SnapshotId,
        by_owner: &BTreeMap<NodeId, SubBatch>,
    ) -> Result<()> {
        let calls = by_owner.iter().map(|(node, sub)| {
            let partition = sub.keys().next().copied().unwrap_or_default();
            let fut = self.dispatcher.prepare(node, snapshot_id, sub.clone());
            async move {
                let outcome = match tokio::time::timeout(self.dispatch_timeout, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(crate::Error::Unreachable {
                        node: node.clone(),
                        partition,
                        reason: "prepare timed out".into(),
                    }),
                };
                outcome.map_err(|e| (partition, e))
            }
        });

        for result in join_all(calls).await {
            if let Err((partition, e)) = result {
                return Err(match e {
                    rejected @ crate::Error::BatchRejected { .. } => rejected,
                    other => crate::Error::BatchRejected {
                        snapshot_id,
                        partition,
                        reason: other.to_string(),
                    },
                });
            }
        }
        Ok(())
    }

    async fn abort_all<'a>(&self, snapshot_id: SnapshotId, nodes: impl Iterator<Item = &'a NodeId>) {
        let calls = nodes.map(|node| async move {
            match tokio::time::timeout(self.dispatch_timeout, self.dispatcher.abort(node, snapshot_id)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("Abort of snapshot {} on {} failed: {}", snapshot_id, node, e),
                Err(_) => tracing::warn!("Abort of snapshot {} on {} timed out", snapshot_id, node),
            }
        });
        join_all(calls).await;
    }

    async fn deliver_commit(&self, node: &NodeId, snapshot_id: SnapshotId) -> Result<()> {
        tokio::time::timeout(self.dispatch_timeout, self.dispatcher.commit(node, snapshot_id))
            .await
            .map_err(|_| crate::Error::Timeout(format!("commit on {}", node)))?
    }

    /// Deliver the commit decision to every owner; returns the owners that
    /// never acknowledged
    async fn commit_all(
        &self,
        snapshot_id: SnapshotId,
        by_owner: &BTreeMap<NodeId, SubBatch>,
    ) -> InDoubtCommit {
        let calls = by_owner.iter().map(|(node, sub)| async move {
            let result = retry_with_backoff(
                move || self.deliver_commit(node, snapshot_id),
                self.commit_retries,
                COMMIT_RETRY_DELAY,
            )
            .await;
            (node, sub, result)
        });

        let mut undelivered = InDoubtCommit::new(snapshot_id);
        for (node, sub, result) in join_all(calls).await {
            if let Err(e) = result {
                let failed = crate::Error::CommitFailed {
                    snapshot_id,
                    node: node.clone(),
                    reason: e.to_string(),
                };
                tracing::warn!("{}; holding partitions {:?} for re-delivery", failed, sub.keys());
                undelivered.add(node.clone(), sub.keys().copied());
            }
        }
        undelivered
    }

    fn hold_in_doubt(&self, commit: InDoubtCommit) {
        if let Err(e) = self
            .engine
            .metadata()
            .and_then(|m| m.put_in_doubt(&commit))
        {
            tracing::error!(
                "Failed to persist in-doubt snapshot {}: {}",
                commit.snapshot_id,
                e
            );
        }
        let mut in_doubt = self.in_doubt();
        in_doubt.insert(commit);
        self.metrics.commits_in_doubt.set(in_doubt.len() as u64);
    }

    /// One delivery attempt per in-doubt owner, oldest snapshot first.
    /// Callers hold the commit lock.
    async fn redeliver(&self) {
        let pending: Vec<InDoubtCommit> = self.in_doubt().iter().cloned().collect();
        for commit in pending {
            let snapshot_id = commit.snapshot_id;
            for node in commit.owners.keys() {
                if let Err(e) = self.deliver_commit(node, snapshot_id).await {
                    tracing::debug!("Snapshot {} still in doubt on {}: {}", snapshot_id, node, e);
                    continue;
                }
                let remaining = self.in_doubt().acknowledge(snapshot_id, node).cloned();
                let persisted = self.engine.metadata().and_then(|m| match &remaining {
                    Some(rest) => m.put_in_doubt(rest),
                    None => m.delete_in_doubt(snapshot_id),
                });
                if let Err(e) = persisted {
                    tracing::error!("Failed to record delivery of snapshot {}: {}", snapshot_id, e);
                }
                self.metrics.commits_redelivered.inc();
                tracing::info!("Snapshot {} delivered to {} after retry", snapshot_id, node);
            }
        }
        self.metrics.commits_in_doubt.set(self.in_doubt_count() as u64);
    }
}

#[async_trait]
impl WriteService for WriteCoordinator {
    async fn get_client_id(&self) -> Result<String> {
        Ok(WriteCoordinator::get_client_id(self))
    }

    async fn batch_write(&self, batch: &WriteBatch) -> Result<SnapshotId> {
        WriteCoordinator::batch_write(self, batch).await
    }

    async fn remote_flush(&self, snapshot_id: SnapshotId) -> Result<()> {
        WriteCoordinator::remote_flush(self, snapshot_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::CoordinatorConfig;
    use crate::executor::routing::RoutingTable;
    use crate::store::MemoryStoreCluster;
    use crate::write::types::{VertexRecordKey, WriteRequest};

    struct Fixture {
        engine: Arc<ExecutorEngine>,
        cluster: Arc<MemoryStoreCluster>,
        coordinator: WriteCoordinator,
    }

    fn fixture(nodes: &[&str]) -> Fixture {
        let config = CoordinatorConfig {
            num_partitions: 8,
            flush_timeout_ms: 300,
            flush_poll_interval_ms: 5,
            commit_retries: 2,
            ..Default::default()
        };
        let metrics = Arc::new(MetricsRegistry::new());
        let engine = Arc::new(ExecutorEngine::new(
            NodeId::from("coord"),
            config.clone(),
            Arc::new(RoutingTable::new()),
            metrics.clone(),
        ));
        let ids: Vec<NodeId> = nodes.iter().map(|n| NodeId::from(*n)).collect();
        engine.init().unwrap();
        engine.bootstrap(&ids).unwrap();
        engine.start().unwrap();

        let cluster = Arc::new(MemoryStoreCluster::with_nodes(&ids));
        let coordinator =
            WriteCoordinator::new(engine.clone(), cluster.clone(), metrics, &config).unwrap();
        Fixture {
            engine,
            cluster,
            coordinator,
        }
    }

    fn batch(client_id: &str, ids: &[&str]) -> WriteBatch {
        WriteBatch {
            client_id: client_id.to_string(),
            seq: 0,
            requests: ids
                .iter()
                .map(|id| WriteRequest::InsertVertex {
                    key: VertexRecordKey::new("Person").with_key("id", *id),
                    properties: Default::default(),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_unknown_client_rejected() {
        let f = fixture(&["a"]);
        let err = f.coordinator.batch_write(&batch("nobody", &["1"])).await.unwrap_err();
        assert!(matches!(err, crate::Error::UnknownClient(_)));
    }

    #[tokio::test]
    async fn test_empty_batch_makes_no_calls() {
        let f = fixture(&["a"]);
        let client = f.coordinator.get_client_id();
        assert_eq!(f.coordinator.batch_write(&batch(&client, &[])).await.unwrap(), 0);
        assert_eq!(f.cluster.call_count(), 0);
    }

    #[tokio::test]
    async fn test_ids_strictly_increase() {
        let f = fixture(&["a", "b"]);
        let client = f.coordinator.get_client_id();
        let first = f.coordinator.batch_write(&batch(&client, &["1", "2", "3"])).await.unwrap();
        let second = f.coordinator.batch_write(&batch(&client, &["4"])).await.unwrap();
        assert_eq!(first, 1);
        assert!(second > first);
        assert_eq!(f.engine.metadata().unwrap().last_snapshot().unwrap(), second);
    }

    #[tokio::test]
    async fn test_failed_prepare_rejects_whole_batch() {
        let f = fixture(&["a", "b"]);
        let client = f.coordinator.get_client_id();
        f.cluster.set_reject_prepare(&NodeId::from("b"), true);

        let ids: Vec<String> = (0..32).map(|i| i.to_string()).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let err = f.coordinator.batch_write(&batch(&client, &refs)).await.unwrap_err();
        assert!(matches!(err, crate::Error::BatchRejected { snapshot_id: 1, .. }));

        // Nothing left staged, nothing applied, id not consumed
        assert!(f.cluster.prepared_on(&NodeId::from("a")).is_empty());
        assert!((0..8).all(|pid| f.cluster.partition(pid).is_none()));
        f.cluster.set_reject_prepare(&NodeId::from("b"), false);
        assert_eq!(f.coordinator.batch_write(&batch(&client, &refs)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_writes_refused_when_not_serving() {
        let f = fixture(&["a"]);
        let client = f.coordinator.get_client_id();
        f.engine.stop();
        let err = f.coordinator.batch_write(&batch(&client, &["1"])).await.unwrap_err();
        assert!(matches!(err, crate::Error::NotServing(_)));
    }

    #[tokio::test]
    async fn test_flush_waits_for_slow_owner() {
        let f = fixture(&["a", "b"]);
        let client = f.coordinator.get_client_id();
        f.cluster
            .set_apply_delay(&NodeId::from("b"), Duration::from_millis(60));

        let ids: Vec<String> = (0..16).map(|i| i.to_string()).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let id = f.coordinator.batch_write(&batch(&client, &refs)).await.unwrap();

        f.coordinator.remote_flush(id).await.unwrap();
        for pid in f.engine.routing().owned_by(&NodeId::from("b")) {
            if let Some(data) = f.cluster.partition(pid) {
                assert!(data.applied >= id);
            }
        }
    }

    #[tokio::test]
    async fn test_flush_times_out_on_lagging_owner() {
        let f = fixture(&["a"]);
        let client = f.coordinator.get_client_id();
        f.cluster
            .set_apply_delay(&NodeId::from("a"), Duration::from_secs(5));
        let id = f.coordinator.batch_write(&batch(&client, &["1"])).await.unwrap();

        let err = f.coordinator.remote_flush(id).await.unwrap_err();
        assert!(matches!(err, crate::Error::FlushTimeout { snapshot_id, .. } if snapshot_id == id));
        assert!(err.is_retryable());
        f.coordinator.remote_flush(0).await.unwrap();
    }

    fn vertices_applied(cluster: &MemoryStoreCluster) -> usize {
        (0..8)
            .filter_map(|pid| cluster.partition(pid))
            .map(|data| data.vertices.len())
            .sum()
    }

    #[tokio::test]
    async fn test_resend_returns_original_snapshot() {
        let f = fixture(&["a", "b"]);
        let client = f.coordinator.get_client_id();
        let first = batch(&client, &["1", "2"]).with_seq(1);

        assert_eq!(f.coordinator.batch_write(&first).await.unwrap(), 1);
        let calls = f.cluster.call_count();
        assert_eq!(f.coordinator.batch_write(&first).await.unwrap(), 1);
        assert_eq!(f.cluster.call_count(), calls);

        let reused = batch(&client, &["3"]).with_seq(1);
        let err = f.coordinator.batch_write(&reused).await.unwrap_err();
        assert!(matches!(err, crate::Error::InvalidState { .. }));

        let next = batch(&client, &["3"]).with_seq(2);
        assert_eq!(f.coordinator.batch_write(&next).await.unwrap(), 2);
        assert_eq!(f.coordinator.last_snapshot().await, 2);
    }

    #[tokio::test]
    async fn test_undelivered_commit_is_redriven() {
        let f = fixture(&["a", "b"]);
        let client = f.coordinator.get_client_id();
        let b = NodeId::from("b");
        f.cluster.set_fail_commit(&b, true);

        let ids: Vec<String> = (0..40).map(|i| i.to_string()).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let id = f.coordinator.batch_write(&batch(&client, &refs)).await.unwrap();
        assert_eq!(id, 1);

        // Durable but not delivered to b: held, persisted and not flushable
        assert_eq!(f.coordinator.in_doubt_count(), 1);
        let held = f.engine.metadata().unwrap().list_in_doubt().unwrap();
        assert_eq!(held[0].snapshot_id, 1);
        assert!(held[0].owners.contains_key(&b));
        assert!(vertices_applied(&f.cluster) < 40);
        let err = f.coordinator.remote_flush(id).await.unwrap_err();
        assert!(matches!(err, crate::Error::FlushTimeout { snapshot_id: 1, .. }));

        // Later batches may not overtake it on b's partitions
        let more: Vec<String> = (100..140).map(|i| i.to_string()).collect();
        let more_refs: Vec<&str> = more.iter().map(String::as_str).collect();
        let err = f.coordinator.batch_write(&batch(&client, &more_refs)).await.unwrap_err();
        assert!(matches!(err, crate::Error::BatchRejected { snapshot_id: 2, .. }));
        assert!(err.is_retryable());

        f.cluster.set_fail_commit(&b, false);
        assert_eq!(f.coordinator.recover_in_doubt().await, 0);
        assert!(f.engine.metadata().unwrap().list_in_doubt().unwrap().is_empty());
        f.coordinator.remote_flush(id).await.unwrap();
        assert_eq!(vertices_applied(&f.cluster), 40);

        assert_eq!(f.coordinator.batch_write(&batch(&client, &more_refs)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_next_batch_redrives_before_dispatch() {
        let f = fixture(&["a", "b"]);
        let client = f.coordinator.get_client_id();
        let b = NodeId::from("b");
        f.cluster.set_fail_commit(&b, true);

        let ids: Vec<String> = (0..40).map(|i| i.to_string()).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        f.coordinator.batch_write(&batch(&client, &refs)).await.unwrap();
        assert_eq!(f.coordinator.in_doubt_count(), 1);

        f.cluster.set_fail_commit(&b, false);
        let second = f.coordinator.batch_write(&batch(&client, &refs)).await.unwrap();
        assert_eq!(second, 2);
        assert_eq!(f.coordinator.in_doubt_count(), 0);
        f.coordinator.remote_flush(second).await.unwrap();
        assert_eq!(vertices_applied(&f.cluster), 40);
    }
}
