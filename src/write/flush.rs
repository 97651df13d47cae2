//! Remote flush barrier

use crate::common::{MetricsRegistry, PartitionId, Result, SnapshotId, NO_SNAPSHOT};
use crate::executor::routing::RoutingTable;
use crate::write::dispatch::PartitionDispatcher;
use crate::write::tracker::SnapshotTracker;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Blocks callers until a snapshot has been applied by every partition that
/// took part in it.
///
/// Owners are re-resolved from the routing table on every polling round, so
/// a partition that moves mid-wait is asked at its new home.
pub struct FlushBarrier {
    routing: Arc<RoutingTable>,
    dispatcher: Arc<dyn PartitionDispatcher>,
    tracker: Arc<SnapshotTracker>,
    metrics: Arc<MetricsRegistry>,
    timeout: Duration,
    poll_interval: Duration,
}

impl FlushBarrier {
    pub fn new(
        routing: Arc<RoutingTable>,
        dispatcher: Arc<dyn PartitionDispatcher>,
        tracker: Arc<SnapshotTracker>,
        metrics: Arc<MetricsRegistry>,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            routing,
            dispatcher,
            tracker,
            metrics,
            timeout,
            poll_interval,
        }
    }

    pub async fn remote_flush(&self, snapshot_id: SnapshotId) -> Result<()> {
        if snapshot_id == NO_SNAPSHOT {
            return Ok(());
        }

        let mut pending = self.tracker.required_for(snapshot_id);
        let deadline = Instant::now() + self.timeout;
        tracing::debug!(
            "Flushing snapshot {} across {} partitions",
            snapshot_id,
            pending.len()
        );

        loop {
            self.poll_round(&mut pending, deadline).await;
            if pending.is_empty() {
                break;
            }
            if Instant::now() >= deadline {
                let partition = pending.keys().next().copied().unwrap_or_default();
                self.metrics.flush_timeouts.inc();
                tracing::warn!(
                    "Flush of snapshot {} timed out; {} partitions still behind (first: {})",
                    snapshot_id,
                    pending.len(),
                    partition
                );
                return Err(crate::Error::FlushTimeout {
                    snapshot_id,
                    partition,
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        self.tracker.prune_through(snapshot_id);
        self.metrics.flushes_total.inc();
        tracing::debug!("Snapshot {} flushed", snapshot_id);
        Ok(())
    }

    /// Ask every pending partition's current owner once, dropping those that
    /// caught up
    async fn poll_round(&self, pending: &mut BTreeMap<PartitionId, SnapshotId>, deadline: Instant) {
        let mut caught_up = Vec::new();
        for (&pid, &required) in pending.iter() {
            let owner = match self.routing.get(pid) {
                Ok(p) => p.owner,
                Err(e) => {
                    tracing::debug!("Flush: {}", e);
                    continue;
                }
            };
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, self.dispatcher.applied_snapshot(&owner, pid)).await {
                Ok(Ok(applied)) if applied >= required => caught_up.push(pid),
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::debug!("Flush: partition {} on {}: {}", pid, owner, e),
                Err(_) => break,
            }
        }
        for pid in caught_up {
            pending.remove(&pid);
        }
    }
}
