//! Executor engine
//!
//! Owns the partition set and the engine lifecycle, and is the only writer of
//! the [`RoutingTable`]. Routing updates are serialized through one lock so
//! the persisted order always matches the applied order.

use crate::common::storage::open_backend;
use crate::common::{CoordinatorConfig, Epoch, MetricsRegistry, NodeId, PartitionId, Result};
use crate::coordinator::metadata::MetadataStore;
use crate::executor::membership::{plan_reassignments, MembershipEvent, Reassignment};
use crate::executor::placement::{self, PlacementStrategy};
use crate::executor::routing::{Partition, RoutingTable};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, RwLock};

/// Engine lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Created,
    Initialized,
    Running,
    Stopped,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Created => write!(f, "created"),
            EngineState::Initialized => write!(f, "initialized"),
            EngineState::Running => write!(f, "running"),
            EngineState::Stopped => write!(f, "stopped"),
        }
    }
}

pub struct ExecutorEngine {
    node_id: NodeId,
    config: CoordinatorConfig,
    routing: Arc<RoutingTable>,
    placement: Box<dyn PlacementStrategy>,
    metrics: Arc<MetricsRegistry>,
    metadata: OnceLock<Arc<MetadataStore>>,
    state: Mutex<EngineState>,
    local_partitions: RwLock<BTreeSet<PartitionId>>,
    live_nodes: RwLock<BTreeSet<NodeId>>,
    /// Partitions whose owner left while no live node could take them
    stranded: Mutex<BTreeSet<PartitionId>>,
    update_lock: Mutex<()>,
}

impl ExecutorEngine {
    pub fn new(
        node_id: NodeId,
        config: CoordinatorConfig,
        routing: Arc<RoutingTable>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let placement = placement::from_policy(config.placement);
        Self::with_placement(node_id, config, routing, metrics, placement)
    }

    pub fn with_placement(
        node_id: NodeId,
        config: CoordinatorConfig,
        routing: Arc<RoutingTable>,
        metrics: Arc<MetricsRegistry>,
        placement: Box<dyn PlacementStrategy>,
    ) -> Self {
        Self {
            node_id,
            config,
            routing,
            placement,
            metrics,
            metadata: OnceLock::new(),
            state: Mutex::new(EngineState::Created),
            local_partitions: RwLock::new(BTreeSet::new()),
            live_nodes: RwLock::new(BTreeSet::new()),
            stranded: Mutex::new(BTreeSet::new()),
            update_lock: Mutex::new(()),
        }
    }

    fn state_guard(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // === Lifecycle ===

    /// Open the metadata store and reload persisted routing.
    ///
    /// Any failure here is fatal: the engine stays in `Created` and refuses
    /// to start.
    pub fn init(&self) -> Result<()> {
        let mut state = self.state_guard();
        if *state != EngineState::Created {
            return Ok(());
        }

        let backend = open_backend(&self.config.storage)
            .map_err(|e| crate::Error::InitFailed(format!("metadata store: {}", e)))?;
        let metadata = Arc::new(MetadataStore::new(backend));
        let persisted = metadata
            .list_partitions()
            .map_err(|e| crate::Error::InitFailed(format!("routing reload: {}", e)))?;

        let reloaded = persisted.len();
        {
            let mut local = self.local_partitions.write().unwrap_or_else(|e| e.into_inner());
            for p in persisted {
                local.insert(p.id);
                self.routing.set(p.id, p.owner, p.epoch);
            }
        }

        // Only fails if already set, which the state check rules out
        let _ = self.metadata.set(metadata);
        *state = EngineState::Initialized;
        tracing::info!(
            "Executor engine {} initialized ({} routing entries reloaded)",
            self.node_id,
            reloaded
        );
        Ok(())
    }

    pub fn start(&self) -> Result<()> {
        let mut state = self.state_guard();
        match *state {
            EngineState::Running => Ok(()),
            EngineState::Initialized | EngineState::Stopped => {
                *state = EngineState::Running;
                tracing::info!("Executor engine {} started", self.node_id);
                Ok(())
            }
            EngineState::Created => Err(crate::Error::InvalidState {
                expected: EngineState::Initialized.to_string(),
                actual: EngineState::Created.to_string(),
            }),
        }
    }

    /// Stop serving. Safe to call in any state, any number of times.
    pub fn stop(&self) {
        let mut state = self.state_guard();
        if *state == EngineState::Stopped {
            return;
        }
        if let Some(metadata) = self.metadata.get() {
            if let Err(e) = metadata.flush() {
                tracing::warn!("Failed to flush metadata on stop: {}", e);
            }
        }
        *state = EngineState::Stopped;
        tracing::info!("Executor engine {} stopped", self.node_id);
    }

    pub fn state(&self) -> EngineState {
        *self.state_guard()
    }

    pub fn is_serving(&self) -> bool {
        self.state() == EngineState::Running
    }

    pub fn ensure_serving(&self) -> Result<()> {
        let state = self.state();
        if state == EngineState::Running {
            Ok(())
        } else {
            Err(crate::Error::NotServing(state.to_string()))
        }
    }

    /// Metadata store, available once `init()` succeeded
    pub fn metadata(&self) -> Result<Arc<MetadataStore>> {
        self.metadata
            .get()
            .cloned()
            .ok_or_else(|| crate::Error::NotServing(self.state().to_string()))
    }

    // === Partitions ===

    /// Register a partition and route it.
    ///
    /// Returns `false`, registering nothing, when the partition is already
    /// registered or routing holds a newer placement for it. A placement that
    /// routing already holds verbatim is registered as is.
    pub fn add_partition(&self, partition: Partition) -> Result<bool> {
        let _guard = self.update_lock.lock().unwrap_or_else(|e| e.into_inner());
        let id = partition.id;
        if self
            .local_partitions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&id)
        {
            return Ok(false);
        }

        let routed = match self.routing.get(id) {
            Ok(current) if current == partition => true,
            _ => self.route_locked(id, partition.owner, partition.epoch)?,
        };
        if !routed {
            tracing::debug!("Partition {} not registered: routing is newer", id);
            return Ok(false);
        }
        self.local_partitions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id);
        tracing::debug!("Partition {} registered", id);
        Ok(true)
    }

    /// Move `partition_id` to `node` at `epoch`.
    ///
    /// Returns `false` (and changes nothing) when `epoch` is not newer than
    /// the partition's current epoch.
    pub fn update_partition_routing(
        &self,
        partition_id: PartitionId,
        node: NodeId,
        epoch: Epoch,
    ) -> Result<bool> {
        let _guard = self.update_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.route_locked(partition_id, node, epoch)
    }

    /// Caller holds `update_lock`
    fn route_locked(&self, partition_id: PartitionId, node: NodeId, epoch: Epoch) -> Result<bool> {
        let current = self.routing.get(partition_id).ok();
        let current_epoch = current.as_ref().map(|p| p.epoch).unwrap_or(0);
        if epoch <= current_epoch {
            self.metrics.routing_updates_stale.inc();
            tracing::info!(
                "Dropping stale routing update for partition {}: epoch {} is not newer than {}",
                partition_id,
                epoch,
                current_epoch
            );
            return Ok(false);
        }

        let partition = Partition {
            id: partition_id,
            owner: node,
            epoch,
        };
        if let Some(metadata) = self.metadata.get() {
            metadata.put_partition(&partition)?;
        }
        let applied = self
            .routing
            .set(partition_id, partition.owner.clone(), epoch);
        if applied {
            self.metrics.routing_updates_applied.inc();
            tracing::info!(
                "Partition {} routed to {} (epoch {}, was {})",
                partition_id,
                partition.owner,
                epoch,
                current
                    .map(|p| p.owner.to_string())
                    .unwrap_or_else(|| "unassigned".into())
            );
        }
        Ok(applied)
    }

    /// Seed any missing partitions round-robin over `nodes` and mark them live
    pub fn bootstrap(&self, nodes: &[NodeId]) -> Result<usize> {
        let mut sorted: Vec<NodeId> = nodes.to_vec();
        sorted.sort();
        sorted.dedup();
        self.add_live_nodes(&sorted);

        let mut created = 0;
        for pid in 0..self.config.num_partitions {
            if let Ok(existing) = self.routing.get(pid) {
                self.add_partition(existing)?;
                continue;
            }
            if sorted.is_empty() {
                return Err(crate::Error::NoLiveNodes(pid));
            }
            let owner = sorted[pid as usize % sorted.len()].clone();
            if self.add_partition(Partition::new(pid, owner, 1))? {
                created += 1;
            }
        }
        tracing::info!(
            "Bootstrapped {} partitions over {} nodes ({} new)",
            self.config.num_partitions,
            sorted.len(),
            created
        );
        Ok(created)
    }

    /// Replace routing wholesale from a backup.
    ///
    /// Restored epochs are bumped past both the backup's and the current
    /// values so no in-flight update from before the restore can win.
    pub fn restore_routing(&self, entries: Vec<Partition>) -> Result<()> {
        let state = self.state();
        if state == EngineState::Running || state == EngineState::Created {
            return Err(crate::Error::InvalidState {
                expected: "initialized or stopped".into(),
                actual: state.to_string(),
            });
        }
        let metadata = self.metadata()?;
        let _guard = self.update_lock.lock().unwrap_or_else(|e| e.into_inner());

        let current = self.routing.snapshot();
        let restored: Vec<Partition> = entries
            .into_iter()
            .map(|p| {
                let now = current.get(&p.id).map(|c| c.epoch).unwrap_or(0);
                Partition {
                    epoch: p.epoch.max(now) + 1,
                    ..p
                }
            })
            .collect();

        for p in &restored {
            metadata.put_partition(p)?;
        }
        {
            let mut local = self.local_partitions.write().unwrap_or_else(|e| e.into_inner());
            local.clear();
            local.extend(restored.iter().map(|p| p.id));
        }
        let count = restored.len();
        self.routing.replace(restored);
        tracing::info!("Routing restored ({} partitions)", count);
        Ok(())
    }

    // === Membership ===

    fn add_live_nodes(&self, nodes: &[NodeId]) {
        let mut live = self.live_nodes.write().unwrap_or_else(|e| e.into_inner());
        live.extend(nodes.iter().cloned());
        self.metrics.live_nodes.set(live.len() as u64);
    }

    fn remove_live_nodes(&self, nodes: &[NodeId]) {
        let mut live = self.live_nodes.write().unwrap_or_else(|e| e.into_inner());
        for n in nodes {
            live.remove(n);
        }
        self.metrics.live_nodes.set(live.len() as u64);
    }

    /// Apply one membership event, returning the accepted moves.
    ///
    /// Joins never move partitions that have a live owner; they only pick up
    /// partitions stranded by an earlier departure. Leaves move every
    /// partition owned by a departed node.
    pub fn handle_membership(&self, event: &MembershipEvent) -> Vec<Reassignment> {
        self.metrics.membership_events.inc();
        let snapshot = self.routing.snapshot();

        let to_move: Vec<Partition> = match event {
            MembershipEvent::NodesJoined(nodes) => {
                tracing::info!("Nodes joined: {:?}", nodes);
                self.add_live_nodes(nodes);
                let stranded = self.stranded.lock().unwrap_or_else(|e| e.into_inner());
                let live = self.live_nodes();
                stranded
                    .iter()
                    .filter_map(|pid| snapshot.get(pid))
                    .filter(|p| !live.contains(&p.owner))
                    .cloned()
                    .collect()
            }
            MembershipEvent::NodesLeft(nodes) => {
                tracing::info!("Nodes left: {:?}", nodes);
                self.remove_live_nodes(nodes);
                snapshot
                    .values()
                    .filter(|p| nodes.contains(&p.owner))
                    .cloned()
                    .collect()
            }
        };

        if to_move.is_empty() {
            return Vec::new();
        }

        let owners: Vec<Partition> = snapshot.values().cloned().collect();
        let plan = plan_reassignments(&to_move, &owners, &self.live_nodes(), self.placement.as_ref());

        let mut accepted = Vec::with_capacity(plan.moves.len());
        for mv in plan.moves {
            match self.update_partition_routing(mv.partition, mv.to.clone(), mv.epoch) {
                Ok(true) => accepted.push(mv),
                Ok(false) => {}
                Err(e) => tracing::error!(
                    "Failed to move partition {} from {} to {}: {}",
                    mv.partition,
                    mv.from,
                    mv.to,
                    e
                ),
            }
        }

        let mut stranded = self.stranded.lock().unwrap_or_else(|e| e.into_inner());
        for mv in &accepted {
            stranded.remove(&mv.partition);
        }
        if !plan.stranded.is_empty() {
            tracing::warn!(
                "No live node to take partitions {:?}; they stay unassigned until a node joins",
                plan.stranded
            );
            stranded.extend(plan.stranded);
        }

        accepted
    }

    // === Accessors ===

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn routing(&self) -> Arc<RoutingTable> {
        self.routing.clone()
    }

    pub fn live_nodes(&self) -> BTreeSet<NodeId> {
        self.live_nodes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn local_partitions(&self) -> Vec<PartitionId> {
        self.local_partitions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .copied()
            .collect()
    }

    pub fn partition_count(&self) -> usize {
        self.routing.len()
    }

    pub fn placement_name(&self) -> &'static str {
        self.placement.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::StorageBackend;

    fn engine(num_partitions: u32) -> ExecutorEngine {
        let config = CoordinatorConfig {
            num_partitions,
            ..Default::default()
        };
        ExecutorEngine::new(
            NodeId::from("coord-1"),
            config,
            Arc::new(RoutingTable::new()),
            Arc::new(MetricsRegistry::new()),
        )
    }

    fn nodes(ids: &[&str]) -> Vec<NodeId> {
        ids.iter().map(|n| NodeId::from(*n)).collect()
    }

    #[test]
    fn test_lifecycle() {
        let engine = engine(4);
        assert_eq!(engine.state(), EngineState::Created);
        assert!(engine.start().is_err());
        assert!(engine.metadata().is_err());

        engine.init().unwrap();
        engine.init().unwrap();
        engine.start().unwrap();
        assert!(engine.is_serving());

        engine.stop();
        engine.stop();
        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(engine.ensure_serving().is_err());
    }

    #[test]
    fn test_stop_without_start() {
        let engine = engine(4);
        engine.stop();
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    #[test]
    fn test_init_fails_on_unusable_storage() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"occupied").unwrap();

        let config = CoordinatorConfig {
            storage: StorageBackend::Rocksdb { path: file },
            ..Default::default()
        };
        let engine = ExecutorEngine::new(
            NodeId::from("coord-1"),
            config,
            Arc::new(RoutingTable::new()),
            Arc::new(MetricsRegistry::new()),
        );
        assert!(matches!(engine.init(), Err(crate::Error::InitFailed(_))));
        assert!(engine.start().is_err());
    }

    #[test]
    fn test_add_partition_is_idempotent() {
        let engine = engine(4);
        engine.init().unwrap();
        assert!(engine.add_partition(Partition::new(1, "a", 1)).unwrap());
        assert!(!engine.add_partition(Partition::new(1, "b", 9)).unwrap());
        assert_eq!(engine.routing().get(1).unwrap().owner, NodeId::from("a"));
        assert_eq!(engine.local_partitions(), vec![1]);
    }

    #[test]
    fn test_add_partition_reports_stale_routing() {
        let engine = engine(4);
        engine.init().unwrap();
        assert!(engine
            .update_partition_routing(2, NodeId::from("s1"), 7)
            .unwrap());

        assert!(!engine.add_partition(Partition::new(2, "s2", 3)).unwrap());
        assert!(engine.local_partitions().is_empty());
        assert_eq!(engine.routing().get(2).unwrap().owner, NodeId::from("s1"));

        // The placement routing already holds registers without a new epoch
        assert!(engine.add_partition(Partition::new(2, "s1", 7)).unwrap());
        assert_eq!(engine.local_partitions(), vec![2]);
    }

    #[test]
    fn test_stale_update_never_moves_backward() {
        let engine = engine(4);
        engine.init().unwrap();
        assert!(engine
            .update_partition_routing(0, NodeId::from("s1"), 5)
            .unwrap());
        assert!(!engine
            .update_partition_routing(0, NodeId::from("s2"), 5)
            .unwrap());
        assert!(!engine
            .update_partition_routing(0, NodeId::from("s2"), 3)
            .unwrap());
        assert_eq!(engine.routing().get(0).unwrap().owner, NodeId::from("s1"));
    }

    #[test]
    fn test_bootstrap_spreads_partitions() {
        let engine = engine(6);
        engine.init().unwrap();
        assert_eq!(engine.bootstrap(&nodes(&["b", "a", "c"])).unwrap(), 6);
        assert_eq!(engine.partition_count(), 6);
        for (_, count) in engine.routing().load() {
            assert_eq!(count, 2);
        }
        // Second bootstrap creates nothing
        assert_eq!(engine.bootstrap(&nodes(&["a", "b", "c"])).unwrap(), 0);
    }

    #[test]
    fn test_join_moves_nothing() {
        let engine = engine(4);
        engine.init().unwrap();
        engine.bootstrap(&nodes(&["a", "b"])).unwrap();
        let before = engine.routing().entries();

        let moved = engine.handle_membership(&MembershipEvent::NodesJoined(nodes(&["c"])));
        assert!(moved.is_empty());
        assert_eq!(engine.routing().entries(), before);
        assert!(engine.live_nodes().contains(&NodeId::from("c")));
    }

    #[test]
    fn test_leave_reassigns_to_live_nodes() {
        let engine = engine(6);
        engine.init().unwrap();
        engine.bootstrap(&nodes(&["a", "b", "c"])).unwrap();
        let departed = NodeId::from("c");
        let owned = engine.routing().owned_by(&departed);
        assert_eq!(owned.len(), 2);

        let moved = engine.handle_membership(&MembershipEvent::NodesLeft(vec![departed.clone()]));
        assert_eq!(moved.len(), 2);
        assert!(engine.routing().owned_by(&departed).is_empty());
        for pid in owned {
            let p = engine.routing().get(pid).unwrap();
            assert!(engine.live_nodes().contains(&p.owner));
            assert_eq!(p.epoch, 2);
        }

        // Duplicate delivery is harmless
        let again = engine.handle_membership(&MembershipEvent::NodesLeft(vec![departed]));
        assert!(again.is_empty());
    }

    #[test]
    fn test_stranded_partitions_placed_on_next_join() {
        let engine = engine(2);
        engine.init().unwrap();
        engine.bootstrap(&nodes(&["a"])).unwrap();

        let moved = engine.handle_membership(&MembershipEvent::NodesLeft(nodes(&["a"])));
        assert!(moved.is_empty());
        assert_eq!(engine.routing().owned_by(&NodeId::from("a")).len(), 2);

        let moved = engine.handle_membership(&MembershipEvent::NodesJoined(nodes(&["b"])));
        assert_eq!(moved.len(), 2);
        assert_eq!(engine.routing().owned_by(&NodeId::from("b")).len(), 2);
    }

    #[test]
    fn test_routing_reloaded_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = CoordinatorConfig {
            num_partitions: 3,
            storage: StorageBackend::Rocksdb {
                path: dir.path().join("meta"),
            },
            ..Default::default()
        };
        {
            let engine = ExecutorEngine::new(
                NodeId::from("coord-1"),
                config.clone(),
                Arc::new(RoutingTable::new()),
                Arc::new(MetricsRegistry::new()),
            );
            engine.init().unwrap();
            engine.bootstrap(&nodes(&["a"])).unwrap();
            engine
                .update_partition_routing(2, NodeId::from("b"), 7)
                .unwrap();
            engine.stop();
        }

        let routing = Arc::new(RoutingTable::new());
        let engine = ExecutorEngine::new(
            NodeId::from("coord-1"),
            config,
            routing.clone(),
            Arc::new(MetricsRegistry::new()),
        );
        engine.init().unwrap();
        assert_eq!(routing.len(), 3);
        let p = routing.get(2).unwrap();
        assert_eq!(p.owner, NodeId::from("b"));
        assert_eq!(p.epoch, 7);
    }

    #[test]
    fn test_restore_requires_stopped_engine() {
        let engine = engine(2);
        engine.init().unwrap();
        engine.bootstrap(&nodes(&["a"])).unwrap();
        engine.start().unwrap();

        let entries = vec![Partition::new(0, "z", 1), Partition::new(1, "z", 1)];
        assert!(engine.restore_routing(entries.clone()).is_err());

        engine.stop();
        engine.restore_routing(entries).unwrap();
        let p = engine.routing().get(0).unwrap();
        assert_eq!(p.owner, NodeId::from("z"));
        assert!(p.epoch > 1);
    }
}
