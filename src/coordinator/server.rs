//! Coordinator server
//!
//! Builds every component over one executor engine and serves the HTTP API.

use crate::common::{CoordinatorConfig, MetricsRegistry, NodeId, Result};
use crate::coordinator::http::{create_router, CoordState};
use crate::executor::engine::ExecutorEngine;
use crate::executor::membership::MembershipWatcher;
use crate::executor::routing::RoutingTable;
use crate::ops::backup::BackupCoordinator;
use crate::ops::dataload::DataLoadPipeline;
use crate::schema::SchemaService;
use crate::store::MemoryStoreCluster;
use crate::write::WriteCoordinator;
use std::sync::Arc;
use tokio::task::JoinHandle;

pub struct Coordinator {
    config: CoordinatorConfig,
    state: CoordState,
    membership_task: JoinHandle<()>,
    redelivery_task: JoinHandle<()>,
}

impl Coordinator {
    /// Initialize the engine and wire up every service.
    ///
    /// Must run inside a tokio runtime. The engine is initialized but not
    /// started; call [`start`](Self::start) or [`serve`](Self::serve).
    pub fn build(node_id: impl Into<NodeId>, config: CoordinatorConfig) -> Result<Self> {
        config.validate()?;
        let node_id = node_id.into();
        let metrics = Arc::new(MetricsRegistry::new());

        let engine = Arc::new(ExecutorEngine::new(
            node_id,
            config.clone(),
            Arc::new(RoutingTable::new()),
            metrics.clone(),
        ));
        engine.init()?;

        let initial: Vec<NodeId> = config
            .initial_nodes
            .iter()
            .map(|n| NodeId::new(n.as_str()))
            .collect();
        let cluster = Arc::new(MemoryStoreCluster::with_nodes(&initial));
        if !initial.is_empty() {
            engine.bootstrap(&initial)?;
        }

        let writes = Arc::new(WriteCoordinator::new(
            engine.clone(),
            cluster.clone(),
            metrics.clone(),
            &config,
        )?);
        let schema = Arc::new(SchemaService::open(engine.metadata()?)?);
        let dataload = Arc::new(DataLoadPipeline::new(schema.clone()));
        let backups = Arc::new(BackupCoordinator::new(
            engine.clone(),
            writes.clone(),
            schema.clone(),
            metrics.clone(),
        ));
        let (membership, membership_task) = MembershipWatcher::spawn(engine.clone());
        let redelivery_task = writes.spawn_redelivery(config.redelivery_interval());

        let state = CoordState {
            engine,
            cluster,
            writes,
            schema,
            dataload,
            backups,
            membership: Arc::new(membership),
            metrics,
        };
        Ok(Self {
            config,
            state,
            membership_task,
            redelivery_task,
        })
    }

    pub fn state(&self) -> &CoordState {
        &self.state
    }

    pub fn start(&self) -> Result<()> {
        self.state.engine.start()
    }

    pub fn stop(&self) {
        self.state.engine.stop();
    }

    pub async fn serve(self) -> Result<()> {
        let engine = &self.state.engine;
        tracing::info!("Starting coordinator: {}", engine.node_id());
        tracing::info!("  HTTP API: {}", self.config.bind_addr);
        tracing::info!("  Storage: {:?}", self.config.storage);
        tracing::info!("  Partitions: {}", engine.partition_count());
        tracing::info!("  Placement: {}", engine.placement_name());

        self.start()?;

        let router = create_router(self.state.clone());
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!("✓ Coordinator ready");

        let served = axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("Shutdown signal received");
            })
            .await;

        self.stop();
        self.membership_task.abort();
        self.redelivery_task.abort();
        if let Err(e) = served {
            tracing::error!("HTTP server error: {}", e);
            return Err(e.into());
        }
        Ok(())
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.membership_task.abort();
        self.redelivery_task.abort();
    }
}
