//! Write sessions, snapshot ordering and remote flush against an in-process coordinator

use minigraph::common::{CoordinatorConfig, NodeId};
use minigraph::write::{EdgeRecordKey, Properties, VertexRecordKey, WriteService, WriteSession};
use minigraph::Coordinator;
use std::sync::Arc;
use std::time::Duration;

fn config() -> CoordinatorConfig {
    CoordinatorConfig {
        num_partitions: 8,
        initial_nodes: vec!["store-1".into(), "store-2".into(), "store-3".into()],
        flush_timeout_ms: 2_000,
        flush_poll_interval_ms: 5,
        ..Default::default()
    }
}

fn started() -> Coordinator {
    let coord = Coordinator::build("coord-1", config()).unwrap();
    coord.start().unwrap();
    coord
}

fn person(id: u32) -> VertexRecordKey {
    VertexRecordKey::new("Person").with_key("id", id.to_string())
}

async fn session(coord: &Coordinator) -> WriteSession {
    let service: Arc<dyn WriteService> = coord.state().writes.clone();
    WriteSession::init(service).await.unwrap()
}

#[tokio::test]
async fn test_empty_commit_is_free() {
    let coord = started();
    let mut session = session(&coord).await;

    assert_eq!(session.commit().await.unwrap(), 0);
    assert_eq!(coord.state().cluster.call_count(), 0);
    // Flushing "nothing written" returns at once
    session.remote_flush(0).await.unwrap();
    assert_eq!(coord.state().cluster.call_count(), 0);
}

#[tokio::test]
async fn test_snapshot_ids_increase_per_session() {
    let coord = started();
    let mut session = session(&coord).await;

    let mut last = 0;
    for i in 0..5 {
        session.add_vertex(person(i), Properties::new());
        session.add_edge(
            EdgeRecordKey::new("knows", person(i), person(i + 1)),
            Properties::new(),
        );
        let id = session.commit().await.unwrap();
        assert!(id > last);
        last = id;
    }
}

#[tokio::test]
async fn test_concurrent_sessions_are_totally_ordered() {
    let coord = Arc::new(started());
    let mut handles = Vec::new();
    for s in 0..4u32 {
        let coord = coord.clone();
        handles.push(tokio::spawn(async move {
            let mut session = session(&coord).await;
            let mut ids = Vec::new();
            for i in 0..5 {
                session.add_vertex(person(s * 100 + i), Properties::new());
                ids.push(session.commit().await.unwrap());
            }
            ids
        }));
    }

    let mut all = Vec::new();
    for h in handles {
        let ids = h.await.unwrap();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        all.extend(ids);
    }
    all.sort_unstable();
    all.dedup();
    assert_eq!(all, (1..=20).collect::<Vec<u64>>());
}

#[tokio::test]
async fn test_flush_waits_for_slow_partitions() {
    let coord = started();
    let state = coord.state();
    for node in ["store-1", "store-2", "store-3"] {
        state
            .cluster
            .set_apply_delay(&NodeId::from(node), Duration::from_millis(40));
    }

    let mut session = session(&coord).await;
    for i in 0..32 {
        session.add_vertex(person(i), Properties::new());
    }
    let id = session.commit().await.unwrap();

    session.remote_flush(id).await.unwrap();
    let touched: Vec<u32> = (0..8)
        .filter(|pid| state.cluster.partition(*pid).is_some())
        .collect();
    assert!(!touched.is_empty());
    for pid in touched {
        assert!(state.cluster.partition(pid).unwrap().applied >= id);
    }
}

#[tokio::test]
async fn test_flush_follows_moved_partitions() {
    let coord = started();
    let state = coord.state();
    let departed = NodeId::from("store-2");

    let mut session = session(&coord).await;
    for i in 0..32 {
        session.add_vertex(person(i), Properties::new());
    }
    let id = session.commit().await.unwrap();

    // The old owner disappears; flush must ask the new owners instead
    state.cluster.set_reachable(&departed, false);
    let seq = state.membership.on_nodes_leave(vec![departed.clone()]).unwrap();
    state.membership.wait_applied(seq).await.unwrap();
    assert!(state.engine.routing().owned_by(&departed).is_empty());

    session.remote_flush(id).await.unwrap();
}

#[tokio::test]
async fn test_rejected_batch_is_kept_for_retry() {
    let coord = started();
    let state = coord.state();
    let down = NodeId::from("store-1");
    state.cluster.set_reachable(&down, false);

    let mut session = session(&coord).await;
    for i in 0..32 {
        session.add_vertex(person(i), Properties::new());
    }
    let err = session.commit().await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(session.pending().len(), 32);

    state.cluster.set_reachable(&down, true);
    assert_eq!(session.commit_with_retry(3).await.unwrap(), 1);
    assert!(session.pending().is_empty());
}

fn vertices_applied(coord: &Coordinator, partitions: u32) -> usize {
    (0..partitions)
        .filter_map(|pid| coord.state().cluster.partition(pid))
        .map(|p| p.vertices.len())
        .sum()
}

#[tokio::test]
async fn test_flush_after_move_waits_for_delayed_apply() {
    let config = CoordinatorConfig {
        num_partitions: 1,
        initial_nodes: vec!["store-1".into(), "store-2".into()],
        flush_timeout_ms: 2_000,
        flush_poll_interval_ms: 5,
        ..Default::default()
    };
    let coord = Coordinator::build("coord-1", config).unwrap();
    coord.start().unwrap();
    let state = coord.state();
    let old_owner = state.engine.routing().get(0).unwrap().owner;
    let new_owner = if old_owner == NodeId::from("store-1") {
        NodeId::from("store-2")
    } else {
        NodeId::from("store-1")
    };
    state
        .cluster
        .set_apply_delay(&old_owner, Duration::from_millis(300));

    let mut session = session(&coord).await;
    for i in 0..5 {
        session.add_vertex(person(i), Properties::new());
    }
    let first = session.commit().await.unwrap();

    // Move the partition while the first apply is still in flight
    assert!(state
        .engine
        .update_partition_routing(0, new_owner.clone(), 2)
        .unwrap());
    for i in 5..10 {
        session.add_vertex(person(i), Properties::new());
    }
    let second = session.commit().await.unwrap();

    // The fast second snapshot waits behind the slow first one
    let data = state.cluster.partition(0).unwrap();
    assert_eq!(data.applied, 0);
    assert_eq!(data.queued(), vec![first, second]);

    session.remote_flush(first).await.unwrap();
    assert_eq!(vertices_applied(&coord, 1), 10);
    assert_eq!(state.cluster.partition(0).unwrap().applied, second);
}

#[tokio::test]
async fn test_undelivered_commit_recovered_in_background() {
    let config = CoordinatorConfig {
        commit_retries: 1,
        redelivery_interval_ms: 20,
        ..config()
    };
    let coord = Coordinator::build("coord-1", config).unwrap();
    coord.start().unwrap();
    let state = coord.state();
    let flaky = NodeId::from("store-2");
    state.cluster.set_fail_commit(&flaky, true);

    let mut session = session(&coord).await;
    for i in 0..32 {
        session.add_vertex(person(i), Properties::new());
    }
    // Durable at the commit point even though one owner never acknowledged
    let id = session.commit().await.unwrap();
    assert_eq!(state.writes.in_doubt_count(), 1);
    assert!(vertices_applied(&coord, 8) < 32);
    assert_eq!(state.cluster.prepared_on(&flaky), vec![id]);

    state.cluster.set_fail_commit(&flaky, false);
    tokio::time::timeout(Duration::from_secs(2), async {
        while state.writes.in_doubt_count() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("commit never redelivered");

    session.remote_flush(id).await.unwrap();
    assert_eq!(vertices_applied(&coord, 8), 32);
    assert!(state
        .engine
        .metadata()
        .unwrap()
        .list_in_doubt()
        .unwrap()
        .is_empty());
}
