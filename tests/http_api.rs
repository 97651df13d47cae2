//! End-to-end tests of the HTTP API through `GraphClient`

use minigraph::common::{ClientConfig, CoordinatorConfig, NodeId};
use minigraph::coordinator::http::create_router;
use minigraph::ops::{BackupStatus, DataLoadTarget};
use minigraph::write::{Properties, VertexRecordKey, WriteService, WriteSession};
use minigraph::{Coordinator, GraphClient};
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_test::assert_ok;

const SCHEMA: &str = r#"{
    "vertexTypes": [
        {"label": "Person", "properties": [{"name": "id", "dataType": "long"}], "primaryKeys": ["id"]}
    ],
    "edgeTypes": [
        {"label": "knows", "relations": [{"srcLabel": "Person", "dstLabel": "Person"}]}
    ]
}"#;

async fn spawn_coordinator() -> (Coordinator, GraphClient) {
    let config = CoordinatorConfig {
        num_partitions: 8,
        initial_nodes: vec!["store-1".into(), "store-2".into()],
        flush_poll_interval_ms: 5,
        ..Default::default()
    };
    let coord = Coordinator::build("coord-1", config).unwrap();
    coord.start().unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = create_router(coord.state().clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let client = GraphClient::new(ClientConfig::new(vec![addr.to_string()], None, None).unwrap())
        .unwrap();
    (coord, client)
}

#[tokio::test]
async fn test_write_session_over_http() {
    let (_coord, client) = spawn_coordinator().await;
    let service: Arc<dyn WriteService> = Arc::new(client);

    let mut session = WriteSession::init(service.clone()).await.unwrap();
    assert!(session.client_id().starts_with("client-"));
    for i in 0..10 {
        session.add_vertex(
            VertexRecordKey::new("Person").with_key("id", i.to_string()),
            Properties::new(),
        );
    }
    let first = session.commit().await.unwrap();
    assert_eq!(first, 1);
    assert_eq!(session.pending(), 0);
    assert_ok!(session.remote_flush(first).await);

    session.add_vertex(VertexRecordKey::new("Person").with_key("id", "10"), Properties::new());
    assert_eq!(session.commit().await.unwrap(), 2);
}

#[tokio::test]
async fn test_rejected_batch_carries_error_code() {
    let (coord, client) = spawn_coordinator().await;
    coord.stop();

    let id = client.get_client_id().await.unwrap();
    let mut batch = minigraph::write::WriteBatch::new(id);
    batch.requests.push(minigraph::write::WriteRequest::InsertVertex {
        key: VertexRecordKey::new("Person").with_key("id", "1"),
        properties: Properties::new(),
    });
    match client.batch_write(&batch).await {
        Err(minigraph::Error::Remote { code, status, .. }) => {
            assert_eq!(code, "not_serving");
            assert_eq!(status, 503);
        }
        other => panic!("expected remote error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_schema_and_data_load_over_http() {
    let (_coord, client) = spawn_coordinator().await;

    let schema = client.load_json_schema(SCHEMA).await.unwrap();
    assert!(schema.vertex("Person").is_some());
    assert!(client.load_json_schema(SCHEMA).await.is_err());

    let software = DataLoadTarget::vertex("Software").with_column(0, "name");
    let schema = client.prepare_data_load(vec![software.clone()]).await.unwrap();
    let table_id = schema.vertex("Software").unwrap().table_id.unwrap();

    client.ingest_data("/staging/software").await.unwrap();
    let mut tables = BTreeMap::new();
    tables.insert(table_id, software);
    client
        .commit_data_load(tables, "/staging/software")
        .await
        .unwrap();
    client.clear_ingest().await.unwrap();

    let dropped = client.drop_schema().await.unwrap();
    assert!(dropped.vertex_types.is_empty());
    assert!(client.get_schema().await.unwrap().edge_types.is_empty());
}

#[tokio::test]
async fn test_backup_lifecycle_over_http() {
    let (_coord, client) = spawn_coordinator().await;
    let dir = TempDir::new().unwrap();

    let id = client.create_backup().await.unwrap();
    let record = client.wait_backup(id).await.unwrap();
    assert_eq!(record.status, BackupStatus::Complete);
    assert_eq!(client.list_backups().await.unwrap().len(), 1);
    assert!(client.verify_backup(id).await.unwrap().0);

    // Restore needs the engine stopped
    assert!(client
        .restore_backup(id, &dir.path().join("meta"), &dir.path().join("store"))
        .await
        .is_err());
    client.stop_engine().await.unwrap();
    client
        .restore_backup(id, &dir.path().join("meta"), &dir.path().join("store"))
        .await
        .unwrap();
    client.start_engine().await.unwrap();

    let second = client.create_backup().await.unwrap();
    client.wait_backup(second).await.unwrap();
    assert_eq!(client.purge_backups(1).await.unwrap(), vec![id]);
    client.delete_backup(second).await.unwrap();
    assert!(client.list_backups().await.unwrap().is_empty());
    assert!(client.delete_backup(second).await.is_err());
}

#[tokio::test]
async fn test_membership_metrics_and_partitions() {
    let (coord, client) = spawn_coordinator().await;
    assert_eq!(client.get_partition_num().await.unwrap(), 8);

    client
        .nodes_join(vec![NodeId::from("store-3")])
        .await
        .unwrap();
    client
        .nodes_leave(vec![NodeId::from("store-1")])
        .await
        .unwrap();
    let routing = coord.state().engine.routing();
    assert!(routing.owned_by(&NodeId::from("store-1")).is_empty());
    assert!(!routing.owned_by(&NodeId::from("store-3")).is_empty());

    let metrics = client.get_metrics("executor").await.unwrap();
    assert!(metrics.get("executor").is_some());
    assert!(metrics.get("coordinator").is_none());
    assert_eq!(metrics["executor"]["membership_events"], 2);

    let all = client.get_metrics("").await.unwrap();
    assert!(all.get("backup").is_some());
}
