//! HTTP client for a coordinator
//!
//! Requests rotate over the configured addresses; a connection failure moves
//! on to the next address before giving up.

use crate::common::{ClientConfig, NodeId, Result, SnapshotId};
use crate::coordinator::http::{
    BackupIdResponse, ClientIdResponse, CommitLoadRequest, ErrorBody, IngestRequest,
    MembershipRequest, PartitionCount, PrepareRequest, PurgeRequest, PurgeResponse,
    RestoreRequest, SnapshotBody, VerifyResponse,
};
use crate::ops::backup::BackupRecord;
use crate::ops::dataload::DataLoadTarget;
use crate::schema::GraphSchema;
use crate::write::{WriteBatch, WriteService};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

pub struct GraphClient {
    config: ClientConfig,
    http: reqwest::Client,
    next: AtomicUsize,
}

impl GraphClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            config,
            http,
            next: AtomicUsize::new(0),
        })
    }

    fn request(&self, method: Method, base: &str, path: &str) -> RequestBuilder {
        let builder = self
            .http
            .request(method, format!("http://{}{}", base, path));
        match self.config.credentials() {
            Some((user, password)) => builder.basic_auth(user, Some(password)),
            None => builder,
        }
    }

    /// Send to the next address, falling through to the others on connect errors
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&(dyn erased::Body + Sync)>,
    ) -> Result<Response> {
        let addresses = self.config.addresses();
        let start = self.next.fetch_add(1, Ordering::Relaxed);
        let mut last_error = None;

        for i in 0..addresses.len() {
            let base = &addresses[(start + i) % addresses.len()];
            let mut req = self.request(method.clone(), base, path);
            if let Some(body) = body {
                req = body.attach(req)?;
            }
            match req.send().await {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_connect() => {
                    tracing::debug!("Coordinator {} unreachable: {}", base, e);
                    last_error = Some(e.into());
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(last_error.unwrap_or_else(|| crate::Error::ConnectionFailed("no addresses".into())))
    }

    async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json::<T>().await?);
        }
        let text = resp.text().await.unwrap_or_default();
        Err(match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => crate::Error::Remote {
                status: status.as_u16(),
                code: body.code,
                message: body.error,
                retryable: body.retryable,
            },
            Err(_) => crate::Error::Http(format!("{}: {}", status, text)),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&(dyn erased::Body + Sync)>,
    ) -> Result<T> {
        let resp = self.send(method, path, body).await?;
        Self::decode(resp).await
    }

    // === Writes ===

    pub async fn get_client_id(&self) -> Result<String> {
        let resp: ClientIdResponse = self.call(Method::POST, "/write/client", None).await?;
        Ok(resp.client_id)
    }

    pub async fn batch_write(&self, batch: &WriteBatch) -> Result<SnapshotId> {
        let resp: SnapshotBody = self
            .call(Method::POST, "/write/batch", Some(&erased::Json(batch)))
            .await?;
        Ok(resp.snapshot_id)
    }

    pub async fn remote_flush(&self, snapshot_id: SnapshotId) -> Result<()> {
        let _: serde_json::Value = self
            .call(
                Method::POST,
                "/write/flush",
                Some(&erased::Json(&SnapshotBody { snapshot_id })),
            )
            .await?;
        Ok(())
    }

    // === Schema ===

    pub async fn get_schema(&self) -> Result<GraphSchema> {
        self.call(Method::GET, "/schema", None).await
    }

    pub async fn drop_schema(&self) -> Result<GraphSchema> {
        self.call(Method::DELETE, "/schema", None).await
    }

    pub async fn load_json_schema(&self, json: &str) -> Result<GraphSchema> {
        self.call(Method::POST, "/schema", Some(&erased::Text(json)))
            .await
    }

    // === Data load ===

    pub async fn prepare_data_load(&self, targets: Vec<DataLoadTarget>) -> Result<GraphSchema> {
        self.call(
            Method::POST,
            "/dataload/prepare",
            Some(&erased::Json(&PrepareRequest { targets })),
        )
        .await
    }

    pub async fn ingest_data(&self, path: &str) -> Result<()> {
        let req = IngestRequest {
            path: path.to_string(),
        };
        let _: serde_json::Value = self
            .call(Method::POST, "/dataload/ingest", Some(&erased::Json(&req)))
            .await?;
        Ok(())
    }

    pub async fn commit_data_load(
        &self,
        tables: BTreeMap<u64, DataLoadTarget>,
        path: &str,
    ) -> Result<()> {
        let req = CommitLoadRequest {
            tables,
            path: path.to_string(),
        };
        let _: serde_json::Value = self
            .call(Method::POST, "/dataload/commit", Some(&erased::Json(&req)))
            .await?;
        Ok(())
    }

    pub async fn clear_ingest(&self) -> Result<()> {
        let _: serde_json::Value = self.call(Method::POST, "/dataload/clear", None).await?;
        Ok(())
    }

    // === Backups ===

    pub async fn create_backup(&self) -> Result<u32> {
        let resp: BackupIdResponse = self.call(Method::POST, "/backups", None).await?;
        Ok(resp.backup_id)
    }

    /// Block until a backup finishes and return its record
    pub async fn wait_backup(&self, id: u32) -> Result<BackupRecord> {
        self.call(Method::GET, &format!("/backups/{}?wait=true", id), None)
            .await
    }

    pub async fn list_backups(&self) -> Result<Vec<BackupRecord>> {
        self.call(Method::GET, "/backups", None).await
    }

    pub async fn delete_backup(&self, id: u32) -> Result<()> {
        let _: serde_json::Value = self
            .call(Method::DELETE, &format!("/backups/{}", id), None)
            .await?;
        Ok(())
    }

    pub async fn purge_backups(&self, keep: usize) -> Result<Vec<u32>> {
        let resp: PurgeResponse = self
            .call(
                Method::POST,
                "/backups/purge",
                Some(&erased::Json(&PurgeRequest { keep })),
            )
            .await?;
        Ok(resp.deleted)
    }

    pub async fn verify_backup(&self, id: u32) -> Result<(bool, String)> {
        let resp: VerifyResponse = self
            .call(Method::GET, &format!("/backups/{}/verify", id), None)
            .await?;
        Ok((resp.valid, resp.message))
    }

    pub async fn restore_backup(&self, id: u32, meta_path: &Path, store_path: &Path) -> Result<()> {
        let req = RestoreRequest {
            meta_path: meta_path.to_path_buf(),
            store_path: store_path.to_path_buf(),
        };
        let _: serde_json::Value = self
            .call(
                Method::POST,
                &format!("/backups/{}/restore", id),
                Some(&erased::Json(&req)),
            )
            .await?;
        Ok(())
    }

    // === Membership & lifecycle ===

    pub async fn nodes_join(&self, nodes: Vec<NodeId>) -> Result<()> {
        let _: serde_json::Value = self
            .call(
                Method::POST,
                "/membership/join",
                Some(&erased::Json(&MembershipRequest { nodes })),
            )
            .await?;
        Ok(())
    }

    pub async fn nodes_leave(&self, nodes: Vec<NodeId>) -> Result<()> {
        let _: serde_json::Value = self
            .call(
                Method::POST,
                "/membership/leave",
                Some(&erased::Json(&MembershipRequest { nodes })),
            )
            .await?;
        Ok(())
    }

    pub async fn start_engine(&self) -> Result<()> {
        let _: serde_json::Value = self.call(Method::POST, "/admin/start", None).await?;
        Ok(())
    }

    pub async fn stop_engine(&self) -> Result<()> {
        let _: serde_json::Value = self.call(Method::POST, "/admin/stop", None).await?;
        Ok(())
    }

    // === Observability ===

    /// Metrics for the given comma-separated roles (empty for all)
    pub async fn get_metrics(&self, roles: &str) -> Result<serde_json::Value> {
        let path = if roles.is_empty() {
            "/metrics".to_string()
        } else {
            format!("/metrics?roles={}", roles)
        };
        self.call(Method::GET, &path, None).await
    }

    pub async fn get_partition_num(&self) -> Result<usize> {
        let resp: PartitionCount = self.call(Method::GET, "/partitions/count", None).await?;
        Ok(resp.partitions)
    }
}

#[async_trait]
impl WriteService for GraphClient {
    async fn get_client_id(&self) -> Result<String> {
        GraphClient::get_client_id(self).await
    }

    async fn batch_write(&self, batch: &WriteBatch) -> Result<SnapshotId> {
        GraphClient::batch_write(self, batch).await
    }

    async fn remote_flush(&self, snapshot_id: SnapshotId) -> Result<()> {
        GraphClient::remote_flush(self, snapshot_id).await
    }
}

/// Request bodies behind one object-safe type, so retries can re-attach them
mod erased {
    use crate::common::Result;
    use reqwest::RequestBuilder;
    use serde::Serialize;

    pub trait Body {
        fn attach(&self, req: RequestBuilder) -> Result<RequestBuilder>;
    }

    pub struct Json<'a, T: Serialize>(pub &'a T);

    impl<T: Serialize> Body for Json<'_, T> {
        fn attach(&self, req: RequestBuilder) -> Result<RequestBuilder> {
            let bytes = serde_json::to_vec(self.0)?;
            Ok(req
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(bytes))
        }
    }

    pub struct Text<'a>(pub &'a str);

    impl Body for Text<'_> {
        fn attach(&self, req: RequestBuilder) -> Result<RequestBuilder> {
            Ok(req
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(self.0.to_string()))
        }
    }
}
