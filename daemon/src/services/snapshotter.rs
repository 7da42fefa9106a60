use ssnap_core::snapshotter_service_server::SnapshotterService;
use ssnap_core::{
    self as proto, CleanupSnapshotsRequest, CleanupSnapshotsResponse, CommitSnapshotRequest,
    CommitSnapshotResponse, ListSnapshotsRequest, ListSnapshotsResponse, PrepareSnapshotRequest,
    PrepareSnapshotResponse, RemoveSnapshotRequest, RemoveSnapshotResponse, SnapshotKind,
    SnapshotMountsRequest, SnapshotMountsResponse, SnapshotUsageRequest, SnapshotUsageResponse,
    StatSnapshotRequest, StatSnapshotResponse, UpdateSnapshotRequest, UpdateSnapshotResponse,
    ViewSnapshotRequest, ViewSnapshotResponse,
};
use ssnap_snapshotter::{Engine, Info, Kind, Mount, SnapshotterError};
use std::collections::BTreeMap;
use std::sync::Arc;
use tonic::{Request, Response, Status};

pub struct SnapshotterServiceGrpc {
    engine: Arc<Engine>,
}

impl SnapshotterServiceGrpc {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }
}

fn kind_to_proto(kind: Kind) -> i32 {
    match kind {
        Kind::View => SnapshotKind::View as i32,
        Kind::Active => SnapshotKind::Active as i32,
        Kind::Committed => SnapshotKind::Committed as i32,
    }
}

fn info_to_proto(info: &Info) -> proto::SnapshotInfo {
    proto::SnapshotInfo {
        key: info.key.clone(),
        parent: info.parent.clone().unwrap_or_default(),
        kind: kind_to_proto(info.kind),
        created_at: Some(prost_types::Timestamp { seconds: info.created_at, nanos: 0 }),
        updated_at: Some(prost_types::Timestamp { seconds: info.updated_at, nanos: 0 }),
        labels: info.labels.clone().into_iter().collect(),
    }
}

fn mount_to_proto(mount: &Mount) -> proto::Mount {
    proto::Mount {
        r#type: mount.mount_type.clone(),
        source: mount.source.clone(),
        target: mount.target.clone(),
        options: mount.options.clone(),
    }
}

fn labels_map(labels: std::collections::HashMap<String, String>) -> BTreeMap<String, String> {
    labels.into_iter().collect()
}

/// Classifies the engine's error taxonomy (§7) onto RPC status codes, logging once at the
/// point each error is surfaced (`Transient` never reaches this point - it is already
/// demoted to a log inside the engine).
fn to_status(err: SnapshotterError) -> Status {
    match err {
        SnapshotterError::NotFound(_) => {
            tracing::warn!(error = %err, "not found");
            Status::not_found(err.to_string())
        }
        SnapshotterError::AlreadyExists(_) => {
            tracing::warn!(error = %err, "already exists");
            Status::already_exists(err.to_string())
        }
        SnapshotterError::FailedPrecondition { .. } => {
            tracing::warn!(error = %err, "failed precondition");
            Status::failed_precondition(err.to_string())
        }
        SnapshotterError::Invalid(_) => {
            tracing::warn!(error = %err, "invalid request");
            Status::invalid_argument(err.to_string())
        }
        SnapshotterError::ResolveFailed(_) => {
            tracing::error!(error = %err, "store-path resolution failed");
            Status::internal(err.to_string())
        }
        SnapshotterError::FileSystem(_) => {
            tracing::error!(error = %err, "filesystem error");
            Status::internal(err.to_string())
        }
        SnapshotterError::Overlay(_) => {
            tracing::error!(error = %err, "overlay error");
            Status::internal(err.to_string())
        }
    }
}

#[tonic::async_trait]
impl SnapshotterService for SnapshotterServiceGrpc {
    #[tracing::instrument(skip(self, request), fields(key = %request.get_ref().key))]
    async fn prepare(
        &self,
        request: Request<PrepareSnapshotRequest>,
    ) -> Result<Response<PrepareSnapshotResponse>, Status> {
        let req = request.into_inner();
        let parent = (!req.parent.is_empty()).then_some(req.parent.as_str());

        let mounts = self
            .engine
            .prepare(&req.key, parent, labels_map(req.labels))
            .await
            .map_err(to_status)?;

        Ok(Response::new(PrepareSnapshotResponse {
            mounts: mounts.iter().map(mount_to_proto).collect(),
        }))
    }

    #[tracing::instrument(skip(self, request), fields(key = %request.get_ref().key))]
    async fn view(
        &self,
        request: Request<ViewSnapshotRequest>,
    ) -> Result<Response<ViewSnapshotResponse>, Status> {
        let req = request.into_inner();
        let parent = (!req.parent.is_empty()).then_some(req.parent.as_str());

        let mounts = self
            .engine
            .view(&req.key, parent, labels_map(req.labels))
            .await
            .map_err(to_status)?;

        Ok(Response::new(ViewSnapshotResponse {
            mounts: mounts.iter().map(mount_to_proto).collect(),
        }))
    }

    #[tracing::instrument(skip(self, request), fields(key = %request.get_ref().key))]
    async fn mounts(
        &self,
        request: Request<SnapshotMountsRequest>,
    ) -> Result<Response<SnapshotMountsResponse>, Status> {
        let req = request.into_inner();

        let mounts = self.engine.mounts(&req.key).await.map_err(to_status)?;

        Ok(Response::new(SnapshotMountsResponse {
            mounts: mounts.iter().map(mount_to_proto).collect(),
        }))
    }

    #[tracing::instrument(skip(self, request), fields(key = %request.get_ref().key))]
    async fn commit(
        &self,
        request: Request<CommitSnapshotRequest>,
    ) -> Result<Response<CommitSnapshotResponse>, Status> {
        let req = request.into_inner();

        self.engine.commit(&req.name, &req.key).await.map_err(to_status)?;

        Ok(Response::new(CommitSnapshotResponse {}))
    }

    #[tracing::instrument(skip(self, request), fields(key = %request.get_ref().key))]
    async fn remove(
        &self,
        request: Request<RemoveSnapshotRequest>,
    ) -> Result<Response<RemoveSnapshotResponse>, Status> {
        let req = request.into_inner();

        self.engine.remove(&req.key).await.map_err(to_status)?;

        Ok(Response::new(RemoveSnapshotResponse {}))
    }

    #[tracing::instrument(skip(self, request), fields(key = %request.get_ref().key))]
    async fn stat(
        &self,
        request: Request<StatSnapshotRequest>,
    ) -> Result<Response<StatSnapshotResponse>, Status> {
        let req = request.into_inner();

        let info = self.engine.stat(&req.key).await.map_err(to_status)?;

        Ok(Response::new(StatSnapshotResponse { info: Some(info_to_proto(&info)) }))
    }

    async fn update(
        &self,
        request: Request<UpdateSnapshotRequest>,
    ) -> Result<Response<UpdateSnapshotResponse>, Status> {
        let req = request.into_inner();
        let info = req.info.ok_or_else(|| Status::invalid_argument("missing info"))?;

        let field_mask = req.update_mask.map(|m| m.paths).filter(|p| !p.is_empty());

        let record = self
            .engine
            .update(&info.key, labels_map(info.labels), field_mask)
            .await
            .map_err(to_status)?;

        Ok(Response::new(UpdateSnapshotResponse { info: Some(info_to_proto(&record)) }))
    }

    async fn list(
        &self,
        request: Request<ListSnapshotsRequest>,
    ) -> Result<Response<ListSnapshotsResponse>, Status> {
        let req = request.into_inner();
        let parent_filter = (!req.parent_filter.is_empty()).then_some(req.parent_filter.as_str());

        let infos = self.engine.list(parent_filter).await.map_err(to_status)?;

        Ok(Response::new(ListSnapshotsResponse {
            infos: infos.iter().map(info_to_proto).collect(),
        }))
    }

    #[tracing::instrument(skip(self, request), fields(key = %request.get_ref().key))]
    async fn usage(
        &self,
        request: Request<SnapshotUsageRequest>,
    ) -> Result<Response<SnapshotUsageResponse>, Status> {
        let req = request.into_inner();

        let usage = self.engine.usage(&req.key).await.map_err(to_status)?;

        Ok(Response::new(SnapshotUsageResponse { size: usage.size, inodes: usage.inodes }))
    }

    async fn cleanup(
        &self,
        _request: Request<CleanupSnapshotsRequest>,
    ) -> Result<Response<CleanupSnapshotsResponse>, Status> {
        let reclaimed_bytes = self.engine.cleanup().await.map_err(to_status)?;

        Ok(Response::new(CleanupSnapshotsResponse { reclaimed_bytes }))
    }
}
