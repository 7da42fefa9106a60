use ssnap_core::daemon::daemon_server::Daemon;
use ssnap_core::daemon::{HealthCheckRequest, HealthCheckResponse};
use tonic::{Request, Response, Status};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Default)]
pub struct DaemonServiceGrpc;

#[tonic::async_trait]
impl Daemon for DaemonServiceGrpc {
    async fn health_check(
        &self,
        _request: Request<HealthCheckRequest>,
    ) -> Result<Response<HealthCheckResponse>, Status> {
        Ok(Response::new(HealthCheckResponse {
            healthy: true,
            version: VERSION.to_string(),
        }))
    }
}
