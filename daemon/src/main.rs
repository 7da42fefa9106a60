mod services;

use clap::{Parser, Subcommand};
use services::{DaemonServiceGrpc, SnapshotterServiceGrpc};
use ssnap_core::daemon::daemon_server::DaemonServer;
use ssnap_core::snapshotter_service_server::SnapshotterServiceServer;
use ssnap_resolver::ExternalBuilder;
use ssnap_snapshotter::Engine;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tonic::transport::Server;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ssnap-daemon")]
#[command(about = "Store-path snapshotter gRPC daemon")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gRPC server
    Start {
        /// Host address to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Port to listen on
        #[arg(long, default_value_t = 50051)]
        port: u16,

        /// State root directory (holds metadata.db, snapshots/, gcroots/)
        #[arg(long, default_value = "/var/lib/ssnap")]
        root: PathBuf,

        /// Use the userspace fuse-overlayfs mount type instead of the kernel overlay driver
        #[arg(long)]
        fuse: bool,

        /// Defer directory reclamation from Remove to the next Cleanup call
        #[arg(long)]
        async_remove: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,ssnap=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start { host, port, root, fuse, async_remove } => {
            let addr = format!("{host}:{port}").parse()?;

            tracing::info!(root = %root.display(), fuse, async_remove, "initializing snapshotter engine");
            let resolver = Arc::new(ExternalBuilder::from_env());
            let engine = Arc::new(Engine::new(&root, resolver, fuse, async_remove).await?);

            tracing::info!(%addr, "starting ssnap daemon gRPC server");

            Server::builder()
                .add_service(DaemonServer::new(DaemonServiceGrpc))
                .add_service(SnapshotterServiceServer::new(SnapshotterServiceGrpc::new(engine)))
                .serve_with_shutdown(addr, async {
                    signal::ctrl_c().await.expect("failed to listen for ctrl-c");
                    tracing::info!("received shutdown signal, stopping server");
                })
                .await?;
        }
    }

    Ok(())
}
