mod health;
mod snapshotter;

pub use health::DaemonServiceGrpc;
pub use snapshotter::SnapshotterServiceGrpc;
