//! Generated wire types and service traits shared between the daemon and its clients.

pub mod snapshotter {
    tonic::include_proto!("ssnap.snapshotter");
}

pub mod daemon {
    tonic::include_proto!("ssnap.daemon");
}

pub use snapshotter::*;
