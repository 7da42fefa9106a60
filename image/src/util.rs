use crate::error::ImageError;
use sha2::{Digest as Sha2Digest, Sha256};
use ssnap_store::Digest;
use std::future::Future;
use std::pin::Pin;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().iter().map(|b| format!("{b:02x}")).collect()
}

pub fn parse_digest(s: &str) -> Result<Digest, ImageError> {
    let (algorithm, hash) = s
        .split_once(':')
        .ok_or_else(|| ImageError::ArchiveFormat(format!("malformed digest: {s}")))?;
    Ok(Digest { algorithm: algorithm.to_string(), hash: hash.to_string() })
}

/// Maps Rust's target-arch names onto the OCI/Go convention container images expect.
pub fn oci_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    }
}
