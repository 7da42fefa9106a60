//! Store-path resolution (C3): ensures a store path exists locally and pins it with a
//! GC-root symlink, by shelling out to an external builder tool.
//!
//! The default implementation runs `nix build --out-link <out-link> <store-path>`, mirroring
//! the original source's `defaultNixBuilder`. Setting `SSNAP_BUILDER` swaps it for an
//! arbitrary `<program> <out-link> <store-path>` invocation (`NewExternalBuilder`), so
//! downstream projects can substitute a different store entirely.

mod error;

pub use error::ResolverError;

use async_trait::async_trait;
use std::path::Path;
use std::process::Output;
use tokio::process::Command;

/// Environment variable naming an external builder binary. When unset, the default `nix build`
/// invocation is used.
pub const BUILDER_ENV: &str = "SSNAP_BUILDER";

/// Injected capability that substitutes a store path and pins it with a GC-root symlink.
///
/// Resolution may be slow (it can trigger a network fetch); callers must perform it outside
/// any metadata transaction.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, out_link: &Path, store_path: &str) -> Result<(), ResolverError>;
}

/// Invokes an external program to substitute a store path, capturing its combined output so
/// failures can be surfaced with the tool's own diagnostics.
pub struct ExternalBuilder {
    program: Option<String>,
}

impl ExternalBuilder {
    /// Builds a resolver honoring `SSNAP_BUILDER` if set, falling back to `nix build`.
    pub fn from_env() -> Self {
        let program = std::env::var(BUILDER_ENV).ok().filter(|s| !s.is_empty());
        Self { program }
    }

    /// Builds a resolver that always shells out to `program <out-link> <store-path>`.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self { program: Some(program.into()) }
    }

    fn builder_name(&self) -> &str {
        self.program.as_deref().unwrap_or("nix")
    }

    async fn run(&self, out_link: &Path, store_path: &str) -> Result<Output, ResolverError> {
        let mut cmd = match &self.program {
            Some(program) => {
                let mut cmd = Command::new(program);
                cmd.arg(out_link).arg(store_path);
                cmd
            }
            None => {
                let mut cmd = Command::new("nix");
                cmd.arg("build").arg("--out-link").arg(out_link).arg(store_path);
                cmd
            }
        };
        cmd.output().await.map_err(|source| ResolverError::Spawn {
            builder: self.builder_name().to_string(),
            source,
        })
    }
}

impl Default for ExternalBuilder {
    fn default() -> Self {
        Self::from_env()
    }
}

#[async_trait]
impl Resolver for ExternalBuilder {
    async fn resolve(&self, out_link: &Path, store_path: &str) -> Result<(), ResolverError> {
        if let Some(parent) = out_link.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tracing::info!(%store_path, out_link = %out_link.display(), builder = self.builder_name(), "resolving store path");

        let output = self.run(out_link, store_path).await?;
        if !output.status.success() {
            return Err(ResolverError::ResolveFailed {
                builder: self.builder_name().to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records calls and creates a (possibly dangling) symlink, so Prepare-path tests can
    /// assert on gcroots/ contents without invoking a real builder.
    #[derive(Default)]
    pub struct StubResolver {
        pub calls: Mutex<Vec<(std::path::PathBuf, String)>>,
    }

    #[async_trait]
    impl Resolver for StubResolver {
        async fn resolve(&self, out_link: &Path, store_path: &str) -> Result<(), ResolverError> {
            self.calls.lock().unwrap().push((out_link.to_path_buf(), store_path.to_string()));
            if let Some(parent) = out_link.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            #[cfg(unix)]
            tokio::fs::symlink(store_path, out_link).await?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn stub_resolver_records_calls_and_creates_symlink() {
        let dir = TempDir::new().unwrap();
        let out_link = dir.path().join("gcroots").join("1").join("hello-1.0");
        let resolver = StubResolver::default();

        resolver.resolve(&out_link, "/store/aaa-hello-1.0").await.unwrap();

        let calls = resolver.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, "/store/aaa-hello-1.0");
        assert!(out_link.symlink_metadata().is_ok());
    }

    #[tokio::test]
    async fn missing_builder_binary_surfaces_spawn_error() {
        let dir = TempDir::new().unwrap();
        let out_link = dir.path().join("gcroots").join("1").join("hello-1.0");
        let resolver = ExternalBuilder::with_program("ssnap-builder-that-does-not-exist");

        let err = resolver.resolve(&out_link, "/store/aaa-hello-1.0").await.unwrap_err();
        assert!(matches!(err, ResolverError::Spawn { .. }));
    }
}
