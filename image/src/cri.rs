//! CRI `PullImage` routing (§6): preserves the contract a CRI shim must implement without
//! standing up the shim itself (the forwarding image-service client is out of scope). A
//! reference naming a locally generated OCI archive is recognised by a literal prefix; every
//! other reference is left untouched for the host's image service to handle.

const LOCAL_PREFIX: &str = "nix:0";
const LATEST_SUFFIX: &str = ":latest";

/// Where a `PullImage` request's image reference should be routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullTarget {
    /// The reference names a locally generated OCI archive at this filesystem path.
    LocalArchive(String),
    /// Not ours: forward the reference to the host's image service unchanged.
    Forward(String),
}

/// Classifies a `PullImage` reference per §6: strip the `nix:0` prefix and an optional
/// trailing `:latest`, or forward the reference unchanged if it doesn't start with the prefix.
pub fn route_pull_image(reference: &str) -> PullTarget {
    match reference.strip_prefix(LOCAL_PREFIX) {
        Some(rest) => {
            let path = rest.strip_suffix(LATEST_SUFFIX).unwrap_or(rest);
            PullTarget::LocalArchive(path.to_string())
        }
        None => PullTarget::Forward(reference.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nix_prefixed_reference_is_routed_to_local_archive() {
        assert_eq!(
            route_pull_image("nix:0/var/lib/ssnap/images/hello.tar"),
            PullTarget::LocalArchive("/var/lib/ssnap/images/hello.tar".to_string())
        );
    }

    #[test]
    fn trailing_latest_tag_is_stripped() {
        assert_eq!(
            route_pull_image("nix:0/var/lib/ssnap/images/hello.tar:latest"),
            PullTarget::LocalArchive("/var/lib/ssnap/images/hello.tar".to_string())
        );
    }

    #[test]
    fn other_references_are_forwarded_unchanged() {
        assert_eq!(
            route_pull_image("docker.io/library/alpine:3.19"),
            PullTarget::Forward("docker.io/library/alpine:3.19".to_string())
        );
    }

    #[test]
    fn bare_prefix_with_no_path_yields_empty_path() {
        assert_eq!(route_pull_image("nix:0"), PullTarget::LocalArchive(String::new()));
    }
}
