mod archive;
mod cri;
mod error;
mod generate;
mod layer;
mod pipeline;
mod types;
mod util;

pub use archive::{export_archive, import_archive, ImportedBase};
pub use cri::{route_pull_image, PullTarget};
pub use error::ImageError;
pub use generate::{detect_image_type, generate, initialize_manifest};
pub use layer::{write_nix_closure_layer, ClosureLayer};
pub use pipeline::{build_image, export_image, load_image};
pub use types::*;
