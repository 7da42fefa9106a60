use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum ImageCommands {
    /// Read a config JSON, a store-path closure, and a copy-to-root list into an image spec.
    Build {
        /// OCI image config JSON
        #[arg(long)]
        config: PathBuf,

        /// Newline-delimited list of absolute store paths in the closure
        #[arg(long)]
        closure: PathBuf,

        /// JSON array of absolute store paths to mirror at the rootfs
        #[arg(long = "copy-to-root")]
        copy_to_root: PathBuf,

        /// Path to a prior image spec or OCI archive to use as the base layer
        #[arg(long)]
        from_image: Option<String>,

        /// Where to write the generated image spec JSON
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Generate the closure layer and write a single-manifest OCI archive tarball.
    Export {
        /// Image spec JSON produced by `build`
        image: PathBuf,

        /// Tag to record in the archive's RepoTags
        #[arg(long, default_value = "latest")]
        tag: String,

        /// Directory backing the content-addressed staging store
        #[arg(long)]
        store: PathBuf,

        /// Where to write the OCI archive tarball
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Import an OCI archive tarball into the content store for local inspection.
    Load {
        /// OCI archive tarball
        archive: PathBuf,

        /// Directory backing the content-addressed staging store
        #[arg(long)]
        store: PathBuf,
    },
}

pub async fn handle_image_command(command: ImageCommands) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        ImageCommands::Build { config, closure, copy_to_root, from_image, out } => {
            ssnap_image::build_image(&config, &closure, &copy_to_root, &out, from_image.as_deref())
                .await?;
            println!("wrote image spec to {}", out.display());
        }
        ImageCommands::Export { image, tag, store, out } => {
            ssnap_image::export_image(&image, &tag, &out, &store).await?;
            println!("wrote OCI archive to {}", out.display());
        }
        ImageCommands::Load { archive, store } => {
            let imported = ssnap_image::load_image(&archive, &store).await?;
            println!("imported image with {} layer(s)", imported.manifest.layers.len());
            for layer in &imported.manifest.layers {
                println!("  layer {} ({} bytes)", layer.digest, layer.size);
            }
        }
    }

    Ok(())
}
