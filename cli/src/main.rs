mod commands;

use clap::{Parser, Subcommand};
use commands::{handle_image_command, health_check, ImageCommands};

#[derive(Parser)]
#[command(name = "ssnap")]
#[command(about = "Image-build pipeline and daemon health probe for the store-path snapshotter")]
struct Cli {
    /// Host address of the daemon, used only by `health`
    #[arg(long, global = true, default_value = "127.0.0.1")]
    host: String,

    /// Port of the daemon, used only by `health`
    #[arg(long, global = true, default_value_t = 50051)]
    port: u16,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the health of the daemon
    Health,
    /// Build, export, or load a closure-layer image
    #[command(subcommand)]
    Image(ImageCommands),
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Health => {
            let daemon_addr = format!("http://{}:{}", cli.host, cli.port);
            health_check(&daemon_addr).await?;
        }
        Commands::Image(cmd) => {
            handle_image_command(cmd).await?;
        }
    }

    Ok(())
}
