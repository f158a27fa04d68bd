mod demo;
mod verify;

use clap::{Parser, Subcommand};

use gpuwire_core::config::{default_config_path, BackendKind, TransportMode, WireConfig};

use crate::demo::DemoOptions;

#[derive(Parser)]
#[command(name = "gpuwire")]
#[command(about = "gpuwire - GPU command streams over a wire")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sample render loop through a client and server session
    Demo {
        /// Native backend the server drives (overrides the config file)
        #[arg(short, long)]
        backend: Option<BackendKind>,

        /// Number of frames to present
        #[arg(short, long, default_value_t = 3)]
        frames: u32,

        /// Channel capacity in bytes (overrides the config file)
        #[arg(long)]
        capacity: Option<usize>,

        /// How the endpoints are connected: memory or stream
        #[arg(short, long)]
        transport: Option<TransportMode>,

        /// Configuration file path
        #[arg(short, long)]
        config: Option<String>,

        /// Build the depth texture with zero mip levels
        #[arg(long)]
        inject_error: bool,

        /// Call the backend directly instead of through a client and server
        #[arg(long, conflicts_with = "transport")]
        direct: bool,

        /// Print every backend call, replayed and direct
        #[arg(long)]
        trace: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a client/server session in-process and check the wire contract
    Verify {
        /// Configuration file path
        #[arg(short, long)]
        config: Option<String>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as TOML
    Config {
        /// Configuration file path
        #[arg(short, long)]
        config: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    gpuwire_common::init_logging();

    let cli = Cli::parse();

    match cli.command {
        Commands::Demo {
            backend,
            frames,
            capacity,
            transport,
            config,
            inject_error,
            direct,
            trace,
            json,
        } => {
            let mut wire_config = load_config(config)?;
            if let Some(capacity) = capacity {
                wire_config.channel.capacity = capacity;
            }
            wire_config.validate()?;

            demo::run_demo(DemoOptions {
                backend: backend.unwrap_or(wire_config.backend.kind),
                transport: transport.unwrap_or(wire_config.transport.mode),
                channel: wire_config.channel,
                frames,
                inject_error,
                direct,
                trace,
                json,
            })
            .await?;
        }

        Commands::Verify { config, json } => {
            let path = config.unwrap_or_else(default_config_path);
            verify::run_verify(&path, json).await?;
        }

        Commands::Config { config } => {
            let wire_config = load_config(config)?;
            print!("{}", wire_config.to_toml()?);
        }
    }

    Ok(())
}

/// An explicitly named file must load; the default path falls back to
/// built-in defaults when missing.
fn load_config(path: Option<String>) -> anyhow::Result<WireConfig> {
    match path {
        Some(path) => WireConfig::load(&path)
            .map_err(|e| anyhow::anyhow!("failed to load {}: {}", path, e)),
        None => Ok(WireConfig::load_or_default(&default_config_path())),
    }
}
