use std::{path::PathBuf, process};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod config;
mod serve;

use config::{Config, ConfigError, Overrides};

#[derive(Clone, Debug)]
pub struct Context {
    pub config_path: PathBuf,
    pub config: Config,
}

#[derive(Parser, Debug)]
#[clap(author, version, about = "Room stream server - append-only rooms with long-poll reads", long_about = None)]
struct Opts {
    /// Path to the configuration file (default: ./roomstream.yaml)
    #[arg(
        long = "config",
        short = 'c',
        global = true,
        default_value = "./roomstream.yaml"
    )]
    config_path: PathBuf,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, PartialEq, Clone, Debug)]
enum Command {
    /// Start the room stream server
    Serve(serve::ServeCommand),
    /// Print the effective configuration as YAML
    Config {
        #[command(flatten)]
        overrides: Overrides,
    },
}

#[tokio::main]
async fn main() {
    load_env_file();

    let opts: Opts = match Opts::try_parse() {
        Ok(opts) => opts,
        Err(e) => {
            let _ = e.print();
            process::exit(e.exit_code());
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match Config::load(&opts.config_path) {
        Ok(config) => {
            eprintln!("✓ Loaded configuration from {}", opts.config_path.display());
            config
        }
        Err(ConfigError::FileNotFound(_)) => {
            eprintln!("Using default configuration...");
            Config::default()
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let ctx = Context {
        config_path: opts.config_path.clone(),
        config,
    };

    if let Err(e) = handle_command(opts, &ctx).await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Load environment variables from a .env file in the working directory
fn load_env_file() {
    match dotenvy::dotenv() {
        Ok(path) => {
            eprintln!("✓ Loaded environment from {}", path.display());
        }
        Err(e) if e.not_found() => {
            // .env file not found is fine, just continue silently
        }
        Err(e) => {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }
}

async fn handle_command(opts: Opts, ctx: &Context) -> Result<(), String> {
    match opts.command {
        Command::Serve(cmd) => cmd.execute(ctx).await.map_err(|e| e.to_string()),
        Command::Config { overrides } => {
            let yaml = ctx
                .config
                .clone()
                .with_overrides(&overrides)
                .to_yaml()
                .map_err(|e| format!("Failed to render {}: {}", ctx.config_path.display(), e))?;
            print!("{}", yaml);
            Ok(())
        }
    }
}
