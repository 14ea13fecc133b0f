use std::{
    fs,
    path::{Path, PathBuf},
};

use room_stream::{AliasConfig, ServerOptions, StreamConfig};
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE_NAME: &str = "roomstream.yaml";

/// Room stream configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Store limits, timeouts and persistence location
    pub stream: StreamConfig,

    /// Read-only alias generation
    pub alias: AliasConfig,

    /// HTTP listener and room name policy
    pub server: ServerOptions,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{} not found at {}", CONFIG_FILE_NAME, .0.display())]
    FileNotFound(PathBuf),
    #[error("Failed to read {}: {}", .0.display(), .1)]
    ReadError(PathBuf, std::io::Error),
    #[error("Failed to parse {}: {}", .0.display(), .1)]
    ParseError(PathBuf, serde_yml::Error),
    #[error("Invalid acceptable_room pattern: {0}")]
    InvalidRoomPattern(#[from] room_stream::server::RoomPatternError),
}

impl Config {
    /// Load configuration from the specified file path
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content =
            fs::read_to_string(path).map_err(|e| ConfigError::ReadError(path.to_path_buf(), e))?;

        serde_yml::from_str(&content).map_err(|e| ConfigError::ParseError(path.to_path_buf(), e))
    }

    /// Apply command line / environment overrides
    pub fn with_overrides(mut self, overrides: &Overrides) -> Self {
        if let Some(host) = &overrides.host {
            self.server.host = host.clone();
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(store) = &overrides.store_location {
            self.stream.store_location = store.clone();
        }
        self
    }

    pub fn to_yaml(&self) -> Result<String, serde_yml::Error> {
        serde_yml::to_string(self)
    }
}

/// Settings that can be given on the command line or through the environment.
#[derive(Debug, Clone, Default, PartialEq, clap::Args)]
pub struct Overrides {
    /// Host to bind to
    #[arg(long, env = "ROOMSTREAM_HOST")]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(long, env = "ROOMSTREAM_PORT")]
    pub port: Option<u16>,

    /// Directory holding one file per room
    #[arg(long = "store", env = "ROOMSTREAM_STORE")]
    pub store_location: Option<PathBuf>,
}
