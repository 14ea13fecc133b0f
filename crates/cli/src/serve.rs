use std::{sync::Arc, time::Duration};

use room_stream::{AliasRegistry, AppState, StreamStore, spawn_scheduler, start_server};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    Context,
    config::{ConfigError, Overrides},
};

/// How long open requests get to finish once shutdown starts
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Failed to start server: {0}")]
    Server(std::io::Error),
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, PartialEq, clap::Args)]
pub struct ServeCommand {
    #[command(flatten)]
    pub overrides: Overrides,
}

impl ServeCommand {
    pub async fn execute(&self, ctx: &Context) -> Result<(), ServeError> {
        let config = ctx.config.clone().with_overrides(&self.overrides);

        let store = StreamStore::new(config.stream.clone());
        let aliases = Arc::new(AliasRegistry::new(config.alias.clone()));
        let state = AppState::new(Arc::clone(&store), aliases, config.server.clone())
            .map_err(ConfigError::from)?;

        info!(
            store = %config.stream.store_location.display(),
            single_limit = config.stream.single_data_limit,
            stream_limit = config.stream.stream_data_limit,
            "Room store ready"
        );

        let shutdown = CancellationToken::new();
        let scheduler = spawn_scheduler(Arc::clone(&store), shutdown.clone());
        let mut server = tokio::spawn(start_server(state, shutdown.clone()));

        tokio::select! {
            result = &mut server => {
                // The listener stopped on its own, most likely a bind failure
                shutdown.cancel();
                scheduler.await?;
                return result?.map_err(ServeError::Server);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
            }
        }

        shutdown.cancel();
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await {
            Ok(result) => result?.map_err(ServeError::Server)?,
            Err(_) => {
                warn!("Open long-polls did not finish in time, closing them");
                server.abort();
            }
        }

        // Waits for the final save of every room
        scheduler.await?;
        Ok(())
    }
}
