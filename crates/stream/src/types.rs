//! Core types for the room stream server.

use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// Store configuration.
///
/// Durations are expressed in milliseconds so they can be written directly
/// in YAML configuration files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Maximum chars accepted by a single append
    pub single_data_limit: usize,
    /// An append is refused once a stream holds this many chars
    pub stream_data_limit: usize,
    /// Directory holding one file per room
    pub store_location: PathBuf,
    /// How long a blocking read waits for an append
    pub listen_timeout_ms: u64,
    /// How long an append waits for woken readers to detach
    pub signal_timeout_ms: u64,
    /// Period of the background sweep
    pub check_interval_ms: u64,
    /// Idle time after which a room without readers is evicted
    pub dead_room_limit_ms: u64,
    /// Background save rotation rate
    pub saves_per_minute: f64,
}

impl StreamConfig {
    pub fn listen_timeout(&self) -> Duration {
        Duration::from_millis(self.listen_timeout_ms)
    }

    pub fn signal_timeout(&self) -> Duration {
        Duration::from_millis(self.signal_timeout_ms)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn dead_room_limit(&self) -> Duration {
        Duration::from_millis(self.dead_room_limit_ms)
    }

    /// Number of rooms persisted by each background sweep.
    ///
    /// `ceil(saves_per_minute * interval_minutes)`.
    pub fn saves_per_sweep(&self) -> usize {
        let minutes = self.check_interval_ms as f64 / 60_000.0;
        let saves = (self.saves_per_minute * minutes).ceil();
        if saves.is_finite() && saves > 0.0 {
            saves as usize
        } else {
            0
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            single_data_limit: 5_000,
            stream_data_limit: 1_000_000,
            store_location: PathBuf::from("./rooms"),
            listen_timeout_ms: 300_000,
            signal_timeout_ms: 30_000,
            check_interval_ms: 60_000,
            dead_room_limit_ms: 3_600_000,
            saves_per_minute: 10.0,
        }
    }
}

/// Alias generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AliasConfig {
    /// Length of the first generated keys
    pub initial_length: usize,
    /// Every this many collisions the key grows by one char
    pub retry_increase: usize,
}

impl Default for AliasConfig {
    fn default() -> Self {
        Self {
            initial_length: 5,
            retry_increase: 20,
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerOptions {
    /// Port to listen on (0 for auto-assign)
    pub port: u16,
    /// Host to bind to
    pub host: String,
    /// Regex a room name must match
    pub acceptable_room: String,
    /// Minimum time between two administrative save-all requests
    pub save_all_cooldown_ms: u64,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            port: 5000,
            host: "127.0.0.1".to_string(),
            acceptable_room: "^[a-zA-Z0-9_-]{1,64}$".to_string(),
            save_all_cooldown_ms: 60_000,
        }
    }
}

/// Shared facts about a single append, seen by every reader it woke.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalData {
    /// Number of blocked readers present when the append signalled
    pub listeners_before_signal: usize,
}

/// Result of a read, with enough context to render a response.
///
/// `signal` is `None` when the read did not wait or timed out.
#[derive(Debug, Clone, Default)]
pub struct ReadyData {
    pub data: String,
    pub signal: Option<std::sync::Arc<SignalData>>,
    /// Buffer length in chars when the data was read
    pub used: usize,
    /// Configured stream size limit
    pub limit: usize,
}

impl ReadyData {
    /// Listener count reported to clients (0 when no signal was observed).
    pub fn signalled(&self) -> usize {
        self.signal
            .as_ref()
            .map(|s| s.listeners_before_signal)
            .unwrap_or(0)
    }
}

/// Size limits exposed to clients.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Limits {
    pub max_stream_size: usize,
    pub max_single_chunk: usize,
}
