//! Room Stream Server
//!
//! Named append-only text streams ("rooms") with long-poll reads, for simple
//! real-time chat or log tailing without a persistent connection.
//!
//! # Features
//!
//! - **Append-only rooms**: Created on first use, never rewritten in place
//! - **Offset reads**: Read from any char offset to catch up on missed text
//! - **Long-polling**: Block until an append lands past your offset, or a timeout
//! - **Listener counts**: Every reader woken by an append sees how many were waiting
//! - **Persistence**: One flat file per room, rotated in the background and flushed on shutdown
//! - **Eviction**: Idle rooms leave memory and are revived from disk on next access
//! - **Read-only aliases**: Random keys that grant read access without revealing the room name
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use room_stream::{
//!     server, spawn_scheduler, AliasConfig, AliasRegistry, AppState, ServerOptions,
//!     StreamConfig, StreamStore,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = StreamStore::new(StreamConfig::default());
//!     let aliases = Arc::new(AliasRegistry::new(AliasConfig::default()));
//!     let shutdown = CancellationToken::new();
//!
//!     let scheduler = spawn_scheduler(Arc::clone(&store), shutdown.clone());
//!     let state = AppState::new(store, aliases, ServerOptions::default()).unwrap();
//!     server::start_server(state, shutdown).await.unwrap();
//!     scheduler.await.unwrap();
//! }
//! ```
//!
//! # Protocol
//!
//! ## Appending data
//!
//! ```text
//! POST /stream/lobby HTTP/1.1
//!
//! hello
//!
//! Response: 200 OK
//! ```
//!
//! ## Reading data
//!
//! ```text
//! GET /stream/lobby?start=0&nonblocking=true HTTP/1.1
//!
//! Response: 200 OK
//! hello
//! ```
//!
//! ## Long-polling
//!
//! ```text
//! GET /stream/lobby/json?start=5 HTTP/1.1
//!
//! (waits up to the listen timeout for an append past offset 5)
//!
//! Response: 200 OK
//! {"data":" world","readonlykey":"qhzme","signalled":2,"used":11,"limit":1000000}
//! ```
//!
//! ## Read-only access
//!
//! ```text
//! GET /stream/qhzme?readonlyname=true HTTP/1.1
//! ```

pub mod alias;
pub mod record;
pub mod scheduler;
pub mod server;
pub mod storage;
pub mod store;
pub mod types;

// Re-export commonly used items
pub use alias::{AliasError, AliasRegistry};
pub use record::StreamRecord;
pub use scheduler::spawn_scheduler;
pub use server::{create_router, start_server, AppState};
pub use store::{StoreError, StreamStore, SweepReport};
pub use types::{
    AliasConfig, Limits, ReadyData, ServerOptions, SignalData, StreamConfig,
};
