//! Per-room stream record and the waiter handshake used by long-polls.
//!
//! A record pairs an append-only text buffer with the primitives needed to
//! coordinate one writer and many blocked readers:
//!
//! - `state` guards the buffer, timestamps and the waiter set as one unit.
//!   It is only ever held for short, non-blocking sections.
//! - `append_lock` serializes appends for the whole signal/drain cycle, so a
//!   second append cannot signal while readers are still leaving the first.
//! - `signal` wakes every reader registered before an append published.
//! - `drained` wakes the writer whenever a reader leaves the waiter set.

use std::{
    collections::HashMap,
    sync::{Arc, OnceLock},
    time::Duration,
};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use tokio::{
    sync::Notify,
    time::{timeout_at, Instant},
};
use tracing::warn;

use crate::{store::StoreError, types::SignalData};

/// A single room: buffered text plus its synchronization state.
pub struct StreamRecord {
    name: String,
    created_at: DateTime<Utc>,
    state: Mutex<RecordState>,
    append_lock: tokio::sync::Mutex<()>,
    signal: Notify,
    drained: Notify,
}

/// Everything guarded by the record lock.
pub(crate) struct RecordState {
    buffer: String,
    /// Buffer length in chars; offsets and limits are counted in chars
    chars: usize,
    pub(crate) updated_at: DateTime<Utc>,
    pub(crate) saved_at: DateTime<Utc>,
    pub(crate) waiters: HashMap<u64, Arc<Waiter>>,
    next_waiter: u64,
    /// Set once the store has evicted this record from its map
    pub(crate) retired: bool,
}

/// One blocked read. Lives exactly as long as the read that created it.
#[derive(Default)]
pub(crate) struct Waiter {
    signal: OnceLock<Arc<SignalData>>,
}

impl Waiter {
    fn deliver(&self, signal: Arc<SignalData>) {
        let _ = self.signal.set(signal);
    }

    pub(crate) fn signal(&self) -> Option<Arc<SignalData>> {
        self.signal.get().cloned()
    }
}

impl StreamRecord {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self::with_content(name, String::new())
    }

    /// Build a record pre-populated with persisted content.
    pub(crate) fn with_content(name: impl Into<String>, content: String) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            created_at: now,
            state: Mutex::new(RecordState {
                chars: content.chars().count(),
                buffer: content,
                updated_at: now,
                saved_at: DateTime::<Utc>::MIN_UTC,
                waiters: HashMap::new(),
                next_waiter: 0,
                retired: false,
            }),
            append_lock: tokio::sync::Mutex::new(()),
            signal: Notify::new(),
            drained: Notify::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.state.lock().updated_at
    }

    pub fn saved_at(&self) -> DateTime<Utc> {
        self.state.lock().saved_at
    }

    /// Current buffer length in chars.
    pub fn len(&self) -> usize {
        self.state.lock().chars
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of reads currently blocked on this record.
    pub fn waiter_count(&self) -> usize {
        self.state.lock().waiters.len()
    }

    pub fn is_retired(&self) -> bool {
        self.state.lock().retired
    }

    /// Copy of the buffer contents.
    pub fn contents(&self) -> String {
        self.state.lock().buffer.clone()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, RecordState> {
        self.state.lock()
    }

    pub(crate) fn try_lock(&self) -> Option<MutexGuard<'_, RecordState>> {
        self.state.try_lock()
    }

    pub(crate) fn append_lock(&self) -> &tokio::sync::Mutex<()> {
        &self.append_lock
    }

    pub(crate) fn signal(&self) -> &Notify {
        &self.signal
    }

    /// Add a waiter to the set. Must be called with the record lock held
    /// and after the caller enabled its `signal` notification, so an append
    /// publishing under the same lock cannot be missed.
    pub(crate) fn register<'a>(&'a self, state: &mut RecordState) -> Registration<'a> {
        let id = state.next_waiter;
        state.next_waiter += 1;
        let waiter = Arc::new(Waiter::default());
        state.waiters.insert(id, Arc::clone(&waiter));
        Registration {
            record: self,
            id,
            waiter,
        }
    }

    /// Hand `signal` to every registered waiter and wake them all.
    ///
    /// Returns the ids that were signalled so the caller can drain them.
    pub(crate) fn publish(&self, state: &RecordState) -> Vec<u64> {
        let signal = Arc::new(SignalData {
            listeners_before_signal: state.waiters.len(),
        });
        for waiter in state.waiters.values() {
            waiter.deliver(Arc::clone(&signal));
        }
        self.signal.notify_waiters();
        state.waiters.keys().copied().collect()
    }

    /// Wait until every signalled waiter has left the set, or until
    /// `budget` runs out. Whatever is left is detached afterwards.
    pub(crate) async fn drain(&self, signalled: &[u64], budget: Duration) {
        if signalled.is_empty() {
            return;
        }

        let deadline = Instant::now() + budget;
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let remaining = {
                let state = self.state.lock();
                signalled
                    .iter()
                    .filter(|id| state.waiters.contains_key(*id))
                    .count()
            };
            if remaining == 0 {
                break;
            }

            if timeout_at(deadline, notified).await.is_err() {
                warn!(
                    room = %self.name,
                    remaining,
                    "Timed out while waiting for listeners to process signal"
                );
                break;
            }
        }

        let mut state = self.state.lock();
        for id in signalled {
            state.waiters.remove(id);
        }
    }
}

impl std::fmt::Debug for StreamRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamRecord")
            .field("name", &self.name)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl RecordState {
    pub(crate) fn chars(&self) -> usize {
        self.chars
    }

    pub(crate) fn buffer(&self) -> &str {
        &self.buffer
    }

    pub(crate) fn push(&mut self, data: &str) {
        self.buffer.push_str(data);
        self.chars += data.chars().count();
        self.updated_at = Utc::now();
    }

    /// Substring `[start, start + count)` in chars.
    ///
    /// An empty buffer reads as `""` for any non-negative `start`. A negative
    /// `count`, or one past the end, means "rest of the buffer".
    pub(crate) fn slice(&self, start: i64, count: i64) -> Result<String, StoreError> {
        if start < 0 {
            return Err(StoreError::InvalidArgument(
                "Start less than zero!".to_string(),
            ));
        }

        if self.chars == 0 {
            return Ok(String::new());
        }

        let start = start as usize;
        if start >= self.chars {
            return Err(StoreError::InvalidArgument(format!(
                "Start beyond end of data: {}!",
                self.chars
            )));
        }

        let available = self.chars - start;
        let count = if count < 0 || count as usize > available {
            available
        } else {
            count as usize
        };

        let from = self.byte_offset(start);
        let to = self.byte_offset(start + count);
        Ok(self.buffer[from..to].to_string())
    }

    /// Byte position of the char at index `index`, or the buffer end.
    fn byte_offset(&self, index: usize) -> usize {
        if self.chars == self.buffer.len() {
            // All ASCII: chars and bytes line up
            return index.min(self.buffer.len());
        }
        self.buffer
            .char_indices()
            .nth(index)
            .map_or(self.buffer.len(), |(at, _)| at)
    }
}

/// A waiter's entry in the record's waiter set.
///
/// Dropping it removes the entry and tells a draining writer, whether the
/// read was woken, timed out or cancelled.
pub(crate) struct Registration<'a> {
    record: &'a StreamRecord,
    id: u64,
    waiter: Arc<Waiter>,
}

impl Registration<'_> {
    pub(crate) fn signal(&self) -> Option<Arc<SignalData>> {
        self.waiter.signal()
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.record.state.lock().waiters.remove(&self.id);
        self.record.drained.notify_waiters();
    }
}
