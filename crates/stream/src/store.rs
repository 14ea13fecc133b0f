//! In-memory room storage.
//!
//! Provides a thread-safe map of rooms with long-poll reads, flat-file
//! persistence and the sweep run by the background scheduler.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::time::timeout;
use tracing::{debug, error, info};

use crate::{
    record::StreamRecord,
    storage::{RoomStorage, StorageError},
    types::{Limits, ReadyData, StreamConfig},
};

/// Error types for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("Storage failure for room {room}: {source}")]
    Storage {
        room: String,
        #[source]
        source: StorageError,
    },
}

impl StoreError {
    fn storage(room: &str, source: StorageError) -> Self {
        StoreError::Storage {
            room: room.to_string(),
            source,
        }
    }
}

/// Outcome of one background sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Rooms persisted and dropped from memory
    pub evicted: Vec<String>,
    /// Rooms persisted by the save rotation
    pub saved: usize,
    /// Saves that failed (already logged)
    pub failures: usize,
}

/// Room store with long-poll support.
pub struct StreamStore {
    /// Records indexed by room name
    rooms: RwLock<HashMap<String, Arc<StreamRecord>>>,
    storage: RoomStorage,
    config: StreamConfig,
}

impl StreamStore {
    /// Create a new empty store backed by `config.store_location`.
    pub fn new(config: StreamConfig) -> Arc<Self> {
        Arc::new(Self {
            rooms: RwLock::new(HashMap::new()),
            storage: RoomStorage::new(config.store_location.clone()),
            config,
        })
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn limits(&self) -> Limits {
        Limits {
            max_stream_size: self.config.stream_data_limit,
            max_single_chunk: self.config.single_data_limit,
        }
    }

    /// Number of rooms currently held in memory.
    pub fn room_count(&self) -> usize {
        self.rooms.read().len()
    }

    /// Names of the rooms currently held in memory.
    pub fn rooms(&self) -> Vec<String> {
        self.rooms.read().keys().cloned().collect()
    }

    /// Get a room, reviving it from disk or creating it empty if needed.
    ///
    /// Concurrent callers for an unseen name all get the same record.
    ///
    /// Reviving reads the room file while the map write lock is held, so an
    /// eviction cannot slip in between the read and the insert. This blocks;
    /// async callers should go through `spawn_blocking`.
    pub fn get_or_create(&self, name: &str) -> Result<Arc<StreamRecord>, StoreError> {
        if let Some(record) = self.rooms.read().get(name) {
            return Ok(Arc::clone(record));
        }

        let mut rooms = self.rooms.write();
        if let Some(record) = rooms.get(name) {
            return Ok(Arc::clone(record));
        }

        let record = match self
            .storage
            .load(name)
            .map_err(|e| StoreError::storage(name, e))?
        {
            Some(content) => {
                info!(room = %name, "Reviving dead room");
                StreamRecord::with_content(name, content)
            }
            None => StreamRecord::new(name),
        };

        let record = Arc::new(record);
        rooms.insert(name.to_string(), Arc::clone(&record));
        Ok(record)
    }

    /// Non-blocking read of `count` chars from `start`.
    ///
    /// A negative `count` reads to the end of the buffer.
    pub fn read(&self, record: &StreamRecord, start: i64, count: i64) -> Result<String, StoreError> {
        record.lock().slice(start, count)
    }

    /// Non-blocking read that also reports the buffer length and limit.
    pub fn read_data(
        &self,
        record: &StreamRecord,
        start: i64,
        count: i64,
    ) -> Result<ReadyData, StoreError> {
        let state = record.lock();
        Ok(ReadyData {
            data: state.slice(start, count)?,
            signal: None,
            used: state.chars(),
            limit: self.config.stream_data_limit,
        })
    }

    /// Long-poll read.
    ///
    /// Returns immediately when data exists past `start`. Otherwise waits for
    /// the next append or the listen timeout; a timeout yields an empty
    /// result with no signal.
    pub async fn read_blocking(
        &self,
        record: &Arc<StreamRecord>,
        start: i64,
        count: i64,
    ) -> Result<ReadyData, StoreError> {
        if start < 0 {
            return Err(StoreError::InvalidArgument(
                "Start less than zero!".to_string(),
            ));
        }

        let mut record = self.resolve(record)?;
        loop {
            if let Some(ready) = self.listen(&record, start, count).await? {
                return Ok(ready);
            }
            // Evicted between lookup and registration
            record = self.get_or_create(record.name())?;
        }
    }

    async fn listen(
        &self,
        record: &StreamRecord,
        start: i64,
        count: i64,
    ) -> Result<Option<ReadyData>, StoreError> {
        let notified = record.signal().notified();
        tokio::pin!(notified);

        let registration = {
            let mut state = record.lock();
            if state.retired {
                return Ok(None);
            }

            if (start as usize) < state.chars() {
                // The buffer never shrinks, no need to wait
                return Ok(Some(ReadyData {
                    data: state.slice(start, count)?,
                    signal: None,
                    used: state.chars(),
                    limit: self.config.stream_data_limit,
                }));
            }

            notified.as_mut().enable();
            record.register(&mut state)
        };

        let _ = timeout(self.config.listen_timeout(), notified).await;
        let signal = registration.signal();
        drop(registration);

        let state = record.lock();
        let data = match signal {
            Some(_) => state.slice(start, count)?,
            None => String::new(),
        };

        Ok(Some(ReadyData {
            data,
            signal,
            used: state.chars(),
            limit: self.config.stream_data_limit,
        }))
    }

    /// Append `data` to a room and wake every blocked reader.
    ///
    /// Appends to one room are serialized; this call also waits (up to the
    /// signal timeout) for woken readers to detach. Returns the new buffer
    /// length.
    pub async fn append(&self, record: &Arc<StreamRecord>, data: &str) -> Result<usize, StoreError> {
        let mut record = self.resolve(record)?;
        loop {
            if let Some(used) = self.try_append(&record, data).await? {
                return Ok(used);
            }
            record = self.get_or_create(record.name())?;
        }
    }

    async fn try_append(&self, record: &StreamRecord, data: &str) -> Result<Option<usize>, StoreError> {
        let _append = record.append_lock().lock().await;

        let (signalled, used) = {
            let mut state = record.lock();
            if state.retired {
                return Ok(None);
            }

            if data.is_empty() {
                return Err(StoreError::InvalidArgument(
                    "Can't add 0 length data!".to_string(),
                ));
            }

            if data.chars().count() > self.config.single_data_limit {
                return Err(StoreError::InvalidArgument(format!(
                    "Too much data at once!: {}",
                    self.config.single_data_limit
                )));
            }

            if state.chars() >= self.config.stream_data_limit {
                return Err(StoreError::InvalidArgument(format!(
                    "Stream at data limit: {}",
                    self.config.stream_data_limit
                )));
            }

            state.push(data);
            (record.publish(&state), state.chars())
        };

        debug!(room = %record.name(), used, listeners = signalled.len(), "Appended to room");

        record.drain(&signalled, self.config.signal_timeout()).await;
        Ok(Some(used))
    }

    /// The live record for `record`'s room.
    fn resolve(&self, record: &Arc<StreamRecord>) -> Result<Arc<StreamRecord>, StoreError> {
        if record.is_retired() {
            self.get_or_create(record.name())
        } else {
            Ok(Arc::clone(record))
        }
    }

    /// Persist one room. The buffer is copied under the record lock and
    /// written without it.
    pub fn save_room(&self, record: &StreamRecord, force_empty: bool) -> Result<(), StoreError> {
        let content = record.contents();
        self.storage
            .save(record.name(), &content, force_empty)
            .map_err(|e| StoreError::storage(record.name(), e))?;
        record.lock().saved_at = Utc::now();
        Ok(())
    }

    /// Persist every room now. Empty rooms are skipped.
    ///
    /// Every room is attempted; the first failure is returned afterwards.
    pub fn force_save_all(&self) -> Result<usize, StoreError> {
        self.save_all(false)
    }

    /// Persist every room including empty ones. Used at shutdown.
    pub fn flush_all(&self) -> Result<usize, StoreError> {
        self.save_all(true)
    }

    fn save_all(&self, force_empty: bool) -> Result<usize, StoreError> {
        let records = self.snapshot();
        info!(
            rooms = records.len(),
            "Force saving all streams (regardless of state)"
        );

        let mut saved = 0;
        let mut first_error = None;
        for record in records {
            match self.save_room(&record, force_empty) {
                Ok(()) => saved += 1,
                Err(e) => {
                    error!(room = %record.name(), error = %e, "Failed to save room");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(saved),
        }
    }

    /// One pass of background maintenance: evict idle rooms, then rotate
    /// saves through the rooms saved least recently. Never fails; errors are
    /// logged and counted.
    pub fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let now = Utc::now();
        let dead_limit = chrono::Duration::from_std(self.config.dead_room_limit())
            .unwrap_or(chrono::Duration::MAX);

        let mut candidates: Vec<(Arc<StreamRecord>, DateTime<Utc>)> = Vec::new();
        for record in self.snapshot() {
            // Skip rooms that are busy right now
            let Ok(_append) = record.append_lock().try_lock() else {
                continue;
            };
            let Some(state) = record.try_lock() else {
                continue;
            };

            if !state.waiters.is_empty() || now - state.updated_at <= dead_limit {
                continue;
            }

            let content = state.buffer().to_string();
            let updated_at = state.updated_at;
            drop(state);

            match self.storage.save(record.name(), &content, false) {
                Ok(_) => {
                    record.lock().saved_at = Utc::now();
                    candidates.push((Arc::clone(&record), updated_at));
                }
                Err(e) => {
                    error!(room = %record.name(), error = %e, "Failed to save dead room");
                    report.failures += 1;
                }
            }
        }

        if !candidates.is_empty() {
            let mut rooms = self.rooms.write();
            for (record, updated_at) in candidates {
                match rooms.get(record.name()) {
                    Some(current) if Arc::ptr_eq(current, &record) => {}
                    _ => continue,
                }

                // Touched since it was saved: keep it for another cycle
                let Some(mut state) = record.try_lock() else {
                    continue;
                };
                if !state.waiters.is_empty() || state.updated_at != updated_at {
                    continue;
                }

                state.retired = true;
                drop(state);
                rooms.remove(record.name());
                report.evicted.push(record.name().to_string());
            }
        }

        if !report.evicted.is_empty() {
            info!(
                count = report.evicted.len(),
                rooms = %report.evicted.join(", "),
                "Removed dead rooms"
            );
            info!(open = self.room_count(), "Rooms still open");
        }

        let quota = self.config.saves_per_sweep();
        if quota > 0 {
            let mut records = self.snapshot();
            records.sort_by_key(|r| r.saved_at());
            for record in records.into_iter().take(quota) {
                match self.save_room(&record, false) {
                    Ok(()) => report.saved += 1,
                    Err(e) => {
                        error!(room = %record.name(), error = %e, "Failed to auto-save room");
                        report.failures += 1;
                    }
                }
            }
            if report.saved > 0 {
                debug!(saved = report.saved, "Auto-saved streams");
            }
        }

        report
    }

    fn snapshot(&self) -> Vec<Arc<StreamRecord>> {
        self.rooms.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;

    use super::*;

    fn test_config(dir: &TempDir) -> StreamConfig {
        StreamConfig {
            single_data_limit: 100,
            stream_data_limit: 1_000,
            store_location: dir.path().to_path_buf(),
            listen_timeout_ms: 2_000,
            signal_timeout_ms: 1_000,
            ..Default::default()
        }
    }

    #[test]
    fn test_get_or_create_returns_same_record() {
        let dir = TempDir::new().unwrap();
        let store = StreamStore::new(test_config(&dir));

        let a = store.get_or_create("abc").unwrap();
        let b = store.get_or_create("abc").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.room_count(), 1);
    }

    #[test]
    fn test_concurrent_first_access_creates_one_record() {
        let dir = TempDir::new().unwrap();
        let store = StreamStore::new(test_config(&dir));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.get_or_create("shared").unwrap())
            })
            .collect();
        let records: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(records.iter().all(|r| Arc::ptr_eq(r, &records[0])));
        assert_eq!(store.room_count(), 1);
    }

    #[tokio::test]
    async fn test_append_and_read() {
        let dir = TempDir::new().unwrap();
        let store = StreamStore::new(test_config(&dir));
        let room = store.get_or_create("abc").unwrap();

        let used = store.append(&room, "hello").await.unwrap();
        assert_eq!(used, 5);
        assert_eq!(store.read(&room, 0, -1).unwrap(), "hello");
        assert_eq!(room.len(), 5);
    }

    #[tokio::test]
    async fn test_append_rejects_empty_and_oversized() {
        let dir = TempDir::new().unwrap();
        let store = StreamStore::new(test_config(&dir));
        let room = store.get_or_create("abc").unwrap();

        assert!(matches!(
            store.append(&room, "").await,
            Err(StoreError::InvalidArgument(_))
        ));

        let big = "x".repeat(101);
        match store.append(&room, &big).await {
            Err(StoreError::InvalidArgument(msg)) => assert!(msg.contains("100")),
            other => panic!("expected InvalidArgument, got {:?}", other),
        }
        assert!(room.is_empty());
    }

    #[tokio::test]
    async fn test_append_refused_at_stream_limit() {
        let dir = TempDir::new().unwrap();
        let store = StreamStore::new(StreamConfig {
            single_data_limit: 10,
            stream_data_limit: 15,
            ..test_config(&dir)
        });
        let room = store.get_or_create("full").unwrap();

        store.append(&room, "0123456789").await.unwrap();
        // Below the limit, so this one still lands and overshoots
        store.append(&room, "0123456789").await.unwrap();
        assert_eq!(room.len(), 20);

        match store.append(&room, "x").await {
            Err(StoreError::InvalidArgument(msg)) => assert!(msg.contains("15")),
            other => panic!("expected InvalidArgument, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_offsets() {
        let dir = TempDir::new().unwrap();
        let store = StreamStore::new(test_config(&dir));
        let room = store.get_or_create("abc").unwrap();

        // Empty room: any non-negative start reads as ""
        assert_eq!(store.read(&room, 7, -1).unwrap(), "");
        assert!(store.read(&room, -1, -1).is_err());

        store.append(&room, "hello").await.unwrap();
        assert_eq!(store.read(&room, 2, 2).unwrap(), "ll");
        assert!(matches!(
            store.read(&room, 5, -1),
            Err(StoreError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_read_blocking_returns_existing_data() {
        let dir = TempDir::new().unwrap();
        let store = StreamStore::new(test_config(&dir));
        let room = store.get_or_create("abc").unwrap();
        store.append(&room, "hello").await.unwrap();

        let ready = store.read_blocking(&room, 1, -1).await.unwrap();
        assert_eq!(ready.data, "ello");
        assert!(ready.signal.is_none());
        assert_eq!(ready.used, 5);
        assert_eq!(ready.limit, 1_000);
        assert_eq!(room.waiter_count(), 0);
    }

    #[tokio::test]
    async fn test_read_blocking_times_out_empty() {
        let dir = TempDir::new().unwrap();
        let store = StreamStore::new(StreamConfig {
            listen_timeout_ms: 100,
            ..test_config(&dir)
        });
        let room = store.get_or_create("xyz").unwrap();

        let started = std::time::Instant::now();
        let ready = store.read_blocking(&room, 0, -1).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(ready.data, "");
        assert_eq!(ready.signalled(), 0);
        assert_eq!(room.waiter_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_append_wakes_all_waiters() {
        let dir = TempDir::new().unwrap();
        let store = StreamStore::new(test_config(&dir));
        let room = store.get_or_create("r1").unwrap();

        let readers: Vec<_> = (0..2)
            .map(|_| {
                let store = Arc::clone(&store);
                let room = Arc::clone(&room);
                tokio::spawn(async move { store.read_blocking(&room, 0, -1).await })
            })
            .collect();

        while room.waiter_count() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        store.append(&room, "hi").await.unwrap();

        for reader in readers {
            let ready = reader.await.unwrap().unwrap();
            assert_eq!(ready.data, "hi");
            assert_eq!(ready.signalled(), 2);
        }
        assert_eq!(room.waiter_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_waiter_registered_after_append_waits_for_next() {
        let dir = TempDir::new().unwrap();
        let store = StreamStore::new(test_config(&dir));
        let room = store.get_or_create("r2").unwrap();

        store.append(&room, "ab").await.unwrap();

        let reader = {
            let store = Arc::clone(&store);
            let room = Arc::clone(&room);
            tokio::spawn(async move { store.read_blocking(&room, 2, -1).await })
        };
        while room.waiter_count() < 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        store.append(&room, "cd").await.unwrap();
        let ready = reader.await.unwrap().unwrap();
        assert_eq!(ready.data, "cd");
        assert_eq!(ready.signalled(), 1);
        assert_eq!(ready.used, 4);
    }

    #[tokio::test]
    async fn test_cancelled_read_unregisters() {
        let dir = TempDir::new().unwrap();
        let store = StreamStore::new(test_config(&dir));
        let room = store.get_or_create("r3").unwrap();

        let result =
            tokio::time::timeout(Duration::from_millis(50), store.read_blocking(&room, 0, -1))
                .await;
        assert!(result.is_err());
        assert_eq!(room.waiter_count(), 0);
    }

    #[tokio::test]
    async fn test_force_save_and_revive() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let store = StreamStore::new(config.clone());
        let room = store.get_or_create("saved").unwrap();
        store.append(&room, "some text").await.unwrap();
        store.get_or_create("empty").unwrap();

        assert_eq!(store.force_save_all().unwrap(), 2);
        assert!(room.saved_at() > DateTime::<Utc>::MIN_UTC);
        // Empty rooms are not written by an ordinary save
        assert!(!dir.path().join("empty").exists());

        let fresh = StreamStore::new(config);
        let revived = fresh.get_or_create("saved").unwrap();
        assert_eq!(fresh.read(&revived, 0, -1).unwrap(), "some text");
    }

    #[test]
    fn test_flush_all_writes_empty_rooms() {
        let dir = TempDir::new().unwrap();
        let store = StreamStore::new(test_config(&dir));
        store.get_or_create("seen").unwrap();

        store.flush_all().unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("seen")).unwrap(),
            ""
        );
    }

    #[test]
    fn test_force_save_reports_io_failure() {
        let dir = TempDir::new().unwrap();
        // A file where the store directory should be
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();

        let store = StreamStore::new(StreamConfig {
            store_location: blocker.join("rooms"),
            ..test_config(&dir)
        });
        store.get_or_create("abc").unwrap();

        assert!(matches!(
            store.force_save_all(),
            Err(StoreError::Storage { .. })
        ));
    }

    #[tokio::test]
    async fn test_sweep_evicts_idle_room_and_revives() {
        let dir = TempDir::new().unwrap();
        let store = StreamStore::new(StreamConfig {
            dead_room_limit_ms: 0,
            saves_per_minute: 0.0,
            ..test_config(&dir)
        });
        let room = store.get_or_create("idle").unwrap();
        store.append(&room, "remember me").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let report = store.sweep();
        assert_eq!(report.evicted, vec!["idle".to_string()]);
        assert_eq!(store.room_count(), 0);
        assert!(room.is_retired());

        let revived = store.get_or_create("idle").unwrap();
        assert!(!Arc::ptr_eq(&room, &revived));
        assert_eq!(store.read(&revived, 0, -1).unwrap(), "remember me");
    }

    #[tokio::test]
    async fn test_append_to_retired_record_reaches_live_room() {
        let dir = TempDir::new().unwrap();
        let store = StreamStore::new(StreamConfig {
            dead_room_limit_ms: 0,
            saves_per_minute: 0.0,
            ..test_config(&dir)
        });
        let stale = store.get_or_create("late").unwrap();
        store.append(&stale, "one").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.sweep().evicted.len(), 1);

        store.append(&stale, " two").await.unwrap();
        let live = store.get_or_create("late").unwrap();
        assert_eq!(store.read(&live, 0, -1).unwrap(), "one two");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_sweep_keeps_rooms_with_waiters() {
        let dir = TempDir::new().unwrap();
        let store = StreamStore::new(StreamConfig {
            dead_room_limit_ms: 0,
            saves_per_minute: 0.0,
            ..test_config(&dir)
        });
        let room = store.get_or_create("busy").unwrap();

        let reader = {
            let store = Arc::clone(&store);
            let room = Arc::clone(&room);
            tokio::spawn(async move { store.read_blocking(&room, 0, -1).await })
        };
        while room.waiter_count() < 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(store.sweep().evicted.is_empty());
        assert_eq!(store.room_count(), 1);

        store.append(&room, "done").await.unwrap();
        assert_eq!(reader.await.unwrap().unwrap().data, "done");
    }

    #[tokio::test]
    async fn test_sweep_rotates_oldest_saves() {
        let dir = TempDir::new().unwrap();
        let store = StreamStore::new(StreamConfig {
            // One save per sweep
            check_interval_ms: 60_000,
            saves_per_minute: 1.0,
            ..test_config(&dir)
        });
        let first = store.get_or_create("first").unwrap();
        let second = store.get_or_create("second").unwrap();
        store.append(&first, "1").await.unwrap();
        store.append(&second, "2").await.unwrap();

        store.save_room(&first, false).unwrap();
        let report = store.sweep();
        assert!(report.evicted.is_empty());
        assert_eq!(report.saved, 1);
        // "second" had never been saved, so it went first
        assert!(dir.path().join("second").exists());
        assert!(second.saved_at() > DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn test_sweep_skips_locked_rooms() {
        let dir = TempDir::new().unwrap();
        let store = StreamStore::new(StreamConfig {
            dead_room_limit_ms: 0,
            saves_per_minute: 0.0,
            ..test_config(&dir)
        });
        let room = store.get_or_create("held").unwrap();
        std::thread::sleep(Duration::from_millis(10));

        {
            let _state = room.lock();
            assert!(store.sweep().evicted.is_empty());
        }
        {
            let _append = room.append_lock().try_lock().unwrap();
            assert!(store.sweep().evicted.is_empty());
        }
        assert_eq!(store.room_count(), 1);
        assert!(!room.is_retired());

        assert_eq!(store.sweep().evicted, vec!["held".to_string()]);
        assert!(room.is_retired());
    }

    #[tokio::test]
    async fn test_second_append_waits_for_first_drain() {
        let dir = TempDir::new().unwrap();
        let store = StreamStore::new(StreamConfig {
            signal_timeout_ms: 200,
            ..test_config(&dir)
        });
        let room = store.get_or_create("queue").unwrap();

        // A waiter that never leaves, so the first drain runs to its timeout
        let stuck = {
            let mut state = room.lock();
            room.register(&mut state)
        };

        let started = std::time::Instant::now();
        let first = async {
            let used = store.append(&room, "a").await.unwrap();
            (used, started.elapsed())
        };
        let second = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let used = store.append(&room, "b").await.unwrap();
            (used, started.elapsed())
        };
        let midway = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            room.contents()
        };

        let ((first_used, first_done), (second_used, second_done), during_drain) =
            tokio::join!(first, second, midway);

        assert_eq!(first_used, 1);
        assert_eq!(second_used, 2);
        assert_eq!(during_drain, "a");
        assert!(first_done >= Duration::from_millis(200));
        assert!(second_done >= first_done);

        // The stuck waiter kept the first append's payload
        assert_eq!(stuck.signal().unwrap().listeners_before_signal, 1);
        assert_eq!(room.waiter_count(), 0);
    }
}
