//! Lightweight global metrics for fsnap.
//!
//! Потокобезопасные атомарные счётчики для подсистем:
//! - cross-layer reads / HEAD writes
//! - index persistence
//! - snapshot lifecycle (create/delete/clone/rename)
//! - merge traffic during deletes

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

// ----- Reads / writes -----
static READ_CALLS: AtomicU64 = AtomicU64::new(0);
static READ_BYTES: AtomicU64 = AtomicU64::new(0);
static READ_LAYER_SEGMENTS: AtomicU64 = AtomicU64::new(0);
static WRITE_CALLS: AtomicU64 = AtomicU64::new(0);
static WRITE_BYTES: AtomicU64 = AtomicU64::new(0);

// ----- Index -----
static INDEX_SYNCS: AtomicU64 = AtomicU64::new(0);

// ----- Lifecycle -----
static SNAPSHOTS_CREATED: AtomicU64 = AtomicU64::new(0);
static SNAPSHOTS_DELETED: AtomicU64 = AtomicU64::new(0);
static SNAPSHOTS_CLONED: AtomicU64 = AtomicU64::new(0);
static SNAPSHOTS_RENAMED: AtomicU64 = AtomicU64::new(0);
static REVERTS_TO_PLAIN: AtomicU64 = AtomicU64::new(0);

// ----- Merge -----
static MERGE_BYTES_COPIED: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub read_calls: u64,
    pub read_bytes: u64,
    pub read_layer_segments: u64,
    pub write_calls: u64,
    pub write_bytes: u64,

    pub index_syncs: u64,

    pub snapshots_created: u64,
    pub snapshots_deleted: u64,
    pub snapshots_cloned: u64,
    pub snapshots_renamed: u64,
    pub reverts_to_plain: u64,

    pub merge_bytes_copied: u64,
}

impl MetricsSnapshot {
    /// Average number of layer segments stitched per read.
    pub fn avg_segments_per_read(&self) -> f64 {
        if self.read_calls == 0 {
            0.0
        } else {
            self.read_layer_segments as f64 / self.read_calls as f64
        }
    }
}

// ----- Recorders (reads / writes) -----
pub fn record_read(bytes: usize, segments: u64) {
    READ_CALLS.fetch_add(1, Ordering::Relaxed);
    READ_BYTES.fetch_add(bytes as u64, Ordering::Relaxed);
    READ_LAYER_SEGMENTS.fetch_add(segments, Ordering::Relaxed);
}

pub fn record_write(bytes: usize) {
    WRITE_CALLS.fetch_add(1, Ordering::Relaxed);
    WRITE_BYTES.fetch_add(bytes as u64, Ordering::Relaxed);
}

pub fn record_index_sync() {
    INDEX_SYNCS.fetch_add(1, Ordering::Relaxed);
}

// ----- Recorders (lifecycle) -----
pub fn record_snapshot_created() {
    SNAPSHOTS_CREATED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_snapshot_deleted() {
    SNAPSHOTS_DELETED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_snapshot_cloned() {
    SNAPSHOTS_CLONED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_snapshot_renamed() {
    SNAPSHOTS_RENAMED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_revert_to_plain() {
    REVERTS_TO_PLAIN.fetch_add(1, Ordering::Relaxed);
}

pub fn record_merge_copy(bytes: usize) {
    MERGE_BYTES_COPIED.fetch_add(bytes as u64, Ordering::Relaxed);
}

// ----- Snapshot / Reset -----
pub fn metrics_snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        read_calls: READ_CALLS.load(Ordering::Relaxed),
        read_bytes: READ_BYTES.load(Ordering::Relaxed),
        read_layer_segments: READ_LAYER_SEGMENTS.load(Ordering::Relaxed),
        write_calls: WRITE_CALLS.load(Ordering::Relaxed),
        write_bytes: WRITE_BYTES.load(Ordering::Relaxed),

        index_syncs: INDEX_SYNCS.load(Ordering::Relaxed),

        snapshots_created: SNAPSHOTS_CREATED.load(Ordering::Relaxed),
        snapshots_deleted: SNAPSHOTS_DELETED.load(Ordering::Relaxed),
        snapshots_cloned: SNAPSHOTS_CLONED.load(Ordering::Relaxed),
        snapshots_renamed: SNAPSHOTS_RENAMED.load(Ordering::Relaxed),
        reverts_to_plain: REVERTS_TO_PLAIN.load(Ordering::Relaxed),

        merge_bytes_copied: MERGE_BYTES_COPIED.load(Ordering::Relaxed),
    }
}

pub fn metrics_reset() {
    READ_CALLS.store(0, Ordering::Relaxed);
    READ_BYTES.store(0, Ordering::Relaxed);
    READ_LAYER_SEGMENTS.store(0, Ordering::Relaxed);
    WRITE_CALLS.store(0, Ordering::Relaxed);
    WRITE_BYTES.store(0, Ordering::Relaxed);

    INDEX_SYNCS.store(0, Ordering::Relaxed);

    SNAPSHOTS_CREATED.store(0, Ordering::Relaxed);
    SNAPSHOTS_DELETED.store(0, Ordering::Relaxed);
    SNAPSHOTS_CLONED.store(0, Ordering::Relaxed);
    SNAPSHOTS_RENAMED.store(0, Ordering::Relaxed);
    REVERTS_TO_PLAIN.store(0, Ordering::Relaxed);

    MERGE_BYTES_COPIED.store(0, Ordering::Relaxed);
}
