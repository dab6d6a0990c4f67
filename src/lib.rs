//! fsnap: per-file copy-on-write snapshots.
//!
//! A logical file can be frozen into named, read-only snapshots while a
//! writable tip (HEAD) keeps accepting changes. Unchanged bytes are never
//! duplicated: each layer's interval index records which byte ranges that
//! layer owns, and reads are stitched together newest layer first.

// Базовые модули
pub mod consts;
pub mod error;
pub mod config;
pub mod metrics;
pub mod util;

// Хранилище атрибутов и блокировки
pub mod attrs;
pub mod lock;

// Интервальный индекс и раскладка на диске
pub mod index;  // src/index/{mod,codec}.rs
pub mod layout;

// Цепочки слоёв и жизненный цикл снапшотов
pub mod chain;      // src/chain/{mod,open,read,write}.rs
pub mod lifecycle;  // src/lifecycle/{mod,create,delete,clone,rename}.rs

// Публичное API
pub mod handle;
pub mod volume;

// Удобные реэкспорты
pub use attrs::{AttrStore, JsonAttrs, MemAttrs};
pub use chain::ReadOutcome;
pub use config::{IndexSync, SnapConfig, VolumeBuilder};
pub use error::{Result, SnapError};
pub use handle::{FileHandle, SnapshotReader};
pub use index::{Interval, IntervalIndex};
pub use lifecycle::DeleteOutcome;
pub use metrics::{metrics_reset, metrics_snapshot, MetricsSnapshot};
pub use volume::{Access, FileStat, SnapshotInfo, Volume};
