//! Centralized configuration and builder for fsnap.
//!
//! Goals:
//! - Single place to collect tunables instead of scattering env lookups.
//! - SnapConfig::from_env() reads FSNAP_* variables on top of the defaults.
//! - VolumeBuilder produces a SnapConfig which Volume::open_with_config consumes.
//!
//! Defaults:
//! - max_chain_depth = 20 (layers per open handle, HEAD included)
//! - index_sync = deferred (HEAD index persisted on sync/close/quiesce)
//! - copy_chunk = 1 MiB (merge copy buffer during snapshot delete)
//! - dir_mode = 0o750 (snapshot root and layer directories)

use std::fmt;

/// When the HEAD index is written back to disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexSync {
    /// Coalesce and persist after every write/truncate.
    OnWrite,
    /// Persist on explicit sync, last close and before lifecycle transitions.
    Deferred,
}

impl IndexSync {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "write" | "on-write" | "onwrite" | "sync" => Some(Self::OnWrite),
            "deferred" | "lazy" => Some(Self::Deferred),
            _ => None,
        }
    }
}

impl fmt::Display for IndexSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexSync::OnWrite => write!(f, "on-write"),
            IndexSync::Deferred => write!(f, "deferred"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SnapConfig {
    /// Maximum number of layers an open handle may hold.
    /// Env: FSNAP_MAX_CHAIN_DEPTH (default 20)
    pub max_chain_depth: usize,

    /// Env: FSNAP_INDEX_SYNC = write|deferred (default deferred)
    pub index_sync: IndexSync,

    /// Copy buffer used while merging layers on delete.
    /// Env: FSNAP_COPY_CHUNK (bytes, default 1 MiB, min 4096)
    pub copy_chunk: usize,

    /// Mode of directories created for snapshot roots and layers.
    /// Env: FSNAP_DIR_MODE (octal, default 750)
    pub dir_mode: u32,
}

impl Default for SnapConfig {
    fn default() -> Self {
        Self {
            max_chain_depth: crate::consts::DEFAULT_MAX_CHAIN_DEPTH,
            index_sync: IndexSync::Deferred,
            copy_chunk: crate::consts::DEFAULT_COPY_CHUNK,
            dir_mode: crate::consts::DEFAULT_DIR_MODE,
        }
    }
}

impl SnapConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("FSNAP_MAX_CHAIN_DEPTH") {
            if let Ok(n) = v.trim().parse::<usize>() {
                if n >= 1 {
                    cfg.max_chain_depth = n;
                }
            }
        }

        if let Ok(v) = std::env::var("FSNAP_INDEX_SYNC") {
            if let Some(mode) = IndexSync::parse(&v) {
                cfg.index_sync = mode;
            }
        }

        if let Ok(v) = std::env::var("FSNAP_COPY_CHUNK") {
            if let Ok(n) = v.trim().parse::<usize>() {
                cfg.copy_chunk = n.max(4096);
            }
        }

        if let Ok(v) = std::env::var("FSNAP_DIR_MODE") {
            if let Ok(m) = u32::from_str_radix(v.trim().trim_start_matches("0o"), 8) {
                cfg.dir_mode = m & 0o7777;
            }
        }

        cfg
    }

    pub fn with_max_chain_depth(mut self, n: usize) -> Self {
        self.max_chain_depth = n.max(1);
        self
    }

    pub fn with_index_sync(mut self, mode: IndexSync) -> Self {
        self.index_sync = mode;
        self
    }

    pub fn with_copy_chunk(mut self, bytes: usize) -> Self {
        self.copy_chunk = bytes.max(1);
        self
    }

    pub fn with_dir_mode(mut self, mode: u32) -> Self {
        self.dir_mode = mode & 0o7777;
        self
    }
}

impl fmt::Display for SnapConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SnapConfig {{ max_chain_depth: {}, index_sync: {}, copy_chunk: {}, dir_mode: {:o} }}",
            self.max_chain_depth, self.index_sync, self.copy_chunk, self.dir_mode,
        )
    }
}

/// Lightweight builder that produces a SnapConfig.
/// Volume exposes `Volume::builder()` returning this builder.
#[derive(Clone, Debug)]
pub struct VolumeBuilder {
    cfg: SnapConfig,
}

impl Default for VolumeBuilder {
    fn default() -> Self {
        // Start from env, then allow overrides.
        Self {
            cfg: SnapConfig::from_env(),
        }
    }
}

impl VolumeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a clean default (without reading env).
    pub fn from_default() -> Self {
        Self {
            cfg: SnapConfig::default(),
        }
    }

    pub fn max_chain_depth(mut self, n: usize) -> Self {
        self.cfg = self.cfg.with_max_chain_depth(n);
        self
    }

    pub fn index_sync(mut self, mode: IndexSync) -> Self {
        self.cfg.index_sync = mode;
        self
    }

    pub fn copy_chunk(mut self, bytes: usize) -> Self {
        self.cfg = self.cfg.with_copy_chunk(bytes);
        self
    }

    pub fn dir_mode(mut self, mode: u32) -> Self {
        self.cfg = self.cfg.with_dir_mode(mode);
        self
    }

    /// Finish the builder and obtain the configuration.
    pub fn build(self) -> SnapConfig {
        self.cfg
    }
}
