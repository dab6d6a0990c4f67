//! Names and constants of the on-disk snapshot layout.

// -------- Layer directory entries --------
pub const HEAD: &str = "HEAD";
/// Reserved: the dispatch layer shows the snapshot listing under this name.
pub const LIST: &str = "list";
pub const DATA_FILE: &str = "data";
pub const INDEX_FILE: &str = "index";
pub const PARENT_LINK: &str = "parent";
pub const CHILD_LINK: &str = "child";

// -------- Attributes --------
pub const SNAP_ROOT_KEY: &str = "trusted.fsnap.snapshot.file";
pub const SNAP_ROOT_VALUE: &[u8] = b"yes";
pub const IDENTITY_KEY: &str = "trusted.fsnap.gfid";

// -------- Temp names used during transitions --------
pub const TEMP_PART_SUFFIX: &str = ".fsnap-snapshot.part";
pub const TEMP_REVERT_SUFFIX: &str = ".fsnap-revert.tmp";
pub const INDEX_TMP_SUFFIX: &str = ".tmp";
pub const UNSHARE_TMP_SUFFIX: &str = ".fsnap-unshare.tmp";

// -------- Index format --------
// [start u64 BE][size u64 BE], no header.
pub const INDEX_RECORD_SIZE: usize = 16;

// -------- Limits / modes --------
pub const DEFAULT_MAX_CHAIN_DEPTH: usize = 20;
pub const DEFAULT_COPY_CHUNK: usize = 1024 * 1024;
pub const DEFAULT_DIR_MODE: u32 = 0o750;
pub const FROZEN_DATA_MODE: u32 = 0o400;
pub const FROZEN_INDEX_MODE: u32 = 0o400;
pub const HEAD_INDEX_MODE: u32 = 0o600;

// -------- Volume --------
pub const VOLUME_LOCK_FILE: &str = ".fsnap.lock";
pub const VOLUME_META_DIR: &str = ".fsnap";
pub const ATTRS_FILE: &str = "attrs.json";
