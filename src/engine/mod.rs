//! The disk/filesystem engine contract.
//!
//! The pipeline never touches block devices or filesystems itself; it
//! drives an engine session bound to exactly one backing image file. The
//! trait mirrors the libguestfs call surface the tool needs, and the
//! production implementation lives in [`guestfish`]. Tests substitute an
//! in-memory engine.

pub mod guestfish;

use std::path::Path;
use thiserror::Error;

/// Failures reported by an engine implementation.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine session failed to start: {0}")]
    Session(String),
    #[error("{op}: {message}")]
    Op { op: &'static str, message: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn op(op: &'static str, message: impl Into<String>) -> Self {
        EngineError::Op {
            op,
            message: message.into(),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Options for archive import into the target filesystem.
///
/// Extended attributes and ACLs are off by default: the exported container
/// filesystem carries overlay-specific metadata the target filesystem has
/// no use for.
#[derive(Debug, Clone, Copy, Default)]
pub struct TarInOptions {
    pub xattrs: bool,
    pub acls: bool,
}

/// One externally-owned disk/filesystem engine session.
///
/// All calls are blocking; the session is exclusively owned by one
/// pipeline run. The caller releases the session, the pipeline never
/// cleans up after a failure.
pub trait DiskEngine {
    /// Bind a raw image file as a backing drive.
    fn add_drive(&mut self, path: &Path) -> EngineResult<()>;

    /// Start the engine back-end. Must be called after [`Self::add_drive`].
    fn launch(&mut self) -> EngineResult<()>;

    /// Device handles for all attached drives.
    fn list_devices(&mut self) -> EngineResult<Vec<String>>;

    /// Initialize an empty partition table of the given kind.
    fn part_init(&mut self, device: &str, table: &str) -> EngineResult<()>;

    /// Add a primary partition spanning the given sectors.
    fn part_add(&mut self, device: &str, start: i64, end: i64) -> EngineResult<()>;

    fn part_set_name(&mut self, device: &str, partnum: u32, name: &str) -> EngineResult<()>;

    fn part_set_gpt_type(&mut self, device: &str, partnum: u32, guid: &str) -> EngineResult<()>;

    /// Device nodes of all partitions across all devices.
    fn list_partitions(&mut self) -> EngineResult<Vec<String>>;

    fn part_to_partnum(&mut self, partition: &str) -> EngineResult<u32>;

    fn part_to_dev(&mut self, partition: &str) -> EngineResult<String>;

    fn part_get_name(&mut self, device: &str, partnum: u32) -> EngineResult<String>;

    /// Create a filesystem on a partition device node.
    fn mkfs(&mut self, fs_type: &str, device: &str, label: Option<&str>) -> EngineResult<()>;

    fn mkdir_p(&mut self, path: &str) -> EngineResult<()>;

    fn mount(&mut self, device: &str, mount_point: &str) -> EngineResult<()>;

    fn write_file(&mut self, path: &str, content: &str) -> EngineResult<()>;

    fn write_append(&mut self, path: &str, content: &str) -> EngineResult<()>;

    fn read_file(&mut self, path: &str) -> EngineResult<String>;

    fn rm_f(&mut self, path: &str) -> EngineResult<()>;

    /// Run a command inside the target root, returning its stdout.
    fn command(&mut self, argv: &[&str]) -> EngineResult<String>;

    /// Extract a tar archive into a directory inside the target.
    fn tar_in(&mut self, source: &Path, dest: &str, opts: TarInOptions) -> EngineResult<()>;

    /// Flush everything to the backing image and end the session.
    fn shutdown(&mut self) -> EngineResult<()>;
}
