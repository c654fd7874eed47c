//! List every pathname of an ext2/3/4 filesystem straight off the inode table.
//!
//! Instead of recursing through directories with `readdir`, the scanner makes
//! two sequential passes over the volume's metadata: pass 1 reads the on-disk
//! inode table and records every in-use inode, pass 2 reads every directory's
//! entry blocks and records an inode→parent-entry graph. Full pathnames are
//! then reconstructed by walking that graph backwards from any entry to the
//! root. Cost is proportional to inode-table size and directory-block count,
//! not to tree depth and breadth, and the volume is only ever touched with
//! large sequential reads.
//!
//! ```no_run
//! use e2names::{ExtFs, ListOptions, Scanner};
//!
//! # fn main() -> anyhow::Result<()> {
//! let file = std::fs::File::open("/dev/sda1")?;
//! let fs = ExtFs::open(file)?;
//! let opts = ListOptions::default();
//! let mut listing = Scanner::new(&fs, &opts).run(0)?;
//! listing.write_to(&opts, &mut std::io::stdout().lock())?;
//! # Ok(())
//! # }
//! ```
//!
//! The scanner core only sees the narrow [`Volume`] trait; [`ExtFs`] is the
//! ext2/3/4 implementation of it. Everything is read-only and single-threaded.

use anyhow::Error;

mod bitfield;
mod block_groups;
mod dirent_store;
mod emit;
mod extents;
mod fs;
mod inode_table;
mod packed;
mod raw;
mod resolve;
mod scanner;
mod volume;

pub use crate::bitfield::Bitfield;
pub use crate::dirent_store::{Dirent, DirentStore, ParentIsOffset, ParentIsTableIndex};
pub use crate::fs::ExtFs;
pub use crate::inode_table::{InodeTable, TimeColumns};
pub use crate::packed::{OutOfMemory, PackedBuf};
pub use crate::resolve::{resolve_path, ResolveError, PATH_MAX};
pub use crate::scanner::{Listing, ScanError, Scanner};
pub use crate::volume::{DirentSink, InodeMeta, InodeSink, Volume};

/// The root directory's inode number, fixed by the ext2 layout.
pub const ROOT_INO: u32 = 2;

/// What a single run should produce. Shared by the scanner (which needs the
/// `after` filter and the time columns while reading inodes) and the emitter
/// (which needs the rest while printing).
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Only select inodes with mtime or ctime at or after this epoch second.
    pub after: Option<u32>,
    /// Which timestamp columns to store and print.
    pub times: TimeColumns,
    /// Emit at most one pathname per inode.
    pub unique: bool,
    /// Terminate records with NUL instead of newline.
    pub print0: bool,
}

pub(crate) fn read_le16(data: &[u8]) -> u16 {
    u16::from_le_bytes([data[0], data[1]])
}

pub(crate) fn read_le32(data: &[u8]) -> u32 {
    u32::from_le_bytes([data[0], data[1], data[2], data[3]])
}

pub(crate) fn parse_error(msg: String) -> Error {
    anyhow::anyhow!("parse error: {}", msg)
}

pub(crate) fn assumption_failed(msg: String) -> Error {
    anyhow::anyhow!("assumption failed: {}", msg)
}
