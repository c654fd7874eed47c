use anyhow::Error;

/// The inode fields the scanner reads. A fraction of the on-disk inode; the
/// scan decodes only these to keep the pass over 10⁸ records cheap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InodeMeta {
    pub mode: u16,
    pub links_count: u16,
    pub mtime: u32,
    pub ctime: u32,
}

impl InodeMeta {
    pub fn is_dir(&self) -> bool {
        self.mode & 0xf000 == 0x4000
    }
}

/// Receives each scanned inode. Per-inode read failures arrive as `Err` and
/// the scan continues past them; an `Err` *returned* by the sink aborts the
/// whole scan.
pub type InodeSink<'a> = dyn FnMut(u32, Result<InodeMeta, Error>) -> Result<(), Error> + 'a;

/// Receives `(child inode, name)` for each live directory entry, `.` and
/// deleted entries included. Names are raw bytes, at most 255 of them.
pub type DirentSink<'a> = dyn FnMut(u32, &[u8]) -> Result<(), Error> + 'a;

/// The narrow contract the scanner needs from a filesystem volume. The core
/// never touches on-disk structures directly; everything it knows about the
/// volume arrives through these four calls.
pub trait Volume {
    /// Total number of inodes the filesystem was formatted with.
    fn inode_count(&self) -> u32;

    /// First non-reserved inode number. Inodes below this, other than the
    /// root, never appear in directories.
    fn first_usable_ino(&self) -> u32;

    /// Drive `sink` over every inode in inode-number order, reading the
    /// inode table in runs of `buffer_blocks` blocks (0 picks a default).
    fn scan_inodes(&self, buffer_blocks: usize, sink: &mut InodeSink<'_>) -> Result<(), Error>;

    /// Drive `sink` over every entry of the directory `dir_ino`, in on-disk
    /// order.
    fn iterate_dir(&self, dir_ino: u32, sink: &mut DirentSink<'_>) -> Result<(), Error>;
}
