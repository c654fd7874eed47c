use anyhow::Error;
use log::{debug, warn};
use thiserror::Error as ThisError;

use crate::bitfield::Bitfield;
use crate::dirent_store::{DirentStore, ParentIsOffset};
use crate::inode_table::InodeTable;
use crate::packed::OutOfMemory;
use crate::volume::Volume;
use crate::{ListOptions, ROOT_INO};

/// A fatal scan failure. Each variant is a distinct failure the caller may
/// want to report differently; everything recoverable (single unreadable
/// inodes, unresolvable paths) is warned about and skipped instead.
#[derive(Debug, ThisError)]
pub enum ScanError {
    #[error(transparent)]
    Alloc(#[from] OutOfMemory),

    #[error("while scanning inodes: {0:#}")]
    Scan(Error),

    #[error("while iterating directory inode #{ino}: {err:#}")]
    DirIterate { ino: u32, err: Error },

    #[error("directory entry references inode #{ino}, which the inode table does not hold")]
    LookupMiss { ino: u32 },
}

/// The two-pass scan over one volume.
///
/// All four working buffers (two bitfields, the inode table, the dirent
/// store) live and die with one run: construct, [`run`](Scanner::run), use
/// the returned [`Listing`], drop. Nothing is shared between runs and no
/// state lives outside the value.
pub struct Scanner<'v, V: Volume> {
    vol: &'v V,
    opts: ListOptions,
}

/// What a completed scan leaves behind: every used inode, every name, and
/// the selection bits — everything emission needs, with the volume no
/// longer required.
pub struct Listing {
    pub(crate) table: InodeTable,
    pub(crate) dirents: DirentStore<ParentIsOffset>,
    pub(crate) selected: Bitfield,
}

impl Listing {
    /// Number of used inodes recorded.
    pub fn inodes(&self) -> usize {
        self.table.len()
    }

    /// Number of directory entries recorded.
    pub fn names(&self) -> usize {
        self.dirents.len()
    }
}

impl<'v, V: Volume> Scanner<'v, V> {
    pub fn new(vol: &'v V, opts: &ListOptions) -> Scanner<'v, V> {
        Scanner {
            vol,
            opts: opts.clone(),
        }
    }

    /// Run both passes and the parent fix-up. `buffer_blocks` sizes the
    /// inode-table read runs (0 picks the volume's default).
    pub fn run(self, buffer_blocks: usize) -> Result<Listing, ScanError> {
        let nbits = self.vol.inode_count() as u64 + 1;
        let mut is_dir = Bitfield::new(nbits)?;
        let mut selected = Bitfield::new(nbits)?;

        let mut table = self.pass1(buffer_blocks, &mut is_dir, &mut selected)?;
        let dirents = self.pass2(&mut table, &is_dir)?;

        debug!("fix-up: rewriting parent links to store offsets");
        let dirents = dirents.fix_up(&table);

        for index in 0..table.len() {
            let ino = table.ino_at(index);
            if ino != ROOT_INO && table.dirent_offset_at(index) == 0 {
                warn!("inode #{} is in use but no directory names it", ino);
            }
        }

        Ok(Listing {
            table,
            dirents,
            selected,
        })
    }

    /// Pass 1: sequential sweep of the on-disk inode table. Fills the inode
    /// table with every used inode (ascending, which pass 2's lookups rely
    /// on) and the two bitfields.
    fn pass1(
        &self,
        buffer_blocks: usize,
        is_dir: &mut Bitfield,
        selected: &mut Bitfield,
    ) -> Result<InodeTable, ScanError> {
        let first_usable = self.vol.first_usable_ino();
        let after = self.opts.after;
        let mut table = InodeTable::new(self.opts.times);
        let mut matched = 0u64;

        if after.is_none() {
            selected.fill(true);
        }

        debug!("pass 1: scanning the inode table");
        self.vol
            .scan_inodes(buffer_blocks, &mut |ino, record| {
                let meta = match record {
                    Ok(meta) => meta,
                    Err(e) => {
                        warn!("inode #{}: scan error: {:#}", ino, e);
                        return Ok(());
                    }
                };
                if ino < first_usable && ino != ROOT_INO {
                    return Ok(());
                }
                if meta.links_count == 0 {
                    return Ok(());
                }
                if meta.is_dir() {
                    is_dir.set(ino);
                }
                if let Some(threshold) = after {
                    if meta.mtime >= threshold || meta.ctime >= threshold {
                        selected.set(ino);
                        matched += 1;
                    }
                }
                table.push(ino, &meta)?;
                Ok(())
            })
            .map_err(fatal_scan)?;

        debug!("pass 1: {} inodes stored", table.len());
        if after.is_some() {
            debug!("pass 1: {} inodes match the time filter", matched);
        }
        Ok(table)
    }

    /// Pass 2: iterate the entries of every directory found in pass 1,
    /// recording each name and each inode's first-seen entry offset.
    fn pass2(&self, table: &mut InodeTable, is_dir: &Bitfield) -> Result<DirentStore, ScanError> {
        debug!("pass 2: scanning directory entries");
        let mut dirents = DirentStore::new();

        for index in 0..table.len() {
            let dir_ino = table.ino_at(index);
            if !is_dir.get(dir_ino) {
                continue;
            }

            self.vol
                .iterate_dir(dir_ino, &mut |child, name| {
                    // A directory's `.` entry repeats the directory itself;
                    // the directory is already reachable through its entry in
                    // the parent. Only the root has no such entry, so its `.`
                    // is kept and becomes the (empty-named) root record.
                    if child == dir_ino && child != ROOT_INO {
                        return Ok(());
                    }
                    if name == b".." {
                        return Ok(());
                    }

                    let child_idx = match table.lookup(child) {
                        Some(i) => i,
                        None => return Err(ScanError::LookupMiss { ino: child }.into()),
                    };
                    let stored: &[u8] = if child == ROOT_INO { b"" } else { name };
                    let offset = dirents.push(child_idx as u32, index as u32, stored)?;

                    // first name seen wins: stable hardlink canonicalisation
                    if table.dirent_offset_at(child_idx) == 0 {
                        table.set_dirent_offset(child_idx, offset);
                    }
                    Ok(())
                })
                .map_err(|e| fatal_dir(dir_ino, e))?;
        }

        debug!(
            "pass 2: {} directory entries stored ({} bytes)",
            dirents.len(),
            dirents.used()
        );
        Ok(dirents)
    }
}

fn fatal_scan(e: Error) -> ScanError {
    match e.downcast::<OutOfMemory>() {
        Ok(oom) => ScanError::Alloc(oom),
        Err(e) => ScanError::Scan(e),
    }
}

fn fatal_dir(ino: u32, e: Error) -> ScanError {
    match e.downcast::<ScanError>() {
        Ok(fatal) => fatal,
        Err(e) => match e.downcast::<OutOfMemory>() {
            Ok(oom) => ScanError::Alloc(oom),
            Err(err) => ScanError::DirIterate { ino, err },
        },
    }
}
