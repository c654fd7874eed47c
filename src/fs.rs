use anyhow::{Context, Error};
use log::debug;
use positioned_io::ReadAt;

use crate::block_groups::BlockGroups;
use crate::extents::collect_extents;
use crate::raw::{RawInode, RawSuperblock};
use crate::volume::{DirentSink, InodeMeta, InodeSink, Volume};
use crate::{assumption_failed, parse_error, read_le16, read_le32};

const EXT4_SUPER_MAGIC: u16 = 0xef53;
const SUPERBLOCK_OFFSET: u64 = 1024;

const INCOMPAT_COMPRESSION: u32 = 0x0001;
const INCOMPAT_JOURNAL_DEV: u32 = 0x0008;
const INCOMPAT_META_BG: u32 = 0x0010;
const INCOMPAT_64BIT: u32 = 0x0080;
const INCOMPAT_DIRDATA: u32 = 0x1000;
const INCOMPAT_INLINE_DATA: u32 = 0x8000;
const INCOMPAT_ENCRYPT: u32 = 0x10000;

// Each of these would silently corrupt the directory walk, so refuse them
// up front. Anything else (filetype, extents, flex_bg, recover, ...) either
// doesn't affect a metadata-only read or is handled below.
const INCOMPAT_UNSUPPORTED: u32 = INCOMPAT_COMPRESSION
    | INCOMPAT_JOURNAL_DEV
    | INCOMPAT_META_BG
    | INCOMPAT_DIRDATA
    | INCOMPAT_INLINE_DATA
    | INCOMPAT_ENCRYPT;

const EXT4_EXTENTS_FL: u32 = 0x0008_0000;

const GOOD_OLD_FIRST_INO: u32 = 11;
const GOOD_OLD_INODE_SIZE: u16 = 128;

/// How many inode-table blocks one scan read fetches when the caller does
/// not say. Large enough that a pass over the table is a handful of reads
/// per group, small enough to stay off the heap's large-allocation path.
const DEFAULT_SCAN_BUFFER_BLOCKS: usize = 64;

/// Read-only view of an ext2/3/4 filesystem over any [`ReadAt`]: a block
/// device node, a plain image file, an in-memory buffer.
///
/// Only the metadata the scan needs is parsed: the superblock geometry, the
/// group descriptors' inode-table locations, inode records, and directory
/// entry blocks. File contents, journals, checksums and bitmaps are never
/// read.
pub struct ExtFs<R: ReadAt> {
    inner: R,
    block_size: u32,
    inodes_count: u32,
    first_ino: u32,
    groups: BlockGroups,
}

impl<R: ReadAt> ExtFs<R> {
    pub fn open(inner: R) -> Result<ExtFs<R>, Error> {
        let mut sb = [0u8; 1024];
        inner
            .read_exact_at(SUPERBLOCK_OFFSET, &mut sb)
            .context("reading superblock")?;
        let raw = RawSuperblock::from_slice(&sb);

        if EXT4_SUPER_MAGIC != raw.s_magic {
            return Err(parse_error(format!(
                "invalid magic number: {:x} should be {:x}",
                raw.s_magic, EXT4_SUPER_MAGIC
            )));
        }

        let unsupported = raw.s_feature_incompat & INCOMPAT_UNSUPPORTED;
        if 0 != unsupported {
            return Err(assumption_failed(format!(
                "unsupported incompatible feature flags: {:#x}",
                unsupported
            )));
        }

        let block_size = match raw.s_log_block_size {
            0..=6 => 1024u32 << raw.s_log_block_size,
            log => {
                return Err(parse_error(format!(
                    "unexpected block size: 2^{}",
                    log + 10
                )))
            }
        };

        let (first_ino, inode_size) = match raw.s_rev_level {
            0 => (GOOD_OLD_FIRST_INO, GOOD_OLD_INODE_SIZE),
            1 => (raw.s_first_ino, raw.s_inode_size),
            rev => return Err(parse_error(format!("unsupported rev_level {}", rev))),
        };
        if inode_size < 128 || !inode_size.is_power_of_two() {
            return Err(parse_error(format!("unexpected inode size {}", inode_size)));
        }

        let sixty_four_bit = raw.s_feature_incompat & INCOMPAT_64BIT != 0;
        let blocks_count = if sixty_four_bit {
            u64::from(raw.s_blocks_count_lo) | (u64::from(raw.s_blocks_count_hi) << 32)
        } else {
            u64::from(raw.s_blocks_count_lo)
        };
        let groups_count = ((blocks_count - u64::from(raw.s_first_data_block))
            + u64::from(raw.s_blocks_per_group)
            - 1)
            / u64::from(raw.s_blocks_per_group);
        let groups_count = u32::try_from(groups_count).context("group count")?;

        let desc_size = if sixty_four_bit {
            raw.s_desc_size.clamp(32, 4096)
        } else {
            32
        };

        let desc_offset = u64::from(raw.s_first_data_block + 1) * u64::from(block_size);
        let mut desc_table = vec![0u8; groups_count as usize * usize::from(desc_size)];
        inner
            .read_exact_at(desc_offset, &mut desc_table)
            .context("reading group descriptors")?;

        let groups = BlockGroups::new(
            &desc_table,
            desc_size,
            groups_count,
            raw.s_inodes_per_group,
            block_size,
            inode_size,
        )?;

        debug!(
            "fs open: {} inodes in {} groups, {} byte blocks",
            raw.s_inodes_count,
            groups.len(),
            block_size
        );

        Ok(ExtFs {
            inner,
            block_size,
            inodes_count: raw.s_inodes_count,
            first_ino,
            groups,
        })
    }

    fn load_raw_inode(&self, ino: u32) -> Result<RawInode, Error> {
        if ino < 1 || ino > self.inodes_count {
            return Err(assumption_failed(format!("inode #{} out of range", ino)));
        }
        let pos = self.groups.inode_position(ino)?;
        let mut data = vec![0u8; usize::from(self.groups.inode_size)];
        self.inner
            .read_exact_at(pos, &mut data)
            .with_context(|| format!("reading inode #{}", ino))?;
        Ok(RawInode::from_slice(&data))
    }

    /// The physical block numbers holding a directory's entries, in logical
    /// order. 0 entries mark holes (never seen in healthy directories).
    fn dir_blocks(&self, inode: &RawInode) -> Result<Vec<u64>, Error> {
        let block_size = u64::from(self.block_size);
        let size = u64::from(inode.i_size_lo);
        let want = usize::try_from((size + block_size - 1) / block_size)?;

        let mut blocks = Vec::with_capacity(want);
        if inode.i_flags & EXT4_EXTENTS_FL != 0 {
            for extent in collect_extents(&self.inner, self.block_size, &inode.i_block)? {
                for i in 0..u32::from(extent.len) {
                    let logical = extent.block as usize + i as usize;
                    if logical >= want {
                        break;
                    }
                    // extents arrive sorted; pad any hole before this run
                    while blocks.len() < logical {
                        blocks.push(0);
                    }
                    if blocks.len() == logical {
                        blocks.push(extent.start + u64::from(i));
                    }
                }
            }
            while blocks.len() < want {
                blocks.push(0);
            }
        } else {
            for i in 0..12 {
                self.push_map_level(read_le32(&inode.i_block[i * 4..]), 0, want, &mut blocks)?;
            }
            self.push_map_level(read_le32(&inode.i_block[12 * 4..]), 1, want, &mut blocks)?;
            self.push_map_level(read_le32(&inode.i_block[13 * 4..]), 2, want, &mut blocks)?;
            self.push_map_level(read_le32(&inode.i_block[14 * 4..]), 3, want, &mut blocks)?;
        }
        blocks.truncate(want);
        Ok(blocks)
    }

    /// Walk one entry of the classic block map: level 0 is a data block,
    /// higher levels are blocks of block pointers.
    fn push_map_level(
        &self,
        block: u32,
        level: u32,
        want: usize,
        out: &mut Vec<u64>,
    ) -> Result<(), Error> {
        if out.len() >= want {
            return Ok(());
        }
        if 0 == level {
            out.push(u64::from(block));
            return Ok(());
        }

        let per_block = self.block_size as usize / 4;
        if 0 == block {
            // a hole spanning the whole subtree
            let span = per_block.pow(level).min(want - out.len());
            out.resize(out.len() + span, 0);
            return Ok(());
        }

        let mut data = vec![0u8; self.block_size as usize];
        self.inner
            .read_exact_at(u64::from(block) * u64::from(self.block_size), &mut data)?;
        for chunk in data.chunks_exact(4) {
            self.push_map_level(read_le32(chunk), level - 1, want, out)?;
            if out.len() >= want {
                break;
            }
        }
        Ok(())
    }
}

/// Decode one block of on-disk directory entries, feeding live ones to the
/// sink. Entries with inode 0 are dead or are htree/checksum filler; both
/// kinds are skipped by record length like everything else.
fn walk_dirent_block(block: &[u8], sink: &mut DirentSink<'_>) -> Result<(), Error> {
    let mut offset = 0;
    while offset + 8 <= block.len() {
        let ino = read_le32(&block[offset..]);
        let rec_len = usize::from(read_le16(&block[offset + 4..]));
        let name_len = usize::from(block[offset + 6]);

        if rec_len < 8 || rec_len % 4 != 0 || offset + rec_len > block.len() {
            return Err(parse_error(format!(
                "bad dirent record length {} at block offset {}",
                rec_len, offset
            )));
        }

        if 0 != ino && 0 != name_len {
            if 8 + name_len > rec_len {
                return Err(parse_error(format!(
                    "dirent name ({} bytes) overflows its record ({} bytes)",
                    name_len, rec_len
                )));
            }
            sink(ino, &block[offset + 8..offset + 8 + name_len])?;
        }

        offset += rec_len;
    }
    Ok(())
}

impl<R: ReadAt> Volume for ExtFs<R> {
    fn inode_count(&self) -> u32 {
        self.inodes_count
    }

    fn first_usable_ino(&self) -> u32 {
        self.first_ino
    }

    fn scan_inodes(&self, buffer_blocks: usize, sink: &mut InodeSink<'_>) -> Result<(), Error> {
        let buffer_blocks = if 0 == buffer_blocks {
            DEFAULT_SCAN_BUFFER_BLOCKS
        } else {
            buffer_blocks
        };
        let inode_size = usize::from(self.groups.inode_size);
        let per_group = self.groups.inodes_per_group;
        let per_chunk = ((buffer_blocks * self.block_size as usize) / inode_size).max(1) as u32;
        let mut chunk = vec![0u8; per_chunk as usize * inode_size];

        for (gi, group) in self.groups.iter().enumerate() {
            let base_ino = gi as u32 * per_group + 1;
            if base_ino > self.inodes_count {
                break;
            }
            if group.inodes_uninit {
                continue;
            }
            let table_pos = group.inode_table_block * u64::from(self.block_size);

            let mut slot = 0u32;
            while slot < per_group {
                let first = base_ino + slot;
                if first > self.inodes_count {
                    break;
                }
                let count = per_chunk
                    .min(per_group - slot)
                    .min(self.inodes_count - first + 1);
                let data = &mut chunk[..count as usize * inode_size];

                match self
                    .inner
                    .read_exact_at(table_pos + u64::from(slot) * inode_size as u64, data)
                {
                    Err(e) => {
                        // this run of the table is unreadable; report it
                        // against its first inode and keep scanning
                        sink(
                            first,
                            Err(Error::from(e).context(format!(
                                "reading {} inode records from #{}",
                                count, first
                            ))),
                        )?;
                    }
                    Ok(()) => {
                        for (i, record) in data.chunks_exact(inode_size).enumerate() {
                            let meta = InodeMeta {
                                mode: read_le16(&record[0x00..]),
                                links_count: read_le16(&record[0x1a..]),
                                mtime: read_le32(&record[0x10..]),
                                ctime: read_le32(&record[0x0c..]),
                            };
                            sink(first + i as u32, Ok(meta))?;
                        }
                    }
                }
                slot += count;
            }
        }
        Ok(())
    }

    fn iterate_dir(&self, dir_ino: u32, sink: &mut DirentSink<'_>) -> Result<(), Error> {
        let inode = self.load_raw_inode(dir_ino)?;
        if 0x4000 != inode.i_mode & 0xf000 {
            return Err(assumption_failed(format!(
                "inode #{} is not a directory",
                dir_ino
            )));
        }

        let mut data = vec![0u8; self.block_size as usize];
        for block in self.dir_blocks(&inode)? {
            if 0 == block {
                continue;
            }
            self.inner
                .read_exact_at(block * u64::from(self.block_size), &mut data)
                .with_context(|| format!("reading directory block {} of inode #{}", block, dir_ino))?;
            walk_dirent_block(&data, sink)?;
        }
        Ok(())
    }
}
