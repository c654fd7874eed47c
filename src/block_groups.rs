use anyhow::Error;

use crate::assumption_failed;
use crate::raw::RawGroupDesc;

const EXT4_BLOCK_GROUP_INODES_UNINIT: u16 = 0b1;

#[derive(Debug)]
pub struct Entry {
    pub inode_table_block: u64,
    pub inodes_uninit: bool,
}

/// Where each block group keeps its slice of the inode table.
///
/// Parsed once from the group-descriptor table; the inode scan walks the
/// groups in order and per-inode loads compute their byte position from the
/// group geometry.
#[derive(Debug)]
pub struct BlockGroups {
    groups: Vec<Entry>,
    pub inodes_per_group: u32,
    pub inode_size: u16,
    pub block_size: u32,
}

impl BlockGroups {
    pub fn new(
        desc_table: &[u8],
        desc_size: u16,
        groups_count: u32,
        inodes_per_group: u32,
        block_size: u32,
        inode_size: u16,
    ) -> Result<BlockGroups, Error> {
        let desc_size = usize::from(desc_size);
        if desc_table.len() < groups_count as usize * desc_size {
            return Err(assumption_failed(format!(
                "group descriptor table too short: {} bytes for {} groups of {}",
                desc_table.len(),
                groups_count,
                desc_size
            )));
        }

        let mut groups = Vec::with_capacity(groups_count as usize);
        for block in 0..groups_count as usize {
            let raw = RawGroupDesc::from_slice(&desc_table[block * desc_size..][..desc_size]);

            let inode_table_block = u64::from(raw.bg_inode_table_lo)
                | (u64::from(raw.bg_inode_table_hi.unwrap_or(0)) << 32);

            groups.push(Entry {
                inode_table_block,
                inodes_uninit: raw.bg_flags & EXT4_BLOCK_GROUP_INODES_UNINIT != 0,
            });
        }

        Ok(BlockGroups {
            groups,
            inodes_per_group,
            inode_size,
            block_size,
        })
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.groups.iter()
    }

    /// Byte position of the on-disk record for `ino`.
    pub fn inode_position(&self, ino: u32) -> Result<u64, Error> {
        let group = ((ino - 1) / self.inodes_per_group) as usize;
        let index = u64::from((ino - 1) % self.inodes_per_group);
        let entry = self.groups.get(group).ok_or_else(|| {
            assumption_failed(format!("inode #{} is beyond the last block group", ino))
        })?;
        Ok(entry.inode_table_block * u64::from(self.block_size)
            + index * u64::from(self.inode_size))
    }
}
