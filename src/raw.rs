use std::convert::TryInto;

use crate::read_le16;
use crate::read_le32;

/// The superblock fields the scan reads, decoded from the 1024 bytes at
/// offset 1024. Everything else on disk is skipped, not stored.
pub struct RawSuperblock {
    /* Inodes count */
    pub s_inodes_count: u32,
    /* Blocks count */
    pub s_blocks_count_lo: u32,
    /* First Data Block */
    pub s_first_data_block: u32,
    /* Block size */
    pub s_log_block_size: u32,
    /* # Blocks per group */
    pub s_blocks_per_group: u32,
    /* # Inodes per group */
    pub s_inodes_per_group: u32,
    /* Magic signature */
    pub s_magic: u16,
    /* Revision level */
    pub s_rev_level: u32,
    /* First non-reserved inode */
    pub s_first_ino: u32,
    /* size of inode structure */
    pub s_inode_size: u16,
    /* incompatible feature set */
    pub s_feature_incompat: u32,
    /* size of group descriptor */
    pub s_desc_size: u16,
    /* Blocks count MSB */
    pub s_blocks_count_hi: u32,
}

impl RawSuperblock {
    pub fn from_slice(data: &[u8]) -> Self {
        assert!(data.len() >= 0x200);
        Self {
            s_inodes_count: read_le32(&data[0x00..]),
            s_blocks_count_lo: read_le32(&data[0x04..]),
            s_first_data_block: read_le32(&data[0x14..]),
            s_log_block_size: read_le32(&data[0x18..]),
            s_blocks_per_group: read_le32(&data[0x20..]),
            s_inodes_per_group: read_le32(&data[0x28..]),
            s_magic: read_le16(&data[0x38..]),
            s_rev_level: read_le32(&data[0x4c..]),
            s_first_ino: read_le32(&data[0x54..]),
            s_inode_size: read_le16(&data[0x58..]),
            s_feature_incompat: read_le32(&data[0x60..]),
            s_desc_size: read_le16(&data[0xfe..]),
            s_blocks_count_hi: read_le32(&data[0x150..]),
        }
    }
}

/// The inode fields a directory walk needs, decoded from the first 128
/// bytes of an inode record (valid for every inode size). The bulk scan
/// does not build these; it picks its four fields straight out of the
/// table buffer.
pub struct RawInode {
    /* File mode */
    pub i_mode: u16,
    /* Size in bytes */
    pub i_size_lo: u32,
    /* File flags */
    pub i_flags: u32,
    /* Pointers to blocks */
    pub i_block: [u8; 60],
}

impl RawInode {
    pub fn from_slice(data: &[u8]) -> Self {
        assert!(data.len() >= 0x80);
        Self {
            i_mode: read_le16(&data[0x00..]),
            i_size_lo: read_le32(&data[0x04..]),
            i_flags: read_le32(&data[0x20..]),
            i_block: data[0x28..0x64].try_into().expect("sliced"),
        }
    }
}

pub struct RawGroupDesc {
    /* Inodes table block */
    pub bg_inode_table_lo: u32,
    /* EXT4_BG_flags (INODE_UNINIT, etc) */
    pub bg_flags: u16,
    /* Inodes table block MSB */
    pub bg_inode_table_hi: Option<u32>,
}

impl RawGroupDesc {
    pub fn from_slice(data: &[u8]) -> Self {
        assert!(data.len() >= 0x20);
        Self {
            bg_inode_table_lo: read_le32(&data[0x08..]),
            bg_flags: read_le16(&data[0x12..]),
            bg_inode_table_hi: if data.len() >= 0x2c {
                Some(read_le32(&data[0x28..]))
            } else {
                None
            },
        }
    }
}
