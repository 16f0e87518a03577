//! # 磁盘数据结构层
//!
//! sfs 的磁盘布局没有超级块：
//! 扇区0 | 扇区1 | 其余扇区
//! 空闲位图文件的索引节点 | 根目录的索引节点 | 按需分配给数据块与索引块
//!
//! 所有记录都显式编解码，整数一律小端序，字段顺序即文档顺序。

mod bitmap;
pub use bitmap::Bitmap;

mod inode;
pub use inode::{DiskInode, InodeFlag, DIRECT_COUNT, MAX_BLOCKS};

/// 目录项，也属于磁盘文件系统数据结构
mod dir_entry;
pub use dir_entry::DirEntry;

#[inline]
fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

#[inline]
fn write_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}
