#![no_std]

extern crate alloc;

/* sfs 的整体架构，自上而下 */

// 文件系统层：格式化、挂载、后台任务的载体
mod fs;

// 路径解析层：把层级路径翻译成扇区
mod path;

// 打开文件层：带读写位置的文件句柄
mod file;

// 目录层：内容为目录项序列的索引节点
mod directory;

// 索引节点层：引用计数的内存索引节点与多级索引
mod inode;

// 空闲扇区管理器：位图本身也是一个文件
mod free_map;

// 磁盘数据结构层：磁盘上记录的编解码
mod layout;

// 块缓存层：内存上的扇区缓存
mod block_cache;

mod config;
mod sector;
mod sync;

pub use self::{
    block_cache::{BufferCache, ACCESS_MAX},
    config::{Config, CACHE_SIZE, READ_AHEAD_DEPTH, WRITE_BEHIND_INTERVAL},
    directory::Dir,
    file::File,
    free_map::FreeMap,
    fs::FileSystem,
    inode::{Inode, InodeTable},
    layout::{DirEntry, DiskInode, InodeFlag, DIRECT_COUNT, MAX_BLOCKS},
    sector::SectorId,
    sync::Scheduler,
};

pub const MAGIC: u32 = 0x494e4f44;
pub const SECTOR_SIZE: usize = 512;
pub const SECTOR_BITS: usize = SECTOR_SIZE * 8;

/// 文件名的最大长度（字节）
pub const NAME_MAX: usize = 14;

/// 空闲位图文件的索引节点所在扇区
pub const FREE_MAP_SECTOR: SectorId = SectorId::new(0);
/// 根目录的索引节点所在扇区
pub const ROOT_DIR_SECTOR: SectorId = SectorId::new(1);

type DataBlock = [u8; SECTOR_SIZE];
