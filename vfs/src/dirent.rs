use alloc::string::String;

/// `readdir` 交给调用者的目录项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// 索引节点所在扇区
    pub inode: u64,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum DirEntryType {
    Directory,
    #[default]
    Regular,
}
