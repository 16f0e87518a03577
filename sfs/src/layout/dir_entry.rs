use super::{read_u32, write_u32};
use crate::{SectorId, NAME_MAX, SECTOR_SIZE};

const _: () = assert!(SECTOR_SIZE % DirEntry::SIZE == 0);
const _: () = assert!(DirEntry::NAME_OFFSET + NAME_MAX + 1 <= DirEntry::SIZE);

/// 文件系统项的元信息
///
/// 磁盘格式（32字节）：
///
/// | 偏移 | 宽度 | 字段 |
/// |------|------|------|
/// | 0    | 1    | 是否在用 |
/// | 1    | 4    | 索引节点所在扇区 |
/// | 5    | 15   | 名字，以 `\0` 填充 |
/// | 20   | 12   | 填充，恒为零 |
///
/// 扇区大小是项大小的整数倍，每一项都落在单个扇区内，一次缓存写入即可写完整项。
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DirEntry {
    in_use: bool,
    inode_sector: u32,
    // 最后一字节留给 \0
    name: [u8; NAME_MAX + 1],
}

impl DirEntry {
    pub const SIZE: usize = 32;

    const NAME_OFFSET: usize = 1 + 4;

    #[inline]
    pub fn new(name: &str, inode_sector: SectorId) -> Self {
        let bytes = name.as_bytes();
        assert!(!bytes.is_empty() && bytes.len() <= NAME_MAX);
        let mut name = [0; NAME_MAX + 1];
        name[..bytes.len()].copy_from_slice(bytes);

        Self {
            in_use: true,
            inode_sector: inode_sector.into(),
            name,
        }
    }

    pub fn name(&self) -> &str {
        let len = self
            .name
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(NAME_MAX + 1);
        core::str::from_utf8(&self.name[..len]).expect("corrupt directory entry name")
    }

    #[inline]
    pub fn inode_sector(&self) -> SectorId {
        SectorId::new(self.inode_sector)
    }

    #[inline]
    pub fn is_in_use(&self) -> bool {
        self.in_use
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0; Self::SIZE];
        bytes[0] = self.in_use as u8;
        write_u32(&mut bytes, 1, self.inode_sector);
        bytes[Self::NAME_OFFSET..Self::NAME_OFFSET + NAME_MAX + 1].copy_from_slice(&self.name);
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Self {
        assert_eq!(bytes.len(), Self::SIZE);
        let mut name = [0; NAME_MAX + 1];
        name.copy_from_slice(&bytes[Self::NAME_OFFSET..Self::NAME_OFFSET + NAME_MAX + 1]);

        Self {
            in_use: bytes[0] != 0,
            inode_sector: read_u32(bytes, 1),
            name,
        }
    }
}
