//! 磁盘索引节点与多级索引
//!
//! - 直接索引：索引节点内连续存储 [`DIRECT_COUNT`] 个**扇区编号**，每个编号指向一个数据块
//! - 一级索引块：整个扇区连续存储**扇区编号**，每个编号都指向一个数据块
//! - 二级索引块：整个扇区连续存储**扇区编号**，每个编号都指向一个一级索引块
//!
//! 目录的空间用于存放目录项；文件的空间用于存放它的数据。
//!
//! ## 块索引编码
//!
//! 数据块的逻辑索引减去前面各级的容量，得到在本级中的位置；
//! 在二级索引中，除以一级索引块的**可编号数量**得到一级索引块的位置，取模得到块内位置。
//!
//! 扩容每次只在 `block_count` 处追加一块，索引块在第一次用到时才分配。

use alloc::vec::Vec;

use enumflags2::{bitflags, BitFlags};
use vfs::Error;

use super::{read_u32, write_u32};
use crate::{BufferCache, DataBlock, FreeMap, SectorId, MAGIC, SECTOR_SIZE};

/// 间接索引块的编号容量
const INDIRECT_COUNT: usize = SECTOR_SIZE / 4;

/// 直接索引可编号数量
pub const DIRECT_COUNT: usize = 12;
/// 一级索引块可编号数量
const INDIRECT1_COUNT: usize = INDIRECT_COUNT;
/// 二级索引块可编号数量
const INDIRECT2_COUNT: usize = INDIRECT_COUNT.pow(2);
/// 直接索引时的编号容量
const DIRECT_CAP: usize = DIRECT_COUNT;
/// 用上一级索引时的编号容量
const INDIRECT1_CAP: usize = DIRECT_CAP + INDIRECT1_COUNT;
/// 用上二级索引时的编号容量
const INDIRECT2_CAP: usize = INDIRECT1_CAP + INDIRECT2_COUNT;

/// 单个文件最多拥有的数据块数
pub const MAX_BLOCKS: usize = INDIRECT2_CAP;

/// 磁盘索引节点，恰好占据一个扇区。
///
/// | 偏移 | 宽度 | 字段 |
/// |------|------|------|
/// | 0    | 4    | 文件长度（字节） |
/// | 4    | 4    | 魔数 |
/// | 8    | 4    | 已分配数据块数 |
/// | 12   | 4    | 状态位 |
/// | 16   | 4    | 二级索引块 |
/// | 20   | 4    | 一级索引块 |
/// | 24   | 48   | 直接索引 |
/// | 72   | 440  | 填充 0 |
///
/// 扇区 0 永远不会是数据块或索引块，编号 0 表示“未分配”。
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DiskInode {
    // 不用usize是为了严控布局
    pub length: u32,
    magic: u32,
    pub block_count: u32,
    /// 目录标记与保留位
    status: u32,
    /// 指向一个二级索引块
    doubly_indirect: u32,
    /// 指向一个一级索引块
    indirect: u32,
    direct: [u32; DIRECT_COUNT],
}

#[bitflags]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeFlag {
    Directory = 0b1,
}

impl DiskInode {
    #[inline]
    pub fn new(flags: BitFlags<InodeFlag>) -> Self {
        Self {
            magic: MAGIC,
            status: flags.bits(),
            ..Default::default()
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.magic == MAGIC
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.flags().contains(InodeFlag::Directory)
    }

    #[inline]
    pub fn flags(&self) -> BitFlags<InodeFlag> {
        BitFlags::from_bits_truncate(self.status)
    }

    /// 替换已知状态位，保留位原样保留
    pub fn set_flags(&mut self, flags: BitFlags<InodeFlag>) {
        self.status = (self.status & !BitFlags::<InodeFlag>::all().bits()) | flags.bits();
    }

    /// 从缓存中读出扇区上的索引节点，魔数不符说明结构已损坏
    pub fn load(sector: SectorId, cache: &BufferCache) -> Self {
        let disk_inode = cache.map(sector, Self::decode);
        assert!(
            disk_inode.is_valid(),
            "corrupt inode at sector {sector}: bad magic {:#x}",
            disk_inode.magic
        );
        disk_inode
    }

    #[inline]
    pub fn store(&self, sector: SectorId, cache: &BufferCache) {
        cache.map_mut(sector, |block| self.encode(block));
    }

    pub fn decode(block: &DataBlock) -> Self {
        let mut direct = [0; DIRECT_COUNT];
        for (i, id) in direct.iter_mut().enumerate() {
            *id = read_u32(block, 24 + i * 4);
        }

        Self {
            length: read_u32(block, 0),
            magic: read_u32(block, 4),
            block_count: read_u32(block, 8),
            status: read_u32(block, 12),
            doubly_indirect: read_u32(block, 16),
            indirect: read_u32(block, 20),
            direct,
        }
    }

    pub fn encode(&self, block: &mut DataBlock) {
        block.fill(0);
        write_u32(block, 0, self.length);
        write_u32(block, 4, self.magic);
        write_u32(block, 8, self.block_count);
        write_u32(block, 12, self.status);
        write_u32(block, 16, self.doubly_indirect);
        write_u32(block, 20, self.indirect);
        for (i, &id) in self.direct.iter().enumerate() {
            write_u32(block, 24 + i * 4, id);
        }
    }

    /// 逻辑上 inode 指向一系列数据块，此处传入的是这些数据块的索引（逻辑索引），
    /// 然后返回给**块缓存层**使用的扇区编号
    pub fn block_id(&self, block_index: usize, cache: &BufferCache) -> SectorId {
        assert!(
            block_index < self.block_count as usize,
            "block {block_index} beyond {} allocated blocks",
            self.block_count
        );

        let id = if block_index < DIRECT_CAP {
            self.direct[block_index]
        } else if block_index < INDIRECT1_CAP {
            // 剔去直接索引的部分
            read_slot(cache, self.indirect, block_index - DIRECT_CAP)
        } else {
            // 剔去使用了一级索引的部分
            let index = block_index - INDIRECT1_CAP;
            let indirect1 = read_slot(cache, self.doubly_indirect, index / INDIRECT1_COUNT);
            read_slot(cache, indirect1, index % INDIRECT1_COUNT)
        };

        SectorId::new(id)
    }

    /// 在 `block_count` 处追加一个清零的数据块，必要时先分配索引块。
    ///
    /// 所需扇区一次性申请，失败时位图与索引节点都保持原样。
    pub fn append_block(&mut self, cache: &BufferCache, free_map: &FreeMap) -> Result<(), Error> {
        let block_index = self.block_count as usize;
        if block_index >= MAX_BLOCKS {
            return Err(Error::NoSpace);
        }

        // 这次追加跨过了某级容量的起点，需要新的索引块
        let new_indirect1 = block_index == DIRECT_CAP;
        let new_indirect2 = block_index == INDIRECT1_CAP;
        let new_inner = block_index >= INDIRECT1_CAP
            && (block_index - INDIRECT1_CAP) % INDIRECT1_COUNT == 0;
        let count = 1 + new_indirect1 as usize + new_indirect2 as usize + new_inner as usize;

        let fresh = free_map.allocate(count, cache)?;
        // 索引块中的 0 表示未分配，数据块中的空洞读出来也得是 0
        fresh.iter().for_each(|&sector| cache.zero(sector));
        let mut fresh = fresh.into_iter().map(u32::from);
        let data = fresh.next().unwrap();

        if block_index < DIRECT_CAP {
            self.direct[block_index] = data;
        } else if block_index < INDIRECT1_CAP {
            if new_indirect1 {
                self.indirect = fresh.next().unwrap();
            }
            write_slot(cache, self.indirect, block_index - DIRECT_CAP, data);
        } else {
            if new_indirect2 {
                self.doubly_indirect = fresh.next().unwrap();
            }

            let index = block_index - INDIRECT1_CAP;
            // 子块索引为0表示进入新的一级索引块
            if new_inner {
                let indirect1 = fresh.next().unwrap();
                write_slot(cache, self.doubly_indirect, index / INDIRECT1_COUNT, indirect1);
            }
            let indirect1 = read_slot(cache, self.doubly_indirect, index / INDIRECT1_COUNT);
            write_slot(cache, indirect1, index % INDIRECT1_COUNT, data);
        }

        self.block_count += 1;
        Ok(())
    }

    /// 撤销追加：只保留前 `keep` 个数据块，返回多出的数据块与不再需要的索引块
    pub fn truncate_blocks(&mut self, keep: usize, cache: &BufferCache) -> Vec<SectorId> {
        let data_blocks = self.block_count as usize;
        assert!(keep <= data_blocks, "truncate {data_blocks} blocks to {keep}");

        let mut freed = Vec::with_capacity(
            Self::count_total_block(data_blocks) - Self::count_total_block(keep),
        );
        while self.block_count as usize > keep {
            let block_index = self.block_count as usize - 1;
            freed.push(self.block_id(block_index, cache));

            if block_index < DIRECT_CAP {
                self.direct[block_index] = 0;
            } else if block_index < INDIRECT1_CAP {
                write_slot(cache, self.indirect, block_index - DIRECT_CAP, 0);
                // 一级索引块里的最后一项
                if block_index == DIRECT_CAP {
                    freed.push(SectorId::new(self.indirect));
                    self.indirect = 0;
                }
            } else {
                let index = block_index - INDIRECT1_CAP;
                let indirect1 = read_slot(cache, self.doubly_indirect, index / INDIRECT1_COUNT);
                write_slot(cache, indirect1, index % INDIRECT1_COUNT, 0);
                if index % INDIRECT1_COUNT == 0 {
                    write_slot(cache, self.doubly_indirect, index / INDIRECT1_COUNT, 0);
                    freed.push(SectorId::new(indirect1));
                }
                if index == 0 {
                    freed.push(SectorId::new(self.doubly_indirect));
                    self.doubly_indirect = 0;
                }
            }

            self.block_count -= 1;
        }

        self.length = self.length.min((keep * SECTOR_SIZE) as u32);
        freed
    }

    /// 清空索引节点，返回其占有的全部数据块与索引块
    pub fn clear(&mut self, cache: &BufferCache) -> Vec<SectorId> {
        let data_blocks = self.block_count as usize;
        let mut drop_blocks: Vec<u32> = Vec::with_capacity(Self::count_total_block(data_blocks));

        /******************** 直接索引 ********************/
        drop_blocks.extend_from_slice(&self.direct[..data_blocks.min(DIRECT_CAP)]);
        /******************** END ********************/

        /******************** 一级索引 ********************/
        if data_blocks > DIRECT_CAP {
            drop_blocks.push(self.indirect);
            let count = (data_blocks - DIRECT_CAP).min(INDIRECT1_COUNT);
            cache.map(SectorId::new(self.indirect), |block| {
                drop_blocks.extend((0..count).map(|i| read_u32(block, i * 4)));
            });
        }
        /******************** END ********************/

        /******************** 二级索引 ********************/
        if data_blocks > INDIRECT1_CAP {
            drop_blocks.push(self.doubly_indirect);
            let mut remaining = data_blocks - INDIRECT1_CAP;
            let inner_blocks = remaining.div_ceil(INDIRECT1_COUNT);

            for index2 in 0..inner_blocks {
                let indirect1 = read_slot(cache, self.doubly_indirect, index2);
                drop_blocks.push(indirect1);

                let count = remaining.min(INDIRECT1_COUNT);
                cache.map(SectorId::new(indirect1), |block| {
                    drop_blocks.extend((0..count).map(|i| read_u32(block, i * 4)));
                });
                remaining -= count;
            }
        }
        /******************** END ********************/

        assert_eq!(drop_blocks.len(), Self::count_total_block(data_blocks));
        assert!(drop_blocks.iter().all(|&id| id != 0), "unallocated block in index");

        self.length = 0;
        self.block_count = 0;
        self.direct.fill(0);
        self.indirect = 0;
        self.doubly_indirect = 0;

        drop_blocks.into_iter().map(SectorId::new).collect()
    }

    /// 从指定位置(字节偏移)读出数据填充`buf`，不越过文件长度
    pub fn read_at(&self, offset: usize, buf: &mut [u8], cache: &BufferCache) -> usize {
        let end = offset.saturating_add(buf.len()).min(self.length as usize);
        self.copy(offset, end, cache, |sector, inner, range| {
            cache.read(sector, inner, &mut buf[range])
        })
    }

    /// 把`buf`写到指定位置，不越过已分配的数据块
    pub fn write_at(&self, offset: usize, buf: &[u8], cache: &BufferCache) -> usize {
        let end = offset
            .saturating_add(buf.len())
            .min(self.block_count as usize * SECTOR_SIZE);
        self.copy(offset, end, cache, |sector, inner, range| {
            cache.write(sector, inner, &buf[range])
        })
    }

    /// 计算容纳指定数据量需要多少个**数据块**
    #[inline]
    pub fn count_data_block(size: usize) -> usize {
        size.div_ceil(SECTOR_SIZE)
    }

    /// 计算指定数量的数据块连同**索引块**一共占多少扇区
    pub fn count_total_block(data_blocks: usize) -> usize {
        let mut total = data_blocks;

        // 超出直接索引，使用一级索引块
        if data_blocks > DIRECT_CAP {
            total += 1;
        }

        // 超出一级索引，使用二级索引块
        if data_blocks > INDIRECT1_CAP {
            total += 1 + (data_blocks - INDIRECT1_CAP).div_ceil(INDIRECT1_COUNT);
        }

        total
    }
}

impl DiskInode {
    /// 逐块处理 `[start, end)`，`f` 收到扇区、块内偏移与对应的缓冲区区间
    fn copy(
        &self,
        start: usize,
        end: usize,
        cache: &BufferCache,
        mut f: impl FnMut(SectorId, usize, core::ops::Range<usize>),
    ) -> usize {
        if start >= end {
            return 0;
        }

        let mut start = start;
        // 已处理多少字节
        let mut done = 0;
        while start < end {
            let block_index = start / SECTOR_SIZE;
            // 当前块的末地址(字节)
            let current_block_end = ((block_index + 1) * SECTOR_SIZE).min(end);
            let size = current_block_end - start;

            // 绝对地址 % 块大小 = 块内偏移
            f(
                self.block_id(block_index, cache),
                start % SECTOR_SIZE,
                done..done + size,
            );

            done += size;
            start = current_block_end;
        }

        done
    }
}

#[inline]
fn read_slot(cache: &BufferCache, block: u32, index: usize) -> u32 {
    cache.map(SectorId::new(block), |data| read_u32(data, index * 4))
}

#[inline]
fn write_slot(cache: &BufferCache, block: u32, index: usize, value: u32) {
    cache.write(SectorId::new(block), index * 4, &value.to_le_bytes());
}
