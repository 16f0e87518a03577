//! # 空闲扇区管理器
//!
//! 位图常驻内存，一位对应设备上的一个扇区。位图自身作为一个普通文件保存在磁盘上，
//! 其索引节点固定在 [`FREE_MAP_SECTOR`]。文件建好之后，每次分配与释放都把变化的组写回文件。

use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use enumflags2::BitFlags;
use spin::Mutex;
use vfs::Error;

use crate::layout::{Bitmap, DiskInode};
use crate::{inode, BufferCache, SectorId, FREE_MAP_SECTOR, ROOT_DIR_SECTOR};

#[derive(Debug)]
pub struct FreeMap {
    bitmap: Mutex<Bitmap>,
    /// 位图文件是否已经建立
    backed: AtomicBool,
}

impl FreeMap {
    /// 全新的位图，只有两个保留扇区被占用
    pub fn new(sector_count: usize) -> Self {
        let mut bitmap = Bitmap::new(sector_count);
        bitmap.set(FREE_MAP_SECTOR.index());
        bitmap.set(ROOT_DIR_SECTOR.index());

        Self {
            bitmap: Mutex::new(bitmap),
            backed: AtomicBool::new(false),
        }
    }

    /// 格式化时调用：在 [`FREE_MAP_SECTOR`] 建立位图文件并写入整个位图
    pub fn create(&self, cache: &BufferCache) -> Result<(), Error> {
        let size = self.bitmap.lock().byte_len();
        inode::create(cache, self, FREE_MAP_SECTOR, size, BitFlags::empty())?;

        let bitmap = self.bitmap.lock();
        let bytes = bitmap.encode(0..bitmap.byte_len());
        let written = DiskInode::load(FREE_MAP_SECTOR, cache).write_at(0, &bytes, cache);
        assert_eq!(written, bytes.len());
        self.backed.store(true, Ordering::Release);

        log::debug!(
            "free map created: {} sectors, {} in use",
            bitmap.capacity(),
            bitmap.count_ones()
        );
        Ok(())
    }

    /// 挂载时调用：从位图文件读回位图
    pub fn load(cache: &BufferCache, sector_count: usize) -> Self {
        let disk_inode = DiskInode::load(FREE_MAP_SECTOR, cache);
        let mut bytes = vec![0; disk_inode.length as usize];
        let read = disk_inode.read_at(0, &mut bytes, cache);
        assert_eq!(read, bytes.len());

        let bitmap = Bitmap::decode(&bytes, sector_count);
        log::debug!(
            "free map loaded: {} sectors, {} in use",
            bitmap.capacity(),
            bitmap.count_ones()
        );

        Self {
            bitmap: Mutex::new(bitmap),
            backed: AtomicBool::new(true),
        }
    }

    /// 分配 `count` 个空闲扇区，不保证连续。空间不足时位图保持不变。
    pub fn allocate(&self, count: usize, cache: &BufferCache) -> Result<Vec<SectorId>, Error> {
        let mut bitmap = self.bitmap.lock();
        let Some(bits) = bitmap.find_free(count) else {
            log::warn!("free map exhausted, {count} sectors requested");
            return Err(Error::NoSpace);
        };

        bits.iter().for_each(|&bit| bitmap.set(bit));
        self.persist(&bitmap, &bits, cache);

        log::trace!("allocate sectors {bits:?}");
        Ok(bits.into_iter().map(|bit| SectorId::new(bit as u32)).collect())
    }

    /// 释放扇区，释放未分配的扇区属于结构损坏
    pub fn release(&self, sectors: &[SectorId], cache: &BufferCache) {
        let mut bitmap = self.bitmap.lock();
        let bits: Vec<usize> = sectors.iter().map(|sector| sector.index()).collect();

        bits.iter().for_each(|&bit| bitmap.reset(bit));
        self.persist(&bitmap, &bits, cache);

        log::trace!("release sectors {bits:?}");
    }

    pub fn is_allocated(&self, sector: SectorId) -> bool {
        self.bitmap.lock().test(sector.index())
    }

    /// 空闲扇区数
    pub fn free_count(&self) -> usize {
        let bitmap = self.bitmap.lock();
        bitmap.capacity() - bitmap.count_ones()
    }
}

impl FreeMap {
    /// 把 `bits` 所在的组写回位图文件。调用者持有位图锁，文件内容与位图的变化顺序一致。
    fn persist(&self, bitmap: &Bitmap, bits: &[usize], cache: &BufferCache) {
        if !self.backed.load(Ordering::Acquire) {
            return;
        }
        let Some(range) = Bitmap::byte_range(bits) else {
            return;
        };

        let bytes = bitmap.encode(range.clone());
        let written = DiskInode::load(FREE_MAP_SECTOR, cache).write_at(range.start, &bytes, cache);
        assert_eq!(written, bytes.len(), "free map file too short");
    }
}
