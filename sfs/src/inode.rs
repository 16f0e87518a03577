//! # 索引节点层
//!
//! 同一扇区上的索引节点在内存中只有一份 [`OpenInode`]，由所有打开者共享，
//! 登记在 [`InodeTable`] 中。[`Inode`] 是打开者手里的句柄，析构即关闭：
//! 最后一个句柄关闭时内存索引节点被丢弃，若它已被标记删除，
//! 还要回收全部数据块、索引块以及索引节点自己所在的扇区。
//!
//! 索引节点锁只保护打开计数、删除标记、禁写计数，以及扩容与属性修改时的元数据；
//! 数据拷贝从不在该锁下进行。

use alloc::collections::BTreeMap;
use alloc::sync::Arc;

use enumflags2::BitFlags;
use spin::{Mutex, MutexGuard};
use vfs::{DirEntryType, Error, Stat};

use crate::layout::{DiskInode, InodeFlag};
use crate::{BufferCache, FileSystem, FreeMap, SectorId, MAX_BLOCKS, SECTOR_SIZE};

/// 打开的索引节点登记表
#[derive(Debug, Default)]
pub struct InodeTable {
    open: Mutex<BTreeMap<SectorId, Arc<OpenInode>>>,
}

/// 内存中的索引节点
#[derive(Debug)]
struct OpenInode {
    sector: SectorId,
    state: Mutex<InodeState>,
    /// 目录锁：串行化同一目录的结构性修改，与索引节点锁互不相干
    dir_lock: Mutex<()>,
}

#[derive(Debug)]
struct InodeState {
    open_count: usize,
    removed: bool,
    /// 0: 可写, >0: 禁写
    deny_write_count: usize,
}

/// 打开的索引节点句柄，析构时关闭
pub struct Inode {
    fs: Arc<FileSystem>,
    inner: Arc<OpenInode>,
}

/// 在 `sector` 上初始化索引节点，并预先分配容纳 `length` 字节所需的全部扇区。
///
/// 失败时归还已申请的扇区，位图不受影响。
pub(crate) fn create(
    cache: &BufferCache,
    free_map: &FreeMap,
    sector: SectorId,
    length: usize,
    flags: BitFlags<InodeFlag>,
) -> Result<(), Error> {
    let mut disk_inode = DiskInode::new(flags);

    let data_blocks = DiskInode::count_data_block(length);
    while (disk_inode.block_count as usize) < data_blocks {
        if let Err(e) = disk_inode.append_block(cache, free_map) {
            log::warn!("create inode {sector} with {length} bytes failed: {e}");
            free_map.release(&disk_inode.clear(cache), cache);
            return Err(e);
        }
    }

    disk_inode.length = length as u32;
    disk_inode.store(sector, cache);
    log::debug!("inode {sector} created, length={length}, flags={flags:?}");
    Ok(())
}

impl InodeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前打开的索引节点个数
    pub fn len(&self) -> usize {
        self.open.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.lock().is_empty()
    }

    pub fn is_open(&self, sector: SectorId) -> bool {
        self.open.lock().contains_key(&sector)
    }

    fn open(&self, sector: SectorId) -> Arc<OpenInode> {
        let mut open = self.open.lock();

        if let Some(inode) = open.get(&sector) {
            inode.state.lock().open_count += 1;
            return inode.clone();
        }

        let inode = Arc::new(OpenInode {
            sector,
            state: Mutex::new(InodeState {
                open_count: 1,
                removed: false,
                deny_write_count: 0,
            }),
            dir_lock: Mutex::new(()),
        });
        open.insert(sector, inode.clone());
        inode
    }

    /// 关闭一次。返回真表示最后一个打开者离开且索引节点已被删除，需要回收。
    fn close(&self, inode: &OpenInode) -> bool {
        let mut open = self.open.lock();
        let mut state = inode.state.lock();

        state.open_count -= 1;
        if state.open_count > 0 {
            return false;
        }

        open.remove(&inode.sector);
        state.removed
    }
}

impl Inode {
    /// 在 `sector` 上创建索引节点，见 [`create`]
    pub fn create(
        fs: &FileSystem,
        sector: SectorId,
        length: usize,
        flags: BitFlags<InodeFlag>,
    ) -> Result<(), Error> {
        create(fs.cache(), fs.free_map(), sector, length, flags)
    }

    /// 打开 `sector` 上的索引节点，同一扇区的打开者共享一份内存索引节点
    pub fn open(fs: &Arc<FileSystem>, sector: SectorId) -> Self {
        // 登记表的锁不跨越 I/O，先在锁外检查魔数
        DiskInode::load(sector, fs.cache());

        Self {
            fs: fs.clone(),
            inner: fs.inodes().open(sector),
        }
    }

    /// 再打开一次
    pub fn reopen(&self) -> Self {
        self.inner.state.lock().open_count += 1;
        Self {
            fs: self.fs.clone(),
            inner: self.inner.clone(),
        }
    }

    /// 关闭句柄，等价于丢弃
    #[inline]
    pub fn close(self) {}

    #[inline]
    pub fn sector(&self) -> SectorId {
        self.inner.sector
    }

    #[inline]
    pub fn fs(&self) -> &Arc<FileSystem> {
        &self.fs
    }

    /// 标记删除，最后一个打开者关闭时才真正回收
    pub fn remove(&self) {
        self.inner.state.lock().removed = true;
        log::debug!("inode {} marked removed", self.sector());
    }

    pub fn is_removed(&self) -> bool {
        self.inner.state.lock().removed
    }

    pub fn open_count(&self) -> usize {
        self.inner.state.lock().open_count
    }

    /// 从 `offset` 处读出数据填充 `buf`，越过文件末尾的部分不读，返回读到的字节数
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize {
        let cache = self.fs.cache();
        let disk_inode = DiskInode::load(self.sector(), cache);
        let read = disk_inode.read_at(offset, buf, cache);

        // 预读紧随其后的数据块
        if read > 0 {
            let next = (offset + read - 1) / SECTOR_SIZE + 1;
            if next < disk_inode.block_count as usize {
                cache.request_readahead(disk_inode.block_id(next, cache));
            }
        }

        read
    }

    /// 把 `buf` 写到 `offset` 处，必要时扩容，返回写入的字节数。
    ///
    /// 扩容分两步：持锁追加数据块，解锁拷贝数据，拷贝完成后再持锁发布新长度。
    /// 于是读者看到更大的长度时，对应的数据必然已在缓存中。
    pub fn write_at(&self, offset: usize, buf: &[u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }

        let cache = self.fs.cache();
        let sector = self.sector();
        let Some(end) = offset.checked_add(buf.len()) else {
            log::warn!("write to inode {sector} at {offset} overflows");
            return 0;
        };

        let grown = {
            let state = self.inner.state.lock();
            if state.deny_write_count > 0 {
                log::warn!("write to inode {sector} denied");
                return 0;
            }

            let mut disk_inode = DiskInode::load(sector, cache);
            if end <= disk_inode.length as usize {
                false
            } else {
                let data_blocks = DiskInode::count_data_block(end);
                if data_blocks > MAX_BLOCKS {
                    log::warn!("grow inode {sector} to {end} bytes exceeds the index");
                    return 0;
                }

                let old_blocks = disk_inode.block_count as usize;
                while (disk_inode.block_count as usize) < data_blocks {
                    if let Err(e) = disk_inode.append_block(cache, self.fs.free_map()) {
                        log::warn!("grow inode {sector} to {end} bytes failed: {e}");
                        // 这次追加的块全部归还，索引节点回到扩容前
                        let freed = disk_inode.truncate_blocks(old_blocks, cache);
                        self.fs.free_map().release(&freed, cache);
                        disk_inode.store(sector, cache);
                        return 0;
                    }
                }
                disk_inode.store(sector, cache);
                true
            }
        };

        let written = DiskInode::load(sector, cache).write_at(offset, buf, cache);

        if grown {
            let _state = self.inner.state.lock();
            let mut disk_inode = DiskInode::load(sector, cache);
            if (disk_inode.length as usize) < end {
                disk_inode.length = end as u32;
                disk_inode.store(sector, cache);
            }
        }

        written
    }

    /// 禁止写入，例如文件正被执行
    pub fn deny_write(&self) {
        let mut state = self.inner.state.lock();
        state.deny_write_count += 1;
        assert!(state.deny_write_count <= state.open_count);
    }

    /// 撤销一次 [`Self::deny_write`]
    pub fn allow_write(&self) {
        let mut state = self.inner.state.lock();
        assert!(state.deny_write_count > 0, "unbalanced allow_write");
        state.deny_write_count -= 1;
    }

    pub fn is_write_denied(&self) -> bool {
        self.inner.state.lock().deny_write_count > 0
    }

    /// 文件长度（字节）
    pub fn len(&self) -> usize {
        let _state = self.inner.state.lock();
        DiskInode::load(self.sector(), self.fs.cache()).length as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn attributes(&self) -> BitFlags<InodeFlag> {
        let _state = self.inner.state.lock();
        DiskInode::load(self.sector(), self.fs.cache()).flags()
    }

    pub fn set_attributes(&self, flags: BitFlags<InodeFlag>) {
        let _state = self.inner.state.lock();
        let cache = self.fs.cache();
        let mut disk_inode = DiskInode::load(self.sector(), cache);
        disk_inode.set_flags(flags);
        disk_inode.store(self.sector(), cache);
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.attributes().contains(InodeFlag::Directory)
    }

    pub fn stat(&self) -> Stat {
        let _state = self.inner.state.lock();
        let disk_inode = DiskInode::load(self.sector(), self.fs.cache());

        Stat {
            inode: self.sector().index() as u64,
            mode: if disk_inode.is_dir() {
                DirEntryType::Directory
            } else {
                DirEntryType::Regular
            },
            block_size: SECTOR_SIZE as u64,
            blocks: DiskInode::count_total_block(disk_inode.block_count as usize) as u64,
            size: disk_inode.length as u64,
        }
    }
}

impl Inode {
    /// 目录层使用的目录锁
    #[inline]
    pub(crate) fn lock_dir(&self) -> MutexGuard<'_, ()> {
        self.inner.dir_lock.lock()
    }

    /// 回收数据块、索引块与索引节点所在扇区
    fn reap(&self) {
        let cache = self.fs.cache();
        let sector = self.sector();

        let mut disk_inode = DiskInode::load(sector, cache);
        let mut sectors = disk_inode.clear(cache);
        sectors.push(sector);
        self.fs.free_map().release(&sectors, cache);

        log::debug!("inode {sector} reaped, {} sectors freed", sectors.len());
    }
}

impl Drop for Inode {
    fn drop(&mut self) {
        if self.fs.inodes().close(&self.inner) {
            self.reap();
        }
    }
}

impl core::fmt::Debug for Inode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Inode")
            .field("sector", &self.inner.sector)
            .field("state", &*self.inner.state.lock())
            .finish()
    }
}
