//! # 文件系统层
//!
//! 把块缓存、空闲扇区管理器与打开的索引节点登记表组装在一起，
//! 负责格式化、挂载与关闭。后台写回与预读任务的主体也从这里交给宿主的线程。

use alloc::sync::Arc;

use block_dev::BlockDevice;
use vfs::Error;

use crate::{
    BufferCache, Config, Dir, FreeMap, InodeTable, Scheduler, FREE_MAP_SECTOR, ROOT_DIR_SECTOR,
};

pub struct FileSystem {
    config: Config,
    cache: BufferCache,
    free_map: FreeMap,
    inodes: InodeTable,
}

impl FileSystem {
    /// 在设备上建立全新的文件系统：空闲位图文件与空的根目录
    pub fn format(dev: Arc<dyn BlockDevice>, config: Config) -> Result<Arc<Self>, Error> {
        let sector_count = dev.num_blocks();
        let fs = Arc::new(Self {
            cache: BufferCache::new(dev, &config),
            free_map: FreeMap::new(sector_count),
            inodes: InodeTable::new(),
            config,
        });

        fs.free_map.create(&fs.cache)?;
        Dir::create(&fs, ROOT_DIR_SECTOR, ROOT_DIR_SECTOR)?;
        fs.cache.flush_all();

        log::info!(
            "formatted {sector_count} sectors, {} free",
            fs.free_map.free_count()
        );
        Ok(fs)
    }

    /// 挂载设备上已有的文件系统
    pub fn mount(dev: Arc<dyn BlockDevice>, config: Config) -> Arc<Self> {
        let sector_count = dev.num_blocks();
        let cache = BufferCache::new(dev, &config);
        let free_map = FreeMap::load(&cache, sector_count);

        log::info!(
            "mounted {sector_count} sectors, {} free",
            free_map.free_count()
        );
        Arc::new(Self {
            config,
            cache,
            free_map,
            inodes: InodeTable::new(),
        })
    }

    /// 让后台任务退出并写回所有脏扇区
    pub fn shutdown(&self) {
        self.cache.shutdown();
        self.cache.flush_all();
        log::info!("shutdown, {} inodes still open", self.inodes.len());
    }

    /// 后台写回任务，在宿主提供的线程上运行，直到 [`Self::shutdown`]
    #[inline]
    pub fn run_write_behind(&self, sched: Arc<dyn Scheduler>) {
        self.cache.run_write_behind(sched);
    }

    /// 后台预读任务，在宿主提供的线程上运行，直到 [`Self::shutdown`]
    #[inline]
    pub fn run_read_ahead(&self, sched: Arc<dyn Scheduler>) {
        self.cache.run_read_ahead(sched);
    }

    #[inline]
    pub fn root(self: &Arc<Self>) -> Dir {
        Dir::open_root(self)
    }

    #[inline]
    pub fn cache(&self) -> &BufferCache {
        &self.cache
    }

    #[inline]
    pub fn free_map(&self) -> &FreeMap {
        &self.free_map
    }

    #[inline]
    pub fn inodes(&self) -> &InodeTable {
        &self.inodes
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl core::fmt::Debug for FileSystem {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FileSystem")
            .field("config", &self.config)
            .field("free_map_sector", &FREE_MAP_SECTOR)
            .field("root_dir_sector", &ROOT_DIR_SECTOR)
            .field("free_map", &self.free_map)
            .field("inodes", &self.inodes)
            .finish()
    }
}
