//! # 块缓存层
//!
//! 块设备读写速度一般慢于内存读写速度，因此我们在内存中开辟固定数量的槽位，
//! 把即将操作的扇区复制到槽位中，提高对块设备的操作效率。
//!
//! 块缓存层对使用者来说是透明的，使用者对块设备的操作都经过块缓存层，
//! 且**操作扇区时一定在槽位当中**。写操作只把槽位标脏，
//! 写回由换出、[`BufferCache::flush_all`] 或后台写回任务完成。
//!
//! ## 锁
//!
//! - 缓存目录锁：保护“扇区 → 槽位”的映射与时钟指针，只在查找和挑选牺牲者时短暂持有；
//! - 槽位锁：保护槽位的数据与脏标记，设备 I/O 只在持有槽位锁时进行。
//!
//! 缓存目录锁总是先于槽位锁释放。查到槽位后解开目录锁、再锁槽位，
//! 期间槽位可能已被换出，所以加锁后要核对扇区号，不符就重来。

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::hint;
use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;

use block_dev::BlockDevice;
use spin::Mutex;

use crate::{Config, DataBlock, Scheduler, SectorId, SECTOR_SIZE};

/// 访问计数的上限
pub const ACCESS_MAX: u8 = 3;

pub struct BufferCache {
    /// 底层块设备的引用
    dev: Arc<dyn BlockDevice>,
    dir: Mutex<CacheDir>,
    slots: Box<[Mutex<Slot>]>,
    /// 预读请求队列
    read_ahead: Mutex<VecDeque<SectorId>>,
    read_ahead_depth: usize,
    write_behind_interval: Duration,
    running: AtomicBool,
    /// 正在运行的后台任务登记的唤醒者
    read_ahead_waker: Mutex<Option<Arc<dyn Scheduler>>>,
    write_behind_waker: Mutex<Option<Arc<dyn Scheduler>>>,
}

/// 缓存目录
struct CacheDir {
    entries: Box<[SlotEntry]>,
    /// 时钟指针，跨调用保留
    hand: usize,
}

#[derive(Debug, Clone, Copy)]
struct SlotEntry {
    state: SlotState,
    accessed: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Empty,
    Resident(SectorId),
    /// 换出进行中：`from` 尚未写回，`to` 尚未装入。
    /// 此时槽位同时“属于”两个扇区，不能被当作任何一方的稳定持有者。
    Evicting {
        from: Option<SectorId>,
        to: SectorId,
    },
}

/// 槽位中的扇区
struct Slot {
    sector: Option<SectorId>,
    data: DataBlock,
    /// 是否为脏块
    dirty: bool,
}

impl BufferCache {
    pub fn new(dev: Arc<dyn BlockDevice>, config: &Config) -> Self {
        assert!(config.cache_slots > 0, "buffer cache needs at least one slot");

        let entries = (0..config.cache_slots)
            .map(|_| SlotEntry {
                state: SlotState::Empty,
                accessed: 0,
            })
            .collect();
        let slots = (0..config.cache_slots)
            .map(|_| Mutex::new(Slot::new()))
            .collect();

        Self {
            dev,
            dir: Mutex::new(CacheDir { entries, hand: 0 }),
            slots,
            read_ahead: Mutex::new(VecDeque::with_capacity(config.read_ahead_depth)),
            read_ahead_depth: config.read_ahead_depth,
            write_behind_interval: config.write_behind_interval,
            running: AtomicBool::new(true),
            read_ahead_waker: Mutex::new(None),
            write_behind_waker: Mutex::new(None),
        }
    }

    #[inline]
    pub fn device(&self) -> &Arc<dyn BlockDevice> {
        &self.dev
    }

    /// 从扇区的 `offset` 处读出 `buf.len()` 字节
    pub fn read(&self, sector: SectorId, offset: usize, buf: &mut [u8]) {
        assert!(offset + buf.len() <= SECTOR_SIZE);
        self.map(sector, |data| buf.copy_from_slice(&data[offset..offset + buf.len()]));
    }

    /// 把 `bytes` 写到扇区的 `offset` 处，只标脏不落盘
    pub fn write(&self, sector: SectorId, offset: usize, bytes: &[u8]) {
        assert!(offset + bytes.len() <= SECTOR_SIZE);
        // 整扇区覆盖时无需先从设备读入
        let load = !(offset == 0 && bytes.len() == SECTOR_SIZE);
        self.access(sector, load, |slot| {
            slot.data[offset..offset + bytes.len()].copy_from_slice(bytes);
            slot.dirty = true;
        });
    }

    /// 把整个扇区清零
    pub fn zero(&self, sector: SectorId) {
        self.access(sector, false, |slot| {
            slot.data.fill(0);
            slot.dirty = true;
        });
    }

    #[inline]
    pub fn map<V>(&self, sector: SectorId, f: impl FnOnce(&DataBlock) -> V) -> V {
        self.access(sector, true, |slot| f(&slot.data))
    }

    #[inline]
    pub fn map_mut<V>(&self, sector: SectorId, f: impl FnOnce(&mut DataBlock) -> V) -> V {
        self.access(sector, true, |slot| {
            slot.dirty = true;
            f(&mut slot.data)
        })
    }

    /// 写回所有脏槽位
    pub fn flush_all(&self) {
        for slot in self.slots.iter() {
            slot.lock().sync(self.dev.as_ref());
        }
    }

    /// 请求预读扇区。队列满时丢弃最早的请求，调用者不会被阻塞。
    pub fn request_readahead(&self, sector: SectorId) {
        self.check_range(sector);
        if self.read_ahead_depth == 0 {
            return;
        }

        {
            let mut queue = self.read_ahead.lock();
            if queue.len() == self.read_ahead_depth {
                queue.pop_front();
            }
            queue.push_back(sector);
        }
        wake(&self.read_ahead_waker);
    }

    /// 后台写回任务的主体：每隔一段时间写回所有脏槽位，直到 [`Self::shutdown`]。
    ///
    /// 间隔内的等待可被 `shutdown` 打断，退出前再写回一次。
    pub fn run_write_behind(&self, sched: Arc<dyn Scheduler>) {
        log::debug!("write-behind started, interval={:?}", self.write_behind_interval);
        *self.write_behind_waker.lock() = Some(sched.clone());

        while self.is_running() {
            sched.wait(Some(self.write_behind_interval));
            self.flush_all();
        }

        self.write_behind_waker.lock().take();
        log::debug!("write-behind stopped");
    }

    /// 后台预读任务的主体：取出预读请求并把扇区装入缓存，直到 [`Self::shutdown`]。
    ///
    /// 队列为空时在 `sched` 上阻塞，[`Self::request_readahead`] 会唤醒它。
    pub fn run_read_ahead(&self, sched: Arc<dyn Scheduler>) {
        log::debug!("read-ahead started, depth={}", self.read_ahead_depth);
        // 先登记再检查队列，之后的请求都能唤醒它
        *self.read_ahead_waker.lock() = Some(sched.clone());

        while self.is_running() {
            let request = self.read_ahead.lock().pop_front();
            match request {
                Some(sector) => {
                    log::trace!("read-ahead sector {sector}");
                    self.map(sector, |_| ());
                }
                None => sched.wait(None),
            }
        }

        self.read_ahead_waker.lock().take();
        log::debug!("read-ahead stopped");
    }

    /// 通知后台任务退出，并唤醒正在等待的任务
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        wake(&self.read_ahead_waker);
        wake(&self.write_behind_waker);
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/* 观测接口，便于测试驱动与检查替换策略 */
impl BufferCache {
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// 时钟指针当前指向的槽位
    pub fn clock_hand(&self) -> usize {
        self.dir.lock().hand
    }

    /// 扇区是否稳定地驻留在某个槽位中
    pub fn is_resident(&self, sector: SectorId) -> bool {
        self.dir
            .lock()
            .entries
            .iter()
            .any(|entry| entry.state == SlotState::Resident(sector))
    }

    /// 所有稳定驻留的扇区
    pub fn resident_sectors(&self) -> Vec<SectorId> {
        self.dir
            .lock()
            .entries
            .iter()
            .filter_map(|entry| match entry.state {
                SlotState::Resident(sector) => Some(sector),
                _ => None,
            })
            .collect()
    }

    pub fn dirty_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.lock().dirty).count()
    }

    /// 尚未处理的预读请求数
    pub fn pending_readahead(&self) -> usize {
        self.read_ahead.lock().len()
    }
}

impl BufferCache {
    /// 找到（或装入）持有 `sector` 的槽位，在槽位锁下执行 `f`。
    ///
    /// `load` 为假时，新装入的槽位不从设备读取而是清零。
    fn access<V>(&self, sector: SectorId, load: bool, f: impl FnOnce(&mut Slot) -> V) -> V {
        self.check_range(sector);

        loop {
            let mut dir = self.dir.lock();

            if let Some(index) = dir.find(sector) {
                dir.touch(index);
                drop(dir);

                let mut slot = self.slots[index].lock();
                if slot.sector != Some(sector) {
                    // 解锁与加锁之间，槽位被换成了别的扇区
                    drop(slot);
                    hint::spin_loop();
                    continue;
                }
                return f(&mut slot);
            }

            let Some(index) = dir.choose_victim() else {
                // 所有槽位都在换出中
                drop(dir);
                hint::spin_loop();
                continue;
            };
            let from = dir.entries[index].state.resident();
            dir.entries[index] = SlotEntry {
                state: SlotState::Evicting { from, to: sector },
                accessed: 0,
            };
            drop(dir);

            let value = {
                let mut slot = self.slots[index].lock();
                slot.install(sector, load, self.dev.as_ref());
                f(&mut slot)
            };
            // 放开槽位锁后才发布。在此之前槽位仍算 `to` 的，
            // 其他访问者锁住槽位时扇区号已经对上了
            self.dir.lock().entries[index].state = SlotState::Resident(sector);

            return value;
        }
    }

    #[inline]
    fn check_range(&self, sector: SectorId) {
        assert!(
            sector.index() < self.dev.num_blocks(),
            "sector {sector} out of device range"
        );
    }
}

fn wake(waker: &Mutex<Option<Arc<dyn Scheduler>>>) {
    if let Some(sched) = waker.lock().as_ref() {
        sched.notify();
    }
}

impl CacheDir {
    /// 查找持有扇区的槽位，换出中的槽位对新旧两个扇区都算数
    fn find(&self, sector: SectorId) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.state.holds(sector))
    }

    #[inline]
    fn touch(&mut self, index: usize) {
        let accessed = &mut self.entries[index].accessed;
        *accessed = accessed.saturating_add(1).min(ACCESS_MAX);
    }

    /// 时钟（二次机会）替换策略：
    /// 访问计数为零的槽位被选中，否则计数减一，指针前进。
    /// 换出中的槽位直接跳过。
    fn choose_victim(&mut self) -> Option<usize> {
        let len = self.entries.len();

        // 转够 ACCESS_MAX + 1 圈，任何未在换出的槽位的计数都会降到零
        for _ in 0..len * (ACCESS_MAX as usize + 2) {
            let index = self.hand;
            self.hand = (self.hand + 1) % len;

            let entry = &mut self.entries[index];
            match entry.state {
                SlotState::Evicting { .. } => continue,
                _ if entry.accessed == 0 => return Some(index),
                _ => entry.accessed -= 1,
            }
        }

        None
    }
}

impl SlotState {
    fn holds(&self, sector: SectorId) -> bool {
        match *self {
            SlotState::Empty => false,
            SlotState::Resident(resident) => resident == sector,
            SlotState::Evicting { from, to } => from == Some(sector) || to == sector,
        }
    }

    #[inline]
    fn resident(&self) -> Option<SectorId> {
        match *self {
            SlotState::Resident(sector) => Some(sector),
            _ => None,
        }
    }
}

impl Slot {
    const fn new() -> Self {
        Self {
            sector: None,
            data: [0; SECTOR_SIZE],
            dirty: false,
        }
    }

    fn sync(&mut self, dev: &dyn BlockDevice) {
        if let (true, Some(sector)) = (self.dirty, self.sector) {
            self.dirty = false;
            dev.write_block(sector.index(), &self.data);
        }
    }

    /// 写回旧扇区，装入新扇区
    fn install(&mut self, sector: SectorId, load: bool, dev: &dyn BlockDevice) {
        if let Some(old) = self.sector {
            log::trace!("evict sector {old} for {sector}, dirty={}", self.dirty);
        }
        self.sync(dev);

        if load {
            dev.read_block(sector.index(), &mut self.data);
        } else {
            self.data.fill(0);
        }
        self.sector = Some(sector);
    }
}
