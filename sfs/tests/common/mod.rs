#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use block_dev::BlockDevice;
use sfs::{Config, FileSystem, Scheduler, SECTOR_SIZE};

/// 内存里的块设备，记录读写次数
#[derive(Debug)]
pub struct MemDisk {
    sectors: Mutex<Vec<[u8; SECTOR_SIZE]>>,
    pub reads: AtomicUsize,
    pub writes: AtomicUsize,
}

impl MemDisk {
    pub fn new(sector_count: usize) -> Arc<Self> {
        Arc::new(Self {
            sectors: Mutex::new(vec![[0; SECTOR_SIZE]; sector_count]),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        })
    }

    /// 绕过缓存直接查看设备上的扇区
    pub fn sector(&self, block_id: usize) -> [u8; SECTOR_SIZE] {
        self.sectors.lock().unwrap()[block_id]
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl BlockDevice for MemDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        self.reads.fetch_add(1, Ordering::SeqCst);
        buf.copy_from_slice(&self.sectors.lock().unwrap()[block_id]);
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.sectors.lock().unwrap()[block_id].copy_from_slice(buf);
    }

    fn num_blocks(&self) -> usize {
        self.sectors.lock().unwrap().len()
    }
}

/// 用条件变量实现的调度原语，记下进入等待的次数
#[derive(Debug, Default)]
pub struct ThreadScheduler {
    notified: Mutex<bool>,
    cond: Condvar,
    waits: AtomicUsize,
}

impl ThreadScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn waits(&self) -> usize {
        self.waits.load(Ordering::SeqCst)
    }
}

impl Scheduler for ThreadScheduler {
    fn wait(&self, timeout: Option<Duration>) {
        self.waits.fetch_add(1, Ordering::SeqCst);
        let notified = self.notified.lock().unwrap();
        let mut notified = match timeout {
            None => self.cond.wait_while(notified, |n| !*n).unwrap(),
            Some(timeout) => {
                self.cond
                    .wait_timeout_while(notified, timeout, |n| !*n)
                    .unwrap()
                    .0
            }
        };
        *notified = false;
    }

    fn notify(&self) {
        *self.notified.lock().unwrap() = true;
        self.cond.notify_one();
    }
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn config(cache_slots: usize) -> Config {
    Config {
        cache_slots,
        write_behind_interval: Duration::from_millis(10),
        ..Default::default()
    }
}

/// 格式化一块全新的内存盘
pub fn format(sector_count: usize) -> (Arc<MemDisk>, Arc<FileSystem>) {
    init_logger();
    let disk = MemDisk::new(sector_count);
    let fs = FileSystem::format(disk.clone(), config(64)).unwrap();
    (disk, fs)
}

pub fn random_bytes(len: usize) -> Vec<u8> {
    use rand::Rng;
    let mut bytes = vec![0; len];
    rand::thread_rng().fill(&mut bytes[..]);
    bytes
}
