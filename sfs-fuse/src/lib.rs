
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use block_dev::BlockDevice;
use sfs::{FileSystem, Scheduler, SECTOR_SIZE};

/// 宿主机上的镜像文件，按扇区读写
#[derive(Debug)]
pub struct BlockFile {
    file: Mutex<File>,
    sectors: usize,
}

impl BlockFile {
    pub fn new(file: File) -> io::Result<Self> {
        let sectors = file.metadata()?.len() as usize / SECTOR_SIZE;
        Ok(Self {
            file: Mutex::new(file),
            sectors,
        })
    }
}

impl BlockDevice for BlockFile {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start((block_id * SECTOR_SIZE) as u64))
            .expect("seeking error");
        file.read_exact(buf).expect("not a complete block!");
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start((block_id * SECTOR_SIZE) as u64))
            .expect("seeking error");
        file.write_all(buf).expect("not a complete block!");
    }

    fn num_blocks(&self) -> usize {
        self.sectors
    }
}

/// 用标准库条件变量实现的调度原语，记号为 `true` 表示有未消费的唤醒
#[derive(Debug, Default)]
pub struct StdScheduler {
    notified: Mutex<bool>,
    cond: Condvar,
}

impl StdScheduler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scheduler for StdScheduler {
    fn wait(&self, timeout: Option<Duration>) {
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

/// 在后台线程上运行写回与预读任务，[`FileSystem::shutdown`] 之后它们会退出
pub fn spawn_daemons(fs: &Arc<FileSystem>) -> Vec<JoinHandle<()>> {
    let write_behind = {
        let fs = fs.clone();
        thread::Builder::new()
            .name("sfs-write-behind".into())
            .spawn(move || fs.run_write_behind(Arc::new(StdScheduler::new())))
            .expect("failed to spawn write-behind thread")
    };
    let read_ahead = {
        let fs = fs.clone();
        thread::Builder::new()
            .name("sfs-read-ahead".into())
            .spawn(move || fs.run_read_ahead(Arc::new(StdScheduler::new())))
            .expect("failed to spawn read-ahead thread")
    };

    vec![write_behind, read_ahead]
}
