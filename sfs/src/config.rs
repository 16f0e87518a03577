//! 文件系统的可调参数

use core::time::Duration;

/// 缓存槽位的默认个数
pub const CACHE_SIZE: usize = 64;
/// 后台写回的默认周期
pub const WRITE_BEHIND_INTERVAL: Duration = Duration::from_secs(5);
/// 预读队列的默认容量，溢出时丢弃最早的请求
pub const READ_AHEAD_DEPTH: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub cache_slots: usize,
    pub write_behind_interval: Duration,
    pub read_ahead_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_slots: CACHE_SIZE,
            write_behind_interval: WRITE_BEHIND_INTERVAL,
            read_ahead_depth: READ_AHEAD_DEPTH,
        }
    }
}
