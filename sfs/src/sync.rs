//! 宿主提供的调度原语。
//!
//! 互斥用 `spin::Mutex`；后台任务没活可干时在 [`Scheduler`] 上阻塞，
//! 由产生工作的一方唤醒。阻塞与唤醒由宿主的调度器实现。

use core::time::Duration;

/// 一个只有一名等待者的条件变量。
///
/// 唤醒会留下记号：[`Scheduler::notify`] 先于 [`Scheduler::wait`] 发生时，
/// 下一次 `wait` 立即返回，所以“检查条件、等待”之间的唤醒不会丢失。
/// `wait` 返回后调用者要重新检查条件。
pub trait Scheduler: Send + Sync {
    /// 阻塞当前线程，直到被唤醒，或等满 `timeout`（`None` 为不限时）
    fn wait(&self, timeout: Option<Duration>);

    /// 唤醒等待者
    fn notify(&self);
}
