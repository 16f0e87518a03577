//! # 块设备接口层
//!
//! 块设备是以**扇区**为单位存储数据的设备，例如磁盘、U盘或者宿主机上的镜像文件；
//! [`BlockDevice`] 就是对读写块设备的抽象，实现了此特质的类型称为**块设备驱动**。
//!
//! 读写都是同步的：函数返回时数据已经到达设备（或已从设备取回）。

#![no_std]

use core::any::Any;
use core::fmt::Debug;

/// 块设备驱动特质
pub trait BlockDevice: Debug + Send + Sync + Any {
    /// 读出整个扇区，`buf` 的长度恰为一个扇区
    fn read_block(&self, block_id: usize, buf: &mut [u8]);

    /// 写入整个扇区，`buf` 的长度恰为一个扇区
    fn write_block(&self, block_id: usize, buf: &[u8]);

    /// 设备的扇区总数
    fn num_blocks(&self) -> usize;
}
