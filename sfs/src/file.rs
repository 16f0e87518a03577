//! 打开的文件：索引节点加上读写位置

use crate::{Inode, SectorId};

#[derive(Debug)]
pub struct File {
    inode: Inode,
    pos: usize,
    /// 本文件是否调用过 `deny_write`
    deny_write: bool,
}

impl File {
    /// 接管索引节点的所有权
    pub fn open(inode: Inode) -> Self {
        Self {
            inode,
            pos: 0,
            deny_write: false,
        }
    }

    /// 同一索引节点上的新文件，位置从头开始
    pub fn reopen(&self) -> Self {
        Self::open(self.inode.reopen())
    }

    #[inline]
    pub fn inode(&self) -> &Inode {
        &self.inode
    }

    /// 从当前位置读，位置随之前进
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let read = self.inode.read_at(self.pos, buf);
        self.pos += read;
        read
    }

    /// 写到当前位置，位置随之前进
    pub fn write(&mut self, buf: &[u8]) -> usize {
        let written = self.inode.write_at(self.pos, buf);
        self.pos += written;
        written
    }

    /// 不影响当前位置
    #[inline]
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize {
        self.inode.read_at(offset, buf)
    }

    /// 不影响当前位置
    #[inline]
    pub fn write_at(&self, offset: usize, buf: &[u8]) -> usize {
        self.inode.write_at(offset, buf)
    }

    /// 位置可以越过文件末尾，之后的写入会留下读作 0 的空洞
    #[inline]
    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    #[inline]
    pub fn tell(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inode.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inode.is_empty()
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.inode.is_dir()
    }

    /// 索引节点编号，即它所在的扇区
    #[inline]
    pub fn inumber(&self) -> SectorId {
        self.inode.sector()
    }

    /// 禁止对底层索引节点写入，每个文件至多生效一次
    pub fn deny_write(&mut self) {
        if !self.deny_write {
            self.deny_write = true;
            self.inode.deny_write();
        }
    }

    pub fn allow_write(&mut self) {
        if self.deny_write {
            self.deny_write = false;
            self.inode.allow_write();
        }
    }
}

impl Drop for File {
    fn drop(&mut self) {
        self.allow_write();
    }
}
