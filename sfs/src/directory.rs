//! # 目录层
//!
//! 目录是内容为 [`DirEntry`] 序列的索引节点。前两项固定为 `.` 与 `..`，
//! 在目录建立时写入，之后不可删除。
//!
//! 只有 [`Dir::lookup`] 不加锁，其余操作都持有目录锁。项不跨扇区，每次只整项写入，
//! 所以不加锁的查找看到的总是完整的项。目录锁存放在共享的内存索引节点中，
//! 同一目录的所有打开者在同一把锁上串行。任何时候至多持有一个目录的锁。

use alloc::string::ToString;
use alloc::sync::Arc;

use enumflags2::BitFlags;
use vfs::Error;

use crate::layout::{DirEntry, InodeFlag};
use crate::{inode, FileSystem, Inode, SectorId, NAME_MAX, ROOT_DIR_SECTOR};

/// 打开的目录，带有 `readdir` 的读取位置
#[derive(Debug)]
pub struct Dir {
    inode: Inode,
    /// 下一次 `readdir` 的字节偏移
    pos: usize,
}

/// 保留项：`.` 与 `..`
const RESERVED_ENTRIES: usize = 2;

impl Dir {
    /// 在 `sector` 上建立目录，写好 `.` 与 `..`。
    ///
    /// 新目录此时还未链接到任何父目录，别人无法找到它。
    /// 保留项的空间随索引节点一并预先分配，写入不会再失败。
    pub fn create(fs: &Arc<FileSystem>, sector: SectorId, parent: SectorId) -> Result<(), Error> {
        inode::create(
            fs.cache(),
            fs.free_map(),
            sector,
            RESERVED_ENTRIES * DirEntry::SIZE,
            BitFlags::from(InodeFlag::Directory),
        )?;

        let inode = Inode::open(fs, sector);
        for (slot, (name, target)) in [(".", sector), ("..", parent)].into_iter().enumerate() {
            let entry = DirEntry::new(name, target);
            let written = inode.write_at(slot * DirEntry::SIZE, &entry.encode());
            assert_eq!(written, DirEntry::SIZE);
        }

        log::debug!("directory {sector} created under {parent}");
        Ok(())
    }

    /// 以目录的身份打开索引节点，接管其所有权
    pub fn open(inode: Inode) -> Result<Self, Error> {
        if !inode.is_dir() {
            return Err(Error::NotADirectory);
        }

        Ok(Self {
            inode,
            pos: RESERVED_ENTRIES * DirEntry::SIZE,
        })
    }

    pub fn open_root(fs: &Arc<FileSystem>) -> Self {
        Self::open(Inode::open(fs, ROOT_DIR_SECTOR)).expect("root is not a directory")
    }

    /// 再打开一次，读取位置从头开始
    pub fn reopen(&self) -> Self {
        Self {
            inode: self.inode.reopen(),
            pos: RESERVED_ENTRIES * DirEntry::SIZE,
        }
    }

    #[inline]
    pub fn inode(&self) -> &Inode {
        &self.inode
    }

    #[inline]
    pub fn into_inode(self) -> Inode {
        self.inode
    }

    #[inline]
    pub fn sector(&self) -> SectorId {
        self.inode.sector()
    }

    /// 按名字查找，返回目标索引节点所在扇区
    pub fn lookup(&self, name: &str) -> Result<SectorId, Error> {
        self.find(name)
            .map(|(_, entry)| entry.inode_sector())
            .ok_or(Error::NotFound)
    }

    /// 持目录锁查找并打开目标。
    ///
    /// 删除项与标记删除也在目录锁下完成，所以这里打开的索引节点不会已被回收。
    pub fn open_entry(&self, name: &str) -> Result<Inode, Error> {
        let _guard = self.inode.lock_dir();
        let sector = self.lookup(name)?;
        Ok(Inode::open(self.inode.fs(), sector))
    }

    /// 把 `name -> sector` 加入目录，优先复用空闲的项
    pub fn add(&self, name: &str, sector: SectorId) -> Result<(), Error> {
        if name.is_empty() || name.len() > NAME_MAX {
            return Err(Error::InvalidName);
        }

        let _guard = self.inode.lock_dir();

        // 已删除的目录不能再添加新项
        if self.inode.is_removed() {
            return Err(Error::NotFound);
        }
        if self.find(name).is_some() {
            return Err(Error::AlreadyExists);
        }

        let offset = self
            .entries()
            .find(|(_, entry)| !entry.is_in_use())
            .map(|(offset, _)| offset)
            .unwrap_or_else(|| self.inode.len());

        let entry = DirEntry::new(name, sector);
        if self.inode.write_at(offset, &entry.encode()) != DirEntry::SIZE {
            return Err(Error::NoSpace);
        }

        log::debug!("link {name:?} -> {sector} in directory {}", self.sector());
        Ok(())
    }

    /// 删除名为 `name` 的项，并把目标索引节点标记删除。
    ///
    /// 目标是目录时，它必须为空且没有别的打开者。
    pub fn remove(&self, name: &str) -> Result<(), Error> {
        if name == "." || name == ".." {
            return Err(Error::InvalidName);
        }

        let _guard = self.inode.lock_dir();

        let (offset, entry) = self.find(name).ok_or(Error::NotFound)?;
        let target = Inode::open(self.inode.fs(), entry.inode_sector());

        if target.is_dir() {
            // 除了手里这一次，还有别的打开者
            if target.open_count() > 1 {
                return Err(Error::Busy);
            }
            // 没有别的打开者，也就没有人能往里添加，不加它的锁也能检查
            if Self::open(target.reopen())?.has_entries() {
                return Err(Error::Busy);
            }
        }

        let written = self
            .inode
            .write_at(offset, &DirEntry::default().encode());
        assert_eq!(written, DirEntry::SIZE);
        target.remove();

        log::debug!("unlink {name:?} from directory {}", self.sector());
        Ok(())
    }

    /// 除了 `.` 与 `..` 再无在用的项
    pub fn is_empty(&self) -> bool {
        let _guard = self.inode.lock_dir();
        !self.has_entries()
    }

    /// 读出下一个在用的项，跳过 `.` 与 `..`
    pub fn readdir(&mut self) -> Option<vfs::DirEntry> {
        let _guard = self.inode.lock_dir();
        let mut raw = [0; DirEntry::SIZE];
        while self.inode.read_at(self.pos, &mut raw) == DirEntry::SIZE {
            self.pos += DirEntry::SIZE;

            let entry = DirEntry::decode(&raw);
            if entry.is_in_use() {
                return Some(vfs::DirEntry {
                    inode: entry.inode_sector().index() as u64,
                    name: entry.name().to_string(),
                });
            }
        }

        None
    }

    /// 回到第一个非保留项
    pub fn rewind(&mut self) {
        self.pos = RESERVED_ENTRIES * DirEntry::SIZE;
    }
}

impl Dir {
    /// 依次读出所有项及其字节偏移
    fn entries(&self) -> impl Iterator<Item = (usize, DirEntry)> + '_ {
        let mut raw = [0; DirEntry::SIZE];
        (0..)
            .map(|i| i * DirEntry::SIZE)
            .map_while(move |offset| {
                (self.inode.read_at(offset, &mut raw) == DirEntry::SIZE)
                    .then(|| (offset, DirEntry::decode(&raw)))
            })
    }

    fn has_entries(&self) -> bool {
        self.entries()
            .skip(RESERVED_ENTRIES)
            .any(|(_, entry)| entry.is_in_use())
    }

    fn find(&self, name: &str) -> Option<(usize, DirEntry)> {
        self.entries()
            .find(|(_, entry)| entry.is_in_use() && entry.name() == name)
    }
}
