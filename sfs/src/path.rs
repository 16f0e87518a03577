//! # 路径解析层
//!
//! 路径以 `/` 分隔，以 `/` 开头的从根目录出发，否则从调用者给出的当前目录出发。
//! 空分量（`a//b`、末尾的 `/`）被跳过，`.` 与 `..` 就是目录里的普通项。
//!
//! 逐级解析时每次只持有一个目录的锁。

use alloc::sync::Arc;

use enumflags2::BitFlags;
use vfs::{DirEntryType, Error};

use crate::{inode, Dir, File, FileSystem, Inode, SectorId, NAME_MAX, ROOT_DIR_SECTOR};

pub trait Path {
    fn is_absolute(&self) -> bool;

    /// 非空的路径分量
    fn components(&self) -> impl Iterator<Item = &Self>;

    /// 返回路径的`(父目录, 文件名)`。
    ///
    /// 只有一个分量的相对路径，父目录为空字符串；路径为空或就是根目录时返回`None`。
    fn parent_file(&self) -> Option<(&Self, &Self)>;

    fn is_relative(&self) -> bool {
        !self.is_absolute()
    }
}

impl Path for str {
    fn is_absolute(&self) -> bool {
        self.starts_with('/')
    }

    fn components(&self) -> impl Iterator<Item = &Self> {
        self.split('/').filter(|s| !s.is_empty())
    }

    fn parent_file(&self) -> Option<(&Self, &Self)> {
        let path = self.trim_end_matches('/');
        if path.is_empty() {
            return None;
        }

        match path.rsplit_once('/') {
            // 防止根目录被当成空的相对路径
            Some(("", name)) => Some(("/", name)),
            Some((parent, name)) => Some((parent, name)),
            None => Some(("", path)),
        }
    }
}

impl FileSystem {
    /// 解析路径，返回目标索引节点所在扇区
    pub fn resolve(self: &Arc<Self>, path: &str, cwd: SectorId) -> Result<SectorId, Error> {
        self.walk(path, cwd).map(|inode| inode.sector())
    }

    /// 在 `path` 处新建文件或目录，返回其索引节点所在扇区。
    ///
    /// 普通文件预先分配 `length` 字节的空间；目录从只有 `.` 与 `..` 开始。
    /// 链接失败时回收新索引节点及其全部空间。
    pub fn create(
        self: &Arc<Self>,
        path: &str,
        cwd: SectorId,
        length: usize,
        kind: DirEntryType,
    ) -> Result<SectorId, Error> {
        validate(path)?;
        let (parent, name) = path.parent_file().ok_or(Error::InvalidName)?;
        let parent = self.open_parent(parent, cwd)?;

        let sector = self.free_map().allocate(1, self.cache())?[0];
        let built = match kind {
            DirEntryType::Directory => Dir::create(self, sector, parent.sector()),
            DirEntryType::Regular => inode::create(
                self.cache(),
                self.free_map(),
                sector,
                length,
                BitFlags::empty(),
            ),
        };
        if let Err(e) = built {
            self.free_map().release(&[sector], self.cache());
            return Err(e);
        }

        if let Err(e) = parent.add(name, sector) {
            // 最后一个打开者关闭时连同扇区一并回收
            Inode::open(self, sector).remove();
            return Err(e);
        }

        log::debug!("created {path:?} at {sector} as {kind:?}");
        Ok(sector)
    }

    pub fn open(self: &Arc<Self>, path: &str, cwd: SectorId) -> Result<Inode, Error> {
        self.walk(path, cwd)
    }

    pub fn open_file(self: &Arc<Self>, path: &str, cwd: SectorId) -> Result<File, Error> {
        let inode = self.walk(path, cwd)?;
        if inode.is_dir() {
            return Err(Error::IsADirectory);
        }
        Ok(File::open(inode))
    }

    pub fn open_dir(self: &Arc<Self>, path: &str, cwd: SectorId) -> Result<Dir, Error> {
        Dir::open(self.walk(path, cwd)?)
    }

    /// 删除 `path`。
    ///
    /// 根目录不可删除；目录须为空且没有别的打开者；普通文件打开着也能删除，
    /// 最后一个打开者关闭时才回收。
    pub fn remove(self: &Arc<Self>, path: &str, cwd: SectorId) -> Result<(), Error> {
        if path.is_empty() {
            return Err(Error::InvalidName);
        }
        let (parent, name) = path.parent_file().ok_or(Error::Busy)?;
        if name == "." || name == ".." {
            return Err(Error::InvalidName);
        }

        self.open_parent(parent, cwd)?.remove(name)?;
        log::debug!("removed {path:?}");
        Ok(())
    }

    /// 切换当前目录。
    ///
    /// 返回的目录句柄应由调用者一直持有，这样当前目录被别人删除时会得到 [`Error::Busy`]。
    pub fn chdir(self: &Arc<Self>, path: &str, cwd: SectorId) -> Result<Dir, Error> {
        self.open_dir(path, cwd)
    }
}

impl FileSystem {
    fn walk(self: &Arc<Self>, path: &str, cwd: SectorId) -> Result<Inode, Error> {
        if path.is_empty() {
            return Err(Error::InvalidName);
        }

        let start = if path.is_absolute() {
            ROOT_DIR_SECTOR
        } else {
            cwd
        };

        path.components()
            .try_fold(Inode::open(self, start), |inode, name| {
                Dir::open(inode)?.open_entry(name)
            })
    }

    fn open_parent(self: &Arc<Self>, parent: &str, cwd: SectorId) -> Result<Dir, Error> {
        if parent.is_empty() {
            Dir::open(Inode::open(self, cwd))
        } else {
            self.open_dir(parent, cwd)
        }
    }
}

/// 每个分量都得放得进目录项
fn validate(path: &str) -> Result<(), Error> {
    if path.is_empty() || path.components().any(|name| name.len() > NAME_MAX) {
        return Err(Error::InvalidName);
    }
    Ok(())
}
