mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use sfs::{Dir, DirEntry, Inode, SectorId, ROOT_DIR_SECTOR};
use vfs::Error;

#[test]
fn root_has_reserved_entries() {
    let (_disk, fs) = common::format(256);
    let root = fs.root();

    assert_eq!(Ok(ROOT_DIR_SECTOR), root.lookup("."));
    assert_eq!(Ok(ROOT_DIR_SECTOR), root.lookup(".."));
    assert!(root.is_empty());
    assert_eq!(2 * DirEntry::SIZE, root.inode().len());
}

#[test]
fn add_lookup_remove() {
    let (_disk, fs) = common::format(256);
    let root = fs.root();
    let sector = fs.create("/a", ROOT_DIR_SECTOR, 0, vfs::DirEntryType::Regular).unwrap();

    assert_eq!(Ok(sector), root.lookup("a"));
    assert_eq!(Err(Error::AlreadyExists), root.add("a", sector));
    assert_eq!(Err(Error::NotFound), root.lookup("b"));
    assert!(!root.is_empty());

    assert_eq!(Ok(()), root.remove("a"));
    assert_eq!(Err(Error::NotFound), root.lookup("a"));
    assert_eq!(Err(Error::NotFound), root.remove("a"));
    assert!(root.is_empty());
}

#[test]
fn add_rejects_bad_names() {
    let (_disk, fs) = common::format(256);
    let root = fs.root();

    assert_eq!(Err(Error::InvalidName), root.add("", SectorId::new(9)));
    assert_eq!(
        Err(Error::InvalidName),
        root.add("abcdefghijklmno", SectorId::new(9))
    );
    assert_eq!(Err(Error::InvalidName), root.remove("."));
    assert_eq!(Err(Error::InvalidName), root.remove(".."));
}

#[test]
fn free_slot_is_reused() {
    let (_disk, fs) = common::format(256);
    let root = fs.root();

    for name in ["a", "b", "c"] {
        fs.create(name, ROOT_DIR_SECTOR, 0, vfs::DirEntryType::Regular)
            .unwrap();
    }
    let len = root.inode().len();
    root.remove("b").unwrap();
    fs.create("d", ROOT_DIR_SECTOR, 0, vfs::DirEntryType::Regular)
        .unwrap();

    assert_eq!(len, root.inode().len());
}

#[test]
fn readdir_skips_reserved_entries() {
    let (_disk, fs) = common::format(256);
    for name in ["x", "y", "z"] {
        fs.create(name, ROOT_DIR_SECTOR, 0, vfs::DirEntryType::Regular)
            .unwrap();
    }
    let mut root = fs.root();
    root.remove("y").unwrap();

    let names: Vec<_> = std::iter::from_fn(|| root.readdir())
        .map(|entry| entry.name)
        .collect();
    assert_eq!(vec!["x", "z"], names);
    assert_eq!(None, root.readdir());

    root.rewind();
    assert_eq!("x", root.readdir().unwrap().name);

    // 新句柄有各自的读取位置
    let mut other = root.reopen();
    assert_eq!("x", other.readdir().unwrap().name);
}

#[test]
fn directory_grows_past_one_sector() {
    let (_disk, fs) = common::format(512);
    let root = fs.root();

    let names: Vec<_> = (0..40).map(|i| format!("file{i}")).collect();
    for name in &names {
        fs.create(name, ROOT_DIR_SECTOR, 0, vfs::DirEntryType::Regular)
            .unwrap();
    }

    assert!(root.inode().len() > sfs::SECTOR_SIZE);
    for name in &names {
        assert!(root.lookup(name).is_ok());
    }
}

#[test]
fn open_requires_directory() {
    let (_disk, fs) = common::format(256);
    let sector = fs.create("f", ROOT_DIR_SECTOR, 0, vfs::DirEntryType::Regular)
        .unwrap();

    assert_eq!(
        Error::NotADirectory,
        Dir::open(Inode::open(&fs, sector)).unwrap_err()
    );
}

#[test]
fn add_to_removed_directory_fails() {
    let (_disk, fs) = common::format(256);
    let sector = fs.create("d", ROOT_DIR_SECTOR, 0, vfs::DirEntryType::Directory)
        .unwrap();

    let dir = Dir::open(Inode::open(&fs, sector)).unwrap();
    dir.inode().remove();
    assert_eq!(Err(Error::NotFound), dir.add("late", SectorId::new(5)));
}

#[test]
fn lookup_never_sees_partial_entry() {
    let (_disk, fs) = common::format(256);
    let root = fs.root();

    // 占满第一个扇区，反复增删的项落在扇区边界之后
    let per_sector = sfs::SECTOR_SIZE / DirEntry::SIZE;
    for i in 2..per_sector {
        fs.create(&format!("f{i}"), ROOT_DIR_SECTOR, 0, vfs::DirEntryType::Regular)
            .unwrap();
    }

    let done = Arc::new(AtomicBool::new(false));
    let reader = {
        let (dir, done) = (root.reopen(), done.clone());
        thread::spawn(move || {
            let mut lookups = 0;
            while !done.load(Ordering::SeqCst) {
                assert_eq!(Err(Error::NotFound), dir.lookup("abcdefg"));
                if let Ok(sector) = dir.lookup("abcdefghijklmn") {
                    assert_ne!(ROOT_DIR_SECTOR, sector);
                }
                lookups += 1;
            }
            lookups
        })
    };

    for _ in 0..2000 {
        fs.create("/abcdefghijklmn", ROOT_DIR_SECTOR, 0, vfs::DirEntryType::Regular)
            .unwrap();
        fs.remove("/abcdefghijklmn", ROOT_DIR_SECTOR).unwrap();
    }
    done.store(true, Ordering::SeqCst);

    assert!(reader.join().unwrap() > 0);
    assert_eq!(per_sector * DirEntry::SIZE + DirEntry::SIZE, root.inode().len());
}
