mod common;

use sfs::{FileSystem, SectorId, FREE_MAP_SECTOR, ROOT_DIR_SECTOR};
use vfs::Error;

#[test]
fn reserved_sectors_in_use() {
    let (_disk, fs) = common::format(128);

    assert!(fs.free_map().is_allocated(FREE_MAP_SECTOR));
    assert!(fs.free_map().is_allocated(ROOT_DIR_SECTOR));
    // 两个索引节点，加上位图文件与根目录各一个数据块
    assert_eq!(128 - 4, fs.free_map().free_count());
}

#[test]
fn exhaustion_leaves_map_unchanged() {
    let (_disk, fs) = common::format(128);
    let free = fs.free_map().free_count();

    assert_eq!(
        Err(Error::NoSpace),
        fs.free_map().allocate(free + 1, fs.cache())
    );
    assert_eq!(free, fs.free_map().free_count());

    let all = fs.free_map().allocate(free, fs.cache()).unwrap();
    assert_eq!(free, all.len());
    assert_eq!(0, fs.free_map().free_count());

    fs.free_map().release(&all, fs.cache());
    assert_eq!(free, fs.free_map().free_count());
}

#[test]
fn changes_written_through() {
    let (disk, fs) = common::format(300);
    let taken = fs.free_map().allocate(70, fs.cache()).unwrap();
    fs.free_map().release(&taken[..3], fs.cache());
    fs.shutdown();
    drop(fs);

    let fs = FileSystem::mount(disk, common::config(8));
    for &sector in &taken[..3] {
        assert!(!fs.free_map().is_allocated(sector));
    }
    for &sector in &taken[3..] {
        assert!(fs.free_map().is_allocated(sector));
    }
}

#[test]
#[should_panic]
fn double_release_panics() {
    let (_disk, fs) = common::format(128);
    let sector = SectorId::new(100);
    fs.free_map().release(&[sector], fs.cache());
}
