mod common;

use std::sync::Arc;
use std::thread;

use enumflags2::BitFlags;
use sfs::{
    DiskInode, FileSystem, Inode, InodeFlag, SectorId, DIRECT_COUNT, MAX_BLOCKS, SECTOR_SIZE,
};

fn new_inode(fs: &Arc<FileSystem>, length: usize) -> Inode {
    let sector = fs.free_map().allocate(1, fs.cache()).unwrap()[0];
    Inode::create(fs, sector, length, BitFlags::empty()).unwrap();
    Inode::open(fs, sector)
}

#[test]
fn create_preallocates_zeroed_space() {
    let (_disk, fs) = common::format(1024);
    let free = fs.free_map().free_count();

    let inode = new_inode(&fs, 3 * SECTOR_SIZE + 1);
    assert_eq!(3 * SECTOR_SIZE + 1, inode.len());
    // 索引节点本身加四个数据块
    assert_eq!(free - 5, fs.free_map().free_count());

    let mut buf = vec![0xff; inode.len()];
    assert_eq!(buf.len(), inode.read_at(0, &mut buf));
    assert!(buf.iter().all(|&b| b == 0));
}

#[test]
fn create_failure_releases_everything() {
    let (_disk, fs) = common::format(64);
    let free = fs.free_map().free_count();
    let sector = fs.free_map().allocate(1, fs.cache()).unwrap()[0];

    let result = Inode::create(&fs, sector, 100 * SECTOR_SIZE, BitFlags::empty());
    assert_eq!(Err(vfs::Error::NoSpace), result);
    assert_eq!(free - 1, fs.free_map().free_count());
}

#[test]
fn read_stops_at_length() {
    let (_disk, fs) = common::format(1024);
    let inode = new_inode(&fs, 0);

    assert_eq!(10, inode.write_at(0, b"0123456789"));
    let mut buf = [0; 16];
    assert_eq!(4, inode.read_at(6, &mut buf));
    assert_eq!(b"6789", &buf[..4]);
    assert_eq!(0, inode.read_at(10, &mut buf));
    assert_eq!(0, inode.read_at(1000, &mut buf));
}

#[test]
fn grows_through_every_index_level() {
    let (_disk, fs) = common::format(4096);
    let inode = new_inode(&fs, 0);

    // 跨越直接索引、一级索引与二级索引的边界
    let offsets = [
        0,
        (DIRECT_COUNT - 1) * SECTOR_SIZE + 100,
        (DIRECT_COUNT + 128) * SECTOR_SIZE - 7,
        (DIRECT_COUNT + 128 + 130) * SECTOR_SIZE,
    ];
    let payloads: Vec<_> = offsets.iter().map(|_| common::random_bytes(4096 + 13)).collect();

    for (&offset, payload) in offsets.iter().zip(&payloads) {
        assert_eq!(payload.len(), inode.write_at(offset, payload));
    }
    assert_eq!(offsets[3] + 4096 + 13, inode.len());

    for (&offset, payload) in offsets.iter().zip(&payloads) {
        let mut buf = vec![0; payload.len()];
        assert_eq!(payload.len(), inode.read_at(offset, &mut buf));
        assert_eq!(payload, &buf);
    }

    // 空洞读作 0
    let mut gap = vec![0xff; SECTOR_SIZE];
    inode.read_at(offsets[2] - 2 * SECTOR_SIZE, &mut gap);
    assert!(gap.iter().all(|&b| b == 0));

    let blocks = DiskInode::count_data_block(inode.len());
    assert_eq!(
        DiskInode::count_total_block(blocks) as u64,
        inode.stat().blocks
    );
}

#[test]
fn growth_failure_writes_nothing() {
    let (_disk, fs) = common::format(64);
    let inode = new_inode(&fs, 0);
    inode.write_at(0, b"keep");

    let free = fs.free_map().free_count();

    let huge = vec![1; 100 * SECTOR_SIZE];
    assert_eq!(0, inode.write_at(4, &huge));
    assert_eq!(4, inode.len());
    assert_eq!(free, fs.free_map().free_count());
    assert_eq!(1, inode.stat().blocks);
}

#[test]
fn failed_growth_leaves_space_for_others() {
    let (_disk, fs) = common::format(4096);
    let inode = new_inode(&fs, 0);
    let free = fs.free_map().free_count();

    assert_eq!(0, inode.write_at(3_000_000, b"x"));
    assert_eq!(0, inode.len());
    assert_eq!(free, fs.free_map().free_count());

    // 超出索引容量的写入不会动用位图
    assert_eq!(0, inode.write_at(MAX_BLOCKS * SECTOR_SIZE, b"x"));
    assert_eq!(free, fs.free_map().free_count());

    let other = new_inode(&fs, 1000 * SECTOR_SIZE);
    assert_eq!(1000 * SECTOR_SIZE, other.len());
}

#[test]
fn truncate_undoes_append() {
    let (_disk, fs) = common::format(4096);
    let (cache, free_map) = (fs.cache(), fs.free_map());
    let free = free_map.free_count();

    let blocks = DIRECT_COUNT + 128 + 130;
    let keep = DIRECT_COUNT - 1;
    let mut disk_inode = DiskInode::new(BitFlags::empty());
    for _ in 0..blocks {
        disk_inode.append_block(cache, free_map).unwrap();
    }

    let freed = disk_inode.truncate_blocks(keep, cache);
    assert_eq!(
        DiskInode::count_total_block(blocks) - DiskInode::count_total_block(keep),
        freed.len()
    );
    free_map.release(&freed, cache);
    assert_eq!(free - keep, free_map.free_count());

    // 剩下的索引仍然完整，可以再次追加
    disk_inode.append_block(cache, free_map).unwrap();
    disk_inode.append_block(cache, free_map).unwrap();
    let rest = disk_inode.clear(cache);
    assert_eq!(DiskInode::count_total_block(keep + 2), rest.len());
    free_map.release(&rest, cache);
    assert_eq!(free, free_map.free_count());
}

#[test]
fn offsets_near_usize_max() {
    let (_disk, fs) = common::format(256);
    let inode = new_inode(&fs, 10);

    let mut buf = [0; 4];
    assert_eq!(0, inode.read_at(usize::MAX, &mut buf));
    assert_eq!(0, inode.write_at(usize::MAX - 1, b"ab"));
    assert_eq!(10, inode.len());
}

#[test]
fn readers_never_see_unwritten_growth() {
    let (_disk, fs) = common::format(2048);
    let inode = new_inode(&fs, 0);
    let writer = inode.reopen();

    let handle = thread::spawn(move || {
        for i in 0..200u8 {
            writer.write_at(i as usize * 100, &[i + 1; 100]);
        }
    });

    // 长度一旦可见，其内的字节必然已经写好
    for _ in 0..500 {
        let len = inode.len();
        let mut buf = vec![0; len];
        inode.read_at(0, &mut buf);
        assert!(buf.iter().all(|&b| b != 0));
    }
    handle.join().unwrap();
    assert_eq!(200 * 100, inode.len());
}

#[test]
fn shared_in_memory_inode() {
    let (_disk, fs) = common::format(1024);
    let first = new_inode(&fs, 0);
    let second = Inode::open(&fs, first.sector());

    assert_eq!(2, first.open_count());
    assert!(fs.inodes().is_open(first.sector()));

    second.write_at(0, b"shared");
    assert_eq!(6, first.len());

    drop(second);
    assert_eq!(1, first.open_count());
    let sector = first.sector();
    drop(first);
    assert!(!fs.inodes().is_open(sector));
}

#[test]
fn deny_write_blocks_writers() {
    let (_disk, fs) = common::format(1024);
    let inode = new_inode(&fs, 0);
    inode.write_at(0, b"text");

    inode.deny_write();
    assert_eq!(0, inode.write_at(0, b"TEXT"));
    assert_eq!(0, inode.reopen().write_at(4, b"more"));

    inode.allow_write();
    assert_eq!(4, inode.write_at(0, b"TEXT"));
}

#[test]
fn removed_inode_reaped_on_last_close() {
    let (_disk, fs) = common::format(1024);
    let free = fs.free_map().free_count();

    let inode = new_inode(&fs, 20 * SECTOR_SIZE);
    let sector = inode.sector();
    let other = inode.reopen();
    inode.remove();
    drop(inode);

    // 仍有打开者，数据照常可用
    assert!(other.is_removed());
    assert_eq!(20 * SECTOR_SIZE, other.len());
    assert!(fs.free_map().is_allocated(sector));

    drop(other);
    assert!(!fs.free_map().is_allocated(sector));
    assert_eq!(free, fs.free_map().free_count());
}

#[test]
fn attributes_round_trip() {
    let (_disk, fs) = common::format(1024);
    let inode = new_inode(&fs, 0);

    assert!(!inode.is_dir());
    inode.set_attributes(InodeFlag::Directory.into());
    assert!(inode.is_dir());
    assert_eq!(vfs::DirEntryType::Directory, inode.stat().mode);
}

#[test]
#[should_panic]
fn bad_magic_is_fatal() {
    let (_disk, fs) = common::format(1024);
    Inode::open(&fs, SectorId::new(500));
}
