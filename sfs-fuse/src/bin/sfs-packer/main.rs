mod cli;

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::sync::Arc;

use block_dev::BlockDevice;
use clap::Parser;
use cli::{Cli, Command};
use sfs::{Config, FileSystem, ROOT_DIR_SECTOR, SECTOR_SIZE};
use sfs_fuse::BlockFile;
use vfs::DirEntryType;

fn main() -> io::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = Config {
        cache_slots: cli.cache_slots,
        ..Default::default()
    };

    match cli.command {
        Command::Format { sectors } => {
            let fd = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(&cli.image)?;
            fd.set_len((sectors * SECTOR_SIZE) as u64)?;

            let block_dev: Arc<dyn BlockDevice> = Arc::new(BlockFile::new(fd)?);
            let fs = FileSystem::format(block_dev, config).map_err(to_io)?;
            fs.shutdown();
            println!("image={:?} sectors={sectors}", cli.image);
        }
        command => {
            let fd = OpenOptions::new().read(true).write(true).open(&cli.image)?;
            let block_dev: Arc<dyn BlockDevice> = Arc::new(BlockFile::new(fd)?);
            let fs = FileSystem::mount(block_dev, config);
            let daemons = sfs_fuse::spawn_daemons(&fs);

            let result = run(&fs, command);

            fs.shutdown();
            for daemon in daemons {
                daemon.join().expect("daemon panicked");
            }
            result?;
        }
    }

    Ok(())
}

fn run(fs: &Arc<FileSystem>, command: Command) -> io::Result<()> {
    match command {
        Command::Format { .. } => unreachable!(),
        Command::Put { sources, dir } => {
            let target = fs.resolve(&dir, ROOT_DIR_SECTOR).map_err(to_io)?;

            for source in sources {
                let name = source
                    .file_name()
                    .and_then(|name| name.to_str())
                    .expect("host file name isn't UTF-8")
                    .to_owned();
                let data = std::fs::read(&source)?;
                log::info!("put {source:?} as {name:?}, {} bytes", data.len());

                fs.create(&name, target, 0, DirEntryType::Regular)
                    .map_err(to_io)?;
                let mut file = fs.open_file(&name, target).map_err(to_io)?;
                if file.write(&data) != data.len() {
                    return Err(to_io(vfs::Error::NoSpace));
                }
            }
        }
        Command::Mkdir { path } => {
            fs.create(&path, ROOT_DIR_SECTOR, 0, DirEntryType::Directory)
                .map_err(to_io)?;
        }
        Command::Ls { path } => {
            let mut dir = fs.open_dir(&path, ROOT_DIR_SECTOR).map_err(to_io)?;
            while let Some(entry) = dir.readdir() {
                let inode = fs.open(&entry.name, dir.sector()).map_err(to_io)?;
                let stat = inode.stat();
                let kind = match stat.mode {
                    DirEntryType::Directory => 'd',
                    DirEntryType::Regular => '-',
                };
                println!("{kind} {:>6} {:>10} {}", stat.inode, stat.size, entry.name);
            }
        }
        Command::Cat { path } => {
            let mut file = fs.open_file(&path, ROOT_DIR_SECTOR).map_err(to_io)?;
            let mut stdout = io::stdout().lock();
            let mut buf = [0; SECTOR_SIZE];
            loop {
                let read = file.read(&mut buf);
                if read == 0 {
                    break;
                }
                stdout.write_all(&buf[..read])?;
            }
        }
        Command::Rm { path } => {
            fs.remove(&path, ROOT_DIR_SECTOR).map_err(to_io)?;
        }
    }

    Ok(())
}

fn to_io(e: vfs::Error) -> io::Error {
    let kind = match e {
        vfs::Error::NotFound => io::ErrorKind::NotFound,
        vfs::Error::AlreadyExists => io::ErrorKind::AlreadyExists,
        vfs::Error::InvalidName => io::ErrorKind::InvalidInput,
        _ => io::ErrorKind::Other,
    };
    io::Error::new(kind, e.to_string())
}
