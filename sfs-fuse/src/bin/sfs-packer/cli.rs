use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
pub struct Cli {
    /// Image file holding the file system
    #[arg(long, short)]
    pub image: PathBuf,

    /// Number of buffer cache slots
    #[arg(long, default_value_t = sfs::CACHE_SIZE)]
    pub cache_slots: usize,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a fresh image and format it
    Format {
        /// Image size in sectors
        #[arg(long, short, default_value_t = 16 * 2048)]
        sectors: usize,
    },
    /// Copy host files into a directory of the image
    Put {
        /// Host files to copy
        #[arg(required = true)]
        sources: Vec<PathBuf>,

        /// Target directory inside the image
        #[arg(long, short, default_value = "/")]
        dir: String,
    },
    /// Create a directory
    Mkdir { path: String },
    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Print a file to stdout
    Cat { path: String },
    /// Remove a file or an empty directory
    Rm { path: String },
}
