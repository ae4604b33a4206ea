use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use hgpak_core::Platform;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging (Debug level) for troubleshooting.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Platform the archives target; selects the codec and chunk size.
    /// Defaults to the host platform.
    #[arg(short, long, global = true, value_enum)]
    pub platform: Option<PlatformArg>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Unpack one or more .pak archives
    Unpack {
        /// Input .pak files, or directories containing them
        inputs: Vec<PathBuf>,

        /// Output directory (default: EXTRACTED)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Glob pattern selecting files to unpack; may be repeated
        #[arg(short, long)]
        filter: Vec<String>,

        /// Convert extracted directory and file names to UPPERCASE
        #[arg(long)]
        upper: bool,

        /// Write a .manifest sidecar per archive for byte-identical repacking
        #[arg(short, long)]
        manifest: bool,
    },
    /// List contents of .pak archives without unpacking
    List {
        /// Input .pak files, or directories containing them
        inputs: Vec<PathBuf>,

        /// Write a filenames.json report instead of printing a table
        #[arg(long)]
        json: bool,
    },
    /// Pack files or directories into a .pak archive
    Pack {
        /// Files and directories to pack
        inputs: Vec<PathBuf>,

        /// Output archive path (default: hgpak.pak)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Directory the stored paths are relative to
        /// (default: parent of the first input)
        #[arg(long)]
        root: Option<PathBuf>,

        /// Compress the data region
        #[arg(short = 'Z', long)]
        compress: bool,
    },
    /// Repack an archive from a .manifest written during unpack
    Repack {
        /// The .manifest file; the archive is rebuilt next to it
        manifest: PathBuf,

        /// Store the data region uncompressed
        #[arg(long)]
        uncompressed: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PlatformArg {
    Windows,
    Linux,
    Mac,
    Switch,
}

impl From<PlatformArg> for Platform {
    fn from(arg: PlatformArg) -> Self {
        match arg {
            PlatformArg::Windows => Platform::Windows,
            PlatformArg::Linux => Platform::Linux,
            PlatformArg::Mac => Platform::Mac,
            PlatformArg::Switch => Platform::Switch,
        }
    }
}
