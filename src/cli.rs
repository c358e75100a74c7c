use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "Strand")]
#[command(about = "Differential tar backups with per configuration variants")]
#[command(author, version, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Builds the base archive and every configured variant
    Compile {
        /// The instruction file, paths in it are relative to its directory
        config: PathBuf,
    },

    /// Decrypts and unpacks a sealed archive
    Extract {
        /// The sealed archive
        file: PathBuf,

        /// Key file of the configuration that sealed it
        key_file: PathBuf,

        /// Target directory, derived from the archive name when unset
        out_dir: Option<PathBuf>,
    },

    /// Prints a single entry of a sealed archive
    Fetch {
        /// The sealed archive
        file: PathBuf,

        /// Key file of the configuration that sealed it
        key_file: PathBuf,

        /// Entry name as stored in the archive
        name: String,

        /// Write to this file instead of stdout
        #[arg(short, long, value_name = "FILE")]
        out: Option<PathBuf>,
    },

    /// Generates a new key file
    Keygen {
        /// Where to write the key, an existing file is never overwritten
        key_file: PathBuf,
    },
}
