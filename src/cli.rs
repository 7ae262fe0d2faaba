use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "streamhold")]
#[command(author, version, about = "Buffering, timeshift and local recording for IPTV streams")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load an HLS playlist and list its segments
    Playlist {
        /// Playlist URL (http(s):// or file://)
        #[arg(required = true)]
        url: String,
    },

    /// Record a live stream or HLS playlist into a local recording
    Record {
        /// Stream or playlist URL
        #[arg(required = true)]
        url: String,

        /// Recordings base directory (defaults to the configured one)
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Stop after this many seconds
        #[arg(long, default_value = "60")]
        seconds: u64,

        /// Recording title
        #[arg(long, default_value = "Untitled")]
        title: String,

        /// Recording id, used as the directory name
        #[arg(long)]
        id: Option<u32>,

        /// Channel id stored in the recording info
        #[arg(long, default_value = "0")]
        channel: u32,
    },

    /// Play a live stream through the timeshift window into a file
    Timeshift {
        /// Stream or playlist URL
        #[arg(required = true)]
        url: String,

        /// File receiving the bytes read behind the writer
        #[arg(long, short)]
        output: PathBuf,

        /// Stop after this many seconds
        #[arg(long, default_value = "30")]
        seconds: u64,
    },

    /// List local recordings
    Recordings {
        /// Recordings base directory (defaults to the configured one)
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Delete a recording with its chunk files
    Delete {
        /// Recording directory
        #[arg(required = true)]
        dir: PathBuf,
    },

    /// Concatenate the chunk files of a recording into one file
    Dump {
        /// Recording directory
        #[arg(required = true)]
        dir: PathBuf,

        /// Output file
        #[arg(required = true)]
        output: PathBuf,
    },

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
