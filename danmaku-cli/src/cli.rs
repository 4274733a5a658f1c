use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "dmk",
    version,
    about = "Decode, merge and inspect time-coded danmaku comment blobs"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Configuration file (defaults to <config dir>/dmk/config.toml)
    #[arg(short, long, global = true, env = "DMK_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Decode local comment blobs (textual or binary, optionally deflated)
    Decode {
        /// Input files
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Treat the inputs as ordered binary segments of one blob
        #[arg(long)]
        segments: bool,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Decode local blobs and merge duplicate bursts
    Merge {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[arg(long)]
        segments: bool,

        /// Skip the merge pass
        #[arg(long)]
        no_merge: bool,

        /// Largest gap between members of one burst
        #[arg(long)]
        batch_gap_ms: Option<i64>,

        /// Number of groups promoted to high-energy announcements
        #[arg(long)]
        high_energy_slots: Option<usize>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Fetch, decode and merge comments for a content id over HTTP
    Fetch {
        content_id: i64,

        /// Content duration; enables segmented fetching when positive
        #[arg(long, default_value_t = 0)]
        duration_ms: i64,

        /// URL template for the single raw blob ({cid} is substituted)
        #[arg(long)]
        raw_url: Option<String>,

        /// URL template for binary segments ({cid} and {index} are substituted)
        #[arg(long)]
        segment_url: Option<String>,

        /// Request timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Print the advanced layer as it would be drawn at a timestamp
    Frame {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[arg(long)]
        segments: bool,

        /// Playback position in milliseconds
        #[arg(long)]
        at_ms: i64,

        /// Layer opacity in [0,1]
        #[arg(long, default_value_t = 1.0)]
        opacity: f32,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Show the effective configuration
    Config,
}

#[derive(clap::Args, Debug, Clone)]
pub struct OutputArgs {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Pretty)]
    pub output: OutputFormat,

    /// Write to a file instead of stdout
    #[arg(long)]
    pub output_file: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Pretty,
    Json,
    JsonCompact,
    /// Textual wire format, readable by `dmk decode`
    Xml,
}
