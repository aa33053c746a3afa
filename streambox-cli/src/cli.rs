use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about = "Play live TV channels from an M3U catalog", long_about = None)]
pub struct Args {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the channel catalog
    List {
        /// Playlist URL (defaults to the public iptv-org index)
        #[arg(long)]
        playlist: Option<String>,

        /// Only show channels in this group
        #[arg(short, long)]
        group: Option<String>,

        /// Maximum number of channels to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Print channels as JSON
        #[arg(long)]
        json: bool,
    },

    /// Play a stream into a file until it ends or fails
    Play {
        /// Stream URL (.m3u8 or a progressive file)
        #[arg(required_unless_present = "channel", conflicts_with = "channel")]
        url: Option<String>,

        /// Look the stream up by channel name in the catalog instead
        #[arg(short, long)]
        channel: Option<String>,

        /// Playlist URL used with --channel
        #[arg(long)]
        playlist: Option<String>,

        /// Where the received media is written
        #[arg(short, long, default_value = "streambox-output.ts")]
        output: PathBuf,

        /// JSON player configuration
        #[arg(long)]
        config: Option<PathBuf>,

        /// JSON file that keeps view counts, likes and reviews
        #[arg(long)]
        activity: Option<PathBuf>,
    },
}
