use clap::Parser;
use std::path::PathBuf;

/// Download an MPEG-DASH stream and mux it into a single file
#[derive(Parser, Debug)]
#[command(name = "dashdl", author, version, about, long_about = None)]
pub struct Args {
    /// MPD manifest: a local file path or an http(s) URL
    #[arg(value_name = "MANIFEST")]
    pub manifest: String,

    /// URL relative BaseURLs resolve against (defaults to the manifest URL)
    #[arg(long, value_name = "URL")]
    pub base_url: Option<String>,

    /// Name of the combined output file
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<String>,

    /// Directory for temporary and output files
    #[arg(short = 'd', long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Pick the track group and representation interactively and save that one track
    #[cfg(feature = "interactive")]
    #[arg(short, long)]
    pub interactive: bool,

    /// Assemble the video track before the audio track instead of both at once
    #[arg(long)]
    pub sequential: bool,

    /// Never hand a failed track to yt-dlp
    #[arg(long)]
    pub no_fallback: bool,

    /// Attempts per segment before giving up
    #[arg(long, value_name = "N")]
    pub retries: Option<u32>,

    /// Seconds to wait between attempts
    #[arg(long, value_name = "SECS")]
    pub retry_delay: Option<u64>,

    /// ffmpeg binary
    #[arg(long, env = "FFMPEG_PATH", value_name = "PATH")]
    pub ffmpeg: Option<String>,

    /// yt-dlp binary
    #[arg(long = "yt-dlp", env = "YTDLP_PATH", value_name = "PATH")]
    pub yt_dlp: Option<String>,

    /// Configuration file (TOML)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long)]
    pub quiet: bool,

    /// Also write logs to this file
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,
}
