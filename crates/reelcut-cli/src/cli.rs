use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

fn parse_duration_ms(input: &str) -> Result<Duration, String> {
    input.parse::<u64>().map(Duration::from_millis).map_err(|_| format!("invalid milliseconds: {input:?}"))
}

#[derive(Debug, Parser)]
#[command(name = "reelcut", version, about = "Beat-synchronized vertical reel pipeline demo")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Simulate an upload and run the job to completion in-process.
    Submit(SubmitArgs),
}

#[derive(Debug, clap::Args)]
pub struct SubmitArgs {
    /// Input clip files, in playback order. 1..=MAX_CLIP_COUNT required.
    #[arg(long = "clip", required = true)]
    pub clips: Vec<PathBuf>,

    /// The single backing audio track.
    #[arg(long)]
    pub audio: PathBuf,

    /// Style preset applied by the Cut Planner and `style_grade` stage.
    #[arg(long, default_value = "energetic_dance")]
    pub style: String,

    /// Start of the 30 second audio window to use, in seconds.
    #[arg(long = "window-start", default_value_t = 0.0)]
    pub window_start: f64,

    /// Directory backing the filesystem blob store.
    #[arg(long = "storage-dir", env = "REELCUT_STORAGE_DIR", default_value = "./reelcut-data")]
    pub storage_dir: PathBuf,

    /// How often to poll the job row while waiting for completion.
    #[arg(long = "poll-interval-ms", value_parser = parse_duration_ms, default_value = "250")]
    pub poll_interval: Duration,
}
