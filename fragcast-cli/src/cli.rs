//! Command-line surface (spec.md §6 "CLI surface (selected)"). Grounded on
//! the teacher's `clap::Parser` derive struct in `strev-cli/src/main.rs`.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "fragcast",
    about = "Record a live, fragment-numbered broadcast from its first fragment",
    version
)]
pub struct Args {
    /// Broadcast URL or identifier: a watch/short/channel-live URL, or a
    /// direct *.googlevideo.com fragment URL.
    pub input: String,

    /// Wait for a scheduled broadcast to go live instead of failing or prompting.
    #[arg(short = 'w', long, conflicts_with = "no_wait")]
    pub wait: bool,

    /// Do not wait for a scheduled broadcast; exit immediately if not live.
    #[arg(short = 'n', long)]
    pub no_wait: bool,

    /// Poll interval (seconds) while waiting for a scheduled broadcast.
    #[arg(short = 'r', long = "retry-stream", value_name = "SECONDS")]
    pub retry_stream: Option<u64>,

    /// Netscape-format cookie file, for members-only broadcasts.
    #[arg(short = 'c', long, value_name = "FILE")]
    pub cookies: Option<PathBuf>,

    /// Download and embed the broadcast thumbnail as cover art.
    #[arg(short = 't', long)]
    pub thumbnail: bool,

    /// Output filename template. Keys: id, title, channel, channel_id, upload_date.
    #[arg(short = 'o', long, value_name = "TEMPLATE", default_value = "%(channel)s/%(title)s_%(id)s")]
    pub output: String,

    /// Worker tasks per media kind.
    #[arg(long, default_value_t = 1)]
    pub threads: usize,

    /// Prefer VP9 over H264 when both are available for the selected label.
    #[arg(long)]
    pub vp9: bool,

    /// Ordered, slash-separated quality preference, e.g. "1080p60/best".
    #[arg(long, default_value = "best")]
    pub quality: String,

    /// Embed title/author/upload-date metadata in the final container.
    #[arg(long = "add-metadata")]
    pub add_metadata: bool,

    /// Write the broadcast description to a sidecar `.description` file.
    #[arg(long = "write-description")]
    pub write_description: bool,

    /// Write the broadcast thumbnail to a sidecar image file.
    #[arg(long = "write-thumbnail")]
    pub write_thumbnail: bool,

    /// Write the ffmpeg argument list used for the final mux to a sidecar file.
    #[arg(long = "write-mux-file")]
    pub write_mux_file: bool,

    /// Merge elementary streams into the final container on finish (default).
    #[arg(long, overrides_with = "no_merge")]
    pub merge: bool,

    /// Leave the intermediate elementary streams unmerged.
    #[arg(long, overrides_with = "merge")]
    pub no_merge: bool,

    /// On interrupt, keep the partial intermediate files (default).
    #[arg(long, overrides_with = "no_save")]
    pub save: bool,

    /// On interrupt, discard the partial intermediate files.
    #[arg(long, overrides_with = "save")]
    pub no_save: bool,

    /// Force IPv4 for outbound connections.
    #[arg(short = '4', long = "ipv4", conflicts_with = "ipv6")]
    pub ipv4: bool,

    /// Force IPv6 for outbound connections.
    #[arg(short = '6', long = "ipv6")]
    pub ipv6: bool,

    /// Direct googlevideo.com audio fragment URL (paired with --video-url or audio-only).
    #[arg(long = "audio-url", value_name = "URL")]
    pub audio_url: Option<String>,

    /// Direct googlevideo.com video fragment URL (paired with --audio-url).
    #[arg(long = "video-url", value_name = "URL")]
    pub video_url: Option<String>,

    /// Output directory for intermediate and final files.
    #[arg(long, default_value = ".")]
    pub output_dir: PathBuf,

    #[arg(short = 'v', long)]
    pub verbose: bool,

    #[arg(short = 'q', long)]
    pub quiet: bool,
}

impl Args {
    pub fn merge_on_finish(&self) -> bool {
        !self.no_merge
    }

    pub fn save_partial_on_interrupt(&self) -> bool {
        !self.no_save
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_merge_and_save() {
        let args = Args::parse_from(["fragcast", "https://youtu.be/abc123xyz99"]);
        assert!(args.merge_on_finish());
        assert!(args.save_partial_on_interrupt());
    }

    #[test]
    fn no_merge_flag_disables_merge() {
        let args = Args::parse_from(["fragcast", "https://youtu.be/abc123xyz99", "--no-merge"]);
        assert!(!args.merge_on_finish());
    }

    #[test]
    fn no_save_flag_disables_save() {
        let args = Args::parse_from(["fragcast", "https://youtu.be/abc123xyz99", "--no-save"]);
        assert!(!args.save_partial_on_interrupt());
    }
}
