//! Output assembler (spec.md §4.7 / SPEC_FULL.md §4.7): the muxer driver
//! spec.md §1 names as an out-of-scope external collaborator "beyond its
//! interface". `MuxerDriver` is that interface; `FfmpegMuxerDriver` is the
//! one production implementation, grounded on the incremental
//! `Vec<String>`-of-args construction and `tokio::process::Command` spawn
//! used by the teacher's `RemuxProcessor::build_args` / `run_command_with_logs`
//! (`rust-srec/src/pipeline/processors/remux.rs`, `.../utils.rs`), trimmed to
//! exactly the argument list spec.md §6 specifies.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::DownloadError;

/// Inputs the assembler hands to the muxer: audio/video intermediate files,
/// an optional thumbnail to embed as cover art, metadata key/value pairs
/// (when `--add-metadata` is set), and the final output path.
#[derive(Debug, Clone)]
pub struct MuxJob {
    pub audio_path: Option<PathBuf>,
    pub video_path: Option<PathBuf>,
    pub thumbnail_path: Option<PathBuf>,
    pub metadata: Vec<(String, String)>,
    pub output_path: PathBuf,
}

/// The "external muxer driver" boundary spec.md §1(b) names. Core logic
/// programs against this trait; one concrete `ffmpeg`-shelling struct
/// satisfies it in production, a fake satisfies it in tests.
#[async_trait]
pub trait MuxerDriver: Send + Sync {
    async fn mux(&self, job: &MuxJob) -> Result<(), DownloadError>;
}

pub struct FfmpegMuxerDriver {
    ffmpeg_path: String,
}

impl FfmpegMuxerDriver {
    pub fn new() -> Self {
        Self {
            ffmpeg_path: std::env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string()),
        }
    }

    pub fn with_ffmpeg_path(path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: path.into(),
        }
    }

    /// Build the exact argument list spec.md §6 specifies:
    /// `-hide_banner -loglevel fatal -stats -i <audio>.ts [-i <thumb>] -i
    /// <video>.ts -movflags faststart [-map 0 -map 1 -map 2] -c copy
    /// [-disposition:v:0 attached_pic] [-metadata KEY=VALUE …] <out>`.
    fn build_args(job: &MuxJob) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "fatal".to_string(),
            "-stats".to_string(),
            "-y".to_string(),
        ];

        let mut input_count = 0;
        if let Some(audio) = &job.audio_path {
            args.push("-i".to_string());
            args.push(path_arg(audio));
            input_count += 1;
        }
        let thumb_index = if let Some(thumb) = &job.thumbnail_path {
            args.push("-i".to_string());
            args.push(path_arg(thumb));
            let idx = input_count;
            input_count += 1;
            Some(idx)
        } else {
            None
        };
        let video_index = if let Some(video) = &job.video_path {
            args.push("-i".to_string());
            args.push(path_arg(video));
            let idx = input_count;
            input_count += 1;
            Some(idx)
        } else {
            None
        };

        args.push("-movflags".to_string());
        args.push("faststart".to_string());

        // Only the thumbnail case needs an explicit `-map`: with `-c copy`
        // and no `-map` at all, ffmpeg already includes every input stream,
        // so there is nothing to gain from mapping audio/video explicitly.
        if thumb_index.is_some() {
            if job.audio_path.is_some() {
                args.push("-map".to_string());
                args.push("0".to_string());
            }
            if let Some(idx) = thumb_index {
                args.push("-map".to_string());
                args.push(idx.to_string());
            }
            if let Some(idx) = video_index {
                args.push("-map".to_string());
                args.push(idx.to_string());
            }
        }

        args.push("-c".to_string());
        args.push("copy".to_string());

        if thumb_index.is_some() {
            // `-disposition:v:0` always addresses the first video-type
            // stream in the *output*, not the thumbnail's input ordinal —
            // after `-map 0 -map 1 -map 2` the thumbnail is that stream.
            args.push("-disposition:v:0".to_string());
            args.push("attached_pic".to_string());
        }

        for (key, value) in &job.metadata {
            args.push("-metadata".to_string());
            args.push(format!("{key}={value}"));
        }

        args.push(path_arg(&job.output_path));
        args
    }
}

impl Default for FfmpegMuxerDriver {
    fn default() -> Self {
        Self::new()
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[async_trait]
impl MuxerDriver for FfmpegMuxerDriver {
    async fn mux(&self, job: &MuxJob) -> Result<(), DownloadError> {
        let args = Self::build_args(job);
        debug!(args = ?args, "invoking muxer");

        let mut command = Command::new(&self.ffmpeg_path);
        command.args(&args).stdout(Stdio::null()).stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|e| DownloadError::Muxer {
            reason: format!("failed to spawn {}: {e}", self.ffmpeg_path),
        })?;

        let mut stderr_tail = Vec::new();
        if let Some(stderr) = child.stderr.take() {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if stderr_tail.len() >= 50 {
                    stderr_tail.remove(0);
                }
                stderr_tail.push(line);
            }
        }

        let status = child.wait().await.map_err(|e| DownloadError::Muxer {
            reason: format!("failed waiting on muxer: {e}"),
        })?;

        if !status.success() {
            warn!(stderr = %stderr_tail.join("\n"), "muxer exited non-zero");
            return Err(DownloadError::Muxer {
                reason: format!(
                    "muxer exited with {}: {}",
                    status.code().unwrap_or(-1),
                    stderr_tail.join(" / ")
                ),
            });
        }

        info!(output = %job.output_path.display(), "mux finished");
        Ok(())
    }
}

/// Run the muxer and, only on success, delete the intermediate `.ts` files
/// (spec.md §5 resource policy: "Intermediate fragment files ... removed on
/// clean exit"). On failure they are left in place for the user to inspect
/// or retry.
pub async fn assemble_output(
    driver: &dyn MuxerDriver,
    job: MuxJob,
) -> Result<(), DownloadError> {
    let intermediates: Vec<PathBuf> = [job.audio_path.clone(), job.video_path.clone()]
        .into_iter()
        .flatten()
        .collect();

    driver.mux(&job).await?;

    for path in intermediates {
        if let Err(err) = tokio::fs::remove_file(&path).await {
            warn!(path = %path.display(), error = %err, "failed to remove intermediate file after mux");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_args_for_audio_and_video_with_metadata() {
        let job = MuxJob {
            audio_path: Some(PathBuf::from("abc.f140.ts")),
            video_path: Some(PathBuf::from("abc.f137.ts")),
            thumbnail_path: None,
            metadata: vec![("title".to_string(), "Test Broadcast".to_string())],
            output_path: PathBuf::from("abc.mp4"),
        };
        let args = FfmpegMuxerDriver::build_args(&job);
        assert!(args.contains(&"abc.f140.ts".to_string()));
        assert!(args.contains(&"abc.f137.ts".to_string()));
        assert!(args.contains(&"-metadata".to_string()));
        assert!(args.contains(&"title=Test Broadcast".to_string()));
        assert_eq!(args.last().unwrap(), "abc.mp4");
    }

    #[test]
    fn audio_and_video_without_thumbnail_omits_map_and_disposition() {
        let job = MuxJob {
            audio_path: Some(PathBuf::from("abc.f140.ts")),
            video_path: Some(PathBuf::from("abc.f137.ts")),
            thumbnail_path: None,
            metadata: vec![],
            output_path: PathBuf::from("abc.mp4"),
        };
        let args = FfmpegMuxerDriver::build_args(&job);
        assert!(!args.contains(&"-map".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("-disposition")));
    }

    #[test]
    fn audio_only_job_omits_map_and_disposition() {
        let job = MuxJob {
            audio_path: Some(PathBuf::from("abc.f140.ts")),
            video_path: None,
            thumbnail_path: None,
            metadata: vec![],
            output_path: PathBuf::from("abc.m4a"),
        };
        let args = FfmpegMuxerDriver::build_args(&job);
        assert!(!args.contains(&"-map".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("-disposition")));
    }

    #[test]
    fn thumbnail_sets_attached_pic_disposition_on_output_stream_zero() {
        let job = MuxJob {
            audio_path: Some(PathBuf::from("abc.f140.ts")),
            video_path: Some(PathBuf::from("abc.f137.ts")),
            thumbnail_path: Some(PathBuf::from("abc.jpg")),
            metadata: vec![],
            output_path: PathBuf::from("abc.mp4"),
        };
        let args = FfmpegMuxerDriver::build_args(&job);
        assert!(args.contains(&"-map".to_string()));
        assert!(args.contains(&"-disposition:v:0".to_string()));
        assert!(args.contains(&"attached_pic".to_string()));
    }
}
