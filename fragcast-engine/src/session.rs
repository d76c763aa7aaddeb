//! Session orchestration: ties the wait/poll state machine, quality
//! selection, the two download coordinators, the progress aggregator, and
//! the output assembler into the single entry point `fragcast-cli` calls.
//! Grounded on the teacher's `hls::coordinator` top-level `run()` wiring
//! (resolve playlist once, spawn per-stream scheduler tasks, drive a single
//! progress loop), generalized from one HLS playlist to the two concurrent
//! media pipelines (audio + video) this spec requires.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::{EngineConfig, SessionConfig};
use crate::coordinator::DownloadCoordinator;
use crate::error::DownloadError;
use crate::metadata::{FragmentUrlTemplate, MetadataClient};
use crate::mux::{MuxJob, MuxerDriver, assemble_output};
use crate::progress::{InterruptChoice, ProgressAggregator};
use crate::quality::select_quality;
use crate::state::{MediaKind, SharedState};
use crate::waitpoll::{WaitOutcome, wait_for_live};

/// What the caller should report back to the user once the session ends.
#[derive(Debug)]
pub struct SessionOutcome {
    pub output_path: Option<PathBuf>,
    pub interrupted: bool,
    pub merged: bool,
}

/// Everything a session needs that isn't already frozen into
/// `EngineConfig`/`SessionConfig`: the broadcast id, where to write files,
/// and the concrete collaborators (metadata client, muxer) to use.
pub struct SessionRequest {
    pub video_id: String,
    pub base_name: String,
    pub output_dir: PathBuf,
    pub thumbnail_path: Option<PathBuf>,
    /// User-supplied direct fragment URL template (spec.md §6
    /// `--audio-url`, or a directly-parsed `*.googlevideo.com` input whose
    /// itag identified it as the audio stream), overriding whatever the
    /// resolver returns for this kind.
    pub audio_url_override: Option<String>,
    /// Same as `audio_url_override`, for `--video-url`.
    pub video_url_override: Option<String>,
}

/// Run one complete download session end to end (spec.md §2 "Data flows
/// top-down: resolver → coordinator → worker pool → ... → coordinator
/// writer"). Returns once both media pipelines finish, the user interrupts,
/// or a fatal pre-download error occurs.
pub async fn run_session(
    request: SessionRequest,
    engine_config: Arc<EngineConfig>,
    session_config: Arc<SessionConfig>,
    metadata_client: Arc<dyn MetadataClient>,
    muxer: Arc<dyn MuxerDriver>,
) -> Result<SessionOutcome, DownloadError> {
    tokio::fs::create_dir_all(&request.output_dir).await?;

    let client = engine_config.build_client()?;

    // Installed before anything that can block (the wait/poll loop) so a
    // SIGINT during a multi-hour pre-broadcast wait exits promptly too
    // (spec.md §4.6).
    let token = tokio_util::sync::CancellationToken::new();
    let token_for_signal = token.clone();
    let _ = ctrlc::set_handler(move || {
        token_for_signal.cancel();
    });

    let should_wait = session_config.wait_for_stream.unwrap_or(false);
    let outcome = wait_for_live(
        metadata_client.as_ref(),
        &request.video_id,
        should_wait,
        session_config.retry_interval,
        &token,
    )
    .await?;

    let resolved = match outcome {
        WaitOutcome::Ready(resolved) => *resolved,
        WaitOutcome::NotLiveWaitDenied => {
            return Err(DownloadError::Unplayable {
                status: crate::metadata::PlayabilityStatus::LiveStreamOffline,
                reason: "broadcast is not live and waiting was declined".to_string(),
            });
        }
    };

    let available: BTreeMap<u32, ()> = resolved.url_templates.keys().map(|itag| (*itag, ())).collect();
    let quality = select_quality(
        &session_config.quality_preference,
        &available,
        session_config.prefer_vp9,
    )?;

    let state = SharedState::with_base_name_and_token(
        request.video_id.clone(),
        request.base_name.clone(),
        Arc::clone(&session_config),
        &request.output_dir,
        token,
    );

    state
        .seed_from_initial_resolve(
            quality,
            &resolved.url_templates,
            resolved.meta.clone(),
            resolved.is_live_now.unwrap_or(true),
            resolved.target_duration_secs,
            resolved.expires_in,
        )
        .await;

    if let Some(template) = &request.audio_url_override {
        info!("using user-supplied audio fragment URL, bypassing resolved URL table");
        state
            .set_download_url(
                MediaKind::Audio,
                FragmentUrlTemplate {
                    template: template.clone(),
                    itag: quality.audio_itag,
                    fragmented: true,
                    issued_at: SystemTime::now(),
                    expires_in: resolved.expires_in,
                },
            )
            .await;
    }
    if let Some(template) = &request.video_url_override {
        if quality.is_audio_only() {
            warn!("--video-url supplied for an audio-only session; ignoring");
        } else {
            info!("using user-supplied video fragment URL, bypassing resolved URL table");
            state
                .set_download_url(
                    MediaKind::Video,
                    FragmentUrlTemplate {
                        template: template.clone(),
                        itag: quality.video_itag,
                        fragmented: true,
                        issued_at: SystemTime::now(),
                        expires_in: resolved.expires_in,
                    },
                )
                .await;
        }
    }

    let (progress_tx, progress_rx) = mpsc::channel(64);

    let mut pipeline_kinds = vec![MediaKind::Audio];
    if !quality.is_audio_only() {
        pipeline_kinds.push(MediaKind::Video);
    }

    let mut coordinator_handles = Vec::new();
    for kind in pipeline_kinds.iter().copied() {
        let coordinator = DownloadCoordinator::new(
            kind,
            Arc::clone(&state),
            client.clone(),
            Arc::clone(&metadata_client),
            progress_tx.clone(),
            engine_config.strip_sidx,
        );
        coordinator_handles.push(tokio::spawn(coordinator.run()));
    }
    drop(progress_tx);

    let aggregator = ProgressAggregator::new(progress_rx, Arc::clone(&state), false);
    let interrupt_choice = aggregator.run().await;

    let mut coordinator_errors = Vec::new();
    for handle in coordinator_handles {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => coordinator_errors.push(err),
            Err(join_err) => warn!(error = %join_err, "coordinator task panicked"),
        }
    }

    if let Some(err) = coordinator_errors.into_iter().next() {
        if interrupt_choice.is_none() {
            return Err(err);
        }
    }

    let interrupted = interrupt_choice.is_some();
    if interrupt_choice == Some(InterruptChoice::Discard) {
        for kind in pipeline_kinds {
            let path = state.base_output_path(kind).await;
            let _ = tokio::fs::remove_file(path).await;
        }
        return Ok(SessionOutcome {
            output_path: None,
            interrupted: true,
            merged: false,
        });
    }

    let should_merge = match interrupt_choice {
        None => session_config.merge_on_finish,
        Some(InterruptChoice::MergeNow) => true,
        Some(InterruptChoice::SavePartials) => false,
        Some(InterruptChoice::Discard) => unreachable!("handled above"),
    };

    if !should_merge {
        return Ok(SessionOutcome {
            output_path: None,
            interrupted,
            merged: false,
        });
    }

    let audio_path = Some(state.base_output_path(MediaKind::Audio).await);
    let video_path = if quality.is_audio_only() {
        None
    } else {
        Some(state.base_output_path(MediaKind::Video).await)
    };
    let output_path = state.final_output_path().await;

    let mut metadata = Vec::new();
    if session_config.add_metadata {
        if let Some(meta) = state.meta().await {
            metadata.push(("title".to_string(), meta.title));
            metadata.push(("artist".to_string(), meta.author));
            metadata.push(("date".to_string(), meta.upload_date));
        }
    }

    let job = MuxJob {
        audio_path,
        video_path,
        thumbnail_path: if session_config.write_thumbnail {
            request.thumbnail_path
        } else {
            None
        },
        metadata,
        output_path: output_path.clone(),
    };

    assemble_output(muxer.as_ref(), job).await?;
    info!(output = %output_path.display(), "session finished");

    Ok(SessionOutcome {
        output_path: Some(output_path),
        interrupted,
        merged: true,
    })
}
