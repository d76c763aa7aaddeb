//! Shared download state (spec.md §3 `DownloadInfo`/`MediaDLInfo`), the
//! process-wide coordination record every task reads and mutates. Grounded
//! on the teacher's single-`Arc`-of-config-plus-channels coordination style,
//! but realized with a plain `tokio::sync::Mutex` rather than a reentrant
//! one: spec.md §9 itself resolves the reentrancy concern by requiring that
//! "workers must not hold [the lock] across the call" into the resolver, so
//! `refresh_metadata` below always drops its guard before awaiting the
//! network call and re-acquires it only to apply the result.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{SessionConfig, RECHECK_TIME};
use crate::error::DownloadError;
use crate::metadata::{FragmentUrlTemplate, MetaInfo, MetadataClient, PlayabilityStatus};
use crate::quality::SelectedQuality;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }
}

/// Per-media-kind download bookkeeping (spec.md §3 `MediaDLInfo`).
#[derive(Debug, Clone)]
pub struct MediaDlInfo {
    pub download_url: Option<FragmentUrlTemplate>,
    pub base_output_path: PathBuf,
    pub active_workers: usize,
}

struct Inner {
    selected_quality: Option<SelectedQuality>,
    is_live: bool,
    is_unavailable: bool,
    stopping: bool,
    in_progress: bool,
    last_metadata_refresh_at: Option<Instant>,
    target_duration: Duration,
    url_expires_in: Duration,
    media: std::collections::HashMap<MediaKind, MediaDlInfo>,
    status_line: String,
    meta: Option<MetaInfo>,
}

/// Process-wide coordination record (spec.md §3 `DownloadInfo`), shared by
/// every task in the session behind an `Arc`.
pub struct SharedState {
    pub video_id: String,
    pub session_config: Arc<SessionConfig>,
    pub token: CancellationToken,
    /// Directory intermediate `.ts` files are written into; immutable for
    /// the session, so it lives outside the lock.
    output_dir: PathBuf,
    /// Output naming stem (spec.md §6: `<name>.f<itag>.ts`), resolved by the
    /// CLI's filename templating collaborator before the session starts.
    base_name: String,
    inner: Mutex<Inner>,
}

impl SharedState {
    pub fn new(
        video_id: String,
        session_config: Arc<SessionConfig>,
        output_dir: &std::path::Path,
    ) -> Arc<Self> {
        Self::with_base_name(video_id.clone(), video_id, session_config, output_dir)
    }

    pub fn with_base_name(
        video_id: String,
        base_name: String,
        session_config: Arc<SessionConfig>,
        output_dir: &std::path::Path,
    ) -> Arc<Self> {
        Self::with_base_name_and_token(
            video_id,
            base_name,
            session_config,
            output_dir,
            CancellationToken::new(),
        )
    }

    /// Same as [`Self::with_base_name`], but adopts a pre-existing
    /// cancellation token instead of minting a fresh one — used when the
    /// caller needs to install a signal handler before the broadcast's
    /// quality/itags (and therefore the state itself) are known yet.
    pub fn with_base_name_and_token(
        video_id: String,
        base_name: String,
        session_config: Arc<SessionConfig>,
        output_dir: &std::path::Path,
        token: CancellationToken,
    ) -> Arc<Self> {
        let mut media = std::collections::HashMap::new();
        media.insert(
            MediaKind::Video,
            MediaDlInfo {
                download_url: None,
                base_output_path: output_dir.join(format!("{base_name}.video.ts")),
                active_workers: 0,
            },
        );
        media.insert(
            MediaKind::Audio,
            MediaDlInfo {
                download_url: None,
                base_output_path: output_dir.join(format!("{base_name}.audio.ts")),
                active_workers: 0,
            },
        );

        Arc::new(Self {
            video_id,
            session_config,
            token,
            output_dir: output_dir.to_path_buf(),
            base_name,
            inner: Mutex::new(Inner {
                selected_quality: None,
                is_live: false,
                is_unavailable: false,
                stopping: false,
                in_progress: false,
                last_metadata_refresh_at: None,
                target_duration: Duration::from_secs(5),
                url_expires_in: Duration::from_secs(6 * 3600),
                media,
                status_line: String::new(),
                meta: None,
            }),
        })
    }

    pub async fn is_stopping(&self) -> bool {
        self.inner.lock().await.stopping || self.token.is_cancelled()
    }

    pub async fn set_stopping(&self) {
        self.inner.lock().await.stopping = true;
        self.token.cancel();
    }

    pub async fn is_live(&self) -> bool {
        self.inner.lock().await.is_live
    }

    pub async fn is_unavailable(&self) -> bool {
        self.inner.lock().await.is_unavailable
    }

    pub async fn in_progress(&self) -> bool {
        self.inner.lock().await.in_progress
    }

    pub async fn target_duration(&self) -> Duration {
        self.inner.lock().await.target_duration
    }

    pub async fn current_url(&self, kind: MediaKind) -> Option<FragmentUrlTemplate> {
        self.inner
            .lock()
            .await
            .media
            .get(&kind)
            .and_then(|m| m.download_url.clone())
    }

    /// Force a media kind's download URL, bypassing whatever the resolver
    /// last returned (spec.md §6 `--audio-url`/`--video-url`: a user-supplied
    /// direct googlevideo fragment URL for one or both kinds).
    pub async fn set_download_url(&self, kind: MediaKind, template: FragmentUrlTemplate) {
        if let Some(m) = self.inner.lock().await.media.get_mut(&kind) {
            m.download_url = Some(template);
        }
    }

    pub async fn set_active_workers(&self, kind: MediaKind, count: usize) {
        if let Some(m) = self.inner.lock().await.media.get_mut(&kind) {
            m.active_workers = count;
        }
    }

    pub async fn active_workers(&self, kind: MediaKind) -> usize {
        self.inner
            .lock()
            .await
            .media
            .get(&kind)
            .map(|m| m.active_workers)
            .unwrap_or(0)
    }

    pub async fn base_output_path(&self, kind: MediaKind) -> PathBuf {
        self.inner.lock().await.media[&kind].base_output_path.clone()
    }

    pub async fn set_status_line(&self, line: String) {
        self.inner.lock().await.status_line = line;
    }

    pub async fn status_line(&self) -> String {
        self.inner.lock().await.status_line.clone()
    }

    pub async fn meta(&self) -> Option<MetaInfo> {
        self.inner.lock().await.meta.clone()
    }

    pub async fn selected_quality(&self) -> Option<SelectedQuality> {
        self.inner.lock().await.selected_quality
    }

    pub async fn set_selected_quality(&self, quality: SelectedQuality) {
        self.inner.lock().await.selected_quality = Some(quality);
    }

    /// Compare `candidate` against the shared URL for `kind` under the lock
    /// (spec.md invariant 4: "deduplicated by comparing current URL with the
    /// shared URL under the lock"). Returns the shared template if it has
    /// already moved on, so the caller can adopt it without a refresh.
    pub async fn adopt_if_newer(
        &self,
        kind: MediaKind,
        candidate: &str,
    ) -> Option<FragmentUrlTemplate> {
        let inner = self.inner.lock().await;
        let shared = inner.media.get(&kind)?.download_url.as_ref()?;
        if shared.template != candidate {
            Some(shared.clone())
        } else {
            None
        }
    }

    /// Refresh metadata, applying spec.md §4.1's rate limit (`RECHECK_TIME`)
    /// and failure semantics. Returns `Ok(true)` if a live refresh ran,
    /// `Ok(false)` if it was skipped as rate-limited ("stale-ok").
    ///
    /// Per spec.md §9, the lock is held only for the rate-limit check and
    /// for applying the result — never across the `client` call itself.
    pub async fn refresh_metadata(
        &self,
        client: &dyn MetadataClient,
    ) -> Result<bool, DownloadError> {
        {
            let inner = self.inner.lock().await;
            if inner.is_unavailable {
                // Invariant 5: no refreshes once the broadcast is known
                // privated/unavailable post-finish.
                return Ok(false);
            }
            if let Some(last) = inner.last_metadata_refresh_at {
                if last.elapsed() < RECHECK_TIME {
                    return Ok(false);
                }
            }
        }

        let in_progress = self.in_progress().await;
        let resolved = crate::metadata::resolve(client, &self.video_id, in_progress).await?;

        let mut inner = self.inner.lock().await;
        inner.last_metadata_refresh_at = Some(Instant::now());

        match resolved.status {
            PlayabilityStatus::Ok => {
                inner.is_live = resolved.is_live_now.unwrap_or(true);
                inner.is_unavailable = false;
            }
            PlayabilityStatus::Unplayable => {
                inner.is_live = false;
                if inner.in_progress {
                    inner.is_unavailable = true;
                    warn!("broadcast became unplayable mid-download; tapering off");
                } else {
                    return Err(DownloadError::Unplayable {
                        status: resolved.status,
                        reason: resolved.reason.unwrap_or_default(),
                    });
                }
            }
            PlayabilityStatus::Error => {
                inner.is_live = false;
            }
            PlayabilityStatus::LiveStreamOffline => {
                // Routine mid-stream turbulence; caller's wait/poll logic
                // handles pre-download OFFLINE separately.
                debug!("resolver observed OFFLINE mid-refresh");
            }
            PlayabilityStatus::Unknown => {}
        }

        if let Some(meta) = resolved.meta.clone() {
            inner.meta = Some(meta);
        }
        if !inner.in_progress {
            inner.in_progress = true;
        }
        if resolved.target_duration_secs > 0 {
            inner.target_duration = Duration::from_secs(resolved.target_duration_secs);
        }
        inner.url_expires_in = resolved.expires_in;

        if let Some(quality) = inner.selected_quality {
            if !quality.is_audio_only() {
                if let Some(tpl) = resolved.url_templates.get(&quality.video_itag) {
                    inner.media.get_mut(&MediaKind::Video).unwrap().download_url =
                        Some(tpl.clone());
                }
            }
            if let Some(tpl) = resolved
                .url_templates
                .get(&crate::metadata::AUDIO_ITAG)
            {
                inner.media.get_mut(&MediaKind::Audio).unwrap().download_url = Some(tpl.clone());
            }
        }

        info!(is_live = inner.is_live, "metadata refreshed");
        Ok(true)
    }

    /// Apply the very first resolve pass at session start, selecting quality
    /// and seeding both media kinds' URLs directly (bypassing the
    /// rate-limit, since there is no previous refresh to rate-limit
    /// against).
    pub async fn seed_from_initial_resolve(
        &self,
        quality: SelectedQuality,
        url_templates: &BTreeMap<u32, FragmentUrlTemplate>,
        meta: Option<MetaInfo>,
        is_live: bool,
        target_duration_secs: u64,
        expires_in: Duration,
    ) {
        let mut inner = self.inner.lock().await;
        inner.selected_quality = Some(quality);
        inner.is_live = is_live;
        inner.in_progress = true;
        inner.last_metadata_refresh_at = Some(Instant::now());
        inner.target_duration = Duration::from_secs(target_duration_secs.max(1));
        inner.url_expires_in = expires_in;
        inner.meta = meta;

        if !quality.is_audio_only() {
            if let Some(tpl) = url_templates.get(&quality.video_itag) {
                let video = inner.media.get_mut(&MediaKind::Video).unwrap();
                video.download_url = Some(tpl.clone());
                video.base_output_path = self
                    .output_dir
                    .join(format!("{}.f{}.ts", self.base_name, quality.video_itag));
            }
        }
        if let Some(tpl) = url_templates.get(&crate::metadata::AUDIO_ITAG) {
            let audio = inner.media.get_mut(&MediaKind::Audio).unwrap();
            audio.download_url = Some(tpl.clone());
            audio.base_output_path = self
                .output_dir
                .join(format!("{}.f{}.ts", self.base_name, quality.audio_itag));
        }
    }

    /// Intended final muxed output path (spec.md §6 "Final output"):
    /// `<name>.mp4`, or `<name>.m4a` when the session is audio-only.
    pub async fn final_output_path(&self) -> PathBuf {
        let audio_only = self
            .inner
            .lock()
            .await
            .selected_quality
            .is_some_and(|q| q.is_audio_only());
        let ext = if audio_only { "m4a" } else { "mp4" };
        self.output_dir.join(format!("{}.{ext}", self.base_name))
    }
}
