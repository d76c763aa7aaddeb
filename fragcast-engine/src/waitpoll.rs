//! Wait/poll state machine (spec.md §4.2): blocks until a scheduled
//! broadcast goes live, or returns immediately once playability is already
//! OK. The "unbounded but re-checked after each wake" suspension point
//! (spec.md §5 item v) is realized as a `tokio::select!` between
//! `tokio::time::sleep` and the shared cancellation token, so a SIGINT
//! during a multi-hour pre-broadcast wait still exits promptly.

use std::time::{Duration, SystemTime};

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::RECHECK_TIME;
use crate::error::DownloadError;
use crate::metadata::{MetadataClient, PlayabilityStatus, ResolvedMetadata};

/// Outcome of the wait/poll loop.
pub enum WaitOutcome {
    /// Playability is OK; proceed to download using `resolved`.
    Ready(Box<ResolvedMetadata>),
    /// The broadcast is not live and the caller declined to wait
    /// (`-n`/`--no-wait` or the user answered "no" to the wait prompt).
    NotLiveWaitDenied,
}

/// Ask whether to wait for a not-yet-live broadcast. `None` means "ask the
/// user" is not wired up here (that prompt lives in the CLI collaborator);
/// engine callers pass a concrete answer.
pub async fn wait_for_live(
    client: &dyn MetadataClient,
    video_id: &str,
    should_wait: bool,
    retry_interval: Option<Duration>,
    token: &CancellationToken,
) -> Result<WaitOutcome, DownloadError> {
    let mut resolved = crate::metadata::resolve(client, video_id, false).await?;

    loop {
        match resolved.status {
            PlayabilityStatus::Ok => return Ok(WaitOutcome::Ready(Box::new(resolved))),
            PlayabilityStatus::Unplayable | PlayabilityStatus::Error => {
                return Err(DownloadError::Unplayable {
                    status: resolved.status,
                    reason: resolved.reason.clone().unwrap_or_default(),
                });
            }
            PlayabilityStatus::LiveStreamOffline | PlayabilityStatus::Unknown => {
                if !should_wait {
                    return Ok(WaitOutcome::NotLiveWaitDenied);
                }

                let now = SystemTime::now();
                let sleep_for = match (resolved.scheduled_start, retry_interval) {
                    (Some(scheduled), None) if scheduled > now => {
                        // SLEEP_TO_SCHEDULED: recompute the delta each wake
                        // to defend against early wake-ups (spec.md §4.2).
                        scheduled
                            .duration_since(now)
                            .unwrap_or(Duration::from_secs(0))
                    }
                    (Some(scheduled), None) => {
                        let late_by = now
                            .duration_since(scheduled)
                            .unwrap_or(Duration::from_secs(0));
                        info!(late_by_secs = late_by.as_secs(), "broadcast is late");
                        RECHECK_TIME
                    }
                    (_, Some(mut interval)) => {
                        // POLL: clamp up to the server's pollDelayMs if present.
                        if let Some(poll_delay) = resolved.poll_delay {
                            interval = interval.max(poll_delay);
                        }
                        interval
                    }
                    (None, None) => RECHECK_TIME,
                };

                tokio::select! {
                    _ = token.cancelled() => return Err(DownloadError::Cancelled),
                    _ = tokio::time::sleep(sleep_for) => {}
                }

                resolved = crate::metadata::resolve(client, video_id, false).await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct ScriptedClient {
        responses: Mutex<Vec<String>>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl MetadataClient for ScriptedClient {
        async fn fetch_player_response(
            &self,
            _video_id: &str,
        ) -> Result<crate::metadata::PlayerResponse, DownloadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            let json = if responses.len() > 1 {
                responses.remove(0)
            } else {
                responses[0].clone()
            };
            serde_json::from_str(&json).map_err(|e| DownloadError::PlayerResponseParse {
                reason: e.to_string(),
            })
        }

        async fn fetch_dash_manifest(&self, _url: &str) -> Result<String, DownloadError> {
            Err(DownloadError::ManifestParse {
                reason: "unused in test".to_string(),
            })
        }
    }

    fn ok_response() -> String {
        r#"{
            "videoDetails": { "videoId": "abc123xyz99" },
            "playabilityStatus": { "status": "OK" },
            "streamingData": { "expiresInSeconds": "21600", "adaptiveFormats": [] }
        }"#
        .to_string()
    }

    #[tokio::test]
    async fn returns_ready_immediately_when_already_ok() {
        let client = ScriptedClient {
            responses: Mutex::new(vec![ok_response()]),
            calls: AtomicU32::new(0),
        };
        let token = CancellationToken::new();
        let outcome = wait_for_live(&client, "abc123xyz99", true, None, &token)
            .await
            .unwrap();
        assert!(matches!(outcome, WaitOutcome::Ready(_)));
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn offline_with_no_wait_returns_wait_denied() {
        let offline = r#"{
            "playabilityStatus": { "status": "LIVE_STREAM_OFFLINE" },
            "streamingData": { "expiresInSeconds": "21600", "adaptiveFormats": [] }
        }"#
        .to_string();
        let client = ScriptedClient {
            responses: Mutex::new(vec![offline]),
            calls: AtomicU32::new(0),
        };
        let token = CancellationToken::new();
        let outcome = wait_for_live(&client, "abc123xyz99", false, None, &token)
            .await
            .unwrap();
        assert!(matches!(outcome, WaitOutcome::NotLiveWaitDenied));
    }

    #[tokio::test(start_paused = true)]
    async fn polls_until_live_when_waiting() {
        let offline = r#"{
            "playabilityStatus": { "status": "LIVE_STREAM_OFFLINE" },
            "streamingData": { "expiresInSeconds": "21600", "adaptiveFormats": [] }
        }"#
        .to_string();
        let client = ScriptedClient {
            responses: Mutex::new(vec![offline, ok_response()]),
            calls: AtomicU32::new(0),
        };
        let token = CancellationToken::new();
        let outcome = wait_for_live(
            &client,
            "abc123xyz99",
            true,
            Some(Duration::from_secs(1)),
            &token,
        )
        .await
        .unwrap();
        assert!(matches!(outcome, WaitOutcome::Ready(_)));
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }
}
