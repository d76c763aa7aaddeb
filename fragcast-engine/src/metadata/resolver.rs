//! The metadata resolver: the thin collaborator spec.md §1(a) names ("knows
//! how to obtain the current player-response JSON and DASH manifest"), bound
//! behind a trait the way the teacher binds `PlaylistProvider` /
//! `SegmentDownloader`. `HttpMetadataClient` is the one production
//! implementation; tests substitute a fixture-backed fake.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use reqwest::Client;

use crate::error::DownloadError;
use crate::metadata::dash::{fragment_template_from_base_url, parse_dash_manifest};
use crate::metadata::player_response::{extract_player_response_json, PlayerResponse};
use crate::metadata::{FragmentUrlTemplate, MetaInfo, PlayabilityStatus, ResolvedMetadata};

/// Obtains the current player-response JSON (and, transitively, the DASH
/// manifest it points at) for a broadcast id. This is the boundary spec.md
/// draws around "broadcast metadata client" — core resolve logic is built
/// against this trait, not against `reqwest` directly.
#[async_trait]
pub trait MetadataClient: Send + Sync {
    async fn fetch_player_response(&self, video_id: &str) -> Result<PlayerResponse, DownloadError>;
    async fn fetch_dash_manifest(&self, manifest_url: &str) -> Result<String, DownloadError>;
}

pub struct HttpMetadataClient {
    client: Client,
}

impl HttpMetadataClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MetadataClient for HttpMetadataClient {
    async fn fetch_player_response(&self, video_id: &str) -> Result<PlayerResponse, DownloadError> {
        let watch_url = format!("https://www.youtube.com/watch?v={video_id}");
        let html = self
            .client
            .get(&watch_url)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| {
                e.status()
                    .map(|s| DownloadError::http_status(s, "fetch watch page"))
                    .unwrap_or_else(|| DownloadError::Network { source: e })
            })?
            .text()
            .await?;

        let json_text = extract_player_response_json(&html).ok_or_else(|| {
            DownloadError::PlayerResponseParse {
                reason: "ytInitialPlayerResponse declaration not found in watch page".to_string(),
            }
        })?;

        serde_json::from_str(json_text).map_err(|e| DownloadError::PlayerResponseParse {
            reason: e.to_string(),
        })
    }

    async fn fetch_dash_manifest(&self, manifest_url: &str) -> Result<String, DownloadError> {
        self.client
            .get(manifest_url)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| {
                e.status()
                    .map(|s| DownloadError::http_status(s, "fetch dash manifest"))
                    .unwrap_or_else(|| DownloadError::Network { source: e })
            })?
            .text()
            .await
            .map_err(DownloadError::from)
    }
}

/// Fetch and translate a player response into `ResolvedMetadata`, applying
/// the extraction and failure-semantics rules of spec.md §4.1. Does not
/// itself enforce the `RECHECK_TIME` rate limit — that is bookkeeping the
/// shared session state owns (see `state::SharedState::refresh_metadata`),
/// since it depends on "time since the *session's* last refresh", not
/// anything this function can see in isolation.
pub async fn resolve(
    client: &dyn MetadataClient,
    video_id: &str,
    in_progress: bool,
) -> Result<ResolvedMetadata, DownloadError> {
    let player_response = client.fetch_player_response(video_id).await?;

    let status_raw = player_response
        .playability_status
        .as_ref()
        .map(|p| p.status.as_str())
        .unwrap_or("UNKNOWN");
    let status = PlayabilityStatus::from_raw(status_raw);
    let reason = player_response
        .playability_status
        .as_ref()
        .and_then(|p| p.reason.clone());

    // Failure semantics (spec.md §4.1): videoDetails missing mid-download, or
    // UNPLAYABLE mid-download, means the broadcast was privated post-finish;
    // the caller is responsible for setting is_unavailable from this.
    if in_progress && player_response.video_details.is_none() {
        return Ok(ResolvedMetadata {
            status: PlayabilityStatus::Unplayable,
            reason: Some("videoDetails missing mid-download".to_string()),
            is_live_now: Some(false),
            scheduled_start: None,
            poll_delay: None,
            dash_manifest_url: None,
            expires_in: Duration::from_secs(0),
            target_duration_secs: 5,
            url_templates: BTreeMap::new(),
            meta: None,
            logged_out: false,
        });
    }

    let live_streamability = player_response
        .playability_status
        .as_ref()
        .and_then(|p| p.live_streamability.as_ref())
        .and_then(|l| l.live_streamability_renderer.as_ref());

    let poll_delay = live_streamability
        .and_then(|r| r.poll_delay_ms.as_ref())
        .and_then(|ms| ms.parse::<u64>().ok())
        .map(Duration::from_millis);

    let scheduled_start = live_streamability
        .and_then(|r| r.offline_slate.as_ref())
        .and_then(|s| s.live_stream_offline_slate_renderer.as_ref())
        .and_then(|r| r.scheduled_start_time.as_ref())
        .and_then(|ts| ts.parse::<i64>().ok())
        .map(|epoch| SystemTime::UNIX_EPOCH + Duration::from_secs(epoch.max(0) as u64));

    let microformat = player_response
        .microformat
        .as_ref()
        .and_then(|m| m.player_microformat_renderer.as_ref());

    let is_live_now = microformat
        .and_then(|m| m.live_broadcast_details.as_ref())
        .map(|d| d.is_live_now);

    let meta = player_response.video_details.as_ref().map(|vd| MetaInfo {
        video_id: vd.video_id.clone(),
        title: vd.title.clone(),
        author: vd.author.clone(),
        channel_id: vd.channel_id.clone(),
        is_live_content: vd.is_live_content,
        short_description: vd.short_description.clone(),
        upload_date: microformat
            .and_then(|m| m.upload_date.clone())
            .unwrap_or_default(),
        thumbnail_url: microformat
            .and_then(|m| m.thumbnail.as_ref())
            .and_then(|t| t.thumbnails.first())
            .map(|t| t.url.clone()),
        length_seconds: vd.length_seconds.as_ref().and_then(|s| s.parse().ok()),
        category: microformat.and_then(|m| m.category.clone()),
    });

    let logged_out = player_response
        .response_context
        .as_ref()
        .and_then(|r| r.main_app_web_response_context.as_ref())
        .map(|c| c.logged_out)
        .unwrap_or(false);

    let streaming_data = player_response.streaming_data.as_ref();
    let expires_in = streaming_data
        .and_then(|s| s.expires_in_seconds.as_ref())
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(6 * 3600));

    let target_duration_secs = streaming_data
        .and_then(|s| s.adaptive_formats.first())
        .and_then(|f| f.target_duration_sec)
        .unwrap_or(5);

    let dash_manifest_url = streaming_data.and_then(|s| s.dash_manifest_url.clone());

    let mut url_templates = BTreeMap::new();
    let issued_at = SystemTime::now();

    // Prefer the DASH manifest if parseable (spec.md §4.1 "URL table").
    let mut manifest_parsed = false;
    if let Some(manifest_url) = &dash_manifest_url {
        if let Ok(manifest_xml) = client.fetch_dash_manifest(manifest_url).await {
            if let Ok(table) = parse_dash_manifest(&manifest_xml) {
                for (itag, base_url) in table {
                    url_templates.insert(
                        itag,
                        FragmentUrlTemplate {
                            template: fragment_template_from_base_url(&base_url),
                            itag,
                            fragmented: true,
                            issued_at,
                            expires_in,
                        },
                    );
                }
                manifest_parsed = !url_templates.is_empty();
            }
        }
    }

    // Fallback: adaptiveFormats entries whose URL contains `noclen`.
    if !manifest_parsed {
        if let Some(sd) = streaming_data {
            for format in &sd.adaptive_formats {
                let Some(url) = &format.url else { continue };
                if !url.contains("noclen") {
                    continue;
                }
                url_templates.insert(
                    format.itag,
                    FragmentUrlTemplate {
                        template: format!("{url}&sq={{seq}}"),
                        itag: format.itag,
                        fragmented: true,
                        issued_at,
                        expires_in,
                    },
                );
            }
        }
    }

    Ok(ResolvedMetadata {
        status,
        reason,
        is_live_now,
        scheduled_start,
        poll_delay,
        dash_manifest_url,
        expires_in,
        target_duration_secs,
        url_templates,
        meta,
        logged_out,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeClient {
        response_json: String,
        manifest_xml: Option<String>,
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl MetadataClient for FakeClient {
        async fn fetch_player_response(
            &self,
            _video_id: &str,
        ) -> Result<PlayerResponse, DownloadError> {
            *self.calls.lock().unwrap() += 1;
            serde_json::from_str(&self.response_json).map_err(|e| {
                DownloadError::PlayerResponseParse {
                    reason: e.to_string(),
                }
            })
        }

        async fn fetch_dash_manifest(&self, _manifest_url: &str) -> Result<String, DownloadError> {
            self.manifest_xml
                .clone()
                .ok_or_else(|| DownloadError::ManifestParse {
                    reason: "no manifest".to_string(),
                })
        }
    }

    fn sample_response(status: &str) -> String {
        format!(
            r#"{{
                "videoDetails": {{
                    "videoId": "abc123xyz99",
                    "title": "Test Broadcast",
                    "author": "Test Channel",
                    "channelId": "UC123",
                    "isLiveContent": true,
                    "shortDescription": "desc"
                }},
                "microformat": {{
                    "playerMicroformatRenderer": {{
                        "liveBroadcastDetails": {{ "isLiveNow": true }},
                        "uploadDate": "2026-01-01"
                    }}
                }},
                "playabilityStatus": {{ "status": "{status}" }},
                "streamingData": {{
                    "expiresInSeconds": "21600",
                    "adaptiveFormats": [
                        {{ "itag": 140, "url": "https://x/audio?noclen=1", "mimeType": "audio/mp4", "targetDurationSec": 5 }}
                    ]
                }},
                "responseContext": {{ "mainAppWebResponseContext": {{ "loggedOut": false }} }}
            }}"#
        )
    }

    #[tokio::test]
    async fn resolves_ok_status_and_builds_fallback_url_table() {
        let client = FakeClient {
            response_json: sample_response("OK"),
            manifest_xml: None,
            calls: Mutex::new(0),
        };
        let resolved = resolve(&client, "abc123xyz99", false).await.unwrap();
        assert_eq!(resolved.status, PlayabilityStatus::Ok);
        assert!(resolved.url_templates.contains_key(&140));
        assert_eq!(resolved.meta.unwrap().title, "Test Broadcast");
    }

    #[tokio::test]
    async fn missing_video_details_mid_download_yields_unplayable() {
        let client = FakeClient {
            response_json: r#"{"playabilityStatus": {"status": "OK"}}"#.to_string(),
            manifest_xml: None,
            calls: Mutex::new(0),
        };
        let resolved = resolve(&client, "abc123xyz99", true).await.unwrap();
        assert_eq!(resolved.status, PlayabilityStatus::Unplayable);
        assert_eq!(resolved.is_live_now, Some(false));
    }

    #[tokio::test]
    async fn prefers_dash_manifest_over_adaptive_formats() {
        let manifest = r#"
        <MPD>
          <Period>
            <AdaptationSet>
              <Representation id="140">
                <BaseURL>https://manifest.example/140/</BaseURL>
              </Representation>
            </AdaptationSet>
          </Period>
        </MPD>"#;
        let mut response_json = sample_response("OK");
        response_json = response_json.replacen(
            "\"expiresInSeconds\"",
            "\"dashManifestUrl\": \"https://manifest.example/mpd\", \"expiresInSeconds\"",
            1,
        );
        let client = FakeClient {
            response_json,
            manifest_xml: Some(manifest.to_string()),
            calls: Mutex::new(0),
        };
        let resolved = resolve(&client, "abc123xyz99", false).await.unwrap();
        let tpl = &resolved.url_templates[&140];
        assert!(tpl.template.starts_with("https://manifest.example/140/sq/"));
    }
}
