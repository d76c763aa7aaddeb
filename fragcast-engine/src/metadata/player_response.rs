//! Serde models for the subset of YouTube's `ytInitialPlayerResponse` JSON
//! object that spec.md §4.1 names as required extractions, plus the
//! supplemental fields from `original_source/ytarchive.py` noted in
//! SPEC_FULL.md §4.1. Fields the origin may omit are `Option`; anything not
//! listed here is intentionally dropped rather than modeled.

use serde::Deserialize;

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PlayerResponse {
    #[serde(default)]
    pub video_details: Option<VideoDetails>,
    #[serde(default)]
    pub microformat: Option<Microformat>,
    #[serde(default)]
    pub playability_status: Option<PlayabilityStatusRaw>,
    #[serde(default)]
    pub streaming_data: Option<StreamingData>,
    #[serde(default)]
    pub response_context: Option<ResponseContext>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct VideoDetails {
    pub video_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub is_live_content: bool,
    #[serde(default)]
    pub short_description: String,
    #[serde(default)]
    pub length_seconds: Option<String>,
    #[serde(default)]
    pub is_low_latency_live_stream: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Microformat {
    pub player_microformat_renderer: Option<PlayerMicroformatRenderer>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PlayerMicroformatRenderer {
    #[serde(default)]
    pub live_broadcast_details: Option<LiveBroadcastDetails>,
    #[serde(default)]
    pub upload_date: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<ThumbnailList>,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LiveBroadcastDetails {
    #[serde(default)]
    pub is_live_now: bool,
    #[serde(default)]
    pub start_timestamp: Option<String>,
    #[serde(default)]
    pub end_timestamp: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ThumbnailList {
    #[serde(default)]
    pub thumbnails: Vec<Thumbnail>,
}

#[derive(Debug, Deserialize, Default)]
pub struct Thumbnail {
    pub url: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PlayabilityStatusRaw {
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub live_streamability: Option<LiveStreamability>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LiveStreamability {
    pub live_streamability_renderer: Option<LiveStreamabilityRenderer>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LiveStreamabilityRenderer {
    #[serde(default)]
    pub poll_delay_ms: Option<String>,
    #[serde(default)]
    pub offline_slate: Option<OfflineSlate>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct OfflineSlate {
    pub live_stream_offline_slate_renderer: Option<OfflineSlateRenderer>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct OfflineSlateRenderer {
    #[serde(default)]
    pub scheduled_start_time: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StreamingData {
    #[serde(default)]
    pub dash_manifest_url: Option<String>,
    #[serde(default)]
    pub expires_in_seconds: Option<String>,
    #[serde(default)]
    pub adaptive_formats: Vec<AdaptiveFormat>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AdaptiveFormat {
    pub itag: u32,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub quality_label: Option<String>,
    #[serde(default)]
    pub target_duration_sec: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResponseContext {
    #[serde(default)]
    pub main_app_web_response_context: Option<MainAppWebResponseContext>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MainAppWebResponseContext {
    #[serde(default)]
    pub logged_out: bool,
}

/// Locate the `var ytInitialPlayerResponse = {...};` script-tag payload in a
/// watch-page HTML document and return the raw JSON object text, matching
/// spec.md §6 "Player-response extraction".
pub fn extract_player_response_json(html: &str) -> Option<&str> {
    const PREFIX: &str = "var ytInitialPlayerResponse = ";
    let start = html.find(PREFIX)? + PREFIX.len();
    let body = &html[start..];
    let obj_start = body.find('{')?;
    // Find the matching `};` that closes the statement by tracking brace
    // depth, since the JSON payload itself contains unescaped `}` characters.
    let bytes = body.as_bytes();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(obj_start) {
        let c = b as char;
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&body[obj_start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}
