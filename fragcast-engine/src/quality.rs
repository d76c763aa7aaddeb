//! Quality selection (spec.md §4.3): a pure function over the user's
//! preference list and the formats actually present in the resolver output.
//! No network or shared-state access, so idempotence (spec.md §8) falls out
//! of purity rather than needing a dedicated guard.

use std::collections::BTreeMap;

use crate::error::DownloadError;
use crate::metadata::{AUDIO_ITAG, AUDIO_ONLY_ITAG, QUALITY_ORDER};

/// A resolved video+audio itag pair, or audio-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectedQuality {
    pub video_itag: u32,
    pub audio_itag: u32,
}

impl SelectedQuality {
    pub fn is_audio_only(&self) -> bool {
        self.video_itag == AUDIO_ONLY_ITAG
    }
}

/// Labels present in `available_itags`, in the fixed `QUALITY_ORDER`.
fn available_labels(available_itags: &BTreeMap<u32, ()>) -> Vec<&'static str> {
    QUALITY_ORDER
        .iter()
        .filter(|(_, h264, vp9)| {
            available_itags.contains_key(h264) || vp9.is_some_and(|v| available_itags.contains_key(&v))
        })
        .map(|(label, _, _)| *label)
        .collect()
}

/// Select exactly one video itag (or audio-only) given a slash-separated,
/// case-insensitive preference list and the itags present in `dl_urls`.
/// Returns `Err(QualityUnavailable)` when nothing in the preference list
/// matches, signalling that the caller should re-prompt (spec.md §4.3 step 4).
pub fn select_quality(
    preferences: &[String],
    dl_urls: &BTreeMap<u32, ()>,
    prefer_vp9: bool,
) -> Result<SelectedQuality, DownloadError> {
    let available = available_labels(dl_urls);

    for pref in preferences {
        let pref_lower = pref.to_lowercase();

        if pref_lower == "audio_only" {
            return Ok(SelectedQuality {
                video_itag: AUDIO_ONLY_ITAG,
                audio_itag: AUDIO_ITAG,
            });
        }

        let label = if pref_lower == "best" {
            available.last().copied()
        } else {
            available
                .iter()
                .copied()
                .find(|l| l.to_lowercase() == pref_lower)
        };

        let Some(label) = label else { continue };

        let Some((_, h264, vp9)) = QUALITY_ORDER.iter().find(|(l, _, _)| *l == label) else {
            continue;
        };

        let video_itag = if prefer_vp9 {
            match vp9 {
                Some(v) if dl_urls.contains_key(v) => *v,
                _ => *h264,
            }
        } else {
            *h264
        };

        if !dl_urls.contains_key(&video_itag) {
            continue;
        }

        return Ok(SelectedQuality {
            video_itag,
            audio_itag: AUDIO_ITAG,
        });
    }

    Err(DownloadError::QualityUnavailable {
        requested: preferences.join("/"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn itags(list: &[u32]) -> BTreeMap<u32, ()> {
        list.iter().map(|i| (*i, ())).collect()
    }

    #[test]
    fn best_resolves_to_highest_available_label() {
        let dl_urls = itags(&[160, 133, 134, 140]);
        let selected = select_quality(&["best".to_string()], &dl_urls, false).unwrap();
        assert_eq!(selected.video_itag, 134); // 360p is the highest of the three present
    }

    #[test]
    fn prefers_vp9_when_flag_set_and_itag_present() {
        let dl_urls = itags(&[136, 247, 140]); // 720p h264 + vp9
        let selected = select_quality(&["720p".to_string()], &dl_urls, true).unwrap();
        assert_eq!(selected.video_itag, 247);
    }

    #[test]
    fn falls_back_to_h264_when_vp9_missing() {
        let dl_urls = itags(&[136, 140]);
        let selected = select_quality(&["720p".to_string()], &dl_urls, true).unwrap();
        assert_eq!(selected.video_itag, 136);
    }

    #[test]
    fn unmatched_preference_is_an_error() {
        let dl_urls = itags(&[298, 302, 140]); // only 720p60 present
        let err = select_quality(&["1080p60".to_string()], &dl_urls, false).unwrap_err();
        assert!(matches!(err, DownloadError::QualityUnavailable { .. }));
    }

    #[test]
    fn audio_only_preference_skips_video() {
        let dl_urls = itags(&[140]);
        let selected = select_quality(&["audio_only".to_string()], &dl_urls, false).unwrap();
        assert!(selected.is_audio_only());
    }

    #[test]
    fn selection_is_idempotent() {
        let dl_urls = itags(&[136, 247, 140]);
        let a = select_quality(&["720p".to_string()], &dl_urls, true).unwrap();
        let b = select_quality(&["720p".to_string()], &dl_urls, true).unwrap();
        assert_eq!(a, b);
    }
}
