//! Minimal MPEG-DASH manifest parsing: just enough to build the `itag ->
//! BaseURL` table spec.md §4.1 describes, grounded on the serde/`quick-xml`
//! modeling approach used by the `dash-mpd` crate — a small typed tree rather
//! than a hand-rolled tag scanner.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::DownloadError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Mpd {
    #[serde(rename = "Period", default)]
    period: Vec<Period>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Period {
    #[serde(rename = "AdaptationSet", default)]
    adaptation_set: Vec<AdaptationSet>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AdaptationSet {
    #[serde(rename = "Representation", default)]
    representation: Vec<Representation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Representation {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "BaseURL", default)]
    base_url: Vec<String>,
}

/// Parse a DASH manifest document and return `itag -> BaseURL` (without the
/// `sq/{seq}` suffix), per spec.md §4.1 and §6. Every `Representation`
/// element's `id` attribute is treated as an itag.
pub fn parse_dash_manifest(xml: &str) -> Result<BTreeMap<u32, String>, DownloadError> {
    let mpd: Mpd = quick_xml::de::from_str(xml).map_err(|e| DownloadError::ManifestParse {
        reason: e.to_string(),
    })?;

    let mut table = BTreeMap::new();
    for period in mpd.period {
        for set in period.adaptation_set {
            for rep in set.representation {
                let Ok(itag) = rep.id.parse::<u32>() else {
                    continue;
                };
                let Some(base) = rep.base_url.into_iter().next() else {
                    continue;
                };
                table.insert(itag, base);
            }
        }
    }
    Ok(table)
}

/// Build the fragment-URL template (`<BaseURL>sq/{seq}`) for an itag's
/// `BaseURL`, per spec.md §4.1 "Manifest parse".
pub fn fragment_template_from_base_url(base_url: &str) -> String {
    let mut url = base_url.to_string();
    if !url.ends_with('/') {
        url.push('/');
    }
    url.push_str("sq/{seq}");
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_representations_and_base_urls() {
        let xml = r#"
        <MPD>
          <Period>
            <AdaptationSet>
              <Representation id="140">
                <BaseURL>https://example.googlevideo.com/videoplayback/140/</BaseURL>
              </Representation>
              <Representation id="299">
                <BaseURL>https://example.googlevideo.com/videoplayback/299/</BaseURL>
              </Representation>
            </AdaptationSet>
          </Period>
        </MPD>
        "#;

        let table = parse_dash_manifest(xml).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.get(&140).unwrap(),
            "https://example.googlevideo.com/videoplayback/140/"
        );
    }

    #[test]
    fn builds_sq_suffixed_template() {
        let tpl = fragment_template_from_base_url("https://example.com/vp/140");
        assert_eq!(tpl, "https://example.com/vp/140/sq/{seq}");
    }

    #[test]
    fn ignores_non_numeric_representation_ids() {
        let xml = r#"
        <MPD>
          <Period>
            <AdaptationSet>
              <Representation id="audio-und-mp4a">
                <BaseURL>https://example.com/audio/</BaseURL>
              </Representation>
            </AdaptationSet>
          </Period>
        </MPD>
        "#;
        let table = parse_dash_manifest(xml).unwrap();
        assert!(table.is_empty());
    }
}
