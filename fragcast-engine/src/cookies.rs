//! Netscape-format cookie file loading (spec.md §6 "Environment": "A
//! user-supplied Netscape-format cookie file enables members-only
//! broadcasts"). No crate in the retrieved pack ships a ready-made Netscape
//! jar parser, so this is a small first-party one, grounded on the field
//! layout the format is universally documented with and on the way
//! `evanc577-livestream-dl`'s `CookieJar::parse_from_file` is attached to a
//! `reqwest::Client` builder
//! (`other_examples/65cfeb6c_evanc577-livestream-dl__src-livestream-mod.rs.rs`).

use std::path::Path;
use std::sync::Arc;

use reqwest::cookie::Jar;
use url::Url;

use crate::error::DownloadError;

/// One line of a Netscape cookie file:
/// `domain	include_subdomains	path	secure	expires	name	value`
struct NetscapeCookie {
    domain: String,
    path: String,
    secure: bool,
    name: String,
    value: String,
}

fn parse_line(line: &str) -> Option<NetscapeCookie> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    // `#HttpOnly_` prefixes a domain that also carries the HttpOnly flag;
    // strip it and treat the rest as a normal line. Any other `#` line is a
    // genuine comment.
    let line = match line.strip_prefix("#HttpOnly_") {
        Some(rest) => rest,
        None if line.starts_with('#') => return None,
        None => line,
    };

    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() != 7 {
        return None;
    }

    Some(NetscapeCookie {
        domain: fields[0].trim_start_matches('.').to_string(),
        path: fields[2].to_string(),
        secure: fields[3].eq_ignore_ascii_case("TRUE"),
        name: fields[5].to_string(),
        value: fields[6].to_string(),
    })
}

/// Parse a Netscape-format cookie file into a `reqwest::cookie::Jar`, ready
/// to attach to a client builder via `.cookie_provider(jar)`.
pub fn load_cookie_jar(path: &Path) -> Result<Arc<Jar>, DownloadError> {
    let contents = std::fs::read_to_string(path)?;
    let jar = Jar::default();

    for line in contents.lines() {
        let Some(cookie) = parse_line(line) else {
            continue;
        };
        let scheme = if cookie.secure { "https" } else { "http" };
        let url_str = format!("{scheme}://{}{}", cookie.domain, cookie.path);
        let Ok(url) = Url::parse(&url_str) else { continue };
        let set_cookie = format!("{}={}; Domain={}; Path={}", cookie.name, cookie.value, cookie.domain, cookie.path);
        jar.add_cookie_str(&set_cookie, &url);
    }

    Ok(Arc::new(jar))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::cookie::CookieStore;
    use std::io::Write;

    #[test]
    fn parses_standard_netscape_line() {
        let cookie = parse_line(
            ".youtube.com\tTRUE\t/\tTRUE\t1999999999\tSID\tabc123",
        )
        .unwrap();
        assert_eq!(cookie.domain, "youtube.com");
        assert_eq!(cookie.path, "/");
        assert!(cookie.secure);
        assert_eq!(cookie.name, "SID");
        assert_eq!(cookie.value, "abc123");
    }

    #[test]
    fn strips_httponly_prefix() {
        let cookie = parse_line(
            "#HttpOnly_.youtube.com\tTRUE\t/\tFALSE\t0\tHSID\tdef456",
        )
        .unwrap();
        assert_eq!(cookie.domain, "youtube.com");
        assert!(!cookie.secure);
    }

    #[test]
    fn skips_comment_and_blank_lines() {
        assert!(parse_line("# Netscape HTTP Cookie File").is_none());
        assert!(parse_line("").is_none());
        assert!(parse_line("   ").is_none());
    }

    #[test]
    fn loads_jar_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# Netscape HTTP Cookie File").unwrap();
        writeln!(file, ".youtube.com\tTRUE\t/\tTRUE\t1999999999\tSID\tabc123").unwrap();
        let jar = load_cookie_jar(file.path()).unwrap();
        let url = Url::parse("https://youtube.com/watch").unwrap();
        let header = jar.cookies(&url);
        assert!(header.is_some());
    }
}
