use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

/// Which IP address family to force for outbound connections, mirroring the
/// `-4`/`-6` CLI flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AddressFamily {
    #[default]
    Either,
    V4Only,
    V6Only,
}

/// HTTP client configuration, built once and shared by every component that
/// issues requests (metadata resolver, fragment workers).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub user_agent: String,
    pub headers: HeaderMap,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub address_family: AddressFamily,
    pub cookie_file: Option<std::path::PathBuf>,
    /// Whether the sidx segment-index atom is stripped from every fragment's
    /// first buffered chunk, or only from non-VP9 video (parity knob for the
    /// older revision; see DESIGN.md).
    pub strip_sidx: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            headers: HeaderMap::new(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            address_family: AddressFamily::Either,
            cookie_file: None,
            strip_sidx: true,
        }
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Build the shared `reqwest::Client` every component issues requests
    /// through, applying the address-family pin (`-4`/`-6`), cookie jar, and
    /// default headers from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, crate::error::DownloadError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(&self.user_agent)
            .default_headers(self.headers.clone())
            .timeout(self.timeout)
            .connect_timeout(self.connect_timeout)
            .cookie_store(true);

        builder = match self.address_family {
            AddressFamily::Either => builder,
            AddressFamily::V4Only => {
                builder.local_address(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED))
            }
            AddressFamily::V6Only => {
                builder.local_address(std::net::IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED))
            }
        };

        if let Some(cookie_file) = &self.cookie_file {
            let jar = crate::cookies::load_cookie_jar(cookie_file)?;
            builder = builder.cookie_provider(jar);
        }

        builder
            .build()
            .map_err(|source| crate::error::DownloadError::Network { source })
    }
}

#[derive(Default)]
pub struct EngineConfigBuilder {
    inner: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn with_user_agent(mut self, ua: impl Into<String>) -> Self {
        self.inner.user_agent = ua.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.inner.timeout = timeout;
        self
    }

    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        if let (Ok(name), Ok(val)) = (
            key.parse::<reqwest::header::HeaderName>(),
            HeaderValue::from_str(value),
        ) {
            self.inner.headers.insert(name, val);
        }
        self
    }

    pub fn with_address_family(mut self, family: AddressFamily) -> Self {
        self.inner.address_family = family;
        self
    }

    pub fn with_cookie_file(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.inner.cookie_file = Some(path.into());
        self
    }

    pub fn with_strip_sidx(mut self, strip: bool) -> Self {
        self.inner.strip_sidx = strip;
        self
    }

    pub fn build(self) -> EngineConfig {
        self.inner
    }
}

/// Per-session download behaviour: how many fragment workers per media kind,
/// how long to wait between retries, which quality the user prefers. Built
/// once by the CLI and shared by reference (`Arc<SessionConfig>`) — never
/// mutated after session start, matching spec.md §9 "Dynamic config".
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Worker threads (tokio tasks) per media kind. Default 1, per spec.md §4.4.
    pub thread_count: usize,
    /// Interval between wait/poll re-checks when no server poll delay is given.
    pub retry_interval: Option<Duration>,
    /// Ordered, slash-separated quality preference list, e.g. "1080p60/best".
    pub quality_preference: Vec<String>,
    /// Prefer VP9 over H264 when both are available for a selected label.
    pub prefer_vp9: bool,
    /// Whether to wait for a scheduled broadcast instead of asking the user.
    pub wait_for_stream: Option<bool>,
    pub output_template: String,
    pub write_thumbnail: bool,
    pub write_description: bool,
    pub add_metadata: bool,
    pub merge_on_finish: bool,
    pub save_partial_on_interrupt: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            thread_count: 1,
            retry_interval: None,
            quality_preference: vec!["best".to_string()],
            prefer_vp9: false,
            wait_for_stream: None,
            output_template: "%(channel)s/%(title)s_%(id)s".to_string(),
            write_thumbnail: false,
            write_description: false,
            add_metadata: false,
            merge_on_finish: true,
            save_partial_on_interrupt: true,
        }
    }
}

/// Tunable constants carried over from the historical implementation.
pub const RECHECK_TIME: Duration = Duration::from_secs(15);
pub const FRAG_MAX_TRIES: u32 = 10;
/// Dead constant kept for parity with the revision that tracked empty-body
/// responses separately from generic retries (see DESIGN.md open question).
#[allow(dead_code)]
pub const FRAG_MAX_EMPTY: u32 = 10;
pub const BUF_SIZE: usize = 8 * 1024;
pub const HOUR: Duration = Duration::from_secs(3600);
pub const FULL_RETRIES_BUDGET: u32 = 3;
