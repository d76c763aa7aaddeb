use reqwest::StatusCode;

/// Error taxonomy for the fragment acquisition engine.
///
/// Variants are grouped the way the callers need to react to them: fatal
/// pre-download failures abort the session, transient failures are retried
/// by the fragment worker's own retry policy, and `Cancelled` is returned
/// whenever a blocking point observes the shared cancellation token.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("download cancelled")]
    Cancelled,

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("unrecognized input form `{input}`")]
    UnrecognizedInput { input: String },

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("request failed with HTTP {status} during {operation}")]
    HttpStatus {
        status: StatusCode,
        operation: &'static str,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("player response parse error: {reason}")]
    PlayerResponseParse { reason: String },

    #[error("{status:?}: {reason}")]
    Unplayable {
        status: super::metadata::PlayabilityStatus,
        reason: String,
    },

    #[error("dash manifest parse error: {reason}")]
    ManifestParse { reason: String },

    #[error("no usable fragment URL template for itag {itag}")]
    NoUrlTemplate { itag: u32 },

    #[error("requested quality unavailable: {requested}")]
    QualityUnavailable { requested: String },

    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error("muxer invocation failed: {reason}")]
    Muxer { reason: String },

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl DownloadError {
    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn http_status(status: StatusCode, operation: &'static str) -> Self {
        Self::HttpStatus { status, operation }
    }

    /// Whether a fragment worker or coordinator should retry after this error,
    /// as opposed to treating it as fatal for the current session.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Cancelled
            | Self::InvalidUrl { .. }
            | Self::UnrecognizedInput { .. }
            | Self::Unplayable { .. }
            | Self::QualityUnavailable { .. }
            | Self::Configuration { .. }
            | Self::Muxer { .. } => false,
            Self::HttpStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::Network { .. }
            | Self::Io { .. }
            | Self::PlayerResponseParse { .. }
            | Self::ManifestParse { .. }
            | Self::NoUrlTemplate { .. }
            | Self::Internal { .. } => true,
        }
    }

    /// Whether this error should terminate the whole session rather than
    /// just the fragment or worker that observed it.
    pub fn is_fatal_pre_download(&self) -> bool {
        matches!(
            self,
            Self::Unplayable { .. } | Self::InvalidUrl { .. } | Self::UnrecognizedInput { .. }
        )
    }
}
