// Fragment acquisition engine for a live, fragment-numbered HTTP stream.
pub mod config;
pub mod coordinator;
pub mod cookies;
pub mod error;
pub mod fragment;
pub mod metadata;
pub mod mux;
pub mod progress;
pub mod quality;
pub mod session;
pub mod state;
pub mod waitpoll;
pub mod worker;

pub use config::{AddressFamily, EngineConfig, EngineConfigBuilder, SessionConfig};
pub use error::DownloadError;
pub use metadata::{HttpMetadataClient, MetadataClient, PlayabilityStatus};
pub use mux::{FfmpegMuxerDriver, MuxJob, MuxerDriver};
pub use quality::SelectedQuality;
pub use session::{SessionOutcome, SessionRequest, run_session};
pub use state::{MediaKind, SharedState};
