//! `fragcast` — command-line front-end wiring flags, input parsing, and the
//! engine's session orchestration together (spec.md §1(c)). Grounded on
//! `strev-cli/src/main.rs`'s `clap::Parser` + `tracing-subscriber` +
//! `process::exit` pattern and `rust-srec/src/main.rs`'s mimalloc
//! global-allocator / signal-driven shutdown pattern.

mod cli;
mod error;
mod urlparse;

use std::process;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::Args;
use error::AppError;
use fragcast_engine::{
    AddressFamily, EngineConfig, FfmpegMuxerDriver, HttpMetadataClient, SessionConfig, SessionRequest,
};
use urlparse::{DirectKind, ParsedInput};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    match run(args).await {
        Ok(exit_code) => process::exit(exit_code),
        Err(err) => {
            error!("{err}");
            process::exit(err.exit_code());
        }
    }
}

async fn run(args: Args) -> Result<i32, AppError> {
    let address_family = match (args.ipv4, args.ipv6) {
        (true, _) => AddressFamily::V4Only,
        (_, true) => AddressFamily::V6Only,
        _ => AddressFamily::Either,
    };

    let mut engine_builder = EngineConfig::builder().with_address_family(address_family);
    if let Some(cookie_file) = &args.cookies {
        engine_builder = engine_builder.with_cookie_file(cookie_file.clone());
    }
    let engine_config = Arc::new(engine_builder.build());

    let resolver_client = engine_config.build_client()?;

    let parsed = urlparse::parse_input(&args.input)?;
    let direct_kind = match &parsed {
        ParsedInput::DirectFragmentUrl { kind, .. } => Some(*kind),
        ParsedInput::VideoId(_) => None,
    };
    let video_id = match parsed {
        ParsedInput::VideoId(id) => {
            if let Some(channel_live_url) = id.strip_prefix("channel-live:") {
                info!("resolving canonical broadcast id from channel page");
                urlparse::resolve_channel_live_id(&resolver_client, channel_live_url).await?
            } else {
                id
            }
        }
        ParsedInput::DirectFragmentUrl { video_id, itag, .. } => {
            info!("direct fragment URL supplied (itag {itag}); re-resolving metadata for broadcast id {video_id}");
            video_id
        }
    };

    // `--audio-url`/`--video-url` take precedence over a direct fragment URL
    // given as the main input; either way the URL must be templatized before
    // it can serve every subsequent fragment request (spec.md §6).
    let mut audio_url_override = args.audio_url.as_deref().map(urlparse::templatize_fragment_url).transpose()?;
    let mut video_url_override = args.video_url.as_deref().map(urlparse::templatize_fragment_url).transpose()?;
    if let Some(kind) = direct_kind {
        let templated = urlparse::templatize_fragment_url(&args.input)?;
        match kind {
            DirectKind::Audio => audio_url_override.get_or_insert(templated),
            DirectKind::Video => video_url_override.get_or_insert(templated),
        };
    }

    let session_config = Arc::new(SessionConfig {
        thread_count: args.threads.max(1),
        retry_interval: args.retry_stream.map(std::time::Duration::from_secs),
        quality_preference: args
            .quality
            .split('/')
            .map(str::to_string)
            .collect(),
        prefer_vp9: args.vp9,
        wait_for_stream: if args.no_wait {
            Some(false)
        } else if args.wait {
            Some(true)
        } else {
            None
        },
        output_template: args.output.clone(),
        write_thumbnail: args.write_thumbnail || args.thumbnail,
        write_description: args.write_description,
        add_metadata: args.add_metadata,
        merge_on_finish: args.merge_on_finish(),
        save_partial_on_interrupt: args.save_partial_on_interrupt(),
    });

    let metadata_client = Arc::new(HttpMetadataClient::new(resolver_client));
    let muxer = Arc::new(FfmpegMuxerDriver::new());

    let request = SessionRequest {
        video_id: video_id.clone(),
        base_name: video_id,
        output_dir: args.output_dir.clone(),
        thumbnail_path: None,
        audio_url_override,
        video_url_override,
    };

    let outcome = fragcast_engine::run_session(request, engine_config, session_config, metadata_client, muxer)
        .await?;

    if outcome.interrupted && !outcome.merged {
        info!("interrupted without merging; partial files left in {}", args.output_dir.display());
        return Ok(2);
    }

    if let Some(path) = &outcome.output_path {
        info!("wrote {}", path.display());
    }

    Ok(0)
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();
}
