//! Progress aggregator (spec.md §4.6): the single consumer of per-fragment
//! progress events, rendering one status line via `tracing-indicatif` the
//! way the teacher's `SegmentFetcher` drives its per-segment progress bar,
//! and owning the post-interrupt merge/save/discard prompt.

use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::info;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::state::{MediaKind, SharedState};

/// One fragment's worth of progress, reported by a download coordinator
/// after a successful write (spec.md §4.6: "(kind, bytes_written, max_seq_seen)").
#[derive(Debug, Clone, Copy)]
pub struct ProgressEvent {
    pub kind: MediaKind,
    pub bytes_written: u64,
    pub max_seq_seen: i64,
}

/// What the user chose after a SIGINT (spec.md §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptChoice {
    MergeNow,
    SavePartials,
    Discard,
}

#[derive(Default, Clone, Copy)]
struct Totals {
    bytes: u64,
    max_seq: i64,
}

pub struct ProgressAggregator {
    rx: mpsc::Receiver<ProgressEvent>,
    state: std::sync::Arc<SharedState>,
    debug_mode: bool,
}

impl ProgressAggregator {
    pub fn new(
        rx: mpsc::Receiver<ProgressEvent>,
        state: std::sync::Arc<SharedState>,
        debug_mode: bool,
    ) -> Self {
        Self {
            rx,
            state,
            debug_mode,
        }
    }

    /// Runs until the shared cancellation token fires or the event channel
    /// closes (all coordinators finished normally). Returns the user's
    /// interrupt choice when a SIGINT was observed, `None` on a clean finish.
    pub async fn run(mut self) -> Option<InterruptChoice> {
        let span = tracing::info_span!("download");
        span.pb_set_style(
            &indicatif::ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| indicatif::ProgressStyle::default_spinner()),
        );
        let _enter = span.enter();

        let mut totals: HashMap<MediaKind, Totals> = HashMap::new();

        loop {
            tokio::select! {
                biased;

                _ = self.state.token.cancelled() => {
                    self.state.set_stopping().await;
                    break;
                }

                event = tokio::time::timeout(Duration::from_secs(1), self.rx.recv()) => {
                    match event {
                        Ok(Some(event)) => {
                            let entry = totals.entry(event.kind).or_default();
                            entry.bytes += event.bytes_written;
                            if event.max_seq_seen > entry.max_seq {
                                entry.max_seq = event.max_seq_seen;
                            }
                            self.render(&totals).await;
                        }
                        Ok(None) => {
                            self.render(&totals).await;
                            return None;
                        }
                        Err(_elapsed) => {}
                    }
                }
            }
        }

        println!();
        Some(self.prompt_interrupt_choice().await)
    }

    async fn render(&self, totals: &HashMap<MediaKind, Totals>) {
        let video = totals.get(&MediaKind::Video).copied().unwrap_or_default();
        let audio = totals.get(&MediaKind::Audio).copied().unwrap_or_default();

        let mut line = format!(
            "video: {} audio: {}",
            human_bytes(video.bytes),
            human_bytes(audio.bytes)
        );
        if self.debug_mode {
            line.push_str(&format!(
                " [max_seq v={} a={}]",
                video.max_seq, audio.max_seq
            ));
        }
        self.state.set_status_line(line.clone()).await;
        print!("\r{line}\u{1b}[K");
        let _ = std::io::stdout().flush();
    }

    /// Blocking stdin prompt, run on a blocking thread so it doesn't stall
    /// the runtime's worker threads (grounded on the teacher's use of
    /// `spawn_blocking` for terminal interaction in `mesio-cli/src/input.rs`).
    async fn prompt_interrupt_choice(&self) -> InterruptChoice {
        info!("download interrupted");
        tokio::task::spawn_blocking(|| {
            loop {
                print!("\n[m]erge now, [s]ave partials, [d]iscard? ");
                let _ = std::io::stdout().flush();
                let mut line = String::new();
                if std::io::stdin().read_line(&mut line).is_err() {
                    return InterruptChoice::SavePartials;
                }
                match line.trim().to_lowercase().as_str() {
                    "m" | "merge" => return InterruptChoice::MergeNow,
                    "s" | "save" => return InterruptChoice::SavePartials,
                    "d" | "discard" => return InterruptChoice::Discard,
                    _ => continue,
                }
            }
        })
        .await
        .unwrap_or(InterruptChoice::SavePartials)
    }
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2}{}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_bytes_formats_with_unit_suffix() {
        assert_eq!(human_bytes(512), "512.00B");
        assert_eq!(human_bytes(1536), "1.50KiB");
        assert_eq!(human_bytes(5 * 1024 * 1024), "5.00MiB");
    }

    #[tokio::test]
    async fn run_returns_none_when_channel_closes_without_cancellation() {
        let dir = tempfile::tempdir().unwrap();
        let state = SharedState::new(
            "abc123xyz99".to_string(),
            std::sync::Arc::new(crate::config::SessionConfig::default()),
            dir.path(),
        );
        let (tx, rx) = mpsc::channel(4);
        drop(tx);
        let aggregator = ProgressAggregator::new(rx, state, false);
        assert_eq!(aggregator.run().await, None);
    }
}
