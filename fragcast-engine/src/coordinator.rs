//! Download coordinator (spec.md §4.4): one task per media kind, owning the
//! output file, the shared task channel, and the worker pool. Grounded on
//! the teacher's `SegmentScheduler::run` — a `tokio::select!` loop over a
//! request channel, a completed-work channel, and a shutdown-on-drain
//! condition — generalized from HLS segment batching to strictly-ordered
//! fragment sequencing.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

use crate::config::HOUR;
use crate::error::DownloadError;
use crate::fragment::Fragment;
use crate::metadata::MetadataClient;
use crate::progress::ProgressEvent;
use crate::state::{MediaKind, SharedState};
use crate::worker::{FragmentTask, FragmentWorker, SharedTaskReceiver, WorkerExitReason};

/// A fragment more than this far behind `known_max` triggers spawning extra
/// workers, up to `thread_count` (spec.md §4.4 step 5).
const BEHIND_THRESHOLD: u64 = 100;
/// Write-retry budget before the coordinator gives up and stops the session
/// (spec.md §4.4 step 6).
const WRITE_RETRY_LIMIT: u32 = 10;

pub struct DownloadCoordinator {
    kind: MediaKind,
    state: Arc<SharedState>,
    client: Client,
    metadata_client: Arc<dyn MetadataClient>,
    progress_tx: mpsc::Sender<ProgressEvent>,
    strip_sidx: bool,
}

impl DownloadCoordinator {
    pub fn new(
        kind: MediaKind,
        state: Arc<SharedState>,
        client: Client,
        metadata_client: Arc<dyn MetadataClient>,
        progress_tx: mpsc::Sender<ProgressEvent>,
        strip_sidx: bool,
    ) -> Self {
        Self {
            kind,
            state,
            client,
            metadata_client,
            progress_tx,
            strip_sidx,
        }
    }

    fn spawn_worker(
        &self,
        workers: &mut tokio::task::JoinSet<WorkerExitReason>,
        task_rx: SharedTaskReceiver,
        result_tx: mpsc::Sender<Fragment>,
    ) {
        let worker = FragmentWorker::new(
            self.client.clone(),
            Arc::clone(&self.metadata_client),
            Arc::clone(&self.state),
            self.kind,
            task_rx,
            result_tx,
            self.strip_sidx,
        );
        workers.spawn(worker.run());
    }

    pub async fn run(self) -> Result<(), DownloadError> {
        let thread_count = self.state.session_config.thread_count.max(1);
        let output_path = self.state.base_output_path(self.kind).await;
        let mut output_file = tokio::fs::File::create(&output_path).await?;

        let (task_tx, task_rx) = mpsc::channel::<FragmentTask>(thread_count * 4 + 4);
        let task_rx: SharedTaskReceiver = Arc::new(Mutex::new(task_rx));
        let (result_tx, mut result_rx) = mpsc::channel::<Fragment>(thread_count * 4 + 4);

        let mut workers = tokio::task::JoinSet::new();
        for seq in 0..thread_count as u64 {
            let _ = task_tx.send(FragmentTask { seq, known_max: -1 }).await;
        }
        for _ in 0..thread_count {
            self.spawn_worker(&mut workers, Arc::clone(&task_rx), result_tx.clone());
        }
        self.state.set_active_workers(self.kind, thread_count).await;

        let mut known_max: i64 = -1;
        let mut cur_seq: u64 = thread_count as u64;
        let mut cur_frag: u64 = 0;
        let mut buffer: BTreeMap<u64, Fragment> = BTreeMap::new();
        let mut write_failures: u32 = 0;
        let mut last_hourly_refresh = Instant::now();
        let mut result_channel_open = true;

        loop {
            tokio::select! {
                biased;

                maybe_fragment = result_rx.recv(), if result_channel_open => {
                    match maybe_fragment {
                        Some(fragment) => {
                            if fragment.x_head_seqnum > known_max {
                                known_max = fragment.x_head_seqnum;
                            }
                            buffer.insert(fragment.seq, fragment);

                            if self.state.in_progress().await
                                && (known_max < 0 || cur_seq as i64 <= known_max + 1)
                            {
                                let _ = task_tx
                                    .send(FragmentTask { seq: cur_seq, known_max })
                                    .await;
                                cur_seq += 1;
                            }
                        }
                        None => result_channel_open = false,
                    }
                }

                Some(join_result) = workers.join_next(), if !workers.is_empty() => {
                    match join_result {
                        Ok(reason) => self.handle_worker_exit(reason, &mut workers, &task_rx, &result_tx).await,
                        Err(join_err) => error!(kind = self.kind.as_str(), error = %join_err, "worker task panicked"),
                    }
                }

                else => {
                    if workers.is_empty() && !result_channel_open && buffer_drained(&buffer, cur_frag) {
                        break;
                    }
                }
            }

            // Writer pass (spec.md §4.4 step 3): write every contiguous
            // fragment starting at cur_frag, restarting the scan from the
            // front after each successful write.
            loop {
                let Some(fragment) = buffer.get(&cur_frag) else { break };
                match output_file.write_all(&fragment.data).await {
                    Ok(()) => {
                        let bytes_written = fragment.data.len() as u64;
                        buffer.remove(&cur_frag);
                        cur_frag += 1;
                        write_failures = 0;
                        let _ = self
                            .progress_tx
                            .send(ProgressEvent {
                                kind: self.kind,
                                bytes_written,
                                max_seq_seen: known_max,
                            })
                            .await;
                    }
                    Err(err) => {
                        write_failures += 1;
                        warn!(kind = self.kind.as_str(), error = %err, attempt = write_failures, "write failed");
                        if write_failures >= WRITE_RETRY_LIMIT {
                            error!(kind = self.kind.as_str(), "exceeded write retry budget, stopping session");
                            self.state.set_stopping().await;
                            workers.shutdown().await;
                            return Err(DownloadError::Io { source: err });
                        }
                        break;
                    }
                }
            }

            if write_failures == 0 && last_hourly_refresh.elapsed() > HOUR {
                if !self.state.is_unavailable().await {
                    let _ = self
                        .state
                        .refresh_metadata(self.metadata_client.as_ref())
                        .await;
                }
                last_hourly_refresh = Instant::now();
            }

            if known_max >= 0 && cur_seq as i64 + (BEHIND_THRESHOLD as i64) < known_max {
                let active = self.state.active_workers(self.kind).await;
                if active < thread_count {
                    self.spawn_worker(&mut workers, Arc::clone(&task_rx), result_tx.clone());
                    self.state.set_active_workers(self.kind, active + 1).await;
                }
            }

            if self.state.is_stopping().await {
                workers.shutdown().await;
                break;
            }
        }

        output_file.flush().await?;
        info!(kind = self.kind.as_str(), bytes = cur_frag, "coordinator finished");
        Ok(())
    }

    /// Apply spec.md §4.4 step 5's replenishment rule to one worker's exit:
    /// an expected drain never gets a replacement, but a worker that backed
    /// off (to avoid a network storm) might, once conditions change.
    async fn handle_worker_exit(
        &self,
        reason: WorkerExitReason,
        workers: &mut tokio::task::JoinSet<WorkerExitReason>,
        task_rx: &SharedTaskReceiver,
        result_tx: &mpsc::Sender<Fragment>,
    ) {
        let active = self.state.active_workers(self.kind).await;
        let decremented = active.saturating_sub(1);
        self.state.set_active_workers(self.kind, decremented).await;

        match reason {
            WorkerExitReason::Drained | WorkerExitReason::NotLive | WorkerExitReason::Stopping => {
                info!(kind = self.kind.as_str(), ?reason, "worker exited, not replenishing");
            }
            WorkerExitReason::AvoidingNetworkStorm => {
                if self.state.is_live().await && decremented < self.state.session_config.thread_count {
                    info!(kind = self.kind.as_str(), "replenishing worker that backed off");
                    self.spawn_worker(workers, Arc::clone(task_rx), result_tx.clone());
                    self.state.set_active_workers(self.kind, decremented + 1).await;
                }
            }
        }
    }
}

fn buffer_drained(buffer: &BTreeMap<u64, Fragment>, cur_frag: u64) -> bool {
    buffer.keys().all(|&seq| seq < cur_frag)
}

#[cfg(test)]
mod tests {
    use super::buffer_drained;
    use crate::fragment::Fragment;
    use bytes::Bytes;
    use std::collections::BTreeMap;

    fn frag(seq: u64) -> Fragment {
        Fragment {
            seq,
            x_head_seqnum: seq as i64,
            data: Bytes::from_static(b"x"),
        }
    }

    #[test]
    fn buffer_drained_true_when_empty() {
        let buffer: BTreeMap<u64, Fragment> = BTreeMap::new();
        assert!(buffer_drained(&buffer, 0));
    }

    #[test]
    fn buffer_drained_false_when_unwritten_fragment_remains() {
        let mut buffer = BTreeMap::new();
        buffer.insert(5, frag(5));
        assert!(!buffer_drained(&buffer, 3));
    }

    #[test]
    fn buffer_drained_true_when_all_entries_precede_cur_frag() {
        // Defensive case: entries at/behind cur_frag only happen if the
        // writer pass somehow missed them; still shouldn't block shutdown.
        let mut buffer = BTreeMap::new();
        buffer.insert(1, frag(1));
        assert!(buffer_drained(&buffer, 3));
    }
}
