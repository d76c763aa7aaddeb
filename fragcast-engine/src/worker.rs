//! Fragment worker (spec.md §4.5): one task per worker slot, pulling
//! `(seq, known_max)` pairs off a task channel and publishing completed
//! `Fragment`s on a result channel. Grounded on the teacher's
//! `SegmentFetcher::fetch_with_retries` streaming-GET pattern, generalized to
//! the sequence-querystring fragment URLs and the 403/404 state-machine
//! semantics this spec requires.

use std::sync::Arc;

use bytes::BytesMut;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::config::{BUF_SIZE, FRAG_MAX_TRIES, FULL_RETRIES_BUDGET};
use crate::error::DownloadError;
use crate::fragment::{remove_sidx, Fragment};
use crate::metadata::MetadataClient;
use crate::state::{MediaKind, SharedState};

const X_HEAD_SEQNUM: &str = "X-Head-Seqnum";

/// One unit of work handed to a fragment worker: the sequence to fetch and
/// the known-max sequence at enqueue time (-1 meaning "unknown").
#[derive(Debug, Clone, Copy)]
pub struct FragmentTask {
    pub seq: u64,
    pub known_max: i64,
}

/// Why a worker stopped running, so the coordinator can decide whether to
/// replenish the slot (spec.md §4.4 step 5 "hot-restart of workers").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExitReason {
    /// Nothing left to fetch; this is expected end-of-stream behaviour.
    Drained,
    /// Too many workers idle-waiting for this kind; this one backed off.
    AvoidingNetworkStorm,
    /// The broadcast is no longer live and metadata confirms no more data.
    NotLive,
    /// `stopping` was observed.
    Stopping,
}

/// A single task channel shared by every worker for one media kind (spec.md
/// §4.4: "a task channel carrying `(seq, known_max)` pairs"), guarded by a
/// mutex so several worker tasks can compete for it the way a shared
/// `queue.Queue` would.
pub type SharedTaskReceiver = Arc<Mutex<mpsc::Receiver<FragmentTask>>>;

pub struct FragmentWorker {
    client: Client,
    metadata_client: Arc<dyn MetadataClient>,
    state: Arc<SharedState>,
    kind: MediaKind,
    task_rx: SharedTaskReceiver,
    result_tx: mpsc::Sender<Fragment>,
    strip_sidx: bool,
}

enum FetchOutcome {
    Published(Fragment),
    Retry,
    ExitClean,
}

impl FragmentWorker {
    pub fn new(
        client: Client,
        metadata_client: Arc<dyn MetadataClient>,
        state: Arc<SharedState>,
        kind: MediaKind,
        task_rx: SharedTaskReceiver,
        result_tx: mpsc::Sender<Fragment>,
        strip_sidx: bool,
    ) -> Self {
        Self {
            client,
            metadata_client,
            state,
            kind,
            task_rx,
            result_tx,
            strip_sidx,
        }
    }

    pub async fn run(mut self) -> WorkerExitReason {
        let mut frag_tries: u32 = 0;

        'acquire: loop {
            if self.state.is_stopping().await {
                return self.finish(WorkerExitReason::Stopping).await;
            }

            let target_duration = self.state.target_duration().await;
            let task = match tokio::time::timeout(target_duration, self.recv_task()).await {
                Ok(Some(task)) => {
                    frag_tries = 0;
                    task
                }
                Ok(None) => return self.finish(WorkerExitReason::Drained).await,
                Err(_elapsed) => {
                    frag_tries += 1;
                    if frag_tries < FRAG_MAX_TRIES {
                        continue 'acquire;
                    }
                    if self.state.active_workers(self.kind).await > 1 {
                        return self.finish(WorkerExitReason::AvoidingNetworkStorm).await;
                    }
                    if self.state.is_live().await {
                        let _ = self.state.refresh_metadata(self.metadata_client.as_ref()).await;
                    }
                    if self.state.is_live().await {
                        frag_tries = 0;
                        continue 'acquire;
                    }
                    return self.finish(WorkerExitReason::NotLive).await;
                }
            };

            if task.known_max >= 0 && !self.state.is_live().await && task.seq >= task.known_max as u64
            {
                return self.finish(WorkerExitReason::Drained).await;
            }

            match self.run_fragment(task).await {
                Some(WorkerExitReason::Drained) => {
                    return self.finish(WorkerExitReason::Drained).await
                }
                Some(reason) => return self.finish(reason).await,
                None => continue 'acquire,
            }
        }
    }

    async fn recv_task(&self) -> Option<FragmentTask> {
        self.task_rx.lock().await.recv().await
    }

    /// Drive the per-seq retry loop (spec.md §4.5 steps 4-6) to completion:
    /// either the fragment is published, or the worker decides to exit.
    /// Returns `None` when the caller should move on to the next seq.
    async fn run_fragment(&mut self, task: FragmentTask) -> Option<WorkerExitReason> {
        let mut full_retries = FULL_RETRIES_BUDGET;

        loop {
            let mut seq_tries: u32 = 0;
            loop {
                if self.state.is_stopping().await {
                    return Some(WorkerExitReason::Stopping);
                }

                match self.attempt_fetch(task).await {
                    FetchOutcome::Published(fragment) => {
                        if self.result_tx.send(fragment).await.is_err() {
                            return Some(WorkerExitReason::Stopping);
                        }
                        return None;
                    }
                    FetchOutcome::ExitClean => return Some(WorkerExitReason::Drained),
                    FetchOutcome::Retry => {
                        seq_tries += 1;
                        if seq_tries < FRAG_MAX_TRIES {
                            continue;
                        }
                        break;
                    }
                }
            }

            full_retries -= 1;
            let close_to_end = task.known_max >= 0
                && task.seq >= (task.known_max as u64).saturating_sub(2);
            if full_retries > 0 && !close_to_end {
                continue;
            }

            if self.state.is_unavailable().await {
                return Some(WorkerExitReason::NotLive);
            }
            if self.state.is_live().await {
                full_retries = FULL_RETRIES_BUDGET;
                continue;
            }
            return Some(WorkerExitReason::NotLive);
        }
    }

    /// One HTTP GET for `task.seq` plus its immediate outcome classification
    /// (spec.md §4.5 step 5). Does not itself loop or count retries.
    async fn attempt_fetch(&mut self, task: FragmentTask) -> FetchOutcome {
        let Some(template) = self.state.current_url(self.kind).await else {
            return FetchOutcome::Retry;
        };
        let url = template.url_for_seq(task.seq);
        let target_duration = self.state.target_duration().await;

        let response = match self
            .client
            .get(&url)
            .timeout(target_duration * 2)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(err) => {
                debug!(seq = task.seq, error = %err, "fragment request failed");
                tokio::time::sleep(target_duration).await;
                return FetchOutcome::Retry;
            }
        };

        match response.status() {
            StatusCode::FORBIDDEN => {
                warn!(seq = task.seq, "fragment URL rejected with 403, refreshing");
                if self
                    .state
                    .adopt_if_newer(self.kind, &template.template)
                    .await
                    .is_some()
                {
                    debug!(seq = task.seq, "shared URL already refreshed by another worker");
                } else {
                    let _ = self
                        .state
                        .refresh_metadata(self.metadata_client.as_ref())
                        .await;
                }
                FetchOutcome::Retry
            }
            StatusCode::NOT_FOUND => {
                let near_end = task.known_max >= 0
                    && !self.state.is_live().await
                    && task.seq >= (task.known_max as u64).saturating_sub(2);
                if near_end {
                    FetchOutcome::ExitClean
                } else {
                    tokio::time::sleep(target_duration).await;
                    FetchOutcome::Retry
                }
            }
            status if status.is_success() => {
                let x_head_seqnum = response
                    .headers()
                    .get(X_HEAD_SEQNUM)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<i64>().ok())
                    .unwrap_or(-1);

                match self.buffer_body(response).await {
                    Ok(data) if !data.is_empty() => FetchOutcome::Published(Fragment {
                        seq: task.seq,
                        x_head_seqnum,
                        data,
                    }),
                    Ok(_) => {
                        tokio::time::sleep(target_duration).await;
                        FetchOutcome::Retry
                    }
                    Err(err) => {
                        debug!(seq = task.seq, error = %err, "error reading fragment body");
                        FetchOutcome::Retry
                    }
                }
            }
            other => {
                debug!(seq = task.seq, status = %other, "unexpected fragment status");
                tokio::time::sleep(target_duration).await;
                FetchOutcome::Retry
            }
        }
    }

    /// Stream the response body in `BUF_SIZE` chunks, applying the sidx
    /// fix-up to the first chunk only (spec.md §4.4 "Sidx fix-up").
    async fn buffer_body(&self, response: reqwest::Response) -> Result<bytes::Bytes, DownloadError> {
        let strip_sidx = self.strip_sidx;
        let mut stream = response.bytes_stream();
        let mut buf = BytesMut::new();
        let mut first_chunk = true;

        while let Some(chunk) = stream.next().await {
            let mut chunk = chunk?;
            if first_chunk && strip_sidx && chunk.len() >= 8 {
                chunk = remove_sidx(&chunk);
            }
            first_chunk = false;
            buf.extend_from_slice(&chunk);
            // Chunk size is governed by reqwest/hyper's own read buffer;
            // BUF_SIZE here only bounds how much we hold before a yield
            // point, matching spec.md's "8 KiB chunks" intent.
            if buf.len() >= BUF_SIZE {
                tokio::task::yield_now().await;
            }
        }

        Ok(buf.freeze())
    }

    async fn finish(self, reason: WorkerExitReason) -> WorkerExitReason {
        let remaining = self.state.active_workers(self.kind).await.saturating_sub(1);
        self.state.set_active_workers(self.kind, remaining).await;
        debug!(kind = self.kind.as_str(), ?reason, "worker exiting");
        reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use std::sync::Arc as StdArc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn worker_exits_drained_when_task_channel_closes() {
        let dir = tempdir().unwrap();
        let state = SharedState::new("abc123xyz99".to_string(), StdArc::new(SessionConfig::default()), dir.path());

        struct NoopClient;
        #[async_trait::async_trait]
        impl MetadataClient for NoopClient {
            async fn fetch_player_response(
                &self,
                _video_id: &str,
            ) -> Result<crate::metadata::PlayerResponse, DownloadError> {
                unreachable!("not exercised in this test")
            }
            async fn fetch_dash_manifest(&self, _url: &str) -> Result<String, DownloadError> {
                unreachable!("not exercised in this test")
            }
        }

        let (task_tx, task_rx) = mpsc::channel(4);
        let (result_tx, _result_rx) = mpsc::channel(4);
        drop(task_tx);

        let worker = FragmentWorker::new(
            Client::new(),
            StdArc::new(NoopClient),
            state,
            MediaKind::Video,
            StdArc::new(tokio::sync::Mutex::new(task_rx)),
            result_tx,
            true,
        );

        let reason = worker.run().await;
        assert_eq!(reason, WorkerExitReason::Drained);
    }
}
