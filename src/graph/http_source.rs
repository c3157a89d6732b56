//! HTTP Source Node (C2): downloads a URL into a Stream Buffer on a
//! dedicated task.
//!
//! Grounded on `commands/playback.rs`'s `get_stream_info`/`download_and_stream`
//! (a `lazy_static` `reqwest::Client`, `response.bytes_stream()` pushed chunk
//! by chunk), generalized from its fixed-delay 3-retry HEAD-probe loop into
//! bounded exponential backoff with a total wall-time budget.

use std::time::{Duration, Instant};

use futures_util::StreamExt;
use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::graph::stream_buffer::StreamBuffer;
use crate::graph::{node_status_channel, NodeStatus, NodeStatusReceiver, NodeStatusSender};
use crate::types::AudioGraphNodeState;

pub struct HttpSource {
    status_tx: NodeStatusSender,
    status_rx: NodeStatusReceiver,
}

impl HttpSource {
    pub fn new() -> Self {
        let (status_tx, status_rx) = node_status_channel();
        Self { status_tx, status_rx }
    }

    pub fn status(&self) -> NodeStatusReceiver {
        self.status_rx.clone()
    }

    /// HTTP >= 400 on the initial response is fatal (no retry). Transient
    /// failures (connect errors, mid-body stream errors) are retried with
    /// bounded exponential backoff: at least 3 attempts, total wall time
    /// capped at `config.http_retry_total_budget`. Never retries once the
    /// buffer has been cancelled.
    pub fn fetch(
        &self,
        client: reqwest::Client,
        url: String,
        buffer: StreamBuffer,
        config: EngineConfig,
    ) -> JoinHandle<()> {
        let status_tx = self.status_tx.clone();
        tokio::spawn(async move {
            status_tx.send(NodeStatus::new(AudioGraphNodeState::Preparing)).ok();
            let start = Instant::now();
            let mut attempt: u32 = 0;

            loop {
                if buffer.is_cancelled() {
                    status_tx.send(NodeStatus::new(AudioGraphNodeState::Stopped)).ok();
                    return;
                }
                attempt += 1;

                let request = client
                    .get(&url)
                    .timeout(config.http_idle_timeout)
                    .build();
                let request = match request {
                    Ok(r) => r,
                    Err(e) => {
                        let err = EngineError::Transport(format!("failed to build request: {e}"));
                        status_tx.send(NodeStatus::error(err.node_state_message())).ok();
                        return;
                    }
                };

                match client.execute(request).await {
                    Ok(response) if response.status().as_u16() >= 400 => {
                        log::warn!("http source: fatal status {} for {url}", response.status());
                        let err = EngineError::Transport(format!("http status {}", response.status()));
                        status_tx.send(NodeStatus::error(err.node_state_message())).ok();
                        buffer.cancel();
                        return;
                    }
                    Ok(response) => {
                        status_tx.send(NodeStatus::new(AudioGraphNodeState::Streaming)).ok();
                        let mut stream = response.bytes_stream();
                        let mut stream_failed = false;
                        while let Some(next) = stream.next().await {
                            match next {
                                Ok(bytes) => {
                                    // Writing blocks on the buffer's condvar when it's
                                    // full; run it on the blocking pool so a slow
                                    // decoder never parks this task's tokio worker
                                    // thread.
                                    let write_buffer = buffer.clone();
                                    let write_result = tokio::task::spawn_blocking(move || {
                                        write_buffer.write(&bytes)
                                    })
                                    .await;
                                    match write_result {
                                        Ok(Ok(_)) => {}
                                        Ok(Err(e)) => {
                                            log::info!("http source: buffer cancelled during write: {e}");
                                            status_tx.send(NodeStatus::new(AudioGraphNodeState::Stopped)).ok();
                                            return;
                                        }
                                        Err(e) => {
                                            log::warn!("http source: write task failed: {e}");
                                            return;
                                        }
                                    }
                                }
                                Err(e) => {
                                    log::warn!("http source: stream error: {e}");
                                    stream_failed = true;
                                    break;
                                }
                            }
                        }
                        if !stream_failed {
                            buffer.close_writer();
                            status_tx.send(NodeStatus::new(AudioGraphNodeState::Finished)).ok();
                            return;
                        }
                        // fall through to retry
                    }
                    Err(e) => {
                        log::warn!("http source: request error: {e}");
                    }
                }

                let elapsed = start.elapsed();
                if attempt >= config.http_retry_attempts && elapsed >= config.http_retry_total_budget
                {
                    let err = EngineError::Transport("retries exhausted".to_string());
                    status_tx.send(NodeStatus::error(err.node_state_message())).ok();
                    buffer.cancel();
                    return;
                }
                let remaining_budget = config.http_retry_total_budget.saturating_sub(elapsed);
                if remaining_budget.is_zero() {
                    let err = EngineError::Transport("retry budget exhausted".to_string());
                    status_tx.send(NodeStatus::error(err.node_state_message())).ok();
                    buffer.cancel();
                    return;
                }
                let backoff = Duration::from_millis(200 * 2u64.saturating_pow(attempt.saturating_sub(1)))
                    .min(remaining_budget);
                tokio::time::sleep(backoff).await;
            }
        })
    }
}

impl Default for HttpSource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fatal_status_does_not_retry() {
        let source = HttpSource::new();
        let buffer = StreamBuffer::new(crate::config::MIN_BUFFER_CAPACITY_BYTES);
        let client = reqwest::Client::new();
        let handle = source.fetch(
            client,
            "http://127.0.0.1:1/not-a-real-server".to_string(),
            buffer.clone(),
            EngineConfig {
                http_retry_attempts: 3,
                http_retry_total_budget: Duration::from_millis(500),
                http_connect_timeout: Duration::from_millis(100),
                http_idle_timeout: Duration::from_millis(100),
                ..Default::default()
            },
        );
        handle.await.unwrap();
        let mut status = source.status();
        status.changed().await.ok();
        assert!(matches!(status.borrow().state, AudioGraphNodeState::Error) || buffer.is_cancelled());
    }
}
