//! Engine-wide tunables. Grounded on the shape of the `config/*_settings.rs`
//! modules, generalized away from their rusqlite-backed, Tauri-command-driven
//! persistence -- configuration loading is left to the embedding
//! application -- down to the in-process defaults the graph and queue need.

use std::time::Duration;

/// Floor enforced by `StreamBuffer::new` regardless of the requested capacity.
pub const MIN_BUFFER_CAPACITY_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Stream buffer capacity between the HTTP source and the decoder.
    /// Default is enough for roughly 10s of a typical hi-res FLAC stream.
    pub stream_buffer_capacity_bytes: usize,
    pub http_connect_timeout: Duration,
    pub http_idle_timeout: Duration,
    pub http_retry_attempts: u32,
    pub http_retry_total_budget: Duration,
    /// Lead time, before a track's end, at which the queue schedules prefetch.
    pub prefetch_lead_ms: u64,
    /// Bound on how long the sink waits for the device to drain on stop().
    pub device_drain_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stream_buffer_capacity_bytes: 1024 * 1024,
            http_connect_timeout: Duration::from_secs(5),
            http_idle_timeout: Duration::from_secs(5),
            http_retry_attempts: 3,
            http_retry_total_budget: Duration::from_secs(10),
            prefetch_lead_ms: 5000,
            device_drain_timeout: Duration::from_secs(1),
        }
    }
}

impl EngineConfig {
    pub fn stream_buffer_capacity_bytes(&self) -> usize {
        self.stream_buffer_capacity_bytes.max(MIN_BUFFER_CAPACITY_BYTES)
    }
}
