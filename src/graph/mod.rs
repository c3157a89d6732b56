//! The audio processing graph: C1 (Stream Buffer) through C6 (State Monitor).
//!
//! Control flow: C2 -> C1 -> C3 -> C4 -> C5; state flows back C5/C4/C3/C2 -> C6.

pub mod decoder;
pub mod http_source;
pub mod monitor;
pub mod sink;
pub mod stream_buffer;
pub mod switcher;

use tokio::sync::watch;

use crate::types::{AudioGraphNodeState, StreamInfo};

/// The status every graph node (C2-C5) publishes on its own `watch` channel.
/// `watch` is the idiomatic Rust analogue of a version-stamped slot plus a
/// condition variable: a slow subscriber only ever observes the latest
/// value, never a stale one it has already seen.
#[derive(Debug, Clone)]
pub struct NodeStatus {
    pub state: AudioGraphNodeState,
    pub message: Option<String>,
    pub stream_info: Option<StreamInfo>,
    pub position_ms: u64,
}

impl NodeStatus {
    pub fn new(state: AudioGraphNodeState) -> Self {
        Self {
            state,
            message: None,
            stream_info: None,
            position_ms: 0,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            state: AudioGraphNodeState::Error,
            message: Some(message.into()),
            stream_info: None,
            position_ms: 0,
        }
    }
}

pub type NodeStatusSender = watch::Sender<NodeStatus>;
pub type NodeStatusReceiver = watch::Receiver<NodeStatus>;

pub fn node_status_channel() -> (NodeStatusSender, NodeStatusReceiver) {
    watch::channel(NodeStatus::new(AudioGraphNodeState::Stopped))
}
