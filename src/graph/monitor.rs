//! State Monitor (C6): aggregates the latest status from every upstream node
//! into one authoritative `StreamState`.
//!
//! No prior analogue in `player/playback_engine.rs`, which reports player
//! state straight from a single `PlaybackEngine` since it never has more
//! than one active node. The aggregation rule here: the sink's state
//! dominates whenever it isn't ERROR, and otherwise the earliest upstream
//! ERROR (source, then decoder, then switcher) wins. Blocking subscribers
//! are served through `tokio::sync::watch`, which already coalesces updates
//! for a slow consumer -- exactly the behavior a blocking `wait_state` needs.

use tokio::sync::watch;

use crate::graph::NodeStatusReceiver;
use crate::types::{AudioGraphNodeState, StreamState};

pub struct StateMonitor {
    state_tx: watch::Sender<Option<StreamState>>,
    state_rx: watch::Receiver<Option<StreamState>>,
}

impl StateMonitor {
    pub fn new() -> Self {
        let (state_tx, state_rx) = watch::channel(None);
        Self { state_tx, state_rx }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<StreamState>> {
        self.state_rx.clone()
    }

    /// Recomputes and publishes the aggregate state from the current values
    /// on each node's channel. Call this whenever any node's `watch` fires.
    pub fn recompute(
        &self,
        source: &NodeStatusReceiver,
        decoder: &NodeStatusReceiver,
        switcher: &NodeStatusReceiver,
        sink: &NodeStatusReceiver,
    ) {
        let source = source.borrow();
        let decoder = decoder.borrow();
        let switcher = switcher.borrow();
        let sink = sink.borrow();

        let (state, message) = if sink.state != AudioGraphNodeState::Error {
            (sink.state, sink.message.clone())
        } else if source.state == AudioGraphNodeState::Error {
            (AudioGraphNodeState::Error, source.message.clone())
        } else if decoder.state == AudioGraphNodeState::Error {
            (AudioGraphNodeState::Error, decoder.message.clone())
        } else if switcher.state == AudioGraphNodeState::Error {
            (AudioGraphNodeState::Error, switcher.message.clone())
        } else {
            (sink.state, sink.message.clone())
        };

        // The switcher republishes `stream_info` itself at every SOURCE_CHANGED
        // boundary (including gapless auto-promotion), so it is the freshest
        // source; the decoder's own value only matters before the switcher has
        // picked the track up.
        let stream_info = switcher.stream_info.or(decoder.stream_info);

        let mut next = StreamState::now(state, sink.position_ms);
        next.stream_info = stream_info;
        next.message = message;
        self.state_tx.send(Some(next)).ok();
    }

    /// Publishes a terminal sentinel and wakes any blocking `wait_state`
    /// caller for the last time.
    pub fn stop(&self) {
        self.state_tx.send_modify(|current| {
            if let Some(state) = current {
                state.state = AudioGraphNodeState::Stopped;
            }
        });
    }
}

impl Default for StateMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{node_status_channel, NodeStatus};

    #[test]
    fn sink_state_dominates_when_not_error() {
        let monitor = StateMonitor::new();
        let (source_tx, source_rx) = node_status_channel();
        let (decoder_tx, decoder_rx) = node_status_channel();
        let (switcher_tx, switcher_rx) = node_status_channel();
        let (sink_tx, sink_rx) = node_status_channel();

        source_tx.send(NodeStatus::new(AudioGraphNodeState::Streaming)).ok();
        decoder_tx.send(NodeStatus::new(AudioGraphNodeState::Streaming)).ok();
        switcher_tx.send(NodeStatus::new(AudioGraphNodeState::Streaming)).ok();
        sink_tx.send(NodeStatus::new(AudioGraphNodeState::Paused)).ok();

        monitor.recompute(&source_rx, &decoder_rx, &switcher_rx, &sink_rx);
        let observed = monitor.subscribe().borrow().clone().unwrap();
        assert_eq!(observed.state, AudioGraphNodeState::Paused);
    }

    #[test]
    fn earliest_upstream_error_wins_when_sink_is_error() {
        let monitor = StateMonitor::new();
        let (source_tx, source_rx) = node_status_channel();
        let (decoder_tx, decoder_rx) = node_status_channel();
        let (switcher_tx, switcher_rx) = node_status_channel();
        let (sink_tx, sink_rx) = node_status_channel();

        source_tx.send(NodeStatus::error("transport down")).ok();
        decoder_tx.send(NodeStatus::error("decode failed")).ok();
        switcher_tx.send(NodeStatus::new(AudioGraphNodeState::Streaming)).ok();
        sink_tx.send(NodeStatus::error("device underrun")).ok();

        monitor.recompute(&source_rx, &decoder_rx, &switcher_rx, &sink_rx);
        let observed = monitor.subscribe().borrow().clone().unwrap();
        assert_eq!(observed.state, AudioGraphNodeState::Error);
        assert_eq!(observed.message.as_deref(), Some("transport down"));
    }
}
