//! Stream Switcher (C4): holds at most two decoded sources, `current` and
//! `next`, and hands playback over from one to the other with zero gap.
//!
//! No prior analogue in `player/playback_engine.rs`, which always plays one
//! whole file at a time through a single `PlaybackEngine`; built from scratch
//! around the same `rodio::Source`/`watch` vocabulary the rest of the graph
//! uses. The switcher itself is a `rodio::Source` that pulls from `current`
//! and, the instant `current`'s iterator is exhausted, promotes `next` (if
//! present) in its place and republishes `SOURCE_CHANGED` -- no silence is
//! ever produced in between.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rodio::Source;

use crate::graph::decoder::DecoderSource;
use crate::graph::{node_status_channel, NodeStatus, NodeStatusReceiver, NodeStatusSender};
use crate::types::{AudioGraphNodeState, StreamInfo};

/// Shared handle used by the player (C7) to stage `next` ahead of time and by
/// the sink (C5) to pull samples. Swapping `next` into `current` happens on
/// the sink's pull thread, inside `Iterator::next`, so there is never a
/// window where both the old and new source are being read concurrently.
pub struct StreamSwitcher {
    current: Option<DecoderSource>,
    next: Option<DecoderSource>,
    status_tx: NodeStatusSender,
    status_rx: NodeStatusReceiver,
    position_ms: u64,
}

impl StreamSwitcher {
    pub fn new() -> Self {
        let (status_tx, status_rx) = node_status_channel();
        Self {
            current: None,
            next: None,
            status_tx,
            status_rx,
            position_ms: 0,
        }
    }

    pub fn status(&self) -> NodeStatusReceiver {
        self.status_rx.clone()
    }

    /// Replaces whatever is currently playing. Used for `play`/`play_next`
    /// jumps, not for the gapless handover path (that happens automatically
    /// when `current` finishes).
    pub fn set_current(&mut self, source: DecoderSource) {
        self.current = Some(source);
        self.next = None;
        self.position_ms = 0;
        self.status_tx
            .send(NodeStatus {
                state: AudioGraphNodeState::SourceChanged,
                message: None,
                stream_info: self.current_stream_info(),
                position_ms: 0,
            })
            .ok();
    }

    /// Stages the prefetched next track. At most one; a later call replaces
    /// whatever was staged before -- `current` and `next` together never
    /// hold more than two sources.
    pub fn set_next(&mut self, source: DecoderSource) {
        self.next = Some(source);
    }

    pub fn clear_next(&mut self) {
        self.next = None;
    }

    /// Drops both sources and publishes STOPPED. Used for the explicit stop
    /// command, as distinct from running out of tracks (which publishes
    /// FINISHED from `pull_sample`).
    pub fn clear(&mut self) {
        self.current = None;
        self.next = None;
        self.position_ms = 0;
        self.status_tx
            .send(NodeStatus::new(AudioGraphNodeState::Stopped))
            .ok();
    }

    pub fn has_next(&self) -> bool {
        self.next.is_some()
    }

    pub fn is_playing(&self) -> bool {
        self.current.is_some()
    }

    pub fn current_stream_info(&self) -> Option<StreamInfo> {
        self.current.as_ref().map(|c| c.stream_info())
    }

    pub fn position_ms(&self) -> u64 {
        self.position_ms
    }

    /// Pulls one sample from `current`, promoting `next` in its place on
    /// exhaustion. Returns `None` only once both `current` and `next` are
    /// empty. The returned flag is `true` exactly for the first sample
    /// pulled from a freshly promoted source -- the one instant a caller
    /// writing in chunks must flush and re-tag at, rather than at its own
    /// next chunk boundary, to honor the gapless format-change contract.
    fn pull_sample_with_boundary(&mut self) -> Option<(i16, bool)> {
        let mut promoted = false;
        loop {
            match self.current.as_mut() {
                Some(source) => match source.next() {
                    Some(sample) => return Some((sample, promoted)),
                    None => {
                        if let Some(next) = self.next.take() {
                            self.current = Some(next);
                            promoted = true;
                            self.status_tx
                                .send(NodeStatus {
                                    state: AudioGraphNodeState::SourceChanged,
                                    message: None,
                                    stream_info: self.current_stream_info(),
                                    position_ms: 0,
                                })
                                .ok();
                            continue;
                        }
                        self.current = None;
                        self.status_tx
                            .send(NodeStatus::new(AudioGraphNodeState::Finished))
                            .ok();
                        return None;
                    }
                },
                None => return None,
            }
        }
    }

    fn pull_sample(&mut self) -> Option<i16> {
        self.pull_sample_with_boundary().map(|(sample, _)| sample)
    }
}

impl Default for StreamSwitcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Iterator for StreamSwitcher {
    type Item = i16;

    fn next(&mut self) -> Option<i16> {
        self.pull_sample()
    }
}

impl Source for StreamSwitcher {
    fn current_frame_len(&self) -> Option<usize> {
        self.current.as_ref().and_then(|c| c.current_frame_len())
    }

    fn channels(&self) -> u16 {
        self.current.as_ref().map(|c| c.channels()).unwrap_or(2)
    }

    fn sample_rate(&self) -> u32 {
        self.current
            .as_ref()
            .map(|c| c.sample_rate())
            .unwrap_or(44100)
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

/// Shared handle to a `StreamSwitcher`, so the player (C7) can stage `next`
/// from its own task while the sink (C5) pulls samples from a dedicated
/// writer thread. Every method locks briefly and delegates; the lock is
/// never held across a blocking call, so staging never waits on playback.
#[derive(Clone)]
pub struct SharedSwitcher(Arc<Mutex<StreamSwitcher>>);

impl SharedSwitcher {
    pub fn new(switcher: StreamSwitcher) -> Self {
        Self(Arc::new(Mutex::new(switcher)))
    }

    pub fn status(&self) -> NodeStatusReceiver {
        self.0.lock().unwrap().status()
    }

    pub fn set_current(&self, source: DecoderSource) {
        self.0.lock().unwrap().set_current(source);
    }

    pub fn set_next(&self, source: DecoderSource) {
        self.0.lock().unwrap().set_next(source);
    }

    pub fn clear_next(&self) {
        self.0.lock().unwrap().clear_next();
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }

    pub fn has_next(&self) -> bool {
        self.0.lock().unwrap().has_next()
    }

    pub fn is_playing(&self) -> bool {
        self.0.lock().unwrap().is_playing()
    }

    pub fn current_stream_info(&self) -> Option<StreamInfo> {
        self.0.lock().unwrap().current_stream_info()
    }

    pub fn channels(&self) -> u16 {
        self.0.lock().unwrap().channels()
    }

    pub fn sample_rate(&self) -> u32 {
        self.0.lock().unwrap().sample_rate()
    }

    /// Pulls one sample, flagging whether it is the first sample of a
    /// gaplessly promoted source. The sink's writer thread uses this to
    /// flush and re-tag a partially filled chunk exactly at the boundary
    /// instead of at its own next chunk size, per the gapless contract.
    pub fn next_with_boundary(&mut self) -> Option<(i16, bool)> {
        self.0.lock().unwrap().pull_sample_with_boundary()
    }
}

impl Iterator for SharedSwitcher {
    type Item = i16;

    fn next(&mut self) -> Option<i16> {
        self.0.lock().unwrap().next()
    }
}

impl Source for SharedSwitcher {
    fn current_frame_len(&self) -> Option<usize> {
        self.0.lock().unwrap().current_frame_len()
    }

    fn channels(&self) -> u16 {
        self.0.lock().unwrap().channels()
    }

    fn sample_rate(&self) -> u32 {
        self.0.lock().unwrap().sample_rate()
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_switcher_yields_nothing() {
        let mut switcher = StreamSwitcher::new();
        assert!(!switcher.is_playing());
        assert_eq!(switcher.next(), None);
    }

    #[test]
    fn shared_switcher_delegates_through_lock() {
        let shared = SharedSwitcher::new(StreamSwitcher::new());
        assert!(!shared.is_playing());
        assert!(!shared.has_next());
        assert_eq!(shared.current_stream_info(), None);
    }
}
