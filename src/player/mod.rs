//! Audio Player (C7): owns one instance of the graph (C1-C6) and exposes an
//! infallible play/pause/stop/seek surface.
//!
//! Grounded on `player/mod.rs`'s old `Player`/`SharedState` pair (one
//! `rodio::Sink` driven from a handful of Tauri commands, with a background
//! task translating device state into `PlaybackEvent`s), rebuilt around the
//! new graph modules: a track is "staged" by spinning up a fresh
//! `HttpSource`/`FlacDecoder` pair per call instead of decoding a whole file
//! up front, and a background task takes over the old `PlaybackEvent`
//! broadcaster's job of folding every node's status into one `StreamState`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread;

use tokio::sync::watch;

use crate::config::EngineConfig;
use crate::graph::decoder::FlacDecoder;
use crate::graph::http_source::HttpSource;
use crate::graph::monitor::StateMonitor;
use crate::graph::sink::OutputSink;
use crate::graph::stream_buffer::StreamBuffer;
use crate::graph::switcher::{SharedSwitcher, StreamSwitcher};
use crate::graph::{node_status_channel, NodeStatusReceiver};
use crate::types::{AudioGraphNodeState, StreamFormat, StreamState, TrackUrl};

/// The command surface C8 drives. A trait rather than a concrete dependency
/// so the queue controller can be exercised against a fake in tests without
/// touching a real network or audio device.
pub trait Transport: Send + Sync {
    fn play(&self, url: TrackUrl);
    fn play_next(&self, url: TrackUrl);
    fn pause(&self, paused: bool);
    fn stop(&self);
    fn seek(&self, position_ms: u64);
    fn get_state(&self) -> StreamState;
    fn monitor(&self) -> StateMonitorHandle;
}

/// A subscription to the aggregate `StreamState`: `wait_state()` blocks
/// until a new state arrives or `stop()` is called. `tokio::sync::watch`
/// already coalesces a slow consumer down to the latest value, which is
/// exactly that contract.
#[derive(Clone)]
pub struct StateMonitorHandle {
    rx: watch::Receiver<Option<StreamState>>,
}

impl StateMonitorHandle {
    /// Wraps an existing `watch::Receiver`. Exposed crate-wide so tests can
    /// hand a queue controller a fake transport's own state channel without
    /// going through a real `AudioPlayer`.
    pub(crate) fn new(rx: watch::Receiver<Option<StreamState>>) -> Self {
        Self { rx }
    }

    /// Waits for the next published state. Returns `None` once the sender
    /// side is gone (the player was dropped) and will never fire again.
    pub async fn wait_state(&mut self) -> Option<StreamState> {
        if self.rx.changed().await.is_err() {
            return None;
        }
        self.rx.borrow().clone()
    }

    pub fn current(&self) -> Option<StreamState> {
        self.rx.borrow().clone()
    }
}

/// One tracked pair of upstream status channels: the source and decoder for
/// whichever track context the monitor should currently be aggregating.
type NodeRxPair = (NodeStatusReceiver, NodeStatusReceiver);

/// Owns the graph for one playback session. `play`/`play_next` each start a
/// fresh HTTP download and decode on their own thread/task; the switcher and
/// sink are long-lived and carry every track across the session.
pub struct AudioPlayer {
    config: EngineConfig,
    client: reqwest::Client,
    switcher: SharedSwitcher,
    sink: Mutex<OutputSink>,
    monitor: StateMonitor,
    sink_rx: NodeStatusReceiver,
    switcher_rx: NodeStatusReceiver,
    node_rxs: Mutex<NodeRxPair>,
    pending_next_rxs: Mutex<Option<NodeRxPair>>,
    /// The `StreamBuffer` feeding whichever source/decoder pair is currently
    /// `current`. Cancelled whenever `play()` supersedes it before it runs
    /// dry on its own, so the HTTP task feeding it unblocks instead of
    /// writing into a buffer nobody drains.
    current_buffer: Mutex<Option<StreamBuffer>>,
    /// The `StreamBuffer` feeding a staged-but-not-yet-promoted `next`.
    /// Cancelled whenever a later `play()`/`play_next()` replaces it.
    pending_next_buffer: Mutex<Option<StreamBuffer>>,
    sink_started: AtomicBool,
    self_weak: Mutex<Weak<AudioPlayer>>,
}

impl AudioPlayer {
    /// `device_name` is passed straight to the sink; `None` selects the host's
    /// default output device.
    pub fn new(device_name: Option<String>, config: EngineConfig) -> Arc<Self> {
        let switcher = SharedSwitcher::new(StreamSwitcher::new());
        let sink = OutputSink::new(device_name, config.clone());
        let switcher_rx = switcher.status();
        let sink_rx = sink.status();
        let monitor = StateMonitor::new();
        let (_dummy_tx, dummy_rx) = node_status_channel();

        // Connect and idle read timeouts are both per spec.md §5's "HTTP uses
        // per-request timeouts (connect and idle read, each <= 5s default,
        // configurable)" -- the idle/total timeout is applied per-request in
        // `HttpSource::fetch`, the connect timeout belongs on the client itself.
        let client = reqwest::Client::builder()
            .connect_timeout(config.http_connect_timeout)
            .build()
            .unwrap_or_else(|e| {
                log::error!("failed to build http client with connect_timeout, using default: {e}");
                reqwest::Client::new()
            });

        let player = Arc::new_cyclic(|weak| AudioPlayer {
            config,
            client,
            switcher,
            sink: Mutex::new(sink),
            monitor,
            sink_rx,
            switcher_rx,
            node_rxs: Mutex::new((dummy_rx.clone(), dummy_rx)),
            pending_next_rxs: Mutex::new(None),
            current_buffer: Mutex::new(None),
            pending_next_buffer: Mutex::new(None),
            sink_started: AtomicBool::new(false),
            self_weak: Mutex::new(weak.clone()),
        });

        Self::spawn_aggregator(&player);
        player
    }

    /// Recomputes the aggregate `StreamState` whenever any upstream node
    /// publishes, and re-points the tracked source/decoder pair at a staged
    /// `next` the moment the switcher promotes it -- the only way the
    /// aggregator learns about a gapless handover that happened without any
    /// new command coming in.
    fn spawn_aggregator(player: &Arc<Self>) {
        let weak = Arc::downgrade(player);
        tokio::spawn(async move {
            loop {
                let Some(player) = weak.upgrade() else { return };
                let (mut source_rx, mut decoder_rx) = {
                    let guard = player.node_rxs.lock().unwrap();
                    guard.clone()
                };
                let mut switcher_rx = player.switcher_rx.clone();
                let mut sink_rx = player.sink_rx.clone();

                tokio::select! {
                    r = source_rx.changed() => { if r.is_err() { return; } }
                    r = decoder_rx.changed() => { if r.is_err() { return; } }
                    r = switcher_rx.changed() => {
                        if r.is_err() { return; }
                        if switcher_rx.borrow().state == AudioGraphNodeState::SourceChanged {
                            if let Some(pending) = player.pending_next_rxs.lock().unwrap().take() {
                                *player.node_rxs.lock().unwrap() = pending;
                                // This SOURCE_CHANGED is a natural gapless
                                // promotion (a staged `next` existed): the
                                // track that was `current` already ran dry on
                                // its own, so its buffer needs no explicit
                                // cancel -- just hand the tracking slot to
                                // whatever was staged as `next`. An explicit
                                // `play()` jump already cleared both pending
                                // slots itself in `stage`, so this branch
                                // never runs for that case.
                                let promoted = player.pending_next_buffer.lock().unwrap().take();
                                *player.current_buffer.lock().unwrap() = promoted;
                            }
                        }
                    }
                    r = sink_rx.changed() => { if r.is_err() { return; } }
                }

                let (source_rx, decoder_rx) = {
                    let guard = player.node_rxs.lock().unwrap();
                    guard.clone()
                };
                player
                    .monitor
                    .recompute(&source_rx, &decoder_rx, &player.switcher_rx, &player.sink_rx);
            }
        });
    }

    fn stage(&self, url: TrackUrl, is_current: bool) {
        let buffer = StreamBuffer::new(self.config.stream_buffer_capacity_bytes());
        let http_source = HttpSource::new();
        let decoder = FlacDecoder::new();
        let source_rx = http_source.status();
        let decoder_rx = decoder.status();

        if is_current {
            // `play(new_url)` implicitly cancels the prior source: whatever
            // was `current` (and any not-yet-promoted `next`) is superseded
            // outright, so both of their buffers need cancelling or their
            // HTTP tasks block forever writing into an orphaned ring.
            if let Some(old) = self.current_buffer.lock().unwrap().replace(buffer.clone()) {
                old.cancel();
            }
            if let Some(old_next) = self.pending_next_buffer.lock().unwrap().take() {
                old_next.cancel();
            }
            *self.node_rxs.lock().unwrap() = (source_rx, decoder_rx);
            *self.pending_next_rxs.lock().unwrap() = None;
        } else {
            // `play_next(new_url)` only replaces a previously staged `next`.
            if let Some(old_next) = self.pending_next_buffer.lock().unwrap().replace(buffer.clone()) {
                old_next.cancel();
            }
            *self.pending_next_rxs.lock().unwrap() = Some((source_rx, decoder_rx));
        }

        http_source.fetch(self.client.clone(), url.url.clone(), buffer.clone(), self.config.clone());

        let switcher = self.switcher.clone();
        let weak = self.self_weak.lock().unwrap().clone();
        let format_hint = url.format.clone();
        thread::spawn(move || match decoder.open(buffer, &format_hint) {
            Ok(source) => {
                let info = source.stream_info();
                if is_current {
                    switcher.set_current(source);
                    if let Some(player) = weak.upgrade() {
                        player.ensure_sink_started(info.format);
                    }
                } else {
                    switcher.set_next(source);
                }
            }
            Err(e) => {
                log::warn!(
                    "{} failed to open decoder for {}: {e}",
                    if is_current { "play" } else { "play_next" },
                    url.url
                );
            }
        });
    }

    fn ensure_sink_started(&self, format: StreamFormat) {
        if !self.sink_started.swap(true, Ordering::SeqCst) {
            if let Err(e) = self.sink.lock().unwrap().start(self.switcher.clone(), format) {
                log::error!("failed to start output sink: {e}");
                self.sink_started.store(false, Ordering::SeqCst);
            }
        }
    }
}

impl Transport for AudioPlayer {
    /// Stops whatever is playing and stages `url` as `current`.
    fn play(&self, url: TrackUrl) {
        self.stage(url, true);
    }

    /// Stages `url` as `next`, for gapless handover once `current` finishes.
    fn play_next(&self, url: TrackUrl) {
        self.stage(url, false);
    }

    fn pause(&self, paused: bool) {
        self.sink.lock().unwrap().pause(paused);
    }

    fn stop(&self) {
        // Cancels all in-flight operations on the current source via buffer
        // cancel, per spec.md §5 -- otherwise the HTTP task(s) feeding it
        // block forever writing into a ring nobody drains anymore.
        if let Some(buffer) = self.current_buffer.lock().unwrap().take() {
            buffer.cancel();
        }
        if let Some(buffer) = self.pending_next_buffer.lock().unwrap().take() {
            buffer.cancel();
        }
        self.switcher.clear();
        self.sink.lock().unwrap().stop();
        self.sink_started.store(false, Ordering::SeqCst);
    }

    fn seek(&self, position_ms: u64) {
        if let Err(e) = self.sink.lock().unwrap().seek(position_ms) {
            log::warn!("seek rejected: {e}");
        }
    }

    fn get_state(&self) -> StreamState {
        self.monitor
            .subscribe()
            .borrow()
            .clone()
            .unwrap_or_else(|| StreamState::now(AudioGraphNodeState::Stopped, 0))
    }

    fn monitor(&self) -> StateMonitorHandle {
        StateMonitorHandle {
            rx: self.monitor.subscribe(),
        }
    }
}

impl Drop for AudioPlayer {
    fn drop(&mut self) {
        self.monitor.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_player_starts_stopped_with_no_stream_info() {
        let player = AudioPlayer::new(None, EngineConfig::default());
        let state = player.get_state();
        assert_eq!(state.state, AudioGraphNodeState::Stopped);
        assert!(state.stream_info.is_none());
    }

    #[tokio::test]
    async fn seek_on_an_idle_player_logs_and_does_not_panic() {
        let player = AudioPlayer::new(None, EngineConfig::default());
        player.seek(1000);
    }

    #[test]
    fn transport_is_object_safe() {
        fn assert_object_safe(_: &dyn Transport) {}
        let player = AudioPlayer::new(None, EngineConfig::default());
        assert_object_safe(player.as_ref());
    }
}
