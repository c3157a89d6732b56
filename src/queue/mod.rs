//! Play Queue Controller (C8): the brain. Owns the ordered track list, the
//! current index, the Prepared Map, the prefetch timer, and the single
//! command executor that is the sole mutator of all of it.
//!
//! Grounded on `playqueue.py`'s `PlayQueue`
//! class, translated from its `@enqueue`-decorated methods (each pushing a
//! closure onto `rpiasync.py`'s single-consumer queue) into a tagged
//! `Command` enum drained by one `tokio::spawn`ed task: a message-passing
//! channel whose consumer loop is the queue's sole mutator.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::{EventBus, EventPayload, EventTopic};
use crate::player::Transport;
use crate::types::{
    AudioGraphNodeState, LinkRetriever, PlayerState, PlayerStateName, StreamState, TrackInfo,
    TrackMetadata, TrackUrl,
};

/// The view returned by `get_track_info`: a track's metadata plus its
/// position in the queue and whether it is the one currently selected.
#[derive(Debug, Clone)]
pub struct QueuedTrackView {
    pub index: usize,
    pub selected: bool,
    pub metadata: Option<TrackMetadata>,
}

enum Command {
    Add(Vec<TrackInfo>),
    Remove(Vec<usize>),
    Clear,
    Play(Option<usize>),
    PlayNext(usize),
    Next,
    Prev,
    Pause(bool),
    Stop,
    Seek(u64),
    Replay,
    OnStreamState(StreamState),
}

/// Mutated only inside the executor task; other threads read a snapshot
/// through `Mutex::lock` rather than going through the command channel.
struct QueueState {
    tracks: Vec<TrackInfo>,
    current_index: usize,
    /// Insertion-ordered index -> resolved URL staged in the graph. A plain
    /// `Vec` rather than a map keeps the SOURCE_CHANGED handler's "pop the
    /// oldest entry" a one-line `remove(0)`.
    prepared: Vec<(usize, TrackUrl)>,
    prefetch_handle: Option<JoinHandle<()>>,
    last_state: PlayerState,
}

impl QueueState {
    fn new() -> Self {
        Self {
            tracks: Vec::new(),
            current_index: 0,
            prepared: Vec::new(),
            prefetch_handle: None,
            last_state: PlayerState {
                state: PlayerStateName::Stopped,
                current_track: None,
                index: None,
                position_ms: 0,
                message: None,
                audio_info: None,
                timestamp_ns: crate::clock::now_ns(),
            },
        }
    }
}

/// Public handle to the controller. Every mutating call is a fire-and-forget
/// send onto the executor's channel -- an infallible request, matching the
/// player's own play/pause/stop/seek surface.
pub struct PlayQueue {
    shared: Arc<Mutex<QueueState>>,
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl PlayQueue {
    pub fn new(player: Arc<dyn Transport>, bus: Arc<EventBus>, config: EngineConfig) -> Arc<Self> {
        let shared = Arc::new(Mutex::new(QueueState::new()));
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        spawn_executor(player.clone(), bus, shared.clone(), config, cmd_rx, cmd_tx.clone());
        spawn_state_watcher(player, cmd_tx.clone());

        Arc::new(Self { shared, cmd_tx })
    }

    fn send(&self, command: Command) {
        self.cmd_tx.send(command).ok();
    }

    pub fn add(&self, tracks: Vec<TrackInfo>) {
        self.send(Command::Add(tracks));
    }

    pub fn remove(&self, indices: Vec<usize>) {
        self.send(Command::Remove(indices));
    }

    pub fn clear(&self) {
        self.send(Command::Clear);
    }

    pub fn play(&self, index: Option<usize>) {
        self.send(Command::Play(index));
    }

    pub fn play_next(&self, index: usize) {
        self.send(Command::PlayNext(index));
    }

    pub fn next(&self) {
        self.send(Command::Next);
    }

    pub fn prev(&self) {
        self.send(Command::Prev);
    }

    pub fn pause(&self, paused: bool) {
        self.send(Command::Pause(paused));
    }

    pub fn stop(&self) {
        self.send(Command::Stop);
    }

    pub fn seek(&self, position_ms: u64) {
        self.send(Command::Seek(position_ms));
    }

    /// Re-broadcasts the current state and the full queue, for a newly
    /// connected subscriber.
    pub fn replay(&self) {
        self.send(Command::Replay);
    }

    /// Synchronous read; bypasses the executor since it never mutates state.
    pub fn list(&self, offset: usize, limit: usize) -> Vec<TrackMetadata> {
        let state = self.shared.lock().unwrap();
        state
            .tracks
            .iter()
            .skip(offset)
            .take(limit)
            .filter_map(|t| t.metadata.clone())
            .collect()
    }

    pub fn get_track_info(&self, index: usize) -> Option<QueuedTrackView> {
        let state = self.shared.lock().unwrap();
        let track = state.tracks.get(index)?;
        Some(QueuedTrackView {
            index,
            selected: index == state.current_index,
            metadata: track.metadata.clone(),
        })
    }

    pub fn get_state(&self) -> PlayerState {
        self.shared.lock().unwrap().last_state.clone()
    }
}

fn spawn_state_watcher(player: Arc<dyn Transport>, cmd_tx: mpsc::UnboundedSender<Command>) {
    tokio::spawn(async move {
        let mut monitor = player.monitor();
        while let Some(state) = monitor.wait_state().await {
            if cmd_tx.send(Command::OnStreamState(state)).is_err() {
                return;
            }
        }
    });
}

fn spawn_executor(
    player: Arc<dyn Transport>,
    bus: Arc<EventBus>,
    shared: Arc<Mutex<QueueState>>,
    config: EngineConfig,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    cmd_tx: mpsc::UnboundedSender<Command>,
) {
    tokio::spawn(async move {
        while let Some(command) = cmd_rx.recv().await {
            match command {
                Command::Add(tracks) => handle_add(&shared, &bus, tracks),
                Command::Remove(indices) => handle_remove(&player, &shared, &bus, indices),
                Command::Clear => handle_clear(&player, &shared, &bus),
                Command::Play(index) => handle_play(&player, &shared, &bus, index).await,
                Command::PlayNext(index) => handle_play_next(&player, &shared, index).await,
                Command::Next => {
                    let target = shared.lock().unwrap().current_index + 1;
                    handle_play(&player, &shared, &bus, Some(target)).await;
                }
                Command::Prev => {
                    let current = shared.lock().unwrap().current_index;
                    if let Some(target) = current.checked_sub(1) {
                        handle_play(&player, &shared, &bus, Some(target)).await;
                    }
                }
                Command::Pause(paused) => player.pause(paused),
                Command::Stop => {
                    player.stop();
                    cancel_prefetch_timer(&shared);
                }
                Command::Seek(position_ms) => player.seek(position_ms),
                Command::Replay => handle_replay(&shared, &bus),
                Command::OnStreamState(state) => {
                    handle_state_update(&shared, &bus, &cmd_tx, &config, state)
                }
            }
        }
    });
}

/// Runs the resolver on a blocking thread; resolvers typically make an HTTP
/// call and must never block the executor.
async fn resolve(resolver: LinkRetriever) -> Result<TrackUrl, EngineError> {
    match tokio::task::spawn_blocking(move || resolver()).await {
        Ok(result) => result,
        Err(e) => Err(EngineError::Resolution(format!("resolver task failed: {e}"))),
    }
}

fn handle_add(shared: &Arc<Mutex<QueueState>>, bus: &Arc<EventBus>, tracks: Vec<TrackInfo>) {
    if tracks.is_empty() {
        return;
    }
    let (was_empty, added_metadata, first_metadata) = {
        let mut state = shared.lock().unwrap();
        let was_empty = state.tracks.is_empty();
        let added_metadata: Vec<TrackMetadata> = tracks.iter().filter_map(|t| t.metadata.clone()).collect();
        state.tracks.extend(tracks);
        let first_metadata = state.tracks.first().and_then(|t| t.metadata.clone());
        (was_empty, added_metadata, first_metadata)
    };

    bus.dispatch(EventTopic::TracksAdded, EventPayload::TracksAdded(added_metadata));

    if was_empty {
        let initial = PlayerState {
            state: PlayerStateName::Stopped,
            current_track: first_metadata,
            index: Some(0),
            position_ms: 0,
            message: None,
            audio_info: None,
            timestamp_ns: crate::clock::now_ns(),
        };
        shared.lock().unwrap().last_state = initial.clone();
        bus.dispatch(EventTopic::StateChanged, EventPayload::State(initial));
    }
}

fn handle_remove(
    player: &Arc<dyn Transport>,
    shared: &Arc<Mutex<QueueState>>,
    bus: &Arc<EventBus>,
    mut indices: Vec<usize>,
) {
    indices.sort_unstable_by(|a, b| b.cmp(a));
    indices.dedup();
    if indices.is_empty() {
        return;
    }

    let (current_removed, new_state) = {
        let mut state = shared.lock().unwrap();
        let current_removed = indices.contains(&state.current_index);
        for &index in &indices {
            if index < state.tracks.len() {
                state.tracks.remove(index);
                if index < state.current_index {
                    state.current_index = state.current_index.saturating_sub(1);
                }
            }
        }
        state.prepared.clear();
        if state.tracks.is_empty() {
            state.current_index = 0;
        } else if state.current_index >= state.tracks.len() {
            state.current_index = state.tracks.len() - 1;
        }

        let new_state = PlayerState {
            state: PlayerStateName::Stopped,
            current_track: state.tracks.get(state.current_index).and_then(|t| t.metadata.clone()),
            index: if state.tracks.is_empty() {
                None
            } else {
                Some(state.current_index)
            },
            position_ms: 0,
            message: None,
            audio_info: None,
            timestamp_ns: crate::clock::now_ns(),
        };
        state.last_state = new_state.clone();
        (current_removed, new_state)
    };

    bus.dispatch(EventTopic::TracksRemoved, EventPayload::TracksRemoved(indices));

    if current_removed {
        player.stop();
        cancel_prefetch_timer(shared);
        bus.dispatch(EventTopic::StateChanged, EventPayload::State(new_state));
    }
}

fn handle_clear(player: &Arc<dyn Transport>, shared: &Arc<Mutex<QueueState>>, bus: &Arc<EventBus>) {
    player.stop();
    cancel_prefetch_timer(shared);

    let removed_indices = {
        let mut state = shared.lock().unwrap();
        let removed: Vec<usize> = (0..state.tracks.len()).rev().collect();
        state.tracks.clear();
        state.prepared.clear();
        state.current_index = 0;
        state.last_state = PlayerState {
            state: PlayerStateName::Stopped,
            current_track: None,
            index: None,
            position_ms: 0,
            message: None,
            audio_info: None,
            timestamp_ns: crate::clock::now_ns(),
        };
        removed
    };

    bus.dispatch(EventTopic::TracksRemoved, EventPayload::TracksRemoved(removed_indices));
}

async fn handle_play(
    player: &Arc<dyn Transport>,
    shared: &Arc<Mutex<QueueState>>,
    bus: &Arc<EventBus>,
    index: Option<usize>,
) {
    let (target, resolver) = {
        let state = shared.lock().unwrap();
        let target = index.unwrap_or(state.current_index);
        match state.tracks.get(target) {
            Some(track) => (target, track.resolver.clone()),
            None => return,
        }
    };

    match resolve(resolver).await {
        Ok(url) => {
            {
                let mut state = shared.lock().unwrap();
                state.current_index = target;
                state.prepared.clear();
                state.prepared.push((target, url.clone()));
            }
            player.play(url);
            maybe_request_more_tracks(shared, bus);
        }
        Err(e) => {
            log::warn!("play: failed to resolve track at index {target}: {e}");
            bus.dispatch(EventTopic::NetworkError, EventPayload::Message(Some(e.to_string())));
            player.stop();

            let new_state = {
                let state = shared.lock().unwrap();
                PlayerState {
                    state: PlayerStateName::Stopped,
                    current_track: state.tracks.get(target).and_then(|t| t.metadata.clone()),
                    index: Some(target),
                    position_ms: 0,
                    message: Some(e.to_string()),
                    audio_info: None,
                    timestamp_ns: crate::clock::now_ns(),
                }
            };
            shared.lock().unwrap().last_state = new_state.clone();
            bus.dispatch(EventTopic::StateChanged, EventPayload::State(new_state));
        }
    }
}

async fn handle_play_next(player: &Arc<dyn Transport>, shared: &Arc<Mutex<QueueState>>, index: usize) {
    let resolver = {
        let state = shared.lock().unwrap();
        if index >= state.tracks.len() || state.prepared.iter().any(|(i, _)| *i == index) {
            return;
        }
        state.tracks[index].resolver.clone()
    };

    match resolve(resolver).await {
        Ok(url) => {
            let mut state = shared.lock().unwrap();
            if index < state.tracks.len() && !state.prepared.iter().any(|(i, _)| *i == index) {
                state.prepared.push((index, url.clone()));
                drop(state);
                player.play_next(url);
            }
        }
        Err(e) => {
            // Matches `playqueue.py`'s `_prepare_track`: a prefetch failure
            // is logged, not surfaced as `NetworkError` -- only a
            // user-driven `play` does that.
            log::warn!("play_next: failed to resolve track at index {index}: {e}");
        }
    }
}

fn handle_replay(shared: &Arc<Mutex<QueueState>>, bus: &Arc<EventBus>) {
    let (state, queue) = {
        let state = shared.lock().unwrap();
        let queue: Vec<TrackMetadata> = state.tracks.iter().filter_map(|t| t.metadata.clone()).collect();
        (state.last_state.clone(), queue)
    };
    bus.dispatch(EventTopic::StateReplay, EventPayload::Replay { state, queue });
}

fn cancel_prefetch_timer(shared: &Arc<Mutex<QueueState>>) {
    if let Some(handle) = shared.lock().unwrap().prefetch_handle.take() {
        handle.abort();
    }
}

fn maybe_request_more_tracks(shared: &Arc<Mutex<QueueState>>, bus: &Arc<EventBus>) {
    let state = shared.lock().unwrap();
    if !state.tracks.is_empty() && state.current_index == state.tracks.len() - 1 {
        bus.dispatch(EventTopic::RequestMoreTracks, EventPayload::Message(None));
    }
}

/// Runs for every new `StreamState` the monitor publishes: advances the
/// Prepared Map on a gapless handover, schedules or fires the next
/// prefetch, and republishes the mapped `PlayerState`.
fn handle_state_update(
    shared: &Arc<Mutex<QueueState>>,
    bus: &Arc<EventBus>,
    cmd_tx: &mpsc::UnboundedSender<Command>,
    config: &EngineConfig,
    state: StreamState,
) {
    match state.state {
        AudioGraphNodeState::SourceChanged => {
            let popped = {
                let mut guard = shared.lock().unwrap();
                if guard.prepared.is_empty() {
                    None
                } else {
                    let (key, _) = guard.prepared.remove(0);
                    guard.current_index = key;
                    Some(key)
                }
            };
            if popped.is_some() {
                maybe_request_more_tracks(shared, bus);
            }
        }
        AudioGraphNodeState::Finished => {
            cancel_prefetch_timer(shared);
        }
        AudioGraphNodeState::Streaming => {
            schedule_or_fire_prefetch(shared, cmd_tx, config, &state);
        }
        _ => {
            cancel_prefetch_timer(shared);
        }
    }

    emit_state_changed(shared, bus, &state);
}

fn schedule_or_fire_prefetch(
    shared: &Arc<Mutex<QueueState>>,
    cmd_tx: &mpsc::UnboundedSender<Command>,
    config: &EngineConfig,
    state: &StreamState,
) {
    cancel_prefetch_timer(shared);

    let Some(stream_info) = state.stream_info else {
        return;
    };
    if stream_info.duration_ms == 0 {
        return;
    }

    let next_index = shared.lock().unwrap().current_index + 1;
    let remaining = stream_info.duration_ms.saturating_sub(state.position_ms);
    let lead = config.prefetch_lead_ms;

    if remaining <= lead {
        cmd_tx.send(Command::PlayNext(next_index)).ok();
        return;
    }

    let delay_ms = remaining - lead;
    let cmd_tx = cmd_tx.clone();
    let handle = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        cmd_tx.send(Command::PlayNext(next_index)).ok();
    });
    shared.lock().unwrap().prefetch_handle = Some(handle);
}

fn emit_state_changed(shared: &Arc<Mutex<QueueState>>, bus: &Arc<EventBus>, state: &StreamState) {
    let corrected_position_ms = state.position_ms
        + (crate::clock::now_ns().saturating_sub(state.timestamp_ns) / 1_000_000) as u64;

    let player_state = {
        let mut guard = shared.lock().unwrap();
        let current_track = guard.tracks.get(guard.current_index).and_then(|t| t.metadata.clone());
        let index = if guard.tracks.is_empty() {
            None
        } else {
            Some(guard.current_index)
        };
        let player_state = PlayerState {
            state: state.state.into(),
            current_track,
            index,
            position_ms: corrected_position_ms,
            message: state.message.clone(),
            audio_info: state.stream_info,
            timestamp_ns: crate::clock::now_ns(),
        };
        guard.last_state = player_state.clone();
        player_state
    };

    bus.dispatch(EventTopic::StateChanged, EventPayload::State(player_state));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::StateMonitorHandle;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::time::Duration as StdDuration;
    use tokio::sync::watch;

    /// A `Transport` double that lets tests drive `StreamState` transitions
    /// directly instead of downloading and decoding real audio.
    struct FakeTransport {
        state_tx: watch::Sender<Option<StreamState>>,
        state_rx: watch::Receiver<Option<StreamState>>,
        play_calls: Mutex<Vec<TrackUrl>>,
        play_next_calls: Mutex<Vec<TrackUrl>>,
        stop_calls: AtomicUsize,
    }

    impl FakeTransport {
        fn new() -> Arc<Self> {
            let (state_tx, state_rx) = watch::channel(None);
            Arc::new(Self {
                state_tx,
                state_rx,
                play_calls: Mutex::new(Vec::new()),
                play_next_calls: Mutex::new(Vec::new()),
                stop_calls: AtomicUsize::new(0),
            })
        }

        fn push_state(&self, state: AudioGraphNodeState, position_ms: u64, duration_ms: u64) {
            use crate::types::{StreamFormat, StreamInfo};
            let mut next = StreamState::now(state, position_ms);
            if duration_ms > 0 {
                next.stream_info = Some(StreamInfo {
                    format: StreamFormat {
                        sample_rate: 44100,
                        channels: 2,
                        bits_per_sample: 16,
                    },
                    duration_ms,
                });
            }
            self.state_tx.send(Some(next)).ok();
        }
    }

    impl Transport for FakeTransport {
        fn play(&self, url: TrackUrl) {
            self.play_calls.lock().unwrap().push(url);
        }
        fn play_next(&self, url: TrackUrl) {
            self.play_next_calls.lock().unwrap().push(url);
        }
        fn pause(&self, _paused: bool) {}
        fn stop(&self) {
            self.stop_calls.fetch_add(1, AtomicOrdering::SeqCst);
        }
        fn seek(&self, _position_ms: u64) {}
        fn get_state(&self) -> StreamState {
            self.state_rx
                .borrow()
                .clone()
                .unwrap_or_else(|| StreamState::now(AudioGraphNodeState::Stopped, 0))
        }
        fn monitor(&self) -> StateMonitorHandle {
            StateMonitorHandle::new(self.state_rx.clone())
        }
    }

    fn track(id: u64, title: &str) -> TrackInfo {
        let title_owned = title.to_string();
        TrackInfo {
            id,
            source: crate::types::SourceKind::Local,
            resolver: Arc::new(move || {
                Ok(TrackUrl {
                    url: format!("https://example.invalid/{id}"),
                    format: "flac".to_string(),
                    sample_rate: 44100,
                    bit_depth: 16,
                })
            }),
            metadata: Some(TrackMetadata {
                id,
                title: title_owned,
                duration_secs: 180,
                performer: Default::default(),
                album: Default::default(),
            }),
        }
    }

    #[tokio::test]
    async fn add_then_remove_restores_empty_queue() {
        let player = FakeTransport::new();
        let bus = EventBus::new();

        let queue = PlayQueue::new(player.clone(), bus, EngineConfig::default());
        queue.add(vec![track(1, "one")]);
        tokio::time::sleep(StdDuration::from_millis(20)).await;

        assert_eq!(queue.list(0, 10).len(), 1);

        queue.remove(vec![0]);
        tokio::time::sleep(StdDuration::from_millis(20)).await;

        assert_eq!(queue.list(0, 10).len(), 0);
    }

    #[tokio::test]
    async fn prev_at_index_zero_is_a_no_op() {
        let player = FakeTransport::new();
        let bus = EventBus::new();
        let queue = PlayQueue::new(player.clone(), bus, EngineConfig::default());
        queue.add(vec![track(1, "one"), track(2, "two")]);
        tokio::time::sleep(StdDuration::from_millis(20)).await;

        queue.prev();
        tokio::time::sleep(StdDuration::from_millis(20)).await;

        assert!(player.play_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn next_at_last_index_is_a_no_op() {
        let player = FakeTransport::new();
        let bus = EventBus::new();
        let queue = PlayQueue::new(player.clone(), bus, EngineConfig::default());
        queue.add(vec![track(1, "one")]);
        tokio::time::sleep(StdDuration::from_millis(20)).await;

        queue.next();
        tokio::time::sleep(StdDuration::from_millis(20)).await;

        assert!(player.play_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn play_out_of_range_index_is_ignored() {
        let player = FakeTransport::new();
        let bus = EventBus::new();
        let queue = PlayQueue::new(player.clone(), bus, EngineConfig::default());
        queue.add(vec![track(1, "one")]);
        tokio::time::sleep(StdDuration::from_millis(20)).await;

        queue.play(Some(5));
        tokio::time::sleep(StdDuration::from_millis(20)).await;

        assert!(player.play_calls.lock().unwrap().is_empty());
    }

    fn failing_track(id: u64) -> TrackInfo {
        TrackInfo {
            id,
            source: crate::types::SourceKind::Local,
            resolver: Arc::new(|| Err(EngineError::Resolution("no route to host".to_string()))),
            metadata: Some(TrackMetadata {
                id,
                title: "bad track".to_string(),
                duration_secs: 0,
                performer: Default::default(),
                album: Default::default(),
            }),
        }
    }

    #[tokio::test]
    async fn resolver_failure_on_play_emits_network_error_then_stopped_state() {
        let player = FakeTransport::new();
        let bus = EventBus::new();
        let network_errors = Arc::new(Mutex::new(Vec::new()));
        let network_errors_clone = network_errors.clone();
        let _sub = bus.subscribe(EventTopic::NetworkError, move |event| {
            network_errors_clone.lock().unwrap().push(event.clone());
        });

        let queue = PlayQueue::new(player.clone(), bus, EngineConfig::default());
        queue.add(vec![failing_track(1)]);
        tokio::time::sleep(StdDuration::from_millis(20)).await;

        queue.play(None);
        tokio::time::sleep(StdDuration::from_millis(20)).await;

        assert!(player.play_calls.lock().unwrap().is_empty());
        assert_eq!(network_errors.lock().unwrap().len(), 1);
        let state = queue.get_state();
        assert_eq!(state.state, PlayerStateName::Stopped);
        assert_eq!(state.index, Some(0));
    }

    #[tokio::test]
    async fn streaming_near_the_end_fires_prefetch_immediately() {
        let player = FakeTransport::new();
        let bus = EventBus::new();
        let queue = PlayQueue::new(player.clone(), bus, EngineConfig::default());
        queue.add(vec![track(1, "one"), track(2, "two")]);
        tokio::time::sleep(StdDuration::from_millis(20)).await;

        queue.play(Some(0));
        tokio::time::sleep(StdDuration::from_millis(20)).await;

        // 200ms remaining, default prefetch_lead_ms (5000) dwarfs it, so the
        // handler should invoke play_next immediately rather than scheduling.
        player.push_state(AudioGraphNodeState::Streaming, 9800, 10000);
        tokio::time::sleep(StdDuration::from_millis(20)).await;

        assert_eq!(player.play_next_calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn source_changed_pops_prepared_entry_and_advances_current_index() {
        let player = FakeTransport::new();
        let bus = EventBus::new();
        let queue = PlayQueue::new(player.clone(), bus, EngineConfig::default());
        queue.add(vec![track(1, "one"), track(2, "two")]);
        tokio::time::sleep(StdDuration::from_millis(20)).await;

        queue.play(Some(0));
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        queue.play_next(1);
        tokio::time::sleep(StdDuration::from_millis(20)).await;

        // First SOURCE_CHANGED pops the entry `play(0)` staged as `current`;
        // the second models the switcher's gapless auto-promotion of the
        // prefetched track into `current`.
        player.push_state(AudioGraphNodeState::SourceChanged, 0, 0);
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        player.push_state(AudioGraphNodeState::SourceChanged, 0, 0);
        tokio::time::sleep(StdDuration::from_millis(20)).await;

        let state = queue.get_state();
        assert_eq!(state.index, Some(1));
    }
}
