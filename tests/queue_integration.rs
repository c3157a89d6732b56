//! Exercises the public crate surface the way an embedding application
//! would: construct a `PlayQueue` against a `Transport` double, add tracks,
//! subscribe to the event bus, and drive playback end to end without a real
//! network connection or audio device.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kalinka_engine::{
    AudioGraphNodeState, Event, EventBus, EventPayload, EventTopic, PlayerStateName, SourceKind,
    StateMonitorHandle, StreamFormat, StreamInfo, StreamState, Transport, TrackInfo,
    TrackMetadata, TrackUrl,
};
use kalinka_engine::{EngineConfig, EngineError, PlayQueue};

fn metadata(id: u64, title: String) -> TrackMetadata {
    TrackMetadata {
        id,
        title,
        duration_secs: 200,
        performer: Default::default(),
        album: Default::default(),
    }
}
use tokio::sync::watch;

struct RecordingTransport {
    state_tx: watch::Sender<Option<StreamState>>,
    state_rx: watch::Receiver<Option<StreamState>>,
    play_calls: Mutex<Vec<TrackUrl>>,
}

impl RecordingTransport {
    fn new() -> Arc<Self> {
        let (state_tx, state_rx) = watch::channel(None);
        Arc::new(Self {
            state_tx,
            state_rx,
            play_calls: Mutex::new(Vec::new()),
        })
    }

    fn push_streaming(&self, position_ms: u64, duration_ms: u64) {
        let mut state = StreamState::now(AudioGraphNodeState::Streaming, position_ms);
        state.stream_info = Some(StreamInfo {
            format: StreamFormat {
                sample_rate: 44100,
                channels: 2,
                bits_per_sample: 16,
            },
            duration_ms,
        });
        self.state_tx.send(Some(state)).ok();
    }
}

impl Transport for RecordingTransport {
    fn play(&self, url: TrackUrl) {
        self.play_calls.lock().unwrap().push(url);
    }
    fn play_next(&self, _url: TrackUrl) {}
    fn pause(&self, _paused: bool) {}
    fn stop(&self) {}
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
    let resolved = format!("https://example.invalid/track/{id}.flac");
    TrackInfo {
        id,
        source: SourceKind::Local,
        resolver: Arc::new(move || {
            Ok(TrackUrl {
                url: resolved.clone(),
                format: "flac".to_string(),
                sample_rate: 44100,
                bit_depth: 16,
            })
        }),
        metadata: Some(metadata(id, title.to_string())),
    }
}

#[tokio::test]
async fn add_play_and_prefetch_emit_the_expected_events() {
    let transport = RecordingTransport::new();
    let bus = EventBus::new();

    let seen_topics = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen_topics.clone();
    let _sub = bus.subscribe(EventTopic::StateChanged, move |event: &Event| {
        if let EventPayload::State(state) = &event.payload {
            seen_clone.lock().unwrap().push(state.state);
        }
    });

    let prefetches = Arc::new(AtomicUsize::new(0));
    let prefetches_clone = prefetches.clone();
    let _sub2 = bus.subscribe(EventTopic::RequestMoreTracks, move |_event| {
        prefetches_clone.fetch_add(1, Ordering::SeqCst);
    });

    let queue = PlayQueue::new(transport.clone(), bus, EngineConfig::default());

    queue.add(vec![track(1, "first"), track(2, "second")]);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(queue.list(0, 10).len(), 2);

    queue.play(Some(0));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(transport.play_calls.lock().unwrap().len(), 1);

    // Well inside the prefetch lead: the queue controller should request
    // playing the next track immediately rather than scheduling a timer.
    transport.push_streaming(100, 500);
    tokio::time::sleep(Duration::from_millis(20)).await;

    let state = queue.get_state();
    assert_eq!(state.state, PlayerStateName::Playing);
    assert!(seen_topics.lock().unwrap().contains(&PlayerStateName::Playing));

    // Not the last track yet, so no RequestMoreTracks should have fired.
    assert_eq!(prefetches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn replaying_state_after_resolver_failure_reports_the_stopped_queue() {
    let transport = RecordingTransport::new();
    let bus = EventBus::new();

    let replays = Arc::new(Mutex::new(Vec::new()));
    let replays_clone = replays.clone();
    let _sub = bus.subscribe(EventTopic::StateReplay, move |event: &Event| {
        if let EventPayload::Replay { state, queue } = &event.payload {
            replays_clone.lock().unwrap().push((state.state, queue.len()));
        }
    });

    let mut failing = track(1, "unreachable");
    failing.resolver = Arc::new(|| Err(EngineError::Resolution("dns failure".to_string())));

    let queue = PlayQueue::new(transport.clone(), bus, EngineConfig::default());
    queue.add(vec![failing]);
    tokio::time::sleep(Duration::from_millis(20)).await;

    queue.play(None);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(transport.play_calls.lock().unwrap().is_empty());

    queue.replay();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let recorded = replays.lock().unwrap();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0], (PlayerStateName::Stopped, 1));
}
