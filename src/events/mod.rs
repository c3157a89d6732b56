//! Typed pub/sub event bus (C9).
//!
//! Grounded on `rpiasync.py`'s `EventListener`:
//! a single dispatch thread drains a queue and calls every subscriber for a
//! topic in turn, catching and logging a handler's failure rather than
//! letting it abort delivery to the remaining subscribers (the simpler
//! `events.py::EventDispatcher` does *not* do this, which is why it is not
//! the one this module follows). The "streamed view" is grounded on
//! `rest_event_proxy.py`'s `EventStream`, refined into an unbounded buffered
//! queue rather than a last-value slot.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::types::{PlayerState, TrackMetadata};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTopic {
    StateChanged,
    StateReplay,
    TracksAdded,
    TracksRemoved,
    RequestMoreTracks,
    NetworkError,
    FavoriteAdded,
    FavoriteRemoved,
    VolumeChanged,
}

/// Payload carried for each topic.
#[derive(Debug, Clone)]
pub enum EventPayload {
    /// `StateChanged`: the mapped `PlayerState`.
    State(PlayerState),
    /// `StateReplay`: the current state plus the full paged queue.
    Replay {
        state: PlayerState,
        queue: Vec<TrackMetadata>,
    },
    /// `TracksAdded`: metadata for the newly added tracks only.
    TracksAdded(Vec<TrackMetadata>),
    /// `TracksRemoved`: the removed indices.
    TracksRemoved(Vec<usize>),
    /// `RequestMoreTracks` / `NetworkError`: an optional message.
    Message(Option<String>),
    /// `FavoriteAdded` / `FavoriteRemoved`: the affected track id.
    TrackId(u64),
    /// `VolumeChanged`: the new volume, 0.0-1.0.
    Volume(f32),
}

#[derive(Clone)]
pub struct Event {
    pub topic: EventTopic,
    pub payload: EventPayload,
}

type Handler = Arc<dyn Fn(&Event) + Send + Sync + 'static>;

struct Subscriber {
    id: u64,
    handler: Handler,
}

#[derive(Default)]
struct SubscriberTable {
    by_topic: HashMap<EventTopic, Vec<Subscriber>>,
}

/// An active subscription. Calling `unsubscribe` removes the handler from the
/// bus; calling it more than once is a no-op.
pub struct Subscription {
    id: u64,
    topic: EventTopic,
    table: Arc<Mutex<SubscriberTable>>,
    active: AtomicBool,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            if let Ok(mut table) = self.table.lock() {
                if let Some(subs) = table.by_topic.get_mut(&self.topic) {
                    subs.retain(|s| s.id != self.id);
                }
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Typed pub/sub bus with a single dispatch thread. Dropping the bus stops
/// the dispatch thread once the channel drains.
pub struct EventBus {
    sender: Sender<Event>,
    table: Arc<Mutex<SubscriberTable>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        let (sender, receiver) = mpsc::channel::<Event>();
        let table = Arc::new(Mutex::new(SubscriberTable::default()));
        let bus = Arc::new(Self {
            sender,
            table: table.clone(),
            next_id: AtomicU64::new(0),
        });
        std::thread::Builder::new()
            .name("event-bus".into())
            .spawn(move || Self::dispatch_loop(table, receiver))
            .expect("failed to spawn event bus dispatch thread");
        bus
    }

    fn dispatch_loop(table: Arc<Mutex<SubscriberTable>>, receiver: Receiver<Event>) {
        while let Ok(event) = receiver.recv() {
            let handlers_ready = {
                let table = table.lock().unwrap();
                table
                    .by_topic
                    .get(&event.topic)
                    .map(|subs| subs.iter().map(|s| s.id).collect::<Vec<_>>())
                    .unwrap_or_default()
            };
            for id in handlers_ready {
                // Re-fetch under the lock each time: a handler may unsubscribe
                // itself or another handler mid-delivery. Cloning the `Arc`
                // lets the handler run without holding the table lock.
                let handler = {
                    let table = table.lock().unwrap();
                    table
                        .by_topic
                        .get(&event.topic)
                        .and_then(|subs| subs.iter().find(|s| s.id == id))
                        .map(|s| s.handler.clone())
                };
                if let Some(handler) = handler {
                    let result = std::panic::catch_unwind(AssertUnwindSafe(|| handler(&event)));
                    if result.is_err() {
                        log::error!(
                            "event bus subscriber panicked while handling {:?}; continuing delivery to remaining subscribers",
                            event.topic
                        );
                    }
                }
            }
        }
    }

    pub fn subscribe<F>(self: &Arc<Self>, topic: EventTopic, handler: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut table = self.table.lock().unwrap();
        table.by_topic.entry(topic).or_default().push(Subscriber {
            id,
            handler: Arc::new(handler),
        });
        Subscription {
            id,
            topic,
            table: self.table.clone(),
            active: AtomicBool::new(true),
        }
    }

    /// Sugar for subscribing the same handler to every topic in the map.
    pub fn subscribe_all<F>(self: &Arc<Self>, topics: &[EventTopic], handler: F) -> Vec<Subscription>
    where
        F: Fn(&Event) + Send + Sync + Clone + 'static,
    {
        topics
            .iter()
            .map(|t| self.subscribe(*t, handler.clone()))
            .collect()
    }

    /// Fire-and-forget; never blocks on delivery.
    pub fn dispatch(&self, topic: EventTopic, payload: EventPayload) {
        let _ = self.sender.send(Event { topic, payload });
    }
}

const ALL_TOPICS: [EventTopic; 9] = [
    EventTopic::StateChanged,
    EventTopic::StateReplay,
    EventTopic::TracksAdded,
    EventTopic::TracksRemoved,
    EventTopic::RequestMoreTracks,
    EventTopic::NetworkError,
    EventTopic::FavoriteAdded,
    EventTopic::FavoriteRemoved,
    EventTopic::VolumeChanged,
];

/// A streamed view over every topic, buffering into an unbounded queue.
/// Coalesces the "initial replay" pattern: until the first `StateReplay` is
/// observed, `StateChanged`/`TracksAdded`/`TracksRemoved` are dropped; after
/// the first `StateReplay`, subsequent `StateReplay` events are suppressed;
/// everything else always passes through.
pub struct EventStream {
    receiver: Mutex<Receiver<Event>>,
    _subscriptions: Vec<Subscription>,
    replayed: AtomicBool,
    closed: AtomicBool,
}

impl EventStream {
    pub fn new(bus: &Arc<EventBus>) -> Arc<Self> {
        let (sender, receiver) = mpsc::channel::<Event>();
        let sender = Arc::new(sender);
        let sender_for_closure = sender.clone();
        let subscriptions = bus.subscribe_all(&ALL_TOPICS, move |event: &Event| {
            let _ = sender_for_closure.send(event.clone());
        });
        Arc::new(Self {
            receiver: Mutex::new(receiver),
            _subscriptions: subscriptions,
            replayed: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    /// Blocks for up to `timeout` for the next event that survives the
    /// replay gate; returns `None` on timeout or after `close()`.
    pub fn get_event(&self, timeout: Duration) -> Option<Event> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let event = {
                let receiver = self.receiver.lock().unwrap();
                match receiver.recv_timeout(remaining) {
                    Ok(event) => event,
                    Err(RecvTimeoutError::Timeout) => return None,
                    Err(RecvTimeoutError::Disconnected) => return None,
                }
            };
            if let Some(event) = self.gate(event) {
                return Some(event);
            }
        }
    }

    fn gate(&self, event: Event) -> Option<Event> {
        let has_replayed = self.replayed.load(Ordering::SeqCst);
        match event.topic {
            EventTopic::StateReplay => {
                if has_replayed {
                    None
                } else {
                    self.replayed.store(true, Ordering::SeqCst);
                    Some(event)
                }
            }
            EventTopic::StateChanged | EventTopic::TracksAdded | EventTopic::TracksRemoved => {
                if has_replayed {
                    Some(event)
                } else {
                    None
                }
            }
            _ => Some(event),
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AudioGraphNodeState, PlayerStateName};
    use std::sync::atomic::AtomicUsize;

    fn player_state(name: PlayerStateName) -> PlayerState {
        PlayerState {
            state: name,
            current_track: None,
            index: None,
            position_ms: 0,
            message: None,
            audio_info: None,
            timestamp_ns: crate::clock::now_ns(),
        }
    }

    #[test]
    fn delivers_events_fifo_per_topic() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let _sub = bus.subscribe(EventTopic::RequestMoreTracks, move |_event| {
            seen_clone.lock().unwrap().push(1);
        });
        for _ in 0..5 {
            bus.dispatch(EventTopic::RequestMoreTracks, EventPayload::Message(None));
        }
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(seen.lock().unwrap().len(), 5);
    }

    #[test]
    fn unsubscribe_is_at_most_once_and_stops_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let sub = bus.subscribe(EventTopic::VolumeChanged, move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        bus.dispatch(EventTopic::VolumeChanged, EventPayload::Volume(0.5));
        std::thread::sleep(Duration::from_millis(30));
        sub.unsubscribe();
        sub.unsubscribe();
        bus.dispatch(EventTopic::VolumeChanged, EventPayload::Volume(0.8));
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn a_panicking_handler_does_not_block_siblings() {
        let bus = EventBus::new();
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = ran.clone();
        let _sub1 = bus.subscribe(EventTopic::NetworkError, |_| panic!("boom"));
        let _sub2 = bus.subscribe(EventTopic::NetworkError, move |_| {
            ran_clone.store(true, Ordering::SeqCst);
        });
        bus.dispatch(EventTopic::NetworkError, EventPayload::Message(None));
        std::thread::sleep(Duration::from_millis(50));
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn event_stream_drops_pre_replay_mutation_events_then_passes_through() {
        let bus = EventBus::new();
        let stream = EventStream::new(&bus);

        bus.dispatch(
            EventTopic::StateChanged,
            EventPayload::State(player_state(PlayerStateName::Stopped)),
        );
        bus.dispatch(
            EventTopic::StateReplay,
            EventPayload::Replay {
                state: player_state(PlayerStateName::Stopped),
                queue: vec![],
            },
        );
        bus.dispatch(
            EventTopic::StateReplay,
            EventPayload::Replay {
                state: player_state(PlayerStateName::Stopped),
                queue: vec![],
            },
        );
        bus.dispatch(
            EventTopic::StateChanged,
            EventPayload::State(player_state(PlayerStateName::Playing)),
        );

        let first = stream.get_event(Duration::from_millis(200)).expect("first event");
        assert!(matches!(first.topic, EventTopic::StateReplay));
        let second = stream.get_event(Duration::from_millis(200)).expect("second event");
        assert!(matches!(second.topic, EventTopic::StateChanged));
        assert!(stream.get_event(Duration::from_millis(100)).is_none());
    }

    #[test]
    fn get_event_times_out_after_close() {
        let bus = EventBus::new();
        let stream = EventStream::new(&bus);
        stream.close();
        assert!(stream.get_event(Duration::from_millis(50)).is_none());
    }
}
