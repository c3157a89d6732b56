//! Kalinka: a gapless, prefetching streaming audio playback engine.
//!
//! An HTTP source feeds a bounded ring buffer, a FLAC decoder pulls from
//! that buffer, and a stream switcher hands two decoded tracks off to one
//! output sink with no gap between them. A play queue controller drives the
//! graph from a track list and publishes every transition on a typed event
//! bus.
//!
//! The module layout mirrors the pipeline: [`graph`] holds the per-node
//! plumbing (C1-C6), [`player`] owns one instance of that graph (C7),
//! [`queue`] drives it from a track list (C8), and [`events`] is the bus
//! every layer above the graph publishes onto (C9).

pub mod audio;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod graph;
pub mod logging;
pub mod player;
pub mod queue;
pub mod snapshot;
pub mod types;

pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use events::{Event, EventBus, EventPayload, EventStream, EventTopic, Subscription};
pub use player::{AudioPlayer, StateMonitorHandle, Transport};
pub use queue::{PlayQueue, QueuedTrackView};
pub use types::{
    Album, Artist, AudioGraphNodeState, LinkRetriever, PlayerState, PlayerStateName,
    ResolverRegistry, SourceKind, StreamFormat, StreamInfo, StreamState, TrackInfo,
    TrackMetadata, TrackUrl,
};
