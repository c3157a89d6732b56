//! Core data model shared across the graph, the player and the queue.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Kind of catalog a [`TrackInfo`] originated from. The engine never interprets
/// this beyond using it as a key into a [`ResolverRegistry`]; catalog adapters
/// define their own variants by constructing `SourceKind::Other(name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    Qobuz,
    Local,
    Other(String),
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Qobuz => write!(f, "qobuz"),
            SourceKind::Local => write!(f, "local"),
            SourceKind::Other(name) => write!(f, "{name}"),
        }
    }
}

/// An ephemeral, signed URL plus the format needed to decode it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackUrl {
    pub url: String,
    pub format: String,
    pub sample_rate: u32,
    pub bit_depth: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Artist {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Album {
    pub id: u64,
    pub title: String,
}

/// Human-visible fields; opaque to the engine except for display in state events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackMetadata {
    pub id: u64,
    pub title: String,
    pub duration_secs: u64,
    pub performer: Artist,
    pub album: Album,
}

/// A resolver that turns a staged `TrackInfo` into a playable `TrackUrl`.
/// The resolver may block (it typically performs an HTTP call) and may fail;
/// resolver failure always becomes `EngineError::Resolution`.
pub type LinkRetriever = Arc<dyn Fn() -> Result<TrackUrl, crate::error::EngineError> + Send + Sync>;

/// Identity, lazy URL resolver, and optional metadata. Immutable once placed
/// in the queue.
#[derive(Clone)]
pub struct TrackInfo {
    pub id: u64,
    pub source: SourceKind,
    pub resolver: LinkRetriever,
    pub metadata: Option<TrackMetadata>,
}

impl fmt::Debug for TrackInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackInfo")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// A registry mapping a `SourceKind` to the closure used to resolve a track id
/// of that kind into a `TrackUrl`. One concrete way to build `TrackInfo::resolver`;
/// catalog adapters may instead hand the engine an arbitrary boxed closure directly.
#[derive(Clone, Default)]
pub struct ResolverRegistry {
    handlers: HashMap<SourceKind, Arc<dyn Fn(u64) -> Result<TrackUrl, crate::error::EngineError> + Send + Sync>>,
}

impl ResolverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, source: SourceKind, callback: F)
    where
        F: Fn(u64) -> Result<TrackUrl, crate::error::EngineError> + Send + Sync + 'static,
    {
        self.handlers.insert(source, Arc::new(callback));
    }

    /// Build a `LinkRetriever` closure bound to a specific track id, looked up
    /// by source kind at call time (not at bind time), matching the original
    /// `TrackUrlRetriever.retrieve`'s `registry.get(kind, default)(id)` dispatch.
    pub fn retriever_for(&self, source: SourceKind, track_id: u64) -> LinkRetriever {
        let handlers = self.handlers.clone();
        Arc::new(move || match handlers.get(&source) {
            Some(f) => f(track_id),
            None => Err(crate::error::EngineError::Resolution(format!(
                "no resolver registered for source kind {source}"
            ))),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub format: StreamFormat,
    pub duration_ms: u64,
}

/// Per-node lifecycle state shared by every graph node (C1-C5) and aggregated
/// by the state monitor (C6) into one `StreamState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioGraphNodeState {
    Error,
    Stopped,
    Preparing,
    Streaming,
    Paused,
    Finished,
    SourceChanged,
}

/// The one authoritative status produced by the state monitor (C6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamState {
    pub state: AudioGraphNodeState,
    pub position_ms: u64,
    pub stream_info: Option<StreamInfo>,
    pub message: Option<String>,
    pub timestamp_ns: u128,
}

impl StreamState {
    pub fn now(state: AudioGraphNodeState, position_ms: u64) -> Self {
        Self {
            state,
            position_ms,
            stream_info: None,
            message: None,
            timestamp_ns: crate::clock::now_ns(),
        }
    }
}

/// The externally visible state mapping used by C8: `PREPARING->BUFFERING`,
/// `STREAMING->PLAYING`, `STOPPED->STOPPED`, `PAUSED->PAUSED`,
/// `FINISHED->STOPPED`, `ERROR->ERROR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayerStateName {
    Buffering,
    Playing,
    Stopped,
    Paused,
    Error,
}

impl From<AudioGraphNodeState> for PlayerStateName {
    fn from(s: AudioGraphNodeState) -> Self {
        match s {
            AudioGraphNodeState::Preparing => PlayerStateName::Buffering,
            AudioGraphNodeState::Streaming | AudioGraphNodeState::SourceChanged => {
                PlayerStateName::Playing
            }
            AudioGraphNodeState::Stopped => PlayerStateName::Stopped,
            AudioGraphNodeState::Paused => PlayerStateName::Paused,
            AudioGraphNodeState::Finished => PlayerStateName::Stopped,
            AudioGraphNodeState::Error => PlayerStateName::Error,
        }
    }
}

/// The queue's externally visible view, carried on `StateChanged`/`StateReplay`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerState {
    pub state: PlayerStateName,
    pub current_track: Option<TrackMetadata>,
    pub index: Option<usize>,
    pub position_ms: u64,
    pub message: Option<String>,
    pub audio_info: Option<StreamInfo>,
    pub timestamp_ns: u128,
}
