//! Output Sink (C5): pulls frames from the Stream Switcher, writes them to an
//! audio device in chunks, and publishes position and lifecycle state.
//!
//! Grounded on `player/playback_engine.rs`'s `PlaybackEngine` enum (a Rodio
//! path through `rodio::Sink` and a direct-ALSA path through
//! `AlsaDirectStream`, each driven from a dedicated thread that tracks a
//! position counter), redesigned around pulling continuously from one
//! `StreamSwitcher` in small chunks instead of `source.collect()`-ing a whole
//! file up front. The writer thread pulls one sample at a time and watches
//! for the switcher's gapless promotion boundary, flushing a partial chunk
//! and re-tagging for the new format at that exact sample rather than at its
//! own next chunk boundary -- the direct-ALSA path reopens the device since
//! its hw params are fixed at PCM open; Rodio re-tags for free on its next
//! `append`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, Sink as RodioSink, Source};

use crate::audio::{self, AlsaDirectStream};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::graph::switcher::SharedSwitcher;
use crate::graph::{node_status_channel, NodeStatus, NodeStatusReceiver, NodeStatusSender};
use crate::types::{AudioGraphNodeState, StreamFormat};

const CHUNK_FRAMES: usize = 4096;

enum Device {
    Rodio {
        _stream: OutputStream,
        sink: RodioSink,
    },
    AlsaDirect {
        stream: Arc<AlsaDirectStream>,
    },
}

/// Handle to a running playback session. Dropping it does not stop playback;
/// call `stop()` explicitly -- stop is a distinct, idempotent command.
pub struct OutputSink {
    status_tx: NodeStatusSender,
    status_rx: NodeStatusReceiver,
    device_name: Option<String>,
    config: EngineConfig,
    paused: Arc<AtomicBool>,
    stop_requested: Arc<AtomicBool>,
    frames_played: Arc<AtomicU64>,
    writer: Option<thread::JoinHandle<()>>,
}

impl OutputSink {
    pub fn new(device_name: Option<String>, config: EngineConfig) -> Self {
        let (status_tx, status_rx) = node_status_channel();
        Self {
            status_tx,
            status_rx,
            device_name,
            config,
            paused: Arc::new(AtomicBool::new(false)),
            stop_requested: Arc::new(AtomicBool::new(false)),
            frames_played: Arc::new(AtomicU64::new(0)),
            writer: None,
        }
    }

    pub fn status(&self) -> NodeStatusReceiver {
        self.status_rx.clone()
    }

    /// Opens the device for `format` and starts pulling from `switcher` on a
    /// dedicated thread. `format` must match the switcher's current source;
    /// the writer thread watches every sample it pulls for a gapless
    /// promotion boundary and re-tags (reopening the device if the format
    /// actually differs) at that exact sample, rather than waiting for its
    /// own next chunk boundary.
    pub fn start(&mut self, mut switcher: SharedSwitcher, format: StreamFormat) -> Result<(), EngineError> {
        self.status_tx.send(NodeStatus::new(AudioGraphNodeState::Preparing)).ok();

        let device = self.open_device(format)?;

        self.stop_requested.store(false, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
        self.frames_played.store(0, Ordering::SeqCst);

        let status_tx = self.status_tx.clone();
        let paused = self.paused.clone();
        let stop_requested = self.stop_requested.clone();
        let frames_played = self.frames_played.clone();
        let drain_timeout = self.config.device_drain_timeout;
        let device_name = self.device_name.clone();

        status_tx.send(NodeStatus::new(AudioGraphNodeState::Streaming)).ok();

        let handle = thread::spawn(move || {
            let mut device = device;
            let mut format = format;
            let mut chunk: Vec<i16> = Vec::with_capacity(CHUNK_FRAMES * format.channels.max(1) as usize);
            // A sample already pulled from a freshly promoted source, set
            // aside when the promotion landed mid-chunk so it can be
            // written only after the device has been re-tagged for it.
            let mut pending_sample: Option<i16> = None;

            'outer: loop {
                if stop_requested.load(Ordering::SeqCst) {
                    break;
                }
                if paused.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(20));
                    continue;
                }

                chunk.clear();
                if let Some(sample) = pending_sample.take() {
                    chunk.push(sample);
                }

                let target = CHUNK_FRAMES * format.channels.max(1) as usize;
                let mut exhausted = false;
                while chunk.len() < target {
                    match switcher.next_with_boundary() {
                        Some((sample, true)) if !chunk.is_empty() => {
                            // The switcher just promoted `next` into
                            // `current`: flush everything accumulated in
                            // the old format now instead of padding this
                            // chunk out to `target`, and hold the new
                            // source's first sample for the next chunk,
                            // once the device is re-tagged for it.
                            pending_sample = Some(sample);
                            break;
                        }
                        Some((sample, _)) => chunk.push(sample),
                        None => {
                            exhausted = true;
                            break;
                        }
                    }
                }

                if !chunk.is_empty() {
                    if let Err(e) = write_chunk(&mut device, &chunk, format.channels, format.sample_rate) {
                        let err = EngineError::Device(format!("device write failed: {e}"));
                        status_tx.send(NodeStatus::error(err.node_state_message())).ok();
                        break 'outer;
                    }
                    frames_played.fetch_add(
                        (chunk.len() / format.channels.max(1) as usize) as u64,
                        Ordering::SeqCst,
                    );
                    let position_ms =
                        frames_played.load(Ordering::SeqCst) * 1000 / format.sample_rate.max(1) as u64;
                    status_tx
                        .send(NodeStatus {
                            state: AudioGraphNodeState::Streaming,
                            message: None,
                            stream_info: None,
                            position_ms,
                        })
                        .ok();
                }

                if pending_sample.is_some() {
                    let new_format = switcher
                        .current_stream_info()
                        .map(|info| info.format)
                        .unwrap_or(format);
                    // Rodio already re-tags every appended `SamplesBuffer`
                    // with its own channels/sample_rate, so only the
                    // direct-ALSA path -- whose hw params are fixed at PCM
                    // open -- needs the device itself reopened here.
                    if new_format != format && matches!(device, Device::AlsaDirect { .. }) {
                        match open_device_for(device_name.as_deref(), new_format) {
                            Ok(new_device) => device = new_device,
                            Err(e) => {
                                status_tx.send(NodeStatus::error(e.node_state_message())).ok();
                                break 'outer;
                            }
                        }
                    }
                    format = new_format;
                    continue;
                }

                if exhausted {
                    if let Device::AlsaDirect { stream } = &device {
                        let _ = stream.drain();
                    } else {
                        thread::sleep(drain_timeout.min(Duration::from_millis(200)));
                    }
                    status_tx.send(NodeStatus::new(AudioGraphNodeState::Finished)).ok();
                    break;
                }
            }
        });

        self.writer = Some(handle);
        Ok(())
    }

    /// Non-blocking; the writer thread observes the flag on its next loop
    /// iteration. `true` pauses, `false` resumes. Idempotent.
    pub fn pause(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
        self.status_tx
            .send(NodeStatus::new(if paused {
                AudioGraphNodeState::Paused
            } else {
                AudioGraphNodeState::Streaming
            }))
            .ok();
    }

    /// Idempotent: calling `stop` on an already-stopped sink is a no-op.
    pub fn stop(&mut self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        if let Some(handle) = self.writer.take() {
            let _ = handle.join();
        }
        self.status_tx.send(NodeStatus::new(AudioGraphNodeState::Stopped)).ok();
    }

    /// True seeking requires re-resolving the track at a byte offset, which
    /// is the HTTP source's concern, not the sink's; the sink only ever plays
    /// forward through whatever the switcher hands it.
    pub fn seek(&self, _position_ms: u64) -> Result<(), EngineError> {
        let err = EngineError::Device(
            "seek is not supported by the output sink; re-resolve and restart the graph instead".to_string(),
        );
        self.status_tx.send(NodeStatus::error(err.node_state_message())).ok();
        Err(err)
    }

    pub fn position_ms(&self, sample_rate: u32) -> u64 {
        self.frames_played.load(Ordering::SeqCst) * 1000 / sample_rate.max(1) as u64
    }

    fn open_device(&self, format: StreamFormat) -> Result<Device, EngineError> {
        open_device_for(self.device_name.as_deref(), format)
    }
}

/// Opens the named device (or the host default, if `None`) for `format`.
/// A free function rather than a method so the writer thread can reopen the
/// device at a gapless format-change boundary without holding a reference
/// back to the `OutputSink`.
fn open_device_for(device_name: Option<&str>, format: StreamFormat) -> Result<Device, EngineError> {
    match device_name {
        Some(name) if audio::is_alsa_direct_device(name) => {
            let stream = AlsaDirectStream::new(name, format.sample_rate, format.channels)
                .map_err(|e| EngineError::Device(audio::AlsaDirectError::from_alsa_error(&e).to_string()))?;
            Ok(Device::AlsaDirect {
                stream: Arc::new(stream),
            })
        }
        other => {
            let (stream, handle) = audio::open_rodio_device(other).map_err(EngineError::Device)?;
            let sink = RodioSink::try_new(&handle)
                .map_err(|e| EngineError::Device(format!("failed to create sink: {e}")))?;
            Ok(Device::Rodio { _stream: stream, sink })
        }
    }
}

fn write_chunk(
    device: &mut Device,
    chunk: &[i16],
    channels: u16,
    sample_rate: u32,
) -> Result<(), String> {
    match device {
        Device::AlsaDirect { stream } => stream.write(chunk),
        Device::Rodio { sink, .. } => {
            sink.append(SamplesBuffer::new(channels, sample_rate, chunk.to_vec()));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seek_is_rejected() {
        let sink = OutputSink::new(None, EngineConfig::default());
        assert!(sink.seek(1000).is_err());
    }
}
