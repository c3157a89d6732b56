//! FLAC Decoder Node (C3): pulls bytes from the Stream Buffer, produces
//! interleaved PCM, and reports `StreamInfo` as soon as headers are parsed.
//!
//! Grounded on `player/streaming_source.rs`'s `IncrementalStreamingSource`
//! (a `rodio::Source` that decodes symphonia packets on demand into a sample
//! queue) and `player/mod.rs`'s `decode_with_symphonia` probe setup, adapted
//! to read from a [`StreamBuffer`] instead of an in-memory cursor so decoding
//! can start before the download finishes.

use std::collections::VecDeque;
use std::io::{Read, Seek, SeekFrom};
use std::time::Duration;

use rodio::Source;
use symphonia::core::codecs::{Decoder as SymphoniaDecoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSource, MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::EngineError;
use crate::graph::stream_buffer::StreamBuffer;
use crate::graph::{node_status_channel, NodeStatus, NodeStatusReceiver, NodeStatusSender};
use crate::types::{AudioGraphNodeState, StreamFormat, StreamInfo};

/// Adapts a [`StreamBuffer`] to symphonia's `MediaSource`. Not seekable: the
/// decoder only ever reads forward, matching the producer/consumer contract
/// of C1/C2.
struct BufferMediaSource {
    buffer: StreamBuffer,
    leftover: VecDeque<u8>,
}

impl Read for BufferMediaSource {
    fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
        if self.leftover.is_empty() {
            let chunk = self.buffer.read(out.len().max(4096)).map_err(|e| {
                // `ConnectionAborted` is otherwise unused by symphonia's own
                // I/O errors, so `decode_more` can tell a cancelled upstream
                // buffer apart from a genuine decode failure.
                let kind = match e {
                    EngineError::Cancelled => std::io::ErrorKind::ConnectionAborted,
                    _ => std::io::ErrorKind::Other,
                };
                std::io::Error::new(kind, e.to_string())
            })?;
            if chunk.is_empty() {
                return Ok(0);
            }
            self.leftover.extend(chunk);
        }
        let n = out.len().min(self.leftover.len());
        for slot in out.iter_mut().take(n) {
            *slot = self.leftover.pop_front().unwrap();
        }
        Ok(n)
    }
}

impl Seek for BufferMediaSource {
    fn seek(&mut self, _pos: SeekFrom) -> std::io::Result<u64> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "stream buffer source is not seekable",
        ))
    }
}

impl MediaSource for BufferMediaSource {
    fn is_seekable(&self) -> bool {
        false
    }
    fn byte_len(&self) -> Option<u64> {
        None
    }
}

pub struct FlacDecoder {
    status_tx: NodeStatusSender,
    status_rx: NodeStatusReceiver,
}

impl FlacDecoder {
    pub fn new() -> Self {
        let (status_tx, status_rx) = node_status_channel();
        Self { status_tx, status_rx }
    }

    pub fn status(&self) -> NodeStatusReceiver {
        self.status_rx.clone()
    }

    /// Publishes an ERROR status and returns the matching error, so every
    /// early-return in `open` leaves a trace on the status channel instead of
    /// only ever surfacing through the `Result`.
    fn fail(&self, message: String) -> EngineError {
        let err = EngineError::Decoder(message);
        self.status_tx.send(NodeStatus::error(err.node_state_message())).ok();
        err
    }

    /// Probes `buffer` and returns a pull-based `rodio::Source` once the
    /// `StreamInfo` is known. Blocks the calling thread while enough header
    /// bytes arrive; callers should run this on a dedicated thread.
    pub fn open(&self, buffer: StreamBuffer, format_hint: &str) -> Result<DecoderSource, EngineError> {
        self.status_tx.send(NodeStatus::new(AudioGraphNodeState::Preparing)).ok();

        let media_source = BufferMediaSource {
            buffer,
            leftover: VecDeque::new(),
        };
        let mss = MediaSourceStream::new(Box::new(media_source), MediaSourceStreamOptions::default());

        let mut hint = Hint::new();
        if !format_hint.is_empty() {
            hint.with_extension(format_hint);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions {
                    enable_gapless: true,
                    ..Default::default()
                },
                &MetadataOptions::default(),
            )
            .map_err(|e| self.fail(format!("probe failed: {e}")))?;

        let format_reader = probed.format;
        let track = format_reader
            .default_track()
            .ok_or_else(|| self.fail("no default track".to_string()))?;
        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| self.fail(format!("no decoder for codec: {e}")))?;

        let sample_rate = codec_params.sample_rate.unwrap_or(44100);
        let channels = codec_params
            .channels
            .map(|c| c.count() as u16)
            .unwrap_or(2);
        let bits_per_sample = codec_params.bits_per_sample.unwrap_or(16) as u16;
        let duration_ms = codec_params
            .n_frames
            .map(|frames| frames * 1000 / sample_rate as u64)
            .unwrap_or(0);

        let stream_info = StreamInfo {
            format: StreamFormat {
                sample_rate,
                channels,
                bits_per_sample,
            },
            duration_ms,
        };

        self.status_tx
            .send(NodeStatus {
                state: AudioGraphNodeState::Streaming,
                message: None,
                stream_info: Some(stream_info),
                position_ms: 0,
            })
            .ok();

        Ok(DecoderSource {
            format_reader,
            decoder,
            track_id,
            queue: VecDeque::new(),
            status_tx: self.status_tx.clone(),
            stream_info,
            finished: false,
        })
    }
}

impl Default for FlacDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// A `rodio::Source` that decodes one packet at a time on demand.
/// `StreamInfo` is already known by construction time; a decode error past
/// the first good frame becomes ERROR, and clean upstream EOF becomes
/// FINISHED.
pub struct DecoderSource {
    format_reader: Box<dyn FormatReader>,
    decoder: Box<dyn SymphoniaDecoder>,
    track_id: u32,
    queue: VecDeque<i16>,
    status_tx: NodeStatusSender,
    stream_info: StreamInfo,
    finished: bool,
}

impl DecoderSource {
    pub fn stream_info(&self) -> StreamInfo {
        self.stream_info
    }

    fn decode_more(&mut self) {
        loop {
            let packet = match self.format_reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    self.status_tx.send(NodeStatus::new(AudioGraphNodeState::Finished)).ok();
                    self.finished = true;
                    return;
                }
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::ConnectionAborted =>
                {
                    self.status_tx.send(NodeStatus::new(AudioGraphNodeState::Stopped)).ok();
                    self.finished = true;
                    return;
                }
                Err(e) => {
                    let err = EngineError::Decoder(format!("upstream read failed: {e}"));
                    self.status_tx.send(NodeStatus::error(err.node_state_message())).ok();
                    self.finished = true;
                    return;
                }
            };
            if packet.track_id() != self.track_id {
                continue;
            }
            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    use symphonia::core::audio::SampleBuffer;
                    let spec = *decoded.spec();
                    let mut sample_buf = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
                    sample_buf.copy_interleaved_ref(decoded);
                    self.queue.extend(sample_buf.samples().iter().copied());
                    return;
                }
                Err(SymphoniaError::DecodeError(msg)) => {
                    let err = EngineError::Decoder(format!("decode error: {msg}"));
                    self.status_tx.send(NodeStatus::error(err.node_state_message())).ok();
                    self.finished = true;
                    return;
                }
                Err(e) => {
                    let err = EngineError::Decoder(format!("decode failed: {e}"));
                    self.status_tx.send(NodeStatus::error(err.node_state_message())).ok();
                    self.finished = true;
                    return;
                }
            }
        }
    }
}

impl Iterator for DecoderSource {
    type Item = i16;

    fn next(&mut self) -> Option<i16> {
        loop {
            if let Some(sample) = self.queue.pop_front() {
                return Some(sample);
            }
            if self.finished {
                return None;
            }
            self.decode_more();
        }
    }
}

impl Source for DecoderSource {
    fn current_frame_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        self.stream_info.format.channels
    }

    fn sample_rate(&self) -> u32 {
        self.stream_info.format.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        if self.stream_info.duration_ms > 0 {
            Some(Duration::from_millis(self.stream_info.duration_ms))
        } else {
            None
        }
    }
}
