//! Audio device selection for C5.
//!
//! Simplified from this module's prior `AudioBackend` trait / `BackendManager`
//! device enumeration (PipeWire vs ALSA vs PulseAudio catalogs, `pactl`
//! probing) down to the actual contract the output sink needs: device
//! selection is a name string handed to the sink at construction, with no
//! discovery surface of its own. `AlsaDirectError`'s classifier is kept
//! unchanged -- it still grounds the sink's device-error taxonomy.

use rodio::cpal::traits::{DeviceTrait, HostTrait};
use rodio::{OutputStream, OutputStreamHandle};

pub type BackendResult<T> = Result<T, String>;

/// ALSA Direct stream error classification, surfaced in the sink's
/// `EngineError::Device` message when opening `hw:X,Y` fails.
#[derive(Debug, Clone)]
pub enum AlsaDirectError {
    UnsupportedFormat(String),
    DeviceBusy(String),
    PermissionDenied(String),
    InvalidParams(String),
    DeviceNotFound(String),
    Other(String),
}

impl std::fmt::Display for AlsaDirectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlsaDirectError::UnsupportedFormat(msg) => write!(f, "unsupported format: {msg}"),
            AlsaDirectError::DeviceBusy(msg) => write!(f, "device busy: {msg}"),
            AlsaDirectError::PermissionDenied(msg) => write!(f, "permission denied: {msg}"),
            AlsaDirectError::InvalidParams(msg) => write!(f, "invalid parameters: {msg}"),
            AlsaDirectError::DeviceNotFound(msg) => write!(f, "device not found: {msg}"),
            AlsaDirectError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl AlsaDirectError {
    pub fn from_alsa_error(msg: &str) -> Self {
        let msg_lower = msg.to_lowercase();

        if msg_lower.contains("no supported audio format")
            || msg_lower.contains("format")
            || msg_lower.contains("s24_3le")
            || msg_lower.contains("s24le")
            || msg_lower.contains("sample format")
        {
            AlsaDirectError::UnsupportedFormat(msg.to_string())
        } else if msg_lower.contains("busy")
            || msg_lower.contains("resource temporarily unavailable")
            || msg_lower.contains("device or resource busy")
        {
            AlsaDirectError::DeviceBusy(msg.to_string())
        } else if msg_lower.contains("permission")
            || msg_lower.contains("access denied")
            || msg_lower.contains("operation not permitted")
        {
            AlsaDirectError::PermissionDenied(msg.to_string())
        } else if msg_lower.contains("not found")
            || msg_lower.contains("no such")
            || msg_lower.contains("doesn't exist")
        {
            AlsaDirectError::DeviceNotFound(msg.to_string())
        } else if msg_lower.contains("invalid")
            || msg_lower.contains("channels")
            || msg_lower.contains("rate")
        {
            AlsaDirectError::InvalidParams(msg.to_string())
        } else {
            AlsaDirectError::Other(msg.to_string())
        }
    }
}

/// `true` for `hw:`/`plughw:` device strings, which bypass rodio/CPAL entirely.
pub fn is_alsa_direct_device(device_name: &str) -> bool {
    crate::audio::alsa_direct::AlsaDirectStream::is_hw_device(device_name)
}

/// Opens a rodio output stream through CPAL (PipeWire, PulseAudio, or plain
/// ALSA), selecting by device name and falling back to the host's default
/// device when none is given.
pub fn open_rodio_device(
    device_name: Option<&str>,
) -> BackendResult<(OutputStream, OutputStreamHandle)> {
    let host = rodio::cpal::default_host();
    let device = match device_name {
        Some(name) => host
            .output_devices()
            .map_err(|e| format!("failed to enumerate output devices: {e}"))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| format!("output device not found: {name}"))?,
        None => host
            .default_output_device()
            .ok_or_else(|| "no default output device".to_string())?,
    };
    OutputStream::try_from_device(&device).map_err(|e| format!("failed to open output stream: {e}"))
}
