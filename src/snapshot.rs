//! Optional persisted-queue-state helper, grounded on `state_keeper.py`'s
//! `save_state`/`restore_state`. The queue never calls these itself; a
//! collaborator composes a snapshot from `PlayQueue` and writes it, then
//! reads it back at startup to repopulate the queue via `add`.

use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub current_track_id: Option<u64>,
    pub track_ids: Vec<u64>,
    pub input_module: String,
}

/// Writes to a sibling `.tmp` file and renames over the destination, so a
/// reader never observes a half-written file.
pub fn save_atomic(path: &Path, snapshot: &QueueSnapshot) -> std::io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    let body = serde_json::to_vec_pretty(snapshot)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    std::fs::write(&tmp_path, body)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// A missing file is not an error: returns `None` and logs nothing. A
/// corrupt file logs a warning and also returns `None`, matching
/// `state_keeper.py`'s `except FileNotFoundError` / `except JSONDecodeError`
/// handling.
pub fn load(path: &Path) -> Option<QueueSnapshot> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::info!("no queue snapshot found at {}", path.display());
            return None;
        }
        Err(e) => {
            log::warn!("failed to read queue snapshot at {}: {e}", path.display());
            return None;
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(snapshot) => Some(snapshot),
        Err(e) => {
            log::warn!("failed to parse queue snapshot at {}: {e}", path.display());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        assert!(load(&path).is_none());
    }

    #[test]
    fn round_trips_through_atomic_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let snapshot = QueueSnapshot {
            current_track_id: Some(42),
            track_ids: vec![1, 2, 42],
            input_module: "qobuz".to_string(),
        };
        save_atomic(&path, &snapshot).unwrap();
        let loaded = load(&path).expect("snapshot should load");
        assert_eq!(loaded.current_track_id, Some(42));
        assert_eq!(loaded.track_ids, vec![1, 2, 42]);
        assert_eq!(loaded.input_module, "qobuz");
    }

    #[test]
    fn corrupt_file_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"not json").unwrap();
        assert!(load(&path).is_none());
    }
}
