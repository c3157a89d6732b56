//! Log capture. Grounded on this module's prior form: an `env_logger` writer
//! teed into a bounded in-memory ring buffer, generalized away from the
//! Tauri "View Logs" command into a plain function a host application (or a
//! test) can call directly.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::{LazyLock, Mutex, Once};

const MAX_LOG_LINES: usize = 5000;

static LOG_BUFFER: LazyLock<Mutex<VecDeque<String>>> =
    LazyLock::new(|| Mutex::new(VecDeque::with_capacity(MAX_LOG_LINES)));

static INIT: Once = Once::new();

fn push_log(line: String) {
    if let Ok(mut buf) = LOG_BUFFER.lock() {
        if buf.len() >= MAX_LOG_LINES {
            buf.pop_front();
        }
        buf.push_back(line);
    }
}

/// Every captured log line, oldest first, capped at `MAX_LOG_LINES`.
pub fn recent_lines() -> Vec<String> {
    LOG_BUFFER
        .lock()
        .map(|buf| buf.iter().cloned().collect())
        .unwrap_or_default()
}

struct TeeWriter;

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        std::io::stderr().write_all(buf)?;
        if let Ok(s) = std::str::from_utf8(buf) {
            for line in s.lines() {
                if !line.is_empty() {
                    push_log(line.to_string());
                }
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        std::io::stderr().flush()
    }
}

/// Installs `env_logger` with a ring-buffer tee. Safe to call more than once
/// (from multiple tests in the same process); only the first call takes effect.
pub fn init() {
    INIT.call_once(|| {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(TeeWriter)))
            .try_init()
            .ok();
    });
}
