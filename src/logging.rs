//! JSON line-delimited event logging.
//!
//! Each event is one JSON object per line:
//! `{"timestamp_ms": .., "event": "..", "data": {..}}`. Nothing is written until
//! [`init`] installs a sink, so library users and tests pay nothing by default.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::json;

use crate::config::LoggingConfig;

static SINK: OnceLock<Mutex<Option<BufWriter<File>>>> = OnceLock::new();

fn sink() -> &'static Mutex<Option<BufWriter<File>>> {
    SINK.get_or_init(|| Mutex::new(None))
}

fn poisoned() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "log sink mutex poisoned")
}

/// Installs (or removes) the process-wide sink described by `config`.
pub fn init(config: &LoggingConfig) -> io::Result<()> {
    let writer = match (&config.path, config.enabled) {
        (Some(path), true) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(BufWriter::new(file))
        }
        _ => None,
    };
    let mut guard = sink().lock().map_err(|_| poisoned())?;
    if let Some(previous) = guard.as_mut() {
        previous.flush()?;
    }
    *guard = writer;
    Ok(())
}

/// Appends one event. A no-op while no sink is installed.
pub fn log_event<T: Serialize>(event: &str, data: &T) -> io::Result<()> {
    let mut guard = sink().lock().map_err(|_| poisoned())?;
    let Some(writer) = guard.as_mut() else {
        return Ok(());
    };
    let timestamp_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default();
    let data = serde_json::to_value(data)?;
    let line = json!({
        "timestamp_ms": timestamp_ms,
        "event": event,
        "data": data,
    });
    serde_json::to_writer(&mut *writer, &line)?;
    writer.write_all(b"\n")?;
    writer.flush()
}
