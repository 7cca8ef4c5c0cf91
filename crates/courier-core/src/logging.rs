//! Per-connection traffic logs.
//!
//! Each bridge process can mirror its stdio to `{log_dir}/{log_id}.log`,
//! one timestamped line per message.

use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::Path,
    sync::{Arc, Mutex},
};

use chrono::{SecondsFormat, Utc};

/// Thread-safe handle to an append-only log file.
pub type LogHandle = Arc<Mutex<Option<File>>>;

/// Current UTC time as ISO 8601 with milliseconds (e.g. 2026-02-04T10:15:30.123Z).
pub fn utc_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Write a timestamped line to the log file (if present).
pub fn log_line(handle: &LogHandle, direction: &str, data: &str) {
    if let Ok(mut guard) = handle.lock() {
        if let Some(ref mut file) = *guard {
            let _ = writeln!(file, "[{}] {}: {}", utc_timestamp(), direction, data);
            let _ = file.flush();
        }
    }
}

/// Open (or create) `{log_dir}/{log_id}.log`. Without a directory, or on any
/// I/O failure, the handle is empty and logging is a no-op.
pub fn open_log_file(log_dir: Option<&str>, log_id: &str) -> LogHandle {
    let file = log_dir.and_then(|dir| {
        let path = Path::new(dir).join(format!("{}.log", log_id));
        std::fs::create_dir_all(dir).ok()?;
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok()
    });
    Arc::new(Mutex::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn utc_timestamp_format() {
        let ts = utc_timestamp();
        assert!(ts.ends_with('Z'));
        assert_eq!(ts.len(), 24);
        assert_eq!(&ts[10..11], "T");
        assert_eq!(&ts[19..20], ".");
    }

    #[test]
    fn open_log_file_none_dir() {
        let handle = open_log_file(None, "bridge");
        assert!(handle.lock().unwrap().is_none());
    }

    #[test]
    fn log_line_appends_to_file() {
        let dir = tempdir().unwrap();
        let log_dir = dir.path().to_str().unwrap();

        let handle = open_log_file(Some(log_dir), "bridge");
        log_line(&handle, "SEND", "{\"id\":1}");
        log_line(&handle, "RECV", "{\"id\":1,\"result\":null}");

        let contents = std::fs::read_to_string(dir.path().join("bridge.log")).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("SEND: {\"id\":1}"));
        assert!(lines[1].contains("RECV: "));
    }

    #[test]
    fn log_line_handles_none_file() {
        let handle: LogHandle = Arc::new(Mutex::new(None));
        log_line(&handle, "SEND", "test");
    }
}
