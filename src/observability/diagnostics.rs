//! Per-run diagnostic log.
//!
//! Every record goes to the `log` facade. When the run configuration names a
//! `log_path`, the record is also appended there as one JSON object per line.
//! Opening the file is best-effort: a failure is logged and the run proceeds
//! without a file sink.

use chrono::{SecondsFormat, Utc};
use log::{log, warn, Level};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct RunLog {
    sink: Option<Mutex<File>>,
}

impl RunLog {
    /// Empty `path` disables the file sink.
    pub fn open(path: &str) -> Self {
        if path.is_empty() {
            return Self::default();
        }
        match OpenOptions::new().create(true).append(true).open(Path::new(path)) {
            Ok(file) => Self {
                sink: Some(Mutex::new(file)),
            },
            Err(e) => {
                warn!("Cannot open run log {}: {}", path, e);
                Self::default()
            }
        }
    }

    pub fn has_sink(&self) -> bool {
        self.sink.is_some()
    }

    pub fn record(&self, level: Level, message: std::fmt::Arguments<'_>) {
        log!(level, "{}", message);

        let Some(sink) = &self.sink else {
            return;
        };
        let entry = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            "level": level.as_str(),
            "pid": std::process::id(),
            "message": message.to_string(),
        });
        if let Ok(mut file) = sink.lock() {
            if let Err(e) = writeln!(file, "{}", entry) {
                warn!("Failed to write run log: {}", e);
            }
        }
    }

    pub fn info(&self, message: std::fmt::Arguments<'_>) {
        self.record(Level::Info, message);
    }

    pub fn warn(&self, message: std::fmt::Arguments<'_>) {
        self.record(Level::Warn, message);
    }

    pub fn error(&self, message: std::fmt::Arguments<'_>) {
        self.record(Level::Error, message);
    }
}
