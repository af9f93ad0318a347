use crate::errors::EnrollerError;
use crate::log_retention::enforce_total_budget;
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

pub const DEFAULT_DISK_BUDGET_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct JsonlLogger {
    pub path: PathBuf,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEvent<'a> {
    pub level: &'a str,
    pub event_type: &'a str,
    pub payload: Value,
}

impl JsonlLogger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_payload_bytes: 4096,
            budget_bytes: DEFAULT_DISK_BUDGET_BYTES,
        }
    }

    pub fn append(&self, event: &LogEvent<'_>) -> Result<(), EnrollerError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| EnrollerError::Io(e.to_string()))?;
        }
        let truncated = truncate_json(event.payload.clone(), self.max_payload_bytes);
        let line = serde_json::to_string(&LogEvent {
            level: event.level,
            event_type: event.event_type,
            payload: truncated,
        })
        .map_err(|e| EnrollerError::Io(e.to_string()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| EnrollerError::Io(e.to_string()))?;
        file.write_all(line.as_bytes())
            .map_err(|e| EnrollerError::Io(e.to_string()))?;
        file.write_all(b"\n")
            .map_err(|e| EnrollerError::Io(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            let _ = enforce_total_budget(parent, self.budget_bytes)?;
        }

        Ok(())
    }
}

static RUN_LOGGER: OnceLock<Mutex<Option<Arc<JsonlLogger>>>> = OnceLock::new();

fn logger_slot() -> &'static Mutex<Option<Arc<JsonlLogger>>> {
    RUN_LOGGER.get_or_init(|| Mutex::new(None))
}

/// Point the global run logger at `path` for the duration of a run.
pub fn init_run_logger(logger: JsonlLogger) {
    *logger_slot().lock().expect("run logger init lock") = Some(Arc::new(logger));
}

pub fn clear_run_logger() {
    *logger_slot().lock().expect("run logger clear lock") = None;
}

/// Append an event to the run log if one is active. Logging must never
/// interfere with the run, so failures are dropped.
pub fn append_run_log(level: &str, event_type: &str, payload: Value) {
    let guard = logger_slot().lock().expect("run logger emit lock");
    if let Some(logger) = guard.as_ref() {
        let logger = Arc::clone(logger);
        drop(guard);
        let _ = logger.append(&LogEvent {
            level,
            event_type,
            payload,
        });
    }
}

/// Run a fallible side operation whose failure must not alter the caller's
/// outcome. Errors are logged under `context` and discarded.
pub fn best_effort<T>(context: &str, result: Result<T, EnrollerError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(error) => {
            append_run_log(
                "warn",
                "best_effort.failed",
                serde_json::json!({ "context": context, "error": error.to_string() }),
            );
            None
        }
    }
}

fn truncate_json(value: Value, max_bytes: usize) -> Value {
    let rendered = serde_json::to_string(&value).unwrap_or_default();
    if rendered.len() <= max_bytes {
        return value;
    }
    let mut truncated = rendered;
    truncated.truncate(max_bytes.saturating_sub(3));
    Value::String(format!("{truncated}..."))
}
