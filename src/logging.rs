//! JSON line-delimited operation log.
//!
//! Every record is a single JSON object on its own line with a millisecond
//! timestamp, the operation name and a serialized payload. The destination is
//! `logs/visualizer.jsonl` unless `FILTER_VISUALIZER_LOG` names another file;
//! setting it to `off` disables logging. [`redirect`] overrides both for the
//! rest of the process.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

const LOG_ENV: &str = "FILTER_VISUALIZER_LOG";
const DEFAULT_LOG_PATH: &str = "logs/visualizer.jsonl";

static REDIRECT: OnceLock<Option<PathBuf>> = OnceLock::new();

#[derive(Serialize)]
struct LogRecord<'a, T: Serialize> {
    timestamp_ms: u128,
    operation: &'a str,
    payload: &'a T,
}

/// Per-iteration record of the gradient ascent loop.
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub filter: usize,
    pub iteration: usize,
    pub loss: f32,
    pub mean: f32,
    pub std: f32,
    pub min: f32,
    pub max: f32,
}

/// Record emitted once a filter's visualization is finished.
#[derive(Debug, Clone, Serialize)]
pub struct FilterRecord {
    pub filter: usize,
    pub iterations: usize,
    pub final_loss: Option<f32>,
    pub completed: usize,
}

/// Sends every later record to `path`, or nowhere when `None`.
///
/// Only the first call takes effect; returns whether this one did.
pub fn redirect(path: Option<PathBuf>) -> bool {
    REDIRECT.set(path).is_ok()
}

fn log_path() -> Option<PathBuf> {
    if let Some(path) = REDIRECT.get() {
        return path.clone();
    }
    if cfg!(test) {
        return None;
    }
    match std::env::var(LOG_ENV) {
        Ok(value) if value.eq_ignore_ascii_case("off") => None,
        Ok(value) if !value.trim().is_empty() => Some(PathBuf::from(value)),
        _ => Some(PathBuf::from(DEFAULT_LOG_PATH)),
    }
}

pub fn log_operation<T: Serialize>(operation: &str, payload: &T) -> io::Result<()> {
    match log_path() {
        Some(path) => append_record(&path, operation, payload),
        None => Ok(()),
    }
}

fn append_record<T: Serialize>(path: &Path, operation: &str, payload: &T) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let timestamp_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let record = LogRecord {
        timestamp_ms,
        operation,
        payload,
    };
    let line = serde_json::to_string(&record).map_err(io::Error::other)?;

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")
}

pub fn log_step(record: &StepRecord) {
    if let Err(err) = log_operation("ascent_step", record) {
        eprintln!("failed to log ascent_step: {err}");
    }
}

pub fn log_filter(record: &FilterRecord) {
    if let Err(err) = log_operation("filter_complete", record) {
        eprintln!("failed to log filter_complete: {err}");
    }
}
