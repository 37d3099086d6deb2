use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use serde_json::{Map, Value};

use crate::bundle::analysis_timestamp_now;

pub type EventPayload = Map<String, Value>;

/// Append-only `events.jsonl` log for analysis runs.
///
/// Every line is one compact JSON object with `type`, `run_id` and `ts`
/// first; payload keys are merged after and win on collision. Clones share
/// one file handle, opened on the first event, so specialists running on
/// worker threads never interleave lines.
#[derive(Debug, Clone)]
pub struct EventWriter {
    log: Arc<RunLog>,
}

#[derive(Debug)]
struct RunLog {
    path: PathBuf,
    run_id: String,
    file: Mutex<Option<File>>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            log: Arc::new(RunLog {
                path: path.into(),
                run_id: run_id.into(),
                file: Mutex::new(None),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.log.path
    }

    pub fn run_id(&self) -> &str {
        &self.log.run_id
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let event = self.envelope(event_type, payload);
        let line = serde_json::to_string(&event)?;

        let mut slot = self
            .log
            .file
            .lock()
            .map_err(|_| anyhow::anyhow!("event log for {} poisoned", self.log.run_id))?;
        let file = match &mut *slot {
            Some(file) => file,
            empty => empty.insert(self.log.open()?),
        };
        writeln!(file, "{line}")
            .with_context(|| format!("failed to append to {}", self.log.path.display()))?;
        Ok(event)
    }

    fn envelope(&self, event_type: &str, payload: EventPayload) -> Value {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::from(event_type));
        event.insert("run_id".to_string(), Value::from(self.log.run_id.as_str()));
        event.insert("ts".to_string(), Value::from(analysis_timestamp_now()));
        event.extend(payload);
        Value::Object(event)
    }
}

impl RunLog {
    fn open(&self) -> anyhow::Result<File> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))
    }
}

/// Reads back every well-formed event line; malformed lines are skipped.
pub fn read_events(path: &Path) -> anyhow::Result<Vec<Value>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed reading {}", path.display()))?;
    Ok(raw
        .lines()
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .collect())
}
