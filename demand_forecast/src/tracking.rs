//! Experiment tracking sinks
//!
//! The trainer decides what to log for every series fit; a [`TrackingSink`]
//! decides how it is stored.

use crate::error::{ForecastError, Result};
use crate::metrics::MetricsBundle;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

/// Opaque reference to a stored model artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef(pub String);

/// Everything recorded for one series fit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingRecord {
    pub run_id: Uuid,
    pub node: String,
    pub model: String,
    /// Configuration the series was fitted with
    pub config: serde_json::Value,
    pub fold_metrics: Vec<MetricsBundle>,
    pub metrics: MetricsBundle,
    /// In-sample metrics of the final full-history fit
    pub train_metrics: Option<MetricsBundle>,
    pub feature_importance: BTreeMap<String, f64>,
    pub artifact: Option<ArtifactRef>,
}

/// Destination for tracking records and model artifacts
pub trait TrackingSink: Send + Sync {
    /// Persist a fitted model artifact and return a reference to it
    fn store_artifact(
        &self,
        run_id: Uuid,
        node: &str,
        artifact: &serde_json::Value,
    ) -> Result<ArtifactRef>;

    /// Persist one series record
    fn record(&self, record: &TrackingRecord) -> Result<()>;
}

fn poisoned<T>(_: T) -> ForecastError {
    ForecastError::Tracking("tracking sink lock poisoned".to_string())
}

/// In-memory sink for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryTrackingSink {
    records: Mutex<Vec<TrackingRecord>>,
    artifacts: Mutex<BTreeMap<String, serde_json::Value>>,
}

impl InMemoryTrackingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Result<Vec<TrackingRecord>> {
        Ok(self.records.lock().map_err(poisoned)?.clone())
    }

    pub fn artifact(&self, reference: &ArtifactRef) -> Result<Option<serde_json::Value>> {
        Ok(self
            .artifacts
            .lock()
            .map_err(poisoned)?
            .get(&reference.0)
            .cloned())
    }
}

impl TrackingSink for InMemoryTrackingSink {
    fn store_artifact(
        &self,
        run_id: Uuid,
        node: &str,
        artifact: &serde_json::Value,
    ) -> Result<ArtifactRef> {
        let key = format!("{}/{}", run_id, node);
        self.artifacts
            .lock()
            .map_err(poisoned)?
            .insert(key.clone(), artifact.clone());
        Ok(ArtifactRef(key))
    }

    fn record(&self, record: &TrackingRecord) -> Result<()> {
        self.records.lock().map_err(poisoned)?.push(record.clone());
        Ok(())
    }
}

/// File sink: appends records to `records.jsonl` and writes artifacts to
/// `artifacts/<run_id>/<node>.json` under a root directory
#[derive(Debug)]
pub struct JsonlTrackingSink {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlTrackingSink {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("artifacts"))?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn records_path(&self) -> PathBuf {
        self.root.join("records.jsonl")
    }

    /// Read back every record written so far
    pub fn read_records(&self) -> Result<Vec<TrackingRecord>> {
        let path = self.records_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        fs::read_to_string(path)?
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(ForecastError::from))
            .collect()
    }
}

/// File-name-safe form of a node label; other bytes are percent-encoded so
/// distinct labels never share a file
fn file_stem(node: &str) -> String {
    let mut stem = String::with_capacity(node.len());
    for byte in node.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            stem.push(char::from(byte));
        } else {
            stem.push_str(&format!("%{:02X}", byte));
        }
    }
    stem
}

impl TrackingSink for JsonlTrackingSink {
    fn store_artifact(
        &self,
        run_id: Uuid,
        node: &str,
        artifact: &serde_json::Value,
    ) -> Result<ArtifactRef> {
        let dir = self.root.join("artifacts").join(run_id.to_string());
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.json", file_stem(node)));
        fs::write(&path, serde_json::to_vec_pretty(artifact)?)?;
        Ok(ArtifactRef(path.display().to_string()))
    }

    fn record(&self, record: &TrackingRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;
        let _guard = self.write_lock.lock().map_err(poisoned)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.records_path())?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}
