//! Sensor history: an append-only, externally fed sequence of readings.

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorRecord {
    pub timestamp: String,
    pub soil_moisture: f64,
    /// Serialized under the CSV column name.
    #[serde(rename = "temp", alias = "temperature")]
    pub temperature: f64,
    pub humidity: f64,
    /// 0 or 1
    pub leaf_wetness: f64,
}

#[derive(Debug, Clone, Default)]
pub struct SensorLog {
    records: Arc<RwLock<Vec<SensorRecord>>>,
}

impl SensorLog {
    pub fn new() -> Self { Self::default() }

    /// Reads `timestamp,soil_moisture,temp,humidity,leaf_wetness` rows.
    pub fn from_csv_path(path: &Path) -> anyhow::Result<Self> {
        let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_path(path)?;
        let mut records = Vec::new();
        for row in reader.deserialize() {
            records.push(row?);
        }
        Ok(Self { records: Arc::new(RwLock::new(records)) })
    }

    pub fn push(&self, record: SensorRecord) { self.records.write().push(record); }

    /// Last `n` records, oldest first.
    pub fn tail(&self, n: usize) -> Vec<SensorRecord> {
        let r = self.records.read();
        let start = r.len().saturating_sub(n);
        r[start..].to_vec()
    }

    pub fn latest(&self) -> Option<SensorRecord> { self.records.read().last().cloned() }

    pub fn len(&self) -> usize { self.records.read().len() }
    pub fn is_empty(&self) -> bool { self.records.read().is_empty() }
}
