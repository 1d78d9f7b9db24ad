//! Instantaneous field-risk classification over the latest sensor record.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::sensor::SensorRecord;

/// Soil moisture (%) below which the field is considered drought-stressed.
pub const DROUGHT_SOIL_MOISTURE: f64 = 15.0;
/// Relative humidity (%) above which wet leaves indicate pest/disease pressure.
pub const PEST_HUMIDITY: f64 = 70.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus { DroughtRisk, PestDiseaseRisk, Normal }

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity { Ok, Warning, Critical }

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self { AlertStatus::DroughtRisk => "drought_risk", AlertStatus::PestDiseaseRisk => "pest_disease_risk", AlertStatus::Normal => "normal" }
    }

    pub fn message(&self) -> &'static str {
        match self {
            AlertStatus::DroughtRisk => "Drought Risk: Low Soil Moisture",
            AlertStatus::PestDiseaseRisk => "Pest/Disease Risk: High humidity + wet leaves",
            AlertStatus::Normal => "Conditions Normal",
        }
    }

    pub fn severity(&self) -> Severity {
        match self { AlertStatus::DroughtRisk => Severity::Critical, AlertStatus::PestDiseaseRisk => Severity::Warning, AlertStatus::Normal => Severity::Ok }
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.message()) }
}

/// First matching rule wins: drought, then pest/disease, else normal.
pub fn evaluate(record: &SensorRecord) -> AlertStatus {
    if record.soil_moisture < DROUGHT_SOIL_MOISTURE {
        AlertStatus::DroughtRisk
    } else if record.humidity > PEST_HUMIDITY && record.leaf_wetness == 1.0 {
        AlertStatus::PestDiseaseRisk
    } else {
        AlertStatus::Normal
    }
}

/// Evaluates only the most recent record; `None` when there is no data yet.
pub fn evaluate_latest(tail: &[SensorRecord]) -> Option<AlertStatus> { tail.last().map(evaluate) }
