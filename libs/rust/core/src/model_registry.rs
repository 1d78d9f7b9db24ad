//! Model Registry: one slot per predictive task, loaded once at startup.
//!
//! A slot whose artifact fails to load stays `Unavailable` for the process
//! lifetime. The registry is immutable after construction and is shared as
//! `Arc<ModelRegistry>`; readers need no locking.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::metrics::SERVING_METRICS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind { Crop, Disease }

impl ModelKind {
    pub const ALL: [ModelKind; 2] = [ModelKind::Crop, ModelKind::Disease];
    pub fn as_str(&self) -> &'static str { match self { ModelKind::Crop => "crop", ModelKind::Disease => "disease" } }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus { Loaded, Unavailable }

/// A loaded predictive artifact. Implementations must be pure reads of
/// their weights so many requests can run concurrently.
pub trait ModelArtifact: Send + Sync + fmt::Debug {
    /// Per-sample input shape (batch dimension excluded), when the artifact declares a concrete one.
    fn input_shape(&self) -> Option<&[usize]>;

    /// Runs one forward pass. `shape` includes the batch dimension; the
    /// first output tensor is returned flattened as `f32`.
    fn forward(&self, input: &[f32], shape: &[usize]) -> anyhow::Result<Vec<f32>>;
}

/// Where an artifact is loaded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSource {
    pub path: PathBuf,
    /// Expected hex SHA-256 of the artifact file; a mismatch fails the load.
    pub sha256: Option<String>,
    /// Concrete per-sample input shape to pin on graphs with symbolic dims.
    pub input_shape: Option<Vec<usize>>,
}

impl ModelSource {
    pub fn new(path: impl Into<PathBuf>) -> Self { Self { path: path.into(), sha256: None, input_shape: None } }
    pub fn with_sha256(mut self, sha256: Option<String>) -> Self { self.sha256 = sha256.filter(|s| !s.is_empty()); self }
    pub fn with_input_shape(mut self, shape: Option<Vec<usize>>) -> Self { self.input_shape = shape; self }
}

pub trait ArtifactLoader: Send + Sync {
    fn load(&self, kind: ModelKind, source: &ModelSource) -> anyhow::Result<Arc<dyn ModelArtifact>>;
}

#[derive(Debug, Clone)]
pub struct ModelSlot {
    pub kind: ModelKind,
    pub status: SlotStatus,
    pub artifact: Option<Arc<dyn ModelArtifact>>,
    pub source: Option<PathBuf>,
    pub load_error: Option<String>,
}

impl ModelSlot {
    pub fn loaded(kind: ModelKind, artifact: Arc<dyn ModelArtifact>) -> Self {
        Self { kind, status: SlotStatus::Loaded, artifact: Some(artifact), source: None, load_error: None }
    }

    pub fn unavailable(kind: ModelKind, reason: impl Into<String>) -> Self {
        Self { kind, status: SlotStatus::Unavailable, artifact: None, source: None, load_error: Some(reason.into()) }
    }

    /// Attempts the load exactly once. Failure yields a permanently unavailable slot.
    pub fn load(kind: ModelKind, source: &ModelSource, loader: &dyn ArtifactLoader) -> Self {
        let start = Instant::now();
        let outcome = verify_digest(source).and_then(|_| loader.load(kind, source));
        let mut slot = match outcome {
            Ok(artifact) => {
                info!(%kind, path=?source.path, elapsed_ms=start.elapsed().as_millis() as u64, "model loaded");
                Self::loaded(kind, artifact)
            }
            Err(e) => {
                warn!(%kind, path=?source.path, error=%format!("{e:#}"), "model unavailable");
                Self::unavailable(kind, format!("{e:#}"))
            }
        };
        slot.source = Some(source.path.clone());
        slot
    }

    pub fn is_loaded(&self) -> bool { self.status == SlotStatus::Loaded }
}

fn verify_digest(source: &ModelSource) -> anyhow::Result<()> {
    let Some(expect) = &source.sha256 else { return Ok(()) };
    let bytes = std::fs::read(&source.path)?;
    let got = hex::encode(Sha256::digest(&bytes));
    if !expect.eq_ignore_ascii_case(&got) {
        anyhow::bail!("model hash mismatch expected={expect} got={got}");
    }
    Ok(())
}

/// Serializable view of a slot for status endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotInfo {
    pub kind: ModelKind,
    pub status: SlotStatus,
    pub source: Option<PathBuf>,
    pub error: Option<String>,
}

#[derive(Debug)]
pub struct ModelRegistry {
    crop: ModelSlot,
    disease: ModelSlot,
}

impl ModelRegistry {
    /// Loads every configured kind once. Kinds without a source are unavailable.
    pub fn initialize(sources: &[(ModelKind, ModelSource)], loader: &dyn ArtifactLoader) -> Self {
        let slot_for = |kind: ModelKind| {
            sources.iter().find(|(k, _)| *k == kind)
                .map(|(_, src)| ModelSlot::load(kind, src, loader))
                .unwrap_or_else(|| ModelSlot::unavailable(kind, "no artifact configured"))
        };
        Self::from_slots([slot_for(ModelKind::Crop), slot_for(ModelKind::Disease)])
    }

    /// Builds a registry from already-resolved slots; kinds not given are unavailable.
    pub fn from_slots(slots: impl IntoIterator<Item = ModelSlot>) -> Self {
        let mut crop = ModelSlot::unavailable(ModelKind::Crop, "no artifact configured");
        let mut disease = ModelSlot::unavailable(ModelKind::Disease, "no artifact configured");
        for slot in slots {
            match slot.kind { ModelKind::Crop => crop = slot, ModelKind::Disease => disease = slot }
        }
        let registry = Self { crop, disease };
        for slot in registry.slots() {
            SERVING_METRICS.model_loaded.with_label_values(&[slot.kind.as_str()]).set(slot.is_loaded() as i64);
        }
        registry
    }

    pub fn slot(&self, kind: ModelKind) -> &ModelSlot {
        match kind { ModelKind::Crop => &self.crop, ModelKind::Disease => &self.disease }
    }

    /// Absence is an ordinary outcome; callers branch on it before use.
    pub fn get(&self, kind: ModelKind) -> Option<Arc<dyn ModelArtifact>> { self.slot(kind).artifact.clone() }

    pub fn slots(&self) -> impl Iterator<Item = &ModelSlot> { [&self.crop, &self.disease].into_iter() }

    pub fn describe(&self) -> Vec<SlotInfo> {
        self.slots().map(|s| SlotInfo { kind: s.kind, status: s.status, source: s.source.clone(), error: s.load_error.clone() }).collect()
    }
}
