//! ONNX artifacts executed with tract.
//!
//! Both the crop and the leaf classifier are shipped as ONNX graphs. The
//! graph is optimized once at load time and then only read, so a single
//! plan serves concurrent requests.

use std::fmt;
use std::sync::Arc;

#[cfg(feature = "onnx")] use anyhow::Context;
#[cfg(feature = "onnx")] use tract_onnx::prelude::*;

use crate::model_registry::{ArtifactLoader, ModelArtifact, ModelKind, ModelSource};

#[derive(Debug, Clone, Copy, Default)]
pub struct OnnxLoader;

impl ArtifactLoader for OnnxLoader {
    fn load(&self, kind: ModelKind, source: &ModelSource) -> anyhow::Result<Arc<dyn ModelArtifact>> {
        Ok(Arc::new(OnnxArtifact::load(kind, source)?))
    }
}

pub struct OnnxArtifact {
    kind: ModelKind,
    #[cfg(feature = "onnx")] plan: TypedRunnableModel<TypedModel>,
    input_shape: Option<Vec<usize>>,
}

impl fmt::Debug for OnnxArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnnxArtifact").field("kind", &self.kind).field("input_shape", &self.input_shape).finish()
    }
}

impl OnnxArtifact {
    #[cfg(feature = "onnx")]
    pub fn load(kind: ModelKind, source: &ModelSource) -> anyhow::Result<Self> {
        let mut model = tract_onnx::onnx()
            .model_for_path(&source.path)
            .with_context(|| format!("reading {kind} model {:?}", source.path))?;
        if let Some(sample) = &source.input_shape {
            let mut shape = vec![1usize];
            shape.extend_from_slice(sample);
            model = model.with_input_fact(0, f32::fact(shape).into())?;
        }
        let plan = model.into_optimized()?.into_runnable()?;
        // batch dimension dropped; symbolic shapes stay unknown and are left to the graph to reject
        let input_shape = plan
            .model()
            .input_fact(0)
            .ok()
            .and_then(|f| f.shape.as_concrete().map(|s| s.iter().skip(1).copied().collect::<Vec<_>>()));
        let this = Self { kind, plan, input_shape };
        this.warmup()?;
        Ok(this)
    }

    #[cfg(not(feature = "onnx"))]
    pub fn load(kind: ModelKind, source: &ModelSource) -> anyhow::Result<Self> {
        anyhow::bail!("{kind} model {:?}: built without onnx support", source.path)
    }

    /// Runs a zero input once so graph errors surface at load, not on the first request.
    #[cfg(feature = "onnx")]
    fn warmup(&self) -> anyhow::Result<()> {
        let Some(sample) = &self.input_shape else { return Ok(()) };
        let mut shape = vec![1usize];
        shape.extend_from_slice(sample);
        let zeros = vec![0.0f32; shape.iter().product()];
        self.forward(&zeros, &shape).with_context(|| format!("warming up {} model", self.kind))?;
        Ok(())
    }
}

impl ModelArtifact for OnnxArtifact {
    fn input_shape(&self) -> Option<&[usize]> { self.input_shape.as_deref() }

    #[cfg(feature = "onnx")]
    fn forward(&self, input: &[f32], shape: &[usize]) -> anyhow::Result<Vec<f32>> {
        let tensor = Tensor::from_shape(shape, input)?;
        let outputs = self.plan.run(tvec!(tensor.into()))?;
        let first = outputs.first().context("model produced no outputs")?;
        // label outputs of tabular classifiers are integer tensors
        let as_f32 = first.cast_to::<f32>()?;
        Ok(as_f32.as_slice::<f32>()?.to_vec())
    }

    #[cfg(not(feature = "onnx"))]
    fn forward(&self, _input: &[f32], _shape: &[usize]) -> anyhow::Result<Vec<f32>> {
        anyhow::bail!("built without onnx support")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_fails_to_load() {
        let src = ModelSource::new("/nonexistent/plant_disease_model.onnx");
        let err = OnnxLoader.load(ModelKind::Disease, &src).unwrap_err();
        assert!(format!("{err:#}").contains("plant_disease_model.onnx"));
    }

    #[test]
    fn garbage_file_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crop_model.onnx");
        std::fs::write(&path, b"not a protobuf graph").unwrap();
        assert!(OnnxLoader.load(ModelKind::Crop, &ModelSource::new(&path)).is_err());
    }
}
