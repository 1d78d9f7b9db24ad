//! Inference Engine: runs a loaded artifact and decodes raw output into
//! domain predictions.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ServingError;
use crate::model_registry::ModelArtifact;
use crate::normalize::{FeatureVector, ImageTensor};

/// Class order the leaf model was trained against. Index-to-label only.
pub const DISEASE_CLASSES: [&str; 2] = ["Early_blight", "Healthy"];

const DISTRIBUTION_TOLERANCE: f32 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropPrediction {
    #[serde(rename = "prediction")]
    pub label: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiseasePrediction {
    #[serde(rename = "prediction")]
    pub label: String,
    pub confidence: f32,
}

impl DiseasePrediction {
    pub fn is_healthy(&self) -> bool { self.label.eq_ignore_ascii_case("healthy") }
}

/// Ordered disease labels. Order must match the model's output indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiseaseClasses(Arc<[String]>);

impl Default for DiseaseClasses {
    fn default() -> Self { Self(DISEASE_CLASSES.iter().map(|s| s.to_string()).collect()) }
}

impl DiseaseClasses {
    pub fn new(names: impl IntoIterator<Item = impl Into<String>>) -> anyhow::Result<Self> {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() { anyhow::bail!("disease class list is empty"); }
        Ok(Self(names.into()))
    }

    /// One label per line; blank lines and `#` comments are skipped.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::new(text.lines().map(str::trim).filter(|l| !l.is_empty() && !l.starts_with('#')))
    }

    pub fn names(&self) -> &[String] { &self.0 }
    pub fn len(&self) -> usize { self.0.len() }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

#[derive(Debug, Clone, Default)]
pub struct InferenceEngine {
    classes: DiseaseClasses,
}

impl InferenceEngine {
    pub fn new(classes: DiseaseClasses) -> Self { Self { classes } }

    pub fn classes(&self) -> &DiseaseClasses { &self.classes }

    pub fn predict_crop(&self, model: &dyn ModelArtifact, features: &FeatureVector) -> Result<CropPrediction, ServingError> {
        if let Some(&[width]) = model.input_shape() {
            if width != features.len() {
                return Err(ServingError::PredictionFailed(format!(
                    "model expects {width} features, got {}", features.len()
                )));
            }
        }
        let input = narrow(features)?;
        let out = model
            .forward(&input, &[1, features.len()])
            .map_err(|e| ServingError::PredictionFailed(format!("{e:#}")))?;
        decode_class_id(&out)
    }

    pub fn predict_disease(&self, model: &dyn ModelArtifact, tensor: &ImageTensor) -> Result<DiseasePrediction, ServingError> {
        if let Some(shape) = model.input_shape() {
            if shape != ImageTensor::SHAPE {
                return Err(ServingError::PredictionFailed(format!(
                    "model expects input {shape:?}, images are {:?}", ImageTensor::SHAPE
                )));
            }
        }
        let out = model
            .forward(tensor.values(), &tensor.batch_shape())
            .map_err(|e| ServingError::PredictionFailed(format!("{e:#}")))?;
        self.decode_distribution(out)
    }

    /// `confidence = max`, `label = classes[argmax]`; the lowest index wins ties.
    pub fn decode_distribution(&self, mut dist: Vec<f32>) -> Result<DiseasePrediction, ServingError> {
        if dist.is_empty() {
            return Err(ServingError::PredictionFailed("model produced no class scores".into()));
        }
        if dist.iter().any(|v| !v.is_finite()) {
            return Err(ServingError::PredictionFailed("model produced non-finite class scores".into()));
        }
        if dist.len() != self.classes.len() {
            return Err(ServingError::PredictionFailed(format!(
                "model produced {} class scores but {} labels are registered", dist.len(), self.classes.len()
            )));
        }
        if !is_distribution(&dist) { softmax(&mut dist); }
        let (index, confidence) = argmax(&dist);
        Ok(DiseasePrediction { label: self.classes.names()[index].clone(), confidence: confidence.clamp(0.0, 1.0) })
    }
}

/// Graphs take `f32`; values beyond its range cannot be represented.
fn narrow(features: &FeatureVector) -> Result<Vec<f32>, ServingError> {
    features
        .values()
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            let x = v as f32;
            if x.is_finite() { Ok(x) } else { Err(ServingError::PredictionFailed(format!("feature {i} ({v}) exceeds f32 range"))) }
        })
        .collect()
}

fn decode_class_id(out: &[f32]) -> Result<CropPrediction, ServingError> {
    match out {
        [v] if v.is_finite() => Ok(CropPrediction { label: v.trunc() as i64 }),
        [v] => Err(ServingError::PredictionFailed(format!("model produced non-finite class id {v}"))),
        _ => Err(ServingError::PredictionFailed(format!("expected a single class id, model produced {} values", out.len()))),
    }
}

fn is_distribution(v: &[f32]) -> bool {
    v.iter().all(|p| (0.0..=1.0).contains(p)) && (v.iter().sum::<f32>() - 1.0).abs() <= DISTRIBUTION_TOLERANCE
}

/// First index attaining the maximum.
fn argmax(v: &[f32]) -> (usize, f32) {
    let mut best = (0, v[0]);
    for (i, &p) in v.iter().enumerate().skip(1) {
        if p > best.1 { best = (i, p); }
    }
    best
}

fn softmax(v: &mut [f32]) {
    if v.is_empty() { return; }
    let max = v.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0;
    for x in v.iter_mut() { *x = (*x - max).exp(); sum += *x; }
    if sum > 0.0 { for x in v.iter_mut() { *x /= sum; } }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::parse_features;

    #[derive(Debug)]
    struct Fixed { shape: Option<Vec<usize>>, out: Result<Vec<f32>, String> }
    impl ModelArtifact for Fixed {
        fn input_shape(&self) -> Option<&[usize]> { self.shape.as_deref() }
        fn forward(&self, _input: &[f32], _shape: &[usize]) -> anyhow::Result<Vec<f32>> {
            self.out.clone().map_err(anyhow::Error::msg)
        }
    }

    fn engine() -> InferenceEngine { InferenceEngine::default() }

    #[test]
    fn crop_returns_integer_class() {
        let m = Fixed { shape: Some(vec![3]), out: Ok(vec![7.0]) };
        let p = engine().predict_crop(&m, &parse_features("1,2,3").unwrap()).unwrap();
        assert_eq!(p.label, 7);
    }

    #[test]
    fn crop_width_mismatch_is_prediction_failure() {
        let m = Fixed { shape: Some(vec![7]), out: Ok(vec![1.0]) };
        let err = engine().predict_crop(&m, &parse_features("1,2,3").unwrap()).unwrap_err();
        assert_eq!(err, ServingError::PredictionFailed("model expects 7 features, got 3".into()));
    }

    #[test]
    fn crop_value_beyond_f32_is_prediction_failure() {
        let m = Fixed { shape: Some(vec![2]), out: Ok(vec![1.0]) };
        let err = engine().predict_crop(&m, &parse_features("1e39,2").unwrap()).unwrap_err();
        assert!(matches!(err, ServingError::PredictionFailed(ref msg) if msg.contains("feature 0")));
    }

    #[test]
    fn crop_runtime_error_carries_message() {
        let m = Fixed { shape: None, out: Err("Incompatible shapes".into()) };
        let err = engine().predict_crop(&m, &parse_features("1").unwrap()).unwrap_err();
        assert!(matches!(err, ServingError::PredictionFailed(ref msg) if msg.contains("Incompatible shapes")));
    }

    #[test]
    fn crop_rejects_multi_value_output() {
        let m = Fixed { shape: None, out: Ok(vec![0.1, 0.9]) };
        assert!(matches!(engine().predict_crop(&m, &parse_features("1").unwrap()), Err(ServingError::PredictionFailed(_))));
    }

    #[test]
    fn decodes_distribution_by_argmax() {
        let p = engine().decode_distribution(vec![0.12, 0.88]).unwrap();
        assert_eq!(p.label, "Healthy");
        assert!((p.confidence - 0.88).abs() < 1e-6);
        assert!(p.is_healthy());
    }

    #[test]
    fn ties_resolve_to_lowest_index() {
        let p = engine().decode_distribution(vec![0.5, 0.5]).unwrap();
        assert_eq!(p.label, "Early_blight");
        assert_eq!(p.confidence, 0.5);
    }

    #[test]
    fn logits_are_softmaxed_into_unit_interval() {
        let p = engine().decode_distribution(vec![3.0, -1.0]).unwrap();
        assert_eq!(p.label, "Early_blight");
        assert!(p.confidence > 0.9 && p.confidence <= 1.0);
    }

    #[test]
    fn class_count_mismatch_is_reported() {
        let err = engine().decode_distribution(vec![0.2, 0.3, 0.5]).unwrap_err();
        assert!(matches!(err, ServingError::PredictionFailed(ref m) if m.contains("3 class scores but 2 labels")));
        assert!(engine().decode_distribution(vec![]).is_err());
        assert!(engine().decode_distribution(vec![f32::NAN, 0.5]).is_err());
    }

    #[test]
    fn disease_shape_mismatch_is_reported() {
        let m = Fixed { shape: Some(vec![224, 224, 3]), out: Ok(vec![0.4, 0.6]) };
        let t = crate::normalize::image_to_tensor(&image::DynamicImage::new_rgb8(8, 8));
        assert!(matches!(engine().predict_disease(&m, &t), Err(ServingError::PredictionFailed(_))));
    }

    #[test]
    fn custom_class_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("classes.txt");
        std::fs::write(&path, "# v2\nEarly_blight\nLate_blight\n\nHealthy\n").unwrap();
        let classes = DiseaseClasses::from_file(&path).unwrap();
        assert_eq!(classes.names(), ["Early_blight", "Late_blight", "Healthy"]);
        std::fs::write(&path, "\n# nothing\n").unwrap();
        assert!(DiseaseClasses::from_file(&path).is_err());
    }
}
