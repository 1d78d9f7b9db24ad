//! Closed error taxonomy crossing the serving boundary.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model_registry::ModelKind;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServingError {
    /// Artifact failed to load at startup. Permanent for the process lifetime.
    #[error("{0} model not available")]
    ModelNotAvailable(ModelKind),
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("undecodable image: {0}")]
    UndecodableImage(String),
    #[error("prediction failed: {0}")]
    PredictionFailed(String),
    /// Only produced by the remote adapter when the gateway cannot be reached.
    #[error("gateway unreachable: {0}")]
    Unreachable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ModelNotAvailable,
    MalformedInput,
    UndecodableImage,
    PredictionFailed,
    Unreachable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusHint {
    /// Retry later, nothing is deployed (or reachable).
    Unavailable,
    /// The request itself failed.
    Failure,
}

impl ServingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServingError::ModelNotAvailable(_) => ErrorKind::ModelNotAvailable,
            ServingError::MalformedInput(_) => ErrorKind::MalformedInput,
            ServingError::UndecodableImage(_) => ErrorKind::UndecodableImage,
            ServingError::PredictionFailed(_) => ErrorKind::PredictionFailed,
            ServingError::Unreachable(_) => ErrorKind::Unreachable,
        }
    }

    pub fn status_hint(&self) -> StatusHint {
        match self {
            ServingError::ModelNotAvailable(_) | ServingError::Unreachable(_) => StatusHint::Unavailable,
            _ => StatusHint::Failure,
        }
    }

    /// Label used for the `outcome` metric dimension.
    pub fn outcome(&self) -> &'static str {
        match self.kind() {
            ErrorKind::ModelNotAvailable => "model_not_available",
            ErrorKind::MalformedInput => "malformed_input",
            ErrorKind::UndecodableImage => "undecodable_image",
            ErrorKind::PredictionFailed => "prediction_failed",
            ErrorKind::Unreachable => "unreachable",
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody { error: self.to_string(), kind: self.kind(), status_hint: self.status_hint(), model: self.model_kind() }
    }

    fn model_kind(&self) -> Option<ModelKind> {
        match self { ServingError::ModelNotAvailable(k) => Some(*k), _ => None }
    }
}

/// Wire form of a [`ServingError`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: ErrorKind,
    pub status_hint: StatusHint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelKind>,
}

impl From<ErrorBody> for ServingError {
    fn from(body: ErrorBody) -> Self {
        let detail = strip_prefix(&body.error, body.kind);
        match body.kind {
            // model name travels separately; older bodies without it fall back to the message
            ErrorKind::ModelNotAvailable => ServingError::ModelNotAvailable(
                body.model.unwrap_or(if body.error.starts_with("disease") { ModelKind::Disease } else { ModelKind::Crop }),
            ),
            ErrorKind::MalformedInput => ServingError::MalformedInput(detail),
            ErrorKind::UndecodableImage => ServingError::UndecodableImage(detail),
            ErrorKind::PredictionFailed => ServingError::PredictionFailed(detail),
            ErrorKind::Unreachable => ServingError::Unreachable(detail),
        }
    }
}

fn strip_prefix(msg: &str, kind: ErrorKind) -> String {
    let prefix = match kind {
        ErrorKind::MalformedInput => "malformed input: ",
        ErrorKind::UndecodableImage => "undecodable image: ",
        ErrorKind::PredictionFailed => "prediction failed: ",
        ErrorKind::Unreachable => "gateway unreachable: ",
        ErrorKind::ModelNotAvailable => "",
    };
    msg.strip_prefix(prefix).unwrap_or(msg).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_available_is_distinguishable() {
        let e = ServingError::ModelNotAvailable(ModelKind::Disease);
        assert_eq!(e.status_hint(), StatusHint::Unavailable);
        assert_eq!(e.to_string(), "disease model not available");
        let other = ServingError::PredictionFailed("shape".into());
        assert_eq!(other.status_hint(), StatusHint::Failure);
    }

    #[test]
    fn body_round_trips_through_wire() {
        for err in [
            ServingError::ModelNotAvailable(ModelKind::Crop),
            ServingError::ModelNotAvailable(ModelKind::Disease),
            ServingError::MalformedInput("token 2 is not a number".into()),
            ServingError::UndecodableImage("unsupported format".into()),
            ServingError::PredictionFailed("expected 7 features, got 3".into()),
        ] {
            let json = serde_json::to_string(&err.to_body()).unwrap();
            let back: ErrorBody = serde_json::from_str(&json).unwrap();
            assert_eq!(ServingError::from(back), err);
        }
    }

    #[test]
    fn body_uses_snake_case_tags() {
        let json = serde_json::to_value(ServingError::MalformedInput("x".into()).to_body()).unwrap();
        assert_eq!(json["kind"], "malformed_input");
        assert_eq!(json["status_hint"], "failure");
        assert!(json.get("model").is_none());
    }
}
