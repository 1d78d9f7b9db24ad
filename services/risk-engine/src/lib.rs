//! Field console: polls the gateway, raises field alerts and reports leaf diagnoses.

use agri_core::{
    clear_ready, evaluate_latest, init_metrics, init_tracing, load_config, mark_ready, publish_status,
    start_health_server, AgriConfig, AlertStatus, DiseasePrediction, RemoteServing, Serving, ServingError, Severity,
};
use agri_core::metrics::SERVING_METRICS;
use anyhow::Result;
use serde::Serialize;
use tracing::{error, info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub records: usize,
    pub alert: Option<AlertStatus>,
    pub diagnosis: Option<DiseasePrediction>,
}

/// One poll: sensor tail, alert, then an optional leaf diagnosis.
/// Only a failure to fetch the sensor tail fails the cycle.
#[instrument(skip_all, fields(gateway = remote.base_url()))]
pub async fn run_cycle(remote: &RemoteServing, cfg: &AgriConfig) -> Result<CycleReport, ServingError> {
    let tail = remote.sensor_tail(cfg.sensor_tail_default).await?;
    let alert = evaluate_latest(&tail);
    match alert {
        Some(status) => {
            SERVING_METRICS.record_alert(status);
            log_alert(status);
        }
        None => info!("no sensor records yet"),
    }

    let mut diagnosis = None;
    if let Some(path) = &cfg.leaf_image_path {
        match tokio::fs::read(path).await {
            Ok(bytes) => match remote.predict_disease(bytes).await {
                Ok(p) => {
                    if p.is_healthy() { info!(confidence = p.confidence, "{}", diagnosis_message(&p)) }
                    else { warn!(confidence = p.confidence, "{}", diagnosis_message(&p)) }
                    diagnosis = Some(p);
                }
                Err(e @ ServingError::ModelNotAvailable(_)) => warn!(error = %e, "leaf diagnosis skipped"),
                Err(e) => error!(error = %e, path = ?path, "error during prediction"),
            },
            Err(e) => warn!(error = %e, path = ?path, "leaf image unreadable"),
        }
    }
    Ok(CycleReport { records: tail.len(), alert, diagnosis })
}

fn log_alert(status: AlertStatus) {
    match status.severity() {
        Severity::Critical => error!(status = status.as_str(), "{}", status.message()),
        Severity::Warning => warn!(status = status.as_str(), "{}", status.message()),
        Severity::Ok => info!(status = status.as_str(), "{}", status.message()),
    }
}

pub fn diagnosis_message(p: &DiseasePrediction) -> String {
    if p.is_healthy() {
        format!("The plant appears Healthy (confidence: {:.2})", p.confidence)
    } else {
        format!("The plant has {} (confidence: {:.2})", p.label, p.confidence)
    }
}

pub async fn run() -> Result<()> {
    let cfg = load_config("risk-engine")?;
    init_tracing("risk-engine", &cfg.log_level)?;
    init_metrics();
    let remote = RemoteServing::from_config(&cfg)?;
    if cfg.run_once {
        let report = run_cycle(&remote, &cfg).await?;
        info!(report = %serde_json::to_string(&report)?, "cycle complete");
        return Ok(());
    }

    start_health_server(cfg.health_port).await?;
    publish_status("service", "risk-engine".into());
    mark_ready();
    let mut ticker = tokio::time::interval(cfg.poll_interval());
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = run_cycle(&remote, &cfg).await {
                    warn!(error = %e, "cycle failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                clear_ready();
                info!("risk engine stopped");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnosis_wording() {
        let healthy = DiseasePrediction { label: "Healthy".into(), confidence: 0.934 };
        assert_eq!(diagnosis_message(&healthy), "The plant appears Healthy (confidence: 0.93)");
        let sick = DiseasePrediction { label: "Early_blight".into(), confidence: 0.8 };
        assert_eq!(diagnosis_message(&sick), "The plant has Early_blight (confidence: 0.80)");
    }
}
