//! Model artifact persistence
//!
//! Artifacts are JSON envelopes carrying the serialized model body verbatim
//! together with its SHA-256 checksum. Loading recomputes the checksum over
//! the exact body bytes and refuses to hand out a model that does not match.

use super::model::TrainedModel;
use super::training::TrainingReport;
use crate::error::{ForecastError, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Envelope layout version written by this build
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// Training diagnostics stored alongside the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactSummary {
    pub training_rows: usize,
    pub last_observed: NaiveDateTime,
    pub test_size: Option<usize>,
    pub accuracy: Option<f64>,
}

impl ArtifactSummary {
    fn new(model: &TrainedModel, report: Option<&TrainingReport>) -> Self {
        Self {
            training_rows: model.training_rows(),
            last_observed: model.last_observed(),
            test_size: report.map(|r| r.test_size),
            accuracy: report.and_then(|r| r.evaluation.accuracy),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    format_version: u32,
    checksum: String,
    saved_at: NaiveDateTime,
    summary: ArtifactSummary,
    model: Box<RawValue>,
}

/// Metadata about a stored artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactInfo {
    pub path: PathBuf,
    /// Short form of the checksum, used as a model version
    pub version: String,
    pub checksum: String,
    pub size_bytes: usize,
    pub saved_at: NaiveDateTime,
    pub summary: ArtifactSummary,
}

impl ArtifactInfo {
    fn new(path: &Path, envelope: &Envelope, size_bytes: usize) -> Self {
        Self {
            path: path.to_path_buf(),
            version: short_version(&envelope.checksum),
            checksum: envelope.checksum.clone(),
            size_bytes,
            saved_at: envelope.saved_at,
            summary: envelope.summary.clone(),
        }
    }
}

/// Version `save_model` will assign to `model`
pub fn model_version(model: &TrainedModel) -> Result<String> {
    let body = serde_json::to_string(model)?;
    Ok(short_version(&compute_checksum(body.as_bytes())))
}

fn short_version(checksum: &str) -> String {
    checksum.chars().take(12).collect()
}

/// Persist a trained model, replacing any artifact already at `path`
pub fn save_model(
    path: &Path,
    model: &TrainedModel,
    report: Option<&TrainingReport>,
) -> Result<ArtifactInfo> {
    let body = serde_json::to_string(model)?;
    let checksum = compute_checksum(body.as_bytes());

    let envelope = Envelope {
        format_version: ARTIFACT_FORMAT_VERSION,
        checksum,
        saved_at: chrono::Local::now().naive_local(),
        summary: ArtifactSummary::new(model, report),
        model: RawValue::from_string(body)?,
    };
    let bytes = serde_json::to_vec_pretty(&envelope)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    write_atomic(path, &bytes)?;

    let artifact = ArtifactInfo::new(path, &envelope, bytes.len());
    info!(
        path = %path.display(),
        version = %artifact.version,
        size = artifact.size_bytes,
        "Model artifact saved"
    );
    Ok(artifact)
}

/// Load and verify a model artifact
pub fn load_model(path: &Path) -> Result<(TrainedModel, ArtifactInfo)> {
    let bytes = fs::read(path).map_err(|e| {
        ForecastError::model_unavailable(format!("cannot read {}: {}", path.display(), e))
    })?;

    let envelope: Envelope = serde_json::from_slice(&bytes).map_err(|e| {
        ForecastError::model_unavailable(format!("malformed artifact {}: {}", path.display(), e))
    })?;

    if envelope.format_version != ARTIFACT_FORMAT_VERSION {
        return Err(ForecastError::model_unavailable(format!(
            "unsupported artifact format {} (expected {})",
            envelope.format_version, ARTIFACT_FORMAT_VERSION
        )));
    }

    let actual = compute_checksum(envelope.model.get().as_bytes());
    if actual != envelope.checksum {
        warn!(
            path = %path.display(),
            expected = %envelope.checksum,
            actual = %actual,
            "Model artifact checksum mismatch"
        );
        return Err(ForecastError::ChecksumMismatch {
            expected: envelope.checksum,
            actual,
        });
    }

    let model: TrainedModel = serde_json::from_str(envelope.model.get()).map_err(|e| {
        ForecastError::model_unavailable(format!("undecodable model body: {}", e))
    })?;

    let artifact = ArtifactInfo::new(path, &envelope, bytes.len());
    info!(
        path = %path.display(),
        version = %artifact.version,
        "Model artifact loaded"
    );
    Ok((model, artifact))
}

/// Write to a sibling temp file, then rename over the destination
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let temp_path = path.with_extension("tmp");
    let mut file = File::create(&temp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&temp_path, path)?;
    Ok(())
}

fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
