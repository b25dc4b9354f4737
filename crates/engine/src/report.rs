//! Diff report compiled from matched material pairs

use std::path::{Path, PathBuf};

use inspectus_common::{FileType, Fingerprint, JobName, JobTimestamp, Material, MaterialPair, Metadata};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{InspectusError, InspectusResult};
use crate::visual::VisualDiff;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
    /// Present only in the left run
    LeftOnly,
    /// Present only in the right run
    RightOnly,
}

impl Verdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass)
    }
}

/// One side of a report entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialRef {
    pub id: String,
    pub job_timestamp: JobTimestamp,
    pub file_name: String,
    pub metadata: Metadata,
}

impl From<&Material> for MaterialRef {
    fn from(m: &Material) -> Self {
        Self {
            id: m.id.clone(),
            job_timestamp: m.job_timestamp,
            file_name: m.file_name(),
            metadata: m.metadata.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub fingerprint: Fingerprint,
    pub file_type: FileType,
    pub left: Option<MaterialRef>,
    pub right: Option<MaterialRef>,
    /// Absent for one-sided entries
    pub diff_ratio: Option<f64>,
    pub verdict: Verdict,
}

impl ReportEntry {
    /// Entry for a pair; `diff` must be given for a matched pair
    pub fn new(pair: &MaterialPair, diff: Option<&VisualDiff>, threshold: f64) -> Self {
        let file_type = pair
            .left
            .as_ref()
            .or(pair.right.as_ref())
            .map(|m| m.file_type)
            .unwrap_or(FileType::Png);
        let verdict = match (&pair.left, &pair.right, diff) {
            (Some(_), Some(_), Some(d)) if d.passes(threshold) => Verdict::Pass,
            (Some(_), Some(_), _) => Verdict::Fail,
            (Some(_), None, _) => Verdict::LeftOnly,
            _ => Verdict::RightOnly,
        };
        Self {
            fingerprint: pair.fingerprint.clone(),
            file_type,
            left: pair.left.as_ref().map(MaterialRef::from),
            right: pair.right.as_ref().map(MaterialRef::from),
            diff_ratio: diff.map(|d| d.diff_ratio),
            verdict,
        }
    }
}

/// Outcome of one comparison, in presentation order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffReport {
    pub job_name: JobName,
    /// Run the report belongs to
    pub job_timestamp: JobTimestamp,
    pub left_timestamp: JobTimestamp,
    pub right_timestamp: JobTimestamp,
    pub threshold: f64,
    pub passed: usize,
    pub failed: usize,
    pub entries: Vec<ReportEntry>,
}

impl DiffReport {
    pub fn new(
        job_name: JobName,
        job_timestamp: JobTimestamp,
        left_timestamp: JobTimestamp,
        right_timestamp: JobTimestamp,
        threshold: f64,
    ) -> Self {
        Self {
            job_name,
            job_timestamp,
            left_timestamp,
            right_timestamp,
            threshold,
            passed: 0,
            failed: 0,
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, entry: ReportEntry) {
        if entry.verdict.is_pass() {
            self.passed += 1;
        } else {
            self.failed += 1;
        }
        self.entries.push(entry);
    }

    /// True when every entry passed
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    pub fn file_name(&self) -> String {
        format!("{}-{}.report.json", self.job_name, self.job_timestamp)
    }

    /// Write the report as pretty JSON into `dir`
    pub async fn write(&self, dir: &Path) -> InspectusResult<PathBuf> {
        let path = dir.join(self.file_name());
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| InspectusError::Report(e.to_string()))?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| InspectusError::Report(format!("{}: {}", path.display(), e)))?;

        info!(
            "Report written to {} ({} passed, {} failed)",
            path.display(),
            self.passed,
            self.failed
        );
        Ok(path)
    }
}
