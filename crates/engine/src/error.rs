//! Error types for the execution engine

use inspectus_common::{JobName, JobTimestamp};
use thiserror::Error;

/// Failure while building the target list
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error at line {line}: {reason}")]
    Parse { line: u64, reason: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Sitemap JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unbound placeholder ${{{0}}} in sitemap")]
    UnboundPlaceholder(String),

    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Invalid locator: {0}")]
    InvalidLocator(String),

    #[error("No target source for environment {0}")]
    UnknownEnvironment(String),
}

/// Failure while driving the browser or capturing an artifact
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Timeout after {seconds}s waiting for {locator}")]
    Timeout { locator: String, seconds: u64 },

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("WebDriver error: {error} - {message}")]
    Protocol { error: String, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid screenshot payload: {0}")]
    Payload(String),

    #[error("Store error: {0}")]
    Store(#[from] inspectus_common::Error),
}

pub type CaptureResult<T> = Result<T, CaptureError>;

/// Classification of an engine failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad or missing parameters, unusable target list. Not retryable.
    Configuration,
    /// A target never became ready or the browser failed. Fatal to the run.
    Capture,
    /// The store medium failed. Fatal.
    Store,
    /// Temporal diff found no prior run; the caller may retry with a new timestamp.
    EmptyMaterialList,
}

/// The single failure type returned by `Inspectus::execute`
#[derive(Error, Debug)]
pub enum InspectusError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Target discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Capture failed: {0}")]
    Capture(#[source] CaptureError),

    #[error("Store error: {0}")]
    Store(#[from] inspectus_common::Error),

    #[error("No previous run of {job_name} before {job_timestamp}: previous material list is empty")]
    EmptyMaterialList {
        job_name: JobName,
        job_timestamp: JobTimestamp,
    },

    #[error("Report error: {0}")]
    Report(String),
}

impl InspectusError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InspectusError::Configuration(_) | InspectusError::Discovery(_) => {
                ErrorKind::Configuration
            }
            InspectusError::Capture(_) => ErrorKind::Capture,
            InspectusError::Store(_) | InspectusError::Report(_) => ErrorKind::Store,
            InspectusError::EmptyMaterialList { .. } => ErrorKind::EmptyMaterialList,
        }
    }

    /// True when a temporal diff had nothing to compare against
    pub fn is_empty_material_list(&self) -> bool {
        self.kind() == ErrorKind::EmptyMaterialList
    }
}

impl From<CaptureError> for InspectusError {
    fn from(e: CaptureError) -> Self {
        match e {
            CaptureError::Store(inner) => InspectusError::Store(inner),
            other => InspectusError::Capture(other),
        }
    }
}

pub type InspectusResult<T> = Result<T, InspectusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_failure_inside_capture_is_store_kind() {
        let err: InspectusError = CaptureError::Store(inspectus_common::Error::IntegrityError(
            "bad".to_string(),
        ))
        .into();
        assert_eq!(err.kind(), ErrorKind::Store);

        let err: InspectusError = CaptureError::Timeout {
            locator: "xpath=//a".to_string(),
            seconds: 3,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Capture);
    }

    #[test]
    fn test_source_is_preserved() {
        use std::error::Error as _;
        let err: InspectusError = CaptureError::ElementNotFound("css=#x".to_string()).into();
        assert!(err.source().is_some());
    }
}
