//! Run parameters and the state accumulated across a run

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use inspectus_common::{
    Environment, IgnoreMetadataKeys, JobName, JobTimestamp, Material, MaterialPair, MaterialStore,
    SortKeys,
};

use crate::driver::DEFAULT_WAIT_TIMEOUT;
use crate::error::InspectusError;
use crate::report::DiffReport;

/// Keys that differ by construction between the two sides of a twins diff
pub const ENVIRONMENT_KEY: &str = "environment";
pub const PROFILE_KEY: &str = "profile";

/// What a run does after discovery.
///
/// `Shootings` and `ChronosDiff` run against a single environment, which is
/// `Environment::NULL_OBJECT` when the targets are not split by environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    /// Capture only
    Shootings { environment: Environment },
    /// Capture two environments and compare them
    TwinsDiff { left: Environment, right: Environment },
    /// Capture and compare with the previous run of the same job
    ChronosDiff { environment: Environment },
}

impl Strategy {
    /// Capture only, without environments
    pub fn shootings() -> Self {
        Strategy::Shootings {
            environment: Environment::NULL_OBJECT,
        }
    }

    /// Chronos diff, without environments
    pub fn chronos() -> Self {
        Strategy::ChronosDiff {
            environment: Environment::NULL_OBJECT,
        }
    }

    pub fn is_chronos(&self) -> bool {
        matches!(self, Strategy::ChronosDiff { .. })
    }
}

impl Default for Strategy {
    fn default() -> Self {
        Self::shootings()
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Shootings { environment } if environment.is_null() => f.write_str("shootings"),
            Strategy::Shootings { environment } => write!(f, "shootings ({})", environment),
            Strategy::TwinsDiff { left, right } => write!(f, "twins ({} vs {})", left, right),
            Strategy::ChronosDiff { environment } if environment.is_null() => f.write_str("chronos"),
            Strategy::ChronosDiff { environment } => write!(f, "chronos ({})", environment),
        }
    }
}

/// Unvalidated parameters; convert with `Parameters::try_from`
#[derive(Debug, Clone)]
pub struct ParametersConfig {
    pub store: Option<MaterialStore>,
    /// Where previous runs are kept for chronos diffs
    pub backup: Option<MaterialStore>,
    pub job_name: Option<JobName>,
    /// Defaults to now
    pub job_timestamp: Option<JobTimestamp>,
    pub strategy: Strategy,
    pub ignore_keys: IgnoreMetadataKeys,
    pub sort_keys: SortKeys,
    /// Maximum tolerated fraction of differing content, in [0, 1]
    pub threshold: f64,
    pub wait_timeout: Duration,
}

impl Default for ParametersConfig {
    fn default() -> Self {
        Self {
            store: None,
            backup: None,
            job_name: None,
            job_timestamp: None,
            strategy: Strategy::default(),
            ignore_keys: IgnoreMetadataKeys::default(),
            sort_keys: SortKeys::new(["step"]),
            threshold: 0.0,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }
}

/// Validated, immutable parameters of one run
#[derive(Debug, Clone)]
pub struct Parameters {
    store: MaterialStore,
    backup: Option<MaterialStore>,
    job_name: JobName,
    job_timestamp: JobTimestamp,
    strategy: Strategy,
    ignore_keys: IgnoreMetadataKeys,
    sort_keys: SortKeys,
    threshold: f64,
    wait_timeout: Duration,
}

impl TryFrom<ParametersConfig> for Parameters {
    type Error = InspectusError;

    fn try_from(config: ParametersConfig) -> Result<Self, Self::Error> {
        let store = config
            .store
            .ok_or_else(|| InspectusError::Configuration("store is not set".to_string()))?;
        let job_name = config
            .job_name
            .ok_or_else(|| InspectusError::Configuration("job name is not set".to_string()))?;

        if !(0.0..=1.0).contains(&config.threshold) {
            return Err(InspectusError::Configuration(format!(
                "threshold {} is outside [0, 1]",
                config.threshold
            )));
        }
        if config.wait_timeout.is_zero() {
            return Err(InspectusError::Configuration(
                "wait timeout must be positive".to_string(),
            ));
        }

        match &config.strategy {
            Strategy::TwinsDiff { left, right } => {
                if left.is_null() || right.is_null() {
                    return Err(InspectusError::Configuration(
                        "twins diff needs two named environments".to_string(),
                    ));
                }
                if left == right {
                    return Err(InspectusError::Configuration(format!(
                        "twins diff needs two distinct environments, got {} twice",
                        left
                    )));
                }
            }
            Strategy::Shootings { .. } | Strategy::ChronosDiff { .. } => {}
        }

        if let Some(backup) = &config.backup {
            if !config.strategy.is_chronos() {
                return Err(InspectusError::Configuration(
                    "a backup store is only used by chronos diff".to_string(),
                ));
            }
            if backup.root() == store.root() {
                return Err(InspectusError::Configuration(
                    "backup store must differ from the store".to_string(),
                ));
            }
        }

        Ok(Self {
            store,
            backup: config.backup,
            job_name,
            job_timestamp: config.job_timestamp.unwrap_or_else(JobTimestamp::now),
            strategy: config.strategy,
            ignore_keys: config.ignore_keys,
            sort_keys: config.sort_keys,
            threshold: config.threshold,
            wait_timeout: config.wait_timeout,
        })
    }
}

impl Parameters {
    pub fn store(&self) -> &MaterialStore {
        &self.store
    }

    pub fn backup(&self) -> Option<&MaterialStore> {
        self.backup.as_ref()
    }

    pub fn job_name(&self) -> &JobName {
        &self.job_name
    }

    pub fn job_timestamp(&self) -> &JobTimestamp {
        &self.job_timestamp
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    pub fn ignore_keys(&self) -> &IgnoreMetadataKeys {
        &self.ignore_keys
    }

    /// Ignore set used by the Compare stage
    pub fn effective_ignore_keys(&self) -> IgnoreMetadataKeys {
        match self.strategy {
            Strategy::TwinsDiff { .. } => self
                .ignore_keys
                .clone()
                .with(ENVIRONMENT_KEY)
                .with(PROFILE_KEY),
            _ => self.ignore_keys.clone(),
        }
    }

    pub fn sort_keys(&self) -> &SortKeys {
        &self.sort_keys
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn wait_timeout(&self) -> Duration {
        self.wait_timeout
    }

    /// Same parameters under another timestamp, e.g. for a retry
    pub fn with_job_timestamp(&self, job_timestamp: JobTimestamp) -> Self {
        Self {
            job_timestamp,
            ..self.clone()
        }
    }
}

/// State carried from one stage of a run to the next.
///
/// Never mutated in place: every `with_*` returns an updated copy.
#[derive(Debug, Clone)]
pub struct Intermediates {
    job_timestamp: JobTimestamp,
    right_timestamp: Option<JobTimestamp>,
    previous_timestamp: Option<JobTimestamp>,
    materials: Vec<Material>,
    pairs: Vec<MaterialPair>,
    report: Option<DiffReport>,
    report_path: Option<PathBuf>,
}

impl Intermediates {
    pub fn new(job_timestamp: JobTimestamp) -> Self {
        Self {
            job_timestamp,
            right_timestamp: None,
            previous_timestamp: None,
            materials: Vec::new(),
            pairs: Vec::new(),
            report: None,
            report_path: None,
        }
    }

    pub fn with_material(&self, material: Material) -> Self {
        let mut next = self.clone();
        next.materials.push(material);
        next
    }

    /// Timestamp of the second environment of a twins diff
    pub fn with_right_timestamp(&self, ts: JobTimestamp) -> Self {
        Self {
            right_timestamp: Some(ts),
            ..self.clone()
        }
    }

    /// Timestamp of the run a chronos diff compares against
    pub fn with_previous_timestamp(&self, ts: JobTimestamp) -> Self {
        Self {
            previous_timestamp: Some(ts),
            ..self.clone()
        }
    }

    pub fn with_pairs(&self, pairs: Vec<MaterialPair>) -> Self {
        Self {
            pairs,
            ..self.clone()
        }
    }

    pub fn with_report(&self, report: DiffReport, path: PathBuf) -> Self {
        Self {
            report: Some(report),
            report_path: Some(path),
            ..self.clone()
        }
    }

    pub fn job_timestamp(&self) -> &JobTimestamp {
        &self.job_timestamp
    }

    pub fn right_timestamp(&self) -> Option<&JobTimestamp> {
        self.right_timestamp.as_ref()
    }

    pub fn previous_timestamp(&self) -> Option<&JobTimestamp> {
        self.previous_timestamp.as_ref()
    }

    /// Every material captured by this run, in capture order
    pub fn materials(&self) -> &[Material] {
        &self.materials
    }

    /// Materials captured under one timestamp
    pub fn materials_of(&self, ts: &JobTimestamp) -> Vec<Material> {
        self.materials
            .iter()
            .filter(|m| &m.job_timestamp == ts)
            .cloned()
            .collect()
    }

    pub fn pairs(&self) -> &[MaterialPair] {
        &self.pairs
    }

    pub fn report(&self) -> Option<&DiffReport> {
        self.report.as_ref()
    }

    pub fn report_path(&self) -> Option<&PathBuf> {
        self.report_path.as_ref()
    }

    /// The (left, right) runs a diff compared, if any
    pub fn compared_runs(&self) -> Option<(JobTimestamp, JobTimestamp)> {
        match (self.previous_timestamp, self.right_timestamp) {
            (Some(previous), _) => Some((previous, self.job_timestamp)),
            (None, Some(right)) => Some((self.job_timestamp, right)),
            (None, None) => None,
        }
    }
}
