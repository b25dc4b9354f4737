//! Execution engine
//!
//! One `execute` call is one run: `Init -> Discover -> Capture -> Compare -> Done`.
//! Any failure ends the run; materials already written stay in the store.

use std::time::{Duration, Instant};

use inspectus_common::{pair_materials, Environment, JobTimestamp, Material, MaterialStore, Metadata};
use tracing::{debug, error, info, warn};

use crate::capture::{Capturer, StorageDirectory};
use crate::discovery::TargetSource;
use crate::driver::{open_target, BrowserSession};
use crate::error::{InspectusError, InspectusResult};
use crate::parameters::{Intermediates, Parameters, Strategy, ENVIRONMENT_KEY};
use crate::report::{DiffReport, ReportEntry};
use crate::target::Target;
use crate::visual::{self, VisualDiff};

pub const STEP_KEY: &str = "step";

/// Visual regression engine
pub struct Inspectus {
    targets: Box<dyn TargetSource>,
    capturers: Vec<Box<dyn Capturer>>,
}

impl Inspectus {
    /// Engine over a target source, with no capturers yet
    pub fn new(targets: impl TargetSource + 'static) -> Self {
        Self {
            targets: Box::new(targets),
            capturers: Vec::new(),
        }
    }

    pub fn with_capturer(mut self, capturer: impl Capturer + 'static) -> Self {
        self.capturers.push(Box::new(capturer));
        self
    }

    pub fn with_boxed_capturer(mut self, capturer: Box<dyn Capturer>) -> Self {
        self.capturers.push(capturer);
        self
    }

    /// Run the strategy of `parameters` against one browser session
    pub async fn execute(
        &self,
        parameters: &Parameters,
        session: &mut dyn BrowserSession,
    ) -> InspectusResult<Intermediates> {
        let start = Instant::now();
        info!(
            "Executing {} for {}/{}",
            parameters.strategy(),
            parameters.job_name(),
            parameters.job_timestamp()
        );

        if self.capturers.is_empty() {
            return Err(InspectusError::Configuration(
                "no capture function configured".to_string(),
            ));
        }

        let result = match parameters.strategy() {
            Strategy::Shootings { environment } => {
                self.shootings(parameters, session, environment).await
            }
            Strategy::TwinsDiff { left, right } => {
                self.twins(parameters, session, left, right).await
            }
            Strategy::ChronosDiff { environment } => {
                self.chronos(parameters, session, environment).await
            }
        };

        match &result {
            Ok(intermediates) => info!(
                "Run {}/{} done: {} material(s) in {} ms",
                parameters.job_name(),
                parameters.job_timestamp(),
                intermediates.materials().len(),
                start.elapsed().as_millis()
            ),
            Err(InspectusError::EmptyMaterialList { .. }) => {}
            Err(e) => error!("Run {}/{} failed: {}", parameters.job_name(), parameters.job_timestamp(), e),
        }
        result
    }

    async fn shootings(
        &self,
        parameters: &Parameters,
        session: &mut dyn BrowserSession,
        environment: &Environment,
    ) -> InspectusResult<Intermediates> {
        let targets = self.discover(environment)?;
        let ts = *parameters.job_timestamp();
        self.capture_all(parameters, session, &targets, environment, &ts, Intermediates::new(ts))
            .await
    }

    async fn twins(
        &self,
        parameters: &Parameters,
        session: &mut dyn BrowserSession,
        left: &Environment,
        right: &Environment,
    ) -> InspectusResult<Intermediates> {
        // Both lists are resolved before anything is written
        let left_targets = self.discover(left)?;
        let right_targets = self.discover(right)?;

        let left_ts = *parameters.job_timestamp();
        let intermediates = self
            .capture_all(parameters, session, &left_targets, left, &left_ts, Intermediates::new(left_ts))
            .await?;

        // Later than every run of the job already in the store
        let store = parameters.store();
        let latest = store
            .job_timestamps(parameters.job_name())
            .await?
            .last()
            .copied()
            .map_or(left_ts, |latest| latest.max(left_ts));
        let right_ts = JobTimestamp::later_than(&latest);
        debug!("Second environment runs under {}", right_ts);

        let intermediates = self
            .capture_all(
                parameters,
                session,
                &right_targets,
                right,
                &right_ts,
                intermediates.with_right_timestamp(right_ts),
            )
            .await?;
        outlive(&right_ts).await;

        let left_materials = intermediates.materials_of(&left_ts);
        let right_materials = intermediates.materials_of(&right_ts);
        if left_materials.is_empty() || right_materials.is_empty() {
            return Err(InspectusError::EmptyMaterialList {
                job_name: parameters.job_name().clone(),
                job_timestamp: left_ts,
            });
        }

        self.compare(
            parameters,
            intermediates,
            (store, left_materials.as_slice()),
            (store, right_materials.as_slice()),
        )
        .await
    }

    async fn chronos(
        &self,
        parameters: &Parameters,
        session: &mut dyn BrowserSession,
        environment: &Environment,
    ) -> InspectusResult<Intermediates> {
        let targets = self.discover(environment)?;
        let ts = *parameters.job_timestamp();
        let job_name = parameters.job_name();

        let intermediates = self
            .capture_all(parameters, session, &targets, environment, &ts, Intermediates::new(ts))
            .await?;

        let history = match parameters.backup() {
            Some(backup) => {
                parameters.store().copy_run(backup, job_name, &ts).await?;
                backup
            }
            None => parameters.store(),
        };

        let previous = match history.latest_before(job_name, &ts).await? {
            Some(previous) => previous,
            None => {
                warn!("No run of {} before {}; nothing to compare against", job_name, ts);
                return Err(InspectusError::EmptyMaterialList {
                    job_name: job_name.clone(),
                    job_timestamp: ts,
                });
            }
        };
        info!("Comparing {} with previous run {}", ts, previous);

        let previous_materials = history.list(job_name, &previous).await?;
        let current_materials = intermediates.materials_of(&ts);
        let intermediates = intermediates.with_previous_timestamp(previous);

        self.compare(
            parameters,
            intermediates,
            (history, previous_materials.as_slice()),
            (parameters.store(), current_materials.as_slice()),
        )
        .await
    }

    /// Resolve targets; an empty list is a configuration error
    fn discover(&self, environment: &Environment) -> InspectusResult<Vec<Target>> {
        let targets = self.targets.discover(environment)?;
        if targets.is_empty() {
            return Err(InspectusError::Configuration(format!(
                "target discovery for environment {} produced no targets",
                environment
            )));
        }
        debug!("Discovered {} target(s) for {}", targets.len(), environment);
        Ok(targets)
    }

    /// Open each target in order and run every capturer on it.
    /// Stops at the first failure.
    async fn capture_all(
        &self,
        parameters: &Parameters,
        session: &mut dyn BrowserSession,
        targets: &[Target],
        environment: &Environment,
        job_timestamp: &JobTimestamp,
        mut intermediates: Intermediates,
    ) -> InspectusResult<Intermediates> {
        let storage = StorageDirectory {
            store: parameters.store(),
            job_name: parameters.job_name(),
            job_timestamp,
        };

        for (index, target) in targets.iter().enumerate() {
            let mut attributes = Metadata::new().with(STEP_KEY, format!("{:02}", index + 1));
            if !environment.is_null() {
                attributes.insert(ENVIRONMENT_KEY, environment.as_str());
            }

            open_target(session, target, parameters.wait_timeout()).await?;

            for capturer in &self.capturers {
                let material = capturer.capture(session, &storage, target, &attributes).await?;
                info!(
                    "Captured {} of {} as {}",
                    capturer.name(),
                    target.url(),
                    material.short_id()
                );
                intermediates = intermediates.with_material(material);
            }
        }

        Ok(intermediates)
    }

    /// Pair both sides, diff matched payloads and write the report
    async fn compare(
        &self,
        parameters: &Parameters,
        intermediates: Intermediates,
        (left_store, left): (&MaterialStore, &[Material]),
        (right_store, right): (&MaterialStore, &[Material]),
    ) -> InspectusResult<Intermediates> {
        let pairs = pair_materials(
            left,
            right,
            &parameters.effective_ignore_keys(),
            parameters.sort_keys(),
        );
        let unmatched = pairs.iter().filter(|p| !p.is_matched()).count();
        if unmatched > 0 {
            warn!("{} material(s) have no counterpart", unmatched);
        }

        let (left_ts, right_ts) = intermediates
            .compared_runs()
            .unwrap_or((*intermediates.job_timestamp(), *intermediates.job_timestamp()));
        let mut report = DiffReport::new(
            parameters.job_name().clone(),
            *parameters.job_timestamp(),
            left_ts,
            right_ts,
            parameters.threshold(),
        );

        for pair in &pairs {
            let diff = match (&pair.left, &pair.right) {
                (Some(l), Some(r)) => Some(self.diff(left_store, l, right_store, r).await?),
                _ => None,
            };
            report.push(ReportEntry::new(pair, diff.as_ref(), parameters.threshold()));
        }

        let path = report.write(parameters.store().root()).await?;
        Ok(intermediates.with_pairs(pairs).with_report(report, path))
    }

    async fn diff(
        &self,
        left_store: &MaterialStore,
        left: &Material,
        right_store: &MaterialStore,
        right: &Material,
    ) -> InspectusResult<VisualDiff> {
        if left.id == right.id {
            return Ok(VisualDiff::identical(1));
        }
        let left_bytes = left_store.read(left).await?;
        let right_bytes = right_store.read(right).await?;
        visual::compare(left.file_type, &left_bytes, &right_bytes)
    }
}

/// Hold until the clock has passed `ts`, so that a run started after this
/// one returns cannot be given the same timestamp. Bounded for timestamps
/// set in the future.
async fn outlive(ts: &JobTimestamp) {
    for _ in 0..50 {
        if JobTimestamp::now() > *ts {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
