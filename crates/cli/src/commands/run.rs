//! Run a scenario

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use inspectus_common::JobTimestamp;
use inspectus_engine::{
    BrowserSession, Inspectus, InspectusError, Intermediates, Parameters, ReportEntry, Verdict,
    WebDriverSession,
};
use serde::Serialize;
use tracing::warn;

use crate::config::ScenarioConfig;
use crate::output::{
    print_info, print_list, print_success, print_warning, OutputFormat, TableDisplay,
};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Scenario file (TOML)
    pub scenario: PathBuf,

    /// Override the job name of the scenario
    #[arg(long)]
    pub job_name: Option<String>,

    /// WebDriver server URL
    #[arg(long, env = "INSPECTUS_WEBDRIVER_URL")]
    pub webdriver_url: Option<String>,
}

/// How a completed run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Captured, and every compared pair passed
    Clean,
    /// At least one pair failed or had no counterpart
    Differences,
}

/// Report entry display wrapper
#[derive(Serialize)]
pub struct EntryDisplay {
    pub step: String,
    pub file_type: String,
    pub left: String,
    pub right: String,
    pub diff_ratio: Option<f64>,
    pub verdict: Verdict,
}

impl From<&ReportEntry> for EntryDisplay {
    fn from(entry: &ReportEntry) -> Self {
        let side = entry.left.as_ref().or(entry.right.as_ref());
        let short = |r: &Option<inspectus_engine::report::MaterialRef>| {
            r.as_ref()
                .map(|m| m.id[..m.id.len().min(12)].to_string())
                .unwrap_or_else(|| "-".to_string())
        };
        Self {
            step: side
                .and_then(|m| m.metadata.get("step"))
                .unwrap_or("-")
                .to_string(),
            file_type: entry.file_type.to_string(),
            left: short(&entry.left),
            right: short(&entry.right),
            diff_ratio: entry.diff_ratio,
            verdict: entry.verdict,
        }
    }
}

impl TableDisplay for EntryDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Step", "Type", "Left", "Right", "Diff", "Verdict"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.step.clone(),
            self.file_type.clone(),
            self.left.clone(),
            self.right.clone(),
            self.diff_ratio
                .map(|r| format!("{:.4}", r))
                .unwrap_or_else(|| "-".to_string()),
            format!("{:?}", self.verdict),
        ]
    }
}

/// Execute once; on an empty previous run, retry exactly once with a
/// later timestamp
pub async fn execute_with_retry(
    engine: &Inspectus,
    parameters: &Parameters,
    session: &mut dyn BrowserSession,
) -> Result<Intermediates, InspectusError> {
    match engine.execute(parameters, session).await {
        Err(e) if e.is_empty_material_list() => {
            let retry = parameters.with_job_timestamp(JobTimestamp::later_than(parameters.job_timestamp()));
            warn!("{}; retrying once as {}", e, retry.job_timestamp());
            engine.execute(&retry, session).await
        }
        other => other,
    }
}

pub async fn execute(args: RunArgs, store: Option<PathBuf>, format: OutputFormat) -> Result<RunOutcome> {
    let mut scenario = ScenarioConfig::load(&args.scenario)?;
    if let Some(name) = args.job_name {
        scenario.job_name = name;
    }
    if let Some(store) = store {
        scenario.store = store;
    }
    if let Some(url) = args.webdriver_url {
        scenario.webdriver.session.endpoint = url;
    }
    // Validated before touching the browser
    let parameters = scenario.parameters().await?;
    let engine = scenario.engine()?;

    let mut session = WebDriverSession::start(&scenario.webdriver.session)
        .await
        .with_context(|| format!("connecting to {}", scenario.webdriver.session.endpoint))?;
    let result = execute_with_retry(&engine, &parameters, &mut session).await;
    if let Err(e) = session.quit().await {
        warn!("Failed to close browser session: {}", e);
    }
    let intermediates = result?;

    Ok(summarize(&intermediates, format))
}

fn summarize(intermediates: &Intermediates, format: OutputFormat) -> RunOutcome {
    let Some(report) = intermediates.report() else {
        print_success(&format!(
            "Captured {} material(s) under {}",
            intermediates.materials().len(),
            intermediates.job_timestamp()
        ));
        return RunOutcome::Clean;
    };

    let entries: Vec<EntryDisplay> = report.entries.iter().map(EntryDisplay::from).collect();
    print_list(&entries, format);
    if let Some(path) = intermediates.report_path() {
        print_info(&format!("Report: {}", path.display()));
    }

    if report.is_success() {
        print_success(&format!(
            "{} vs {}: all {} pair(s) within threshold {}",
            report.left_timestamp, report.right_timestamp, report.passed, report.threshold
        ));
        RunOutcome::Clean
    } else {
        print_warning(&format!(
            "{} vs {}: {} of {} pair(s) differ",
            report.left_timestamp,
            report.right_timestamp,
            report.failed,
            report.entries.len()
        ));
        RunOutcome::Differences
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use inspectus_common::{JobName, MaterialStore};
    use inspectus_engine::{
        CaptureResult, HtmlSource, Locator, ParametersConfig, StaticTargets, Strategy, Target,
    };
    use tempfile::TempDir;
    use url::Url;

    struct StaticPage;

    #[async_trait]
    impl BrowserSession for StaticPage {
        async fn navigate(&mut self, _url: &Url) -> CaptureResult<()> {
            Ok(())
        }
        async fn wait_for_locator(&mut self, _l: &Locator, _t: Duration) -> CaptureResult<()> {
            Ok(())
        }
        async fn click(&mut self, _l: &Locator) -> CaptureResult<()> {
            Ok(())
        }
        async fn current_url(&mut self) -> CaptureResult<Url> {
            Ok(Url::parse("https://example.com/").unwrap())
        }
        async fn screenshot_bytes(&mut self) -> CaptureResult<Vec<u8>> {
            Ok(Vec::new())
        }
        async fn element_screenshot_bytes(&mut self, _l: &Locator) -> CaptureResult<Vec<u8>> {
            Ok(Vec::new())
        }
        async fn page_source(&mut self) -> CaptureResult<String> {
            Ok("<html></html>".to_string())
        }
    }

    #[tokio::test]
    async fn test_chronos_first_run_is_retried_once() {
        let temp = TempDir::new().unwrap();
        let parameters = Parameters::try_from(ParametersConfig {
            store: Some(MaterialStore::new(temp.path()).await.unwrap()),
            job_name: Some(JobName::new("retry").unwrap()),
            job_timestamp: Some(JobTimestamp::parse("20240101_000000").unwrap()),
            strategy: Strategy::chronos(),
            ..Default::default()
        })
        .unwrap();
        let target = Target::new("https://example.com/", Locator::css("html")).unwrap();
        let engine = Inspectus::new(StaticTargets(vec![target])).with_capturer(HtmlSource);

        let result = execute_with_retry(&engine, &parameters, &mut StaticPage)
            .await
            .unwrap();
        assert_eq!(result.previous_timestamp(), Some(parameters.job_timestamp()));
        assert!(result.job_timestamp() > parameters.job_timestamp());
        assert_eq!(summarize(&result, OutputFormat::Plain), RunOutcome::Clean);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let temp = TempDir::new().unwrap();
        let parameters = Parameters::try_from(ParametersConfig {
            store: Some(MaterialStore::new(temp.path()).await.unwrap()),
            job_name: Some(JobName::new("retry").unwrap()),
            ..Default::default()
        })
        .unwrap();
        let engine = Inspectus::new(StaticTargets(Vec::new())).with_capturer(HtmlSource);

        let err = execute_with_retry(&engine, &parameters, &mut StaticPage)
            .await
            .unwrap_err();
        assert!(matches!(err, InspectusError::Configuration(_)));
    }
}
