//! Engine runs against a scripted browser
//!
//! The fake session renders each URL path as a solid-colored PNG so that
//! the same page served from two hosts yields identical bytes.

use std::collections::HashSet;
use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use inspectus_common::{Environment, IgnoreMetadataKeys, JobName, JobTimestamp, MaterialStore};
use inspectus_engine::{
    BrowserSession, CaptureError, CaptureResult, CsvTargetList, EntirePageScreenshot, ErrorKind,
    HtmlSource, Inspectus, InspectusError, Locator, Parameters, ParametersConfig, PerEnvironment,
    StaticTargets, Strategy, Verdict,
};
use tempfile::TempDir;
use url::Url;

#[derive(Default)]
struct ScriptedBrowser {
    current: Option<Url>,
    /// Paths whose readiness locator never appears
    never_ready: HashSet<String>,
    /// Added to every pixel, to simulate a changed deployment
    tint: u8,
    navigations: Vec<Url>,
}

impl ScriptedBrowser {
    fn never_ready(mut self, path: &str) -> Self {
        self.never_ready.insert(path.to_string());
        self
    }

    fn page(&self) -> CaptureResult<&Url> {
        self.current
            .as_ref()
            .ok_or_else(|| CaptureError::Payload("no page loaded".to_string()))
    }

    fn render(&self) -> CaptureResult<Vec<u8>> {
        let path = self.page()?.path();
        let shade = path.bytes().fold(0u8, |acc, b| acc.wrapping_mul(31).wrapping_add(b));
        let img = image::RgbaImage::from_pixel(8, 6, image::Rgba([shade, self.tint, 90, 255]));
        let mut out = Vec::new();
        img.write_to(&mut Cursor::new(&mut out), image::ImageOutputFormat::Png)
            .map_err(|e| CaptureError::Payload(e.to_string()))?;
        Ok(out)
    }
}

#[async_trait]
impl BrowserSession for ScriptedBrowser {
    async fn navigate(&mut self, url: &Url) -> CaptureResult<()> {
        self.navigations.push(url.clone());
        self.current = Some(url.clone());
        Ok(())
    }

    async fn wait_for_locator(&mut self, locator: &Locator, timeout: Duration) -> CaptureResult<()> {
        if self.never_ready.contains(self.page()?.path()) {
            return Err(CaptureError::Timeout {
                locator: locator.to_string(),
                seconds: timeout.as_secs(),
            });
        }
        Ok(())
    }

    async fn click(&mut self, _locator: &Locator) -> CaptureResult<()> {
        Ok(())
    }

    async fn current_url(&mut self) -> CaptureResult<Url> {
        self.page().cloned()
    }

    async fn screenshot_bytes(&mut self) -> CaptureResult<Vec<u8>> {
        self.render()
    }

    async fn element_screenshot_bytes(&mut self, _locator: &Locator) -> CaptureResult<Vec<u8>> {
        self.render()
    }

    async fn page_source(&mut self) -> CaptureResult<String> {
        Ok(format!("<html><body>{}</body></html>", self.page()?.path()))
    }
}

const PAGES: [&str; 3] = ["/", "/about.html", "/contact.html"];

fn csv_for(host: &str) -> CsvTargetList {
    let mut text = String::from("url,handle\n");
    for page in PAGES {
        text.push_str(&format!("http://{}{},//body\n", host, page));
    }
    CsvTargetList::from_text(text)
}

async fn parameters(root: &std::path::Path, strategy: Strategy) -> ParametersConfig {
    ParametersConfig {
        store: Some(MaterialStore::new(root.join("store")).await.unwrap()),
        job_name: Some(JobName::new("website").unwrap()),
        job_timestamp: Some(JobTimestamp::parse("20240301_120000").unwrap()),
        strategy,
        ..Default::default()
    }
}

fn env(name: &str) -> Environment {
    Environment::new(name).unwrap()
}

#[tokio::test]
async fn test_shootings_captures_every_target_in_order() {
    let temp = TempDir::new().unwrap();
    let params = Parameters::try_from(parameters(temp.path(), Strategy::shootings()).await).unwrap();
    let engine = Inspectus::new(csv_for("example.com"))
        .with_capturer(EntirePageScreenshot)
        .with_capturer(HtmlSource);

    let mut browser = ScriptedBrowser::default();
    let result = engine.execute(&params, &mut browser).await.unwrap();

    assert_eq!(result.materials().len(), 6);
    let steps: Vec<_> = result
        .materials()
        .iter()
        .map(|m| m.metadata.get("step").unwrap().to_string())
        .collect();
    assert_eq!(steps, ["01", "01", "02", "02", "03", "03"]);
    assert!(result.report().is_none());
    assert!(result.pairs().is_empty());

    let stored = params.store().list(params.job_name(), params.job_timestamp()).await.unwrap();
    assert_eq!(stored.len(), 6);
    assert_eq!(browser.navigations.len(), 3);
}

#[tokio::test]
async fn test_empty_discovery_writes_nothing() {
    let temp = TempDir::new().unwrap();
    let params = Parameters::try_from(parameters(temp.path(), Strategy::shootings()).await).unwrap();
    let engine = Inspectus::new(StaticTargets(Vec::new())).with_capturer(EntirePageScreenshot);

    let mut browser = ScriptedBrowser::default();
    let err = engine.execute(&params, &mut browser).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(browser.navigations.is_empty());
    assert!(params.store().job_names().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_second_environment_writes_nothing() {
    let temp = TempDir::new().unwrap();
    let strategy = Strategy::TwinsDiff { left: env("Production"), right: env("Development") };
    let params = Parameters::try_from(parameters(temp.path(), strategy).await).unwrap();
    let targets = PerEnvironment::new()
        .with(env("Production"), csv_for("prod.example.com"))
        .with(env("Development"), CsvTargetList::from_text("url,handle\n"));
    let engine = Inspectus::new(targets).with_capturer(EntirePageScreenshot);

    let err = engine
        .execute(&params, &mut ScriptedBrowser::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(params.store().job_names().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_no_capturer_is_configuration_error() {
    let temp = TempDir::new().unwrap();
    let params = Parameters::try_from(parameters(temp.path(), Strategy::shootings()).await).unwrap();
    let err = Inspectus::new(csv_for("example.com"))
        .execute(&params, &mut ScriptedBrowser::default())
        .await
        .unwrap_err();
    assert!(matches!(err, InspectusError::Configuration(_)));
}

#[tokio::test]
async fn test_twins_pairs_all_rows_ignoring_host() {
    let temp = TempDir::new().unwrap();
    let strategy = Strategy::TwinsDiff { left: env("Production"), right: env("Development") };
    let config = ParametersConfig {
        ignore_keys: IgnoreMetadataKeys::new(["URL.host"]),
        ..parameters(temp.path(), strategy).await
    };
    let params = Parameters::try_from(config).unwrap();
    let targets = PerEnvironment::new()
        .with(env("Production"), csv_for("prod.example.com"))
        .with(env("Development"), csv_for("dev.example.com"));
    let engine = Inspectus::new(targets).with_capturer(EntirePageScreenshot);

    let result = engine
        .execute(&params, &mut ScriptedBrowser::default())
        .await
        .unwrap();

    let (left_ts, right_ts) = result.compared_runs().unwrap();
    assert!(left_ts < right_ts);
    assert_eq!(result.materials_of(&left_ts).len(), 3);
    assert_eq!(result.materials_of(&right_ts).len(), 3);

    let pairs = result.pairs();
    assert_eq!(pairs.len(), 3);
    assert!(pairs.iter().all(|p| p.is_matched()));
    let steps: Vec<_> = pairs
        .iter()
        .map(|p| p.left.as_ref().unwrap().metadata.get("step").unwrap().to_string())
        .collect();
    assert_eq!(steps, ["01", "02", "03"]);
    for pair in pairs {
        let left = pair.left.as_ref().unwrap();
        let right = pair.right.as_ref().unwrap();
        assert_eq!(left.metadata.get("environment"), Some("Production"));
        assert_eq!(right.metadata.get("environment"), Some("Development"));
        assert_eq!(left.id, right.id);
    }

    let report = result.report().unwrap();
    assert!(report.is_success());
    assert_eq!(report.passed, 3);
    let path = result.report_path().unwrap();
    assert!(path.exists());
    assert!(path.starts_with(params.store().root()));
}

#[tokio::test]
async fn test_twins_without_ignoring_host_keeps_unmatched() {
    let temp = TempDir::new().unwrap();
    let strategy = Strategy::TwinsDiff { left: env("Production"), right: env("Development") };
    let params = Parameters::try_from(parameters(temp.path(), strategy).await).unwrap();
    let targets = PerEnvironment::new()
        .with(env("Production"), csv_for("prod.example.com"))
        .with(env("Development"), csv_for("dev.example.com"));
    let engine = Inspectus::new(targets).with_capturer(EntirePageScreenshot);

    let result = engine
        .execute(&params, &mut ScriptedBrowser::default())
        .await
        .unwrap();

    assert_eq!(result.pairs().len(), 6);
    let report = result.report().unwrap();
    assert_eq!(report.failed, 6);
    assert!(report
        .entries
        .iter()
        .all(|e| matches!(e.verdict, Verdict::LeftOnly | Verdict::RightOnly)));
}

#[tokio::test]
async fn test_capture_timeout_stops_run_without_rollback() {
    let temp = TempDir::new().unwrap();
    let params = Parameters::try_from(parameters(temp.path(), Strategy::shootings()).await).unwrap();
    let engine = Inspectus::new(csv_for("example.com")).with_capturer(EntirePageScreenshot);

    let mut browser = ScriptedBrowser::default().never_ready("/about.html");
    let err = engine.execute(&params, &mut browser).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Capture);
    assert!(matches!(err, InspectusError::Capture(CaptureError::Timeout { .. })));

    let stored = params.store().list(params.job_name(), params.job_timestamp()).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].metadata.get("step"), Some("01"));

    let visited: Vec<_> = browser.navigations.iter().map(|u| u.path().to_string()).collect();
    assert_eq!(visited, ["/", "/about.html"]);
}

#[tokio::test]
async fn test_chronos_first_run_then_retry_finds_previous() {
    let temp = TempDir::new().unwrap();
    let params =
        Parameters::try_from(parameters(temp.path(), Strategy::chronos()).await).unwrap();
    let engine = Inspectus::new(csv_for("example.com")).with_capturer(EntirePageScreenshot);

    let err = engine
        .execute(&params, &mut ScriptedBrowser::default())
        .await
        .unwrap_err();
    assert!(err.is_empty_material_list());
    let report_files = std::fs::read_dir(params.store().root())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".report.json"))
        .count();
    assert_eq!(report_files, 0);

    let retry = params.with_job_timestamp(JobTimestamp::later_than(params.job_timestamp()));
    let result = engine
        .execute(&retry, &mut ScriptedBrowser::default())
        .await
        .unwrap();

    assert_eq!(result.previous_timestamp(), Some(params.job_timestamp()));
    assert_eq!(result.pairs().len(), 3);
    assert!(result.report().unwrap().is_success());
}

#[tokio::test]
async fn test_chronos_with_backup_detects_change() {
    let temp = TempDir::new().unwrap();
    let config = ParametersConfig {
        backup: Some(MaterialStore::new(temp.path().join("backup")).await.unwrap()),
        threshold: 0.1,
        ..parameters(temp.path(), Strategy::chronos()).await
    };
    let params = Parameters::try_from(config).unwrap();
    let engine = Inspectus::new(csv_for("example.com")).with_capturer(EntirePageScreenshot);

    let err = engine
        .execute(&params, &mut ScriptedBrowser::default())
        .await
        .unwrap_err();
    assert!(err.is_empty_material_list());

    let backup = params.backup().unwrap();
    assert_eq!(
        backup.list(params.job_name(), params.job_timestamp()).await.unwrap().len(),
        3
    );

    let retry = params.with_job_timestamp(JobTimestamp::later_than(params.job_timestamp()));
    let mut changed = ScriptedBrowser { tint: 200, ..Default::default() };
    let result = engine.execute(&retry, &mut changed).await.unwrap();

    let report = result.report().unwrap();
    assert_eq!(report.failed, 3);
    assert!(report.entries.iter().all(|e| e.verdict == Verdict::Fail));
    assert!(report.entries.iter().all(|e| e.diff_ratio == Some(1.0)));
}

#[tokio::test]
async fn test_shootings_in_one_named_environment() {
    let temp = TempDir::new().unwrap();
    let strategy = Strategy::Shootings { environment: env("Production") };
    let params = Parameters::try_from(parameters(temp.path(), strategy).await).unwrap();
    let targets = PerEnvironment::new().with(env("Production"), csv_for("prod.example.com"));
    let engine = Inspectus::new(targets).with_capturer(EntirePageScreenshot);

    let result = engine
        .execute(&params, &mut ScriptedBrowser::default())
        .await
        .unwrap();

    assert_eq!(result.materials().len(), 3);
    assert!(result
        .materials()
        .iter()
        .all(|m| m.metadata.get("environment") == Some("Production")));
    assert!(result.report().is_none());
}

#[tokio::test]
async fn test_chronos_in_one_named_environment() {
    let temp = TempDir::new().unwrap();
    let strategy = Strategy::ChronosDiff { environment: env("Staging") };
    let params = Parameters::try_from(parameters(temp.path(), strategy).await).unwrap();
    let targets = PerEnvironment::new().with(env("Staging"), csv_for("staging.example.com"));
    let engine = Inspectus::new(targets).with_capturer(HtmlSource);

    let err = engine
        .execute(&params, &mut ScriptedBrowser::default())
        .await
        .unwrap_err();
    assert!(err.is_empty_material_list());

    let retry = params.with_job_timestamp(JobTimestamp::later_than(params.job_timestamp()));
    let result = engine
        .execute(&retry, &mut ScriptedBrowser::default())
        .await
        .unwrap();
    assert_eq!(result.pairs().len(), 3);
    assert!(result.report().unwrap().is_success());
}

#[tokio::test]
async fn test_twins_second_environment_never_reuses_an_existing_run() {
    let temp = TempDir::new().unwrap();
    let strategy = Strategy::TwinsDiff { left: env("Production"), right: env("Development") };
    let config = ParametersConfig {
        job_timestamp: None,
        ignore_keys: IgnoreMetadataKeys::new(["URL.host"]),
        ..parameters(temp.path(), strategy).await
    };
    let params = Parameters::try_from(config).unwrap();

    // A run of the same job one second after this one's start
    let occupied = JobTimestamp::later_than(params.job_timestamp());
    params
        .store()
        .write(
            params.job_name(),
            &occupied,
            inspectus_common::FileType::Txt,
            &inspectus_common::Metadata::new(),
            b"someone else's run",
        )
        .await
        .unwrap();

    let targets = PerEnvironment::new()
        .with(env("Production"), csv_for("prod.example.com"))
        .with(env("Development"), csv_for("dev.example.com"));
    let engine = Inspectus::new(targets).with_capturer(EntirePageScreenshot);
    let result = engine
        .execute(&params, &mut ScriptedBrowser::default())
        .await
        .unwrap();

    let right_ts = *result.right_timestamp().unwrap();
    assert!(right_ts > occupied);
    assert_eq!(
        params.store().list(params.job_name(), &occupied).await.unwrap().len(),
        1
    );
    assert!(JobTimestamp::now() > right_ts);
    assert_eq!(result.materials_of(&right_ts).len(), 3);
}
