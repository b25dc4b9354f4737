//! Scenario file
//!
//! A scenario describes one job: where to store materials, which pages to
//! visit, what to capture and how to compare.
//!
//! ```toml
//! job_name = "myApple"
//! store = "store"
//! mode = "twins"
//! ignore_keys = ["URL.host"]
//! threshold = 0.01
//!
//! [[captures]]
//! kind = "page-screenshot"
//!
//! [[environments]]
//! name = "Production"
//! targets = { sitemap = "sitemap.json", bindings = { URL_PREFIX = "https://example.com" } }
//!
//! [[environments]]
//! name = "Development"
//! targets = { sitemap = "sitemap.json", bindings = { URL_PREFIX = "https://dev.example.com" } }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use inspectus_common::{Environment, IgnoreMetadataKeys, JobName, MaterialStore, SortKeys};
use inspectus_engine::{
    CaptureKind, CsvTargetList, Inspectus, Parameters, ParametersConfig, PerEnvironment,
    SitemapJson, Strategy, TargetSource, WebDriverConfig, DEFAULT_WAIT_TIMEOUT,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Shootings,
    Twins,
    Chronos,
}

/// Where the targets of a job (or of one environment) come from
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetsConfig {
    pub csv: Option<PathBuf>,
    pub sitemap: Option<PathBuf>,
    /// Placeholder values for the sitemap template
    pub bindings: HashMap<String, String>,
}

impl TargetsConfig {
    fn source(&self, base: &Path) -> Result<Box<dyn TargetSource>> {
        match (&self.csv, &self.sitemap) {
            (Some(csv), None) => {
                let path = base.join(csv);
                let list = CsvTargetList::from_path(&path)
                    .with_context(|| format!("reading targets from {}", path.display()))?;
                Ok(Box::new(list))
            }
            (None, Some(sitemap)) => {
                let path = base.join(sitemap);
                let sitemap = SitemapJson::from_path(&path)
                    .with_context(|| format!("reading sitemap {}", path.display()))?
                    .with_default_bindings(self.bindings.clone());
                Ok(Box::new(sitemap))
            }
            (Some(_), Some(_)) => bail!("targets: set either csv or sitemap, not both"),
            (None, None) => bail!("targets: one of csv or sitemap is required"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub name: String,
    pub targets: TargetsConfig,
}

/// Browser settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebDriverSection {
    #[serde(flatten)]
    pub session: WebDriverConfig,

    /// Bound on waiting for a target's readiness locator
    #[serde(default = "default_wait_timeout_secs")]
    pub wait_timeout_secs: u64,
}

impl Default for WebDriverSection {
    fn default() -> Self {
        Self {
            session: WebDriverConfig::default(),
            wait_timeout_secs: default_wait_timeout_secs(),
        }
    }
}

fn default_wait_timeout_secs() -> u64 {
    DEFAULT_WAIT_TIMEOUT.as_secs()
}

fn default_store() -> PathBuf {
    PathBuf::from("store")
}

fn default_sort_keys() -> Vec<String> {
    vec!["step".to_string()]
}

fn default_captures() -> Vec<CaptureKind> {
    vec![CaptureKind::PageScreenshot]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub job_name: String,

    #[serde(default = "default_store")]
    pub store: PathBuf,

    /// Keeps previous runs for chronos mode
    #[serde(default)]
    pub backup: Option<PathBuf>,

    #[serde(default)]
    pub mode: Mode,

    #[serde(default = "default_sort_keys")]
    pub sort_keys: Vec<String>,

    #[serde(default)]
    pub ignore_keys: Vec<String>,

    #[serde(default)]
    pub threshold: f64,

    #[serde(default = "default_captures")]
    pub captures: Vec<CaptureKind>,

    /// Targets when the scenario has no environments
    #[serde(default)]
    pub targets: Option<TargetsConfig>,

    /// Exactly two for twins mode, at most one otherwise
    #[serde(default)]
    pub environments: Vec<EnvironmentConfig>,

    #[serde(default)]
    pub webdriver: WebDriverSection,

    /// Directory relative paths are resolved against
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl ScenarioConfig {
    /// Load a scenario from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading scenario {}", path.display()))?;
        let mut config: Self = toml::from_str(&content)
            .with_context(|| format!("parsing scenario {}", path.display()))?;
        config.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(config)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        self.base_dir.join(path)
    }

    /// The single environment of a shootings or chronos scenario, if any
    fn single_environment(&self) -> Result<Environment> {
        match self.environments.as_slice() {
            [] => Ok(Environment::NULL_OBJECT),
            [only] => Ok(Environment::new(only.name.as_str())?),
            other => bail!(
                "{:?} mode takes at most one environment, found {}",
                self.mode,
                other.len()
            ),
        }
    }

    fn strategy(&self) -> Result<Strategy> {
        Ok(match self.mode {
            Mode::Shootings => Strategy::Shootings {
                environment: self.single_environment()?,
            },
            Mode::Chronos => Strategy::ChronosDiff {
                environment: self.single_environment()?,
            },
            Mode::Twins => match self.environments.as_slice() {
                [left, right] => Strategy::TwinsDiff {
                    left: Environment::new(left.name.as_str())?,
                    right: Environment::new(right.name.as_str())?,
                },
                other => bail!("twins mode needs exactly two environments, found {}", other.len()),
            },
        })
    }

    /// Validated engine parameters. The stores are created only once the
    /// parameters are valid.
    pub async fn parameters(&self) -> Result<Parameters> {
        let config = ParametersConfig {
            store: Some(MaterialStore::at(self.resolve(&self.store))),
            backup: self.backup.as_ref().map(|path| MaterialStore::at(self.resolve(path))),
            job_name: Some(JobName::new(self.job_name.as_str())?),
            job_timestamp: None,
            strategy: self.strategy()?,
            ignore_keys: IgnoreMetadataKeys::new(self.ignore_keys.iter()),
            sort_keys: SortKeys::new(self.sort_keys.iter()),
            threshold: self.threshold,
            wait_timeout: Duration::from_secs(self.webdriver.wait_timeout_secs),
        };
        let parameters = Parameters::try_from(config)?;

        parameters.store().create().await?;
        if let Some(backup) = parameters.backup() {
            backup.create().await?;
        }
        Ok(parameters)
    }

    /// Engine with the configured target source and capturers
    pub fn engine(&self) -> Result<Inspectus> {
        let targets: Box<dyn TargetSource> = if self.environments.is_empty() {
            self.targets
                .as_ref()
                .context("scenario has neither targets nor environments")?
                .source(&self.base_dir)?
        } else {
            let mut sources = PerEnvironment::new();
            for env in &self.environments {
                sources = sources.with(
                    Environment::new(env.name.as_str())?,
                    env.targets.source(&self.base_dir)?,
                );
            }
            Box::new(sources)
        };

        let mut engine = Inspectus::new(targets);
        for kind in &self.captures {
            engine = engine.with_boxed_capturer(kind.clone().into_capturer()?);
        }
        Ok(engine)
    }
}
