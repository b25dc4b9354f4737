//! Target discovery from declarative sources
//!
//! Two file formats are understood:
//!
//! * CSV, one target per row: `url,locator`. An optional first row whose
//!   first cell is `url` is treated as a header; `#` starts a comment line.
//! * JSON sitemap, a template whose `${NAME}` placeholders are resolved
//!   from per-environment bindings before parsing:
//!
//! ```json
//! {
//!   "entries": [
//!     { "url": "${URL_PREFIX}/index.html", "handle": { "By.cssSelector": "img#apple" } },
//!     { "url": "${URL_PREFIX}/about.html", "handle": "xpath=//h1", "attributes": { "page": "about" } }
//!   ]
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use inspectus_common::Environment;
use serde::Deserialize;
use tracing::debug;

use crate::error::DiscoveryError;
use crate::target::{Locator, Target};

/// Anything that can produce the ordered target list of a run
pub trait TargetSource: Send + Sync {
    /// Resolve targets for one environment (`Environment::NULL_OBJECT` when
    /// the run makes no environment distinction)
    fn discover(&self, environment: &Environment) -> Result<Vec<Target>, DiscoveryError>;
}

impl<T: TargetSource + ?Sized> TargetSource for Box<T> {
    fn discover(&self, environment: &Environment) -> Result<Vec<Target>, DiscoveryError> {
        (**self).discover(environment)
    }
}

/// A fixed, already-built list of targets
#[derive(Debug, Clone, Default)]
pub struct StaticTargets(pub Vec<Target>);

impl TargetSource for StaticTargets {
    fn discover(&self, _environment: &Environment) -> Result<Vec<Target>, DiscoveryError> {
        Ok(self.0.clone())
    }
}

/// Dispatches to a different source per environment
#[derive(Default)]
pub struct PerEnvironment {
    sources: Vec<(Environment, Box<dyn TargetSource>)>,
}

impl PerEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, environment: Environment, source: impl TargetSource + 'static) -> Self {
        self.sources.push((environment, Box::new(source)));
        self
    }
}

impl TargetSource for PerEnvironment {
    fn discover(&self, environment: &Environment) -> Result<Vec<Target>, DiscoveryError> {
        self.sources
            .iter()
            .find(|(env, _)| env == environment)
            .ok_or_else(|| DiscoveryError::UnknownEnvironment(environment.to_string()))?
            .1
            .discover(environment)
    }
}

/// CSV target list
#[derive(Debug, Clone)]
pub struct CsvTargetList {
    text: String,
}

impl CsvTargetList {
    pub fn from_path(path: &Path) -> Result<Self, DiscoveryError> {
        let text = std::fs::read_to_string(path).map_err(|e| DiscoveryError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Ok(Self { text })
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn parse(&self) -> Result<Vec<Target>, DiscoveryError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .comment(Some(b'#'))
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(self.text.as_bytes());

        let mut targets = Vec::new();
        for (index, record) in reader.records().enumerate() {
            let record = record?;
            let line = record.position().map(|p| p.line()).unwrap_or(index as u64 + 1);

            if record.iter().all(str::is_empty) {
                continue;
            }
            if index == 0 && record.get(0).map(|c| c.eq_ignore_ascii_case("url")).unwrap_or(false) {
                continue;
            }

            let url = record.get(0).filter(|c| !c.is_empty()).ok_or_else(|| {
                DiscoveryError::Parse {
                    line,
                    reason: "missing url column".to_string(),
                }
            })?;
            let handle = record.get(1).filter(|c| !c.is_empty()).ok_or_else(|| {
                DiscoveryError::Parse {
                    line,
                    reason: format!("missing locator column for {}", url),
                }
            })?;

            let locator: Locator = handle.parse().map_err(|e: DiscoveryError| {
                DiscoveryError::Parse {
                    line,
                    reason: e.to_string(),
                }
            })?;
            let target = Target::new(url, locator).map_err(|e| DiscoveryError::Parse {
                line,
                reason: e.to_string(),
            })?;
            targets.push(target);
        }

        debug!("Parsed {} target(s) from CSV", targets.len());
        Ok(targets)
    }
}

impl TargetSource for CsvTargetList {
    fn discover(&self, _environment: &Environment) -> Result<Vec<Target>, DiscoveryError> {
        self.parse()
    }
}

#[derive(Debug, Deserialize)]
struct SitemapDocument {
    entries: Vec<SitemapEntry>,
}

#[derive(Debug, Deserialize)]
struct SitemapEntry {
    url: String,
    handle: HandleDef,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HandleDef {
    Plain(String),
    By(BTreeMap<String, String>),
}

impl HandleDef {
    fn to_locator(&self) -> Result<Locator, DiscoveryError> {
        match self {
            HandleDef::Plain(s) => s.parse(),
            HandleDef::By(map) => {
                let mut iter = map.iter();
                match (iter.next(), iter.next()) {
                    (Some((kind, value)), None) => match kind.as_str() {
                        "By.xpath" => Ok(Locator::xpath(value.as_str())),
                        "By.cssSelector" => Ok(Locator::css(value.as_str())),
                        "By.id" => Ok(Locator::xpath(format!("//*[@id='{}']", value))),
                        other => Err(DiscoveryError::InvalidLocator(format!(
                            "unsupported locator kind '{}'",
                            other
                        ))),
                    },
                    _ => Err(DiscoveryError::InvalidLocator(
                        "handle must have exactly one entry".to_string(),
                    )),
                }
            }
        }
    }
}

/// JSON sitemap template with per-environment bindings
#[derive(Debug, Clone)]
pub struct SitemapJson {
    template: String,
    default_bindings: HashMap<String, String>,
    bindings: HashMap<Environment, HashMap<String, String>>,
}

impl SitemapJson {
    pub fn from_path(path: &Path) -> Result<Self, DiscoveryError> {
        let template = std::fs::read_to_string(path).map_err(|e| DiscoveryError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Ok(Self::from_template(template))
    }

    pub fn from_template(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            default_bindings: HashMap::new(),
            bindings: HashMap::new(),
        }
    }

    /// Bindings used when the environment has none of its own
    pub fn with_default_bindings(mut self, bindings: HashMap<String, String>) -> Self {
        self.default_bindings = bindings;
        self
    }

    pub fn with_bindings(mut self, environment: Environment, bindings: HashMap<String, String>) -> Self {
        self.bindings.insert(environment, bindings);
        self
    }

    /// Substitute the bindings, then parse the resulting document
    pub fn load(&self, bindings: &HashMap<String, String>) -> Result<Vec<Target>, DiscoveryError> {
        let text = substitute(&self.template, bindings)?;
        let document: SitemapDocument = serde_json::from_str(&text)?;

        let mut targets = Vec::with_capacity(document.entries.len());
        for entry in &document.entries {
            let mut target = Target::new(&entry.url, entry.handle.to_locator()?)?;
            for (k, v) in &entry.attributes {
                target = target.with_attribute(k.as_str(), v.as_str());
            }
            targets.push(target);
        }

        debug!("Loaded {} target(s) from sitemap", targets.len());
        Ok(targets)
    }
}

impl TargetSource for SitemapJson {
    fn discover(&self, environment: &Environment) -> Result<Vec<Target>, DiscoveryError> {
        let bindings = self.bindings.get(environment).unwrap_or(&self.default_bindings);
        self.load(bindings)
    }
}

/// Replace every `${NAME}` with its binding
fn substitute(template: &str, bindings: &HashMap<String, String>) -> Result<String, DiscoveryError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or_else(|| DiscoveryError::Parse {
            line: line_of(template, template.len() - rest.len() + start),
            reason: "unterminated placeholder".to_string(),
        })?;
        let name = &after[..end];
        let value = bindings
            .get(name)
            .ok_or_else(|| DiscoveryError::UnboundPlaceholder(name.to_string()))?;
        out.push_str(value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn line_of(text: &str, offset: usize) -> u64 {
    text[..offset].matches('\n').count() as u64 + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    const SITEMAP: &str = r#"{
  "entries": [
    { "url": "${URL_PREFIX}/", "handle": { "By.cssSelector": "img#apple" } },
    { "url": "${URL_PREFIX}/about.html", "handle": "//h1", "attributes": { "page": "about" } }
  ]
}"#;

    fn bindings(prefix: &str) -> HashMap<String, String> {
        HashMap::from([("URL_PREFIX".to_string(), prefix.to_string())])
    }

    #[test]
    fn test_parse_csv_with_header_and_comments() {
        let csv = "url,handle\n# production pages\nhttp://example.com/,//a[@id='top']\nhttp://example.com/about,css=h1\n";
        let targets = CsvTargetList::from_text(csv).parse().unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].url().as_str(), "http://example.com/");
        assert_eq!(targets[0].handle(), &Locator::xpath("//a[@id='top']"));
        assert_eq!(targets[1].handle(), &Locator::css("h1"));
    }

    #[test]
    fn test_parse_csv_without_header() {
        let csv = "http://example.com/,body\n";
        let targets = CsvTargetList::from_text(csv).parse().unwrap();
        assert_eq!(targets.len(), 1);
    }

    #[test]
    fn test_malformed_csv_row_reports_line() {
        let csv = "http://example.com/,body\nnot a url,body\n";
        match CsvTargetList::from_text(csv).parse() {
            Err(DiscoveryError::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected parse error, got {:?}", other),
        }

        let missing = "http://example.com/\n";
        assert!(matches!(
            CsvTargetList::from_text(missing).parse(),
            Err(DiscoveryError::Parse { .. })
        ));
    }

    #[test]
    fn test_sitemap_bindings_per_environment() {
        let prod = Environment::new("Production").unwrap();
        let dev = Environment::new("Development").unwrap();
        let sitemap = SitemapJson::from_template(SITEMAP)
            .with_bindings(prod.clone(), bindings("https://example.com/myApple"))
            .with_bindings(dev.clone(), bindings("https://example.com/myApple-alt"));

        let p = sitemap.discover(&prod).unwrap();
        let d = sitemap.discover(&dev).unwrap();
        assert_eq!(p.len(), 2);
        assert_eq!(p[0].url().as_str(), "https://example.com/myApple/");
        assert_eq!(d[1].url().as_str(), "https://example.com/myApple-alt/about.html");
        assert_eq!(d[1].attributes().get("page"), Some("about"));
        assert_eq!(p[0].handle(), &Locator::css("img#apple"));
    }

    #[test]
    fn test_sitemap_unbound_placeholder() {
        let sitemap = SitemapJson::from_template(SITEMAP);
        assert!(matches!(
            sitemap.discover(&Environment::NULL_OBJECT),
            Err(DiscoveryError::UnboundPlaceholder(name)) if name == "URL_PREFIX"
        ));
    }

    #[test]
    fn test_per_environment_unknown() {
        let sources = PerEnvironment::new().with(
            Environment::new("Production").unwrap(),
            CsvTargetList::from_text("http://example.com/,body"),
        );
        assert!(sources.discover(&Environment::new("Production").unwrap()).is_ok());
        assert!(matches!(
            sources.discover(&Environment::new("Staging").unwrap()),
            Err(DiscoveryError::UnknownEnvironment(_))
        ));
    }
}
