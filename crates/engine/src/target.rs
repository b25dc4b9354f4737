//! Navigable targets and the locators that signal page readiness

use std::fmt;
use std::str::FromStr;

use inspectus_common::Metadata;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::DiscoveryError;

/// How to find an element on a page
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Locator {
    Css(String),
    XPath(String),
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Locator::Css(selector.into())
    }

    pub fn xpath(expr: impl Into<String>) -> Self {
        Locator::XPath(expr.into())
    }

    /// Location strategy name of the WebDriver wire protocol
    pub fn strategy(&self) -> &'static str {
        match self {
            Locator::Css(_) => "css selector",
            Locator::XPath(_) => "xpath",
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Locator::Css(s) | Locator::XPath(s) => s,
        }
    }
}

impl FromStr for Locator {
    type Err = DiscoveryError;

    /// Accepts `css=...`, `xpath=...`, or a bare expression; bare
    /// expressions starting with `/` or `(` are XPath, anything else CSS.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let locator = if let Some(rest) = s.strip_prefix("css=") {
            Locator::css(rest.trim())
        } else if let Some(rest) = s.strip_prefix("xpath=") {
            Locator::xpath(rest.trim())
        } else if s.starts_with('/') || s.starts_with('(') {
            Locator::xpath(s)
        } else {
            Locator::css(s)
        };
        if locator.value().is_empty() {
            return Err(DiscoveryError::InvalidLocator(format!("empty locator '{}'", s)));
        }
        Ok(locator)
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(s) => write!(f, "css={}", s),
            Locator::XPath(s) => write!(f, "xpath={}", s),
        }
    }
}

/// One navigable location plus the locator that must be present before
/// the page is captured. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    url: Url,
    handle: Locator,
    #[serde(default)]
    attributes: Metadata,
}

impl Target {
    pub fn new(url: &str, handle: Locator) -> Result<Self, DiscoveryError> {
        let parsed = Url::parse(url.trim()).map_err(|e| DiscoveryError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        Self::from_url(parsed, handle)
    }

    pub fn from_url(url: Url, handle: Locator) -> Result<Self, DiscoveryError> {
        if url.cannot_be_a_base() || (url.host_str().is_none() && url.scheme() != "file") {
            return Err(DiscoveryError::InvalidUrl {
                url: url.to_string(),
                reason: "not an absolute hierarchical URL".to_string(),
            });
        }
        Ok(Self {
            url,
            handle,
            attributes: Metadata::new(),
        })
    }

    /// Copy of this target with one more attribute
    pub fn with_attribute(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut copy = self.clone();
        copy.attributes.insert(key, value);
        copy
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn handle(&self) -> &Locator {
        &self.handle
    }

    pub fn attributes(&self) -> &Metadata {
        &self.attributes
    }
}
