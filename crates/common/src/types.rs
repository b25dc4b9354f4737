//! Core types for Inspectus

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// Layout of a job timestamp, e.g. `20240131_235959`
pub const JOB_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Name of a scenario, stable across its runs. Used as a directory name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobName(String);

impl JobName {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::InvalidName("job name must not be empty".to_string()));
        }
        if name.starts_with('.')
            || name.chars().any(|c| c == '/' || c == '\\' || c.is_control())
        {
            return Err(Error::InvalidName(format!(
                "job name '{}' is not usable as a directory name",
                name
            )));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for JobName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<JobName> for String {
    fn from(name: JobName) -> Self {
        name.0
    }
}

impl fmt::Display for JobName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies one run of a job. Second resolution, UTC.
///
/// Lexical order of the rendered form equals chronological order, so the
/// directory listing of a job sorts its runs oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobTimestamp(NaiveDateTime);

impl JobTimestamp {
    /// Current time truncated to the second
    pub fn now() -> Self {
        let now = Utc::now().naive_utc();
        // Drop sub-second precision so that render/parse is lossless
        let rendered = now.format(JOB_TIMESTAMP_FORMAT).to_string();
        Self(NaiveDateTime::parse_from_str(&rendered, JOB_TIMESTAMP_FORMAT).unwrap_or(now))
    }

    /// A timestamp strictly later than `other`: now, or `other` plus one
    /// second when the clock has not moved past it yet.
    pub fn later_than(other: &JobTimestamp) -> Self {
        let now = Self::now();
        if now > *other {
            now
        } else {
            Self(other.0 + chrono::Duration::seconds(1))
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        NaiveDateTime::parse_from_str(value, JOB_TIMESTAMP_FORMAT)
            .map(Self)
            .map_err(|_| Error::InvalidTimestamp {
                value: value.to_string(),
            })
    }
}

impl TryFrom<String> for JobTimestamp {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<JobTimestamp> for String {
    fn from(ts: JobTimestamp) -> Self {
        ts.to_string()
    }
}

impl fmt::Display for JobTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(JOB_TIMESTAMP_FORMAT))
    }
}

/// Kind of payload held by a material
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Png,
    Html,
    Txt,
}

impl FileType {
    pub fn extension(&self) -> &'static str {
        match self {
            FileType::Png => "png",
            FileType::Html => "html",
            FileType::Txt => "txt",
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, FileType::Png)
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Ordered key/value annotations attached to a material
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, String>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed metadata with the components of a URL (`URL.host`, `URL.path`, ...)
    pub fn from_url(url: &Url) -> Self {
        let mut md = Self::new();
        md.insert("URL.protocol", url.scheme());
        if let Some(host) = url.host_str() {
            md.insert("URL.host", host);
        }
        if let Some(port) = url.port() {
            md.insert("URL.port", port.to_string());
        }
        md.insert("URL.path", url.path());
        if let Some(query) = url.query() {
            md.insert("URL.query", query);
        }
        if let Some(fragment) = url.fragment() {
            md.insert("URL.fragment", fragment);
        }
        md
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Copy of `self` overlaid with `other`; keys of `other` win
    pub fn merged(&self, other: &Metadata) -> Self {
        let mut out = self.clone();
        for (k, v) in other.iter() {
            out.insert(k, v);
        }
        out
    }

    /// Copy of `self` with every ignored key removed
    pub fn without(&self, ignore: &IgnoreMetadataKeys) -> Self {
        Self(
            self.0
                .iter()
                .filter(|(k, _)| !ignore.contains(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (k, v)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "\"{}\":\"{}\"", k, v)?;
        }
        f.write_str("}")
    }
}

/// Named execution branch, e.g. "Production" or "Development".
///
/// `Environment::NULL_OBJECT` means "no environment distinction".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Environment(String);

impl Environment {
    pub const NULL_OBJECT: Environment = Environment(String::new());

    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::InvalidName("environment name must not be blank".to_string()));
        }
        Ok(Self(name))
    }

    pub fn is_null(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::NULL_OBJECT
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("(none)")
        } else {
            f.write_str(&self.0)
        }
    }
}

/// Metadata keys excluded from fingerprint equality
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IgnoreMetadataKeys(BTreeSet<String>);

impl IgnoreMetadataKeys {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(keys.into_iter().map(Into::into).collect())
    }

    pub fn with(mut self, key: impl Into<String>) -> Self {
        self.0.insert(key.into());
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Metadata keys used to order materials for presentation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SortKeys(Vec<String>);

impl SortKeys {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(keys.into_iter().map(Into::into).collect())
    }

    /// Compare two metadata mappings key by key; a missing value sorts last
    pub fn compare(&self, a: &Metadata, b: &Metadata) -> Ordering {
        for key in &self.0 {
            let ord = match (a.get(key), b.get(key)) {
                (Some(x), Some(y)) => x.cmp(y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Durable handle to one captured artifact.
///
/// Write-once; the payload lives in the store under `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Material {
    /// SHA-256 of the payload, hex encoded
    pub id: String,
    pub job_name: JobName,
    pub job_timestamp: JobTimestamp,
    pub file_type: FileType,
    pub metadata: Metadata,
    pub size: u64,
}

impl Material {
    /// `<id>.<ext>`, the object's file name inside a run
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.id, self.file_type.extension())
    }

    /// Short id for log lines
    pub fn short_id(&self) -> &str {
        &self.id[..self.id.len().min(12)]
    }
}

impl fmt::Display for Material {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{} {}",
            self.job_name,
            self.job_timestamp,
            self.file_name(),
            self.metadata
        )
    }
}
