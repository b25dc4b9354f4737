//! Capture functions
//!
//! A `Capturer` turns the page currently loaded in a session into exactly
//! one stored `Material`. The engine opens the target first; capturers only
//! read from the page.

use std::io::Cursor;

use async_trait::async_trait;
use inspectus_common::{FileType, JobName, JobTimestamp, Material, MaterialStore, Metadata};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::driver::BrowserSession;
use crate::error::CaptureResult;
use crate::target::{Locator, Target};

pub const IMAGE_WIDTH_KEY: &str = "image-width";
pub const IMAGE_HEIGHT_KEY: &str = "image-height";

/// Where captured materials go: one run of one job
#[derive(Debug, Clone, Copy)]
pub struct StorageDirectory<'a> {
    pub store: &'a MaterialStore,
    pub job_name: &'a JobName,
    pub job_timestamp: &'a JobTimestamp,
}

impl<'a> StorageDirectory<'a> {
    async fn write(
        &self,
        file_type: FileType,
        metadata: &Metadata,
        data: &[u8],
    ) -> CaptureResult<Material> {
        let material = self
            .store
            .write(self.job_name, self.job_timestamp, file_type, metadata, data)
            .await?;
        debug!("Captured {}", material);
        Ok(material)
    }
}

#[async_trait]
pub trait Capturer: Send + Sync {
    /// Short name for log lines
    fn name(&self) -> &str;

    async fn capture(
        &self,
        session: &mut dyn BrowserSession,
        storage: &StorageDirectory<'_>,
        target: &Target,
        attributes: &Metadata,
    ) -> CaptureResult<Material>;
}

/// URL-derived keys, then target attributes, then caller attributes
pub fn material_metadata(target: &Target, attributes: &Metadata) -> Metadata {
    Metadata::from_url(target.url())
        .merged(target.attributes())
        .merged(attributes)
}

fn with_image_dimensions(metadata: Metadata, png: &[u8]) -> Metadata {
    let dimensions = image::io::Reader::new(Cursor::new(png))
        .with_guessed_format()
        .map_err(image::ImageError::from)
        .and_then(|reader| reader.into_dimensions());
    match dimensions {
        Ok((width, height)) => metadata
            .with(IMAGE_WIDTH_KEY, width.to_string())
            .with(IMAGE_HEIGHT_KEY, height.to_string()),
        Err(e) => {
            warn!("Could not read screenshot dimensions: {}", e);
            metadata
        }
    }
}

/// Screenshot of the whole viewport
#[derive(Debug, Clone, Copy, Default)]
pub struct EntirePageScreenshot;

#[async_trait]
impl Capturer for EntirePageScreenshot {
    fn name(&self) -> &str {
        "page-screenshot"
    }

    async fn capture(
        &self,
        session: &mut dyn BrowserSession,
        storage: &StorageDirectory<'_>,
        target: &Target,
        attributes: &Metadata,
    ) -> CaptureResult<Material> {
        let png = session.screenshot_bytes().await?;
        let metadata = with_image_dimensions(material_metadata(target, attributes), &png);
        storage.write(FileType::Png, &metadata, &png).await
    }
}

/// Screenshot of a single element
#[derive(Debug, Clone)]
pub struct ElementScreenshot {
    locator: Locator,
}

impl ElementScreenshot {
    pub fn new(locator: Locator) -> Self {
        Self { locator }
    }
}

#[async_trait]
impl Capturer for ElementScreenshot {
    fn name(&self) -> &str {
        "element-screenshot"
    }

    async fn capture(
        &self,
        session: &mut dyn BrowserSession,
        storage: &StorageDirectory<'_>,
        target: &Target,
        attributes: &Metadata,
    ) -> CaptureResult<Material> {
        let png = session.element_screenshot_bytes(&self.locator).await?;
        let metadata = material_metadata(target, attributes).with("element", self.locator.to_string());
        let metadata = with_image_dimensions(metadata, &png);
        storage.write(FileType::Png, &metadata, &png).await
    }
}

/// Serialized DOM of the page
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlSource;

#[async_trait]
impl Capturer for HtmlSource {
    fn name(&self) -> &str {
        "html-source"
    }

    async fn capture(
        &self,
        session: &mut dyn BrowserSession,
        storage: &StorageDirectory<'_>,
        target: &Target,
        attributes: &Metadata,
    ) -> CaptureResult<Material> {
        let html = session.page_source().await?;
        let metadata = material_metadata(target, attributes);
        storage.write(FileType::Html, &metadata, html.as_bytes()).await
    }
}

/// Declarative capture selection, as found in scenario files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum CaptureKind {
    PageScreenshot,
    HtmlSource,
    ElementScreenshot { locator: String },
}

impl CaptureKind {
    pub fn into_capturer(self) -> Result<Box<dyn Capturer>, crate::error::DiscoveryError> {
        Ok(match self {
            CaptureKind::PageScreenshot => Box::new(EntirePageScreenshot),
            CaptureKind::HtmlSource => Box::new(HtmlSource),
            CaptureKind::ElementScreenshot { locator } => {
                Box::new(ElementScreenshot::new(locator.parse()?))
            }
        })
    }
}
