//! Inspectus execution engine
//!
//! Drives a browser through a list of targets, stores every captured
//! artifact as a content-addressed material and, depending on the
//! strategy, compares the run with a second environment or with the
//! previous run of the same job.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Inspectus::execute(Parameters, BrowserSession)             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Discover   TargetSource (CSV, JSON sitemap, static)        │
//! │  Capture    open_target -> Capturer -> MaterialStore::write │
//! │  Compare    pair_materials -> visual::compare -> DiffReport │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Strategy                                                   │
//! │    ├── Shootings     capture only, zero or one environment  │
//! │    ├── TwinsDiff     environment A vs environment B         │
//! │    └── ChronosDiff   this run vs latest previous run        │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod capture;
pub mod discovery;
pub mod driver;
pub mod engine;
pub mod error;
pub mod parameters;
pub mod report;
pub mod target;
pub mod visual;
pub mod webdriver;

pub use capture::{CaptureKind, Capturer, ElementScreenshot, EntirePageScreenshot, HtmlSource, StorageDirectory};
pub use discovery::{CsvTargetList, PerEnvironment, SitemapJson, StaticTargets, TargetSource};
pub use driver::{navigate_by_click, navigate_to, open_target, BrowserSession, DEFAULT_WAIT_TIMEOUT};
pub use engine::Inspectus;
pub use error::{CaptureError, CaptureResult, DiscoveryError, ErrorKind, InspectusError, InspectusResult};
pub use parameters::{Intermediates, Parameters, ParametersConfig, Strategy};
pub use report::{DiffReport, ReportEntry, Verdict};
pub use target::{Locator, Target};
pub use webdriver::{Browser, WebDriverConfig, WebDriverSession};
