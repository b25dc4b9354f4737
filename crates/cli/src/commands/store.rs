//! Store inspection commands

use std::path::Path;

use anyhow::Result;
use inspectus_common::{JobName, JobTimestamp, Material, MaterialStore};
use serde::Serialize;

use crate::output::{print_list, OutputFormat, TableDisplay};

#[derive(Serialize)]
pub struct JobDisplay {
    pub job_name: String,
    pub runs: usize,
    pub latest: Option<String>,
    pub size_bytes: u64,
}

impl TableDisplay for JobDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Job", "Runs", "Latest", "Size"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.job_name.clone(),
            self.runs.to_string(),
            self.latest.clone().unwrap_or_else(|| "-".to_string()),
            format_bytes(self.size_bytes),
        ]
    }
}

#[derive(Serialize)]
pub struct RunDisplay {
    pub job_timestamp: String,
    pub materials: usize,
}

impl TableDisplay for RunDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Timestamp", "Materials"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.job_timestamp.clone(), self.materials.to_string()]
    }
}

#[derive(Serialize)]
pub struct MaterialDisplay {
    pub id: String,
    pub file_type: String,
    pub size: u64,
    pub step: Option<String>,
    pub url: String,
    pub metadata: inspectus_common::Metadata,
}

impl From<&Material> for MaterialDisplay {
    fn from(m: &Material) -> Self {
        let url = format!(
            "{}://{}{}",
            m.metadata.get("URL.protocol").unwrap_or("?"),
            m.metadata.get("URL.host").unwrap_or(""),
            m.metadata.get("URL.path").unwrap_or("")
        );
        Self {
            id: m.id.clone(),
            file_type: m.file_type.to_string(),
            size: m.size,
            step: m.metadata.get("step").map(str::to_string),
            url,
            metadata: m.metadata.clone(),
        }
    }
}

impl TableDisplay for MaterialDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "Type", "Size", "Step", "URL"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id[..self.id.len().min(12)].to_string(),
            self.file_type.clone(),
            format_bytes(self.size),
            self.step.clone().unwrap_or_else(|| "-".to_string()),
            self.url.clone(),
        ]
    }
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

pub async fn jobs(store: &Path, format: OutputFormat) -> Result<()> {
    let store = MaterialStore::open(store).await?;
    let mut rows = Vec::new();
    for job_name in store.job_names().await? {
        let timestamps = store.job_timestamps(&job_name).await?;
        rows.push(JobDisplay {
            runs: timestamps.len(),
            latest: timestamps.last().map(ToString::to_string),
            size_bytes: store.job_size(&job_name),
            job_name: job_name.to_string(),
        });
    }
    print_list(&rows, format);
    Ok(())
}

pub async fn runs(store: &Path, job: &str, format: OutputFormat) -> Result<()> {
    let store = MaterialStore::open(store).await?;
    let job_name = JobName::new(job)?;
    let mut rows = Vec::new();
    for ts in store.job_timestamps(&job_name).await? {
        rows.push(RunDisplay {
            materials: store.list(&job_name, &ts).await?.len(),
            job_timestamp: ts.to_string(),
        });
    }
    print_list(&rows, format);
    Ok(())
}

pub async fn materials(store: &Path, job: &str, timestamp: &str, format: OutputFormat) -> Result<()> {
    let store = MaterialStore::open(store).await?;
    let job_name = JobName::new(job)?;
    let ts = JobTimestamp::parse(timestamp)?;

    let mut materials = store.list(&job_name, &ts).await?;
    materials.sort_by(|a, b| {
        a.metadata
            .get("step")
            .cmp(&b.metadata.get("step"))
            .then_with(|| a.file_type.cmp(&b.file_type))
    });
    let rows: Vec<MaterialDisplay> = materials.iter().map(MaterialDisplay::from).collect();
    print_list(&rows, format);
    Ok(())
}
