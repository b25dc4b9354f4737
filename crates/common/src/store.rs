//! Content-addressed material store
//!
//! Materials are addressed in three levels:
//!
//! ```text
//! <root>/<job name>/<job timestamp>/objects/<sha256>.<ext>   payload
//! <root>/<job name>/<job timestamp>/index/<record>.json      Material record
//! <root>/.tmp/                                                staging for atomic writes
//! ```
//!
//! Job names never start with a dot, so the staging directory cannot
//! collide with a job. Every file is written to `.tmp/` first and renamed into place, and no
//! existing file is ever rewritten, so independent runs may write into the
//! same root concurrently.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, info};

use crate::types::{FileType, JobName, JobTimestamp, Material, Metadata};
use crate::{Error, Result};

const OBJECTS_DIR: &str = "objects";
const INDEX_DIR: &str = "index";
const TMP_DIR: &str = ".tmp";

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Content-addressed store for captured materials
#[derive(Debug, Clone)]
pub struct MaterialStore {
    root: PathBuf,
}

impl MaterialStore {
    /// Open (creating if needed) a store at the given root directory
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let store = Self::at(root);
        store.create().await?;
        Ok(store)
    }

    /// Handle on a store root without touching the filesystem
    pub fn at(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Open an existing store for inspection; nothing is created
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let store = Self::at(root);
        let reason = match fs::metadata(&store.root).await {
            Ok(meta) if meta.is_dir() => return Ok(store),
            Ok(_) => "not a directory".to_string(),
            Err(e) => e.to_string(),
        };
        Err(Error::Unavailable {
            path: store.root.display().to_string(),
            reason,
        })
    }

    /// Create the root and staging directories
    pub async fn create(&self) -> Result<()> {
        fs::create_dir_all(self.root.join(TMP_DIR))
            .await
            .map_err(|e| Error::Unavailable {
                path: self.root.display().to_string(),
                reason: e.to_string(),
            })?;
        info!("Opened material store at {:?}", self.root);
        Ok(())
    }

    /// Get the root path of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every run of a job
    pub fn job_dir(&self, job_name: &JobName) -> PathBuf {
        self.root.join(job_name.as_str())
    }

    /// Directory of one run
    pub fn run_dir(&self, job_name: &JobName, job_timestamp: &JobTimestamp) -> PathBuf {
        self.job_dir(job_name).join(job_timestamp.to_string())
    }

    /// Compute SHA-256 hash of data
    pub fn hash(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    /// Path of a material's payload
    pub fn object_path(&self, material: &Material) -> PathBuf {
        self.run_dir(&material.job_name, &material.job_timestamp)
            .join(OBJECTS_DIR)
            .join(material.file_name())
    }

    /// Write a payload under a job run and return its material handle.
    ///
    /// Identical bytes yield the same id; writing the same bytes with the
    /// same file type and metadata twice yields the same record.
    pub async fn write(
        &self,
        job_name: &JobName,
        job_timestamp: &JobTimestamp,
        file_type: FileType,
        metadata: &Metadata,
        data: &[u8],
    ) -> Result<Material> {
        let material = Material {
            id: Self::hash(data),
            job_name: job_name.clone(),
            job_timestamp: *job_timestamp,
            file_type,
            metadata: metadata.clone(),
            size: data.len() as u64,
        };

        let object_path = self.object_path(&material);
        if fs::try_exists(&object_path).await? {
            debug!("Object {} already exists", material.short_id());
        } else {
            self.place(&object_path, data).await?;
            debug!("Stored object {} ({} bytes)", material.short_id(), data.len());
        }

        let record_path = self.record_path(&material)?;
        if !fs::try_exists(&record_path).await? {
            let record = serde_json::to_vec_pretty(&material)?;
            self.place(&record_path, &record).await?;
        }

        Ok(material)
    }

    /// List all materials of one run; empty when the run does not exist
    pub async fn list(
        &self,
        job_name: &JobName,
        job_timestamp: &JobTimestamp,
    ) -> Result<Vec<Material>> {
        let index_dir = self.run_dir(job_name, job_timestamp).join(INDEX_DIR);
        let mut materials = Vec::new();

        if !fs::try_exists(&index_dir).await? {
            return Ok(materials);
        }

        let mut entries = fs::read_dir(&index_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                let data = fs::read(&path).await?;
                materials.push(serde_json::from_slice::<Material>(&data)?);
            }
        }

        Ok(materials)
    }

    /// Read the payload of a material, verifying it against its content id
    pub async fn read(&self, material: &Material) -> Result<Vec<u8>> {
        let path = self.object_path(material);

        if !fs::try_exists(&path).await? {
            return Err(Error::NotFound {
                kind: "object".to_string(),
                id: material.id.clone(),
            });
        }

        let data = fs::read(&path).await?;

        let actual_digest = Self::hash(&data);
        if actual_digest != material.id {
            return Err(Error::IntegrityError(format!(
                "Digest mismatch: expected {}, got {}",
                material.id, actual_digest
            )));
        }

        Ok(data)
    }

    /// Look up a material of a run by content id
    pub async fn get(
        &self,
        job_name: &JobName,
        job_timestamp: &JobTimestamp,
        id: &str,
    ) -> Result<Material> {
        self.list(job_name, job_timestamp)
            .await?
            .into_iter()
            .find(|m| m.id == id)
            .ok_or_else(|| Error::NotFound {
                kind: "material".to_string(),
                id: format!("{}/{}/{}", job_name, job_timestamp, id),
            })
    }

    /// All job names present in the store, sorted
    pub async fn job_names(&self) -> Result<Vec<JobName>> {
        let mut names = Vec::new();
        for name in self.subdirectories(&self.root).await? {
            // Skips the staging directory along with anything else that is not a job
            if let Ok(job_name) = JobName::new(name) {
                names.push(job_name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// All runs of a job, oldest first
    pub async fn job_timestamps(&self, job_name: &JobName) -> Result<Vec<JobTimestamp>> {
        let mut timestamps: Vec<JobTimestamp> = self
            .subdirectories(&self.job_dir(job_name))
            .await?
            .iter()
            .filter_map(|name| JobTimestamp::parse(name).ok())
            .collect();
        timestamps.sort();
        Ok(timestamps)
    }

    /// Most recent run of `job_name` strictly earlier than `excluding` that
    /// holds at least one material. `None` means there is no prior run.
    pub async fn latest_before(
        &self,
        job_name: &JobName,
        excluding: &JobTimestamp,
    ) -> Result<Option<JobTimestamp>> {
        let timestamps = self.job_timestamps(job_name).await?;
        for ts in timestamps.into_iter().rev().filter(|ts| ts < excluding) {
            if !self.list(job_name, &ts).await?.is_empty() {
                return Ok(Some(ts));
            }
        }
        Ok(None)
    }

    /// Copy every material of a run into another store; returns the count
    pub async fn copy_run(
        &self,
        dest: &MaterialStore,
        job_name: &JobName,
        job_timestamp: &JobTimestamp,
    ) -> Result<usize> {
        let materials = self.list(job_name, job_timestamp).await?;
        for material in &materials {
            let data = self.read(material).await?;
            dest.write(
                &material.job_name,
                &material.job_timestamp,
                material.file_type,
                &material.metadata,
                &data,
            )
            .await?;
        }
        info!(
            "Copied {} material(s) of {}/{} to {:?}",
            materials.len(),
            job_name,
            job_timestamp,
            dest.root()
        );
        Ok(materials.len())
    }

    /// Index record path; unique per (content id, file type, metadata)
    fn record_path(&self, material: &Material) -> Result<PathBuf> {
        let key = format!(
            "{}\n{}\n{}",
            material.id,
            material.file_type,
            serde_json::to_string(&material.metadata)?
        );
        Ok(self
            .run_dir(&material.job_name, &material.job_timestamp)
            .join(INDEX_DIR)
            .join(format!("{}.json", Self::hash(key.as_bytes()))))
    }

    /// Write atomically via a uniquely named temp file
    async fn place(&self, path: &Path, data: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp_dir = self.root.join(TMP_DIR);
        fs::create_dir_all(&tmp_dir).await?;
        let tmp_path = tmp_dir.join(format!(
            "{}.{}.{}.tmp",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("object"),
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        fs::write(&tmp_path, data).await?;
        fs::rename(&tmp_path, path).await?;
        Ok(())
    }

    async fn subdirectories(&self, dir: &Path) -> Result<Vec<String>> {
        let mut names = Vec::new();
        if !fs::try_exists(dir).await? {
            return Ok(names);
        }
        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }

    /// Total payload bytes under a job, for status output
    pub fn job_size(&self, job_name: &JobName) -> u64 {
        walkdir::WalkDir::new(self.job_dir(job_name))
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().parent().and_then(|p| p.file_name()) == Some(std::ffi::OsStr::new(OBJECTS_DIR)))
            .map(|e| e.metadata().map(|m| m.len()).unwrap_or(0))
            .sum()
    }
}
