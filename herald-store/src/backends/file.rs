use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use herald_common::{
    id::{DeliveryId, JobId, LogId},
    internal,
};
use serde::{Serialize, de::DeserializeOwned};
use tokio::{fs, sync::Mutex};
use tracing::warn;

use crate::{
    StoreError,
    error::Result,
    records::{DeliveryStatus, EmailJob, EmailLog, JobStatus, WebhookDelivery, WebhookEvent},
    store::{JobStore, WebhookStore},
};

const JOBS_DIR: &str = "jobs";
const DELIVERIES_DIR: &str = "deliveries";
const LOGS_DIR: &str = "logs";
const TMP_PREFIX: &str = ".tmp_";

/// File-based store implementation
///
/// Records are stored as one JSON document per file under three
/// subdirectories of the store root:
/// - `jobs/{job_id}.json`
/// - `deliveries/{delivery_id}.json`
/// - `logs/{log_id}.json`
///
/// # Atomicity
/// Every record write goes to a `.tmp_` file first and is then renamed into
/// place, so a crash mid-write never leaves a truncated record. A claim
/// spans a read and a write, which a rename alone cannot make atomic, so all
/// mutating operations additionally serialize on an in-process lock. One
/// process per store root; multi-process deployments need a store backend
/// with genuine conditional updates.
///
/// # Security
/// - The root path is validated against traversal components and sensitive
///   system directories before use
/// - Only files matching the expected `{id}.json` pattern are read back
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Create a store rooted at `path`.
    ///
    /// # Errors
    /// Returns [`StoreError::Validation`] if the path is relative, contains
    /// `..` components, or points into a system directory.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        Self::validate_path(&path)?;

        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    /// Validate a store root path for security
    ///
    /// # Security Checks
    /// - Rejects paths containing `..` (directory traversal)
    /// - Rejects paths to sensitive system directories
    /// - Ensures the path is absolute
    fn validate_path(path: &Path) -> Result<()> {
        for component in path.components() {
            if component == std::path::Component::ParentDir {
                return Err(StoreError::Validation(format!(
                    "Store path cannot contain '..' components: {}",
                    path.display()
                )));
            }
        }

        if !path.is_absolute() {
            return Err(StoreError::Validation(format!(
                "Store path must be absolute: {}",
                path.display()
            )));
        }

        let sensitive_prefixes = [
            "/etc", "/bin", "/sbin", "/usr/bin", "/usr/sbin", "/boot", "/sys", "/proc", "/dev",
        ];

        for prefix in &sensitive_prefixes {
            if path.starts_with(prefix) {
                return Err(StoreError::Validation(format!(
                    "Store path cannot be in system directory {}: {}",
                    prefix,
                    path.display()
                )));
            }
        }

        Ok(())
    }

    /// Initialize the store directories.
    ///
    /// Creates the root and its subdirectories if they do not exist and
    /// removes any `.tmp_` files left behind by a crash mid-write. Call once
    /// during startup to fail fast on permission problems.
    ///
    /// # Errors
    /// - If a directory cannot be created
    /// - If a path exists but is not a directory
    pub fn init(&self) -> Result<()> {
        internal!("Initialising store at {}", self.path.display());

        for dir in [JOBS_DIR, DELIVERIES_DIR, LOGS_DIR] {
            let path = self.path.join(dir);

            if !path.try_exists()? {
                std::fs::create_dir_all(&path)?;
            } else if !path.is_dir() {
                return Err(StoreError::Validation(format!(
                    "Expected {} to be a directory, but it is not",
                    path.display()
                )));
            }

            self.cleanup_temp_files(&path)?;
        }

        Ok(())
    }

    /// Remove `.tmp_` files left by writes that never completed.
    fn cleanup_temp_files(&self, dir: &Path) -> Result<()> {
        let mut cleaned = 0;

        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let filename = entry.file_name();

            if filename.to_string_lossy().starts_with(TMP_PREFIX) {
                std::fs::remove_file(entry.path())?;
                cleaned += 1;
            }
        }

        if cleaned > 0 {
            internal!(
                level = INFO,
                "Cleaned up {cleaned} incomplete writes from {}",
                dir.display()
            );
        }

        Ok(())
    }

    /// Write a record to a temporary file and atomically rename it into
    /// place.
    async fn write_record<T: Serialize>(&self, dir: &str, name: &str, record: &T) -> Result<()> {
        let final_path = self.path.join(dir).join(name);
        let temp_path = self.path.join(dir).join(format!("{TMP_PREFIX}{name}"));

        let content = serde_json::to_vec_pretty(record)?;
        fs::write(&temp_path, &content).await?;
        fs::rename(&temp_path, &final_path).await?;

        Ok(())
    }

    /// Read a record back, `None` if the file does not exist.
    async fn read_record<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        match fs::read(path).await {
            Ok(content) => Ok(Some(serde_json::from_slice(&content)?)),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    /// Read every record in a subdirectory, skipping temporary files,
    /// foreign filenames and records that no longer parse.
    async fn read_all<I, T>(&self, dir: &str) -> Result<Vec<T>>
    where
        I: FromStr,
        T: DeserializeOwned,
    {
        let mut entries = fs::read_dir(self.path.join(dir)).await?;
        let mut records = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let filename = entry.file_name();
            let filename = filename.to_string_lossy();

            if id_from_filename::<I>(&filename).is_none() {
                continue;
            }

            match self.read_record(&entry.path()).await {
                Ok(Some(record)) => records.push(record),
                // Deleted or renamed between listing and reading
                Ok(None) => {}
                Err(StoreError::Serialization(error)) => {
                    warn!("Skipping corrupt record {dir}/{filename}: {error}");
                }
                Err(error) => return Err(error),
            }
        }

        Ok(records)
    }

    fn job_filename(id: JobId) -> String {
        format!("{id}.json")
    }

    fn delivery_filename(id: DeliveryId) -> String {
        format!("{id}.json")
    }

    fn job_path(&self, id: JobId) -> PathBuf {
        self.path.join(JOBS_DIR).join(Self::job_filename(id))
    }

    fn delivery_path(&self, id: DeliveryId) -> PathBuf {
        self.path
            .join(DELIVERIES_DIR)
            .join(Self::delivery_filename(id))
    }
}

/// Parse `{id}.json` back into an identifier, rejecting temporary files and
/// anything else that does not match the pattern.
fn id_from_filename<I: FromStr>(filename: &str) -> Option<I> {
    if filename.starts_with(TMP_PREFIX) {
        return None;
    }

    filename
        .strip_suffix(".json")
        .and_then(|stem| I::from_str(stem).ok())
}

#[async_trait]
impl JobStore for FileStore {
    async fn insert_job(&self, job: &EmailJob) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        self.write_record(JOBS_DIR, &Self::job_filename(job.id), job)
            .await
    }

    async fn job(&self, id: JobId) -> Result<Option<EmailJob>> {
        self.read_record(&self.job_path(id)).await
    }

    async fn due_jobs(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<EmailJob>> {
        let mut due: Vec<EmailJob> = self
            .read_all::<JobId, EmailJob>(JOBS_DIR)
            .await?
            .into_iter()
            .filter(|job| job.is_due(now))
            .collect();

        due.sort_by_key(|job| job.created_at);
        due.truncate(limit);

        Ok(due)
    }

    async fn claim_job(&self, id: JobId, now: DateTime<Utc>) -> Result<Option<EmailJob>> {
        let _guard = self.write_lock.lock().await;

        let Some(mut job) = self.read_record::<EmailJob>(&self.job_path(id)).await? else {
            return Ok(None);
        };

        if !job.is_due(now) {
            return Ok(None);
        }

        job.mark_processing(now);
        self.write_record(JOBS_DIR, &Self::job_filename(id), &job)
            .await?;

        Ok(Some(job))
    }

    async fn update_job(&self, job: &EmailJob) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        if !fs::try_exists(self.job_path(job.id)).await? {
            return Err(StoreError::JobNotFound(job.id));
        }

        self.write_record(JOBS_DIR, &Self::job_filename(job.id), job)
            .await
    }

    async fn reclaim_stale_jobs(&self, cutoff: DateTime<Utc>) -> Result<Vec<JobId>> {
        let _guard = self.write_lock.lock().await;
        let mut reclaimed = Vec::new();

        for mut job in self.read_all::<JobId, EmailJob>(JOBS_DIR).await? {
            if job.status == JobStatus::Processing
                && job.processing_started_at.is_some_and(|at| at < cutoff)
            {
                job.release();
                self.write_record(JOBS_DIR, &Self::job_filename(job.id), &job)
                    .await?;
                reclaimed.push(job.id);
            }
        }

        Ok(reclaimed)
    }

    async fn append_log(&self, log: &EmailLog) -> Result<()> {
        self.write_record(LOGS_DIR, &format!("{}.json", log.id), log)
            .await
    }

    async fn logs_for_job(&self, id: JobId) -> Result<Vec<EmailLog>> {
        let mut logs: Vec<EmailLog> = self
            .read_all::<LogId, EmailLog>(LOGS_DIR)
            .await?
            .into_iter()
            .filter(|log| log.job_id == id)
            .collect();

        logs.sort_by_key(|log| log.created_at);

        Ok(logs)
    }
}

#[async_trait]
impl WebhookStore for FileStore {
    async fn insert_delivery(&self, delivery: &WebhookDelivery) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        self.write_record(
            DELIVERIES_DIR,
            &Self::delivery_filename(delivery.id),
            delivery,
        )
        .await
    }

    async fn delivery(&self, id: DeliveryId) -> Result<Option<WebhookDelivery>> {
        self.read_record(&self.delivery_path(id)).await
    }

    async fn due_deliveries(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WebhookDelivery>> {
        let mut due: Vec<WebhookDelivery> = self
            .read_all::<DeliveryId, WebhookDelivery>(DELIVERIES_DIR)
            .await?
            .into_iter()
            .filter(|delivery| delivery.is_due(now))
            .collect();

        due.sort_by_key(|delivery| delivery.created_at);
        due.truncate(limit);

        Ok(due)
    }

    async fn claim_delivery(
        &self,
        id: DeliveryId,
        now: DateTime<Utc>,
    ) -> Result<Option<WebhookDelivery>> {
        let _guard = self.write_lock.lock().await;

        let Some(mut delivery) = self
            .read_record::<WebhookDelivery>(&self.delivery_path(id))
            .await?
        else {
            return Ok(None);
        };

        if !delivery.is_due(now) {
            return Ok(None);
        }

        delivery.mark_delivering(now);
        self.write_record(DELIVERIES_DIR, &Self::delivery_filename(id), &delivery)
            .await?;

        Ok(Some(delivery))
    }

    async fn update_delivery(&self, delivery: &WebhookDelivery) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        if !fs::try_exists(self.delivery_path(delivery.id)).await? {
            return Err(StoreError::DeliveryNotFound(delivery.id));
        }

        self.write_record(
            DELIVERIES_DIR,
            &Self::delivery_filename(delivery.id),
            delivery,
        )
        .await
    }

    async fn reclaim_stale_deliveries(&self, cutoff: DateTime<Utc>) -> Result<Vec<DeliveryId>> {
        let _guard = self.write_lock.lock().await;
        let mut reclaimed = Vec::new();

        for mut delivery in self
            .read_all::<DeliveryId, WebhookDelivery>(DELIVERIES_DIR)
            .await?
        {
            if delivery.status == DeliveryStatus::Delivering
                && delivery.claimed_at.is_some_and(|at| at < cutoff)
            {
                delivery.release();
                self.write_record(
                    DELIVERIES_DIR,
                    &Self::delivery_filename(delivery.id),
                    &delivery,
                )
                .await?;
                reclaimed.push(delivery.id);
            }
        }

        Ok(reclaimed)
    }

    async fn delivery_for_event(
        &self,
        job_id: JobId,
        event: WebhookEvent,
    ) -> Result<Option<DeliveryId>> {
        Ok(self
            .read_all::<DeliveryId, WebhookDelivery>(DELIVERIES_DIR)
            .await?
            .into_iter()
            .find(|delivery| delivery.job_id == job_id && delivery.event == event)
            .map(|delivery| delivery.id))
    }
}
