//! Job and report persistence
//!
//! Jobs are the live state of one (validation set, document URL) pair and are
//! upserted in place. Reports and their items are append-only history.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};

pub type JobId = u64;
pub type ReportId = u64;

/// Identity of a validation job
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub validation_set: String,
    pub url: String,
}

impl JobKey {
    pub fn new(validation_set: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            validation_set: validation_set.into(),
            url: url.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationJob {
    pub id: JobId,
    pub validation_set: String,
    /// Display name; the document URL
    pub name: String,
    pub url: String,
    pub ruleset: String,
    pub last_result: bool,
    pub updated_at: DateTime<Utc>,
}

impl ValidationJob {
    pub fn key(&self) -> JobKey {
        JobKey::new(self.validation_set.clone(), self.url.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub id: ReportId,
    pub job: JobId,
    pub run_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReportItem {
    pub id: u64,
    pub report: ReportId,
    pub text: String,
}

/// Everything a store holds, in insertion order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub jobs: Vec<ValidationJob>,
    pub reports: Vec<ValidationReport>,
    pub items: Vec<ValidationReportItem>,
}

impl StoreSnapshot {
    pub fn job(&self, key: &JobKey) -> Option<&ValidationJob> {
        self.jobs
            .iter()
            .find(|j| j.validation_set == key.validation_set && j.url == key.url)
    }

    pub fn reports_for(&self, job: JobId) -> impl Iterator<Item = &ValidationReport> {
        self.reports.iter().filter(move |r| r.job == job)
    }

    pub fn items_for(&self, report: ReportId) -> impl Iterator<Item = &ValidationReportItem> {
        self.items.iter().filter(move |i| i.report == report)
    }

    /// Most recent report of a job
    pub fn latest_report(&self, job: JobId) -> Option<&ValidationReport> {
        self.reports_for(job).max_by_key(|r| (r.created_at, r.id))
    }
}

/// Sink for validation jobs and report history
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Insert or update the job for `key`, returning its id. Atomic per key.
    async fn upsert_job(&self, key: &JobKey, ruleset: &str, last_result: bool)
    -> StoreResult<JobId>;

    async fn create_report(
        &self,
        job: JobId,
        run_id: Uuid,
        created_at: DateTime<Utc>,
    ) -> StoreResult<ReportId>;

    async fn append_report_item(&self, report: ReportId, text: &str) -> StoreResult<()>;

    /// Make everything written so far durable
    async fn flush(&self) -> StoreResult<()>;

    async fn snapshot(&self) -> StoreResult<StoreSnapshot>;
}

#[derive(Debug, Default)]
struct Tables {
    snapshot: StoreSnapshot,
    job_index: HashMap<JobKey, usize>,
    report_index: HashMap<ReportId, usize>,
    next_job_id: JobId,
    next_report_id: ReportId,
    next_item_id: u64,
}

impl Tables {
    fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let job_index = snapshot
            .jobs
            .iter()
            .enumerate()
            .map(|(i, j)| (j.key(), i))
            .collect();
        let report_index = snapshot
            .reports
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id, i))
            .collect();
        let next_job_id = snapshot.jobs.iter().map(|j| j.id).max().unwrap_or(0) + 1;
        let next_report_id = snapshot.reports.iter().map(|r| r.id).max().unwrap_or(0) + 1;
        let next_item_id = snapshot.items.iter().map(|i| i.id).max().unwrap_or(0) + 1;

        Tables {
            snapshot,
            job_index,
            report_index,
            next_job_id,
            next_report_id,
            next_item_id,
        }
    }
}

/// In-memory store; ids increase monotonically from 1.
#[derive(Debug)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::from_snapshot(StoreSnapshot::default())
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            tables: Mutex::new(Tables::from_snapshot(snapshot)),
        }
    }
}

#[async_trait]
impl ReportStore for MemoryStore {
    async fn upsert_job(
        &self,
        key: &JobKey,
        ruleset: &str,
        last_result: bool,
    ) -> StoreResult<JobId> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();

        if let Some(&index) = tables.job_index.get(key) {
            let job = &mut tables.snapshot.jobs[index];
            job.ruleset = ruleset.to_string();
            job.last_result = last_result;
            job.updated_at = now;
            return Ok(job.id);
        }

        let id = tables.next_job_id;
        tables.next_job_id += 1;
        let index = tables.snapshot.jobs.len();
        tables.snapshot.jobs.push(ValidationJob {
            id,
            validation_set: key.validation_set.clone(),
            name: key.url.clone(),
            url: key.url.clone(),
            ruleset: ruleset.to_string(),
            last_result,
            updated_at: now,
        });
        tables.job_index.insert(key.clone(), index);
        Ok(id)
    }

    async fn create_report(
        &self,
        job: JobId,
        run_id: Uuid,
        created_at: DateTime<Utc>,
    ) -> StoreResult<ReportId> {
        let mut tables = self.tables.lock().await;
        if !tables.snapshot.jobs.iter().any(|j| j.id == job) {
            return Err(StoreError::UnknownJob(job));
        }

        let id = tables.next_report_id;
        tables.next_report_id += 1;
        let index = tables.snapshot.reports.len();
        tables.snapshot.reports.push(ValidationReport {
            id,
            job,
            run_id,
            created_at,
        });
        tables.report_index.insert(id, index);
        Ok(id)
    }

    async fn append_report_item(&self, report: ReportId, text: &str) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if !tables.report_index.contains_key(&report) {
            return Err(StoreError::UnknownReport(report));
        }

        let id = tables.next_item_id;
        tables.next_item_id += 1;
        tables.snapshot.items.push(ValidationReportItem {
            id,
            report,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn flush(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn snapshot(&self) -> StoreResult<StoreSnapshot> {
        Ok(self.tables.lock().await.snapshot.clone())
    }
}

/// JSON file store: a [`MemoryStore`] loaded on open and written back on
/// `flush` through a temporary file and rename.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    memory: MemoryStore,
}

impl FileStore {
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let snapshot = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => StoreSnapshot::default(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreSnapshot::default(),
            Err(e) => return Err(file_error(&path, e)),
        };
        debug!(
            path = %path.display(),
            jobs = snapshot.jobs.len(),
            reports = snapshot.reports.len(),
            "Opened report store"
        );

        Ok(Self {
            path,
            memory: MemoryStore::from_snapshot(snapshot),
        })
    }
}

fn file_error(path: &Path, e: std::io::Error) -> StoreError {
    StoreError::File {
        path: path.display().to_string(),
        details: e.to_string(),
    }
}

#[async_trait]
impl ReportStore for FileStore {
    async fn upsert_job(
        &self,
        key: &JobKey,
        ruleset: &str,
        last_result: bool,
    ) -> StoreResult<JobId> {
        self.memory.upsert_job(key, ruleset, last_result).await
    }

    async fn create_report(
        &self,
        job: JobId,
        run_id: Uuid,
        created_at: DateTime<Utc>,
    ) -> StoreResult<ReportId> {
        self.memory.create_report(job, run_id, created_at).await
    }

    async fn append_report_item(&self, report: ReportId, text: &str) -> StoreResult<()> {
        self.memory.append_report_item(report, text).await
    }

    async fn flush(&self) -> StoreResult<()> {
        // Hold the lock across the write so concurrent flushes do not interleave.
        let tables = self.memory.tables.lock().await;
        let bytes = serde_json::to_vec_pretty(&tables.snapshot)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| file_error(parent, e))?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| file_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| file_error(&self.path, e))?;

        debug!(path = %self.path.display(), bytes = bytes.len(), "Flushed report store");
        Ok(())
    }

    async fn snapshot(&self) -> StoreResult<StoreSnapshot> {
        self.memory.snapshot().await
    }
}
