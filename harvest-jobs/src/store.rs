//! File-backed job store.
//!
//! One JSON file per job, named `<id>.json`, written whole through a temporary
//! sibling and a rename. Each job sits behind its own async mutex so
//! mutations of one id are serialized while different ids proceed
//! independently. The in-memory copy is only replaced after the file write
//! succeeded.
use crate::{Job, JobError, JobStatus};
use chrono::{TimeDelta, Utc};
use dashmap::DashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct JobStoreConfig {
    pub dir: PathBuf,
}

/// Result of scanning the jobs directory.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: usize,
    pub skipped: Vec<SkippedRecord>,
}

/// A persisted record that could not be loaded.
#[derive(Debug, Clone)]
pub struct SkippedRecord {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct CleanupReport {
    pub removed: Vec<Uuid>,
    pub failed: Vec<(Uuid, String)>,
}

type Slot = Arc<Mutex<Job>>;

pub struct JobStore {
    dir: PathBuf,
    jobs: DashMap<Uuid, Slot>,
}

impl JobStore {
    pub fn new(config: JobStoreConfig) -> Self {
        Self {
            dir: config.dir,
            jobs: DashMap::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn slot(&self, id: Uuid) -> Result<Slot, JobError> {
        // Clone the Arc out so no map shard lock is held across an await.
        self.jobs
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(JobError::NotFound(id))
    }

    async fn ensure_dir(&self) -> Result<(), JobError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| JobError::Directory {
                path: self.dir.clone(),
                source,
            })
    }

    async fn persist(&self, job: &Job) -> Result<(), JobError> {
        let bytes = serde_json::to_vec_pretty(job).map_err(|source| JobError::Encode {
            id: job.id,
            source,
        })?;
        let path = self.record_path(job.id);
        let tmp = self.dir.join(format!("{}.json.tmp", job.id));

        let written = match fs::write(&tmp, &bytes).await {
            Ok(()) => fs::rename(&tmp, &path).await,
            Err(err) => Err(err),
        };
        if let Err(source) = written {
            let _ = fs::remove_file(&tmp).await;
            return Err(JobError::Persist {
                id: job.id,
                path,
                source,
            });
        }
        Ok(())
    }

    /// Scan the jobs directory into memory. Unreadable or invalid records are
    /// logged and reported, never fatal; only an unusable directory fails.
    pub async fn load(&self) -> Result<LoadReport, JobError> {
        self.ensure_dir().await?;
        let dir_err = |source| JobError::Directory {
            path: self.dir.clone(),
            source,
        };

        let mut report = LoadReport::default();
        let mut entries = fs::read_dir(&self.dir).await.map_err(dir_err)?;
        while let Some(entry) = entries.next_entry().await.map_err(dir_err)? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_record(&path).await {
                Ok(job) => {
                    self.jobs
                        .entry(job.id)
                        .or_insert_with(|| Arc::new(Mutex::new(job)));
                    report.loaded += 1;
                }
                Err(reason) => {
                    warn!(path = %path.display(), %reason, "jobs.load.corrupt_record");
                    report.skipped.push(SkippedRecord { path, reason });
                }
            }
        }

        info!(
            dir = %self.dir.display(),
            loaded = report.loaded,
            skipped = report.skipped.len(),
            "jobs.load"
        );
        Ok(report)
    }

    /// Create a queued job; it is on disk before this returns.
    pub async fn create(&self, params: serde_json::Value) -> Result<Job, JobError> {
        self.ensure_dir().await?;
        let job = Job::new(params);
        self.persist(&job).await?;
        self.jobs
            .insert(job.id, Arc::new(Mutex::new(job.clone())));
        info!(job_id = %job.id, "jobs.create");
        Ok(job)
    }

    pub async fn transition(&self, id: Uuid, to: JobStatus) -> Result<Job, JobError> {
        self.apply(id, to, |_| {}).await
    }

    /// `running -> completed`, recording where the output was written.
    pub async fn complete(&self, id: Uuid, result_path: PathBuf) -> Result<Job, JobError> {
        self.apply(id, JobStatus::Completed, move |job| {
            job.result_path = Some(result_path);
        })
        .await
    }

    /// `running -> failed`, recording a diagnostic message.
    pub async fn fail(&self, id: Uuid, error: impl Into<String>) -> Result<Job, JobError> {
        let error = error.into();
        self.apply(id, JobStatus::Failed, move |job| {
            job.error = Some(error);
        })
        .await
    }

    async fn apply(
        &self,
        id: Uuid,
        to: JobStatus,
        annotate: impl FnOnce(&mut Job),
    ) -> Result<Job, JobError> {
        let slot = self.slot(id)?;
        let mut current = slot.lock().await;
        let from = current.status;
        if !from.can_transition_to(to) {
            warn!(job_id = %id, %from, %to, "jobs.transition.rejected");
            return Err(JobError::InvalidTransition { id, from, to });
        }

        let mut next = current.clone();
        next.status = to;
        next.updated_at = Utc::now();
        annotate(&mut next);

        self.persist(&next).await?;
        *current = next.clone();
        info!(job_id = %id, %from, %to, "jobs.transition");
        Ok(next)
    }

    pub async fn get(&self, id: Uuid) -> Option<Job> {
        let slot = self.slot(id).ok()?;
        let job = slot.lock().await.clone();
        Some(job)
    }

    /// Snapshot of all jobs, oldest first.
    pub async fn list(&self) -> Vec<Job> {
        let slots: Vec<Slot> = self.jobs.iter().map(|e| e.value().clone()).collect();
        let mut jobs = Vec::with_capacity(slots.len());
        for slot in slots {
            jobs.push(slot.lock().await.clone());
        }
        jobs.sort_by_key(|job| (job.created_at, job.id));
        jobs
    }

    /// Drivers poll this between actions; cancellation never interrupts a wait.
    pub async fn is_cancelled(&self, id: Uuid) -> bool {
        matches!(self.get(id).await, Some(job) if job.status == JobStatus::Cancelled)
    }

    /// Delete terminal jobs whose last update is older than `max_age_days`.
    /// Queued and running jobs are kept regardless of age.
    pub async fn cleanup(&self, max_age_days: u64) -> CleanupReport {
        let days = i64::try_from(max_age_days).unwrap_or(i64::MAX);
        let max_age = TimeDelta::try_days(days).unwrap_or(TimeDelta::MAX);
        let now = Utc::now();

        let slots: Vec<(Uuid, Slot)> = self
            .jobs
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();

        let mut report = CleanupReport::default();
        for (id, slot) in slots {
            let job = slot.lock().await;
            if !job.status.is_terminal() || now.signed_duration_since(job.updated_at) <= max_age {
                continue;
            }
            match fs::remove_file(self.record_path(id)).await {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    debug!(job_id = %id, "jobs.cleanup.already_gone");
                }
                Err(err) => {
                    warn!(job_id = %id, error = %err, "jobs.cleanup.delete_failed");
                    report.failed.push((id, err.to_string()));
                    continue;
                }
            }
            self.jobs.remove(&id);
            report.removed.push(id);
        }

        info!(
            max_age_days,
            removed = report.removed.len(),
            failed = report.failed.len(),
            "jobs.cleanup"
        );
        report
    }
}

async fn read_record(path: &Path) -> Result<Job, String> {
    let raw = fs::read_to_string(path)
        .await
        .map_err(|e| format!("unreadable: {e}"))?;
    let job: Job = serde_json::from_str(&raw).map_err(|e| format!("invalid record: {e}"))?;
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    if stem != job.id.to_string() {
        return Err(format!("file name does not match job id {}", job.id));
    }
    Ok(job)
}
