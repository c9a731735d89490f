use anyhow::{Context, Result};
use harvest_config::{HarvestConfig, PacingSection, RowShortfall};
use harvest_drivers::harvest_browser::pacing::{TimingConfig, TimingEngine};
use harvest_drivers::harvest_browser::readiness::{ReadinessConfig, RowShortfallPolicy};
use harvest_export::{CsvExporter, SchemaMigrator};
use harvest_jobs::{CleanupReport, JobStore, JobStoreConfig, SkippedRecord};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub fn timing_config(pacing: &PacingSection) -> TimingConfig {
    TimingConfig {
        scale: pacing.scale,
        mode: pacing.mode,
    }
}

pub fn readiness_config(pacing: &PacingSection) -> ReadinessConfig {
    let shortfall = match pacing.row_shortfall {
        RowShortfall::Proceed => RowShortfallPolicy::Proceed,
        RowShortfall::Abort => RowShortfallPolicy::Abort,
    };
    ReadinessConfig::for_mode(pacing.mode, pacing.min_rows)
        .with_timeout(Duration::from_millis(pacing.readiness_timeout_ms))
        .with_shortfall(shortfall)
}

/// Components built from one configuration, shared by every command.
pub struct Harvest {
    pub config: HarvestConfig,
    pub timing: Arc<TimingEngine>,
    pub readiness: ReadinessConfig,
    pub jobs: Arc<JobStore>,
    /// Relative destinations land in `export.output_dir`.
    pub exporter: CsvExporter,
    pub migrator: SchemaMigrator,
}

/// What the initialization phase did.
#[derive(Debug)]
pub struct StartupReport {
    pub jobs_dir: PathBuf,
    pub export_dir: PathBuf,
    pub loaded: usize,
    pub skipped: Vec<SkippedRecord>,
    pub cleanup: CleanupReport,
}

impl Harvest {
    /// Wire components; touches nothing on disk.
    pub fn from_config(config: HarvestConfig) -> Self {
        let timing = Arc::new(TimingEngine::new(timing_config(&config.pacing)));
        let readiness = readiness_config(&config.pacing);
        let jobs = Arc::new(JobStore::new(JobStoreConfig {
            dir: config.jobs.dir.clone(),
        }));
        let exporter = CsvExporter::with_output_dir(config.export.output_dir.clone());
        Self {
            config,
            timing,
            readiness,
            jobs,
            exporter,
            migrator: SchemaMigrator::new(),
        }
    }

    /// Create directories, load persisted jobs, then prune by retention.
    /// Only a failed load is fatal; individual corrupt records and
    /// undeletable files end up in the report.
    pub async fn start(&self) -> Result<StartupReport> {
        let export_dir = self.config.export.output_dir.clone();
        tokio::fs::create_dir_all(&export_dir)
            .await
            .with_context(|| format!("failed to create export directory {}", export_dir.display()))?;

        let load = self
            .jobs
            .load()
            .await
            .context("failed to load persisted jobs")?;
        for skipped in &load.skipped {
            warn!(path = %skipped.path.display(), reason = %skipped.reason, "startup.skipped_record");
        }

        let cleanup = self.jobs.cleanup(self.config.jobs.retention_days).await;

        info!(
            jobs_dir = %self.jobs.dir().display(),
            loaded = load.loaded,
            skipped = load.skipped.len(),
            pruned = cleanup.removed.len(),
            "startup.complete"
        );
        Ok(StartupReport {
            jobs_dir: self.jobs.dir().to_path_buf(),
            export_dir,
            loaded: load.loaded,
            skipped: load.skipped,
            cleanup,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_common::PacingMode;
    use harvest_config::HarvestConfigLoader;
    use harvest_export::{ProfileRecord, WriteMode};
    use harvest_jobs::JobStatus;
    use serde_json::json;
    use tempfile::TempDir;

    fn config_in(tmp: &TempDir, extra: &str) -> HarvestConfig {
        let yaml = format!(
            "jobs:\n  dir: {}\nexport:\n  output_dir: {}\n{extra}",
            tmp.path().join("jobs").display(),
            tmp.path().join("exports").display(),
        );
        HarvestConfigLoader::new().with_yaml_str(&yaml).load().unwrap()
    }

    #[test]
    fn pacing_section_maps_onto_components() {
        let pacing = PacingSection {
            mode: PacingMode::Fast,
            scale: 0.5,
            min_rows: Some(25),
            row_shortfall: RowShortfall::Abort,
            readiness_timeout_ms: 4_000,
        };
        let timing = timing_config(&pacing);
        assert_eq!(timing.mode, PacingMode::Fast);
        assert_eq!(timing.scale, 0.5);

        let readiness = readiness_config(&pacing);
        assert_eq!(readiness.min_count, 25);
        assert_eq!(readiness.timeout, Duration::from_secs(4));
        assert_eq!(readiness.shortfall, RowShortfallPolicy::Abort);
        assert_eq!(readiness.settle_max_ms, 400.0);
    }

    #[tokio::test]
    async fn start_creates_dirs_and_reports_counts() {
        let tmp = TempDir::new().unwrap();
        let harvest = Harvest::from_config(config_in(&tmp, ""));
        let report = harvest.start().await.unwrap();

        assert!(report.jobs_dir.is_dir());
        assert!(report.export_dir.is_dir());
        assert_eq!(report.loaded, 0);
        assert!(report.cleanup.removed.is_empty());
    }

    #[tokio::test]
    async fn restart_sees_jobs_from_the_previous_run() {
        let tmp = TempDir::new().unwrap();
        let first = Harvest::from_config(config_in(&tmp, ""));
        first.start().await.unwrap();
        let job = first.jobs.create(json!({ "query": "cto" })).await.unwrap();
        first.jobs.transition(job.id, JobStatus::Running).await.unwrap();

        let second = Harvest::from_config(config_in(&tmp, ""));
        let report = second.start().await.unwrap();
        assert_eq!(report.loaded, 1);
        assert_eq!(
            second.jobs.get(job.id).await.unwrap().status,
            JobStatus::Running
        );
    }

    #[tokio::test]
    async fn relative_exports_land_in_the_output_dir() {
        let tmp = TempDir::new().unwrap();
        let harvest = Harvest::from_config(config_in(&tmp, ""));
        let report = harvest.start().await.unwrap();

        let row = ProfileRecord {
            name: Some("Ada".into()),
            ..ProfileRecord::default()
        };
        let written = harvest
            .exporter
            .save(&[row], "leads.csv", WriteMode::Append)
            .await
            .unwrap();
        let export_dir = std::fs::canonicalize(&report.export_dir).unwrap();
        assert_eq!(written, export_dir.join("leads.csv"));
    }

    #[tokio::test]
    async fn corrupt_records_do_not_fail_startup() {
        let tmp = TempDir::new().unwrap();
        let jobs_dir = tmp.path().join("jobs");
        std::fs::create_dir_all(&jobs_dir).unwrap();
        std::fs::write(jobs_dir.join("broken.json"), b"{").unwrap();

        let harvest = Harvest::from_config(config_in(&tmp, ""));
        let report = harvest.start().await.unwrap();
        assert_eq!(report.loaded, 0);
        assert_eq!(report.skipped.len(), 1);
    }
}
