//! Orchestrator: selects jobs, runs them with bounded parallelism, and
//! records the run manifest.

use std::sync::Arc;

use backup_connectors::ConnectorRegistry;
use backup_manifest::{write_manifest, ManifestRecord, RunRecorder};
use backup_retention::{prune, RetentionDecision};
use backup_storage::{StoragePort, StorageRegistry};
use backup_types::{Clock, ErrorKind, JobRun, JobSpec, Settings, SystemClock};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use ulid::Ulid;

use crate::engine::{JobEngine, RunInfo};
use crate::error::EngineError;

/// Process exit status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Every selected job succeeded
    Success,
    /// At least one job failed, or the manifest could not be written
    JobFailures,
    /// Nothing ran
    ConfigurationError,
}

impl ExitStatus {
    pub fn code(self) -> u8 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::JobFailures => 1,
            ExitStatus::ConfigurationError => 2,
        }
    }
}

/// Result of [`Orchestrator::run`].
#[derive(Debug, Clone)]
pub struct RunReport {
    pub exit: ExitStatus,
    /// Absent when configuration errors prevented the run
    pub manifest: Option<ManifestRecord>,
}

/// Runs configured jobs.
pub struct Orchestrator {
    settings: Settings,
    jobs: Vec<Arc<JobSpec>>,
    connectors: ConnectorRegistry,
    storage: StorageRegistry,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Validate settings and wire registries.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Configuration` for invalid settings or a job
    /// whose connector type or storage target is not registered.
    pub fn new(
        settings: Settings,
        connectors: ConnectorRegistry,
        storage: StorageRegistry,
    ) -> Result<Self, EngineError> {
        settings.validate()?;

        for job in &settings.jobs {
            if !connectors.contains(&job.connector) {
                return Err(EngineError::Configuration(format!(
                    "job '{}' uses unknown connector type '{}' (known: {})",
                    job.name,
                    job.connector,
                    connectors.types().join(", ")
                )));
            }
            if !storage.contains(&job.storage) {
                return Err(EngineError::Configuration(format!(
                    "job '{}' references unknown storage '{}'",
                    job.name, job.storage
                )));
            }
        }

        let jobs = settings.jobs.iter().cloned().map(Arc::new).collect();
        Ok(Self {
            settings,
            jobs,
            connectors,
            storage,
            clock: Arc::new(SystemClock),
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Token that stops queued jobs and pending retries when cancelled.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Configured job names in declaration order.
    pub fn job_names(&self) -> Vec<&str> {
        self.jobs.iter().map(|j| j.name.as_str()).collect()
    }

    /// Jobs matching `filter`, in declaration order.
    ///
    /// An empty filter selects every job.
    pub fn select_jobs(&self, filter: &[String]) -> Result<Vec<Arc<JobSpec>>, EngineError> {
        if filter.is_empty() {
            return Ok(self.jobs.clone());
        }

        let unknown: Vec<&str> = filter
            .iter()
            .filter(|name| !self.jobs.iter().any(|j| &j.name == *name))
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            return Err(EngineError::Configuration(format!(
                "unknown job(s): {}",
                unknown.join(", ")
            )));
        }

        Ok(self
            .jobs
            .iter()
            .filter(|j| filter.contains(&j.name))
            .cloned()
            .collect())
    }

    /// Retention decisions for the selected jobs without deleting anything.
    pub async fn plan_retention(
        &self,
        filter: &[String],
    ) -> Result<Vec<RetentionDecision>, EngineError> {
        let now = self.clock.now();
        let mut decisions = Vec::new();
        for spec in self.select_jobs(filter)? {
            let storage = self.storage.get(&spec.storage)?;
            let listing = storage.list(&spec.name).await?;
            let policy = spec.effective_retention(&self.settings.default_retention);
            decisions.push(prune(&spec.name, &listing, &policy, now, None));
        }
        Ok(decisions)
    }

    /// Run the selected jobs and write the manifest.
    pub async fn run(&self, filter: &[String]) -> RunReport {
        let selected = match self.select_jobs(filter) {
            Ok(selected) => selected,
            Err(e) => {
                error!(error = %e, "Job selection failed");
                return RunReport {
                    exit: ExitStatus::ConfigurationError,
                    manifest: None,
                };
            }
        };

        let run = RunInfo::new(Ulid::new(), self.clock.now());
        let parallelism = self.settings.parallelism.max(1);
        info!(
            run_id = %run.run_id,
            jobs = selected.len(),
            parallelism,
            run_date = %run.run_date,
            "Starting backup run"
        );

        let mut recorder = RunRecorder::new(run.run_id, run.started_at);
        let engine = JobEngine::new(
            self.settings.retry.clone(),
            Arc::clone(&self.clock),
            self.cancel.clone(),
        );
        let semaphore = Arc::new(Semaphore::new(parallelism));
        let mut join_set: JoinSet<JobRun> = JoinSet::new();
        let mut targets: Vec<(String, Arc<dyn StoragePort>)> = Vec::new();

        for spec in &selected {
            let index = recorder.dispatch(spec.name.clone());

            let storage = match self.storage.get(&spec.storage) {
                Ok(storage) => storage,
                Err(e) => {
                    let job_run = self.not_started(
                        &spec.name,
                        ErrorKind::Configuration,
                        e.to_string(),
                    );
                    self.record(&mut recorder, job_run);
                    continue;
                }
            };

            let connector = match self.connectors.create(spec) {
                Ok(connector) => connector,
                Err(e) => {
                    let job_run = self.not_started(
                        &spec.name,
                        ErrorKind::Configuration,
                        e.to_string(),
                    );
                    self.record(&mut recorder, job_run);
                    continue;
                }
            };

            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                permit = Arc::clone(&semaphore).acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                info!(job = %spec.name, "Shutdown requested, job not started");
                let job_run = self.not_started(
                    &spec.name,
                    ErrorKind::Cancelled,
                    "cancelled before start",
                );
                self.record(&mut recorder, job_run);
                continue;
            };

            targets.push((spec.name.clone(), Arc::clone(&storage)));

            let engine = engine.clone();
            let spec = Arc::clone(spec);
            let default_retention = self.settings.default_retention;
            info!(job = %spec.name, index, "Dispatching job");
            join_set.spawn(async move {
                let _permit = permit;
                engine
                    .run_job(spec, connector, storage, &default_retention, &run)
                    .await
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(job_run) => self.record(&mut recorder, job_run),
                Err(join_err) => error!(error = %join_err, "Job task failed"),
            }
        }

        // A task that died without reporting still needs an entry.
        let lost: Vec<String> = recorder.pending().into_iter().map(String::from).collect();
        for name in lost {
            let job_run = self.not_started(
                &name,
                ErrorKind::ConnectorFatal,
                "job task terminated unexpectedly",
            );
            self.record(&mut recorder, job_run);
        }

        let manifest = match recorder.finalize(self.clock.now()) {
            Ok(manifest) => manifest,
            Err(e) => {
                error!(error = %e, "Failed to finalize run manifest");
                return RunReport {
                    exit: ExitStatus::JobFailures,
                    manifest: None,
                };
            }
        };

        let mut manifest_ok = true;
        for (job, storage) in &targets {
            let conflicted = manifest
                .job(job)
                .and_then(|entry| entry.error.as_ref())
                .is_some_and(|e| e.kind == ErrorKind::Conflict);
            // The namespace belongs to whichever run holds its lock
            if conflicted {
                continue;
            }
            if let Err(e) = write_manifest(&manifest, storage.as_ref(), job, run.run_date).await {
                error!(job = %job, error = %e, "Failed to write run manifest");
                manifest_ok = false;
            }
        }

        let exit = if manifest.is_success() && manifest_ok {
            ExitStatus::Success
        } else {
            ExitStatus::JobFailures
        };
        info!(
            run_id = %manifest.run_id,
            succeeded = manifest.totals.succeeded,
            failed = manifest.totals.failed,
            bytes = manifest.totals.bytes,
            duration_ms = manifest.duration_ms,
            exit_code = exit.code(),
            "Backup run finished"
        );

        RunReport {
            exit,
            manifest: Some(manifest),
        }
    }

    fn not_started(&self, job: &str, kind: ErrorKind, message: impl Into<String>) -> JobRun {
        JobRun::failed_before_start(job, kind, message, self.clock.now())
    }

    fn record(&self, recorder: &mut RunRecorder, job_run: JobRun) {
        if let Err(e) = recorder.record_job(job_run) {
            warn!(error = %e, "Discarding job result");
        }
    }
}
