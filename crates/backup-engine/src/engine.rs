//! Job engine: runs one job through its connector lifecycle.
//!
//! `run_job` never returns an error. Every failure, including connector
//! panics, is classified into a `JobOutcome::Failure` so sibling jobs are
//! unaffected.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use backup_connectors::{ArtifactSink, Connector, ConnectorError, RunContext};
use backup_storage::{StorageError, StoragePort};
use backup_types::{
    ArtifactResult, Clock, ErrorKind, JobOutcome, JobRun, JobSpec, RetentionPolicy, RetryConfig,
};
use chrono::{DateTime, NaiveDate, Utc};
use futures::FutureExt;
use secrecy::SecretString;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use ulid::Ulid;

use crate::retry::RetrySchedule;

/// Identity of the run a job belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunInfo {
    pub run_id: Ulid,
    pub started_at: DateTime<Utc>,
    /// Date of the dated directory every job of the run writes into
    pub run_date: NaiveDate,
}

impl RunInfo {
    pub fn new(run_id: Ulid, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            started_at,
            run_date: started_at.date_naive(),
        }
    }
}

type Failure = (ErrorKind, String);

/// Executes single jobs.
#[derive(Clone)]
pub struct JobEngine {
    retry: RetryConfig,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
}

impl JobEngine {
    pub fn new(retry: RetryConfig, clock: Arc<dyn Clock>, cancel: CancellationToken) -> Self {
        Self {
            retry,
            clock,
            cancel,
        }
    }

    /// Run one job to a terminal [`JobRun`].
    ///
    /// Lifecycle: lock the job namespace, resolve credentials, create a
    /// workspace, `prepare`, `execute` with retry under the job timeout,
    /// `cleanup`, then retention if the job succeeded.
    pub async fn run_job(
        &self,
        spec: Arc<JobSpec>,
        mut connector: Box<dyn Connector>,
        storage: Arc<dyn StoragePort>,
        default_retention: &RetentionPolicy,
        run: &RunInfo,
    ) -> JobRun {
        let job = spec.name.clone();
        let started_at = self.clock.now();

        if self.cancel.is_cancelled() {
            info!(job = %job, "Shutdown requested, job not started");
            return JobRun::failed_before_start(
                job,
                ErrorKind::Cancelled,
                "cancelled before start",
                started_at,
            );
        }

        let _lock = match storage.acquire_lock(&job).await {
            Ok(lock) => lock,
            Err(e) => {
                let kind = match e {
                    StorageError::Locked(_) => ErrorKind::Conflict,
                    _ => ErrorKind::Io,
                };
                warn!(job = %job, error = %e, "Could not lock job namespace");
                return JobRun::failed_before_start(job, kind, e.to_string(), started_at);
            }
        };

        let credentials = match resolve_credentials(&spec) {
            Ok(credentials) => credentials,
            Err(message) => {
                warn!(job = %job, error = %message, "Credential resolution failed");
                return JobRun::failed_before_start(
                    job,
                    ErrorKind::Configuration,
                    message,
                    started_at,
                );
            }
        };

        let workspace = match tempfile::Builder::new()
            .prefix(&format!("backup-{}-", job))
            .tempdir()
        {
            Ok(dir) => dir,
            Err(e) => {
                error!(job = %job, error = %e, "Could not create job workspace");
                return JobRun::failed_before_start(
                    job,
                    ErrorKind::Io,
                    format!("workspace: {}", e),
                    started_at,
                );
            }
        };

        let sink = ArtifactSink::new(Arc::clone(&storage), job.clone(), run.run_date);
        let ctx = RunContext::new(
            Arc::clone(&spec),
            run.run_id,
            run.started_at,
            run.run_date,
            workspace,
            credentials,
            self.cancel.clone(),
            sink.clone(),
        );

        info!(job = %job, connector = %spec.connector, run_id = %run.run_id, "Job started");

        let mut attempts = 0u32;
        let prepared = AssertUnwindSafe(connector.prepare(&ctx))
            .catch_unwind()
            .await;
        let result = match prepared {
            Ok(Ok(())) => self.execute_phase(connector.as_mut(), &ctx, &mut attempts).await,
            Ok(Err(e)) => Err((ErrorKind::Configuration, format!("prepare failed: {}", e))),
            Err(panic) => Err((
                ErrorKind::ConnectorFatal,
                format!("connector panicked in prepare: {}", panic_message(panic.as_ref())),
            )),
        };

        let mut cleanup_warnings = Vec::new();
        let cleaned = AssertUnwindSafe(connector.cleanup(&ctx)).catch_unwind().await;
        match cleaned {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(job = %job, error = %e, "Connector cleanup failed");
                cleanup_warnings.push(format!("cleanup failed: {}", e));
            }
            Err(panic) => {
                warn!(job = %job, "Connector panicked in cleanup");
                cleanup_warnings.push(format!("cleanup panicked: {}", panic_message(panic.as_ref())));
            }
        }
        drop(ctx);

        let (outcome, retention) = match result {
            Ok(mut artifacts) => {
                artifacts.warnings.extend(cleanup_warnings);
                let policy = spec.effective_retention(default_retention);
                let summary = backup_retention::enforce(
                    &job,
                    storage.as_ref(),
                    &policy,
                    self.clock.now(),
                    Some(run.run_date),
                )
                .await;
                (JobOutcome::Success { artifacts }, Some(summary))
            }
            Err((kind, message)) => {
                let written = sink.written();
                let partial = if written.is_empty() && cleanup_warnings.is_empty() {
                    None
                } else {
                    Some(ArtifactResult {
                        artifacts: written,
                        warnings: cleanup_warnings,
                        ..ArtifactResult::default()
                    })
                };
                (
                    JobOutcome::Failure {
                        kind,
                        message,
                        partial,
                    },
                    None,
                )
            }
        };

        let finished_at = self.clock.now();
        match &outcome {
            JobOutcome::Success { artifacts } => info!(
                job = %job,
                attempts,
                artifacts = artifacts.artifacts.len(),
                bytes = artifacts.total_bytes(),
                "Job succeeded"
            ),
            JobOutcome::Failure { kind, message, .. } => error!(
                job = %job,
                attempts,
                kind = %kind,
                error = %message,
                "Job failed"
            ),
        }

        JobRun {
            job_name: job,
            outcome,
            started_at,
            finished_at,
            attempts,
            retention,
        }
    }

    /// `execute` with retry, bounded by the job timeout if one is set.
    async fn execute_phase(
        &self,
        connector: &mut dyn Connector,
        ctx: &RunContext,
        attempts: &mut u32,
    ) -> Result<ArtifactResult, Failure> {
        match ctx.spec.timeout_secs {
            Some(secs) => {
                let limit = Duration::from_secs(secs);
                match tokio::time::timeout(limit, self.execute_with_retry(connector, ctx, attempts))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(job = %ctx.job_name(), timeout_secs = secs, "Job timed out");
                        Err((
                            ErrorKind::Timeout,
                            format!("exceeded timeout of {}s", secs),
                        ))
                    }
                }
            }
            None => self.execute_with_retry(connector, ctx, attempts).await,
        }
    }

    async fn execute_with_retry(
        &self,
        connector: &mut dyn Connector,
        ctx: &RunContext,
        attempts: &mut u32,
    ) -> Result<ArtifactResult, Failure> {
        let mut schedule = RetrySchedule::new(&self.retry);

        loop {
            if ctx.cancel.is_cancelled() {
                return Err((
                    ErrorKind::Cancelled,
                    format!("cancelled after {} attempt(s)", schedule.attempts()),
                ));
            }

            *attempts = schedule.start_attempt();
            debug!(job = %ctx.job_name(), attempt = *attempts, "Executing connector");

            let executed = AssertUnwindSafe(connector.execute(ctx)).catch_unwind().await;
            let error = match executed {
                Ok(Ok(artifacts)) => return Ok(artifacts),
                Ok(Err(e)) => e,
                Err(panic) => {
                    return Err((
                        ErrorKind::ConnectorFatal,
                        format!("connector panicked: {}", panic_message(panic.as_ref())),
                    ))
                }
            };

            if !error.is_retryable() {
                return Err((classify(&error), error.to_string()));
            }

            match schedule.next_delay() {
                Some(delay) => {
                    warn!(
                        job = %ctx.job_name(),
                        attempt = *attempts,
                        error = %error,
                        retry_in_ms = delay.as_millis() as u64,
                        "Connector failed, retrying"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = ctx.cancel.cancelled() => {
                            return Err((
                                ErrorKind::Cancelled,
                                format!("cancelled while waiting to retry: {}", error),
                            ));
                        }
                    }
                }
                None => {
                    return Err((
                        ErrorKind::ConnectorRetryable,
                        format!("{} (gave up after {} attempts)", error, *attempts),
                    ))
                }
            }
        }
    }
}

fn resolve_credentials(spec: &JobSpec) -> Result<Option<SecretString>, String> {
    spec.credentials
        .as_ref()
        .map(|secret| secret.resolve())
        .transpose()
        .map_err(|e| e.to_string())
}

/// Map a non-retryable connector error to its outcome kind.
fn classify(error: &ConnectorError) -> ErrorKind {
    match error {
        ConnectorError::Configuration(_) | ConnectorError::UnknownType(_) => {
            ErrorKind::Configuration
        }
        ConnectorError::Retryable(_) => ErrorKind::ConnectorRetryable,
        ConnectorError::Fatal(_) => ErrorKind::ConnectorFatal,
        ConnectorError::Storage(_) | ConnectorError::Io(_) => ErrorKind::Io,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backup_connectors::{MockConnector, MockStep};
    use backup_storage::FilesystemStorage;
    use backup_types::{FixedClock, SecretRef};
    use chrono::TimeZone;

    struct Fixture {
        dir: tempfile::TempDir,
        storage: Arc<dyn StoragePort>,
        run: RunInfo,
        cancel: CancellationToken,
        engine: JobEngine,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::TempDir::new().unwrap();
        let storage: Arc<dyn StoragePort> = Arc::new(FilesystemStorage::open(dir.path()).unwrap());
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 2, 0, 0).unwrap();
        let cancel = CancellationToken::new();
        let engine = JobEngine::new(
            RetryConfig::default(),
            Arc::new(FixedClock(now)),
            cancel.clone(),
        );
        Fixture {
            dir,
            storage,
            run: RunInfo::new(Ulid::new(), now),
            cancel,
            engine,
        }
    }

    async fn run(fx: &Fixture, spec: JobSpec, connector: MockConnector) -> JobRun {
        fx.engine
            .run_job(
                Arc::new(spec),
                Box::new(connector),
                Arc::clone(&fx.storage),
                &RetentionPolicy::Count { keep: 3 },
                &fx.run,
            )
            .await
    }

    #[tokio::test]
    async fn test_success_runs_full_lifecycle() {
        let fx = fixture();
        let connector = MockConnector::new(vec![MockStep::Succeed("payload".into())]);
        let calls = connector.calls();

        let job_run = run(&fx, JobSpec::new("docs", "mock"), connector).await;

        assert!(job_run.is_success());
        assert_eq!(job_run.attempts, 1);
        assert_eq!((calls.prepare(), calls.execute(), calls.cleanup()), (1, 1, 1));

        let artifacts = job_run.outcome.artifacts().unwrap();
        assert_eq!(artifacts.artifacts[0].path, "docs.dat");
        assert_eq!(artifacts.artifacts[0].bytes, 7);
        assert!(fx.dir.path().join("docs/2024-03-01/docs.dat").is_file());

        let retention = job_run.retention.unwrap();
        assert_eq!(retention.policy, RetentionPolicy::Count { keep: 3 });
        assert!(retention.deleted.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_succeeds_after_backoff() {
        let fx = fixture();
        let connector = MockConnector::new(vec![
            MockStep::Retryable("rate limited".into()),
            MockStep::Retryable("rate limited".into()),
            MockStep::Retryable("rate limited".into()),
            MockStep::Succeed("ok".into()),
        ]);

        let start = tokio::time::Instant::now();
        let job_run = run(&fx, JobSpec::new("docs", "mock"), connector).await;

        assert!(job_run.is_success());
        assert_eq!(job_run.attempts, 4);
        // 2s + 4s + 8s
        assert!(start.elapsed() >= Duration::from_secs(14));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_budget_exhausted() {
        let fx = fixture();
        let script = (0..5)
            .map(|_| MockStep::Retryable("upstream 503".into()))
            .collect();
        let connector = MockConnector::new(script);
        let calls = connector.calls();

        let job_run = run(&fx, JobSpec::new("docs", "mock"), connector).await;

        assert_eq!(job_run.outcome.error_kind(), Some(ErrorKind::ConnectorRetryable));
        assert_eq!(job_run.attempts, 5);
        assert_eq!(calls.execute(), 5);
        assert_eq!(calls.cleanup(), 1);
        assert!(job_run.retention.is_none());
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let fx = fixture();
        let connector = MockConnector::new(vec![MockStep::Fatal("repository gone".into())]);
        let calls = connector.calls();

        let job_run = run(&fx, JobSpec::new("docs", "mock"), connector).await;

        assert_eq!(job_run.outcome.error_kind(), Some(ErrorKind::ConnectorFatal));
        assert_eq!(calls.execute(), 1);
        assert_eq!(calls.cleanup(), 1);
    }

    #[tokio::test]
    async fn test_prepare_failure_skips_execute() {
        let fx = fixture();
        let connector = MockConnector::succeeding().with_prepare_error("missing token");
        let calls = connector.calls();

        let job_run = run(&fx, JobSpec::new("docs", "mock"), connector).await;

        assert_eq!(job_run.outcome.error_kind(), Some(ErrorKind::Configuration));
        assert_eq!(job_run.attempts, 0);
        assert_eq!((calls.prepare(), calls.execute(), calls.cleanup()), (1, 0, 1));
    }

    #[tokio::test]
    async fn test_panics_become_fatal_failures() {
        let fx = fixture();

        let connector = MockConnector::new(vec![MockStep::Panic("index out of bounds".into())]);
        let calls = connector.calls();
        let job_run = run(&fx, JobSpec::new("docs", "mock"), connector).await;
        match &job_run.outcome {
            JobOutcome::Failure { kind, message, .. } => {
                assert_eq!(*kind, ErrorKind::ConnectorFatal);
                assert!(message.contains("index out of bounds"));
            }
            other => panic!("Expected failure, got {:?}", other),
        }
        assert_eq!(calls.cleanup(), 1);

        let connector = MockConnector::succeeding().with_prepare_panic();
        let calls = connector.calls();
        let job_run = run(&fx, JobSpec::new("photos", "mock"), connector).await;
        assert_eq!(job_run.outcome.error_kind(), Some(ErrorKind::ConnectorFatal));
        assert_eq!(calls.execute(), 0);
        assert_eq!(calls.cleanup(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_bounds_execute_phase() {
        let fx = fixture();
        let connector = MockConnector::new(vec![MockStep::Delay(
            Duration::from_secs(120),
            Box::new(MockStep::Succeed("late".into())),
        )]);
        let calls = connector.calls();

        let spec = JobSpec::new("docs", "mock").with_timeout_secs(30);
        let job_run = run(&fx, spec, connector).await;

        assert_eq!(job_run.outcome.error_kind(), Some(ErrorKind::Timeout));
        assert_eq!(job_run.attempts, 1);
        assert_eq!(calls.cleanup(), 1);
    }

    #[tokio::test]
    async fn test_partial_artifacts_reported_on_failure() {
        let fx = fixture();
        let connector = MockConnector::new(vec![MockStep::WriteThenFail("disk quota".into())]);

        let job_run = run(&fx, JobSpec::new("docs", "mock"), connector).await;

        let partial = job_run.outcome.artifacts().unwrap();
        assert_eq!(partial.artifacts.len(), 1);
        assert_eq!(partial.artifacts[0].path, "docs.dat");
    }

    #[tokio::test]
    async fn test_cleanup_error_is_a_warning() {
        let fx = fixture();
        let connector = MockConnector::succeeding().with_cleanup_error("temp file busy");

        let job_run = run(&fx, JobSpec::new("docs", "mock"), connector).await;

        assert!(job_run.is_success());
        let warnings = &job_run.outcome.artifacts().unwrap().warnings;
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("temp file busy"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_retries() {
        let fx = fixture();
        let connector = MockConnector::new(vec![
            MockStep::Retryable("flaky".into()),
            MockStep::Retryable("flaky".into()),
        ]);
        let calls = connector.calls();

        let cancel = fx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        });

        let job_run = run(&fx, JobSpec::new("docs", "mock"), connector).await;

        assert_eq!(job_run.outcome.error_kind(), Some(ErrorKind::Cancelled));
        assert_eq!(calls.execute(), 1);
        assert_eq!(calls.cleanup(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let fx = fixture();
        fx.cancel.cancel();
        let connector = MockConnector::succeeding();
        let calls = connector.calls();

        let job_run = run(&fx, JobSpec::new("docs", "mock"), connector).await;

        assert_eq!(job_run.outcome.error_kind(), Some(ErrorKind::Cancelled));
        assert_eq!(calls.prepare(), 0);
    }

    #[tokio::test]
    async fn test_locked_namespace_is_conflict() {
        let fx = fixture();
        let _held = fx.storage.acquire_lock("docs").await.unwrap();
        let connector = MockConnector::succeeding();
        let calls = connector.calls();

        let job_run = run(&fx, JobSpec::new("docs", "mock"), connector).await;

        assert_eq!(job_run.outcome.error_kind(), Some(ErrorKind::Conflict));
        assert_eq!(calls.prepare(), 0);
    }

    #[tokio::test]
    async fn test_unresolvable_credentials() {
        let fx = fixture();
        let mut spec = JobSpec::new("docs", "mock");
        spec.credentials = Some(SecretRef::from_env("BACKUP_ENGINE_TEST_UNSET_TOKEN"));
        let connector = MockConnector::succeeding();
        let calls = connector.calls();

        let job_run = run(&fx, spec, connector).await;

        assert_eq!(job_run.outcome.error_kind(), Some(ErrorKind::Configuration));
        assert_eq!(calls.prepare(), 0);
    }
}
