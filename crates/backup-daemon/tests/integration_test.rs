//! Integration tests for the backup-daemon commands.
//!
//! These tests write a real config file, back up a real directory, and
//! check what lands in storage.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use backup_daemon::{
    list_jobs, reload_serving_config, retention_dry_run, run_once, serve, validate, ConfigArgs,
};
use backup_engine::ExitStatus;
use backup_manifest::{ManifestRecord, MANIFEST_FILE_NAME};
use backup_scheduler::PassOutcome;

/// Source tree, storage root and config file in one temp dir.
struct TestHarness {
    _temp_dir: TempDir,
    source: PathBuf,
    storage: PathBuf,
    config_path: PathBuf,
}

impl TestHarness {
    fn new(jobs_toml: &str) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let source = temp_dir.path().join("source");
        let storage = temp_dir.path().join("storage");
        std::fs::create_dir_all(source.join("nested")).unwrap();
        std::fs::write(source.join("a.txt"), b"alpha").unwrap();
        std::fs::write(source.join("nested").join("b.txt"), b"bravo!").unwrap();

        let harness = Self {
            config_path: temp_dir.path().join("backup.toml"),
            _temp_dir: temp_dir,
            source,
            storage,
        };
        harness.write_config(jobs_toml);
        harness
    }

    /// Replace the config file; `{source}` expands to the source tree.
    fn write_config(&self, jobs_toml: &str) {
        let config = format!(
            r#"
log_level = "warn"
parallelism = 2

[storage.default]
type = "filesystem"
base_path = '{storage}'

{jobs}
"#,
            storage = self.storage.display(),
            jobs = jobs_toml.replace("{source}", &self.source.display().to_string()),
        );
        std::fs::write(&self.config_path, config).unwrap();
    }

    fn args(&self) -> ConfigArgs {
        ConfigArgs::new(Some(self.config_path.display().to_string()), None)
    }

    /// Dated group directories written for `job`.
    fn groups(&self, job: &str) -> Vec<PathBuf> {
        let dir = self.storage.join(job);
        if !dir.exists() {
            return Vec::new();
        }
        let mut groups: Vec<PathBuf> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.is_dir())
            .collect();
        groups.sort();
        groups
    }
}

fn read_manifest(group: &Path) -> ManifestRecord {
    let json = std::fs::read_to_string(group.join(MANIFEST_FILE_NAME)).unwrap();
    ManifestRecord::from_json(&json).unwrap()
}

const DOCS_JOB: &str = r#"
[[jobs]]
name = "docs"
connector = "directory"

[jobs.options]
path = '{source}'
"#;

#[tokio::test]
async fn test_run_once_backs_up_directory() {
    let harness = TestHarness::new(DOCS_JOB);

    let status = run_once(&harness.args(), &[], CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(status, ExitStatus::Success);
    assert!(harness.source.join("a.txt").exists());

    let groups = harness.groups("docs");
    assert_eq!(groups.len(), 1);
    let group = &groups[0];
    assert_eq!(
        std::fs::read(group.join("files").join("a.txt")).unwrap(),
        b"alpha"
    );
    assert_eq!(
        std::fs::read(group.join("files").join("nested").join("b.txt")).unwrap(),
        b"bravo!"
    );

    let manifest = read_manifest(group);
    assert!(manifest.is_success());
    assert_eq!(manifest.totals.jobs, 1);
    assert_eq!(manifest.totals.succeeded, 1);
    assert_eq!(manifest.totals.bytes, 11);
    assert_eq!(manifest.jobs[0].name, "docs");
}

#[tokio::test]
async fn test_run_once_missing_source_fails_job() {
    let harness = TestHarness::new(
        r#"
[[jobs]]
name = "docs"
connector = "directory"

[jobs.options]
path = '{source}/does-not-exist'
"#,
    );

    let status = run_once(&harness.args(), &[], CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(status, ExitStatus::JobFailures);
}

#[tokio::test]
async fn test_run_once_unknown_job_is_configuration_error() {
    let harness = TestHarness::new(DOCS_JOB);

    let status = run_once(
        &harness.args(),
        &["nope".to_string()],
        CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(status, ExitStatus::ConfigurationError);
    assert!(harness.groups("docs").is_empty());
}

#[tokio::test]
async fn test_run_once_cancelled_runs_nothing() {
    let harness = TestHarness::new(DOCS_JOB);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let status = run_once(&harness.args(), &[], cancel).await.unwrap();
    assert_eq!(status, ExitStatus::JobFailures);
    assert!(harness.groups("docs").is_empty());
}

#[test]
fn test_validate_good_config() {
    let harness = TestHarness::new(DOCS_JOB);
    assert_eq!(validate(&harness.args()).unwrap(), ExitStatus::Success);
    assert_eq!(list_jobs(&harness.args()).unwrap(), ExitStatus::Success);
}

#[test]
fn test_validate_unknown_connector() {
    let harness = TestHarness::new(
        r#"
[[jobs]]
name = "db"
connector = "postgres"
"#,
    );
    let err = validate(&harness.args()).unwrap_err();
    assert!(format!("{:#}", err).contains("postgres"));
}

#[test]
fn test_validate_bad_cron() {
    let harness = TestHarness::new(&format!(
        "{}\n[scheduler]\ncron = \"not a cron\"\n",
        DOCS_JOB
    ));
    assert!(validate(&harness.args()).is_err());
}

#[test]
fn test_missing_config_file_is_error() {
    let args = ConfigArgs::new(Some("/nonexistent/backup.toml".to_string()), None);
    assert!(validate(&args).is_err());
}

#[test]
fn test_parallelism_override() {
    let harness = TestHarness::new(DOCS_JOB);
    let settings = harness.args().with_parallelism(Some(5)).load().unwrap();
    assert_eq!(settings.parallelism, 5);

    let result = harness.args().with_parallelism(Some(0)).load();
    assert!(result.is_err());
}

#[tokio::test]
async fn test_retention_dry_run_deletes_nothing() {
    let harness = TestHarness::new(
        r#"
[[jobs]]
name = "docs"
connector = "directory"
retention = { kind = "count", keep = 1 }

[jobs.options]
path = '{source}'
"#,
    );
    for date in ["2020-01-01", "2020-01-02", "not-a-date"] {
        std::fs::create_dir_all(harness.storage.join("docs").join(date)).unwrap();
    }

    let status = retention_dry_run(&harness.args(), &[]).await.unwrap();
    assert_eq!(status, ExitStatus::Success);
    assert_eq!(harness.groups("docs").len(), 3);
}

#[test]
fn test_bad_cron_rejected_by_every_command() {
    let harness = TestHarness::new(&format!(
        "{}\n[scheduler]\ncron = \"0 2 * * funday\"\n",
        DOCS_JOB
    ));
    assert!(harness.args().load().is_err());
    assert!(list_jobs(&harness.args()).is_err());
}

#[tokio::test]
async fn test_run_once_rejects_bad_cron() {
    let harness = TestHarness::new(&format!(
        "{}\n[scheduler]\ncron = \"not a cron\"\n",
        DOCS_JOB
    ));
    let result = run_once(&harness.args(), &[], CancellationToken::new()).await;
    assert!(result.is_err());
    assert!(harness.groups("docs").is_empty());
}

#[tokio::test]
async fn test_serve_unknown_job_filter_fails_fast() {
    let harness = TestHarness::new(&format!(
        "{}\n[scheduler]\ncron = \"0 2 * * *\"\nrun_on_startup = true\n",
        DOCS_JOB
    ));

    let result = serve(
        &harness.args(),
        &["typo".to_string()],
        CancellationToken::new(),
    )
    .await;
    let err = result.err().expect("serve must reject an unknown job");
    assert!(format!("{:#}", err).contains("typo"));
    assert!(harness.groups("docs").is_empty());
}

#[tokio::test]
async fn test_serve_requires_scheduler_section() {
    let harness = TestHarness::new(DOCS_JOB);
    let result = serve(&harness.args(), &[], CancellationToken::new()).await;
    assert!(result.is_err());
}

#[test]
fn test_reload_follows_scheduler_changes() {
    let harness = TestHarness::new(&format!(
        "{}\n[scheduler]\ncron = \"0 2 * * *\"\n",
        DOCS_JOB
    ));

    harness.write_config(&format!(
        "{}\n[scheduler]\ncron = \"30 4 * * 1-5\"\ntimezone = \"Europe/London\"\n",
        DOCS_JOB
    ));
    let (_, next) = reload_serving_config(&harness.args(), &[], CancellationToken::new()).unwrap();
    match next {
        PassOutcome::Reschedule(schedule) => {
            assert_eq!(schedule.expression(), "30 4 * * 1-5");
            assert_eq!(schedule.timezone().name(), "Europe/London");
        }
        other => panic!("Expected Reschedule, got {:?}", other),
    }

    // Section removed: leave the serve loop
    harness.write_config(DOCS_JOB);
    let (_, next) = reload_serving_config(&harness.args(), &[], CancellationToken::new()).unwrap();
    assert!(matches!(next, PassOutcome::Stop));
}

#[test]
fn test_reload_rejects_vanished_job() {
    let harness = TestHarness::new(&format!(
        "{}\n[scheduler]\ncron = \"0 2 * * *\"\n",
        DOCS_JOB
    ));
    let selected = vec!["docs".to_string()];
    assert!(reload_serving_config(&harness.args(), &selected, CancellationToken::new()).is_ok());

    harness.write_config(&format!(
        "{}\n[scheduler]\ncron = \"0 2 * * *\"\n",
        DOCS_JOB.replace("name = \"docs\"", "name = \"papers\"")
    ));
    assert!(reload_serving_config(&harness.args(), &selected, CancellationToken::new()).is_err());
}
