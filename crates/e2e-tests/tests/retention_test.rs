//! Retention E2E tests: historical groups on disk pruned after a run.

use pretty_assertions::assert_eq;

use backup_connectors::MockStep;
use backup_engine::ExitStatus;
use backup_types::RetentionPolicy;
use e2e_tests::{date, run_time, TestHarness};

/// Age 30 at 2024-03-01: only 2024-01-15 is older than the cutoff.
#[tokio::test]
async fn test_age_retention_after_run() {
    let mut harness = TestHarness::new();
    harness.default_retention(RetentionPolicy::Age { days: 30 });
    harness.add_job("docs", vec![]);
    for name in ["2024-01-15", "2024-02-10", "2024-02-28", "notes"] {
        harness.seed_group("docs", name);
    }

    let report = harness.orchestrator(run_time()).run(&[]).await;
    assert_eq!(report.exit, ExitStatus::Success);

    assert_eq!(
        harness.groups("docs"),
        vec!["2024-02-10", "2024-02-28", "2024-03-01", "notes"]
    );

    let manifest = report.manifest.unwrap();
    let retention = manifest.job("docs").unwrap().retention.clone().unwrap();
    assert_eq!(retention.deleted, vec![date(2024, 1, 15)]);
    assert_eq!(retention.skipped, vec!["notes".to_string()]);
    assert!(retention.errors.is_empty());
}

/// The group just written survives even when the count rule alone would
/// drop it.
#[tokio::test]
async fn test_count_retention_keeps_current_run() {
    let mut harness = TestHarness::new();
    harness
        .add_job("docs", vec![])
        .retention = Some(RetentionPolicy::Count { keep: 2 });
    // Future-dated groups outrank today's in newest-first order
    for name in ["2024-02-01", "2024-02-15", "2024-03-05", "2024-03-09"] {
        harness.seed_group("docs", name);
    }

    let report = harness.orchestrator(run_time()).run(&[]).await;
    assert_eq!(report.exit, ExitStatus::Success);

    assert_eq!(
        harness.groups("docs"),
        vec!["2024-03-01", "2024-03-05", "2024-03-09"]
    );
}

#[tokio::test]
async fn test_hybrid_retention() {
    let mut harness = TestHarness::new();
    harness.default_retention(RetentionPolicy::Hybrid { days: 7, keep: 3 });
    harness.add_job("docs", vec![]);
    for name in ["2023-12-01", "2024-01-01", "2024-02-01", "2024-02-26"] {
        harness.seed_group("docs", name);
    }

    let report = harness.orchestrator(run_time()).run(&[]).await;
    assert_eq!(report.exit, ExitStatus::Success);

    // Newest three by count, plus anything within seven days
    assert_eq!(
        harness.groups("docs"),
        vec!["2024-02-01", "2024-02-26", "2024-03-01"]
    );
}

/// A failed job never prunes its history.
#[tokio::test]
async fn test_failed_job_skips_retention() {
    let mut harness = TestHarness::new();
    harness.default_retention(RetentionPolicy::Count { keep: 1 });
    harness.add_job("docs", vec![MockStep::Fatal("disk full".to_string())]);
    for name in ["2024-01-01", "2024-02-01"] {
        harness.seed_group("docs", name);
    }

    let report = harness.orchestrator(run_time()).run(&[]).await;
    assert_eq!(report.exit, ExitStatus::JobFailures);

    let groups = harness.groups("docs");
    assert!(groups.contains(&"2024-01-01".to_string()));
    assert!(groups.contains(&"2024-02-01".to_string()));
    assert!(report.manifest.unwrap().job("docs").unwrap().retention.is_none());
}

/// Planning shows the same decision a run would make, and deletes nothing.
#[tokio::test]
async fn test_plan_retention_matches_policy() {
    let mut harness = TestHarness::new();
    harness.default_retention(RetentionPolicy::Age { days: 30 });
    harness.add_job("docs", vec![]);
    for name in ["2024-01-15", "2024-02-10"] {
        harness.seed_group("docs", name);
    }

    let decisions = harness
        .orchestrator(run_time())
        .plan_retention(&[])
        .await
        .unwrap();
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].delete, vec![date(2024, 1, 15)]);
    assert_eq!(decisions[0].keep, vec![date(2024, 2, 10)]);
    assert_eq!(harness.groups("docs"), vec!["2024-01-15", "2024-02-10"]);
}
