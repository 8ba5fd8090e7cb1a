//! Retention engine for dated backup groups.
//!
//! Retention is split in two steps:
//! - [`prune`] is a pure function of (listing, policy, now, protected date)
//!   and doubles as a dry run.
//! - [`apply`] deletes what a decision marked, best-effort per group.
//!
//! Policies:
//! - `age`: delete groups dated before `today - days`
//! - `count`: keep the newest `keep` groups
//! - `hybrid`: keep a group if either rule keeps it
//!
//! Groups whose names are not canonical dates are never deleted.

use std::collections::BTreeSet;

use backup_storage::{DatedGroup, StoragePort};
use backup_types::{RetentionPolicy, RetentionSummary};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::{info, warn};

/// Which dated groups of a job to keep and which to delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionDecision {
    pub job_name: String,
    pub policy: RetentionPolicy,
    /// Surviving dates, oldest first
    pub keep: Vec<NaiveDate>,
    /// Dates to delete, oldest first
    pub delete: Vec<NaiveDate>,
    /// Group names that are not dates
    pub skipped: Vec<String>,
}

impl RetentionDecision {
    pub fn is_empty(&self) -> bool {
        self.keep.is_empty() && self.delete.is_empty() && self.skipped.is_empty()
    }
}

/// Outcome of applying a decision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub deleted: Vec<NaiveDate>,
    pub errors: Vec<(NaiveDate, String)>,
}

/// Compute a retention decision.
///
/// `protected` is the date of the run currently being written; it is
/// always kept.
pub fn prune(
    job_name: &str,
    listing: &[DatedGroup],
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
    protected: Option<NaiveDate>,
) -> RetentionDecision {
    let today = now.date_naive();

    let mut skipped = Vec::new();
    let mut dates = BTreeSet::new();
    for group in listing {
        match group.date {
            Some(date) => {
                dates.insert(date);
            }
            None => {
                warn!(job = job_name, group = %group.name, "Skipping non-date backup group");
                skipped.push(group.name.clone());
            }
        }
    }

    // Newest first, so the count rule keeps the head of the list.
    let newest_first: Vec<NaiveDate> = dates.into_iter().rev().collect();

    let mut keep = Vec::new();
    let mut delete = Vec::new();
    for (rank, date) in newest_first.iter().enumerate() {
        let kept = Some(*date) == protected
            || match *policy {
                RetentionPolicy::Age { days } => within_age(*date, today, days),
                RetentionPolicy::Count { keep } => rank < keep as usize,
                RetentionPolicy::Hybrid { days, keep } => {
                    within_age(*date, today, days) || rank < keep as usize
                }
            };
        if kept {
            keep.push(*date);
        } else {
            delete.push(*date);
        }
    }
    keep.reverse();
    delete.reverse();

    RetentionDecision {
        job_name: job_name.to_string(),
        policy: *policy,
        keep,
        delete,
        skipped,
    }
}

fn within_age(date: NaiveDate, today: NaiveDate, days: u32) -> bool {
    let cutoff = today - Duration::days(i64::from(days));
    date >= cutoff
}

/// Delete every group the decision marked.
///
/// A failed deletion is recorded and does not stop the others.
pub async fn apply(decision: &RetentionDecision, storage: &dyn StoragePort) -> RetentionReport {
    let mut report = RetentionReport::default();
    for date in &decision.delete {
        match storage.delete(&decision.job_name, *date).await {
            Ok(()) => report.deleted.push(*date),
            Err(e) => {
                warn!(job = %decision.job_name, %date, error = %e, "Failed to delete backup group");
                report.errors.push((*date, e.to_string()));
            }
        }
    }
    if !report.deleted.is_empty() {
        info!(
            job = %decision.job_name,
            deleted = report.deleted.len(),
            policy = %decision.policy,
            "Retention applied"
        );
    }
    report
}

/// List once, prune, apply, and summarize for the manifest.
pub async fn enforce(
    job_name: &str,
    storage: &dyn StoragePort,
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
    protected: Option<NaiveDate>,
) -> RetentionSummary {
    let listing = match storage.list(job_name).await {
        Ok(listing) => listing,
        Err(e) => {
            warn!(job = job_name, error = %e, "Failed to list backup groups, skipping retention");
            return RetentionSummary {
                policy: *policy,
                kept: Vec::new(),
                deleted: Vec::new(),
                skipped: Vec::new(),
                errors: vec![format!("listing failed: {}", e)],
            };
        }
    };

    let decision = prune(job_name, &listing, policy, now, protected);
    let report = apply(&decision, storage).await;
    summarize(decision, report)
}

/// Merge a decision and its application report.
pub fn summarize(decision: RetentionDecision, report: RetentionReport) -> RetentionSummary {
    let mut kept = decision.keep;
    // Groups that failed to delete are still on storage.
    kept.extend(report.errors.iter().map(|(date, _)| *date));
    kept.sort();

    RetentionSummary {
        policy: decision.policy,
        kept,
        deleted: report.deleted,
        skipped: decision.skipped,
        errors: report
            .errors
            .into_iter()
            .map(|(date, e)| format!("{}: {}", date, e))
            .collect(),
    }
}
