//! End-to-end test infrastructure for backup-keeper.
//!
//! Provides a shared TestHarness that wires real filesystem storage to
//! scripted mock connectors, so tests can drive whole runs through the
//! orchestrator and inspect what lands on disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use backup_connectors::{Connector, ConnectorRegistry, InFlight, MockConnector, MockStep};
use backup_engine::Orchestrator;
use backup_manifest::{ManifestRecord, MANIFEST_FILE_NAME};
use backup_storage::StorageRegistry;
use backup_types::{FixedClock, JobSpec, RetentionPolicy, Settings, StorageConfig, DATE_FORMAT};

/// Connector type served by the harness registry.
pub const MOCK: &str = "mock";

/// Shared test harness for E2E tests.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    /// Root of the `default` filesystem storage target
    pub storage_root: PathBuf,
    /// Settings handed to every orchestrator built by this harness
    pub settings: Settings,
    scripts: Arc<Mutex<HashMap<String, Vec<MockStep>>>>,
    in_flight: Arc<InFlight>,
}

impl TestHarness {
    /// Create a harness with one filesystem storage target and no jobs.
    pub fn new() -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let storage_root = temp_dir.path().join("storage");
        std::fs::create_dir_all(&storage_root).expect("Failed to create storage root");

        let mut settings = Settings::default();
        settings.storage.insert(
            "default".to_string(),
            StorageConfig::filesystem(storage_root.to_string_lossy()),
        );

        Self {
            _temp_dir: temp_dir,
            storage_root,
            settings,
            scripts: Arc::new(Mutex::new(HashMap::new())),
            in_flight: Arc::new(InFlight::default()),
        }
    }

    /// Declare a mock job whose next run replays `script`.
    pub fn add_job(&mut self, name: &str, script: Vec<MockStep>) -> &mut JobSpec {
        self.script(name, script);
        self.settings.jobs.push(JobSpec::new(name, MOCK));
        self.settings
            .jobs
            .last_mut()
            .expect("job was just pushed")
    }

    /// Replace the script used the next time `name` runs.
    pub fn script(&self, name: &str, script: Vec<MockStep>) {
        self.scripts
            .lock()
            .expect("script lock poisoned")
            .insert(name.to_string(), script);
    }

    /// Set the retention used by jobs without an override.
    pub fn default_retention(&mut self, policy: RetentionPolicy) {
        self.settings.default_retention = policy;
    }

    /// Overlap of mock executions across every run of this harness.
    pub fn in_flight(&self) -> Arc<InFlight> {
        Arc::clone(&self.in_flight)
    }

    /// Registry with the built-in connectors plus the scripted mock.
    pub fn registry(&self) -> ConnectorRegistry {
        let scripts = Arc::clone(&self.scripts);
        let in_flight = Arc::clone(&self.in_flight);
        let mut registry = ConnectorRegistry::with_builtins();
        registry.register(MOCK, move |spec: &JobSpec| {
            let steps = scripts
                .lock()
                .expect("script lock poisoned")
                .remove(&spec.name)
                .unwrap_or_default();
            let connector = MockConnector::new(steps).with_in_flight(Arc::clone(&in_flight));
            Ok(Box::new(connector) as Box<dyn Connector>)
        });
        registry
    }

    /// Orchestrator over the current settings with a frozen clock.
    pub fn orchestrator(&self, now: DateTime<Utc>) -> Orchestrator {
        let storage =
            StorageRegistry::from_config(&self.settings.storage).expect("Failed to open storage");
        Orchestrator::new(self.settings.clone(), self.registry(), storage)
            .expect("Invalid test configuration")
            .with_clock(Arc::new(FixedClock(now)))
    }

    /// Directory of one dated group.
    pub fn group_dir(&self, job: &str, date: NaiveDate) -> PathBuf {
        self.storage_root
            .join(job)
            .join(date.format(DATE_FORMAT).to_string())
    }

    /// Create a dated group holding a single file, as an earlier run would.
    pub fn seed_group(&self, job: &str, name: &str) {
        let dir = self.storage_root.join(job).join(name);
        std::fs::create_dir_all(&dir).expect("Failed to create group dir");
        std::fs::write(dir.join("old.dat"), b"old").expect("Failed to write seed file");
    }

    /// Group directory names for `job`, sorted.
    pub fn groups(&self, job: &str) -> Vec<String> {
        let dir = self.storage_root.join(job);
        let Ok(entries) = std::fs::read_dir(dir) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|e| e.path().is_dir())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    /// Parse the manifest stored in a group.
    pub fn read_manifest(&self, job: &str, date: NaiveDate) -> ManifestRecord {
        let path = self.group_dir(job, date).join(MANIFEST_FILE_NAME);
        read_manifest_file(&path)
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a manifest file.
pub fn read_manifest_file(path: &Path) -> ManifestRecord {
    let json = std::fs::read_to_string(path).expect("Failed to read manifest");
    ManifestRecord::from_json(&json).expect("Failed to parse manifest")
}

/// 2024-03-01 02:00 UTC, the instant most scenarios run at.
pub fn run_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 2, 0, 0).unwrap()
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}
