//! Artifact descriptors produced by connectors.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One persisted artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    /// Logical name chosen by the connector
    pub name: String,
    /// Size in bytes
    pub bytes: u64,
    /// Content checksum, `sha256:<hex>`
    pub checksum: String,
    /// Path relative to the job's dated directory
    pub path: String,
}

/// Output of a connector execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactResult {
    /// Artifacts in the order they were produced
    #[serde(default)]
    pub artifacts: Vec<ArtifactDescriptor>,
    /// Item counts by kind (e.g., "files", "repositories")
    #[serde(default)]
    pub item_counts: BTreeMap<String, u64>,
    /// Non-fatal issues surfaced for visibility
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl ArtifactResult {
    /// Create an empty result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an artifact.
    pub fn push(&mut self, artifact: ArtifactDescriptor) {
        self.artifacts.push(artifact);
    }

    /// Add to an item counter.
    pub fn count(&mut self, kind: &str, n: u64) {
        *self.item_counts.entry(kind.to_string()).or_insert(0) += n;
    }

    /// Record a warning.
    pub fn warn(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// Total bytes across all artifacts.
    pub fn total_bytes(&self) -> u64 {
        self.artifacts.iter().map(|a| a.bytes).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty() && self.item_counts.is_empty() && self.warnings.is_empty()
    }
}
