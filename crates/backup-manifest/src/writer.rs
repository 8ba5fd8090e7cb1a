//! Persist manifests through the storage port.

use backup_storage::StoragePort;
use chrono::NaiveDate;
use tracing::info;

use crate::error::ManifestError;
use crate::record::ManifestRecord;

pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Write the manifest into `<job>/<date>/manifest.json`.
pub async fn write_manifest(
    record: &ManifestRecord,
    storage: &dyn StoragePort,
    job: &str,
    date: NaiveDate,
) -> Result<(), ManifestError> {
    let json = record.to_json_pretty()?;
    let mut reader = json.as_bytes();
    let written = storage
        .write(job, date, MANIFEST_FILE_NAME, &mut reader)
        .await?;
    info!(
        run_id = %record.run_id,
        job = %job,
        bytes = written.bytes,
        "Wrote run manifest"
    );
    Ok(())
}
