//! Directory snapshot connector.
//!
//! Copies every regular file under `options.path` into `files/<relative>`
//! of the job's dated directory.
//!
//! Options:
//! - `path` (required): directory to back up
//! - `exclude` (optional): entry names to skip wherever they appear,
//!   e.g. `[".git", "node_modules"]`

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use backup_types::ArtifactResult;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::connector::Connector;
use crate::context::RunContext;
use crate::error::ConnectorError;

/// A file found while walking the source tree.
#[derive(Debug)]
struct SourceFile {
    absolute: PathBuf,
    /// `/`-separated path relative to the root
    relative: String,
}

#[derive(Debug, Default)]
struct Walk {
    files: Vec<SourceFile>,
    directories: u64,
    warnings: Vec<String>,
}

/// Snapshots a local directory tree.
#[derive(Debug, Default)]
pub struct DirectoryConnector {
    root: Option<PathBuf>,
    exclude: Vec<String>,
}

impl DirectoryConnector {
    pub const TYPE: &'static str = "directory";

    pub fn new() -> Self {
        Self::default()
    }
}

fn walk(root: &Path, exclude: &[String]) -> Walk {
    let mut walk = Walk::default();

    let entries = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !exclude
                    .iter()
                    .any(|name| entry.file_name().to_string_lossy() == name.as_str())
        });

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                walk.warnings.push(format!("unreadable entry: {}", e));
                continue;
            }
        };
        if entry.depth() == 0 {
            continue;
        }

        let file_type = entry.file_type();
        let relative = match entry.path().strip_prefix(root) {
            Ok(rel) => rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .collect::<Vec<_>>()
                .join("/"),
            Err(_) => continue,
        };

        if file_type.is_dir() {
            walk.directories += 1;
        } else if file_type.is_file() {
            walk.files.push(SourceFile {
                absolute: entry.path().to_path_buf(),
                relative,
            });
        } else if file_type.is_symlink() {
            walk.warnings.push(format!("skipped symlink: {}", relative));
        } else {
            walk.warnings.push(format!("skipped special file: {}", relative));
        }
    }

    walk
}

#[async_trait]
impl Connector for DirectoryConnector {
    fn connector_type(&self) -> &str {
        Self::TYPE
    }

    async fn prepare(&mut self, ctx: &RunContext) -> Result<(), ConnectorError> {
        let path = ctx
            .option_str("path")
            .ok_or_else(|| ConnectorError::configuration("option 'path' is required"))?;
        let root = PathBuf::from(path);

        let metadata = tokio::fs::metadata(&root).await.map_err(|e| {
            ConnectorError::configuration(format!("cannot access '{}': {}", root.display(), e))
        })?;
        if !metadata.is_dir() {
            return Err(ConnectorError::configuration(format!(
                "'{}' is not a directory",
                root.display()
            )));
        }

        self.exclude = match ctx.spec.options.get("exclude") {
            None => Vec::new(),
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_str().map(String::from).ok_or_else(|| {
                        ConnectorError::configuration("option 'exclude' must be a list of strings")
                    })
                })
                .collect::<Result<_, _>>()?,
            Some(_) => {
                return Err(ConnectorError::configuration(
                    "option 'exclude' must be a list of strings",
                ))
            }
        };

        debug!(job = %ctx.job_name(), root = %root.display(), "Directory connector prepared");
        self.root = Some(root);
        Ok(())
    }

    async fn execute(&mut self, ctx: &RunContext) -> Result<ArtifactResult, ConnectorError> {
        let root = self
            .root
            .clone()
            .ok_or_else(|| ConnectorError::fatal("execute called before prepare"))?;
        let exclude = self.exclude.clone();

        let walk = tokio::task::spawn_blocking(move || walk(&root, &exclude))
            .await
            .map_err(|e| ConnectorError::fatal(format!("directory walk failed: {}", e)))?;

        let mut result = ArtifactResult::new();
        result.count("directories", walk.directories);
        for warning in walk.warnings {
            warn!(job = %ctx.job_name(), warning = %warning, "Directory snapshot warning");
            result.warn(warning);
        }

        for file in walk.files {
            let mut source = match tokio::fs::File::open(&file.absolute).await {
                Ok(source) => source,
                Err(e) => {
                    let warning = format!("unreadable file {}: {}", file.relative, e);
                    warn!(job = %ctx.job_name(), warning = %warning, "Directory snapshot warning");
                    result.warn(warning);
                    continue;
                }
            };

            let target = format!("files/{}", file.relative);
            let descriptor = ctx.sink.write(file.relative, &target, &mut source).await?;
            result.push(descriptor);
            result.count("files", 1);
        }

        info!(
            job = %ctx.job_name(),
            files = result.artifacts.len(),
            bytes = result.total_bytes(),
            "Directory snapshot complete"
        );
        Ok(result)
    }

    async fn cleanup(&mut self, _ctx: &RunContext) -> Result<(), ConnectorError> {
        self.root = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ArtifactSink;
    use backup_storage::{FilesystemStorage, StoragePort};
    use backup_types::JobSpec;
    use chrono::{NaiveDate, Utc};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;
    use ulid::Ulid;

    fn context(spec: JobSpec, storage_root: &Path) -> RunContext {
        let storage: Arc<dyn StoragePort> =
            Arc::new(FilesystemStorage::open(storage_root).unwrap());
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let sink = ArtifactSink::new(storage, spec.name.clone(), date);
        RunContext::new(
            Arc::new(spec),
            Ulid::new(),
            Utc::now(),
            date,
            tempfile::TempDir::new().unwrap(),
            None,
            CancellationToken::new(),
            sink,
        )
    }

    fn source_tree() -> tempfile::TempDir {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "alpha").unwrap();
        std::fs::create_dir_all(dir.path().join("nested/deeper")).unwrap();
        std::fs::write(dir.path().join("nested/b.txt"), "bravo!").unwrap();
        std::fs::write(dir.path().join("nested/deeper/c.txt"), "c").unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git/HEAD"), "ref").unwrap();
        dir
    }

    #[tokio::test]
    async fn test_snapshot_copies_tree() {
        let source = source_tree();
        let storage = tempfile::TempDir::new().unwrap();
        let spec = JobSpec::new("docs", "directory")
            .with_option("path", source.path().to_string_lossy().to_string());
        let ctx = context(spec, storage.path());

        let mut connector = DirectoryConnector::new();
        connector.prepare(&ctx).await.unwrap();
        let result = connector.execute(&ctx).await.unwrap();
        connector.cleanup(&ctx).await.unwrap();

        let paths: Vec<&str> = result.artifacts.iter().map(|a| a.path.as_str()).collect();
        assert!(paths.contains(&"files/a.txt"));
        assert!(paths.contains(&"files/nested/b.txt"));
        assert!(paths.contains(&"files/nested/deeper/c.txt"));
        assert!(paths.contains(&"files/.git/HEAD"));
        assert_eq!(result.item_counts["files"], 4);
        assert_eq!(result.item_counts["directories"], 3);

        let copied = storage.path().join("docs/2024-03-01/files/nested/b.txt");
        assert_eq!(std::fs::read_to_string(copied).unwrap(), "bravo!");
    }

    #[tokio::test]
    async fn test_snapshot_honors_exclude() {
        let source = source_tree();
        let storage = tempfile::TempDir::new().unwrap();
        let spec = JobSpec::new("docs", "directory")
            .with_option("path", source.path().to_string_lossy().to_string())
            .with_option("exclude", serde_json::json!([".git", "deeper"]));
        let ctx = context(spec, storage.path());

        let mut connector = DirectoryConnector::new();
        connector.prepare(&ctx).await.unwrap();
        let result = connector.execute(&ctx).await.unwrap();

        let paths: Vec<&str> = result.artifacts.iter().map(|a| a.path.as_str()).collect();
        assert_eq!(paths, vec!["files/a.txt", "files/nested/b.txt"]);
        assert_eq!(result.total_bytes(), 11);
    }

    #[tokio::test]
    async fn test_prepare_requires_existing_directory() {
        let storage = tempfile::TempDir::new().unwrap();

        let ctx = context(JobSpec::new("docs", "directory"), storage.path());
        let mut connector = DirectoryConnector::new();
        assert!(matches!(
            connector.prepare(&ctx).await,
            Err(ConnectorError::Configuration(_))
        ));

        let spec = JobSpec::new("docs", "directory").with_option("path", "/definitely/not/here");
        let ctx = context(spec, storage.path());
        assert!(matches!(
            connector.prepare(&ctx).await,
            Err(ConnectorError::Configuration(_))
        ));

        let spec = JobSpec::new("docs", "directory")
            .with_option("path", storage.path().to_string_lossy().to_string())
            .with_option("exclude", "node_modules");
        let ctx = context(spec, storage.path());
        assert!(matches!(
            connector.prepare(&ctx).await,
            Err(ConnectorError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_execute_before_prepare_is_fatal() {
        let storage = tempfile::TempDir::new().unwrap();
        let ctx = context(JobSpec::new("docs", "directory"), storage.path());
        let mut connector = DirectoryConnector::new();
        assert!(matches!(
            connector.execute(&ctx).await,
            Err(ConnectorError::Fatal(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinks_become_warnings() {
        let source = source_tree();
        std::os::unix::fs::symlink(source.path().join("a.txt"), source.path().join("link.txt"))
            .unwrap();
        let storage = tempfile::TempDir::new().unwrap();
        let spec = JobSpec::new("docs", "directory")
            .with_option("path", source.path().to_string_lossy().to_string());
        let ctx = context(spec, storage.path());

        let mut connector = DirectoryConnector::new();
        connector.prepare(&ctx).await.unwrap();
        let result = connector.execute(&ctx).await.unwrap();

        assert_eq!(result.warnings, vec!["skipped symlink: link.txt".to_string()]);
        assert!(!result.artifacts.iter().any(|a| a.path == "files/link.txt"));
    }
}
