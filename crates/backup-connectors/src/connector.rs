//! Connector trait definition.
//!
//! A connector reads one kind of data source (a directory tree, a set of
//! repositories, a database dump) and streams it into storage through the
//! context's [`ArtifactSink`](crate::ArtifactSink).

use async_trait::async_trait;
use backup_types::ArtifactResult;

use crate::context::RunContext;
use crate::error::ConnectorError;

/// Trait for data-source connectors.
///
/// The job engine drives every connector through the same lifecycle:
///
/// 1. `prepare` once. An error here is a configuration failure and
///    `execute` is never called.
/// 2. `execute` one or more times. Only `ConnectorError::Retryable` causes
///    another attempt, so `execute` must tolerate being re-run and may
///    overwrite artifacts it wrote in an earlier attempt.
/// 3. `cleanup` once, on every path, even after a panic in an earlier
///    phase. It must be idempotent; its errors are only logged.
///
/// # Example
///
/// ```rust,ignore
/// use backup_connectors::{Connector, ConnectorError, RunContext};
/// use backup_types::ArtifactResult;
///
/// struct HelloConnector;
///
/// #[async_trait::async_trait]
/// impl Connector for HelloConnector {
///     fn connector_type(&self) -> &str {
///         "hello"
///     }
///
///     async fn execute(&mut self, ctx: &RunContext) -> Result<ArtifactResult, ConnectorError> {
///         let mut result = ArtifactResult::new();
///         let mut data: &[u8] = b"hello";
///         result.push(ctx.sink.write("hello", "hello.txt", &mut data).await?);
///         Ok(result)
///     }
/// }
/// ```
#[async_trait]
pub trait Connector: Send {
    /// Type identifier matched against `JobSpec::connector`.
    fn connector_type(&self) -> &str;

    /// Validate options and set up whatever `execute` needs.
    async fn prepare(&mut self, _ctx: &RunContext) -> Result<(), ConnectorError> {
        Ok(())
    }

    /// Produce artifacts for this run.
    async fn execute(&mut self, ctx: &RunContext) -> Result<ArtifactResult, ConnectorError>;

    /// Release resources acquired in `prepare` or `execute`.
    async fn cleanup(&mut self, _ctx: &RunContext) -> Result<(), ConnectorError> {
        Ok(())
    }
}
