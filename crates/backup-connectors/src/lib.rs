//! Connector port for backup-keeper.
//!
//! This crate provides:
//! - [`Connector`]: the lifecycle every data-source connector implements
//! - [`RunContext`] and [`ArtifactSink`]: per-job state and the streaming
//!   path from connector to storage
//! - [`ConnectorRegistry`]: factories keyed by type identifier
//! - Built-in connectors ([`DirectoryConnector`])
//! - [`MockConnector`] for tests

pub mod connector;
pub mod connectors;
pub mod context;
pub mod error;
pub mod mock;
pub mod registry;

pub use connector::Connector;
pub use connectors::DirectoryConnector;
pub use context::{ArtifactSink, RunContext};
pub use error::ConnectorError;
pub use mock::{InFlight, MockCalls, MockConnector, MockStep};
pub use registry::{ConnectorFactory, ConnectorRegistry};
