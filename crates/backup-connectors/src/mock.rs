//! Mock connector for testing.
//!
//! Replays a script of attempt results so engine and orchestrator tests
//! can exercise retries, fatal errors, timeouts and panics without a real
//! data source.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backup_types::ArtifactResult;

use crate::connector::Connector;
use crate::context::RunContext;
use crate::error::ConnectorError;

/// What one `execute` attempt does.
#[derive(Debug, Clone)]
pub enum MockStep {
    /// Write one artifact named `<job>.dat` with this content and succeed
    Succeed(String),
    Retryable(String),
    Fatal(String),
    /// Write an artifact, then fail fatally
    WriteThenFail(String),
    /// Sleep (tokio time), then run the inner step
    Delay(Duration, Box<MockStep>),
    Panic(String),
}

/// Call counters shared with the test that built the connector.
#[derive(Debug, Default)]
pub struct MockCalls {
    pub prepare: AtomicU32,
    pub execute: AtomicU32,
    pub cleanup: AtomicU32,
}

impl MockCalls {
    pub fn prepare(&self) -> u32 {
        self.prepare.load(Ordering::SeqCst)
    }

    pub fn execute(&self) -> u32 {
        self.execute.load(Ordering::SeqCst)
    }

    pub fn cleanup(&self) -> u32 {
        self.cleanup.load(Ordering::SeqCst)
    }
}

/// Counts `execute` calls that overlap, shared by many mocks.
#[derive(Debug, Default)]
pub struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous executions seen.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn enter(self: &Arc<Self>) -> InFlightGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlightGuard(Arc::clone(self))
    }
}

// Leaves on drop so panicking steps are counted out too.
struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Scripted connector.
///
/// Once the script is exhausted every further attempt succeeds.
#[derive(Debug)]
pub struct MockConnector {
    script: VecDeque<MockStep>,
    prepare_error: Option<String>,
    cleanup_error: Option<String>,
    panic_in_prepare: bool,
    calls: Arc<MockCalls>,
    in_flight: Option<Arc<InFlight>>,
}

impl MockConnector {
    pub const TYPE: &'static str = "mock";

    pub fn new(script: Vec<MockStep>) -> Self {
        Self {
            script: script.into(),
            prepare_error: None,
            cleanup_error: None,
            panic_in_prepare: false,
            calls: Arc::new(MockCalls::default()),
            in_flight: None,
        }
    }

    pub fn succeeding() -> Self {
        Self::new(Vec::new())
    }

    /// Fail `prepare` with a configuration error.
    pub fn with_prepare_error(mut self, message: impl Into<String>) -> Self {
        self.prepare_error = Some(message.into());
        self
    }

    pub fn with_cleanup_error(mut self, message: impl Into<String>) -> Self {
        self.cleanup_error = Some(message.into());
        self
    }

    pub fn with_prepare_panic(mut self) -> Self {
        self.panic_in_prepare = true;
        self
    }

    /// Report every `execute` to `in_flight`.
    pub fn with_in_flight(mut self, in_flight: Arc<InFlight>) -> Self {
        self.in_flight = Some(in_flight);
        self
    }

    /// Counters that outlive the connector.
    pub fn calls(&self) -> Arc<MockCalls> {
        Arc::clone(&self.calls)
    }

    async fn write_artifact(ctx: &RunContext, content: &str) -> Result<ArtifactResult, ConnectorError> {
        let mut result = ArtifactResult::new();
        let name = format!("{}.dat", ctx.job_name());
        let mut reader = content.as_bytes();
        let descriptor = ctx.sink.write(name.clone(), &name, &mut reader).await?;
        result.push(descriptor);
        result.count("items", 1);
        Ok(result)
    }

    async fn play(ctx: &RunContext, step: MockStep) -> Result<ArtifactResult, ConnectorError> {
        let mut step = step;
        loop {
            match step {
                MockStep::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    step = *inner;
                }
                MockStep::Succeed(content) => return Self::write_artifact(ctx, &content).await,
                MockStep::Retryable(message) => return Err(ConnectorError::Retryable(message)),
                MockStep::Fatal(message) => return Err(ConnectorError::Fatal(message)),
                MockStep::WriteThenFail(message) => {
                    Self::write_artifact(ctx, "partial").await?;
                    return Err(ConnectorError::Fatal(message));
                }
                MockStep::Panic(message) => panic!("{}", message),
            }
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    fn connector_type(&self) -> &str {
        Self::TYPE
    }

    async fn prepare(&mut self, _ctx: &RunContext) -> Result<(), ConnectorError> {
        self.calls.prepare.fetch_add(1, Ordering::SeqCst);
        if self.panic_in_prepare {
            panic!("mock prepare panic");
        }
        match &self.prepare_error {
            Some(message) => Err(ConnectorError::Configuration(message.clone())),
            None => Ok(()),
        }
    }

    async fn execute(&mut self, ctx: &RunContext) -> Result<ArtifactResult, ConnectorError> {
        self.calls.execute.fetch_add(1, Ordering::SeqCst);
        let step = self
            .script
            .pop_front()
            .unwrap_or_else(|| MockStep::Succeed("ok".to_string()));
        let _guard = self.in_flight.as_ref().map(InFlight::enter);
        Self::play(ctx, step).await
    }

    async fn cleanup(&mut self, _ctx: &RunContext) -> Result<(), ConnectorError> {
        self.calls.cleanup.fetch_add(1, Ordering::SeqCst);
        match &self.cleanup_error {
            Some(message) => Err(ConnectorError::Fatal(message.clone())),
            None => Ok(()),
        }
    }
}
