use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::errors::AgentError;
use crate::events::AgentEvent;
use crate::messages::Message;
use crate::sources::Source;

/// Lazy, finite, non-restartable sequence of agent events. An `Err` item
/// means the run broke off upstream; nothing follows it.
pub type AgentEventStream = Pin<Box<dyn Stream<Item = Result<AgentEvent, AgentError>> + Send>>;

/// The external agent runtime. Implementations own reasoning and tool use;
/// callers only see its events or its final transcript.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    fn name(&self) -> &str;

    /// Start a run and observe it incrementally.
    async fn stream_events(&self, messages: &[Message]) -> Result<AgentEventStream, AgentError>;

    /// Run to completion and return every message the run produced,
    /// including tool-call and tool-result messages. The last message is the
    /// final answer.
    async fn invoke(&self, messages: &[Message]) -> Result<Vec<Message>, AgentError>;
}

/// Supplies citation sources for a response.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    async fn sources_for(&self, messages: &[Message]) -> Result<Vec<Source>, AgentError>;
}

/// Provider for deployments without retrieval.
pub struct NoSources;

#[async_trait]
impl SourceProvider for NoSources {
    async fn sources_for(&self, _messages: &[Message]) -> Result<Vec<Source>, AgentError> {
        Ok(Vec::new())
    }
}
