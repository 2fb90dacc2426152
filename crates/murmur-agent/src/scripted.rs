use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;

use murmur_core::agent::{AgentEventStream, AgentExecutor};
use murmur_core::errors::AgentError;
use murmur_core::events::AgentEvent;
use murmur_core::messages::{Message, Role, ToolCall};

/// One pre-programmed agent run.
#[derive(Clone, Debug)]
pub enum ScriptedRun {
    /// Stream these events, then end. `invoke` answers with their
    /// concatenated answer text.
    Events(Vec<AgentEvent>),
    /// Stream these events, then break off with the error.
    Interrupted(Vec<AgentEvent>, AgentError),
    /// Messages produced by the run, for `invoke`. Streaming replays the
    /// final message as a single token.
    Transcript(Vec<Message>),
    /// Fail the call itself.
    Error(AgentError),
    /// Wait, then resolve the inner run.
    Delay(Duration, Box<ScriptedRun>),
}

impl ScriptedRun {
    /// Answer streamed as the given chunks.
    pub fn tokens(chunks: &[&str]) -> Self {
        Self::Events(chunks.iter().map(|c| AgentEvent::token(*c)).collect())
    }

    /// One tool round trip per `(tool, args, observation)` followed by the answer.
    pub fn with_tools(tools: &[(&str, serde_json::Value, &str)], answer: &str) -> Self {
        let mut messages = Vec::with_capacity(tools.len() * 2 + 1);
        for (name, args, observation) in tools {
            messages.push(Message::tool_request(vec![ToolCall::new(*name, args.clone())]));
            messages.push(Message::tool(*observation));
        }
        messages.push(Message::assistant(answer));
        Self::Transcript(messages)
    }

    pub fn delayed(delay: Duration, inner: ScriptedRun) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Agent that replays pre-programmed runs in order, one per call.
pub struct ScriptedAgent {
    runs: Vec<ScriptedRun>,
    call_count: AtomicUsize,
}

impl ScriptedAgent {
    pub fn new(runs: Vec<ScriptedRun>) -> Self {
        Self {
            runs,
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Take the next run, sleeping through any delays around it.
    async fn next_run(&self) -> Result<Resolved<'_>, AgentError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        let mut current = self.runs.get(idx).ok_or_else(|| {
            AgentError::new(format!("ScriptedAgent: no run configured for call {idx}"))
        })?;
        loop {
            let resolved = match current {
                ScriptedRun::Events(events) => Resolved::Events(events, None),
                ScriptedRun::Interrupted(events, error) => Resolved::Events(events, Some(error)),
                ScriptedRun::Transcript(messages) => Resolved::Transcript(messages),
                ScriptedRun::Error(error) => Resolved::Error(error),
                ScriptedRun::Delay(duration, inner) => {
                    tokio::time::sleep(*duration).await;
                    current = inner;
                    continue;
                }
            };
            return Ok(resolved);
        }
    }
}

enum Resolved<'a> {
    Events(&'a [AgentEvent], Option<&'a AgentError>),
    Transcript(&'a [Message]),
    Error(&'a AgentError),
}

#[async_trait]
impl AgentExecutor for ScriptedAgent {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream_events(&self, _messages: &[Message]) -> Result<AgentEventStream, AgentError> {
        let items: Vec<Result<AgentEvent, AgentError>> = match self.next_run().await? {
            Resolved::Events(events, error) => events
                .iter()
                .cloned()
                .map(Ok)
                .chain(error.cloned().map(Err))
                .collect(),
            Resolved::Transcript(messages) => messages
                .last()
                .map(|m| Ok(AgentEvent::token(m.content.clone())))
                .into_iter()
                .collect(),
            Resolved::Error(error) => return Err(error.clone()),
        };
        Ok(Box::pin(stream::iter(items)))
    }

    async fn invoke(&self, messages: &[Message]) -> Result<Vec<Message>, AgentError> {
        let produced = match self.next_run().await? {
            Resolved::Events(_, Some(error)) | Resolved::Error(error) => return Err(error.clone()),
            Resolved::Events(events, None) => vec![Message::assistant(answer_of(events))],
            Resolved::Transcript(produced) => produced.to_vec(),
        };
        // Runtimes return the input conversation followed by what the run added.
        Ok(messages
            .iter()
            .filter(|m| m.role != Role::System)
            .cloned()
            .chain(produced)
            .collect())
    }
}

fn answer_of(events: &[AgentEvent]) -> String {
    events.iter().filter_map(AgentEvent::answer_text).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn streams_scripted_tokens() {
        let agent = ScriptedAgent::new(vec![ScriptedRun::tokens(&["X", " is", " Y."])]);
        let stream = agent.stream_events(&[Message::user("What is X?")]).await.unwrap();
        let events: Vec<_> = stream.collect().await;
        assert_eq!(events.len(), 3);
        assert_eq!(events[2], Ok(AgentEvent::token(" Y.")));
        assert_eq!(agent.call_count(), 1);
    }

    #[tokio::test]
    async fn interrupted_run_ends_with_error() {
        let agent = ScriptedAgent::new(vec![ScriptedRun::Interrupted(
            vec![AgentEvent::token("par")],
            AgentError::new("connection reset"),
        )]);
        let events: Vec<_> = agent.stream_events(&[]).await.unwrap().collect().await;
        assert_eq!(events.len(), 2);
        assert!(events[1].is_err());
    }

    #[tokio::test]
    async fn invoke_prefixes_input_conversation() {
        let agent = ScriptedAgent::new(vec![ScriptedRun::with_tools(
            &[("search", json!({"query": "X"}), "X is Y")],
            "X is Y.",
        )]);
        let messages = agent.invoke(&[Message::user("What is X?")]).await.unwrap();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].content, "What is X?");
        assert!(messages[1].has_tool_calls());
        assert_eq!(messages[2].role, Role::Tool);
        assert_eq!(messages[3].content, "X is Y.");
    }

    #[tokio::test]
    async fn invoke_on_token_run_concatenates() {
        let agent = ScriptedAgent::new(vec![ScriptedRun::tokens(&["a", "", "b"])]);
        let messages = agent.invoke(&[]).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::Assistant);
        assert_eq!(messages[0].content, "ab");
    }

    #[tokio::test]
    async fn error_and_exhaustion() {
        let agent = ScriptedAgent::new(vec![ScriptedRun::Error(AgentError::with_status("nope", 503))]);
        let err = agent.invoke(&[]).await.unwrap_err();
        assert_eq!(err.status, Some(503));

        let err = agent.invoke(&[]).await.unwrap_err();
        assert!(err.message.contains("no run configured for call 1"));
    }

    #[tokio::test]
    async fn delayed_run_waits() {
        tokio::time::pause();
        let agent = ScriptedAgent::new(vec![ScriptedRun::delayed(
            Duration::from_secs(3),
            ScriptedRun::tokens(&["late"]),
        )]);
        let start = tokio::time::Instant::now();
        let events: Vec<_> = agent.stream_events(&[]).await.unwrap().collect().await;
        assert!(start.elapsed() >= Duration::from_secs(3));
        assert_eq!(events, vec![Ok(AgentEvent::token("late"))]);
    }
}
