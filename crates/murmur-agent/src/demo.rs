//! Self-contained collaborators for `murmur serve --demo` and tests.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;

use murmur_core::agent::{AgentEventStream, AgentExecutor, SourceProvider};
use murmur_core::errors::AgentError;
use murmur_core::events::AgentEvent;
use murmur_core::messages::{Message, Role, ToolCall};
use murmur_core::sources::Source;

const LOOKUP_TOOL: &str = "lookup";

/// Answers every question after one fake `lookup` tool call, streaming the
/// answer word by word.
#[derive(Clone, Debug, Default)]
pub struct DemoAgent {
    token_delay: Option<Duration>,
}

impl DemoAgent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pause between streamed words so the stream is visible in a terminal.
    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = Some(delay);
        self
    }

    fn question(messages: &[Message]) -> String {
        messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.trim().to_string())
            .unwrap_or_default()
    }

    fn observation(question: &str) -> String {
        format!("1 note mentions \"{question}\"")
    }

    fn answer(question: &str) -> String {
        if question.is_empty() {
            "Ask me something and I will look it up.".to_string()
        } else {
            format!("I looked up \"{question}\" and found one matching note.")
        }
    }
}

/// Split text into chunks that concatenate back to it exactly.
fn word_chunks(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut start = 0;
    for (i, c) in text.char_indices().skip(1) {
        if c == ' ' {
            chunks.push(text[start..i].to_string());
            start = i;
        }
    }
    if start < text.len() {
        chunks.push(text[start..].to_string());
    }
    chunks
}

#[async_trait]
impl AgentExecutor for DemoAgent {
    fn name(&self) -> &str {
        "demo"
    }

    async fn stream_events(&self, messages: &[Message]) -> Result<AgentEventStream, AgentError> {
        let question = Self::question(messages);
        let mut events = vec![
            AgentEvent::ChatModelStart { name: "demo".into() },
            // Tool-selecting turn: streams no answer text.
            AgentEvent::token(""),
            AgentEvent::ChatModelEnd { name: "demo".into() },
            AgentEvent::ToolStart {
                name: LOOKUP_TOOL.into(),
                input: json!({ "query": question }),
            },
            AgentEvent::ToolEnd {
                name: LOOKUP_TOOL.into(),
                output: Self::observation(&question),
            },
            AgentEvent::ChatModelStart { name: "demo".into() },
        ];
        events.extend(word_chunks(&Self::answer(&question)).into_iter().map(AgentEvent::token));
        events.push(AgentEvent::ChatModelEnd { name: "demo".into() });

        let delay = self.token_delay;
        let stream = futures::stream::iter(events).then(move |event| async move {
            if let (Some(delay), Some(_)) = (delay, event.answer_text()) {
                tokio::time::sleep(delay).await;
            }
            Ok::<_, AgentError>(event)
        });
        Ok(Box::pin(stream))
    }

    async fn invoke(&self, messages: &[Message]) -> Result<Vec<Message>, AgentError> {
        let question = Self::question(messages);
        let mut out: Vec<Message> = messages.to_vec();
        out.push(Message::tool_request(vec![ToolCall::new(
            LOOKUP_TOOL,
            json!({ "query": question }),
        )
        .with_id("call_0")]));
        out.push(Message::tool(Self::observation(&question)));
        out.push(Message::assistant(Self::answer(&question)));
        Ok(out)
    }
}

/// Returns the same sources for every response.
#[derive(Clone, Debug, Default)]
pub struct StaticSources {
    sources: Vec<Source>,
}

impl StaticSources {
    pub fn new(sources: Vec<Source>) -> Self {
        Self { sources }
    }

    /// A single demo citation.
    pub fn demo() -> Self {
        Self::new(vec![Source::new(
            "murmur streams answer tokens and sends citations in response headers.",
        )
        .with_lines(1, 3)])
    }
}

#[async_trait]
impl SourceProvider for StaticSources {
    async fn sources_for(&self, _messages: &[Message]) -> Result<Vec<Source>, AgentError> {
        Ok(self.sources.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_core::steps::derive_steps;

    #[test]
    fn chunks_concatenate_back() {
        let text = "I looked up \"X\" and found one matching note.";
        let chunks = word_chunks(text);
        assert_eq!(chunks[0], "I");
        assert_eq!(chunks[1], " looked");
        assert_eq!(chunks.concat(), text);
        assert!(word_chunks("").is_empty());
    }

    #[tokio::test]
    async fn stream_answer_matches_invoke_answer() {
        let agent = DemoAgent::new();
        let input = [Message::user("What is X?")];

        let events: Vec<_> = agent.stream_events(&input).await.unwrap().collect().await;
        let streamed: String = events
            .iter()
            .filter_map(|e| e.as_ref().ok().and_then(AgentEvent::answer_text))
            .collect();
        assert!(events.iter().any(|e| matches!(e, Ok(ev) if ev.is_tool_event())));

        let transcript = agent.invoke(&input).await.unwrap();
        assert_eq!(transcript.last().unwrap().content, streamed);
    }

    #[tokio::test]
    async fn invoke_yields_one_step() {
        let transcript = DemoAgent::new()
            .invoke(&[Message::user("What is X?")])
            .await
            .unwrap();
        let steps = derive_steps(&transcript);
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].action.as_ref().unwrap().name, "lookup");
        assert_eq!(steps[0].action.as_ref().unwrap().args["query"], "What is X?");
        assert!(steps[0].observation.contains("What is X?"));
    }

    #[tokio::test]
    async fn token_delay_paces_the_answer() {
        tokio::time::pause();
        let agent = DemoAgent::new().with_token_delay(Duration::from_millis(100));
        let start = tokio::time::Instant::now();
        let events: Vec<_> = agent
            .stream_events(&[Message::user("q")])
            .await
            .unwrap()
            .collect()
            .await;
        let tokens = events
            .iter()
            .filter(|e| matches!(e, Ok(ev) if ev.answer_text().is_some()))
            .count() as u32;
        assert!(start.elapsed() >= Duration::from_millis(100) * tokens);
    }

    #[tokio::test]
    async fn static_sources() {
        let sources = StaticSources::demo().sources_for(&[]).await.unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].lines().unwrap().from, 1);
    }
}
