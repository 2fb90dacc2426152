//! Turns an agent run into what the client consumes: a plain text stream of
//! answer tokens, or the finished transcript with its intermediate steps.

use std::pin::Pin;

use futures::{Stream, StreamExt};
use tracing::{debug, instrument, trace, warn};

use murmur_core::agent::{AgentEventStream, AgentExecutor};
use murmur_core::errors::AgentError;
use murmur_core::messages::Message;
use murmur_core::steps::derive_steps;
use murmur_core::wire::FullResponse;

pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, AgentError>> + Send>>;

/// Keep only non-empty model tokens. Tool, chain and model lifecycle events
/// are dropped; an upstream error is passed through and ends the stream.
pub fn text_stream(events: AgentEventStream) -> TextStream {
    let mut failed = false;
    let stream = events
        .take_while(move |item| {
            let keep = !failed;
            failed = item.is_err();
            futures::future::ready(keep)
        })
        .filter_map(|item| {
            let chunk = match item {
                Ok(event) => {
                    let text = event.answer_text().map(|text| Ok(text.to_owned()));
                    if text.is_none() {
                        trace!(event_type = event.event_type(), "event withheld from client");
                    }
                    text
                }
                Err(e) => {
                    warn!(error = %e, error_kind = e.error_kind(), "agent stream broke off");
                    Some(Err(e))
                }
            };
            futures::future::ready(chunk)
        });
    Box::pin(stream)
}

/// Start a streaming run.
#[instrument(skip_all, fields(agent = agent.name(), messages = messages.len()))]
pub async fn run_stream(agent: &dyn AgentExecutor, messages: &[Message]) -> Result<TextStream, AgentError> {
    let events = agent.stream_events(messages).await?;
    Ok(text_stream(events))
}

/// Run to completion and derive the intermediate steps from the transcript.
#[instrument(skip_all, fields(agent = agent.name(), messages = messages.len()))]
pub async fn run_full(agent: &dyn AgentExecutor, messages: &[Message]) -> Result<FullResponse, AgentError> {
    let produced = agent.invoke(messages).await?;
    let steps = derive_steps(&produced);
    debug!(messages = produced.len(), steps = steps.len(), "agent run finished");
    Ok(FullResponse {
        messages: produced,
        steps: Some(steps),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_agent::{ScriptedAgent, ScriptedRun};
    use murmur_core::events::AgentEvent;
    use murmur_core::messages::{Role, ToolCall};
    use serde_json::json;

    fn events(items: Vec<Result<AgentEvent, AgentError>>) -> AgentEventStream {
        Box::pin(futures::stream::iter(items))
    }

    #[tokio::test]
    async fn forwards_only_non_empty_model_tokens() {
        let input = events(vec![
            Ok(AgentEvent::ChatModelStart { name: "m".into() }),
            Ok(AgentEvent::token("")),
            Ok(AgentEvent::ToolStart {
                name: "search".into(),
                input: json!({"q": "X"}),
            }),
            Ok(AgentEvent::ToolEnd {
                name: "search".into(),
                output: "X is Y".into(),
            }),
            Ok(AgentEvent::token("X")),
            Ok(AgentEvent::Other {
                event_type: "on_chain_end".into(),
            }),
            Ok(AgentEvent::token(" is")),
            Ok(AgentEvent::token(" Y.")),
            Ok(AgentEvent::ChatModelEnd { name: "m".into() }),
        ]);

        let chunks: Vec<String> = text_stream(input).map(|c| c.unwrap()).collect().await;
        assert_eq!(chunks, vec!["X", " is", " Y."]);
        assert_eq!(chunks.concat(), "X is Y.");
    }

    #[tokio::test]
    async fn upstream_error_ends_the_stream() {
        let input = events(vec![
            Ok(AgentEvent::token("par")),
            Err(AgentError::new("reset")),
            Ok(AgentEvent::token("never")),
        ]);
        let items: Vec<_> = text_stream(input).collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], Ok("par".to_string()));
        assert_eq!(items[1], Err(AgentError::new("reset")));
    }

    #[tokio::test]
    async fn empty_run_yields_nothing() {
        let chunks: Vec<_> = text_stream(events(vec![])).collect().await;
        assert!(chunks.is_empty());
    }

    #[tokio::test]
    async fn full_run_pairs_steps() {
        let agent = ScriptedAgent::new(vec![ScriptedRun::with_tools(
            &[
                ("search", json!({"q": "X"}), "X is Y"),
                ("lookup", json!({"id": 2}), "Y is Z"),
            ],
            "X is Y, which is Z.",
        )]);

        let resp = run_full(&agent, &[Message::user("What is X?")]).await.unwrap();
        let steps = resp.steps.as_deref().unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].action.as_ref().unwrap().name, "search");
        assert_eq!(steps[0].observation, "X is Y");
        assert_eq!(steps[1].action.as_ref().unwrap().args, json!({"id": 2}));
        assert_eq!(resp.final_message().unwrap().content, "X is Y, which is Z.");
        assert_eq!(resp.messages[0].role, Role::User);
    }

    #[tokio::test]
    async fn odd_tool_message_is_dropped() {
        let agent = ScriptedAgent::new(vec![ScriptedRun::Transcript(vec![
            Message::tool_request(vec![ToolCall::new("search", json!({}))]),
            Message::tool("found"),
            Message::tool_request(vec![ToolCall::new("search", json!({"page": 2}))]),
            Message::assistant("done"),
        ])]);
        let resp = run_full(&agent, &[]).await.unwrap();
        assert_eq!(resp.steps.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn collaborator_failure_propagates() {
        let agent = ScriptedAgent::new(vec![ScriptedRun::Error(AgentError::with_status("down", 502))]);
        let err = run_stream(&agent, &[]).await.err().unwrap();
        assert_eq!(err.status, Some(502));
    }
}
