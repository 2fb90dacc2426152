//! Intermediate steps: one tool call paired with the tool's reply.
//!
//! The agent alternates strictly between "assistant requests a tool" and
//! "tool answers", so pairing is positional over the tool-related
//! subsequence of a finished run. Every pair becomes a step, even one that
//! is out of phase (its first message carries no tool call, so the step has
//! no action). Only a trailing message without a partner is dropped.

use serde::{Deserialize, Serialize};

use crate::ids::MessageId;
use crate::messages::{Message, Role, ToolCall};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// First tool call of the pair's opening message; `null` when that
    /// message requested none.
    pub action: Option<ToolCall>,
    pub observation: String,
}

impl Step {
    /// Display-only system message carrying this step as JSON.
    pub fn to_record(&self, id: MessageId) -> Message {
        let content = serde_json::to_string(self).unwrap_or_default();
        Message::system(content).with_id(id)
    }

    /// Inverse of [`Step::to_record`]; `None` for ordinary system messages.
    pub fn from_record(message: &Message) -> Option<Self> {
        if message.role != Role::System {
            return None;
        }
        serde_json::from_str(&message.content).ok()
    }
}

/// Pair the tool-related messages of a completed run into steps.
pub fn derive_steps(messages: &[Message]) -> Vec<Step> {
    let related: Vec<&Message> = messages.iter().filter(|m| m.is_tool_related()).collect();

    if related.len() % 2 == 1 {
        tracing::debug!(
            tool_messages = related.len(),
            "dropping trailing unpaired tool message"
        );
    }

    related
        .chunks_exact(2)
        .map(|pair| {
            let (request, result) = (pair[0], pair[1]);
            let action = request.tool_calls.first().cloned();
            if action.is_none() {
                tracing::debug!(role = %request.role, "step pair opens without a tool call");
            }
            Step {
                action,
                observation: result.content.clone(),
            }
        })
        .collect()
}
