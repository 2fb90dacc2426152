//! Views of the transcript seen from a thread.

use murmur_core::ids::{MessageId, ThreadId};
use murmur_core::messages::{Message, Role};

use crate::threads::ThreadStore;

/// The exchange a thread branches from: the assistant message with id
/// `anchor` and the user message right before it.
///
/// Empty when the anchor is not an assistant message in `transcript`, when it
/// is the first message, or when the message before it is not from the user.
pub fn select_branch(transcript: &[Message], anchor: &MessageId) -> Vec<Message> {
    let Some(pos) = transcript
        .iter()
        .position(|m| m.role == Role::Assistant && &m.id == anchor)
    else {
        return Vec::new();
    };
    if pos == 0 {
        return Vec::new();
    }

    let prev = &transcript[pos - 1];
    if prev.role != Role::User {
        return Vec::new();
    }
    vec![prev.clone(), transcript[pos].clone()]
}

/// Branch view for a stored thread. Unknown threads and dangling anchors
/// give an empty view.
pub fn thread_view(transcript: &[Message], store: &ThreadStore, thread_id: &ThreadId) -> Vec<Message> {
    match store.get(thread_id) {
        Some(thread) => select_branch(transcript, &thread.anchor()),
        None => Vec::new(),
    }
}
