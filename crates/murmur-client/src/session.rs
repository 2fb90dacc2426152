//! The client half of a chat exchange.
//!
//! A [`ChatSession`] owns the transcript. [`ChatSession::submit`] appends the
//! user's message and produces the request; the reply is then folded back in
//! by [`ChatSession::consume_stream`] (token by token, citations last) or
//! [`ChatSession::consume_full`] (steps replayed with a pause between each,
//! then the answer). While a reply is outstanding the session is pending and
//! further submits are ignored.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::broadcast;
use tracing::{debug, instrument, warn};

use murmur_core::ids::{MessageId, SessionId, ThreadId};
use murmur_core::messages::Message;
use murmur_core::sources::{Source, SourceAttachment};
use murmur_core::steps::{derive_steps, Step};
use murmur_core::transcript::Transcript;
use murmur_core::wire::{ChatRequest, FullResponse};

use crate::branch;
use crate::error::ClientError;
use crate::pacer::{paced, Pacer, RandomPacer};
use crate::threads::{ThreadStore, DEFAULT_THREAD_ID};
use crate::transport::{ChatReply, ChatTransport, StreamReply};

const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// Render signals for a presentation layer.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionUpdate {
    UserMessage(Message),
    AssistantStarted { id: MessageId },
    Token { id: MessageId, text: String },
    Step { id: MessageId, step: Step },
    AssistantMessage(Message),
    Sources {
        index: String,
        message_id: MessageId,
        sources: Vec<Source>,
    },
    Failed { error: ClientError },
    Idle,
}

/// Point-in-time copy of the session state.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionSnapshot {
    pub transcript: Transcript,
    pub sources: SourceAttachment,
    pub pending: bool,
}

pub struct ChatSession {
    id: SessionId,
    transcript: Transcript,
    sources: SourceAttachment,
    /// Sources keyed by the assistant message they arrived with.
    anchored: HashMap<MessageId, Vec<Source>>,
    pending: bool,
    show_intermediate_steps: bool,
    transport: Arc<dyn ChatTransport>,
    pacer: Arc<dyn Pacer>,
    threads: Arc<ThreadStore>,
    updates: broadcast::Sender<SessionUpdate>,
}

impl ChatSession {
    pub fn new(transport: Arc<dyn ChatTransport>) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            id: SessionId::new(),
            transcript: Transcript::new(),
            sources: SourceAttachment::new(),
            anchored: HashMap::new(),
            pending: false,
            show_intermediate_steps: false,
            transport,
            pacer: Arc::new(RandomPacer::default()),
            threads: Arc::new(ThreadStore::new()),
            updates,
        }
    }

    pub fn with_pacer(mut self, pacer: Arc<dyn Pacer>) -> Self {
        self.pacer = pacer;
        self
    }

    pub fn with_threads(mut self, threads: Arc<ThreadStore>) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_show_intermediate_steps(mut self, on: bool) -> Self {
        self.show_intermediate_steps = on;
        self
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.updates.subscribe()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn sources(&self) -> &SourceAttachment {
        &self.sources
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn show_intermediate_steps(&self) -> bool {
        self.show_intermediate_steps
    }

    pub fn threads(&self) -> &Arc<ThreadStore> {
        &self.threads
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            transcript: self.transcript.clone(),
            sources: self.sources.clone(),
            pending: self.pending,
        }
    }

    /// Switch between streamed answers and step replay. Not allowed while a
    /// reply is outstanding.
    pub fn set_show_intermediate_steps(&mut self, on: bool) -> Result<(), ClientError> {
        if self.pending {
            return Err(ClientError::Busy);
        }
        self.show_intermediate_steps = on;
        Ok(())
    }

    fn emit(&self, update: SessionUpdate) {
        // No subscribers is fine.
        let _ = self.updates.send(update);
    }

    fn settle(&mut self) {
        self.pending = false;
        self.emit(SessionUpdate::Idle);
    }

    fn fail(&mut self, error: ClientError) -> ClientError {
        warn!(session_id = %self.id, error = %error, error_kind = error.error_kind(), "chat exchange failed");
        self.emit(SessionUpdate::Failed {
            error: error.clone(),
        });
        self.settle();
        error
    }

    /// Append the user's message and build the request for the whole
    /// transcript. `None` while a reply is pending; nothing changes then.
    pub fn submit(&mut self, text: impl Into<String>) -> Option<ChatRequest> {
        if self.pending {
            debug!(session_id = %self.id, "submit ignored while a reply is pending");
            return None;
        }
        let message = self.transcript.push_user(text).clone();
        self.pending = true;
        self.emit(SessionUpdate::UserMessage(message));

        let messages = self.transcript.messages().to_vec();
        Some(if self.show_intermediate_steps {
            ChatRequest::with_steps(messages)
        } else {
            ChatRequest::streaming(messages)
        })
    }

    /// Fold a streamed reply into the transcript: one assistant message grows
    /// chunk by chunk, then the side channel's sources are merged.
    ///
    /// A body error keeps the partial text, merges no sources and is returned.
    #[instrument(skip_all, fields(session_id = %self.id))]
    pub async fn consume_stream(&mut self, reply: StreamReply) -> Result<MessageId, ClientError> {
        let StreamReply {
            side_channel,
            mut chunks,
        } = reply;

        let id = self.transcript.push_assistant("").id.clone();
        self.emit(SessionUpdate::AssistantStarted { id: id.clone() });

        let mut received = 0usize;
        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(text) => {
                    self.transcript.append_to(&id, &text);
                    received += 1;
                    self.emit(SessionUpdate::Token {
                        id: id.clone(),
                        text,
                    });
                }
                Err(e) => return Err(self.fail(e)),
            }
        }
        debug!(chunks = received, "stream finished");

        if let Some((index, sources)) = side_channel {
            self.sources.merge(index.clone(), sources.clone());
            self.anchored.insert(id.clone(), sources.clone());
            self.emit(SessionUpdate::Sources {
                index,
                message_id: id.clone(),
                sources,
            });
        }
        if let Some(message) = self.transcript.get(&id).cloned() {
            self.emit(SessionUpdate::AssistantMessage(message));
        }
        self.settle();
        Ok(id)
    }

    /// Fold a full-mode reply into the transcript: each step is appended as a
    /// step record with a pacer pause after it, then the final answer.
    ///
    /// An empty reply appends nothing and returns `None`.
    #[instrument(skip_all, fields(session_id = %self.id))]
    pub async fn consume_full(&mut self, reply: FullResponse) -> Option<MessageId> {
        let Some(last) = reply.messages.last() else {
            warn!("full response carried no messages");
            self.settle();
            return None;
        };
        let answer = last.content.clone();
        let steps = reply
            .steps
            .unwrap_or_else(|| derive_steps(&reply.messages));
        debug!(steps = steps.len(), "replaying steps");

        let mut replay = Box::pin(paced(steps, Arc::clone(&self.pacer)));
        while let Some(step) = replay.next().await {
            let id = self.transcript.push_step(&step).id.clone();
            self.emit(SessionUpdate::Step { id, step });
        }

        let message = self.transcript.push_assistant(answer).clone();
        let id = message.id.clone();
        self.emit(SessionUpdate::AssistantMessage(message));
        self.settle();
        Some(id)
    }

    /// Submit, send and consume in one go. Returns the id of the appended
    /// assistant message.
    pub async fn send(&mut self, text: impl Into<String>) -> Result<Option<MessageId>, ClientError> {
        let Some(request) = self.submit(text) else {
            return Err(ClientError::Busy);
        };

        let reply = match self.transport.send(&request).await {
            Ok(reply) => reply,
            Err(e) => return Err(self.fail(e)),
        };
        match reply {
            ChatReply::Stream(stream) => self.consume_stream(stream).await.map(Some),
            ChatReply::Full(full) => Ok(self.consume_full(full).await),
        }
    }

    /// Sources for a message, resolved through the reverse index at the
    /// current transcript length. Indices shift as the transcript grows, so
    /// this only finds sources for the newest reply.
    pub fn sources_for(&self, message_id: &MessageId) -> Option<&[Source]> {
        let position = self.transcript.position(message_id)?;
        self.sources.for_display(self.transcript.len(), position)
    }

    /// Sources recorded for the assistant message they arrived with.
    pub fn anchored_sources(&self, message_id: &MessageId) -> Option<&[Source]> {
        self.anchored.get(message_id).map(Vec::as_slice)
    }

    /// Open a thread on an assistant message, keyed by that message's id.
    pub fn branch_from(&self, message_id: &MessageId, title: impl Into<String>) -> ThreadId {
        let thread_id = ThreadId::from(message_id);
        self.threads.add_thread(thread_id.clone(), title);
        thread_id
    }

    /// Point the single default thread at `message_id`, replacing whatever it
    /// held before.
    pub fn open_default_thread(&self, message_id: &MessageId, title: impl Into<String>) -> ThreadId {
        let thread_id = ThreadId::from_raw(DEFAULT_THREAD_ID);
        self.threads.add_thread(thread_id.clone(), title);
        self.threads.set_anchor(&thread_id, message_id.clone());
        thread_id
    }

    pub fn thread_view(&self, thread_id: &ThreadId) -> Vec<Message> {
        branch::thread_view(self.transcript.messages(), &self.threads, thread_id)
    }
}
