use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::{Future, Stream};
use serde::Deserialize;
use serde_json::Value;

use murmur_core::errors::AgentError;
use murmur_core::events::AgentEvent;

pub(crate) const SSE_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Event name the runtime sends after the last agent event.
const END_EVENT: &str = "end";
const ERROR_EVENT: &str = "error";

/// What a single SSE frame means for the agent event stream.
#[derive(Debug, PartialEq)]
pub enum Frame {
    Event(AgentEvent),
    Error(AgentError),
    End,
    /// Keep-alives, comments and frames we could not read.
    Skip,
}

/// Split one raw SSE frame into its event name and data. Multiple `data:`
/// lines are joined with `\n`. Frames without an event name are `message`.
pub fn split_frame(raw: &str) -> Option<(String, String)> {
    let mut event = None;
    let mut data: Vec<&str> = Vec::new();

    for line in raw.lines() {
        if line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => event = Some(value.to_string()),
            "data" => data.push(value),
            _ => {}
        }
    }

    if event.is_none() && data.is_empty() {
        return None;
    }
    Some((event.unwrap_or_else(|| "message".into()), data.join("\n")))
}

/// Interpret a runtime event by name.
pub fn parse_frame(event_type: &str, data: &str) -> Frame {
    match event_type {
        END_EVENT => Frame::End,
        ERROR_EVENT => match serde_json::from_str::<ErrorPayload>(data) {
            Ok(err) => Frame::Error(match err.status {
                Some(status) => AgentError::with_status(err.message, status),
                None => AgentError::new(err.message),
            }),
            Err(_) => Frame::Error(AgentError::new(data.to_string())),
        },
        "on_chat_model_stream" => match serde_json::from_str::<ModelStreamPayload>(data) {
            // Tool-selecting turns stream structured chunks; they carry no answer text.
            Ok(payload) => Frame::Event(AgentEvent::token(
                payload.chunk.content.as_str().unwrap_or_default(),
            )),
            Err(e) => skip(event_type, &e),
        },
        "on_chat_model_start" | "on_chat_model_end" => {
            let name = serde_json::from_str::<NamedPayload>(data)
                .map(|p| p.name)
                .unwrap_or_default();
            Frame::Event(if event_type == "on_chat_model_start" {
                AgentEvent::ChatModelStart { name }
            } else {
                AgentEvent::ChatModelEnd { name }
            })
        }
        "on_tool_start" => match serde_json::from_str::<ToolPayload>(data) {
            Ok(p) => Frame::Event(AgentEvent::ToolStart {
                name: p.name,
                input: p.data.input,
            }),
            Err(e) => skip(event_type, &e),
        },
        "on_tool_end" => match serde_json::from_str::<ToolPayload>(data) {
            Ok(p) => Frame::Event(AgentEvent::ToolEnd {
                name: p.name,
                output: match p.data.output {
                    Value::String(s) => s,
                    Value::Null => String::new(),
                    other => other.to_string(),
                },
            }),
            Err(e) => skip(event_type, &e),
        },
        "" | "message" | "ping" => Frame::Skip,
        other => Frame::Event(AgentEvent::Other {
            event_type: other.to_string(),
        }),
    }
}

fn skip(event_type: &str, error: &serde_json::Error) -> Frame {
    tracing::debug!(event_type, error = %error, "unreadable agent event, skipping");
    Frame::Skip
}

#[derive(Deserialize)]
struct ModelStreamPayload {
    chunk: ChunkPayload,
}

#[derive(Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    content: Value,
}

#[derive(Deserialize)]
struct NamedPayload {
    #[serde(default)]
    name: String,
}

#[derive(Deserialize)]
struct ToolPayload {
    name: String,
    #[serde(default)]
    data: ToolData,
}

#[derive(Default, Deserialize)]
struct ToolData {
    #[serde(default)]
    input: Value,
    #[serde(default)]
    output: Value,
}

#[derive(Deserialize)]
struct ErrorPayload {
    message: String,
    status: Option<u16>,
}

/// Turns a response byte stream into agent events. Ends on the runtime's
/// `end` frame, at end of body, or after the first error.
pub(crate) struct SseEventStream {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
    buffer: Vec<u8>,
    pending: VecDeque<Result<AgentEvent, AgentError>>,
    finished: bool,
    idle_deadline: Pin<Box<tokio::time::Sleep>>,
    idle_duration: Duration,
}

impl SseEventStream {
    pub(crate) fn new(
        byte_stream: impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
    ) -> Self {
        Self::with_idle_timeout(byte_stream, SSE_IDLE_TIMEOUT)
    }

    pub(crate) fn with_idle_timeout(
        byte_stream: impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            inner: Box::pin(byte_stream),
            buffer: Vec::new(),
            pending: VecDeque::new(),
            finished: false,
            idle_deadline: Box::pin(tokio::time::sleep(idle_timeout)),
            idle_duration: idle_timeout,
        }
    }

    /// Move every complete frame out of the buffer. Frames are split on raw
    /// bytes so multi-byte characters cut by the network stay intact.
    fn drain_frames(&mut self) {
        while let Some(pos) = find_frame_end(&self.buffer) {
            let frame: Vec<u8> = self.buffer.drain(..pos.end).collect();
            self.push_frame(&frame[..pos.start]);
            if self.finished {
                return;
            }
        }
    }

    fn push_frame(&mut self, raw: &[u8]) {
        let text = String::from_utf8_lossy(raw);
        let Some((event_type, data)) = split_frame(&text) else {
            return;
        };
        match parse_frame(&event_type, &data) {
            Frame::Event(event) => self.pending.push_back(Ok(event)),
            Frame::Error(error) => {
                self.pending.push_back(Err(error));
                self.finished = true;
            }
            Frame::End => self.finished = true,
            Frame::Skip => {}
        }
    }
}

struct FrameEnd {
    start: usize,
    end: usize,
}

fn find_frame_end(buf: &[u8]) -> Option<FrameEnd> {
    let lf = buf.windows(2).position(|w| w == b"\n\n");
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n");
    match (lf, crlf) {
        (Some(a), Some(b)) if b < a => Some(FrameEnd { start: b, end: b + 4 }),
        (Some(a), _) => Some(FrameEnd { start: a, end: a + 2 }),
        (None, Some(b)) => Some(FrameEnd { start: b, end: b + 4 }),
        (None, None) => None,
    }
}

impl Stream for SseEventStream {
    type Item = Result<AgentEvent, AgentError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Poll::Ready(Some(item));
            }
            if self.finished {
                return Poll::Ready(None);
            }

            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    let deadline = tokio::time::Instant::now() + self.idle_duration;
                    self.idle_deadline.as_mut().reset(deadline);
                    self.buffer.extend_from_slice(&bytes);
                    self.drain_frames();
                }
                Poll::Ready(Some(Err(e))) => {
                    self.finished = true;
                    return Poll::Ready(Some(Err(AgentError::new(format!(
                        "agent stream interrupted: {e}"
                    )))));
                }
                Poll::Ready(None) => {
                    self.finished = true;
                    if !self.buffer.is_empty() {
                        let rest = std::mem::take(&mut self.buffer);
                        self.push_frame(&rest);
                    }
                }
                Poll::Pending => {
                    if self.idle_deadline.as_mut().poll(cx).is_ready() {
                        self.finished = true;
                        return Poll::Ready(Some(Err(AgentError::new(format!(
                            "agent stream idle for {}s",
                            self.idle_duration.as_secs()
                        )))));
                    }
                    return Poll::Pending;
                }
            }
        }
    }
}
