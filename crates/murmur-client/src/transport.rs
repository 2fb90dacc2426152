use std::fmt::Display;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;
use reqwest::header::HeaderMap;
use reqwest::Client;

use murmur_core::side_channel;
use murmur_core::sources::Source;
use murmur_core::wire::{ChatRequest, ErrorBody, FullResponse, CHAT_PATH};

use crate::error::ClientError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub type TextChunks = Pin<Box<dyn Stream<Item = Result<String, ClientError>> + Send>>;

/// A streamed answer. The side channel arrives with the headers, before the
/// first chunk.
pub struct StreamReply {
    pub side_channel: Option<(String, Vec<Source>)>,
    pub chunks: TextChunks,
}

impl StreamReply {
    /// Reply built from ready-made chunks.
    pub fn from_chunks<I>(chunks: I, side_channel: Option<(String, Vec<Source>)>) -> Self
    where
        I: IntoIterator<Item = Result<String, ClientError>>,
        I::IntoIter: Send + 'static,
    {
        Self {
            side_channel,
            chunks: Box::pin(futures::stream::iter(chunks)),
        }
    }
}

impl std::fmt::Debug for StreamReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamReply")
            .field("side_channel", &self.side_channel)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum ChatReply {
    Stream(StreamReply),
    Full(FullResponse),
}

/// Delivers a chat request and hands back the server's reply.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send(&self, request: &ChatRequest) -> Result<ChatReply, ClientError>;
}

pub struct HttpTransport {
    client: Client,
    url: String,
}

impl HttpTransport {
    /// Transport posting to `{base_url}/api/chat`.
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        Self::with_path(base_url, CHAT_PATH)
    }

    pub fn with_path(base_url: &str, path: &str) -> Result<Self, ClientError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ClientError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: format!("{}{path}", base_url.trim_end_matches('/')),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn send(&self, request: &ChatRequest) -> Result<ChatReply, ClientError> {
        let resp = self.client.post(&self.url).json(request).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|b| b.error)
                .unwrap_or(body);
            return Err(ClientError::Server {
                status: status.as_u16(),
                message,
            });
        }

        if request.show_intermediate_steps {
            let full: FullResponse = resp
                .json()
                .await
                .map_err(|e| ClientError::Decode(e.to_string()))?;
            return Ok(ChatReply::Full(full));
        }

        let side_channel = read_side_channel(resp.headers());
        Ok(ChatReply::Stream(StreamReply {
            side_channel,
            chunks: Box::pin(Utf8Stream::new(resp.bytes_stream())),
        }))
    }
}

fn read_side_channel(headers: &HeaderMap) -> Option<(String, Vec<Source>)> {
    side_channel::decode(|name| headers.get(name).and_then(|v| v.to_str().ok()))
}

/// Incremental UTF-8 decoder. Bytes of a character split across chunks are
/// held back until the rest arrives.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    carry: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode as much of `carry + bytes` as forms complete characters.
    pub fn push(&mut self, bytes: &[u8]) -> Result<String, ClientError> {
        self.carry.extend_from_slice(bytes);
        match std::str::from_utf8(&self.carry) {
            Ok(text) => {
                let text = text.to_owned();
                self.carry.clear();
                Ok(text)
            }
            Err(e) if e.error_len().is_none() => {
                let valid = e.valid_up_to();
                let rest = self.carry.split_off(valid);
                let text = String::from_utf8(std::mem::replace(&mut self.carry, rest))
                    .map_err(|e| ClientError::Decode(e.to_string()))?;
                Ok(text)
            }
            Err(e) => Err(ClientError::Decode(format!("response body is not UTF-8: {e}"))),
        }
    }

    /// Fails if the body ended inside a character.
    pub fn finish(&mut self) -> Result<(), ClientError> {
        if self.carry.is_empty() {
            Ok(())
        } else {
            self.carry.clear();
            Err(ClientError::Decode("response body ended mid-character".into()))
        }
    }
}

pin_project! {
    /// Text chunks decoded from a response byte stream. Ends after the first
    /// error.
    pub struct Utf8Stream<S> {
        #[pin]
        inner: S,
        decoder: Utf8Decoder,
        done: bool,
    }
}

impl<S> Utf8Stream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            decoder: Utf8Decoder::new(),
            done: false,
        }
    }
}

impl<S, E> Stream for Utf8Stream<S>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    type Item = Result<String, ClientError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        loop {
            if *this.done {
                return Poll::Ready(None);
            }
            match ready!(this.inner.as_mut().poll_next(cx)) {
                Some(Ok(bytes)) => match this.decoder.push(&bytes) {
                    Ok(text) if text.is_empty() => continue,
                    Ok(text) => return Poll::Ready(Some(Ok(text))),
                    Err(e) => {
                        *this.done = true;
                        return Poll::Ready(Some(Err(e)));
                    }
                },
                Some(Err(e)) => {
                    *this.done = true;
                    return Poll::Ready(Some(Err(ClientError::Transport(format!(
                        "response body interrupted: {e}"
                    )))));
                }
                None => {
                    *this.done = true;
                    if let Err(e) = this.decoder.finish() {
                        return Poll::Ready(Some(Err(e)));
                    }
                }
            }
        }
    }
}
