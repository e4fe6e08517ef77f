//! Incremental decoding of streamed text replies.
//!
//! [`open_stream`] dispatches a call and hands back a [`ChunkStream`]: a
//! single-pass, lazy sequence of [`StreamChunk`]s. Each chunk carries only
//! the text that arrived since the previous one; the last successful item
//! is a chunk with `done = true`, after which the stream ends.
//!
//! # Framing
//!
//! | Framing | Increment | Completion signal |
//! |---------|-----------|-------------------|
//! | [`StreamFraming::Raw`] | the body bytes themselves | end of body |
//! | [`StreamFraming::EventStream`] | one `data:` event | `data: [DONE]` |
//!
//! Multi-byte UTF-8 sequences split across network reads are held back
//! until complete, so concatenating every `text` reproduces the message
//! exactly.
//!
//! # Resource release
//!
//! The response body lives inside the stream state. It is dropped as soon
//! as the stream completes or fails, and when the consumer drops the
//! [`ChunkStream`] early, which closes the connection.

use bytes::Bytes;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::dispatch::{CallOptions, RequestDispatcher};
use crate::error::DispatchError;

/// One increment of a streamed reply.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StreamChunk {
    pub text: String,
    pub done: bool,
}

impl StreamChunk {
    fn text(text: String) -> Self {
        Self { text, done: false }
    }

    fn done() -> Self {
        Self {
            text: String::new(),
            done: true,
        }
    }
}

/// How increments and completion are encoded in the response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamFraming {
    #[default]
    Raw,
    EventStream,
}

/// A lazy, single-pass sequence of decoded chunks.
pub struct ChunkStream {
    inner: BoxStream<'static, Result<StreamChunk, DispatchError>>,
}

impl ChunkStream {
    /// Drain the stream and concatenate every increment.
    ///
    /// Returns the first error if the stream fails before completing.
    pub async fn collect_text(mut self) -> Result<String, DispatchError> {
        let mut text = String::new();
        while let Some(chunk) = self.next().await {
            let chunk = chunk?;
            text.push_str(&chunk.text);
            if chunk.done {
                break;
            }
        }
        Ok(text)
    }
}

impl Stream for ChunkStream {
    type Item = Result<StreamChunk, DispatchError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for ChunkStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkStream").finish_non_exhaustive()
    }
}

/// Dispatch a `POST` whose reply is streamed, and decode it.
///
/// Failures before the body starts (auth, status, transport) are returned
/// directly; failures after that arrive as the stream's final item.
pub async fn open_stream<B>(
    dispatcher: &RequestDispatcher,
    path: &str,
    body: &B,
    options: CallOptions,
    framing: StreamFraming,
) -> Result<ChunkStream, DispatchError>
where
    B: Serialize + ?Sized,
{
    let response = dispatcher
        .send(Method::POST, path, Some(body), options)
        .await?;
    Ok(decode_stream(response.bytes_stream(), framing))
}

/// Decode any byte stream. Used by [`open_stream`]; exposed so other
/// transports can reuse the decoder.
pub fn decode_stream<S, E>(bytes: S, framing: StreamFraming) -> ChunkStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = DecodeState {
        body: Some(bytes.boxed()),
        utf8: Utf8Decoder::default(),
        events: match framing {
            StreamFraming::Raw => None,
            StreamFraming::EventStream => Some(EventDecoder::default()),
        },
        pending: VecDeque::new(),
        finished: false,
    };

    let inner = stream::unfold(state, |mut state| async move {
        state.next_item().await.map(|item| (item, state))
    });
    ChunkStream {
        inner: inner.boxed(),
    }
}

struct DecodeState<E> {
    body: Option<BoxStream<'static, Result<Bytes, E>>>,
    utf8: Utf8Decoder,
    events: Option<EventDecoder>,
    pending: VecDeque<StreamChunk>,
    finished: bool,
}

impl<E: Display> DecodeState<E> {
    async fn next_item(&mut self) -> Option<Result<StreamChunk, DispatchError>> {
        loop {
            if let Some(chunk) = self.pending.pop_front() {
                if chunk.done {
                    self.finish();
                }
                return Some(Ok(chunk));
            }
            if self.finished {
                return None;
            }

            let next = self.body.as_mut()?.next().await;
            let step = match next {
                Some(Ok(bytes)) => self.accept(&bytes),
                Some(Err(e)) => Err(DispatchError::Stream(format!("read failed: {}", e))),
                None => self.end_of_body(),
            };
            if let Err(e) = step {
                self.pending.clear();
                self.finish();
                return Some(Err(e));
            }
        }
    }

    fn accept(&mut self, bytes: &[u8]) -> Result<(), DispatchError> {
        let text = self.utf8.push(bytes)?;
        let Some(events) = self.events.as_mut() else {
            if !text.is_empty() {
                self.pending.push_back(StreamChunk::text(text));
            }
            return Ok(());
        };
        let decoded = events.push(&text);
        self.queue(decoded);
        Ok(())
    }

    fn queue(&mut self, events: Vec<Event>) {
        for event in events {
            match event {
                Event::Data(text) => self.pending.push_back(StreamChunk::text(text)),
                Event::Done => {
                    self.pending.push_back(StreamChunk::done());
                    break;
                }
            }
        }
    }

    fn end_of_body(&mut self) -> Result<(), DispatchError> {
        self.utf8.finish()?;
        let Some(events) = self.events.as_mut() else {
            self.pending.push_back(StreamChunk::done());
            return Ok(());
        };
        // The last event may end at EOF without its blank line.
        let tail = events.flush();
        let saw_done = events.saw_done();
        self.queue(tail);
        if saw_done {
            Ok(())
        } else {
            Err(DispatchError::Stream(
                "channel closed before completion marker".to_string(),
            ))
        }
    }

    fn finish(&mut self) {
        if self.body.take().is_some() {
            tracing::debug!("stream channel released");
        }
        self.finished = true;
    }
}

/// Incremental UTF-8 decoding with carry-over of incomplete sequences.
#[derive(Debug, Default)]
struct Utf8Decoder {
    carry: Vec<u8>,
}

impl Utf8Decoder {
    fn push(&mut self, bytes: &[u8]) -> Result<String, DispatchError> {
        self.carry.extend_from_slice(bytes);
        let valid = match std::str::from_utf8(&self.carry) {
            Ok(_) => self.carry.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(e) => {
                return Err(DispatchError::Stream(format!(
                    "invalid UTF-8 at byte {}",
                    e.valid_up_to()
                )))
            }
        };
        let rest = self.carry.split_off(valid);
        let complete = std::mem::replace(&mut self.carry, rest);
        String::from_utf8(complete).map_err(|e| DispatchError::Stream(e.to_string()))
    }

    fn finish(&mut self) -> Result<(), DispatchError> {
        if self.carry.is_empty() {
            Ok(())
        } else {
            Err(DispatchError::Stream(format!(
                "channel closed inside a {}-byte UTF-8 sequence",
                self.carry.len()
            )))
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Event {
    Data(String),
    Done,
}

/// `text/event-stream` parser: lines accumulate into an event which is
/// dispatched on a blank line.
#[derive(Debug, Default)]
struct EventDecoder {
    line: String,
    data: Vec<String>,
    done: bool,
}

impl EventDecoder {
    fn saw_done(&self) -> bool {
        self.done
    }

    /// Dispatch whatever is buffered once no more input will arrive.
    fn flush(&mut self) -> Vec<Event> {
        if self.done {
            return Vec::new();
        }
        let mut events = if self.line.is_empty() {
            Vec::new()
        } else {
            self.push("\n")
        };
        if !self.done {
            events.extend(self.dispatch());
        }
        events
    }

    fn push(&mut self, text: &str) -> Vec<Event> {
        let mut events = Vec::new();
        if self.done {
            return events;
        }
        self.line.push_str(text);

        while let Some(pos) = self.line.find('\n') {
            let raw: String = self.line.drain(..=pos).collect();
            let line = raw.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    let is_done = event == Event::Done;
                    events.push(event);
                    if is_done {
                        self.line.clear();
                        break;
                    }
                }
                continue;
            }
            if let Some(value) = line.strip_prefix("data:") {
                self.data
                    .push(value.strip_prefix(' ').unwrap_or(value).to_string());
            }
            // `event:`, `id:`, `retry:` and `:` comments carry no text.
        }
        events
    }

    fn dispatch(&mut self) -> Option<Event> {
        if self.data.is_empty() {
            return None;
        }
        let payload = self.data.join("\n");
        self.data.clear();

        if payload.trim() == "[DONE]" {
            self.done = true;
            return Some(Event::Done);
        }
        let text = event_text(&payload);
        if text.is_empty() {
            None
        } else {
            Some(Event::Data(text))
        }
    }
}

/// Extract the text increment carried by one event payload.
fn event_text(payload: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(payload) {
        Ok(serde_json::Value::String(s)) => s,
        Ok(value @ serde_json::Value::Object(_)) => value
            .pointer("/choices/0/delta/content")
            .or_else(|| value.get("content"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        _ => payload.to_string(),
    }
}
