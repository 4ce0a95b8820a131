//! Server-sent events over HTTP.

use futures::future::{BoxFuture, FutureExt as _};
use futures::stream::{self, StreamExt as _};
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use tracing::{debug, warn};

use super::{MessageStream, Transport};
use crate::error::{Error, Result};

/// Longest line the decoder buffers before giving up on it.
pub const MAX_LINE_BYTES: usize = 1 << 20;

/// Incremental SSE frame decoder.
///
/// Feed it raw body chunks; it returns the `data` of every complete message.
/// Lines end in LF, CRLF or a bare CR. Comments and the `event`, `id` and
/// `retry` fields are ignored; multi-line `data` is joined with `\n`.
///
/// A line longer than [`MAX_LINE_BYTES`] is discarded together with the
/// message it belongs to.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
    // The previous chunk ended in CR; a leading LF belongs to it.
    skip_lf: bool,
    // Rest of an oversized line still to be dropped.
    skip_line: bool,
    // The pending message lost a line and must not be dispatched.
    truncated: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk and return the messages it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut chunk = chunk;
        if self.skip_lf && !chunk.is_empty() {
            self.skip_lf = false;
            chunk = chunk.strip_prefix(b"\n").unwrap_or(chunk);
        }
        self.buffer.extend_from_slice(chunk);

        let mut messages = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[start..]
            .iter()
            .position(|b| matches!(b, b'\r' | b'\n'))
        {
            let end = start + offset;
            let line = String::from_utf8_lossy(&self.buffer[start..end]).into_owned();
            start = end + 1;
            if self.buffer[end] == b'\r' {
                match self.buffer.get(start) {
                    Some(b'\n') => start += 1,
                    Some(_) => {}
                    None => self.skip_lf = true,
                }
            }

            if std::mem::take(&mut self.skip_line) {
                continue;
            }
            if let Some(message) = self.feed_line(&line) {
                messages.push(message);
            }
        }
        self.buffer.drain(..start);

        if self.buffer.len() > MAX_LINE_BYTES {
            if !self.skip_line {
                warn!(limit = MAX_LINE_BYTES, "dropping oversized event stream line");
            }
            self.buffer.clear();
            self.skip_line = true;
            self.truncated = true;
        }
        messages
    }

    fn feed_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            let message = std::mem::take(&mut self.data).join("\n");
            if std::mem::take(&mut self.truncated) {
                return None;
            }
            return (!message.is_empty()).then_some(message);
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            self.data.push(value.to_string());
        }
        None
    }
}

/// [`Transport`] that subscribes with an HTTP GET and decodes the body as
/// an SSE stream.
#[derive(Debug, Clone, Default)]
pub struct SseTransport {
    client: reqwest::Client,
}

impl SseTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Transport for SseTransport {
    fn open(&self, url: &str) -> BoxFuture<'static, Result<MessageStream>> {
        let client = self.client.clone();
        let url = url.to_string();

        async move {
            let response = client
                .get(&url)
                .header(ACCEPT, "text/event-stream")
                .header(CACHE_CONTROL, "no-cache")
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                return Err(Error::Http {
                    status: status.as_u16(),
                });
            }
            debug!(%url, "event stream opened");

            let mut decoder = SseDecoder::new();
            let messages = response
                .bytes_stream()
                .map(move |chunk| match chunk {
                    Ok(bytes) => decoder.push(&bytes).into_iter().map(Ok).collect::<Vec<_>>(),
                    Err(e) => vec![Err(Error::Transport(e))],
                })
                .flat_map(stream::iter);

            Ok(messages.boxed())
        }
        .boxed()
    }
}
