//! Server-sent-events plumbing for the chat adapter.
//!
//! The chat endpoint streams its response as SSE: blank-line-separated
//! event blocks whose `data:` lines carry the JSON chunks we care about.
//! [`SseBuffer`] is an incremental parser (bytes in, payloads out) and
//! [`chat_event_stream`] turns a `reqwest::Response` plus a payload
//! parser into the `BoxStream` the [`ChatClient`](crate::ChatClient)
//! contract wants.

use vb_domain::error::Result;
use vb_domain::stream::{BoxStream, ChatEvent};

use crate::util::from_reqwest;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Incremental SSE parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Accumulates body chunks and yields the `data:` payload of every
/// completed event block. Chunk boundaries carry no meaning in SSE, so
/// an event may span several `feed` calls; whatever trails the last
/// blank line stays buffered.
pub(crate) struct SseBuffer {
    pending: String,
}

impl SseBuffer {
    pub(crate) fn new() -> Self {
        Self {
            pending: String::new(),
        }
    }

    /// Feed one body chunk, appending completed payloads to `out`.
    pub(crate) fn feed(&mut self, chunk: &[u8], out: &mut Vec<String>) {
        self.pending.push_str(&String::from_utf8_lossy(chunk));

        while let Some(end) = self.pending.find("\n\n") {
            let rest = self.pending.split_off(end + 2);
            let block = std::mem::replace(&mut self.pending, rest);
            collect_data_payloads(&block, out);
        }
    }

    /// The body closed; treat any buffered remainder as a final block
    /// even though its terminating blank line never arrived.
    pub(crate) fn finish(&mut self, out: &mut Vec<String>) {
        if !self.pending.trim().is_empty() {
            let tail = std::mem::take(&mut self.pending);
            collect_data_payloads(&tail, out);
        }
    }
}

/// Pull the payload out of each `data:` line of one event block.
/// `event:`, `id:`, and `retry:` lines don't concern the chat protocol.
fn collect_data_payloads(block: &str, out: &mut Vec<String>) {
    for line in block.lines() {
        if let Some(payload) = line.trim_start().strip_prefix("data:") {
            let payload = payload.trim();
            if !payload.is_empty() {
                out.push(payload.to_owned());
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response → event stream
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Turn an SSE response into a stream of chat events.
///
/// `parse` maps one `data:` payload to zero or more events; it is
/// `FnMut` because tool-call assembly needs state across payloads.
///
/// Termination rules:
/// - a transport error is yielded as the last item, nothing follows;
/// - when the body closes without the parser ever producing a
///   `Finished`, one is synthesized (reason `None`) so consumers always
///   see a terminal event on the happy path.
pub(crate) fn chat_event_stream<P>(
    response: reqwest::Response,
    mut parse: P,
) -> BoxStream<'static, Result<ChatEvent>>
where
    P: FnMut(&str) -> Vec<Result<ChatEvent>> + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut response = response;
        let mut buffer = SseBuffer::new();
        let mut payloads: Vec<String> = Vec::new();
        let mut terminated = false;

        'body: loop {
            match response.chunk().await {
                Ok(Some(bytes)) => buffer.feed(&bytes, &mut payloads),
                Ok(None) => {
                    buffer.finish(&mut payloads);
                    for payload in payloads.drain(..) {
                        for event in parse(&payload) {
                            terminated |= matches!(&event, Ok(ChatEvent::Finished { .. }));
                            yield event;
                        }
                    }
                    break 'body;
                }
                Err(e) => {
                    yield Err(from_reqwest("llm", e));
                    terminated = true;
                    break 'body;
                }
            }

            for payload in payloads.drain(..) {
                for event in parse(&payload) {
                    terminated |= matches!(&event, Ok(ChatEvent::Finished { .. }));
                    yield event;
                }
            }
        }

        if !terminated {
            yield Ok(ChatEvent::Finished { reason: None });
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_str(buffer: &mut SseBuffer, chunk: &str) -> Vec<String> {
        let mut out = Vec::new();
        buffer.feed(chunk.as_bytes(), &mut out);
        out
    }

    #[test]
    fn payload_split_across_chunks_assembles() {
        let mut buffer = SseBuffer::new();
        assert!(feed_str(&mut buffer, "data: {\"tok").is_empty());
        assert!(feed_str(&mut buffer, "en\":\"hi\"}\n").is_empty());
        let out = feed_str(&mut buffer, "\n");
        assert_eq!(out, vec![r#"{"token":"hi"}"#]);
    }

    #[test]
    fn one_chunk_may_carry_several_events() {
        let mut buffer = SseBuffer::new();
        let out = feed_str(&mut buffer, "data: a\n\ndata: b\n\ndata: c");
        assert_eq!(out, vec!["a", "b"]);

        // "c" has no terminating blank line yet.
        let out = feed_str(&mut buffer, "\n\n");
        assert_eq!(out, vec!["c"]);
    }

    #[test]
    fn metadata_lines_are_skipped() {
        let mut buffer = SseBuffer::new();
        let out = feed_str(
            &mut buffer,
            "event: chunk\nid: 7\nretry: 250\ndata: payload\n\n",
        );
        assert_eq!(out, vec!["payload"]);
    }

    #[test]
    fn payload_whitespace_is_trimmed() {
        let mut buffer = SseBuffer::new();
        let out = feed_str(&mut buffer, "data:    spaced out   \n\n");
        assert_eq!(out, vec!["spaced out"]);
    }

    #[test]
    fn empty_data_lines_yield_nothing() {
        let mut buffer = SseBuffer::new();
        assert!(feed_str(&mut buffer, "data:\n\ndata:   \n\n").is_empty());
    }

    #[test]
    fn done_sentinel_is_an_ordinary_payload() {
        let mut buffer = SseBuffer::new();
        let out = feed_str(&mut buffer, "data: [DONE]\n\n");
        assert_eq!(out, vec!["[DONE]"]);
    }

    #[test]
    fn finish_flushes_an_unterminated_tail() {
        let mut buffer = SseBuffer::new();
        assert!(feed_str(&mut buffer, "data: last words").is_empty());

        let mut out = Vec::new();
        buffer.finish(&mut out);
        assert_eq!(out, vec!["last words"]);

        // A second finish has nothing left to flush.
        out.clear();
        buffer.finish(&mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn finish_on_empty_buffer_is_quiet() {
        let mut buffer = SseBuffer::new();
        let mut out = Vec::new();
        buffer.finish(&mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn multi_line_block_collects_every_data_line() {
        let mut buffer = SseBuffer::new();
        let out = feed_str(&mut buffer, "data: first\ndata: second\n\n");
        assert_eq!(out, vec!["first", "second"]);
    }
}
