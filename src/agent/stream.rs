//! Decoding of streamed chat completions
//!
//! The completion endpoint answers `stream: true` requests with server-sent
//! events. [`SseDecoder`] turns the raw byte chunks into `data:` payloads and
//! [`ToolCallAccumulator`] folds the parsed deltas back into a [`Completion`].

use crate::agent::client::Completion;
use crate::agent::types::{AssistantToolCall, ToolCallDelta, Usage};

/// One decoded server-sent event line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseLine {
    /// Payload of a `data:` line
    Data(String),
    /// The `[DONE]` sentinel
    Done,
}

/// Incremental decoder for `data:` lines
///
/// Bytes are buffered until a full line is available, so chunks split in
/// the middle of a line (or of a UTF-8 sequence) decode correctly.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Create an empty decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes and return every complete line it finished
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseLine> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(line) = Self::decode_line(&raw) {
                lines.push(line);
            }
        }
        lines
    }

    /// Flush a trailing line that was not newline-terminated
    pub fn finish(&mut self) -> Option<SseLine> {
        if self.buffer.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.buffer);
        Self::decode_line(&raw)
    }

    fn decode_line(raw: &[u8]) -> Option<SseLine> {
        let text = String::from_utf8_lossy(raw);
        let line = text.trim();

        // Blank separators and `:` keep-alive comments carry nothing
        if line.is_empty() || line.starts_with(':') {
            return None;
        }

        let data = line.strip_prefix("data:")?.trim_start();
        if data == "[DONE]" {
            Some(SseLine::Done)
        } else {
            Some(SseLine::Data(data.to_string()))
        }
    }
}

#[derive(Debug)]
struct PartialToolCall {
    index: u32,
    id: Option<String>,
    name: String,
    arguments: String,
}

impl PartialToolCall {
    fn new(index: u32) -> Self {
        PartialToolCall {
            index,
            id: None,
            name: String::new(),
            arguments: String::new(),
        }
    }

    fn into_call(self) -> AssistantToolCall {
        let id = self.id.unwrap_or_else(|| format!("call_{}", self.index));
        AssistantToolCall::function(id, self.name, self.arguments)
    }
}

/// Reassembles a streamed completion
///
/// Tool-call deltas are grouped by `index`. The function name is overwritten
/// by each delta that carries one and argument fragments are concatenated.
/// A delta with a new index finishes the call in progress.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    content: String,
    current: Option<PartialToolCall>,
    finished: Vec<AssistantToolCall>,
    finish_reason: Option<String>,
    usage: Option<Usage>,
}

impl ToolCallAccumulator {
    /// Create an empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a content fragment
    pub fn push_content(&mut self, fragment: &str) {
        self.content.push_str(fragment);
    }

    /// Apply a tool-call delta
    ///
    /// Returns the previous call when this delta starts a new one.
    pub fn push_tool_delta(&mut self, delta: &ToolCallDelta) -> Option<AssistantToolCall> {
        let starts_new = self
            .current
            .as_ref()
            .is_some_and(|current| current.index != delta.index);
        let completed = if starts_new {
            self.current.take().map(PartialToolCall::into_call)
        } else {
            None
        };
        if let Some(ref call) = completed {
            self.finished.push(call.clone());
        }

        let current = self
            .current
            .get_or_insert_with(|| PartialToolCall::new(delta.index));

        if let Some(ref id) = delta.id {
            if !id.is_empty() {
                current.id = Some(id.clone());
            }
        }
        if let Some(ref function) = delta.function {
            if let Some(ref name) = function.name {
                if !name.is_empty() {
                    current.name = name.clone();
                }
            }
            if let Some(ref arguments) = function.arguments {
                current.arguments.push_str(arguments);
            }
        }

        completed
    }

    /// Record the finish reason reported by the endpoint
    pub fn set_finish_reason(&mut self, reason: impl Into<String>) {
        self.finish_reason = Some(reason.into());
    }

    /// Record the usage reported on the trailing chunk
    pub fn set_usage(&mut self, usage: Usage) {
        self.usage = Some(usage);
    }

    /// Finish the call in progress, if any
    pub fn flush_tool_call(&mut self) -> Option<AssistantToolCall> {
        let call = self.current.take().map(PartialToolCall::into_call)?;
        self.finished.push(call.clone());
        Some(call)
    }

    /// Consume the accumulator into the assembled completion
    pub fn finish(mut self) -> Completion {
        self.flush_tool_call();

        let content = self.content.trim();
        Completion {
            content: (!content.is_empty()).then(|| content.to_string()),
            tool_calls: self.finished,
            finish_reason: self.finish_reason,
            usage: self.usage,
        }
    }
}
