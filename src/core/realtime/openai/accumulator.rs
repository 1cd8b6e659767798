//! Per-response reassembly of streamed output.
//!
//! The receive loop owns one [`ResponseAccumulator`] and feeds it deltas in
//! arrival order. When a response finishes, the accumulator yields the full
//! text and every tool call of the turn, then resets for the next response.

use serde::Serialize;

use crate::config::pricing::CostInfo;
use crate::core::realtime::base::ToolCall;

/// Arguments value the server uses before any delta has arrived.
const EMPTY_ARGUMENTS: &str = "{}";

#[derive(Debug, Clone)]
struct ToolCallSlot {
    id: String,
    name: String,
    arguments: String,
    output_index: Option<u32>,
    /// Set once a delta has been applied, so `{}` from a delta is kept.
    received_delta: bool,
    completed: bool,
}

impl ToolCallSlot {
    fn new(id: String, output_index: Option<u32>) -> Self {
        Self {
            id,
            name: String::new(),
            arguments: String::new(),
            output_index,
            received_delta: false,
            completed: false,
        }
    }

    fn append(&mut self, delta: &str) {
        if !self.received_delta && (self.arguments.is_empty() || self.arguments == EMPTY_ARGUMENTS)
        {
            self.arguments.clear();
        }
        self.arguments.push_str(delta);
        self.received_delta = true;
    }

    fn to_tool_call(&self) -> ToolCall {
        ToolCall {
            id: self.id.clone(),
            name: self.name.clone(),
            arguments: if self.arguments.is_empty() {
                EMPTY_ARGUMENTS.to_string()
            } else {
                self.arguments.clone()
            },
        }
    }
}

/// Streaming state of the response currently being generated.
#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    response_id: Option<String>,
    text: String,
    transcript: String,
    audio_bytes: usize,
    tool_calls: Vec<ToolCallSlot>,
}

impl ResponseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new response, discarding anything left from the previous one.
    pub fn begin_response(&mut self, response_id: &str) {
        self.reset();
        if !response_id.is_empty() {
            self.response_id = Some(response_id.to_string());
        }
    }

    pub fn response_id(&self) -> Option<&str> {
        self.response_id.as_deref()
    }

    pub fn push_text(&mut self, delta: &str) {
        self.text.push_str(delta);
    }

    pub fn push_transcript(&mut self, delta: &str) {
        self.transcript.push_str(delta);
    }

    pub fn record_audio(&mut self, len: usize) {
        self.audio_bytes += len;
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    pub fn audio_bytes(&self) -> usize {
        self.audio_bytes
    }

    /// Text of the response: the text output, or the audio transcript for
    /// audio-only responses.
    pub fn content(&self) -> Option<String> {
        if !self.text.is_empty() {
            Some(self.text.clone())
        } else if !self.transcript.is_empty() {
            Some(self.transcript.clone())
        } else {
            None
        }
    }

    fn slot_index(&self, call_id: &str, output_index: Option<u32>) -> Option<usize> {
        if !call_id.is_empty() {
            if let Some(pos) = self.tool_calls.iter().position(|s| s.id == call_id) {
                return Some(pos);
            }
        }
        let output_index = output_index?;
        self.tool_calls.iter().position(|s| {
            s.output_index == Some(output_index) && (call_id.is_empty() || s.id.starts_with("call_idx_"))
        })
    }

    fn slot_mut(&mut self, call_id: &str, output_index: Option<u32>) -> &mut ToolCallSlot {
        let pos = match self.slot_index(call_id, output_index) {
            Some(pos) => {
                let slot = &mut self.tool_calls[pos];
                // A real id replaces one synthesized from the output index.
                if !call_id.is_empty() && slot.id != call_id {
                    slot.id = call_id.to_string();
                }
                pos
            }
            None => {
                let id = if call_id.is_empty() {
                    format!("call_idx_{}", output_index.unwrap_or(self.tool_calls.len() as u32))
                } else {
                    call_id.to_string()
                };
                self.tool_calls.push(ToolCallSlot::new(id, output_index));
                self.tool_calls.len() - 1
            }
        };
        &mut self.tool_calls[pos]
    }

    /// Reserve a slot for a function call announced by `output_item.added`.
    ///
    /// A later name for the same call attaches to this slot.
    pub fn begin_tool_call(
        &mut self,
        call_id: &str,
        name: Option<&str>,
        output_index: u32,
        arguments: Option<&str>,
    ) {
        let slot = self.slot_mut(call_id, Some(output_index));
        if let Some(name) = name.filter(|n| !n.is_empty()) {
            slot.name = name.to_string();
        }
        if !slot.received_delta {
            if let Some(arguments) = arguments {
                slot.arguments = arguments.to_string();
            }
        }
    }

    /// Apply one `function_call_arguments.delta`.
    pub fn append_tool_arguments(&mut self, call_id: &str, output_index: u32, delta: &str) {
        self.slot_mut(call_id, Some(output_index)).append(delta);
    }

    /// Finish a tool call and return it.
    ///
    /// The concatenated deltas are authoritative. `arguments` from the done
    /// event is only used when no delta arrived.
    pub fn complete_tool_call(
        &mut self,
        call_id: &str,
        output_index: u32,
        name: Option<&str>,
        arguments: &str,
    ) -> ToolCall {
        let slot = self.slot_mut(call_id, Some(output_index));
        if let Some(name) = name.filter(|n| !n.is_empty()) {
            slot.name = name.to_string();
        }
        if !slot.received_delta && !arguments.is_empty() {
            slot.arguments = arguments.to_string();
        } else if slot.received_delta && !arguments.is_empty() && slot.arguments != arguments {
            tracing::debug!(
                "Tool call {} arguments differ from done payload, keeping streamed value",
                slot.id
            );
        }
        slot.completed = true;
        slot.to_tool_call()
    }

    /// Every tool call seen in this response, in slot order.
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.tool_calls.iter().map(ToolCallSlot::to_tool_call).collect()
    }

    /// Tool calls whose `done` event has not arrived yet.
    pub fn pending_tool_calls(&self) -> usize {
        self.tool_calls.iter().filter(|s| !s.completed).count()
    }

    pub fn reset(&mut self) {
        self.response_id = None;
        self.text.clear();
        self.transcript.clear();
        self.audio_bytes = 0;
        self.tool_calls.clear();
    }
}

/// Cumulative usage over the lifetime of a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageTotals {
    /// Responses that reported usage
    pub responses: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cached_tokens: u64,
    pub total_cost_usd: f64,
}

impl UsageTotals {
    pub fn add(&mut self, cost: &CostInfo) {
        self.responses += 1;
        self.input_tokens += u64::from(cost.input_tokens);
        self.output_tokens += u64::from(cost.output_tokens);
        self.cached_tokens += u64::from(cost.cached_tokens);
        self.total_cost_usd += cost.total_cost_usd;
    }
}
