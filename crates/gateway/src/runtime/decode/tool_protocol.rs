use std::collections::HashSet;
use std::sync::Arc;

use cm_domain::OutputMode;
use cm_tools::tool::decode_arguments;
use cm_tools::ToolRegistry;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::StreamDecoder;

const DECODE_ERROR_MARKER: &str = "\n\n[error] message could not be decoded, continuing\n\n";

/// One message of the structured tool protocol, as produced by the model
/// client for tool-using runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamMessage {
    AiResponse {
        data: String,
    },
    /// A tool call being assembled. The same id repeats while arguments
    /// stream in.
    ToolRequest {
        id: String,
        name: String,
        #[serde(default)]
        arguments: Value,
    },
    ToolExecuted {
        id: String,
        name: String,
        #[serde(default)]
        arguments: Value,
        #[serde(default)]
        result: Value,
    },
}

pub struct ToolProtocolDecoder {
    tools: Arc<ToolRegistry>,
    preview_chars: usize,
    seen_requests: HashSet<String>,
    transcript: String,
}

impl ToolProtocolDecoder {
    pub fn new(tools: Arc<ToolRegistry>, preview_chars: usize) -> Self {
        Self {
            tools,
            preview_chars,
            seen_requests: HashSet::new(),
            transcript: String::new(),
        }
    }
}

impl StreamDecoder for ToolProtocolDecoder {
    fn mode(&self) -> OutputMode {
        OutputMode::VueProject
    }

    fn decode(&mut self, chunk: &str) -> Option<String> {
        let message = match serde_json::from_str::<StreamMessage>(chunk) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(error = %e, chunk, "undecodable tool-protocol message");
                self.transcript.push_str(DECODE_ERROR_MARKER);
                return Some(DECODE_ERROR_MARKER.to_owned());
            }
        };

        match message {
            StreamMessage::AiResponse { data } => {
                self.transcript.push_str(&data);
                Some(data)
            }
            StreamMessage::ToolRequest { id, name, .. } => {
                if self.seen_requests.insert(id) {
                    Some(self.tools.render_request(&name))
                } else {
                    None
                }
            }
            StreamMessage::ToolExecuted {
                id,
                name,
                arguments,
                ..
            } => {
                tracing::debug!(tool = %name, call_id = %id, "tool executed");
                let rendered = self.tools.render_executed(
                    &name,
                    &decode_arguments(&arguments),
                    self.preview_chars,
                );
                self.transcript.push_str(&rendered);
                Some(rendered)
            }
        }
    }

    fn transcript(&self) -> &str {
        &self.transcript
    }
}
