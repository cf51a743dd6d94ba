//! Output-mode decoders.
//!
//! A decoder consumes model output chunk by chunk, returns the markup to
//! forward to the client for each chunk (or `None` to forward nothing), and
//! accumulates the transcript that goes into chat history when the run
//! completes. One decoder instance serves exactly one run.

mod multi_file;
mod plain;
mod tool_protocol;

pub use multi_file::MultiFileDecoder;
pub use plain::PlainTextDecoder;
pub use tool_protocol::{StreamMessage, ToolProtocolDecoder};

use std::sync::Arc;

use cm_domain::OutputMode;
use cm_tools::ToolRegistry;

/// Fence that opens and closes a code block.
pub const FENCE: &str = "```";

pub trait StreamDecoder: Send {
    fn mode(&self) -> OutputMode;

    /// Decode one chunk. Chunks must be fed in arrival order.
    fn decode(&mut self, chunk: &str) -> Option<String>;

    /// Everything that belongs in chat history so far.
    fn transcript(&self) -> &str;
}

pub fn decoder_for(
    mode: OutputMode,
    tools: Arc<ToolRegistry>,
    preview_chars: usize,
) -> Box<dyn StreamDecoder> {
    match mode {
        OutputMode::Html => Box::new(PlainTextDecoder::new()),
        OutputMode::MultiFile => Box::new(MultiFileDecoder::new()),
        OutputMode::VueProject => Box::new(ToolProtocolDecoder::new(tools, preview_chars)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_matches_mode() {
        let tools = Arc::new(ToolRegistry::with_builtins());
        for mode in OutputMode::ALL {
            assert_eq!(decoder_for(mode, Arc::clone(&tools), 500).mode(), mode);
        }
    }
}
