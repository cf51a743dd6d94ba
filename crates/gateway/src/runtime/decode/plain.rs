use cm_domain::OutputMode;

use super::{StreamDecoder, FENCE};

const BLOCK_START: &str = "[CODE_BLOCK_START]";
const BLOCK_STREAM: &str = "[CODE_STREAM]";
const BLOCK_END: &str = "[CODE_BLOCK_END]";

/// Plain text with fenced code blocks. Every fence toggles the in-block
/// state: an opening fence is preceded by a start marker, a closing fence
/// is followed by an end marker, and fence-free chunks inside a block are
/// tagged as code stream.
#[derive(Debug, Default)]
pub struct PlainTextDecoder {
    in_block: bool,
    transcript: String,
}

impl PlainTextDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StreamDecoder for PlainTextDecoder {
    fn mode(&self) -> OutputMode {
        OutputMode::Html
    }

    fn decode(&mut self, chunk: &str) -> Option<String> {
        self.transcript.push_str(chunk);

        if !chunk.contains(FENCE) {
            if self.in_block {
                return Some(format!("{BLOCK_STREAM}{chunk}"));
            }
            return Some(chunk.to_owned());
        }

        let mut out = String::with_capacity(chunk.len() + 32);
        let mut segments = chunk.split(FENCE);
        out.push_str(segments.next().unwrap_or_default());
        for segment in segments {
            if self.in_block {
                out.push_str(FENCE);
                out.push_str(BLOCK_END);
            } else {
                out.push_str(BLOCK_START);
                out.push_str(FENCE);
            }
            self.in_block = !self.in_block;
            out.push_str(segment);
        }
        Some(out)
    }

    fn transcript(&self) -> &str {
        &self.transcript
    }
}
