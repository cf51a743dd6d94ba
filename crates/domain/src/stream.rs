use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::error::Result;

/// A boxed async stream, used for model output.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// The stream a model-calling client hands to the pipeline. An `Err` item is
/// a transport failure and ends the run with an error.
pub type ModelStream = BoxStream<'static, Result<ModelEvent>>;

/// One output event from the model-calling client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelEvent {
    /// A raw text delta (plain modes) or one JSON message (tool protocol).
    Chunk { data: String },
    /// Usage reported by the outer model call.
    Usage { usage: Usage },
}

impl ModelEvent {
    pub fn chunk(data: impl Into<String>) -> Self {
        Self::Chunk { data: data.into() }
    }

    pub fn usage(total_tokens: u64) -> Self {
        Self::Usage {
            usage: Usage {
                total_tokens,
                ..Usage::default()
            },
        }
    }
}

/// Token usage for one model call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl Usage {
    /// Total units, falling back to input + output when the provider left
    /// the total unset.
    pub fn units(&self) -> u64 {
        if self.total_tokens > 0 {
            self.total_tokens
        } else {
            self.input_tokens + self.output_tokens
        }
    }
}
