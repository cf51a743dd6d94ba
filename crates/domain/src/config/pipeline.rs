use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Decoder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// Max characters of file content shown when a tool call is rendered.
    #[serde(default = "d_preview_chars")]
    pub preview_chars: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            preview_chars: d_preview_chars(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Usage settlement
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageConfig {
    /// Conversion rate from usage units to billing points (rounded up).
    #[serde(default = "d_tokens_per_point")]
    pub tokens_per_point: u64,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            tokens_per_point: d_tokens_per_point(),
        }
    }
}

impl UsageConfig {
    pub fn points_for(&self, tokens: u64) -> u64 {
        if tokens == 0 {
            return 0;
        }
        tokens.div_ceil(self.tokens_per_point.max(1))
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_preview_chars() -> usize {
    500
}
fn d_tokens_per_point() -> u64 {
    1000
}
