//! Core runtime: run control, token accounting, decoding, extraction and
//! the generation loop that ties them together.
//!
//! Entry point: [`start_generation`] takes a model stream for one run and
//! returns a channel of [`GenerationEvent`]s for the client.

pub mod cancel;
pub mod decode;
pub mod extract;
pub mod generate;
pub mod usage;

pub use cancel::{RunControl, RunControlRegistry};
pub use generate::{start_generation, GenerationEvent, GenerationRequest};
pub use usage::{UsageLedger, UsageReport};
