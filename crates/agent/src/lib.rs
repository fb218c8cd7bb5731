//! The Cortex turn loop.
//!
//! A turn follows a **Answer → Scan → Act → Decide** cycle:
//!
//! 1. **Receive** a user message and append it to the conversation
//! 2. **Build context** (persona + tool catalogue + retrieved documents)
//! 3. **Stream** the model's initial answer to the client
//! 4. **Scan** the answer for embedded tool calls and run the new ones
//! 5. **Decide**: ask the model silently whether more tools are needed,
//!    looping back to step 4 until nothing new appears or the cap is hit
//! 6. **Finalize**: if any tool ran, stream a consolidated answer
//!
//! One turn runs at a time per assistant; a stop flag ends it between
//! chunks or between tools.

pub mod assistant;
pub mod cortex;
pub mod extract;
pub mod prompts;
pub mod relay;
pub mod stream_event;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use assistant::Assistant;
pub use cortex::{Cortex, DEFAULT_MAX_ITERATIONS, Phase, TurnContext, TurnOutcome};
pub use extract::{ToolCallExtractor, extract_tool_calls};
pub use relay::{RelayOutcome, StreamRelay};
pub use stream_event::{AgentStreamEvent, ToolCallReport, TurnSummary};
