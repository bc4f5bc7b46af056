//! # promptly-llm: resilient LLM invocation
//!
//! Turns an unreliable text-generation backend into a dependable capability:
//!   - **Retry engine** with exponential backoff, jitter and a total budget
//!   - **Error classification** of provider failures into a stable taxonomy
//!   - **Cancellation** that merges a caller token with a per-call timeout
//!   - **Structured output** recovery with one strict-JSON re-prompt
//!   - **Provider adapters** for OpenAI, Anthropic and Google
//!
//! # Architecture
//!
//! ```text
//! tool handler
//!   -> Invoker::complete / request_structured / refine_cached
//!        -> ResultCache (refinements only)
//!        -> RetryEngine::execute   (attempts, backoff, budget, token)
//!             -> TextBackend::generate_text
//!             -> classify(raw failure)
//!        -> TelemetryBus (one event per invocation)
//! ```

pub mod cancel;
pub mod classify;
pub mod client;
pub mod error;
pub mod extract;
pub mod invoker;
pub mod retry;
pub mod structured;
pub mod types;

pub use cancel::{CancelReason, EffectiveToken, compose};
pub use classify::classify;
pub use client::{CallOptions, TextBackend, build_backend};
pub use error::{BackendError, ClassifiedError, ErrorReport, LlmError};
pub use invoker::{Invoker, Refinement};
pub use retry::RetryEngine;
pub use structured::deserialize_into;
pub use types::{Completion, InvocationRequest, Structured, StructuredOptions};
