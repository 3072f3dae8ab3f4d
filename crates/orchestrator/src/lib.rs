//! The request-orchestration pipeline.
//!
//! A request flows through:
//!
//! 1. **Resolve** the target conversation and check ownership
//! 2. **Admit** it against the caller's sliding-window usage limits
//! 3. **Build context** from the stored history plus the new user turn
//! 4. **Dispatch** to the strategy registered under the operation name
//! 5. **Invoke** the upstream model with timeout and retry
//! 6. **Persist** the exchange and return an [`OperationResult`]
//!
//! [`OperationResult`]: parley_core::OperationResult

pub mod context;
pub mod facade;
pub mod limiter;
pub mod locks;
pub mod registry;
pub mod strategy;

pub use context::ContextBuilder;
pub use facade::Orchestrator;
pub use limiter::{Admission, AdmissionTicket, UsageLimiter, UsageSnapshot};
pub use locks::ConversationLocks;
pub use registry::StrategyRegistry;
pub use strategy::{Strategy, StrategyPayload, default_registry};
