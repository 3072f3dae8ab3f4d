//! # Parley Core
//!
//! Domain types, collaborator traits, and error definitions for the parley
//! conversational-AI orchestration layer. This crate has **no runtime
//! dependencies**: it defines the model every other crate implements against.
//!
//! ## Collaborators
//!
//! The orchestration pipeline talks to three outside parties, each a trait here:
//! - [`Provider`]: the upstream model API
//! - [`ConversationStore`]: persistence for conversations and messages
//! - [`SearchProvider`]: external retrieval for search-backed operations

pub mod error;
pub mod message;
pub mod operation;
pub mod provider;
pub mod search;
pub mod store;

// Re-export key types at crate root for ergonomics
pub use error::{Error, FailureKind, ProviderError, RejectionReason, Result, SearchError, StoreError};
pub use message::{Conversation, ConversationId, ConversationStatus, ConversationUpdate, Message, Role, UserId};
pub use operation::{ModelParameters, OperationInput, OperationRequest, OperationResult, ResolvedParameters};
pub use provider::{Provider, ProviderRequest, ProviderResponse, Usage};
pub use search::{SearchProvider, SearchResult};
pub use store::{ConversationQuery, ConversationStore};
