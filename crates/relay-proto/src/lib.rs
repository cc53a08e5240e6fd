//! # relay-proto
//!
//! Shared types for the Relay workspace.
//!
//! This crate provides the vocabulary every other Relay crate speaks:
//! - [`Request`] and [`Response`], the logical shapes of a bridge call
//! - [`ApiError`], the normalized, redacted failure record
//! - [`ProviderId`] and [`AuthMode`] for provider selection
//! - [`TurnReport`] and [`TurnStatus`], the records the PTY turn parser emits

mod error;
mod provider;
mod request;
mod response;
mod turn;

pub use error::ApiError;
pub use provider::{AuthMode, ParseProviderError, ProviderId};
pub use request::{Body, Method, ParseMethodError, Request, RequestOptions};
pub use response::{JsonObject, Response};
pub use turn::{TurnReport, TurnStatus};
