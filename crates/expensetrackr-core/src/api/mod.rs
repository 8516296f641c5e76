//! REST API client module for the ExpenseTrackr auth service.
//!
//! This module provides the `ApiClient` for the login and register
//! endpoints. Requests authenticate with the bearer token held by the
//! session store; failures are normalized into `ApiError`.

pub mod client;
pub mod error;

pub use client::{ApiClient, ApiConfig, DEFAULT_REQUEST_TIMEOUT_SECS};
pub use error::{ApiError, AuthOperation, FieldErrors, NETWORK_ERROR_MESSAGE};
