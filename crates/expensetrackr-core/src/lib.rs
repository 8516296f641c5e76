//! ExpenseTrackr core - session token persistence and the auth API client.
//!
//! The pieces fit together like this:
//! - `auth::SessionStore` keeps the one session token in secure storage and
//!   publishes `(loading, token)` state to observers
//! - `api::ApiClient` calls the login/register endpoints, attaching the
//!   stored token as a bearer credential
//! - `route::Area` decides between the splash, guest and signed-in areas
//!
//! A successful login hands its token to `SessionStore::write`; the client
//! itself never persists anything.

pub mod api;
pub mod auth;
pub mod config;
pub mod device;
pub mod route;
pub mod validation;

pub use api::{ApiClient, ApiConfig, ApiError, AuthOperation};
pub use auth::{SecureStorage, SessionState, SessionStore, SESSION_KEY};
pub use config::Config;
pub use route::Area;
pub use validation::{LoginInput, RegisterInput, ValidationErrors};
