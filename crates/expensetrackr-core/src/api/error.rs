use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;
use thiserror::Error;

use crate::validation::ValidationErrors;

/// Shown for any failure where no response reached the client
pub const NETWORK_ERROR_MESSAGE: &str =
    "Unable to connect to the server. Please check your internet connection and try again.";

/// Maximum length for error response bodies in log messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Auth endpoints the client knows how to call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthOperation {
    Login,
    Register,
}

impl AuthOperation {
    pub fn path(&self) -> &'static str {
        match self {
            AuthOperation::Login => "/auth/login",
            AuthOperation::Register => "/auth/register",
        }
    }

    /// Fields whose server messages are surfaced, in priority order
    pub fn message_fields(&self) -> &'static [&'static str] {
        match self {
            AuthOperation::Login => &["email", "password"],
            AuthOperation::Register => &["name", "email", "password", "confirm_password"],
        }
    }

    /// Used when a 422 body names none of the expected fields
    pub fn fallback_message(&self) -> &'static str {
        match self {
            AuthOperation::Login => "Invalid credentials",
            AuthOperation::Register => "Unknown error",
        }
    }
}

impl fmt::Display for AuthOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthOperation::Login => write!(f, "Login"),
            AuthOperation::Register => write!(f, "Register"),
        }
    }
}

/// Per-field message arrays from a 422 response, e.g.
/// `{"email": ["The email has already been taken."]}`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    /// Parse a 422 body. Field arrays may sit at the top level or under an
    /// `errors` object; anything that is not an array of strings is ignored.
    pub fn from_body(body: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(body).ok()?;
        let object = match value.get("errors") {
            Some(Value::Object(errors)) => errors,
            _ => value.as_object()?,
        };

        let fields = object
            .iter()
            .filter_map(|(field, messages)| {
                let messages: Vec<String> = messages
                    .as_array()?
                    .iter()
                    .filter_map(|m| m.as_str().map(str::to_string))
                    .collect();
                (!messages.is_empty()).then(|| (field.clone(), messages))
            })
            .collect();
        Some(Self(fields))
    }

    pub fn first(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(|m| m.first()).map(String::as_str)
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First message of every field, in field-name order
    pub fn first_per_field(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .filter_map(|(field, messages)| Some((field.as_str(), messages.first()?.as_str())))
    }
}

impl<const N: usize> From<[(&str, &[&str]); N]> for FieldErrors {
    fn from(fields: [(&str, &[&str]); N]) -> Self {
        Self(
            fields
                .iter()
                .map(|(field, messages)| {
                    (
                        field.to_string(),
                        messages.iter().map(|m| m.to_string()).collect(),
                    )
                })
                .collect(),
        )
    }
}

/// Every way an auth call can end other than success. UI code only ever
/// sees these shapes; transport details stay in the logs.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{operation} failed: {errors}")]
    InvalidInput {
        operation: AuthOperation,
        errors: ValidationErrors,
    },

    #[error("{operation} failed: {}", first_field_message(.operation, .fields))]
    Validation {
        operation: AuthOperation,
        fields: FieldErrors,
    },

    #[error("{operation} failed (status {status}{})", status_suffix(.status_text))]
    Http {
        operation: AuthOperation,
        status: u16,
        status_text: String,
    },

    #[error("{}", NETWORK_ERROR_MESSAGE)]
    Network(#[source] reqwest::Error),

    #[error("{operation} failed: invalid response from server")]
    InvalidResponse {
        operation: AuthOperation,
        reason: String,
    },
}

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    pub(crate) fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    pub fn from_status(operation: AuthOperation, status: reqwest::StatusCode, body: &str) -> Self {
        if status == reqwest::StatusCode::UNPROCESSABLE_ENTITY {
            if let Some(fields) = FieldErrors::from_body(body) {
                return ApiError::Validation { operation, fields };
            }
        }
        ApiError::Http {
            operation,
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
        }
    }

    /// The bare message for the user, without the "<operation> failed" prefix
    pub fn message(&self) -> String {
        match self {
            ApiError::InvalidInput { errors, .. } => errors
                .first()
                .map(|e| e.message.clone())
                .unwrap_or_default(),
            ApiError::Validation { operation, fields } => {
                first_field_message(operation, fields).to_string()
            }
            ApiError::Http {
                status, status_text, ..
            } => format!("Request failed with status {}{}", status, status_suffix(status_text)),
            ApiError::Network(_) => NETWORK_ERROR_MESSAGE.to_string(),
            ApiError::InvalidResponse { .. } => "Invalid response from server".to_string(),
        }
    }

    /// One user-safe line naming the operation, e.g. `Login failed: <msg>`.
    /// Transport details never appear; network failures render as
    /// [`NETWORK_ERROR_MESSAGE`].
    pub fn user_message(&self) -> String {
        self.to_string()
    }

    pub fn is_network(&self) -> bool {
        matches!(self, ApiError::Network(_))
    }
}

fn first_field_message<'a>(operation: &AuthOperation, fields: &'a FieldErrors) -> &'a str {
    operation
        .message_fields()
        .iter()
        .find_map(|field| fields.first(field))
        .unwrap_or_else(|| operation.fallback_message())
}

fn status_suffix(status_text: &str) -> String {
    if status_text.is_empty() {
        String::new()
    } else {
        format!(" {}", status_text)
    }
}
