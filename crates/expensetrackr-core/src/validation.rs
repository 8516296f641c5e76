//! Client-side validation of login and registration input.
//!
//! Every rule is checked and all failures are collected, in field order, so
//! a form can show each field's first problem at once.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Minimum length for any password field
pub const MIN_PASSWORD_LENGTH: usize = 8;

pub const MSG_INVALID_EMAIL: &str = "Please enter a valid email address";
pub const MSG_PASSWORD_TOO_SHORT: &str = "Password must be at least 8 characters long";
pub const MSG_PASSWORD_LOWERCASE: &str = "Password must contain at least one lowercase letter";
pub const MSG_PASSWORD_UPPERCASE: &str = "Password must contain at least one uppercase letter";
pub const MSG_PASSWORD_NUMBER: &str = "Password must contain at least one number";
pub const MSG_PASSWORD_SPECIAL: &str = "Password must contain at least one special character";
pub const MSG_NAME_REQUIRED: &str = "Name is required";
pub const MSG_PASSWORDS_DO_NOT_MATCH: &str = "Passwords do not match";

static EMAIL_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"^([A-Za-z0-9_'+\-\.]*)[A-Za-z0-9_+-]@([A-Za-z0-9][A-Za-z0-9\-]*\.)+[A-Za-z]{2,}$",
    )
    .ok()
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.push(FieldError {
            field,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.0.iter()
    }

    /// First message recorded for `field`
    pub fn first_for(&self, field: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|e| e.field == field)
            .map(|e| e.message.as_str())
    }

    /// First message overall
    pub fn first(&self) -> Option<&FieldError> {
        self.0.first()
    }

    fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<&str> = self.0.iter().map(|e| e.message.as_str()).collect();
        write!(f, "{}", messages.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

#[derive(Clone, PartialEq, Eq)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
}

impl LoginInput {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if !is_valid_email(&self.email) {
            errors.add("email", MSG_INVALID_EMAIL);
        }
        if self.password.chars().count() < MIN_PASSWORD_LENGTH {
            errors.add("password", MSG_PASSWORD_TOO_SHORT);
        }
        errors.into_result()
    }
}

impl fmt::Debug for LoginInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginInput")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct RegisterInput {
    pub name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

impl RegisterInput {
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
        confirm_password: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            password: password.into(),
            confirm_password: confirm_password.into(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.name.is_empty() {
            errors.add("name", MSG_NAME_REQUIRED);
        }
        if !is_valid_email(&self.email) {
            errors.add("email", MSG_INVALID_EMAIL);
        }
        for message in password_strength_errors(&self.password) {
            errors.add("password", message);
        }
        if self.confirm_password.chars().count() < MIN_PASSWORD_LENGTH {
            errors.add("confirm_password", MSG_PASSWORD_TOO_SHORT);
        }
        // Only compared once every field is individually valid
        if errors.is_empty() && self.password != self.confirm_password {
            errors.add("confirm_password", MSG_PASSWORDS_DO_NOT_MATCH);
        }

        errors.into_result()
    }
}

impl fmt::Debug for RegisterInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterInput")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("confirm_password", &"<redacted>")
            .finish()
    }
}

/// Every strength rule `password` breaks, in rule order
pub fn password_strength_errors(password: &str) -> Vec<&'static str> {
    let mut failures = Vec::new();
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        failures.push(MSG_PASSWORD_TOO_SHORT);
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        failures.push(MSG_PASSWORD_LOWERCASE);
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        failures.push(MSG_PASSWORD_UPPERCASE);
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        failures.push(MSG_PASSWORD_NUMBER);
    }
    if !password.chars().any(|c| !c.is_ascii_alphanumeric()) {
        failures.push(MSG_PASSWORD_SPECIAL);
    }
    failures
}

/// Syntactic email check: `local@label.label...tld`.
///
/// The local part allows letters, digits and `_ ' + - .`, may not start with
/// or contain consecutive dots, and must end in a letter, digit, `_`, `+`
/// or `-`. Domain labels start with a letter or digit and may contain `-`;
/// the final label is at least two ASCII letters.
pub fn is_valid_email(email: &str) -> bool {
    // `regex` has no lookahead, so the leading-dot and `..` rules are plain checks
    !email.starts_with('.')
        && !email.contains("..")
        && EMAIL_RE.as_ref().is_some_and(|re| re.is_match(email))
}
