// Error taxonomy for the routing pipeline.
//
// Each component owns a narrow error enum; `RouterError` is what the
// coordinator and the facade pass around. Anything that came back from an
// external system goes through `scrub_secrets` before it is stored, logged,
// or shown to a user.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

// ============================================================================
// REGISTRY ERRORS
// ============================================================================

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Capability '{0}' is already registered")]
    DuplicateCapability(String),

    #[error("Unknown capability '{0}'")]
    UnknownCapability(String),

    #[error("Capability '{capability}' has no operation '{operation}'")]
    UnknownOperation {
        capability: String,
        operation: String,
    },

    #[error("Invalid schema for {capability}.{operation}: {reason}")]
    InvalidSchema {
        capability: String,
        operation: String,
        reason: String,
    },
}

// ============================================================================
// RESOLUTION ERRORS
// ============================================================================

/// The inference output could not be turned into a valid intent.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ResolutionError {
    #[error("Inference output is not a JSON object: {0}")]
    Malformed(String),

    #[error("Inference output names unknown capability '{0}'")]
    UnknownCapability(String),

    #[error("Capability '{capability}' has no operation '{operation}'")]
    UnknownOperation {
        capability: String,
        operation: String,
    },

    #[error("Missing required parameter '{parameter}' for {capability}.{operation}")]
    MissingParameter {
        capability: String,
        operation: String,
        parameter: String,
    },

    #[error("Parameter '{parameter}' is not a valid {expected}")]
    InvalidParameter { parameter: String, expected: String },

    #[error("Unexpected parameter '{parameter}' for {capability}.{operation}")]
    UnexpectedParameter {
        capability: String,
        operation: String,
        parameter: String,
    },

    #[error("Confidence {0} is outside [0, 1]")]
    ConfidenceOutOfRange(f64),
}

impl ResolutionError {
    /// A question to put back to the user instead of guessing.
    pub fn clarifying_question(&self) -> String {
        match self {
            ResolutionError::MissingParameter {
                capability,
                operation,
                parameter,
            } => format!(
                "Which {} should I use to {} in {}?",
                parameter.replace('_', " "),
                operation_phrase(operation),
                capability
            ),
            ResolutionError::InvalidParameter { parameter, expected } => format!(
                "I couldn't read the {} you gave me. Could you give it as a {}?",
                parameter.replace('_', " "),
                expected
            ),
            ResolutionError::UnknownOperation { capability, .. } => format!(
                "I'm not sure what you'd like me to do in {}. Do you want to list, read, create, update, or delete something?",
                capability
            ),
            _ => "I couldn't work out what you'd like me to do. Which service (mail, calendar, storage, spreadsheet, or document) is this about, and what should I do there?".to_string(),
        }
    }
}

fn operation_phrase(operation: &str) -> String {
    match operation {
        "list_items" => "list items".to_string(),
        "get_item" => "open the item".to_string(),
        "create_item" => "create it".to_string(),
        "update_item" => "update the item".to_string(),
        "delete_item" => "delete the item".to_string(),
        other => other.replace('_', " "),
    }
}

// ============================================================================
// COERCION ERRORS
// ============================================================================

/// An extracted parameter could not be converted to its declared type.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Parameter '{parameter}' could not be read as {expected}: {reason}")]
pub struct CoercionError {
    pub parameter: String,
    pub expected: String,
    pub reason: String,
}

// ============================================================================
// EXTERNAL ERRORS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalErrorKind {
    /// Network, timeout, or rate limit. Worth another attempt.
    Transient,
    /// Authorization, not-found, permanent quota. Never retried.
    Permanent,
}

impl fmt::Display for ExternalErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExternalErrorKind::Transient => write!(f, "transient"),
            ExternalErrorKind::Permanent => write!(f, "permanent"),
        }
    }
}

/// A failure reported by the inference call or a service client.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind} failure from {source_name}: {detail}")]
pub struct ExternalError {
    pub kind: ExternalErrorKind,
    pub source_name: String,
    pub detail: String,
}

impl ExternalError {
    pub fn transient(source_name: impl Into<String>, detail: impl AsRef<str>) -> Self {
        Self {
            kind: ExternalErrorKind::Transient,
            source_name: source_name.into(),
            detail: scrub_secrets(detail.as_ref()),
        }
    }

    pub fn permanent(source_name: impl Into<String>, detail: impl AsRef<str>) -> Self {
        Self {
            kind: ExternalErrorKind::Permanent,
            source_name: source_name.into(),
            detail: scrub_secrets(detail.as_ref()),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == ExternalErrorKind::Transient
    }
}

// ============================================================================
// CONTEXT ERRORS
// ============================================================================

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("Session archive error: {0}")]
    Archive(String),
}

// ============================================================================
// ROUTER ERROR
// ============================================================================

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RouterError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    ParameterCoercion(#[from] CoercionError),

    #[error(transparent)]
    External(#[from] ExternalError),

    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: ExternalError },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Context(#[from] ContextError),
}

impl RouterError {
    /// Stable, user-presentable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            RouterError::Resolution(_) => "resolution_error",
            RouterError::ParameterCoercion(_) => "parameter_coercion_error",
            RouterError::External(e) | RouterError::RetriesExhausted { last: e, .. } => {
                match e.kind {
                    ExternalErrorKind::Transient => "transient_external_error",
                    ExternalErrorKind::Permanent => "permanent_external_error",
                }
            }
            RouterError::Registry(RegistryError::DuplicateCapability(_)) => {
                "duplicate_capability_error"
            }
            RouterError::Registry(RegistryError::UnknownCapability(_)) => {
                "unknown_capability_error"
            }
            RouterError::Registry(RegistryError::UnknownOperation { .. }) => {
                "unknown_operation_error"
            }
            RouterError::Registry(RegistryError::InvalidSchema { .. }) => "invalid_schema_error",
            RouterError::Context(_) => "context_error",
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, RouterError::External(e) if e.is_transient())
    }
}

// ============================================================================
// SECRET SCRUBBING
// ============================================================================

fn secret_patterns() -> &'static [(Regex, &'static str)] {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (r"(?i)bearer\s+[A-Za-z0-9._~+/=-]+", "Bearer [redacted]"),
            (r"(?i)([?&](?:key|access_token|token)=)[^&\s]+", "${1}[redacted]"),
            (
                r#"(?i)("(?:access_token|refresh_token|id_token|api_key|private_key)"\s*:\s*)"[^"]*""#,
                "${1}\"[redacted]\"",
            ),
            (r"ya29\.[A-Za-z0-9._-]+", "[redacted]"),
            (r"sk-[A-Za-z0-9_-]{16,}", "[redacted]"),
        ]
        .into_iter()
        .filter_map(|(pattern, replacement)| {
            Regex::new(pattern).ok().map(|re| (re, replacement))
        })
        .collect()
    })
}

/// Removes bearer tokens, API keys and similar credentials from free text.
pub fn scrub_secrets(text: &str) -> String {
    let mut scrubbed = text.to_string();
    for (pattern, replacement) in secret_patterns() {
        scrubbed = pattern.replace_all(&scrubbed, *replacement).into_owned();
    }
    scrubbed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scrub_removes_bearer_tokens_and_keys() {
        let raw = "401 from https://example.com/v1?key=AIzaSecret&alt=json with Bearer ya29.abc-def";
        let scrubbed = scrub_secrets(raw);
        assert!(!scrubbed.contains("AIzaSecret"));
        assert!(!scrubbed.contains("ya29.abc-def"));
        assert!(scrubbed.contains("key=[redacted]"));
        assert!(scrubbed.contains("&alt=json"));
    }

    #[test]
    fn scrub_removes_json_token_fields() {
        let raw = r#"{"access_token": "abc123", "expires_in": 3600}"#;
        let scrubbed = scrub_secrets(raw);
        assert!(!scrubbed.contains("abc123"));
        assert!(scrubbed.contains("expires_in"));
    }

    #[test]
    fn external_error_constructors_scrub_detail() {
        let err = ExternalError::permanent("mail", "denied for Bearer secret-token");
        assert!(!err.detail.contains("secret-token"));
        assert!(!err.is_transient());
    }

    #[test]
    fn router_error_kinds_are_stable() {
        let transient = RouterError::External(ExternalError::transient("calendar", "timeout"));
        assert_eq!(transient.kind(), "transient_external_error");
        assert!(transient.is_transient());

        let exhausted = RouterError::RetriesExhausted {
            attempts: 3,
            last: ExternalError::transient("calendar", "timeout"),
        };
        assert_eq!(exhausted.kind(), "transient_external_error");
        assert!(!exhausted.is_transient());

        let unknown = RouterError::Registry(RegistryError::UnknownOperation {
            capability: "mail".into(),
            operation: "archive".into(),
        });
        assert_eq!(unknown.kind(), "unknown_operation_error");
    }

    #[test]
    fn missing_parameter_question_names_the_parameter() {
        let err = ResolutionError::MissingParameter {
            capability: "mail".into(),
            operation: "create_item".into(),
            parameter: "to".into(),
        };
        let question = err.clarifying_question();
        assert!(question.contains("to"));
        assert!(question.ends_with('?'));
    }
}
