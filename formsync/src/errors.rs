use serde_json::Value;
use thiserror::Error as ThisError;

/// Fallback shown when a failed response carries nothing readable.
pub const GENERIC_FAILURE_MESSAGE: &str = "Something went wrong. Please try again.";

#[derive(ThisError, Debug)]
pub enum Error {
    /// No bearer token in the session; raised before any network call
    #[error("Not authenticated")]
    Unauthenticated,

    /// The request never reached the server (DNS, connection refused, TLS...)
    #[error("Network error: {source}")]
    Network {
        #[source]
        source: reqwest::Error,
    },

    /// Non-2xx response
    #[error("HTTP {status}: {message}")]
    Http { status: u16, body: String, message: String },

    /// Client-side validation failure (file limits, missing fields, password mismatch)
    #[error("{message}")]
    Validation { message: String },

    /// 2xx response whose body was not the JSON we expected
    #[error("Failed to decode response: {message}")]
    Decode { message: String },

    /// Another fetch or save for the same resource is still in flight
    #[error("{resource} is busy")]
    Busy { resource: String },

    /// Save attempted before any successful fetch
    #[error("{resource} has not been loaded yet")]
    NoBaseline { resource: String },

    /// The owning view went away while the operation was in flight
    #[error("Operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation { message: message.into() }
    }

    /// HTTP status for `Http` errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// Returns the message shown to the user in error panels and toasts
    pub fn user_message(&self) -> String {
        match self {
            Error::Unauthenticated => "Session expired. Please login again.".to_string(),
            Error::Network { .. } => "Network error. Please check your connection and try again.".to_string(),
            Error::Http { message, .. } => message.clone(),
            Error::Validation { message } => message.clone(),
            Error::Decode { .. } => "Received an unexpected response from the server.".to_string(),
            Error::Busy { .. } => "Please wait for the current request to finish.".to_string(),
            Error::NoBaseline { .. } => "Settings have not been loaded yet. Please retry.".to_string(),
            Error::Cancelled => "Request cancelled.".to_string(),
            Error::Other(_) => GENERIC_FAILURE_MESSAGE.to_string(),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(source: reqwest::Error) -> Self {
        Error::Network { source }
    }
}

/// The error shapes the backend is known to produce.
///
/// None of them is authoritative, so a body is classified by the first shape
/// it matches in priority order.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerErrorBody {
    NonFieldErrors(String),
    FieldErrors { field: String, message: String },
    Detail(String),
    Error(String),
    Message(String),
    Raw(String),
    Empty,
}

impl ServerErrorBody {
    /// Classify a raw response body. `fields` are the wire names of the
    /// resource being saved and win over any other field-keyed array.
    pub fn parse(raw: &str, fields: &[&str]) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return ServerErrorBody::Empty;
        }

        let Ok(value) = serde_json::from_str::<Value>(trimmed) else {
            return ServerErrorBody::Raw(trimmed.to_string());
        };

        let map = match value {
            Value::Object(map) => map,
            Value::Null => return ServerErrorBody::Empty,
            Value::String(s) if s.trim().is_empty() => return ServerErrorBody::Empty,
            Value::String(s) => return ServerErrorBody::Raw(s),
            other => return ServerErrorBody::Raw(first_text(&other).unwrap_or_else(|| other.to_string())),
        };

        if let Some(msg) = map.get("non_field_errors").and_then(first_text) {
            return ServerErrorBody::NonFieldErrors(msg);
        }

        for field in fields {
            if let Some(msg) = map.get(*field).filter(|v| v.is_array()).and_then(first_text) {
                return ServerErrorBody::FieldErrors {
                    field: field.to_string(),
                    message: msg,
                };
            }
        }

        for (key, val) in &map {
            if matches!(key.as_str(), "detail" | "error" | "message") {
                continue;
            }
            if val.is_array()
                && let Some(msg) = first_text(val)
            {
                return ServerErrorBody::FieldErrors {
                    field: key.clone(),
                    message: msg,
                };
            }
        }

        for (key, ctor) in [
            ("detail", ServerErrorBody::Detail as fn(String) -> ServerErrorBody),
            ("error", ServerErrorBody::Error),
            ("message", ServerErrorBody::Message),
        ] {
            if let Some(msg) = map.get(key).and_then(first_text) {
                return ctor(msg);
            }
        }

        if map.is_empty() {
            ServerErrorBody::Empty
        } else {
            ServerErrorBody::Raw(Value::Object(map).to_string())
        }
    }

    pub fn message(&self) -> String {
        match self {
            ServerErrorBody::NonFieldErrors(m)
            | ServerErrorBody::FieldErrors { message: m, .. }
            | ServerErrorBody::Detail(m)
            | ServerErrorBody::Error(m)
            | ServerErrorBody::Message(m)
            | ServerErrorBody::Raw(m) => m.clone(),
            ServerErrorBody::Empty => GENERIC_FAILURE_MESSAGE.to_string(),
        }
    }
}

/// First non-empty string in a value: the value itself, or the first element
/// of an array of strings.
fn first_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Array(items) => items.iter().find_map(first_text),
        _ => None,
    }
}

/// Type alias for engine operation results
pub type Result<T> = std::result::Result<T, Error>;
