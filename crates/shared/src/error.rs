use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    NotFound,
    Validation,
    Deadlock,
    RateLimited,
    Unavailable,
    /// The gateway gave up waiting; the method may still complete upstream.
    GatewayTimeout,
    Internal,
}

impl ErrorCode {
    fn from_exc_type(exc_type: &str) -> Option<Self> {
        let code = match exc_type {
            "ValidationError" | "MandatoryError" | "LinkValidationError" => Self::Validation,
            "PermissionError" => Self::Forbidden,
            "DoesNotExistError" => Self::NotFound,
            "AuthenticationError" | "SessionExpired" => Self::Unauthorized,
            "QueryDeadlockError" => Self::Deadlock,
            "TooManyRequestsError" | "RateLimitExceededError" => Self::RateLimited,
            _ => return None,
        };
        Some(code)
    }

    fn from_status(status: u16) -> Self {
        match status {
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            400 | 409 | 417 | 422 => Self::Validation,
            429 => Self::RateLimited,
            502 | 503 => Self::Unavailable,
            504 => Self::GatewayTimeout,
            _ => Self::Internal,
        }
    }
}

/// Failure reply from a Frappe RPC method.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{code:?} (HTTP {status}): {message}")]
pub struct RemoteError {
    pub status: u16,
    pub code: ErrorCode,
    pub exc_type: Option<String>,
    pub message: String,
}

#[derive(Debug, Default, Deserialize)]
struct FailureBody {
    #[serde(default)]
    exc_type: Option<String>,
    #[serde(default)]
    exception: Option<String>,
    #[serde(default, rename = "_server_messages")]
    server_messages: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ServerMessage {
    #[serde(default)]
    message: String,
}

impl RemoteError {
    pub fn new(status: u16, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            exc_type: None,
            message: message.into(),
        }
    }

    /// Builds an error from a non-2xx reply. `reason` is the HTTP reason phrase, used when the
    /// body carries nothing readable.
    pub fn from_reply(status: u16, reason: Option<&str>, body: &str) -> Self {
        let parsed: FailureBody = serde_json::from_str(body).unwrap_or_default();

        let message = parsed
            .server_messages
            .as_deref()
            .and_then(first_server_message)
            .or_else(|| parsed.exception.as_deref().map(exception_summary))
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| reason.unwrap_or("request failed").to_string());

        let mut code = parsed
            .exc_type
            .as_deref()
            .and_then(ErrorCode::from_exc_type)
            .unwrap_or_else(|| ErrorCode::from_status(status));
        if message.to_ascii_lowercase().contains("deadlock") {
            code = ErrorCode::Deadlock;
        }

        Self {
            status,
            code,
            exc_type: parsed.exc_type,
            message,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::Deadlock | ErrorCode::RateLimited | ErrorCode::Unavailable
        )
    }
}

/// `_server_messages` is a JSON-encoded list whose entries are themselves JSON-encoded objects.
fn first_server_message(raw: &str) -> Option<String> {
    let entries: Vec<String> = serde_json::from_str(raw).ok()?;
    entries.iter().find_map(|entry| {
        let text = serde_json::from_str::<ServerMessage>(entry)
            .map(|m| m.message)
            .unwrap_or_else(|_| entry.clone());
        let text = strip_markup(&text);
        (!text.is_empty()).then_some(text)
    })
}

/// Exceptions arrive as `frappe.exceptions.ValidationError: No invoices provided.`.
fn exception_summary(exception: &str) -> String {
    let last_line = exception.trim().lines().last().unwrap_or_default();
    match last_line.split_once(": ") {
        Some((kind, rest)) if !kind.contains(' ') => rest.trim().to_string(),
        _ => last_line.trim().to_string(),
    }
}

fn strip_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for ch in text.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out.trim().to_string()
}
