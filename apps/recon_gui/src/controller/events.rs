//! UI/backend events and error modeling for the reconciliation GUI controller.

use client_core::{describe_error, FormCapabilities, SessionEvent};
use shared::{
    domain::FormContext,
    error::{ErrorCode, RemoteError},
};

pub enum UiEvent {
    Info(String),
    Error(UiError),
    ContextLoaded(FormContext),
    Capabilities(FormCapabilities),
    ModesOfPaymentLoaded(Vec<String>),
    Session(SessionEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiErrorCategory {
    Auth,
    Transport,
    Validation,
    Server,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiErrorContext {
    BackendStartup,
    Fetch,
    Process,
    ModesOfPayment,
    General,
}

#[derive(Debug, Clone)]
pub struct UiError {
    category: UiErrorCategory,
    context: UiErrorContext,
    message: String,
}

impl UiError {
    /// Classifies by the structured remote error when one is attached, otherwise by message text.
    pub fn from_error(context: UiErrorContext, err: &anyhow::Error) -> Self {
        let Some(remote) = err.downcast_ref::<RemoteError>() else {
            return Self::from_message(context, describe_error(err));
        };
        let category = match remote.code {
            ErrorCode::Unauthorized | ErrorCode::Forbidden => UiErrorCategory::Auth,
            ErrorCode::Validation | ErrorCode::NotFound => UiErrorCategory::Validation,
            ErrorCode::RateLimited | ErrorCode::Unavailable | ErrorCode::GatewayTimeout => {
                UiErrorCategory::Transport
            }
            ErrorCode::Deadlock | ErrorCode::Internal => UiErrorCategory::Server,
        };
        Self {
            category,
            context,
            message: remote.message.clone(),
        }
    }

    pub fn from_message(context: UiErrorContext, message: impl Into<String>) -> Self {
        let message = message.into();
        let message_lower = message.to_ascii_lowercase();
        let category = if message_lower.contains("401")
            || message_lower.contains("403")
            || message_lower.contains("unauthorized")
            || message_lower.contains("forbidden")
            || message_lower.contains("not permitted")
            || message_lower.contains("invalid token")
        {
            UiErrorCategory::Auth
        } else if message_lower.contains("timed out")
            || message_lower.contains("timeout")
            || message_lower.contains("connection")
            || message_lower.contains("connect")
            || message_lower.contains("dns")
            || message_lower.contains("unavailable")
        {
            UiErrorCategory::Transport
        } else if message_lower.contains("invalid")
            || message_lower.contains("missing")
            || message_lower.contains("required")
            || message_lower.contains("cannot")
        {
            UiErrorCategory::Validation
        } else {
            UiErrorCategory::Unknown
        };

        Self {
            category,
            context,
            message,
        }
    }

    pub fn requires_credentials(&self) -> bool {
        self.category == UiErrorCategory::Auth
    }

    pub fn category(&self) -> UiErrorCategory {
        self.category
    }

    pub fn context(&self) -> UiErrorContext {
        self.context
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Single-line text for the status banner.
    pub fn banner_text(&self) -> String {
        let prefix = match self.context {
            UiErrorContext::BackendStartup => "Backend startup failed",
            UiErrorContext::Fetch => "Fetch failed",
            UiErrorContext::Process => "Reconciliation failed",
            UiErrorContext::ModesOfPayment => "Could not load modes of payment",
            UiErrorContext::General => "Error",
        };
        match self.category {
            UiErrorCategory::Auth => format!(
                "{prefix}: {}. Check the API key and secret in the settings file.",
                self.message
            ),
            UiErrorCategory::Transport => format!(
                "{prefix}: site unreachable ({}). Check the site URL and network.",
                self.message
            ),
            _ => format!("{prefix}: {}", self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_remote_errors_by_code() {
        let err = anyhow::Error::new(RemoteError::new(
            403,
            ErrorCode::Forbidden,
            "Not permitted to read Sales Invoice",
        ));
        let ui_error = UiError::from_error(UiErrorContext::Fetch, &err);
        assert_eq!(ui_error.category(), UiErrorCategory::Auth);
        assert!(ui_error.requires_credentials());
        assert_eq!(ui_error.message(), "Not permitted to read Sales Invoice");

        let err = anyhow::Error::new(RemoteError::new(
            500,
            ErrorCode::Deadlock,
            "Deadlock found when trying to get lock",
        ));
        let ui_error = UiError::from_error(UiErrorContext::Process, &err);
        assert_eq!(ui_error.category(), UiErrorCategory::Server);
        assert_eq!(ui_error.context(), UiErrorContext::Process);

        let err = anyhow::Error::new(RemoteError::from_reply(504, Some("Gateway Timeout"), ""));
        let ui_error = UiError::from_error(UiErrorContext::Process, &err);
        assert_eq!(ui_error.category(), UiErrorCategory::Transport);
    }

    #[test]
    fn classifies_plain_messages_by_text() {
        assert_eq!(
            UiError::from_message(UiErrorContext::Fetch, "error sending request: connection refused")
                .category(),
            UiErrorCategory::Transport
        );
        assert_eq!(
            UiError::from_message(UiErrorContext::Fetch, "customer is required before fetching")
                .category(),
            UiErrorCategory::Validation
        );
        assert_eq!(
            UiError::from_message(UiErrorContext::General, "something odd").category(),
            UiErrorCategory::Unknown
        );
    }

    #[test]
    fn banner_text_names_the_failed_action() {
        let ui_error = UiError::from_message(UiErrorContext::Process, "Payment already allocated");
        assert_eq!(
            ui_error.banner_text(),
            "Reconciliation failed: Payment already allocated"
        );
    }
}
