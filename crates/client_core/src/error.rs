use std::fmt;

use thiserror::Error;

use crate::screen::ScreenState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenAction {
    Fetch,
    ApplyInvoices,
    ApplyPayments,
    Process,
    FinishProcess,
    EditContext,
}

impl fmt::Display for ScreenAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fetch => "fetch entries",
            Self::ApplyInvoices => "apply fetched invoices",
            Self::ApplyPayments => "apply fetched payments",
            Self::Process => "process payments",
            Self::FinishProcess => "finish processing",
            Self::EditContext => "edit the form",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScreenError {
    #[error("cannot {action} while the screen is {from}")]
    InvalidTransition {
        from: ScreenState,
        action: ScreenAction,
    },
    #[error("{0}")]
    Validation(String),
}
