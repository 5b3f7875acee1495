//! View-model and state machine for the payment reconciliation screen.
//!
//! The screen owns the two grids and the operator's query parameters. Transitions are driven
//! from outside (by [`crate::session::ReconciliationSession`] or a test) and every remote result
//! is applied through it, so the grids are only ever mutated from one place.

use std::{fmt, mem};

use serde::Serialize;
use shared::{
    domain::{FormContext, InvoiceRow, Notice, PaymentRow},
    protocol::{BatchOutcome, BatchReconcileRequest},
};
use tracing::{debug, info};

use crate::{
    describe_error,
    error::{ScreenAction, ScreenError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreenState {
    Idle,
    Fetching,
    ReadyToProcess,
    Processing,
}

impl fmt::Display for ScreenState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Fetching => "fetching",
            Self::ReadyToProcess => "ready to process",
            Self::Processing => "processing",
        };
        f.write_str(name)
    }
}

/// Values injected at screen initialization in place of the user's stored defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScreenDefaults {
    pub company: Option<String>,
    pub currency: Option<String>,
}

/// What the front end may offer after a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FormCapabilities {
    pub save_enabled: bool,
    pub invoices_insertable: bool,
    pub payments_insertable: bool,
    pub fetch_action_visible: bool,
    pub process_action_visible: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScreenSnapshot {
    pub state: ScreenState,
    pub context: FormContext,
    pub invoices: Vec<InvoiceRow>,
    pub payments: Vec<PaymentRow>,
    pub process_action_visible: bool,
}

/// The process action is offered iff both grids hold at least one row.
pub fn process_action_visible(invoices: &[InvoiceRow], payments: &[PaymentRow]) -> bool {
    !invoices.is_empty() && !payments.is_empty()
}

#[derive(Debug, Clone)]
pub struct ReconciliationScreen {
    context: FormContext,
    invoices: Vec<InvoiceRow>,
    payments: Vec<PaymentRow>,
    state: ScreenState,
    invoices_pending: bool,
    payments_pending: bool,
    notices: Vec<Notice>,
}

impl Default for ReconciliationScreen {
    fn default() -> Self {
        Self::new(FormContext::default())
    }
}

impl ReconciliationScreen {
    pub fn new(context: FormContext) -> Self {
        Self {
            context,
            invoices: Vec::new(),
            payments: Vec::new(),
            state: ScreenState::Idle,
            invoices_pending: false,
            payments_pending: false,
            notices: Vec::new(),
        }
    }

    pub fn state(&self) -> ScreenState {
        self.state
    }

    pub fn context(&self) -> &FormContext {
        &self.context
    }

    pub fn invoices(&self) -> &[InvoiceRow] {
        &self.invoices
    }

    pub fn payments(&self) -> &[PaymentRow] {
        &self.payments
    }

    pub fn process_action_visible(&self) -> bool {
        process_action_visible(&self.invoices, &self.payments)
    }

    pub fn snapshot(&self) -> ScreenSnapshot {
        ScreenSnapshot {
            state: self.state,
            context: self.context.clone(),
            invoices: self.invoices.clone(),
            payments: self.payments.clone(),
            process_action_visible: self.process_action_visible(),
        }
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        mem::take(&mut self.notices)
    }

    /// Fills company and currency from the injected defaults, leaving operator input alone.
    pub fn on_load(&mut self, defaults: &ScreenDefaults) {
        if self.context.company().is_none() {
            self.context.company = defaults.company.clone();
        }
        if self.context.currency().is_none() {
            self.context.currency = defaults.currency.clone();
        }
    }

    /// The screen is action-driven: no generic save, and rows only arrive through a fetch.
    pub fn on_refresh(&self) -> FormCapabilities {
        let busy = self.is_busy();
        FormCapabilities {
            save_enabled: false,
            invoices_insertable: false,
            payments_insertable: false,
            fetch_action_visible: !busy,
            process_action_visible: !busy && self.process_action_visible(),
        }
    }

    fn is_busy(&self) -> bool {
        matches!(self.state, ScreenState::Fetching | ScreenState::Processing)
    }

    pub fn edit_context(&mut self, edit: impl FnOnce(&mut FormContext)) -> Result<(), ScreenError> {
        if self.is_busy() {
            return Err(self.invalid(ScreenAction::EditContext));
        }
        edit(&mut self.context);
        Ok(())
    }

    fn invalid(&self, action: ScreenAction) -> ScreenError {
        ScreenError::InvalidTransition {
            from: self.state,
            action,
        }
    }

    /// Validates the query, clears both grids and waits for both results.
    pub fn begin_fetch(&mut self) -> Result<(), ScreenError> {
        if self.is_busy() {
            return Err(self.invalid(ScreenAction::Fetch));
        }
        if let Some(field) = self.context.missing_required_field() {
            return Err(ScreenError::Validation(format!(
                "{field} is required before fetching entries"
            )));
        }
        self.context
            .date_range
            .validate()
            .map_err(ScreenError::Validation)?;

        self.invoices.clear();
        self.payments.clear();
        self.invoices_pending = true;
        self.payments_pending = true;
        self.state = ScreenState::Fetching;
        debug!("recon: fetch started");
        Ok(())
    }

    pub fn apply_invoices(
        &mut self,
        result: anyhow::Result<Vec<InvoiceRow>>,
    ) -> Result<(), ScreenError> {
        if self.state != ScreenState::Fetching || !self.invoices_pending {
            return Err(self.invalid(ScreenAction::ApplyInvoices));
        }
        self.invoices_pending = false;
        match result {
            Ok(rows) if rows.is_empty() => self.notices.push(Notice::info(
                "No Outstanding Invoices",
                "No outstanding invoices were found for the selected customer.",
            )),
            Ok(rows) => self.invoices = rows,
            Err(err) => self.notices.push(Notice::failure(
                "Could Not Fetch Invoices",
                describe_error(&err),
            )),
        }
        self.settle_fetch();
        Ok(())
    }

    pub fn apply_payments(
        &mut self,
        result: anyhow::Result<Vec<PaymentRow>>,
    ) -> Result<(), ScreenError> {
        if self.state != ScreenState::Fetching || !self.payments_pending {
            return Err(self.invalid(ScreenAction::ApplyPayments));
        }
        self.payments_pending = false;
        match result {
            Ok(rows) if rows.is_empty() => self.notices.push(Notice::info(
                "No Outstanding Payments",
                "No outstanding payments were found for the selected customer.",
            )),
            Ok(rows) => self.payments = rows,
            Err(err) => self.notices.push(Notice::failure(
                "Could Not Fetch Payments",
                describe_error(&err),
            )),
        }
        self.settle_fetch();
        Ok(())
    }

    fn settle_fetch(&mut self) {
        if self.invoices_pending || self.payments_pending {
            return;
        }
        self.state = if self.process_action_visible() {
            ScreenState::ReadyToProcess
        } else {
            ScreenState::Idle
        };
        info!(
            invoices = self.invoices.len(),
            payments = self.payments.len(),
            state = %self.state,
            "recon: fetch settled"
        );
    }

    /// Builds the single batch request from every row in both grids, in grid order.
    pub fn begin_process(&mut self) -> Result<BatchReconcileRequest, ScreenError> {
        if self.state != ScreenState::ReadyToProcess || !self.process_action_visible() {
            return Err(self.invalid(ScreenAction::Process));
        }
        let request = BatchReconcileRequest::new(
            self.invoices.iter().map(|row| row.invoice.clone()).collect(),
            self.payments.iter().map(|row| row.payment_id.clone()).collect(),
        );
        self.state = ScreenState::Processing;
        Ok(request)
    }

    pub fn finish_process(
        &mut self,
        result: anyhow::Result<BatchOutcome>,
    ) -> Result<BatchOutcome, ScreenError> {
        if self.state != ScreenState::Processing {
            return Err(self.invalid(ScreenAction::FinishProcess));
        }
        let outcome = match result {
            Ok(BatchOutcome::Accepted) => {
                let message = format!(
                    "Reconciled {} payment(s) against {} invoice(s).",
                    self.payments.len(),
                    self.invoices.len()
                );
                self.invoices.clear();
                self.payments.clear();
                self.state = ScreenState::Idle;
                self.notices
                    .push(Notice::success("Payments Processed", message));
                return Ok(BatchOutcome::Accepted);
            }
            Ok(BatchOutcome::Rejected) => {
                self.notices.push(Notice::failure(
                    "Reconciliation Failed",
                    "The server did not confirm the reconciliation. No rows were cleared; review the entries and try again.",
                ));
                BatchOutcome::Rejected
            }
            Err(err) => {
                self.notices.push(Notice::failure(
                    "Reconciliation Failed",
                    describe_error(&err),
                ));
                BatchOutcome::Rejected
            }
        };
        self.state = ScreenState::ReadyToProcess;
        Ok(outcome)
    }
}

#[cfg(test)]
#[path = "tests/screen_tests.rs"]
mod tests;
