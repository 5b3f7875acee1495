use std::sync::Arc;

use anyhow::Result;
use shared::{
    domain::{FormContext, InvoiceRow, Notice, PaymentRow},
    protocol::BatchOutcome,
};
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use crate::{
    retry::{is_retryable_error, RetryPolicy},
    screen::{FormCapabilities, ReconciliationScreen, ScreenDefaults, ScreenSnapshot, ScreenState},
    ReconciliationBackend,
};

#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(ScreenState),
    InvoicesUpdated(Vec<InvoiceRow>),
    PaymentsUpdated(Vec<PaymentRow>),
    Notice(Notice),
}

/// Drives a [`ReconciliationScreen`] against a remote backend.
///
/// The screen lock is never held across a remote call; each result is applied under the lock
/// as soon as it arrives.
pub struct ReconciliationSession {
    backend: Arc<dyn ReconciliationBackend>,
    retry: RetryPolicy,
    inner: Mutex<ReconciliationScreen>,
    events: broadcast::Sender<SessionEvent>,
}

impl ReconciliationSession {
    pub fn new(backend: Arc<dyn ReconciliationBackend>, retry: RetryPolicy) -> Arc<Self> {
        Self::with_context(backend, retry, FormContext::default())
    }

    pub fn with_context(
        backend: Arc<dyn ReconciliationBackend>,
        retry: RetryPolicy,
        context: FormContext,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            backend,
            retry,
            inner: Mutex::new(ReconciliationScreen::new(context)),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn backend(&self) -> &Arc<dyn ReconciliationBackend> {
        &self.backend
    }

    pub async fn snapshot(&self) -> ScreenSnapshot {
        self.inner.lock().await.snapshot()
    }

    pub async fn load(&self, defaults: &ScreenDefaults) {
        self.inner.lock().await.on_load(defaults);
    }

    pub async fn refresh(&self) -> FormCapabilities {
        self.inner.lock().await.on_refresh()
    }

    pub async fn update_context(&self, edit: impl FnOnce(&mut FormContext)) -> Result<()> {
        self.inner.lock().await.edit_context(edit)?;
        Ok(())
    }

    /// Clears both grids, then runs the invoice and payment queries concurrently. Each result
    /// is rendered independently; neither waits for the other.
    pub async fn fetch_entries(&self) -> Result<ScreenSnapshot> {
        let context = {
            let mut screen = self.inner.lock().await;
            screen.begin_fetch()?;
            self.publish(SessionEvent::InvoicesUpdated(Vec::new()));
            self.publish(SessionEvent::PaymentsUpdated(Vec::new()));
            self.publish(SessionEvent::StateChanged(screen.state()));
            screen.context().clone()
        };

        let invoices = async {
            let result = self.backend.fetch_outstanding_invoices(&context).await;
            let mut screen = self.inner.lock().await;
            screen.apply_invoices(result)?;
            self.publish(SessionEvent::InvoicesUpdated(screen.invoices().to_vec()));
            self.flush(&mut screen);
            anyhow::Ok(())
        };
        let payments = async {
            let result = self.backend.fetch_draft_payments(&context).await;
            let mut screen = self.inner.lock().await;
            screen.apply_payments(result)?;
            self.publish(SessionEvent::PaymentsUpdated(screen.payments().to_vec()));
            self.flush(&mut screen);
            anyhow::Ok(())
        };
        let (invoices, payments) = futures::future::join(invoices, payments).await;
        invoices?;
        payments?;

        let screen = self.inner.lock().await;
        self.publish(SessionEvent::StateChanged(screen.state()));
        Ok(screen.snapshot())
    }

    /// Submits every invoice and payment identifier in one batch call. Only that call is
    /// retried, and only on transient failures.
    pub async fn process_payments(&self) -> Result<BatchOutcome> {
        let request = {
            let mut screen = self.inner.lock().await;
            let request = screen.begin_process()?;
            self.publish(SessionEvent::StateChanged(screen.state()));
            request
        };
        info!(
            invoices = request.invoice_names.len(),
            payments = request.mpesa_names.len(),
            "recon: submitting batch reconciliation"
        );

        let result = self
            .retry
            .run("process_mpesa_c2b_reconciliation", is_retryable_error, || {
                self.backend.reconcile_batch(&request)
            })
            .await;
        if let Err(err) = &result {
            warn!("recon: batch reconciliation failed: {err:#}");
        }

        let mut screen = self.inner.lock().await;
        let outcome = screen.finish_process(result)?;
        if outcome.is_accepted() {
            self.publish(SessionEvent::InvoicesUpdated(Vec::new()));
            self.publish(SessionEvent::PaymentsUpdated(Vec::new()));
        }
        self.publish(SessionEvent::StateChanged(screen.state()));
        self.flush(&mut screen);
        Ok(outcome)
    }

    fn flush(&self, screen: &mut ReconciliationScreen) {
        for notice in screen.take_notices() {
            self.publish(SessionEvent::Notice(notice));
        }
    }

    fn publish(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
