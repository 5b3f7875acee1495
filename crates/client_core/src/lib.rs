use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use shared::{
    domain::{FormContext, InvoiceRow, PaymentId, PaymentRow},
    error::RemoteError,
    protocol::{
        BatchOutcome, BatchReconcileRequest, DraftPaymentRecord, DraftPaymentsArgs, MethodReply,
        ModesOfPaymentArgs, OutstandingInvoiceRecord, OutstandingInvoicesArgs,
        PaymentEntrySummary, RemoteMethod, SubmitPaymentArgs,
    },
};
use tracing::{debug, info, warn};
use url::Url;

pub mod error;
pub mod retry;
pub mod screen;
pub mod session;
pub mod settings;

pub use error::{ScreenAction, ScreenError};
pub use retry::RetryPolicy;
pub use screen::{
    process_action_visible, FormCapabilities, ReconciliationScreen, ScreenDefaults,
    ScreenSnapshot, ScreenState,
};
pub use session::{ReconciliationSession, SessionEvent};
pub use settings::ClientSettings;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Remote operations behind the reconciliation screen. The matching, allocation and ledger
/// posting all happen server-side; implementations only carry requests and decode replies.
#[async_trait]
pub trait ReconciliationBackend: Send + Sync {
    async fn fetch_outstanding_invoices(&self, context: &FormContext) -> Result<Vec<InvoiceRow>>;
    async fn fetch_draft_payments(&self, context: &FormContext) -> Result<Vec<PaymentRow>>;
    /// Legacy per-payment submit. The screen never uses it; it stays for one-off operator use.
    async fn submit_mpesa_payment(
        &self,
        payment: &PaymentId,
        customer: &str,
    ) -> Result<PaymentEntrySummary>;
    async fn reconcile_batch(&self, request: &BatchReconcileRequest) -> Result<BatchOutcome>;
    async fn list_mpesa_modes_of_payment(&self, company: &str) -> Result<Vec<String>>;
}

pub fn outstanding_invoices_args(context: &FormContext) -> Result<OutstandingInvoicesArgs> {
    let required = |value: Option<&str>, field: &str| {
        value
            .map(str::to_string)
            .ok_or_else(|| anyhow!("{field} is required to fetch outstanding invoices"))
    };
    Ok(OutstandingInvoicesArgs {
        company: required(context.company(), "company")?,
        currency: required(context.currency(), "currency")?,
        customer: required(context.customer(), "customer")?,
        voucher_no: context.invoice_filter().map(str::to_string),
        from_date: context.date_range.from,
        to_date: context.date_range.to,
    })
}

pub fn draft_payments_args(context: &FormContext) -> Result<DraftPaymentsArgs> {
    let company = context
        .company()
        .ok_or_else(|| anyhow!("company is required to fetch draft payments"))?;
    Ok(DraftPaymentsArgs {
        company: company.to_string(),
        full_name: context.full_name().map(str::to_string),
        mode_of_payment: context.mode_of_payment().map(str::to_string),
        from_date: context.date_range.from,
        to_date: context.date_range.to,
    })
}

/// HTTP client for the Frappe site's whitelisted methods.
#[derive(Clone)]
pub struct FrappeClient {
    http: Client,
    site_url: Url,
    authorization: Option<String>,
}

impl FrappeClient {
    pub fn new(site_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .context("failed to build http client")?;
        Self::with_http_client(http, site_url)
    }

    pub fn from_settings(settings: &ClientSettings) -> Result<Self> {
        let http = Client::builder()
            .timeout(settings.request_timeout())
            .build()
            .context("failed to build http client")?;
        let client = Self::with_http_client(http, &settings.site_url)?;
        Ok(match (&settings.api_key, &settings.api_secret) {
            (Some(key), Some(secret)) => client.with_token(key, secret),
            _ => client,
        })
    }

    pub fn with_http_client(http: Client, site_url: &str) -> Result<Self> {
        let mut site_url =
            Url::parse(site_url.trim()).with_context(|| format!("invalid site url '{site_url}'"))?;
        if !site_url.path().ends_with('/') {
            let path = format!("{}/", site_url.path());
            site_url.set_path(&path);
        }
        Ok(Self {
            http,
            site_url,
            authorization: None,
        })
    }

    /// Uses Frappe token auth (`token key:secret`) on every request.
    pub fn with_token(mut self, api_key: &str, api_secret: &str) -> Self {
        self.authorization = Some(format!("token {api_key}:{api_secret}"));
        self
    }

    pub fn site_url(&self) -> &Url {
        &self.site_url
    }

    fn method_url(&self, method: RemoteMethod) -> Result<Url> {
        self.site_url
            .join(&format!("api/method/{}", method.path()))
            .with_context(|| format!("failed to build url for {}", method.name()))
    }

    /// Posts the arguments and returns the decoded reply object, or a [`RemoteError`] for
    /// non-2xx replies.
    async fn call_raw<A: Serialize + ?Sized>(
        &self,
        method: RemoteMethod,
        args: &A,
    ) -> Result<Map<String, Value>> {
        let url = self.method_url(method)?;
        debug!(method = method.name(), "recon: calling remote method");

        let mut request = self
            .http
            .post(url)
            .header(header::ACCEPT, "application/json")
            .json(args);
        if let Some(authorization) = &self.authorization {
            request = request.header(header::AUTHORIZATION, authorization);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("request to {} failed", method.name()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .with_context(|| format!("failed to read {} reply", method.name()))?;

        if !status.is_success() {
            let err = RemoteError::from_reply(status.as_u16(), status.canonical_reason(), &body);
            warn!(
                method = method.name(),
                status = status.as_u16(),
                exc_type = err.exc_type.as_deref().unwrap_or("-"),
                "recon: remote method failed: {}",
                err.message
            );
            return Err(err.into());
        }

        if body.trim().is_empty() {
            return Ok(Map::new());
        }
        serde_json::from_str(&body)
            .with_context(|| format!("malformed {} reply", method.name()))
    }

    async fn call<A, T>(&self, method: RemoteMethod, args: &A) -> Result<Option<T>>
    where
        A: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let reply = self.call_raw(method, args).await?;
        let reply: MethodReply<T> = serde_json::from_value(Value::Object(reply))
            .with_context(|| format!("unexpected {} reply shape", method.name()))?;
        Ok(reply.message)
    }
}

#[async_trait]
impl ReconciliationBackend for FrappeClient {
    async fn fetch_outstanding_invoices(&self, context: &FormContext) -> Result<Vec<InvoiceRow>> {
        let args = outstanding_invoices_args(context)?;
        let records: Vec<OutstandingInvoiceRecord> = self
            .call(RemoteMethod::GetOutstandingInvoices, &args)
            .await?
            .unwrap_or_default();
        info!(
            customer = %args.customer,
            invoices = records.len(),
            "recon: fetched outstanding invoices"
        );
        Ok(records.into_iter().map(InvoiceRow::from).collect())
    }

    async fn fetch_draft_payments(&self, context: &FormContext) -> Result<Vec<PaymentRow>> {
        let args = draft_payments_args(context)?;
        let records: Vec<DraftPaymentRecord> = self
            .call(RemoteMethod::GetDraftPayments, &args)
            .await?
            .unwrap_or_default();
        info!(
            company = %args.company,
            payments = records.len(),
            "recon: fetched draft payments"
        );
        Ok(records.into_iter().map(PaymentRow::from).collect())
    }

    async fn submit_mpesa_payment(
        &self,
        payment: &PaymentId,
        customer: &str,
    ) -> Result<PaymentEntrySummary> {
        let args = SubmitPaymentArgs {
            mpesa_payment: payment.clone(),
            customer: customer.to_string(),
        };
        let entry: PaymentEntrySummary = self
            .call(RemoteMethod::SubmitMpesaPayment, &args)
            .await?
            .ok_or_else(|| anyhow!("submit_mpesa_payment returned no payment entry"))?;
        info!(
            payment = %payment,
            payment_entry = %entry.name,
            "recon: submitted single payment"
        );
        Ok(entry)
    }

    async fn reconcile_batch(&self, request: &BatchReconcileRequest) -> Result<BatchOutcome> {
        let reply = self
            .call_raw(RemoteMethod::ProcessReconciliation, request)
            .await?;
        let outcome = BatchOutcome::from_message(reply.get("message"));
        info!(
            invoices = request.invoice_names.len(),
            payments = request.mpesa_names.len(),
            outcome = ?outcome,
            "recon: batch reconciliation replied"
        );
        Ok(outcome)
    }

    async fn list_mpesa_modes_of_payment(&self, company: &str) -> Result<Vec<String>> {
        let args = ModesOfPaymentArgs {
            company: company.to_string(),
        };
        Ok(self
            .call(RemoteMethod::GetModesOfPayment, &args)
            .await?
            .unwrap_or_default())
    }
}

/// Operator-facing text for an error: the server's own message when there is one.
pub fn describe_error(err: &anyhow::Error) -> String {
    match err.downcast_ref::<RemoteError>() {
        Some(remote) => remote.message.clone(),
        None => format!("{err:#}"),
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
