use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{InvoiceId, InvoiceRow, PaymentId, PaymentRow};

const PAYMENT_ENTRY_API: &str = "frappe_mpsa_payments.frappe_mpsa_payments.api.payment_entry";
const M_PESA_API: &str = "frappe_mpsa_payments.frappe_mpsa_payments.api.m_pesa_api";

/// Whitelisted server methods consumed by the reconciliation screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteMethod {
    GetOutstandingInvoices,
    GetDraftPayments,
    SubmitMpesaPayment,
    ProcessReconciliation,
    GetModesOfPayment,
}

impl RemoteMethod {
    pub fn path(self) -> String {
        let (module, function) = match self {
            Self::GetOutstandingInvoices => (PAYMENT_ENTRY_API, "get_outstanding_invoices"),
            Self::GetDraftPayments => (M_PESA_API, "get_mpesa_draft_c2b_payments"),
            Self::SubmitMpesaPayment => (M_PESA_API, "submit_mpesa_payment"),
            Self::ProcessReconciliation => (PAYMENT_ENTRY_API, "process_mpesa_c2b_reconciliation"),
            Self::GetModesOfPayment => (M_PESA_API, "get_mpesa_mode_of_payment"),
        };
        format!("{module}.{function}")
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::GetOutstandingInvoices => "get_outstanding_invoices",
            Self::GetDraftPayments => "get_mpesa_draft_c2b_payments",
            Self::SubmitMpesaPayment => "submit_mpesa_payment",
            Self::ProcessReconciliation => "process_mpesa_c2b_reconciliation",
            Self::GetModesOfPayment => "get_mpesa_mode_of_payment",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutstandingInvoicesArgs {
    pub company: String,
    pub currency: String,
    pub customer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voucher_no: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftPaymentsArgs {
    pub company: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode_of_payment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitPaymentArgs {
    pub mpesa_payment: PaymentId,
    pub customer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModesOfPaymentArgs {
    pub company: String,
}

/// Single batched reconciliation call: every listed payment is applied against the listed invoices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReconcileRequest {
    pub mpesa_names: Vec<PaymentId>,
    pub invoice_names: Vec<InvoiceId>,
}

impl BatchReconcileRequest {
    pub fn new(invoice_names: Vec<InvoiceId>, mpesa_names: Vec<PaymentId>) -> Self {
        Self {
            mpesa_names,
            invoice_names,
        }
    }
}

/// Envelope of every successful RPC reply. `message` is absent when the method returns nothing.
#[derive(Debug, Clone, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct MethodReply<T> {
    #[serde(default)]
    pub message: Option<T>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOutcome {
    Accepted,
    Rejected,
}

impl BatchOutcome {
    /// Judges the reply by script truthiness. An absent `message` means the method returned
    /// nothing, which the server only does after reconciling.
    pub fn from_message(message: Option<&Value>) -> Self {
        let Some(value) = message else {
            return Self::Accepted;
        };
        let truthy = match value {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
            Value::String(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) => true,
        };
        if truthy {
            Self::Accepted
        } else {
            Self::Rejected
        }
    }

    pub fn is_accepted(self) -> bool {
        self == Self::Accepted
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutstandingInvoiceRecord {
    pub voucher_no: String,
    #[serde(default)]
    pub voucher_type: Option<String>,
    pub posting_date: NaiveDate,
    #[serde(default)]
    pub invoice_amount: Option<f64>,
    #[serde(default)]
    pub payment_amount: Option<f64>,
    #[serde(default)]
    pub outstanding_amount: Option<f64>,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub account: Option<String>,
}

impl From<OutstandingInvoiceRecord> for InvoiceRow {
    fn from(record: OutstandingInvoiceRecord) -> Self {
        Self {
            invoice: InvoiceId(record.voucher_no),
            date: record.posting_date,
            total: record.invoice_amount.unwrap_or_default(),
            outstanding_amount: record.outstanding_amount.unwrap_or_default(),
            due_date: record.due_date,
            currency: record.currency,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DraftPaymentRecord {
    pub name: String,
    #[serde(default)]
    pub transid: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub msisdn: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    pub posting_date: NaiveDate,
    #[serde(default)]
    pub posting_time: Option<String>,
    #[serde(default)]
    pub transamount: Option<f64>,
}

impl From<DraftPaymentRecord> for PaymentRow {
    fn from(record: DraftPaymentRecord) -> Self {
        Self {
            payment_id: PaymentId(record.name),
            full_name: record.full_name.unwrap_or_default(),
            date: record.posting_date,
            amount: record.transamount.unwrap_or_default(),
            transaction_id: record.transid,
            msisdn: record.msisdn,
        }
    }
}

/// The Payment Entry created by the legacy single-payment submit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEntrySummary {
    pub name: String,
    #[serde(default)]
    pub party: Option<String>,
    #[serde(default)]
    pub paid_amount: Option<f64>,
    #[serde(default)]
    pub docstatus: Option<u8>,
}
