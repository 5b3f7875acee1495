use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

macro_rules! name_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.pad(&self.0)
            }
        }
    };
}

name_newtype!(InvoiceId);
name_newtype!(PaymentId);

/// One outstanding invoice as shown in the invoices grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceRow {
    pub invoice: InvoiceId,
    pub date: NaiveDate,
    pub total: f64,
    pub outstanding_amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

/// One unreconciled M-Pesa payment as shown in the payments grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRow {
    pub payment_id: PaymentId,
    pub full_name: String,
    pub date: NaiveDate,
    pub amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msisdn: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        Self { from, to }
    }

    pub fn validate(&self) -> Result<(), String> {
        match (self.from, self.to) {
            (Some(from), Some(to)) if from > to => {
                Err(format!("from date {from} is after to date {to}"))
            }
            _ => Ok(()),
        }
    }
}

/// Operator-supplied query parameters for one screen session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormContext {
    pub company: Option<String>,
    pub currency: Option<String>,
    pub customer: Option<String>,
    /// Payer name filter for draft payments.
    pub full_name: Option<String>,
    /// Restricts outstanding invoices to a single voucher.
    pub invoice_filter: Option<String>,
    pub date_range: DateRange,
    pub mode_of_payment: Option<String>,
}

impl FormContext {
    /// Returns the first required field that is unset or blank.
    pub fn missing_required_field(&self) -> Option<&'static str> {
        [
            ("company", &self.company),
            ("currency", &self.currency),
            ("customer", &self.customer),
        ]
        .into_iter()
        .find(|(_, value)| non_blank(value.as_deref()).is_none())
        .map(|(field, _)| field)
    }

    pub fn company(&self) -> Option<&str> {
        non_blank(self.company.as_deref())
    }

    pub fn currency(&self) -> Option<&str> {
        non_blank(self.currency.as_deref())
    }

    pub fn customer(&self) -> Option<&str> {
        non_blank(self.customer.as_deref())
    }

    pub fn full_name(&self) -> Option<&str> {
        non_blank(self.full_name.as_deref())
    }

    pub fn invoice_filter(&self) -> Option<&str> {
        non_blank(self.invoice_filter.as_deref())
    }

    pub fn mode_of_payment(&self) -> Option<&str> {
        non_blank(self.mode_of_payment.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Indicator {
    Blue,
    Green,
    Orange,
    Red,
}

/// A non-blocking, toast-style message for the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub title: String,
    pub message: String,
    pub indicator: Indicator,
}

impl Notice {
    pub fn new(indicator: Indicator, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            indicator,
        }
    }

    pub fn info(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Indicator::Orange, title, message)
    }

    pub fn success(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Indicator::Green, title, message)
    }

    pub fn failure(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Indicator::Red, title, message)
    }
}
