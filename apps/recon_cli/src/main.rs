use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use client_core::{
    describe_error,
    settings::{load_settings, ClientSettings},
    FrappeClient, ReconciliationBackend, ReconciliationSession, ScreenSnapshot, SessionEvent,
};
use shared::{
    domain::{DateRange, FormContext, Indicator, Notice, PaymentId},
    protocol::BatchOutcome,
};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Reconcile M-Pesa payments against outstanding invoices")]
struct Cli {
    /// Settings file (defaults to ./recon.toml or $RECON_CONFIG).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Overrides the configured site URL.
    #[arg(long, global = true)]
    site_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch outstanding invoices and unreconciled payments.
    Fetch {
        #[command(flatten)]
        form: FormArgs,
        /// Print the screen snapshot as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Fetch entries, then reconcile every listed payment against every listed invoice in one batch.
    Process {
        #[command(flatten)]
        form: FormArgs,
        /// Submit the batch. Without it the batch is only printed.
        #[arg(long)]
        yes: bool,
    },
    /// List the company's M-Pesa modes of payment.
    Modes {
        #[arg(long)]
        company: Option<String>,
    },
    /// Submit a single M-Pesa payment for a customer (legacy, outside the batch flow).
    SubmitPayment {
        #[arg(long)]
        payment: String,
        #[arg(long)]
        customer: String,
    },
}

#[derive(Args, Debug, Default)]
struct FormArgs {
    #[arg(long)]
    company: Option<String>,
    #[arg(long)]
    currency: Option<String>,
    #[arg(long)]
    customer: Option<String>,
    /// Payer name filter for payments.
    #[arg(long)]
    full_name: Option<String>,
    /// Restrict invoices to one invoice number.
    #[arg(long)]
    invoice: Option<String>,
    #[arg(long)]
    from_date: Option<NaiveDate>,
    #[arg(long)]
    to_date: Option<NaiveDate>,
    #[arg(long)]
    mode_of_payment: Option<String>,
}

impl FormArgs {
    /// Flags win over configured defaults.
    fn into_context(self, settings: &ClientSettings) -> FormContext {
        FormContext {
            company: self.company.or_else(|| settings.default_company.clone()),
            currency: self.currency.or_else(|| settings.default_currency.clone()),
            customer: self.customer,
            full_name: self.full_name,
            invoice_filter: self.invoice,
            date_range: DateRange::new(self.from_date, self.to_date),
            mode_of_payment: self.mode_of_payment,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let mut settings = load_settings(cli.config.as_deref())?;
    if let Some(site_url) = cli.site_url {
        settings.site_url = site_url;
    }
    let client = Arc::new(FrappeClient::from_settings(&settings)?);

    match cli.command {
        Command::Fetch { form, json } => {
            let session = ReconciliationSession::with_context(
                client,
                settings.retry_policy(),
                form.into_context(&settings),
            );
            let mut events = session.subscribe_events();
            let snapshot = session.fetch_entries().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                print_snapshot(&snapshot);
            }
            print_notices(&mut events);
        }
        Command::Process { form, yes } => {
            let session = ReconciliationSession::with_context(
                client,
                settings.retry_policy(),
                form.into_context(&settings),
            );
            let mut events = session.subscribe_events();
            let snapshot = session.fetch_entries().await?;
            print_snapshot(&snapshot);
            print_notices(&mut events);

            if !snapshot.process_action_visible {
                bail!("nothing to process: both invoices and payments are needed");
            }
            if !yes {
                println!(
                    "Dry run: would reconcile {} payment(s) against {} invoice(s). Re-run with --yes to submit.",
                    snapshot.payments.len(),
                    snapshot.invoices.len()
                );
                return Ok(());
            }

            let outcome = session.process_payments().await?;
            print_notices(&mut events);
            if outcome == BatchOutcome::Rejected {
                bail!("reconciliation was not confirmed by the server");
            }
        }
        Command::Modes { company } => {
            let Some(company) = company.or(settings.default_company) else {
                bail!("--company is required when no default company is configured");
            };
            for mode in client.list_mpesa_modes_of_payment(&company).await? {
                println!("{mode}");
            }
        }
        Command::SubmitPayment { payment, customer } => {
            match client
                .submit_mpesa_payment(&PaymentId::new(payment), &customer)
                .await
            {
                Ok(entry) => println!("Created payment entry {}", entry.name),
                Err(err) => bail!("payment submit failed: {}", describe_error(&err)),
            }
        }
    }

    Ok(())
}

fn print_snapshot(snapshot: &ScreenSnapshot) {
    println!("Invoices ({})", snapshot.invoices.len());
    for row in &snapshot.invoices {
        println!(
            "  {:<24} {:<10} total {:>12.2}  outstanding {:>12.2}",
            row.invoice, row.date, row.total, row.outstanding_amount
        );
    }
    println!("Payments ({})", snapshot.payments.len());
    for row in &snapshot.payments {
        println!(
            "  {:<24} {:<10} {:>12.2}  {}",
            row.payment_id, row.date, row.amount, row.full_name
        );
    }
}

fn print_notices(events: &mut broadcast::Receiver<SessionEvent>) {
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::Notice(notice) = event {
            eprintln!("{}", format_notice(&notice));
        }
    }
}

fn format_notice(notice: &Notice) -> String {
    let tag = match notice.indicator {
        Indicator::Green => "ok",
        Indicator::Orange => "note",
        Indicator::Red => "error",
        Indicator::Blue => "info",
    };
    format!("[{tag}] {}: {}", notice.title, notice.message)
}
