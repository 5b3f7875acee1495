//! Backend commands queued from UI to backend worker.

use shared::domain::FormContext;

pub enum BackendCommand {
    Refresh,
    UpdateContext { context: FormContext },
    FetchEntries,
    ProcessPayments,
    ListModesOfPayment { company: String },
}

impl BackendCommand {
    pub fn name(&self) -> &'static str {
        match self {
            BackendCommand::Refresh => "refresh",
            BackendCommand::UpdateContext { .. } => "update_context",
            BackendCommand::FetchEntries => "fetch_entries",
            BackendCommand::ProcessPayments => "process_payments",
            BackendCommand::ListModesOfPayment { .. } => "list_modes_of_payment",
        }
    }
}
