//! Application shell for the reconciliation screen.

use std::time::{Duration, Instant};

use chrono::NaiveDate;
use client_core::{FormCapabilities, ScreenState, SessionEvent};
use crossbeam_channel::{Receiver, Sender};
use eframe::egui;
use shared::domain::{DateRange, FormContext, Indicator, InvoiceRow, Notice, PaymentRow};

use crate::backend_bridge::commands::BackendCommand;
use crate::controller::{
    events::{UiError, UiErrorCategory, UiEvent},
    orchestration::dispatch_backend_command,
};

const TOAST_LIFETIME: Duration = Duration::from_secs(6);
const DATE_FORMAT: &str = "%Y-%m-%d";
const FETCH_ACTION_LABEL: &str = "Fetch Entries";
const PROCESS_ACTION_LABEL: &str = "Process Payments";

fn err_label(category: UiErrorCategory) -> &'static str {
    match category {
        UiErrorCategory::Auth => "Auth",
        UiErrorCategory::Transport => "Network",
        UiErrorCategory::Validation => "Validation",
        UiErrorCategory::Server => "Server",
        UiErrorCategory::Unknown => "Error",
    }
}

fn indicator_color(indicator: Indicator) -> egui::Color32 {
    match indicator {
        Indicator::Blue => egui::Color32::from_rgb(64, 120, 192),
        Indicator::Green => egui::Color32::from_rgb(46, 139, 87),
        Indicator::Orange => egui::Color32::from_rgb(214, 137, 16),
        Indicator::Red => egui::Color32::from_rgb(178, 58, 58),
    }
}

/// Parses an optional `YYYY-MM-DD` field. Blank input means unset.
fn parse_date_field(label: &str, text: &str) -> Result<Option<NaiveDate>, String> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(text, DATE_FORMAT)
        .map(Some)
        .map_err(|_| format!("{label} must be a date like 2024-01-31"))
}

fn optional_text(text: &str) -> Option<String> {
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Editable header fields, kept as raw text until a fetch is requested.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct FormDraft {
    company: String,
    currency: String,
    customer: String,
    full_name: String,
    invoice: String,
    from_date: String,
    to_date: String,
    mode_of_payment: String,
}

impl FormDraft {
    fn from_context(context: &FormContext) -> Self {
        let date = |value: Option<NaiveDate>| {
            value
                .map(|d| d.format(DATE_FORMAT).to_string())
                .unwrap_or_default()
        };
        Self {
            company: context.company.clone().unwrap_or_default(),
            currency: context.currency.clone().unwrap_or_default(),
            customer: context.customer.clone().unwrap_or_default(),
            full_name: context.full_name.clone().unwrap_or_default(),
            invoice: context.invoice_filter.clone().unwrap_or_default(),
            from_date: date(context.date_range.from),
            to_date: date(context.date_range.to),
            mode_of_payment: context.mode_of_payment.clone().unwrap_or_default(),
        }
    }

    fn to_context(&self) -> Result<FormContext, String> {
        let date_range = DateRange::new(
            parse_date_field("From date", &self.from_date)?,
            parse_date_field("To date", &self.to_date)?,
        );
        date_range.validate()?;
        let context = FormContext {
            company: optional_text(&self.company),
            currency: optional_text(&self.currency),
            customer: optional_text(&self.customer),
            full_name: optional_text(&self.full_name),
            invoice_filter: optional_text(&self.invoice),
            date_range,
            mode_of_payment: optional_text(&self.mode_of_payment),
        };
        if let Some(field) = context.missing_required_field() {
            return Err(format!("{field} is required"));
        }
        Ok(context)
    }
}

struct Toast {
    notice: Notice,
    shown_at: Instant,
}

pub struct ReconGuiApp {
    cmd_tx: Sender<BackendCommand>,
    ui_rx: Receiver<UiEvent>,
    site_url: String,
    status: String,
    status_banner: Option<UiError>,
    form: FormDraft,
    form_error: Option<String>,
    modes_of_payment: Vec<String>,
    state: ScreenState,
    capabilities: Option<FormCapabilities>,
    invoices: Vec<InvoiceRow>,
    payments: Vec<PaymentRow>,
    toasts: Vec<Toast>,
    confirm_process_open: bool,
}

impl ReconGuiApp {
    pub fn new(cmd_tx: Sender<BackendCommand>, ui_rx: Receiver<UiEvent>, site_url: String) -> Self {
        Self {
            cmd_tx,
            ui_rx,
            site_url,
            status: "Connecting".to_string(),
            status_banner: None,
            form: FormDraft::default(),
            form_error: None,
            modes_of_payment: Vec::new(),
            state: ScreenState::Idle,
            capabilities: None,
            invoices: Vec::new(),
            payments: Vec::new(),
            toasts: Vec::new(),
            confirm_process_open: false,
        }
    }

    fn process_ui_events(&mut self) {
        while let Ok(event) = self.ui_rx.try_recv() {
            match event {
                UiEvent::Info(message) => {
                    self.status = message;
                }
                UiEvent::Error(err) => {
                    tracing::warn!(
                        category = ?err.category(),
                        context = ?err.context(),
                        "{}",
                        err.message()
                    );
                    self.status = format!("{}: {}", err_label(err.category()), err.message());
                    self.status_banner = Some(err);
                }
                UiEvent::ContextLoaded(context) => {
                    self.form = FormDraft::from_context(&context);
                    if let Some(company) = context.company() {
                        let company = company.to_string();
                        self.queue(BackendCommand::ListModesOfPayment { company });
                    }
                }
                UiEvent::Capabilities(capabilities) => {
                    self.capabilities = Some(capabilities);
                }
                UiEvent::ModesOfPaymentLoaded(modes) => {
                    if self.form.mode_of_payment.trim().is_empty() && modes.len() == 1 {
                        self.form.mode_of_payment = modes[0].clone();
                    }
                    self.modes_of_payment = modes;
                }
                UiEvent::Session(SessionEvent::StateChanged(state)) => {
                    self.state = state;
                    self.status = format!("Screen is {state}");
                }
                UiEvent::Session(SessionEvent::InvoicesUpdated(rows)) => {
                    self.invoices = rows;
                }
                UiEvent::Session(SessionEvent::PaymentsUpdated(rows)) => {
                    self.payments = rows;
                }
                UiEvent::Session(SessionEvent::Notice(notice)) => {
                    self.toasts.push(Toast {
                        notice,
                        shown_at: Instant::now(),
                    });
                }
            }
        }
    }

    fn queue(&mut self, cmd: BackendCommand) -> bool {
        dispatch_backend_command(&self.cmd_tx, cmd, &mut self.status)
    }

    fn fetch_enabled(&self) -> bool {
        self.capabilities
            .map(|c| c.fetch_action_visible)
            .unwrap_or(false)
            && !matches!(self.state, ScreenState::Fetching | ScreenState::Processing)
    }

    fn process_enabled(&self) -> bool {
        self.capabilities
            .map(|c| c.process_action_visible)
            .unwrap_or(false)
            && self.state == ScreenState::ReadyToProcess
    }

    fn request_fetch(&mut self) {
        match self.form.to_context() {
            Ok(context) => {
                self.form_error = None;
                self.status_banner = None;
                if self.queue(BackendCommand::UpdateContext { context }) {
                    self.queue(BackendCommand::FetchEntries);
                }
            }
            Err(message) => self.form_error = Some(message),
        }
    }

    fn request_process(&mut self) {
        self.confirm_process_open = false;
        self.status_banner = None;
        self.queue(BackendCommand::ProcessPayments);
    }

    fn expire_toasts(&mut self, now: Instant) {
        self.toasts
            .retain(|toast| now.duration_since(toast.shown_at) < TOAST_LIFETIME);
    }

    fn show_status_banner(&mut self, ui: &mut egui::Ui) {
        let Some(banner) = self.status_banner.clone() else {
            return;
        };
        egui::Frame::NONE
            .fill(egui::Color32::from_rgb(111, 53, 53))
            .stroke(egui::Stroke::new(1.0, egui::Color32::from_rgb(175, 96, 96)))
            .corner_radius(8.0)
            .inner_margin(egui::Margin::symmetric(10, 8))
            .show(ui, |ui| {
                ui.horizontal_wrapped(|ui| {
                    ui.label(
                        egui::RichText::new(banner.banner_text()).color(egui::Color32::WHITE),
                    );
                    ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                        if ui.button("Dismiss").clicked() {
                            self.status_banner = None;
                        }
                    });
                });
            });
    }

    fn show_header_form(&mut self, ui: &mut egui::Ui) {
        egui::Grid::new("recon_header_form")
            .num_columns(4)
            .spacing([12.0, 6.0])
            .show(ui, |ui| {
                ui.label("Company");
                ui.text_edit_singleline(&mut self.form.company);
                ui.label("Currency");
                ui.text_edit_singleline(&mut self.form.currency);
                ui.end_row();

                ui.label("Customer");
                ui.text_edit_singleline(&mut self.form.customer);
                ui.label("Payer name");
                ui.text_edit_singleline(&mut self.form.full_name);
                ui.end_row();

                ui.label("Invoice");
                ui.text_edit_singleline(&mut self.form.invoice);
                ui.label("Mode of payment");
                ui.horizontal(|ui| {
                    let selected = if self.form.mode_of_payment.is_empty() {
                        "Any".to_string()
                    } else {
                        self.form.mode_of_payment.clone()
                    };
                    egui::ComboBox::from_id_salt("mode_of_payment_combo")
                        .selected_text(selected)
                        .show_ui(ui, |ui| {
                            ui.selectable_value(&mut self.form.mode_of_payment, String::new(), "Any");
                            for mode in &self.modes_of_payment {
                                ui.selectable_value(
                                    &mut self.form.mode_of_payment,
                                    mode.clone(),
                                    mode.as_str(),
                                );
                            }
                        });
                    if ui
                        .small_button("Reload")
                        .on_hover_text("Reload M-Pesa modes of payment for the company")
                        .clicked()
                    {
                        if let Some(company) = optional_text(&self.form.company) {
                            self.queue(BackendCommand::ListModesOfPayment { company });
                        } else {
                            self.form_error = Some("company is required".to_string());
                        }
                    }
                });
                ui.end_row();

                ui.label("From date");
                ui.add(egui::TextEdit::singleline(&mut self.form.from_date).hint_text("YYYY-MM-DD"));
                ui.label("To date");
                ui.add(egui::TextEdit::singleline(&mut self.form.to_date).hint_text("YYYY-MM-DD"));
                ui.end_row();
            });

        if let Some(message) = &self.form_error {
            ui.colored_label(indicator_color(Indicator::Red), message.as_str());
        }
    }

    fn show_actions(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            if ui
                .add_enabled(self.fetch_enabled(), egui::Button::new(FETCH_ACTION_LABEL))
                .clicked()
            {
                self.request_fetch();
            }
            let process_visible = self
                .capabilities
                .map(|c| c.process_action_visible)
                .unwrap_or(false);
            if process_visible
                && ui
                    .add_enabled(self.process_enabled(), egui::Button::new(PROCESS_ACTION_LABEL))
                    .clicked()
            {
                self.confirm_process_open = true;
            }
            if matches!(self.state, ScreenState::Fetching | ScreenState::Processing) {
                ui.spinner();
            }
        });
    }

    fn show_invoices(&self, ui: &mut egui::Ui) {
        ui.heading(format!("Outstanding Invoices ({})", self.invoices.len()));
        egui::ScrollArea::vertical()
            .id_salt("invoices_scroll")
            .max_height(ui.available_height() / 2.0)
            .show(ui, |ui| {
                egui::Grid::new("invoices_grid")
                    .num_columns(5)
                    .striped(true)
                    .spacing([18.0, 4.0])
                    .show(ui, |ui| {
                        for title in ["Invoice", "Date", "Due", "Total", "Outstanding"] {
                            ui.strong(title);
                        }
                        ui.end_row();
                        for row in &self.invoices {
                            ui.label(row.invoice.as_str());
                            ui.label(row.date.to_string());
                            ui.label(row.due_date.map(|d| d.to_string()).unwrap_or_default());
                            ui.label(format!("{:.2}", row.total));
                            ui.label(format!("{:.2}", row.outstanding_amount));
                            ui.end_row();
                        }
                    });
            });
    }

    fn show_payments(&self, ui: &mut egui::Ui) {
        ui.heading(format!("Unreconciled Payments ({})", self.payments.len()));
        egui::ScrollArea::vertical()
            .id_salt("payments_scroll")
            .show(ui, |ui| {
                egui::Grid::new("payments_grid")
                    .num_columns(5)
                    .striped(true)
                    .spacing([18.0, 4.0])
                    .show(ui, |ui| {
                        for title in ["Payment", "Payer", "Date", "Amount", "Transaction"] {
                            ui.strong(title);
                        }
                        ui.end_row();
                        for row in &self.payments {
                            ui.label(row.payment_id.as_str());
                            ui.label(row.full_name.as_str());
                            ui.label(row.date.to_string());
                            ui.label(format!("{:.2}", row.amount));
                            ui.label(row.transaction_id.as_deref().unwrap_or(""));
                            ui.end_row();
                        }
                    });
            });
    }

    fn show_confirm_process(&mut self, ctx: &egui::Context) {
        if !self.confirm_process_open {
            return;
        }
        let mut confirmed = false;
        let mut cancelled = false;
        egui::Window::new(PROCESS_ACTION_LABEL)
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, |ui| {
                ui.label(format!(
                    "Reconcile {} payment(s) against {} invoice(s)?",
                    self.payments.len(),
                    self.invoices.len()
                ));
                ui.horizontal(|ui| {
                    confirmed = ui.button("Process").clicked();
                    cancelled = ui.button("Cancel").clicked();
                });
            });
        if confirmed {
            self.request_process();
        } else if cancelled {
            self.confirm_process_open = false;
        }
    }

    fn show_toasts(&self, ctx: &egui::Context) {
        if self.toasts.is_empty() {
            return;
        }
        egui::Area::new(egui::Id::new("notice_toasts"))
            .anchor(egui::Align2::RIGHT_BOTTOM, [-12.0, -36.0])
            .show(ctx, |ui| {
                for toast in &self.toasts {
                    egui::Frame::popup(ui.style())
                        .stroke(egui::Stroke::new(1.5, indicator_color(toast.notice.indicator)))
                        .show(ui, |ui| {
                            ui.set_max_width(320.0);
                            ui.strong(toast.notice.title.as_str());
                            ui.label(toast.notice.message.as_str());
                        });
                    ui.add_space(6.0);
                }
            });
    }
}

impl eframe::App for ReconGuiApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.process_ui_events();
        self.expire_toasts(Instant::now());

        egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.label(self.site_url.as_str());
                ui.separator();
                ui.label(self.status.as_str());
            });
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            self.show_status_banner(ui);
            self.show_header_form(ui);
            ui.add_space(8.0);
            self.show_actions(ui);
            ui.separator();
            self.show_invoices(ui);
            ui.separator();
            self.show_payments(ui);
        });

        self.show_confirm_process(ctx);
        self.show_toasts(ctx);

        ctx.request_repaint_after(Duration::from_millis(100));
    }
}
