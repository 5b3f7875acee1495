use super::*;
use anyhow::anyhow;
use chrono::NaiveDate;
use shared::{
    domain::{Indicator, InvoiceId, PaymentId},
    error::{ErrorCode, RemoteError},
};

fn date(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, d).expect("valid date")
}

fn invoice(name: &str) -> InvoiceRow {
    InvoiceRow {
        invoice: InvoiceId::new(name),
        date: date(1),
        total: 1000.0,
        outstanding_amount: 400.0,
        due_date: None,
        currency: Some("KES".into()),
    }
}

fn payment(name: &str) -> PaymentRow {
    PaymentRow {
        payment_id: PaymentId::new(name),
        full_name: "JANE DOE".into(),
        date: date(2),
        amount: 200.0,
        transaction_id: None,
        msisdn: None,
    }
}

fn ready_context() -> FormContext {
    FormContext {
        company: Some("Acme Ltd".into()),
        currency: Some("KES".into()),
        customer: Some("CUST-0001".into()),
        ..Default::default()
    }
}

fn fetched_screen(invoices: &[&str], payments: &[&str]) -> ReconciliationScreen {
    let mut screen = ReconciliationScreen::new(ready_context());
    screen.begin_fetch().expect("begin fetch");
    screen
        .apply_invoices(Ok(invoices.iter().map(|n| invoice(n)).collect()))
        .expect("apply invoices");
    screen
        .apply_payments(Ok(payments.iter().map(|n| payment(n)).collect()))
        .expect("apply payments");
    screen
}

#[test]
fn load_fills_defaults_without_overwriting_operator_input() {
    let mut screen = ReconciliationScreen::new(FormContext {
        currency: Some("USD".into()),
        ..Default::default()
    });
    screen.on_load(&ScreenDefaults {
        company: Some("Acme Ltd".into()),
        currency: Some("KES".into()),
    });
    assert_eq!(screen.context().company(), Some("Acme Ltd"));
    assert_eq!(screen.context().currency(), Some("USD"));
}

#[test]
fn refresh_disables_save_and_row_insertion() {
    let screen = ReconciliationScreen::default();
    let caps = screen.on_refresh();
    assert!(!caps.save_enabled);
    assert!(!caps.invoices_insertable);
    assert!(!caps.payments_insertable);
    assert!(caps.fetch_action_visible);
    assert!(!caps.process_action_visible);
}

#[test]
fn fetch_requires_company_currency_and_customer() {
    let mut screen = ReconciliationScreen::new(FormContext {
        company: Some("Acme Ltd".into()),
        ..Default::default()
    });
    let err = screen.begin_fetch().expect_err("currency missing");
    assert_eq!(
        err,
        ScreenError::Validation("currency is required before fetching entries".into())
    );
    assert_eq!(screen.state(), ScreenState::Idle);
}

#[test]
fn fetch_rejects_inverted_date_range() {
    let mut context = ready_context();
    context.date_range = shared::domain::DateRange::new(Some(date(5)), Some(date(4)));
    let mut screen = ReconciliationScreen::new(context);
    assert!(matches!(
        screen.begin_fetch(),
        Err(ScreenError::Validation(_))
    ));
}

#[test]
fn both_tables_filled_makes_screen_ready() {
    let screen = fetched_screen(&["A", "B"], &["X"]);
    assert_eq!(screen.state(), ScreenState::ReadyToProcess);
    assert!(screen.process_action_visible());
    assert!(screen.on_refresh().process_action_visible);
}

#[test]
fn empty_invoices_yield_notice_not_error() {
    let mut screen = fetched_screen(&[], &["X"]);
    assert_eq!(screen.state(), ScreenState::Idle);
    assert!(screen.invoices().is_empty());
    assert_eq!(screen.payments().len(), 1);
    assert!(!screen.process_action_visible());

    let notices = screen.take_notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].title, "No Outstanding Invoices");
    assert_eq!(notices[0].indicator, Indicator::Orange);
    assert!(screen.take_notices().is_empty());
}

#[test]
fn empty_payments_yield_notice_independent_of_invoices() {
    let mut screen = fetched_screen(&["A"], &[]);
    assert_eq!(screen.invoices().len(), 1);
    let notices = screen.take_notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].title, "No Outstanding Payments");
}

#[test]
fn results_may_arrive_in_either_order() {
    let mut screen = ReconciliationScreen::new(ready_context());
    screen.begin_fetch().expect("begin fetch");
    screen
        .apply_payments(Ok(vec![payment("X")]))
        .expect("payments first");
    assert_eq!(screen.state(), ScreenState::Fetching);
    screen
        .apply_invoices(Ok(vec![invoice("A")]))
        .expect("invoices second");
    assert_eq!(screen.state(), ScreenState::ReadyToProcess);
}

#[test]
fn fetch_failure_on_one_side_keeps_other_rows() {
    let mut screen = ReconciliationScreen::new(ready_context());
    screen.begin_fetch().expect("begin fetch");
    screen
        .apply_invoices(Err(RemoteError::new(403, ErrorCode::Forbidden, "Not permitted").into()))
        .expect("apply invoices");
    screen
        .apply_payments(Ok(vec![payment("X")]))
        .expect("apply payments");

    assert_eq!(screen.state(), ScreenState::Idle);
    assert_eq!(screen.payments().len(), 1);
    let notices = screen.take_notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].indicator, Indicator::Red);
    assert_eq!(notices[0].message, "Not permitted");
}

#[test]
fn refetch_clears_tables_first() {
    let mut screen = fetched_screen(&["A"], &["X"]);
    screen.begin_fetch().expect("refetch from ready");
    assert!(screen.invoices().is_empty());
    assert!(screen.payments().is_empty());
    assert!(!screen.on_refresh().fetch_action_visible);
}

#[test]
fn fetch_while_fetching_is_rejected() {
    let mut screen = ReconciliationScreen::new(ready_context());
    screen.begin_fetch().expect("begin fetch");
    assert_eq!(
        screen.begin_fetch(),
        Err(ScreenError::InvalidTransition {
            from: ScreenState::Fetching,
            action: ScreenAction::Fetch,
        })
    );
    assert!(screen.edit_context(|ctx| ctx.customer = None).is_err());
}

#[test]
fn late_duplicate_result_is_rejected() {
    let mut screen = fetched_screen(&["A"], &["X"]);
    assert!(screen.apply_invoices(Ok(vec![invoice("B")])).is_err());
    assert_eq!(screen.invoices()[0].invoice.as_str(), "A");
}

#[test]
fn batch_request_carries_every_identifier_in_grid_order() {
    let mut screen = fetched_screen(&["A", "B"], &["X", "Y"]);
    let request = screen.begin_process().expect("begin process");
    assert_eq!(
        request.invoice_names,
        vec![InvoiceId::new("A"), InvoiceId::new("B")]
    );
    assert_eq!(
        request.mpesa_names,
        vec![PaymentId::new("X"), PaymentId::new("Y")]
    );
    assert_eq!(screen.state(), ScreenState::Processing);
    assert!(!screen.on_refresh().process_action_visible);
}

#[test]
fn process_is_refused_unless_both_tables_have_rows() {
    let mut screen = fetched_screen(&["A"], &[]);
    assert!(matches!(
        screen.begin_process(),
        Err(ScreenError::InvalidTransition {
            action: ScreenAction::Process,
            ..
        })
    ));
}

#[test]
fn accepted_batch_clears_both_tables() {
    let mut screen = fetched_screen(&["A", "B"], &["X", "Y"]);
    screen.begin_process().expect("begin process");
    let outcome = screen
        .finish_process(Ok(BatchOutcome::Accepted))
        .expect("finish");
    assert_eq!(outcome, BatchOutcome::Accepted);
    assert!(screen.invoices().is_empty());
    assert!(screen.payments().is_empty());
    assert_eq!(screen.state(), ScreenState::Idle);
    assert!(!screen.process_action_visible());

    let notices = screen.take_notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].indicator, Indicator::Green);
    assert_eq!(
        notices[0].message,
        "Reconciled 2 payment(s) against 2 invoice(s)."
    );
}

#[test]
fn rejected_batch_leaves_tables_intact() {
    let mut screen = fetched_screen(&["A"], &["X"]);
    screen.begin_process().expect("begin process");
    let outcome = screen
        .finish_process(Ok(BatchOutcome::Rejected))
        .expect("finish");
    assert_eq!(outcome, BatchOutcome::Rejected);
    assert_eq!(screen.invoices().len(), 1);
    assert_eq!(screen.payments().len(), 1);
    assert_eq!(screen.state(), ScreenState::ReadyToProcess);

    let notices = screen.take_notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].title, "Reconciliation Failed");
    assert_eq!(notices[0].indicator, Indicator::Red);
}

#[test]
fn failed_batch_reports_single_aggregate_notice() {
    let mut screen = fetched_screen(&["A"], &["X", "Y"]);
    screen.begin_process().expect("begin process");
    screen
        .finish_process(Err(anyhow!("connection reset")))
        .expect("finish");
    assert_eq!(screen.payments().len(), 2);
    let notices = screen.take_notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].message, "connection reset");
}

#[test]
fn visibility_predicate_needs_both_tables() {
    assert!(!process_action_visible(&[], &[]));
    assert!(!process_action_visible(&[invoice("A")], &[]));
    assert!(!process_action_visible(&[], &[payment("X")]));
    assert!(process_action_visible(&[invoice("A")], &[payment("X")]));
}
