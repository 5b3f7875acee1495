use super::*;
use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use chrono::NaiveDate;
use serde_json::json;
use shared::{
    domain::{DateRange, InvoiceId},
    error::ErrorCode,
};
use tokio::{net::TcpListener, sync::Mutex};

#[derive(Debug, Clone)]
struct RecordedCall {
    method: String,
    authorization: Option<String>,
    body: Value,
}

#[derive(Clone, Default)]
struct ServerState {
    replies: Arc<Mutex<HashMap<String, Vec<(StatusCode, Value)>>>>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl ServerState {
    async fn reply(&self, function: &str, status: StatusCode, body: Value) {
        self.replies
            .lock()
            .await
            .entry(function.to_string())
            .or_default()
            .push((status, body));
    }

    async fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().await.clone()
    }
}

async fn handle_method(
    State(state): State<ServerState>,
    Path(method): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state.calls.lock().await.push(RecordedCall {
        method: method.clone(),
        authorization: headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body,
    });

    let function = method.rsplit('.').next().unwrap_or_default().to_string();
    let mut replies = state.replies.lock().await;
    match replies.get_mut(&function) {
        Some(queue) if !queue.is_empty() => {
            let (status, body) = queue.remove(0);
            (status, Json(body))
        }
        _ => (StatusCode::NOT_FOUND, Json(json!({"exc_type": "DoesNotExistError"}))),
    }
}

async fn spawn_frappe_server() -> Result<(String, ServerState)> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let state = ServerState::default();
    let app = Router::new()
        .route("/api/method/:method", post(handle_method))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}"), state))
}

fn context() -> FormContext {
    FormContext {
        company: Some("Acme Ltd".into()),
        currency: Some("KES".into()),
        customer: Some("CUST-0001".into()),
        ..Default::default()
    }
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

#[test]
fn invoice_args_require_customer() {
    let mut ctx = context();
    ctx.customer = Some("   ".into());
    let err = outstanding_invoices_args(&ctx).expect_err("customer missing");
    assert!(err.to_string().contains("customer"));
}

#[test]
fn payment_args_send_only_set_filters() {
    let mut ctx = context();
    ctx.full_name = Some("".into());
    ctx.mode_of_payment = Some("M-Pesa Till".into());
    ctx.date_range = DateRange::new(Some(date(2024, 1, 1)), None);
    let args = draft_payments_args(&ctx).expect("args");
    assert_eq!(
        serde_json::to_value(&args).expect("json"),
        json!({"company": "Acme Ltd", "mode_of_payment": "M-Pesa Till", "from_date": "2024-01-01"})
    );
}

#[test]
fn rejects_invalid_site_url() {
    assert!(FrappeClient::new("not a url").is_err());
}

#[test]
fn method_url_keeps_site_subpath() {
    let client = FrappeClient::new("https://erp.example.com/erp").expect("client");
    let url = client
        .method_url(RemoteMethod::GetModesOfPayment)
        .expect("url");
    assert_eq!(
        url.as_str(),
        "https://erp.example.com/erp/api/method/frappe_mpsa_payments.frappe_mpsa_payments.api.m_pesa_api.get_mpesa_mode_of_payment"
    );
}

#[tokio::test]
async fn fetches_outstanding_invoices_with_filters_and_token() {
    let (server_url, state) = spawn_frappe_server().await.expect("spawn server");
    state
        .reply(
            "get_outstanding_invoices",
            StatusCode::OK,
            json!({"message": [{
                "voucher_no": "ACC-SINV-2024-00001",
                "voucher_type": "Sales Invoice",
                "posting_date": "2024-02-01",
                "invoice_amount": 1200.0,
                "payment_amount": 200.0,
                "outstanding_amount": 1000.0,
                "due_date": "2024-02-29",
                "currency": "KES",
                "account": "Debtors - A"
            }]}),
        )
        .await;

    let client = FrappeClient::new(&server_url)
        .expect("client")
        .with_token("key", "secret");
    let mut ctx = context();
    ctx.invoice_filter = Some("ACC-SINV-2024-00001".into());
    ctx.date_range = DateRange::new(Some(date(2024, 1, 1)), Some(date(2024, 3, 1)));

    let rows = client
        .fetch_outstanding_invoices(&ctx)
        .await
        .expect("invoices");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].invoice, InvoiceId::new("ACC-SINV-2024-00001"));
    assert_eq!(rows[0].outstanding_amount, 1000.0);

    let calls = state.calls().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0].method,
        "frappe_mpsa_payments.frappe_mpsa_payments.api.payment_entry.get_outstanding_invoices"
    );
    assert_eq!(calls[0].authorization.as_deref(), Some("token key:secret"));
    assert_eq!(
        calls[0].body,
        json!({
            "company": "Acme Ltd",
            "currency": "KES",
            "customer": "CUST-0001",
            "voucher_no": "ACC-SINV-2024-00001",
            "from_date": "2024-01-01",
            "to_date": "2024-03-01"
        })
    );
}

#[tokio::test]
async fn empty_or_missing_message_reads_as_no_rows() {
    let (server_url, state) = spawn_frappe_server().await.expect("spawn server");
    state
        .reply("get_mpesa_draft_c2b_payments", StatusCode::OK, json!({"message": []}))
        .await;
    state
        .reply("get_outstanding_invoices", StatusCode::OK, json!({}))
        .await;

    let client = FrappeClient::new(&server_url).expect("client");
    assert!(client
        .fetch_draft_payments(&context())
        .await
        .expect("payments")
        .is_empty());
    assert!(client
        .fetch_outstanding_invoices(&context())
        .await
        .expect("invoices")
        .is_empty());
    assert!(state.calls().await[0].authorization.is_none());
}

#[tokio::test]
async fn decodes_draft_payments() {
    let (server_url, state) = spawn_frappe_server().await.expect("spawn server");
    state
        .reply(
            "get_mpesa_draft_c2b_payments",
            StatusCode::OK,
            json!({"message": [{
                "name": "MPESA-C2B-00042",
                "transid": "SBC12XYZ9",
                "company": "Acme Ltd",
                "msisdn": "2547XXXXXXXX",
                "full_name": "JANE DOE",
                "posting_date": "2024-02-03",
                "posting_time": "10:15:00",
                "transamount": 750.0
            }]}),
        )
        .await;

    let client = FrappeClient::new(&server_url).expect("client");
    let rows = client.fetch_draft_payments(&context()).await.expect("payments");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].payment_id.as_str(), "MPESA-C2B-00042");
    assert_eq!(rows[0].full_name, "JANE DOE");
    assert_eq!(rows[0].amount, 750.0);
    assert_eq!(state.calls().await[0].body, json!({"company": "Acme Ltd"}));
}

#[tokio::test]
async fn batch_reconciliation_sends_both_lists_in_one_call() {
    let (server_url, state) = spawn_frappe_server().await.expect("spawn server");
    state
        .reply("process_mpesa_c2b_reconciliation", StatusCode::OK, json!({}))
        .await;

    let client = FrappeClient::new(&server_url).expect("client");
    let request = BatchReconcileRequest::new(
        vec![InvoiceId::new("A"), InvoiceId::new("B")],
        vec![PaymentId::new("X"), PaymentId::new("Y")],
    );
    let outcome = client.reconcile_batch(&request).await.expect("batch");
    assert_eq!(outcome, BatchOutcome::Accepted);

    let calls = state.calls().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0].body,
        json!({"mpesa_names": ["X", "Y"], "invoice_names": ["A", "B"]})
    );
}

#[tokio::test]
async fn batch_reconciliation_honours_falsy_reply() {
    let (server_url, state) = spawn_frappe_server().await.expect("spawn server");
    state
        .reply(
            "process_mpesa_c2b_reconciliation",
            StatusCode::OK,
            json!({"message": false}),
        )
        .await;
    state
        .reply(
            "process_mpesa_c2b_reconciliation",
            StatusCode::OK,
            json!({"message": null}),
        )
        .await;

    let client = FrappeClient::new(&server_url).expect("client");
    let request = BatchReconcileRequest::new(vec![InvoiceId::new("A")], vec![PaymentId::new("X")]);
    assert_eq!(
        client.reconcile_batch(&request).await.expect("batch"),
        BatchOutcome::Rejected
    );
    assert_eq!(
        client.reconcile_batch(&request).await.expect("batch"),
        BatchOutcome::Rejected
    );
}

#[tokio::test]
async fn server_exception_becomes_remote_error() {
    let (server_url, state) = spawn_frappe_server().await.expect("spawn server");
    state
        .reply(
            "process_mpesa_c2b_reconciliation",
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({
                "exc_type": "QueryDeadlockError",
                "exception": "frappe.exceptions.QueryDeadlockError: Deadlock found when trying to get lock"
            }),
        )
        .await;

    let client = FrappeClient::new(&server_url).expect("client");
    let request = BatchReconcileRequest::new(vec![InvoiceId::new("A")], vec![PaymentId::new("X")]);
    let err = client.reconcile_batch(&request).await.expect_err("deadlock");
    let remote = err.downcast_ref::<RemoteError>().expect("remote error");
    assert_eq!(remote.status, 500);
    assert_eq!(remote.code, ErrorCode::Deadlock);
    assert!(retry::is_retryable_error(&err));
    assert_eq!(describe_error(&err), "Deadlock found when trying to get lock");
}

#[tokio::test]
async fn session_retries_batch_over_http_after_deadlock() {
    let (server_url, state) = spawn_frappe_server().await.expect("spawn server");
    state
        .reply(
            "get_outstanding_invoices",
            StatusCode::OK,
            json!({"message": [{"voucher_no": "A", "posting_date": "2024-02-01", "invoice_amount": 10.0, "outstanding_amount": 10.0}]}),
        )
        .await;
    state
        .reply(
            "get_mpesa_draft_c2b_payments",
            StatusCode::OK,
            json!({"message": [{"name": "X", "full_name": "JOHN", "posting_date": "2024-02-02", "transamount": 10.0}]}),
        )
        .await;
    state
        .reply(
            "process_mpesa_c2b_reconciliation",
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({"exc_type": "QueryDeadlockError"}),
        )
        .await;
    state
        .reply("process_mpesa_c2b_reconciliation", StatusCode::OK, json!({}))
        .await;

    let client = FrappeClient::new(&server_url).expect("client");
    let session =
        ReconciliationSession::with_context(Arc::new(client), RetryPolicy::immediate(3), context());
    session.fetch_entries().await.expect("fetch");
    let outcome = session.process_payments().await.expect("process");
    assert_eq!(outcome, BatchOutcome::Accepted);

    let batch_calls = state
        .calls()
        .await
        .into_iter()
        .filter(|c| c.method.ends_with("process_mpesa_c2b_reconciliation"))
        .count();
    assert_eq!(batch_calls, 2);
    assert!(session.snapshot().await.invoices.is_empty());
}

#[tokio::test]
async fn submits_single_payment_and_lists_modes() {
    let (server_url, state) = spawn_frappe_server().await.expect("spawn server");
    state
        .reply(
            "submit_mpesa_payment",
            StatusCode::OK,
            json!({"message": {"name": "ACC-PAY-2024-00003", "party": "CUST-0001", "paid_amount": 750.0, "docstatus": 1}}),
        )
        .await;
    state
        .reply(
            "get_mpesa_mode_of_payment",
            StatusCode::OK,
            json!({"message": ["M-Pesa Paybill", "M-Pesa Till"]}),
        )
        .await;

    let client = FrappeClient::new(&server_url).expect("client");
    let entry = client
        .submit_mpesa_payment(&PaymentId::new("MPESA-C2B-00042"), "CUST-0001")
        .await
        .expect("submit");
    assert_eq!(entry.name, "ACC-PAY-2024-00003");

    let modes = client
        .list_mpesa_modes_of_payment("Acme Ltd")
        .await
        .expect("modes");
    assert_eq!(modes, vec!["M-Pesa Paybill", "M-Pesa Till"]);

    let calls = state.calls().await;
    assert_eq!(
        calls[0].body,
        json!({"mpesa_payment": "MPESA-C2B-00042", "customer": "CUST-0001"})
    );
    assert_eq!(calls[1].body, json!({"company": "Acme Ltd"}));
}
