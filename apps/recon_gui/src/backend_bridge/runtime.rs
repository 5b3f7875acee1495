//! Runtime bridge between UI command queue and backend event intake.

use std::{sync::Arc, thread};

use client_core::{
    settings::ClientSettings, FrappeClient, ReconciliationBackend, ReconciliationSession,
};
use crossbeam_channel::{Receiver, Sender};
use tokio::sync::broadcast::error::RecvError;

use crate::backend_bridge::commands::BackendCommand;
use crate::controller::events::{UiError, UiErrorContext, UiEvent};

pub fn launch(settings: ClientSettings, cmd_rx: Receiver<BackendCommand>, ui_tx: Sender<UiEvent>) {
    thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(err) => {
                let _ = ui_tx.try_send(UiEvent::Error(UiError::from_message(
                    UiErrorContext::BackendStartup,
                    format!("backend worker startup failure: failed to build runtime: {err}"),
                )));
                tracing::error!("failed to build backend runtime: {err}");
                return;
            }
        };

        runtime.block_on(run_worker(settings, cmd_rx, ui_tx));
    });
}

async fn run_worker(
    settings: ClientSettings,
    cmd_rx: Receiver<BackendCommand>,
    ui_tx: Sender<UiEvent>,
) {
    let client = match FrappeClient::from_settings(&settings) {
        Ok(client) => Arc::new(client),
        Err(err) => {
            let _ = ui_tx.try_send(UiEvent::Error(UiError::from_message(
                UiErrorContext::BackendStartup,
                format!("backend worker startup failure: {err:#}"),
            )));
            tracing::error!("failed to build frappe client: {err:#}");
            return;
        }
    };

    let session = ReconciliationSession::new(client.clone(), settings.retry_policy());
    session.load(&settings.screen_defaults()).await;
    spawn_event_forwarder(&session, ui_tx.clone());

    let _ = ui_tx.try_send(UiEvent::ContextLoaded(session.snapshot().await.context));
    let _ = ui_tx.try_send(UiEvent::Capabilities(session.refresh().await));
    let _ = ui_tx.try_send(UiEvent::Info(format!("Connected to {}", client.site_url())));

    // Blocking recv on the worker thread keeps commands strictly ordered.
    while let Ok(cmd) = cmd_rx.recv() {
        let name = cmd.name();
        tracing::debug!(command = name, "backend command received");
        match cmd {
            BackendCommand::Refresh => {}
            BackendCommand::UpdateContext { context } => {
                if let Err(err) = session.update_context(|current| *current = context).await {
                    report(&ui_tx, UiErrorContext::General, &err);
                }
            }
            BackendCommand::FetchEntries => {
                if let Err(err) = session.fetch_entries().await {
                    report(&ui_tx, UiErrorContext::Fetch, &err);
                }
            }
            BackendCommand::ProcessPayments => {
                if let Err(err) = session.process_payments().await {
                    report(&ui_tx, UiErrorContext::Process, &err);
                }
            }
            BackendCommand::ListModesOfPayment { company } => {
                match client.list_mpesa_modes_of_payment(&company).await {
                    Ok(modes) => {
                        let _ = ui_tx.try_send(UiEvent::ModesOfPaymentLoaded(modes));
                    }
                    Err(err) => report(&ui_tx, UiErrorContext::ModesOfPayment, &err),
                }
            }
        }
        let _ = ui_tx.try_send(UiEvent::Capabilities(session.refresh().await));
    }
    tracing::info!("ui command channel closed; backend worker exiting");
}

fn spawn_event_forwarder(session: &ReconciliationSession, ui_tx: Sender<UiEvent>) {
    let mut events = session.subscribe_events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let _ = ui_tx.try_send(UiEvent::Session(event));
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "ui lagged behind session events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

fn report(ui_tx: &Sender<UiEvent>, context: UiErrorContext, err: &anyhow::Error) {
    tracing::warn!(?context, "backend command failed: {err:#}");
    let _ = ui_tx.try_send(UiEvent::Error(UiError::from_error(context, err)));
}
