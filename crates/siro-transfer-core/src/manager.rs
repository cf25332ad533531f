// SPDX-License-Identifier: AGPL-3.0
// Siro Transfer Core - Transfer manager
//
// Bridges blocking transfer sessions with async frontends. Each transfer
// runs on tokio's blocking pool and publishes its statuses on a channel.

use crate::history::{HistoryRecord, HistorySink};
use crate::preflight::CrocInstallation;
use crate::session::{
    CancelHandle, CommandBuilder, TerminalResult, TransferCommand, TransferObserver,
    TransferSession,
};
use crate::types::{AppError, AppSettings, TransferDirection, TransferRequest, TransferStatus};
use async_channel::{Receiver, Sender};
use std::sync::Arc;

/// Starts transfers against a checked croc installation
pub struct TransferManager {
    settings: AppSettings,
    installation: CrocInstallation,
    history: Option<Arc<dyn HistorySink>>,
}

impl TransferManager {
    pub fn new(settings: AppSettings, installation: CrocInstallation) -> Self {
        Self {
            settings,
            installation,
            history: None,
        }
    }

    /// Record every finished transfer in `history`
    pub fn with_history(mut self, history: Arc<dyn HistorySink>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn installation(&self) -> &CrocInstallation {
        &self.installation
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    /// Resolve a request into a command, creating the receive directory
    /// when configured to
    pub fn prepare(&self, request: &TransferRequest) -> Result<TransferCommand, AppError> {
        let command = CommandBuilder::from_settings(&self.installation.program, &self.settings)
            .build(request)?;

        if let Some(destination) = &command.destination {
            if !destination.exists() {
                if !self.settings.create_missing_dirs {
                    return Err(AppError::InvalidRequest(format!(
                        "Destination does not exist: {}",
                        destination.display()
                    )));
                }
                std::fs::create_dir_all(destination).map_err(|e| {
                    AppError::FileIo(format!(
                        "Failed to create {}: {}",
                        destination.display(),
                        e
                    ))
                })?;
                tracing::info!("Created download directory {}", destination.display());
            }
        }

        Ok(command)
    }

    /// Start a transfer in the background. Must be called inside a Tokio runtime.
    ///
    /// The history entry is written on its own blocking task once the
    /// session ends, so it may land shortly after `TransferTask::wait`
    /// returns.
    pub fn start(&self, request: TransferRequest) -> Result<TransferTask, AppError> {
        let command = self.prepare(&request)?;
        Ok(self.start_command(command))
    }

    pub fn start_command(&self, command: TransferCommand) -> TransferTask {
        let (event_tx, event_rx) = async_channel::unbounded::<TransferStatus>();
        let direction = command.direction;
        let summary = command.summary.clone();
        let history = self.history.clone();

        let session = TransferSession::new(command);
        let cancel = session.cancel_handle();
        let runtime = tokio::runtime::Handle::current();

        let join = tokio::task::spawn_blocking(move || {
            let mut forwarder = ChannelObserver {
                tx: event_tx,
                last: None,
            };
            let result = session.run(&mut forwarder);
            let ChannelObserver { tx, last } = forwarder;
            drop(tx);

            // Written off the result path: wait() never blocks on history I/O
            if let (Some(history), Some(last)) = (history, last) {
                runtime.spawn_blocking(move || {
                    record(history.as_ref(), direction, &last, &summary)
                });
            }
            result
        });

        TransferTask {
            events: event_rx,
            cancel,
            join,
        }
    }
}

fn record(
    history: &dyn HistorySink,
    direction: TransferDirection,
    status: &TransferStatus,
    summary: &str,
) {
    if !status.is_terminal() {
        return;
    }
    let entry = HistoryRecord::from_status(direction, status, summary);
    if let Err(e) = history.record(entry) {
        tracing::warn!("Failed to record transfer history: {}", e);
    }
}

/// Forwards statuses to the task's channel
struct ChannelObserver {
    tx: Sender<TransferStatus>,
    last: Option<TransferStatus>,
}

impl TransferObserver for ChannelObserver {
    fn on_status(&mut self, status: &TransferStatus) {
        self.last = Some(status.clone());
        if self.tx.send_blocking(status.clone()).is_err() {
            tracing::debug!("Transfer status dropped, no listener");
        }
    }
}

/// Handle to a running transfer
pub struct TransferTask {
    events: Receiver<TransferStatus>,
    cancel: CancelHandle,
    join: tokio::task::JoinHandle<Result<TerminalResult, AppError>>,
}

impl TransferTask {
    /// Status stream; closes after the terminal status
    pub fn events(&self) -> &Receiver<TransferStatus> {
        &self.events
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Cancel without blocking the async runtime
    pub async fn cancel(&self) {
        let handle = self.cancel.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || handle.cancel()).await {
            tracing::error!("Cancel task failed: {}", e);
        }
    }

    /// Wait for the session to finish
    pub async fn wait(self) -> Result<TerminalResult, AppError> {
        self.join
            .await
            .map_err(|e| AppError::TransferFailed(format!("transfer task aborted: {}", e)))?
    }
}
