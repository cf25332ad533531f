// SPDX-License-Identifier: AGPL-3.0
// Siro Transfer Core - Shared logic for all frontends
//
// This crate provides:
// - ProcessHandle for driving the croc executable
// - classify() to turn croc output lines into transfer signals
// - TransferStateMachine folding signals into observer-facing statuses
// - TransferSession and TransferManager to run sends and receives
// - SettingsStore and TransferHistory for local persistence
//
// Frontend-specific code lives in separate crates.

pub mod classifier;
pub mod history;
pub mod manager;
pub mod preflight;
pub mod process;
pub mod session;
pub mod settings;
pub mod state;
pub mod types;

// Re-export commonly used items
pub use classifier::{classify, ConnectionKind, SignalEvent};
pub use history::{HistoryRecord, HistorySink, TransferHistory, TransferOutcome};
pub use manager::{TransferManager, TransferTask};
pub use preflight::{check_program, preflight, CrocInstallation, CrocVersion};
pub use process::{ProcessHandle, ProcessTerminator};
pub use session::{
    CancelHandle, CommandBuilder, TerminalResult, TransferCommand, TransferObserver,
    TransferSession,
};
pub use settings::SettingsStore;
pub use state::{Step, TransferStateMachine};
pub use types::{
    AppError, AppSettings, TransferDefaults, TransferDirection, TransferPhase, TransferRequest,
    TransferStatus,
};
