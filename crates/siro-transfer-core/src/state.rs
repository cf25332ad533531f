// SPDX-License-Identifier: AGPL-3.0
// Siro Transfer Core - Transfer state machine
//
// Folds the signals of one session into observer-facing status updates.
// Phases only move forward; Completed and Error are final.

use crate::classifier::{ConnectionKind, SignalEvent};
use crate::types::{TransferPhase, TransferStatus};

/// Message attached to an Error reached through a non-zero exit code alone
pub const UNKNOWN_ERROR: &str = "unknown error";

/// What folding one signal produced
#[derive(Debug, Default, PartialEq)]
pub struct Step {
    /// Status updates to deliver, in order
    pub updates: Vec<TransferStatus>,
    /// The signal was a confirmation prompt that must be answered
    pub answer_prompt: bool,
}

/// Per-session state; never reused across transfers
#[derive(Debug, Default)]
pub struct TransferStateMachine {
    status: TransferStatus,
    connecting_seen: bool,
    established_seen: bool,
}

impl TransferStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest status, including fields recorded without an emission
    pub fn current(&self) -> &TransferStatus {
        &self.status
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Fold one signal.
    pub fn apply(&mut self, event: SignalEvent) -> Step {
        let mut step = Step::default();

        if self.is_terminal() {
            match event {
                SignalEvent::Failed { message }
                    if self.status.status == TransferPhase::Completed =>
                {
                    tracing::warn!("Failure reported after completion, ignored: {}", message);
                }
                SignalEvent::Unrecognized { .. } => {}
                other => tracing::debug!("Signal after terminal status dropped: {:?}", other),
            }
            return step;
        }

        match event {
            SignalEvent::CodeIssued { code } => {
                if self.status.code.is_some() {
                    return step;
                }
                self.status.code = Some(code);
                if self.status.status == TransferPhase::Idle {
                    self.status.status = TransferPhase::WaitingForPeer;
                    self.status.message = Some("Waiting for receiver to connect...".to_string());
                }
                step.updates.push(self.status.clone());
            }
            SignalEvent::ConnectionPhase {
                kind: ConnectionKind::Connecting,
            } => {
                if self.connecting_seen {
                    return step;
                }
                self.connecting_seen = true;
                if matches!(
                    self.status.status,
                    TransferPhase::Idle | TransferPhase::WaitingForPeer
                ) {
                    self.status.status = TransferPhase::Connecting;
                    self.status.message = Some("Connecting to peer...".to_string());
                    step.updates.push(self.status.clone());
                }
            }
            SignalEvent::ConnectionPhase {
                kind: ConnectionKind::Established,
            } => {
                if let Some(update) = self.establish() {
                    step.updates.push(update);
                }
            }
            SignalEvent::ReceivingPrompt { raw_text } => {
                self.status.message = Some(raw_text);
                step.updates.push(self.status.clone());
                step.answer_prompt = true;
            }
            SignalEvent::FileAnnounced { name } => {
                self.status.file = Some(name);
            }
            SignalEvent::ProgressUpdate { percent, speed } => {
                // Progress proves the connection even if croc never said so
                if self.status.status.rank() < TransferPhase::Connected.rank() {
                    if let Some(update) = self.establish() {
                        step.updates.push(update);
                    }
                }
                let percent = match self.status.progress_percent {
                    Some(current) if percent < current => current,
                    _ => percent,
                };
                self.status.status = TransferPhase::Transferring;
                self.status.progress_percent = Some(percent);
                self.status.speed = speed;
                self.status.message = None;
                step.updates.push(self.status.clone());
            }
            SignalEvent::Completed => {
                step.updates.push(self.complete());
            }
            SignalEvent::Failed { message } => {
                step.updates.push(self.fail_with(message));
            }
            SignalEvent::Unrecognized { raw_text } => {
                tracing::debug!("Unrecognized croc output: {}", raw_text);
            }
        }

        step
    }

    /// Settle a session whose output never produced a terminal signal.
    /// Returns the terminal update, or None if one was already emitted.
    pub fn reconcile_exit(&mut self, exit_code: i32) -> Option<TransferStatus> {
        if self.is_terminal() {
            if exit_code != 0 && self.status.status == TransferPhase::Completed {
                tracing::warn!("croc reported success but exited with code {}", exit_code);
            }
            return None;
        }

        if exit_code == 0 {
            Some(self.complete())
        } else {
            tracing::info!("croc exited with code {} without a terminal signal", exit_code);
            Some(self.fail_with(UNKNOWN_ERROR.to_string()))
        }
    }

    /// Force an Error (cancellation, lost process). None if already terminal.
    pub fn fail(&mut self, message: impl Into<String>) -> Option<TransferStatus> {
        if self.is_terminal() {
            return None;
        }
        Some(self.fail_with(message.into()))
    }

    fn establish(&mut self) -> Option<TransferStatus> {
        if self.established_seen {
            return None;
        }
        self.established_seen = true;
        // Connecting counts as seen too: a late "connection" line must not regress
        self.connecting_seen = true;
        if self.status.status.rank() >= TransferPhase::Connected.rank() {
            return None;
        }
        self.status.status = TransferPhase::Connected;
        self.status.message = Some("Connection established, starting transfer...".to_string());
        Some(self.status.clone())
    }

    fn complete(&mut self) -> TransferStatus {
        self.status.status = TransferPhase::Completed;
        self.status.progress_percent = Some(100.0);
        self.status.message = None;
        self.status.clone()
    }

    fn fail_with(&mut self, message: String) -> TransferStatus {
        self.status.status = TransferPhase::Error;
        self.status.message = Some(message);
        self.status.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn code(c: &str) -> SignalEvent {
        SignalEvent::CodeIssued {
            code: c.to_string(),
        }
    }

    fn connecting() -> SignalEvent {
        SignalEvent::ConnectionPhase {
            kind: ConnectionKind::Connecting,
        }
    }

    fn established() -> SignalEvent {
        SignalEvent::ConnectionPhase {
            kind: ConnectionKind::Established,
        }
    }

    fn progress(percent: f64) -> SignalEvent {
        SignalEvent::ProgressUpdate {
            percent,
            speed: Some("1.00 MB/s".to_string()),
        }
    }

    fn failed(message: &str) -> SignalEvent {
        SignalEvent::Failed {
            message: message.to_string(),
        }
    }

    #[test]
    fn test_code_moves_to_waiting_once() {
        let mut machine = TransferStateMachine::new();
        let step = machine.apply(code("ABC-123"));
        assert_eq!(step.updates.len(), 1);
        assert_eq!(step.updates[0].status, TransferPhase::WaitingForPeer);
        assert_eq!(step.updates[0].code.as_deref(), Some("ABC-123"));

        assert!(machine.apply(code("OTHER")).updates.is_empty());
        assert_eq!(machine.current().code.as_deref(), Some("ABC-123"));
    }

    #[test]
    fn test_connection_phases_are_idempotent() {
        let mut machine = TransferStateMachine::new();
        assert_eq!(machine.apply(connecting()).updates.len(), 1);
        assert!(machine.apply(connecting()).updates.is_empty());
        assert_eq!(machine.apply(established()).updates.len(), 1);
        assert!(machine.apply(established()).updates.is_empty());
        assert_eq!(machine.current().status, TransferPhase::Connected);
    }

    #[test]
    fn test_connecting_after_connected_is_dropped() {
        let mut machine = TransferStateMachine::new();
        machine.apply(established());
        assert!(machine.apply(connecting()).updates.is_empty());
        assert_eq!(machine.current().status, TransferPhase::Connected);
    }

    #[test]
    fn test_progress_synthesizes_connected() {
        let mut machine = TransferStateMachine::new();
        machine.apply(code("ABC"));
        let step = machine.apply(progress(10.0));
        let phases: Vec<_> = step.updates.iter().map(|s| s.status).collect();
        assert_eq!(
            phases,
            vec![TransferPhase::Connected, TransferPhase::Transferring]
        );
        assert_eq!(step.updates[1].code.as_deref(), Some("ABC"));
    }

    #[test]
    fn test_progress_never_decreases() {
        let mut machine = TransferStateMachine::new();
        machine.apply(progress(60.0));
        let step = machine.apply(progress(40.0));
        assert_eq!(step.updates[0].progress_percent, Some(60.0));
    }

    #[test]
    fn test_file_is_carried_to_progress() {
        let mut machine = TransferStateMachine::new();
        let step = machine.apply(SignalEvent::FileAnnounced {
            name: "x.pdf".to_string(),
        });
        assert!(step.updates.is_empty());
        let step = machine.apply(progress(5.0));
        assert!(step
            .updates
            .iter()
            .all(|s| s.file.as_deref() == Some("x.pdf")));
    }

    #[test]
    fn test_prompt_keeps_phase_and_requests_answer() {
        let mut machine = TransferStateMachine::new();
        machine.apply(connecting());
        let step = machine.apply(SignalEvent::ReceivingPrompt {
            raw_text: "Accept 'x.pdf'? (Y/n)".to_string(),
        });
        assert!(step.answer_prompt);
        assert_eq!(step.updates[0].status, TransferPhase::Connecting);
        assert_eq!(
            step.updates[0].message.as_deref(),
            Some("Accept 'x.pdf'? (Y/n)")
        );
    }

    #[test]
    fn test_completed_sets_full_progress() {
        let mut machine = TransferStateMachine::new();
        machine.apply(progress(50.0));
        let step = machine.apply(SignalEvent::Completed);
        assert_eq!(step.updates[0].status, TransferPhase::Completed);
        assert_eq!(step.updates[0].progress_percent, Some(100.0));
    }

    #[test]
    fn test_error_is_sticky() {
        let mut machine = TransferStateMachine::new();
        machine.apply(failed("Error: connection refused"));
        assert!(machine.apply(SignalEvent::Completed).updates.is_empty());
        assert!(machine.apply(failed("Error: again")).updates.is_empty());
        assert_eq!(
            machine.current().message.as_deref(),
            Some("Error: connection refused")
        );
        assert!(machine.reconcile_exit(0).is_none());
    }

    #[test]
    fn test_failure_after_completion_is_ignored() {
        let mut machine = TransferStateMachine::new();
        machine.apply(SignalEvent::Completed);
        assert!(machine.apply(failed("Error: late")).updates.is_empty());
        assert_eq!(machine.current().status, TransferPhase::Completed);
    }

    #[test]
    fn test_prompt_after_terminal_is_not_answered() {
        let mut machine = TransferStateMachine::new();
        machine.apply(SignalEvent::Completed);
        let step = machine.apply(SignalEvent::ReceivingPrompt {
            raw_text: "Accept? (Y/n)".to_string(),
        });
        assert_eq!(step, Step::default());
    }

    #[test]
    fn test_reconcile_exit_codes() {
        let mut ok = TransferStateMachine::new();
        let status = ok.reconcile_exit(0).unwrap();
        assert_eq!(status.status, TransferPhase::Completed);
        assert_eq!(status.progress_percent, Some(100.0));

        let mut bad = TransferStateMachine::new();
        let status = bad.reconcile_exit(1).unwrap();
        assert_eq!(status.status, TransferPhase::Error);
        assert_eq!(status.message.as_deref(), Some(UNKNOWN_ERROR));
        assert!(bad.reconcile_exit(1).is_none());
    }

    #[test]
    fn test_unrecognized_emits_nothing() {
        let mut machine = TransferStateMachine::new();
        let step = machine.apply(SignalEvent::Unrecognized {
            raw_text: "noise".to_string(),
        });
        assert_eq!(step, Step::default());
        assert_eq!(machine.current().status, TransferPhase::Idle);
    }

    fn any_event() -> impl Strategy<Value = SignalEvent> {
        prop_oneof![
            "[A-Z]{3}-[0-9]{3}".prop_map(|c| SignalEvent::CodeIssued { code: c }),
            Just(connecting()),
            Just(established()),
            Just(SignalEvent::ReceivingPrompt {
                raw_text: "Accept? (Y/n)".to_string()
            }),
            "[a-z]{1,8}\\.pdf".prop_map(|name| SignalEvent::FileAnnounced { name }),
            (0.0f64..=100.0).prop_map(progress),
            Just(SignalEvent::Completed),
            "Error: [a-z ]{0,12}".prop_map(|message| SignalEvent::Failed { message }),
            Just(SignalEvent::Unrecognized {
                raw_text: "noise".to_string()
            }),
        ]
    }

    proptest! {
        #[test]
        fn prop_phase_never_regresses(events in prop::collection::vec(any_event(), 0..40)) {
            let mut machine = TransferStateMachine::new();
            let mut last_rank = 0;
            let mut terminal: Option<TransferPhase> = None;

            for event in events {
                for update in machine.apply(event).updates {
                    prop_assert!(terminal.is_none(), "update after terminal status");
                    prop_assert!(update.status.rank() >= last_rank);
                    last_rank = update.status.rank();
                    if update.is_terminal() {
                        terminal = Some(update.status);
                    }
                }
            }
        }

        #[test]
        fn prop_progress_is_monotonic(events in prop::collection::vec(any_event(), 0..40)) {
            let mut machine = TransferStateMachine::new();
            let mut last: Option<f64> = None;

            for event in events {
                for update in machine.apply(event).updates {
                    if let (Some(prev), Some(now)) = (last, update.progress_percent) {
                        prop_assert!(now >= prev);
                    }
                    if update.progress_percent.is_some() {
                        last = update.progress_percent;
                    }
                }
            }
        }

        #[test]
        fn prop_code_carried_forward(events in prop::collection::vec(any_event(), 0..40)) {
            let mut machine = TransferStateMachine::new();
            let mut seen: Option<String> = None;

            for event in events {
                for update in machine.apply(event).updates {
                    if let Some(code) = &seen {
                        prop_assert_eq!(update.code.as_ref(), Some(code));
                    }
                    seen = update.code.clone();
                }
            }
        }
    }
}
