// SPDX-License-Identifier: AGPL-3.0
// Siro Transfer Core - Transfer sessions
//
// One session drives one croc process from spawn to exit: it composes the
// command line, classifies every output line, folds the signals through the
// state machine and hands each status to the caller's observer on the same
// thread. Every session ends with exactly one terminal status.

use crate::classifier::classify;
use crate::process::{self, ProcessTerminator};
use crate::state::TransferStateMachine;
use crate::types::{
    AppError, AppSettings, TransferDefaults, TransferDirection, TransferRequest, TransferStatus,
};
use std::ffi::OsString;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Reply written when croc asks for confirmation despite `--yes`
pub const ACCEPT_REPLY: &str = "y";
/// Time croc gets to exit after SIGTERM before it is killed
pub const CANCEL_GRACE: Duration = Duration::from_secs(3);
pub const CANCELLED_MESSAGE: &str = "transfer cancelled";
/// Environment variable croc reads the code phrase from
pub const SECRET_ENV: &str = "CROC_SECRET";

/// Fully resolved croc invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferCommand {
    pub direction: TransferDirection,
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub env: Vec<(String, String)>,
    /// Output directory (receive only)
    pub destination: Option<PathBuf>,
    /// What is being moved: file names or the code phrase
    pub summary: String,
}

impl TransferCommand {
    /// Command line for logs. Secrets passed through the environment stay out.
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().map(|a| a.to_string_lossy().into_owned()));
        parts.join(" ")
    }
}

/// Turns a `TransferRequest` into the croc command line
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    program: PathBuf,
    relay: Option<String>,
    secret_via_env: bool,
    default_destination: PathBuf,
}

impl CommandBuilder {
    pub fn new(program: impl Into<PathBuf>, default_destination: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            relay: None,
            secret_via_env: false,
            default_destination: default_destination.into(),
        }
    }

    pub fn from_settings(program: impl Into<PathBuf>, settings: &AppSettings) -> Self {
        Self::new(program, settings.default_destination())
            .relay(settings.relay.clone())
            .secret_via_env(settings.secret_via_env)
    }

    pub fn relay(mut self, relay: Option<String>) -> Self {
        self.relay = relay.filter(|r| !r.trim().is_empty());
        self
    }

    pub fn secret_via_env(mut self, enabled: bool) -> Self {
        self.secret_via_env = enabled;
        self
    }

    pub fn build(&self, request: &TransferRequest) -> Result<TransferCommand, AppError> {
        match request {
            TransferRequest::Send { paths, code } => self.build_send(paths, code.as_deref()),
            TransferRequest::Receive { code, destination } => {
                self.build_receive(code, destination.as_deref())
            }
        }
    }

    fn build_send(
        &self,
        paths: &[PathBuf],
        code: Option<&str>,
    ) -> Result<TransferCommand, AppError> {
        if paths.is_empty() {
            return Err(AppError::InvalidRequest("no files to send".to_string()));
        }
        if let Some(missing) = paths.iter().find(|p| !p.exists()) {
            return Err(AppError::InvalidRequest(format!(
                "File not found: {}",
                missing.display()
            )));
        }

        let mut args = self.global_args();
        let mut env = Vec::new();
        args.push("send".into());

        if let Some(code) = code.map(str::trim).filter(|c| !c.is_empty()) {
            if self.secret_via_env {
                env.push((SECRET_ENV.to_string(), code.to_string()));
            } else {
                args.push("--code".into());
                args.push(code.into());
            }
        }
        args.extend(paths.iter().map(|p| p.as_os_str().to_os_string()));

        let summary = paths
            .iter()
            .map(|p| {
                p.file_name()
                    .unwrap_or(p.as_os_str())
                    .to_string_lossy()
                    .into_owned()
            })
            .collect::<Vec<_>>()
            .join(", ");

        Ok(TransferCommand {
            direction: TransferDirection::Send,
            program: self.program.clone(),
            args,
            env,
            destination: None,
            summary,
        })
    }

    fn build_receive(
        &self,
        code: &str,
        destination: Option<&Path>,
    ) -> Result<TransferCommand, AppError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(AppError::InvalidRequest(
                "a code phrase is required to receive".to_string(),
            ));
        }

        let destination = destination
            .filter(|d| !d.as_os_str().is_empty())
            .unwrap_or(&self.default_destination)
            .to_path_buf();

        // --yes is croc's own non-interactive accept; the prompt reply is a fallback
        let mut args: Vec<OsString> = vec!["--yes".into()];
        args.extend(self.global_args());
        args.push("--out".into());
        args.push(destination.as_os_str().to_os_string());

        let mut env = Vec::new();
        if self.secret_via_env {
            env.push((SECRET_ENV.to_string(), code.to_string()));
        } else {
            args.push(code.into());
        }

        Ok(TransferCommand {
            direction: TransferDirection::Receive,
            program: self.program.clone(),
            args,
            env,
            destination: Some(destination),
            summary: code.to_string(),
        })
    }

    fn global_args(&self) -> Vec<OsString> {
        match &self.relay {
            Some(relay) => vec!["--relay".into(), relay.into()],
            None => Vec::new(),
        }
    }
}

/// Receives every status update of a session, in emission order.
///
/// Called on the session's own thread: a slow observer stalls line
/// processing. A panicking observer is logged and otherwise ignored.
pub trait TransferObserver {
    fn on_status(&mut self, status: &TransferStatus);
}

impl<F> TransferObserver for F
where
    F: FnMut(&TransferStatus),
{
    fn on_status(&mut self, status: &TransferStatus) {
        self(status)
    }
}

/// Final outcome of a session
#[derive(Debug, Clone, PartialEq)]
pub struct TerminalResult {
    /// The terminal status delivered to the observer
    pub status: TransferStatus,
    /// None if the process could not be reaped
    pub exit_code: Option<i32>,
}

impl TerminalResult {
    pub fn is_success(&self) -> bool {
        self.status.status == crate::types::TransferPhase::Completed
    }

    /// Completed status, or `TransferFailed` carrying the best known message
    pub fn into_result(self) -> Result<TransferStatus, AppError> {
        if self.is_success() {
            Ok(self.status)
        } else {
            Err(AppError::TransferFailed(
                self.status
                    .message
                    .unwrap_or_else(|| crate::state::UNKNOWN_ERROR.to_string()),
            ))
        }
    }
}

/// Requests cancellation of a session from any thread
#[derive(Clone, Default)]
pub struct CancelHandle {
    inner: Arc<CancelState>,
}

#[derive(Default)]
struct CancelState {
    requested: AtomicBool,
    terminator: Mutex<Option<ProcessTerminator>>,
}

impl CancelHandle {
    /// Stop the session's process, waiting up to `CANCEL_GRACE` before
    /// killing it. Blocks for at most that long.
    pub fn cancel(&self) {
        self.cancel_with_grace(CANCEL_GRACE);
    }

    pub fn cancel_with_grace(&self, grace: Duration) {
        if self.inner.requested.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Transfer cancellation requested");
        let terminator = self.slot().clone();
        if let Some(terminator) = terminator {
            terminator.terminate(grace);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    fn attach(&self, terminator: ProcessTerminator) {
        *self.slot() = Some(terminator.clone());
        // Cancelled between spawn and attach: nobody else will stop it
        if self.is_cancelled() {
            terminator.terminate(CANCEL_GRACE);
        }
    }

    fn detach(&self) {
        self.slot().take();
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<ProcessTerminator>> {
        self.inner
            .terminator
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// One send or receive, bound to one croc process
pub struct TransferSession {
    command: TransferCommand,
    cancel: CancelHandle,
}

impl TransferSession {
    pub fn new(command: TransferCommand) -> Self {
        Self {
            command,
            cancel: CancelHandle::default(),
        }
    }

    pub fn command(&self) -> &TransferCommand {
        &self.command
    }

    pub fn direction(&self) -> TransferDirection {
        self.command.direction
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Run the transfer to completion on the calling thread.
    ///
    /// Only a launch failure is an `Err`; it is still reported to the
    /// observer as a terminal Error first. A failed transfer is an `Ok`
    /// whose status is Error.
    pub fn run(self, observer: &mut dyn TransferObserver) -> Result<TerminalResult, AppError> {
        let direction = self.command.direction;
        let mut machine = TransferStateMachine::new();

        if self.cancel.is_cancelled() {
            deliver(observer, machine.fail(CANCELLED_MESSAGE));
            return Ok(TerminalResult {
                status: machine.current().clone(),
                exit_code: None,
            });
        }

        tracing::info!("Starting croc {}: {}", direction, self.command.display());
        let mut process = match process::start(
            &self.command.program,
            &self.command.args,
            &self.command.env,
        ) {
            Ok(process) => process,
            Err(err) => {
                tracing::error!("{}", err);
                deliver(observer, machine.fail(err.to_string()));
                return Err(err);
            }
        };
        self.cancel.attach(process.terminator());

        for line in process.lines() {
            tracing::debug!("croc {} output: {}", direction, line);

            for event in classify(direction, &line) {
                let step = machine.apply(event);
                for status in step.updates {
                    deliver(observer, Some(status));
                }
                if step.answer_prompt {
                    // croc may have auto-accepted and closed stdin already
                    match process.send_line(ACCEPT_REPLY) {
                        Ok(()) => tracing::info!("Answered croc confirmation prompt"),
                        Err(e) => tracing::warn!("Could not answer croc prompt: {}", e),
                    }
                }
            }
        }

        let exit_code = match process.wait() {
            Ok(code) => Some(code),
            Err(e) => {
                tracing::warn!("Could not reap croc process: {}", e);
                None
            }
        };
        self.cancel.detach();

        let last = if self.cancel.is_cancelled() {
            machine.fail(CANCELLED_MESSAGE)
        } else {
            match exit_code {
                Some(code) => machine.reconcile_exit(code),
                None => machine.fail(crate::state::UNKNOWN_ERROR),
            }
        };
        deliver(observer, last);

        let status = machine.current().clone();
        tracing::info!(
            "croc {} finished: {:?} {}",
            direction,
            status.status,
            status.message.as_deref().unwrap_or("")
        );

        Ok(TerminalResult { status, exit_code })
    }
}

fn deliver(observer: &mut dyn TransferObserver, status: Option<TransferStatus>) {
    let Some(status) = status else {
        return;
    };
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| observer.on_status(&status)));
    if outcome.is_err() {
        tracing::warn!("Transfer observer panicked on {:?} status", status.status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> CommandBuilder {
        CommandBuilder::new("croc", "/downloads")
    }

    #[test]
    fn test_receive_command_uses_yes_and_out() {
        let cmd = builder()
            .build(&TransferRequest::Receive {
                code: " 1234-abc-def ".to_string(),
                destination: None,
            })
            .unwrap();
        let args: Vec<OsString> = ["--yes", "--out", "/downloads", "1234-abc-def"]
            .iter()
            .map(OsString::from)
            .collect();
        assert_eq!(cmd.args, args);
        assert!(cmd.env.is_empty());
        assert_eq!(cmd.destination, Some(PathBuf::from("/downloads")));
        assert_eq!(cmd.summary, "1234-abc-def");
    }

    #[test]
    fn test_from_settings_receives_into_download_dir() {
        let settings = AppSettings {
            download_dir: PathBuf::from("/srv/incoming"),
            relay: Some("relay.example:9009".to_string()),
            secret_via_env: false,
            ..AppSettings::default()
        };
        let cmd = CommandBuilder::from_settings("croc", &settings)
            .build(&TransferRequest::Receive {
                code: "1234-abc".to_string(),
                destination: None,
            })
            .unwrap();
        assert_eq!(cmd.destination, Some(PathBuf::from("/srv/incoming")));
        assert!(cmd.args.contains(&OsString::from("/srv/incoming")));
        assert!(cmd.args.contains(&OsString::from("relay.example:9009")));
    }

    #[test]
    fn test_receive_secret_goes_to_env() {
        let cmd = builder()
            .secret_via_env(true)
            .relay(Some("relay.example:9009".to_string()))
            .build(&TransferRequest::Receive {
                code: "1234-abc-def".to_string(),
                destination: Some(PathBuf::from("/tmp/in")),
            })
            .unwrap();
        let args: Vec<OsString> = ["--yes", "--relay", "relay.example:9009", "--out", "/tmp/in"]
            .iter()
            .map(OsString::from)
            .collect();
        assert_eq!(cmd.args, args);
        assert_eq!(
            cmd.env,
            vec![(SECRET_ENV.to_string(), "1234-abc-def".to_string())]
        );
        assert!(!cmd.display().contains("1234-abc-def"));
    }

    #[test]
    fn test_receive_requires_code() {
        let result = builder().build(&TransferRequest::Receive {
            code: "  ".to_string(),
            destination: None,
        });
        assert!(matches!(result, Err(AppError::InvalidRequest(_))));
    }

    #[test]
    fn test_send_command() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("x.txt");
        std::fs::write(&file, b"hello").unwrap();

        let cmd = builder()
            .build(&TransferRequest::Send {
                paths: vec![file.clone()],
                code: Some("my-code".to_string()),
            })
            .unwrap();
        assert_eq!(cmd.direction, TransferDirection::Send);
        assert_eq!(
            cmd.args,
            vec![
                OsString::from("send"),
                OsString::from("--code"),
                OsString::from("my-code"),
                file.into_os_string(),
            ]
        );
        assert_eq!(cmd.summary, "x.txt");
    }

    #[test]
    fn test_send_rejects_missing_and_empty() {
        let missing = builder().build(&TransferRequest::Send {
            paths: vec![PathBuf::from("/nonexistent/x.txt")],
            code: None,
        });
        assert!(matches!(missing, Err(AppError::InvalidRequest(_))));

        let empty = builder().build(&TransferRequest::Send {
            paths: Vec::new(),
            code: None,
        });
        assert!(matches!(empty, Err(AppError::InvalidRequest(_))));
    }

    #[test]
    fn test_spawn_failure_reports_terminal_error() {
        let command = TransferCommand {
            direction: TransferDirection::Send,
            program: PathBuf::from("/nonexistent/croc"),
            args: Vec::new(),
            env: Vec::new(),
            destination: None,
            summary: "x.txt".to_string(),
        };
        let mut seen = Vec::new();
        let result =
            TransferSession::new(command).run(&mut |s: &TransferStatus| seen.push(s.clone()));

        assert!(matches!(result, Err(AppError::Spawn { .. })));
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].status, crate::types::TransferPhase::Error);
    }

    #[test]
    fn test_cancel_before_run_skips_spawn() {
        let command = TransferCommand {
            direction: TransferDirection::Receive,
            program: PathBuf::from("/nonexistent/croc"),
            args: Vec::new(),
            env: Vec::new(),
            destination: None,
            summary: "code".to_string(),
        };
        let session = TransferSession::new(command);
        session.cancel_handle().cancel();

        let mut seen = Vec::new();
        let result = session
            .run(&mut |s: &TransferStatus| seen.push(s.clone()))
            .unwrap();
        assert_eq!(result.status.message.as_deref(), Some(CANCELLED_MESSAGE));
        assert_eq!(seen.len(), 1);
    }

    #[test]
    fn test_into_result() {
        let failed = TerminalResult {
            status: TransferStatus {
                status: crate::types::TransferPhase::Error,
                message: Some("Error: boom".to_string()),
                ..TransferStatus::default()
            },
            exit_code: Some(1),
        };
        match failed.into_result() {
            Err(AppError::TransferFailed(msg)) => assert_eq!(msg, "Error: boom"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
