// SPDX-License-Identifier: AGPL-3.0
// Siro Transfer CLI - Status rendering

use indicatif::{ProgressBar, ProgressStyle};
use siro_transfer_core::{TransferDirection, TransferPhase, TransferStatus};
use std::time::Duration;

const SPINNER_TEMPLATE: &str = "{spinner:.green} {msg}";
const BAR_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos:>3}% {msg}";

/// Draws the status stream of one transfer on the terminal
pub struct StatusRenderer {
    bar: ProgressBar,
    direction: TransferDirection,
    showing_progress: bool,
    code_shown: bool,
}

impl StatusRenderer {
    pub fn new(direction: TransferDirection) -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(spinner_style());
        bar.enable_steady_tick(Duration::from_millis(120));
        bar.set_message(match direction {
            TransferDirection::Send => "Starting croc...",
            TransferDirection::Receive => "Looking for sender...",
        });

        Self {
            bar,
            direction,
            showing_progress: false,
            code_shown: false,
        }
    }

    /// Print a line above the bar
    pub fn note(&self, text: impl AsRef<str>) {
        self.bar.println(text.as_ref());
    }

    pub fn update(&mut self, status: &TransferStatus) {
        if let (Some(code), false) = (&status.code, self.code_shown) {
            self.code_shown = true;
            if self.direction == TransferDirection::Send {
                self.note(format!("Code is: {}", code));
                self.note(format!("On the other computer run: croc {}", code));
            }
        }

        match status.status {
            TransferPhase::Idle => {}
            TransferPhase::WaitingForPeer => {
                self.bar.set_message("Waiting for the other side...")
            }
            TransferPhase::Connecting => self.bar.set_message("Connecting..."),
            TransferPhase::Connected => self.bar.set_message(match &status.file {
                Some(file) => format!("Connected, {} {}", self.direction.label(), file),
                None => "Connected".to_string(),
            }),
            TransferPhase::Transferring => self.show_progress(status),
            TransferPhase::Completed => {
                let what = status.file.as_deref().unwrap_or("transfer");
                let verb = match self.direction {
                    TransferDirection::Send => "Sent",
                    TransferDirection::Receive => "Received",
                };
                if self.showing_progress {
                    self.bar.set_position(100);
                }
                self.bar.finish_with_message(format!("{} {}", verb, what));
            }
            TransferPhase::Error => {
                let message = status.message.as_deref().unwrap_or("transfer failed");
                self.bar.abandon_with_message(format!("Failed: {}", message));
            }
        }
    }

    fn show_progress(&mut self, status: &TransferStatus) {
        if !self.showing_progress {
            self.showing_progress = true;
            self.bar.set_length(100);
            self.bar.set_style(bar_style());
        }
        if let Some(percent) = status.progress_percent {
            self.bar.set_position(percent.round() as u64);
        }
        let mut msg = String::new();
        if let Some(speed) = &status.speed {
            msg.push_str(speed);
        }
        if let Some(file) = &status.file {
            if !msg.is_empty() {
                msg.push(' ');
            }
            msg.push_str(file);
        }
        self.bar.set_message(msg);
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template(SPINNER_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(BAR_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
}
