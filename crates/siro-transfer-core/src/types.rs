// SPDX-License-Identifier: AGPL-3.0
// Siro Transfer Core - Type definitions

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Which side of a transfer a session drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransferDirection {
    Send,
    Receive,
}

impl TransferDirection {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Send => "send",
            Self::Receive => "receive",
        }
    }
}

impl std::fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Lifecycle phase of a transfer session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransferPhase {
    #[default]
    Idle,
    WaitingForPeer,
    Connecting,
    Connected,
    Transferring,
    Completed,
    Error,
}

impl TransferPhase {
    /// Position in the forward ordering. Completed and Error share the last rank.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::WaitingForPeer => 1,
            Self::Connecting => 2,
            Self::Connected => 3,
            Self::Transferring => 4,
            Self::Completed | Self::Error => 5,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

/// Observer-facing snapshot of a transfer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferStatus {
    pub status: TransferPhase,
    /// Code phrase, carried forward once issued
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// File name announced by the sender (receive side)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// A user-initiated transfer, before it is resolved into a command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferRequest {
    Send {
        paths: Vec<PathBuf>,
        /// Custom code phrase; croc generates one when absent
        code: Option<String>,
    },
    Receive {
        code: String,
        /// Output directory; the configured download dir when absent
        destination: Option<PathBuf>,
    },
}

impl TransferRequest {
    pub fn direction(&self) -> TransferDirection {
        match self {
            Self::Send { .. } => TransferDirection::Send,
            Self::Receive { .. } => TransferDirection::Receive,
        }
    }
}

/// Read-only defaults the transfer core consumes
pub trait TransferDefaults {
    /// Directory received files land in when the request names none
    fn default_destination(&self) -> &Path;
    /// Explicit croc executable, overriding the PATH lookup
    fn executable_override(&self) -> Option<&Path>;
}

/// Application settings (GUI-agnostic)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    /// Default download directory
    pub download_dir: PathBuf,
    /// Path to the croc executable; PATH lookup when unset
    #[serde(default)]
    pub croc_path: Option<PathBuf>,
    /// Relay address handed to croc (`--relay`)
    #[serde(default)]
    pub relay: Option<String>,
    /// Number of history entries kept on disk
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    /// Create the destination directory before receiving
    #[serde(default = "default_true")]
    pub create_missing_dirs: bool,
    /// Pass code phrases through CROC_SECRET rather than argv
    #[serde(default = "default_true")]
    pub secret_via_env: bool,
}

fn default_max_history() -> usize {
    100
}

fn default_true() -> bool {
    true
}

impl Default for AppSettings {
    fn default() -> Self {
        let download_dir = directories::UserDirs::new()
            .and_then(|d| d.download_dir().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            download_dir,
            croc_path: None,
            relay: None,
            max_history: default_max_history(),
            create_missing_dirs: true,
            secret_via_env: true,
        }
    }
}

impl TransferDefaults for AppSettings {
    fn default_destination(&self) -> &Path {
        &self.download_dir
    }

    fn executable_override(&self) -> Option<&Path> {
        self.croc_path
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
    }
}

/// Error types for the application
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Failed to launch {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("Failed to write to transfer process: {0}")]
    Write(String),

    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    #[error(
        "Croc executable not found ({0}). Install croc first:\n\
         - Linux/macOS: curl https://getcroc.schollz.com | bash\n\
         - Windows: download from https://github.com/schollz/croc/releases"
    )]
    CrocNotFound(String),

    #[error("Croc version {found} is too old, please upgrade to {required} or newer")]
    CrocTooOld { found: String, required: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("File I/O error: {0}")]
    FileIo(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::FileIo(err.to_string())
    }
}
