// SPDX-License-Identifier: AGPL-3.0
// Siro Transfer Core - croc installation check
//
// Run once before any transfer; the result is handed to the session
// manager instead of being kept in global state.

use crate::types::{AppError, TransferDefaults};
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::LazyLock;

/// Executable looked up on PATH when no override is configured
pub const DEFAULT_PROGRAM: &str = "croc";

/// Oldest croc release whose output format is understood
pub const MIN_VERSION: CrocVersion = CrocVersion {
    major: 9,
    minor: 0,
    patch: 0,
};

static VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\.(\d+)\.(\d+)").expect("valid version pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CrocVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl CrocVersion {
    /// First `X.Y.Z` found in `text`
    pub fn parse(text: &str) -> Option<Self> {
        let caps = VERSION.captures(text)?;
        Some(Self {
            major: caps[1].parse().ok()?,
            minor: caps[2].parse().ok()?,
            patch: caps[3].parse().ok()?,
        })
    }
}

impl fmt::Display for CrocVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// A croc executable that passed the preflight check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrocInstallation {
    pub program: PathBuf,
    /// None when `--version` printed nothing recognisable
    pub version: Option<CrocVersion>,
}

impl CrocInstallation {
    pub fn version_label(&self) -> String {
        self.version
            .map(|v| v.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// Locate croc from the configured override or PATH and check its version
pub fn preflight(defaults: &impl TransferDefaults) -> Result<CrocInstallation, AppError> {
    let program = defaults
        .executable_override()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_PROGRAM));
    check_program(&program)
}

pub fn check_program(program: &Path) -> Result<CrocInstallation, AppError> {
    let output = Command::new(program)
        .arg("--version")
        .stdin(Stdio::null())
        .output()
        .map_err(|e| AppError::CrocNotFound(format!("{}: {}", program.display(), e)))?;

    if !output.status.success() {
        return Err(AppError::CrocNotFound(format!(
            "{} --version exited with {}",
            program.display(),
            output.status
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let version = CrocVersion::parse(&stdout).or_else(|| CrocVersion::parse(&stderr));

    match version {
        Some(found) if found < MIN_VERSION => {
            return Err(AppError::CrocTooOld {
                found: found.to_string(),
                required: MIN_VERSION.to_string(),
            });
        }
        Some(found) => tracing::info!("Found croc {} at {}", found, program.display()),
        None => tracing::warn!(
            "Could not read croc version from {:?}, continuing",
            stdout.trim()
        ),
    }

    Ok(CrocInstallation {
        program: program.to_path_buf(),
        version,
    })
}
