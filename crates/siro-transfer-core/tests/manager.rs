// SPDX-License-Identifier: AGPL-3.0
// Siro Transfer Core - Async manager tests
#![cfg(unix)]

use siro_transfer_core::session::CANCELLED_MESSAGE;
use siro_transfer_core::{
    AppSettings, CrocInstallation, HistoryRecord, TransferCommand, TransferDirection,
    TransferHistory, TransferManager, TransferOutcome, TransferPhase,
};
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn scripted(direction: TransferDirection, script: &str, summary: &str) -> TransferCommand {
    TransferCommand {
        direction,
        program: PathBuf::from("/bin/sh"),
        args: vec![OsString::from("-c"), OsString::from(script)],
        env: Vec::new(),
        destination: None,
        summary: summary.to_string(),
    }
}

/// History lands on its own task after the session ends
async fn recorded(history: &TransferHistory, expected: usize) -> Vec<HistoryRecord> {
    for _ in 0..200 {
        if history.count() >= expected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    history.list()
}

fn manager() -> TransferManager {
    TransferManager::new(
        AppSettings::default(),
        CrocInstallation {
            program: PathBuf::from("/bin/sh"),
            version: None,
        },
    )
}

#[tokio::test]
async fn statuses_stream_and_history_is_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let history = Arc::new(TransferHistory::open(dir.path().join("history.json"), 10).unwrap());
    let manager = manager().with_history(history.clone());

    let task = manager.start_command(scripted(
        TransferDirection::Receive,
        "printf '%s\\n' 'Receiving report.pdf (3.1 MB)' '25%' '75%' 'Received'",
        "1234-red-fox",
    ));
    let events = task.events().clone();

    let mut seen = Vec::new();
    while let Ok(status) = events.recv().await {
        seen.push(status);
    }
    let result = task.wait().await.unwrap();

    assert!(result.is_success());
    assert_eq!(seen.last(), Some(&result.status));
    let percents: Vec<_> = seen.iter().filter_map(|s| s.progress_percent).collect();
    assert_eq!(percents, vec![25.0, 75.0, 100.0]);

    let records = recorded(&history, 1).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, TransferOutcome::Completed);
    assert_eq!(records[0].summary, "report.pdf");
    assert_eq!(records[0].direction, TransferDirection::Receive);
}

#[tokio::test]
async fn failed_transfer_is_recorded_with_message() {
    let dir = tempfile::tempdir().unwrap();
    let history = Arc::new(TransferHistory::open(dir.path().join("history.json"), 10).unwrap());
    let manager = manager().with_history(history.clone());

    let task = manager.start_command(scripted(
        TransferDirection::Send,
        "echo 'Error: room not ready'\nexit 1",
        "notes.txt",
    ));
    let result = task.wait().await.unwrap();

    assert_eq!(result.status.status, TransferPhase::Error);
    assert_eq!(result.exit_code, Some(1));
    let records = recorded(&history, 1).await;
    assert_eq!(records[0].outcome, TransferOutcome::Failed);
    assert_eq!(records[0].summary, "notes.txt");
    assert_eq!(records[0].message.as_deref(), Some("Error: room not ready"));
}

#[tokio::test]
async fn cancel_ends_the_event_stream() {
    let task = manager().start_command(scripted(
        TransferDirection::Send,
        "echo 'Code is: 1234-red-fox'\nexec sleep 30",
        "big.iso",
    ));
    let events = task.events().clone();

    let first = tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.status, TransferPhase::WaitingForPeer);

    task.cancel().await;

    let last = tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(last.status, TransferPhase::Error);
    assert_eq!(last.message.as_deref(), Some(CANCELLED_MESSAGE));
    assert!(events.recv().await.is_err());

    let result = task.wait().await.unwrap();
    assert!(!result.is_success());
}
