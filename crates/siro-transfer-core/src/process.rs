// SPDX-License-Identifier: AGPL-3.0
// Siro Transfer Core - Subprocess runner
//
// Owns one croc child process: its stdout and stderr merged into a single
// line stream, a stdin writer for prompt answers, and its exit status.
// No parsing happens here.

use crate::types::AppError;
use std::ffi::OsString;
use std::io::{self, BufRead, BufReader, ErrorKind, Read, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How often exit status is polled while waiting or terminating
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Launch `program` with `args` and extra environment.
///
/// stdout and stderr share one pipe so lines keep the order the child
/// wrote them in. The child gets its own process group on Unix so a
/// cancellation reaches anything it spawned.
pub fn start(
    program: &Path,
    args: &[OsString],
    env: &[(String, String)],
) -> Result<ProcessHandle, AppError> {
    let spawn_error = |reason: String| AppError::Spawn {
        program: program.display().to_string(),
        reason,
    };

    let (output, output_writer) =
        io::pipe().map_err(|e| spawn_error(format!("could not create output pipe: {}", e)))?;
    let error_writer = output_writer
        .try_clone()
        .map_err(|e| spawn_error(format!("could not share output pipe: {}", e)))?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .envs(env.iter().map(|(k, v)| (k, v)))
        .stdin(Stdio::piped())
        .stdout(Stdio::from(output_writer))
        .stderr(Stdio::from(error_writer));

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let spawned = cmd.spawn();
    // The command still owns our copies of the write end; EOF needs them gone
    drop(cmd);
    let mut child = spawned.map_err(|e| spawn_error(e.to_string()))?;

    tracing::info!("Started {} (pid {})", program.display(), child.id());

    let stdin = child.stdin.take();
    let (line_tx, line_rx) = mpsc::channel();

    let mut handle = ProcessHandle {
        child: Arc::new(Mutex::new(child)),
        stdin,
        lines: Some(line_rx),
        reader: None,
        exit_code: None,
    };

    // Dropping `handle` on a failed reader spawn kills the child
    let reader = thread::Builder::new()
        .name("croc-output".to_string())
        .spawn(move || read_lines(output, line_tx))
        .map_err(|e| spawn_error(format!("could not start output reader: {}", e)))?;
    handle.reader = Some(reader);

    Ok(handle)
}

/// Pump the output pipe into the line channel until EOF
fn read_lines(reader: impl Read, tx: mpsc::Sender<String>) {
    let mut reader = BufReader::new(reader);
    let mut splitter = LineSplitter::default();

    loop {
        let chunk = match reader.fill_buf() {
            Ok([]) => break,
            Ok(chunk) => chunk,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::debug!("croc output read failed: {}", e);
                break;
            }
        };
        let consumed = chunk.len();
        for line in splitter.push(chunk) {
            if tx.send(line).is_err() {
                return;
            }
        }
        reader.consume(consumed);
    }

    if let Some(line) = splitter.finish() {
        let _ = tx.send(line);
    }
}

/// Splits a byte stream on `\n` and `\r`. Progress bars redraw in place
/// with bare carriage returns, so each redraw becomes its own line.
#[derive(Debug, Default)]
pub struct LineSplitter {
    buf: Vec<u8>,
}

impl LineSplitter {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in bytes {
            if byte == b'\n' || byte == b'\r' {
                if !self.buf.is_empty() {
                    lines.push(String::from_utf8_lossy(&self.buf).into_owned());
                    self.buf.clear();
                }
            } else {
                self.buf.push(byte);
            }
        }
        lines
    }

    /// Trailing text without a terminator
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        Some(line)
    }
}

/// Blocking iterator over the child's output lines, in arrival order.
/// Ends once both pipes are closed.
pub struct OutputLines {
    rx: Option<mpsc::Receiver<String>>,
}

impl Iterator for OutputLines {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.rx.as_ref()?.recv().ok()
    }
}

/// A running (or finished) child process
pub struct ProcessHandle {
    child: Arc<Mutex<Child>>,
    stdin: Option<ChildStdin>,
    lines: Option<mpsc::Receiver<String>>,
    reader: Option<JoinHandle<()>>,
    exit_code: Option<i32>,
}

impl ProcessHandle {
    pub fn id(&self) -> u32 {
        lock(&self.child).id()
    }

    /// Output line stream. Single use: later calls yield nothing.
    pub fn lines(&mut self) -> OutputLines {
        OutputLines {
            rx: self.lines.take(),
        }
    }

    /// Write `text` plus a newline to the child's stdin
    pub fn send_line(&mut self, text: &str) -> Result<(), AppError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| AppError::Write("stdin already closed".to_string()))?;

        let result = stdin
            .write_all(format!("{}\n", text).as_bytes())
            .and_then(|_| stdin.flush());

        result.map_err(|e| {
            // A broken pipe stays broken
            self.stdin = None;
            AppError::Write(e.to_string())
        })
    }

    pub fn close_stdin(&mut self) {
        self.stdin = None;
    }

    /// Block until the child exits. Repeated calls return the same code.
    pub fn wait(&mut self) -> Result<i32, AppError> {
        if let Some(code) = self.exit_code {
            return Ok(code);
        }

        // Nobody will answer a prompt from here on
        self.close_stdin();

        // Polled so a terminator on another thread can take the lock
        let status = loop {
            if let Some(status) = lock(&self.child).try_wait()? {
                break status;
            }
            thread::sleep(POLL_INTERVAL);
        };

        if let Some(reader) = self.reader.take() {
            if reader.is_finished() {
                let _ = reader.join();
            } else {
                // A grandchild may still hold the pipe open
                tracing::debug!("Output reader still running after exit, detaching");
            }
        }

        let code = exit_code_of(status);
        tracing::info!("croc exited with code {}", code);
        self.exit_code = Some(code);
        Ok(code)
    }

    /// A handle other threads can use to stop the child
    pub fn terminator(&self) -> ProcessTerminator {
        ProcessTerminator {
            child: Arc::clone(&self.child),
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.exit_code.is_some() {
            return;
        }
        let mut child = lock(&self.child);
        if let Ok(None) = child.try_wait() {
            tracing::debug!("Process handle dropped while croc still running, killing it");
            force_kill(&mut child);
            let _ = child.wait();
        }
    }
}

/// Stops a child from any thread: polite signal first, SIGKILL after `grace`
#[derive(Clone)]
pub struct ProcessTerminator {
    child: Arc<Mutex<Child>>,
}

impl ProcessTerminator {
    pub fn terminate(&self, grace: Duration) {
        {
            let mut child = lock(&self.child);
            if !matches!(child.try_wait(), Ok(None)) {
                return;
            }
            tracing::info!("Asking croc (pid {}) to stop", child.id());
            request_stop(&mut child);
        }

        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            thread::sleep(POLL_INTERVAL);
            if !matches!(lock(&self.child).try_wait(), Ok(None)) {
                return;
            }
        }

        let mut child = lock(&self.child);
        if let Ok(None) = child.try_wait() {
            tracing::warn!("croc ignored termination for {:?}, killing it", grace);
            force_kill(&mut child);
        }
    }
}

fn lock(child: &Mutex<Child>) -> MutexGuard<'_, Child> {
    child.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(unix)]
fn signal_group(child: &Child, signal: libc::c_int) {
    // The child leads its own process group (see `start`), and is not yet
    // reaped while the caller holds its lock, so the group id is still ours.
    let pgid = child.id() as libc::pid_t;
    unsafe {
        libc::kill(-pgid, signal);
    }
}

#[cfg(unix)]
fn request_stop(child: &mut Child) {
    signal_group(child, libc::SIGTERM);
}

#[cfg(not(unix))]
fn request_stop(child: &mut Child) {
    let _ = child.kill();
}

fn force_kill(child: &mut Child) {
    #[cfg(unix)]
    signal_group(child, libc::SIGKILL);
    let _ = child.kill();
}

fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}
