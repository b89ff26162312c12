// Copyright (c) The emutest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Running external programs with a deadline.
//!
//! Everything emutest runs (`make`, the sandbox, `diff`) goes through [`ProcessCommand::run`].
//! It captures stdout and stderr separately, optionally streams stdout to a raw capture file,
//! and reports exactly one [`ProcessOutcome`]. If the global cancellation signal fires first,
//! the child is killed and [`Cancelled`] is returned instead.

use bytes::{Bytes, BytesMut};
use camino::{Utf8Path, Utf8PathBuf};
use std::{fmt, io, process::Stdio, sync::Arc, time::Duration};
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader},
    process::{Child, ChildStderr, ChildStdout},
    sync::broadcast,
    time::Instant,
};
use tracing::{debug, warn};

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        use unix as os;
    } else {
        mod other;
        use other as os;
    }
}

/// How long to keep reading output after a child has exited or been killed.
///
/// Grandchildren (for example, compilers started by `make`) can hold the pipes open after the
/// direct child is gone.
const DRAIN_GRACE_PERIOD: Duration = Duration::from_millis(100);

/// The size of each buffered reader's buffer.
const CHUNK_SIZE: usize = 4 * 1024;

/// A program invocation: program, arguments, working directory and optional stdin.
#[derive(Clone, Debug)]
pub struct ProcessCommand {
    program: String,
    args: Vec<String>,
    cwd: Option<Utf8PathBuf>,
    stdin: Option<Bytes>,
    raw_capture: Option<Utf8PathBuf>,
}

impl ProcessCommand {
    /// Creates a new command for the given program.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            stdin: None,
            raw_capture: None,
        }
    }

    /// Adds an argument.
    pub fn arg(&mut self, arg: impl Into<String>) -> &mut Self {
        self.args.push(arg.into());
        self
    }

    /// Adds several arguments.
    pub fn args(&mut self, args: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the working directory.
    pub fn current_dir(&mut self, dir: impl Into<Utf8PathBuf>) -> &mut Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Feeds these bytes to the program's stdin, then closes it.
    pub fn stdin(&mut self, input: impl Into<Bytes>) -> &mut Self {
        self.stdin = Some(input.into());
        self
    }

    /// Streams stdout to this file as it arrives, replacing any existing file.
    pub fn raw_capture(&mut self, path: impl Into<Utf8PathBuf>) -> &mut Self {
        self.raw_capture = Some(path.into());
        self
    }

    /// Runs the command to completion, to the deadline, or until cancelled.
    pub async fn run(
        &self,
        timeout: Duration,
        cancel: &mut CancelSignal,
    ) -> Result<ProcessOutcome, Cancelled> {
        let deadline = Instant::now() + timeout;

        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        os::set_process_group(&mut cmd);

        debug!(command = %self, "spawning");
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(error) => {
                debug!(command = %self, %error, "failed to spawn");
                return Ok(ProcessOutcome::StartFailed {
                    error: Arc::new(error),
                });
            }
        };

        if let (Some(input), Some(mut stdin)) = (self.stdin.clone(), child.stdin.take()) {
            // Written from a separate task so a child that produces output before reading all
            // of its input can't deadlock against us.
            tokio::spawn(async move {
                // The child may exit without reading all of its input.
                let _ = stdin.write_all(&input).await;
            });
        }

        let raw_file = match &self.raw_capture {
            Some(path) => open_raw_capture(path).await,
            None => None,
        };
        let mut acc = OutputAccumulator::new(&mut child, raw_file);

        let sleep = tokio::time::sleep_until(deadline);
        let mut sleep = std::pin::pin!(sleep);

        let finish = loop {
            tokio::select! {
                // The raw write runs in the handler, where it can't be cancelled mid-way.
                () = acc.fill_buf(), if !acc.is_done() => acc.write_raw().await,
                res = child.wait() => {
                    break Finish::Exited(res);
                }
                () = &mut sleep => {
                    break Finish::TimedOut;
                }
                () = cancel.cancelled() => {
                    break Finish::Cancelled;
                }
            }
        };

        match finish {
            Finish::Exited(res) => {
                let _ = tokio::time::timeout_at(drain_deadline(deadline, Instant::now()), acc.drain())
                    .await;
                match res {
                    Ok(status) => Ok(ProcessOutcome::Exited {
                        exit_code: status.code(),
                        output: acc.finish().await,
                    }),
                    Err(error) => {
                        // Waiting on a child we spawned should never fail; treat it as a
                        // failure to run the program at all.
                        warn!(command = %self, %error, "failed to wait on child");
                        Ok(ProcessOutcome::StartFailed {
                            error: Arc::new(error),
                        })
                    }
                }
            }
            Finish::TimedOut => {
                debug!(command = %self, ?timeout, "deadline exceeded, killing");
                kill_child(&mut child).await;
                let _ = tokio::time::timeout(DRAIN_GRACE_PERIOD, acc.drain()).await;
                Ok(ProcessOutcome::TimedOut {
                    timeout,
                    output: acc.finish().await,
                })
            }
            Finish::Cancelled => {
                debug!(command = %self, "cancelled, killing");
                kill_child(&mut child).await;
                Err(Cancelled)
            }
        }
    }
}

impl fmt::Display for ProcessCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            shell_words::join(std::iter::once(&self.program).chain(&self.args))
        )
    }
}

/// After a normal exit, output is drained until the run deadline, and for at least the grace
/// period.
fn drain_deadline(deadline: Instant, exited_at: Instant) -> Instant {
    deadline.max(exited_at + DRAIN_GRACE_PERIOD)
}

enum Finish {
    Exited(io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

async fn kill_child(child: &mut Child) {
    if let Some(pid) = child.id() {
        os::kill_process_group(pid);
    }
    // The child may have exited in the meantime, in which case this fails harmlessly.
    let _ = child.start_kill();
    let _ = child.wait().await;
}

async fn open_raw_capture(path: &Utf8Path) -> Option<File> {
    match File::create(path).await {
        Ok(file) => Some(file),
        Err(error) => {
            warn!("failed to create raw capture file `{path}`: {error}");
            None
        }
    }
}

/// The result of running a program to completion or to its deadline.
#[derive(Clone, Debug)]
pub enum ProcessOutcome {
    /// The program ran and exited on its own.
    Exited {
        /// The exit code, or `None` if the program was terminated by a signal.
        exit_code: Option<i32>,

        /// Everything the program wrote.
        output: CapturedOutput,
    },

    /// The program could not be launched.
    StartFailed {
        /// The error returned by the operating system.
        error: Arc<io::Error>,
    },

    /// The deadline passed and the program was killed.
    TimedOut {
        /// The deadline that was exceeded.
        timeout: Duration,

        /// Whatever the program wrote before it was killed.
        output: CapturedOutput,
    },
}

impl ProcessOutcome {
    /// Returns the captured output, if the program was launched.
    pub fn output(&self) -> Option<&CapturedOutput> {
        match self {
            Self::Exited { output, .. } | Self::TimedOut { output, .. } => Some(output),
            Self::StartFailed { .. } => None,
        }
    }

    /// Returns true if the program exited on its own with exit code 0.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Self::Exited {
                exit_code: Some(0),
                ..
            }
        )
    }
}

/// Captured stdout and stderr of a child process.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    /// Raw stdout bytes.
    pub stdout: Bytes,

    /// Raw stderr bytes.
    pub stderr: Bytes,
}

impl CapturedOutput {
    /// Returns stdout as a lossy UTF-8 string.
    pub fn stdout_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    /// Returns stderr as a lossy UTF-8 string.
    pub fn stderr_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }
}

/// Returned by [`ProcessCommand::run`] when the run was cancelled.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Cancelled;

/// A receiver for the global cancellation signal.
///
/// Once the signal fires (or its sender goes away), [`Self::cancelled`] resolves immediately
/// on every subsequent call.
#[derive(Debug)]
pub struct CancelSignal {
    receiver: Option<broadcast::Receiver<()>>,
    fired: bool,
}

impl CancelSignal {
    /// Creates a signal that fires when the sender broadcasts.
    pub fn new(receiver: broadcast::Receiver<()>) -> Self {
        Self {
            receiver: Some(receiver),
            fired: false,
        }
    }

    /// Creates a signal that never fires.
    pub fn never() -> Self {
        Self {
            receiver: None,
            fired: false,
        }
    }

    /// Waits until cancellation is requested.
    pub async fn cancelled(&mut self) {
        if self.fired {
            return;
        }
        match &mut self.receiver {
            Some(receiver) => {
                // Any result (a message, lag or a closed channel) means cancellation.
                let _ = receiver.recv().await;
                self.fired = true;
            }
            None => std::future::pending().await,
        }
    }
}

/// A `BufReader` that tracks whether it has hit EOF.
struct FusedBufReader<R> {
    reader: BufReader<R>,
    done: bool,
}

impl<R: AsyncRead + Unpin> FusedBufReader<R> {
    fn new(reader: R) -> Self {
        Self {
            reader: BufReader::with_capacity(CHUNK_SIZE, reader),
            done: false,
        }
    }

    /// Appends whatever is available to `acc`, returning the number of bytes read.
    async fn fill_buf(&mut self, acc: &mut BytesMut) -> io::Result<usize> {
        if self.done {
            return Ok(0);
        }

        match self.reader.fill_buf().await {
            Ok(buf) => {
                acc.extend_from_slice(buf);
                let len = buf.len();
                if len == 0 {
                    self.done = true;
                }
                self.reader.consume(len);
                Ok(len)
            }
            Err(error) => {
                self.done = true;
                Err(error)
            }
        }
    }
}

fn is_done_opt<R: AsyncRead + Unpin>(reader: &Option<FusedBufReader<R>>) -> bool {
    reader.as_ref().is_none_or(|r| r.done)
}

/// Accumulates stdout and stderr of a child, mirroring stdout into the raw capture file.
struct OutputAccumulator {
    stdout: Option<FusedBufReader<ChildStdout>>,
    stderr: Option<FusedBufReader<ChildStderr>>,
    stdout_buf: BytesMut,
    stderr_buf: BytesMut,
    raw_file: Option<File>,
    raw_written: usize,
}

impl OutputAccumulator {
    fn new(child: &mut Child, raw_file: Option<File>) -> Self {
        Self {
            stdout: child.stdout.take().map(FusedBufReader::new),
            stderr: child.stderr.take().map(FusedBufReader::new),
            stdout_buf: BytesMut::with_capacity(CHUNK_SIZE),
            stderr_buf: BytesMut::new(),
            raw_file,
            raw_written: 0,
        }
    }

    fn is_done(&self) -> bool {
        is_done_opt(&self.stdout) && is_done_opt(&self.stderr)
    }

    /// Reads the next chunk of output. Cancel-safe: bytes are appended only once read.
    async fn fill_buf(&mut self) {
        let res = tokio::select! {
            res = fill_buf_opt(self.stdout.as_mut(), &mut self.stdout_buf), if !is_done_opt(&self.stdout) => res,
            res = fill_buf_opt(self.stderr.as_mut(), &mut self.stderr_buf), if !is_done_opt(&self.stderr) => res,
            else => Ok(0),
        };
        if let Err(error) = res {
            debug!(%error, "error reading child output, treating as EOF");
        }
    }

    /// Appends stdout not yet mirrored to the raw capture file.
    ///
    /// Must not be cancelled: a partial `write_all` would leave the file and `raw_written` out of
    /// step.
    async fn write_raw(&mut self) {
        let pending = &self.stdout_buf[self.raw_written..];
        if pending.is_empty() {
            return;
        }
        if let Some(file) = &mut self.raw_file {
            if let Err(error) = file.write_all(pending).await {
                warn!("failed to write raw capture: {error}");
                self.raw_file = None;
            }
        }
        self.raw_written = self.stdout_buf.len();
    }

    /// Reads until EOF. Only reads, so it can be bounded by a timeout; `finish` writes the rest
    /// of the raw capture.
    async fn drain(&mut self) {
        while !self.is_done() {
            self.fill_buf().await;
        }
    }

    /// Writes out and flushes the rest of the raw capture, then returns the captured output.
    async fn finish(mut self) -> CapturedOutput {
        self.write_raw().await;
        if let Some(file) = &mut self.raw_file {
            if let Err(error) = file.flush().await {
                warn!("failed to flush raw capture: {error}");
            }
        }
        CapturedOutput {
            stdout: self.stdout_buf.freeze(),
            stderr: self.stderr_buf.freeze(),
        }
    }
}

async fn fill_buf_opt<R: AsyncRead + Unpin>(
    reader: Option<&mut FusedBufReader<R>>,
    acc: &mut BytesMut,
) -> io::Result<usize> {
    match reader {
        Some(reader) => reader.fill_buf(acc).await,
        None => Ok(0),
    }
}
