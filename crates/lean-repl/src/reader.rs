//! Background reader for REPL output.
//!
//! The read-and-reparse loop runs in its own task so the caller can bound
//! the wait with a wall-clock timeout. The REPL cannot be interrupted
//! mid-command, so on timeout the caller kills the process rather than
//! trying to unstick the reader.

use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::ChildStdout;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::protocol::{ReplResponse, ResponseAccumulator};
use crate::types::CheckerError;

const CHUNK_SIZE: usize = 8192;

/// What the reader task hands back when it finishes.
///
/// The stdout handle is returned so the next request can reuse it.
pub struct ReadOutcome {
    pub stdout: ChildStdout,
    pub result: Result<ReplResponse, CheckerError>,
}

/// Result of a bounded wait on the reader.
pub enum ReaderStatus {
    Completed(ReadOutcome),
    TimedOut,
    /// The task ended without reporting (panicked or was aborted).
    Lost,
}

/// A single-response reader task.
pub struct ResponseReader {
    done: oneshot::Receiver<ReadOutcome>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ResponseReader {
    /// Start draining `stdout` until one complete response has been parsed.
    pub fn spawn(stdout: ChildStdout) -> Self {
        let (tx, done) = oneshot::channel();
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let outcome = read_response(stdout, token).await;
            let _ = tx.send(outcome);
        });

        Self { done, cancel, task }
    }

    /// Wait at most `timeout` for the response.
    pub async fn wait(&mut self, timeout: Duration) -> ReaderStatus {
        match tokio::time::timeout(timeout, &mut self.done).await {
            Ok(Ok(outcome)) => ReaderStatus::Completed(outcome),
            Ok(Err(_)) => ReaderStatus::Lost,
            Err(_) => ReaderStatus::TimedOut,
        }
    }

    /// Ask the reader to stop at its next await point.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for ResponseReader {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn read_response(mut stdout: ChildStdout, cancel: CancellationToken) -> ReadOutcome {
    let mut acc = ResponseAccumulator::new();
    let mut chunk = vec![0u8; CHUNK_SIZE];

    let result = loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => {
                break Err(CheckerError::Protocol("Reader stopped before a response arrived".into()));
            }
            read = stdout.read(&mut chunk) => read,
        };

        match read {
            Ok(0) if acc.is_empty() => break Err(CheckerError::ProcessExited(None)),
            Ok(0) => {
                break Err(CheckerError::Protocol(
                    "Output stream closed in the middle of a response".into(),
                ))
            }
            Ok(n) => {
                if let Some(parsed) = acc.push(&chunk[..n]) {
                    break parsed;
                }
            }
            Err(e) => break Err(CheckerError::Io(e)),
        }
    };

    ReadOutcome { stdout, result }
}
