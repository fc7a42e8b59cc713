//! Turns a child process's stdout into an HTTP response body.

use std::collections::VecDeque;
use std::io;

use axum::body::{Body, Bytes};
use futures_util::{StreamExt, stream};
use tempfile::TempDir;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::extractor::ExtractorError;
use crate::mux::MuxError;

/// Chunks buffered between the process and the socket.
const CHANNEL_DEPTH: usize = 16;
/// Lines of stderr kept for error reports.
const STDERR_TAIL: usize = 8;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error(transparent)]
    Extractor(#[from] ExtractorError),
    #[error(transparent)]
    Mux(#[from] MuxError),
    #[error("{0} was spawned without a stdout pipe")]
    NoStdout(&'static str),
    #[error("{label} failed before producing output: {detail}")]
    Failed { label: &'static str, detail: String },
    #[error("{0} exited without producing output")]
    Empty(&'static str),
}

/// Resources that must outlive the process feeding a response.
///
/// Dropping the guard aborts the helper tasks, which in turn drops (and kills)
/// the child processes they own.
#[derive(Debug, Default)]
pub struct StreamGuard {
    workdir: Option<TempDir>,
    tasks: Vec<JoinHandle<()>>,
}

impl StreamGuard {
    pub fn with_workdir(mut self, dir: TempDir) -> Self {
        self.workdir = Some(dir);
        self
    }

    pub fn with_task(mut self, task: JoinHandle<()>) -> Self {
        self.tasks.push(task);
        self
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
        if let Some(dir) = &self.workdir {
            debug!(path = %dir.path().display(), "releasing work directory");
        }
    }
}

/// Starts pumping `child`'s stdout and returns once the first chunk is
/// available, so a process that dies immediately becomes an error instead of
/// an empty download.
pub async fn into_body(
    mut child: Child,
    guard: StreamGuard,
    label: &'static str,
) -> Result<Body, StreamError> {
    let stdout = child.stdout.take().ok_or(StreamError::NoStdout(label))?;
    let (tx, mut rx) = mpsc::channel(CHANNEL_DEPTH);
    tokio::spawn(pump(child, stdout, guard, tx, label));

    let first = match rx.recv().await {
        Some(Ok(bytes)) => bytes,
        Some(Err(err)) => {
            return Err(StreamError::Failed {
                label,
                detail: err.to_string(),
            });
        }
        None => return Err(StreamError::Empty(label)),
    };

    let rest = stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    });
    let body = stream::once(async move { Ok::<Bytes, io::Error>(first) }).chain(rest);
    Ok(Body::from_stream(body))
}

async fn pump(
    mut child: Child,
    stdout: ChildStdout,
    guard: StreamGuard,
    tx: mpsc::Sender<io::Result<Bytes>>,
    label: &'static str,
) {
    let stderr = drain_stderr(&mut child, label);
    let mut chunks = ReaderStream::new(stdout);
    let mut sent: u64 = 0;

    loop {
        // Stop on a closed channel even while the process is silent.
        let chunk = tokio::select! {
            chunk = chunks.next() => chunk,
            () = tx.closed() => {
                debug!(label, sent, "client went away, stopping process");
                return;
            }
        };
        let Some(chunk) = chunk else {
            break;
        };
        match chunk {
            Ok(bytes) => {
                sent += bytes.len() as u64;
                if tx.send(Ok(bytes)).await.is_err() {
                    // Dropping `child` kills the process.
                    debug!(label, sent, "client went away, stopping process");
                    return;
                }
            }
            Err(err) => {
                warn!(label, error = %err, "reading process output failed");
                let _ = tx.send(Err(err)).await;
                return;
            }
        }
    }

    let status = child.wait().await;
    let tail = match stderr {
        Some(handle) => handle.await.unwrap_or_default(),
        None => Vec::new(),
    };

    match status {
        Ok(status) if status.success() => {
            debug!(label, sent, "process finished");
        }
        Ok(status) => {
            let detail = describe_failure(&status.to_string(), &tail);
            warn!(label, sent, %detail, "process failed");
            let _ = tx.send(Err(io::Error::other(detail))).await;
        }
        Err(err) => {
            warn!(label, error = %err, "waiting for process failed");
            let _ = tx.send(Err(err)).await;
        }
    }
    drop(guard);
}

/// Logs every stderr line at debug level and keeps the last few for error
/// messages.
pub fn drain_stderr(child: &mut Child, label: &'static str) -> Option<JoinHandle<Vec<String>>> {
    let stderr = child.stderr.take()?;
    Some(tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        let mut tail = VecDeque::with_capacity(STDERR_TAIL);
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(label, "{line}");
            if tail.len() == STDERR_TAIL {
                tail.pop_front();
            }
            tail.push_back(line);
        }
        tail.into()
    }))
}

pub fn describe_failure(status: &str, stderr_tail: &[String]) -> String {
    let last = stderr_tail
        .iter()
        .rev()
        .find(|line| !line.trim().is_empty());
    match last {
        Some(line) => format!("{status}: {}", line.trim()),
        None => status.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;
    use std::time::Duration;
    use tokio::process::Command;

    fn shell(script: &str) -> Child {
        Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .unwrap()
    }

    async fn collect(body: Body) -> Result<Vec<u8>, axum::Error> {
        let mut stream = body.into_data_stream();
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }

    #[tokio::test]
    async fn streams_all_output() {
        let child = shell("printf 'hello '; sleep 0.1; printf 'world'");
        let body = into_body(child, StreamGuard::default(), "sh").await.unwrap();
        assert_eq!(collect(body).await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn early_failure_is_an_error() {
        let child = shell("echo 'ERROR: format not available' >&2; exit 1");
        let err = into_body(child, StreamGuard::default(), "sh")
            .await
            .unwrap_err();
        match err {
            StreamError::Failed { label, detail } => {
                assert_eq!(label, "sh");
                assert!(detail.contains("format not available"), "{detail}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn silent_success_is_empty() {
        let child = shell("exit 0");
        let err = into_body(child, StreamGuard::default(), "sh")
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::Empty("sh")));
    }

    #[tokio::test]
    async fn late_failure_aborts_body() {
        let child = shell("printf 'partial'; sleep 0.1; exit 3");
        let body = into_body(child, StreamGuard::default(), "sh").await.unwrap();
        assert!(collect(body).await.is_err());
    }

    /// False once the process is gone or only a zombie remains.
    fn is_running(pid: u32) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .map(|rest| !matches!(rest.trim_start().chars().next(), Some('Z' | 'X')))
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test(flavor = "multi_thread")]
    async fn abandoned_request_kills_silent_child() {
        let child = shell("sleep 30; printf 'late'");
        let pid = child.id().unwrap();
        assert!(is_running(pid));

        let pending = tokio::time::timeout(
            Duration::from_millis(300),
            into_body(child, StreamGuard::default(), "sh"),
        )
        .await;
        assert!(pending.is_err(), "no output was expected yet");

        let mut stopped = false;
        for _ in 0..50 {
            if !is_running(pid) {
                stopped = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(stopped, "process {pid} outlived its request");
    }

    #[test]
    fn describe_failure_uses_last_non_empty_line() {
        let tail = vec!["first".to_string(), "ERROR: boom".to_string(), "  ".to_string()];
        assert_eq!(
            describe_failure("exit status: 1", &tail),
            "exit status: 1: ERROR: boom"
        );
        assert_eq!(describe_failure("exit status: 2", &[]), "exit status: 2");
    }
}
