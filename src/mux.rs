//! Copy-muxing a video-only and an audio-only stream with `ffmpeg`.
//!
//! Each source process writes into its own named pipe inside a private
//! temporary directory; ffmpeg reads both pipes as inputs and writes a
//! fragmented MP4 to stdout. Nothing is re-encoded and nothing checks that the
//! two inputs line up; a shorter input simply yields a shorter output.
//! Feeders wait as long as ffmpeg needs to reach their pipe and are torn down
//! together with the response through [`StreamGuard`].

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use thiserror::Error;
use tokio::net::unix::pipe;
use tokio::process::{Child, Command};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::stream::{StreamGuard, drain_stderr};

/// Poll interval while a feeder waits for ffmpeg to open its input pipe.
const FIFO_OPEN_RETRY: Duration = Duration::from_millis(20);

#[derive(Debug, Error)]
pub enum MuxError {
    #[error("creating mux work directory: {0}")]
    Workdir(#[source] io::Error),
    #[error("creating pipe {path}: {source}")]
    Fifo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{0} stream was spawned without a stdout pipe")]
    MissingInput(&'static str),
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct Ffmpeg {
    program: PathBuf,
}

impl Ffmpeg {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Starts ffmpeg on two already-running source processes. The returned
    /// guard owns the pipes and the feeder tasks and must live as long as
    /// ffmpeg's stdout is being read.
    pub fn copy_mux(&self, video: Child, audio: Child) -> Result<(Child, StreamGuard), MuxError> {
        if video.stdout.is_none() {
            return Err(MuxError::MissingInput("video"));
        }
        if audio.stdout.is_none() {
            return Err(MuxError::MissingInput("audio"));
        }

        let workdir = tempfile::Builder::new()
            .prefix("tubegrab-mux-")
            .tempdir()
            .map_err(MuxError::Workdir)?;
        let video_pipe = workdir.path().join("video.pipe");
        let audio_pipe = workdir.path().join("audio.pipe");
        make_fifo(&video_pipe)?;
        make_fifo(&audio_pipe)?;

        let child = Command::new(&self.program)
            .args(copy_mux_args(&video_pipe, &audio_pipe))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| MuxError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        let guard = StreamGuard::default()
            .with_workdir(workdir)
            .with_task(tokio::spawn(feed(video, video_pipe, "video")))
            .with_task(tokio::spawn(feed(audio, audio_pipe, "audio")));
        Ok((child, guard))
    }
}

/// ffmpeg arguments: first input supplies video, second audio, both copied
/// into a fragmented MP4 so the container can be written to a pipe.
pub fn copy_mux_args(video: &Path, audio: &Path) -> Vec<String> {
    let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-nostdin", "-i"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    args.push(video.display().to_string());
    args.push("-i".into());
    args.push(audio.display().to_string());
    args.extend(
        [
            "-map",
            "0:v:0",
            "-map",
            "1:a:0",
            "-c:v",
            "copy",
            "-c:a",
            "copy",
            "-movflags",
            "frag_keyframe+empty_moov",
            "-f",
            "mp4",
            "pipe:1",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    args
}

fn make_fifo(path: &Path) -> Result<(), MuxError> {
    mkfifo(path, Mode::S_IRUSR | Mode::S_IWUSR).map_err(|errno| MuxError::Fifo {
        path: path.to_path_buf(),
        source: io::Error::from(errno),
    })
}

/// Opens the write end of a FIFO without blocking a runtime thread. Opening
/// fails with `ENXIO` until ffmpeg has the read end open.
///
/// No deadline: ffmpeg only opens the second pipe after probing the first
/// stream. The feeder is stopped by [`StreamGuard`] once ffmpeg's output is
/// finished or the client is gone.
async fn open_writer(path: &Path) -> io::Result<pipe::Sender> {
    let mut waited = Duration::ZERO;
    loop {
        match pipe::OpenOptions::new().open_sender(path) {
            Ok(sender) => return Ok(sender),
            Err(err) if err.raw_os_error() == Some(Errno::ENXIO as i32) => {
                sleep(FIFO_OPEN_RETRY).await;
                waited += FIFO_OPEN_RETRY;
                if waited.as_millis() % 10_000 == 0 {
                    debug!(path = %path.display(), ?waited, "still waiting for ffmpeg to open pipe");
                }
            }
            Err(err) => return Err(err),
        }
    }
}

/// Copies one source process's stdout into its pipe, then reaps the process.
async fn feed(mut source: Child, fifo: PathBuf, label: &'static str) {
    let Some(mut stdout) = source.stdout.take() else {
        return;
    };
    let stderr = drain_stderr(&mut source, label);

    let mut writer = match open_writer(&fifo).await {
        Ok(writer) => writer,
        Err(err) => {
            warn!(label, error = %err, "mux input was never opened");
            return;
        }
    };

    match tokio::io::copy(&mut stdout, &mut writer).await {
        Ok(bytes) => debug!(label, bytes, "mux input complete"),
        // ffmpeg closing its input early surfaces here as a broken pipe.
        Err(err) => debug!(label, error = %err, "mux input interrupted"),
    }
    drop(writer);

    match source.wait().await {
        Ok(status) if status.success() => {}
        Ok(status) => {
            let tail = match stderr {
                Some(handle) => handle.await.unwrap_or_default(),
                None => Vec::new(),
            };
            warn!(label, %status, stderr = ?tail.last(), "mux input process failed");
        }
        Err(err) => warn!(label, error = %err, "waiting for mux input failed"),
    }
}
