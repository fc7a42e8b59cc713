//! Adapter around the `yt-dlp` executable.
//!
//! Two capabilities are used: dumping a video's metadata as JSON, and writing
//! one selected format to stdout. Arguments are always passed as separate argv
//! entries and the URL handed over is rebuilt from a validated [`VideoId`].

use std::path::{Path, PathBuf};
use std::process::Stdio;

use thiserror::Error;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::formats::FormatSelector;
use crate::metadata::VideoInfo;
use crate::stream::describe_failure;
use crate::video_ref::VideoId;

#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("metadata lookup for {video_id} failed ({detail})")]
    Lookup { video_id: String, detail: String },
    #[error("metadata for {video_id} could not be parsed: {source}")]
    Parse {
        video_id: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone)]
pub struct YtDlp {
    program: PathBuf,
    cookies: Option<PathBuf>,
}

impl YtDlp {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            cookies: None,
        }
    }

    /// Passes `--cookies` on every call, provided the file exists when the
    /// command is built.
    pub fn with_cookies(mut self, cookies: Option<PathBuf>) -> Self {
        self.cookies = cookies;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("--no-warnings")
            .arg("--no-progress")
            .arg("--no-playlist");
        if let Some(cookies) = self.cookies.as_deref().filter(|path| path.exists()) {
            command.arg("--cookies").arg(cookies);
        }
        command.stdin(Stdio::null()).kill_on_drop(true);
        command
    }

    fn spawn_error(&self, source: std::io::Error) -> ExtractorError {
        ExtractorError::Spawn {
            program: self.program.display().to_string(),
            source,
        }
    }

    /// Runs `yt-dlp --dump-single-json` for the video.
    pub async fn fetch_info(&self, video_id: &VideoId) -> Result<VideoInfo, ExtractorError> {
        let mut command = self.command();
        command
            .arg("--dump-single-json")
            .arg("--skip-download")
            .arg(video_id.watch_url());

        debug!(%video_id, "fetching metadata");
        let output = command.output().await.map_err(|err| self.spawn_error(err))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<String> = stderr.lines().map(str::to_owned).collect();
            return Err(ExtractorError::Lookup {
                video_id: video_id.to_string(),
                detail: describe_failure(&output.status.to_string(), &tail),
            });
        }

        let raw = String::from_utf8_lossy(&output.stdout);
        VideoInfo::from_ytdlp_json(&raw).map_err(|source| ExtractorError::Parse {
            video_id: video_id.to_string(),
            source,
        })
    }

    /// Spawns `yt-dlp -f <selector> -o -`; the media bytes arrive on the
    /// child's stdout.
    pub fn spawn_stream(
        &self,
        video_id: &VideoId,
        selector: &FormatSelector,
    ) -> Result<Child, ExtractorError> {
        let mut command = self.command();
        command
            .arg("--quiet")
            .arg("--no-part")
            .arg("-f")
            .arg(selector.as_arg())
            .arg("-o")
            .arg("-")
            .arg(video_id.watch_url())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(%video_id, format = selector.as_arg(), "starting stream");
        command.spawn().map_err(|err| self.spawn_error(err))
    }
}

/// Runs `<program> <version_flag>` and logs the first line of its output.
/// Missing tools only produce a warning; the gateway can still serve the UI.
pub async fn probe_tool(program: &Path, version_flag: &str) -> bool {
    let result = Command::new(program)
        .arg(version_flag)
        .stdin(Stdio::null())
        .output()
        .await;
    match result {
        Ok(output) if output.status.success() => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let version = stdout.lines().next().unwrap_or_default().trim();
            info!(program = %program.display(), version, "found external tool");
            true
        }
        Ok(output) => {
            warn!(program = %program.display(), status = %output.status, "external tool check failed");
            false
        }
        Err(err) => {
            warn!(program = %program.display(), error = %err, "external tool not available");
            false
        }
    }
}
