#![forbid(unsafe_code)]

//! Terminal client for a running gateway: inspect a video's formats and save
//! any of the three download endpoints to disk.

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::PathBuf,
};
use tubegrab::{
    formats::{audio_only, highest_quality, sort_by_quality},
    metadata::VideoInfo,
};

const DEFAULT_SERVER: &str = "http://localhost:4000";

#[derive(Parser, Debug)]
#[command(author, version, about = "Inspect and download videos through a tubegrab gateway.")]
struct Cli {
    #[arg(
        long,
        value_name = "URL",
        default_value = DEFAULT_SERVER,
        global = true,
        help = "Base URL of the gateway"
    )]
    server: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print video details and the available formats, best quality first.
    Info {
        #[arg(value_name = "URL")]
        url: String,
    },
    /// Save a video or audio download to disk.
    Download {
        #[arg(value_name = "VIDEO_ID")]
        video_id: String,
        #[arg(long, value_name = "ITAG", help = "Format to download (see `info`)")]
        itag: Option<String>,
        #[arg(long, conflicts_with = "audio", help = "Mux the format with the best audio track")]
        hq: bool,
        #[arg(long, help = "Download the best audio track only")]
        audio: bool,
        #[arg(short, long, value_name = "PATH", help = "Output file (defaults to the server's filename)")]
        output: Option<PathBuf>,
    },
}

/// Which endpoint a download maps to.
#[derive(Debug, PartialEq, Eq)]
struct DownloadTarget {
    path: &'static str,
    query: Vec<(&'static str, String)>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_owned();
    match cli.command {
        Command::Info { url } => info(&server, &url),
        Command::Download {
            video_id,
            itag,
            hq,
            audio,
            output,
        } => {
            let target = download_target(&video_id, itag, hq, audio)?;
            download(&server, target, output)
        }
    }
}

fn info(server: &str, url: &str) -> Result<()> {
    let response = call(
        ureq::get(&format!("{server}/api/videoInfo")).query("url", url),
    )?;
    let info: VideoInfo = response
        .into_json()
        .context("parsing video information")?;
    print!("{}", render_info(&info));
    Ok(())
}

fn render_info(info: &VideoInfo) -> String {
    let details = &info.video_details;
    let mut out = String::new();
    out.push_str(&format!("{}\n", details.title));
    out.push_str(&format!("Channel:  {}\n", details.author.name));
    out.push_str(&format!(
        "Duration: {}\n",
        format_duration(details.length_seconds)
    ));
    out.push_str(&format!("Id:       {}\n", details.video_id));
    if let Some(best) = highest_quality(&info.formats) {
        let label = best.quality_label.as_deref().unwrap_or_default();
        out.push_str(&format!("Best:     {label} (itag {})\n", best.itag));
    }
    out.push('\n');

    for format in sort_by_quality(&info.formats) {
        let label = format.quality_label.as_deref().unwrap_or("?");
        let kind = if format.has_audio { "video+audio" } else { "video only" };
        out.push_str(&format!(
            "{:>8}  {:<12} {:<12} {}\n",
            format.itag, label, kind, format.mime_type
        ));
    }
    let audio_count = audio_only(&info.formats).count();
    out.push_str(&format!("\n{audio_count} audio-only format(s) available\n"));
    out
}

fn download_target(
    video_id: &str,
    itag: Option<String>,
    hq: bool,
    audio: bool,
) -> Result<DownloadTarget> {
    let mut query = vec![("videoId", video_id.to_owned())];
    if audio {
        return Ok(DownloadTarget {
            path: "/api/audio",
            query,
        });
    }
    let itag = itag.ok_or_else(|| anyhow!("--itag is required unless --audio is given"))?;
    query.push(("itag", itag));
    let path = if hq { "/api/hq-download" } else { "/api/download" };
    Ok(DownloadTarget { path, query })
}

fn download(server: &str, target: DownloadTarget, output: Option<PathBuf>) -> Result<()> {
    let mut request = ureq::get(&format!("{server}{}", target.path));
    for (key, value) in &target.query {
        request = request.query(key, value);
    }
    let response = call(request)?;

    let output = output
        .or_else(|| {
            response
                .header("content-disposition")
                .and_then(filename_from_disposition)
                .map(PathBuf::from)
        })
        .unwrap_or_else(|| PathBuf::from("download.bin"));

    let file =
        File::create(&output).with_context(|| format!("creating {}", output.display()))?;
    let mut writer = BufWriter::new(file);
    let written = io::copy(&mut response.into_reader(), &mut writer)
        .with_context(|| format!("writing {}", output.display()))?;
    writer.flush()?;
    println!("Saved {} ({} bytes)", output.display(), written);
    Ok(())
}

/// Sends the request and turns error statuses into the server's message.
fn call(request: ureq::Request) -> Result<ureq::Response> {
    match request.call() {
        Ok(response) => Ok(response),
        Err(ureq::Error::Status(code, response)) => {
            let body = response.into_string().unwrap_or_default();
            bail!("server returned {code}: {}", error_message(&body))
        }
        Err(err) => Err(anyhow!("contacting the gateway: {err}")),
    }
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| value.get("error").and_then(|e| e.as_str()).map(str::to_owned))
        .unwrap_or_else(|| body.trim().to_owned())
}

/// Extracts `name` from `attachment; filename="name"`, keeping only the final
/// path component.
fn filename_from_disposition(header: &str) -> Option<String> {
    let raw = header
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("filename="))?;
    let name = raw.trim_matches('"');
    let name = name.rsplit(['/', '\\']).next().unwrap_or(name);
    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name.to_owned())
    }
}

/// Renders durations as `H:MM:SS` or `M:SS` for short clips.
fn format_duration(duration: u64) -> String {
    let hours = duration / 3600;
    let minutes = (duration % 3600) / 60;
    let seconds = duration % 60;

    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}
