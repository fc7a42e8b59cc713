//! Syntactic validation of video references.
//!
//! Nothing here talks to the network. A reference is either a bare
//! 11-character id or a URL on one of the known hosts; both are reduced to a
//! [`VideoId`] and only the canonical watch URL built from it is ever handed to
//! the extraction tool.

use std::fmt;

use thiserror::Error;
use url::Url;

const ID_LEN: usize = 11;

/// Hosts that carry the id in the `v` query parameter.
const QUERY_HOSTS: &[&str] = &[
    "youtube.com",
    "www.youtube.com",
    "m.youtube.com",
    "music.youtube.com",
    "gaming.youtube.com",
];

/// First path segments on `youtube.com` that are followed by the id.
const ID_PATH_PREFIXES: &[&str] = &["embed", "v", "shorts", "live"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VideoRefError {
    #[error("not a valid URL: {0}")]
    Malformed(String),
    #[error("not a YouTube domain: {0}")]
    ForeignHost(String),
    #[error("no video id found in {0:?}")]
    MissingId(String),
    #[error("video id {0:?} does not match the expected format")]
    InvalidId(String),
}

/// A syntactically valid video identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VideoId(String);

impl VideoId {
    pub fn parse(value: &str) -> Result<Self, VideoRefError> {
        if is_valid_id(value) {
            Ok(Self(value.to_owned()))
        } else {
            Err(VideoRefError::InvalidId(value.to_owned()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn watch_url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.0)
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn is_valid_id(value: &str) -> bool {
    value.len() == ID_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Drops everything from the first `&` onwards, which strips playlist and
/// timestamp parameters pasted along with a watch URL.
pub fn clean_url(raw: &str) -> &str {
    raw.split('&').next().unwrap_or(raw).trim()
}

/// Extracts the video id from a URL on one of the supported hosts.
pub fn parse_url(raw: &str) -> Result<VideoId, VideoRefError> {
    let trimmed = raw.trim();
    let parsed = Url::parse(trimmed).map_err(|_| VideoRefError::Malformed(trimmed.to_owned()))?;
    let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();

    let mut candidate = parsed
        .query_pairs()
        .find(|(key, _)| key == "v")
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty());

    if candidate.is_none() && is_path_url(&parsed, &host) {
        let mut segments = parsed.path_segments().into_iter().flatten();
        let segment = if host == "youtu.be" {
            segments.next()
        } else {
            segments.nth(1)
        };
        candidate = segment
            .filter(|segment| !segment.is_empty())
            .map(str::to_owned);
    } else if !host.is_empty() && !QUERY_HOSTS.contains(&host.as_str()) {
        return Err(VideoRefError::ForeignHost(host));
    }

    let id = candidate.ok_or_else(|| VideoRefError::MissingId(trimmed.to_owned()))?;
    let truncated: String = id.chars().take(ID_LEN).collect();
    VideoId::parse(&truncated)
}

fn is_path_url(parsed: &Url, host: &str) -> bool {
    if !matches!(parsed.scheme(), "http" | "https") {
        return false;
    }
    match host {
        "youtu.be" => true,
        "youtube.com" | "www.youtube.com" => parsed
            .path_segments()
            .and_then(|mut segments| segments.next())
            .is_some_and(|first| ID_PATH_PREFIXES.contains(&first)),
        _ => false,
    }
}
