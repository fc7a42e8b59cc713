//! Format selection helpers shared by the gateway and the terminal client.

use std::cmp::Reverse;
use std::fmt;

use crate::metadata::Format;

const MAX_ITAG_LEN: usize = 64;

/// Caller-supplied format id, checked before it is handed to `yt-dlp -f`.
/// A leading `-` is refused so the value can never read as an option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Itag(String);

impl Itag {
    pub fn parse(value: &str) -> Option<Self> {
        let valid = !value.is_empty()
            && value.len() <= MAX_ITAG_LEN
            && !value.starts_with('-')
            && value
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        valid.then(|| Self(value.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Itag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What to ask the extraction tool for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatSelector {
    Itag(Itag),
    HighestAudio,
}

impl FormatSelector {
    /// Argument for `yt-dlp -f`.
    pub fn as_arg(&self) -> &str {
        match self {
            Self::Itag(itag) => itag.as_str(),
            Self::HighestAudio => "bestaudio",
        }
    }
}

/// Leading decimal integer of a quality label: `"1080p60"` ranks 1080.
pub fn quality_rank(label: &str) -> Option<u32> {
    let trimmed = label.trim_start();
    let digits_end = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    trimmed[..digits_end].parse().ok()
}

/// Formats carrying a quality label, highest first. Equal ranks keep their
/// input order and labels without a number sort last.
pub fn sort_by_quality(formats: &[Format]) -> Vec<&Format> {
    let mut labelled: Vec<&Format> = formats
        .iter()
        .filter(|format| format.quality_label.is_some())
        .collect();
    labelled.sort_by_key(|format| {
        let rank = format.quality_label.as_deref().and_then(quality_rank);
        (rank.is_none(), Reverse(rank))
    });
    labelled
}

pub fn highest_quality(formats: &[Format]) -> Option<&Format> {
    sort_by_quality(formats).into_iter().next()
}

pub fn audio_only(formats: &[Format]) -> impl Iterator<Item = &Format> {
    formats.iter().filter(|format| format.has_audio && !format.has_video)
}
