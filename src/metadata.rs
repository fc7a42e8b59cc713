//! Video metadata as exposed by `/api/videoInfo`.
//!
//! The extraction tool (yt-dlp) prints one large JSON document per video. The
//! structs prefixed with `Raw` mirror the subset of that document we read; the
//! public structs are what the browser client consumes. Field names on the
//! public side are camelCase because the frontend was written against that
//! shape (`videoDetails.lengthSeconds`, `format.qualityLabel`, ...).
//!
//! Format descriptors are treated as opaque pass-through values: we rename and
//! reshape fields, but never re-order, rank, or merge them here.

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

/// Body of a successful metadata lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoInfo {
    pub video_details: VideoDetails,
    pub formats: Vec<Format>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoDetails {
    pub video_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Whole seconds; live streams without a known length report zero.
    #[serde(default)]
    pub length_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish_date: Option<String>,
    pub author: Author,
    /// Largest first, so `thumbnails[0]` is always the best candidate.
    #[serde(default)]
    pub thumbnails: Vec<Thumbnail>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub is_live_content: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thumbnail {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

/// One downloadable stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Format {
    pub itag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_label: Option<String>,
    pub mime_type: String,
    pub container: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codecs: Option<String>,
    pub has_video: bool,
    pub has_audio: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    /// Bits per second.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<u64>,
    /// Kilobits per second, audio streams only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_bitrate: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_sample_rate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_length: Option<u64>,
}

/// `yt-dlp --dump-single-json` payload. Everything is optional because older
/// uploads and live streams routinely lack fields.
#[derive(Debug, Deserialize)]
struct RawInfo {
    id: String,
    title: Option<String>,
    fulltitle: Option<String>,
    description: Option<String>,
    duration: Option<f64>,
    view_count: Option<u64>,
    upload_date: Option<String>,
    uploader: Option<String>,
    channel: Option<String>,
    channel_id: Option<String>,
    channel_url: Option<String>,
    uploader_url: Option<String>,
    thumbnail: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    thumbnails: Vec<RawThumbnail>,
    #[serde(default, deserialize_with = "null_as_default")]
    tags: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    was_live: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    is_live: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    formats: Vec<RawFormat>,
}

#[derive(Debug, Deserialize)]
struct RawThumbnail {
    url: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawFormat {
    format_id: Option<String>,
    format_note: Option<String>,
    ext: Option<String>,
    vcodec: Option<String>,
    acodec: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<f64>,
    tbr: Option<f64>,
    abr: Option<f64>,
    asr: Option<u32>,
    filesize: Option<u64>,
    filesize_approx: Option<u64>,
    dynamic_range: Option<String>,
}

impl VideoInfo {
    /// Parses the extraction tool's JSON output into the public shape.
    pub fn from_ytdlp_json(raw: &str) -> Result<Self, serde_json::Error> {
        let info: RawInfo = serde_json::from_str(raw)?;
        Ok(info.into())
    }
}

impl From<RawInfo> for VideoInfo {
    fn from(raw: RawInfo) -> Self {
        let title = raw
            .fulltitle
            .filter(|t| !t.is_empty())
            .or(raw.title)
            .unwrap_or_else(|| raw.id.clone());

        let mut thumbnails: Vec<Thumbnail> = raw
            .thumbnails
            .into_iter()
            .filter_map(|thumb| {
                thumb.url.map(|url| Thumbnail {
                    url,
                    width: thumb.width,
                    height: thumb.height,
                })
            })
            .collect();
        // Stable sort keeps yt-dlp's preference order among unsized entries.
        thumbnails.sort_by_key(|thumb| std::cmp::Reverse(thumb.width.unwrap_or(0)));
        if thumbnails.is_empty()
            && let Some(url) = raw.thumbnail
        {
            thumbnails.push(Thumbnail {
                url,
                width: None,
                height: None,
            });
        }

        let author = Author {
            id: raw.channel_id,
            name: raw.channel.or(raw.uploader).unwrap_or_default(),
            channel_url: raw.channel_url.or(raw.uploader_url),
        };

        let video_details = VideoDetails {
            video_id: raw.id,
            title,
            description: raw.description.unwrap_or_default(),
            length_seconds: raw
                .duration
                .filter(|d| d.is_finite() && *d > 0.0)
                .map(|d| d.round() as u64)
                .unwrap_or(0),
            view_count: raw.view_count,
            publish_date: raw.upload_date.as_deref().and_then(upload_date_to_iso),
            author,
            thumbnails,
            keywords: raw.tags,
            is_live_content: raw.is_live || raw.was_live,
        };

        let formats = raw.formats.into_iter().filter_map(Format::from_raw).collect();

        Self {
            video_details,
            formats,
        }
    }
}

impl Format {
    /// Returns `None` for entries without an id and for image-only entries
    /// such as storyboards.
    fn from_raw(raw: RawFormat) -> Option<Self> {
        let itag = raw.format_id?;
        let video_codec = present_codec(raw.vcodec.as_deref());
        let audio_codec = present_codec(raw.acodec.as_deref());
        if video_codec.is_none() && audio_codec.is_none() {
            return None;
        }

        let has_video = video_codec.is_some();
        let has_audio = audio_codec.is_some();
        let container = raw.ext.unwrap_or_else(|| "mp4".to_owned());
        let codecs = match (video_codec, audio_codec) {
            (Some(v), Some(a)) => Some(format!("{v}, {a}")),
            (Some(v), None) => Some(v.to_owned()),
            (None, Some(a)) => Some(a.to_owned()),
            (None, None) => None,
        };
        let kind = if has_video { "video" } else { "audio" };
        let mime_type = match &codecs {
            Some(codecs) => format!("{kind}/{container}; codecs=\"{codecs}\""),
            None => format!("{kind}/{container}"),
        };

        let quality_label = if has_video {
            video_quality_label(
                raw.format_note.as_deref(),
                raw.height,
                raw.fps,
                raw.dynamic_range.as_deref(),
            )
        } else {
            None
        };

        Some(Self {
            itag,
            quality_label,
            mime_type,
            container,
            codecs,
            has_video,
            has_audio,
            width: raw.width,
            height: raw.height,
            fps: raw.fps,
            bitrate: raw.tbr.map(|kbps| (kbps * 1000.0).round() as u64),
            audio_bitrate: raw.abr.filter(|_| has_audio).map(|kbps| kbps.round() as u64),
            audio_sample_rate: raw.asr,
            content_length: raw.filesize.or(raw.filesize_approx),
        })
    }
}

fn present_codec(codec: Option<&str>) -> Option<&str> {
    codec.filter(|c| !c.is_empty() && !c.eq_ignore_ascii_case("none"))
}

/// Prefers yt-dlp's own note when it already looks like `1080p60`, otherwise
/// builds one such as `2160p60 HDR` from height, frame rate and dynamic range.
fn video_quality_label(
    note: Option<&str>,
    height: Option<u32>,
    fps: Option<f64>,
    dynamic_range: Option<&str>,
) -> Option<String> {
    if let Some(note) = note
        && note.starts_with(|c: char| c.is_ascii_digit())
    {
        return Some(note.to_owned());
    }

    let height = height?;
    let mut label = format!("{height}p");
    if let Some(fps) = fps
        && fps > 30.0
    {
        label.push_str(&format!("{}", fps.round() as u32));
    }
    if let Some(range) = dynamic_range
        && !range.is_empty()
        && !range.eq_ignore_ascii_case("SDR")
    {
        label.push(' ');
        label.push_str(range);
    }
    Some(label)
}

/// Reads an explicit `null` the same way as a missing key.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Converts yt-dlp's `YYYYMMDD` upload date format into ISO-8601.
fn upload_date_to_iso(value: &str) -> Option<String> {
    if value.len() != 8 {
        return None;
    }
    let date = NaiveDate::parse_from_str(value, "%Y%m%d").ok()?;
    Some(date.format("%Y-%m-%d").to_string())
}
