//! HTTP surface of the gateway: four `/api` routes plus the static browser UI.

use std::{
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use axum::{
    Json, Router,
    body::Body,
    extract::{Query, State},
    http::{HeaderValue, Uri, header},
    response::{IntoResponse, Response},
    routing::get,
};
use mime_guess::MimeGuess;
use serde::Deserialize;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::error::{ApiResult, GatewayError};
use crate::extractor::YtDlp;
use crate::formats::{FormatSelector, Itag};
use crate::metadata::VideoInfo;
use crate::mux::Ffmpeg;
use crate::stream::{self, StreamError, StreamGuard};
use crate::video_ref::{self, VideoId};

pub const VIDEO_FILENAME: &str = "video.mp4";
pub const HQ_VIDEO_FILENAME: &str = "high-quality-video.mp4";
pub const AUDIO_FILENAME: &str = "audio.mp3";

#[derive(Clone)]
pub struct AppState {
    extractor: Arc<YtDlp>,
    muxer: Arc<Ffmpeg>,
    public_dir: Arc<PathBuf>,
}

impl AppState {
    pub fn new(extractor: YtDlp, muxer: Ffmpeg, public_dir: impl Into<PathBuf>) -> Self {
        Self {
            extractor: Arc::new(extractor),
            muxer: Arc::new(muxer),
            public_dir: Arc::new(public_dir.into()),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([header::CONTENT_DISPOSITION]);

    Router::new()
        .route("/api/videoInfo", get(video_info))
        .route("/api/download", get(download))
        .route("/api/hq-download", get(hq_download))
        .route("/api/audio", get(audio))
        .fallback(serve_ui)
        .with_state(state)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Deserialize)]
struct InfoQuery {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DownloadQuery {
    #[serde(rename = "videoId")]
    video_id: Option<String>,
    itag: Option<String>,
}

impl DownloadQuery {
    fn video_id(&self) -> ApiResult<VideoId> {
        let raw = self.video_id.as_deref().unwrap_or_default();
        VideoId::parse(raw).map_err(|_| GatewayError::InvalidVideoId)
    }

    fn itag(&self) -> ApiResult<Itag> {
        self.itag
            .as_deref()
            .and_then(Itag::parse)
            .ok_or(GatewayError::InvalidItag)
    }
}

async fn video_info(
    State(state): State<AppState>,
    Query(query): Query<InfoQuery>,
) -> ApiResult<Json<VideoInfo>> {
    let raw = query
        .url
        .filter(|url| !url.trim().is_empty())
        .ok_or(GatewayError::MissingUrl)?;
    let video_id =
        video_ref::parse_url(video_ref::clean_url(&raw)).map_err(GatewayError::InvalidUrl)?;

    let info = state
        .extractor
        .fetch_info(&video_id)
        .await
        .map_err(GatewayError::InfoUnavailable)?;
    info!(%video_id, formats = info.formats.len(), "served video info");
    Ok(Json(info))
}

async fn download(
    State(state): State<AppState>,
    Query(query): Query<DownloadQuery>,
) -> ApiResult<Response> {
    let video_id = query.video_id()?;
    let itag = query.itag()?;
    let body = single_stream(&state, &video_id, FormatSelector::Itag(itag))
        .await
        .map_err(GatewayError::VideoDownload)?;
    Ok(attachment(VIDEO_FILENAME, body))
}

async fn audio(
    State(state): State<AppState>,
    Query(query): Query<DownloadQuery>,
) -> ApiResult<Response> {
    let video_id = query.video_id()?;
    let body = single_stream(&state, &video_id, FormatSelector::HighestAudio)
        .await
        .map_err(GatewayError::AudioDownload)?;
    Ok(attachment(AUDIO_FILENAME, body))
}

async fn hq_download(
    State(state): State<AppState>,
    Query(query): Query<DownloadQuery>,
) -> ApiResult<Response> {
    let video_id = query.video_id()?;
    let itag = query.itag()?;
    let body = muxed_stream(&state, &video_id, itag)
        .await
        .map_err(GatewayError::Processing)?;
    Ok(attachment(HQ_VIDEO_FILENAME, body))
}

async fn single_stream(
    state: &AppState,
    video_id: &VideoId,
    selector: FormatSelector,
) -> Result<Body, StreamError> {
    let child = state.extractor.spawn_stream(video_id, &selector)?;
    stream::into_body(child, StreamGuard::default(), "yt-dlp").await
}

async fn muxed_stream(
    state: &AppState,
    video_id: &VideoId,
    itag: Itag,
) -> Result<Body, StreamError> {
    let video = state
        .extractor
        .spawn_stream(video_id, &FormatSelector::Itag(itag))?;
    let audio = state
        .extractor
        .spawn_stream(video_id, &FormatSelector::HighestAudio)?;
    let (ffmpeg, guard) = state.muxer.copy_mux(video, audio)?;
    stream::into_body(ffmpeg, guard, "ffmpeg").await
}

fn attachment(filename: &str, body: Body) -> Response {
    let mut response = body.into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    if let Ok(value) = format!("attachment; filename=\"{filename}\"").parse() {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    response
}

fn panic_response(_panic: Box<dyn std::any::Any + Send + 'static>) -> Response {
    GatewayError::Unhandled.into_response()
}

async fn serve_ui(State(state): State<AppState>, uri: Uri) -> ApiResult<Response> {
    let path = uri.path();
    if path.starts_with("/api/") {
        return Err(GatewayError::NotFound);
    }
    let relative = match path.trim_start_matches('/') {
        "" => "index.html",
        other => other,
    };
    let file = resolve_public_path(&state.public_dir, relative).ok_or(GatewayError::NotFound)?;
    stream_file(file).await
}

/// Joins `relative` onto `root`, refusing anything but plain path segments.
fn resolve_public_path(root: &Path, relative: &str) -> Option<PathBuf> {
    let mut resolved = root.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            _ => return None,
        }
    }
    Some(resolved)
}

async fn stream_file(path: PathBuf) -> ApiResult<Response> {
    let file = File::open(&path)
        .await
        .map_err(|_| GatewayError::NotFound)?;
    let is_file = file
        .metadata()
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false);
    if !is_file {
        return Err(GatewayError::NotFound);
    }

    let body = Body::from_stream(ReaderStream::new(file));
    let mut response = body.into_response();
    if let Some(mime) = MimeGuess::from_path(&path).first()
        && let Ok(value) = mime.to_string().parse()
    {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::tests::{MISSING_ID, install_ytdlp_stub};
    use crate::mux::tests::install_ffmpeg_stub;
    use std::fs;
    use tempfile::TempDir;
    use tokio::{net::TcpListener, task::JoinHandle};

    struct TestServer {
        base: String,
        _dir: TempDir,
        handle: JoinHandle<()>,
    }

    impl Drop for TestServer {
        fn drop(&mut self) {
            self.handle.abort();
        }
    }

    #[derive(Debug)]
    struct Reply {
        status: u16,
        content_type: Option<String>,
        disposition: Option<String>,
        allow_origin: Option<String>,
        body: String,
    }

    impl Reply {
        fn json(&self) -> serde_json::Value {
            serde_json::from_str(&self.body).unwrap()
        }
    }

    async fn spawn_server() -> TestServer {
        let dir = tempfile::tempdir().unwrap();
        let ytdlp = install_ytdlp_stub(dir.path());
        let ffmpeg = install_ffmpeg_stub(dir.path());
        let public = dir.path().join("web");
        fs::create_dir_all(&public).unwrap();
        fs::write(public.join("index.html"), "<h1>tubegrab</h1>").unwrap();
        fs::write(public.join("style.css"), "body {}").unwrap();

        let state = AppState::new(YtDlp::new(ytdlp), Ffmpeg::new(ffmpeg), public);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        TestServer {
            base: format!("http://{addr}"),
            _dir: dir,
            handle,
        }
    }

    async fn get(server: &TestServer, path: &str, query: &[(&str, &str)]) -> Reply {
        fetch(server, path, query, None).await
    }

    async fn fetch(
        server: &TestServer,
        path: &str,
        query: &[(&str, &str)],
        origin: Option<&str>,
    ) -> Reply {
        let url = format!("{}{}", server.base, path);
        let query: Vec<(String, String)> = query
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let origin = origin.map(str::to_owned);
        tokio::task::spawn_blocking(move || {
            let mut request = ureq::get(&url);
            for (key, value) in &query {
                request = request.query(key, value);
            }
            if let Some(origin) = &origin {
                request = request.set("Origin", origin);
            }
            let response = match request.call() {
                Ok(response) => response,
                Err(ureq::Error::Status(_, response)) => response,
                Err(err) => panic!("request failed: {err}"),
            };
            Reply {
                status: response.status(),
                content_type: response.header("content-type").map(str::to_owned),
                disposition: response.header("content-disposition").map(str::to_owned),
                allow_origin: response
                    .header("access-control-allow-origin")
                    .map(str::to_owned),
                body: response.into_string().unwrap(),
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn video_info_requires_url() {
        let server = spawn_server().await;
        let reply = get(&server, "/api/videoInfo", &[]).await;
        assert_eq!(reply.status, 400);
        assert_eq!(reply.json()["error"], "Please provide a YouTube URL");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn video_info_rejects_invalid_urls() {
        let server = spawn_server().await;
        for url in ["not a url", "https://example.com/watch?v=dQw4w9WgXcQ"] {
            let reply = get(&server, "/api/videoInfo", &[("url", url)]).await;
            assert_eq!(reply.status, 400, "{url}");
            let message = reply.json()["error"].as_str().unwrap().to_owned();
            assert!(!message.is_empty());
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn video_info_maps_lookup_failures_to_fixed_message() {
        let server = spawn_server().await;
        let url = format!("https://www.youtube.com/watch?v={MISSING_ID}");
        let reply = get(&server, "/api/videoInfo", &[("url", url.as_str())]).await;
        assert_eq!(reply.status, 500);
        assert_eq!(
            reply.json()["error"],
            "Failed to fetch video information. It might be private, restricted, or an invalid link."
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn video_info_returns_details_and_formats() {
        let server = spawn_server().await;
        let url = "https://www.youtube.com/watch?v=dQw4w9WgXcQ&list=PL123";
        let reply = get(&server, "/api/videoInfo", &[("url", url)]).await;
        assert_eq!(reply.status, 200);
        let value = reply.json();
        assert_eq!(value["videoDetails"]["videoId"], "dQw4w9WgXcQ");
        assert_eq!(value["videoDetails"]["title"], "Stub Title");
        assert_eq!(value["videoDetails"]["lengthSeconds"], 95);
        assert_eq!(value["formats"].as_array().unwrap().len(), 3);
        assert_eq!(value["formats"][1]["qualityLabel"], "1080p");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn download_streams_selected_format() {
        let server = spawn_server().await;
        let reply = get(
            &server,
            "/api/download",
            &[("videoId", "dQw4w9WgXcQ"), ("itag", "18")],
        )
        .await;
        assert_eq!(reply.status, 200);
        assert_eq!(
            reply.disposition.as_deref(),
            Some("attachment; filename=\"video.mp4\"")
        );
        assert_eq!(
            reply.content_type.as_deref(),
            Some("application/octet-stream")
        );
        assert_eq!(reply.body, "VIDEO-18");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn download_validates_input() {
        let server = spawn_server().await;
        let reply = get(&server, "/api/download", &[("videoId", "nope"), ("itag", "18")]).await;
        assert_eq!(reply.status, 400);
        assert_eq!(reply.json()["error"], "Invalid video ID");

        let reply = get(&server, "/api/download", &[("videoId", "dQw4w9WgXcQ")]).await;
        assert_eq!(reply.status, 400);
        assert_eq!(reply.json()["error"], "Invalid format itag");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn download_failure_before_output_is_500() {
        let server = spawn_server().await;
        let reply = get(
            &server,
            "/api/download",
            &[("videoId", "dQw4w9WgXcQ"), ("itag", "999")],
        )
        .await;
        assert_eq!(reply.status, 500);
        assert_eq!(reply.json()["error"], "Failed to download video.");
        assert_eq!(reply.disposition, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn audio_uses_best_audio() {
        let server = spawn_server().await;
        let reply = get(&server, "/api/audio", &[("videoId", "dQw4w9WgXcQ")]).await;
        assert_eq!(reply.status, 200);
        assert_eq!(
            reply.disposition.as_deref(),
            Some("attachment; filename=\"audio.mp3\"")
        );
        assert_eq!(reply.body, "AUDIO-BYTES");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn hq_download_muxes_both_streams() {
        let server = spawn_server().await;
        let reply = get(
            &server,
            "/api/hq-download",
            &[("videoId", "dQw4w9WgXcQ"), ("itag", "137")],
        )
        .await;
        assert_eq!(reply.status, 200);
        assert_eq!(
            reply.disposition.as_deref(),
            Some("attachment; filename=\"high-quality-video.mp4\"")
        );
        assert_eq!(reply.body, "VIDEO-137|AUDIO-BYTES|");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn hq_download_failure_is_plain_text_500() {
        let server = spawn_server().await;
        let reply = get(
            &server,
            "/api/hq-download",
            &[("videoId", "dQw4w9WgXcQ"), ("itag", "999")],
        )
        .await;
        assert_eq!(reply.status, 500);
        assert!(reply.content_type.unwrap().starts_with("text/plain"));
        assert_eq!(reply.body, "Error during video processing");
        assert_eq!(reply.disposition, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn audio_failure_before_output_is_500() {
        let server = spawn_server().await;
        let reply = get(&server, "/api/audio", &[("videoId", MISSING_ID)]).await;
        assert_eq!(reply.status, 500);
        assert_eq!(reply.json()["error"], "Failed to download audio.");
        assert_eq!(reply.disposition, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn filenames_do_not_depend_on_format() {
        let server = spawn_server().await;
        let endpoints = [
            ("/api/download", "attachment; filename=\"video.mp4\""),
            (
                "/api/hq-download",
                "attachment; filename=\"high-quality-video.mp4\"",
            ),
        ];
        for (path, expected) in endpoints {
            for itag in ["18", "137", "hls-720p"] {
                let reply = get(&server, path, &[("videoId", "dQw4w9WgXcQ"), ("itag", itag)]).await;
                assert_eq!(reply.status, 200, "{path} {itag}");
                assert_eq!(reply.disposition.as_deref(), Some(expected), "{path} {itag}");
            }
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cors_is_open_to_any_origin() {
        let server = spawn_server().await;
        let reply = fetch(
            &server,
            "/api/videoInfo",
            &[],
            Some("http://somewhere.example"),
        )
        .await;
        assert_eq!(reply.allow_origin.as_deref(), Some("*"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn serves_ui_and_blocks_traversal() {
        let server = spawn_server().await;
        let index = get(&server, "/", &[]).await;
        assert_eq!(index.status, 200);
        assert_eq!(index.body, "<h1>tubegrab</h1>");
        assert!(index.content_type.unwrap().starts_with("text/html"));

        let css = get(&server, "/style.css", &[]).await;
        assert!(css.content_type.unwrap().starts_with("text/css"));

        assert_eq!(get(&server, "/missing.js", &[]).await.status, 404);
        assert_eq!(get(&server, "/api/unknown", &[]).await.status, 404);
    }

    #[test]
    fn resolve_public_path_refuses_escapes() {
        let root = Path::new("/srv/web");
        assert_eq!(
            resolve_public_path(root, "js/app.js"),
            Some(PathBuf::from("/srv/web/js/app.js"))
        );
        assert_eq!(resolve_public_path(root, "../secret"), None);
        assert_eq!(resolve_public_path(root, "a/../../b"), None);
    }

    #[test]
    fn panics_become_generic_failures() {
        let response = panic_response(Box::new("boom"));
        assert_eq!(response.status(), 500);
    }
}
