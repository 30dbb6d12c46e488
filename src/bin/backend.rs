#![forbid(unsafe_code)]

//! Axum backend behind the tubegrab page.
//!
//! Every request is independent: look the video up through yt-dlp (or the
//! Data API), shape the JSON, or hand the media back as an attachment. Paths
//! outside `/api` serve the static front-end.

use std::{
    net::{IpAddr, SocketAddr},
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result, anyhow};
use axum::{
    Json, Router,
    body::Body,
    extract::{Query, State, rejection::JsonRejection},
    http::{HeaderValue, Request, StatusCode, header},
    response::{IntoResponse, Redirect, Response},
    routing::get,
};
use log::{debug, error, info, warn};
use mime_guess::MimeGuess;
use serde::{Deserialize, Serialize};
use tokio::{fs::File, signal};
use tokio_util::io::ReaderStream;
use tubegrab::{
    attachment::Attachment,
    config::{
        DownloadMode, MetadataSource, RuntimeOverrides, RuntimeSettings, resolve_runtime_settings,
    },
    data_api::DataApi,
    formats::{CuratedFormat, Rendition, SelectionProfile, select_formats},
    source::{HttpFetcher, MediaFetcher, MediaSource, UpstreamError, VideoDetails},
    video_id::{extract_video_id, watch_url},
    ytdlp::{PipedDownload, YtDlp, selector_for},
};

#[derive(Debug, Clone, Default)]
struct BackendArgs {
    www_root: Option<PathBuf>,
    port: Option<u16>,
    host: Option<IpAddr>,
    env_file: Option<PathBuf>,
}

impl BackendArgs {
    fn parse() -> Result<Self> {
        Self::from_iter(std::env::args().skip(1))
    }

    fn from_iter<I>(iter: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut parsed = Self::default();
        let mut args = iter.into_iter();
        while let Some(arg) = args.next() {
            let (flag, inline) = match arg.split_once('=') {
                Some((flag, value)) if flag.starts_with("--") => (flag.to_string(), Some(value.to_string())),
                _ => (arg.clone(), None),
            };
            let mut value = || {
                inline
                    .clone()
                    .or_else(|| args.next())
                    .ok_or_else(|| anyhow!("{flag} requires a value"))
            };
            match flag.as_str() {
                "--www-root" => parsed.www_root = Some(PathBuf::from(value()?)),
                "--port" => parsed.port = Some(parse_port_arg(&value()?)?),
                "--host" => parsed.host = Some(parse_host_arg(&value()?)?),
                "--env-file" => parsed.env_file = Some(PathBuf::from(value()?)),
                _ => return Err(anyhow!("unknown argument: {arg}")),
            }
        }
        Ok(parsed)
    }

    fn overrides(&self) -> RuntimeOverrides {
        RuntimeOverrides {
            www_root: self.www_root.clone(),
            port: self.port,
            host: self.host.map(|host| host.to_string()),
            env_path: self.env_file.clone(),
        }
    }
}

fn parse_port_arg(value: &str) -> Result<u16> {
    value
        .parse::<u16>()
        .context("expected a numeric port between 0 and 65535")
}

fn parse_host_arg(value: &str) -> Result<IpAddr> {
    value
        .parse::<IpAddr>()
        .context("expected a valid IPv4 or IPv6 address for --host/TUBEGRAB_HOST")
}

/// Shared state injected into every Axum handler.
///
/// * `source` answers metadata and rendition lookups.
/// * `fetcher` pulls media bytes from a resolved locator.
/// * `downloader` runs yt-dlp for URL based downloads.
#[derive(Clone)]
struct AppState {
    source: Arc<dyn MediaSource>,
    fetcher: Arc<dyn MediaFetcher>,
    downloader: Arc<YtDlp>,
    download_mode: DownloadMode,
    selection: Arc<SelectionProfile>,
    www_root: Arc<PathBuf>,
}

impl AppState {
    fn from_settings(settings: &RuntimeSettings) -> Result<Self> {
        let downloader = Arc::new(YtDlp::new(&settings.yt_dlp));
        let source: Arc<dyn MediaSource> = match settings.metadata_source {
            MetadataSource::Extractor => downloader.clone(),
            MetadataSource::DataApi => {
                let key = settings.require_api_key()?;
                Arc::new(DataApi::new(Some(key), YtDlp::new(&settings.yt_dlp))?)
            }
        };
        Ok(Self {
            source,
            fetcher: Arc::new(HttpFetcher::new()),
            downloader,
            download_mode: settings.download_mode,
            selection: Arc::new(SelectionProfile::default()),
            www_root: Arc::new(settings.www_root.clone()),
        })
    }
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "success": false,
            "error": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Serialize)]
struct Envelope<T> {
    success: bool,
    data: T,
}

impl<T> Envelope<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data,
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VideoInfo {
    video_id: String,
    #[serde(flatten)]
    details: VideoDetails,
    formats: Vec<CuratedFormat>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoInfoQuery {
    video_id: Option<String>,
}

/// Rendition ids arrive as JSON numbers or strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum RenditionId {
    Number(u64),
    Text(String),
}

impl RenditionId {
    fn into_string(self) -> String {
        match self {
            RenditionId::Number(value) => value.to_string(),
            RenditionId::Text(value) => value.trim().to_string(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadRequest {
    video_id: Option<String>,
    itag: Option<RenditionId>,
    title: Option<String>,
    format: Option<String>,
}

#[derive(Deserialize)]
struct UrlDownloadQuery {
    url: Option<String>,
    format: Option<String>,
    title: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamQuery {
    video_id: Option<String>,
    itag: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = BackendArgs::parse()?;
    let settings = resolve_runtime_settings(args.overrides())?;
    let host = parse_host_arg(&settings.host)?;
    let state = AppState::from_settings(&settings).context("building application state")?;
    info!(
        "metadata source: {:?}, download mode: {:?}, yt-dlp: {}",
        settings.metadata_source,
        settings.download_mode,
        state.downloader.program().display()
    );

    let app = router(state);
    let addr = SocketAddr::new(host, settings.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    info!("API server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/video-info", get(video_info))
        .route(
            "/api/download",
            get(download_from_url).post(download_rendition),
        )
        .route("/api/stream", get(stream_rendition))
        .fallback(static_fallback)
        .with_state(state)
}

async fn shutdown_signal() {
    // Only graceful shutdown depends on this; Ctrl+C still ends the process.
    if let Err(err) = signal::ctrl_c().await {
        error!("Failed to install Ctrl+C handler: {}", err);
    }
}

async fn static_fallback(State(state): State<AppState>, req: Request<Body>) -> Response {
    let path = req.uri().path();
    if path == "/api" || path.starts_with("/api/") {
        return ApiError::not_found("endpoint not found").into_response();
    }

    let served = match locate_static(&state.www_root, path).await {
        Some(file) => stream_file(file).await,
        None => Err(ApiError::not_found("file not found")),
    };
    served.unwrap_or_else(IntoResponse::into_response)
}

async fn video_info(
    State(state): State<AppState>,
    Query(query): Query<VideoInfoQuery>,
) -> ApiResult<Json<Envelope<VideoInfo>>> {
    let video_id = require_video_id(query.video_id.as_deref())?;
    info!("fetching video info for {video_id}");

    let source = state.source.clone();
    let lookup_id = video_id.clone();
    let probe = run_upstream("Error fetching video info", move || source.probe(&lookup_id)).await?;
    let formats = select_formats(&probe.renditions, &state.selection);
    debug!(
        "{video_id}: {} renditions curated to {}",
        probe.renditions.len(),
        formats.len()
    );

    Ok(Envelope::ok(VideoInfo {
        video_id,
        details: probe.details,
        formats,
    }))
}

async fn download_rendition(
    State(state): State<AppState>,
    payload: Result<Json<DownloadRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(request) = payload.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    let video_id = require_video_id(request.video_id.as_deref())?;
    let itag = request
        .itag
        .map(RenditionId::into_string)
        .filter(|itag| !itag.is_empty())
        .ok_or_else(|| ApiError::bad_request("itag is required"))?;
    info!("download requested for {video_id} format {itag}");

    let rendition = find_rendition(&state, &video_id, &itag, "Error resolving formats").await?;
    let locator = rendition
        .url
        .ok_or_else(|| ApiError::internal("download URL not available for this format"))?;

    let fetcher = state.fetcher.clone();
    let bytes = run_upstream("Error fetching media", move || {
        let bytes = fetcher.fetch(&locator)?;
        if bytes.is_empty() {
            return Err(UpstreamError::Empty);
        }
        Ok(bytes)
    })
    .await?;

    let attachment = Attachment::for_download(
        request.format.as_deref(),
        request.title.as_deref(),
        &video_id,
    );
    info!("sending {} ({} bytes)", attachment.filename, bytes.len());
    let length = bytes.len();
    attachment_response(&attachment, Some(length), Body::from(bytes))
}

async fn download_from_url(
    State(state): State<AppState>,
    Query(query): Query<UrlDownloadQuery>,
) -> ApiResult<Response> {
    let url = query
        .url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .ok_or_else(|| ApiError::bad_request("url is required"))?;
    let video_id = extract_video_id(url)
        .ok_or_else(|| ApiError::bad_request("could not find a YouTube video id in url"))?;
    let selector = selector_for(query.format.as_deref());
    let attachment = Attachment::for_download(
        query.format.as_deref(),
        query.title.as_deref(),
        &video_id,
    );
    let target = watch_url(&video_id);

    match state.download_mode {
        DownloadMode::Buffer => {
            let downloader = state.downloader.clone();
            let bytes = run_upstream("Error downloading video", move || {
                downloader.download_buffered(&target, selector)
            })
            .await?;
            let length = bytes.len();
            attachment_response(&attachment, Some(length), Body::from(bytes))
        }
        DownloadMode::Pipe => {
            let PipedDownload { mut child, stdout } = state
                .downloader
                .spawn_piped(&target, selector)
                .map_err(|err| ApiError::internal(format!("Error downloading video: {err}")))?;
            tokio::spawn(async move {
                match child.wait().await {
                    Ok(status) if status.success() => debug!("piped download of {video_id} finished"),
                    Ok(status) => warn!("piped download of {video_id} exited with {status}"),
                    Err(err) => warn!("waiting for piped download of {video_id}: {err}"),
                }
            });
            attachment_response(&attachment, None, Body::from_stream(ReaderStream::new(stdout)))
        }
    }
}

async fn stream_rendition(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> ApiResult<Response> {
    let (Some(raw_id), Some(itag)) = (
        non_blank(query.video_id.as_deref()),
        non_blank(query.itag.as_deref()),
    ) else {
        return Err(ApiError::bad_request("videoId and itag are required"));
    };
    let video_id = require_video_id(Some(raw_id))?;
    let rendition = find_rendition(&state, &video_id, itag, "Error while streaming").await?;
    let locator = rendition
        .url
        .ok_or_else(|| ApiError::internal("download URL not available for this format"))?;
    info!("redirecting {video_id} format {itag} to its media URL");
    Ok(Redirect::temporary(&locator).into_response())
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn require_video_id(raw: Option<&str>) -> ApiResult<String> {
    let raw = non_blank(raw).ok_or_else(|| ApiError::bad_request("videoId is required"))?;
    extract_video_id(raw).ok_or_else(|| ApiError::bad_request("invalid YouTube video id"))
}

async fn find_rendition(
    state: &AppState,
    video_id: &str,
    itag: &str,
    context: &'static str,
) -> ApiResult<Rendition> {
    let source = state.source.clone();
    let lookup_id = video_id.to_string();
    let renditions = run_upstream(context, move || source.renditions(&lookup_id)).await?;
    renditions
        .into_iter()
        .find(|rendition| rendition.id == itag)
        .ok_or_else(|| ApiError::not_found(format!("format {itag} not found")))
}

/// Runs a blocking upstream call off the async runtime and maps failures to
/// a 500 carrying the upstream message.
async fn run_upstream<T, F>(context: &'static str, task: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, UpstreamError> + Send + 'static,
{
    match tokio::task::spawn_blocking(task).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => {
            error!("{context}: {err}");
            Err(ApiError::internal(format!("{context}: {err}")))
        }
        Err(err) => {
            error!("{context}: task failed: {err}");
            Err(ApiError::internal(format!("{context}: {err}")))
        }
    }
}

fn attachment_response(
    attachment: &Attachment,
    length: Option<usize>,
    body: Body,
) -> ApiResult<Response> {
    let disposition = HeaderValue::from_str(&attachment.content_disposition())
        .map_err(|err| ApiError::internal(format!("invalid filename: {err}")))?;
    let mut response = body.into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(attachment.content_type),
    );
    headers.insert(header::CONTENT_DISPOSITION, disposition);
    if let Some(length) = length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    }
    Ok(response)
}

/// Maps a request path onto a file under the web root. Directories and
/// missing extension-less paths resolve to `index.html`.
async fn locate_static(root: &Path, request_path: &str) -> Option<PathBuf> {
    let index = root.join("index.html");
    let relative = Path::new(request_path.trim_start_matches('/'));
    if relative.as_os_str().is_empty() {
        return Some(index);
    }
    if !relative
        .components()
        .all(|component| matches!(component, Component::Normal(_)))
    {
        return None;
    }

    let candidate = root.join(relative);
    match tokio::fs::metadata(&candidate).await {
        Ok(meta) if meta.is_dir() => Some(index),
        Ok(_) => Some(candidate),
        Err(_) if relative.extension().is_none() => Some(index),
        Err(_) => None,
    }
}

async fn stream_file(path: PathBuf) -> ApiResult<Response> {
    let file = File::open(&path)
        .await
        .map_err(|_| ApiError::not_found("file not found"))?;
    let guessed = MimeGuess::from_path(&path).first();

    let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
    if let Some(mime) = guessed
        && let Ok(value) = HeaderValue::from_str(mime.as_ref())
    {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    Ok(response)
}
