//! Seams between the HTTP handlers and the outside world: where video
//! metadata and renditions come from, and how media bytes are fetched.

use std::io::Read;

use log::{debug, warn};
use serde::Serialize;
use thiserror::Error;

use crate::formats::Rendition;

/// Failures raised while talking to yt-dlp, the Data API or a media host.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with {status}: {stderr}")]
    Exit {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("could not parse {what}: {source}")]
    Parse {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("request failed: {0}")]
    Transport(String),
    #[error("upstream responded with status {0}")]
    Status(u16),
    #[error("downloaded file is empty")]
    Empty,
    #[error("downloader did not produce an output file")]
    MissingOutput,
    #[error("video not found: {0}")]
    NotFound(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Basic details shown above the format list.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoDetails {
    pub title: String,
    pub thumbnail: String,
    pub duration: u64,
    pub author: String,
    pub view_count: u64,
}

/// Everything one metadata lookup yields.
#[derive(Debug, Clone, Default)]
pub struct VideoProbe {
    pub details: VideoDetails,
    pub renditions: Vec<Rendition>,
}

/// Resolves a video id to its metadata and available renditions.
///
/// Implementations block; callers run them inside `spawn_blocking`.
pub trait MediaSource: Send + Sync {
    fn probe(&self, video_id: &str) -> Result<VideoProbe, UpstreamError>;

    /// Renditions only. Sources that need a second call for details can
    /// skip it here.
    fn renditions(&self, video_id: &str) -> Result<Vec<Rendition>, UpstreamError> {
        self.probe(video_id).map(|probe| probe.renditions)
    }
}

/// Fetches the bytes behind a media locator.
pub trait MediaFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, UpstreamError>;
}

/// A set of request headers handed to the extractor for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderProfile {
    pub name: &'static str,
    pub headers: Vec<(String, String)>,
    pub extractor_args: Option<String>,
}

const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
const MOBILE_USER_AGENT: &str =
    "com.google.android.youtube/19.09.37 (Linux; U; Android 14) gzip";

impl HeaderProfile {
    pub fn browser() -> Self {
        Self {
            name: "browser",
            headers: vec![
                ("User-Agent".into(), DESKTOP_USER_AGENT.into()),
                ("Accept-Language".into(), "en-US,en;q=0.9".into()),
            ],
            extractor_args: None,
        }
    }

    pub fn plain() -> Self {
        Self {
            name: "plain",
            headers: Vec::new(),
            extractor_args: None,
        }
    }

    pub fn mobile() -> Self {
        Self {
            name: "mobile",
            headers: vec![("User-Agent".into(), MOBILE_USER_AGENT.into())],
            extractor_args: Some("youtube:player_client=android".into()),
        }
    }

    /// Browser headers first, then no headers, then the mobile client.
    pub fn degrade_chain() -> Vec<Self> {
        vec![Self::browser(), Self::plain(), Self::mobile()]
    }
}

/// Runs `attempt` with each profile in order and returns the first success,
/// or the last error when every profile fails.
pub fn try_profiles<T, E: std::fmt::Display>(
    profiles: &[HeaderProfile],
    mut attempt: impl FnMut(&HeaderProfile) -> Result<T, E>,
    no_profiles: impl FnOnce() -> E,
) -> Result<T, E> {
    let mut last_error = None;
    for profile in profiles {
        match attempt(profile) {
            Ok(value) => {
                debug!("resolved with {} profile", profile.name);
                return Ok(value);
            }
            Err(err) => {
                warn!("{} profile failed: {err}", profile.name);
                last_error = Some(err);
            }
        }
    }
    Err(last_error.unwrap_or_else(no_profiles))
}

/// Plain HTTPS fetch of a media locator, fully buffered in memory.
pub struct HttpFetcher {
    agent: ureq::Agent,
}

impl HttpFetcher {
    pub fn new() -> Self {
        let agent = ureq::AgentBuilder::new()
            .user_agent(DESKTOP_USER_AGENT)
            .build();
        Self { agent }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, UpstreamError> {
        let response = self.agent.get(url).call().map_err(map_ureq_error)?;
        let mut bytes = Vec::new();
        response.into_reader().read_to_end(&mut bytes)?;
        Ok(bytes)
    }
}

pub(crate) fn map_ureq_error(err: ureq::Error) -> UpstreamError {
    match err {
        ureq::Error::Status(code, _) => UpstreamError::Status(code),
        ureq::Error::Transport(transport) => UpstreamError::Transport(transport.to_string()),
    }
}
