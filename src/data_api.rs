//! YouTube Data API v3 metadata source.
//!
//! The official API has no stream locators, so renditions still come from
//! yt-dlp.

use std::collections::HashMap;

use log::debug;
use serde::Deserialize;

use crate::{
    config::ConfigError,
    formats::Rendition,
    source::{MediaSource, UpstreamError, VideoDetails, VideoProbe, map_ureq_error},
    ytdlp::YtDlp,
};

pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com/youtube/v3";

pub struct DataApi {
    agent: ureq::Agent,
    api_key: String,
    extractor: YtDlp,
}

impl DataApi {
    /// Fails fast when no key is configured.
    pub fn new(api_key: Option<&str>, extractor: YtDlp) -> Result<Self, ConfigError> {
        let api_key = api_key
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or(ConfigError::MissingApiKey)?;
        Ok(Self {
            agent: ureq::AgentBuilder::new().build(),
            api_key: api_key.to_string(),
            extractor,
        })
    }

    pub fn video_details(&self, video_id: &str) -> Result<VideoDetails, UpstreamError> {
        let url = format!("{DEFAULT_API_BASE}/videos");
        debug!("querying Data API for {video_id}");
        let response = self
            .agent
            .get(&url)
            .query("part", "snippet,contentDetails,statistics")
            .query("id", video_id)
            .query("key", &self.api_key)
            .call()
            .map_err(map_ureq_error)?;
        let body = response.into_string()?;
        let parsed: VideoListResponse =
            serde_json::from_str(&body).map_err(|source| UpstreamError::Parse {
                what: "Data API response",
                source,
            })?;
        parsed
            .items
            .into_iter()
            .next()
            .map(VideoItem::into_details)
            .ok_or_else(|| UpstreamError::NotFound(video_id.to_string()))
    }
}

impl MediaSource for DataApi {
    fn probe(&self, video_id: &str) -> Result<VideoProbe, UpstreamError> {
        let details = self.video_details(video_id)?;
        let renditions = self.extractor.fetch_info(video_id)?.renditions();
        Ok(VideoProbe {
            details,
            renditions,
        })
    }

    fn renditions(&self, video_id: &str) -> Result<Vec<Rendition>, UpstreamError> {
        self.extractor.renditions(video_id)
    }
}

/// Converts an ISO 8601 duration such as `PT1H2M3S` into seconds. Unknown
/// designators are ignored.
pub fn parse_iso8601_duration(value: &str) -> u64 {
    let Some(rest) = value.trim().strip_prefix('P') else {
        return 0;
    };
    let mut seconds = 0u64;
    let mut number = String::new();
    let mut in_time = false;
    for c in rest.chars() {
        match c {
            'T' => in_time = true,
            '0'..='9' => number.push(c),
            _ => {
                let amount: u64 = number.parse().unwrap_or(0);
                number.clear();
                seconds += match (c, in_time) {
                    ('W', false) => amount * 7 * 86_400,
                    ('D', false) => amount * 86_400,
                    ('H', true) => amount * 3_600,
                    ('M', true) => amount * 60,
                    ('S', true) => amount,
                    _ => 0,
                };
            }
        }
    }
    seconds
}

#[derive(Debug, Deserialize)]
struct VideoListResponse {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoItem {
    snippet: Snippet,
    content_details: Option<ContentDetails>,
    statistics: Option<Statistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    title: String,
    #[serde(default)]
    channel_title: String,
    #[serde(default)]
    thumbnails: HashMap<String, Thumbnail>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ContentDetails {
    duration: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Statistics {
    // The API encodes counters as strings.
    view_count: Option<String>,
}

impl VideoItem {
    fn into_details(self) -> VideoDetails {
        let thumbnail = ["high", "medium", "default"]
            .iter()
            .find_map(|size| self.snippet.thumbnails.get(*size))
            .map(|thumb| thumb.url.clone())
            .unwrap_or_default();
        VideoDetails {
            title: self.snippet.title,
            thumbnail,
            duration: self
                .content_details
                .map(|details| parse_iso8601_duration(&details.duration))
                .unwrap_or(0),
            author: self.snippet.channel_title,
            view_count: self
                .statistics
                .and_then(|stats| stats.view_count)
                .and_then(|count| count.parse().ok())
                .unwrap_or(0),
        }
    }
}
