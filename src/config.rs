#![forbid(unsafe_code)]

use anyhow::{Context, Result, anyhow};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

use crate::ytdlp::DEFAULT_YT_DLP;

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_TUBEGRAB_PORT: u16 = 3000;
pub const DEFAULT_TUBEGRAB_HOST: &str = "127.0.0.1";
pub const DEFAULT_WWW_ROOT: &str = "www";

pub const API_KEY_VAR: &str = "YOUTUBE_API_KEY";

/// Configuration problems that must stop the process before it serves.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("YOUTUBE_API_KEY must be set when the data-api metadata source is enabled")]
    MissingApiKey,
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },
}

/// Where video titles, thumbnails and view counts come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataSource {
    Extractor,
    DataApi,
}

impl MetadataSource {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "extractor" | "yt-dlp" | "ytdlp" => Some(Self::Extractor),
            "data-api" | "data_api" | "api" => Some(Self::DataApi),
            _ => None,
        }
    }
}

/// How `GET /api/download` hands the downloader's output to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadMode {
    /// Download to a temporary file, then answer with the whole body.
    Buffer,
    /// Stream the downloader's stdout as it is produced.
    Pipe,
}

impl DownloadMode {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "buffer" | "file" => Some(Self::Buffer),
            "pipe" | "stream" => Some(Self::Pipe),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub www_root: PathBuf,
    pub port: u16,
    pub host: String,
    pub yt_dlp: PathBuf,
    pub metadata_source: MetadataSource,
    pub download_mode: DownloadMode,
    pub api_key: Option<String>,
}

impl RuntimeSettings {
    /// Returns the Data API key or the error that should abort startup.
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.api_key.as_deref().ok_or(ConfigError::MissingApiKey)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub www_root: Option<PathBuf>,
    pub port: Option<u16>,
    pub host: Option<String>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_runtime_settings(overrides: RuntimeOverrides) -> Result<RuntimeSettings> {
    let env_path = overrides
        .env_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(&env_path)?;
    build_runtime_settings(&file_vars, env_var_string, overrides)
}

fn build_runtime_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> Result<RuntimeSettings> {
    let www_root = overrides
        .www_root
        .or_else(|| lookup_value("TUBEGRAB_WWW_ROOT", file_vars, &env_lookup).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_WWW_ROOT));
    let port = overrides
        .port
        .or_else(|| {
            lookup_value("TUBEGRAB_PORT", file_vars, &env_lookup)
                .and_then(|value| value.parse::<u16>().ok())
        })
        .unwrap_or(DEFAULT_TUBEGRAB_PORT);
    let host = overrides
        .host
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| lookup_value("TUBEGRAB_HOST", file_vars, &env_lookup))
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_TUBEGRAB_HOST.to_string());
    let yt_dlp = lookup_value("TUBEGRAB_YT_DLP", file_vars, &env_lookup)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_YT_DLP));
    let metadata_source = parse_setting(
        "TUBEGRAB_METADATA_SOURCE",
        file_vars,
        &env_lookup,
        MetadataSource::parse,
    )?
    .unwrap_or(MetadataSource::Extractor);
    let download_mode = parse_setting(
        "TUBEGRAB_DOWNLOAD_MODE",
        file_vars,
        &env_lookup,
        DownloadMode::parse,
    )?
    .unwrap_or(DownloadMode::Buffer);
    let api_key = lookup_value(API_KEY_VAR, file_vars, &env_lookup);

    Ok(RuntimeSettings {
        www_root,
        port,
        host,
        yt_dlp,
        metadata_source,
        download_mode,
        api_key,
    })
}

fn parse_setting<T>(
    key: &'static str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<Option<T>> {
    let Some(raw) = lookup_value(key, file_vars, env_lookup) else {
        return Ok(None);
    };
    parse(&raw)
        .map(Some)
        .ok_or_else(|| anyhow!(ConfigError::InvalidValue { key, value: raw }))
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| {
        file_vars
            .get(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}
