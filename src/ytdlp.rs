//! Thin wrapper around the `yt-dlp` executable.
//!
//! Metadata comes from `--dump-single-json`, downloads either land in a
//! temporary directory or are streamed from the process' stdout.

use std::{
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use log::{debug, info, warn};
use serde::Deserialize;

use crate::{
    formats::{AUDIO_ONLY, Rendition},
    source::{HeaderProfile, MediaSource, UpstreamError, VideoDetails, VideoProbe, try_profiles},
    video_id::watch_url,
};

pub const DEFAULT_YT_DLP: &str = "yt-dlp";

const OUTPUT_STEM: &str = "download";

/// Format selector passed to `-f` for a declared format.
pub fn selector_for(format: Option<&str>) -> &'static str {
    match format.map(str::trim) {
        Some(AUDIO_ONLY) => "bestaudio[ext=m4a]/bestaudio/best",
        Some(value) if value.eq_ignore_ascii_case("webm") => "best[ext=webm]/best",
        _ => "best[ext=mp4]/best",
    }
}

#[derive(Debug, Clone)]
pub struct YtDlp {
    program: PathBuf,
    profiles: Vec<HeaderProfile>,
}

impl YtDlp {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            profiles: HeaderProfile::degrade_chain(),
        }
    }

    pub fn with_profiles(mut self, profiles: Vec<HeaderProfile>) -> Self {
        self.profiles = profiles;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn program_name(&self) -> String {
        self.program.display().to_string()
    }

    /// Fetches the info JSON, walking the header profiles until one works.
    pub fn fetch_info(&self, video_id: &str) -> Result<InfoJson, UpstreamError> {
        let url = watch_url(video_id);
        try_profiles(
            &self.profiles,
            |profile| self.dump_json(&url, profile),
            || UpstreamError::Transport("no request profiles configured".into()),
        )
    }

    fn dump_json(&self, url: &str, profile: &HeaderProfile) -> Result<InfoJson, UpstreamError> {
        let mut command = Command::new(&self.program);
        command
            .arg("--dump-single-json")
            .arg("--skip-download")
            .arg("--no-warnings")
            .arg("--no-playlist")
            .args(profile_args(profile))
            .arg(url);

        debug!("running {} with {} profile", self.program_name(), profile.name);
        let output = command.output().map_err(|source| UpstreamError::Spawn {
            program: self.program_name(),
            source,
        })?;

        if !output.status.success() {
            return Err(UpstreamError::Exit {
                program: self.program_name(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        serde_json::from_slice(&output.stdout).map_err(|source| UpstreamError::Parse {
            what: "yt-dlp metadata",
            source,
        })
    }

    /// Downloads `url` into a temporary directory and returns the bytes.
    pub fn download_buffered(&self, url: &str, selector: &str) -> Result<Vec<u8>, UpstreamError> {
        let dir = tempfile::Builder::new().prefix("tubegrab-").tempdir()?;
        let template = dir.path().join(format!("{OUTPUT_STEM}.%(ext)s"));

        info!("downloading {url} with selector {selector}");
        let output = Command::new(&self.program)
            .arg("-f")
            .arg(selector)
            .arg("-o")
            .arg(&template)
            .arg("--no-playlist")
            .arg("--no-progress")
            .arg("--no-warnings")
            .arg(url)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|source| UpstreamError::Spawn {
                program: self.program_name(),
                source,
            })?;

        let result = if output.status.success() {
            read_output_file(dir.path())
        } else {
            Err(UpstreamError::Exit {
                program: self.program_name(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        };

        let dir_path = dir.path().to_path_buf();
        if let Err(err) = dir.close() {
            warn!("failed to remove {}: {err}", dir_path.display());
        }
        result
    }

    /// Starts a download that writes the media to stdout.
    pub fn spawn_piped(&self, url: &str, selector: &str) -> Result<PipedDownload, UpstreamError> {
        let mut child = tokio::process::Command::new(&self.program)
            .arg("-f")
            .arg(selector)
            .arg("-o")
            .arg("-")
            .arg("--no-playlist")
            .arg("--no-progress")
            .arg("--quiet")
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| UpstreamError::Spawn {
                program: self.program_name(),
                source,
            })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| UpstreamError::Transport("stdout was not captured".into()))?;
        Ok(PipedDownload { child, stdout })
    }
}

impl MediaSource for YtDlp {
    fn probe(&self, video_id: &str) -> Result<VideoProbe, UpstreamError> {
        let info = self.fetch_info(video_id)?;
        Ok(VideoProbe {
            details: info.details(),
            renditions: info.renditions(),
        })
    }
}

/// A running `yt-dlp -o -` process.
pub struct PipedDownload {
    pub child: tokio::process::Child,
    pub stdout: tokio::process::ChildStdout,
}

fn profile_args(profile: &HeaderProfile) -> Vec<OsString> {
    let mut args = Vec::new();
    for (name, value) in &profile.headers {
        args.push(OsString::from("--add-header"));
        args.push(OsString::from(format!("{name}:{value}")));
    }
    if let Some(extractor_args) = &profile.extractor_args {
        args.push(OsString::from("--extractor-args"));
        args.push(OsString::from(extractor_args));
    }
    args
}

fn read_output_file(dir: &Path) -> Result<Vec<u8>, UpstreamError> {
    let mut produced = None;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_partial = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext == "part" || ext == "ytdl");
        let matches_stem = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .is_some_and(|stem| stem == OUTPUT_STEM);
        if path.is_file() && matches_stem && !is_partial {
            produced = Some(path);
            break;
        }
    }
    let path = produced.ok_or(UpstreamError::MissingOutput)?;
    let bytes = fs::read(&path)?;
    if bytes.is_empty() {
        return Err(UpstreamError::Empty);
    }
    Ok(bytes)
}

/// Subset of yt-dlp's `--dump-single-json` payload.
#[derive(Debug, Deserialize)]
pub struct InfoJson {
    title: Option<String>,
    fulltitle: Option<String>,
    thumbnail: Option<String>,
    #[serde(default)]
    thumbnails: Vec<ThumbnailJson>,
    duration: Option<f64>,
    uploader: Option<String>,
    channel: Option<String>,
    view_count: Option<u64>,
    #[serde(default)]
    formats: Vec<FormatJson>,
}

#[derive(Debug, Deserialize)]
struct ThumbnailJson {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FormatJson {
    format_id: Option<String>,
    ext: Option<String>,
    vcodec: Option<String>,
    acodec: Option<String>,
    height: Option<u32>,
    format_note: Option<String>,
    abr: Option<f64>,
    url: Option<String>,
    filesize: Option<u64>,
    filesize_approx: Option<f64>,
}

impl InfoJson {
    pub fn details(&self) -> VideoDetails {
        // yt-dlp orders thumbnails from worst to best.
        let thumbnail = self
            .thumbnail
            .clone()
            .or_else(|| self.thumbnails.iter().rev().find_map(|thumb| thumb.url.clone()))
            .unwrap_or_default();
        VideoDetails {
            title: self
                .title
                .clone()
                .or_else(|| self.fulltitle.clone())
                .unwrap_or_default(),
            thumbnail,
            duration: self.duration.map(|value| value.max(0.0).round() as u64).unwrap_or(0),
            author: self
                .uploader
                .clone()
                .or_else(|| self.channel.clone())
                .unwrap_or_default(),
            view_count: self.view_count.unwrap_or(0),
        }
    }

    pub fn renditions(&self) -> Vec<Rendition> {
        self.formats.iter().filter_map(FormatJson::to_rendition).collect()
    }
}

impl FormatJson {
    fn to_rendition(&self) -> Option<Rendition> {
        let id = self.format_id.as_deref()?.trim();
        if id.is_empty() {
            return None;
        }
        Some(Rendition {
            id: id.to_string(),
            container: self.ext.clone().unwrap_or_default(),
            has_video: codec_present(self.vcodec.as_deref()),
            has_audio: codec_present(self.acodec.as_deref()),
            height: self.height,
            label: self.format_note.clone(),
            audio_bitrate: self.abr,
            url: self.url.clone(),
            file_size: self
                .filesize
                .or_else(|| self.filesize_approx.map(|size| size.max(0.0) as u64)),
        })
    }
}

fn codec_present(codec: Option<&str>) -> bool {
    codec.is_some_and(|codec| !codec.is_empty() && codec != "none")
}

#[cfg(test)]
mod tests {
    use super::*;
    #[cfg(unix)]
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    const SAMPLE_INFO: &str = r#"{
      "id": "dQw4w9WgXcQ",
      "title": "Sample Title",
      "thumbnails": [
        {"url": "https://i.ytimg.com/vi/dQw4w9WgXcQ/default.jpg"},
        {"url": "https://i.ytimg.com/vi/dQw4w9WgXcQ/maxresdefault.jpg"}
      ],
      "duration": 212.4,
      "uploader": "Sample Channel",
      "view_count": 1234,
      "formats": [
        {"format_id": "sb0", "ext": "mhtml", "vcodec": "none", "acodec": "none"},
        {"format_id": "140", "ext": "m4a", "vcodec": "none", "acodec": "mp4a.40.2", "abr": 129.5, "url": "https://media.test/140", "filesize": 3000},
        {"format_id": "136", "ext": "mp4", "vcodec": "avc1.4d401f", "acodec": "none", "height": 720, "format_note": "720p", "url": "https://media.test/136"},
        {"format_id": "135", "ext": "mp4", "vcodec": "avc1.4d401e", "acodec": "none", "height": 480, "format_note": "480p", "url": "https://media.test/135", "filesize_approx": 2048.7},
        {"format_id": "18", "ext": "mp4", "vcodec": "avc1.42001E", "acodec": "mp4a.40.2", "height": 360, "format_note": "360p", "url": "https://media.test/18"}
      ]
    }"#;

    /// Writes an executable shell script standing in for yt-dlp.
    #[cfg(unix)]
    fn install_stub(dir: &Path, body: &str) -> PathBuf {
        let script_path = dir.join("yt-dlp");
        fs::write(&script_path, format!("#!/usr/bin/env bash\nset -eu\n{body}")).unwrap();
        let mut perms = fs::metadata(&script_path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&script_path, perms).unwrap();
        script_path
    }

    #[test]
    fn info_json_maps_details_and_renditions() {
        let info: InfoJson = serde_json::from_str(SAMPLE_INFO).unwrap();
        let details = info.details();
        assert_eq!(details.title, "Sample Title");
        assert_eq!(
            details.thumbnail,
            "https://i.ytimg.com/vi/dQw4w9WgXcQ/maxresdefault.jpg"
        );
        assert_eq!(details.duration, 212);
        assert_eq!(details.author, "Sample Channel");
        assert_eq!(details.view_count, 1234);

        let renditions = info.renditions();
        assert_eq!(renditions.len(), 5);
        let storyboard = &renditions[0];
        assert!(!storyboard.has_video && !storyboard.has_audio);
        let audio = &renditions[1];
        assert!(audio.has_audio && !audio.has_video);
        assert_eq!(audio.audio_bitrate, Some(129.5));
        assert_eq!(renditions[3].file_size, Some(2048));
        assert!(renditions[4].has_audio && renditions[4].has_video);
    }

    #[test]
    fn selector_for_declared_formats() {
        assert_eq!(selector_for(Some(AUDIO_ONLY)), "bestaudio[ext=m4a]/bestaudio/best");
        assert_eq!(selector_for(Some("webm")), "best[ext=webm]/best");
        assert_eq!(selector_for(Some("mp4")), "best[ext=mp4]/best");
        assert_eq!(selector_for(None), "best[ext=mp4]/best");
    }

    #[test]
    fn profile_args_include_headers_and_extractor_args() {
        let args = profile_args(&HeaderProfile::mobile());
        let args: Vec<_> = args.iter().map(|arg| arg.to_string_lossy().into_owned()).collect();
        assert_eq!(args[0], "--add-header");
        assert!(args[1].starts_with("User-Agent:"));
        assert_eq!(args[2], "--extractor-args");
        assert_eq!(args[3], "youtube:player_client=android");
        assert!(profile_args(&HeaderProfile::plain()).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn probe_falls_back_to_plain_profile() {
        let dir = tempdir().unwrap();
        let body = format!(
            "if printf '%s\\n' \"$@\" | grep -q -- '--add-header'; then\n  echo 'blocked' >&2\n  exit 1\nfi\ncat <<'JSON'\n{SAMPLE_INFO}\nJSON\n"
        );
        let stub = install_stub(dir.path(), &body);
        let probe = YtDlp::new(stub).probe("dQw4w9WgXcQ").unwrap();
        assert_eq!(probe.details.title, "Sample Title");
        assert_eq!(probe.renditions.len(), 5);
    }

    #[cfg(unix)]
    #[test]
    fn probe_reports_last_failure() {
        let dir = tempdir().unwrap();
        let stub = install_stub(dir.path(), "echo 'Video unavailable' >&2\nexit 1\n");
        let err = YtDlp::new(stub).probe("dQw4w9WgXcQ").unwrap_err();
        assert!(matches!(err, UpstreamError::Exit { .. }));
        assert!(err.to_string().contains("Video unavailable"));
    }

    #[test]
    fn probe_reports_missing_binary() {
        let dir = tempdir().unwrap();
        let err = YtDlp::new(dir.path().join("missing-yt-dlp"))
            .with_profiles(vec![HeaderProfile::plain()])
            .probe("dQw4w9WgXcQ")
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn download_buffered_reads_output_file() {
        let dir = tempdir().unwrap();
        let body = r#"output=""
while [[ $# -gt 0 ]]; do
  case "$1" in
    -o) shift; output="$1" ;;
  esac
  shift
done
target="${output//%(ext)s/mp4}"
printf 'media-bytes' > "$target"
"#;
        let stub = install_stub(dir.path(), body);
        let bytes = YtDlp::new(stub)
            .download_buffered("https://youtu.be/dQw4w9WgXcQ", "best")
            .unwrap();
        assert_eq!(bytes, b"media-bytes");
    }

    #[cfg(unix)]
    #[test]
    fn download_buffered_detects_missing_and_empty_output() {
        let dir = tempdir().unwrap();
        let stub = install_stub(dir.path(), "exit 0\n");
        let err = YtDlp::new(stub)
            .download_buffered("https://youtu.be/dQw4w9WgXcQ", "best")
            .unwrap_err();
        assert!(matches!(err, UpstreamError::MissingOutput));

        let empty_dir = tempdir().unwrap();
        let body = r#"output=""
while [[ $# -gt 0 ]]; do
  case "$1" in
    -o) shift; output="$1" ;;
  esac
  shift
done
: > "${output//%(ext)s/mp4}"
"#;
        let stub = install_stub(empty_dir.path(), body);
        let err = YtDlp::new(stub)
            .download_buffered("https://youtu.be/dQw4w9WgXcQ", "best")
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Empty));
    }

    #[cfg(unix)]
    #[test]
    fn download_buffered_reports_exit_status() {
        let dir = tempdir().unwrap();
        let stub = install_stub(dir.path(), "echo 'Requested format is not available' >&2\nexit 1\n");
        let err = YtDlp::new(stub)
            .download_buffered("https://youtu.be/dQw4w9WgXcQ", "best")
            .unwrap_err();
        assert!(err.to_string().contains("Requested format is not available"));
    }
}
