//! Content type and filename chosen for a downloaded rendition.

use std::sync::LazyLock;

use regex::Regex;

use crate::formats::AUDIO_ONLY;

static DISALLOWED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s-]").expect("valid title regex"));
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// Strips everything but word characters, whitespace and hyphens, then
/// joins the remaining words with underscores.
pub fn sanitize_title(title: &str) -> String {
    let stripped = DISALLOWED.replace_all(title, "");
    WHITESPACE.replace_all(stripped.trim(), "_").into_owned()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub content_type: &'static str,
    pub extension: String,
    pub filename: String,
}

impl Attachment {
    /// Maps the declared format to a MIME type and builds the filename from
    /// the display title, falling back to `fallback_stem` when the title is
    /// missing or sanitizes to nothing.
    pub fn for_download(format: Option<&str>, title: Option<&str>, fallback_stem: &str) -> Self {
        let declared = format.map(str::trim).filter(|value| !value.is_empty());
        let (content_type, extension) = match declared {
            Some(AUDIO_ONLY) => ("audio/mpeg", "mp3".to_string()),
            Some(value) if value.eq_ignore_ascii_case("webm") => ("video/webm", "webm".to_string()),
            Some(value) => ("video/mp4", ascii_only(value).to_ascii_lowercase()),
            None => ("video/mp4", String::new()),
        };
        let extension = if extension.is_empty() { "mp4".to_string() } else { extension };

        let stem = title
            .map(sanitize_title)
            .map(|stem| ascii_only(&stem))
            .filter(|stem| !stem.is_empty())
            .unwrap_or_else(|| ascii_only(&sanitize_title(fallback_stem)));
        let stem = if stem.is_empty() { "video".to_string() } else { stem };

        Self {
            content_type,
            filename: format!("{stem}.{extension}"),
            extension,
        }
    }

    pub fn content_disposition(&self) -> String {
        format!("attachment; filename=\"{}\"", self.filename)
    }
}

// Header values must stay printable ASCII.
fn ascii_only(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}
