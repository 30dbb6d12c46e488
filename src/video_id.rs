//! YouTube video id validation and extraction from pasted URLs.

use std::sync::LazyLock;

use regex::Regex;

static VIDEO_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").expect("valid video id regex"));

// Ordered from most to least specific. `v=` also covers `/watch?v=` and
// links where the id is not the first query parameter.
static URL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?:https?://)?(?:www\.|m\.)?youtube\.com/watch\?v=([A-Za-z0-9_-]{11})",
        r"(?:https?://)?youtu\.be/([A-Za-z0-9_-]{11})",
        r"(?:https?://)?(?:www\.|m\.)?youtube\.com/(?:shorts|embed)/([A-Za-z0-9_-]{11})",
        r"[?&]v=([A-Za-z0-9_-]{11})",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("valid url regex"))
    .collect()
});

/// Returns true for a bare 11 character YouTube id.
pub fn is_valid_video_id(value: &str) -> bool {
    VIDEO_ID.is_match(value)
}

/// Pulls the video id out of a bare id or one of the common URL shapes.
pub fn extract_video_id(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if is_valid_video_id(trimmed) {
        return Some(trimmed.to_string());
    }
    URL_PATTERNS.iter().find_map(|pattern| {
        pattern
            .captures(trimmed)
            .and_then(|captures| captures.get(1))
            .map(|id| id.as_str().to_string())
    })
}

pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={video_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_bare_ids() {
        assert!(is_valid_video_id("dQw4w9WgXcQ"));
        assert!(is_valid_video_id("a-b_c1234XY"));
        assert!(!is_valid_video_id("short"));
        assert!(!is_valid_video_id("dQw4w9WgXcQx"));
        assert!(!is_valid_video_id("dQw4w9WgX!Q"));
    }

    #[test]
    fn extracts_from_url_shapes() {
        let expected = Some("dQw4w9WgXcQ".to_string());
        assert_eq!(extract_video_id("dQw4w9WgXcQ"), expected);
        assert_eq!(
            extract_video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ"),
            expected
        );
        assert_eq!(
            extract_video_id("youtube.com/watch?v=dQw4w9WgXcQ&t=42"),
            expected
        );
        assert_eq!(extract_video_id("https://youtu.be/dQw4w9WgXcQ?si=x"), expected);
        assert_eq!(
            extract_video_id("https://www.youtube.com/shorts/dQw4w9WgXcQ"),
            expected
        );
        assert_eq!(
            extract_video_id("https://www.youtube.com/watch?feature=share&v=dQw4w9WgXcQ"),
            expected
        );
    }

    #[test]
    fn rejects_unrelated_input() {
        assert_eq!(extract_video_id(""), None);
        assert_eq!(extract_video_id("https://example.com/video"), None);
        assert_eq!(extract_video_id("https://youtu.be/short"), None);
    }

    #[test]
    fn watch_url_is_canonical() {
        assert_eq!(
            watch_url("dQw4w9WgXcQ"),
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ"
        );
    }
}
