//! Curates the raw yt-dlp format list into the handful of options the UI
//! offers: one audio-only entry, a few video-only resolutions and a single
//! combined audio+video stream.

use serde::{Deserialize, Serialize};

/// Quality label used for the audio-only entry.
pub const AUDIO_ONLY: &str = "Audio Only";

/// One rendition reported by the extractor for a single video.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rendition {
    pub id: String,
    pub container: String,
    pub has_video: bool,
    pub has_audio: bool,
    pub height: Option<u32>,
    pub label: Option<String>,
    pub audio_bitrate: Option<f64>,
    pub url: Option<String>,
    pub file_size: Option<u64>,
}

impl Rendition {
    /// Vertical resolution, taken from `height` or parsed from the label.
    pub fn resolution(&self) -> u32 {
        self.height
            .or_else(|| self.label.as_deref().map(parse_resolution))
            .unwrap_or(0)
    }

    fn is_audio_only(&self) -> bool {
        self.has_audio && !self.has_video
    }

    fn is_video_only(&self) -> bool {
        self.has_video && !self.has_audio
    }

    fn is_combined(&self) -> bool {
        self.has_video && self.has_audio
    }
}

/// User-facing download option.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CuratedFormat {
    pub quality: String,
    pub format: String,
    pub has_video: bool,
    pub has_audio: bool,
    pub itag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
}

impl CuratedFormat {
    fn from_rendition(rendition: &Rendition, quality: String) -> Self {
        Self {
            quality,
            format: rendition.container.clone(),
            has_video: rendition.has_video,
            has_audio: rendition.has_audio,
            itag: rendition.id.clone(),
            file_size: rendition.file_size,
        }
    }

    fn resolution(&self) -> u32 {
        parse_resolution(&self.quality)
    }
}

/// Which tiers the curated list exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionProfile {
    /// Video-only heights offered, one entry each.
    pub video_only_heights: Vec<u32>,
    /// Height of the single combined audio+video entry.
    pub combined_height: u32,
    /// Containers tried first for the audio-only entry. Any audio-only
    /// rendition is used when none of these exist.
    pub preferred_audio_containers: Vec<String>,
}

impl Default for SelectionProfile {
    fn default() -> Self {
        Self {
            video_only_heights: vec![1080, 720, 480],
            combined_height: 360,
            preferred_audio_containers: vec!["m4a".to_string(), "mp4".to_string()],
        }
    }
}

/// Parses labels such as `720p` or `1080p60` into their height. Anything
/// without leading digits parses to 0.
pub fn parse_resolution(label: &str) -> u32 {
    let digits: String = label
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().unwrap_or(0)
}

/// Picks one rendition per quality tier and orders them for display.
///
/// The audio-only entry is the first rendition in a preferred container, or
/// the first audio-only rendition of any container when none is preferred.
pub fn select_formats(renditions: &[Rendition], profile: &SelectionProfile) -> Vec<CuratedFormat> {
    let mut sorted: Vec<&Rendition> = renditions.iter().collect();
    sorted.sort_by_key(|rendition| std::cmp::Reverse(rendition.resolution()));

    let mut curated = Vec::new();
    let mut audio_selected = false;
    let mut seen_heights: Vec<u32> = Vec::new();
    let mut combined_selected = false;

    for rendition in &sorted {
        if rendition.is_audio_only() {
            if !audio_selected && is_preferred_audio(rendition, profile) {
                curated.push(CuratedFormat::from_rendition(rendition, AUDIO_ONLY.to_string()));
                audio_selected = true;
            }
            continue;
        }

        let height = rendition.resolution();
        if rendition.is_video_only()
            && profile.video_only_heights.contains(&height)
            && !seen_heights.contains(&height)
        {
            curated.push(CuratedFormat::from_rendition(rendition, format!("{height}p")));
            seen_heights.push(height);
            continue;
        }

        if rendition.is_combined() && height == profile.combined_height && !combined_selected {
            curated.push(CuratedFormat::from_rendition(rendition, format!("{height}p")));
            combined_selected = true;
        }
    }

    if !audio_selected
        && let Some(rendition) = sorted.iter().find(|rendition| rendition.is_audio_only())
    {
        curated.push(CuratedFormat::from_rendition(rendition, AUDIO_ONLY.to_string()));
    }

    curated.sort_by(|a, b| {
        b.has_video
            .cmp(&a.has_video)
            .then_with(|| b.resolution().cmp(&a.resolution()))
    });
    curated
}

fn is_preferred_audio(rendition: &Rendition, profile: &SelectionProfile) -> bool {
    profile
        .preferred_audio_containers
        .iter()
        .any(|container| container.eq_ignore_ascii_case(&rendition.container))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendition(id: &str, ext: &str, video: bool, audio: bool, height: Option<u32>) -> Rendition {
        Rendition {
            id: id.into(),
            container: ext.into(),
            has_video: video,
            has_audio: audio,
            height,
            ..Rendition::default()
        }
    }

    fn qualities(formats: &[CuratedFormat]) -> Vec<&str> {
        formats.iter().map(|format| format.quality.as_str()).collect()
    }

    #[test]
    fn one_entry_per_tier_in_display_order() {
        let input = vec![
            rendition("140", "m4a", false, true, None),
            rendition("135", "mp4", true, false, Some(480)),
            rendition("136", "mp4", true, false, Some(720)),
            rendition("18", "mp4", true, true, Some(360)),
        ];
        let curated = select_formats(&input, &SelectionProfile::default());
        assert_eq!(qualities(&curated), ["720p", "480p", "360p", AUDIO_ONLY]);
        assert_eq!(curated[0].itag, "136");
        assert_eq!(curated[2].itag, "18");
        assert!(curated[2].has_audio && curated[2].has_video);
        assert_eq!(curated[3].itag, "140");
        assert!(!curated[3].has_video);
    }

    #[test]
    fn empty_input_yields_empty_list() {
        assert!(select_formats(&[], &SelectionProfile::default()).is_empty());
    }

    #[test]
    fn only_first_audio_only_is_kept() {
        let input = vec![
            rendition("139", "m4a", false, true, None),
            rendition("140", "m4a", false, true, None),
        ];
        let curated = select_formats(&input, &SelectionProfile::default());
        assert_eq!(curated.len(), 1);
        assert_eq!(curated[0].itag, "139");
    }

    #[test]
    fn missing_whitelisted_heights_are_skipped() {
        let input = vec![
            rendition("18", "mp4", true, true, Some(360)),
            rendition("140", "m4a", false, true, None),
            rendition("160", "mp4", true, false, Some(144)),
        ];
        let curated = select_formats(&input, &SelectionProfile::default());
        assert_eq!(qualities(&curated), ["360p", AUDIO_ONLY]);
    }

    #[test]
    fn duplicate_heights_keep_the_first_rendition() {
        let input = vec![
            rendition("136", "mp4", true, false, Some(720)),
            rendition("247", "webm", true, false, Some(720)),
            rendition("18", "mp4", true, true, Some(360)),
            rendition("93", "mp4", true, true, Some(360)),
        ];
        let curated = select_formats(&input, &SelectionProfile::default());
        assert_eq!(curated.len(), 2);
        assert_eq!(curated[0].itag, "136");
        assert_eq!(curated[1].itag, "18");
    }

    #[test]
    fn audio_falls_back_to_any_container() {
        let input = vec![
            rendition("251", "webm", false, true, None),
            rendition("250", "webm", false, true, None),
        ];
        let curated = select_formats(&input, &SelectionProfile::default());
        assert_eq!(curated.len(), 1);
        assert_eq!(curated[0].itag, "251");
        assert_eq!(curated[0].format, "webm");
    }

    #[test]
    fn preferred_audio_container_wins_over_earlier_one() {
        let input = vec![
            rendition("251", "webm", false, true, None),
            rendition("140", "m4a", false, true, None),
        ];
        let curated = select_formats(&input, &SelectionProfile::default());
        assert_eq!(curated.len(), 1);
        assert_eq!(curated[0].itag, "140");
    }

    #[test]
    fn label_is_used_when_height_is_missing() {
        let mut labelled = rendition("137", "mp4", true, false, None);
        labelled.label = Some("1080p".into());
        let curated = select_formats(&[labelled], &SelectionProfile::default());
        assert_eq!(qualities(&curated), ["1080p"]);
    }

    #[test]
    fn custom_profile_controls_tiers() {
        let profile = SelectionProfile {
            video_only_heights: vec![1440],
            combined_height: 720,
            preferred_audio_containers: vec![],
        };
        let input = vec![
            rendition("271", "webm", true, false, Some(1440)),
            rendition("136", "mp4", true, false, Some(720)),
            rendition("22", "mp4", true, true, Some(720)),
        ];
        let curated = select_formats(&input, &profile);
        assert_eq!(qualities(&curated), ["1440p", "720p"]);
        assert_eq!(curated[1].itag, "22");
    }

    #[test]
    fn parse_resolution_is_lenient() {
        assert_eq!(parse_resolution("720p"), 720);
        assert_eq!(parse_resolution("1080p60"), 1080);
        assert_eq!(parse_resolution(AUDIO_ONLY), 0);
        assert_eq!(parse_resolution(""), 0);
    }

    #[test]
    fn curated_format_serializes_camel_case() {
        let format = CuratedFormat {
            quality: "720p".into(),
            format: "mp4".into(),
            has_video: true,
            has_audio: false,
            itag: "136".into(),
            file_size: None,
        };
        let value = serde_json::to_value(&format).unwrap();
        assert_eq!(value["hasVideo"], true);
        assert_eq!(value["itag"], "136");
        assert!(value.get("fileSize").is_none());
    }
}
