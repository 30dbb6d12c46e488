#![forbid(unsafe_code)]

//! Building blocks for the tubegrab backend: configuration, the yt-dlp and
//! Data API clients, format curation and attachment naming.

pub mod attachment;
pub mod config;
pub mod data_api;
pub mod formats;
pub mod source;
pub mod video_id;
pub mod ytdlp;
