// FormatSelector - per-attempt yt-dlp argument construction
//
// Turns a DownloadRequest into the exact flag list for one attempt:
// - Output template with a filename length cap
// - Reliability flags (retries, timeouts, chunking)
// - Client spoofing (player clients, user agent)
// - Mode-specific format selection (audio extract or height-bounded video)
//
// The output is deterministic for a given request and flag set.

use super::config::ToolFlags;
use super::models::{DownloadMode, DownloadRequest, VideoQuality};

pub struct FormatSelector;

impl FormatSelector {
    /// Get format spec for yt-dlp based on the quality bound
    pub fn get_format_spec(quality: VideoQuality) -> String {
        match quality {
            VideoQuality::Best => "bestvideo+bestaudio/best".to_string(),
            VideoQuality::MaxHeight(h) => format!(
                "bestvideo[height<={h}]+bestaudio/best[height<={h}]/best",
                h = h
            ),
        }
    }

    /// Output template inside the request's directory, title capped at `max_len` chars
    pub fn output_template(request: &DownloadRequest, max_len: u32) -> String {
        let template = format!("%(title).{}s.%(ext)s", max_len);
        request
            .output_directory
            .join(template)
            .to_string_lossy()
            .to_string()
    }

    /// Build the full argument list for one download attempt. The URL is always last.
    pub fn build_download_args(request: &DownloadRequest, flags: &ToolFlags) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            Self::output_template(request, flags.filename_max_len),
            "--no-mtime".to_string(),
            "--restrict-filenames".to_string(),
            "--no-warnings".to_string(),
            // Network reliability
            "--retries".to_string(),
            flags.retries.to_string(),
            "--fragment-retries".to_string(),
            flags.fragment_retries.to_string(),
            "--file-access-retries".to_string(),
            flags.file_access_retries.to_string(),
            "--extractor-retries".to_string(),
            flags.extractor_retries.to_string(),
            "--socket-timeout".to_string(),
            flags.socket_timeout_secs.to_string(),
            "--http-chunk-size".to_string(),
            flags.http_chunk_size.clone(),
            "--extractor-args".to_string(),
            format!("youtube:player_client={}", flags.player_clients),
            "--user-agent".to_string(),
            flags.user_agent.clone(),
        ];

        match request.mode {
            DownloadMode::Audio => {
                args.extend(vec![
                    "-x".to_string(),
                    "--audio-format".to_string(),
                    flags.audio_format.clone(),
                    "--audio-quality".to_string(),
                    flags.audio_quality.clone(),
                ]);
            }
            DownloadMode::Video(quality) => {
                args.extend(vec![
                    "-f".to_string(),
                    Self::get_format_spec(quality),
                    "--merge-output-format".to_string(),
                    flags.merge_output_format.clone(),
                ]);
            }
        }

        args.push(request.source_url.clone());
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn request(mode: DownloadMode) -> DownloadRequest {
        DownloadRequest::new("https://youtu.be/abc", mode, PathBuf::from("/downloads"))
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(|s| s.as_str())
    }

    #[test]
    fn test_format_spec() {
        assert_eq!(
            FormatSelector::get_format_spec(VideoQuality::MaxHeight(720)),
            "bestvideo[height<=720]+bestaudio/best[height<=720]/best"
        );
        assert_eq!(
            FormatSelector::get_format_spec(VideoQuality::Best),
            "bestvideo+bestaudio/best"
        );
    }

    #[test]
    fn test_video_args() {
        let args = FormatSelector::build_download_args(
            &request(DownloadMode::Video(VideoQuality::MaxHeight(1080))),
            &ToolFlags::default(),
        );

        assert_eq!(
            value_after(&args, "-f"),
            Some("bestvideo[height<=1080]+bestaudio/best[height<=1080]/best")
        );
        assert_eq!(value_after(&args, "--merge-output-format"), Some("mp4"));
        assert!(!args.contains(&"-x".to_string()));
        assert_eq!(args.last().map(|s| s.as_str()), Some("https://youtu.be/abc"));
    }

    #[test]
    fn test_audio_args() {
        let args = FormatSelector::build_download_args(&request(DownloadMode::Audio), &ToolFlags::default());

        assert!(args.contains(&"-x".to_string()));
        assert_eq!(value_after(&args, "--audio-format"), Some("mp3"));
        assert_eq!(value_after(&args, "--audio-quality"), Some("0"));
        assert!(value_after(&args, "-f").is_none());
    }

    #[test]
    fn test_reliability_and_naming_flags() {
        let args = FormatSelector::build_download_args(&request(DownloadMode::Audio), &ToolFlags::default());

        assert_eq!(value_after(&args, "--retries"), Some("10"));
        assert_eq!(value_after(&args, "--fragment-retries"), Some("10"));
        assert_eq!(value_after(&args, "--file-access-retries"), Some("3"));
        assert_eq!(value_after(&args, "--extractor-retries"), Some("5"));
        assert_eq!(value_after(&args, "--socket-timeout"), Some("30"));
        assert_eq!(value_after(&args, "--http-chunk-size"), Some("10M"));
        assert_eq!(
            value_after(&args, "--extractor-args"),
            Some("youtube:player_client=mweb,android,ios")
        );
        assert!(args.contains(&"--restrict-filenames".to_string()));
        assert!(args.contains(&"--no-mtime".to_string()));

        let template = value_after(&args, "-o").unwrap();
        assert!(template.starts_with("/downloads"));
        assert!(template.ends_with("%(title).100s.%(ext)s"));
    }

    #[test]
    fn test_deterministic() {
        let req = request(DownloadMode::Video(VideoQuality::Best));
        let flags = ToolFlags::default();
        assert_eq!(
            FormatSelector::build_download_args(&req, &flags),
            FormatSelector::build_download_args(&req.for_attempt(2), &flags)
        );
    }
}
