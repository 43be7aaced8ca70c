//! FFprobe media information.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use vmix_models::{SourceId, SourceVideo};

use crate::command::check_ffprobe;
use crate::error::{MediaError, MediaResult};

/// Video file information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoInfo {
    /// Duration in seconds
    pub duration: f64,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Frame rate (fps)
    pub fps: f64,
    /// Video codec
    pub codec: String,
    /// Whether an audio stream is present
    pub has_audio: bool,
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    duration: Option<String>,
}

async fn run_ffprobe(path: &Path) -> MediaResult<FfprobeOutput> {
    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    check_ffprobe()?;

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::FfprobeFailed {
            message: format!("FFprobe failed for {}", path.display()),
            stderr: Some(String::from_utf8_lossy(&output.stderr).to_string()),
        });
    }

    Ok(serde_json::from_slice(&output.stdout)?)
}

fn parse_seconds(value: Option<&String>) -> Option<f64> {
    value
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
}

fn video_info_from(probe: &FfprobeOutput) -> MediaResult<VideoInfo> {
    let video_stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "video")
        .ok_or_else(|| MediaError::invalid_video("No video stream found"))?;

    let duration = parse_seconds(probe.format.duration.as_ref())
        .or_else(|| parse_seconds(video_stream.duration.as_ref()))
        .ok_or_else(|| MediaError::invalid_video("Unknown duration"))?;

    let width = video_stream.width.unwrap_or(0);
    let height = video_stream.height.unwrap_or(0);
    if width == 0 || height == 0 {
        return Err(MediaError::invalid_video("Video stream has no dimensions"));
    }

    let fps = video_stream
        .avg_frame_rate
        .as_ref()
        .and_then(|r| parse_frame_rate(r))
        .or_else(|| video_stream.r_frame_rate.as_ref().and_then(|r| parse_frame_rate(r)))
        .unwrap_or(30.0);

    Ok(VideoInfo {
        duration,
        width,
        height,
        fps,
        codec: video_stream.codec_name.clone().unwrap_or_default(),
        has_audio: probe.streams.iter().any(|s| s.codec_type == "audio"),
    })
}

/// Probe a video file for information.
pub async fn probe_video(path: impl AsRef<Path>) -> MediaResult<VideoInfo> {
    let probe = run_ffprobe(path.as_ref()).await?;
    video_info_from(&probe)
}

/// Probe a submitted source and wrap it as a [`SourceVideo`].
pub async fn probe_source(id: SourceId, path: impl AsRef<Path>) -> MediaResult<SourceVideo> {
    let path = path.as_ref();
    let info = probe_video(path).await?;
    Ok(SourceVideo {
        id,
        path: path.to_path_buf(),
        duration: info.duration,
        width: info.width,
        height: info.height,
        fps: info.fps,
        has_audio: info.has_audio,
    })
}

/// Duration of any media file, audio-only included.
pub async fn probe_duration(path: impl AsRef<Path>) -> MediaResult<f64> {
    let probe = run_ffprobe(path.as_ref()).await?;
    parse_seconds(probe.format.duration.as_ref())
        .or_else(|| {
            probe
                .streams
                .iter()
                .find_map(|s| parse_seconds(s.duration.as_ref()))
        })
        .ok_or_else(|| MediaError::invalid_video("Unknown duration"))
}

/// Source of stream metadata.
#[async_trait]
pub trait MediaProbe: Send + Sync {
    async fn source(&self, id: SourceId, path: &Path) -> MediaResult<SourceVideo>;

    async fn duration(&self, path: &Path) -> MediaResult<f64>;
}

/// [`MediaProbe`] backed by the `ffprobe` binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ffprobe;

#[async_trait]
impl MediaProbe for Ffprobe {
    async fn source(&self, id: SourceId, path: &Path) -> MediaResult<SourceVideo> {
        probe_source(id, path).await
    }

    async fn duration(&self, path: &Path) -> MediaResult<f64> {
        probe_duration(path).await
    }
}

/// Parse frame rate string (e.g., "30/1" or "29.97").
fn parse_frame_rate(s: &str) -> Option<f64> {
    let fps = if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den <= 0.0 {
            return None;
        }
        num / den
    } else {
        s.parse().ok()?
    };
    (fps.is_finite() && fps > 0.0).then_some(fps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_rate() {
        assert!((parse_frame_rate("30/1").unwrap() - 30.0).abs() < 0.01);
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert!((parse_frame_rate("29.97").unwrap() - 29.97).abs() < 0.01);
        assert!(parse_frame_rate("0/0").is_none());
    }

    #[test]
    fn test_video_info_from_probe_json() {
        let json = r#"{
            "format": {"duration": "60.040000"},
            "streams": [
                {"codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080,
                 "r_frame_rate": "30/1", "avg_frame_rate": "0/0"},
                {"codec_type": "audio", "codec_name": "aac"}
            ]
        }"#;
        let probe: FfprobeOutput = serde_json::from_str(json).unwrap();
        let info = video_info_from(&probe).unwrap();

        assert!((info.duration - 60.04).abs() < 1e-6);
        assert_eq!((info.width, info.height), (1920, 1080));
        assert!((info.fps - 30.0).abs() < 1e-6);
        assert!(info.has_audio);
    }

    #[test]
    fn test_audio_only_is_not_a_video() {
        let json = r#"{
            "format": {"duration": "45.0"},
            "streams": [{"codec_type": "audio", "codec_name": "mp3"}]
        }"#;
        let probe: FfprobeOutput = serde_json::from_str(json).unwrap();
        let err = video_info_from(&probe).unwrap_err();
        assert!(err.is_unreadable_input());
    }

    #[tokio::test]
    async fn test_missing_file() {
        let err = probe_video("/definitely/not/here.mp4").await.unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }
}
