//! Encoding settings and the output specification.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::mode::{LogoPosition, ResamplingFilter};

/// Default video codec (H.264)
pub const DEFAULT_VIDEO_CODEC: &str = "libx264";
/// Default audio codec
pub const DEFAULT_AUDIO_CODEC: &str = "aac";
/// Default encoding preset
pub const DEFAULT_PRESET: &str = "fast";
/// Default CRF for intermediates
pub const DEFAULT_CRF: u8 = 18;
/// Default audio bitrate
pub const DEFAULT_AUDIO_BITRATE: &str = "128k";

/// Canonical vertical output
pub const OUTPUT_WIDTH: u32 = 1080;
pub const OUTPUT_HEIGHT: u32 = 1920;
pub const OUTPUT_FPS: u32 = 30;
pub const OUTPUT_VIDEO_BITRATE: &str = "6000k";

/// Encoder settings for intermediate renders.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EncodingConfig {
    /// Video codec (e.g., "libx264")
    #[serde(default = "default_video_codec")]
    pub codec: String,

    /// Encoding preset (e.g., "fast", "medium", "slow")
    #[serde(default = "default_preset")]
    pub preset: String,

    /// Constant Rate Factor (quality, 0-51, lower is better)
    #[serde(default = "default_crf")]
    pub crf: u8,

    /// Audio codec
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,

    /// Audio bitrate
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,

    /// Additional FFmpeg output arguments
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_video_codec() -> String {
    DEFAULT_VIDEO_CODEC.to_string()
}
fn default_preset() -> String {
    DEFAULT_PRESET.to_string()
}
fn default_crf() -> u8 {
    DEFAULT_CRF
}
fn default_audio_codec() -> String {
    DEFAULT_AUDIO_CODEC.to_string()
}
fn default_audio_bitrate() -> String {
    DEFAULT_AUDIO_BITRATE.to_string()
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            codec: DEFAULT_VIDEO_CODEC.to_string(),
            preset: DEFAULT_PRESET.to_string(),
            crf: DEFAULT_CRF,
            audio_codec: DEFAULT_AUDIO_CODEC.to_string(),
            audio_bitrate: DEFAULT_AUDIO_BITRATE.to_string(),
            extra_args: Vec::new(),
        }
    }
}

impl EncodingConfig {
    /// Returns a new config with updated CRF.
    pub fn with_crf(mut self, crf: u8) -> Self {
        self.crf = crf;
        self
    }

    /// Returns a new config with updated preset.
    pub fn with_preset(mut self, preset: impl Into<String>) -> Self {
        self.preset = preset.into();
        self
    }

    /// Video-only FFmpeg output arguments.
    pub fn video_args(&self) -> Vec<String> {
        let mut args = vec![
            "-c:v".to_string(),
            self.codec.clone(),
            "-preset".to_string(),
            self.preset.clone(),
            "-crf".to_string(),
            self.crf.to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
        ];
        args.extend(self.extra_args.clone());
        args
    }

    /// Audio FFmpeg output arguments.
    pub fn audio_args(&self) -> Vec<String> {
        vec![
            "-c:a".to_string(),
            self.audio_codec.clone(),
            "-b:a".to_string(),
            self.audio_bitrate.clone(),
        ]
    }
}

/// Background music laid under the main content.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AudioTrack {
    pub path: PathBuf,
    /// Linear gain applied before normalization
    #[serde(default = "default_volume")]
    pub volume: f64,
    #[serde(default = "default_fade")]
    pub fade_in: f64,
    #[serde(default = "default_fade")]
    pub fade_out: f64,
    /// Run EBU R128 loudness normalization
    #[serde(default = "default_true")]
    pub normalize: bool,
    /// Seconds added after the track when the video follows the audio length
    #[serde(default)]
    pub extra_seconds: f64,
}

fn default_volume() -> f64 {
    1.0
}
fn default_fade() -> f64 {
    1.0
}
fn default_true() -> bool {
    true
}

impl AudioTrack {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            volume: default_volume(),
            fade_in: default_fade(),
            fade_out: default_fade(),
            normalize: true,
            extra_seconds: 0.0,
        }
    }
}

/// Branding image composited over the main content.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LogoOverlay {
    pub path: PathBuf,
    #[serde(default)]
    pub position: LogoPosition,
    /// 0.0 = invisible, 1.0 = opaque
    #[serde(default = "default_opacity")]
    pub opacity: f64,
    /// Logo width as a fraction of the output width
    #[serde(default = "default_logo_scale")]
    pub scale: f64,
    /// Horizontal distance from the anchored edge (pixels)
    #[serde(default = "default_margin")]
    pub margin: u32,
    /// Vertical distance from the anchored edge (pixels)
    #[serde(default = "default_vertical_offset")]
    pub vertical_offset: u32,
}

fn default_opacity() -> f64 {
    0.5
}
fn default_logo_scale() -> f64 {
    0.2
}
fn default_margin() -> u32 {
    40
}
fn default_vertical_offset() -> u32 {
    10
}

impl LogoOverlay {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            position: LogoPosition::default(),
            opacity: default_opacity(),
            scale: default_logo_scale(),
            margin: default_margin(),
            vertical_offset: default_vertical_offset(),
        }
    }

    pub fn with_position(mut self, position: LogoPosition) -> Self {
        self.position = position;
        self
    }

    /// Set opacity, clamped to 0.0..=1.0.
    pub fn with_opacity(mut self, opacity: f64) -> Self {
        self.opacity = opacity.clamp(0.0, 1.0);
        self
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }
}

/// Everything the final render needs to know about the artifact.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OutputSpec {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub video_bitrate: String,
    pub resampling: ResamplingFilter,
    /// Intermediate and final encoder settings
    pub encoding: EncodingConfig,
    pub audio: Option<AudioTrack>,
    pub logo: Option<LogoOverlay>,
    pub tagline: Option<PathBuf>,
    /// Final duration follows the audio track instead of the selected content
    pub sync_duration_to_audio: bool,
}

impl Default for OutputSpec {
    fn default() -> Self {
        Self {
            width: OUTPUT_WIDTH,
            height: OUTPUT_HEIGHT,
            fps: OUTPUT_FPS,
            video_bitrate: OUTPUT_VIDEO_BITRATE.to_string(),
            resampling: ResamplingFilter::default(),
            encoding: EncodingConfig::default(),
            audio: None,
            logo: None,
            tagline: None,
            sync_duration_to_audio: false,
        }
    }
}

impl OutputSpec {
    /// Output aspect ratio as width / height.
    pub fn aspect(&self) -> f64 {
        self.width as f64 / self.height.max(1) as f64
    }

    /// Arguments for the final encode.
    pub fn final_encode_args(&self) -> Vec<String> {
        vec![
            "-c:v".to_string(),
            self.encoding.codec.clone(),
            "-preset".to_string(),
            self.encoding.preset.clone(),
            "-b:v".to_string(),
            self.video_bitrate.clone(),
            "-r".to_string(),
            self.fps.to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-movflags".to_string(),
            "+faststart".to_string(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_output_is_vertical_hd() {
        let spec = OutputSpec::default();
        assert_eq!((spec.width, spec.height, spec.fps), (1080, 1920, 30));
        assert!((spec.aspect() - 9.0 / 16.0).abs() < 1e-9);
        assert!(spec.final_encode_args().contains(&"6000k".to_string()));
    }

    #[test]
    fn test_encoding_args() {
        let args = EncodingConfig::default().with_crf(22).video_args();
        assert_eq!(&args[..4], &["-c:v", "libx264", "-preset", "fast"]);
        assert!(args.contains(&"22".to_string()));
        assert_eq!(EncodingConfig::default().audio_args()[3], "128k");
    }

    #[test]
    fn test_logo_defaults_and_clamp() {
        let logo: LogoOverlay = serde_json::from_str(r#"{"path": "logo.png"}"#).unwrap();
        assert_eq!(logo.position, LogoPosition::TopLeft);
        assert_eq!(logo.margin, 40);
        assert!((logo.scale - 0.2).abs() < 1e-9);

        let logo = LogoOverlay::new("logo.png").with_opacity(1.7);
        assert!((logo.opacity - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_audio_track_defaults() {
        let track: AudioTrack = serde_json::from_str(r#"{"path": "music.mp3"}"#).unwrap();
        assert!(track.normalize);
        assert!((track.fade_in - 1.0).abs() < 1e-9);
        assert_eq!(track.extra_seconds, 0.0);
    }
}
