//! Input of one pipeline run.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::config::{is_supported_container, ConfigError, MixConfig};
use crate::encoding::{AudioTrack, LogoOverlay, OutputSpec};

/// Files and settings collected by the upload layer.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunRequest {
    /// Source videos, in submission order
    pub sources: Vec<PathBuf>,
    /// Still image of the person to favour
    #[serde(default)]
    pub reference_photo: Option<PathBuf>,
    #[serde(default)]
    pub audio: Option<AudioTrack>,
    #[serde(default)]
    pub logo: Option<LogoOverlay>,
    /// Clip appended after the main content
    #[serde(default)]
    pub tagline: Option<PathBuf>,
    pub output_path: PathBuf,
    #[serde(default)]
    pub config: MixConfig,
}

impl RunRequest {
    pub fn new(sources: Vec<PathBuf>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            sources,
            reference_photo: None,
            audio: None,
            logo: None,
            tagline: None,
            output_path: output_path.into(),
            config: MixConfig::default(),
        }
    }

    /// Validate the request.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sources.is_empty() {
            return Err(ConfigError::NoSources);
        }

        if let Some(bad) = self.sources.iter().find(|p| !is_supported_container(p)) {
            return Err(ConfigError::UnsupportedContainer(bad.clone()));
        }

        self.config.validate()?;

        if let Some(logo) = &self.logo {
            if !(0.0..=1.0).contains(&logo.opacity) {
                return Err(ConfigError::OutOfRange {
                    field: "logo.opacity",
                    value: logo.opacity,
                    min: 0.0,
                    max: 1.0,
                });
            }
            if !(logo.scale > 0.0 && logo.scale <= 1.0) {
                return Err(ConfigError::OutOfRange {
                    field: "logo.scale",
                    value: logo.scale,
                    min: 0.0,
                    max: 1.0,
                });
            }
        }

        if let Some(audio) = &self.audio {
            if !(audio.volume >= 0.0 && audio.volume.is_finite()) {
                return Err(ConfigError::Invalid(format!(
                    "audio volume must be non-negative, got {}",
                    audio.volume
                )));
            }
            if audio.fade_in < 0.0 || audio.fade_out < 0.0 || audio.extra_seconds < 0.0 {
                return Err(ConfigError::Invalid(
                    "audio fades and extra seconds must be non-negative".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Output specification for this request.
    pub fn output_spec(&self) -> OutputSpec {
        OutputSpec {
            resampling: self.config.resampling,
            encoding: self.config.encoding.clone(),
            audio: self.audio.clone(),
            logo: self.logo.clone(),
            tagline: self.tagline.clone(),
            sync_duration_to_audio: self.config.sync_duration_to_audio,
            ..OutputSpec::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_request_from_json() {
        let json = r#"{
            "sources": ["a.mp4", "b.MOV"],
            "output_path": "out.mp4"
        }"#;
        let request: RunRequest = serde_json::from_str(json).unwrap();
        request.validate().unwrap();
        assert_eq!(request.config.target_duration, 60.0);
        assert!(request.output_spec().audio.is_none());
    }

    #[test]
    fn test_rejects_unsupported_container() {
        let request = RunRequest::new(vec!["a.mp4".into(), "b.gif".into()], "out.mp4");
        assert_eq!(
            request.validate(),
            Err(ConfigError::UnsupportedContainer("b.gif".into()))
        );
    }

    #[test]
    fn test_rejects_empty_sources() {
        let request = RunRequest::new(Vec::new(), "out.mp4");
        assert_eq!(request.validate(), Err(ConfigError::NoSources));
    }

    #[test]
    fn test_output_spec_carries_sync_flag() {
        let mut request = RunRequest::new(vec!["a.mp4".into()], "out.mp4");
        request.config.sync_duration_to_audio = true;
        request.audio = Some(AudioTrack::new("music.mp3"));
        let spec = request.output_spec();
        assert!(spec.sync_duration_to_audio);
        assert_eq!(spec.width, 1080);
    }
}
