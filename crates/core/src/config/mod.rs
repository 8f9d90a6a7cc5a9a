use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{canvas::Color, Result, VisualizerError};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub analysis: AnalysisConfig,
    pub render: RenderConfig,
    pub recording: RecordingSettings,
}

impl AppConfig {
    /// Reads a JSON configuration file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        tracing::debug!(path = %path.as_ref().display(), "loaded config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let fft = self.audio.fft_size;
        if !(32..=32_768).contains(&fft) || !fft.is_power_of_two() {
            return Err(VisualizerError::InvalidInput(
                "fft_size must be a power of two between 32 and 32768",
            ));
        }
        if !(0.0..=1.0).contains(&self.audio.smoothing_time_constant) {
            return Err(VisualizerError::InvalidInput(
                "smoothing_time_constant must lie in [0, 1]",
            ));
        }
        if self.audio.min_decibels >= self.audio.max_decibels {
            return Err(VisualizerError::InvalidInput(
                "min_decibels must be below max_decibels",
            ));
        }
        if self.render.width == 0 || self.render.height == 0 {
            return Err(VisualizerError::InvalidInput("render size must be non-zero"));
        }
        if self.render.fps == 0 {
            return Err(VisualizerError::InvalidInput("fps must be non-zero"));
        }
        if self.analysis.sensitivity < 0.0 {
            return Err(VisualizerError::InvalidInput("sensitivity must not be negative"));
        }
        Ok(())
    }
}

/// Analyser node parameters, shared by the mix and per-channel analysers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub fft_size: usize,
    pub smoothing_time_constant: f32,
    pub min_decibels: f32,
    pub max_decibels: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            fft_size: 2048,
            smoothing_time_constant: 0.8,
            min_decibels: -100.0,
            max_decibels: -30.0,
        }
    }
}

impl AudioConfig {
    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Global multiplier applied to raw bass energy before smoothing.
    pub sensitivity: f32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self { sensitivity: 0.7 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Fill used when no background image is loaded.
    pub background: Color,
    pub vignette: bool,
    /// Cover-fit a still background image instead of stretching it. Frame
    /// sequences are always cover-fitted.
    pub cover_image: bool,
    /// Global hue cycling; modules keep their own rainbow settings.
    pub rainbow: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 60,
            background: Color::rgba(17.0 / 255.0, 17.0 / 255.0, 17.0 / 255.0, 1.0),
            vignette: true,
            cover_image: false,
            rainbow: false,
        }
    }
}

impl RenderConfig {
    pub fn frame_duration(&self) -> f32 {
        1.0 / self.fps.max(1) as f32
    }
}

/// Where and how exported frames are written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingSettings {
    pub output: PathBuf,
    pub format: RecordingFormat,
    /// Frames buffered between the render loop and the encoder worker.
    pub queue_depth: usize,
    /// ffmpeg executable used for video output.
    pub ffmpeg: String,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            output: PathBuf::from("frames"),
            format: RecordingFormat::PngSequence,
            queue_depth: 8,
            ffmpeg: "ffmpeg".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordingFormat {
    #[default]
    PngSequence,
    Video,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_analyser_setup() {
        let config = AppConfig::default();
        assert_eq!(config.audio.fft_size, 2048);
        assert_eq!(config.audio.bin_count(), 1024);
        assert_eq!(config.analysis.sensitivity, 0.7);
        assert_eq!(config.render.background.to_hex(), "#111111");
        config.validate().unwrap();
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: AppConfig =
            serde_json::from_str(r##"{"render": {"width": 640, "background": "#000"}}"##).unwrap();
        assert_eq!(config.render.width, 640);
        assert_eq!(config.render.height, 720);
        assert_eq!(config.render.background, Color::BLACK);
        assert_eq!(config.audio, AudioConfig::default());
    }

    #[test]
    fn rejects_bad_values() {
        let mut config = AppConfig::default();
        config.audio.fft_size = 1000;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.render.fps = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.min_decibels = -20.0;
        assert!(config.validate().is_err());
    }
}
