//! Core library for the bass-reactive visualizer.
//!
//! Audio is reduced once per frame to an [`AudioSnapshot`] (byte spectra
//! plus smoothed bass levels and a beat flag). Visual modules read the
//! snapshot and paint onto a [`canvas::Canvas`]; the [`Session`] owns all
//! of that state and the [`FrameLoop`] drives it. Settings files and frame
//! export sit on top.

pub mod analysis;
pub mod assets;
pub mod audio;
pub mod canvas;
pub mod config;
pub mod error;
pub mod modules;
pub mod record;
pub mod render;
pub mod session;
pub mod settings;
pub mod timeline;
pub mod ui;

pub use analysis::{AudioSnapshot, BassTracker, Channel};
pub use assets::AssetStore;
pub use audio::{AudioBuffer, AudioGraph, FrequencyAnalyser};
pub use config::{AppConfig, AudioConfig, RecordingFormat, RecordingSettings};
pub use error::{Result, VisualizerError};
pub use modules::{create_module, ModuleId, ModuleKind, ModuleRegistry, Position, VisualModule};
pub use record::Recorder;
pub use render::{Background, FrameLoop, FrameSequence, FrameStats};
pub use session::{AddOutcome, Session};
pub use settings::{ImportReport, SettingsFile};
pub use timeline::{PlaybackClock, PlaybackState};
