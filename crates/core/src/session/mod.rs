//! Explicit context object owning everything a running visualizer needs.

use std::path::Path;

use crate::{
    analysis::BassTracker,
    assets::AssetStore,
    audio::{AudioBuffer, AudioGraph},
    modules::{create_module, ModuleId, ModuleKind, ModuleRegistry, VisualModule},
    render::{Background, FrameSequence},
    timeline::PlaybackClock,
    AppConfig, AudioSnapshot, Result,
};

/// Hue advance per frame of the global rainbow toggle.
const GLOBAL_RAINBOW_STEP: f32 = 0.5;
const MAX_SENSITIVITY: f32 = 5.0;

/// Result of [`Session::add_module`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added(ModuleId),
    /// The kind already has the maximum number of instances.
    LimitReached(ModuleKind),
}

impl AddOutcome {
    pub fn id(self) -> Option<ModuleId> {
        match self {
            Self::Added(id) => Some(id),
            Self::LimitReached(_) => None,
        }
    }
}

#[derive(Debug)]
pub struct Session {
    config: AppConfig,
    graph: AudioGraph,
    audio: Option<AudioBuffer>,
    clock: PlaybackClock,
    tracker: BassTracker,
    snapshot: AudioSnapshot,
    registry: ModuleRegistry,
    assets: AssetStore,
    background: Option<Background>,
    sensitivity: f32,
    rainbow_hue: f32,
}

impl Session {
    pub fn new(config: AppConfig) -> Result<Self> {
        config.validate()?;
        let graph = AudioGraph::new(&config.audio)?;
        Ok(Self {
            sensitivity: config.analysis.sensitivity,
            snapshot: AudioSnapshot::with_bin_count(graph.bin_count()),
            graph,
            config,
            audio: None,
            clock: PlaybackClock::new(0.0),
            tracker: BassTracker::new(),
            registry: ModuleRegistry::new(),
            assets: AssetStore::new(),
            background: None,
            rainbow_hue: 270.0,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Installs decoded audio and rewinds playback.
    pub fn load_audio(&mut self, buffer: AudioBuffer) {
        tracing::info!(
            duration = buffer.duration(),
            sample_rate = buffer.sample_rate,
            "audio loaded"
        );
        self.clock = PlaybackClock::new(buffer.duration());
        self.audio = Some(buffer);
        self.graph.reset();
        self.tracker.reset();
        self.snapshot = AudioSnapshot::with_bin_count(self.graph.bin_count());
    }

    pub fn load_audio_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let buffer = AudioBuffer::from_wav(path)?;
        self.load_audio(buffer);
        Ok(())
    }

    pub fn audio(&self) -> Option<&AudioBuffer> {
        self.audio.as_ref()
    }

    pub fn clock(&self) -> &PlaybackClock {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut PlaybackClock {
        &mut self.clock
    }

    pub fn play(&mut self) {
        if self.audio.is_some() {
            self.clock.play();
        }
    }

    pub fn pause(&mut self) {
        self.clock.pause();
    }

    pub fn seek(&mut self, seconds: f32) {
        self.clock.seek(seconds);
    }

    pub fn snapshot(&self) -> &AudioSnapshot {
        &self.snapshot
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ModuleRegistry {
        &mut self.registry
    }

    pub fn assets_mut(&mut self) -> &mut AssetStore {
        &mut self.assets
    }

    pub fn background(&self) -> Option<&Background> {
        self.background.as_ref()
    }

    pub fn set_background(&mut self, background: Option<Background>) {
        self.background = background;
    }

    pub fn load_background(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.background = Some(Background::Image(self.assets.load_image(path)?));
        Ok(())
    }

    /// Loads every image in `dir`, in file name order, as a looping video
    /// background played at `fps`.
    pub fn load_background_frames(&mut self, dir: impl AsRef<Path>, fps: f32) -> Result<()> {
        let frames = self.assets.load_frames(dir)?;
        self.background = Some(Background::Frames(FrameSequence::new(frames, fps)?));
        Ok(())
    }

    pub fn sensitivity(&self) -> f32 {
        self.sensitivity
    }

    /// Global gain on raw bass energy, clamped to `[0, 5]`.
    pub fn set_sensitivity(&mut self, sensitivity: f32) {
        self.sensitivity = if sensitivity.is_finite() {
            sensitivity.clamp(0.0, MAX_SENSITIVITY)
        } else {
            self.config.analysis.sensitivity
        };
    }

    pub fn rainbow_hue(&self) -> f32 {
        self.rainbow_hue
    }

    /// Builds a module with default settings and registers it.
    pub fn add_module(&mut self, kind: ModuleKind) -> AddOutcome {
        self.add_boxed(create_module(kind))
    }

    pub fn add_boxed(&mut self, module: Box<dyn VisualModule>) -> AddOutcome {
        let kind = module.kind();
        match self.registry.add(module) {
            Ok(id) => AddOutcome::Added(id),
            Err(_) => AddOutcome::LimitReached(kind),
        }
    }

    pub fn remove_module(&mut self, id: ModuleId) -> bool {
        self.registry.remove(id).is_some()
    }

    /// Loads images requested by modules into the asset cache.
    pub fn resolve_assets(&mut self) -> Result<()> {
        self.assets.resolve_module_assets(self.registry.iter_mut())
    }

    /// Per-frame analysis step. Never fails: without playing audio the
    /// levels decay instead.
    pub fn analyze(&mut self) {
        if self.config.render.rainbow {
            self.rainbow_hue = (self.rainbow_hue + GLOBAL_RAINBOW_STEP) % 360.0;
        }
        let Some(buffer) = self.audio.as_ref().filter(|_| self.clock.is_playing()) else {
            self.tracker.decay(&mut self.snapshot);
            return;
        };
        match self
            .graph
            .analyse_at(buffer, self.clock.position(), &mut self.snapshot)
        {
            Ok(()) => self.tracker.process(
                &mut self.snapshot,
                buffer.sample_rate as f32,
                self.graph.fft_size(),
                self.sensitivity,
            ),
            Err(err) => {
                tracing::warn!(%err, "analysis failed, decaying levels");
                self.tracker.decay(&mut self.snapshot);
            }
        }
    }

    /// Runs every enabled module's update against the current snapshot.
    pub fn update_modules(&mut self) {
        self.registry.update_all(&self.snapshot);
    }

    /// Advances the playback clock by one frame of the configured rate.
    pub fn advance_frame(&mut self) {
        self.clock.advance(self.config.render.frame_duration());
    }

    /// Rewinds playback and clears every piece of audio-reactive state.
    pub fn stop(&mut self) {
        self.clock.stop();
        self.tracker.reset();
        self.graph.reset();
        self.snapshot.reset_levels();
        self.registry.reset_animation();
        tracing::debug!("session stopped");
    }

    /// Stops and drops the loaded media and every module.
    pub fn return_to_upload(&mut self) {
        self.stop();
        self.audio = None;
        self.background = None;
        self.clock = PlaybackClock::new(0.0);
        self.registry.clear();
        tracing::debug!("session returned to upload");
    }
}
