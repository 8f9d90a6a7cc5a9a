//! Pluggable visual effects and the registry that drives them.
//!
//! Every module owns its settings (plain serialisable data) and its private
//! animation state. The render loop calls [`VisualModule::update`] on all
//! enabled modules before any [`VisualModule::draw`], so each module sees the
//! same [`AudioSnapshot`] within a frame.

mod neon;
mod particles;
mod registry;
mod shapes;
mod speaker;
mod spectrum;

pub use neon::{FlickerState, NeonKind, NeonModule, NeonSettings};
pub use particles::{Burst, BurstPolicy, Pool, Ripple};
pub use registry::{ModuleRegistry, RegistryEvent, MAX_PER_KIND};
pub use shapes::{shape_path, Shape};
pub use speaker::{ConeSettings, SpeakerModule, SpeakerSettings, VibrationLevel};
pub use spectrum::{SpectrumModule, SpectrumSettings, SpectrumStyle, WindDirection};

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::{
    canvas::{Bitmap, Canvas},
    ui::{ControlTree, ControlValue, Range},
    AudioSnapshot, Result, VisualizerError,
};

/// Slider bounds shared by every module.
pub(crate) const POSITION_RANGE: Range = (0.0, 1.0);
pub(crate) const ROTATION_RANGE: Range = (0.0, std::f32::consts::TAU);
pub(crate) const OPACITY_RANGE: Range = (0.0, 1.0);
pub(crate) const HUE_RANGE: Range = (0.0, 360.0);
pub(crate) const RAINBOW_SPEED_RANGE: Range = (0.1, 5.0);

/// Discriminator of the closed module set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    Speaker,
    Spectrum,
    Neon,
}

impl ModuleKind {
    pub const ALL: [Self; 3] = [Self::Speaker, Self::Spectrum, Self::Neon];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Speaker => "speaker",
            Self::Spectrum => "spectrum",
            Self::Neon => "neon",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Speaker => "Speaker",
            Self::Spectrum => "Spectrum",
            Self::Neon => "Neon",
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ModuleKind {
    type Err = VisualizerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| VisualizerError::msg(format!("unknown module kind `{s}`")))
    }
}

static NEXT_MODULE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique module identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleId(u64);

impl ModuleId {
    pub fn next() -> Self {
        Self(NEXT_MODULE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mod_{}", self.0)
    }
}

/// Module anchor in normalised canvas coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub const CENTER: Self = Self { x: 0.5, y: 0.5 };

    /// Clamps both coordinates into `[0, 1]`.
    pub fn new(x: f32, y: f32) -> Self {
        let clamp = |v: f32| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.5 };
        Self {
            x: clamp(x),
            y: clamp(y),
        }
    }

    pub fn to_pixels(self, width: f32, height: f32) -> (f32, f32) {
        (self.x * width, self.y * height)
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::CENTER
    }
}

/// Capability shared by every visual effect.
pub trait VisualModule: fmt::Debug + Send {
    fn id(&self) -> ModuleId;
    fn kind(&self) -> ModuleKind;

    fn name(&self) -> &str {
        self.kind().display_name()
    }

    fn enabled(&self) -> bool;
    fn set_enabled(&mut self, enabled: bool);
    fn position(&self) -> Position;
    fn set_position(&mut self, position: Position);

    /// Advances animation state from the frame's snapshot.
    fn update(&mut self, audio: &AudioSnapshot);
    /// Paints the current state. Randomised decoration may still advance
    /// the module's generator.
    fn draw(&mut self, canvas: &mut dyn Canvas);

    fn build_settings_ui(&self, tree: &mut ControlTree);
    fn apply_control(&mut self, key: &str, value: ControlValue) -> Result<()>;

    fn settings_json(&self) -> Result<Value>;
    /// Overlays the keys of `patch` onto the current settings. On error the
    /// settings are left untouched.
    fn merge_settings_json(&mut self, patch: &Value) -> Result<()>;

    /// Drops particles and other transient state, keeping settings.
    fn reset_animation(&mut self);

    fn settings_ui(&self) -> ControlTree {
        let mut tree = ControlTree::new();
        self.build_settings_ui(&mut tree);
        tree
    }

    /// Image file this module wants attached, if any.
    fn image_path(&self) -> Option<&str> {
        None
    }

    fn set_image(&mut self, _image: Option<Arc<Bitmap>>) {}

    fn has_image(&self) -> bool {
        false
    }
}

/// Builds a module with fresh default settings.
pub fn create_module(kind: ModuleKind) -> Box<dyn VisualModule> {
    match kind {
        ModuleKind::Speaker => Box::new(SpeakerModule::new()),
        ModuleKind::Spectrum => Box::new(SpectrumModule::new()),
        ModuleKind::Neon => Box::new(NeonModule::new()),
    }
}

/// Identity, visibility and randomness shared by the concrete modules.
#[derive(Debug, Clone)]
pub(crate) struct ModuleCore {
    pub id: ModuleId,
    pub enabled: bool,
    pub position: Position,
    pub rng: fastrand::Rng,
}

impl ModuleCore {
    pub fn new() -> Self {
        let id = ModuleId::next();
        Self {
            id,
            enabled: true,
            position: Position::CENTER,
            rng: fastrand::Rng::with_seed(0x5eed_0000 ^ id.get()),
        }
    }

    pub fn reseed(&mut self, seed: u64) {
        self.rng = fastrand::Rng::with_seed(seed);
    }

    /// Applies the position controls every module exposes.
    pub fn apply_position(&mut self, key: &str, value: &ControlValue) -> Option<Result<()>> {
        let result = match key {
            "x" => value
                .ranged(key, POSITION_RANGE)
                .map(|x| self.position = Position::new(x, self.position.y)),
            "y" => value
                .ranged(key, POSITION_RANGE)
                .map(|y| self.position = Position::new(self.position.x, y)),
            _ => return None,
        };
        Some(result)
    }

    pub fn position_controls(&self, tree: &mut ControlTree) {
        tree.slider("x", "X", POSITION_RANGE, 0.01, self.position.x)
            .slider("y", "Y", POSITION_RANGE, 0.01, self.position.y);
    }
}

/// Key-wise overlay of a JSON object onto serialisable settings. The value
/// is only replaced once the merged document deserialises and passes
/// `validate`.
pub(crate) fn merge_json<T, F>(settings: &mut T, patch: &Value, validate: F) -> Result<()>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce(&T) -> Result<()>,
{
    let Value::Object(patch) = patch else {
        return Err(VisualizerError::InvalidInput("settings must be a JSON object"));
    };
    let mut merged = serde_json::to_value(&*settings)?;
    if let Value::Object(target) = &mut merged {
        for (key, value) in patch {
            target.insert(key.clone(), value.clone());
        }
    }
    let merged: T = serde_json::from_value(merged)?;
    validate(&merged)?;
    *settings = merged;
    Ok(())
}

/// Hue advance used by the rainbow toggles.
pub(crate) fn cycle_hue(hue: f32, speed: f32) -> f32 {
    (hue + speed).rem_euclid(360.0)
}

pub(crate) fn random_angle(rng: &mut fastrand::Rng) -> f32 {
    rng.f32() * std::f32::consts::TAU
}

/// Uniform sample in `[-0.5, 0.5)`.
pub(crate) fn centered(rng: &mut fastrand::Rng) -> f32 {
    rng.f32() - 0.5
}
