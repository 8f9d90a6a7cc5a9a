//! Bass-driven speaker rings with nested cones and the cyber donut HUD.

use std::f32::consts::{FRAC_PI_2, TAU};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    analysis::Channel,
    canvas::{Canvas, Color, Paint, Path, RadialGradient, Rect, TextStyle},
    ui::{check_range, Choice, ControlTree, ControlValue, Range},
    AudioSnapshot, Result, VisualizerError,
};

use super::{
    centered, cycle_hue, merge_json, random_angle, shape_path, BurstPolicy, ModuleCore, ModuleId,
    ModuleKind, Pool, Position, Ripple, Shape, VisualModule, HUE_RANGE, OPACITY_RANGE,
    RAINBOW_SPEED_RANGE, ROTATION_RANGE,
};

const SPRING_GAIN: f32 = 50.0;
const SPRING_STIFFNESS: f32 = 0.25;
const SPRING_DAMPING: f32 = 0.7;
const CONE_BLEND: f32 = 0.4;
const RIPPLE_CAP: usize = 20;
const BEAT_PARTICLE_CAP: usize = 600;
const HUD_PARTICLE_CAP: usize = 200;
const RIPPLE_POLICY: BurstPolicy = BurstPolicy::new(0.2, 0.12);
/// Canvas size assumed for beat bursts before the first draw.
const DEFAULT_SURFACE: (f32, f32) = (1280.0, 720.0);

const SIZE_RANGE: Range = (0.05, 0.6);
const SCALE_RANGE: Range = (0.3, 3.0);
const ROTATION_SPEED_RANGE: Range = (0.0, 5.0);
const SATURATION_RANGE: Range = (0.0, 100.0);
const GLOW_RANGE: Range = (0.0, 3.0);
const ORBIT_SQUARE_MAX_RANGE: Range = (0.0, 2000.0);
const DONUT_ROTATION_SPEED_RANGE: Range = (0.0, 0.05);
const DONUT_RING_COUNT_RANGE: Range = (1.0, 3.0);
const GAIN_RANGE: Range = (0.0, 3.0);
const CONE_SIZE_RANGE: Range = (0.1, 1.0);
const CONE_STRETCH_RANGE: Range = (0.0, 1.0);
const CONE_JITTER_RANGE: Range = (0.0, 2.0);

const HUD_OUTER_TEXT: &str = "DATA ANALYTICS // NETWORK LINK // R.I.N.G. V7.1";
const HUD_INNER_TEXT: &str =
    "SYSTEM STATUS: ACTIVE // NODE 07A // ENCRYPTION: LEVEL 9 // SYNCING...";

/// Cone vibration strength; serialised as its level index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum VibrationLevel {
    None,
    Weak,
    #[default]
    Medium,
    Strong,
    Extreme,
}

impl VibrationLevel {
    pub fn multiplier(self) -> f32 {
        match self {
            Self::None => 0.0,
            Self::Weak => 0.3,
            Self::Medium => 0.7,
            Self::Strong => 1.2,
            Self::Extreme => 2.5,
        }
    }
}

impl TryFrom<u8> for VibrationLevel {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        Self::ALL
            .get(usize::from(value))
            .copied()
            .ok_or_else(|| format!("vibration level {value} out of range"))
    }
}

impl From<VibrationLevel> for u8 {
    fn from(value: VibrationLevel) -> Self {
        value as u8
    }
}

impl Choice for VibrationLevel {
    const ALL: &'static [Self] = &[Self::None, Self::Weak, Self::Medium, Self::Strong, Self::Extreme];

    fn name(self) -> &'static str {
        match self {
            Self::None => "0",
            Self::Weak => "1",
            Self::Medium => "2",
            Self::Strong => "3",
            Self::Extreme => "4",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Weak => "Weak",
            Self::Medium => "Medium",
            Self::Strong => "Strong",
            Self::Extreme => "Extreme",
        }
    }
}

impl Choice for Channel {
    const ALL: &'static [Self] = &[Self::Mix, Self::Left, Self::Right];

    fn name(self) -> &'static str {
        match self {
            Self::Mix => "both",
            Self::Left => "left",
            Self::Right => "right",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Mix => "Mix",
            Self::Left => "Left channel",
            Self::Right => "Right channel",
        }
    }
}

/// One nested cone ring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConeSettings {
    pub enabled: bool,
    /// Radius relative to the speaker ring.
    pub size: f32,
    /// How far the cone swells with its vibration offset.
    pub stretch: f32,
    pub jitter: f32,
    pub sensitivity: f32,
    pub opacity: f32,
}

impl Default for ConeSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            size: 0.8,
            stretch: 0.15,
            jitter: 0.5,
            sensitivity: 1.0,
            opacity: 0.6,
        }
    }
}

impl ConeSettings {
    fn validate(&self) -> Result<()> {
        check_range("size", self.size, CONE_SIZE_RANGE)?;
        check_range("stretch", self.stretch, CONE_STRETCH_RANGE)?;
        check_range("jitter", self.jitter, CONE_JITTER_RANGE)?;
        check_range("sensitivity", self.sensitivity, GAIN_RANGE)?;
        check_range("opacity", self.opacity, OPACITY_RANGE)
    }

    fn layer(size: f32, stretch: f32, opacity: f32, enabled: bool) -> Self {
        Self {
            enabled,
            size,
            stretch,
            opacity,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SpeakerSettings {
    pub shape: Shape,
    /// Ring radius as a fraction of the shorter canvas side.
    pub size: f32,
    pub scale_x: f32,
    pub scale_y: f32,
    pub rotation: f32,
    pub rotation_speed: f32,
    pub rainbow: bool,
    pub rainbow_speed: f32,
    pub hue: f32,
    pub saturation: f32,
    pub stereo_mode: Channel,
    pub cones: [ConeSettings; 4],
    pub vibration_sensitivity: VibrationLevel,
    pub glow: bool,
    pub glow_intensity: f32,
    pub orbit_squares: bool,
    pub orbit_square_max: usize,
    pub ring_ripple: bool,
    pub donut_rotation_speed: f32,
    pub donut_pulse: bool,
    pub donut_wave_squares: bool,
    pub donut_text_enabled: bool,
    /// Segmented rings drawn in donut mode, outermost first.
    pub donut_ring_count: u8,
    /// Gain of the frequency bars around the donut's middle ring.
    pub donut_bar_sensitivity: f32,
}

impl SpeakerSettings {
    /// Checks every numeric field, cones included, against its slider range.
    pub fn validate(&self) -> Result<()> {
        check_range("size", self.size, SIZE_RANGE)?;
        check_range("scaleX", self.scale_x, SCALE_RANGE)?;
        check_range("scaleY", self.scale_y, SCALE_RANGE)?;
        check_range("rotation", self.rotation, ROTATION_RANGE)?;
        check_range("rotationSpeed", self.rotation_speed, ROTATION_SPEED_RANGE)?;
        check_range("rainbowSpeed", self.rainbow_speed, RAINBOW_SPEED_RANGE)?;
        check_range("hue", self.hue, HUE_RANGE)?;
        check_range("saturation", self.saturation, SATURATION_RANGE)?;
        check_range("glowIntensity", self.glow_intensity, GLOW_RANGE)?;
        check_range("orbitSquareMax", self.orbit_square_max as f32, ORBIT_SQUARE_MAX_RANGE)?;
        check_range("donutRotationSpeed", self.donut_rotation_speed, DONUT_ROTATION_SPEED_RANGE)?;
        check_range("donutRingCount", f32::from(self.donut_ring_count), DONUT_RING_COUNT_RANGE)?;
        check_range("donutBarSensitivity", self.donut_bar_sensitivity, GAIN_RANGE)?;
        self.cones.iter().try_for_each(ConeSettings::validate)
    }
}

impl Default for SpeakerSettings {
    fn default() -> Self {
        Self {
            shape: Shape::Circle,
            size: 0.25,
            scale_x: 1.0,
            scale_y: 1.0,
            rotation: 0.0,
            rotation_speed: 0.0,
            rainbow: true,
            rainbow_speed: 0.5,
            hue: 270.0,
            saturation: 100.0,
            stereo_mode: Channel::Mix,
            cones: [
                ConeSettings::layer(0.82, 0.55, 0.85, true),
                ConeSettings::layer(0.5, 0.55, 0.75, true),
                ConeSettings::layer(0.35, 0.15, 0.6, false),
                ConeSettings::layer(0.2, 0.15, 0.9, false),
            ],
            vibration_sensitivity: VibrationLevel::Medium,
            glow: true,
            glow_intensity: 1.0,
            orbit_squares: true,
            orbit_square_max: 500,
            ring_ripple: true,
            donut_rotation_speed: 0.008,
            donut_pulse: true,
            donut_wave_squares: true,
            donut_text_enabled: true,
            donut_ring_count: 3,
            donut_bar_sensitivity: 1.0,
        }
    }
}

#[derive(Debug, Clone)]
struct OrbitSquare {
    angle: f32,
    orbit_speed: f32,
    dist: f32,
    out_speed: f32,
    size: f32,
    rotation: f32,
    rot_speed: f32,
    life: f32,
    decay: f32,
    hue: f32,
    twinkle_phase: f32,
    twinkle_speed: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParticleStyle {
    Dot,
    Spark,
}

/// Beat burst particle in canvas pixels; it keeps flying where it was
/// spawned when the speaker moves.
#[derive(Debug, Clone)]
struct BeatParticle {
    x: f32,
    y: f32,
    vx: f32,
    vy: f32,
    size: f32,
    life: f32,
    decay: f32,
    hue: f32,
    style: ParticleStyle,
}

#[derive(Debug, Clone)]
struct HudParticle {
    angle: f32,
    dist: f32,
    speed: f32,
    size: f32,
    life: f32,
    decay: f32,
    hue: f32,
    from_inner: bool,
}

/// Pulsing speaker ring.
#[derive(Debug, Clone)]
pub struct SpeakerModule {
    core: ModuleCore,
    settings: SpeakerSettings,
    spring_offset: f32,
    spring_velocity: f32,
    current_rotation: f32,
    cone_offsets: [f32; 4],
    donut_angles: [f32; 3],
    orbit: Pool<OrbitSquare>,
    ripples: Pool<Ripple>,
    beat_particles: Pool<BeatParticle>,
    hud_particles: Pool<HudParticle>,
    spectrum: Vec<u8>,
    mix_bass: f32,
    /// Canvas size seen by the last draw.
    surface: (f32, f32),
}

impl SpeakerModule {
    pub fn new() -> Self {
        Self::with_settings(SpeakerSettings::default())
    }

    pub fn with_settings(settings: SpeakerSettings) -> Self {
        Self {
            core: ModuleCore::new(),
            current_rotation: settings.rotation,
            orbit: Pool::new(settings.orbit_square_max),
            settings,
            spring_offset: 0.0,
            spring_velocity: 0.0,
            cone_offsets: [0.0; 4],
            donut_angles: [0.0; 3],
            ripples: Pool::new(RIPPLE_CAP),
            beat_particles: Pool::new(BEAT_PARTICLE_CAP),
            hud_particles: Pool::new(HUD_PARTICLE_CAP),
            spectrum: Vec::new(),
            mix_bass: 0.0,
            surface: DEFAULT_SURFACE,
        }
    }

    pub fn settings(&self) -> &SpeakerSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut SpeakerSettings {
        &mut self.settings
    }

    pub fn reseed(&mut self, seed: u64) {
        self.core.reseed(seed);
    }

    /// Spring-damped radius offset in pixels.
    pub fn spring_offset(&self) -> f32 {
        self.spring_offset
    }

    pub fn spring_velocity(&self) -> f32 {
        self.spring_velocity
    }

    pub fn cone_offsets(&self) -> [f32; 4] {
        self.cone_offsets
    }

    /// Live entity counts: orbit squares, ripples, beat particles, HUD
    /// particles.
    pub fn particle_counts(&self) -> [usize; 4] {
        [
            self.orbit.len(),
            self.ripples.len(),
            self.beat_particles.len(),
            self.hud_particles.len(),
        ]
    }

    fn base_radius(&self, extent: f32) -> f32 {
        extent * self.settings.size + self.spring_offset
    }

    fn step_spring(&mut self, bass: f32) {
        let target = bass * SPRING_GAIN;
        let force = (target - self.spring_offset) * SPRING_STIFFNESS;
        self.spring_velocity = (self.spring_velocity + force) * SPRING_DAMPING;
        self.spring_offset += self.spring_velocity;
    }

    fn spawn_orbit_squares(&mut self, bass: f32) {
        let rng = &mut self.core.rng;
        let freq = &self.spectrum;
        let count = (1.0 + bass * 4.0).floor() as usize;
        for _ in 0..count {
            let angle = random_angle(rng);
            let freq_value = if freq.is_empty() {
                0.5
            } else {
                let index = ((rng.f32() * freq.len() as f32 * 0.6) as usize).min(freq.len() - 1);
                f32::from(freq[index]) / 255.0
            };
            self.orbit.push(OrbitSquare {
                angle,
                orbit_speed: 0.005 + rng.f32() * 0.02 + bass * 0.01,
                dist: 0.0,
                out_speed: 0.5 + freq_value * 2.5 + bass * 1.5,
                size: 2.0 + freq_value * 4.0 + bass * 3.0,
                rotation: random_angle(rng),
                rot_speed: centered(rng) * 0.3,
                life: 1.0,
                decay: 0.003 + rng.f32() * 0.004,
                hue: self.settings.hue + centered(rng) * 80.0,
                twinkle_phase: random_angle(rng),
                twinkle_speed: 0.1 + rng.f32() * 0.2,
            });
        }
    }

    fn step_ripples(&mut self, beat: bool, bass: f32) {
        if self.settings.ring_ripple {
            let hue = self.settings.hue;
            match RIPPLE_POLICY.check(beat, bass, &mut self.core.rng) {
                Some(super::Burst::Beat) => self.ripples.push(Ripple {
                    radius: 0.0,
                    speed: 8.0 + bass * 10.0,
                    life: 1.0,
                    decay: 0.006 + bass * 0.002,
                    line_width: 2.5 + bass * 3.0,
                    hue,
                }),
                Some(super::Burst::Shimmer) => self.ripples.push(Ripple {
                    radius: 0.0,
                    speed: 4.0 + bass * 6.0,
                    life: 0.7,
                    decay: 0.010 + bass * 0.003,
                    line_width: 1.5 + bass * 2.0,
                    hue,
                }),
                None => {}
            }
        }
        self.ripples.retain_mut(|r| r.step(0.985));
    }

    fn step_cones(&mut self, bass: f32) {
        let multiplier = self.settings.vibration_sensitivity.multiplier();
        for (cone, offset) in self.settings.cones.iter().zip(self.cone_offsets.iter_mut()) {
            if !cone.enabled {
                continue;
            }
            let jitter = if cone.jitter > 0.0 {
                centered(&mut self.core.rng) * cone.jitter * 0.02
            } else {
                0.0
            };
            let vibration = bass * cone.sensitivity * multiplier + jitter;
            *offset += (vibration - *offset) * CONE_BLEND;
        }
    }

    fn step_donut(&mut self, beat: bool, bass: f32) {
        let speed = self.settings.donut_rotation_speed;
        self.donut_angles[0] += speed;
        self.donut_angles[1] -= speed * 0.7;
        self.donut_angles[2] += speed * 1.5;

        if beat && self.settings.donut_wave_squares {
            let rng = &mut self.core.rng;
            let count = 4 + (bass * 8.0).floor() as usize;
            for _ in 0..count {
                self.hud_particles.push(HudParticle {
                    angle: random_angle(rng),
                    dist: 0.0,
                    speed: 1.2 + rng.f32() * 2.5 + bass * 2.0,
                    size: 1.5 + rng.f32() * 3.0,
                    life: 1.0,
                    decay: 0.01 + rng.f32() * 0.015,
                    hue: self.settings.hue + if rng.bool() { 0.0 } else { 180.0 },
                    from_inner: rng.bool(),
                });
            }
        }
        self.hud_particles.retain_mut(|p| {
            p.dist += p.speed;
            p.life -= p.decay;
            p.life > 0.0
        });
    }

    fn step_beat_particles(&mut self, beat: bool) {
        if beat {
            let bass = self.mix_bass;
            let (w, h) = self.surface;
            let edge = self.base_radius(w.min(h));
            let (cx, cy) = self.core.position.to_pixels(w, h);
            let rng = &mut self.core.rng;
            let count = 15 + (bass * 25.0).floor() as usize;
            for _ in 0..count {
                let angle = random_angle(rng);
                let speed = 2.0 + rng.f32() * 5.0 * bass;
                let (sin, cos) = angle.sin_cos();
                self.beat_particles.push(BeatParticle {
                    x: cx + cos * edge,
                    y: cy + sin * edge,
                    vx: cos * speed,
                    vy: sin * speed,
                    size: 1.5 + rng.f32() * 3.0,
                    life: 1.0,
                    decay: 0.010 + rng.f32() * 0.025,
                    hue: self.settings.hue + centered(rng) * 60.0,
                    style: if rng.bool() {
                        ParticleStyle::Dot
                    } else {
                        ParticleStyle::Spark
                    },
                });
            }
        }
        self.beat_particles.retain_mut(|p| {
            p.x += p.vx;
            p.y += p.vy;
            p.vx *= 0.97;
            p.vy *= 0.97;
            p.life -= p.decay;
            p.life > 0.0
        });
    }

    fn draw_standard(&self, canvas: &mut dyn Canvas, radius: f32, hue: f32) {
        let s = &self.settings;

        if s.glow {
            let glow_radius = radius * 1.3;
            let gradient = RadialGradient::new(0.0, 0.0, radius * 0.5, glow_radius)
                .stop(0.0, Color::hsla(hue, 100.0, 50.0, 0.08 * s.glow_intensity))
                .stop(1.0, Color::hsla(hue, 100.0, 30.0, 0.0));
            let mut disc = Path::new();
            disc.circle(0.0, 0.0, glow_radius);
            canvas.fill_path(&disc, &gradient.into());
        }

        canvas.set_shadow(Color::hsla(hue, 100.0, 60.0, 0.5), 15.0 * s.glow_intensity);
        canvas.stroke_path(
            &shape_path(s.shape, radius, 0.0),
            &Color::hsla(hue, s.saturation, 70.0, 0.9).into(),
            3.0 + self.spring_offset * 0.05,
        );
        canvas.clear_shadow();

        for (i, (cone, offset)) in s.cones.iter().zip(self.cone_offsets).enumerate() {
            if !cone.enabled {
                continue;
            }
            let cone_radius = radius * cone.size * (1.0 + offset * cone.stretch);
            let cone_hue = if s.rainbow {
                (hue + i as f32 * 40.0) % 360.0
            } else {
                s.hue
            };
            let outline = shape_path(s.shape, cone_radius, 0.0);

            canvas.save();
            let fill_alpha = if s.rainbow { 0.06 } else { 0.05 };
            let gradient = RadialGradient::new(0.0, 0.0, cone_radius * 0.5, cone_radius)
                .stop(0.0, Color::hsla(cone_hue, 100.0, 60.0, fill_alpha * 2.0))
                .stop(1.0, Color::hsla(cone_hue, 100.0, 40.0, 0.0));
            canvas.set_global_alpha(cone.opacity);
            canvas.fill_path(&outline, &gradient.into());

            canvas.set_global_alpha(1.0);
            canvas.set_shadow(Color::hsla(cone_hue, 100.0, 65.0, 0.6), 12.0 * s.glow_intensity);
            let width = if i == 0 { 3.5 } else { 2.5 };
            canvas.stroke_path(
                &outline,
                &Color::hsla(cone_hue, s.saturation, 72.0, cone.opacity).into(),
                width,
            );
            canvas.restore();
        }

        let mut dot = Path::new();
        dot.circle(0.0, 0.0, radius * 0.08);
        canvas.fill_path(&dot, &Color::hsla(hue, 100.0, 80.0, 0.8).into());
    }

    fn draw_donut(&self, canvas: &mut dyn Canvas, radius: f32, hue: f32) {
        let s = &self.settings;
        let bass = self.mix_bass;
        let [a1, a2, a3] = self.donut_angles;
        let pulse = if s.donut_pulse {
            1.0 + self.spring_offset * 0.002
        } else {
            1.0
        };
        let accent = (hue + 150.0) % 360.0;

        canvas.save();
        canvas.scale(pulse, pulse);

        let r1 = radius;
        let r2 = radius * 0.78;
        let r3 = radius * 0.55;
        let rc = radius * 0.22;
        let rings = s.donut_ring_count.clamp(1, 3);

        let ambient = RadialGradient::new(0.0, 0.0, rc, r1)
            .stop(0.0, Color::hsla(hue, 100.0, 60.0, 0.12 + bass * 0.1))
            .stop(0.5, Color::hsla((hue + 30.0) % 360.0, 100.0, 50.0, 0.04))
            .stop(1.0, Color::TRANSPARENT);
        let mut disc = Path::new();
        disc.circle(0.0, 0.0, r1);
        canvas.fill_path(&disc, &ambient.into());

        segmented_ring(
            canvas,
            SegmentedRing {
                radius: r1,
                thickness: 4.0 + bass * 4.0,
                segments: 6,
                gap: 0.06,
                angle: a1,
            },
            Color::hsla(hue, 100.0, 75.0, 0.9),
            Color::hsla(hue, 100.0, 65.0, 0.8),
            20.0 * s.glow_intensity,
        );
        let mut band = Path::new();
        band.circle(0.0, 0.0, r1);
        canvas.stroke_path(&band, &Color::hsla(hue, 80.0, 50.0, 0.15).into(), 12.0 + bass * 6.0);

        if rings >= 2 {
            segmented_ring(
                canvas,
                SegmentedRing {
                    radius: r2,
                    thickness: 2.5,
                    segments: 12,
                    gap: 0.3,
                    angle: a2,
                },
                Color::hsla(accent, 100.0, 70.0, 0.85),
                Color::hsla(accent, 100.0, 60.0, 0.6),
                12.0 * s.glow_intensity,
            );
        }

        if !self.spectrum.is_empty() {
            self.draw_donut_bars(canvas, radius, r2, hue, a2);
        }

        if rings >= 3 {
            segmented_ring(
                canvas,
                SegmentedRing {
                    radius: r3,
                    thickness: 2.0,
                    segments: 24,
                    gap: 0.35,
                    angle: a3,
                },
                Color::hsla(hue, 60.0, 90.0, 0.6),
                Color::hsla(hue, 100.0, 80.0, 0.4),
                8.0 * s.glow_intensity,
            );
        }

        draw_ticks(canvas, r1, hue, bass, a1);

        if s.donut_text_enabled {
            let outer = TextStyle::monospace((radius * 0.045).max(8.0)).centered();
            let outer_paint: Paint = Color::hsla(hue, 80.0, 80.0, 0.55).into();
            ring_text(canvas, HUD_OUTER_TEXT, r1 + 16.0, a1 * 0.3, &outer, &outer_paint);

            let inner = TextStyle::monospace((radius * 0.038).max(7.0)).centered();
            let inner_paint: Paint = Color::hsla(accent, 80.0, 75.0, 0.45).into();
            ring_text(canvas, HUD_INNER_TEXT, r1 - 22.0, -a1 * 0.2, &inner, &inner_paint);
        }

        let mut mini = Path::new();
        mini.circle(0.0, 0.0, rc);
        canvas.set_shadow(Color::hsla(hue, 100.0, 65.0, 0.5), 10.0);
        canvas.stroke_path(&mini, &Color::hsla(hue, 100.0, 75.0, 0.7).into(), 3.0);
        canvas.clear_shadow();

        segmented_ring(
            canvas,
            SegmentedRing {
                radius: rc * 0.6,
                thickness: 2.0,
                segments: 4,
                gap: 0.2,
                angle: -a3 * 2.0,
            },
            Color::hsla(accent, 100.0, 70.0, 0.8),
            Color::hsla(accent, 100.0, 60.0, 0.5),
            8.0,
        );

        let dot_radius = rc * 0.25 * (1.0 + bass * 0.5);
        let core_glow = RadialGradient::new(0.0, 0.0, 0.0, dot_radius)
            .stop(0.0, Color::hsla(hue, 100.0, 95.0, 0.9))
            .stop(1.0, Color::hsla(hue, 100.0, 60.0, 0.0));
        let mut dot = Path::new();
        dot.circle(0.0, 0.0, dot_radius);
        canvas.fill_path(&dot, &core_glow.into());

        for p in &self.hud_particles {
            let base = if p.from_inner { rc } else { r2 };
            let (sin, cos) = p.angle.sin_cos();
            let mut spot = Path::new();
            spot.circle(cos * (base + p.dist), sin * (base + p.dist), p.size * p.life);
            canvas.set_shadow(Color::hsla(p.hue, 100.0, 65.0, p.life * 0.5), 6.0);
            canvas.fill_path(&spot, &Color::hsla(p.hue, 100.0, 75.0, p.life * 0.8).into());
        }
        canvas.clear_shadow();

        canvas.restore();
    }

    fn draw_donut_bars(&self, canvas: &mut dyn Canvas, radius: f32, ring: f32, hue: f32, angle: f32) {
        const BARS: usize = 64;
        let freq = &self.spectrum;
        canvas.save();
        canvas.rotate(angle);
        for i in 0..BARS {
            let index = i * freq.len() / BARS;
            let value = f32::from(freq[index]) / 255.0 * self.settings.donut_bar_sensitivity;
            if value < 0.05 {
                continue;
            }
            let length = value * radius * 0.18;
            let bar_hue = (hue + i as f32 * (360.0 / BARS as f32)) % 360.0;
            canvas.save();
            canvas.rotate(i as f32 / BARS as f32 * TAU);
            canvas.set_shadow(Color::hsla(bar_hue, 100.0, 60.0, value * 0.4), 6.0);
            canvas.fill_rect(
                Rect::new(-1.0, -(ring + length), 2.0, length),
                &Color::hsla(bar_hue, 100.0, 70.0, value * 0.7).into(),
            );
            canvas.restore();
        }
        canvas.restore();
    }

    fn draw_beat_particles(&self, canvas: &mut dyn Canvas) {
        for p in &self.beat_particles {
            let alpha = p.life * 0.85;
            match p.style {
                ParticleStyle::Dot => {
                    let mut spot = Path::new();
                    spot.circle(p.x, p.y, p.size * p.life);
                    canvas.set_shadow(Color::hsla(p.hue, 100.0, 70.0, alpha * 0.5), 8.0);
                    canvas.fill_path(&spot, &Color::hsla(p.hue, 100.0, 70.0, alpha).into());
                }
                ParticleStyle::Spark => {
                    let length = p.size * 3.0 * p.life;
                    let heading = p.vy.atan2(p.vx);
                    let mut trail = Path::new();
                    trail
                        .move_to(p.x, p.y)
                        .line_to(p.x - heading.cos() * length, p.y - heading.sin() * length);
                    canvas.set_shadow(Color::hsla(p.hue, 100.0, 80.0, alpha * 0.5), 6.0);
                    canvas.stroke_path(&trail, &Color::hsla(p.hue, 100.0, 80.0, alpha).into(), p.size * 0.5);
                }
            }
        }
        canvas.clear_shadow();
    }

    fn draw_orbit_squares(&self, canvas: &mut dyn Canvas) {
        for sq in &self.orbit {
            let (sin, cos) = sq.angle.sin_cos();
            let twinkle = 0.5 + 0.5 * sq.twinkle_phase.sin();
            let alpha = sq.life * twinkle;
            canvas.save();
            canvas.translate(cos * sq.dist, sin * sq.dist);
            canvas.rotate(sq.rotation);
            canvas.set_shadow(Color::hsla(sq.hue, 100.0, 60.0, alpha * 0.6), 8.0 + sq.size);
            canvas.fill_rect(
                Rect::centered(0.0, 0.0, sq.size),
                &Color::hsla(sq.hue, 100.0, 75.0, alpha * 0.9).into(),
            );
            canvas.restore();
        }
    }

    fn draw_ripples(&self, canvas: &mut dyn Canvas) {
        for ripple in &self.ripples {
            let mut ring = Path::new();
            ring.circle(0.0, 0.0, ripple.radius);
            canvas.set_shadow(
                Color::hsla(ripple.hue, 100.0, 65.0, ripple.life * 0.5),
                12.0 * self.settings.glow_intensity,
            );
            canvas.stroke_path(
                &ring,
                &Color::hsla(ripple.hue, 100.0, 72.0, ripple.life * 0.85).into(),
                ripple.line_width,
            );
        }
        canvas.clear_shadow();
    }

    fn apply_cone_control(&mut self, key: &str, field: &str, value: &ControlValue) -> Result<()> {
        let (index, field) = field
            .split_once('.')
            .ok_or_else(|| VisualizerError::unknown_control(key))?;
        let cone = index
            .parse::<usize>()
            .ok()
            .and_then(|i| self.settings.cones.get_mut(i))
            .ok_or_else(|| VisualizerError::unknown_control(key))?;
        match field {
            "enabled" => cone.enabled = value.boolean(key)?,
            "size" => cone.size = value.ranged(key, CONE_SIZE_RANGE)?,
            "stretch" => cone.stretch = value.ranged(key, CONE_STRETCH_RANGE)?,
            "jitter" => cone.jitter = value.ranged(key, CONE_JITTER_RANGE)?,
            "sensitivity" => cone.sensitivity = value.ranged(key, GAIN_RANGE)?,
            "opacity" => cone.opacity = value.ranged(key, OPACITY_RANGE)?,
            _ => return Err(VisualizerError::unknown_control(key)),
        }
        Ok(())
    }
}

impl Default for SpeakerModule {
    fn default() -> Self {
        Self::new()
    }
}

struct SegmentedRing {
    radius: f32,
    thickness: f32,
    segments: usize,
    /// Fraction of each segment slot left empty.
    gap: f32,
    angle: f32,
}

fn segmented_ring(canvas: &mut dyn Canvas, ring: SegmentedRing, color: Color, glow: Color, blur: f32) {
    let slot = TAU / ring.segments as f32;
    let arc = slot * (1.0 - ring.gap);
    canvas.set_shadow(glow, blur);
    let paint = Paint::Solid(color);
    for i in 0..ring.segments {
        let start = ring.angle + i as f32 * slot;
        let mut path = Path::new();
        path.move_to(ring.radius * start.cos(), ring.radius * start.sin())
            .arc(0.0, 0.0, ring.radius, start, start + arc);
        canvas.stroke_path(&path, &paint, ring.thickness);
    }
    canvas.clear_shadow();
}

fn draw_ticks(canvas: &mut dyn Canvas, radius: f32, hue: f32, bass: f32, angle: f32) {
    const TICKS: usize = 72;
    canvas.save();
    canvas.rotate(angle);
    for i in 0..TICKS {
        let major = i % 6 == 0;
        let length = if major { 10.0 } else { 5.0 };
        let alpha = if major { 0.8 + bass * 0.2 } else { 0.3 };
        canvas.save();
        canvas.rotate(i as f32 / TICKS as f32 * TAU);
        if major {
            canvas.set_shadow(Color::hsla(hue, 100.0, 80.0, 0.5), 6.0);
        } else {
            canvas.clear_shadow();
        }
        let mut tick = Path::new();
        tick.move_to(0.0, -(radius - 6.0))
            .line_to(0.0, -(radius - 6.0 - length));
        let color = if major {
            Color::hsla(hue, 100.0, 90.0, alpha)
        } else {
            Color::hsla(hue, 60.0, 70.0, alpha)
        };
        canvas.stroke_path(&tick, &color.into(), if major { 2.0 } else { 1.0 });
        canvas.restore();
    }
    canvas.restore();
}

/// Lays `text` out one glyph at a time around a circle.
fn ring_text(canvas: &mut dyn Canvas, text: &str, radius: f32, phase: f32, style: &TextStyle, paint: &Paint) {
    let count = text.chars().count();
    if count == 0 {
        return;
    }
    let step = TAU / count as f32;
    let mut buf = [0u8; 4];
    for (i, ch) in text.chars().enumerate() {
        canvas.save();
        canvas.rotate(phase + i as f32 * step - FRAC_PI_2);
        canvas.translate(0.0, -radius);
        canvas.rotate(FRAC_PI_2);
        canvas.fill_text(ch.encode_utf8(&mut buf), 0.0, 0.0, style, paint);
        canvas.restore();
    }
}

impl VisualModule for SpeakerModule {
    fn id(&self) -> ModuleId {
        self.core.id
    }

    fn kind(&self) -> ModuleKind {
        ModuleKind::Speaker
    }

    fn enabled(&self) -> bool {
        self.core.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.core.enabled = enabled;
    }

    fn position(&self) -> Position {
        self.core.position
    }

    fn set_position(&mut self, position: Position) {
        self.core.position = Position::new(position.x, position.y);
    }

    fn update(&mut self, audio: &AudioSnapshot) {
        let bass = audio.bass_for(self.settings.stereo_mode);
        let beat = audio.beat_detected;
        self.mix_bass = audio.bass_level;
        self.spectrum.clear();
        self.spectrum.extend_from_slice(&audio.frequency_mix);

        self.step_spring(bass);

        if self.settings.orbit_squares && bass > 0.0 {
            self.spawn_orbit_squares(bass);
        }
        self.orbit.retain_mut(|sq| {
            sq.angle += sq.orbit_speed;
            sq.dist += sq.out_speed;
            sq.out_speed *= 0.998;
            sq.rotation += sq.rot_speed;
            sq.twinkle_phase += sq.twinkle_speed;
            sq.life -= sq.decay;
            sq.size *= 0.9995;
            sq.life > 0.0
        });
        self.orbit.set_cap(self.settings.orbit_square_max);

        self.step_ripples(beat, bass);

        self.current_rotation += self.settings.rotation_speed * 0.02;
        if self.settings.rainbow {
            self.settings.hue = cycle_hue(self.settings.hue, self.settings.rainbow_speed);
        }

        self.step_cones(bass);

        if self.settings.shape == Shape::Donut {
            self.step_donut(beat, bass);
        }

        self.step_beat_particles(beat);
    }

    fn draw(&mut self, canvas: &mut dyn Canvas) {
        let (w, h) = (canvas.width() as f32, canvas.height() as f32);
        let (cx, cy) = self.core.position.to_pixels(w, h);
        self.surface = (w, h);
        let radius = self.base_radius(w.min(h));
        let hue = self.settings.hue;

        canvas.save();
        canvas.translate(cx, cy);

        canvas.save();
        canvas.rotate(self.current_rotation);
        canvas.scale(self.settings.scale_x, self.settings.scale_y);
        if self.settings.shape == Shape::Donut {
            self.draw_donut(canvas, radius, hue);
        } else {
            self.draw_standard(canvas, radius, hue);
        }
        canvas.restore();

        canvas.save();
        canvas.translate(-cx, -cy);
        self.draw_beat_particles(canvas);
        canvas.restore();
        if self.settings.orbit_squares {
            self.draw_orbit_squares(canvas);
        }
        if self.settings.ring_ripple && !self.ripples.is_empty() {
            self.draw_ripples(canvas);
        }

        canvas.restore();
    }

    fn build_settings_ui(&self, tree: &mut ControlTree) {
        let s = &self.settings;
        tree.choice("shape", "Shape", s.shape)
            .slider("size", "Size", SIZE_RANGE, 0.01, s.size);
        self.core.position_controls(tree);
        tree.slider("scaleX", "Stretch X", SCALE_RANGE, 0.05, s.scale_x)
            .slider("scaleY", "Stretch Y", SCALE_RANGE, 0.05, s.scale_y)
            .slider("rotation", "Rotation", ROTATION_RANGE, 0.05, s.rotation)
            .slider("rotationSpeed", "Rotation speed", ROTATION_SPEED_RANGE, 0.1, s.rotation_speed)
            .choice("vibrationSensitivity", "Vibration", s.vibration_sensitivity)
            .choice("stereoMode", "Channel", s.stereo_mode)
            .toggle("rainbow", "Rainbow", s.rainbow)
            .slider("rainbowSpeed", "Rainbow speed", RAINBOW_SPEED_RANGE, 0.1, s.rainbow_speed)
            .slider("hue", "Hue", HUE_RANGE, 1.0, s.hue)
            .toggle("glow", "Glow", s.glow)
            .slider("glowIntensity", "Glow intensity", GLOW_RANGE, 0.1, s.glow_intensity)
            .toggle("orbitSquares", "Orbit squares", s.orbit_squares)
            .toggle("ringRipple", "Ring ripples", s.ring_ripple);

        tree.section("Cone layers");
        for (i, cone) in s.cones.iter().enumerate() {
            let key = |field: &str| format!("cones.{i}.{field}");
            tree.toggle(&key("enabled"), &format!("Cone {}", i + 1), cone.enabled)
                .slider(&key("size"), "Size", CONE_SIZE_RANGE, 0.05, cone.size)
                .slider(&key("stretch"), "Stretch", CONE_STRETCH_RANGE, 0.05, cone.stretch)
                .slider(&key("jitter"), "Jitter", CONE_JITTER_RANGE, 0.1, cone.jitter)
                .slider(&key("sensitivity"), "Sensitivity", GAIN_RANGE, 0.1, cone.sensitivity)
                .slider(&key("opacity"), "Opacity", OPACITY_RANGE, 0.05, cone.opacity);
        }

        tree.section("Cyber HUD")
            .slider("donutRotationSpeed", "Rotation speed", DONUT_ROTATION_SPEED_RANGE, 0.001, s.donut_rotation_speed)
            .slider("donutRingCount", "Rings", DONUT_RING_COUNT_RANGE, 1.0, f32::from(s.donut_ring_count))
            .slider("donutBarSensitivity", "Bar gain", GAIN_RANGE, 0.1, s.donut_bar_sensitivity)
            .toggle("donutPulse", "Pulse", s.donut_pulse)
            .toggle("donutWaveSquares", "Particles", s.donut_wave_squares)
            .toggle("donutTextEnabled", "Text", s.donut_text_enabled);
    }

    fn apply_control(&mut self, key: &str, value: ControlValue) -> Result<()> {
        if let Some(result) = self.core.apply_position(key, &value) {
            return result;
        }
        if let Some(field) = key.strip_prefix("cones.") {
            return self.apply_cone_control(key, field, &value);
        }
        let s = &mut self.settings;
        match key {
            "shape" => {
                s.shape = value.choice(key)?;
                if s.shape != Shape::Donut {
                    self.hud_particles.clear();
                }
            }
            "size" => s.size = value.ranged(key, SIZE_RANGE)?,
            "scaleX" => s.scale_x = value.ranged(key, SCALE_RANGE)?,
            "scaleY" => s.scale_y = value.ranged(key, SCALE_RANGE)?,
            "rotation" => {
                s.rotation = value.ranged(key, ROTATION_RANGE)?;
                self.current_rotation = s.rotation;
            }
            "rotationSpeed" => s.rotation_speed = value.ranged(key, ROTATION_SPEED_RANGE)?,
            "vibrationSensitivity" => s.vibration_sensitivity = value.choice(key)?,
            "stereoMode" => s.stereo_mode = value.choice(key)?,
            "rainbow" => s.rainbow = value.boolean(key)?,
            "rainbowSpeed" => s.rainbow_speed = value.ranged(key, RAINBOW_SPEED_RANGE)?,
            "hue" => s.hue = value.ranged(key, HUE_RANGE)?,
            "saturation" => s.saturation = value.ranged(key, SATURATION_RANGE)?,
            "glow" => s.glow = value.boolean(key)?,
            "glowIntensity" => s.glow_intensity = value.ranged(key, GLOW_RANGE)?,
            "orbitSquares" => s.orbit_squares = value.boolean(key)?,
            "orbitSquareMax" => s.orbit_square_max = value.ranged(key, ORBIT_SQUARE_MAX_RANGE)? as usize,
            "ringRipple" => s.ring_ripple = value.boolean(key)?,
            "donutRotationSpeed" => s.donut_rotation_speed = value.ranged(key, DONUT_ROTATION_SPEED_RANGE)?,
            "donutRingCount" => s.donut_ring_count = value.ranged(key, DONUT_RING_COUNT_RANGE)?.round() as u8,
            "donutBarSensitivity" => s.donut_bar_sensitivity = value.ranged(key, GAIN_RANGE)?,
            "donutPulse" => s.donut_pulse = value.boolean(key)?,
            "donutWaveSquares" => s.donut_wave_squares = value.boolean(key)?,
            "donutTextEnabled" => s.donut_text_enabled = value.boolean(key)?,
            _ => return Err(VisualizerError::unknown_control(key)),
        }
        Ok(())
    }

    fn settings_json(&self) -> Result<Value> {
        Ok(serde_json::to_value(&self.settings)?)
    }

    fn merge_settings_json(&mut self, patch: &Value) -> Result<()> {
        merge_json(&mut self.settings, patch, SpeakerSettings::validate)?;
        self.current_rotation = self.settings.rotation;
        self.orbit.set_cap(self.settings.orbit_square_max);
        Ok(())
    }

    fn reset_animation(&mut self) {
        self.spring_offset = 0.0;
        self.spring_velocity = 0.0;
        self.current_rotation = self.settings.rotation;
        self.cone_offsets = [0.0; 4];
        self.donut_angles = [0.0; 3];
        self.orbit.clear();
        self.ripples.clear();
        self.beat_particles.clear();
        self.hud_particles.clear();
        self.spectrum.clear();
        self.mix_bass = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::RecordingCanvas;

    fn loud(beat: bool) -> AudioSnapshot {
        AudioSnapshot {
            frequency_mix: vec![200; 1024],
            bass_level: 1.0,
            bass_level_left: 0.3,
            bass_level_right: 0.9,
            beat_detected: beat,
            ..Default::default()
        }
    }

    #[test]
    fn spring_settles_at_fifty() {
        let mut speaker = SpeakerModule::new();
        let audio = AudioSnapshot {
            bass_level: 1.0,
            ..Default::default()
        };
        for _ in 0..100 {
            speaker.update(&audio);
        }
        assert!((speaker.spring_offset() - 50.0).abs() < 1e-3);
        assert!(speaker.spring_velocity().abs() < 1e-3);
    }

    #[test]
    fn spring_overshoots_before_settling() {
        let mut speaker = SpeakerModule::new();
        let audio = AudioSnapshot {
            bass_level: 1.0,
            ..Default::default()
        };
        let peak = (0..30)
            .map(|_| {
                speaker.update(&audio);
                speaker.spring_offset()
            })
            .fold(0.0_f32, f32::max);
        assert!(peak > 50.0);
    }

    #[test]
    fn stereo_mode_selects_channel() {
        let mut speaker = SpeakerModule::new();
        speaker.apply_control("stereoMode", "left".into()).unwrap();
        speaker.update(&loud(false));
        // First spring step: v = 0.3 * 50 * 0.25 * 0.7.
        assert!((speaker.spring_offset() - 2.625).abs() < 1e-4);
    }

    #[test]
    fn collections_respect_caps() {
        let mut speaker = SpeakerModule::new();
        speaker.reseed(7);
        speaker.apply_control("shape", "donut".into()).unwrap();
        for frame in 0..400 {
            speaker.update(&loud(frame % 2 == 0));
            let [orbit, ripples, beats, hud] = speaker.particle_counts();
            assert!(orbit <= 500);
            assert!(ripples <= RIPPLE_CAP);
            assert!(beats <= BEAT_PARTICLE_CAP);
            assert!(hud <= HUD_PARTICLE_CAP);
        }
        let [orbit, ripples, beats, hud] = speaker.particle_counts();
        assert!(orbit > 0 && ripples > 0 && beats > 0 && hud > 0);
    }

    #[test]
    fn lowering_orbit_cap_trims_immediately() {
        let mut speaker = SpeakerModule::new();
        for _ in 0..50 {
            speaker.update(&loud(false));
        }
        speaker
            .merge_settings_json(&serde_json::json!({ "orbitSquareMax": 10 }))
            .unwrap();
        assert!(speaker.particle_counts()[0] <= 10);
    }

    fn beat_positions(speaker: &SpeakerModule) -> Vec<(f32, f32)> {
        speaker.beat_particles.iter().map(|p| (p.x, p.y)).collect()
    }

    #[test]
    fn beat_particles_stay_in_place_when_the_speaker_moves() {
        let mut still = SpeakerModule::new();
        let mut moved = SpeakerModule::new();
        for speaker in [&mut still, &mut moved] {
            speaker.reseed(11);
            speaker.update(&loud(true));
        }
        let spawned = beat_positions(&still);
        assert!(!spawned.is_empty());
        let (sum_x, sum_y) = spawned
            .iter()
            .fold((0.0, 0.0), |(x, y), p| (x + p.0, y + p.1));
        let n = spawned.len() as f32;
        assert!((sum_x / n - 640.0).abs() < 200.0);
        assert!((sum_y / n - 360.0).abs() < 200.0);

        moved.set_position(Position::new(0.05, 0.95));
        still.update(&loud(false));
        moved.update(&loud(false));
        assert_eq!(beat_positions(&still), beat_positions(&moved));
    }

    #[test]
    fn silent_input_spawns_nothing() {
        let mut speaker = SpeakerModule::new();
        for _ in 0..60 {
            speaker.update(&AudioSnapshot::default());
        }
        assert_eq!(speaker.particle_counts(), [0; 4]);
    }

    #[test]
    fn vibration_none_keeps_cones_near_rest() {
        let mut speaker = SpeakerModule::new();
        speaker.apply_control("vibrationSensitivity", "0".into()).unwrap();
        for _ in 0..50 {
            speaker.update(&loud(false));
        }
        // Only the jitter term (at most 0.005) remains.
        assert!(speaker.cone_offsets()[0].abs() <= 0.006);
    }

    #[test]
    fn rainbow_cycles_hue() {
        let mut speaker = SpeakerModule::new();
        speaker.update(&AudioSnapshot::default());
        assert_eq!(speaker.settings().hue, 270.5);
        speaker.apply_control("rainbow", false.into()).unwrap();
        speaker.update(&AudioSnapshot::default());
        assert_eq!(speaker.settings().hue, 270.5);
    }

    #[test]
    fn donut_draws_hud_text_and_balances_state() {
        let mut speaker = SpeakerModule::new();
        speaker.apply_control("shape", "donut".into()).unwrap();
        speaker.update(&loud(true));
        let mut canvas = RecordingCanvas::new(640, 480);
        speaker.draw(&mut canvas);

        let text: String = canvas.texts().collect();
        assert_eq!(text.len(), HUD_OUTER_TEXT.len() + HUD_INNER_TEXT.len());
        assert!(text.starts_with("DATA"));
        assert_eq!(canvas.save_depth(), 0);
    }

    #[test]
    fn standard_shapes_draw_balanced() {
        for &shape in Shape::ALL {
            let mut speaker = SpeakerModule::new();
            speaker.apply_control("shape", shape.name().into()).unwrap();
            speaker.update(&loud(true));
            let mut canvas = RecordingCanvas::new(320, 240);
            speaker.draw(&mut canvas);
            assert!(canvas.paint_count() > 0);
            assert_eq!(canvas.save_depth(), 0);
        }
    }

    #[test]
    fn controls_validate() {
        let mut speaker = SpeakerModule::new();
        assert!(matches!(
            speaker.apply_control("size", 5.0_f32.into()),
            Err(VisualizerError::InvalidControlValue { .. })
        ));
        assert!(matches!(
            speaker.apply_control("volume", 1.0_f32.into()),
            Err(VisualizerError::UnknownControl { .. })
        ));
        speaker.apply_control("cones.2.enabled", true.into()).unwrap();
        assert!(speaker.settings().cones[2].enabled);
        assert!(speaker.apply_control("cones.9.size", 0.5_f32.into()).is_err());
        speaker.apply_control("x", 0.25_f32.into()).unwrap();
        assert_eq!(speaker.position().x, 0.25);
    }

    #[test]
    fn every_listed_control_is_accepted() {
        let mut speaker = SpeakerModule::new();
        for control in speaker.settings_ui().controls().to_vec() {
            use crate::ui::Control;
            let (key, value) = match control {
                Control::Slider { key, value, .. } => (key, ControlValue::Number(value)),
                Control::Toggle { key, value, .. } => (key, ControlValue::Bool(value)),
                Control::Select { key, value, .. } => (key, ControlValue::Text(value)),
                _ => continue,
            };
            speaker
                .apply_control(&key, value)
                .unwrap_or_else(|e| panic!("{key}: {e}"));
        }
    }

    #[test]
    fn settings_serialise_with_camel_case_names() {
        let json = SpeakerModule::new().settings_json().unwrap();
        assert_eq!(json["stereoMode"], "both");
        assert_eq!(json["vibrationSensitivity"], 2);
        assert_eq!(json["cones"].as_array().map(Vec::len), Some(4));
        assert_eq!(json["orbitSquareMax"], 500);
    }

    #[test]
    fn out_of_range_import_keeps_previous_settings() {
        let mut speaker = SpeakerModule::new();
        let before = speaker.settings().clone();
        let mut bad_cone = serde_json::to_value(&before.cones).unwrap();
        bad_cone[1]["size"] = serde_json::json!(40.0);
        for patch in [
            serde_json::json!({ "size": 1.0e12 }),
            serde_json::json!({ "orbitSquareMax": 1_000_000 }),
            serde_json::json!({ "donutRingCount": 9 }),
            serde_json::json!({ "cones": bad_cone }),
        ] {
            assert!(speaker.merge_settings_json(&patch).is_err());
        }
        assert_eq!(speaker.settings(), &before);
    }

    #[test]
    fn rejected_huge_size_still_draws_on_raster() {
        let mut speaker = SpeakerModule::new();
        assert!(speaker
            .merge_settings_json(&serde_json::json!({ "size": 1.0e12 }))
            .is_err());
        speaker.update(&loud(true));
        let mut canvas = crate::canvas::RasterCanvas::new(64, 48);
        speaker.draw(&mut canvas);
        assert!(canvas.pixel(32, 24).is_some());
    }
}
