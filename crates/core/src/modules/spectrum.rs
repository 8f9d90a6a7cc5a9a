//! Frequency spectrum renderer with nine selectable styles.

use std::f32::consts::{FRAC_PI_2, PI, TAU};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    canvas::{Canvas, Color, CompositeMode, Paint, Path, RadialGradient, Rect, TextStyle},
    ui::{check_range, Choice, ControlTree, ControlValue, Range},
    AudioSnapshot, Result, VisualizerError,
};

use super::{
    centered, cycle_hue, merge_json, random_angle, ModuleCore, ModuleId, ModuleKind, Pool,
    Position, VisualModule, HUE_RANGE, OPACITY_RANGE, RAINBOW_SPEED_RANGE, ROTATION_RANGE,
};

const SIZE_RANGE: Range = (0.3, 2.0);
const SENSITIVITY_RANGE: Range = (0.5, 5.0);
const BAR_COUNT_RANGE: Range = (16.0, 128.0);

const BURST_CAP: usize = 600;
const WIND_CAP: usize = 500;
const GLYPH_CAP: usize = 60;
const MATRIX_COLUMNS: usize = 30;
const MATRIX_TRAIL: usize = 12;
const MATRIX_CHAR_HEIGHT: f32 = 16.0;
const LR_MAX_BARS: usize = 64;

const GLITCH_GLYPHS: &[u8] = b"01<>{}[]|/\\ABCDEFXYZ";
const MATRIX_GLYPHS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789<>{}[]|/\\";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpectrumStyle {
    Particle,
    #[default]
    EdmBar,
    Circular,
    PulseLine,
    LrBar,
    Mirror,
    Glitch,
    Wind,
    Matrix,
}

impl Choice for SpectrumStyle {
    const ALL: &'static [Self] = &[
        Self::Particle,
        Self::EdmBar,
        Self::Circular,
        Self::PulseLine,
        Self::LrBar,
        Self::Mirror,
        Self::Glitch,
        Self::Wind,
        Self::Matrix,
    ];

    fn name(self) -> &'static str {
        match self {
            Self::Particle => "particle",
            Self::EdmBar => "edm-bar",
            Self::Circular => "circular",
            Self::PulseLine => "pulse-line",
            Self::LrBar => "lr-bar",
            Self::Mirror => "mirror",
            Self::Glitch => "glitch",
            Self::Wind => "wind",
            Self::Matrix => "matrix",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Particle => "Particles",
            Self::EdmBar => "EDM bars",
            Self::Circular => "Circular",
            Self::PulseLine => "Pulse line",
            Self::LrBar => "L/R bars",
            Self::Mirror => "Mirror",
            Self::Glitch => "Glitch",
            Self::Wind => "Wind",
            Self::Matrix => "Matrix",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindDirection {
    Left,
    #[default]
    Right,
}

impl WindDirection {
    fn sign(self) -> f32 {
        match self {
            Self::Left => -1.0,
            Self::Right => 1.0,
        }
    }
}

impl Choice for WindDirection {
    const ALL: &'static [Self] = &[Self::Right, Self::Left];

    fn name(self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Left => "Blow left",
            Self::Right => "Blow right",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SpectrumSettings {
    #[serde(rename = "type")]
    pub style: SpectrumStyle,
    pub size: f32,
    pub rotation: f32,
    pub opacity: f32,
    pub rainbow: bool,
    pub rainbow_speed: f32,
    pub hue: f32,
    pub sensitivity: f32,
    /// Bars sampled from the spectrum, 16 to 128.
    pub bar_count: usize,
    pub wind_direction: WindDirection,
}

impl SpectrumSettings {
    /// Checks every numeric field against its slider range.
    pub fn validate(&self) -> Result<()> {
        check_range("size", self.size, SIZE_RANGE)?;
        check_range("rotation", self.rotation, ROTATION_RANGE)?;
        check_range("opacity", self.opacity, OPACITY_RANGE)?;
        check_range("rainbowSpeed", self.rainbow_speed, RAINBOW_SPEED_RANGE)?;
        check_range("hue", self.hue, HUE_RANGE)?;
        check_range("sensitivity", self.sensitivity, SENSITIVITY_RANGE)?;
        check_range("barCount", self.bar_count as f32, BAR_COUNT_RANGE)
    }
}

impl Default for SpectrumSettings {
    fn default() -> Self {
        Self {
            style: SpectrumStyle::EdmBar,
            size: 1.0,
            rotation: 0.0,
            opacity: 0.9,
            rainbow: true,
            rainbow_speed: 0.5,
            hue: 270.0,
            sensitivity: 1.5,
            bar_count: 64,
            wind_direction: WindDirection::Right,
        }
    }
}

#[derive(Debug, Clone)]
struct BurstParticle {
    x: f32,
    y: f32,
    vx: f32,
    vy: f32,
    size: f32,
    life: f32,
    decay: f32,
    hue: f32,
    spark: bool,
}

/// Drifting particle in units of the canvas size, centred on the module.
#[derive(Debug, Clone)]
struct WindParticle {
    x: f32,
    y: f32,
    vx: f32,
    vy: f32,
    size: f32,
    life: f32,
    decay: f32,
    hue: f32,
    wobble: f32,
    wobble_speed: f32,
}

#[derive(Debug, Clone)]
struct MatrixColumn {
    /// Head row; negative while still above the top.
    head: f32,
    speed: f32,
    brightness: f32,
    /// Glyphs from the head backwards.
    trail: [u8; MATRIX_TRAIL],
}

#[derive(Debug, Clone, Copy)]
struct GlitchSlice {
    y: f32,
    height: f32,
    offset: f32,
    double: bool,
}

#[derive(Debug, Clone)]
struct GlitchGlyph {
    x: f32,
    y: f32,
    glyph: u8,
    life: f32,
    decay: f32,
    hue: f32,
    size: f32,
}

#[derive(Debug, Clone, Default)]
struct GlitchState {
    timer: u64,
    intensity: f32,
    slices: Vec<GlitchSlice>,
}

/// Copy of the snapshot fields the draw pass needs.
#[derive(Debug, Clone, Default)]
struct FrameAudio {
    mix: Vec<u8>,
    left: Vec<u8>,
    right: Vec<u8>,
    bass: f32,
    beat: bool,
}

#[derive(Debug, Clone)]
pub struct SpectrumModule {
    core: ModuleCore,
    settings: SpectrumSettings,
    hue: f32,
    audio: FrameAudio,
    bursts: Pool<BurstParticle>,
    wind: Pool<WindParticle>,
    columns: Vec<MatrixColumn>,
    glitch: GlitchState,
    glyphs: Pool<GlitchGlyph>,
}

impl SpectrumModule {
    pub fn new() -> Self {
        Self::with_settings(SpectrumSettings::default())
    }

    pub fn with_settings(settings: SpectrumSettings) -> Self {
        Self {
            core: ModuleCore::new(),
            hue: settings.hue,
            settings,
            audio: FrameAudio::default(),
            bursts: Pool::new(BURST_CAP),
            wind: Pool::new(WIND_CAP),
            columns: Vec::new(),
            glitch: GlitchState::default(),
            glyphs: Pool::new(GLYPH_CAP),
        }
    }

    pub fn settings(&self) -> &SpectrumSettings {
        &self.settings
    }

    pub fn style(&self) -> SpectrumStyle {
        self.settings.style
    }

    /// Switches style and drops the state accumulated by the previous one.
    pub fn set_style(&mut self, style: SpectrumStyle) {
        if style != self.settings.style {
            tracing::debug!(id = %self.core.id, from = self.settings.style.name(), to = style.name(), "spectrum style changed");
        }
        self.settings.style = style;
        self.clear_style_state();
    }

    pub fn reseed(&mut self, seed: u64) {
        self.core.reseed(seed);
    }

    pub fn glitch_intensity(&self) -> f32 {
        self.glitch.intensity
    }

    /// Live entity counts: burst particles, wind particles, matrix columns,
    /// glitch glyphs.
    pub fn particle_counts(&self) -> [usize; 4] {
        [
            self.bursts.len(),
            self.wind.len(),
            self.columns.len(),
            self.glyphs.len(),
        ]
    }

    /// Uniform-stride subsample of `bins` to `count` values in `[0, 1]`.
    pub fn frequency_slice(bins: &[u8], count: usize) -> Vec<f32> {
        if bins.is_empty() || count == 0 {
            return Vec::new();
        }
        let step = (bins.len() / count).max(1);
        (0..count)
            .map(|i| bins.get(i * step).map_or(0.0, |&b| f32::from(b) / 255.0))
            .collect()
    }

    fn clear_style_state(&mut self) {
        self.bursts.clear();
        self.wind.clear();
        self.columns.clear();
        self.glyphs.clear();
        self.glitch = GlitchState::default();
    }

    fn update_bursts(&mut self) {
        let bass = self.audio.bass;
        let sensitivity = self.settings.sensitivity;
        let bins = self.audio.mix.len();
        if bass > 0.2 {
            let rng = &mut self.core.rng;
            let count = (bass * 8.0).floor() as usize;
            for _ in 0..count {
                let angle = random_angle(rng);
                let speed = 2.0 + rng.f32() * 5.0 * bass * sensitivity;
                let bin = rng.usize(..bins);
                self.bursts.push(BurstParticle {
                    x: 0.0,
                    y: 0.0,
                    vx: angle.cos() * speed,
                    vy: angle.sin() * speed,
                    size: 1.5 + rng.f32() * 3.0,
                    life: 1.0,
                    decay: 0.010 + rng.f32() * 0.025,
                    hue: (self.hue + bin as f32 * 3.0) % 360.0,
                    spark: rng.bool(),
                });
            }
        }
        self.bursts.retain_mut(|p| {
            p.x += p.vx;
            p.y += p.vy;
            p.vx *= 0.97;
            p.vy *= 0.97;
            p.life -= p.decay;
            p.life > 0.0
        });
    }

    fn update_wind(&mut self) {
        let bins = &self.audio.mix;
        let rng = &mut self.core.rng;
        let sign = self.settings.wind_direction.sign();
        let spawn = 1 + (self.audio.bass * 3.0).floor() as usize;
        for _ in 0..spawn {
            let bin = rng.usize(..bins.len());
            let value = f32::from(bins[bin]) / 255.0;
            if value < 0.1 {
                continue;
            }
            self.wind.push(WindParticle {
                x: -0.5 * sign,
                y: centered(rng),
                vx: sign * (0.002 + rng.f32() * 0.006),
                vy: centered(rng) * 0.003,
                size: 2.0 + value * 6.0,
                life: 1.0,
                decay: 0.003 + rng.f32() * 0.005,
                hue: (self.hue + bin as f32 * 2.0) % 360.0,
                wobble: random_angle(rng),
                wobble_speed: 0.02 + rng.f32() * 0.05,
            });
        }
        self.wind.retain_mut(|p| {
            p.x += p.vx;
            p.wobble += p.wobble_speed;
            p.y += p.vy + p.wobble.sin() * 0.001;
            p.life -= p.decay;
            p.life > 0.0 && p.x.abs() <= 0.7
        });
    }

    fn update_matrix(&mut self) {
        let rng = &mut self.core.rng;
        while self.columns.len() < MATRIX_COLUMNS {
            let mut trail = [0u8; MATRIX_TRAIL];
            trail.iter_mut().for_each(|g| *g = random_glyph(rng, MATRIX_GLYPHS));
            self.columns.push(MatrixColumn {
                head: -rng.f32() * 20.0,
                speed: 0.2 + rng.f32() * 0.5,
                brightness: 0.0,
                trail,
            });
        }
        let bins = &self.audio.mix;
        for (c, column) in self.columns.iter_mut().enumerate() {
            let bin = c * bins.len() / MATRIX_COLUMNS;
            let value = f32::from(bins[bin]) / 255.0;
            let row = column.head.floor();
            column.head += column.speed * (0.5 + value * 2.0);
            column.brightness = value;
            if column.head.floor() > row {
                column.trail.rotate_right(1);
                column.trail[0] = random_glyph(rng, MATRIX_GLYPHS);
            }
            if rng.f32() < 0.05 {
                let index = rng.usize(1..MATRIX_TRAIL);
                column.trail[index] = random_glyph(rng, MATRIX_GLYPHS);
            }
            if column.head > 30.0 || rng.f32() < 0.01 {
                column.head = -rng.f32() * 5.0;
                column.speed = 0.2 + rng.f32() * 0.5;
            }
        }
    }

    fn update_glitch(&mut self) {
        let rng = &mut self.core.rng;
        let glitch = &mut self.glitch;
        glitch.timer += 1;
        let target = self.audio.bass * self.settings.sensitivity;
        glitch.intensity += (target - glitch.intensity) * 0.2;
        let intensity = glitch.intensity;

        let slices = (2.0 + intensity * 8.0).floor() as usize;
        glitch.slices.clear();
        glitch.slices.extend((0..slices).map(|_| GlitchSlice {
            y: rng.f32(),
            height: 0.005 + rng.f32() * 0.04,
            offset: centered(rng) * 60.0 * intensity,
            double: rng.f32() < 0.4,
        }));

        if self.audio.beat || intensity > 0.5 {
            let count = (intensity * 12.0).floor() as usize;
            for _ in 0..count {
                self.glyphs.push(GlitchGlyph {
                    x: rng.f32(),
                    y: rng.f32(),
                    glyph: random_glyph(rng, GLITCH_GLYPHS),
                    life: 1.0,
                    decay: 0.05 + rng.f32() * 0.1,
                    hue: if rng.bool() { self.hue } else { (self.hue + 180.0) % 360.0 },
                    size: 10.0 + rng.f32() * 20.0,
                });
            }
        }
        self.glyphs.retain_mut(|g| {
            g.life -= g.decay;
            g.life > 0.0
        });
    }

    fn draw_edm_bars(&self, canvas: &mut dyn Canvas, w: f32, h: f32, freq: &[f32]) {
        let s = &self.settings;
        let count = freq.len() as f32;
        let total = w * s.size * 0.8;
        let bar = total / count * 0.7;
        let gap = total / count * 0.3;
        let max_height = h * 0.4 * s.size;
        let start = -total / 2.0;

        for (i, &value) in freq.iter().enumerate() {
            let height = value * s.sensitivity * max_height;
            let x = start + i as f32 * (bar + gap);
            let hue = (self.hue + i as f32 * (360.0 / count)) % 360.0;
            canvas.set_shadow(Color::hsla(hue, 100.0, 50.0, 0.5), 8.0);
            canvas.fill_rect(
                Rect::new(x, -height, bar, height),
                &Color::hsla(hue, 100.0, 60.0, 0.8).into(),
            );
            canvas.fill_rect(
                Rect::new(x, 0.0, bar, height * 0.3),
                &Color::hsla(hue, 100.0, 60.0, 0.2).into(),
            );
        }
        canvas.clear_shadow();
    }

    fn draw_circular(&self, canvas: &mut dyn Canvas, w: f32, h: f32, freq: &[f32]) {
        let s = &self.settings;
        let radius = w.min(h) * 0.15 * s.size;
        let count = freq.len() as f32;
        let max_bar = radius * 0.8;
        let width = (TAU * radius / count * 0.5).max(2.0);

        for (i, &value) in freq.iter().enumerate() {
            let angle = i as f32 / count * TAU - FRAC_PI_2;
            let length = value * s.sensitivity * max_bar;
            let hue = (self.hue + i as f32 * (360.0 / count)) % 360.0;
            let (sin, cos) = angle.sin_cos();
            let mut spoke = Path::new();
            spoke
                .move_to(cos * radius, sin * radius)
                .line_to(cos * (radius + length), sin * (radius + length));
            canvas.set_shadow(Color::hsla(hue, 100.0, 50.0, 0.4), 6.0);
            canvas.stroke_path(&spoke, &Color::hsla(hue, 100.0, 65.0, 0.8).into(), width);
        }
        canvas.clear_shadow();
    }

    fn draw_pulse_line(&self, canvas: &mut dyn Canvas, w: f32, h: f32, freq: &[f32]) {
        let s = &self.settings;
        let total = w * s.size;
        let step = total / (freq.len().max(2) - 1) as f32;
        let amplitude = h * 0.35 * s.size;
        let start = -total / 2.0;

        let wave = |direction: f32| {
            let mut path = Path::new();
            path.move_to(start, 0.0);
            for (i, &value) in freq.iter().enumerate() {
                let v = (value * s.sensitivity).min(1.0);
                path.line_to(start + i as f32 * step, direction * (v * PI).sin() * amplitude * v);
            }
            path.line_to(start + total, 0.0);
            path
        };

        canvas.set_shadow(Color::hsla(self.hue, 100.0, 65.0, 0.5), 12.0);
        canvas.stroke_path(&wave(-1.0), &Color::hsla(self.hue, 100.0, 65.0, 0.9).into(), 2.5);
        canvas.set_shadow(Color::hsla(self.hue, 100.0, 65.0, 0.5), 6.0);
        let mirror = (self.hue + 180.0) % 360.0;
        canvas.stroke_path(&wave(1.0), &Color::hsla(mirror, 100.0, 65.0, 0.5).into(), 1.5);
        canvas.clear_shadow();
    }

    fn draw_lr_bars(&self, canvas: &mut dyn Canvas, w: f32, h: f32) {
        let s = &self.settings;
        let count = s.bar_count.clamp(1, LR_MAX_BARS);
        let left = Self::frequency_slice(&self.audio.left, count);
        let right = Self::frequency_slice(&self.audio.right, count);
        let half = w * 0.48 * s.size;
        let total = h * 0.85 * s.size;
        let bar = total / count as f32 * 0.7;
        let gap = total / count as f32 * 0.3;
        let start = -total / 2.0;

        for i in 0..count {
            let level = |values: &[f32]| (values.get(i).copied().unwrap_or(0.0) * s.sensitivity).min(1.0);
            let y = start + i as f32 * (bar + gap);
            let hue_left = (self.hue + i as f32 * (180.0 / count as f32)) % 360.0;
            let hue_right = (self.hue + 180.0 + i as f32 * (180.0 / count as f32)) % 360.0;

            let length = level(&left[..]) * half;
            canvas.set_shadow(Color::hsla(hue_left, 100.0, 55.0, 0.5), 8.0);
            canvas.fill_rect(
                Rect::new(-half, y, length, bar),
                &Color::hsla(hue_left, 100.0, 60.0, 0.85).into(),
            );

            let length = level(&right[..]) * half;
            canvas.set_shadow(Color::hsla(hue_right, 100.0, 55.0, 0.5), 8.0);
            canvas.fill_rect(
                Rect::new(half - length, y, length, bar),
                &Color::hsla(hue_right, 100.0, 60.0, 0.85).into(),
            );
        }
        canvas.clear_shadow();
    }

    fn draw_mirror(&self, canvas: &mut dyn Canvas, w: f32, h: f32, freq: &[f32]) {
        let s = &self.settings;
        let count = freq.len() as f32;
        let total = w * 0.8 * s.size;
        let bar = total / count * 0.7;
        let gap = total / count * 0.3;
        let max_height = h * 0.25 * s.size;
        let start = -total / 2.0;

        for (i, &value) in freq.iter().enumerate() {
            let height = value * s.sensitivity * max_height;
            let hue = (self.hue + i as f32 * (360.0 / count)) % 360.0;
            let x = start + i as f32 * (bar + gap);
            let paint: Paint = Color::hsla(hue, 100.0, 60.0, 0.8).into();
            canvas.set_shadow(Color::hsla(hue, 100.0, 50.0, 0.3), 5.0);
            canvas.fill_rect(Rect::new(x, -height, bar, height), &paint);
            canvas.fill_rect(Rect::new(x, 0.0, bar, height), &paint);
        }
        canvas.clear_shadow();
    }

    fn draw_bursts(&self, canvas: &mut dyn Canvas) {
        for p in &self.bursts {
            let alpha = p.life * 0.85;
            if p.spark {
                let length = p.size * 3.0 * p.life;
                let heading = p.vy.atan2(p.vx);
                let mut trail = Path::new();
                trail
                    .move_to(p.x, p.y)
                    .line_to(p.x - heading.cos() * length, p.y - heading.sin() * length);
                canvas.set_shadow(Color::hsla(p.hue, 100.0, 80.0, alpha * 0.5), 6.0);
                canvas.stroke_path(&trail, &Color::hsla(p.hue, 100.0, 80.0, alpha).into(), p.size * 0.5);
            } else {
                let mut dot = Path::new();
                dot.circle(p.x, p.y, p.size * p.life);
                canvas.set_shadow(Color::hsla(p.hue, 100.0, 70.0, alpha * 0.5), 8.0);
                canvas.fill_path(&dot, &Color::hsla(p.hue, 100.0, 70.0, alpha).into());
            }
        }
        canvas.clear_shadow();
    }

    fn draw_wind(&self, canvas: &mut dyn Canvas, w: f32, h: f32) {
        for p in &self.wind {
            let mut dot = Path::new();
            dot.circle(p.x * w, p.y * h, p.size);
            canvas.set_shadow(Color::hsla(p.hue, 100.0, 60.0, p.life * 0.3), 6.0);
            canvas.fill_path(&dot, &Color::hsla(p.hue, 100.0, 70.0, p.life * 0.7).into());
        }
        canvas.clear_shadow();
    }

    fn draw_matrix(&self, canvas: &mut dyn Canvas, w: f32, h: f32) {
        let count = self.columns.len();
        if count == 0 {
            return;
        }
        let span = w * self.settings.size * 0.8;
        let column_width = span / count as f32;
        let start = -span / 2.0;
        let style = TextStyle::monospace(MATRIX_CHAR_HEIGHT - 2.0).bold();
        let mut buf = [0u8; 4];

        for (c, column) in self.columns.iter().enumerate() {
            let x = start + c as f32 * column_width;
            let hue = (self.hue + c as f32 * 5.0) % 360.0;
            for (r, &glyph) in column.trail.iter().enumerate() {
                let y = (column.head - r as f32) * MATRIX_CHAR_HEIGHT;
                if y < -h / 2.0 || y > h / 2.0 {
                    continue;
                }
                let fade = 1.0 - r as f32 / MATRIX_TRAIL as f32;
                let alpha = fade * (0.3 + column.brightness * 0.7);
                let color = if r == 0 {
                    Color::hsla(hue, 60.0, 95.0, alpha)
                } else {
                    Color::hsla(hue, 100.0, 60.0, alpha * 0.6)
                };
                let text = char::from(glyph).encode_utf8(&mut buf);
                canvas.fill_text(text, x, y, &style, &color.into());
            }
        }
    }

    /// Full-screen glitch pass. Each stage has its own intensity gate.
    fn draw_glitch(&mut self, canvas: &mut dyn Canvas) {
        let intensity = self.glitch.intensity;
        if intensity < 0.01 {
            return;
        }
        let (width, height) = (canvas.width(), canvas.height());
        let (w, h) = (width as f32, height as f32);
        let sensitivity = self.settings.sensitivity;
        let beat = self.audio.beat;
        let hue = self.hue;

        if beat && intensity > 0.3 {
            canvas.fill_rect(
                Rect::new(0.0, 0.0, w, h),
                &Color::rgba(1.0, 1.0, 1.0, intensity * 0.06).into(),
            );
        }

        for slice in &self.glitch.slices {
            let y = (slice.y * h).floor() as i32;
            let rows = ((slice.height * h).floor() as u32).max(1);
            if y < 0 || y as u32 + rows > height {
                continue;
            }
            let Some(band) = canvas.read_pixels(0, y, width, rows) else {
                continue;
            };
            canvas.write_pixels(&band, slice.offset.round() as i32, y);
            if slice.double && y as u32 + 2 + rows <= height {
                canvas.write_pixels(&band, (slice.offset * 0.5).round() as i32, y + 2);
            }
        }

        if intensity > 0.2 {
            let shift = (intensity * 12.0 * sensitivity).floor();
            if let Some(frame) = canvas.read_pixels(0, 0, width, height) {
                canvas.save();
                canvas.set_composite(CompositeMode::Screen);
                canvas.set_global_alpha(intensity * 0.25);
                canvas.draw_image(&channel_split(&frame, [true, false, false]), Rect::new(shift, 0.0, w, h));
                canvas.draw_image(&channel_split(&frame, [false, true, true]), Rect::new(-shift, 0.0, w, h));
                canvas.restore();
            }
            canvas.save();
            canvas.set_composite(CompositeMode::Screen);
            canvas.set_global_alpha(intensity * 0.08);
            canvas.fill_rect(Rect::new(shift, 0.0, w, h), &Color::rgba(1.0, 0.0, 0.0, 1.0).into());
            canvas.fill_rect(Rect::new(-shift, 0.0, w, h), &Color::rgba(0.0, 1.0, 1.0, 1.0).into());
            canvas.restore();
        }

        canvas.save();
        canvas.set_global_alpha(0.04 + intensity * 0.06);
        let scroll = self.glitch.timer as f32 * (1.0 + self.audio.bass * 3.0);
        let black: Paint = Color::BLACK.into();
        for y in (0..height).step_by(4) {
            if ((y as f32 + scroll).floor() as u64) % 8 < 4 {
                canvas.fill_rect(Rect::new(0.0, y as f32, w, 2.0), &black);
            }
        }
        canvas.restore();

        if intensity > 0.35 {
            let rng = &mut self.core.rng;
            let blocks = (intensity * 8.0 * sensitivity).floor() as usize;
            canvas.save();
            canvas.set_global_alpha(intensity * 0.5);
            for _ in 0..blocks {
                let block_hue = if rng.bool() { hue } else { (hue + 150.0) % 360.0 };
                let rect = Rect::new(
                    rng.f32() * w,
                    rng.f32() * h,
                    10.0 + rng.f32() * 80.0,
                    4.0 + rng.f32() * 20.0,
                );
                canvas.fill_rect(rect, &Color::hsla(block_hue, 100.0, 60.0, 0.7).into());
                if rng.f32() < 0.3 {
                    let rect = Rect::new(
                        rng.f32() * w,
                        rng.f32() * h,
                        15.0 + rng.f32() * 60.0,
                        2.0 + rng.f32() * 8.0,
                    );
                    canvas.fill_rect(rect, &Color::rgba(0.0, 0.0, 0.0, 0.9).into());
                }
            }
            canvas.restore();
        }

        canvas.save();
        canvas.set_composite(CompositeMode::Screen);
        let mut buf = [0u8; 4];
        for g in &self.glyphs {
            canvas.set_global_alpha(g.life * intensity * 0.8);
            canvas.set_shadow(Color::hsla(g.hue, 100.0, 60.0, 0.5), 8.0);
            let style = TextStyle::monospace(g.size).bold();
            let text = char::from(g.glyph).encode_utf8(&mut buf);
            canvas.fill_text(text, g.x * w, g.y * h, &style, &Color::hsl(g.hue, 100.0, 70.0).into());
        }
        canvas.restore();

        if beat && intensity > 0.4 {
            let (cx, cy) = (w / 2.0, h / 2.0);
            let vignette = RadialGradient::new(cx, cy, 0.0, w.max(h) * 0.7)
                .stop(0.0, Color::TRANSPARENT)
                .stop(0.7, Color::TRANSPARENT)
                .stop(1.0, Color::hsla(hue, 100.0, 50.0, intensity * 0.15));
            canvas.save();
            canvas.set_composite(CompositeMode::Screen);
            canvas.fill_rect(Rect::new(0.0, 0.0, w, h), &vignette.into());
            canvas.restore();
        }
    }
}

impl Default for SpectrumModule {
    fn default() -> Self {
        Self::new()
    }
}

fn random_glyph(rng: &mut fastrand::Rng, set: &[u8]) -> u8 {
    set[rng.usize(..set.len())]
}

/// Copy of `frame` keeping only the selected RGB channels.
fn channel_split(frame: &crate::canvas::Bitmap, keep: [bool; 3]) -> crate::canvas::Bitmap {
    let mut out = frame.clone();
    for px in out.pixels_mut().chunks_exact_mut(4) {
        for (channel, &kept) in px.iter_mut().zip(&keep) {
            if !kept {
                *channel = 0;
            }
        }
    }
    out
}

impl VisualModule for SpectrumModule {
    fn id(&self) -> ModuleId {
        self.core.id
    }

    fn kind(&self) -> ModuleKind {
        ModuleKind::Spectrum
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
        self.hue = if self.settings.rainbow {
            cycle_hue(self.hue, self.settings.rainbow_speed)
        } else {
            self.settings.hue
        };

        let frame = &mut self.audio;
        for (dst, src) in [
            (&mut frame.mix, &audio.frequency_mix),
            (&mut frame.left, &audio.frequency_left),
            (&mut frame.right, &audio.frequency_right),
        ] {
            dst.clear();
            dst.extend_from_slice(src);
        }
        frame.bass = audio.bass_level;
        frame.beat = audio.beat_detected;

        if !audio.has_frequency_data() {
            return;
        }
        match self.settings.style {
            SpectrumStyle::Particle => self.update_bursts(),
            SpectrumStyle::Wind => self.update_wind(),
            SpectrumStyle::Matrix => self.update_matrix(),
            SpectrumStyle::Glitch => self.update_glitch(),
            _ => {}
        }
    }

    fn draw(&mut self, canvas: &mut dyn Canvas) {
        let freq = Self::frequency_slice(&self.audio.mix, self.settings.bar_count);
        if freq.is_empty() {
            return;
        }
        if self.settings.style == SpectrumStyle::Glitch {
            self.draw_glitch(canvas);
            return;
        }

        let (w, h) = (canvas.width() as f32, canvas.height() as f32);
        let (cx, cy) = self.core.position.to_pixels(w, h);
        canvas.save();
        canvas.set_global_alpha(self.settings.opacity);
        canvas.translate(cx, cy);
        canvas.rotate(self.settings.rotation);
        match self.settings.style {
            SpectrumStyle::Particle => self.draw_bursts(canvas),
            SpectrumStyle::EdmBar => self.draw_edm_bars(canvas, w, h, &freq),
            SpectrumStyle::Circular => self.draw_circular(canvas, w, h, &freq),
            SpectrumStyle::PulseLine => self.draw_pulse_line(canvas, w, h, &freq),
            SpectrumStyle::LrBar => self.draw_lr_bars(canvas, w, h),
            SpectrumStyle::Mirror => self.draw_mirror(canvas, w, h, &freq),
            SpectrumStyle::Wind => self.draw_wind(canvas, w, h),
            SpectrumStyle::Matrix => self.draw_matrix(canvas, w, h),
            SpectrumStyle::Glitch => {}
        }
        canvas.restore();
    }

    fn build_settings_ui(&self, tree: &mut ControlTree) {
        let s = &self.settings;
        tree.choice("type", "Style", s.style)
            .slider("size", "Size", SIZE_RANGE, 0.05, s.size);
        self.core.position_controls(tree);
        tree.slider("rotation", "Rotation", ROTATION_RANGE, 0.05, s.rotation)
            .slider("opacity", "Opacity", OPACITY_RANGE, 0.05, s.opacity)
            .slider("sensitivity", "Sensitivity", SENSITIVITY_RANGE, 0.1, s.sensitivity)
            .slider("barCount", "Bars", BAR_COUNT_RANGE, 1.0, s.bar_count as f32)
            .toggle("rainbow", "Rainbow", s.rainbow)
            .slider("rainbowSpeed", "Rainbow speed", RAINBOW_SPEED_RANGE, 0.1, s.rainbow_speed)
            .slider("hue", "Hue", HUE_RANGE, 1.0, s.hue)
            .choice("windDirection", "Wind direction", s.wind_direction);
    }

    fn apply_control(&mut self, key: &str, value: ControlValue) -> Result<()> {
        if let Some(result) = self.core.apply_position(key, &value) {
            return result;
        }
        let s = &mut self.settings;
        match key {
            "type" => {
                let style = value.choice(key)?;
                self.set_style(style);
            }
            "size" => s.size = value.ranged(key, SIZE_RANGE)?,
            "rotation" => s.rotation = value.ranged(key, ROTATION_RANGE)?,
            "opacity" => s.opacity = value.ranged(key, OPACITY_RANGE)?,
            "sensitivity" => s.sensitivity = value.ranged(key, SENSITIVITY_RANGE)?,
            "barCount" => s.bar_count = value.ranged(key, BAR_COUNT_RANGE)?.round() as usize,
            "rainbow" => s.rainbow = value.boolean(key)?,
            "rainbowSpeed" => s.rainbow_speed = value.ranged(key, RAINBOW_SPEED_RANGE)?,
            "hue" => s.hue = value.ranged(key, HUE_RANGE)?,
            "windDirection" => s.wind_direction = value.choice(key)?,
            _ => return Err(VisualizerError::unknown_control(key)),
        }
        Ok(())
    }

    fn settings_json(&self) -> Result<Value> {
        Ok(serde_json::to_value(&self.settings)?)
    }

    fn merge_settings_json(&mut self, patch: &Value) -> Result<()> {
        let style = self.settings.style;
        merge_json(&mut self.settings, patch, SpectrumSettings::validate)?;
        if self.settings.style != style {
            self.clear_style_state();
        }
        Ok(())
    }

    fn reset_animation(&mut self) {
        self.clear_style_state();
        self.audio = FrameAudio::default();
        self.hue = self.settings.hue;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::{DrawCommand, RecordingCanvas};

    fn snapshot(level: u8, bass: f32, beat: bool) -> AudioSnapshot {
        AudioSnapshot {
            frequency_mix: vec![level; 1024],
            frequency_left: vec![level; 1024],
            frequency_right: vec![level / 2; 1024],
            bass_level: bass,
            bass_level_left: bass,
            bass_level_right: bass,
            beat_detected: beat,
        }
    }

    fn with_style(style: SpectrumStyle) -> SpectrumModule {
        let mut module = SpectrumModule::new();
        module.reseed(11);
        module.set_style(style);
        module
    }

    #[test]
    fn slice_uses_uniform_stride() {
        let bins: Vec<u8> = (0..1024).map(|i| (i % 256) as u8).collect();
        let slice = SpectrumModule::frequency_slice(&bins, 64);
        assert_eq!(slice.len(), 64);
        // Stride 16: bar 3 reads bin 48.
        assert_eq!(slice[3], 48.0 / 255.0);
        assert_eq!(slice[16], 0.0);
    }

    #[test]
    fn slice_pads_short_spectra_with_zero() {
        let slice = SpectrumModule::frequency_slice(&[255; 10], 16);
        assert_eq!(slice.len(), 16);
        assert_eq!(slice[9], 1.0);
        assert_eq!(slice[10], 0.0);
        assert!(SpectrumModule::frequency_slice(&[], 16).is_empty());
    }

    #[test]
    fn switching_style_clears_state() {
        let mut module = with_style(SpectrumStyle::Particle);
        for _ in 0..10 {
            module.update(&snapshot(200, 0.9, false));
        }
        assert!(module.particle_counts()[0] > 0);

        module.apply_control("type", "matrix".into()).unwrap();
        assert_eq!(module.particle_counts(), [0; 4]);
        module.update(&snapshot(200, 0.9, false));
        assert_eq!(module.particle_counts()[2], MATRIX_COLUMNS);
    }

    #[test]
    fn burst_particles_stay_capped() {
        let mut module = with_style(SpectrumStyle::Particle);
        for _ in 0..300 {
            module.update(&snapshot(255, 1.0, true));
            assert!(module.particle_counts()[0] <= BURST_CAP);
        }
    }

    #[test]
    fn quiet_bass_spawns_no_bursts() {
        let mut module = with_style(SpectrumStyle::Particle);
        module.update(&snapshot(255, 0.2, false));
        assert_eq!(module.particle_counts()[0], 0);
    }

    #[test]
    fn wind_drifts_with_direction_and_stays_capped() {
        let mut module = with_style(SpectrumStyle::Wind);
        for _ in 0..2000 {
            module.update(&snapshot(255, 1.0, false));
            assert!(module.particle_counts()[1] <= WIND_CAP);
        }
        assert!(module.wind.iter().all(|p| p.vx > 0.0 && p.x.abs() <= 0.7));

        module.apply_control("windDirection", "left".into()).unwrap();
        module.set_style(SpectrumStyle::Wind);
        module.update(&snapshot(255, 1.0, false));
        assert!(module.wind.iter().all(|p| p.vx < 0.0));
    }

    #[test]
    fn wind_ignores_quiet_bins() {
        let mut module = with_style(SpectrumStyle::Wind);
        module.update(&snapshot(10, 1.0, false));
        assert_eq!(module.particle_counts()[1], 0);
    }

    #[test]
    fn glitch_intensity_tracks_scaled_bass() {
        let mut module = with_style(SpectrumStyle::Glitch);
        module.update(&snapshot(100, 1.0, false));
        // 0.2 of the way to 1.0 * 1.5.
        assert!((module.glitch_intensity() - 0.3).abs() < 1e-6);
        for _ in 0..100 {
            module.update(&snapshot(100, 1.0, true));
            assert!(module.particle_counts()[3] <= GLYPH_CAP);
        }
        assert!((module.glitch_intensity() - 1.5).abs() < 1e-3);
    }

    #[test]
    fn glitch_stages_follow_intensity() {
        let mut canvas = RecordingCanvas::new(320, 240);
        let mut module = with_style(SpectrumStyle::Glitch);
        module.update(&snapshot(100, 0.0, false));
        module.draw(&mut canvas);
        assert!(canvas.commands().is_empty());

        for _ in 0..30 {
            module.update(&snapshot(100, 1.0, true));
        }
        module.draw(&mut canvas);
        let commands = canvas.commands();
        assert!(commands.iter().any(|c| matches!(c, DrawCommand::WritePixels { .. })));
        assert!(commands.iter().any(|c| matches!(c, DrawCommand::DrawImage { .. })));
        assert!(commands
            .iter()
            .any(|c| matches!(c, DrawCommand::Composite(CompositeMode::Screen))));
        assert!(canvas.texts().count() > 0);
        assert_eq!(canvas.save_depth(), 0);
    }

    #[test]
    fn matrix_trail_fades_from_head() {
        let mut module = with_style(SpectrumStyle::Matrix);
        module.update(&snapshot(255, 0.5, false));
        assert!(module.columns.iter().all(|c| c.trail.len() == MATRIX_TRAIL));
        for column in &mut module.columns {
            column.head = 5.0;
        }
        let mut canvas = RecordingCanvas::new(640, 480);
        module.draw(&mut canvas);
        // Rows 5 down to -6 all fall inside the 480px window.
        assert_eq!(canvas.texts().count(), MATRIX_COLUMNS * MATRIX_TRAIL);
    }

    #[test]
    fn every_style_draws_balanced() {
        for &style in SpectrumStyle::ALL {
            let mut module = with_style(style);
            for _ in 0..5 {
                module.update(&snapshot(180, 0.8, true));
            }
            let mut canvas = RecordingCanvas::new(320, 240);
            module.draw(&mut canvas);
            assert!(canvas.paint_count() > 0, "{style:?} drew nothing");
            assert_eq!(canvas.save_depth(), 0);
        }
    }

    #[test]
    fn no_frequency_data_draws_nothing() {
        let mut module = SpectrumModule::new();
        module.update(&AudioSnapshot::default());
        let mut canvas = RecordingCanvas::new(320, 240);
        module.draw(&mut canvas);
        assert!(canvas.commands().is_empty());
    }

    #[test]
    fn controls_validate() {
        let mut module = SpectrumModule::new();
        assert!(module.apply_control("barCount", 8.0_f32.into()).is_err());
        assert!(module.apply_control("type", "laser".into()).is_err());
        module.apply_control("barCount", 32.0_f32.into()).unwrap();
        assert_eq!(module.settings().bar_count, 32);
        assert!(matches!(
            module.apply_control("shape", "circle".into()),
            Err(VisualizerError::UnknownControl { .. })
        ));
    }

    #[test]
    fn settings_use_camel_case_field_names() {
        let mut module = SpectrumModule::new();
        let json = module.settings_json().unwrap();
        assert_eq!(json["type"], "edm-bar");
        assert_eq!(json["windDirection"], "right");
        assert_eq!(json["barCount"], 64);

        module
            .merge_settings_json(&serde_json::json!({ "type": "pulse-line", "sensitivity": 2.0 }))
            .unwrap();
        assert_eq!(module.style(), SpectrumStyle::PulseLine);
        assert_eq!(module.settings().sensitivity, 2.0);
        assert_eq!(module.settings().bar_count, 64);
    }

    #[test]
    fn out_of_range_import_keeps_previous_settings() {
        let mut module = SpectrumModule::new();
        let before = module.settings().clone();
        for patch in [
            serde_json::json!({ "barCount": 5_000_000 }),
            serde_json::json!({ "barCount": 4 }),
            serde_json::json!({ "size": 1.0e12, "type": "matrix" }),
            serde_json::json!({ "sensitivity": -1.0 }),
        ] {
            assert!(matches!(
                module.merge_settings_json(&patch),
                Err(VisualizerError::InvalidControlValue { .. })
            ));
        }
        assert_eq!(module.settings(), &before);

        module.update(&snapshot(180, 0.8, true));
        let mut canvas = RecordingCanvas::new(320, 240);
        module.draw(&mut canvas);
        assert!(canvas.paint_count() > 0);
    }
}
