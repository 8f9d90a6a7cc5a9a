//! Glowing text or image overlay with flicker, sparks and beat ripples.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    canvas::{Bitmap, Canvas, Color, Paint, Path, Rect, TextStyle},
    ui::{check_range, Choice, ControlTree, ControlValue, Range},
    AudioSnapshot, Result, VisualizerError,
};

use super::{
    centered, cycle_hue, merge_json, Burst, BurstPolicy, ModuleCore, ModuleId, ModuleKind, Pool,
    Position, Ripple, VisualModule, HUE_RANGE, OPACITY_RANGE, RAINBOW_SPEED_RANGE, ROTATION_RANGE,
};

const SPARK_CAP: usize = 50;
const SPARK_GRAVITY: f32 = 0.15;
const SPARK_FADE: f32 = 0.04;
const RIPPLE_CAP: usize = 15;
const RIPPLE_POLICY: BurstPolicy = BurstPolicy::new(0.25, 0.1);
/// Flicker is forced back on every this many frames.
const FLICKER_RESET_FRAMES: u64 = 10;

const FONT_SIZE_RANGE: Range = (12.0, 120.0);
const SIZE_RANGE: Range = (0.2, 3.0);
const GLOW_RANGE: Range = (0.0, 5.0);
const FLICKER_RATE_RANGE: Range = (0.01, 0.15);
const SPARK_COUNT_RANGE: Range = (1.0, 10.0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NeonKind {
    #[default]
    #[serde(rename = "text")]
    Text,
    #[serde(rename = "png", alias = "image")]
    Image,
}

impl Choice for NeonKind {
    const ALL: &'static [Self] = &[Self::Text, Self::Image];

    fn name(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "png",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Text => "Text",
            Self::Image => "Transparent image",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NeonSettings {
    pub neon_type: NeonKind,
    pub text: String,
    pub font_size: f32,
    pub size: f32,
    pub color: Color,
    pub rainbow: bool,
    pub rainbow_speed: f32,
    pub hue: f32,
    pub glow_intensity: f32,
    pub opacity: f32,
    pub flicker: bool,
    /// Per-frame probability of toggling while flicker is on.
    pub flicker_rate: f32,
    pub sparks: bool,
    pub spark_count: usize,
    pub rotation: f32,
    #[serde(rename = "pngRipple")]
    pub ripples: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
}

impl NeonSettings {
    pub fn validate(&self) -> Result<()> {
        check_range("fontSize", self.font_size, FONT_SIZE_RANGE)?;
        check_range("size", self.size, SIZE_RANGE)?;
        check_range("rotation", self.rotation, ROTATION_RANGE)?;
        check_range("opacity", self.opacity, OPACITY_RANGE)?;
        check_range("glowIntensity", self.glow_intensity, GLOW_RANGE)?;
        check_range("rainbowSpeed", self.rainbow_speed, RAINBOW_SPEED_RANGE)?;
        check_range("hue", self.hue, HUE_RANGE)?;
        check_range("flickerRate", self.flicker_rate, FLICKER_RATE_RANGE)?;
        check_range("sparkCount", self.spark_count as f32, SPARK_COUNT_RANGE)
    }
}

impl Default for NeonSettings {
    fn default() -> Self {
        Self {
            neon_type: NeonKind::Text,
            text: "BASS DROP".to_string(),
            font_size: 48.0,
            size: 1.0,
            color: Color::from_rgba8(0xa8, 0x55, 0xf7, 0xff),
            rainbow: true,
            rainbow_speed: 0.5,
            hue: 270.0,
            glow_intensity: 2.0,
            opacity: 1.0,
            flicker: false,
            flicker_rate: 0.03,
            sparks: false,
            spark_count: 3,
            rotation: 0.0,
            ripples: true,
            image_path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlickerState {
    #[default]
    On,
    Off,
}

#[derive(Debug, Clone)]
struct Spark {
    x: f32,
    y: f32,
    vx: f32,
    vy: f32,
    life: f32,
    hue: f32,
}

#[derive(Debug, Clone)]
pub struct NeonModule {
    core: ModuleCore,
    settings: NeonSettings,
    hue: f32,
    flicker: FlickerState,
    flicker_timer: u64,
    sparks: Pool<Spark>,
    ripples: Pool<Ripple>,
    image: Option<Arc<Bitmap>>,
}

impl NeonModule {
    pub fn new() -> Self {
        Self::with_settings(NeonSettings::default())
    }

    pub fn with_settings(settings: NeonSettings) -> Self {
        Self {
            core: ModuleCore::new(),
            hue: settings.hue,
            settings,
            flicker: FlickerState::On,
            flicker_timer: 0,
            sparks: Pool::new(SPARK_CAP),
            ripples: Pool::new(RIPPLE_CAP),
            image: None,
        }
    }

    pub fn settings(&self) -> &NeonSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut NeonSettings {
        &mut self.settings
    }

    pub fn reseed(&mut self, seed: u64) {
        self.core.reseed(seed);
    }

    pub fn flicker_state(&self) -> FlickerState {
        self.flicker
    }

    /// Live spark and ripple counts.
    pub fn particle_counts(&self) -> [usize; 2] {
        [self.sparks.len(), self.ripples.len()]
    }

    /// Points the module at an image file; the pixels are attached later
    /// through [`VisualModule::set_image`].
    pub fn set_image_path(&mut self, path: Option<String>) {
        if path != self.settings.image_path {
            self.image = None;
        }
        self.settings.image_path = path;
    }

    fn step_flicker(&mut self) {
        if !self.settings.flicker {
            self.flicker = FlickerState::On;
            return;
        }
        self.flicker_timer += 1;
        if self.core.rng.f32() < self.settings.flicker_rate {
            self.flicker = match self.flicker {
                FlickerState::On => FlickerState::Off,
                FlickerState::Off => FlickerState::On,
            };
        }
        if self.flicker_timer % FLICKER_RESET_FRAMES == 0 {
            self.flicker = FlickerState::On;
        }
    }

    fn step_sparks(&mut self) {
        if self.settings.sparks && self.settings.flicker && self.flicker == FlickerState::Off {
            let rng = &mut self.core.rng;
            for _ in 0..self.settings.spark_count {
                self.sparks.push(Spark {
                    x: centered(rng) * 50.0,
                    y: centered(rng) * 20.0,
                    vx: centered(rng) * 3.0,
                    vy: -rng.f32() * 3.0 - 1.0,
                    life: 1.0,
                    hue: self.hue + centered(rng) * 40.0,
                });
            }
        }
        self.sparks.retain_mut(|s| {
            s.x += s.vx;
            s.y += s.vy;
            s.vy += SPARK_GRAVITY;
            s.life -= SPARK_FADE;
            s.life > 0.0
        });
    }

    fn step_ripples(&mut self, audio: &AudioSnapshot) {
        if self.settings.ripples {
            let bass = audio.bass_level;
            let hue = self.hue;
            match RIPPLE_POLICY.check(audio.beat_detected, bass, &mut self.core.rng) {
                Some(Burst::Beat) => self.ripples.push(Ripple {
                    radius: 0.0,
                    speed: 6.0 + bass * 8.0,
                    life: 1.0,
                    decay: 0.014 + bass * 0.006,
                    line_width: 2.5 + bass * 2.0,
                    hue,
                }),
                Some(Burst::Shimmer) => self.ripples.push(Ripple {
                    radius: 0.0,
                    speed: 4.0 + bass * 5.0,
                    life: 0.75,
                    decay: 0.020 + bass * 0.005,
                    line_width: 1.5 + bass * 1.5,
                    hue,
                }),
                None => {}
            }
        }
        self.ripples.retain_mut(|r| r.step(0.97));
    }

    fn draw_text(&self, canvas: &mut dyn Canvas) {
        let s = &self.settings;
        let hue = self.hue;
        let style = TextStyle::monospace(s.font_size * s.size).bold().centered();

        let outline: Paint = if s.rainbow {
            Color::hsla(hue, 100.0, 80.0, 0.3)
        } else {
            s.color.with_alpha(0.3)
        }
        .into();
        for layer in (1..=3).rev() {
            let layer = layer as f32;
            let glow = if s.rainbow {
                Color::hsla(hue, 100.0, 60.0, 0.4 + layer * 0.1)
            } else {
                s.color
            };
            canvas.set_shadow(glow, (4.0 + layer * 8.0) * s.glow_intensity);
            canvas.stroke_text(&s.text, 0.0, 0.0, &style, &outline, 3.0 - layer * 0.5);
        }

        let (glow, fill) = if s.rainbow {
            (Color::hsla(hue, 100.0, 60.0, 0.8), Color::hsl(hue, 60.0, 95.0))
        } else {
            (s.color, Color::WHITE)
        };
        canvas.set_shadow(glow, 15.0 * s.glow_intensity);
        canvas.fill_text(&s.text, 0.0, 0.0, &style, &fill.into());
        canvas.clear_shadow();
    }

    fn draw_image(&self, canvas: &mut dyn Canvas, image: &Bitmap) {
        let s = &self.settings;
        let scale = s.size * 0.5;
        let (dw, dh) = (image.width() as f32 * scale, image.height() as f32 * scale);
        let dest = Rect::new(-dw / 2.0, -dh / 2.0, dw, dh);
        let glow = if s.rainbow {
            Color::hsla(self.hue, 100.0, 60.0, 0.6)
        } else {
            s.color
        };

        canvas.set_shadow(glow, 20.0 * s.glow_intensity);
        canvas.draw_image(image, dest);
        canvas.set_global_alpha(s.opacity * 0.4);
        canvas.set_shadow(glow, 40.0 * s.glow_intensity);
        canvas.draw_image(image, dest);
        canvas.clear_shadow();
    }

    fn draw_ripples(&self, canvas: &mut dyn Canvas, cx: f32, cy: f32) {
        for ripple in &self.ripples {
            let mut ring = Path::new();
            ring.circle(cx, cy, ripple.radius);
            canvas.set_shadow(
                Color::hsla(ripple.hue, 100.0, 65.0, ripple.life * 0.4),
                10.0 * self.settings.glow_intensity,
            );
            canvas.stroke_path(
                &ring,
                &Color::hsla(ripple.hue, 100.0, 72.0, ripple.life * 0.8).into(),
                ripple.line_width,
            );
        }
        canvas.clear_shadow();
    }

    fn draw_sparks(&self, canvas: &mut dyn Canvas, cx: f32, cy: f32) {
        for spark in &self.sparks {
            let mut dot = Path::new();
            dot.circle(cx + spark.x, cy + spark.y, 1.5);
            canvas.set_shadow(Color::hsla(spark.hue, 100.0, 60.0, spark.life * 0.5), 4.0);
            canvas.fill_path(&dot, &Color::hsla(spark.hue, 100.0, 80.0, spark.life).into());
        }
        canvas.clear_shadow();
    }
}

impl Default for NeonModule {
    fn default() -> Self {
        Self::new()
    }
}

impl VisualModule for NeonModule {
    fn id(&self) -> ModuleId {
        self.core.id
    }

    fn kind(&self) -> ModuleKind {
        ModuleKind::Neon
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
        self.step_flicker();
        self.step_sparks();
        self.step_ripples(audio);
    }

    fn draw(&mut self, canvas: &mut dyn Canvas) {
        let (w, h) = (canvas.width() as f32, canvas.height() as f32);
        let (cx, cy) = self.core.position.to_pixels(w, h);

        if self.settings.ripples && !self.ripples.is_empty() {
            self.draw_ripples(canvas, cx, cy);
        }
        if self.flicker == FlickerState::Off {
            self.draw_sparks(canvas, cx, cy);
            return;
        }

        canvas.save();
        canvas.set_global_alpha(self.settings.opacity);
        canvas.translate(cx, cy);
        canvas.rotate(self.settings.rotation);
        match (self.settings.neon_type, &self.image) {
            (NeonKind::Text, _) => self.draw_text(canvas),
            (NeonKind::Image, Some(image)) => self.draw_image(canvas, image),
            (NeonKind::Image, None) => {}
        }
        canvas.restore();

        self.draw_sparks(canvas, cx, cy);
    }

    fn build_settings_ui(&self, tree: &mut ControlTree) {
        let s = &self.settings;
        tree.choice("neonType", "Type", s.neon_type)
            .text("text", "Text", &s.text)
            .slider("fontSize", "Font size", FONT_SIZE_RANGE, 1.0, s.font_size)
            .text("imagePath", "Image", s.image_path.as_deref().unwrap_or_default())
            .toggle("pngRipple", "Ripples", s.ripples)
            .slider("size", "Size", SIZE_RANGE, 0.05, s.size);
        self.core.position_controls(tree);
        tree.slider("rotation", "Rotation", ROTATION_RANGE, 0.05, s.rotation)
            .slider("opacity", "Opacity", OPACITY_RANGE, 0.05, s.opacity)
            .slider("glowIntensity", "Glow intensity", GLOW_RANGE, 0.1, s.glow_intensity)
            .toggle("rainbow", "Rainbow", s.rainbow)
            .slider("rainbowSpeed", "Rainbow speed", RAINBOW_SPEED_RANGE, 0.1, s.rainbow_speed)
            .slider("hue", "Hue", HUE_RANGE, 1.0, s.hue)
            .color("color", "Color", s.color)
            .toggle("flicker", "Flicker", s.flicker)
            .slider("flickerRate", "Flicker rate", FLICKER_RATE_RANGE, 0.01, s.flicker_rate)
            .toggle("sparks", "Sparks", s.sparks)
            .slider("sparkCount", "Sparks per frame", SPARK_COUNT_RANGE, 1.0, s.spark_count as f32);
    }

    fn apply_control(&mut self, key: &str, value: ControlValue) -> Result<()> {
        if let Some(result) = self.core.apply_position(key, &value) {
            return result;
        }
        let s = &mut self.settings;
        match key {
            "neonType" => s.neon_type = value.choice(key)?,
            "text" => s.text = value.text(key)?,
            "fontSize" => s.font_size = value.ranged(key, FONT_SIZE_RANGE)?,
            "imagePath" => {
                let path = value.text(key)?;
                self.set_image_path((!path.is_empty()).then_some(path));
            }
            "pngRipple" => s.ripples = value.boolean(key)?,
            "size" => s.size = value.ranged(key, SIZE_RANGE)?,
            "rotation" => s.rotation = value.ranged(key, ROTATION_RANGE)?,
            "opacity" => s.opacity = value.ranged(key, OPACITY_RANGE)?,
            "glowIntensity" => s.glow_intensity = value.ranged(key, GLOW_RANGE)?,
            "rainbow" => s.rainbow = value.boolean(key)?,
            "rainbowSpeed" => s.rainbow_speed = value.ranged(key, RAINBOW_SPEED_RANGE)?,
            "hue" => s.hue = value.ranged(key, HUE_RANGE)?,
            "color" => s.color = value.color(key)?,
            "flicker" => s.flicker = value.boolean(key)?,
            "flickerRate" => s.flicker_rate = value.ranged(key, FLICKER_RATE_RANGE)?,
            "sparks" => s.sparks = value.boolean(key)?,
            "sparkCount" => s.spark_count = value.ranged(key, SPARK_COUNT_RANGE)?.round() as usize,
            _ => return Err(VisualizerError::unknown_control(key)),
        }
        Ok(())
    }

    fn settings_json(&self) -> Result<Value> {
        Ok(serde_json::to_value(&self.settings)?)
    }

    fn merge_settings_json(&mut self, patch: &Value) -> Result<()> {
        let path = self.settings.image_path.clone();
        merge_json(&mut self.settings, patch, NeonSettings::validate)?;
        if self.settings.image_path != path {
            self.image = None;
        }
        Ok(())
    }

    fn reset_animation(&mut self) {
        self.flicker = FlickerState::On;
        self.flicker_timer = 0;
        self.sparks.clear();
        self.ripples.clear();
        self.hue = self.settings.hue;
    }

    fn image_path(&self) -> Option<&str> {
        self.settings.image_path.as_deref()
    }

    fn set_image(&mut self, image: Option<Arc<Bitmap>>) {
        self.image = image;
    }

    fn has_image(&self) -> bool {
        self.image.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::{DrawCommand, RecordingCanvas};

    fn flickering(rate: f32) -> NeonModule {
        let mut neon = NeonModule::new();
        neon.reseed(5);
        let s = neon.settings_mut();
        s.flicker = true;
        s.flicker_rate = rate;
        s.sparks = true;
        neon
    }

    fn beat(bass: f32) -> AudioSnapshot {
        AudioSnapshot {
            bass_level: bass,
            beat_detected: true,
            ..Default::default()
        }
    }

    #[test]
    fn flicker_is_forced_on_every_tenth_frame() {
        // Rate 1 toggles every frame.
        let mut neon = flickering(1.0);
        let quiet = AudioSnapshot::default();
        for frame in 1..=40 {
            neon.update(&quiet);
            if frame % 10 == 0 {
                assert_eq!(neon.flicker_state(), FlickerState::On, "frame {frame}");
            }
        }
    }

    #[test]
    fn disabled_flicker_stays_on() {
        let mut neon = NeonModule::new();
        neon.settings_mut().flicker_rate = 1.0;
        for _ in 0..20 {
            neon.update(&AudioSnapshot::default());
            assert_eq!(neon.flicker_state(), FlickerState::On);
        }
    }

    #[test]
    fn sparks_only_while_off_and_capped() {
        let mut neon = flickering(1.0);
        neon.settings_mut().spark_count = 10;
        neon.update(&AudioSnapshot::default());
        // First frame toggles to off and emits a burst.
        assert_eq!(neon.flicker_state(), FlickerState::Off);
        assert_eq!(neon.particle_counts()[0], 10);

        for _ in 0..100 {
            neon.update(&AudioSnapshot::default());
            assert!(neon.particle_counts()[0] <= SPARK_CAP);
        }

        let mut steady = flickering(0.0);
        for _ in 0..30 {
            steady.update(&AudioSnapshot::default());
        }
        assert_eq!(steady.particle_counts()[0], 0);
    }

    #[test]
    fn beats_spawn_ripples_up_to_cap() {
        let mut neon = NeonModule::new();
        for _ in 0..40 {
            neon.update(&beat(0.1));
            assert!(neon.particle_counts()[1] <= RIPPLE_CAP);
        }
        assert_eq!(neon.particle_counts()[1], RIPPLE_CAP);

        neon.apply_control("pngRipple", false.into()).unwrap();
        for _ in 0..200 {
            neon.update(&beat(0.1));
        }
        assert_eq!(neon.particle_counts()[1], 0);
    }

    #[test]
    fn ripples_draw_while_flickered_off() {
        let mut neon = flickering(1.0);
        neon.update(&beat(0.8));
        assert_eq!(neon.flicker_state(), FlickerState::Off);

        let mut canvas = RecordingCanvas::new(320, 240);
        neon.draw(&mut canvas);
        assert!(canvas
            .commands()
            .iter()
            .any(|c| matches!(c, DrawCommand::StrokePath { .. })));
        assert_eq!(canvas.texts().count(), 0);
    }

    #[test]
    fn text_has_three_glow_layers_and_a_core() {
        let mut neon = NeonModule::new();
        neon.update(&AudioSnapshot::default());
        let mut canvas = RecordingCanvas::new(320, 240);
        neon.draw(&mut canvas);

        let strokes = canvas
            .commands()
            .iter()
            .filter(|c| matches!(c, DrawCommand::StrokeText { .. }))
            .count();
        let fills = canvas
            .commands()
            .iter()
            .filter(|c| matches!(c, DrawCommand::FillText { .. }))
            .count();
        assert_eq!((strokes, fills), (3, 1));
        assert!(canvas.texts().all(|t| t == "BASS DROP"));
        assert_eq!(canvas.save_depth(), 0);
    }

    #[test]
    fn image_mode_needs_pixels() {
        let mut neon = NeonModule::new();
        neon.apply_control("neonType", "png".into()).unwrap();
        neon.update(&AudioSnapshot::default());

        let mut canvas = RecordingCanvas::new(320, 240);
        neon.draw(&mut canvas);
        assert_eq!(canvas.paint_count(), 0);

        neon.set_image(Some(Arc::new(Bitmap::new(40, 20))));
        neon.draw(&mut canvas);
        let images = canvas
            .commands()
            .iter()
            .filter(|c| matches!(c, DrawCommand::DrawImage { .. }))
            .count();
        assert_eq!(images, 2);
    }

    #[test]
    fn changing_image_path_drops_pixels() {
        let mut neon = NeonModule::new();
        neon.set_image_path(Some("a.png".into()));
        neon.set_image(Some(Arc::new(Bitmap::new(2, 2))));
        neon.merge_settings_json(&serde_json::json!({ "imagePath": "b.png" }))
            .unwrap();
        assert!(!neon.has_image());
        assert_eq!(neon.image_path(), Some("b.png"));
    }

    #[test]
    fn controls_validate() {
        let mut neon = NeonModule::new();
        neon.apply_control("color", "#22d3ee".into()).unwrap();
        assert_eq!(neon.settings().color.to_hex(), "#22d3ee");
        assert!(neon.apply_control("color", "teal".into()).is_err());
        assert!(neon.apply_control("flickerRate", 0.5_f32.into()).is_err());
        neon.apply_control("text", "DROP".into()).unwrap();
        assert_eq!(neon.settings().text, "DROP");
        assert!(matches!(
            neon.apply_control("fontFamily", "Impact".into()),
            Err(VisualizerError::UnknownControl { .. })
        ));
    }

    #[test]
    fn settings_use_camel_case_field_names() {
        let json = NeonModule::new().settings_json().unwrap();
        assert_eq!(json["neonType"], "text");
        assert_eq!(json["pngRipple"], true);
        assert_eq!(json["color"], "#a855f7");
        assert!(json.get("imagePath").is_none());

        let mut neon = NeonModule::new();
        neon.merge_settings_json(&serde_json::json!({ "neonType": "image" }))
            .unwrap();
        assert_eq!(neon.settings().neon_type, NeonKind::Image);
    }

    #[test]
    fn out_of_range_import_keeps_previous_settings() {
        let mut neon = NeonModule::new();
        neon.set_image_path(Some("a.png".into()));
        neon.set_image(Some(Arc::new(Bitmap::new(2, 2))));
        let before = neon.settings().clone();
        for patch in [
            serde_json::json!({ "sparkCount": 1_000_000 }),
            serde_json::json!({ "fontSize": 4000.0, "imagePath": "b.png" }),
            serde_json::json!({ "flickerRate": 0.9 }),
            serde_json::json!({ "glowIntensity": -2.0 }),
        ] {
            assert!(neon.merge_settings_json(&patch).is_err());
        }
        assert_eq!(neon.settings(), &before);
        assert!(neon.has_image());
    }
}
