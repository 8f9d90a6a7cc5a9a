//! 2D drawing surface used by the render loop and every visual module.
//!
//! The trait mirrors the subset of the browser canvas API the visualizer
//! needs: paths, radial gradients, compositing modes, a glow approximation,
//! image blits and raw pixel region access. Two backends ship with the
//! crate: [`RasterCanvas`] (software rasterizer producing RGBA frames) and
//! [`RecordingCanvas`] (display list used in tests and diagnostics).

mod bitmap;
mod color;
mod glyphs;
mod path;
mod raster;
mod recording;

pub use bitmap::Bitmap;
pub use color::Color;
pub use path::{Path, PathCommand, Polyline};
pub use raster::RasterCanvas;
pub use recording::{DrawCommand, RecordingCanvas};

use glam::{Affine2, Vec2};

/// How source pixels combine with what is already on the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompositeMode {
    #[default]
    SourceOver,
    Screen,
    Lighter,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Centered square of side `size`.
    pub fn centered(cx: f32, cy: f32, size: f32) -> Self {
        Self::new(cx - size / 2.0, cy - size / 2.0, size, size)
    }

    pub fn contains(&self, p: Vec2) -> bool {
        p.x >= self.x && p.y >= self.y && p.x < self.x + self.width && p.y < self.y + self.height
    }
}

/// Gradient stop; `offset` in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorStop {
    pub offset: f32,
    pub color: Color,
}

/// Concentric radial gradient between `inner` and `outer` radii.
#[derive(Debug, Clone, PartialEq)]
pub struct RadialGradient {
    pub center: Vec2,
    pub inner: f32,
    pub outer: f32,
    pub stops: Vec<ColorStop>,
}

impl RadialGradient {
    pub fn new(cx: f32, cy: f32, inner: f32, outer: f32) -> Self {
        Self {
            center: Vec2::new(cx, cy),
            inner,
            outer,
            stops: Vec::new(),
        }
    }

    pub fn stop(mut self, offset: f32, color: Color) -> Self {
        self.stops.push(ColorStop {
            offset: offset.clamp(0.0, 1.0),
            color,
        });
        self.stops
            .sort_by(|a, b| a.offset.total_cmp(&b.offset));
        self
    }

    /// Colour at a user-space point; pads with the end stops outside the
    /// gradient range.
    pub fn color_at(&self, point: Vec2) -> Color {
        let (Some(first), Some(last)) = (self.stops.first(), self.stops.last()) else {
            return Color::TRANSPARENT;
        };
        let span = self.outer - self.inner;
        let t = if span.abs() <= f32::EPSILON {
            if point.distance(self.center) < self.inner {
                0.0
            } else {
                1.0
            }
        } else {
            ((point.distance(self.center) - self.inner) / span).clamp(0.0, 1.0)
        };

        if t <= first.offset {
            return first.color;
        }
        if t >= last.offset {
            return last.color;
        }
        for pair in self.stops.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if t >= a.offset && t <= b.offset {
                let width = (b.offset - a.offset).max(f32::EPSILON);
                return a.color.lerp(b.color, (t - a.offset) / width);
            }
        }
        last.color
    }
}

/// Fill or stroke source.
#[derive(Debug, Clone, PartialEq)]
pub enum Paint {
    Solid(Color),
    Radial(RadialGradient),
}

impl Paint {
    pub fn color_at(&self, point: Vec2) -> Color {
        match self {
            Self::Solid(color) => *color,
            Self::Radial(gradient) => gradient.color_at(point),
        }
    }
}

impl From<Color> for Paint {
    fn from(value: Color) -> Self {
        Self::Solid(value)
    }
}

impl From<RadialGradient> for Paint {
    fn from(value: RadialGradient) -> Self {
        Self::Radial(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextAlign {
    #[default]
    Left,
    Center,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextBaseline {
    #[default]
    Alphabetic,
    Middle,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextStyle {
    pub size: f32,
    pub bold: bool,
    pub align: TextAlign,
    pub baseline: TextBaseline,
}

impl TextStyle {
    pub fn monospace(size: f32) -> Self {
        Self {
            size,
            bold: false,
            align: TextAlign::Left,
            baseline: TextBaseline::Alphabetic,
        }
    }

    pub fn bold(mut self) -> Self {
        self.bold = true;
        self
    }

    pub fn centered(mut self) -> Self {
        self.align = TextAlign::Center;
        self.baseline = TextBaseline::Middle;
        self
    }
}

/// Drawing surface contract.
///
/// Transform, alpha, composite mode and shadow are part of the state saved
/// and restored by [`Canvas::save`]/[`Canvas::restore`]. Pixel reads and
/// writes address device pixels and ignore the current transform.
pub trait Canvas {
    fn width(&self) -> u32;
    fn height(&self) -> u32;

    fn save(&mut self);
    fn restore(&mut self);
    fn translate(&mut self, x: f32, y: f32);
    fn rotate(&mut self, radians: f32);
    fn scale(&mut self, sx: f32, sy: f32);
    fn set_global_alpha(&mut self, alpha: f32);
    fn set_composite(&mut self, mode: CompositeMode);
    /// Glow approximation; a blur of zero disables it.
    fn set_shadow(&mut self, color: Color, blur: f32);

    fn clear(&mut self);
    fn fill_rect(&mut self, rect: Rect, paint: &Paint);
    fn fill_path(&mut self, path: &Path, paint: &Paint);
    fn stroke_path(&mut self, path: &Path, paint: &Paint, line_width: f32);
    fn fill_text(&mut self, text: &str, x: f32, y: f32, style: &TextStyle, paint: &Paint);
    fn stroke_text(
        &mut self,
        text: &str,
        x: f32,
        y: f32,
        style: &TextStyle,
        paint: &Paint,
        line_width: f32,
    );
    fn draw_image(&mut self, image: &Bitmap, dest: Rect);

    /// Copies a device-pixel region. Returns `None` when the region does not
    /// intersect the surface or the backend cannot read back.
    fn read_pixels(&self, x: i32, y: i32, width: u32, height: u32) -> Option<Bitmap>;
    /// Replaces device pixels, ignoring alpha, composite mode and transform.
    fn write_pixels(&mut self, image: &Bitmap, x: i32, y: i32);

    fn clear_shadow(&mut self) {
        self.set_shadow(Color::TRANSPARENT, 0.0);
    }
}

/// Per-save state shared by the backends.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DrawState {
    pub transform: Affine2,
    pub alpha: f32,
    pub composite: CompositeMode,
    pub shadow_color: Color,
    pub shadow_blur: f32,
}

impl Default for DrawState {
    fn default() -> Self {
        Self {
            transform: Affine2::IDENTITY,
            alpha: 1.0,
            composite: CompositeMode::SourceOver,
            shadow_color: Color::TRANSPARENT,
            shadow_blur: 0.0,
        }
    }
}

impl DrawState {
    pub fn has_shadow(&self) -> bool {
        self.shadow_blur > 0.0 && !self.shadow_color.is_transparent()
    }

    /// Average linear scale of the current transform.
    pub fn scale_factor(&self) -> f32 {
        self.transform.matrix2.determinant().abs().sqrt()
    }
}

/// Save/restore stack; `restore` on an empty stack is a no-op like the
/// browser API.
#[derive(Debug, Clone, Default)]
pub(crate) struct StateStack {
    current: DrawState,
    saved: Vec<DrawState>,
}

impl StateStack {
    pub fn current(&self) -> &DrawState {
        &self.current
    }

    pub fn current_mut(&mut self) -> &mut DrawState {
        &mut self.current
    }

    pub fn save(&mut self) {
        self.saved.push(self.current);
    }

    pub fn restore(&mut self) {
        if let Some(state) = self.saved.pop() {
            self.current = state;
        }
    }

    pub fn reset(&mut self) {
        self.current = DrawState::default();
        self.saved.clear();
    }

    pub fn translate(&mut self, x: f32, y: f32) {
        self.current.transform = self.current.transform * Affine2::from_translation(Vec2::new(x, y));
    }

    pub fn rotate(&mut self, radians: f32) {
        self.current.transform = self.current.transform * Affine2::from_angle(radians);
    }

    pub fn scale(&mut self, sx: f32, sy: f32) {
        self.current.transform = self.current.transform * Affine2::from_scale(Vec2::new(sx, sy));
    }

    pub fn depth(&self) -> usize {
        self.saved.len()
    }
}
