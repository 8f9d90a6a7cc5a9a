use super::{Bitmap, Canvas, Color, CompositeMode, Paint, Path, Rect, StateStack, TextStyle};

/// One recorded canvas call.
#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    Save,
    Restore,
    Translate(f32, f32),
    Rotate(f32),
    Scale(f32, f32),
    GlobalAlpha(f32),
    Composite(CompositeMode),
    Shadow { color: Color, blur: f32 },
    Clear,
    FillRect { rect: Rect, paint: Paint },
    FillPath { path: Path, paint: Paint },
    StrokePath { path: Path, paint: Paint, line_width: f32 },
    FillText { text: String, x: f32, y: f32 },
    StrokeText { text: String, x: f32, y: f32 },
    DrawImage { dest: Rect },
    WritePixels { x: i32, y: i32, width: u32, height: u32 },
}

impl DrawCommand {
    /// True for commands that put paint on the surface.
    pub fn is_paint(&self) -> bool {
        matches!(
            self,
            Self::FillRect { .. }
                | Self::FillPath { .. }
                | Self::StrokePath { .. }
                | Self::FillText { .. }
                | Self::StrokeText { .. }
                | Self::DrawImage { .. }
                | Self::WritePixels { .. }
        )
    }
}

/// Canvas that records every call as a [`DrawCommand`].
///
/// Pixel reads succeed (returning transparent pixels) for regions that
/// intersect the surface, so code paths depending on read-back still run.
#[derive(Debug, Clone)]
pub struct RecordingCanvas {
    width: u32,
    height: u32,
    commands: Vec<DrawCommand>,
    state: StateStack,
}

impl RecordingCanvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            commands: Vec::new(),
            state: StateStack::default(),
        }
    }

    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    pub fn take(&mut self) -> Vec<DrawCommand> {
        std::mem::take(&mut self.commands)
    }

    pub fn paint_count(&self) -> usize {
        self.commands.iter().filter(|c| c.is_paint()).count()
    }

    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.commands.iter().filter_map(|c| match c {
            DrawCommand::FillText { text, .. } | DrawCommand::StrokeText { text, .. } => {
                Some(text.as_str())
            }
            _ => None,
        })
    }

    /// Current save depth; zero after balanced drawing.
    pub fn save_depth(&self) -> usize {
        self.state.depth()
    }
}

impl Canvas for RecordingCanvas {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn save(&mut self) {
        self.state.save();
        self.commands.push(DrawCommand::Save);
    }

    fn restore(&mut self) {
        self.state.restore();
        self.commands.push(DrawCommand::Restore);
    }

    fn translate(&mut self, x: f32, y: f32) {
        self.state.translate(x, y);
        self.commands.push(DrawCommand::Translate(x, y));
    }

    fn rotate(&mut self, radians: f32) {
        self.state.rotate(radians);
        self.commands.push(DrawCommand::Rotate(radians));
    }

    fn scale(&mut self, sx: f32, sy: f32) {
        self.state.scale(sx, sy);
        self.commands.push(DrawCommand::Scale(sx, sy));
    }

    fn set_global_alpha(&mut self, alpha: f32) {
        self.state.current_mut().alpha = alpha;
        self.commands.push(DrawCommand::GlobalAlpha(alpha));
    }

    fn set_composite(&mut self, mode: CompositeMode) {
        self.state.current_mut().composite = mode;
        self.commands.push(DrawCommand::Composite(mode));
    }

    fn set_shadow(&mut self, color: Color, blur: f32) {
        self.commands.push(DrawCommand::Shadow { color, blur });
    }

    fn clear(&mut self) {
        self.commands.push(DrawCommand::Clear);
    }

    fn fill_rect(&mut self, rect: Rect, paint: &Paint) {
        self.commands.push(DrawCommand::FillRect {
            rect,
            paint: paint.clone(),
        });
    }

    fn fill_path(&mut self, path: &Path, paint: &Paint) {
        self.commands.push(DrawCommand::FillPath {
            path: path.clone(),
            paint: paint.clone(),
        });
    }

    fn stroke_path(&mut self, path: &Path, paint: &Paint, line_width: f32) {
        self.commands.push(DrawCommand::StrokePath {
            path: path.clone(),
            paint: paint.clone(),
            line_width,
        });
    }

    fn fill_text(&mut self, text: &str, x: f32, y: f32, _style: &TextStyle, _paint: &Paint) {
        self.commands.push(DrawCommand::FillText {
            text: text.to_string(),
            x,
            y,
        });
    }

    fn stroke_text(
        &mut self,
        text: &str,
        x: f32,
        y: f32,
        _style: &TextStyle,
        _paint: &Paint,
        _line_width: f32,
    ) {
        self.commands.push(DrawCommand::StrokeText {
            text: text.to_string(),
            x,
            y,
        });
    }

    fn draw_image(&mut self, _image: &Bitmap, dest: Rect) {
        self.commands.push(DrawCommand::DrawImage { dest });
    }

    fn read_pixels(&self, x: i32, y: i32, width: u32, height: u32) -> Option<Bitmap> {
        let inside = width > 0
            && height > 0
            && x < self.width as i32
            && y < self.height as i32
            && x + width as i32 > 0
            && y + height as i32 > 0;
        inside.then(|| Bitmap::new(width, height))
    }

    fn write_pixels(&mut self, image: &Bitmap, x: i32, y: i32) {
        self.commands.push(DrawCommand::WritePixels {
            x,
            y,
            width: image.width(),
            height: image.height(),
        });
    }
}
