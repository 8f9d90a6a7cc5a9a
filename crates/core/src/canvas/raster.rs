use glam::{Affine2, Vec2};

use super::glyphs::{self, GLYPH_COLUMNS, GLYPH_ROWS};
use super::{
    Bitmap, Canvas, Color, CompositeMode, DrawState, Paint, Path, Rect, StateStack, TextAlign,
    TextBaseline, TextStyle,
};

const SHADOW_ALPHA: f32 = 0.45;
const MAX_SHADOW_RADIUS: i32 = 16;

/// Software rasterizer over a straight-alpha RGBA float buffer.
///
/// Coverage is binary per pixel (sampled at pixel centres) and glow is a
/// dilated, faint pre-pass in the shadow colour rather than a true blur.
#[derive(Debug, Clone)]
pub struct RasterCanvas {
    width: u32,
    height: u32,
    pixels: Vec<[f32; 4]>,
    state: StateStack,
}

impl RasterCanvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![[0.0; 4]; width as usize * height as usize],
            state: StateStack::default(),
        }
    }

    /// Resizes the surface, discarding content and drawing state.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.pixels = vec![[0.0; 4]; width as usize * height as usize];
        self.state.reset();
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Color> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let [r, g, b, a] = self.pixels[self.index(x as i32, y as i32)];
        Some(Color::rgba(r, g, b, a))
    }

    pub fn to_bitmap(&self) -> Bitmap {
        let mut out = Vec::with_capacity(self.pixels.len() * 4);
        self.write_rgba8(&mut out);
        Bitmap::from_rgba(self.width, self.height, out)
            .unwrap_or_else(|_| Bitmap::new(self.width, self.height))
    }

    /// Appends the frame as RGBA8 to `out`.
    pub fn write_rgba8(&self, out: &mut Vec<u8>) {
        for px in &self.pixels {
            out.extend_from_slice(&Color::rgba(px[0], px[1], px[2], px[3]).to_rgba8());
        }
    }

    pub fn save_depth(&self) -> usize {
        self.state.depth()
    }

    fn index(&self, x: i32, y: i32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    fn device_polylines(&self, path: &Path) -> Vec<(Vec<Vec2>, bool)> {
        let state = self.state.current();
        path.flatten(state.scale_factor())
            .into_iter()
            .map(|line| {
                let points = line
                    .points
                    .iter()
                    .map(|p| state.transform.transform_point2(*p))
                    .collect();
                (points, line.closed)
            })
            .collect()
    }

    fn bounds_of<'a>(&self, polys: impl IntoIterator<Item = &'a Vec<Vec2>>) -> Option<Bounds> {
        let mut min = Vec2::splat(f32::INFINITY);
        let mut max = Vec2::splat(f32::NEG_INFINITY);
        for poly in polys {
            for p in poly {
                if !p.is_finite() {
                    continue;
                }
                min = min.min(*p);
                max = max.max(*p);
            }
        }
        if !min.is_finite() || !max.is_finite() {
            return None;
        }
        Bounds::new(
            device_coord(min.x.floor()),
            device_coord(min.y.floor()),
            device_coord(max.x.ceil()).saturating_add(1),
            device_coord(max.y.ceil()).saturating_add(1),
        )?
        .clip(self.width as i32, self.height as i32)
    }

    fn paint_mask(&mut self, mask: &Mask, paint: &Paint) {
        let state = *self.state.current();
        if state.has_shadow() {
            let radius = ((state.shadow_blur * 0.4).round() as i32).clamp(1, MAX_SHADOW_RADIUS);
            let halo = mask.dilate(radius, self.width as i32, self.height as i32);
            let shadow = Paint::Solid(state.shadow_color);
            self.blend_mask(&halo, &shadow, &state, SHADOW_ALPHA);
        }
        self.blend_mask(mask, paint, &state, 1.0);
    }

    fn blend_mask(&mut self, mask: &Mask, paint: &Paint, state: &DrawState, alpha_scale: f32) {
        let inverse = match paint {
            Paint::Solid(_) => None,
            Paint::Radial(_) => Some(state.transform.inverse()),
        };
        for (x, y) in mask.iter() {
            let color = match inverse {
                None => paint.color_at(Vec2::ZERO),
                Some(inv) => paint.color_at(inv.transform_point2(Vec2::new(
                    x as f32 + 0.5,
                    y as f32 + 0.5,
                ))),
            };
            let idx = self.index(x, y);
            blend(
                &mut self.pixels[idx],
                color,
                state.alpha * alpha_scale,
                state.composite,
            );
        }
    }

    fn stroke_mask(&self, path: &Path, line_width: f32) -> Option<Mask> {
        let state = self.state.current();
        let half = (line_width * state.scale_factor() * 0.5).max(0.5);
        let lines = self.device_polylines(path);
        let mut polys: Vec<Vec<Vec2>> = Vec::new();

        for (points, closed) in &lines {
            let mut segments: Vec<(Vec2, Vec2)> = points.windows(2).map(|w| (w[0], w[1])).collect();
            if *closed {
                if let (Some(first), Some(last)) = (points.first(), points.last()) {
                    segments.push((*last, *first));
                }
            }
            for (a, b) in segments {
                let delta = b - a;
                let len = delta.length();
                if len <= f32::EPSILON {
                    continue;
                }
                let normal = Vec2::new(-delta.y, delta.x) / len * half;
                polys.push(vec![a + normal, b + normal, b - normal, a - normal]);
            }
            if half >= 1.0 {
                for p in points {
                    polys.push(disc(*p, half, 8));
                }
            }
        }

        let bounds = self.bounds_of(polys.iter())?;
        let mut mask = Mask::new(bounds);
        for poly in &polys {
            mask.fill_polygon(poly);
        }
        Some(mask)
    }

    fn text_polygons(&self, text: &str, x: f32, y: f32, style: &TextStyle) -> Vec<Vec<Vec2>> {
        let transform = self.state.current().transform;
        let cell = (style.size / 6.0).max(0.5);
        let width = glyphs::text_cells(text) as f32 * cell;
        let left = match style.align {
            TextAlign::Left => x,
            TextAlign::Center => x - width / 2.0,
        };
        let top = match style.baseline {
            TextBaseline::Alphabetic => y - GLYPH_ROWS as f32 * cell,
            TextBaseline::Middle => y - GLYPH_ROWS as f32 * cell / 2.0,
        };
        let grow = if style.bold { cell * 0.15 } else { 0.0 };

        let mut polys = Vec::new();
        for (i, ch) in text.chars().enumerate() {
            let rows = glyphs::glyph(ch);
            let origin_x = left + (i as u32 * glyphs::GLYPH_ADVANCE) as f32 * cell;
            for (row, bits) in rows.iter().enumerate() {
                for col in 0..GLYPH_COLUMNS {
                    if bits & (1 << (GLYPH_COLUMNS - 1 - col)) == 0 {
                        continue;
                    }
                    let x0 = origin_x + col as f32 * cell - grow;
                    let y0 = top + row as f32 * cell - grow;
                    let size = cell + grow * 2.0;
                    polys.push(quad(&transform, x0, y0, size, size));
                }
            }
        }
        polys
    }
}

impl Canvas for RasterCanvas {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn save(&mut self) {
        self.state.save();
    }

    fn restore(&mut self) {
        self.state.restore();
    }

    fn translate(&mut self, x: f32, y: f32) {
        self.state.translate(x, y);
    }

    fn rotate(&mut self, radians: f32) {
        self.state.rotate(radians);
    }

    fn scale(&mut self, sx: f32, sy: f32) {
        self.state.scale(sx, sy);
    }

    fn set_global_alpha(&mut self, alpha: f32) {
        self.state.current_mut().alpha = alpha.clamp(0.0, 1.0);
    }

    fn set_composite(&mut self, mode: CompositeMode) {
        self.state.current_mut().composite = mode;
    }

    fn set_shadow(&mut self, color: Color, blur: f32) {
        let state = self.state.current_mut();
        state.shadow_color = color;
        state.shadow_blur = blur.max(0.0);
    }

    fn clear(&mut self) {
        self.pixels.fill([0.0; 4]);
    }

    fn fill_rect(&mut self, rect: Rect, paint: &Paint) {
        let mut path = Path::new();
        path.rect(rect.x, rect.y, rect.width, rect.height);
        self.fill_path(&path, paint);
    }

    fn fill_path(&mut self, path: &Path, paint: &Paint) {
        let lines = self.device_polylines(path);
        let Some(bounds) = self.bounds_of(lines.iter().map(|(points, _)| points)) else {
            return;
        };
        let mut mask = Mask::new(bounds);
        mask.fill_polygons(lines.iter().map(|(points, _)| points.as_slice()));
        self.paint_mask(&mask, paint);
    }

    fn stroke_path(&mut self, path: &Path, paint: &Paint, line_width: f32) {
        if let Some(mask) = self.stroke_mask(path, line_width) {
            self.paint_mask(&mask, paint);
        }
    }

    fn fill_text(&mut self, text: &str, x: f32, y: f32, style: &TextStyle, paint: &Paint) {
        let polys = self.text_polygons(text, x, y, style);
        let Some(bounds) = self.bounds_of(polys.iter()) else {
            return;
        };
        let mut mask = Mask::new(bounds);
        for poly in &polys {
            mask.fill_polygon(poly);
        }
        self.paint_mask(&mask, paint);
    }

    fn stroke_text(
        &mut self,
        text: &str,
        x: f32,
        y: f32,
        style: &TextStyle,
        paint: &Paint,
        line_width: f32,
    ) {
        // Bitmap glyphs have no outline; widen the cells by the line width.
        let mut widened = *style;
        widened.bold = widened.bold || line_width >= 2.0;
        self.fill_text(text, x, y, &widened, paint);
    }

    fn draw_image(&mut self, image: &Bitmap, dest: Rect) {
        if image.is_empty() || dest.width <= 0.0 || dest.height <= 0.0 {
            return;
        }
        let state = *self.state.current();
        let corners = quad(&state.transform, dest.x, dest.y, dest.width, dest.height);
        let Some(bounds) = self.bounds_of(std::iter::once(&corners)) else {
            return;
        };
        let inverse = state.transform.inverse();
        let (iw, ih) = (image.width() as f32, image.height() as f32);

        let sample = |x: i32, y: i32| -> Option<Color> {
            let p = inverse.transform_point2(Vec2::new(x as f32 + 0.5, y as f32 + 0.5));
            if !dest.contains(p) {
                return None;
            }
            let sx = ((p.x - dest.x) / dest.width * iw) as u32;
            let sy = ((p.y - dest.y) / dest.height * ih) as u32;
            let [r, g, b, a] = image.get(sx.min(image.width() - 1), sy.min(image.height() - 1))?;
            (a > 0).then(|| Color::from_rgba8(r, g, b, a))
        };

        if state.has_shadow() {
            let mut mask = Mask::new(bounds);
            for (x, y) in bounds.cells() {
                if sample(x, y).is_some() {
                    mask.set(x, y);
                }
            }
            let radius = ((state.shadow_blur * 0.4).round() as i32).clamp(1, MAX_SHADOW_RADIUS);
            let halo = mask.dilate(radius, self.width as i32, self.height as i32);
            self.blend_mask(&halo, &Paint::Solid(state.shadow_color), &state, SHADOW_ALPHA);
        }

        for (x, y) in bounds.cells() {
            if let Some(color) = sample(x, y) {
                let idx = self.index(x, y);
                blend(&mut self.pixels[idx], color, state.alpha, state.composite);
            }
        }
    }

    fn read_pixels(&self, x: i32, y: i32, width: u32, height: u32) -> Option<Bitmap> {
        if width == 0 || height == 0 {
            return None;
        }
        let region = Bounds::new(
            x,
            y,
            x.saturating_add(width as i32),
            y.saturating_add(height as i32),
        )?
            .clip(self.width as i32, self.height as i32)?;
        let mut out = Bitmap::new(width, height);
        for (px, py) in region.cells() {
            let [r, g, b, a] = self.pixels[self.index(px, py)];
            out.set(
                (px - x) as u32,
                (py - y) as u32,
                Color::rgba(r, g, b, a).to_rgba8(),
            );
        }
        Some(out)
    }

    fn write_pixels(&mut self, image: &Bitmap, x: i32, y: i32) {
        let Some(region) = Bounds::new(
            x,
            y,
            x.saturating_add(image.width() as i32),
            y.saturating_add(image.height() as i32),
        )
        .and_then(|b| b.clip(self.width as i32, self.height as i32)) else {
            return;
        };
        for (px, py) in region.cells() {
            if let Some([r, g, b, a]) = image.get((px - x) as u32, (py - y) as u32) {
                let idx = self.index(px, py);
                let c = Color::from_rgba8(r, g, b, a);
                self.pixels[idx] = [c.r, c.g, c.b, c.a];
            }
        }
    }
}

fn blend(dst: &mut [f32; 4], src: Color, alpha: f32, mode: CompositeMode) {
    let sa = (src.a * alpha).clamp(0.0, 1.0);
    if sa <= 0.0 {
        return;
    }
    let da = dst[3];
    let out_a = sa + da * (1.0 - sa);
    let source = [src.r, src.g, src.b];

    for (channel, s) in source.iter().enumerate() {
        let d = dst[channel];
        dst[channel] = match mode {
            CompositeMode::SourceOver => (s * sa + d * da * (1.0 - sa)) / out_a,
            CompositeMode::Screen => {
                let screened = 1.0 - (1.0 - s) * (1.0 - d);
                let mixed = if da > 0.0 { screened } else { *s };
                (mixed * sa + d * da * (1.0 - sa)) / out_a
            }
            CompositeMode::Lighter => ((d * da + s * sa) / out_a).min(1.0),
        };
    }
    dst[3] = match mode {
        CompositeMode::Lighter => (da + sa).min(1.0),
        _ => out_a,
    };
}

fn quad(transform: &Affine2, x: f32, y: f32, w: f32, h: f32) -> Vec<Vec2> {
    [
        Vec2::new(x, y),
        Vec2::new(x + w, y),
        Vec2::new(x + w, y + h),
        Vec2::new(x, y + h),
    ]
    .into_iter()
    .map(|p| transform.transform_point2(p))
    .collect()
}

fn disc(center: Vec2, radius: f32, segments: usize) -> Vec<Vec2> {
    (0..segments)
        .map(|i| {
            let angle = i as f32 / segments as f32 * std::f32::consts::TAU;
            center + Vec2::new(angle.cos(), angle.sin()) * radius
        })
        .collect()
}

const DEVICE_LIMIT: f32 = 1.0e7;

/// Converts a device coordinate to a pixel index, keeping far off-surface
/// values away from the integer limits.
fn device_coord(value: f32) -> i32 {
    value.clamp(-DEVICE_LIMIT, DEVICE_LIMIT) as i32
}

/// Half-open integer pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Bounds {
    x0: i32,
    y0: i32,
    x1: i32,
    y1: i32,
}

impl Bounds {
    fn new(x0: i32, y0: i32, x1: i32, y1: i32) -> Option<Self> {
        (x1 > x0 && y1 > y0).then_some(Self { x0, y0, x1, y1 })
    }

    fn clip(self, width: i32, height: i32) -> Option<Self> {
        Self::new(
            self.x0.max(0),
            self.y0.max(0),
            self.x1.min(width),
            self.y1.min(height),
        )
    }

    fn width(&self) -> usize {
        (self.x1 - self.x0) as usize
    }

    fn height(&self) -> usize {
        (self.y1 - self.y0) as usize
    }

    fn cells(self) -> impl Iterator<Item = (i32, i32)> {
        (self.y0..self.y1).flat_map(move |y| (self.x0..self.x1).map(move |x| (x, y)))
    }
}

/// Binary coverage over a clipped pixel rectangle.
#[derive(Debug, Clone)]
struct Mask {
    bounds: Bounds,
    cells: Vec<bool>,
}

impl Mask {
    fn new(bounds: Bounds) -> Self {
        Self {
            bounds,
            cells: vec![false; bounds.width() * bounds.height()],
        }
    }

    fn offset(&self, x: i32, y: i32) -> Option<usize> {
        let b = &self.bounds;
        if x < b.x0 || x >= b.x1 || y < b.y0 || y >= b.y1 {
            return None;
        }
        Some((y - b.y0) as usize * b.width() + (x - b.x0) as usize)
    }

    fn set(&mut self, x: i32, y: i32) {
        if let Some(i) = self.offset(x, y) {
            self.cells[i] = true;
        }
    }

    fn get(&self, x: i32, y: i32) -> bool {
        self.offset(x, y).is_some_and(|i| self.cells[i])
    }

    fn iter(&self) -> impl Iterator<Item = (i32, i32)> + '_ {
        self.bounds.cells().filter(|&(x, y)| self.get(x, y))
    }

    fn fill_polygon(&mut self, poly: &[Vec2]) {
        self.fill_polygons(std::iter::once(poly));
    }

    /// Non-zero winding scanline fill sampled at pixel centres.
    fn fill_polygons<'a>(&mut self, polys: impl Iterator<Item = &'a [Vec2]> + Clone) {
        let mut crossings: Vec<(f32, i32)> = Vec::new();
        for y in self.bounds.y0..self.bounds.y1 {
            let sy = y as f32 + 0.5;
            crossings.clear();
            for poly in polys.clone() {
                if poly.len() < 3 {
                    continue;
                }
                for i in 0..poly.len() {
                    let a = poly[i];
                    let b = poly[(i + 1) % poly.len()];
                    let winding = if a.y <= sy && b.y > sy {
                        1
                    } else if b.y <= sy && a.y > sy {
                        -1
                    } else {
                        continue;
                    };
                    let x = a.x + (sy - a.y) * (b.x - a.x) / (b.y - a.y);
                    crossings.push((x, winding));
                }
            }
            crossings.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut winding = 0;
            for pair in crossings.windows(2) {
                winding += pair[0].1;
                if winding == 0 {
                    continue;
                }
                let start = (pair[0].0 - 0.5).ceil() as i32;
                let end = (pair[1].0 - 0.5).ceil() as i32;
                for x in start.max(self.bounds.x0)..end.min(self.bounds.x1) {
                    self.set(x, y);
                }
            }
        }
    }

    /// Square dilation by `radius`, clipped to the surface.
    fn dilate(&self, radius: i32, width: i32, height: i32) -> Mask {
        let b = self.bounds;
        let grown = Bounds::new(b.x0 - radius, b.y0 - radius, b.x1 + radius, b.y1 + radius)
            .and_then(|g| g.clip(width, height))
            .unwrap_or(b);

        let mut horizontal = Mask::new(grown);
        for y in b.y0..b.y1 {
            for x in grown.x0..grown.x1 {
                if (x - radius..=x + radius).any(|sx| self.get(sx, y)) {
                    horizontal.set(x, y);
                }
            }
        }
        let mut out = Mask::new(grown);
        for y in grown.y0..grown.y1 {
            for x in grown.x0..grown.x1 {
                if (y - radius..=y + radius).any(|sy| horizontal.get(x, sy)) {
                    out.set(x, y);
                }
            }
        }
        out
    }
}
