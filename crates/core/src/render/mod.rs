//! Per-frame driver: analyze, update every module, then draw.

mod background;

pub use background::{Background, FrameSequence};

use crate::{
    canvas::{Bitmap, Canvas, Color, Paint, RadialGradient, Rect},
    session::Session,
    Result,
};

const VIGNETTE_INNER: f32 = 0.3;
const VIGNETTE_OUTER: f32 = 0.8;
const VIGNETTE_ALPHA: f32 = 0.6;

/// Summary of one rendered frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameStats {
    pub frame: u64,
    /// Playback position the frame was analysed at, in seconds.
    pub time: f32,
    pub bass: f32,
    pub beat: bool,
    pub modules_drawn: usize,
}

/// Render loop state. A stopped loop refuses to tick, which is how the host
/// halts frame scheduling synchronously.
#[derive(Debug, Default)]
pub struct FrameLoop {
    running: bool,
    frame: u64,
}

impl FrameLoop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self) {
        if !self.running {
            tracing::debug!(frame = self.frame, "frame loop started");
        }
        self.running = true;
    }

    pub fn stop(&mut self) {
        if self.running {
            tracing::debug!(frame = self.frame, "frame loop stopped");
        }
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frame
    }

    /// One iteration. Every module is updated before any of them is drawn.
    pub fn tick(&mut self, session: &mut Session, canvas: &mut dyn Canvas) -> Option<FrameStats> {
        if !self.running {
            return None;
        }
        let time = session.clock().position();
        session.analyze();
        session.update_modules();
        draw_frame(session, canvas);

        let snapshot = session.snapshot();
        let stats = FrameStats {
            frame: self.frame,
            time,
            bass: snapshot.bass_level,
            beat: snapshot.beat_detected,
            modules_drawn: session.registry().iter().filter(|m| m.enabled()).count(),
        };
        self.frame += 1;
        Some(stats)
    }

    /// Renders up to `frames` frames offline, advancing the clock by one
    /// frame duration after each and handing the canvas to `sink`. Stops
    /// early once playback ends. Returns the number of frames rendered.
    pub fn run<C, F>(
        &mut self,
        session: &mut Session,
        canvas: &mut C,
        frames: u64,
        mut sink: F,
    ) -> Result<u64>
    where
        C: Canvas,
        F: FnMut(&C, &FrameStats) -> Result<()>,
    {
        self.start();
        let mut rendered = 0;
        while rendered < frames {
            let Some(stats) = self.tick(session, canvas) else {
                break;
            };
            sink(canvas, &stats)?;
            rendered += 1;
            if stats.beat {
                tracing::trace!(frame = stats.frame, bass = stats.bass, "beat frame");
            }
            if session.audio().is_some() && !session.clock().is_playing() {
                break;
            }
            session.advance_frame();
        }
        self.stop();
        Ok(rendered)
    }
}

/// Clears the surface, paints the background and vignette, then draws the
/// registered modules in order.
pub fn draw_frame(session: &mut Session, canvas: &mut dyn Canvas) {
    let config = &session.config().render;
    let (fill, vignette) = (config.background, config.vignette);
    let full = full_rect(canvas);

    canvas.save();
    canvas.clear();
    match background_placement(session, full) {
        Some((image, dest)) => canvas.draw_image(image, dest),
        None => canvas.fill_rect(full, &Paint::Solid(fill)),
    }
    if vignette {
        draw_vignette(canvas);
    }
    session.registry_mut().draw_all(canvas);
    canvas.restore();
}

/// Picks the background bitmap for the current frame and where it lands.
/// Frame sequences are cover-fitted and only shown while playing; still
/// images stretch unless `cover_image` is set.
fn background_placement(session: &Session, full: Rect) -> Option<(&Bitmap, Rect)> {
    let background = session.background()?;
    if background.is_sequence() && !session.clock().is_playing() {
        return None;
    }
    let image = background
        .frame_at(session.clock().position())
        .filter(|image| !image.is_empty())?;
    let dest = if background.is_sequence() || session.config().render.cover_image {
        cover_rect(image, full.width, full.height)
    } else {
        full
    };
    Some((image, dest))
}

/// Scales `image` to cover a `width`×`height` surface, centred.
pub fn cover_rect(image: &Bitmap, width: f32, height: f32) -> Rect {
    let image_ratio = image.width() as f32 / image.height().max(1) as f32;
    let canvas_ratio = width / height.max(1.0);
    let (w, h) = if image_ratio > canvas_ratio {
        (height * image_ratio, height)
    } else {
        (width, width / image_ratio)
    };
    Rect::new((width - w) / 2.0, (height - h) / 2.0, w, h)
}

fn draw_vignette(canvas: &mut dyn Canvas) {
    let (w, h) = (canvas.width() as f32, canvas.height() as f32);
    let gradient = RadialGradient::new(w / 2.0, h / 2.0, w.min(h) * VIGNETTE_INNER, w.max(h) * VIGNETTE_OUTER)
        .stop(0.0, Color::TRANSPARENT)
        .stop(1.0, Color::BLACK.with_alpha(VIGNETTE_ALPHA));
    let full = full_rect(canvas);
    canvas.fill_rect(full, &gradient.into());
}

fn full_rect(canvas: &dyn Canvas) -> Rect {
    Rect::new(0.0, 0.0, canvas.width() as f32, canvas.height() as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::{
        audio::AudioBuffer,
        canvas::{DrawCommand, RasterCanvas, RecordingCanvas},
        modules::ModuleKind,
        AppConfig,
    };

    fn session() -> Session {
        Session::new(AppConfig::default()).unwrap()
    }

    #[test]
    fn stopped_loop_does_not_tick() {
        let mut session = session();
        let mut canvas = RecordingCanvas::new(64, 64);
        let mut frames = FrameLoop::new();
        assert!(frames.tick(&mut session, &mut canvas).is_none());
        assert!(canvas.commands().is_empty());

        frames.start();
        assert_eq!(frames.tick(&mut session, &mut canvas).unwrap().frame, 0);
        frames.stop();
        assert!(frames.tick(&mut session, &mut canvas).is_none());
        assert_eq!(frames.frames_rendered(), 1);
    }

    #[test]
    fn frame_starts_with_clear_background_and_vignette() {
        let mut session = session();
        let mut canvas = RecordingCanvas::new(64, 32);
        let mut frames = FrameLoop::new();
        frames.start();
        frames.tick(&mut session, &mut canvas);

        let commands = canvas.commands();
        assert!(matches!(commands[0], DrawCommand::Save));
        assert!(matches!(commands[1], DrawCommand::Clear));
        match &commands[2] {
            DrawCommand::FillRect { paint, .. } => {
                assert_eq!(*paint, Paint::Solid(AppConfig::default().render.background));
            }
            other => panic!("expected background fill, got {other:?}"),
        }
        assert!(matches!(
            &commands[3],
            DrawCommand::FillRect { paint: Paint::Radial(_), .. }
        ));
        assert!(matches!(commands.last(), Some(DrawCommand::Restore)));
        assert_eq!(canvas.save_depth(), 0);
    }

    #[test]
    fn vignette_can_be_disabled() {
        let mut config = AppConfig::default();
        config.render.vignette = false;
        let mut session = Session::new(config).unwrap();
        let mut canvas = RecordingCanvas::new(16, 16);
        draw_frame(&mut session, &mut canvas);
        let radial = canvas
            .commands()
            .iter()
            .filter(|c| matches!(c, DrawCommand::FillRect { paint: Paint::Radial(_), .. }))
            .count();
        assert_eq!(radial, 0);
    }

    #[test]
    fn background_image_is_cover_fitted() {
        let wide = Bitmap::new(200, 100);
        let rect = cover_rect(&wide, 100.0, 100.0);
        assert_eq!((rect.width, rect.height), (200.0, 100.0));
        assert_eq!((rect.x, rect.y), (-50.0, 0.0));

        let tall = Bitmap::new(100, 400);
        let rect = cover_rect(&tall, 200.0, 100.0);
        assert_eq!((rect.width, rect.height), (200.0, 800.0));
        assert_eq!(rect.y, -350.0);
    }

    #[test]
    fn background_image_stretches_by_default() {
        let mut session = session();
        session.set_background(Some(Background::image(Bitmap::new(4, 2))));
        let mut canvas = RecordingCanvas::new(8, 8);
        draw_frame(&mut session, &mut canvas);
        assert_eq!(
            canvas.commands()[2],
            DrawCommand::DrawImage { dest: Rect::new(0.0, 0.0, 8.0, 8.0) }
        );
    }

    #[test]
    fn background_image_can_be_cover_fitted() {
        let mut config = AppConfig::default();
        config.render.cover_image = true;
        let mut session = Session::new(config).unwrap();
        session.set_background(Some(Background::image(Bitmap::new(4, 2))));
        let mut canvas = RecordingCanvas::new(8, 8);
        draw_frame(&mut session, &mut canvas);
        assert_eq!(
            canvas.commands()[2],
            DrawCommand::DrawImage { dest: Rect::new(-4.0, 0.0, 16.0, 8.0) }
        );
    }

    fn solid(rgba: [u8; 4]) -> Arc<Bitmap> {
        let mut frame = Bitmap::new(4, 2);
        frame.fill(rgba);
        Arc::new(frame)
    }

    #[test]
    fn frame_sequence_loops_with_the_clock_while_playing() {
        let mut config = AppConfig::default();
        config.render.vignette = false;
        let mut session = Session::new(config).unwrap();
        session.load_audio(AudioBuffer::mono(vec![0.0; 44_100 * 2], 44_100).unwrap());
        let red = [255, 0, 0, 255];
        let green = [0, 255, 0, 255];
        let frames = FrameSequence::new(vec![solid(red), solid(green)], 4.0).unwrap();
        session.set_background(Some(Background::Frames(frames)));
        let mut canvas = RasterCanvas::new(8, 8);

        // Paused: the video is not shown and the fill takes over.
        draw_frame(&mut session, &mut canvas);
        assert_eq!(canvas.pixel(4, 4).unwrap().to_rgba8(), [17, 17, 17, 255]);

        session.play();
        let mut seen = Vec::new();
        for time in [0.1, 0.3, 0.6, 0.8] {
            session.seek(time);
            draw_frame(&mut session, &mut canvas);
            seen.push(canvas.pixel(4, 4).unwrap().to_rgba8());
        }
        assert_eq!(seen, vec![red, green, red, green]);
    }

    #[test]
    fn frame_sequence_is_cover_fitted() {
        let mut session = session();
        session.load_audio(AudioBuffer::mono(vec![0.0; 44_100], 44_100).unwrap());
        session.play();
        let frames = FrameSequence::new(vec![solid([0, 0, 255, 255])], 30.0).unwrap();
        session.set_background(Some(Background::Frames(frames)));
        let mut canvas = RecordingCanvas::new(8, 8);
        draw_frame(&mut session, &mut canvas);
        assert_eq!(
            canvas.commands()[2],
            DrawCommand::DrawImage { dest: Rect::new(-4.0, 0.0, 16.0, 8.0) }
        );
    }

    #[test]
    fn modules_draw_after_the_vignette() {
        let mut session = session();
        session.add_module(ModuleKind::Speaker);
        session.add_module(ModuleKind::Neon);
        let mut canvas = RecordingCanvas::new(128, 128);
        let mut frames = FrameLoop::new();
        frames.start();
        let stats = frames.tick(&mut session, &mut canvas).unwrap();
        assert_eq!(stats.modules_drawn, 2);
        assert!(canvas.commands().len() > 5);
        assert_eq!(canvas.save_depth(), 0);
    }

    #[test]
    fn offline_run_stops_at_the_end_of_the_track() {
        let mut config = AppConfig::default();
        config.render.fps = 4;
        let mut session = Session::new(config).unwrap();
        session.load_audio(AudioBuffer::mono(vec![0.0; 44_100 / 2], 44_100).unwrap());
        session.play();

        let mut canvas = RasterCanvas::new(16, 16);
        let mut frames = FrameLoop::new();
        let mut seen = Vec::new();
        let count = frames
            .run(&mut session, &mut canvas, 100, |_, stats| {
                seen.push(stats.time);
                Ok(())
            })
            .unwrap();
        assert_eq!(count, 3);
        assert_eq!(seen, vec![0.0, 0.25, 0.5]);
        assert!(!frames.is_running());
    }
}
