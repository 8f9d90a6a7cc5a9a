//! Frame export. Rendered frames travel over a bounded channel to a worker
//! thread that encodes them, so the render loop only waits when the queue
//! is full.

use std::{
    io::Write,
    path::{Path, PathBuf},
    process::{Child, ChildStdin, Command, Stdio},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
};

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::{
    canvas::{Bitmap, RasterCanvas},
    config::{RecordingFormat, RecordingSettings},
    Result, VisualizerError,
};

/// Encoder end of the pipeline, owned by the worker thread.
trait FrameSink: Send {
    fn write_frame(&mut self, rgba: Vec<u8>) -> Result<()>;
    fn finish(self: Box<Self>) -> Result<()>;
    fn abort(self: Box<Self>);
}

struct PngSequence {
    dir: PathBuf,
    width: u32,
    height: u32,
    next: u64,
}

impl PngSequence {
    fn create(dir: &Path, width: u32, height: u32) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            width,
            height,
            next: 0,
        })
    }
}

impl FrameSink for PngSequence {
    fn write_frame(&mut self, rgba: Vec<u8>) -> Result<()> {
        let frame = Bitmap::from_rgba(self.width, self.height, rgba)?;
        frame.save_png(self.dir.join(frame_file_name(self.next)))?;
        self.next += 1;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<()> {
        Ok(())
    }

    fn abort(self: Box<Self>) {}
}

/// Raw RGBA piped into an ffmpeg child, muxed with the track's audio.
struct FfmpegPipe {
    child: Child,
    stdin: Option<ChildStdin>,
}

impl FfmpegPipe {
    fn spawn(settings: &RecordingSettings, format: &FrameFormat, audio: Option<&Path>) -> Result<Self> {
        let mut cmd = Command::new(&settings.ffmpeg);
        cmd.args(["-hide_banner", "-loglevel", "error", "-y"])
            .args(["-f", "rawvideo", "-pix_fmt", "rgba"])
            .arg("-video_size")
            .arg(format!("{}x{}", format.width, format.height))
            .arg("-framerate")
            .arg(format.fps.to_string())
            .args(["-i", "-"]);
        if let Some(audio) = audio {
            cmd.arg("-i")
                .arg(audio)
                .args(["-map", "0:v:0", "-map", "1:a:0", "-c:a", "aac", "-shortest"]);
        }
        cmd.args(["-c:v", "libx264", "-preset", "fast", "-crf", "23", "-pix_fmt", "yuv420p"])
            .args(["-movflags", "+faststart"])
            .arg(&settings.output)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());

        let mut child = cmd.spawn().map_err(|err| {
            VisualizerError::Recorder(format!("failed to spawn `{}`: {err}", settings.ffmpeg))
        })?;
        let stdin = child.stdin.take();
        Ok(Self { child, stdin })
    }
}

impl FrameSink for FfmpegPipe {
    fn write_frame(&mut self, rgba: Vec<u8>) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| VisualizerError::Recorder("ffmpeg stdin closed".into()))?;
        stdin.write_all(&rgba)?;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<()> {
        drop(self.stdin.take());
        let status = self.child.wait()?;
        if status.success() {
            Ok(())
        } else {
            Err(VisualizerError::Recorder(format!("ffmpeg exited with {status}")))
        }
    }

    fn abort(mut self: Box<Self>) {
        drop(self.stdin.take());
        if let Err(err) = self.child.kill() {
            tracing::debug!(%err, "ffmpeg already exited");
        }
        let _ = self.child.wait();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FrameFormat {
    width: u32,
    height: u32,
    fps: u32,
}

impl FrameFormat {
    fn frame_bytes(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

/// `frame_00042.png`
pub fn frame_file_name(index: u64) -> String {
    format!("frame_{index:05}.png")
}

struct Worker {
    frames: Sender<Vec<u8>>,
    cancelled: Arc<AtomicBool>,
    handle: JoinHandle<Result<u64>>,
}

/// Exports rendered frames as a PNG sequence or an ffmpeg-encoded video.
pub struct Recorder {
    settings: RecordingSettings,
    format: FrameFormat,
    audio: Option<PathBuf>,
    worker: Option<Worker>,
}

impl Recorder {
    pub fn new(settings: RecordingSettings, width: u32, height: u32, fps: u32) -> Self {
        Self {
            settings,
            format: FrameFormat { width, height, fps },
            audio: None,
            worker: None,
        }
    }

    /// Audio muxed into video output.
    pub fn with_audio(mut self, path: impl Into<PathBuf>) -> Self {
        self.audio = Some(path.into());
        self
    }

    pub fn settings(&self) -> &RecordingSettings {
        &self.settings
    }

    pub fn is_recording(&self) -> bool {
        self.worker.is_some()
    }

    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Err(VisualizerError::Recorder("already recording".into()));
        }
        if self.format.width == 0 || self.format.height == 0 {
            return Err(VisualizerError::InvalidInput("recording size must be non-zero"));
        }
        let sink: Box<dyn FrameSink> = match self.settings.format {
            RecordingFormat::PngSequence => Box::new(PngSequence::create(
                &self.settings.output,
                self.format.width,
                self.format.height,
            )?),
            RecordingFormat::Video => Box::new(FfmpegPipe::spawn(
                &self.settings,
                &self.format,
                self.audio.as_deref(),
            )?),
        };

        let (frames, queue) = bounded(self.settings.queue_depth.max(1));
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let handle = std::thread::Builder::new()
            .name("recorder".into())
            .spawn(move || encode_frames(sink, queue, flag))?;

        tracing::info!(
            output = %self.settings.output.display(),
            format = ?self.settings.format,
            width = self.format.width,
            height = self.format.height,
            fps = self.format.fps,
            "recording started"
        );
        self.worker = Some(Worker {
            frames,
            cancelled,
            handle,
        });
        Ok(())
    }

    /// Queues the canvas content, blocking while the queue is full.
    pub fn push_frame(&mut self, canvas: &RasterCanvas) -> Result<()> {
        let mut rgba = Vec::with_capacity(self.format.frame_bytes());
        canvas.write_rgba8(&mut rgba);
        self.push_rgba(rgba)
    }

    /// Queues one RGBA8 frame of the configured size.
    pub fn push_rgba(&mut self, rgba: Vec<u8>) -> Result<()> {
        if rgba.len() != self.format.frame_bytes() {
            return Err(VisualizerError::InvalidInput(
                "frame size does not match the recording size",
            ));
        }
        let worker = self
            .worker
            .as_ref()
            .ok_or_else(|| VisualizerError::Recorder("not recording".into()))?;
        if worker.frames.send(rgba).is_err() {
            // The worker only hangs up after a failed write; surface its error.
            return match self.join() {
                Err(err) => Err(err),
                Ok(_) => Err(VisualizerError::Recorder("encoder stopped early".into())),
            };
        }
        Ok(())
    }

    /// Flushes queued frames, finalises the output and returns the number of
    /// frames written.
    pub fn stop(&mut self) -> Result<u64> {
        let written = self.join()?;
        tracing::info!(frames = written, output = %self.settings.output.display(), "recording finished");
        Ok(written)
    }

    /// Abandons the export. Queued frames are dropped and a running ffmpeg
    /// child is killed.
    pub fn cancel(&mut self) {
        if let Some(worker) = &self.worker {
            worker.cancelled.store(true, Ordering::Release);
        }
        match self.join() {
            Ok(frames) => tracing::info!(frames, "recording cancelled"),
            Err(err) => tracing::warn!(%err, "recording cancelled with error"),
        }
    }

    fn join(&mut self) -> Result<u64> {
        let Some(worker) = self.worker.take() else {
            return Err(VisualizerError::Recorder("not recording".into()));
        };
        drop(worker.frames);
        worker
            .handle
            .join()
            .map_err(|_| VisualizerError::Recorder("encoder thread panicked".into()))?
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.cancel();
        }
    }
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("settings", &self.settings)
            .field("format", &self.format)
            .field("recording", &self.is_recording())
            .finish()
    }
}

fn encode_frames(mut sink: Box<dyn FrameSink>, queue: Receiver<Vec<u8>>, cancelled: Arc<AtomicBool>) -> Result<u64> {
    let mut written = 0;
    for frame in queue.iter() {
        if cancelled.load(Ordering::Acquire) {
            sink.abort();
            return Ok(written);
        }
        if let Err(err) = sink.write_frame(frame) {
            tracing::error!(%err, frame = written, "frame encoding failed");
            sink.abort();
            return Err(err);
        }
        written += 1;
    }
    if cancelled.load(Ordering::Acquire) {
        sink.abort();
        return Ok(written);
    }
    sink.finish()?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::{Canvas, Color, Rect};

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "bass-reactive-{name}-{}-{}",
            std::process::id(),
            fastrand::u64(..)
        ));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn png_settings(dir: &Path) -> RecordingSettings {
        RecordingSettings {
            output: dir.to_path_buf(),
            format: RecordingFormat::PngSequence,
            queue_depth: 2,
            ..Default::default()
        }
    }

    #[test]
    fn writes_numbered_png_frames() {
        let dir = temp_dir("png");
        let mut recorder = Recorder::new(png_settings(&dir), 8, 4, 30);
        recorder.start().unwrap();

        let mut canvas = RasterCanvas::new(8, 4);
        for i in 0..5 {
            let shade = i as f32 / 4.0;
            canvas.fill_rect(Rect::new(0.0, 0.0, 8.0, 4.0), &Color::rgba(shade, 0.0, 0.0, 1.0).into());
            recorder.push_frame(&canvas).unwrap();
        }
        assert_eq!(recorder.stop().unwrap(), 5);
        assert!(!recorder.is_recording());

        let last = Bitmap::open(dir.join(frame_file_name(4))).unwrap();
        assert_eq!((last.width(), last.height()), (8, 4));
        assert_eq!(last.get(3, 2), Some([255, 0, 0, 255]));
        assert!(!dir.join(frame_file_name(5)).exists());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn rejects_mismatched_frames() {
        let dir = temp_dir("size");
        let mut recorder = Recorder::new(png_settings(&dir), 8, 4, 30);
        recorder.start().unwrap();
        assert!(recorder.push_rgba(vec![0; 10]).is_err());
        assert_eq!(recorder.stop().unwrap(), 0);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn push_requires_start() {
        let mut recorder = Recorder::new(RecordingSettings::default(), 2, 2, 30);
        assert!(matches!(
            recorder.push_rgba(vec![0; 16]),
            Err(VisualizerError::Recorder(_))
        ));
        assert!(recorder.stop().is_err());
    }

    #[test]
    fn double_start_is_refused() {
        let dir = temp_dir("double");
        let mut recorder = Recorder::new(png_settings(&dir), 2, 2, 30);
        recorder.start().unwrap();
        assert!(recorder.start().is_err());
        recorder.cancel();
        assert!(!recorder.is_recording());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_encoder_fails_to_start() {
        let settings = RecordingSettings {
            output: temp_dir("video").join("out.mp4"),
            format: RecordingFormat::Video,
            ffmpeg: "definitely-not-an-ffmpeg-binary".into(),
            ..Default::default()
        };
        let mut recorder = Recorder::new(settings, 4, 4, 30);
        assert!(matches!(recorder.start(), Err(VisualizerError::Recorder(_))));
    }

    #[test]
    fn file_names_are_zero_padded() {
        assert_eq!(frame_file_name(7), "frame_00007.png");
        assert_eq!(frame_file_name(123_456), "frame_123456.png");
    }
}
