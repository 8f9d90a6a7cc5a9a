use std::sync::Arc;

use crate::{canvas::Bitmap, Result, VisualizerError};

/// What fills the canvas behind the modules.
#[derive(Debug, Clone)]
pub enum Background {
    /// Still image, stretched to the surface unless the config asks for
    /// cover fitting.
    Image(Arc<Bitmap>),
    /// Looping frame sequence, always cover-fitted. Shown only while
    /// playback runs.
    Frames(FrameSequence),
}

impl Background {
    pub fn image(image: Bitmap) -> Self {
        Self::Image(Arc::new(image))
    }

    /// Bitmap to show at playback position `time`, if any.
    pub fn frame_at(&self, time: f32) -> Option<&Bitmap> {
        match self {
            Self::Image(image) => Some(image),
            Self::Frames(frames) => frames.frame_at(time),
        }
    }

    pub fn is_sequence(&self) -> bool {
        matches!(self, Self::Frames(_))
    }
}

/// Decoded video frames played back at a fixed rate and wrapped at the end.
#[derive(Debug, Clone)]
pub struct FrameSequence {
    frames: Vec<Arc<Bitmap>>,
    fps: f32,
}

impl FrameSequence {
    pub fn new(frames: Vec<Arc<Bitmap>>, fps: f32) -> Result<Self> {
        if frames.is_empty() {
            return Err(VisualizerError::InvalidInput("frame sequence is empty"));
        }
        if !(fps.is_finite() && fps > 0.0) {
            return Err(VisualizerError::InvalidInput("frame rate must be positive"));
        }
        Ok(Self { frames, fps })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn fps(&self) -> f32 {
        self.fps
    }

    /// Seconds before the sequence wraps.
    pub fn duration(&self) -> f32 {
        self.frames.len() as f32 / self.fps
    }

    pub fn index_at(&self, time: f32) -> usize {
        let frame = (time.max(0.0) * self.fps).floor();
        if frame.is_finite() {
            frame as usize % self.frames.len()
        } else {
            0
        }
    }

    pub fn frame_at(&self, time: f32) -> Option<&Bitmap> {
        self.frames.get(self.index_at(time)).map(Arc::as_ref)
    }
}
