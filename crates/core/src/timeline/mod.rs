use serde::{Deserialize, Serialize};

/// Transport state of the loaded track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

/// Play/pause/seek transport driven by frame deltas.
#[derive(Debug, Default, Clone)]
pub struct PlaybackClock {
    position: f32,
    duration: f32,
    state: PlaybackState,
}

impl PlaybackClock {
    pub fn new(duration: f32) -> Self {
        Self {
            duration: duration.max(0.0),
            ..Default::default()
        }
    }

    pub fn duration(&self) -> f32 {
        self.duration
    }

    pub fn set_duration(&mut self, duration: f32) {
        self.duration = duration.max(0.0);
        self.position = self.position.min(self.duration);
    }

    pub fn position(&self) -> f32 {
        self.position
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    /// Starts or resumes playback; a track at its end restarts from zero.
    pub fn play(&mut self) {
        if self.position >= self.duration {
            self.position = 0.0;
        }
        self.state = PlaybackState::Playing;
    }

    pub fn pause(&mut self) {
        if self.state == PlaybackState::Playing {
            self.state = PlaybackState::Paused;
        }
    }

    pub fn toggle(&mut self) {
        if self.is_playing() {
            self.pause();
        } else {
            self.play();
        }
    }

    /// Halts playback and rewinds.
    pub fn stop(&mut self) {
        self.state = PlaybackState::Stopped;
        self.position = 0.0;
    }

    pub fn seek(&mut self, seconds: f32) {
        self.position = seconds.clamp(0.0, self.duration);
    }

    /// Moves the position forward while playing; reaching the end stops.
    pub fn advance(&mut self, delta: f32) {
        if !self.is_playing() {
            return;
        }
        self.position = (self.position + delta.max(0.0)).min(self.duration);
        if self.position >= self.duration {
            self.state = PlaybackState::Stopped;
            tracing::debug!(duration = self.duration, "playback reached the end");
        }
    }

    /// Fraction of the track already played.
    pub fn progress(&self) -> f32 {
        if self.duration <= 0.0 {
            0.0
        } else {
            self.position / self.duration
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advances_only_while_playing() {
        let mut clock = PlaybackClock::new(10.0);
        clock.advance(1.0);
        assert_eq!(clock.position(), 0.0);

        clock.play();
        clock.advance(1.5);
        assert_eq!(clock.position(), 1.5);

        clock.pause();
        clock.advance(1.0);
        assert_eq!(clock.position(), 1.5);
        assert_eq!(clock.state(), PlaybackState::Paused);
    }

    #[test]
    fn seek_is_clamped() {
        let mut clock = PlaybackClock::new(4.0);
        clock.seek(12.0);
        assert_eq!(clock.position(), 4.0);
        clock.seek(-1.0);
        assert_eq!(clock.position(), 0.0);
    }

    #[test]
    fn end_of_track_stops_and_replay_rewinds() {
        let mut clock = PlaybackClock::new(1.0);
        clock.play();
        clock.advance(0.6);
        clock.advance(0.6);
        assert!(!clock.is_playing());
        assert_eq!(clock.position(), 1.0);
        assert_eq!(clock.progress(), 1.0);

        clock.play();
        assert_eq!(clock.position(), 0.0);
        assert!(clock.is_playing());
    }

    #[test]
    fn stop_rewinds() {
        let mut clock = PlaybackClock::new(3.0);
        clock.play();
        clock.advance(2.0);
        clock.stop();
        assert_eq!(clock.position(), 0.0);
        assert_eq!(clock.state(), PlaybackState::Stopped);
    }
}
