//! Per-frame bass extraction, smoothing and beat flagging.
//!
//! Only one feature is extracted: weighted energy of the bins below
//! [`BASS_CUTOFF_HZ`]. Beat detection is a rate-limited rise detector on the
//! smoothed mix level, not an onset or tempo tracker. It misses beats on
//! sustained bass and fires on sudden gain jumps; both are accepted.

use serde::{Deserialize, Serialize};

/// Upper edge of the band treated as bass.
pub const BASS_CUTOFF_HZ: f32 = 200.0;
/// Blend factor applied when the target rises above the current level.
pub const ATTACK: f32 = 0.4;
/// Blend factor applied when the target falls below the current level.
pub const RELEASE: f32 = 0.15;
/// Amount subtracted per frame from every level while idle.
pub const IDLE_DECAY: f32 = 0.05;
pub const BEAT_DELTA: f32 = 0.08;
pub const BEAT_FLOOR: f32 = 0.35;
pub const BEAT_COOLDOWN_FRAMES: u32 = 8;

/// Shared per-frame audio features. Written once per frame by the analysis
/// step, read by every module.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioSnapshot {
    pub frequency_mix: Vec<u8>,
    pub frequency_left: Vec<u8>,
    pub frequency_right: Vec<u8>,
    pub bass_level: f32,
    pub bass_level_left: f32,
    pub bass_level_right: f32,
    pub beat_detected: bool,
}

impl AudioSnapshot {
    /// Snapshot with zeroed bin buffers of `bin_count` entries each.
    pub fn with_bin_count(bin_count: usize) -> Self {
        Self {
            frequency_mix: vec![0; bin_count],
            frequency_left: vec![0; bin_count],
            frequency_right: vec![0; bin_count],
            ..Default::default()
        }
    }

    pub fn bin_count(&self) -> usize {
        self.frequency_mix.len()
    }

    pub fn has_frequency_data(&self) -> bool {
        !self.frequency_mix.is_empty()
    }

    /// Bass level for the requested channel.
    pub fn bass_for(&self, channel: Channel) -> f32 {
        match channel {
            Channel::Mix => self.bass_level,
            Channel::Left => self.bass_level_left,
            Channel::Right => self.bass_level_right,
        }
    }

    /// Zeroes levels and beat flag, leaving bin buffers allocated.
    pub fn reset_levels(&mut self) {
        self.bass_level = 0.0;
        self.bass_level_left = 0.0;
        self.bass_level_right = 0.0;
        self.beat_detected = false;
    }
}

/// Audio channel selector used by stereo-aware modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    #[default]
    #[serde(rename = "both", alias = "mix")]
    Mix,
    Left,
    Right,
}

/// Weighted low-frequency energy of a byte spectrum, normalised to `[0, 1]`.
///
/// Bins `1..ceil(200 Hz / bin_width)` contribute with weight
/// `1 + (n - i) / n`, favouring the lowest bins; the DC bin is skipped.
/// Returns `0.0` when no bin qualifies.
pub fn bass_energy(bins: &[u8], sample_rate: f32, fft_size: usize) -> f32 {
    if fft_size == 0 || sample_rate <= 0.0 {
        return 0.0;
    }
    let bin_width = sample_rate / fft_size as f32;
    let bass_bins = (BASS_CUTOFF_HZ / bin_width).ceil() as usize;

    let mut weighted = 0.0_f32;
    let mut total = 0.0_f32;
    for (i, &value) in bins.iter().enumerate().take(bass_bins).skip(1) {
        let weight = 1.0 + (bass_bins - i) as f32 / bass_bins as f32;
        weighted += value as f32 * weight;
        total += weight;
    }

    if total > 0.0 {
        weighted / total / 255.0
    } else {
        0.0
    }
}

/// Asymmetric one-pole smoothing: fast attack, slow release.
pub fn smooth_bass(current: f32, target: f32) -> f32 {
    let rate = if target > current { ATTACK } else { RELEASE };
    current + (target - current) * rate
}

/// Stateful smoother and beat flagger for the three bass channels.
#[derive(Debug, Clone, Default)]
pub struct BassTracker {
    previous_bass: f32,
    beat_cooldown: u32,
}

impl BassTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Active step: raw energies are extracted from the snapshot's bins,
    /// scaled by `sensitivity`, smoothed into the snapshot levels and the
    /// beat flag is re-evaluated.
    pub fn process(&mut self, snapshot: &mut AudioSnapshot, sample_rate: f32, fft_size: usize, sensitivity: f32) {
        let raw_mix = bass_energy(&snapshot.frequency_mix, sample_rate, fft_size);
        let raw_left = bass_energy(&snapshot.frequency_left, sample_rate, fft_size);
        let raw_right = bass_energy(&snapshot.frequency_right, sample_rate, fft_size);
        self.apply(snapshot, [raw_mix, raw_left, raw_right], sensitivity);
    }

    /// Smooths pre-extracted raw energies (mix, left, right).
    pub fn apply(&mut self, snapshot: &mut AudioSnapshot, raw: [f32; 3], sensitivity: f32) {
        let target = |energy: f32| (energy * sensitivity).min(1.0);

        snapshot.bass_level = smooth_bass(snapshot.bass_level, target(raw[0]));
        snapshot.bass_level_left = smooth_bass(snapshot.bass_level_left, target(raw[1]));
        snapshot.bass_level_right = smooth_bass(snapshot.bass_level_right, target(raw[2]));

        self.beat_cooldown = self.beat_cooldown.saturating_sub(1);
        let rise = snapshot.bass_level - self.previous_bass;
        snapshot.beat_detected =
            rise > BEAT_DELTA && snapshot.bass_level > BEAT_FLOOR && self.beat_cooldown == 0;
        if snapshot.beat_detected {
            self.beat_cooldown = BEAT_COOLDOWN_FRAMES;
            tracing::trace!(bass = snapshot.bass_level, "beat");
        }
        self.previous_bass = snapshot.bass_level;
    }

    /// Idle step used while paused or before any analyser exists: every
    /// level loses [`IDLE_DECAY`] and the beat flag is cleared.
    pub fn decay(&mut self, snapshot: &mut AudioSnapshot) {
        snapshot.bass_level = (snapshot.bass_level - IDLE_DECAY).max(0.0);
        snapshot.bass_level_left = (snapshot.bass_level_left - IDLE_DECAY).max(0.0);
        snapshot.bass_level_right = (snapshot.bass_level_right - IDLE_DECAY).max(0.0);
        snapshot.beat_detected = false;
    }

    pub fn reset(&mut self) {
        self.previous_bass = 0.0;
        self.beat_cooldown = 0;
    }

    pub fn cooldown(&self) -> u32 {
        self.beat_cooldown
    }
}
