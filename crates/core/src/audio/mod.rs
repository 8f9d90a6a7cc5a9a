//! Decoded audio and the analyser graph feeding the per-frame snapshot.
//!
//! [`FrequencyAnalyser`] reproduces the byte spectrum of a browser analyser
//! node (Blackman window, temporal smoothing, decibel mapping) so that the
//! bass thresholds downstream behave the same on offline renders.

use std::{f32::consts::PI, fmt, io::Read, path::Path, sync::Arc};

use hound::{SampleFormat, WavReader};
use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};

use crate::{AudioConfig, AudioSnapshot, Result, VisualizerError};

/// Decoded stereo PCM. Mono sources are duplicated to both channels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioBuffer {
    pub left: Vec<f32>,
    pub right: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(left: Vec<f32>, right: Vec<f32>, sample_rate: u32) -> Result<Self> {
        if left.len() != right.len() {
            return Err(VisualizerError::InvalidInput(
                "stereo channels must have the same length",
            ));
        }
        if sample_rate == 0 {
            return Err(VisualizerError::InvalidInput("sample rate must be non-zero"));
        }
        Ok(Self {
            left,
            right,
            sample_rate,
        })
    }

    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Result<Self> {
        Self::new(samples.clone(), samples, sample_rate)
    }

    pub fn from_wav(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let reader = WavReader::open(path)?;
        let buffer = Self::decode(reader)?;
        tracing::info!(
            path = %path.display(),
            sample_rate = buffer.sample_rate,
            seconds = buffer.duration(),
            "decoded audio"
        );
        Ok(buffer)
    }

    pub fn from_wav_reader<R: Read>(reader: R) -> Result<Self> {
        Self::decode(WavReader::new(reader)?)
    }

    fn decode<R: Read>(mut reader: WavReader<R>) -> Result<Self> {
        let spec = reader.spec();
        let channels = usize::from(spec.channels);
        if channels == 0 {
            return Err(VisualizerError::InvalidInput("wav file declares no channels"));
        }

        let interleaved: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader.samples::<f32>().collect::<std::result::Result<_, _>>()?,
            SampleFormat::Int => {
                let scale = 1.0 / (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 * scale))
                    .collect::<std::result::Result<_, _>>()?
            }
        };

        let frames = interleaved.len() / channels;
        let mut left = Vec::with_capacity(frames);
        let mut right = Vec::with_capacity(frames);
        for frame in interleaved.chunks_exact(channels) {
            left.push(frame[0]);
            right.push(if channels > 1 { frame[1] } else { frame[0] });
        }

        Self::new(left, right, spec.sample_rate)
    }

    pub fn len(&self) -> usize {
        self.left.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }

    pub fn duration(&self) -> f32 {
        self.len() as f32 / self.sample_rate.max(1) as f32
    }

    /// Sample index corresponding to a playback position, clamped to the end.
    pub fn index_at(&self, seconds: f32) -> usize {
        ((seconds.max(0.0) * self.sample_rate as f32) as usize).min(self.len())
    }
}

/// Byte spectrum analyser with the browser analyser-node semantics.
pub struct FrequencyAnalyser {
    fft_size: usize,
    smoothing: f32,
    min_decibels: f32,
    max_decibels: f32,
    window: Vec<f32>,
    smoothed: Vec<f32>,
    bytes: Vec<u8>,
    plan: Arc<dyn RealToComplex<f32>>,
    input: Vec<f32>,
    spectrum: Vec<Complex32>,
    scratch: Vec<Complex32>,
}

impl FrequencyAnalyser {
    pub fn new(config: &AudioConfig) -> Result<Self> {
        let fft_size = config.fft_size;
        if fft_size < 32 || !fft_size.is_power_of_two() {
            return Err(VisualizerError::InvalidInput(
                "fft_size must be a power of two of at least 32",
            ));
        }
        let mut planner = RealFftPlanner::<f32>::new();
        let plan = planner.plan_fft_forward(fft_size);
        let input = plan.make_input_vec();
        let spectrum = plan.make_output_vec();
        let scratch = plan.make_scratch_vec();

        Ok(Self {
            fft_size,
            smoothing: config.smoothing_time_constant.clamp(0.0, 1.0),
            min_decibels: config.min_decibels,
            max_decibels: config.max_decibels,
            window: blackman_window(fft_size),
            smoothed: vec![0.0; fft_size / 2],
            bytes: vec![0; fft_size / 2],
            plan,
            input,
            spectrum,
            scratch,
        })
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Latest byte spectrum.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Forgets the smoothing history.
    pub fn reset(&mut self) {
        self.smoothed.fill(0.0);
        self.bytes.fill(0);
    }

    /// Analyses the most recent `fft_size` samples of `samples`; shorter
    /// input is zero-padded at the front.
    pub fn analyse(&mut self, samples: &[f32]) -> Result<&[u8]> {
        let n = self.fft_size;
        let take = samples.len().min(n);
        let pad = n - take;
        self.input[..pad].fill(0.0);
        for (i, &sample) in samples[samples.len() - take..].iter().enumerate() {
            self.input[pad + i] = sample * self.window[pad + i];
        }
        self.transform()
    }

    fn transform(&mut self) -> Result<&[u8]> {
        self.plan
            .process_with_scratch(&mut self.input, &mut self.spectrum, &mut self.scratch)?;

        let n = self.fft_size as f32;
        let tau = self.smoothing;
        let range = self.max_decibels - self.min_decibels;
        for (k, bin) in self.spectrum.iter().take(self.bin_count()).enumerate() {
            let magnitude = bin.norm() / n;
            let value = tau * self.smoothed[k] + (1.0 - tau) * magnitude;
            self.smoothed[k] = if value.is_finite() { value } else { 0.0 };

            let db = 20.0 * self.smoothed[k].log10();
            let scaled = (255.0 / range * (db - self.min_decibels)).floor();
            self.bytes[k] = if scaled.is_finite() {
                scaled.clamp(0.0, 255.0) as u8
            } else {
                0
            };
        }
        Ok(&self.bytes)
    }
}

impl fmt::Debug for FrequencyAnalyser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrequencyAnalyser")
            .field("fft_size", &self.fft_size)
            .field("smoothing", &self.smoothing)
            .field("min_decibels", &self.min_decibels)
            .field("max_decibels", &self.max_decibels)
            .finish()
    }
}

fn blackman_window(n: usize) -> Vec<f32> {
    const A0: f32 = 0.42;
    const A1: f32 = 0.5;
    const A2: f32 = 0.08;
    (0..n)
        .map(|i| {
            let x = i as f32 / n as f32;
            A0 - A1 * (2.0 * PI * x).cos() + A2 * (4.0 * PI * x).cos()
        })
        .collect()
}

/// The three analysers of a session: stereo mix, left and right.
#[derive(Debug)]
pub struct AudioGraph {
    mix: FrequencyAnalyser,
    left: FrequencyAnalyser,
    right: FrequencyAnalyser,
    mix_scratch: Vec<f32>,
}

impl AudioGraph {
    pub fn new(config: &AudioConfig) -> Result<Self> {
        let graph = Self {
            mix: FrequencyAnalyser::new(config)?,
            left: FrequencyAnalyser::new(config)?,
            right: FrequencyAnalyser::new(config)?,
            mix_scratch: Vec::with_capacity(config.fft_size),
        };
        tracing::debug!(fft_size = config.fft_size, "audio graph ready");
        Ok(graph)
    }

    pub fn fft_size(&self) -> usize {
        self.mix.fft_size()
    }

    pub fn bin_count(&self) -> usize {
        self.mix.bin_count()
    }

    pub fn reset(&mut self) {
        self.mix.reset();
        self.left.reset();
        self.right.reset();
    }

    /// Analyses the window ending at `seconds` and copies the three byte
    /// spectra into the snapshot buffers, reusing their allocations.
    pub fn analyse_at(
        &mut self,
        buffer: &AudioBuffer,
        seconds: f32,
        snapshot: &mut AudioSnapshot,
    ) -> Result<()> {
        let end = buffer.index_at(seconds);
        let start = end.saturating_sub(self.fft_size());
        let left = &buffer.left[start..end];
        let right = &buffer.right[start..end];

        self.mix_scratch.clear();
        self.mix_scratch
            .extend(left.iter().zip(right).map(|(l, r)| (l + r) * 0.5));

        copy_into(&mut snapshot.frequency_mix, self.mix.analyse(&self.mix_scratch)?);
        copy_into(&mut snapshot.frequency_left, self.left.analyse(left)?);
        copy_into(&mut snapshot.frequency_right, self.right.analyse(right)?);
        Ok(())
    }
}

fn copy_into(target: &mut Vec<u8>, source: &[u8]) {
    if target.len() == source.len() {
        target.copy_from_slice(source);
    } else {
        target.clear();
        target.extend_from_slice(source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: u32, seconds: f32, amplitude: f32) -> Vec<f32> {
        let count = (sample_rate as f32 * seconds) as usize;
        (0..count)
            .map(|i| amplitude * (2.0 * PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn silence_maps_to_zero_bytes() {
        let mut analyser = FrequencyAnalyser::new(&AudioConfig::default()).unwrap();
        let bytes = analyser.analyse(&vec![0.0; 2048]).unwrap();
        assert_eq!(bytes.len(), 1024);
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn low_tone_lands_in_bass_bins() {
        let config = AudioConfig {
            smoothing_time_constant: 0.0,
            ..Default::default()
        };
        let mut analyser = FrequencyAnalyser::new(&config).unwrap();
        let samples = sine(86.0, 44_100, 0.1, 0.9);
        let bytes = analyser.analyse(&samples).unwrap().to_vec();

        // 86 Hz sits on bin 4 at 21.5 Hz per bin.
        let peak = bytes
            .iter()
            .enumerate()
            .max_by_key(|&(_, &b)| b)
            .map(|(i, _)| i)
            .unwrap();
        assert!((3..=5).contains(&peak), "peak at bin {peak}");
        assert!(bytes[4] > 200);
        assert!(bytes[200] < bytes[4] / 2);
    }

    #[test]
    fn smoothing_lags_behind_input() {
        let mut analyser = FrequencyAnalyser::new(&AudioConfig::default()).unwrap();
        let loud = sine(86.0, 44_100, 0.1, 0.01);
        let first = analyser.analyse(&loud).unwrap()[4];
        let second = analyser.analyse(&loud).unwrap()[4];
        assert!(second > first);

        let fading = analyser.analyse(&vec![0.0; 2048]).unwrap()[4];
        assert!(fading > 0 && fading <= second);
    }

    #[test]
    fn rejects_odd_fft_sizes() {
        let config = AudioConfig {
            fft_size: 1000,
            ..Default::default()
        };
        assert!(FrequencyAnalyser::new(&config).is_err());
    }

    #[test]
    fn graph_splits_channels() {
        let tone = sine(86.0, 44_100, 0.5, 0.9);
        let buffer = AudioBuffer::new(tone.clone(), vec![0.0; tone.len()], 44_100).unwrap();
        let mut graph = AudioGraph::new(&AudioConfig::default()).unwrap();
        let mut snapshot = AudioSnapshot::default();

        graph.analyse_at(&buffer, 0.25, &mut snapshot).unwrap();

        assert_eq!(snapshot.frequency_mix.len(), 1024);
        assert!(snapshot.frequency_left[4] > 0);
        assert_eq!(snapshot.frequency_right[4], 0);
        assert!(snapshot.frequency_mix[4] > 0);
        assert!(snapshot.frequency_mix[4] <= snapshot.frequency_left[4]);
    }

    #[test]
    fn start_of_track_is_zero_padded() {
        let buffer = AudioBuffer::mono(vec![0.5; 100], 44_100).unwrap();
        let mut graph = AudioGraph::new(&AudioConfig::default()).unwrap();
        let mut snapshot = AudioSnapshot::default();
        graph.analyse_at(&buffer, 0.0, &mut snapshot).unwrap();
        assert!(snapshot.frequency_mix.iter().all(|&b| b == 0));
    }

    #[test]
    fn decodes_int_wav() {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for _ in 0..4 {
                writer.write_sample(16_384_i16).unwrap();
                writer.write_sample(-16_384_i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.set_position(0);

        let buffer = AudioBuffer::from_wav_reader(cursor).unwrap();
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.sample_rate, 8_000);
        assert!((buffer.left[0] - 0.5).abs() < 1e-4);
        assert!((buffer.right[0] + 0.5).abs() < 1e-4);
        assert!((buffer.duration() - 0.0005).abs() < 1e-6);
    }
}
