use ndarray::{Array2, ArrayView1, Axis, Zip};
use rayon::prelude::*;
use rustfft::{num_complex::Complex, FftPlanner};

use super::decode::Waveform;
use crate::config::SpectrogramKind;
use crate::error::{PipelineError, Result};

/// Window of the time-axis noise filter applied before decomposition and after
/// peak thresholding.
pub const MEDIAN_WINDOW: usize = 5;

const HPSS_KERNEL: usize = 31;
const HPSS_MARGIN: f32 = 2.0;
const MASK_POWER: i32 = 2;
const NN_MIN_SEPARATION_SECS: f32 = 2.0;
const BACKGROUND_MARGIN: f32 = 2.0;
const FOREGROUND_MARGIN: f32 = 10.0;

/// Time of each analysis step, shared by every matrix derived from one run.
#[derive(Clone, Debug, PartialEq)]
pub struct TimeAxis {
    times: Vec<f32>,
    duration: f32,
}

impl TimeAxis {
    /// Evenly spaced steps over `[0, duration]`, as the transform produced them.
    pub fn linspace(steps: usize, duration: f32) -> Self {
        let interval = if steps > 1 {
            duration / (steps - 1) as f32
        } else {
            duration
        };
        Self {
            times: (0..steps).map(|i| i as f32 * interval).collect(),
            duration,
        }
    }

    /// Drop `front` steps from the start and `back` from the end.
    pub fn trimmed(&self, front: usize, back: usize) -> Self {
        let end = self.times.len().saturating_sub(back).max(front);
        Self {
            times: self.times[front.min(end)..end].to_vec(),
            duration: self.duration,
        }
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn times(&self) -> &[f32] {
        &self.times
    }

    /// Duration of the recording the axis was derived from, in seconds.
    pub fn duration(&self) -> f32 {
        self.duration
    }

    /// Whole time steps per second of recording.
    pub fn steps_per_second(&self) -> usize {
        if self.duration <= 0.0 {
            return 0;
        }
        (self.len() as f32 / self.duration) as usize
    }

    /// Playback rate at which the steps of this axis span the whole
    /// recording, so one frame per step keeps video and audio the same length.
    pub fn frame_rate(&self) -> f64 {
        if self.duration <= 0.0 {
            return 0.0;
        }
        self.len() as f64 / self.duration as f64
    }
}

/// The five spectrogram variants of one recording. All share `times` and `freqs`.
pub struct SpectrogramBundle {
    pub raw: Array2<f32>,
    pub harmonic: Array2<f32>,
    pub percussive: Array2<f32>,
    pub foreground: Array2<f32>,
    pub background: Array2<f32>,
    pub times: TimeAxis,
    pub freqs: Vec<f32>,
}

/// The variant chosen for note extraction, with its axes.
pub struct SelectedSpectrogram {
    pub kind: SpectrogramKind,
    pub amplitudes: Array2<f32>,
    pub times: TimeAxis,
    pub freqs: Vec<f32>,
}

impl SpectrogramBundle {
    pub fn num_steps(&self) -> usize {
        self.times.len()
    }

    /// Move the requested variant out; the others are dropped.
    pub fn select(self, kind: SpectrogramKind) -> SelectedSpectrogram {
        let amplitudes = match kind {
            SpectrogramKind::Raw => self.raw,
            SpectrogramKind::Harmonic => self.harmonic,
            SpectrogramKind::Percussive => self.percussive,
            SpectrogramKind::Foreground => self.foreground,
            SpectrogramKind::Background => self.background,
        };
        log::info!("Selected spectrogram type: {}", kind);
        SelectedSpectrogram {
            kind,
            amplitudes,
            times: self.times,
            freqs: self.freqs,
        }
    }
}

/// Magnitude spectrogram, noise filtering and harmonic/percussive and
/// foreground/background decomposition.
pub fn analyze(waveform: &Waveform, n_fft: usize) -> Result<SpectrogramBundle> {
    let hop = n_fft / 4;
    let samples = waveform.samples();
    let sr = waveform.sample_rate();

    if samples.len() <= n_fft / 2 {
        return Err(PipelineError::audio(waveform.origin(), format!(
            "recording of {} samples is shorter than half an FFT window ({})",
            samples.len(),
            n_fft
        )));
    }
    let raw_steps = 1 + samples.len() / hop;
    if raw_steps < MEDIAN_WINDOW {
        return Err(PipelineError::audio(waveform.origin(), format!(
            "recording yields {} time steps, fewer than the {}-step noise filter",
            raw_steps, MEDIAN_WINDOW
        )));
    }

    log::info!("STFT: n_fft={}, hop={}, {} steps", n_fft, hop, raw_steps);
    let spectrum = stft_magnitude(samples, n_fft, hop);
    let freqs = fft_frequencies(sr, n_fft);
    let half = MEDIAN_WINDOW / 2;
    let times = TimeAxis::linspace(spectrum.ncols(), waveform.duration()).trimmed(half, half);

    let raw = median_filter_time(&spectrum);
    drop(spectrum);
    log::info!("Generated raw spectrogram ({} bins x {} steps)", raw.nrows(), raw.ncols());

    let (harmonic, percussive) = hpss(&raw, HPSS_KERNEL, HPSS_MARGIN);
    let nn_width = (NN_MIN_SEPARATION_SECS * sr as f32 / hop as f32) as usize;
    let (foreground, background) = separate_foreground(&harmonic, nn_width);
    log::info!("Performed HPSS and foreground/background separation");

    debug_assert_eq!(raw.ncols(), times.len());

    Ok(SpectrogramBundle {
        raw,
        harmonic,
        percussive,
        foreground,
        background,
        times,
        freqs,
    })
}

/// Centre frequency of each STFT bin.
pub fn fft_frequencies(sample_rate: u32, n_fft: usize) -> Vec<f32> {
    (0..=n_fft / 2)
        .map(|k| k as f32 * sample_rate as f32 / n_fft as f32)
        .collect()
}

/// Centred magnitude STFT with reflect padding: `1 + n / hop` columns of
/// `n_fft / 2 + 1` bins.
pub fn stft_magnitude(samples: &[f32], n_fft: usize, hop: usize) -> Array2<f32> {
    let pad = n_fft / 2;
    let n = samples.len();
    let padded: Vec<f32> = (0..n + 2 * pad)
        .map(|i| samples[reflect_index(i as isize - pad as isize, n)])
        .collect();

    let n_frames = 1 + (padded.len() - n_fft) / hop;
    let bins = n_fft / 2 + 1;
    let window = hann_window(n_fft);

    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(n_fft);

    let columns: Vec<Vec<f32>> = (0..n_frames)
        .into_par_iter()
        .map(|frame| {
            let start = frame * hop;
            let mut buffer: Vec<Complex<f32>> = padded[start..start + n_fft]
                .iter()
                .zip(window.iter())
                .map(|(&s, &w)| Complex::new(s * w, 0.0))
                .collect();
            fft.process(&mut buffer);
            buffer[..bins].iter().map(|c| c.norm()).collect()
        })
        .collect();

    let mut out = Array2::<f32>::zeros((bins, n_frames));
    for (mut col, data) in out.columns_mut().into_iter().zip(columns) {
        col.assign(&ArrayView1::from(&data[..]));
    }
    out
}

/// Whole-sample symmetric reflection (`d c b | a b c d | c b a`).
fn reflect_index(i: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let period = 2 * (n as isize - 1);
    let m = i.rem_euclid(period);
    if m < n as isize {
        m as usize
    } else {
        (period - m) as usize
    }
}

/// Half-sample symmetric reflection (`c b a | a b c | c b a`).
fn mirror_index(i: isize, n: usize) -> usize {
    let period = 2 * n as isize;
    let m = i.rem_euclid(period);
    if m < n as isize {
        m as usize
    } else {
        (period - 1 - m) as usize
    }
}

fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / size as f32).cos()))
        .collect()
}

/// Median of a scratch slice. Even lengths average the two middle values.
pub fn median(values: &mut [f32]) -> f32 {
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    let mid = n / 2;
    let (lower, upper_mid, _) = values.select_nth_unstable_by(mid, f32::total_cmp);
    let upper = *upper_mid;
    if n % 2 == 1 {
        upper
    } else {
        let lower_max = lower.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        (lower_max + upper) / 2.0
    }
}

/// 1-D median filter, stride 1, no padding: the output has
/// `len - window + 1` samples, entry `j` being the median of `arr[j..j + window]`.
pub fn median_filter(arr: &[f32], window: usize) -> Vec<f32> {
    if window == 0 || arr.len() < window {
        return Vec::new();
    }
    let mut scratch = vec![0.0f32; window];
    arr.windows(window)
        .map(|w| {
            scratch.copy_from_slice(w);
            median(&mut scratch)
        })
        .collect()
}

/// Apply [`median_filter`] along time to every bin, trimming the time axis
/// by `MEDIAN_WINDOW - 1` steps.
pub fn median_filter_time(spec: &Array2<f32>) -> Array2<f32> {
    let cols = spec.ncols().saturating_sub(MEDIAN_WINDOW - 1);
    let mut out = Array2::<f32>::zeros((spec.nrows(), cols));
    Zip::from(out.rows_mut())
        .and(spec.rows())
        .par_for_each(|mut dst, src| {
            let filtered = median_filter(&src.to_vec(), MEDIAN_WINDOW);
            dst.assign(&ArrayView1::from(&filtered[..]));
        });
    out
}

/// Same-length centred median with mirrored boundaries.
fn median_same(values: &[f32], kernel: usize) -> Vec<f32> {
    let n = values.len();
    if n == 0 {
        return Vec::new();
    }
    let half = (kernel / 2) as isize;
    let mut scratch = Vec::with_capacity(kernel);
    (0..n as isize)
        .map(|i| {
            scratch.clear();
            scratch.extend((i - half..=i + half).map(|j| values[mirror_index(j, n)]));
            median(&mut scratch)
        })
        .collect()
}

fn median_filter_axis(spec: &Array2<f32>, axis: Axis, kernel: usize) -> Array2<f32> {
    let mut out = Array2::<f32>::zeros(spec.raw_dim());
    Zip::from(out.lanes_mut(axis))
        .and(spec.lanes(axis))
        .par_for_each(|mut dst, src| {
            let filtered = median_same(&src.to_vec(), kernel);
            dst.assign(&ArrayView1::from(&filtered[..]));
        });
    out
}

/// Soft mask of `x` against `reference`: `x^p / (x^p + ref^p)`, 0 where both vanish.
pub fn softmask(x: f32, reference: f32, power: i32) -> f32 {
    let z = x.max(reference);
    if z < f32::MIN_POSITIVE {
        return 0.0;
    }
    let m = (x / z).powi(power);
    let r = (reference / z).powi(power);
    m / (m + r)
}

/// Harmonic/percussive separation by median filtering along time (harmonic)
/// and frequency (percussive), recombined with soft masks.
pub fn hpss(spec: &Array2<f32>, kernel: usize, margin: f32) -> (Array2<f32>, Array2<f32>) {
    // Lanes along Axis(1) run across time for a fixed bin.
    let harm = median_filter_axis(spec, Axis(1), kernel);
    let perc = median_filter_axis(spec, Axis(0), kernel);

    let mut harmonic = Array2::<f32>::zeros(spec.raw_dim());
    let mut percussive = Array2::<f32>::zeros(spec.raw_dim());
    Zip::from(&mut harmonic)
        .and(&mut percussive)
        .and(spec)
        .and(&harm)
        .and(&perc)
        .par_for_each(|h_out, p_out, &s, &h, &p| {
            *h_out = s * softmask(h, margin * p, MASK_POWER);
            *p_out = s * softmask(p, margin * h, MASK_POWER);
        });
    (harmonic, percussive)
}

fn cosine_distance(a: ArrayView1<f32>, b: ArrayView1<f32>, norm_a: f32, norm_b: f32) -> f32 {
    if norm_a <= 0.0 || norm_b <= 0.0 {
        return 1.0;
    }
    1.0 - a.dot(&b) / (norm_a * norm_b)
}

/// Replace each column with the element-wise median of its `k` nearest
/// columns (cosine distance) that lie at least `width` steps away. Columns
/// with no eligible neighbour keep their values.
pub fn nn_filter(spec: &Array2<f32>, width: usize) -> Array2<f32> {
    let steps = spec.ncols();
    if steps < 2 {
        return spec.clone();
    }
    let width = width.min((steps - 1) / 2).max(1);
    let k = 2 * ((steps.saturating_sub(2 * width) + 1) as f32).sqrt().ceil() as usize;

    let norms: Vec<f32> = spec
        .columns()
        .into_iter()
        .map(|c| c.dot(&c).sqrt())
        .collect();

    let columns: Vec<Vec<f32>> = (0..steps)
        .into_par_iter()
        .map(|i| {
            let mut candidates: Vec<(f32, usize)> = (0..steps)
                .filter(|&j| i.abs_diff(j) >= width)
                .map(|j| {
                    let d = cosine_distance(spec.column(i), spec.column(j), norms[i], norms[j]);
                    (d, j)
                })
                .collect();
            if candidates.is_empty() {
                return spec.column(i).to_vec();
            }
            candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
            candidates.truncate(k.max(1));

            let mut scratch = Vec::with_capacity(candidates.len());
            (0..spec.nrows())
                .map(|bin| {
                    scratch.clear();
                    scratch.extend(candidates.iter().map(|&(_, j)| spec[[bin, j]]));
                    median(&mut scratch)
                })
                .collect()
        })
        .collect();

    let mut out = Array2::<f32>::zeros(spec.raw_dim());
    for (mut col, data) in out.columns_mut().into_iter().zip(columns) {
        col.assign(&ArrayView1::from(&data[..]));
    }
    out
}

/// Split a spectrogram into foreground (e.g. vocals) and background
/// (repeating accompaniment) with nearest-neighbour filtering and soft masks.
pub fn separate_foreground(spec: &Array2<f32>, width: usize) -> (Array2<f32>, Array2<f32>) {
    let nn = nn_filter(spec, width);

    let mut foreground = Array2::<f32>::zeros(spec.raw_dim());
    let mut background = Array2::<f32>::zeros(spec.raw_dim());
    Zip::from(&mut foreground)
        .and(&mut background)
        .and(spec)
        .and(&nn)
        .par_for_each(|fg, bg, &s, &f| {
            let filtered = s.min(f);
            let residual = s - filtered;
            *bg = s * softmask(filtered, BACKGROUND_MARGIN * residual, MASK_POWER);
            *fg = s * softmask(residual, FOREGROUND_MARGIN * filtered, MASK_POWER);
        });
    log::info!("Separated foreground from spectrogram");
    (foreground, background)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn median_filter_of_constant_is_constant_and_trimmed() {
        let out = median_filter(&[3.0; 12], MEDIAN_WINDOW);
        assert_eq!(out.len(), 12 - MEDIAN_WINDOW + 1);
        assert!(out.iter().all(|&v| v == 3.0));
    }

    #[test]
    fn median_filter_removes_single_spike() {
        let out = median_filter(&[0.0, 0.0, 9.0, 0.0, 0.0, 0.0], 5);
        assert_eq!(out, vec![0.0, 0.0]);
    }

    #[test]
    fn median_filter_shorter_than_window_is_empty() {
        assert!(median_filter(&[1.0, 2.0], 5).is_empty());
    }

    #[test]
    fn median_of_even_length_averages_middle_pair() {
        assert_eq!(median(&mut [4.0, 1.0, 3.0, 2.0]), 2.5);
        assert_eq!(median(&mut [5.0, 1.0, 3.0]), 3.0);
    }

    #[test]
    fn reflect_and_mirror_boundaries() {
        // x = [a b c d], reflect: c b | a b c d | c b
        assert_eq!(reflect_index(-1, 4), 1);
        assert_eq!(reflect_index(-2, 4), 2);
        assert_eq!(reflect_index(4, 4), 2);
        // mirror: b a | a b c d | d c
        assert_eq!(mirror_index(-1, 4), 0);
        assert_eq!(mirror_index(-2, 4), 1);
        assert_eq!(mirror_index(4, 4), 3);
        assert_eq!(mirror_index(9, 4), 1);
    }

    #[test]
    fn softmask_properties() {
        assert_eq!(softmask(0.0, 0.0, 2), 0.0);
        assert_eq!(softmask(1.0, 0.0, 2), 1.0);
        assert!((softmask(1.0, 1.0, 2) - 0.5).abs() < 1e-6);
        let a = softmask(3.0, 1.0, 2);
        let b = softmask(1.0, 3.0, 2);
        assert!((a + b - 1.0).abs() < 1e-6);
    }

    #[test]
    fn stft_peaks_at_sine_bin() {
        let sr = 8000u32;
        let n_fft = 256;
        let freq = 1000.0;
        let samples: Vec<f32> = (0..4000)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sr as f32).sin())
            .collect();
        let spec = stft_magnitude(&samples, n_fft, n_fft / 4);
        assert_eq!(spec.nrows(), n_fft / 2 + 1);
        assert_eq!(spec.ncols(), 1 + samples.len() / (n_fft / 4));

        let col = spec.column(spec.ncols() / 2);
        let peak = col
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        let freqs = fft_frequencies(sr, n_fft);
        assert!((freqs[peak] - freq).abs() <= sr as f32 / n_fft as f32);
    }

    #[test]
    fn hpss_splits_steady_tone_and_click() {
        // Row 3 is a steady tone; column 10 is a broadband click.
        let mut spec = Array2::<f32>::zeros((40, 40));
        spec.row_mut(3).fill(1.0);
        spec.column_mut(10).fill(1.0);
        let (h, p) = hpss(&spec, 31, 2.0);
        assert!(h[[3, 25]] > 0.9);
        assert!(p[[20, 10]] > 0.9);
        assert!(h[[20, 10]] < 0.1);
    }

    #[test]
    fn nn_filter_without_neighbours_is_identity() {
        let spec = array![[1.0f32], [2.0]];
        assert_eq!(nn_filter(&spec, 32), spec);
    }

    #[test]
    fn nn_filter_repeating_pattern_is_background() {
        let mut spec = Array2::<f32>::zeros((4, 12));
        for t in 0..12 {
            spec[[t % 2, t]] = 1.0;
        }
        let (fg, bg) = separate_foreground(&spec, 2);
        for t in 0..12 {
            assert!(bg[[t % 2, t]] > 0.9, "step {}", t);
            assert!(fg[[t % 2, t]] < 0.1, "step {}", t);
        }
    }

    #[test]
    fn analyze_keeps_every_variant_on_one_time_axis() {
        let sr = crate::config::ANALYSIS_SAMPLE_RATE;
        let samples: Vec<f32> = (0..sr as usize)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / sr as f32).sin())
            .collect();
        let waveform = Waveform::new(samples, sr);
        let bundle = analyze(&waveform, 2048).unwrap();
        let steps = bundle.num_steps();
        assert_eq!(steps, 1 + sr as usize / 512 - (MEDIAN_WINDOW - 1));
        for m in [
            &bundle.raw,
            &bundle.harmonic,
            &bundle.percussive,
            &bundle.foreground,
            &bundle.background,
        ] {
            assert_eq!(m.ncols(), steps);
            assert_eq!(m.nrows(), bundle.freqs.len());
        }
        let selected = bundle.select(SpectrogramKind::Percussive);
        assert_eq!(selected.amplitudes.ncols(), selected.times.len());
    }

    #[test]
    fn time_axis_rates() {
        let axis = TimeAxis::linspace(101, 10.0).trimmed(2, 2);
        assert_eq!(axis.len(), 97);
        assert!((axis.times()[0] - 0.2).abs() < 1e-5);
        assert_eq!(axis.steps_per_second(), 9);
        assert!((axis.frame_rate() - 9.7).abs() < 1e-6);
        // the steps played back at frame_rate last exactly as long as the recording
        assert!((axis.len() as f64 / axis.frame_rate() - 10.0).abs() < 1e-6);
    }

    #[test]
    fn too_short_waveform_is_an_audio_error() {
        let waveform = Waveform::new(vec![0.1; 600], 8372);
        let err = analyze(&waveform, 2048).err().unwrap();
        assert!(matches!(err, PipelineError::AudioLoad { .. }), "{}", err);

        // 1100 samples: past half a window but only 3 raw steps
        let waveform = Waveform::new(vec![0.1; 1100], 8372);
        let err = analyze(&waveform, 2048).err().unwrap();
        assert!(matches!(err, PipelineError::AudioLoad { .. }), "{}", err);
    }
}
