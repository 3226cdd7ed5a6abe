use indicatif::ProgressBar;
use ndarray::{Array2, ArrayView1};

use super::peaks::find_peaks;
use super::table::{FrequencyTable, NUM_KEYS};
use crate::audio::spectral::{median_filter, MEDIAN_WINDOW};
use crate::config::Normalization;

/// Spectrogram with every non-peak entry zeroed, then smoothed along time.
/// Only [`threshold_peaks`] produces one, and nothing mutates it afterwards.
#[derive(Clone, Debug)]
pub struct DominantAmplitudes {
    matrix: Array2<f32>,
}

impl DominantAmplitudes {
    pub fn matrix(&self) -> &Array2<f32> {
        &self.matrix
    }

    pub fn num_steps(&self) -> usize {
        self.matrix.ncols()
    }
}

/// A key detected at one time step, with its raw spectral amplitude.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KeyActivation {
    pub key: u8,
    pub amplitude: f32,
}

/// Raw loudness per key (rows, key 1 first) per time step (columns).
#[derive(Clone, Debug)]
pub struct Chromagram {
    data: Array2<f32>,
}

impl Chromagram {
    pub fn new(steps: usize) -> Self {
        Self {
            data: Array2::zeros((NUM_KEYS, steps)),
        }
    }

    pub fn record(&mut self, key: u8, step: usize, amplitude: f32) {
        self.data[[key as usize - 1, step]] = amplitude;
    }

    pub fn get(&self, key: u8, step: usize) -> f32 {
        self.data[[key as usize - 1, step]]
    }

    pub fn num_steps(&self) -> usize {
        self.data.ncols()
    }

    pub fn data(&self) -> &Array2<f32> {
        &self.data
    }

    /// Each step normalized across keys, with values below `threshold` zeroed.
    pub fn normalized(&self, normalization: Normalization, threshold: f32) -> Array2<f32> {
        let mut out = Array2::<f32>::zeros(self.data.raw_dim());
        for (mut dst, src) in out.columns_mut().into_iter().zip(self.data.columns()) {
            let normed: Vec<f32> = normalization
                .apply(&src.to_vec())
                .into_iter()
                .map(|v| if v < threshold { 0.0 } else { v })
                .collect();
            dst.assign(&ArrayView1::from(&normed[..]));
        }
        out
    }
}

/// Detected keys for every time step plus the chromagram they were written to.
#[derive(Clone, Debug)]
pub struct NoteTrack {
    steps: Vec<Vec<KeyActivation>>,
    chromagram: Chromagram,
}

impl NoteTrack {
    pub fn num_steps(&self) -> usize {
        self.steps.len()
    }

    pub fn step(&self, t: usize) -> &[KeyActivation] {
        &self.steps[t]
    }

    pub fn steps(&self) -> &[Vec<KeyActivation>] {
        &self.steps
    }

    pub fn chromagram(&self) -> &Chromagram {
        &self.chromagram
    }
}

/// Keys whose per-step normalized loudness exceeds `threshold`, with that
/// loudness. Normalization is local to the given step.
pub fn loud_keys(
    activations: &[KeyActivation],
    normalization: Normalization,
    threshold: f32,
) -> Vec<(u8, f32)> {
    let amplitudes: Vec<f32> = activations.iter().map(|a| a.amplitude).collect();
    normalization
        .apply(&amplitudes)
        .into_iter()
        .zip(activations)
        .filter(|(loudness, _)| *loudness > threshold)
        .map(|(loudness, a)| (a.key, loudness.clamp(0.0, 1.0)))
        .collect()
}

/// Pass 1: per step, keep only bins that are prominent peaks of the log
/// spectrum, then median-smooth the result along time.
pub fn threshold_peaks(
    amplitudes: &Array2<f32>,
    min_prominence: f32,
    pb: &ProgressBar,
) -> DominantAmplitudes {
    let mut matrix = amplitudes.to_owned();
    let mut log_column = Vec::with_capacity(matrix.nrows());

    for mut column in matrix.columns_mut() {
        log_column.clear();
        log_column.extend(column.iter().map(|a| a.ln()));
        let mut peaks = find_peaks(&log_column, min_prominence).into_iter().peekable();

        for (bin, value) in column.iter_mut().enumerate() {
            if peaks.peek() == Some(&bin) {
                peaks.next();
            } else {
                *value = 0.0;
            }
        }
        pb.inc(1);
    }

    smooth_time_in_place(&mut matrix);
    DominantAmplitudes { matrix }
}

/// Median-smooth each row along time without changing the matrix shape: the
/// interior gets the centred window median, the outer `MEDIAN_WINDOW / 2`
/// steps on each side keep their values.
fn smooth_time_in_place(matrix: &mut Array2<f32>) {
    let half = MEDIAN_WINDOW / 2;
    for mut row in matrix.rows_mut() {
        let filtered = median_filter(&row.to_vec(), MEDIAN_WINDOW);
        for (offset, value) in filtered.into_iter().enumerate() {
            row[offset + half] = value;
        }
    }
}

/// Pass 2: quantize every surviving peak to its nearest piano key.
pub fn map_notes(
    dominant: &DominantAmplitudes,
    freqs: &[f32],
    table: &FrequencyTable,
    pb: &ProgressBar,
) -> NoteTrack {
    let steps_total = dominant.num_steps();
    let mut chromagram = Chromagram::new(steps_total);
    let mut steps = Vec::with_capacity(steps_total);

    for (t, column) in dominant.matrix().columns().into_iter().enumerate() {
        let mut active = Vec::new();
        for (bin, &amplitude) in column.iter().enumerate() {
            if amplitude == 0.0 {
                continue;
            }
            let key = table.nearest_key(freqs[bin]);
            chromagram.record(key, t, amplitude);
            active.push(KeyActivation { key, amplitude });
        }
        steps.push(active);
        pb.inc(1);
    }

    let active_steps = steps.iter().filter(|s| !s.is_empty()).count();
    log::info!(
        "Mapped frequencies to notes: {}/{} steps with activity",
        active_steps,
        steps_total
    );

    NoteTrack { steps, chromagram }
}
