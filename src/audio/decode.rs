use std::path::{Path, PathBuf};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::config::ANALYSIS_SAMPLE_RATE;
use crate::error::{PipelineError, Result};

/// Mono samples at a fixed rate. Immutable once loaded.
#[derive(Clone, Debug)]
pub struct Waveform {
    samples: Vec<f32>,
    sample_rate: u32,
    origin: Option<PathBuf>,
}

impl Waveform {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            origin: None,
        }
    }

    /// Record the file the samples were decoded from, for error reports.
    pub fn with_origin(mut self, path: &Path) -> Self {
        self.origin = Some(path.to_path_buf());
        self
    }

    pub fn origin(&self) -> &Path {
        self.origin
            .as_deref()
            .unwrap_or_else(|| Path::new("<in-memory samples>"))
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate as f32
    }

    pub fn is_silent(&self) -> bool {
        self.samples.iter().all(|s| s.abs() < f32::MIN_POSITIVE)
    }
}

/// Decode `path`, truncate to `max_duration` seconds and resample to the
/// analysis rate.
pub fn load(path: &Path, max_duration: Option<f32>) -> Result<Waveform> {
    let (mut samples, sample_rate) = decode_mono(path)?;

    if let Some(max) = max_duration {
        let limit = (max * sample_rate as f32) as usize;
        if limit < samples.len() {
            samples.truncate(limit);
            log::info!("Truncated audio to {:.1}s", max);
        }
    }

    let samples = if sample_rate != ANALYSIS_SAMPLE_RATE {
        resample(&samples, sample_rate, ANALYSIS_SAMPLE_RATE)
            .map_err(|e| PipelineError::audio(path, e))?
    } else {
        samples
    };

    let waveform = Waveform::new(samples, ANALYSIS_SAMPLE_RATE).with_origin(path);
    if waveform.samples().is_empty() {
        return Err(PipelineError::audio(path, "no samples decoded"));
    }
    if waveform.is_silent() {
        return Err(PipelineError::audio(path, "audio is silent"));
    }

    log::info!(
        "Loaded audio: {} samples, {}Hz, {:.1}s",
        waveform.samples().len(),
        waveform.sample_rate(),
        waveform.duration()
    );
    Ok(waveform)
}

fn decode_mono(path: &Path) -> Result<(Vec<f32>, u32)> {
    let file = std::fs::File::open(path).map_err(|e| PipelineError::audio(path, e))?;

    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| PipelineError::audio(path, format!("unsupported format: {}", e)))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_NULL)
        .ok_or_else(|| PipelineError::audio(path, "no audio tracks found"))?;

    let track_id = track.id;
    let channels = track.codec_params.channels.map_or(1, |c| c.count());
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| PipelineError::audio(path, "unknown sample rate"))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| PipelineError::audio(path, format!("no decoder: {}", e)))?;

    let mut all_samples: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => return Err(PipelineError::audio(path, e)),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(msg)) => {
                log::debug!("Skipping undecodable packet: {}", msg);
                continue;
            }
            Err(e) => return Err(PipelineError::audio(path, e)),
        };

        let spec = *decoded.spec();
        let num_frames = decoded.frames();

        let mut sample_buf = SampleBuffer::<f32>::new(num_frames as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);

        let samples = sample_buf.samples();

        if channels == 1 {
            all_samples.extend_from_slice(samples);
        } else {
            for frame_samples in samples.chunks(channels) {
                let mono: f32 = frame_samples.iter().sum::<f32>() / channels as f32;
                all_samples.push(mono);
            }
        }
    }

    log::info!(
        "Decoded audio: {} samples, {}Hz, {:.1}s",
        all_samples.len(),
        sample_rate,
        all_samples.len() as f32 / sample_rate as f32
    );

    Ok((all_samples, sample_rate))
}

/// Resample mono audio with a band-limited sinc interpolator.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> std::result::Result<Vec<f32>, String> {
    use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};

    if samples.is_empty() {
        return Ok(Vec::new());
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let ratio = to_rate as f64 / from_rate as f64;
    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, samples.len(), 1)
        .map_err(|e| format!("failed to create resampler: {}", e))?;

    let input = vec![samples.to_vec()];
    let output = resampler
        .process(&input, None)
        .map_err(|e| format!("resampling failed: {}", e))?;

    Ok(output.into_iter().next().unwrap_or_default())
}
