use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{PipelineError, Result};

/// Nyquist-safe analysis rate for the top piano key (C8, 4186 Hz).
pub const MAX_FREQUENCY_HZ: u32 = 4186;
pub const ANALYSIS_SAMPLE_RATE: u32 = MAX_FREQUENCY_HZ * 2;

/// Which spectrogram variant feeds note extraction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SpectrogramKind {
    Raw,
    #[default]
    Harmonic,
    Percussive,
    Foreground,
    Background,
}

impl SpectrogramKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Harmonic => "harmonic",
            Self::Percussive => "percussive",
            Self::Foreground => "foreground",
            Self::Background => "background",
        }
    }
}

impl fmt::Display for SpectrogramKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SpectrogramKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw" => Ok(Self::Raw),
            "harmonic" => Ok(Self::Harmonic),
            "percussive" => Ok(Self::Percussive),
            "foreground" => Ok(Self::Foreground),
            "background" => Ok(Self::Background),
            other => Err(PipelineError::config(format!(
                "unknown spectrogram variant '{}' (expected raw, harmonic, percussive, foreground or background)",
                other
            ))),
        }
    }
}

/// Per-step loudness normalization.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Normalization {
    /// x / max(x)
    #[default]
    DivMax,
    /// (x - min(x)) / (max(x) - min(x))
    ZeroOne,
}

impl Normalization {
    pub fn name(self) -> &'static str {
        match self {
            Self::DivMax => "div-max",
            Self::ZeroOne => "zero-one",
        }
    }

    /// Normalize a vector; any non-finite result is replaced with 0.
    pub fn apply(self, values: &[f32]) -> Vec<f32> {
        if values.is_empty() {
            return Vec::new();
        }
        let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let min = values.iter().copied().fold(f32::INFINITY, f32::min);
        values
            .iter()
            .map(|&x| {
                let v = match self {
                    Self::DivMax => x / max,
                    Self::ZeroOne => (x - min) / (max - min),
                };
                if v.is_finite() {
                    v
                } else {
                    0.0
                }
            })
            .collect()
    }
}

impl FromStr for Normalization {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "div-max" => Ok(Self::DivMax),
            "zero-one" => Ok(Self::ZeroOne),
            other => Err(PipelineError::config(format!(
                "unknown normalization '{}' (expected div-max or zero-one)",
                other
            ))),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputConfig {
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalysisConfig {
    pub max_duration: Option<f32>,
    pub n_fft: Option<usize>,
    pub variant: Option<SpectrogramKind>,
    pub prominence: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RenderConfig {
    pub scale: Option<f32>,
    pub normalization: Option<Normalization>,
    pub threshold: Option<f32>,
    pub keyboard: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    pub fps: Option<u32>,
    pub crf: Option<u32>,
    pub codec: Option<String>,
    pub lead_in: Option<f32>,
    pub dir: Option<PathBuf>,
    pub spill_dir: Option<PathBuf>,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        PipelineError::config(format!("cannot read {}: {}", path.display(), e))
    })?;
    toml::from_str(&content)
        .map_err(|e| PipelineError::config(format!("cannot parse {}: {}", path.display(), e)))
}

/// Look for a config file: `./keyroll.toml`, then `~/.config/keyroll/config.toml`,
/// then the platform config directory.
pub fn discover_config() -> Option<PathBuf> {
    let local = PathBuf::from("keyroll.toml");
    if local.exists() {
        return Some(local);
    }
    if let Some(home) = dirs::home_dir() {
        let xdg = home.join(".config").join("keyroll").join("config.toml");
        if xdg.exists() {
            return Some(xdg);
        }
    }
    if let Some(config_dir) = dirs::config_dir() {
        let platform = config_dir.join("keyroll").join("config.toml");
        if platform.exists() {
            return Some(platform);
        }
    }
    None
}

/// Fully resolved and validated run settings.
#[derive(Clone, Debug)]
pub struct Settings {
    pub max_duration: Option<f32>,
    pub n_fft: usize,
    pub variant: SpectrogramKind,
    pub prominence: f32,
    pub scale: f32,
    pub normalization: Normalization,
    pub threshold: f32,
    pub keyboard: PathBuf,
    pub fps: u32,
    pub crf: u32,
    pub codec: String,
    pub lead_in: f32,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub spill_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_duration: None,
            n_fft: 2048,
            variant: SpectrogramKind::Harmonic,
            prominence: 3.0,
            scale: 2.0,
            normalization: Normalization::DivMax,
            threshold: 0.3,
            keyboard: PathBuf::from("assets").join("piano.png"),
            fps: 30,
            crf: 18,
            codec: "libx264".into(),
            lead_in: 1.0,
            input_dir: PathBuf::from("input"),
            output_dir: PathBuf::from("output"),
            spill_dir: PathBuf::from("img"),
        }
    }
}

/// Values supplied on the command line; each one wins over the config file.
#[derive(Clone, Debug, Default)]
pub struct Overrides {
    pub max_duration: Option<f32>,
    pub n_fft: Option<usize>,
    pub variant: Option<SpectrogramKind>,
    pub prominence: Option<f32>,
    pub scale: Option<f32>,
    pub normalization: Option<Normalization>,
    pub threshold: Option<f32>,
    pub keyboard: Option<PathBuf>,
    pub fps: Option<u32>,
    pub lead_in: Option<f32>,
    pub output_dir: Option<PathBuf>,
}

impl Settings {
    /// Merge defaults < config file < command line, then validate.
    pub fn resolve(file: Config, cli: Overrides) -> Result<Self> {
        let d = Self::default();
        let settings = Self {
            max_duration: cli.max_duration.or(file.analysis.max_duration),
            n_fft: cli.n_fft.or(file.analysis.n_fft).unwrap_or(d.n_fft),
            variant: cli.variant.or(file.analysis.variant).unwrap_or(d.variant),
            prominence: cli
                .prominence
                .or(file.analysis.prominence)
                .unwrap_or(d.prominence),
            scale: cli.scale.or(file.render.scale).unwrap_or(d.scale),
            normalization: cli
                .normalization
                .or(file.render.normalization)
                .unwrap_or(d.normalization),
            threshold: cli.threshold.or(file.render.threshold).unwrap_or(d.threshold),
            keyboard: cli.keyboard.or(file.render.keyboard).unwrap_or(d.keyboard),
            fps: cli.fps.or(file.output.fps).unwrap_or(d.fps),
            crf: file.output.crf.unwrap_or(d.crf),
            codec: file.output.codec.unwrap_or(d.codec),
            lead_in: cli.lead_in.or(file.output.lead_in).unwrap_or(d.lead_in),
            input_dir: file.input.dir.unwrap_or(d.input_dir),
            output_dir: cli.output_dir.or(file.output.dir).unwrap_or(d.output_dir),
            spill_dir: file.output.spill_dir.unwrap_or(d.spill_dir),
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(max) = self.max_duration {
            if !(max.is_finite() && max > 0.0) {
                return Err(PipelineError::config(format!(
                    "max duration must be positive, got {}",
                    max
                )));
            }
        }
        if self.n_fft < 16 || !self.n_fft.is_power_of_two() {
            return Err(PipelineError::config(format!(
                "FFT window size must be a power of two >= 16, got {}",
                self.n_fft
            )));
        }
        if !(self.prominence.is_finite() && self.prominence >= 0.0) {
            return Err(PipelineError::config(format!(
                "peak prominence must be non-negative, got {}",
                self.prominence
            )));
        }
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(PipelineError::config(format!(
                "image scale must be positive, got {}",
                self.scale
            )));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(PipelineError::config(format!(
                "activation threshold must lie in [0, 1], got {}",
                self.threshold
            )));
        }
        if self.fps == 0 {
            return Err(PipelineError::config("output frame rate must be non-zero"));
        }
        if self.crf > 51 {
            return Err(PipelineError::config(format!("CRF must be 0-51, got {}", self.crf)));
        }
        if !(self.lead_in.is_finite() && self.lead_in >= 0.0) {
            return Err(PipelineError::config(format!(
                "lead-in must be non-negative, got {}",
                self.lead_in
            )));
        }
        Ok(())
    }

    /// `<output_dir>/<input stem>.mp4`
    pub fn output_path(&self, audio: &Path) -> PathBuf {
        let stem = audio
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        self.output_dir.join(format!("{}.mp4", stem))
    }
}
