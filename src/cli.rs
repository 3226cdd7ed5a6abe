use clap::Parser;
use std::path::PathBuf;

use crate::config::{Normalization, Overrides, SpectrogramKind};

#[derive(Parser, Debug)]
#[command(name = "keyroll", about = "Turn a piano recording into a lit-keyboard video")]
pub struct Cli {
    /// Audio file, file name in the input directory, audio URL or YouTube URL
    #[arg(required_unless_present = "init_keyboard")]
    pub input: Option<String>,

    /// Config file (TOML). Defaults to keyroll.toml or the user config dir
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Only use the first N seconds of audio
    #[arg(short = 'm', long = "max-time")]
    pub max_time: Option<f32>,

    /// Keyboard image downscale factor
    #[arg(short, long)]
    pub scale: Option<f32>,

    /// FFT window size (power of two)
    #[arg(long)]
    pub n_fft: Option<usize>,

    /// Spectrogram variant used for note detection
    #[arg(long, value_enum)]
    pub variant: Option<SpectrogramKind>,

    /// Per-step loudness normalization
    #[arg(long, value_enum)]
    pub normalization: Option<Normalization>,

    /// Normalized loudness a key must exceed to light up (0.0-1.0)
    #[arg(short, long)]
    pub threshold: Option<f32>,

    /// Minimum peak prominence in the log spectrum
    #[arg(long)]
    pub prominence: Option<f32>,

    /// Output frames per second
    #[arg(long)]
    pub fps: Option<u32>,

    /// Seconds trimmed from the start of the video
    #[arg(long)]
    pub lead_in: Option<f32>,

    /// Keyboard template image
    #[arg(short, long)]
    pub keyboard: Option<PathBuf>,

    /// Output directory
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Also write the normalized chromagram as JSON
    #[arg(long)]
    pub chromagram: Option<PathBuf>,

    /// Write a generated keyboard template to the keyboard path and exit
    #[arg(long)]
    pub init_keyboard: bool,
}

impl Cli {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            max_duration: self.max_time,
            n_fft: self.n_fft,
            variant: self.variant,
            prominence: self.prominence,
            scale: self.scale,
            normalization: self.normalization,
            threshold: self.threshold,
            keyboard: self.keyboard.clone(),
            fps: self.fps,
            lead_in: self.lead_in,
            output_dir: self.output_dir.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_overrides() {
        let cli = Cli::try_parse_from([
            "keyroll", "song.mp3", "-m", "30", "--variant", "foreground", "--normalization",
            "zero-one", "-t", "0.5",
        ])
        .unwrap();
        let o = cli.overrides();
        assert_eq!(cli.input.as_deref(), Some("song.mp3"));
        assert_eq!(o.max_duration, Some(30.0));
        assert_eq!(o.variant, Some(SpectrogramKind::Foreground));
        assert_eq!(o.normalization, Some(Normalization::ZeroOne));
        assert_eq!(o.threshold, Some(0.5));
        assert_eq!(o.scale, None);
    }

    #[test]
    fn input_is_required_unless_bootstrapping() {
        assert!(Cli::try_parse_from(["keyroll"]).is_err());
        let cli = Cli::try_parse_from(["keyroll", "--init-keyboard"]).unwrap();
        assert!(cli.init_keyboard);
    }

    #[test]
    fn rejects_unknown_variant() {
        assert!(Cli::try_parse_from(["keyroll", "a.mp3", "--variant", "loud"]).is_err());
    }
}
