use anyhow::{Context, Result};
use std::ffi::OsString;
use std::io::Write;
use std::path::Path;
use std::process::{Child, Command, Stdio};

use crate::config::Settings;
use crate::progress;
use crate::render::spill::{read_frame, SpillManifest};

/// ffmpeg arguments for muxing rgb24 frames from stdin with `input_audio`.
/// Only errors reach stderr, so the pipe stays small however long the encode.
#[allow(clippy::too_many_arguments)]
pub fn encoder_args(
    output_path: &Path,
    input_audio: &Path,
    width: u32,
    height: u32,
    input_rate: f64,
    fps: u32,
    codec: &str,
    crf: u32,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-y".into(),
        "-hide_banner".into(),
        "-nostats".into(),
        "-loglevel".into(), "error".into(),
        "-f".into(), "rawvideo".into(),
        "-pixel_format".into(), "rgb24".into(),
        "-video_size".into(), format!("{}x{}", width, height).into(),
        "-framerate".into(), format!("{:.6}", input_rate).into(),
        "-i".into(), "pipe:0".into(),
        "-i".into(), input_audio.as_os_str().to_owned(),
        "-map".into(), "0:v:0".into(),
        "-map".into(), "1:a:0".into(),
        // yuv420p needs even dimensions
        "-vf".into(), "pad=ceil(iw/2)*2:ceil(ih/2)*2".into(),
        "-r".into(), fps.to_string().into(),
        "-c:v".into(), codec.into(),
        "-pix_fmt".into(), "yuv420p".into(),
        "-crf".into(), crf.to_string().into(),
        "-preset".into(), "medium".into(),
    ];

    args.extend([
        "-c:a".into(), "aac".into(),
        "-b:a".into(), "192k".into(),
        "-shortest".into(),
        output_path.as_os_str().to_owned(),
    ]);
    args
}

/// Streams raw RGB frames into an ffmpeg child process.
pub struct FfmpegEncoder {
    child: Child,
    frame_bytes: usize,
}

impl FfmpegEncoder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        output_path: &Path,
        input_audio: &Path,
        width: u32,
        height: u32,
        input_rate: f64,
        fps: u32,
        codec: &str,
        crf: u32,
    ) -> Result<Self> {
        let args = encoder_args(output_path, input_audio, width, height, input_rate, fps, codec, crf);
        let child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .context("Failed to spawn ffmpeg. Is ffmpeg installed?")?;

        log::info!(
            "FFmpeg encoder started: {}x{} @ {:.3} steps/s -> {}fps, codec={}",
            width,
            height,
            input_rate,
            fps,
            codec
        );

        Ok(Self {
            child,
            frame_bytes: width as usize * height as usize * 3,
        })
    }

    pub fn write_frame(&mut self, rgb_pixels: &[u8]) -> Result<()> {
        if rgb_pixels.len() != self.frame_bytes {
            anyhow::bail!(
                "Frame has {} bytes, encoder expects {}",
                rgb_pixels.len(),
                self.frame_bytes
            );
        }
        let stdin = self.child.stdin.as_mut().context("FFmpeg stdin not available")?;
        stdin.write_all(rgb_pixels).context("Failed to write frame to ffmpeg")?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        // Close stdin to signal EOF
        drop(self.child.stdin.take());

        let output = self.child.wait_with_output().context("Failed to wait for ffmpeg")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("FFmpeg exited with error:\n{}", stderr);
        }

        log::info!("FFmpeg encoding complete");
        Ok(())
    }

    /// Stop ffmpeg without letting it finalize the output. Closing stdin
    /// alone would make it write a valid but truncated file.
    pub fn abort(mut self) {
        if let Err(e) = self.child.kill() {
            log::debug!("FFmpeg already exited: {}", e);
        }
        drop(self.child.stdin.take());
        if let Err(e) = self.child.wait() {
            log::warn!("Failed to reap ffmpeg: {}", e);
        }
    }
}

/// Frames to drop from the start so the roll has already scrolled in.
pub fn lead_in_frames(lead_in_secs: f32, frame_rate: f64) -> usize {
    (lead_in_secs as f64 * frame_rate).round().max(0.0) as usize
}

#[derive(Clone, Debug)]
pub struct MovieOptions {
    /// Steps per second of recording; one frame per step.
    pub frame_rate: f64,
    pub fps: u32,
    pub crf: u32,
    pub codec: String,
    pub lead_in: f32,
}

impl MovieOptions {
    pub fn from_settings(settings: &Settings, frame_rate: f64) -> Self {
        Self {
            frame_rate,
            fps: settings.fps,
            crf: settings.crf,
            codec: settings.codec.clone(),
            lead_in: settings.lead_in,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MovieSummary {
    pub frames_written: usize,
    pub lead_in_frames: usize,
    pub duration: f64,
}

pub struct MovieBuilder {
    options: MovieOptions,
}

impl MovieBuilder {
    pub fn new(options: MovieOptions) -> Self {
        Self { options }
    }

    /// Frame accounting for `total_frames` spilled frames: how many the
    /// lead-in drops, how many are encoded and how long they play.
    pub fn plan(&self, total_frames: usize) -> Result<MovieSummary> {
        let skip = lead_in_frames(self.options.lead_in, self.options.frame_rate);
        if skip >= total_frames {
            anyhow::bail!(
                "Lead-in of {:.2}s ({} frames) leaves nothing of {} frames to encode",
                self.options.lead_in,
                skip,
                total_frames
            );
        }
        let frames_written = total_frames - skip;
        Ok(MovieSummary {
            frames_written,
            lead_in_frames: skip,
            duration: frames_written as f64 / self.options.frame_rate,
        })
    }

    /// Mux the spilled frames with `audio` into `output`. Spilled frames are
    /// removed only after ffmpeg reports success. On any failure after ffmpeg
    /// starts, the partial output is deleted and the frames are kept.
    pub fn build(&self, manifest: &SpillManifest, audio: &Path, output: &Path) -> Result<MovieSummary> {
        let frames = manifest.frame_paths()?;
        if frames.len() != manifest.frames {
            anyhow::bail!(
                "Expected {} spilled frames in {}, found {}",
                manifest.frames,
                manifest.dir.display(),
                frames.len()
            );
        }
        let summary = self.plan(frames.len())?;

        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let mut encoder = FfmpegEncoder::new(
            output,
            audio,
            manifest.width,
            manifest.height,
            self.options.frame_rate,
            self.options.fps,
            &self.options.codec,
            self.options.crf,
        )?;

        let to_write = &frames[summary.lead_in_frames..];
        let pb = progress::bar(to_write.len(), "frames");
        pb.set_message("muxing");
        let streamed = to_write.iter().try_for_each(|path| -> Result<()> {
            let frame = read_frame(path)?;
            encoder.write_frame(frame.as_raw())?;
            pb.inc(1);
            Ok(())
        });
        if let Err(e) = streamed {
            pb.abandon_with_message("failed");
            encoder.abort();
            discard_partial(output);
            return Err(e);
        }
        pb.finish_with_message("muxed");

        if let Err(e) = encoder.finish() {
            discard_partial(output);
            return Err(e);
        }
        manifest
            .remove_all()
            .context("Video written but spilled frames could not be removed")?;

        log::info!(
            "Wrote {} ({} frames, {:.1}s, skipped {} lead-in frames)",
            output.display(),
            summary.frames_written,
            summary.duration,
            summary.lead_in_frames
        );
        Ok(summary)
    }
}

fn discard_partial(output: &Path) {
    if output.exists() {
        match std::fs::remove_file(output) {
            Ok(()) => log::warn!("Removed incomplete video {}", output.display()),
            Err(e) => log::warn!("Could not remove incomplete video {}: {}", output.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::frame::FrameSink;
    use crate::render::spill::FrameSpill;
    use image::RgbImage;

    #[test]
    fn lead_in_rounds_to_whole_frames() {
        assert_eq!(lead_in_frames(1.0, 16.35), 16);
        assert_eq!(lead_in_frames(1.0, 16.5), 17);
        assert_eq!(lead_in_frames(0.0, 16.35), 0);
    }

    fn options(frame_rate: f64, lead_in: f32) -> MovieOptions {
        MovieOptions {
            frame_rate,
            fps: 30,
            crf: 18,
            codec: "libx264".into(),
            lead_in,
        }
    }

    fn spill_frames(dir: &Path, count: usize) -> SpillManifest {
        let mut spill = FrameSpill::create(dir).unwrap();
        for i in 0..count {
            spill.accept(i, RgbImage::new(4, 4)).unwrap();
        }
        spill.finish()
    }

    #[test]
    fn plan_trims_lead_in_from_playback_time() {
        // 97 steps over a 10 s recording
        let builder = MovieBuilder::new(options(9.7, 1.0));
        let plan = builder.plan(97).unwrap();
        assert_eq!(plan.lead_in_frames, 10);
        assert_eq!(plan.frames_written, 87);
        assert!((plan.duration - 9.0).abs() <= 1.0 / 9.7);

        let plan = MovieBuilder::new(options(9.7, 0.0)).plan(97).unwrap();
        assert_eq!(plan.frames_written, 97);
        assert!((plan.duration - 10.0).abs() < 1e-9);

        assert!(MovieBuilder::new(options(4.0, 1.0)).plan(3).is_err());
    }

    #[test]
    fn encoder_keeps_stderr_quiet_and_writes_output_last() {
        let args = encoder_args(
            Path::new("out/song.mp4"),
            Path::new("song.mp3"),
            480,
            420,
            16.35,
            30,
            "libx264",
            18,
        );
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert!(args.contains(&"-nostats".to_string()));
        let level = args.iter().position(|a| a == "-loglevel").unwrap();
        assert_eq!(args[level + 1], "error");
        let rate = args.iter().position(|a| a == "-framerate").unwrap();
        assert_eq!(args[rate + 1], "16.350000");
        assert_eq!(args.last().map(String::as_str), Some("out/song.mp4"));
    }

    #[test]
    fn corrupt_frame_leaves_no_video_and_keeps_frames() {
        let dir = std::env::temp_dir().join(format!("keyroll_movie_corrupt_{}", std::process::id()));
        let manifest = spill_frames(&dir, 3);
        let paths = manifest.frame_paths().unwrap();
        std::fs::write(&paths[1], b"xx").unwrap();

        let audio = dir.join("tone.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&audio, spec).unwrap();
        for i in 0..8000 {
            let s = (i as f32 * 0.3).sin() * 8000.0;
            writer.write_sample(s as i16).unwrap();
        }
        writer.finalize().unwrap();

        let out = dir.join("out").join("tone.mp4");
        let builder = MovieBuilder::new(options(3.0, 0.0));
        assert!(builder.build(&manifest, &audio, &out).is_err());
        assert!(!out.exists());
        assert_eq!(manifest.frame_paths().unwrap().len(), 3);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn lead_in_longer_than_video_fails_and_keeps_frames() {
        let dir = std::env::temp_dir().join(format!("keyroll_movie_short_{}", std::process::id()));
        let manifest = spill_frames(&dir, 3);

        let builder = MovieBuilder::new(options(4.0, 1.0));
        let out = dir.join("never.mp4");
        assert!(builder.build(&manifest, Path::new("missing.wav"), &out).is_err());
        assert_eq!(manifest.frame_paths().unwrap().len(), 3);
        assert!(!out.exists());
        manifest.remove_all().unwrap();
    }
}
