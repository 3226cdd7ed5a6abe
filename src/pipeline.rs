//! Stage-by-stage orchestration. Every stage takes the previous result by
//! value or shared reference and hands a new owned result forward.

use anyhow::Context;
use std::path::{Path, PathBuf};

use crate::audio::decode::{self, Waveform};
use crate::audio::spectral::{self, TimeAxis};
use crate::config::{Settings, SpectrogramKind};
use crate::encode::ffmpeg::{MovieBuilder, MovieOptions, MovieSummary};
use crate::error::Result;
use crate::export::ChromagramExport;
use crate::notes::extract::{map_notes, threshold_peaks, NoteTrack};
use crate::notes::table::FrequencyTable;
use crate::progress;
use crate::render::frame::{FrameAssembler, FrameGeometry, FrameSink};
use crate::render::keyboard::{KeyboardRenderer, KeyboardTemplate};
use crate::render::spill::FrameSpill;

/// Everything extracted from one recording that rendering needs.
pub struct Analysis {
    pub kind: SpectrogramKind,
    pub times: TimeAxis,
    pub freqs: Vec<f32>,
    pub notes: NoteTrack,
}

impl Analysis {
    pub fn num_steps(&self) -> usize {
        self.times.len()
    }
}

#[derive(Debug)]
pub struct RunSummary {
    pub output: PathBuf,
    pub steps: usize,
    pub frames_spilled: usize,
    pub movie: MovieSummary,
}

pub struct Pipeline {
    settings: Settings,
    template: KeyboardTemplate,
    table: FrequencyTable,
}

impl Pipeline {
    /// Load the keyboard asset named in `settings`. A missing or unreadable
    /// asset aborts here, before any audio work.
    pub fn new(settings: Settings) -> Result<Self> {
        let template = KeyboardTemplate::load(&settings.keyboard, settings.scale)?;
        Ok(Self::with_template(settings, template))
    }

    pub fn with_template(settings: Settings, template: KeyboardTemplate) -> Self {
        let mut table = FrequencyTable::build(settings.scale);
        table.retain_drawable(template.width(), template.height());
        Self {
            settings,
            template,
            table,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn table(&self) -> &FrequencyTable {
        &self.table
    }

    pub fn template(&self) -> &KeyboardTemplate {
        &self.template
    }

    pub fn analyze(&self, audio: &Path) -> Result<Analysis> {
        let waveform = decode::load(audio, self.settings.max_duration)?;
        self.analyze_waveform(&waveform)
    }

    pub fn analyze_waveform(&self, waveform: &Waveform) -> Result<Analysis> {
        let bundle = spectral::analyze(waveform, self.settings.n_fft)?;
        let selected = bundle.select(self.settings.variant);
        let steps = selected.times.len();

        log::info!("Pass 1: thresholding spectral peaks...");
        let pb = progress::bar(steps, "steps");
        let dominant = threshold_peaks(&selected.amplitudes, self.settings.prominence, &pb);
        pb.finish_and_clear();
        drop(selected.amplitudes);

        log::info!("Pass 2: mapping peaks to keys...");
        let pb = progress::bar(steps, "steps");
        let notes = map_notes(&dominant, &selected.freqs, &self.table, &pb);
        pb.finish_and_clear();

        Ok(Analysis {
            kind: selected.kind,
            times: selected.times,
            freqs: selected.freqs,
            notes,
        })
    }

    /// Render every step and stream the assembled frames into `sink`.
    /// Returns the number of frames emitted.
    pub fn render_frames<S: FrameSink>(&self, analysis: &Analysis, sink: &mut S) -> Result<usize> {
        let geometry = FrameGeometry::new(
            &analysis.times,
            self.template.width(),
            self.template.height(),
        )?;
        log::info!(
            "Frame layout: {}x{} ({} roll rows x {}px over a {}px keyboard)",
            geometry.width,
            geometry.frame_height(),
            geometry.steps_per_second,
            geometry.stretch,
            geometry.keyboard_height
        );

        let renderer = KeyboardRenderer::new(
            &self.template,
            &self.table,
            self.settings.normalization,
            self.settings.threshold,
        );
        let mut assembler = FrameAssembler::new(geometry, sink);

        let pb = progress::bar(analysis.num_steps(), "frames");
        pb.set_message("rendering");
        for step in analysis.notes.steps() {
            assembler.push(renderer.render(step))?;
            pb.inc(1);
        }
        let frames = assembler.finish()?;
        pb.finish_with_message("rendered");
        Ok(frames)
    }

    pub fn export_chromagram(&self, analysis: &Analysis, path: &Path) -> Result<()> {
        ChromagramExport::new(
            analysis.notes.chromagram(),
            &analysis.times,
            &self.table,
            analysis.kind.name(),
            self.settings.normalization,
            self.settings.threshold,
        )
        .write(path)
    }

    /// Audio file in, video file out.
    pub fn run(&self, audio: &Path, chromagram_out: Option<&Path>) -> anyhow::Result<RunSummary> {
        let analysis = self
            .analyze(audio)
            .with_context(|| format!("Failed to analyze {}", audio.display()))?;

        if let Some(path) = chromagram_out {
            self.export_chromagram(&analysis, path)?;
        }

        let mut spill = FrameSpill::create(&self.settings.spill_dir)?;
        let frames_spilled = self.render_frames(&analysis, &mut spill)?;
        let manifest = spill.finish();

        let output = self.settings.output_path(audio);
        let options = MovieOptions::from_settings(&self.settings, analysis.times.frame_rate());
        let movie = MovieBuilder::new(options).build(&manifest, audio, &output)?;

        Ok(RunSummary {
            output,
            steps: analysis.num_steps(),
            frames_spilled,
            movie,
        })
    }
}
