use anyhow::{Context, Result};
use clap::Parser;

use keyroll::cli::Cli;
use keyroll::config::{self, Config, Settings};
use keyroll::pipeline::Pipeline;
use keyroll::render::keyboard::KeyboardTemplate;
use keyroll::source;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    // Load config: explicit --config path, or auto-detect keyroll.toml / global config
    let file_config = match cli.config.clone().or_else(config::discover_config) {
        Some(path) => {
            let cfg = config::load_config(&path)?;
            log::info!("Loaded config from {}", path.display());
            cfg
        }
        None => Config::default(),
    };
    let settings = Settings::resolve(file_config, cli.overrides())?;

    if cli.init_keyboard {
        KeyboardTemplate::synthesize(1.0)
            .save(&settings.keyboard)
            .context("Failed to write keyboard template")?;
        log::info!("Wrote keyboard template to {}", settings.keyboard.display());
        return Ok(());
    }

    let input = cli.input.as_deref().context("Input audio is required")?;

    for dir in [&settings.input_dir, &settings.output_dir] {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    log::info!("keyroll - piano keyboard video from audio");
    log::info!("Input: {}", input);
    log::info!("Variant: {}, n_fft: {}", settings.variant, settings.n_fft);
    log::info!(
        "Keyboard: {} (scale {}), threshold {}",
        settings.keyboard.display(),
        settings.scale,
        settings.threshold
    );

    let audio = source::resolve(input, &settings.input_dir)?;
    let pipeline = Pipeline::new(settings)?;
    let summary = pipeline.run(&audio, cli.chromagram.as_deref())?;

    log::info!(
        "Done! {} steps, {} frames, output: {}",
        summary.steps,
        summary.movie.frames_written,
        summary.output.display()
    );
    Ok(())
}
