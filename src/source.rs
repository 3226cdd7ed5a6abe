//! Turns the user's input argument into a local audio file.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{PipelineError, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Source {
    Local(PathBuf),
    YouTube { url: String, id: String },
    Http(String),
}

fn resolution_err(input: &str, reason: impl ToString) -> PipelineError {
    PipelineError::SourceResolution {
        input: input.to_string(),
        reason: reason.to_string(),
    }
}

/// Video id of a YouTube watch, short-link or shorts URL.
pub fn youtube_id(url: &str) -> Option<String> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))?;
    let rest = rest.strip_prefix("www.").unwrap_or(rest);
    let rest = rest.strip_prefix("m.").unwrap_or(rest);

    let candidate = if let Some(path) = rest.strip_prefix("youtu.be/") {
        path.split(['?', '&', '#', '/']).next()
    } else if let Some(path) = rest.strip_prefix("youtube.com/shorts/") {
        path.split(['?', '&', '#', '/']).next()
    } else if let Some(query) = rest.strip_prefix("youtube.com/watch?") {
        query
            .split(['&', '#'])
            .find_map(|pair| pair.strip_prefix("v="))
    } else {
        None
    }?;

    let valid = !candidate.is_empty()
        && candidate
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    valid.then(|| candidate.to_string())
}

pub fn classify(input: &str) -> Result<Source> {
    if let Some(id) = youtube_id(input) {
        return Ok(Source::YouTube {
            url: input.to_string(),
            id,
        });
    }
    if input.contains("youtube.com") || input.contains("youtu.be") {
        return Err(resolution_err(input, "not a valid YouTube URL"));
    }
    if input.starts_with("http://") || input.starts_with("https://") {
        return Ok(Source::Http(input.to_string()));
    }
    Ok(Source::Local(PathBuf::from(input)))
}

/// Resolve `input` to an audio file on disk, downloading into `input_dir`
/// when needed. Files already downloaded there are reused.
pub fn resolve(input: &str, input_dir: &Path) -> Result<PathBuf> {
    match classify(input)? {
        Source::Local(path) => find_local(input, &path, input_dir),
        Source::YouTube { url, id } => fetch_youtube(&url, &id, input_dir),
        Source::Http(url) => fetch_http(&url, input_dir),
    }
}

fn find_local(input: &str, path: &Path, input_dir: &Path) -> Result<PathBuf> {
    let mut candidates = vec![path.to_path_buf(), input_dir.join(path)];
    if path.extension().is_none() {
        candidates.push(input_dir.join(path).with_extension("mp3"));
    }
    let found = candidates.into_iter().find(|p| p.is_file()).ok_or_else(|| {
        resolution_err(
            input,
            format!("no such file here or in {}", input_dir.display()),
        )
    })?;
    log::info!("Found local audio {}", found.display());
    Ok(found)
}

fn fetch_youtube(url: &str, id: &str, input_dir: &Path) -> Result<PathBuf> {
    let target = input_dir.join(format!("{}.mp3", id));
    if target.is_file() {
        log::info!("Using previously downloaded {}", target.display());
        return Ok(target);
    }

    std::fs::create_dir_all(input_dir)?;
    log::info!("Downloading {} with yt-dlp...", id);
    let template = input_dir.join(format!("{}.%(ext)s", id));
    let output = Command::new("yt-dlp")
        .args(["-x", "--audio-format", "mp3", "--no-playlist", "-o"])
        .arg(&template)
        .arg(url)
        .output()
        .map_err(|e| resolution_err(url, format!("failed to run yt-dlp: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(resolution_err(url, format!("yt-dlp failed: {}", stderr.trim())));
    }
    if !target.is_file() {
        return Err(resolution_err(
            url,
            format!("yt-dlp finished but {} is missing", target.display()),
        ));
    }
    log::info!("Downloaded {}", target.display());
    Ok(target)
}

/// Local file name for a downloaded URL: its last path segment.
pub fn download_name(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let after_scheme = without_query
        .split_once("://")
        .map_or(without_query, |(_, rest)| rest);
    let name = after_scheme
        .split_once('/')
        .and_then(|(_, path)| path.trim_end_matches('/').rsplit('/').next())
        .filter(|seg| !seg.is_empty())
        .unwrap_or("download");
    if Path::new(name).extension().is_some() {
        name.to_string()
    } else {
        format!("{}.mp3", name)
    }
}

fn fetch_http(url: &str, input_dir: &Path) -> Result<PathBuf> {
    let target = input_dir.join(download_name(url));
    if target.is_file() {
        log::info!("Using previously downloaded {}", target.display());
        return Ok(target);
    }

    log::info!("Downloading {}...", url);
    let bytes = reqwest::blocking::get(url)
        .and_then(|r| r.error_for_status())
        .and_then(|r| r.bytes())
        .map_err(|e| resolution_err(url, e))?;
    if bytes.is_empty() {
        return Err(resolution_err(url, "server returned no data"));
    }

    std::fs::create_dir_all(input_dir)?;
    std::fs::write(&target, &bytes)?;
    log::info!("Saved {} bytes to {}", bytes.len(), target.display());
    Ok(target)
}
