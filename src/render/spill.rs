//! Numbered raw-frame files staged on disk between assembly and muxing.

use image::RgbImage;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use super::frame::FrameSink;
use crate::error::{PipelineError, Result};

const EXTENSION: &str = "frame";
const HEADER_LEN: usize = 8;

fn spill_err(path: &Path, reason: impl ToString) -> PipelineError {
    PipelineError::Spill {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

pub fn frame_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("{}.{}", index, EXTENSION))
}

fn frame_index(path: &Path) -> Option<usize> {
    if path.extension()? != EXTENSION {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}

/// Frame files in `dir` sorted by their numeric index, so `10.frame` follows
/// `9.frame`. Unrelated files are ignored.
pub fn ordered_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut indexed: Vec<(usize, PathBuf)> = fs::read_dir(dir)
        .map_err(|e| spill_err(dir, e))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter_map(|path| frame_index(&path).map(|i| (i, path)))
        .collect();
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, p)| p).collect())
}

pub fn write_frame(path: &Path, frame: &RgbImage) -> Result<()> {
    let file = File::create(path).map_err(|e| spill_err(path, e))?;
    let mut out = BufWriter::new(file);
    out.write_all(&frame.width().to_le_bytes())
        .and_then(|_| out.write_all(&frame.height().to_le_bytes()))
        .and_then(|_| out.write_all(frame.as_raw()))
        .and_then(|_| out.flush())
        .map_err(|e| spill_err(path, e))
}

pub fn read_frame(path: &Path) -> Result<RgbImage> {
    let file = File::open(path).map_err(|e| spill_err(path, e))?;
    let mut reader = BufReader::new(file);

    let mut header = [0u8; HEADER_LEN];
    reader
        .read_exact(&mut header)
        .map_err(|e| spill_err(path, format!("truncated header: {}", e)))?;
    let width = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let height = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

    let mut pixels = Vec::with_capacity(width as usize * height as usize * 3);
    reader
        .read_to_end(&mut pixels)
        .map_err(|e| spill_err(path, e))?;
    RgbImage::from_raw(width, height, pixels).ok_or_else(|| {
        spill_err(path, format!("pixel data does not match {}x{}", width, height))
    })
}

/// Where the spilled frames of one run live and what they look like.
#[derive(Clone, Debug, PartialEq)]
pub struct SpillManifest {
    pub dir: PathBuf,
    pub frames: usize,
    pub width: u32,
    pub height: u32,
}

impl SpillManifest {
    pub fn frame_paths(&self) -> Result<Vec<PathBuf>> {
        ordered_frames(&self.dir)
    }

    /// Delete every frame file, then the directory if nothing else is in it.
    pub fn remove_all(&self) -> Result<()> {
        for path in ordered_frames(&self.dir)? {
            fs::remove_file(&path).map_err(|e| spill_err(&path, e))?;
        }
        if fs::remove_dir(&self.dir).is_err() {
            log::debug!("Leaving non-empty spill directory {}", self.dir.display());
        }
        Ok(())
    }
}

/// A [`FrameSink`] that writes each frame to its own numbered file.
pub struct FrameSpill {
    dir: PathBuf,
    frames: usize,
    size: Option<(u32, u32)>,
}

impl FrameSpill {
    /// Open `dir` for a new run, removing frame files a previous run left.
    pub fn create(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| spill_err(dir, e))?;
        let stale = ordered_frames(dir)?;
        if !stale.is_empty() {
            log::info!("Removing {} stale frames from {}", stale.len(), dir.display());
        }
        for path in stale {
            fs::remove_file(&path).map_err(|e| spill_err(&path, e))?;
        }
        Ok(Self {
            dir: dir.to_path_buf(),
            frames: 0,
            size: None,
        })
    }

    pub fn finish(self) -> SpillManifest {
        let (width, height) = self.size.unwrap_or((0, 0));
        SpillManifest {
            dir: self.dir,
            frames: self.frames,
            width,
            height,
        }
    }
}

impl FrameSink for FrameSpill {
    fn accept(&mut self, index: usize, frame: RgbImage) -> Result<()> {
        let path = frame_path(&self.dir, index);
        match self.size {
            None => self.size = Some(frame.dimensions()),
            Some(size) if size != frame.dimensions() => {
                return Err(spill_err(
                    &path,
                    format!("frame is {:?}, earlier frames are {:?}", frame.dimensions(), size),
                ));
            }
            Some(_) => {}
        }
        write_frame(&path, &frame)?;
        self.frames += 1;
        Ok(())
    }
}
