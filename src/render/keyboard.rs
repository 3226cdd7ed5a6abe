use image::{imageops, Rgb, RgbImage};
use std::path::Path;

use super::raster::{fill_polygon, outline_polygon};
use crate::config::Normalization;
use crate::error::{PipelineError, Result};
use crate::notes::extract::{loud_keys, KeyActivation};
use crate::notes::table::{is_black, FrequencyTable, REFERENCE_HEIGHT, REFERENCE_WIDTH};

const KEY_FILL: [u8; 3] = [0, 255, 0];
const KEY_OUTLINE: [u8; 3] = [0, 255, 240];

/// The static keyboard image every frame starts from. Never drawn on.
#[derive(Clone, Debug)]
pub struct KeyboardTemplate {
    image: RgbImage,
}

impl KeyboardTemplate {
    /// Load the keyboard asset and downscale it by `scale`. Dimensions are
    /// rounded the same way key polygon coordinates are.
    pub fn load(path: &Path, scale: f32) -> Result<Self> {
        let asset_err = |reason: String| PipelineError::KeyboardAsset {
            path: path.to_path_buf(),
            reason,
        };
        let img = image::open(path).map_err(|e| asset_err(e.to_string()))?.to_rgb8();
        let width = scaled_len(img.width(), scale);
        let height = scaled_len(img.height(), scale);
        if width == 0 || height == 0 {
            return Err(asset_err(format!(
                "{}x{} image downscaled by {} is empty",
                img.width(),
                img.height(),
                scale
            )));
        }
        let image = if (width, height) == img.dimensions() {
            img
        } else {
            imageops::resize(&img, width, height, imageops::FilterType::Lanczos3)
        };
        log::info!("Keyboard template: {}x{} from {}", width, height, path.display());
        Ok(Self { image })
    }

    /// Draw a plain keyboard matching the reference key layout at `scale`.
    pub fn synthesize(scale: f32) -> Self {
        let width = scaled_len(REFERENCE_WIDTH, scale).max(1);
        let height = scaled_len(REFERENCE_HEIGHT, scale).max(1);
        let mut image = RgbImage::from_pixel(width, height, Rgb([250, 250, 245]));
        let table = FrequencyTable::build(scale);

        for row in table.rows().iter().filter(|r| !is_black(r.key)) {
            if let Some(ref poly) = row.polygon {
                outline_polygon(&mut image, poly.points(), [90, 90, 90]);
            }
        }
        for row in table.rows().iter().filter(|r| is_black(r.key)) {
            if let Some(ref poly) = row.polygon {
                fill_polygon(&mut image, poly.points(), [20, 20, 20], 1.0);
            }
        }
        Self { image }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.image.save(path).map_err(|e| PipelineError::KeyboardAsset {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

fn scaled_len(len: u32, scale: f32) -> u32 {
    (len as f32 / scale).round() as u32
}

/// One time step drawn two ways: the lit keyboard and a 1-pixel-high
/// piano-roll slice of the same width.
pub struct RenderedStep {
    pub keyboard: RgbImage,
    pub roll_row: RgbImage,
}

pub struct KeyboardRenderer<'a> {
    template: &'a KeyboardTemplate,
    table: &'a FrequencyTable,
    normalization: Normalization,
    threshold: f32,
}

impl<'a> KeyboardRenderer<'a> {
    pub fn new(
        template: &'a KeyboardTemplate,
        table: &'a FrequencyTable,
        normalization: Normalization,
        threshold: f32,
    ) -> Self {
        Self {
            template,
            table,
            normalization,
            threshold,
        }
    }

    /// Light every key whose normalized loudness at this step exceeds the
    /// activation threshold, with opacity equal to that loudness.
    pub fn render(&self, activations: &[KeyActivation]) -> RenderedStep {
        let mut keyboard = self.template.image().clone();
        let mut roll_row = RgbImage::new(keyboard.width(), 1);

        for (key, loudness) in loud_keys(activations, self.normalization, self.threshold) {
            let poly = match self.table.polygon(key) {
                Ok(poly) => poly,
                Err(e) => {
                    log::debug!("Skipping key: {}", e);
                    continue;
                }
            };

            let level = (255.0 * loudness) as u8;
            let start = poly.min_x().max(0) as u32;
            let end = (poly.max_x().max(0) as u32).min(roll_row.width());
            for x in start..end {
                roll_row.get_pixel_mut(x, 0).0[1] = level;
            }

            fill_polygon(&mut keyboard, poly.points(), KEY_FILL, loudness);
            outline_polygon(&mut keyboard, poly.points(), KEY_OUTLINE);
        }

        RenderedStep { keyboard, roll_row }
    }
}
