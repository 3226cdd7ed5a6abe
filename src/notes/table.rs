//! Piano key frequencies and their drawable regions on the keyboard image.

use crate::error::RenderError;

pub const NUM_KEYS: usize = 88;
pub const LAST_KEY: u8 = 88;

/// Keyboard layout the polygons are defined against, before downscaling.
pub const REFERENCE_WIDTH: u32 = 1920;
pub const REFERENCE_HEIGHT: u32 = 240;

const WHITE_KEYS: usize = 52;
const BLACK_WIDTH_RATIO: f32 = 0.58;
const BLACK_HEIGHT_RATIO: f32 = 0.62;

/// Equal-tempered fundamental of a key, A4 (key 49) = 440 Hz.
pub fn key_frequency(key: u8) -> f32 {
    440.0 * 2f32.powf((key as f32 - 49.0) / 12.0)
}

pub fn is_black(key: u8) -> bool {
    // key 1 is A0; pitch class 0 is C
    matches!((key as u32 + 8) % 12, 1 | 3 | 6 | 8 | 10)
}

/// Index of the table entry closest to `freq`. The first minimum wins.
pub fn nearest_position(freq: f32, table: &[f32]) -> usize {
    let mut best = 0;
    let mut best_dist = f32::INFINITY;
    for (i, &f) in table.iter().enumerate() {
        let d = (f - freq).abs();
        if d < best_dist {
            best = i;
            best_dist = d;
        }
    }
    best
}

#[derive(Clone, Debug, PartialEq)]
pub struct Polygon {
    points: Vec<(i32, i32)>,
}

impl Polygon {
    pub fn new(points: Vec<(i32, i32)>) -> Self {
        Self { points }
    }

    pub fn points(&self) -> &[(i32, i32)] {
        &self.points
    }

    pub fn min_x(&self) -> i32 {
        self.points.iter().map(|p| p.0).min().unwrap_or(0)
    }

    pub fn max_x(&self) -> i32 {
        self.points.iter().map(|p| p.0).max().unwrap_or(0)
    }

    /// Every vertex lies inside (or on the border of) a `width × height` image.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        !self.points.is_empty()
            && self
                .points
                .iter()
                .all(|&(x, y)| x >= 0 && y >= 0 && x <= width as i32 && y <= height as i32)
    }
}

#[derive(Clone, Debug)]
pub struct KeyRow {
    pub key: u8,
    pub frequency: f32,
    pub polygon: Option<Polygon>,
}

/// The 88 keys of a standard piano, lowest first.
#[derive(Clone, Debug)]
pub struct FrequencyTable {
    rows: Vec<KeyRow>,
    /// Frequencies highest key first; position `p` is key `LAST_KEY - p`.
    lookup: Vec<f32>,
}

impl FrequencyTable {
    /// Build the table with polygons divided by `scale` (the keyboard image
    /// downscale factor). Frequencies do not depend on `scale`.
    pub fn build(scale: f32) -> Self {
        let polygons = reference_polygons();
        let rows: Vec<KeyRow> = (1..=LAST_KEY)
            .zip(polygons)
            .map(|(key, points)| {
                let scaled: Vec<(i32, i32)> = points
                    .iter()
                    .map(|&(x, y)| ((x / scale).round() as i32, (y / scale).round() as i32))
                    .collect();
                KeyRow {
                    key,
                    frequency: key_frequency(key),
                    polygon: Some(Polygon::new(scaled)),
                }
            })
            .collect();
        let lookup = rows.iter().rev().map(|r| r.frequency).collect();
        Self { rows, lookup }
    }

    /// Mark polygons that fall outside a `width × height` image as absent.
    /// Returns how many keys became undrawable.
    pub fn retain_drawable(&mut self, width: u32, height: u32) -> usize {
        let mut dropped = 0;
        for row in &mut self.rows {
            if let Some(ref poly) = row.polygon {
                if !poly.fits_within(width, height) {
                    row.polygon = None;
                    dropped += 1;
                }
            }
        }
        if dropped > 0 {
            log::warn!(
                "{} keys do not fit a {}x{} keyboard image and will not be drawn",
                dropped,
                width,
                height
            );
        }
        dropped
    }

    pub fn rows(&self) -> &[KeyRow] {
        &self.rows
    }

    pub fn row(&self, key: u8) -> Option<&KeyRow> {
        self.rows.get((key as usize).checked_sub(1)?)
    }

    pub fn polygon(&self, key: u8) -> Result<&Polygon, RenderError> {
        self.row(key)
            .and_then(|r| r.polygon.as_ref())
            .ok_or(RenderError { key })
    }

    /// Quantize a frequency to the nearest key, 1..=88.
    pub fn nearest_key(&self, freq: f32) -> u8 {
        LAST_KEY - nearest_position(freq, &self.lookup) as u8
    }
}

/// Key outlines at the reference size: notched white keys, black keys
/// centred on the white-key boundary they sit over.
fn reference_polygons() -> Vec<Vec<(f32, f32)>> {
    let height = REFERENCE_HEIGHT as f32;
    let white_w = REFERENCE_WIDTH as f32 / WHITE_KEYS as f32;
    let half_black = white_w * BLACK_WIDTH_RATIO / 2.0;
    let black_h = height * BLACK_HEIGHT_RATIO;

    let mut whites_so_far = 0usize;
    let mut polygons = Vec::with_capacity(NUM_KEYS);
    for key in 1..=LAST_KEY {
        if is_black(key) {
            let cx = whites_so_far as f32 * white_w;
            polygons.push(vec![
                (cx - half_black, 0.0),
                (cx + half_black, 0.0),
                (cx + half_black, black_h),
                (cx - half_black, black_h),
            ]);
            continue;
        }

        let x0 = whites_so_far as f32 * white_w;
        let x1 = x0 + white_w;
        let left = key > 1 && is_black(key - 1);
        let right = key < LAST_KEY && is_black(key + 1);

        let mut pts = Vec::with_capacity(8);
        pts.push((if left { x0 + half_black } else { x0 }, 0.0));
        pts.push((if right { x1 - half_black } else { x1 }, 0.0));
        if right {
            pts.push((x1 - half_black, black_h));
            pts.push((x1, black_h));
        }
        pts.push((x1, height));
        pts.push((x0, height));
        if left {
            pts.push((x0, black_h));
            pts.push((x0 + half_black, black_h));
        }
        polygons.push(pts);
        whites_so_far += 1;
    }
    polygons
}
