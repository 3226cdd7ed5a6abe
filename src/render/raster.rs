//! Minimal polygon rasterization onto RGB images with alpha blending.

use image::RgbImage;

/// Blend `color` over the pixel at (x, y) with opacity `alpha` in [0, 1].
/// Out-of-bounds coordinates are ignored.
pub fn blend_pixel(img: &mut RgbImage, x: i32, y: i32, color: [u8; 3], alpha: f32) {
    if x < 0 || y < 0 || x >= img.width() as i32 || y >= img.height() as i32 {
        return;
    }
    let a = alpha.clamp(0.0, 1.0);
    let inv_a = 1.0 - a;
    let c = &mut img.get_pixel_mut(x as u32, y as u32).0;
    for i in 0..3 {
        c[i] = (color[i] as f32 * a + c[i] as f32 * inv_a).round() as u8;
    }
}

/// Fill a closed polygon (even-odd rule, pixel centres) with `color` at `alpha`.
pub fn fill_polygon(img: &mut RgbImage, points: &[(i32, i32)], color: [u8; 3], alpha: f32) {
    if points.len() < 3 {
        return;
    }
    let min_y = points.iter().map(|p| p.1).min().unwrap_or(0).max(0);
    let max_y = points
        .iter()
        .map(|p| p.1)
        .max()
        .unwrap_or(0)
        .min(img.height() as i32);

    let mut crossings: Vec<f32> = Vec::with_capacity(points.len());
    for y in min_y..max_y {
        let sample_y = y as f32 + 0.5;
        crossings.clear();
        for i in 0..points.len() {
            let (x0, y0) = points[i];
            let (x1, y1) = points[(i + 1) % points.len()];
            let (fy0, fy1) = (y0 as f32, y1 as f32);
            if (fy0 <= sample_y && fy1 > sample_y) || (fy1 <= sample_y && fy0 > sample_y) {
                let t = (sample_y - fy0) / (fy1 - fy0);
                crossings.push(x0 as f32 + t * (x1 - x0) as f32);
            }
        }
        crossings.sort_by(f32::total_cmp);

        for span in crossings.chunks_exact(2) {
            let start = (span[0] - 0.5).ceil() as i32;
            let end = (span[1] - 0.5).ceil() as i32;
            for x in start.max(0)..end.min(img.width() as i32) {
                blend_pixel(img, x, y, color, alpha);
            }
        }
    }
}

/// Draw the polygon's edges one pixel wide.
pub fn outline_polygon(img: &mut RgbImage, points: &[(i32, i32)], color: [u8; 3]) {
    for i in 0..points.len() {
        let (x0, y0) = points[i];
        let (x1, y1) = points[(i + 1) % points.len()];
        let steps = (x1 - x0).abs().max((y1 - y0).abs()).max(1);
        for s in 0..=steps {
            let t = s as f32 / steps as f32;
            let x = (x0 as f32 + t * (x1 - x0) as f32).round() as i32;
            let y = (y0 as f32 + t * (y1 - y0) as f32).round() as i32;
            // right/bottom borders sit one past the last pixel
            let x = x.min(img.width() as i32 - 1);
            let y = y.min(img.height() as i32 - 1);
            blend_pixel(img, x, y, color, 1.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn fills_rectangle_exactly() {
        let mut img = RgbImage::new(10, 10);
        fill_polygon(&mut img, &[(2, 2), (6, 2), (6, 5), (2, 5)], [255, 0, 0], 1.0);
        let filled = img.pixels().filter(|p| p.0 == [255, 0, 0]).count();
        assert_eq!(filled, 4 * 3);
        assert_eq!(img.get_pixel(2, 2).0, [255, 0, 0]);
        assert_eq!(img.get_pixel(6, 2).0, [0, 0, 0]);
    }

    #[test]
    fn half_alpha_blends() {
        let mut img = RgbImage::from_pixel(2, 2, Rgb([200, 200, 200]));
        blend_pixel(&mut img, 0, 0, [0, 0, 0], 0.5);
        assert_eq!(img.get_pixel(0, 0).0, [100, 100, 100]);
        blend_pixel(&mut img, 5, 5, [0, 0, 0], 1.0);
    }

    #[test]
    fn clips_polygons_outside_image() {
        let mut img = RgbImage::new(4, 4);
        fill_polygon(&mut img, &[(-5, -5), (50, -5), (50, 50), (-5, 50)], [1, 2, 3], 1.0);
        assert!(img.pixels().all(|p| p.0 == [1, 2, 3]));
        outline_polygon(&mut img, &[(-5, -5), (50, -5), (50, 50)], [9, 9, 9]);
    }
}
