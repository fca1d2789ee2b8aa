use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{ImageFormat, Rgb, RgbImage};
use log::info;
use serde::Serialize;

use crate::cloud_io::write_atomically;
use crate::error::Result;
use crate::point_set::PointSet;
use crate::random_sample::{random_sample, seeded_rng};

pub const DEFAULT_MAX_SAMPLE_POINTS: usize = 100_000;

const CANVAS: u32 = 1024;
const MARGIN: u32 = 24;
const SAMPLE_SEED: u64 = 0;
const BACKGROUND: [u8; 3] = [255, 255, 255];
const INK: [u8; 3] = [31, 119, 180];

#[derive(Debug, Clone, Serialize)]
pub struct PreviewSummary {
    pub path: PathBuf,
    pub title: String,
    pub total_points: usize,
    pub rendered_points: usize,
}

/// Rasterizes the (x, y) projection of `points` as a square PNG density map.
///
/// Both axes share one scale so the plane keeps its aspect. Clouds larger than
/// `max_sample_points` are thinned with a fixed-seed subsample for drawing only.
pub fn render_density_preview(
    points: &PointSet,
    output_path: impl AsRef<Path>,
    title: &str,
    max_sample_points: usize,
) -> Result<PreviewSummary> {
    let output_path = output_path.as_ref();
    let sampled;
    let drawn = if points.len() > max_sample_points {
        sampled = random_sample(points, max_sample_points, &mut seeded_rng(Some(SAMPLE_SEED)));
        &sampled
    } else {
        points
    };

    let image = rasterize(drawn);
    let mut png = Vec::new();
    image.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    write_atomically(output_path, &png)?;

    info!(
        "preview \"{}\": {} of {} points -> {}",
        title,
        drawn.len(),
        points.len(),
        output_path.display()
    );
    Ok(PreviewSummary {
        path: output_path.to_path_buf(),
        title: title.to_string(),
        total_points: points.len(),
        rendered_points: drawn.len(),
    })
}

fn rasterize(points: &PointSet) -> RgbImage {
    let mut image = RgbImage::from_pixel(CANVAS, CANVAS, Rgb(BACKGROUND));
    let Some(bounds) = points.bounds() else {
        return image;
    };

    let span = {
        let extent = bounds.extent();
        let widest = extent[0].max(extent[1]);
        if widest > 0.0 {
            widest
        } else {
            1.0
        }
    };
    let center_x = (bounds.min[0] + bounds.max[0]) / 2.0;
    let center_y = (bounds.min[1] + bounds.max[1]) / 2.0;
    let inner = (CANVAS - 2 * MARGIN - 1) as f64;

    let mut hits = vec![0u32; (CANVAS * CANVAS) as usize];
    for p in points.iter() {
        let u = ((p[0] - center_x) / span + 0.5) * inner;
        let v = ((p[1] - center_y) / span + 0.5) * inner;
        let px = MARGIN + u.round() as u32;
        // Image rows grow downward, y grows upward.
        let py = CANVAS - 1 - (MARGIN + v.round() as u32);
        hits[(py * CANVAS + px) as usize] += 1;
    }

    let peak = hits.iter().copied().max().unwrap_or(0);
    if peak == 0 {
        return image;
    }
    let scale = (1.0 + peak as f64).ln();
    for (i, &count) in hits.iter().enumerate() {
        if count == 0 {
            continue;
        }
        // Single hits are still clearly visible.
        let t = 0.35 + 0.65 * (1.0 + count as f64).ln() / scale;
        let mix = |bg: u8, ink: u8| (bg as f64 + (ink as f64 - bg as f64) * t).round() as u8;
        let pixel = Rgb([
            mix(BACKGROUND[0], INK[0]),
            mix(BACKGROUND[1], INK[1]),
            mix(BACKGROUND[2], INK[2]),
        ]);
        image.put_pixel(i as u32 % CANVAS, i as u32 / CANVAS, pixel);
    }
    image
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_preview_writes_png() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("preview.png");
        let points =
            PointSet::from_points((0..50).map(|i| [i as f64 * 0.1, (i % 7) as f64, 0.0])).unwrap();
        let summary = render_density_preview(&points, &path, "line", 1_000).unwrap();
        assert_eq!(summary.rendered_points, 50);
        let decoded = image::open(&path).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (CANVAS, CANVAS));
        assert!(decoded.pixels().any(|p| p.0 != BACKGROUND));
    }

    #[test]
    fn test_preview_samples_large_clouds_without_touching_input() {
        let dir = tempdir().unwrap();
        let points = PointSet::from_points((0..500).map(|i| [i as f64, 0.0, 0.0])).unwrap();
        let before = points.clone();
        let summary =
            render_density_preview(&points, dir.path().join("p.png"), "big", 100).unwrap();
        assert_eq!(summary.rendered_points, 100);
        assert_eq!(summary.total_points, 500);
        assert_eq!(points, before);
    }

    #[test]
    fn test_rasterize_handles_degenerate_clouds() {
        let empty = rasterize(&PointSet::new());
        assert!(empty.pixels().all(|p| p.0 == BACKGROUND));
        let stacked = rasterize(&PointSet::from_points([[2.0, 2.0, 0.0]; 3]).unwrap());
        assert_eq!(stacked.pixels().filter(|p| p.0 != BACKGROUND).count(), 1);
    }
}
