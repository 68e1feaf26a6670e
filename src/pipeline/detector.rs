//! Foreground mask to motion decision

use image::GrayImage;
use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::distance_transform::Norm;
use imageproc::morphology::dilate;
use serde::Serialize;

use super::background::{ForegroundMask, FOREGROUND};
use crate::DetectionConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MotionStatus {
    Ready,
    MotionDetected,
}

impl MotionStatus {
    pub fn label(self) -> &'static str {
        match self {
            MotionStatus::Ready => "Ready",
            MotionStatus::MotionDetected => "Motion detected",
        }
    }
}

/// Bounding box of one external contour plus the area it encloses
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub area: f64,
}

impl Region {
    pub fn bbox_area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MotionResult {
    pub status: MotionStatus,
    /// In contour discovery order
    pub regions: Vec<Region>,
}

impl MotionResult {
    pub fn ready() -> Self {
        Self {
            status: MotionStatus::Ready,
            regions: Vec::new(),
        }
    }

    pub fn is_motion(&self) -> bool {
        self.status == MotionStatus::MotionDetected
    }
}

pub struct MotionDetector {
    config: DetectionConfig,
}

impl MotionDetector {
    pub fn new(config: DetectionConfig) -> Self {
        Self { config }
    }

    pub fn min_area(&self) -> f64 {
        self.config.min_area
    }

    pub fn detect(&self, mask: &ForegroundMask) -> MotionResult {
        let binary = binarize(mask.as_image(), self.config.binary_threshold);
        let radius = (self.config.dilate_size / 2).min(u8::MAX as u32) as u8;
        let cleaned = if radius > 0 {
            dilate(&binary, Norm::LInf, radius)
        } else {
            binary
        };

        let regions: Vec<Region> = find_contours::<i32>(&cleaned)
            .iter()
            .filter(|c| matches!(c.border_type, BorderType::Outer) && c.parent.is_none())
            .map(region_of)
            .filter(|r| r.area >= self.config.min_area)
            .collect();

        if regions.is_empty() {
            MotionResult::ready()
        } else {
            MotionResult {
                status: MotionStatus::MotionDetected,
                regions,
            }
        }
    }
}

fn binarize(mask: &GrayImage, threshold: u8) -> GrayImage {
    let mut out = mask.clone();
    for v in out.iter_mut() {
        *v = if *v >= threshold { FOREGROUND } else { 0 };
    }
    out
}

fn region_of(contour: &Contour<i32>) -> Region {
    let points = &contour.points;
    let (mut x0, mut y0, mut x1, mut y1) = (i32::MAX, i32::MAX, i32::MIN, i32::MIN);
    for p in points {
        x0 = x0.min(p.x);
        y0 = y0.min(p.y);
        x1 = x1.max(p.x);
        y1 = y1.max(p.y);
    }

    // Shoelace over the traced border, pixel centres as vertices
    let mut twice = 0i64;
    for (i, p) in points.iter().enumerate() {
        let q = &points[(i + 1) % points.len()];
        twice += p.x as i64 * q.y as i64 - q.x as i64 * p.y as i64;
    }

    Region {
        x: x0.max(0) as u32,
        y: y0.max(0) as u32,
        width: (x1 - x0 + 1).max(0) as u32,
        height: (y1 - y0 + 1).max(0) as u32,
        area: twice.unsigned_abs() as f64 / 2.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;
    use image::Luma;

    fn detector(min_area: f64) -> MotionDetector {
        let mut config = Config::default().detection;
        config.min_area = min_area;
        MotionDetector::new(config)
    }

    fn mask(width: u32, height: u32, blocks: &[(u32, u32, u32, u32, u8)]) -> ForegroundMask {
        let mut image = GrayImage::new(width, height);
        for &(x0, y0, w, h, value) in blocks {
            for y in y0..y0 + h {
                for x in x0..x0 + w {
                    image.put_pixel(x, y, Luma([value]));
                }
            }
        }
        ForegroundMask::new(image)
    }

    #[test]
    fn test_empty_mask_is_ready() {
        let result = detector(3000.0).detect(&mask(64, 64, &[]));
        assert_eq!(result, MotionResult::ready());
    }

    #[test]
    fn test_large_block_detected_with_tight_box() {
        let result = detector(3000.0).detect(&mask(200, 200, &[(50, 50, 100, 100, 255)]));
        assert_eq!(result.status, MotionStatus::MotionDetected);
        assert_eq!(result.regions.len(), 1);

        let region = result.regions[0];
        // Dilation grows the block by one pixel on every side
        assert_eq!((region.x, region.y), (49, 49));
        assert_eq!((region.width, region.height), (102, 102));
        let error = (region.bbox_area() as f64 - 10_000.0).abs() / 10_000.0;
        assert!(error < 0.05, "bbox area off by {error}");
        assert_eq!(region.area, 101.0 * 101.0);
    }

    #[test]
    fn test_small_block_is_ready() {
        let result = detector(3000.0).detect(&mask(200, 200, &[(50, 50, 40, 40, 255)]));
        assert_eq!(result.status, MotionStatus::Ready);
        assert!(result.regions.is_empty());
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let d = detector(3000.0);
        let at = d.detect(&mask(200, 200, &[(50, 50, 80, 80, 25)]));
        let below = d.detect(&mask(200, 200, &[(50, 50, 80, 80, 24)]));
        assert!(at.is_motion());
        assert!(!below.is_motion());
    }

    #[test]
    fn test_nested_contours_ignored() {
        // A ring with a separate blob inside its hole
        let mut image = GrayImage::new(200, 200);
        for y in 20..140 {
            for x in 20..140 {
                let in_hole = (40..120).contains(&x) && (40..120).contains(&y);
                let in_blob = (50..110).contains(&x) && (50..110).contains(&y);
                if !in_hole || in_blob {
                    image.put_pixel(x, y, Luma([255]));
                }
            }
        }

        let result = detector(3000.0).detect(&ForegroundMask::new(image));
        assert_eq!(result.regions.len(), 1);
        assert_eq!((result.regions[0].width, result.regions[0].height), (122, 122));
    }

    #[test]
    fn test_dilation_merges_hairline_gap() {
        let m = mask(200, 100, &[(20, 20, 60, 60, 255), (81, 20, 60, 60, 255)]);
        let result = detector(3000.0).detect(&m);
        assert_eq!(result.regions.len(), 1);
        assert_eq!(result.regions[0].width, 123);
    }

    #[test]
    fn test_separate_blobs_in_discovery_order() {
        let m = mask(300, 200, &[(200, 20, 70, 70, 255), (20, 100, 70, 70, 255)]);
        let result = detector(3000.0).detect(&m);
        assert_eq!(result.regions.len(), 2);
        assert!(result.regions[0].y < result.regions[1].y);
    }

    #[test]
    fn test_raising_min_area_never_adds_regions() {
        let m = mask(
            400,
            200,
            &[
                (10, 10, 30, 30, 255),
                (60, 10, 60, 60, 255),
                (150, 10, 90, 90, 255),
                (260, 10, 120, 120, 255),
            ],
        );
        let mut previous = usize::MAX;
        for min_area in [0.0, 500.0, 1000.0, 3000.0, 5000.0, 9000.0, 20000.0] {
            let count = detector(min_area).detect(&m).regions.len();
            assert!(count <= previous, "{min_area}: {count} > {previous}");
            previous = count;
        }
        assert_eq!(previous, 0);
    }

    #[test]
    fn test_full_frame_is_one_region() {
        let result = detector(3000.0).detect(&mask(100, 100, &[(0, 0, 100, 100, 255)]));
        assert_eq!(result.status, MotionStatus::MotionDetected);
        assert_eq!(result.regions.len(), 1);
        assert_eq!((result.regions[0].width, result.regions[0].height), (100, 100));
    }
}
