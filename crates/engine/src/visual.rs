//! Pixel and text comparison of two material payloads

use std::collections::HashMap;

use image::{GenericImageView, Pixel};
use inspectus_common::FileType;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{InspectusError, InspectusResult};

/// Allowed per-channel difference (anti-aliasing, compression)
pub const CHANNEL_TOLERANCE: i32 = 5;

/// Result of comparing two payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualDiff {
    /// Fraction of differing units (pixels or lines), in [0, 1]
    pub diff_ratio: f64,

    pub differing: u64,

    pub total: u64,
}

impl VisualDiff {
    pub fn identical(total: u64) -> Self {
        Self {
            diff_ratio: 0.0,
            differing: 0,
            total,
        }
    }

    fn from_counts(differing: u64, total: u64) -> Self {
        let diff_ratio = if total == 0 {
            0.0
        } else {
            differing as f64 / total as f64
        };
        Self {
            diff_ratio,
            differing,
            total,
        }
    }

    /// A pair passes when no more than `threshold` of it differs
    pub fn passes(&self, threshold: f64) -> bool {
        self.diff_ratio <= threshold
    }
}

/// Compare two payloads of the same file type
pub fn compare(file_type: FileType, left: &[u8], right: &[u8]) -> InspectusResult<VisualDiff> {
    if file_type.is_image() {
        compare_images(left, right)
    } else {
        Ok(compare_text(
            &String::from_utf8_lossy(left),
            &String::from_utf8_lossy(right),
        ))
    }
}

/// Pixel-by-pixel comparison.
///
/// When dimensions differ only the overlapping region is compared pixel by
/// pixel; every pixel outside it counts as different.
pub fn compare_images(left: &[u8], right: &[u8]) -> InspectusResult<VisualDiff> {
    let left_img = image::load_from_memory(left)
        .map_err(|e| InspectusError::Report(format!("cannot decode left image: {}", e)))?;
    let right_img = image::load_from_memory(right)
        .map_err(|e| InspectusError::Report(format!("cannot decode right image: {}", e)))?;

    let (lw, lh) = left_img.dimensions();
    let (rw, rh) = right_img.dimensions();
    if (lw, lh) != (rw, rh) {
        warn!("Image dimensions differ: {:?} vs {:?}", (lw, lh), (rw, rh));
    }

    let (ow, oh) = (lw.min(rw), lh.min(rh));
    let left_rgba = left_img.to_rgba8();
    let right_rgba = right_img.to_rgba8();

    let mut differing = 0u64;
    for y in 0..oh {
        for x in 0..ow {
            if pixels_differ(left_rgba.get_pixel(x, y), right_rgba.get_pixel(x, y)) {
                differing += 1;
            }
        }
    }

    let overlap = ow as u64 * oh as u64;
    let total = lw as u64 * lh as u64 + rw as u64 * rh as u64 - overlap;
    differing += total - overlap;

    debug!("{} of {} pixels differ", differing, total);
    Ok(VisualDiff::from_counts(differing, total))
}

fn pixels_differ(a: &image::Rgba<u8>, b: &image::Rgba<u8>) -> bool {
    a.channels()
        .iter()
        .zip(b.channels())
        .any(|(x, y)| (*x as i32 - *y as i32).abs() > CHANNEL_TOLERANCE)
}

/// Line comparison: the share of lines not found on the other side
pub fn compare_text(left: &str, right: &str) -> VisualDiff {
    let mut remaining: HashMap<&str, usize> = HashMap::new();
    for line in right.lines() {
        *remaining.entry(line).or_default() += 1;
    }

    let mut shared = 0u64;
    for line in left.lines() {
        if let Some(count) = remaining.get_mut(line) {
            if *count > 0 {
                *count -= 1;
                shared += 1;
            }
        }
    }

    let total = left.lines().count().max(right.lines().count()) as u64;
    VisualDiff::from_counts(total - shared, total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use test_case::test_case;

    fn png(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(width, height, image::Rgba(color));
        let mut out = Vec::new();
        img.write_to(&mut Cursor::new(&mut out), image::ImageOutputFormat::Png)
            .unwrap();
        out
    }

    #[test]
    fn test_identical_images() {
        let a = png(10, 10, [200, 0, 0, 255]);
        let diff = compare_images(&a, &a).unwrap();
        assert_eq!(diff.differing, 0);
        assert_eq!(diff.total, 100);
        assert!(diff.passes(0.0));
    }

    #[test]
    fn test_small_color_shift_is_tolerated() {
        let a = png(4, 4, [100, 100, 100, 255]);
        let b = png(4, 4, [103, 98, 100, 255]);
        assert_eq!(compare_images(&a, &b).unwrap().differing, 0);
    }

    #[test]
    fn test_different_dimensions_count_outside_overlap() {
        let a = png(10, 10, [0, 0, 0, 255]);
        let b = png(10, 5, [0, 0, 0, 255]);
        let diff = compare_images(&a, &b).unwrap();
        assert_eq!(diff.total, 100);
        assert_eq!(diff.differing, 50);
        assert!((diff.diff_ratio - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_undecodable_image_is_report_error() {
        let a = png(2, 2, [0, 0, 0, 255]);
        assert!(matches!(
            compare_images(&a, b"not a png"),
            Err(InspectusError::Report(_))
        ));
    }

    #[test_case("a\nb\nc", "a\nb\nc", 0, 3 ; "same")]
    #[test_case("a\nb\nc", "a\nx\nc", 1, 3 ; "one line changed")]
    #[test_case("a\nb", "a\nb\nc\nd", 2, 4 ; "lines appended")]
    #[test_case("", "", 0, 0 ; "both empty")]
    fn test_compare_text(left: &str, right: &str, differing: u64, total: u64) {
        let diff = compare_text(left, right);
        assert_eq!((diff.differing, diff.total), (differing, total));
    }

    #[test]
    fn test_threshold_boundary() {
        let diff = VisualDiff::from_counts(1, 4);
        assert!(diff.passes(0.25));
        assert!(!diff.passes(0.2));
    }
}
