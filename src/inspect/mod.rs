//! Image comparison between a freshly submitted photo and the one on record.
//!
//! Two detector profiles exist. [`Profile::Coarse`] flags any sizeable change
//! between the photos and is used for cars. [`Profile::Fine`] first checks that
//! both photos show the same subject and then looks for small, elongated marks,
//! and is used for scooters.

mod scratch;
mod similarity;

use bytes::Bytes;
use image::GrayImage;
use image::imageops::FilterType;

pub use scratch::{Mark, find_marks};
pub use similarity::similarity;

/// Side length both photos are resized to before comparison.
pub const WORKING_SIZE: u32 = 500;

#[derive(Debug, thiserror::Error)]
pub enum InspectError {
    #[error("failed to decode {which} image: {source}")]
    Decode {
        which: &'static str,
        #[source]
        source: image::ImageError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Coarse,
    Fine,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detector {
    pub profile: Profile,
    /// Canny hysteresis thresholds.
    pub canny_low: f32,
    pub canny_high: f32,
    /// Marks must have an area strictly inside this range.
    pub min_area: f64,
    pub max_area: Option<f64>,
    /// Bounding-box width/height must lie strictly inside this range.
    pub aspect_range: Option<(f64, f64)>,
    /// Minimum similarity for two photos to count as the same subject.
    pub similarity_threshold: Option<f64>,
}

impl Detector {
    pub const fn coarse() -> Self {
        Self {
            profile: Profile::Coarse,
            canny_low: 50.0,
            canny_high: 200.0,
            min_area: 10.0,
            max_area: None,
            aspect_range: None,
            similarity_threshold: None,
        }
    }

    pub const fn fine() -> Self {
        Self {
            profile: Profile::Fine,
            canny_low: 10.0,
            canny_high: 100.0,
            min_area: 5.0,
            max_area: Some(1500.0),
            aspect_range: Some((0.5, 10.0)),
            similarity_threshold: Some(0.7),
        }
    }

    fn accepts(&self, mark: &Mark) -> bool {
        if mark.area <= self.min_area {
            return false;
        }
        if self.max_area.is_some_and(|max| mark.area >= max) {
            return false;
        }
        if let Some((lo, hi)) = self.aspect_range {
            let aspect = mark.aspect_ratio();
            if aspect <= lo || aspect >= hi {
                return false;
            }
        }
        true
    }
}

/// Outcome of comparing a new photo against the stored one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    /// No qualifying difference, or the new photo could not be read.
    Unchanged,
    /// The photos differ by at least one scratch-like mark.
    Scratched { marks: usize },
    /// The stored photo could not be read and should be replaced.
    Unreadable,
    /// The photos do not show the same subject.
    Different { score: f64 },
}

impl Verdict {
    pub fn needs_update(self) -> bool {
        matches!(self, Self::Scratched { .. } | Self::Unreadable)
    }
}

pub fn decode(data: &[u8], which: &'static str) -> Result<GrayImage, InspectError> {
    image::load_from_memory(data)
        .map(|img| img.to_luma8())
        .map_err(|source| InspectError::Decode { which, source })
}

fn normalize_size(img: &GrayImage) -> GrayImage {
    image::imageops::resize(img, WORKING_SIZE, WORKING_SIZE, FilterType::Triangle)
}

impl Detector {
    /// Compare two encoded photos. CPU bound; see [`inspect_blocking`].
    pub fn inspect(&self, new: &[u8], existing: &[u8]) -> Verdict {
        let new = match decode(new, "new") {
            Ok(img) => img,
            Err(e) => {
                tracing::error!(error = %e, "failed to load the new image");
                return Verdict::Unchanged;
            }
        };
        let existing = match decode(existing, "existing") {
            Ok(img) => img,
            Err(e) => {
                tracing::error!(error = %e, "failed to load the existing image");
                return Verdict::Unreadable;
            }
        };
        self.compare(&new, &existing)
    }

    pub fn compare(&self, new: &GrayImage, existing: &GrayImage) -> Verdict {
        if let Some(threshold) = self.similarity_threshold {
            let score = similarity(new, existing);
            if score <= threshold {
                tracing::info!(score, "images show different subjects");
                return Verdict::Different { score };
            }
        }

        let marks = find_marks(self, &normalize_size(new), &normalize_size(existing))
            .into_iter()
            .filter(|m| self.accepts(m))
            .count();

        if marks > 0 {
            tracing::info!(marks, profile = ?self.profile, "scratch detected");
            Verdict::Scratched { marks }
        } else {
            tracing::info!(profile = ?self.profile, "no scratch detected");
            Verdict::Unchanged
        }
    }
}

/// Run [`Detector::inspect`] on the blocking pool.
pub async fn inspect_blocking(detector: Detector, new: Bytes, existing: Bytes) -> Verdict {
    match tokio::task::spawn_blocking(move || detector.inspect(&new, &existing)).await {
        Ok(verdict) => verdict,
        Err(e) => {
            tracing::error!(error = %e, "image inspection task failed");
            Verdict::Unchanged
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::io::Cursor;

    use image::{GrayImage, ImageFormat, Luma};

    /// Smooth diagonal gradient.
    pub fn base() -> GrayImage {
        GrayImage::from_fn(super::WORKING_SIZE, super::WORKING_SIZE, |x, y| {
            let v = 60 + x * 80 / super::WORKING_SIZE + y * 40 / super::WORKING_SIZE;
            Luma([u8::try_from(v).unwrap()])
        })
    }

    /// `base()` darkened by 100 levels inside an ellipse centred on (cx, cy).
    pub fn scratched(cx: f64, cy: f64, rx: f64, ry: f64) -> GrayImage {
        let mut img = base();
        for (x, y, p) in img.enumerate_pixels_mut() {
            let dx = (f64::from(x) - cx) / rx;
            let dy = (f64::from(y) - cy) / ry;
            if dx * dx + dy * dy <= 1.0 {
                *p = Luma([p[0].saturating_sub(100)]);
            }
        }
        img
    }

    pub fn png(img: &GrayImage) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{base, png, scratched};
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Detector::coarse())]
    #[case(Detector::fine())]
    fn identical_photos_are_unchanged(#[case] detector: Detector) {
        let img = png(&base());
        assert_eq!(detector.inspect(&img, &img), Verdict::Unchanged);
    }

    #[rstest]
    #[case(Detector::coarse())]
    #[case(Detector::fine())]
    fn elongated_mark_is_a_scratch(#[case] detector: Detector) {
        let new = png(&scratched(250.0, 250.0, 30.0, 8.0));
        let existing = png(&base());
        let verdict = detector.inspect(&new, &existing);
        assert!(verdict.needs_update(), "expected a scratch, got {verdict:?}");
    }

    #[test]
    fn fine_leaves_large_changes_alone() {
        // Area far beyond 1500 px²
        let new = scratched(250.0, 250.0, 120.0, 60.0);
        let verdict = Detector::fine().compare(&new, &base());
        assert!(!verdict.needs_update(), "got {verdict:?}");
    }

    #[test]
    fn coarse_flags_large_marks_too() {
        let new = scratched(250.0, 250.0, 120.0, 60.0);
        let verdict = Detector::coarse().compare(&new, &base());
        assert!(matches!(verdict, Verdict::Scratched { .. }), "got {verdict:?}");
    }

    #[test]
    fn fine_rejects_different_subject() {
        let original = base();
        let mut inverted = original.clone();
        image::imageops::invert(&mut inverted);
        let verdict = Detector::fine().compare(&inverted, &original);
        assert!(matches!(verdict, Verdict::Different { .. }), "got {verdict:?}");
        assert!(!verdict.needs_update());
    }

    #[test]
    fn unreadable_new_photo_keeps_existing() {
        let existing = png(&base());
        assert_eq!(
            Detector::coarse().inspect(b"not an image", &existing),
            Verdict::Unchanged
        );
    }

    #[test]
    fn unreadable_existing_photo_is_replaced() {
        let new = png(&base());
        let verdict = Detector::fine().inspect(&new, b"<html>404</html>");
        assert_eq!(verdict, Verdict::Unreadable);
        assert!(verdict.needs_update());
    }

    #[rstest]
    #[case(4.0, 2.0, false)] // area too small
    #[case(100.0, 2.0, true)]
    #[case(100.0, 0.4, false)] // too tall
    #[case(100.0, 12.0, false)] // too wide
    #[case(1600.0, 2.0, false)] // too large
    fn fine_acceptance(#[case] area: f64, #[case] aspect: f64, #[case] accepted: bool) {
        let mark = Mark {
            area,
            width: (aspect * 10.0).round() as u32,
            height: 10,
        };
        assert_eq!(Detector::fine().accepts(&mark), accepted);
    }

    #[tokio::test]
    async fn blocking_wrapper_returns_verdict() {
        let img = Bytes::from(png(&base()));
        let verdict = inspect_blocking(Detector::coarse(), img.clone(), img).await;
        assert_eq!(verdict, Verdict::Unchanged);
    }
}
