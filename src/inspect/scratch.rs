use image::{GrayImage, Luma};
use imageproc::contours::{BorderType, find_contours};
use imageproc::distance_transform::Norm;
use imageproc::edges::canny;
use imageproc::morphology::close;
use imageproc::point::Point;

use super::{Detector, Profile};

/// A closed outline found in the difference of two photos.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mark {
    pub area: f64,
    pub width: u32,
    pub height: u32,
}

impl Mark {
    pub fn aspect_ratio(&self) -> f64 {
        if self.height == 0 {
            0.0
        } else {
            f64::from(self.width) / f64::from(self.height)
        }
    }

    fn from_points(points: &[Point<i32>]) -> Option<Self> {
        let first = points.first()?;
        let (mut min_x, mut max_x, mut min_y, mut max_y) = (first.x, first.x, first.y, first.y);
        for p in points {
            min_x = min_x.min(p.x);
            max_x = max_x.max(p.x);
            min_y = min_y.min(p.y);
            max_y = max_y.max(p.y);
        }
        Some(Self {
            area: polygon_area(points),
            width: (max_x - min_x + 1).unsigned_abs(),
            height: (max_y - min_y + 1).unsigned_abs(),
        })
    }
}

/// Shoelace area of the polygon traced by `points`.
fn polygon_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let twice: i64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| i64::from(a.x) * i64::from(b.y) - i64::from(b.x) * i64::from(a.y))
        .sum();
    // i64 -> f64 is exact for any image that fits in memory
    #[allow(clippy::cast_precision_loss)]
    let area = twice.unsigned_abs() as f64 / 2.0;
    area
}

/// Histogram equalization that maps the darkest present level to 0 and the
/// brightest to 255.
pub(super) fn equalize(img: &GrayImage) -> GrayImage {
    let mut hist = [0u64; 256];
    for p in img.pixels() {
        hist[usize::from(p[0])] += 1;
    }
    let total: u64 = hist.iter().sum();
    let mut cdf = [0u64; 256];
    let mut running = 0;
    for (slot, count) in cdf.iter_mut().zip(hist) {
        running += count;
        *slot = running;
    }
    let cdf_min = cdf.iter().copied().find(|&c| c > 0).unwrap_or(0);
    let span = total - cdf_min;
    if span == 0 {
        return img.clone();
    }

    let mut lut = [0u8; 256];
    for (level, out) in lut.iter_mut().enumerate() {
        let scaled = cdf[level].saturating_sub(cdf_min) * 255 / span;
        *out = u8::try_from(scaled).unwrap_or(u8::MAX);
    }
    GrayImage::from_fn(img.width(), img.height(), |x, y| {
        Luma([lut[usize::from(img.get_pixel(x, y)[0])]])
    })
}

fn abs_diff(a: &GrayImage, b: &GrayImage) -> GrayImage {
    GrayImage::from_fn(a.width(), a.height(), |x, y| {
        Luma([a.get_pixel(x, y)[0].abs_diff(b.get_pixel(x, y)[0])])
    })
}

/// Linearly stretch the pixel range onto 0..=255.
fn stretch(img: &GrayImage) -> GrayImage {
    let (lo, hi) = img
        .pixels()
        .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p[0]), hi.max(p[0])));
    if hi <= lo {
        return img.clone();
    }
    let range = u32::from(hi - lo);
    GrayImage::from_fn(img.width(), img.height(), |x, y| {
        let v = u32::from(img.get_pixel(x, y)[0] - lo) * 255 / range;
        Luma([u8::try_from(v).unwrap_or(u8::MAX)])
    })
}

/// Outermost closed outlines in the difference of two same-sized photos.
///
/// Coarse: equalize each photo, diff, Canny, close with a 3x3 square.
/// Fine: diff, stretch, equalize the diff, Canny.
/// `canny` smooths with a sigma 1.4 Gaussian before taking gradients.
pub fn find_marks(detector: &Detector, new: &GrayImage, existing: &GrayImage) -> Vec<Mark> {
    let edges = match detector.profile {
        Profile::Coarse => {
            let diff = abs_diff(&equalize(new), &equalize(existing));
            let edges = canny(&diff, detector.canny_low, detector.canny_high);
            close(&edges, Norm::LInf, 1)
        }
        Profile::Fine => {
            let diff = equalize(&stretch(&abs_diff(new, existing)));
            canny(&diff, detector.canny_low, detector.canny_high)
        }
    };

    find_contours::<i32>(&edges)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .filter_map(|c| Mark::from_points(&c.points))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn square_area_and_bounds() {
        let pts: Vec<Point<i32>> = [(0, 0), (10, 0), (10, 5), (0, 5)]
            .into_iter()
            .map(|(x, y)| Point::new(x, y))
            .collect();
        let mark = Mark::from_points(&pts).unwrap();
        assert!((mark.area - 50.0).abs() < f64::EPSILON);
        assert_eq!((mark.width, mark.height), (11, 6));
    }

    #[test]
    fn degenerate_outline_has_no_area() {
        let pts = vec![Point::new(1, 1), Point::new(5, 1)];
        assert!(polygon_area(&pts).abs() < f64::EPSILON);
        assert!(Mark::from_points(&[]).is_none());
    }

    #[test]
    fn zero_height_aspect_is_zero() {
        let mark = Mark {
            area: 1.0,
            width: 3,
            height: 0,
        };
        assert!(mark.aspect_ratio().abs() < f64::EPSILON);
    }

    #[test]
    fn equalize_spreads_two_levels_to_extremes() {
        let img = GrayImage::from_fn(4, 1, |x, _| Luma([if x < 2 { 100 } else { 110 }]));
        let eq = equalize(&img);
        assert_eq!(eq.get_pixel(0, 0)[0], 0);
        assert_eq!(eq.get_pixel(3, 0)[0], 255);
    }

    #[test]
    fn equalize_and_stretch_leave_flat_images_alone() {
        let flat = GrayImage::from_pixel(8, 8, Luma([0]));
        assert_eq!(equalize(&flat), flat);
        assert_eq!(stretch(&flat), flat);
    }

    #[test]
    fn stretch_maps_range_to_full_scale() {
        let img = GrayImage::from_fn(3, 1, |x, _| Luma([[10, 20, 30][x as usize]]));
        let out = stretch(&img);
        assert_eq!(
            [out.get_pixel(0, 0)[0], out.get_pixel(1, 0)[0], out.get_pixel(2, 0)[0]],
            [0, 127, 255]
        );
    }

    #[test]
    fn identical_inputs_produce_no_marks() {
        let img = GrayImage::from_fn(64, 64, |x, y| Luma([u8::try_from((x + y) % 200).unwrap()]));
        assert!(find_marks(&Detector::coarse(), &img, &img).is_empty());
        assert!(find_marks(&Detector::fine(), &img, &img).is_empty());
    }

    #[test]
    fn fine_finds_thin_streak_without_closing() {
        use crate::inspect::testing::{base, scratched};

        let detector = Detector::fine();
        let marks = find_marks(&detector, &scratched(250.0, 250.0, 30.0, 8.0), &base());
        assert!(
            marks.iter().any(|m| m.area > 5.0 && m.area < 1500.0),
            "got {marks:?}"
        );
    }
}
