use image::GrayImage;
use image::imageops::FilterType;

use super::scratch::equalize;

const THUMB: u32 = 64;

/// Pearson correlation of two photos reduced to equalized 64x64 thumbnails.
///
/// 1.0 for the same picture, around 0 for unrelated pictures, negative for
/// inverted ones. Two flat thumbnails score 1.0 when equal and 0.0 otherwise.
pub fn similarity(a: &GrayImage, b: &GrayImage) -> f64 {
    let a = thumbnail(a);
    let b = thumbnail(b);

    let n = f64::from(THUMB * THUMB);
    let mean = |img: &GrayImage| img.pixels().map(|p| f64::from(p[0])).sum::<f64>() / n;
    let (ma, mb) = (mean(&a), mean(&b));

    let (mut cov, mut va, mut vb) = (0.0, 0.0, 0.0);
    for (pa, pb) in a.pixels().zip(b.pixels()) {
        let da = f64::from(pa[0]) - ma;
        let db = f64::from(pb[0]) - mb;
        cov += da * db;
        va += da * da;
        vb += db * db;
    }

    if va == 0.0 || vb == 0.0 {
        return if a == b { 1.0 } else { 0.0 };
    }
    cov / (va.sqrt() * vb.sqrt())
}

fn thumbnail(img: &GrayImage) -> GrayImage {
    equalize(&image::imageops::resize(img, THUMB, THUMB, FilterType::Triangle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn stripes(period: u32) -> GrayImage {
        GrayImage::from_fn(256, 256, |x, _| Luma([if (x / period) % 2 == 0 { 30 } else { 220 }]))
    }

    #[test]
    fn same_image_scores_one() {
        let img = stripes(16);
        assert!((similarity(&img, &img) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn inverted_image_scores_negative() {
        let img = stripes(16);
        let mut inv = img.clone();
        image::imageops::invert(&mut inv);
        assert!(similarity(&img, &inv) < 0.0);
    }

    #[test]
    fn resolution_does_not_matter() {
        let small = stripes(16);
        let large = image::imageops::resize(&small, 512, 512, FilterType::Nearest);
        assert!(similarity(&small, &large) > 0.9);
    }

    #[test]
    fn flat_images() {
        let black = GrayImage::from_pixel(32, 32, Luma([0]));
        let white = GrayImage::from_pixel(32, 32, Luma([255]));
        assert!((similarity(&black, &black) - 1.0).abs() < f64::EPSILON);
        assert!(similarity(&black, &white).abs() < f64::EPSILON);
    }
}
