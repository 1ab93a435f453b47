//! Image transformation for wallpaper preparation.
//!
//! Center-crop: cut the largest centered region with the target's aspect
//! ratio out of the source, then scale only that region to the target.

use image::{DynamicImage, GenericImageView};

/// Largest centered `(x, y, width, height)` region of a `src_width`x`src_height`
/// image with the aspect ratio of `target_width`x`target_height`.
pub(crate) fn crop_rect(
    src_width: u32,
    src_height: u32,
    target_width: u32,
    target_height: u32,
) -> (u32, u32, u32, u32) {
    // Compare src_w/src_h against target_w/target_h without floats
    let src_wider = src_width as u64 * target_height as u64 > target_width as u64 * src_height as u64;

    let (width, height) = if src_wider {
        let width = (src_height as f64 * target_width as f64 / target_height as f64).round() as u32;
        (width.clamp(1, src_width), src_height)
    } else {
        let height = (src_width as f64 * target_height as f64 / target_width as f64).round() as u32;
        (src_width, height.clamp(1, src_height))
    };

    ((src_width - width) / 2, (src_height - height) / 2, width, height)
}

/// Fill `target_width`x`target_height` exactly, preserving the aspect ratio
/// and discarding the overflow around the center.
pub fn center_crop(img: DynamicImage, target_width: u32, target_height: u32) -> DynamicImage {
    let (src_width, src_height) = img.dimensions();
    if src_width == 0 || src_height == 0 || target_width == 0 || target_height == 0 {
        tracing::warn!(
            "Cannot crop {}x{} to {}x{}",
            src_width,
            src_height,
            target_width,
            target_height
        );
        return img;
    }

    if (src_width, src_height) == (target_width, target_height) {
        return img;
    }

    let (x, y, width, height) = crop_rect(src_width, src_height, target_width, target_height);

    tracing::debug!(
        "Cropping {}x{} at ({}, {}) from {}x{}, scaling to {}x{}",
        width,
        height,
        x,
        y,
        src_width,
        src_height,
        target_width,
        target_height
    );

    let region = img.crop_imm(x, y, width, height);
    if (width, height) == (target_width, target_height) {
        return region;
    }

    region.resize_exact(target_width, target_height, image::imageops::FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb, RgbImage};

    fn solid(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(ImageBuffer::from_pixel(w, h, Rgb([0, 0, 0])))
    }

    #[test]
    fn landscape_source_fills_portrait_display() {
        let out = center_crop(solid(400, 200), 1080, 1920);
        assert_eq!(out.dimensions(), (1080, 1920));
    }

    #[test]
    fn large_source_is_cropped_then_downscaled() {
        let out = center_crop(solid(4000, 2667), 1080, 1920);
        assert_eq!(out.dimensions(), (1080, 1920));
    }

    #[test]
    fn awkward_ratios_never_come_out_short() {
        for (w, h) in [(333, 777), (1001, 999), (7, 3), (1, 1000)] {
            let out = center_crop(solid(w, h), 720, 1280);
            assert_eq!(out.dimensions(), (720, 1280), "source {}x{}", w, h);
        }
    }

    #[test]
    fn degenerate_source_is_cropped_before_scaling() {
        let out = center_crop(solid(2, 4000), 1080, 1920);
        assert_eq!(out.dimensions(), (1080, 1920));

        // Only a 2x4 region of the source is ever scaled
        assert_eq!(crop_rect(2, 4000, 1080, 1920), (0, 1998, 2, 4));
    }

    #[test]
    fn crop_region_stays_inside_source_and_keeps_target_ratio() {
        for (w, h) in [(333, 777), (1001, 999), (7, 3), (1, 1000), (4000, 2667), (2, 4000)] {
            let (x, y, cw, ch) = crop_rect(w, h, 720, 1280);
            assert!(cw >= 1 && ch >= 1, "source {}x{}", w, h);
            assert!(x + cw <= w && y + ch <= h, "source {}x{}", w, h);
            assert!(cw == w || ch == h, "source {}x{}", w, h);

            let ratio = cw as f64 / ch as f64;
            if cw > 2 && ch > 2 {
                assert!((ratio - 720.0 / 1280.0).abs() < 0.02, "source {}x{}: {}", w, h, ratio);
            }
        }
    }

    #[test]
    fn exact_ratio_source_is_only_scaled() {
        assert_eq!(crop_rect(540, 960, 1080, 1920), (0, 0, 540, 960));
        let out = center_crop(solid(540, 960), 1080, 1920);
        assert_eq!(out.dimensions(), (1080, 1920));
    }

    #[test]
    fn crop_keeps_the_center() {
        // Left third red, middle third green, right third blue
        let mut img = RgbImage::new(300, 100);
        for (x, _, px) in img.enumerate_pixels_mut() {
            *px = match x {
                0..=99 => Rgb([255, 0, 0]),
                100..=199 => Rgb([0, 255, 0]),
                _ => Rgb([0, 0, 255]),
            };
        }

        let out = center_crop(DynamicImage::ImageRgb8(img), 100, 100).to_rgb8();
        assert_eq!(out.dimensions(), (100, 100));
        assert_eq!(out.get_pixel(50, 50), &Rgb([0, 255, 0]));
    }

    #[test]
    fn zero_target_leaves_image_untouched() {
        let out = center_crop(solid(10, 10), 0, 10);
        assert_eq!(out.dimensions(), (10, 10));
    }
}
