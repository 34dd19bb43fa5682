//! Image preprocessing for the detector and extractor models
//!
//! Handles resizing, cropping, normalization, and tensor conversion. Every
//! step is deterministic so the same pixels always produce the same tensor.

use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb, RgbImage};
use ndarray::{Array3, Array4};

/// Preprocessing constants for the descriptor extractor
#[derive(Debug, Clone)]
pub struct EmbeddingPreprocess {
    /// Shorter side length after the first resize
    pub resize_shorter: u32,
    /// Side of the square center crop fed to the model
    pub crop_size: u32,
    /// Mean values for normalization [R, G, B]
    pub mean: [f32; 3],
    /// Std values for normalization [R, G, B]
    pub std: [f32; 3],
}

impl Default for EmbeddingPreprocess {
    fn default() -> Self {
        Self {
            resize_shorter: 256,
            crop_size: 224,
            // ImageNet statistics the backbone was trained with
            mean: [0.485, 0.456, 0.406],
            std: [0.229, 0.224, 0.225],
        }
    }
}

/// Gray value used to pad letterboxed detector input
pub const LETTERBOX_FILL: u8 = 114;

/// Mapping between letterboxed model space and source pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    /// Source-to-model scale factor
    pub scale: f32,
    /// Horizontal padding in model pixels
    pub pad_x: f32,
    /// Vertical padding in model pixels
    pub pad_y: f32,
}

impl Letterbox {
    /// Convert a point in model space back to source pixel coordinates
    pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Convert an RGB image to an HWC f32 array scaled to [0, 1]
pub fn rgb_to_f32(image: &RgbImage) -> Array3<f32> {
    let (width, height) = image.dimensions();
    let mut rgb = Array3::<f32>::zeros((height as usize, width as usize, 3));

    for (x, y, pixel) in image.enumerate_pixels() {
        for c in 0..3 {
            rgb[[y as usize, x as usize, c]] = pixel.0[c] as f32 / 255.0;
        }
    }

    rgb
}

/// Normalize image with mean and std
pub fn normalize(image: &Array3<f32>, mean: &[f32; 3], std: &[f32; 3]) -> Array3<f32> {
    let (h, w, _) = image.dim();
    let mut normalized = Array3::<f32>::zeros((h, w, 3));

    for y in 0..h {
        for x in 0..w {
            for c in 0..3 {
                normalized[[y, x, c]] = (image[[y, x, c]] - mean[c]) / std[c];
            }
        }
    }

    normalized
}

/// Convert HWC image to NCHW tensor (batch size 1)
pub fn hwc_to_nchw(image: &Array3<f32>) -> Array4<f32> {
    let (h, w, c) = image.dim();
    let mut tensor = Array4::<f32>::zeros((1, c, h, w));

    for y in 0..h {
        for x in 0..w {
            for ch in 0..c {
                tensor[[0, ch, y, x]] = image[[y, x, ch]];
            }
        }
    }

    tensor
}

/// Resize so the shorter side equals `target`, keeping the aspect ratio
pub fn resize_shorter_side(image: &RgbImage, target: u32) -> RgbImage {
    let (w, h) = image.dimensions();

    // Longer side is truncated, matching the usual torchvision behaviour
    let (new_w, new_h) = if w <= h {
        (target, ((target as u64 * h as u64) / w.max(1) as u64) as u32)
    } else {
        (((target as u64 * w as u64) / h.max(1) as u64) as u32, target)
    };

    if (new_w, new_h) == (w, h) {
        return image.clone();
    }

    imageops::resize(image, new_w.max(1), new_h.max(1), FilterType::Triangle)
}

/// Crop a centered `size` x `size` square.
///
/// Images smaller than the crop are padded with black on the short side.
pub fn center_crop(image: &RgbImage, size: u32) -> RgbImage {
    let (w, h) = image.dimensions();

    if w >= size && h >= size {
        // Half-pixel offsets round to even, as torchvision's CenterCrop does
        let left = ((w - size) as f32 / 2.0).round_ties_even() as u32;
        let top = ((h - size) as f32 / 2.0).round_ties_even() as u32;
        return imageops::crop_imm(image, left, top, size, size).to_image();
    }

    let mut canvas = RgbImage::from_pixel(size, size, Rgb([0, 0, 0]));
    let offset_x = (size as i64 - w as i64) / 2;
    let offset_y = (size as i64 - h as i64) / 2;
    imageops::overlay(&mut canvas, image, offset_x, offset_y);
    canvas
}

/// Fit an image into a `size` x `size` square, padding the remainder
pub fn letterbox(image: &RgbImage, size: u32) -> (RgbImage, Letterbox) {
    let (w, h) = image.dimensions();

    let scale = (size as f32 / w as f32).min(size as f32 / h as f32);
    let scaled_w = ((w as f32 * scale).round() as u32).clamp(1, size);
    let scaled_h = ((h as f32 * scale).round() as u32).clamp(1, size);

    let pad_x = (size - scaled_w) / 2;
    let pad_y = (size - scaled_h) / 2;

    let resized = imageops::resize(image, scaled_w, scaled_h, FilterType::Triangle);

    let mut canvas = RgbImage::from_pixel(size, size, Rgb([LETTERBOX_FILL; 3]));
    imageops::overlay(&mut canvas, &resized, pad_x as i64, pad_y as i64);

    (
        canvas,
        Letterbox {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
        },
    )
}

/// Full preprocessing pipeline for the extractor
pub fn preprocess_for_embedding(image: &DynamicImage, config: &EmbeddingPreprocess) -> Array4<f32> {
    // 1. Three-channel color
    let rgb = image.to_rgb8();

    // 2. Shorter side to a fixed length, then a square center crop
    let resized = resize_shorter_side(&rgb, config.resize_shorter);
    let cropped = center_crop(&resized, config.crop_size);

    // 3. Scale to [0, 1] and normalize per channel
    let scaled = rgb_to_f32(&cropped);
    let normalized = normalize(&scaled, &config.mean, &config.std);

    // 4. Convert to NCHW tensor
    hwc_to_nchw(&normalized)
}

/// Full preprocessing pipeline for the detector
pub fn preprocess_for_detection(image: &DynamicImage, input_size: u32) -> (Array4<f32>, Letterbox) {
    let rgb = image.to_rgb8();
    let (boxed, mapping) = letterbox(&rgb, input_size);
    (hwc_to_nchw(&rgb_to_f32(&boxed)), mapping)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 7 % 256) as u8, (y * 5 % 256) as u8, ((x + y) % 256) as u8])
        })
    }

    #[test]
    fn test_rgb_to_f32() {
        let mut image = RgbImage::new(2, 1);
        image.put_pixel(0, 0, Rgb([255, 0, 0]));
        image.put_pixel(1, 0, Rgb([0, 255, 128]));

        let rgb = rgb_to_f32(&image);

        assert_eq!(rgb.dim(), (1, 2, 3));
        assert!((rgb[[0, 0, 0]] - 1.0).abs() < 0.01);
        assert!(rgb[[0, 0, 1]].abs() < 0.01);
        assert!((rgb[[0, 1, 1]] - 1.0).abs() < 0.01);
        assert!((rgb[[0, 1, 2]] - 0.502).abs() < 0.01);
    }

    #[test]
    fn test_hwc_to_nchw() {
        let hwc = Array3::<f32>::from_shape_fn((10, 20, 3), |(h, w, c)| {
            (h * 100 + w * 10 + c) as f32
        });

        let nchw = hwc_to_nchw(&hwc);

        assert_eq!(nchw.dim(), (1, 3, 10, 20));
        assert_eq!(nchw[[0, 1, 5, 10]], hwc[[5, 10, 1]]);
    }

    #[test]
    fn test_normalize() {
        let image = Array3::<f32>::from_elem((2, 2, 3), 0.5);
        let config = EmbeddingPreprocess::default();

        let normalized = normalize(&image, &config.mean, &config.std);

        assert!((normalized[[0, 0, 0]] - (0.5 - 0.485) / 0.229).abs() < 1e-6);
        assert!((normalized[[1, 1, 2]] - (0.5 - 0.406) / 0.225).abs() < 1e-6);
    }

    #[test]
    fn test_resize_shorter_side() {
        let landscape = resize_shorter_side(&gradient(400, 300), 256);
        assert_eq!(landscape.dimensions(), (341, 256));

        let portrait = resize_shorter_side(&gradient(100, 250), 256);
        assert_eq!(portrait.dimensions(), (256, 640));
    }

    #[test]
    fn test_center_crop() {
        let image = gradient(300, 256);
        let cropped = center_crop(&image, 224);

        assert_eq!(cropped.dimensions(), (224, 224));
        // Offsets are (38, 16)
        assert_eq!(cropped.get_pixel(0, 0), image.get_pixel(38, 16));

        // 117 / 2 = 58.5 rounds down to the even 58
        let resized = gradient(341, 256);
        let cropped = center_crop(&resized, 224);
        assert_eq!(cropped.get_pixel(0, 0), resized.get_pixel(58, 16));
        assert_ne!(cropped.get_pixel(0, 0), resized.get_pixel(59, 16));

        let padded = center_crop(&gradient(10, 10), 20);
        assert_eq!(padded.dimensions(), (20, 20));
        assert_eq!(padded.get_pixel(0, 0), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_embedding_preprocess_is_reproducible() {
        let image = DynamicImage::ImageRgb8(gradient(123, 77));
        let config = EmbeddingPreprocess::default();

        let first = preprocess_for_embedding(&image, &config);
        let second = preprocess_for_embedding(&image, &config);

        assert_eq!(first.dim(), (1, 3, 224, 224));
        assert_eq!(first, second);
    }

    #[test]
    fn test_embedding_preprocess_accepts_grayscale() {
        let gray = DynamicImage::ImageLuma8(image::GrayImage::from_pixel(50, 60, image::Luma([90])));
        let tensor = preprocess_for_embedding(&gray, &EmbeddingPreprocess::default());

        assert_eq!(tensor.dim(), (1, 3, 224, 224));
    }

    #[test]
    fn test_letterbox_mapping() {
        let image = gradient(1280, 640);
        let (boxed, mapping) = letterbox(&image, 640);

        assert_eq!(boxed.dimensions(), (640, 640));
        assert!((mapping.scale - 0.5).abs() < 1e-6);
        assert_eq!(mapping.pad_x, 0.0);
        assert_eq!(mapping.pad_y, 160.0);
        assert_eq!(boxed.get_pixel(0, 0), &Rgb([LETTERBOX_FILL; 3]));

        let (x, y) = mapping.to_source(320.0, 320.0);
        assert!((x - 640.0).abs() < 1e-3);
        assert!((y - 320.0).abs() < 1e-3);
    }
}
