//! Image preprocessing for the CLIP vision encoder.
//!
//! CLIP ViT-B/32 expects:
//! - Input size: 224×224 pixels
//! - Normalization: per-channel `(pixel/255 - mean) / std` with the OpenAI
//!   CLIP statistics
//! - Channel order: RGB
//! - Tensor layout: NCHW [batch, channels, height, width]

use image::DynamicImage;
use ndarray::Array4;

/// Number of color channels (RGB).
const CHANNELS: usize = 3;

/// Per-channel normalization statistics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalization {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Normalization {
    /// OpenAI CLIP training statistics.
    pub const CLIP: Normalization = Normalization {
        mean: [0.481_454_66, 0.457_827_5, 0.408_210_73],
        std: [0.268_629_55, 0.261_302_6, 0.275_777_1],
    };
}

/// Preprocess an image for vision-encoder inference.
///
/// Resizes to `image_size × image_size`, converts to RGB, normalizes per
/// channel, and returns an NCHW tensor suitable for ONNX Runtime.
pub fn preprocess(image: &DynamicImage, image_size: u32, norm: Normalization) -> Array4<f32> {
    let resized = image.resize_exact(
        image_size,
        image_size,
        image::imageops::FilterType::CatmullRom,
    );
    let rgb = resized.to_rgb8();

    let size = image_size as usize;
    let plane = size * size;
    let mut data = vec![0.0f32; CHANNELS * plane];

    // Write straight into the flat NCHW buffer; offset = c * plane + y * size + x
    for (i, pixel) in rgb.as_raw().chunks_exact(3).enumerate() {
        for (c, &val) in pixel.iter().enumerate() {
            data[c * plane + i] = (val as f32 / 255.0 - norm.mean[c]) / norm.std[c];
        }
    }

    // The buffer length always matches the shape, so this cannot fail.
    Array4::from_shape_vec((1, CHANNELS, size, size), data)
        .unwrap_or_else(|_| Array4::zeros((1, CHANNELS, size, size)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgb, RgbImage};

    #[test]
    fn test_preprocess_shape_224() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(640, 480));
        let tensor = preprocess(&img, 224, Normalization::CLIP);
        assert_eq!(tensor.shape(), &[1, 3, 224, 224]);
    }

    #[test]
    fn test_preprocess_clip_channel_stats() {
        // A pixel equal to the channel mean maps to zero.
        let mean_rgb = [123u8, 117, 104];
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb(mean_rgb)));
        let tensor = preprocess(&img, 4, Normalization::CLIP);
        for c in 0..3 {
            assert!(tensor[[0, c, 1, 1]].abs() < 0.02, "channel {c}");
        }
    }

    #[test]
    fn test_preprocess_white_hits_channel_maximum() {
        let white = DynamicImage::ImageRgb8(RgbImage::from_pixel(10, 10, Rgb([255, 255, 255])));
        let tensor = preprocess(&white, 8, Normalization::CLIP);
        for c in 0..3 {
            let expected = (1.0 - Normalization::CLIP.mean[c]) / Normalization::CLIP.std[c];
            assert!((tensor[[0, c, 3, 3]] - expected).abs() < 1e-3, "channel {c}");
        }
    }
}
