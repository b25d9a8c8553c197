use crate::utils::error::{Result, ServeError};
use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};
use ndarray::Array2;

/// Side length of the square model input.
pub const IMAGE_SIZE: usize = 28;

/// A single-channel `IMAGE_SIZE x IMAGE_SIZE` image scaled to `[0, 1]`, row-major.
pub type InputTensor = Array2<f32>;

/// Decode `bytes` and turn them into the model input.
///
/// `filename` is only used to label decode errors.
pub fn image_to_tensor(filename: &str, bytes: &[u8]) -> Result<InputTensor> {
    let image = image::load_from_memory(bytes).map_err(|source| ServeError::ImageDecode {
        filename: filename.to_string(),
        source,
    })?;

    let gray = to_luma(&image.to_rgb8());
    let resized = imageops::resize(&gray, IMAGE_SIZE as u32, IMAGE_SIZE as u32, FilterType::Triangle);

    Ok(Array2::from_shape_fn((IMAGE_SIZE, IMAGE_SIZE), |(y, x)| {
        f32::from(resized.get_pixel(x as u32, y as u32)[0]) / 255.0
    }))
}

/// ITU-R 601-2 luma in 16-bit fixed point, rounded.
/// Gray inputs come back unchanged.
fn to_luma(rgb: &image::RgbImage) -> GrayImage {
    let mut gray = GrayImage::new(rgb.width(), rgb.height());
    for (x, y, pixel) in rgb.enumerate_pixels() {
        let [r, g, b] = pixel.0;
        let l = (u32::from(r) * 19595 + u32::from(g) * 38470 + u32::from(b) * 7471 + 0x8000) >> 16;
        gray.put_pixel(x, y, Luma([l as u8]));
    }
    gray
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn encode(image: image::DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        image.write_to(&mut buffer, format).unwrap();
        buffer.into_inner()
    }

    #[test]
    fn test_png_is_resized_and_normalized() {
        let image = GrayImage::from_fn(56, 42, |x, _| Luma([if x < 28 { 0 } else { 255 }]));
        let bytes = encode(image::DynamicImage::ImageLuma8(image), ImageFormat::Png);

        let tensor = image_to_tensor("half.png", &bytes).unwrap();

        assert_eq!(tensor.shape(), &[IMAGE_SIZE, IMAGE_SIZE]);
        assert!(tensor.iter().all(|v| (0.0..=1.0).contains(v)));
        assert!(tensor[[10, 0]] < 0.01);
        assert!(tensor[[10, IMAGE_SIZE - 1]] > 0.99);
    }

    #[test]
    fn test_rgb_jpeg_is_converted_to_grayscale() {
        let image = RgbImage::from_pixel(28, 28, Rgb([200, 200, 200]));
        let bytes = encode(image::DynamicImage::ImageRgb8(image), ImageFormat::Jpeg);

        let tensor = image_to_tensor("gray.jpg", &bytes).unwrap();

        let expected = 200.0 / 255.0;
        assert!(tensor.iter().all(|v| (v - expected).abs() < 0.05));
    }

    #[test]
    fn test_luma_weights() {
        let rgb = RgbImage::from_fn(3, 1, |x, _| match x {
            0 => Rgb([255, 0, 0]),
            1 => Rgb([0, 255, 0]),
            _ => Rgb([77, 77, 77]),
        });
        let gray = to_luma(&rgb);
        assert_eq!(gray.get_pixel(0, 0)[0], 76);
        assert_eq!(gray.get_pixel(1, 0)[0], 150);
        assert_eq!(gray.get_pixel(2, 0)[0], 77);
    }

    #[test]
    fn test_garbage_bytes_fail_with_filename() {
        let err = image_to_tensor("broken.png", b"definitely not a png").unwrap_err();
        match err {
            ServeError::ImageDecode { filename, .. } => assert_eq!(filename, "broken.png"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
