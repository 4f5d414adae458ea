//! Conversion between encoded images and inference tensors.
//!
//! Tensors are `[batch, channel, height, width]` with RGB channels and
//! values in `[0, 1]`.

use std::io::Cursor;

use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use ndarray::Array4;

use crate::error::{MediaError, MediaResult};

/// Image tensor in `[N, C, H, W]` layout.
pub type Image = Array4<f32>;

/// Height and width of an image tensor.
pub fn spatial_dims(image: &Image) -> (usize, usize) {
    let (_, _, h, w) = image.dim();
    (h, w)
}

/// Decode an encoded image (PNG, JPEG, WebP, ...) into a single-batch RGB tensor.
pub fn decode_image(bytes: &[u8]) -> MediaResult<Image> {
    if bytes.is_empty() {
        return Err(MediaError::decode("empty payload"));
    }

    let decoded = image::load_from_memory(bytes).map_err(|e| MediaError::decode(e.to_string()))?;
    let rgb = decoded.to_rgb8();
    if rgb.width() == 0 || rgb.height() == 0 {
        return Err(MediaError::decode("image has zero width or height"));
    }

    Ok(from_rgb(&rgb))
}

/// Convert an 8-bit RGB buffer into a `[1, 3, H, W]` tensor.
pub fn from_rgb(rgb: &RgbImage) -> Image {
    let (w, h) = rgb.dimensions();
    Array4::from_shape_fn((1, 3, h as usize, w as usize), |(_, c, y, x)| {
        rgb.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
    })
}

/// Convert the first batch entry of a tensor back into 8-bit RGB.
///
/// Values are clamped to `[0, 1]` and rounded.
pub fn to_rgb(image: &Image) -> MediaResult<RgbImage> {
    let (n, c, h, w) = image.dim();
    if n == 0 || c != 3 || h == 0 || w == 0 {
        return Err(MediaError::invalid_image(format!(
            "expected [>=1, 3, H>0, W>0] tensor, got {:?}",
            image.shape()
        )));
    }

    Ok(RgbImage::from_fn(w as u32, h as u32, |x, y| {
        let (x, y) = (x as usize, y as usize);
        Rgb([0, 1, 2].map(|ch| to_u8(image[[0, ch, y, x]])))
    }))
}

/// Encode the first batch entry of a tensor as PNG bytes.
pub fn encode_png(image: &Image) -> MediaResult<Vec<u8>> {
    let rgb = to_rgb(image)?;
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(rgb)
        .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)?;
    Ok(buf)
}

fn to_u8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| Rgb([(x * 7 % 256) as u8, (y * 5 % 256) as u8, 128]))
    }

    fn png_bytes(rgb: &RgbImage) -> Vec<u8> {
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(rgb.clone())
            .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn test_decode_layout_and_range() {
        let rgb = gradient(12, 9);
        let image = decode_image(&png_bytes(&rgb)).unwrap();

        assert_eq!(image.shape(), &[1, 3, 9, 12]);
        assert!(image.iter().all(|v| (0.0..=1.0).contains(v)));
        assert_eq!(image[[0, 0, 2, 3]], 21.0 / 255.0);
        assert_eq!(image[[0, 1, 2, 3]], 10.0 / 255.0);
    }

    #[test]
    fn test_encode_is_lossless_for_8bit_input() {
        let rgb = gradient(17, 5);
        let image = from_rgb(&rgb);
        let encoded = encode_png(&image).unwrap();

        let back = image::load_from_memory(&encoded).unwrap().to_rgb8();
        assert_eq!(back, rgb);
    }

    #[test]
    fn test_encode_clamps_out_of_range() {
        let mut image = Image::zeros((1, 3, 1, 2));
        image[[0, 0, 0, 0]] = 1.7;
        image[[0, 1, 0, 1]] = -0.4;

        let rgb = to_rgb(&image).unwrap();
        assert_eq!(rgb.get_pixel(0, 0)[0], 255);
        assert_eq!(rgb.get_pixel(1, 0)[1], 0);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode_image(b"not an image"), Err(MediaError::Decode(_))));
        assert!(matches!(decode_image(&[]), Err(MediaError::Decode(_))));
    }

    #[test]
    fn test_to_rgb_rejects_wrong_channels() {
        let image = Image::zeros((1, 1, 4, 4));
        assert!(matches!(to_rgb(&image), Err(MediaError::InvalidImage(_))));
    }
}
