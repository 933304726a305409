use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, ImageFormat, RgbaImage};
use std::io::Cursor;

/// Grayscale rendering of an RGBA capture, as fed to the second detector pass
pub fn grayscale(image: &RgbaImage) -> DynamicImage {
    DynamicImage::ImageLuma8(image::imageops::grayscale(image))
}

/// Decode an uploaded image into RGBA8 on a blocking thread
pub async fn decode_rgba_async(bytes: Vec<u8>) -> Result<RgbaImage> {
    tokio::task::spawn_blocking(move || {
        let img = image::load_from_memory(&bytes).context("Failed to decode image")?;
        Ok(img.to_rgba8())
    })
    .await
    .context("Failed to spawn blocking task for image decoding")?
}

pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut png_bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png_bytes), ImageFormat::Png)
        .context("Failed to encode image as PNG")?;
    Ok(png_bytes)
}

/// PNG-encode on a blocking thread
pub async fn encode_png_async(image: RgbaImage) -> Result<Vec<u8>> {
    tokio::task::spawn_blocking(move || encode_png(&image))
        .await
        .context("Failed to spawn blocking task for PNG encoding")?
}

pub fn png_data_url(png_bytes: &[u8]) -> String {
    format!("data:image/png;base64,{}", STANDARD.encode(png_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_grayscale_keeps_dimensions() {
        let img = RgbaImage::from_pixel(7, 3, Rgba([255, 0, 0, 255]));
        let gray = grayscale(&img);
        assert_eq!((gray.width(), gray.height()), (7, 3));
        let luma = gray.to_luma8();
        assert!(luma.get_pixel(0, 0)[0] > 0 && luma.get_pixel(0, 0)[0] < 255);
    }

    #[tokio::test]
    async fn test_png_round_trip_async() {
        let img = RgbaImage::from_pixel(4, 4, Rgba([10, 20, 30, 255]));
        let png = encode_png_async(img.clone()).await.unwrap();
        let decoded = decode_rgba_async(png).await.unwrap();
        assert_eq!(decoded, img);
    }

    #[tokio::test]
    async fn test_decode_rejects_garbage() {
        assert!(decode_rgba_async(b"not an image".to_vec()).await.is_err());
    }

    #[test]
    fn test_data_url_prefix() {
        assert!(png_data_url(&[1, 2, 3]).starts_with("data:image/png;base64,AQID"));
    }
}
