//! Image decode/encode plus the remote-reference fetch path.

use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use url::Url;

use crate::predict::http::{HttpClient, NetworkError};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("unsupported or malformed image data: {0}")]
    Decode(String),
    #[error("failed to encode image: {0}")]
    Encode(String),
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error(transparent)]
    Decode(#[from] CodecError),
}

/// Decodes an uploaded byte buffer, normalizing to RGB. Alpha channels and
/// palette formats are flattened by the conversion.
pub fn decode(bytes: &[u8]) -> Result<DynamicImage, CodecError> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| CodecError::Decode(e.to_string()))?;
    let image = reader
        .decode()
        .map_err(|e| CodecError::Decode(e.to_string()))?;
    Ok(DynamicImage::ImageRgb8(image.to_rgb8()))
}

/// Lossless PNG encoding; prepares the explain-stage input and UI panels.
pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, CodecError> {
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, ImageFormat::Png)
        .map_err(|e| CodecError::Encode(e.to_string()))?;
    Ok(buffer.into_inner())
}

/// Retrieves a remote image reference and decodes it. Single attempt, no
/// retry; a failed fetch aborts the caller's run.
pub async fn fetch_and_decode<H: HttpClient>(
    http: &H,
    url: &str,
) -> Result<DynamicImage, FetchError> {
    let parsed = Url::parse(url).map_err(|_| NetworkError::InvalidUrl(url.to_string()))?;
    let bytes = http.get(parsed.as_str()).await?;
    Ok(decode(&bytes)?)
}

/// Proportional scale to the target height, Catmull-Rom filtered.
/// Display-only: never feeds a model input.
pub fn resize_for_display(image: &DynamicImage, target_height: u32) -> DynamicImage {
    let (width, height) = (image.width(), image.height());
    if height == 0 || height == target_height {
        return image.clone();
    }
    let scale = f64::from(target_height) / f64::from(height);
    let target_width = (f64::from(width) * scale).round().max(1.0) as u32;
    image.resize_exact(target_width, target_height, FilterType::CatmullRom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predict::http::tests::MockHttp;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};

    fn gradient() -> DynamicImage {
        let mut img = RgbImage::new(8, 6);
        for (x, y, pixel) in img.enumerate_pixels_mut() {
            *pixel = Rgb([(x * 30) as u8, (y * 40) as u8, 200]);
        }
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn png_round_trip_preserves_pixels_and_color_mode() {
        let original = gradient();
        let encoded = encode_png(&original).unwrap();
        let decoded = decode(&encoded).unwrap();
        assert!(matches!(decoded, DynamicImage::ImageRgb8(_)));
        assert_eq!(decoded.to_rgb8().into_raw(), original.to_rgb8().into_raw());
    }

    #[test]
    fn decode_normalizes_alpha_to_rgb() {
        let rgba = RgbaImage::from_pixel(4, 4, Rgba([10, 20, 30, 128]));
        let mut buffer = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(rgba)
            .write_to(&mut buffer, ImageFormat::Png)
            .unwrap();

        let decoded = decode(&buffer.into_inner()).unwrap();
        assert!(matches!(decoded, DynamicImage::ImageRgb8(_)));
        assert_eq!(decoded.to_rgb8().get_pixel(0, 0), &Rgb([10, 20, 30]));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            decode(b"definitely not an image"),
            Err(CodecError::Decode(_))
        ));
    }

    #[test]
    fn resize_preserves_aspect_ratio() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(100, 200));
        let shown = resize_for_display(&image, 350);
        assert_eq!((shown.width(), shown.height()), (175, 350));

        let down = resize_for_display(&DynamicImage::ImageRgb8(RgbImage::new(64, 64)), 32);
        assert_eq!((down.width(), down.height()), (32, 32));
    }

    #[test]
    fn resize_at_target_height_is_identity() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(40, 350));
        let shown = resize_for_display(&image, 350);
        assert_eq!((shown.width(), shown.height()), (40, 350));
    }

    #[tokio::test]
    async fn fetch_and_decode_round_trips_through_http() {
        let http = MockHttp::new();
        http.enqueue("https://img.test/region.png", Ok(encode_png(&gradient()).unwrap()));

        let fetched = fetch_and_decode(&http, "https://img.test/region.png")
            .await
            .unwrap();
        assert_eq!((fetched.width(), fetched.height()), (8, 6));
    }

    #[tokio::test]
    async fn fetch_rejects_invalid_reference() {
        let http = MockHttp::new();
        let err = fetch_and_decode(&http, "not a url").await.unwrap_err();
        assert!(matches!(
            err,
            FetchError::Network(NetworkError::InvalidUrl(_))
        ));
        assert!(http.request_log().is_empty());
    }

    #[tokio::test]
    async fn fetch_of_non_image_bytes_is_a_decode_error() {
        let http = MockHttp::new();
        http.enqueue("https://img.test/region.png", Ok(b"<html>500</html>".to_vec()));

        let err = fetch_and_decode(&http, "https://img.test/region.png")
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)));
    }
}
