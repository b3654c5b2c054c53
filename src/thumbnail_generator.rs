use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use std::io::Cursor;

/// Thumbnail sizes, measured on the short edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbnailSize {
    Small,
    Medium,
}

impl ThumbnailSize {
    pub fn short_edge(&self) -> u32 {
        match self {
            ThumbnailSize::Small => 400,
            ThumbnailSize::Medium => 800,
        }
    }

    pub fn suffix(&self) -> &'static str {
        match self {
            ThumbnailSize::Small => "sm",
            ThumbnailSize::Medium => "md",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ThumbnailGenerator {
    quality: u8,
}

impl ThumbnailGenerator {
    pub fn new(quality: u8) -> Self {
        Self { quality }
    }

    /// Produces a JPEG thumbnail whose short edge is at most the target
    /// size. Images already smaller than the target are re-encoded
    /// without resizing.
    pub fn generate(
        &self,
        img: &DynamicImage,
        size: ThumbnailSize,
    ) -> Result<Vec<u8>, image::ImageError> {
        let target = size.short_edge();
        let (width, height) = (img.width(), img.height());
        let short_edge = width.min(height);

        let resized = if short_edge > target {
            let ratio = target as f64 / short_edge as f64;
            let new_width = (width as f64 * ratio).round().max(1.0) as u32;
            let new_height = (height as f64 * ratio).round().max(1.0) as u32;
            img.resize_exact(new_width, new_height, FilterType::Lanczos3)
        } else {
            img.clone()
        };

        self.encode_jpeg(&resized)
    }

    fn encode_jpeg(&self, img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
        // JPEG has no alpha; flatten to RGB before encoding.
        let rgb = img.to_rgb8();
        let mut buffer = Cursor::new(Vec::new());
        let encoder = JpegEncoder::new_with_quality(&mut buffer, self.quality);
        rgb.write_with_encoder(encoder)?;
        Ok(buffer.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_image(width: u32, height: u32) -> DynamicImage {
        DynamicImage::new_rgb8(width, height)
    }

    #[test]
    fn landscape_is_bounded_by_height() {
        let gen = ThumbnailGenerator::new(85);
        let data = gen
            .generate(&test_image(1920, 1080), ThumbnailSize::Small)
            .unwrap();

        let thumb = image::load_from_memory(&data).unwrap();
        assert_eq!(thumb.height(), 400);
        assert_eq!(thumb.width(), 711);
    }

    #[test]
    fn portrait_is_bounded_by_width() {
        let gen = ThumbnailGenerator::new(85);
        let data = gen
            .generate(&test_image(1080, 1920), ThumbnailSize::Medium)
            .unwrap();

        let thumb = image::load_from_memory(&data).unwrap();
        assert_eq!(thumb.width(), 800);
        assert_eq!(thumb.height(), 1422);
    }

    #[test]
    fn small_images_are_not_upscaled() {
        let gen = ThumbnailGenerator::new(85);
        let data = gen
            .generate(&test_image(320, 200), ThumbnailSize::Small)
            .unwrap();

        let thumb = image::load_from_memory(&data).unwrap();
        assert_eq!((thumb.width(), thumb.height()), (320, 200));
    }

    #[test]
    fn output_is_jpeg() {
        let gen = ThumbnailGenerator::new(85);
        let data = gen
            .generate(&test_image(800, 600), ThumbnailSize::Small)
            .unwrap();
        assert_eq!(
            image::guess_format(&data).unwrap(),
            image::ImageFormat::Jpeg
        );
    }

    #[test]
    fn rgba_input_is_flattened() {
        let gen = ThumbnailGenerator::new(85);
        let rgba = DynamicImage::new_rgba8(600, 500);
        let data = gen.generate(&rgba, ThumbnailSize::Small).unwrap();
        assert!(!data.is_empty());
    }
}
