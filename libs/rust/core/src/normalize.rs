//! Request payload normalization: tabular feature strings and leaf images.

use image::imageops::FilterType;
use image::DynamicImage;

use crate::error::ServingError;

/// Side length the leaf classifier was trained on.
pub const IMAGE_SIDE: u32 = 128;
pub const IMAGE_CHANNELS: usize = 3;

/// One tabular sample for the crop model. Kept at `f64` so any finite
/// number the caller sends is well-formed; narrowing happens at inference.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector(Vec<f64>);

impl FeatureVector {
    pub fn values(&self) -> &[f64] { &self.0 }
    pub fn len(&self) -> usize { self.0.len() }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

/// Parses a comma-delimited feature string. Width is not checked here;
/// only the loaded model knows how many features it expects.
pub fn parse_features(raw: &str) -> Result<FeatureVector, ServingError> {
    if raw.trim().is_empty() {
        return Err(ServingError::MalformedInput("empty feature string".into()));
    }
    let mut values = Vec::new();
    for (i, token) in raw.split(',').enumerate() {
        let token = token.trim();
        let v: f64 = token
            .parse()
            .map_err(|_| ServingError::MalformedInput(format!("token {i} ({token:?}) is not a number")))?;
        if !v.is_finite() {
            return Err(ServingError::MalformedInput(format!("token {i} ({token:?}) is not finite")));
        }
        values.push(v);
    }
    Ok(FeatureVector(values))
}

/// 128x128x3 image scaled to [0,1], HWC layout.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor(Vec<f32>);

impl ImageTensor {
    pub const SHAPE: [usize; 3] = [IMAGE_SIDE as usize, IMAGE_SIDE as usize, IMAGE_CHANNELS];

    pub fn values(&self) -> &[f32] { &self.0 }

    /// Shape with a leading batch dimension of one.
    pub fn batch_shape(&self) -> [usize; 4] { [1, Self::SHAPE[0], Self::SHAPE[1], Self::SHAPE[2]] }
}

/// Decodes, resizes (no crop) and rescales an encoded leaf photo.
pub fn decode_image(bytes: &[u8]) -> Result<ImageTensor, ServingError> {
    if bytes.is_empty() {
        return Err(ServingError::UndecodableImage("empty payload".into()));
    }
    let img = image::load_from_memory(bytes).map_err(|e| ServingError::UndecodableImage(e.to_string()))?;
    Ok(image_to_tensor(&img))
}

/// Nearest-neighbour resize matches the preprocessing the model was trained with.
pub fn image_to_tensor(img: &DynamicImage) -> ImageTensor {
    let rgb = img.resize_exact(IMAGE_SIDE, IMAGE_SIDE, FilterType::Nearest).to_rgb8();
    let data = rgb.as_raw().iter().map(|&p| p as f32 / 255.0).collect();
    ImageTensor(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn png(width: u32, height: u32, px: [u8; 3]) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(px)));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn parses_numeric_tokens_with_whitespace() {
        let v = parse_features("90, 42,43.5 ,20.87,82.0,6.5,202.9").unwrap();
        assert_eq!(v.len(), 7);
        assert_eq!(v.values()[2], 43.5);
    }

    #[test]
    fn out_of_f32_range_is_still_well_formed() {
        let v = parse_features("1e39,2").unwrap();
        assert_eq!(v.values(), &[1e39, 2.0]);
        assert!(matches!(parse_features("1e309"), Err(ServingError::MalformedInput(_))));
    }

    #[test]
    fn rejects_malformed_strings() {
        for raw in ["", "   ", "1,two,3", "1,,3", "1,2,", "nan", "1,inf"] {
            match parse_features(raw) {
                Err(ServingError::MalformedInput(_)) => {}
                other => panic!("{raw:?} -> {other:?}"),
            }
        }
    }

    #[test]
    fn image_is_resized_and_scaled() {
        let bytes = png(300, 200, [255, 0, 51]);
        let t = decode_image(&bytes).unwrap();
        assert_eq!(t.values().len(), 128 * 128 * 3);
        assert_eq!(t.batch_shape(), [1, 128, 128, 3]);
        // HWC: first pixel's channels are contiguous
        assert_eq!(&t.values()[..3], &[1.0, 0.0, 0.2]);
        assert!(t.values().iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn grayscale_is_expanded_to_three_channels() {
        let img = DynamicImage::ImageLuma8(image::GrayImage::from_pixel(64, 64, image::Luma([128])));
        let t = image_to_tensor(&img);
        assert_eq!(t.values().len(), 128 * 128 * 3);
    }

    #[test]
    fn non_image_bytes_are_undecodable() {
        for bytes in [&b""[..], b"definitely not an image", &[0x89, b'P', b'N', b'G']] {
            assert!(matches!(decode_image(bytes), Err(ServingError::UndecodableImage(_))));
        }
    }
}
