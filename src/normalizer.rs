use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use image::{imageops::FilterType, DynamicImage, RgbImage};
use ndarray::{Array4, ArrayView4};
use std::io::Cursor;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Invalid base64 image data: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
    #[error("Unable to read image: {0}")]
    UnreadableImage(#[from] image::ImageError),
    #[error("Unable to guess image format: {0}")]
    UnknownFormat(#[from] std::io::Error),
}

/// Image input accepted by the pipeline.
#[derive(Debug, Clone)]
pub enum RawImage {
    Bytes(Bytes),
    /// Plain base64 or a `data:<mime>;base64,` URL.
    Base64(String),
    Decoded(DynamicImage),
}

impl From<Vec<u8>> for RawImage {
    fn from(data: Vec<u8>) -> Self {
        RawImage::Bytes(Bytes::from(data))
    }
}

impl From<DynamicImage> for RawImage {
    fn from(image: DynamicImage) -> Self {
        RawImage::Decoded(image)
    }
}

/// Batch of one NHWC image, channels in RGB order, values in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor(Array4<f32>);

impl ImageTensor {
    pub fn zeros(size: u32) -> Self {
        let size = size as usize;
        ImageTensor(Array4::zeros((1, size, size, 3)))
    }

    pub fn shape(&self) -> &[usize] {
        self.0.shape()
    }

    pub fn view(&self) -> ArrayView4<'_, f32> {
        self.0.view()
    }

    pub fn into_inner(self) -> Array4<f32> {
        self.0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ImageNormalizer {
    input_size: u32,
}

impl Default for ImageNormalizer {
    fn default() -> Self {
        Self::new(224)
    }
}

impl ImageNormalizer {
    pub fn new(input_size: u32) -> Self {
        Self { input_size }
    }

    pub fn input_size(&self) -> u32 {
        self.input_size
    }

    pub fn normalize(&self, raw: RawImage) -> Result<ImageTensor, DecodeError> {
        let image = decode(raw)?;
        Ok(self.to_tensor(&image))
    }

    fn to_tensor(&self, image: &DynamicImage) -> ImageTensor {
        let size = self.input_size;
        let mut rgb: RgbImage = image.to_rgb8();
        if rgb.dimensions() != (size, size) {
            rgb = image::imageops::resize(&rgb, size, size, FilterType::CatmullRom);
        }

        let side = size as usize;
        let input = Array4::from_shape_fn((1, side, side, 3), |(_, y, x, c)| {
            rgb.get_pixel(x as u32, y as u32)[c] as f32 / 255.
        });

        ImageTensor(input)
    }
}

fn decode(raw: RawImage) -> Result<DynamicImage, DecodeError> {
    match raw {
        RawImage::Decoded(image) => Ok(image),
        RawImage::Bytes(data) => decode_bytes(&data),
        RawImage::Base64(encoded) => {
            // MIME encoders wrap the payload at 76 columns.
            let payload: String = strip_data_url(&encoded)
                .chars()
                .filter(|c| !c.is_ascii_whitespace())
                .collect();
            let data = STANDARD.decode(payload)?;
            decode_bytes(&data)
        }
    }
}

fn decode_bytes(data: &[u8]) -> Result<DynamicImage, DecodeError> {
    let image = image::ImageReader::new(Cursor::new(data))
        .with_guessed_format()?
        .decode()?;
    Ok(image)
}

fn strip_data_url(encoded: &str) -> &str {
    let encoded = encoded.trim();
    match encoded.strip_prefix("data:") {
        Some(rest) => rest
            .split_once(";base64,")
            .map(|(_, payload)| payload)
            .unwrap_or(rest),
        None => encoded,
    }
}
