//! Image payloads carried in their container format.

use crate::error::ProtocolError;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;

/// An image together with the container format it travels in.
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePayload {
    pub image: DynamicImage,
    pub format: ImageFormat,
}

impl ImagePayload {
    /// Wraps an image for the default container, uncompressed TIFF.
    pub fn new(image: DynamicImage) -> Self {
        Self {
            image,
            format: ImageFormat::Tiff,
        }
    }

    pub fn with_format(mut self, format: ImageFormat) -> Self {
        self.format = format;
        self
    }

    /// Encodes into the container format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = Vec::new();
        self.image.write_to(&mut Cursor::new(&mut buf), self.format)?;
        Ok(buf)
    }

    /// Decodes a container, guessing its format from the leading bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let format = image::guess_format(bytes)?;
        let image = image::load_from_memory_with_format(bytes, format)?;
        Ok(Self { image, format })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

impl From<DynamicImage> for ImagePayload {
    fn from(image: DynamicImage) -> Self {
        ImagePayload::new(image)
    }
}
