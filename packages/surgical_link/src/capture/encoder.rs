use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::RgbImage;
use image::codecs::jpeg::JpegEncoder;

use crate::error::ClientError;

/// Prefix every frame payload must carry.
pub const JPEG_DATA_URL_PREFIX: &str = "data:image/jpeg;base64,";

/// Turns a raster into the string payload sent as `frame_data`.
pub trait FrameEncoder: Send {
    fn encode(&self, image: &RgbImage) -> Result<String, ClientError>;
}

/// JPEG at a fixed quality, wrapped in a base64 data URL.
#[derive(Debug, Clone, Copy)]
pub struct JpegDataUrlEncoder {
    quality: u8,
}

impl JpegDataUrlEncoder {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }
}

impl Default for JpegDataUrlEncoder {
    fn default() -> Self {
        Self::new(80)
    }
}

impl FrameEncoder for JpegDataUrlEncoder {
    fn encode(&self, image: &RgbImage) -> Result<String, ClientError> {
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, self.quality).encode_image(image)?;
        Ok(format!("{}{}", JPEG_DATA_URL_PREFIX, STANDARD.encode(&jpeg)))
    }
}

/// A payload is usable only if it is a non-empty JPEG data URL.
pub fn is_valid_data_url(data_url: &str) -> bool {
    data_url.len() > JPEG_DATA_URL_PREFIX.len() && data_url.starts_with(JPEG_DATA_URL_PREFIX)
}

/// Decode a JPEG data URL back to raw JPEG bytes.
pub fn decode_data_url(data_url: &str) -> Result<Vec<u8>, ClientError> {
    let payload = data_url
        .strip_prefix(JPEG_DATA_URL_PREFIX)
        .ok_or_else(|| ClientError::Encode("not a JPEG data URL".to_string()))?;
    STANDARD
        .decode(payload)
        .map_err(|e| ClientError::Encode(e.to_string()))
}
