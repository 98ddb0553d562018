use std::path::Path;

use image::RgbImage;
use image::imageops::FilterType;

use crate::error::ClientError;

/// How much media data a source has buffered, mirroring HTML media ready
/// states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadyState {
    HaveNothing,
    HaveMetadata,
    HaveCurrentData,
    HaveFutureData,
    HaveEnoughData,
}

/// Anything that can show a current video frame.
pub trait MediaSource: Send {
    /// Whether a playable source is assigned.
    fn has_source(&self) -> bool;

    fn ready_state(&self) -> ReadyState;

    /// Intrinsic frame size; `(0, 0)` before metadata is known.
    fn intrinsic_size(&self) -> (u32, u32);

    /// Draw the current frame at the given size.
    fn render_frame(&mut self, width: u32, height: u32) -> Result<RgbImage, ClientError>;
}

/// A fixed still image standing in for a paused video.
#[derive(Debug, Clone)]
pub struct StillImageSource {
    image: RgbImage,
}

impl StillImageSource {
    pub fn new(image: RgbImage) -> Self {
        Self { image }
    }

    pub fn open(path: &Path) -> Result<Self, ClientError> {
        let image = image::open(path)
            .map_err(|e| ClientError::Capture(format!("{}: {}", path.display(), e)))?
            .to_rgb8();
        Ok(Self::new(image))
    }
}

impl MediaSource for StillImageSource {
    fn has_source(&self) -> bool {
        true
    }

    fn ready_state(&self) -> ReadyState {
        ReadyState::HaveEnoughData
    }

    fn intrinsic_size(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    fn render_frame(&mut self, width: u32, height: u32) -> Result<RgbImage, ClientError> {
        if (width, height) == self.image.dimensions() {
            return Ok(self.image.clone());
        }
        Ok(image::imageops::resize(
            &self.image,
            width,
            height,
            FilterType::Triangle,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_ready_state_ordering() {
        assert!(ReadyState::HaveMetadata < ReadyState::HaveCurrentData);
        assert!(ReadyState::HaveEnoughData >= ReadyState::HaveCurrentData);
    }

    #[test]
    fn test_still_image_renders_at_size() {
        let mut src = StillImageSource::new(RgbImage::from_pixel(40, 20, Rgb([1, 2, 3])));
        assert_eq!(src.intrinsic_size(), (40, 20));
        assert_eq!(src.render_frame(40, 20).unwrap().dimensions(), (40, 20));
        assert_eq!(src.render_frame(20, 10).unwrap().dimensions(), (20, 10));
    }

    #[test]
    fn test_open_missing_file_is_capture_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = StillImageSource::open(&tmp.path().join("missing.png")).unwrap_err();
        assert!(matches!(err, ClientError::Capture(_)));
    }

    #[test]
    fn test_open_png() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("frame.png");
        RgbImage::from_pixel(16, 9, Rgb([9, 9, 9])).save(&path).unwrap();
        let src = StillImageSource::open(&path).unwrap();
        assert_eq!(src.intrinsic_size(), (16, 9));
    }
}
