use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};

/// A captured colour frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub image: RgbImage,
    /// Capture sequence number reported by the source.
    pub sequence: u32,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u32) -> Self {
        Self { image, sequence }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Luma conversion used as detector input.
    pub fn to_gray(&self) -> GrayImage {
        image::imageops::grayscale(&self.image)
    }
}

/// A rectangular face-like region reported by a detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Detector confidence. Informational only; scoring ignores it.
    pub confidence: f32,
}

impl Region {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            confidence: 1.0,
        }
    }
}

/// Fixed detection parameters, held constant for a whole session so that
/// scores stay comparable between samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionParams {
    /// Image pyramid step between scales. Must be greater than 1.0.
    pub scale_factor: f32,
    /// Minimum number of raw candidates that must group into a region.
    pub min_neighbors: u32,
    /// Minimum region size as (width, height) in pixels.
    pub min_size: (u32, u32),
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            scale_factor: 1.1,
            min_neighbors: 5,
            min_size: (30, 30),
        }
    }
}

impl DetectionParams {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.scale_factor > 1.0) {
            return Err(format!(
                "scale_factor must be greater than 1.0, got {}",
                self.scale_factor
            ));
        }
        if self.min_size.0 == 0 || self.min_size.1 == 0 {
            return Err(format!(
                "min_size must be non-zero, got {}x{}",
                self.min_size.0, self.min_size.1
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params_are_valid() {
        assert!(DetectionParams::default().validate().is_ok());
    }

    #[test]
    fn test_params_reject_unit_scale() {
        let params = DetectionParams {
            scale_factor: 1.0,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_params_reject_nan_scale() {
        let params = DetectionParams {
            scale_factor: f32::NAN,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_params_reject_zero_min_size() {
        let params = DetectionParams {
            min_size: (0, 30),
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_frame_to_gray_preserves_dimensions() {
        let frame = Frame::new(RgbImage::from_pixel(4, 3, image::Rgb([10, 20, 30])), 7);
        let gray = frame.to_gray();
        assert_eq!(gray.dimensions(), (4, 3));
        assert_eq!(frame.sequence, 7);
    }

    #[test]
    fn test_gray_of_white_is_white() {
        let frame = Frame::new(RgbImage::from_pixel(2, 2, image::Rgb([255, 255, 255])), 0);
        assert!(frame.to_gray().pixels().all(|p| p.0[0] == 255));
    }
}
