//! Colour frame type, luma conversion and region cropping.
//!
//! Detection runs on the luma plane; descriptors are cut from the colour
//! pixels.

use crate::types::Region;
use image::{imageops, DynamicImage, GrayImage, Rgb, RgbImage};

/// A captured frame: 8-bit RGB, row-major.
#[derive(Debug, Clone)]
pub struct Frame {
    image: RgbImage,
}

impl Frame {
    /// Wrap interleaved RGB bytes, three per pixel.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self, FrameError> {
        check_len(&data, width, height, 3)?;
        RgbImage::from_raw(width, height, data)
            .map(|image| Self { image })
            .ok_or(FrameError::EmptyFrame { width, height })
    }

    /// Build a frame from single-channel intensities; every pixel becomes
    /// a neutral grey.
    pub fn from_luma(data: Vec<u8>, width: u32, height: u32) -> Result<Self, FrameError> {
        check_len(&data, width, height, 1)?;
        let gray = GrayImage::from_raw(width, height, data)
            .ok_or(FrameError::EmptyFrame { width, height })?;
        Ok(Self {
            image: DynamicImage::ImageLuma8(gray).to_rgb8(),
        })
    }

    /// A frame where every pixel has the same grey intensity.
    pub fn filled(width: u32, height: u32, value: u8) -> Result<Self, FrameError> {
        Self::filled_rgb(width, height, [value; 3])
    }

    pub fn filled_rgb(width: u32, height: u32, rgb: [u8; 3]) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::EmptyFrame { width, height });
        }
        Ok(Self {
            image: RgbImage::from_pixel(width, height, Rgb(rgb)),
        })
    }

    /// Convert any decoded image to an RGB frame.
    pub fn from_image(image: &DynamicImage) -> Result<Self, FrameError> {
        let (width, height) = (image.width(), image.height());
        if width == 0 || height == 0 {
            return Err(FrameError::EmptyFrame { width, height });
        }
        Ok(Self {
            image: image.to_rgb8(),
        })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn as_rgb(&self) -> &RgbImage {
        &self.image
    }

    /// Luma plane, the detector's input.
    pub fn luma(&self) -> GrayImage {
        imageops::grayscale(&self.image)
    }

    /// Copy out `region`, clamped to the frame bounds.
    ///
    /// Returns `None` when the clamped region has no pixels.
    pub fn crop(&self, region: &Region) -> Option<RgbImage> {
        let x0 = region.x.min(self.width());
        let y0 = region.y.min(self.height());
        let x1 = region.right().min(self.width());
        let y1 = region.bottom().min(self.height());
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(imageops::crop_imm(&self.image, x0, y0, x1 - x0, y1 - y0).to_image())
    }
}

fn check_len(data: &[u8], width: u32, height: u32, channels: usize) -> Result<(), FrameError> {
    if width == 0 || height == 0 {
        return Err(FrameError::EmptyFrame { width, height });
    }
    let expected = width as usize * height as usize * channels;
    if data.len() != expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("frame has no pixels ({width}x{height})")]
    EmptyFrame { width: u32, height: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_rejects_wrong_length() {
        // 4x4 RGB needs 48 bytes.
        assert!(matches!(
            Frame::new(vec![0u8; 16], 4, 4),
            Err(FrameError::InvalidLength { expected: 48, actual: 16 })
        ));
        assert!(matches!(
            Frame::from_luma(vec![0u8; 10], 4, 4),
            Err(FrameError::InvalidLength { expected: 16, actual: 10 })
        ));
    }

    #[test]
    fn test_frame_rejects_zero_size() {
        assert!(matches!(
            Frame::new(Vec::new(), 0, 5),
            Err(FrameError::EmptyFrame { .. })
        ));
        assert!(Frame::filled(3, 0, 1).is_err());
    }

    #[test]
    fn test_from_image_keeps_colour() {
        let rgb = RgbImage::from_pixel(3, 2, Rgb([255, 0, 10]));
        let frame = Frame::from_image(&DynamicImage::ImageRgb8(rgb)).unwrap();
        assert_eq!((frame.width(), frame.height()), (3, 2));
        assert!(frame.as_rgb().pixels().all(|p| p.0 == [255, 0, 10]));
    }

    #[test]
    fn test_grey_frame_luma_is_identity() {
        let data: Vec<u8> = (0..12).map(|i| i * 20).collect();
        let frame = Frame::from_luma(data.clone(), 4, 3).unwrap();
        assert_eq!(frame.luma().into_raw(), data);
    }

    #[test]
    fn test_luma_weights_channels() {
        let red = Frame::filled_rgb(2, 2, [255, 0, 0]).unwrap().luma();
        let green = Frame::filled_rgb(2, 2, [0, 255, 0]).unwrap().luma();
        assert!(green.get_pixel(0, 0).0[0] > red.get_pixel(0, 0).0[0]);
    }

    #[test]
    fn test_crop_inside() {
        let data: Vec<u8> = (0..16).collect();
        let frame = Frame::from_luma(data, 4, 4).unwrap();
        let crop = frame.crop(&Region::new(1, 1, 2, 2)).unwrap();
        assert_eq!(crop.dimensions(), (2, 2));
        let reds: Vec<u8> = crop.pixels().map(|p| p.0[0]).collect();
        assert_eq!(reds, vec![5, 6, 9, 10]);
    }

    #[test]
    fn test_crop_clamps_to_bounds() {
        let frame = Frame::filled(10, 10, 7).unwrap();
        let crop = frame.crop(&Region::new(8, 8, 5, 5)).unwrap();
        assert_eq!(crop.dimensions(), (2, 2));
    }

    #[test]
    fn test_crop_outside_is_none() {
        let frame = Frame::filled(10, 10, 7).unwrap();
        assert!(frame.crop(&Region::new(10, 0, 5, 5)).is_none());
        assert!(frame.crop(&Region::new(0, 0, 0, 5)).is_none());
    }
}
