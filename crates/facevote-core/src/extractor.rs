//! Face descriptor extraction.
//!
//! A descriptor is the raw colour crop of a detected region, resized to a
//! canonical square and flattened row-major, three values (R, G, B) per
//! pixel. There is no learned embedding:
//! two crops of the same person under slightly different framing or lighting
//! can land far apart, which bounds achievable match accuracy.

use crate::frame::Frame;
use crate::types::{Descriptor, Region};
use image::imageops::{self, FilterType};
use thiserror::Error;

/// Side of the canonical crop, in pixels.
pub const DESCRIPTOR_SIDE: u32 = 50;
const CHANNELS: usize = 3;
/// Values per descriptor at the canonical side.
pub const DESCRIPTOR_LEN: usize = (DESCRIPTOR_SIDE * DESCRIPTOR_SIDE) as usize * CHANNELS;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("region {region:?} lies outside the {width}x{height} frame")]
    EmptyRegion {
        region: Region,
        width: u32,
        height: u32,
    },
}

/// Crop → resize → flatten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureExtractor {
    side: u32,
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self { side: DESCRIPTOR_SIDE }
    }
}

impl FeatureExtractor {
    /// Extractor producing `side * side * 3` values. `side` is at least 1.
    pub fn with_side(side: u32) -> Self {
        Self { side: side.max(1) }
    }

    pub fn descriptor_len(&self) -> usize {
        (self.side * self.side) as usize * CHANNELS
    }

    /// Extract the descriptor of `region`, clamped to the frame.
    pub fn extract(&self, frame: &Frame, region: &Region) -> Result<Descriptor, ExtractError> {
        let crop = frame.crop(region).ok_or(ExtractError::EmptyRegion {
            region: *region,
            width: frame.width(),
            height: frame.height(),
        })?;

        // Bilinear, matching the usual capture-side resize.
        let resized = imageops::resize(&crop, self.side, self.side, FilterType::Triangle);

        Ok(Descriptor {
            values: resized.into_raw().into_iter().map(f32::from).collect(),
        })
    }
}
