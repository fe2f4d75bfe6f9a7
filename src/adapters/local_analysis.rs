//! In-process image analysis
//!
//! Needs no network and no credentials, which makes it the usual last resort
//! for the image capability. It identifies the container format from magic
//! bytes, reads the pixel dimensions from the header, and fingerprints the
//! content with BLAKE3 for duplicate matching. It cannot judge content, so
//! `explicit_content` is always `false`.

use super::{AdapterError, ImageAnalysisAdapter};
use crate::types::{AnalysisOptions, ImageAnalysis, Label};
use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct LocalAnalysisConfig {
    /// Attach a BLAKE3 fingerprint to every result
    #[serde(default = "default_true")]
    pub fingerprint: bool,
}

impl Default for LocalAnalysisConfig {
    fn default() -> Self {
        Self { fingerprint: true }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    Webp,
    Bmp,
}

impl ImageFormat {
    /// Identify the container from its leading bytes
    pub fn detect(data: &[u8]) -> Option<Self> {
        if data.starts_with(b"\x89PNG\r\n\x1a\n") {
            Some(ImageFormat::Png)
        } else if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(ImageFormat::Jpeg)
        } else if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
            Some(ImageFormat::Gif)
        } else if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
            Some(ImageFormat::Webp)
        } else if data.starts_with(b"BM") {
            Some(ImageFormat::Bmp)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Gif => "gif",
            ImageFormat::Webp => "webp",
            ImageFormat::Bmp => "bmp",
        }
    }
}

fn be_u16(data: &[u8], at: usize) -> Option<u32> {
    data.get(at..at + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]) as u32)
}

fn le_u16(data: &[u8], at: usize) -> Option<u32> {
    data.get(at..at + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]) as u32)
}

fn be_u32(data: &[u8], at: usize) -> Option<u32> {
    data.get(at..at + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

fn le_u24(data: &[u8], at: usize) -> Option<u32> {
    data.get(at..at + 3)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], 0]))
}

fn le_i32(data: &[u8], at: usize) -> Option<i32> {
    data.get(at..at + 4)
        .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Pixel dimensions `(width, height)` read from the image header
pub fn dimensions(format: ImageFormat, data: &[u8]) -> Option<(u32, u32)> {
    match format {
        // IHDR is always the first chunk
        ImageFormat::Png => Some((be_u32(data, 16)?, be_u32(data, 20)?)),
        ImageFormat::Gif => Some((le_u16(data, 6)?, le_u16(data, 8)?)),
        ImageFormat::Bmp => {
            let width = le_i32(data, 18)?;
            let height = le_i32(data, 22)?;
            Some((width.unsigned_abs(), height.unsigned_abs()))
        }
        ImageFormat::Jpeg => jpeg_dimensions(data),
        ImageFormat::Webp => webp_dimensions(data),
    }
}

/// Walk JPEG segments until a start-of-frame marker
fn jpeg_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    let mut pos = 2;
    while pos + 4 <= data.len() {
        if data[pos] != 0xFF {
            return None;
        }
        let marker = data[pos + 1];
        match marker {
            // Fill bytes
            0xFF => {
                pos += 1;
                continue;
            }
            // Standalone markers carry no length
            0x01 | 0xD0..=0xD7 => {
                pos += 2;
                continue;
            }
            // SOF0..SOF15 except DHT, JPG and DAC
            0xC0..=0xCF if marker != 0xC4 && marker != 0xC8 && marker != 0xCC => {
                let height = be_u16(data, pos + 5)?;
                let width = be_u16(data, pos + 7)?;
                return Some((width, height));
            }
            // Start of scan with no frame header seen
            0xDA => return None,
            _ => {}
        }
        let length = be_u16(data, pos + 2)? as usize;
        if length < 2 {
            return None;
        }
        pos += 2 + length;
    }
    None
}

fn webp_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    match data.get(12..16)? {
        b"VP8X" => Some((le_u24(data, 24)? + 1, le_u24(data, 27)? + 1)),
        b"VP8 " => Some((le_u16(data, 26)? & 0x3FFF, le_u16(data, 28)? & 0x3FFF)),
        b"VP8L" => {
            let bits = u32::from_le_bytes(data.get(21..25)?.try_into().ok()?);
            Some(((bits & 0x3FFF) + 1, ((bits >> 14) & 0x3FFF) + 1))
        }
        _ => None,
    }
}

fn orientation(width: u32, height: u32) -> &'static str {
    match width.cmp(&height) {
        std::cmp::Ordering::Greater => "landscape",
        std::cmp::Ordering::Less => "portrait",
        std::cmp::Ordering::Equal => "square",
    }
}

pub struct LocalAnalysisAdapter {
    config: LocalAnalysisConfig,
}

impl LocalAnalysisAdapter {
    pub fn new(config: LocalAnalysisConfig) -> Self {
        Self { config }
    }

    fn inspect(&self, image: &[u8], options: &AnalysisOptions) -> Result<ImageAnalysis, AdapterError> {
        let format = ImageFormat::detect(image).ok_or_else(|| {
            AdapterError::Unsupported("unrecognised image format".to_string())
        })?;

        let mut labels = vec![Label {
            description: format.as_str().to_string(),
            score: 1.0,
        }];
        if let Some((width, height)) = dimensions(format, image) {
            labels.push(Label {
                description: orientation(width, height).to_string(),
                score: 1.0,
            });
            labels.push(Label {
                description: format!("{}x{}", width, height),
                score: 1.0,
            });
        }
        labels.truncate(options.max_labels as usize);

        Ok(ImageAnalysis {
            labels,
            explicit_content: false,
            // Face and text detection are not available locally
            faces: None,
            text: None,
            fingerprint: self
                .config
                .fingerprint
                .then(|| blake3::hash(image).to_hex().to_string()),
        })
    }
}

#[async_trait]
impl ImageAnalysisAdapter for LocalAnalysisAdapter {
    fn provider(&self) -> &str {
        "local_analysis"
    }

    async fn analyze(
        &self,
        image: &[u8],
        options: &AnalysisOptions,
    ) -> Result<ImageAnalysis, AdapterError> {
        self.inspect(image, options)
    }

    async fn ping(&self) -> Result<(), AdapterError> {
        Ok(())
    }
}
