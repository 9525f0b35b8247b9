//! Image dimension probing for the decompression-bomb guard (gate 6).
//!
//! Dimensions are read from the container header only
//! (`ImageReader::into_dimensions`) — this never inflates a pixel buffer,
//! so probing a declared-huge image is itself safe to run before the bomb
//! check has had a chance to reject it.

use std::io::Cursor;

/// Declared image dimensions, read from the header without decoding pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDimensions {
    /// Declared width in pixels.
    pub width: u32,
    /// Declared height in pixels.
    pub height: u32,
}

impl ImageDimensions {
    /// Total declared pixel count.
    #[must_use]
    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// Probes `content` for its declared width/height without decoding pixels.
/// Returns `None` if the format cannot be determined or the header is
/// unreadable (callers treat this as "not an image we can validate").
#[must_use]
pub fn probe_dimensions(content: &[u8]) -> Option<ImageDimensions> {
    let reader = image::ImageReader::new(Cursor::new(content))
        .with_guessed_format()
        .ok()?;
    let (width, height) = reader.into_dimensions().ok()?;
    Some(ImageDimensions { width, height })
}

/// Ratio of declared pixels to compressed size on disk. Ratios above
/// 1000:1 are suspicious (heavily compressed data expanding enormously)
/// and are surfaced as a warning, not a hard error.
#[must_use]
pub fn compression_ratio(dimensions: ImageDimensions, size_bytes: u64) -> f64 {
    if size_bytes == 0 {
        return f64::INFINITY;
    }
    dimensions.pixel_count() as f64 / size_bytes as f64
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn png_header(width: u32, height: u32) -> Vec<u8> {
        let mut bytes = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        // IHDR chunk: length(4) + "IHDR"(4) + width(4) + height(4) + rest + crc(4)
        bytes.extend_from_slice(&13u32.to_be_bytes());
        bytes.extend_from_slice(b"IHDR");
        bytes.extend_from_slice(&width.to_be_bytes());
        bytes.extend_from_slice(&height.to_be_bytes());
        bytes.extend_from_slice(&[8, 6, 0, 0, 0]); // bit depth, color type, compression, filter, interlace
        bytes.extend_from_slice(&[0, 0, 0, 0]); // crc (unchecked by dimension probing)
        bytes
    }

    #[test]
    fn test_probe_png_dimensions() {
        let header = png_header(10_000, 10_000);
        let dims = probe_dimensions(&header).expect("should parse PNG header");
        assert_eq!(dims.width, 10_000);
        assert_eq!(dims.height, 10_000);
        assert_eq!(dims.pixel_count(), 100_000_000);
    }

    #[test]
    fn test_probe_unrecognized_content_returns_none() {
        assert!(probe_dimensions(b"not an image").is_none());
    }

    #[test]
    fn test_compression_ratio_flags_extreme_values() {
        let dims = ImageDimensions {
            width: 10_000,
            height: 10_000,
        };
        let ratio = compression_ratio(dims, 1_000);
        assert!(ratio > 1000.0);
    }
}
