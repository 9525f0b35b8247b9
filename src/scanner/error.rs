//! Error type for scanner rejections.

use thiserror::Error;

/// A hard rejection raised by the security scanner pipeline.
///
/// Warnings (magic-byte mismatch outside strict mode, content heuristics
/// hits, unscannable-by-AV) do not construct this type; they are pushed
/// onto [`super::ScanResult::warnings`] instead.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ScanError {
    /// Payload exceeds `max_file_size`, or is empty.
    #[error("file size {size} is invalid (max {max_size}, zero not allowed)")]
    InvalidSize {
        /// Size of the rejected payload.
        size: u64,
        /// Configured maximum.
        max_size: u64,
    },

    /// Extension not present in a non-empty allow-list.
    #[error("extension '{extension}' is not allowed")]
    ExtensionNotAllowed {
        /// The rejected extension.
        extension: String,
    },

    /// Detected MIME type not present in a non-empty allow-list.
    #[error("mime type '{mime_type}' is not allowed")]
    MimeTypeNotAllowed {
        /// The rejected MIME type.
        mime_type: String,
    },

    /// Magic bytes did not match the signature expected for the extension (strict mode).
    #[error("magic bytes for '{extension}' do not match the expected signature")]
    MagicBytesMismatch {
        /// The extension whose signature failed to match.
        extension: String,
    },

    /// Declared image dimensions or pixel count exceed configured limits.
    #[error("image dimensions {width}x{height} exceed configured limits (decompression bomb)")]
    ImageTooLarge {
        /// Declared width in pixels.
        width: u32,
        /// Declared height in pixels.
        height: u32,
    },

    /// The external AV scanner reported a virus.
    #[error("virus detected: {name}")]
    VirusDetected {
        /// Name/signature reported by the AV scanner.
        name: String,
    },
}
