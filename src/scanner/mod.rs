//! Security scanner: a single-pass pipeline over an in-memory upload buffer.
//!
//! Gates run in order and short-circuit on the first hard error; warnings
//! never abort the pipeline. See [`ScanResult`] for the full verdict shape.

mod error;
mod heuristics;
mod image_guard;
mod magic;

use std::path::Path;
use std::time::{Duration, Instant};

pub use error::ScanError;
pub use image_guard::ImageDimensions;

use tracing::instrument;

use crate::config::ScannerConfig;

/// Outcome of a single [`SecurityScanner::scan`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanResult {
    /// `true` iff no gate appended a hard error.
    pub safe: bool,
    /// MIME type used for whitelist comparison (sniffed, falling back to
    /// extension mapping when the sniff is generic `application/octet-stream`).
    pub mime_type: String,
    /// MIME type as sniffed from content, before any extension fallback.
    pub detected_mime_type: String,
    /// Extension supplied by the caller (normalized to lowercase, leading dot).
    pub extension: String,
    /// Size of the scanned payload in bytes.
    pub size_bytes: u64,
    /// Declared image width, when gate 6 ran.
    pub image_width: Option<u32>,
    /// Declared image height, when gate 6 ran.
    pub image_height: Option<u32>,
    /// `true` iff the external AV hook reported a virus.
    pub virus_detected: bool,
    /// Name/signature reported by the AV scanner, when `virus_detected`.
    pub virus_name: Option<String>,
    /// Non-fatal findings: magic-byte mismatches outside strict mode,
    /// content heuristics hits, decompression-ratio warnings, AV scan
    /// failures treated as "accepted unscanned".
    pub warnings: Vec<String>,
    /// Hard errors. `safe` is `true` iff this is empty.
    pub errors: Vec<ScanError>,
    /// `Some(true/false)` when gate 5 ran and compared against the
    /// mandatory signature table; `None` when the extension has no
    /// mandatory signature or the gate was disabled.
    pub magic_bytes_match: Option<bool>,
    /// Wall-clock time spent in this scan. Diagnostic only.
    pub scan_duration: Duration,
}

impl ScanResult {
    fn new(extension: String, size_bytes: u64) -> Self {
        Self {
            safe: true,
            mime_type: String::new(),
            detected_mime_type: String::new(),
            extension,
            size_bytes,
            image_width: None,
            image_height: None,
            virus_detected: false,
            virus_name: None,
            warnings: Vec::new(),
            errors: Vec::new(),
            magic_bytes_match: None,
            scan_duration: Duration::ZERO,
        }
    }

    fn push_error(&mut self, error: ScanError) {
        self.safe = false;
        self.errors.push(error);
    }
}

/// Runs the eight-gate scan pipeline against a configured whitelist and set
/// of feature toggles.
#[derive(Debug)]
pub struct SecurityScanner {
    config: ScannerConfig,
}

impl SecurityScanner {
    /// Builds a scanner from `config`.
    #[must_use]
    pub fn new(config: ScannerConfig) -> Self {
        Self { config }
    }

    /// Scans `content`, which was uploaded under `filename`.
    ///
    /// Runs every gate even after a hard error is appended by an earlier
    /// gate, except where a later gate depends on a value an earlier gate
    /// failed to establish (extension normalization, MIME detection): those
    /// downstream gates are skipped and their absence does not itself
    /// change `safe`.
    #[instrument(skip(self, content), fields(filename, size = content.len()))]
    pub async fn scan(&self, content: &[u8], filename: &str) -> ScanResult {
        let started = Instant::now();
        let extension = extract_extension(filename);
        let mut result = ScanResult::new(extension.clone(), content.len() as u64);

        // Gate 1: size.
        let size = content.len() as u64;
        if size == 0 || size > self.config.max_file_size {
            result.push_error(ScanError::InvalidSize {
                size,
                max_size: self.config.max_file_size,
            });
        }

        // Gate 2: extension whitelist.
        if !self.config.allowed_extensions.is_empty()
            && !self
                .config
                .allowed_extensions
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(&extension))
        {
            result.push_error(ScanError::ExtensionNotAllowed {
                extension: extension.clone(),
            });
        }

        // Gate 3: MIME detection, content sniff first, extension fallback
        // on a generic octet-stream result.
        let sniffed = infer::get(content).map(|kind| kind.mime_type().to_string());
        let detected = sniffed.clone().unwrap_or_else(|| "application/octet-stream".to_string());
        result.detected_mime_type = detected.clone();
        result.mime_type = if detected == "application/octet-stream" {
            mime_guess::from_path(filename)
                .first()
                .map_or(detected, |guess| guess.essence_str().to_string())
        } else {
            detected
        };

        // Gate 4: MIME whitelist.
        if !self.config.allowed_mime_types.is_empty()
            && !self
                .config
                .allowed_mime_types
                .iter()
                .any(|allowed| allowed == &result.mime_type)
        {
            result.push_error(ScanError::MimeTypeNotAllowed {
                mime_type: result.mime_type.clone(),
            });
        }

        // Gate 5: magic bytes.
        if self.config.enable_magic_bytes {
            result.magic_bytes_match = magic::matches_expected_signature(&extension, content);
            if result.magic_bytes_match == Some(false) {
                if self.config.strict_magic_bytes {
                    result.push_error(ScanError::MagicBytesMismatch {
                        extension: extension.clone(),
                    });
                } else {
                    result
                        .warnings
                        .push(format!("magic bytes for '{extension}' do not match the expected signature"));
                }
            }
        }

        // Gate 6: image validation.
        if self.config.enable_image_bomb_protection
            && result.mime_type.starts_with("image/")
            && extension != ".svg"
        {
            if let Some(dimensions) = image_guard::probe_dimensions(content) {
                result.image_width = Some(dimensions.width);
                result.image_height = Some(dimensions.height);
                let exceeds_bounds = dimensions.width > self.config.max_image_width
                    || dimensions.height > self.config.max_image_height
                    || dimensions.pixel_count() > self.config.max_image_pixels;
                if exceeds_bounds {
                    result.push_error(ScanError::ImageTooLarge {
                        width: dimensions.width,
                        height: dimensions.height,
                    });
                }
                let ratio = image_guard::compression_ratio(dimensions, size);
                if ratio > 1000.0 {
                    result
                        .warnings
                        .push(format!("suspicious pixel-to-byte compression ratio {ratio:.1}:1"));
                }
            }
        }

        // Gate 7: content heuristics.
        if self.config.enable_content_analysis {
            result
                .warnings
                .extend(heuristics::scan(content, self.config.max_scan_bytes));
        }

        // Gate 8: external AV.
        if self.config.enable_av {
            self.run_av_scan(content, &mut result).await;
        }

        result.scan_duration = started.elapsed();
        result
    }

    /// Reads `path` fully and scans it, using the file name on disk.
    pub async fn scan_file(&self, path: &Path) -> std::io::Result<ScanResult> {
        let content = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();
        Ok(self.scan(&content, filename).await)
    }

    /// Invokes the configured AV command against `content` over a temp
    /// file, racing it against `av_timeout`. Exit code 1 is a virus hit,
    /// exit code 2 or any other failure (missing binary, timeout) is
    /// downgraded to a warning per the "accepted unscanned" policy.
    async fn run_av_scan(&self, content: &[u8], result: &mut ScanResult) {
        let Some(command) = self.config.av_command.as_deref() else {
            result
                .warnings
                .push("av scanning enabled but no av_command configured, file accepted unscanned".to_string());
            return;
        };

        let Ok(mut temp) = tempfile_write(content).await else {
            result
                .warnings
                .push("failed to stage file for av scan, file accepted unscanned".to_string());
            return;
        };

        let path = temp.path().to_path_buf();
        let av_run = tokio::process::Command::new(command).arg(&path).output();
        match tokio::time::timeout(self.config.av_timeout, av_run).await {
            Ok(Ok(output)) => match output.status.code() {
                Some(1) => {
                    let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
                    let name = if name.is_empty() { "unknown".to_string() } else { name };
                    result.virus_detected = true;
                    result.virus_name = Some(name.clone());
                    result.push_error(ScanError::VirusDetected { name });
                }
                _ => {
                    result
                        .warnings
                        .push("av scan failed, file accepted unscanned".to_string());
                }
            },
            Ok(Err(_)) | Err(_) => {
                result
                    .warnings
                    .push("av scan failed, file accepted unscanned".to_string());
            }
        }
        let _ = temp.close_async().await;
    }

    /// Returns `true` if `mime_type` is permitted (empty whitelist allows any).
    #[must_use]
    pub fn is_allowed_mime_type(&self, mime_type: &str) -> bool {
        self.config.allowed_mime_types.is_empty()
            || self.config.allowed_mime_types.iter().any(|allowed| allowed == mime_type)
    }

    /// Returns `true` if `extension` is permitted (empty whitelist allows any).
    #[must_use]
    pub fn is_allowed_extension(&self, extension: &str) -> bool {
        self.config.allowed_extensions.is_empty()
            || self
                .config
                .allowed_extensions
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(extension))
    }

    /// `true` when at least one gate beyond size/whitelist is active.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.enable_magic_bytes
            || self.config.enable_image_bomb_protection
            || self.config.enable_content_analysis
            || self.config.enable_av
    }

    /// Liveness probe. The in-process scanner has no external dependency
    /// unless AV is enabled, in which case this checks the configured
    /// command exists on disk.
    #[must_use]
    pub fn ping(&self) -> bool {
        if !self.config.enable_av {
            return true;
        }
        self.config
            .av_command
            .as_deref()
            .is_some_and(|command| Path::new(command).exists())
    }
}

/// A minimal async wrapper around a named temp file so the AV subprocess
/// can be pointed at a real path on disk.
struct NamedTempFile {
    inner: tempfile::NamedTempFile,
}

impl NamedTempFile {
    fn path(&self) -> &Path {
        self.inner.path()
    }

    async fn close_async(self) -> std::io::Result<()> {
        tokio::task::spawn_blocking(move || self.inner.close())
            .await
            .map_err(std::io::Error::other)?
    }
}

async fn tempfile_write(content: &[u8]) -> std::io::Result<NamedTempFile> {
    let content = content.to_vec();
    tokio::task::spawn_blocking(move || {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(&content)?;
        Ok(NamedTempFile { inner: file })
    })
    .await
    .map_err(std::io::Error::other)?
}

fn extract_extension(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default()
}
