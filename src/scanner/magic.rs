//! Mandatory magic-byte signature table and comparison (gate 5).

/// A magic-byte signature and the extension(s) it is expected for.
struct Signature {
    extensions: &'static [&'static str],
    bytes: &'static [u8],
}

const SIGNATURES: &[Signature] = &[
    Signature {
        extensions: &[".jpg", ".jpeg"],
        bytes: &[0xFF, 0xD8],
    },
    Signature {
        extensions: &[".png"],
        bytes: &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A],
    },
    Signature {
        extensions: &[".gif"],
        bytes: b"GIF87a", // checked specially below alongside GIF89a
    },
    Signature {
        extensions: &[".pdf"],
        bytes: b"%PDF",
    },
    Signature {
        // ZIP also covers ZIP-based office documents (.docx, .xlsx, .pptx).
        extensions: &[".zip", ".docx", ".xlsx", ".pptx"],
        bytes: &[0x50, 0x4B, 0x03, 0x04],
    },
];

/// Returns `true` if `content` begins with the GIF87a or GIF89a signature.
fn is_gif_signature(content: &[u8]) -> bool {
    content.starts_with(b"GIF87a") || content.starts_with(b"GIF89a")
}

/// Returns `Some(true/false)` comparing `content`'s magic bytes against the
/// signature expected for `extension`, or `None` if this extension has no
/// mandatory signature in the table (nothing to check).
#[must_use]
pub fn matches_expected_signature(extension: &str, content: &[u8]) -> Option<bool> {
    let extension = extension.to_ascii_lowercase();
    for signature in SIGNATURES {
        if signature.extensions.contains(&extension.as_str()) {
            if extension == ".gif" {
                return Some(is_gif_signature(content));
            }
            return Some(content.starts_with(signature.bytes));
        }
    }
    None
}
