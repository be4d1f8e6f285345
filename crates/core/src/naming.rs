//! Archive entry naming.
//!
//! Turns free-form image titles into safe, unique file names and maps
//! response content types to file extensions.

use std::collections::HashSet;

/// Extension used when the content type is unknown.
pub const FALLBACK_EXTENSION: &str = "jpg";

/// Reduce a title to a lower-case ASCII alphanumeric stem.
///
/// Runs of any other characters collapse to a single `_`; leading and
/// trailing separators are trimmed. Returns `None` when nothing usable is
/// left.
///
/// ```
/// use shutter_core::naming::sanitize_stem;
///
/// assert_eq!(sanitize_stem("Sunset"), Some("sunset".to_string()));
/// assert_eq!(sanitize_stem("Beach @ Dusk!"), Some("beach_dusk".to_string()));
/// assert_eq!(sanitize_stem("***"), None);
/// ```
pub fn sanitize_stem(title: &str) -> Option<String> {
    let mut stem = String::with_capacity(title.len());
    let mut pending_sep = false;

    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !stem.is_empty() {
                stem.push('_');
            }
            pending_sep = false;
            stem.push(c.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }

    (!stem.is_empty()).then_some(stem)
}

/// Base file name for an image: sanitized title, or `image_<id>`.
pub fn entry_stem(title: Option<&str>, image_id: &str) -> String {
    title
        .and_then(sanitize_stem)
        .or_else(|| sanitize_stem(image_id).map(|id| format!("image_{id}")))
        .unwrap_or_else(|| "image".to_string())
}

/// Map a `Content-Type` header value to a file extension.
///
/// Parameters such as `; charset=` are ignored. Unknown or missing types
/// yield [`FALLBACK_EXTENSION`].
pub fn extension_for_content_type(content_type: Option<&str>) -> &'static str {
    let mime = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase());

    match mime.as_deref() {
        Some("image/jpeg") | Some("image/jpg") | Some("image/pjpeg") => "jpg",
        Some("image/png") => "png",
        Some("image/gif") => "gif",
        Some("image/webp") => "webp",
        Some("image/avif") => "avif",
        Some("image/heic") | Some("image/heif") => "heic",
        Some("image/tiff") => "tiff",
        Some("image/bmp") => "bmp",
        _ => FALLBACK_EXTENSION,
    }
}

/// Hands out unique file names within one archive.
///
/// The first `sunset.jpg` keeps its name; later ones become `sunset_2.jpg`,
/// `sunset_3.jpg`, and so on.
#[derive(Debug, Default)]
pub struct UniqueNames {
    taken: HashSet<String>,
}

impl UniqueNames {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a unique `stem.extension` name.
    pub fn reserve(&mut self, stem: &str, extension: &str) -> String {
        let mut candidate = format!("{stem}.{extension}");
        let mut index = 2u32;
        while self.taken.contains(&candidate) {
            candidate = format!("{stem}_{index}.{extension}");
            index += 1;
        }
        self.taken.insert(candidate.clone());
        candidate
    }
}
