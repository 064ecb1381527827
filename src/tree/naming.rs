//! Title and filename rules.

use crate::blob::PREVIEW_IMAGE_EXTENSION;
use crate::error::ApiError;

/// Trimmed, non-empty title
pub fn validate_title(title: &str) -> Result<String, ApiError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(ApiError::InvalidInput("title must not be empty".to_string()));
    }
    if title.chars().any(char::is_control) {
        return Err(ApiError::InvalidInput(
            "title must not contain control characters".to_string(),
        ));
    }
    Ok(title.to_string())
}

/// Split an uploaded filename into `(title, extension)`.
///
/// Only the final path component counts. The title is everything before the
/// last dot and the extension everything after it; a leading dot (`.bashrc`)
/// or a trailing one (`notes.`) means there is no extension.
pub fn split_filename(filename: &str) -> Result<(String, Option<String>), ApiError> {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if base.is_empty() {
        return Err(ApiError::InvalidInput(format!(
            "filename {:?} has no name component",
            filename
        )));
    }

    let (title, extension) = match base.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => (stem, Some(ext)),
        _ => (base, None),
    };

    if let Some(ext) = extension {
        if !ext
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ApiError::InvalidInput(format!(
                "unsupported file extension {:?}",
                ext
            )));
        }
    }

    Ok((validate_title(title)?, extension.map(str::to_string)))
}

/// Accept the preview image extension, with or without a leading dot, in any case.
pub fn check_preview_extension(extension: &str) -> Result<(), ApiError> {
    let ext = extension.trim().trim_start_matches('.');
    if ext.eq_ignore_ascii_case(PREVIEW_IMAGE_EXTENSION) {
        Ok(())
    } else {
        Err(ApiError::InvalidPayload(format!(
            "preview images must be .{}, got {:?}",
            PREVIEW_IMAGE_EXTENSION, extension
        )))
    }
}
