use crate::error::{AppError, Result};

/// Longest device fingerprint accepted.
pub const MAX_FINGERPRINT_LEN: usize = 512;
/// Default page size for attempt history.
pub const DEFAULT_PAGE_SIZE: i64 = 50;
/// Largest page size for attempt history.
pub const MAX_PAGE_SIZE: i64 = 200;

/// Trims a client fingerprint. Blank means absent.
///
/// # Arguments
///
/// * `fingerprint` - The fingerprint as submitted.
///
/// # Returns
///
/// The stored form, or a validation error when it is too long.
pub fn normalize_fingerprint(fingerprint: Option<String>) -> Result<Option<String>> {
    let Some(raw) = fingerprint else {
        return Ok(None);
    };

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    if trimmed.len() > MAX_FINGERPRINT_LEN {
        return Err(AppError::Validation(format!(
            "Fingerprint must be at most {} characters",
            MAX_FINGERPRINT_LEN
        )));
    }

    Ok(Some(trimmed.to_string()))
}

/// Validates paging parameters for history listings.
///
/// # Arguments
///
/// * `limit` - Requested page size, if any.
/// * `offset` - Requested offset, if any.
///
/// # Returns
///
/// `(limit, offset)` ready for the query.
pub fn validate_page(limit: Option<i64>, offset: Option<i64>) -> Result<(i64, i64)> {
    let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE);
    if !(1..=MAX_PAGE_SIZE).contains(&limit) {
        return Err(AppError::Validation(format!(
            "Limit must be between 1 and {}",
            MAX_PAGE_SIZE
        )));
    }

    let offset = offset.unwrap_or(0);
    if offset < 0 {
        return Err(AppError::Validation("Offset must not be negative".to_string()));
    }

    Ok((limit, offset))
}
