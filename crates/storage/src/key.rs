//! Object key validation and security utilities.
//!
//! Keys address objects in a flat remote namespace, but slashes are still
//! meaningful to prefix listings (and to the local fallbacks that mirror
//! remote layouts), so traversal sequences are rejected the same way the
//! filesystem side rejects them.

use crate::error::{ErrorKind, Result};

/// Validates an object key for security and correctness.
/// Ensures that keys don't escape the key space (no `..` traversal).
///
/// > **Note:** This does **not** normalize non-UTF8 bytes or
/// >           platform-specific weirdness. Null bytes are explicitly rejected.
///
/// # Returns
/// Returns the normalized key if valid, or [`InvalidKey`](crate::error::ErrorKind::InvalidKey)
/// if invalid.
///
/// # Examples
///
/// ```
/// use shelf_storage::validate_key;
/// // Valid keys
/// assert!(validate_key("magazine/issue-042.pdf").is_ok());
/// assert!(validate_key("a/b/c/cover.jpg").is_ok());
/// // Invalid keys
/// assert!(validate_key("../etc/passwd").is_err());
/// assert!(validate_key("a/../../b").is_err()); // (leaves the key space)
/// assert!(validate_key("a\0b").is_err());
/// // Keys get resolved
/// assert_eq!(
///     validate_key("wrong/../still-wrong/.././correct//./object.pdf/").unwrap(),
///     "correct/object.pdf"
/// );
/// ```
pub fn validate(key: impl AsRef<str>) -> Result<String> {
    let key = key.as_ref();
    if key.contains('\0') {
        exn::bail!(ErrorKind::InvalidKey(key.to_string()));
    }
    let mut segments: Vec<&str> = Vec::new();
    for segment in key.split('/') {
        match segment {
            "" | "." => {},
            ".." => {
                if segments.pop().is_none() {
                    exn::bail!(ErrorKind::InvalidKey(key.to_string()));
                }
            },
            other => segments.push(other),
        }
    }
    match segments.is_empty() {
        true => exn::bail!(ErrorKind::InvalidKey(key.to_string())),
        false => Ok(segments.join("/")),
    }
}
