//! RFC 6901 JSON pointer helpers used by the patch codec.

use super::PatchError;

/// Escape a single reference token (`~` → `~0`, `/` → `~1`).
pub fn escape(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

pub fn unescape(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

/// Append a token to an existing pointer.
pub fn join(base: &str, token: &str) -> String {
    format!("{base}/{}", escape(token))
}

/// Split a pointer into its parent pointer and final (unescaped) token.
///
/// The root pointer `""` has no parent and is rejected.
pub fn split_last(path: &str) -> Result<(&str, String), PatchError> {
    if path.is_empty() {
        return Err(PatchError::InvalidPointer(
            "the document root has no parent".to_string(),
        ));
    }
    if !path.starts_with('/') {
        return Err(PatchError::InvalidPointer(path.to_string()));
    }
    let split_at = path.rfind('/').unwrap_or(0);
    Ok((&path[..split_at], unescape(&path[split_at + 1..])))
}

/// Parse an array index token. Leading zeros are rejected per RFC 6901.
pub fn parse_index(token: &str, path: &str) -> Result<usize, PatchError> {
    if token.len() > 1 && token.starts_with('0') {
        return Err(PatchError::InvalidPointer(path.to_string()));
    }
    token
        .parse::<usize>()
        .map_err(|_| PatchError::InvalidPointer(path.to_string()))
}
