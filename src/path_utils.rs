//! Split and join absolute paths into ordered segments.
//!
//! A drive anchor (`C:`, `D:`, ...) is recognized by shape rather than by
//! host OS, so the same logic runs - and is tested - on every platform this
//! crate builds on. Only the default separator differs by platform; callers
//! that care about the other platform's behavior pass their own separator.

/// The separator this host's paths use.
#[cfg(windows)]
pub const NATIVE_SEPARATOR: char = '\\';
#[cfg(not(windows))]
pub const NATIVE_SEPARATOR: char = '/';

/// True if `segment` looks like a drive anchor: one ASCII letter followed by `:`.
fn is_drive_anchor(segment: &str) -> bool {
    let bytes = segment.as_bytes();
    bytes.len() == 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Split an absolute path into its ordered, non-empty segments.
///
/// A leading drive anchor (`C:\...` or `C:/...`) becomes the first segment.
/// Trailing separators (and any other run of separators) produce no empty
/// segments.
pub fn split(path: &str, separator: char) -> Vec<String> {
    let mut rest = path;
    let mut segments = Vec::new();

    // Pull off a drive anchor if the first two characters look like one.
    // Accepted regardless of which separator follows, so `C:\home\...` and
    // `C:/home/...` both split the anchor off correctly.
    if rest.len() >= 2 {
        let mut chars = rest.chars();
        let first = chars.next().unwrap();
        let second = chars.next().unwrap();
        if first.is_ascii_alphabetic() && second == ':' {
            segments.push(rest[..2].to_string());
            rest = &rest[2..];
        }
    }

    for part in rest.split(separator) {
        if !part.is_empty() {
            segments.push(part.to_string());
        }
    }

    segments
}

/// Reverse of [`split`]: join segments back into a path.
///
/// An empty segment list always joins to the empty string, even if
/// `absolute` is set. If the first segment is a drive anchor, the result is
/// anchored on the drive rather than prefixed with `separator`.
pub fn join(segments: &[String], separator: char, absolute: bool) -> String {
    if segments.is_empty() {
        return String::new();
    }

    let mut parts = segments.to_vec();
    if is_drive_anchor(&parts[0]) {
        parts[0] = format!("{}{}", parts[0], separator);
    } else if absolute {
        parts[0] = format!("{}{}", separator, parts[0]);
    }
    parts.join(&separator.to_string())
}
