//! Path handling
//!
//! Validation, canonicalization, and decomposition of store paths.
//!
//! Paths are `/`-separated, absolute once canonicalized. A relative path is
//! resolved against the caller's home path `/local/domain/<domid>`; the
//! byte offset between the two spellings is retained so watch events can be
//! reported back in the spelling the caller used.

use crate::config::Config;
use crate::error::{Result, XsError};

/// The root path; always present, never removable
pub const ROOT_PATH: &str = "/";

/// Characters permitted in a path segment
fn is_valid_path_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '@' | ':' | '.')
}

/// Validate an absolute path
///
/// Rules: starts with `/`, no empty segments (so no `//` and no trailing
/// `/` except for the root itself), segment characters restricted to the
/// protocol's charset, total length bounded by the config.
pub fn validate_abs(path: &str, config: &Config) -> Result<()> {
    if !path.starts_with('/') {
        return Err(XsError::MalformedRequest(format!(
            "path not absolute: {path:?}"
        )));
    }
    if path.len() > config.max_abs_path {
        return Err(XsError::TooLarge("path".to_string()));
    }
    if path == ROOT_PATH {
        return Ok(());
    }
    if path.ends_with('/') {
        return Err(XsError::MalformedRequest(format!(
            "trailing slash: {path:?}"
        )));
    }
    for segment in path[1..].split('/') {
        if segment.is_empty() {
            return Err(XsError::MalformedRequest(format!(
                "empty path segment: {path:?}"
            )));
        }
        if !segment.chars().all(is_valid_path_char) {
            return Err(XsError::MalformedRequest(format!(
                "invalid character in segment {segment:?}"
            )));
        }
    }
    Ok(())
}

/// Resolve a caller-supplied path to canonical absolute form
///
/// Returns the absolute path plus the byte offset such that
/// `&abs[offset..]` reproduces the caller's original spelling. The offset
/// is zero for already-absolute paths.
pub fn canonicalize(domid: u32, path: &str, config: &Config) -> Result<(String, usize)> {
    if path.is_empty() {
        return Err(XsError::MalformedRequest("empty path".to_string()));
    }
    if path.starts_with('/') {
        validate_abs(path, config)?;
        return Ok((path.to_string(), 0));
    }
    if path.len() > config.max_rel_path {
        return Err(XsError::TooLarge("path".to_string()));
    }
    let abs = format!("/local/domain/{domid}/{path}");
    validate_abs(&abs, config)?;
    let offset = abs.len() - path.len();
    Ok((abs, offset))
}

/// Split an absolute path into its segments (empty for the root)
pub fn segments(path: &str) -> Vec<&str> {
    if path == ROOT_PATH {
        Vec::new()
    } else {
        path[1..].split('/').collect()
    }
}

/// The parent of an absolute path, or None for the root
pub fn parent(path: &str) -> Option<&str> {
    if path == ROOT_PATH {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some(ROOT_PATH),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Proper ancestors of `path`, ordered from the root down to the
/// immediate parent (the order ancestor watches fire in)
pub fn ancestors_from_root(path: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut current = path;
    while let Some(p) = parent(current) {
        out.push(p);
        current = p;
    }
    out.reverse();
    out
}

/// True if `a` equals `b`, or either is an ancestor of the other
///
/// The commit-time conflict check treats any prefix relation as an overlap.
pub fn prefix_related(a: &str, b: &str) -> bool {
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    if short == long {
        return true;
    }
    long.starts_with(short) && (short == ROOT_PATH || long.as_bytes()[short.len()] == b'/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_absolute_paths() {
        let config = Config::default();
        assert!(validate_abs("/", &config).is_ok());
        assert!(validate_abs("/local/domain/1", &config).is_ok());
        assert!(validate_abs("local", &config).is_err());
        assert!(validate_abs("/a//b", &config).is_err());
        assert!(validate_abs("/a/", &config).is_err());
        assert!(validate_abs("/a/b c", &config).is_err());
    }

    #[test]
    fn rejects_oversize_paths() {
        let config = Config::default();
        let long = format!("/{}", "x".repeat(config.max_abs_path));
        assert_eq!(
            validate_abs(&long, &config),
            Err(XsError::TooLarge("path".to_string()))
        );
    }

    #[test]
    fn canonicalize_resolves_relative_against_home() {
        let config = Config::default();
        let (abs, offset) = canonicalize(5, "data/x", &config).unwrap();
        assert_eq!(abs, "/local/domain/5/data/x");
        assert_eq!(&abs[offset..], "data/x");

        let (abs, offset) = canonicalize(5, "/foo", &config).unwrap();
        assert_eq!(abs, "/foo");
        assert_eq!(offset, 0);
    }

    #[test]
    fn parent_and_ancestors() {
        assert_eq!(parent("/"), None);
        assert_eq!(parent("/a"), Some("/"));
        assert_eq!(parent("/a/b/c"), Some("/a/b"));
        assert_eq!(ancestors_from_root("/a/b/c"), vec!["/", "/a", "/a/b"]);
        assert!(ancestors_from_root("/").is_empty());
    }

    #[test]
    fn prefix_relation() {
        assert!(prefix_related("/a/b", "/a/b"));
        assert!(prefix_related("/a", "/a/b/c"));
        assert!(prefix_related("/a/b/c", "/a"));
        assert!(prefix_related("/", "/a"));
        assert!(!prefix_related("/a/b", "/a/bc"));
        assert!(!prefix_related("/a/x", "/a/y"));
    }
}
