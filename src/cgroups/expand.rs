//! Slice name expansion and normalization
//!
//! systemd encodes a slice's ancestry in its name: every dash starts a new
//! level of the hierarchy.
//!
//! ```text
//! test-a-b.slice  →  /test.slice/test-a.slice/test-a-b.slice
//! -.slice         →  /
//! ```
//!
//! Expansion is exposed as the [`SliceExpander`] trait so managers can be
//! built against a fake in tests.

use std::path::Path;

use super::error::ExpandError;
use super::SLICE_SUFFIX;

/// Resolves a systemd slice name into its cgroup path
pub trait SliceExpander: Send + Sync {
    fn expand(&self, slice: &str) -> Result<String, ExpandError>;
}

/// Expansion following the systemd unit naming convention
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemdSliceExpander;

impl SliceExpander for SystemdSliceExpander {
    fn expand(&self, slice: &str) -> Result<String, ExpandError> {
        let name = slice
            .strip_suffix(SLICE_SUFFIX)
            .ok_or_else(|| ExpandError::MissingSuffix(slice.to_string()))?;

        if slice.contains('/') {
            return Err(ExpandError::ContainsSeparator(slice.to_string()));
        }

        // root slice
        if name == "-" {
            return Ok("/".to_string());
        }

        let mut path = String::new();
        let mut prefix = String::new();
        for component in name.split('-') {
            if component.is_empty() {
                return Err(ExpandError::EmptyComponent(slice.to_string()));
            }
            path.push('/');
            path.push_str(&prefix);
            path.push_str(component);
            path.push_str(SLICE_SUFFIX);

            prefix.push_str(component);
            prefix.push('-');
        }

        Ok(path)
    }
}

/// Convert a cgroupfs-style slice path to the flat name systemd expects.
///
/// `test.slice/test-a.slice/test-a-b.slice` becomes `test-a-b.slice`; the last
/// component already names the whole hierarchy.
pub fn slice_name_from_path(path: &str) -> String {
    // path.Base semantics: trailing slashes ignored, "" → "."
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return if path.is_empty() { ".".to_string() } else { "/".to_string() };
    }
    Path::new(trimmed)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| trimmed.to_string())
}

/// Whether the last component of `path` is a slice name
pub fn is_slice(path: &str) -> bool {
    slice_name_from_path(path).ends_with(SLICE_SUFFIX)
}
