//! Path handling for everything written under an output root.
//!
//! All bundle and store writes pass through here so a hostile artifact
//! name can never escape the staging directory or the reports root.

use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Result};

/// Characters replaced when turning an artifact name into a file name.
const UNSAFE_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*', '/', '\\'];

/// Sanitise a caller-supplied name into a single safe path component.
///
/// Replaces `<>:"|?*/\` with `_`, strips control characters and leading
/// dots, and never returns an empty string.
pub fn safe_file_name(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| {
            if UNSAFE_CHARS.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();
    while out.starts_with('.') {
        out.remove(0);
    }
    if out.is_empty() {
        out.push('_');
    }
    out
}

/// Join `relative` onto `root`, rejecting traversal and absolute paths.
pub fn confine_to_root(root: &Path, relative: &Path) -> Result<PathBuf> {
    let mut resolved = root.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(name) => resolved.push(name),
            Component::CurDir => {}
            Component::ParentDir => {
                bail!("path traversal attempt: {} contains '..'", relative.display())
            }
            Component::RootDir | Component::Prefix(_) => {
                bail!("absolute path not allowed: {}", relative.display())
            }
        }
    }
    Ok(resolved)
}
