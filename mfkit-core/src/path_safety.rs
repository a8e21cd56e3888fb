//! Install paths come straight from manifest data, so they are checked before
//! anyone joins them onto an install root.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Clone, Copy, Debug, Default)]
pub struct PathPolicy {
    pub follow_symlinks: bool,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum UnsafePath {
    #[error("empty install path")]
    Empty,
    #[error("absolute paths are not allowed: {0:?}")]
    Absolute(String),
    #[error("parent traversal not allowed: {0:?}")]
    ParentTraversal(String),
    #[error("NUL byte in path: {0:?}")]
    Nul(String),
    #[error("symlink in path (not following): {0:?}")]
    Symlink(PathBuf),
    #[error("path escapes root: {0:?}")]
    EscapesRoot(PathBuf),
    #[error("cannot resolve {path:?}: {reason}")]
    Unresolvable { path: PathBuf, reason: String },
}

/// Lexical check of a manifest filename. Manifests use `/` separators, but
/// `\` is treated the same so Windows-authored names cannot slip through.
pub fn check_install_path(name: &str) -> Result<PathBuf, UnsafePath> {
    if name.is_empty() {
        return Err(UnsafePath::Empty);
    }
    if name.contains('\0') {
        return Err(UnsafePath::Nul(name.to_string()));
    }
    let normalized = name.replace('\\', "/");
    let bytes = normalized.as_bytes();
    let has_drive = bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':';
    if normalized.starts_with('/') || has_drive {
        return Err(UnsafePath::Absolute(name.to_string()));
    }
    let rel = Path::new(&normalized);
    let mut out = PathBuf::new();
    for comp in rel.components() {
        match comp {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir => return Err(UnsafePath::ParentTraversal(name.to_string())),
            Component::RootDir | Component::Prefix(_) => return Err(UnsafePath::Absolute(name.to_string())),
        }
    }
    if out.as_os_str().is_empty() {
        return Err(UnsafePath::Empty);
    }
    Ok(out)
}

/// Where `name` would be installed under `root`. Without `follow_symlinks`
/// any existing symlink on the way is refused; with it, the canonical target
/// must stay under `root`.
pub fn resolve_under(root: &Path, name: &str, policy: PathPolicy) -> Result<PathBuf, UnsafePath> {
    let rel = check_install_path(name)?;
    let candidate = root.join(&rel);
    if !policy.follow_symlinks {
        let mut cur = root.to_path_buf();
        for comp in rel.components() {
            cur.push(comp);
            if let Ok(m) = std::fs::symlink_metadata(&cur) {
                if m.file_type().is_symlink() {
                    return Err(UnsafePath::Symlink(cur));
                }
            }
        }
        return Ok(candidate);
    }
    if !candidate.exists() {
        return Ok(candidate);
    }
    let unresolvable = |path: &Path, e: std::io::Error| UnsafePath::Unresolvable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };
    let root_can = std::fs::canonicalize(root).map_err(|e| unresolvable(root, e))?;
    let cand_can = std::fs::canonicalize(&candidate).map_err(|e| unresolvable(&candidate, e))?;
    if !cand_can.starts_with(&root_can) {
        return Err(UnsafePath::EscapesRoot(rel));
    }
    Ok(cand_can)
}
