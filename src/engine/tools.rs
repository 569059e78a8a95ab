//! Path and filter utilities

use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::RewriteFn;

/// Convert absolute path to relative path from base
pub fn path_relative_to(path: &Path, base: &Path) -> Option<PathBuf> {
    path.strip_prefix(base).ok().map(|p| p.to_path_buf())
}

/// Check if a file should be excluded based on OS-specific hidden files
pub fn is_os_hidden_file(path: &Path) -> bool {
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        match name {
            // macOS
            ".DS_Store" | ".AppleDouble" | ".LSOverride" => true,
            // Windows
            "Thumbs.db" | "ehthumbs.db" | "Desktop.ini" | "desktop.ini" | "$RECYCLE.BIN" => true,
            // Linux
            ".directory" => true,
            _ => {
                // macOS resource forks, Linux trash dirs
                name.starts_with("._") || name.starts_with(".Trash-")
            }
        }
    } else {
        false
    }
}

/// True for names starting with `.` (other than `.` and `..`).
pub fn is_dot_name(name: &OsStr) -> bool {
    let bytes = name.as_encoded_bytes();
    bytes.first() == Some(&b'.') && bytes != b"." && bytes != b".."
}

/// Returns true if a discovered file should be processed: not OS clutter and not inside an
/// excluded directory (e.g. the output directory nested in the input tree).
pub fn should_include(path: &Path, exclude_dirs: &[PathBuf]) -> bool {
    if is_os_hidden_file(path) {
        return false;
    }
    !exclude_dirs.iter().any(|d| path.starts_with(d))
}

/// Lexically normalize `path`: drop `.` components and fold `..` into the parent.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Absolute, normalized form of `path` relative to `cwd`. Existing paths are canonicalized so
/// symlinked spellings of the same directory compare equal.
pub fn resolve_dir(cwd: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    };
    joined
        .canonicalize()
        .unwrap_or_else(|_| normalize_path(&joined))
}

/// Join `path` under `root`, ignoring any root or prefix component of `path`.
pub fn join_under(root: &Path, path: &Path) -> PathBuf {
    let mut out = root.to_path_buf();
    let mut depth = 0_usize;
    for comp in path.components() {
        match comp {
            Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
            // never climb above root
            Component::ParentDir => {
                if depth > 0 {
                    out.pop();
                    depth -= 1;
                }
            }
            Component::Normal(c) => {
                out.push(c);
                depth += 1;
            }
        }
    }
    out
}

/// Default rewrite rule: replace the input-root prefix with the output root; paths outside the
/// input root are joined under the output root as they are.
pub fn default_rewrite(input_root: PathBuf, output_root: PathBuf) -> RewriteFn {
    Arc::new(move |path: &Path| match path.strip_prefix(&input_root) {
        Ok(rel) => output_root.join(rel),
        Err(_) => join_under(&output_root, path),
    })
}

/// Identity rule (sink output: outputs are keyed by their input path).
pub fn identity_rewrite() -> RewriteFn {
    Arc::new(|path: &Path| path.to_path_buf())
}

/// Manifest line for a relative path: `/`-separated on every platform.
pub fn path_to_manifest_string(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
