use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::utils::config::PackagePaths;

/// Temporary sibling of `path` used while it is being written.
pub fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| PackagePaths::get().pkg_name().to_string());
    path.parent()
        .unwrap_or(Path::new("."))
        .join(format!("{name}.tmp"))
}

/// Write `contents` to a temp sibling, then rename over `path`. A stale temp is removed first.
/// On permission denied for the temp, falls back to writing `path` directly.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(dir) = path.parent()
        && !dir.as_os_str().is_empty()
    {
        fs::create_dir_all(dir).with_context(|| format!("create directory {}", dir.display()))?;
    }
    let temp_path = temp_path_for(path);
    if temp_path.exists()
        && let Err(e) = fs::remove_file(&temp_path)
    {
        if e.kind() != std::io::ErrorKind::PermissionDenied {
            return Err(e)
                .with_context(|| format!("remove stale temp file {}", temp_path.display()));
        }
        return fs::write(path, contents).with_context(|| format!("write {}", path.display()));
    }
    match fs::write(&temp_path, contents) {
        Ok(()) => rename_temp_to_final(&temp_path, path),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            fs::write(path, contents).with_context(|| format!("write {}", path.display()))
        }
        Err(e) => Err(e).with_context(|| format!("write {}", temp_path.display())),
    }
}

pub fn rename_temp_to_final(temp_path: &Path, final_path: &Path) -> Result<()> {
    fs::rename(temp_path, final_path).with_context(|| {
        format!(
            "atomic rename temp file to final path ({} -> {})",
            temp_path.display(),
            final_path.display()
        )
    })
}
