//! Recursive directory walk for the recursive wildcard: consumes walkdir results, filters them,
//! and collects files plus per-entry errors.

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::engine::tools::{is_dot_name, should_include};

use super::expand::Expansion;

/// One result from a directory walk.
pub enum WalkOutcome {
    File(PathBuf),
    Dir(PathBuf),
    Err { msg: String, path: Option<PathBuf> },
}

/// Convert a walkdir result into [`WalkOutcome`]. Symlinks count as files when they resolve to one.
pub fn to_outcome_walkdir(r: Result<walkdir::DirEntry, walkdir::Error>) -> WalkOutcome {
    match r {
        Ok(entry) => {
            let ft = entry.file_type();
            if ft.is_dir() {
                WalkOutcome::Dir(entry.into_path())
            } else if ft.is_file() || (ft.is_symlink() && entry.path().is_file()) {
                WalkOutcome::File(entry.into_path())
            } else {
                WalkOutcome::Dir(entry.into_path())
            }
        }
        Err(err) => WalkOutcome::Err {
            msg: format!("{}", err),
            path: err.path().map(PathBuf::from),
        },
    }
}

fn walkdir_iter(root: &Path, exclude: &[PathBuf]) -> impl Iterator<Item = WalkOutcome> {
    let exclude = exclude.to_vec();
    WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_entry(move |e| {
            !is_dot_name(e.file_name()) && !exclude.iter().any(|d| e.path() == d.as_path())
        })
        .map(to_outcome_walkdir)
}

/// Run the walk loop: keep files that pass [`should_include`], record errors as skipped.
/// Directories are not reported; the walk already descends into them.
pub fn run_walk_loop<I>(iter: I, exclude: &[PathBuf]) -> Expansion
where
    I: Iterator<Item = WalkOutcome>,
{
    let mut expansion = Expansion::default();
    for outcome in iter {
        match outcome {
            WalkOutcome::File(path) => {
                if should_include(&path, exclude) {
                    expansion.files.push(path);
                }
            }
            WalkOutcome::Dir(_) => {}
            WalkOutcome::Err { msg, path } => expansion.skipped.push((path, msg)),
        }
    }
    expansion
}

/// Every file under `root` (excluding dot entries and `exclude` subtrees).
pub fn walk_recursive(root: &Path, exclude: &[PathBuf]) -> Expansion {
    run_walk_loop(walkdir_iter(root, exclude), exclude)
}
