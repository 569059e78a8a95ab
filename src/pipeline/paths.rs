//! Bidirectional input/output path map for one run.

use anyhow::{Result, bail};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::RewriteFn;

/// `unfiltered ↔ filtered` mapping, computed lazily by a rewrite rule and cached for the run.
pub struct PathRewriteMap {
    rule: RewriteFn,
    forward: HashMap<PathBuf, PathBuf>,
    backward: HashMap<PathBuf, PathBuf>,
}

impl PathRewriteMap {
    pub fn new(rule: RewriteFn) -> Self {
        Self {
            rule,
            forward: HashMap::new(),
            backward: HashMap::new(),
        }
    }

    /// Output path for `unfiltered`. Fails if the rule maps two inputs to one output.
    pub fn filter(&mut self, unfiltered: &Path) -> Result<PathBuf> {
        if let Some(out) = self.forward.get(unfiltered) {
            return Ok(out.clone());
        }
        let filtered = (self.rule)(unfiltered);
        if let Some(other) = self.backward.get(&filtered) {
            bail!(
                "{} and {} both map to {}",
                other.display(),
                unfiltered.display(),
                filtered.display()
            );
        }
        self.forward
            .insert(unfiltered.to_path_buf(), filtered.clone());
        self.backward
            .insert(filtered.clone(), unfiltered.to_path_buf());
        Ok(filtered)
    }

    /// Cached output path, if `unfiltered` was seen.
    pub fn filtered(&self, unfiltered: &Path) -> Option<&Path> {
        self.forward.get(unfiltered).map(PathBuf::as_path)
    }

    /// Input path that produced `filtered`.
    pub fn unfiltered(&self, filtered: &Path) -> Option<&Path> {
        self.backward.get(filtered).map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn round_trips_and_caches() {
        let mut map = PathRewriteMap::new(Arc::new(|p: &Path| Path::new("/out").join(p)));
        let out = map.filter(Path::new("a/b.txt")).unwrap();
        assert_eq!(out, PathBuf::from("/out/a/b.txt"));
        assert_eq!(map.unfiltered(&out), Some(Path::new("a/b.txt")));
        assert_eq!(map.filter(Path::new("a/b.txt")).unwrap(), out);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn collisions_are_rejected() {
        let mut map = PathRewriteMap::new(Arc::new(|_: &Path| PathBuf::from("/out/same")));
        map.filter(Path::new("a")).unwrap();
        assert!(map.filter(Path::new("b")).is_err());
        assert_eq!(map.unfiltered(Path::new("/out/same")), Some(Path::new("a")));
    }
}
