//! Content-type classification under the classification pool.

use crossbeam_channel::Sender;
use log::debug;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::utils::config::{DEFAULT_CONTENT_TYPE, SNIFF_LEN};
use crate::{Classification, ResolvedPath};

use super::events::Event;
use super::queue::Pool;

/// Media-range matcher (`text/*`, `*/json`, `application/xml`).
#[derive(Clone, Debug)]
pub struct MimePatterns {
    ranges: Vec<(String, String)>,
}

impl MimePatterns {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Self {
        let ranges = patterns
            .iter()
            .map(|p| {
                let p = p.as_ref().trim().to_ascii_lowercase();
                match p.split_once('/') {
                    Some((t, s)) => (t.to_string(), s.to_string()),
                    None => (p, "*".to_string()),
                }
            })
            .collect();
        Self { ranges }
    }

    pub fn matches(&self, content_type: &str) -> bool {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        let Some((t, s)) = essence.split_once('/') else {
            return false;
        };
        self.ranges.iter().any(|(rt, rs)| {
            (rt == "*" || rt == t) && (rs == "*" || rs == s || s.ends_with(&format!("+{rs}")))
        })
    }
}

fn sniff(path: &Path) -> std::io::Result<Option<&'static str>> {
    let mut head = Vec::with_capacity(SNIFF_LEN);
    File::open(path)?
        .take(SNIFF_LEN as u64)
        .read_to_end(&mut head)?;
    if head.contains(&0) {
        return Ok(None);
    }
    let text = match std::str::from_utf8(&head) {
        Ok(_) => true,
        // A multi-byte character cut by the sniff window still counts as text.
        Err(e) => e.error_len().is_none(),
    };
    Ok(text.then_some("text/plain"))
}

/// Content type for `path`: extension first, then a UTF-8 sniff of the head of the file.
/// Any failure falls back to [`DEFAULT_CONTENT_TYPE`].
pub fn classify_path(path: &Path) -> String {
    if let Err(e) = std::fs::metadata(path) {
        debug!("Classify {}: {}", path.display(), e);
        return DEFAULT_CONTENT_TYPE.to_string();
    }
    if let Some(mime) = mime_guess::from_path(path).first() {
        return mime.essence_str().to_string();
    }
    match sniff(path) {
        Ok(Some(t)) => t.to_string(),
        Ok(None) => DEFAULT_CONTENT_TYPE.to_string(),
        Err(e) => {
            debug!("Sniff {}: {}", path.display(), e);
            DEFAULT_CONTENT_TYPE.to_string()
        }
    }
}

/// Classifies resolved paths, at most `cap` at a time.
pub struct ContentClassifier {
    pool: Pool<ResolvedPath>,
    events: Sender<Event>,
}

impl ContentClassifier {
    pub fn new(cap: usize, events: Sender<Event>) -> Self {
        Self {
            pool: Pool::new("classify", cap),
            events,
        }
    }

    pub fn classify(&mut self, path: ResolvedPath) {
        if let Some(path) = self.pool.admit(path) {
            self.spawn(path);
        }
    }

    fn spawn(&self, path: ResolvedPath) {
        let events = self.events.clone();
        rayon::spawn(move || {
            let content_type = classify_path(&path.path);
            let _ = events.send(Event::Classify(Classification { path, content_type }));
        });
    }

    /// A classification finished: free its slot (the next queued path starts in it).
    pub fn on_classified(&mut self) {
        if let Some(next) = self.pool.release() {
            self.spawn(next);
        }
    }

    pub fn clear(&mut self) -> usize {
        self.pool.clear()
    }

    pub fn total(&self) -> usize {
        self.pool.total()
    }

    pub fn peak(&self) -> usize {
        self.pool.peak()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_ranges() {
        let p = MimePatterns::new(&["text/*", "*/json", "*/xml"]);
        assert!(p.matches("text/plain"));
        assert!(p.matches("text/html; charset=utf-8"));
        assert!(p.matches("application/json"));
        assert!(p.matches("image/svg+xml"));
        assert!(!p.matches("image/png"));
        assert!(!p.matches("application/octet-stream"));
        assert!(!p.matches("garbage"));
    }
}
