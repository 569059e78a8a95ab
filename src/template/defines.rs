//! Compile-time define namespace.
//!
//! Insertion order is kept so that each run-time tag can record how many defines existed when
//! it was compiled (its horizon) and only see those; this keeps output identical no matter where
//! chunk boundaries fall.

use chrono::{DateTime, Local};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

use super::value::Value;

/// Run-time variables: may change between calls, never shadow a define.
pub type Vars = BTreeMap<String, Value>;

#[derive(Clone, Debug, Default)]
pub struct Defines {
    entries: Vec<(String, Value)>,
    index: HashMap<String, usize>,
}

impl Defines {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flatten layers into one namespace; a later layer entry replaces an earlier one.
    pub fn merged<I>(layers: I) -> Self
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut defines = Defines::new();
        for (name, value) in layers {
            match defines.index.get(&name) {
                Some(&i) => defines.entries[i].1 = value,
                None => {
                    defines.index.insert(name.clone(), defines.entries.len());
                    defines.entries.push((name, value));
                }
            }
        }
        defines
    }

    /// Add `name` unless it already exists. Returns true when added.
    pub fn define(&mut self, name: &str, value: Value) -> bool {
        if self.index.contains_key(name) {
            return false;
        }
        self.index.insert(name.to_string(), self.entries.len());
        self.entries.push((name.to_string(), value));
        true
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.index.get(name).map(|&i| &self.entries[i].1)
    }

    /// Lookup limited to the first `horizon` defines.
    pub fn get_within(&self, name: &str, horizon: usize) -> Option<&Value> {
        match self.index.get(name) {
            Some(&i) if i < horizon => Some(&self.entries[i].1),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Per-file facts used to synthesize the built-in defines.
pub struct FileFacts<'a> {
    pub path: &'a Path,
    pub content_type: &'a str,
    /// 1-based position of this file in the run.
    pub index: usize,
    pub run_started: DateTime<Local>,
    pub elapsed: Duration,
}

/// Built-in defines for one file: DATE, TIMESTAMP, ELAPSED, MIMETYPE, FILE, INDEX, BASENAME, DIRNAME.
pub fn synthesized(facts: &FileFacts<'_>) -> Vec<(String, Value)> {
    let name = |s: &str| s.to_string();
    let basename = facts
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let dirname = facts
        .path
        .parent()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    vec![
        (name("DATE"), Value::Str(facts.run_started.to_rfc3339())),
        (
            name("TIMESTAMP"),
            Value::Number(facts.run_started.timestamp_millis() as f64),
        ),
        (
            name("ELAPSED"),
            Value::Number(facts.elapsed.as_millis() as f64),
        ),
        (name("MIMETYPE"), Value::Str(facts.content_type.to_string())),
        (name("FILE"), Value::Str(facts.path.display().to_string())),
        (name("INDEX"), Value::from(facts.index)),
        (name("BASENAME"), Value::Str(basename)),
        (name("DIRNAME"), Value::Str(dirname)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_layers_replace_but_keep_position() {
        let d = Defines::merged([
            ("A".to_string(), Value::from("1")),
            ("B".to_string(), Value::from("2")),
            ("A".to_string(), Value::from("3")),
        ]);
        assert_eq!(d.len(), 2);
        assert_eq!(d.get("A"), Some(&Value::from("3")));
        assert_eq!(d.get_within("B", 1), None);
        assert_eq!(d.get_within("A", 1), Some(&Value::from("3")));
    }

    #[test]
    fn define_never_overwrites() {
        let mut d = Defines::new();
        assert!(d.define("X", Value::from("first")));
        assert!(!d.define("X", Value::from("second")));
        assert_eq!(d.get("X"), Some(&Value::from("first")));
    }

    #[test]
    fn synthesized_names() {
        let facts = FileFacts {
            path: Path::new("/in/dir/page.html"),
            content_type: "text/html",
            index: 3,
            run_started: Local::now(),
            elapsed: Duration::from_millis(12),
        };
        let d = Defines::merged(synthesized(&facts));
        assert_eq!(d.get("BASENAME"), Some(&Value::from("page.html")));
        assert_eq!(d.get("DIRNAME"), Some(&Value::from("/in/dir")));
        assert_eq!(d.get("INDEX"), Some(&Value::Number(3.0)));
        assert_eq!(d.get("ELAPSED"), Some(&Value::Number(12.0)));
        assert_eq!(d.get("MIMETYPE"), Some(&Value::from("text/html")));
    }
}
