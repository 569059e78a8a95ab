//! Tag delimiter grammars and the detectors derived from them.
//!
//! One immutable [`Grammar`] per content family, shared by every file of that family.
//! Nothing in here is mutable; per-file validation scratch lives in [`super::validate::Scratch`].

use regex::Regex;
use regex::bytes::Regex as BytesRegex;
use std::path::Path;
use std::sync::{LazyLock, OnceLock};

/// Content families; each owns one delimiter pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Family {
    Text,
    Markup,
    Script,
}

impl Family {
    /// Family for a file extension (case-insensitive). Unknown extensions are `Text`.
    pub fn for_extension(ext: &str) -> Family {
        match ext.to_ascii_lowercase().as_str() {
            "html" | "htm" | "xhtml" | "xml" | "svg" => Family::Markup,
            "js" | "mjs" | "cjs" | "ts" | "css" | "scss" | "less" | "php" | "c" | "h" | "cpp"
            | "hpp" | "java" | "go" => Family::Script,
            _ => Family::Text,
        }
    }

    pub fn for_path(path: &Path) -> Family {
        path.extension()
            .and_then(|e| e.to_str())
            .map(Family::for_extension)
            .unwrap_or(Family::Text)
    }

    fn delimiters(self) -> (&'static str, &'static str) {
        match self {
            Family::Text => ("#{", "}#"),
            Family::Markup => ("<!--{", "}-->"),
            Family::Script => ("/*{", "}*/"),
        }
    }
}

/// A complete tag found by [`Grammar::tags`]: byte offsets into the scanned buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TagSpan {
    /// Offset of tagStart.
    pub start: usize,
    /// Offset just past tagEnd.
    pub end: usize,
    /// Content between the delimiters.
    pub content_start: usize,
    pub content_end: usize,
}

/// Block role of a tag, read from the first bytes of its content.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockTag {
    CondOpen,
    /// `??expr` or bare `??`.
    CondBranch,
    CondClose,
    IterOpen,
    IterClose,
}

impl BlockTag {
    pub fn of(content: &[u8]) -> Option<BlockTag> {
        let blank = |rest: &[u8]| rest.iter().all(u8::is_ascii_whitespace);
        match content.first()? {
            b'?' => {
                let rest = &content[1..];
                Some(if rest.first() == Some(&b'?') {
                    BlockTag::CondBranch
                } else if blank(rest) {
                    BlockTag::CondClose
                } else {
                    BlockTag::CondOpen
                })
            }
            b'~' => Some(if blank(&content[1..]) {
                BlockTag::IterClose
            } else {
                BlockTag::IterOpen
            }),
            _ => None,
        }
    }
}

/// Delimiter pair plus the tag scanner built from it.
#[derive(Debug)]
pub struct Grammar {
    family: Family,
    tag_start: &'static str,
    tag_end: &'static str,
    scanner: BytesRegex,
}

impl Grammar {
    fn new(family: Family) -> Grammar {
        let (tag_start, tag_end) = family.delimiters();
        let pattern = format!(
            "(?s){}(.*?){}",
            regex::escape(tag_start),
            regex::escape(tag_end)
        );
        // Delimiters are escaped literals, so the pattern always compiles.
        let scanner = BytesRegex::new(&pattern).expect("tag scanner pattern");
        Grammar {
            family,
            tag_start,
            tag_end,
            scanner,
        }
    }

    pub fn family(&self) -> Family {
        self.family
    }

    pub fn tag_start(&self) -> &'static str {
        self.tag_start
    }

    pub fn tag_end(&self) -> &'static str {
        self.tag_end
    }

    /// Every complete tag in `text`, left to right; the first tagEnd after a tagStart closes it.
    pub fn tags<'t>(&'t self, text: &'t [u8]) -> impl Iterator<Item = TagSpan> + 't {
        self.scanner.captures_iter(text).filter_map(|caps| {
            let whole = caps.get(0)?;
            let inner = caps.get(1)?;
            Some(TagSpan {
                start: whole.start(),
                end: whole.end(),
                content_start: inner.start(),
                content_end: inner.end(),
            })
        })
    }

    /// Offset of the first tagStart at or after `from`.
    pub fn find_tag_start(&self, text: &[u8], from: usize) -> Option<usize> {
        let needle = self.tag_start.as_bytes();
        if from >= text.len() {
            return None;
        }
        text[from..]
            .windows(needle.len())
            .position(|w| w == needle)
            .map(|p| p + from)
    }
}

static GRAMMARS: OnceLock<[Grammar; 3]> = OnceLock::new();

fn registry() -> &'static [Grammar; 3] {
    GRAMMARS.get_or_init(|| {
        [
            Grammar::new(Family::Text),
            Grammar::new(Family::Markup),
            Grammar::new(Family::Script),
        ]
    })
}

/// Shared grammar for a family.
pub fn grammar(family: Family) -> &'static Grammar {
    let all = registry();
    match family {
        Family::Text => &all[0],
        Family::Markup => &all[1],
        Family::Script => &all[2],
    }
}

/// Shared grammar for a file path, by extension.
pub fn grammar_for_path(path: &Path) -> &'static Grammar {
    grammar(Family::for_path(path))
}

/// Content patterns for the non-block directives, compiled once.
pub(crate) struct DirectivePatterns {
    /// `##NAME:raw#` / `##NAME=expr#` (content after the leading `##`).
    pub define: Regex,
    /// `def.NAME = expr` inside a use tag.
    pub use_assign: Regex,
    /// `expr : item [: index]` inside an iterate-open tag.
    pub iterate: Regex,
}

pub(crate) static DIRECTIVES: LazyLock<DirectivePatterns> = LazyLock::new(|| DirectivePatterns {
    define: Regex::new(r"(?s)^\s*([\w.$]+)\s*(:|=)(.*)#$").unwrap(),
    use_assign: Regex::new(r"(?s)^\s*def\.([\w$]+)\s*=([^=].*)$").unwrap(),
    iterate: Regex::new(r"(?s)^(.+?)\s*:\s*([\w$]+)\s*(?::\s*([\w$]+))?\s*$").unwrap(),
});
