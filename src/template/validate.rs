//! Chunk-boundary validation: decide how much of an unconsumed buffer can be transformed now
//! and which suffix has to wait for more bytes.

use super::grammar::{BlockTag, Grammar, TagSpan};

/// Outcome of validating a buffer. Discriminants are the stable numeric codes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ValidationCode {
    /// No specific condition applies.
    Invalid = -1,
    #[default]
    Unvalidated = 0,
    Valid = 1,
    /// A conditional open tag has no matching close yet.
    BrokenConditional = 2,
    /// An iterate open tag has no matching close yet.
    BrokenIterate = 3,
    /// The buffer ends inside a tag.
    BrokenTag = 4,
    /// The buffer ends with bytes that may be the start of a tag.
    PossibleBrokenTag = 5,
}

impl ValidationCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn is_valid(self) -> bool {
        self == ValidationCode::Valid
    }
}

/// Where to cut the buffer: `[..cut]` is forwarded, `[cut..]` is withheld.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Validation {
    pub code: ValidationCode,
    pub cut: usize,
}

/// Per-file working state for [`validate`]. Never shared between files.
#[derive(Debug, Default)]
pub struct Scratch {
    last_code: ValidationCode,
    tags: Vec<TagSpan>,
    cond_open: Vec<usize>,
    iter_open: Vec<usize>,
}

impl Scratch {
    pub fn last_code(&self) -> ValidationCode {
        self.last_code
    }

    /// Tags found by the last validation (empty after [`Scratch::reset`]).
    pub fn last_tags(&self) -> &[TagSpan] {
        &self.tags
    }

    pub fn reset(&mut self) {
        self.last_code = ValidationCode::Unvalidated;
        self.tags.clear();
        self.cond_open.clear();
        self.iter_open.clear();
    }
}

/// Earliest offset at or after `from` where the rest of `text` is a proper prefix of `tag_start`.
fn possible_tag_prefix(text: &[u8], from: usize, tag_start: &[u8]) -> Option<usize> {
    let window = tag_start.len().saturating_sub(1);
    let first = from.max(text.len().saturating_sub(window));
    (first..text.len()).find(|&p| tag_start.starts_with(&text[p..]))
}

/// Classify `text` (withheld suffix plus new chunk) against `grammar`.
///
/// Checks run in order: unclosed conditional, unclosed iterate, unterminated tag, possible tag
/// prefix. The code is the first one that applies; the cut is the earliest break found, so a
/// block is always withheld from its opening tag.
pub fn validate(grammar: &Grammar, text: &[u8], scratch: &mut Scratch) -> Validation {
    scratch.reset();
    scratch.tags.extend(grammar.tags(text));

    for tag in &scratch.tags {
        match BlockTag::of(&text[tag.content_start..tag.content_end]) {
            Some(BlockTag::CondOpen) => scratch.cond_open.push(tag.start),
            Some(BlockTag::CondClose) => {
                scratch.cond_open.pop();
            }
            Some(BlockTag::IterOpen) => scratch.iter_open.push(tag.start),
            Some(BlockTag::IterClose) => {
                scratch.iter_open.pop();
            }
            Some(BlockTag::CondBranch) | None => {}
        }
    }

    let last_end = scratch.tags.last().map(|t| t.end).unwrap_or(0);
    let cond = scratch.cond_open.first().copied();
    let iter = scratch.iter_open.first().copied();
    let broken = grammar.find_tag_start(text, last_end);
    let possible = match broken {
        Some(_) => None,
        None => possible_tag_prefix(text, last_end, grammar.tag_start().as_bytes()),
    };

    let code = if cond.is_some() {
        ValidationCode::BrokenConditional
    } else if iter.is_some() {
        ValidationCode::BrokenIterate
    } else if broken.is_some() {
        ValidationCode::BrokenTag
    } else if possible.is_some() {
        ValidationCode::PossibleBrokenTag
    } else {
        ValidationCode::Valid
    };
    let cut = [cond, iter, broken, possible]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(text.len());

    scratch.last_code = code;
    Validation { code, cut }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::grammar::{Family, grammar};

    fn check(text: &str) -> Validation {
        let mut scratch = Scratch::default();
        validate(grammar(Family::Text), text.as_bytes(), &mut scratch)
    }

    #[test]
    fn prefix_detection_stops_at_last_tag_end() {
        assert_eq!(possible_tag_prefix(b"ab#", 0, b"#{"), Some(2));
        assert_eq!(possible_tag_prefix(b"ab#", 3, b"#{"), None);
        assert_eq!(possible_tag_prefix(b"", 0, b"#{"), None);
        assert_eq!(possible_tag_prefix(b"x<!--", 0, b"<!--{"), Some(1));
    }

    #[test]
    fn nested_blocks_cut_at_outermost_open() {
        let text = "a #{?x}# b #{?y}# c #{?}# d";
        let v = check(text);
        assert_eq!(v.code, ValidationCode::BrokenConditional);
        assert_eq!(v.cut, 2);
    }

    #[test]
    fn earliest_break_wins_across_block_kinds() {
        let text = "#{?c}# x #{~xs:x}# y #{?}# z";
        let v = check(text);
        assert_eq!(v.code, ValidationCode::BrokenIterate);
        assert_eq!(v.cut, text.find("#{~").unwrap_or(0));
    }

    #[test]
    fn scratch_records_last_code() {
        let mut scratch = Scratch::default();
        validate(grammar(Family::Text), b"x #{", &mut scratch);
        assert_eq!(scratch.last_code(), ValidationCode::BrokenTag);
        scratch.reset();
        assert_eq!(scratch.last_code(), ValidationCode::Unvalidated);
        assert!(scratch.last_tags().is_empty());
    }
}
