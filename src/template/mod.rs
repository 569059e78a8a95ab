//! Chunk-boundary-safe template engine.
//!
//! Tags look like `tagStart content tagEnd` with delimiters chosen per content family
//! (see [`grammar`]). Bytes arrive in arbitrary chunks; [`TemplateState`] withholds any suffix
//! that could belong to an incomplete tag or block and transforms the rest.

pub mod defines;
pub mod engine;
pub mod expr;
pub mod grammar;
pub mod state;
pub mod validate;
pub mod value;

pub use defines::{Defines, FileFacts, Vars, synthesized};
pub use engine::{TemplateEngine, encode_html};
pub use grammar::{Family, Grammar, grammar, grammar_for_path};
pub use state::{Fragment, TemplateState};
pub use validate::{Scratch, Validation, ValidationCode, validate};
pub use value::Value;

use thiserror::Error;

/// Transform-time failure inside a tag; aborts only the file being transformed.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("invalid expression `{expr}`: {message}")]
    Syntax { expr: String, message: String },
    #[error("unbalanced {block} tag at byte {offset}")]
    Unbalanced { block: &'static str, offset: usize },
    #[error("cannot iterate over {found} value of `{expr}`")]
    NotIterable { expr: String, found: &'static str },
    #[error("tag at byte {offset} is not valid UTF-8")]
    Utf8 { offset: usize },
}
