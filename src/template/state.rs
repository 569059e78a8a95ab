//! Per-file template state: withheld suffix, validation scratch, defines and variables.

use std::path::{Path, PathBuf};

use super::TemplateError;
use super::defines::{Defines, Vars};
use super::engine::TemplateEngine;
use super::grammar::Grammar;
use super::validate::{Scratch, ValidationCode, validate};
use super::value::Value;

/// Transformed bytes ready to write, plus the validation code that produced them.
#[derive(Debug, Default)]
pub struct Fragment {
    pub bytes: Vec<u8>,
    pub code: ValidationCode,
}

/// State for one input file, created on its first chunk and dropped when its output closes.
#[derive(Debug)]
pub struct TemplateState {
    path: PathBuf,
    engine: Option<TemplateEngine>,
    defines: Defines,
    vars: Vars,
    pending: Vec<u8>,
    scratch: Scratch,
    last_code: ValidationCode,
}

impl TemplateState {
    /// Transforming state using `grammar`, with the file's merged defines.
    pub fn new(path: &Path, grammar: &'static Grammar, defines: Defines, vars: Vars) -> Self {
        Self {
            path: path.to_path_buf(),
            engine: Some(TemplateEngine::new(grammar)),
            defines,
            vars,
            pending: Vec::new(),
            scratch: Scratch::default(),
            last_code: ValidationCode::Unvalidated,
        }
    }

    /// State that forwards bytes untouched (content type not eligible for transformation).
    pub fn passthrough(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            engine: None,
            defines: Defines::new(),
            vars: Vars::new(),
            pending: Vec::new(),
            scratch: Scratch::default(),
            last_code: ValidationCode::Unvalidated,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_passthrough(&self) -> bool {
        self.engine.is_none()
    }

    pub fn grammar(&self) -> Option<&'static Grammar> {
        self.engine.as_ref().map(TemplateEngine::grammar)
    }

    pub fn defines(&self) -> &Defines {
        &self.defines
    }

    pub fn vars(&self) -> &Vars {
        &self.vars
    }

    /// Set a run-time variable for later calls. Defines of the same name still win.
    pub fn set_var(&mut self, name: &str, value: Value) {
        self.vars.insert(name.to_string(), value);
    }

    /// Bytes withheld from the previous call, waiting for the next chunk.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    pub fn last_code(&self) -> ValidationCode {
        self.last_code
    }

    /// Append `chunk` to the withheld suffix, validate, and return the part that is safe to
    /// transform now. The rest stays pending.
    pub fn withhold(&mut self, chunk: &[u8]) -> Vec<u8> {
        let Some(engine) = self.engine else {
            self.last_code = ValidationCode::Valid;
            return chunk.to_vec();
        };
        self.pending.extend_from_slice(chunk);
        let verdict = validate(engine.grammar(), &self.pending, &mut self.scratch);
        self.last_code = verdict.code;
        self.scratch.reset();
        if verdict.cut == self.pending.len() {
            std::mem::take(&mut self.pending)
        } else {
            self.pending.drain(..verdict.cut).collect()
        }
    }

    /// Feed one chunk; returns the transformed part that can be written now.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Fragment, TemplateError> {
        let forward = self.withhold(chunk);
        let code = self.last_code;
        let bytes = self.transform(&forward)?;
        Ok(Fragment { bytes, code })
    }

    /// End of input: transform whatever is still withheld.
    pub fn finish(&mut self) -> Result<Vec<u8>, TemplateError> {
        let rest = std::mem::take(&mut self.pending);
        self.transform(&rest)
    }

    fn transform(&mut self, raw: &[u8]) -> Result<Vec<u8>, TemplateError> {
        match self.engine {
            Some(engine) if !raw.is_empty() => engine.apply(raw, &mut self.defines, &self.vars),
            _ => Ok(raw.to_vec()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::grammar::{Family, grammar};

    #[test]
    fn passthrough_forwards_everything() {
        let mut state = TemplateState::passthrough(Path::new("a.bin"));
        let out = state.feed(b"#{ not a tag").unwrap();
        assert_eq!(out.bytes, b"#{ not a tag");
        assert!(state.pending().is_empty());
        assert!(state.finish().unwrap().is_empty());
    }

    #[test]
    fn withheld_tag_start_completes_next_chunk() {
        let defines = Defines::merged([("X".to_string(), Value::from("y"))]);
        let mut state = TemplateState::new(
            Path::new("a.txt"),
            grammar(Family::Text),
            defines,
            Vars::new(),
        );
        let first = state.feed(b"ab#").unwrap();
        assert_eq!(first.bytes, b"ab");
        assert_eq!(first.code, ValidationCode::PossibleBrokenTag);
        assert_eq!(state.pending(), b"#");
        let second = state.feed(b"{X}#!").unwrap();
        assert_eq!(second.bytes, b"y!");
        assert_eq!(second.code, ValidationCode::Valid);
    }

    #[test]
    fn finish_flushes_unterminated_tag_text() {
        let mut state = TemplateState::new(
            Path::new("a.txt"),
            grammar(Family::Text),
            Defines::new(),
            Vars::new(),
        );
        assert!(state.feed(b"tail #").unwrap().bytes == b"tail ");
        assert_eq!(state.finish().unwrap(), b"#");
    }
}
