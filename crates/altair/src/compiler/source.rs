//! Command sources.
//!
//! A `CommandSource` hands the compiler one script line at a time and
//! owns the tokenizer for the current line. Multi-line constructs are
//! handled by the compiler calling [`CommandSource::read_next_line`]
//! while it is inside a block.

use crate::{error::Error, tokenizer::Tokenizer};

/// Source text encoding, as selected by `Option Encoding(...)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceEncoding {
    /// UTF-8, the default. Undecodable bytes are replaced.
    #[default]
    Utf8,
    /// ISO 8859-1: every byte maps to the code point of the same value.
    Latin1,
}

impl SourceEncoding {
    /// Resolves a charset name. Accepts the common aliases.
    #[must_use]
    pub fn by_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Some(Self::Utf8),
            "latin1" | "latin-1" | "iso-8859-1" => Some(Self::Latin1),
            _ => None,
        }
    }

    /// Decodes one raw line.
    #[must_use]
    pub fn decode(self, raw: &[u8]) -> String {
        match self {
            Self::Utf8 => String::from_utf8_lossy(raw).into_owned(),
            Self::Latin1 => raw.iter().map(|&b| b as char).collect(),
        }
    }
}

/// Shared state of every command source: the tokenizer for the current
/// line, the line counter, and the end-of-input flag.
#[derive(Debug)]
pub struct SourceState {
    tokenizer: Tokenizer,
    line_nr: u32,
    eof: bool,
}

impl SourceState {
    fn new() -> Self {
        Self {
            tokenizer: Tokenizer::new("").expect("empty line always tokenizes"),
            line_nr: 0,
            eof: false,
        }
    }

    /// Installs the next line, advancing the line counter.
    pub fn set_next_line(&mut self, line: &str) -> Result<(), Error> {
        self.line_nr += 1;
        self.tokenizer = Tokenizer::new(line)?;
        Ok(())
    }

    /// Marks end of input.
    pub fn set_eof(&mut self) {
        self.eof = true;
    }
}

/// Stream of script lines with an embedded tokenizer.
pub trait CommandSource {
    /// Advances to the next line, or flags end of input.
    fn read_next_line(&mut self) -> Result<(), Error>;

    /// Changes the charset for subsequent lines. Returns false when this
    /// source kind does not support re-encoding.
    fn set_encoding(&mut self, encoding: SourceEncoding) -> bool;

    /// Attaches this source's position to an error.
    fn add_trace_to(&self, error: &mut Error);

    /// Shared state access.
    fn state(&self) -> &SourceState;

    /// Shared state access, mutable.
    fn state_mut(&mut self) -> &mut SourceState;
}

impl dyn CommandSource + '_ {
    /// True after the last line was consumed.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        self.state().eof
    }

    /// 1-based number of the current line.
    #[must_use]
    pub fn line_number(&self) -> u32 {
        self.state().line_nr
    }

    /// The tokenizer positioned on the current line.
    pub fn tokenizer(&mut self) -> &mut Tokenizer {
        &mut self.state_mut().tokenizer
    }
}

/// Command source over in-memory lines. Used for one-liners (console
/// commands, `Eval`) and tests.
#[derive(Debug)]
pub struct MemoryCommandSource {
    state: SourceState,
    lines: Vec<String>,
    index: usize,
}

impl MemoryCommandSource {
    /// Creates an empty source; add lines with
    /// [`MemoryCommandSource::add_line`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: SourceState::new(),
            lines: Vec::new(),
            index: 0,
        }
    }

    /// Creates a source holding a single line.
    #[must_use]
    pub fn with_line(line: impl Into<String>) -> Self {
        let mut source = Self::new();
        source.add_line(line);
        source
    }

    /// Appends a line.
    pub fn add_line(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }
}

impl Default for MemoryCommandSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandSource for MemoryCommandSource {
    fn read_next_line(&mut self) -> Result<(), Error> {
        if self.index < self.lines.len() {
            let line = self.lines[self.index].clone();
            self.index += 1;
            self.state.set_next_line(&line)
        } else {
            self.state.set_eof();
            Ok(())
        }
    }

    fn set_encoding(&mut self, _encoding: SourceEncoding) -> bool {
        false
    }

    fn add_trace_to(&self, _error: &mut Error) {}

    fn state(&self) -> &SourceState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut SourceState {
        &mut self.state
    }
}

/// Command source over the raw bytes of a script file.
///
/// Lines are decoded lazily so an `Option Encoding(...)` on an early line
/// applies to everything after it.
#[derive(Debug)]
pub struct FileCommandSource {
    state: SourceState,
    lines: Vec<Vec<u8>>,
    index: usize,
    file_name: String,
    encoding: SourceEncoding,
}

impl FileCommandSource {
    /// Creates a source over file content.
    #[must_use]
    pub fn new(file_name: impl Into<String>, content: &[u8]) -> Self {
        let lines = content
            .split(|&b| b == b'\n')
            .map(|line| line.strip_suffix(b"\r").unwrap_or(line).to_vec())
            .collect();
        Self {
            state: SourceState::new(),
            lines,
            index: 0,
            file_name: file_name.into(),
            encoding: SourceEncoding::Utf8,
        }
    }
}

impl CommandSource for FileCommandSource {
    fn read_next_line(&mut self) -> Result<(), Error> {
        if self.index < self.lines.len() {
            let line = self.encoding.decode(&self.lines[self.index]);
            self.index += 1;
            self.state.set_next_line(&line)
        } else {
            self.state.set_eof();
            Ok(())
        }
    }

    fn set_encoding(&mut self, encoding: SourceEncoding) -> bool {
        self.encoding = encoding;
        true
    }

    fn add_trace_to(&self, error: &mut Error) {
        error.add_trace(format!(
            "in line {} of file \"{}\"",
            self.state.line_nr, self.file_name
        ));
    }

    fn state(&self) -> &SourceState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut SourceState {
        &mut self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::Token;

    #[test]
    fn test_memory_source() {
        let mut src = MemoryCommandSource::new();
        src.add_line("a");
        src.add_line("b");
        let src: &mut dyn CommandSource = &mut src;
        src.read_next_line().unwrap();
        assert_eq!(src.line_number(), 1);
        assert_eq!(src.tokenizer().current_string(), "A");
        src.read_next_line().unwrap();
        assert_eq!(src.tokenizer().current_string(), "B");
        src.read_next_line().unwrap();
        assert!(src.is_eof());
    }

    #[test]
    fn test_file_source_latin1() {
        let mut src = FileCommandSource::new("t.q", b"'a'\r\n'\xE4'\n");
        assert!(src.set_encoding(SourceEncoding::Latin1));
        let src: &mut dyn CommandSource = &mut src;
        src.read_next_line().unwrap();
        assert_eq!(src.tokenizer().current_token(), Token::String);
        assert_eq!(src.tokenizer().current_string(), "a");
        src.read_next_line().unwrap();
        assert_eq!(src.tokenizer().current_string(), "ä");
    }

    #[test]
    fn test_file_source_trace() {
        let mut src = FileCommandSource::new("t.q", b"1");
        src.read_next_line().unwrap();
        let mut e = Error::new("boom");
        src.add_trace_to(&mut e);
        assert_eq!(e.to_string(), "boom\nin line 1 of file \"t.q\"");
    }

    #[test]
    fn test_encoding_names() {
        assert_eq!(SourceEncoding::by_name("UTF-8"), Some(SourceEncoding::Utf8));
        assert_eq!(
            SourceEncoding::by_name("latin1"),
            Some(SourceEncoding::Latin1)
        );
        assert_eq!(SourceEncoding::by_name("koi8-r"), None);
    }
}
