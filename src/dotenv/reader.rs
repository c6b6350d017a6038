//! Hand-written dotenv tokenizer.
//!
//! The reader alternates between two states: reading a name (or a comment)
//! and reading the value that follows `=`. The first non-blank character of
//! a value picks its capture mode; quoted, JSON and YAML captures may span
//! several lines.

use super::error::{ParseError, ParseErrorKind};
use super::tokens::{Capture, Token, TokenKind};
use serde::{Deserialize, Serialize};

/// Which multi-line value syntaxes the reader accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReaderOptions {
    pub allow_backticks: bool,
    pub allow_json: bool,
    pub allow_yaml: bool,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            allow_backticks: true,
            allow_json: false,
            allow_yaml: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Name,
    Value,
}

/// Pull-based tokenizer over dotenv text.
///
/// Each call to [`Reader::read`] advances exactly one token. The reader also
/// implements [`Iterator`] and stops after the first error.
pub struct Reader {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    state: State,
    options: ReaderOptions,
    current: Option<Token>,
    failed: bool,
}

impl Reader {
    pub fn new(text: &str, options: ReaderOptions) -> Self {
        Self {
            chars: text.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            state: State::Name,
            options,
            current: None,
            failed: false,
        }
    }

    /// Advance one token. Returns `Ok(false)` once the input is exhausted.
    pub fn read(&mut self) -> Result<bool, ParseError> {
        self.current = self.next_token()?;
        Ok(self.current.is_some())
    }

    /// The token produced by the last successful [`Reader::read`].
    pub fn current(&self) -> Option<&Token> {
        self.current.as_ref()
    }

    /// Read the next token, or `None` at end of input.
    pub fn next_token(&mut self) -> Result<Option<Token>, ParseError> {
        match self.state {
            State::Name => self.read_name_or_comment(),
            State::Value => {
                self.state = State::Name;
                self.read_value().map(Some)
            }
        }
    }

    // ------------------------------------------------------------------
    // Character cursor
    // ------------------------------------------------------------------

    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn at_line_break(&self) -> bool {
        match self.peek(0) {
            Some('\n') => true,
            Some('\r') => self.peek(1) == Some('\n'),
            _ => false,
        }
    }

    /// Consume the rest of the current line including its line break and
    /// return it without the break.
    fn take_line(&mut self) -> String {
        let mut line = String::new();
        while let Some(c) = self.bump() {
            if c == '\n' {
                break;
            }
            line.push(c);
        }
        if line.ends_with('\r') {
            line.pop();
        }
        line
    }

    // ------------------------------------------------------------------
    // Names and comments
    // ------------------------------------------------------------------

    fn read_name_or_comment(&mut self) -> Result<Option<Token>, ParseError> {
        while matches!(self.peek(0), Some(c) if c.is_whitespace()) {
            self.bump();
        }

        let (line, column) = (self.line, self.column);
        match self.peek(0) {
            None => return Ok(None),
            Some('#') => {
                self.bump();
                let text = self.take_line();
                return Ok(Some(Token::new(TokenKind::Comment, text, line, column)));
            }
            Some(_) => {}
        }

        let mut name = String::new();
        let mut terminated = false;
        loop {
            match self.peek(0) {
                Some('=') => {
                    if name.is_empty() {
                        return Err(ParseError::new(
                            ParseErrorKind::MissingName,
                            format!("The environment variable name is missing on line {}", self.line),
                            self.line,
                            self.column,
                        ));
                    }
                    self.bump();
                    self.state = State::Value;
                    return Ok(Some(Token::new(TokenKind::Name, name, line, column)));
                }
                None => return Err(self.missing_assignment(&name)),
                Some(_) if self.at_line_break() => return Err(self.missing_assignment(&name)),
                Some(c) if c.is_ascii_alphanumeric() || c == '_' => {
                    if terminated {
                        return Err(ParseError::new(
                            ParseErrorKind::UnexpectedCharacter,
                            format!(
                                "Unexpected character '{c}' on line {}, col {} after environment variable name was terminated with whitespace",
                                self.line, self.column
                            ),
                            self.line,
                            self.column,
                        ));
                    }
                    name.push(c);
                    self.bump();
                }
                Some(c) if c.is_whitespace() => {
                    if !name.is_empty() {
                        terminated = true;
                    }
                    self.bump();
                }
                Some(c) => {
                    return Err(ParseError::new(
                        ParseErrorKind::UnexpectedCharacter,
                        format!(
                            "Unexpected character '{c}' on line {}, col {} for environment variable name",
                            self.line, self.column
                        ),
                        self.line,
                        self.column,
                    ));
                }
            }
        }
    }

    fn missing_assignment(&self, name: &str) -> ParseError {
        ParseError::new(
            ParseErrorKind::MissingAssignment,
            format!(
                "Unexpected {name} token on line {}, missing value or assignment token '='",
                self.line
            ),
            self.line,
            self.column,
        )
    }

    // ------------------------------------------------------------------
    // Values
    // ------------------------------------------------------------------

    fn read_value(&mut self) -> Result<Token, ParseError> {
        while matches!(self.peek(0), Some(c) if c.is_whitespace() && c != '\n' && c != '\r') {
            self.bump();
        }

        let (line, column) = (self.line, self.column);
        if self.peek(0).is_none() || self.at_line_break() {
            return Ok(Token::new(TokenKind::String(Capture::None), "", line, column));
        }

        match self.peek(0) {
            Some('"') => {
                self.bump();
                self.read_escaped('"', Capture::DoubleQuote, line, column)
            }
            Some('\'') => {
                self.bump();
                self.read_single_quoted(line, column)
            }
            Some('`') if self.options.allow_backticks => {
                self.bump();
                self.read_escaped('`', Capture::Backtick, line, column)
            }
            Some('{') if self.options.allow_json => self.read_json(line, column),
            Some('-') if self.options.allow_yaml && self.at_front_matter() => {
                self.read_yaml(line, column)
            }
            _ => Ok(self.read_scalar(line, column)),
        }
    }

    fn unterminated(&self, what: &str, line: usize) -> ParseError {
        ParseError::new(
            ParseErrorKind::UnterminatedCapture,
            format!("Unexpected end of input while capturing {what} value that started on line {line}"),
            self.line,
            self.column,
        )
    }

    fn read_escaped(
        &mut self,
        delimiter: char,
        capture: Capture,
        line: usize,
        column: usize,
    ) -> Result<Token, ParseError> {
        let what = if delimiter == '"' { "double-quoted" } else { "backtick" };
        let mut text = String::new();

        loop {
            let Some(c) = self.bump() else {
                return Err(self.unterminated(what, line));
            };

            if c == delimiter {
                return Ok(Token::new(TokenKind::String(capture), text, line, column));
            }

            if c != '\\' {
                text.push(c);
                continue;
            }

            match self.peek(0) {
                None => return Err(self.unterminated(what, line)),
                Some('u') => {
                    self.bump();
                    self.read_unicode_escape(&mut text)?;
                }
                Some(next) => {
                    let escaped = match next {
                        'n' => Some('\n'),
                        'r' => Some('\r'),
                        't' => Some('\t'),
                        'b' => Some('\u{8}'),
                        '\\' | '"' | '\'' => Some(next),
                        d if d == delimiter => Some(d),
                        _ => None,
                    };
                    match escaped {
                        Some(e) => {
                            self.bump();
                            text.push(e);
                        }
                        // Unknown escape: keep the backslash, let the next
                        // character be read normally.
                        None => text.push('\\'),
                    }
                }
            }
        }
    }

    fn read_unicode_escape(&mut self, text: &mut String) -> Result<(), ParseError> {
        let mut hex = String::with_capacity(4);
        while hex.len() < 4 {
            match self.peek(0) {
                None => {
                    return Err(ParseError::new(
                        ParseErrorKind::UnterminatedEscape,
                        "Unexpected end of input inside a \\u escape sequence",
                        self.line,
                        self.column,
                    ));
                }
                Some(h) if h.is_ascii_hexdigit() => {
                    hex.push(h);
                    self.bump();
                }
                Some(_) => break,
            }
        }

        let decoded = (hex.len() == 4)
            .then(|| u32::from_str_radix(&hex, 16).ok())
            .flatten()
            .and_then(char::from_u32);

        match decoded {
            Some(ch) => text.push(ch),
            None => {
                text.push_str("\\u");
                text.push_str(&hex);
            }
        }
        Ok(())
    }

    fn read_single_quoted(&mut self, line: usize, column: usize) -> Result<Token, ParseError> {
        let mut text = String::new();
        loop {
            let Some(c) = self.bump() else {
                return Err(self.unterminated("single-quoted", line));
            };
            match c {
                '\\' if self.peek(0) == Some('\'') => {
                    self.bump();
                    text.push('\'');
                }
                '\'' => {
                    return Ok(Token::new(
                        TokenKind::String(Capture::SingleQuote),
                        text,
                        line,
                        column,
                    ));
                }
                _ => text.push(c),
            }
        }
    }

    fn read_json(&mut self, line: usize, column: usize) -> Result<Token, ParseError> {
        let mut text = String::new();
        loop {
            let Some(c) = self.bump() else {
                return Err(self.unterminated("JSON", line));
            };
            let closes = c == '}' && text.ends_with('\n');
            text.push(c);
            if closes {
                return Ok(Token::new(TokenKind::Json, text, line, column));
            }
        }
    }

    fn at_front_matter(&self) -> bool {
        let dashes = (0..3).all(|i| self.peek(i) == Some('-'));
        let break_after = match self.peek(3) {
            Some('\n') => true,
            Some('\r') => self.peek(4) == Some('\n'),
            _ => false,
        };
        dashes && break_after
    }

    fn read_yaml(&mut self, line: usize, column: usize) -> Result<Token, ParseError> {
        // Opening `---` and its line break.
        self.take_line();

        let mut text = String::new();
        loop {
            if self.peek(0).is_none() {
                return Err(self.unterminated("YAML", line));
            }
            let content = self.take_line();
            if content == "---" {
                if text.ends_with('\n') {
                    text.pop();
                }
                return Ok(Token::new(TokenKind::Yaml, text, line, column));
            }
            text.push_str(&content);
            text.push('\n');
        }
    }

    fn read_scalar(&mut self, line: usize, column: usize) -> Token {
        let mut text = String::new();
        while let Some(c) = self.peek(0) {
            if self.at_line_break() || (c == '#' && !text.is_empty()) {
                break;
            }
            text.push(c);
            self.bump();
        }

        let trimmed = text.trim_end().to_string();
        Token::scalar(trimmed, line, column)
    }
}

impl Iterator for Reader {
    type Item = Result<Token, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_token() {
            Ok(token) => token.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tokens(text: &str, options: ReaderOptions) -> Vec<Token> {
        Reader::new(text, options)
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    fn kinds_and_text(text: &str, options: ReaderOptions) -> Vec<(TokenKind, String)> {
        tokens(text, options)
            .into_iter()
            .map(|t| (t.kind, t.text))
            .collect()
    }

    fn first_error(text: &str, options: ReaderOptions) -> ParseError {
        Reader::new(text, options)
            .find_map(|t| t.err())
            .expect("expected a parse error")
    }

    #[test]
    fn read_advances_one_token_at_a_time() {
        let mut reader = Reader::new("A=1\n", ReaderOptions::default());
        assert!(reader.read().unwrap());
        assert_eq!(reader.current().unwrap().kind, TokenKind::Name);
        assert!(reader.read().unwrap());
        assert_eq!(reader.current().unwrap().kind, TokenKind::Number);
        assert!(!reader.read().unwrap());
        assert!(reader.current().is_none());
    }

    #[test]
    fn simple_pairs_and_comments() {
        let got = kinds_and_text(
            "# header\nNAME=value\n  OTHER = spaced value   \n",
            ReaderOptions::default(),
        );
        assert_eq!(
            got,
            vec![
                (TokenKind::Comment, " header".to_string()),
                (TokenKind::Name, "NAME".to_string()),
                (TokenKind::String(Capture::None), "value".to_string()),
                (TokenKind::Name, "OTHER".to_string()),
                (TokenKind::String(Capture::None), "spaced value".to_string()),
            ]
        );
    }

    #[test]
    fn inline_comment_ends_scalar() {
        let got = kinds_and_text("A=abc # trailing\n", ReaderOptions::default());
        assert_eq!(got[1], (TokenKind::String(Capture::None), "abc".to_string()));
        assert_eq!(got[2], (TokenKind::Comment, " trailing".to_string()));
    }

    #[test]
    fn empty_value_before_line_break() {
        let got = kinds_and_text("A=\nB=2", ReaderOptions::default());
        assert_eq!(
            got,
            vec![
                (TokenKind::Name, "A".to_string()),
                (TokenKind::String(Capture::None), String::new()),
                (TokenKind::Name, "B".to_string()),
                (TokenKind::Number, "2".to_string()),
            ]
        );
    }

    #[test]
    fn double_quote_escapes() {
        let got = kinds_and_text(r#"A="line\nnext\ttab \\ \"q\" \'s\'""#, ReaderOptions::default());
        assert_eq!(got[1].0, TokenKind::String(Capture::DoubleQuote));
        assert_eq!(got[1].1, "line\nnext\ttab \\ \"q\" 's'");
    }

    #[test]
    fn double_quote_spans_lines_and_keeps_whitespace() {
        let got = kinds_and_text("A=\"  first\nsecond \"\nB=x", ReaderOptions::default());
        assert_eq!(got[1].1, "  first\nsecond ");
        assert_eq!(got[2].1, "B");
    }

    #[test]
    fn unicode_escape() {
        let got = kinds_and_text(r#"A="caf\u00e9 \u263A""#, ReaderOptions::default());
        assert_eq!(got[1].1, "café ☺");
    }

    #[test]
    fn short_unicode_escape_is_kept_literally() {
        let got = kinds_and_text(r#"A="\u12x""#, ReaderOptions::default());
        assert_eq!(got[1].1, "\\u12x");
    }

    #[test]
    fn single_quote_is_literal() {
        let got = kinds_and_text(r"A='no \n escape \'here\''", ReaderOptions::default());
        assert_eq!(got[1].0, TokenKind::String(Capture::SingleQuote));
        assert_eq!(got[1].1, "no \\n escape 'here'");
    }

    #[test]
    fn backtick_uses_double_quote_escapes() {
        let got = kinds_and_text("A=`one\\ntwo \\` three`", ReaderOptions::default());
        assert_eq!(got[1].0, TokenKind::String(Capture::Backtick));
        assert_eq!(got[1].1, "one\ntwo ` three");
    }

    #[test]
    fn backticks_can_be_disabled() {
        let options = ReaderOptions {
            allow_backticks: false,
            ..ReaderOptions::default()
        };
        let got = kinds_and_text("A=`x`", options);
        assert_eq!(got[1], (TokenKind::String(Capture::None), "`x`".to_string()));
    }

    #[test]
    fn json_capture_closes_on_brace_at_line_start() {
        let options = ReaderOptions {
            allow_json: true,
            ..ReaderOptions::default()
        };
        let got = kinds_and_text("CFG={\n  \"a\": {\"b\": 1}\n}\nNEXT=1", options);
        assert_eq!(got[1].0, TokenKind::Json);
        assert_eq!(got[1].1, "{\n  \"a\": {\"b\": 1}\n}");
        assert_eq!(got[2].1, "NEXT");
    }

    #[test]
    fn json_brace_is_scalar_when_disabled() {
        let got = kinds_and_text("CFG={a}", ReaderOptions::default());
        assert_eq!(got[1], (TokenKind::String(Capture::None), "{a}".to_string()));
    }

    #[test]
    fn yaml_front_matter_capture() {
        let options = ReaderOptions {
            allow_yaml: true,
            ..ReaderOptions::default()
        };
        let got = kinds_and_text("DOC=---\nkey: value\nlist:\n  - a\n---\nNEXT=1\n", options);
        assert_eq!(got[1].0, TokenKind::Yaml);
        assert_eq!(got[1].1, "key: value\nlist:\n  - a");
        assert_eq!(got[2].1, "NEXT");
    }

    #[test]
    fn dashes_without_line_break_are_scalar() {
        let options = ReaderOptions {
            allow_yaml: true,
            ..ReaderOptions::default()
        };
        let got = kinds_and_text("A=---x", options);
        assert_eq!(got[1], (TokenKind::String(Capture::None), "---x".to_string()));
    }

    #[test]
    fn token_positions() {
        let got = tokens("\n  KEY=value", ReaderOptions::default());
        assert_eq!((got[0].line, got[0].column), (2, 3));
        assert_eq!((got[1].line, got[1].column), (2, 7));
    }

    #[test]
    fn crlf_line_endings() {
        let got = kinds_and_text("A=1\r\nB=two\r\n", ReaderOptions::default());
        assert_eq!(got[1].1, "1");
        assert_eq!(got[3].1, "two");
    }

    #[test]
    fn empty_name_is_fatal() {
        let err = first_error("=value", ReaderOptions::default());
        assert_eq!(err.kind, ParseErrorKind::MissingName);
        assert_eq!(err.line, 1);
    }

    #[test]
    fn name_after_whitespace_is_fatal() {
        let err = first_error("MY NAME=value", ReaderOptions::default());
        assert_eq!(err.kind, ParseErrorKind::UnexpectedCharacter);
        assert!(err.message.contains("'N'"));
    }

    #[test]
    fn hash_after_leading_whitespace_starts_the_value() {
        let pairs = kinds_and_text("A= #x\nB=#y # note\n", ReaderOptions::default());
        assert_eq!(pairs[1], (TokenKind::String(Capture::None), "#x".to_string()));
        assert_eq!(pairs[3], (TokenKind::String(Capture::None), "#y".to_string()));
    }

    #[test]
    fn invalid_name_character_is_fatal() {
        let err = first_error("MY-NAME=value", ReaderOptions::default());
        assert_eq!(err.kind, ParseErrorKind::UnexpectedCharacter);
    }

    #[test]
    fn name_without_assignment_is_fatal() {
        let err = first_error("NAME\nOTHER=1", ReaderOptions::default());
        assert_eq!(err.kind, ParseErrorKind::MissingAssignment);
        let err = first_error("NAME", ReaderOptions::default());
        assert_eq!(err.kind, ParseErrorKind::MissingAssignment);
    }

    #[test]
    fn unterminated_captures_are_fatal() {
        let err = first_error("A=\"open", ReaderOptions::default());
        assert_eq!(err.kind, ParseErrorKind::UnterminatedCapture);
        let err = first_error("A='open", ReaderOptions::default());
        assert_eq!(err.kind, ParseErrorKind::UnterminatedCapture);

        let json = ReaderOptions {
            allow_json: true,
            ..ReaderOptions::default()
        };
        let err = first_error("A={\"a\": 1}", json);
        assert_eq!(err.kind, ParseErrorKind::UnterminatedCapture);

        let yaml = ReaderOptions {
            allow_yaml: true,
            ..ReaderOptions::default()
        };
        let err = first_error("A=---\nkey: value\n", yaml);
        assert_eq!(err.kind, ParseErrorKind::UnterminatedCapture);

        let err = first_error("A=\"\\u12", ReaderOptions::default());
        assert_eq!(err.kind, ParseErrorKind::UnterminatedEscape);
    }

    #[test]
    fn iterator_stops_after_error() {
        let mut reader = Reader::new("=x\nA=1", ReaderOptions::default());
        assert!(reader.next().unwrap().is_err());
        assert!(reader.next().is_none());
    }
}
