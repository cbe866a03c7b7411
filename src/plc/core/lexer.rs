//! Structured Text tokenizer.
//!
//! - Whitespace and `//` line comments are dropped.
//! - Keywords are upper case and reserved; everything else matching `[A-Za-z_][A-Za-z0-9_]*` is an identifier.
//! - `T#`/`TIME#` duration literals are folded into a single token measured in milliseconds.

use std::fmt;

use super::parser::ParseError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Keyword {
    Program,
    EndProgram,
    Var,
    VarInput,
    VarOutput,
    EndVar,
    Bool,
    Int,
    Real,
    Time,
    If,
    Then,
    Elsif,
    Else,
    EndIf,
    And,
    Or,
    Not,
    True,
    False,
}

impl Keyword {
    pub fn from_word(word: &str) -> Option<Self> {
        let keyword = match word {
            "PROGRAM" => Keyword::Program,
            "END_PROGRAM" => Keyword::EndProgram,
            "VAR" => Keyword::Var,
            "VAR_INPUT" => Keyword::VarInput,
            "VAR_OUTPUT" => Keyword::VarOutput,
            "END_VAR" => Keyword::EndVar,
            "BOOL" => Keyword::Bool,
            "INT" => Keyword::Int,
            "REAL" => Keyword::Real,
            "TIME" => Keyword::Time,
            "IF" => Keyword::If,
            "THEN" => Keyword::Then,
            "ELSIF" => Keyword::Elsif,
            "ELSE" => Keyword::Else,
            "END_IF" => Keyword::EndIf,
            "AND" => Keyword::And,
            "OR" => Keyword::Or,
            "NOT" => Keyword::Not,
            "TRUE" => Keyword::True,
            "FALSE" => Keyword::False,
            _ => return None,
        };
        Some(keyword)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Keyword::Program => "PROGRAM",
            Keyword::EndProgram => "END_PROGRAM",
            Keyword::Var => "VAR",
            Keyword::VarInput => "VAR_INPUT",
            Keyword::VarOutput => "VAR_OUTPUT",
            Keyword::EndVar => "END_VAR",
            Keyword::Bool => "BOOL",
            Keyword::Int => "INT",
            Keyword::Real => "REAL",
            Keyword::Time => "TIME",
            Keyword::If => "IF",
            Keyword::Then => "THEN",
            Keyword::Elsif => "ELSIF",
            Keyword::Else => "ELSE",
            Keyword::EndIf => "END_IF",
            Keyword::And => "AND",
            Keyword::Or => "OR",
            Keyword::Not => "NOT",
            Keyword::True => "TRUE",
            Keyword::False => "FALSE",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Token {
    Ident(String),
    Keyword(Keyword),
    Number(f64),
    /// milliseconds
    Duration(i64),
    Assign,
    Colon,
    Semicolon,
    Comma,
    LParen,
    RParen,
    Plus,
    Minus,
    Star,
    Slash,
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    Ne,
    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(name) => write!(f, "identifier '{name}'"),
            Token::Keyword(keyword) => write!(f, "'{}'", keyword.as_str()),
            Token::Number(value) => write!(f, "number {value}"),
            Token::Duration(ms) => write!(f, "duration T#{ms}ms"),
            Token::Assign => write!(f, "':='"),
            Token::Colon => write!(f, "':'"),
            Token::Semicolon => write!(f, "';'"),
            Token::Comma => write!(f, "','"),
            Token::LParen => write!(f, "'('"),
            Token::RParen => write!(f, "')'"),
            Token::Plus => write!(f, "'+'"),
            Token::Minus => write!(f, "'-'"),
            Token::Star => write!(f, "'*'"),
            Token::Slash => write!(f, "'/'"),
            Token::Gt => write!(f, "'>'"),
            Token::Lt => write!(f, "'<'"),
            Token::Ge => write!(f, "'>='"),
            Token::Le => write!(f, "'<='"),
            Token::Eq => write!(f, "'='"),
            Token::Ne => write!(f, "'<>'"),
            Token::Eof => write!(f, "end of input"),
        }
    }
}

/// 1-based source position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pos {
    pub line: u32,
    pub column: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub pos: Pos,
}

pub fn tokenize(source: &str) -> Result<Vec<SpannedToken>, ParseError> {
    Lexer::new(source).run()
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    source: &'a str,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.char_indices().peekable(),
            source,
            line: 1,
            column: 1,
        }
    }

    fn run(mut self) -> Result<Vec<SpannedToken>, ParseError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia();
            let pos = self.pos();
            let Some(&(start, ch)) = self.chars.peek() else {
                tokens.push(SpannedToken {
                    token: Token::Eof,
                    pos,
                });
                return Ok(tokens);
            };

            let token = if ch.is_ascii_alphabetic() || ch == '_' {
                self.word(start, pos)?
            } else if ch.is_ascii_digit() {
                Token::Number(self.number(pos)?)
            } else {
                self.symbol(ch, pos)?
            };
            tokens.push(SpannedToken { token, pos });
        }
    }

    fn pos(&self) -> Pos {
        Pos {
            line: self.line,
            column: self.column,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let (_, ch) = self.chars.next()?;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|&(_, ch)| ch)
    }

    fn peek_second(&self) -> Option<char> {
        let mut ahead = self.chars.clone();
        ahead.next();
        ahead.next().map(|(_, ch)| ch)
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek_char() {
                Some(ch) if ch.is_whitespace() => {
                    self.bump();
                }
                Some('/') if self.peek_second() == Some('/') => {
                    while let Some(ch) = self.peek_char() {
                        if ch == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => return,
            }
        }
    }

    fn word(&mut self, start: usize, pos: Pos) -> Result<Token, ParseError> {
        let mut end = start;
        while let Some(&(idx, ch)) = self.chars.peek() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                end = idx + ch.len_utf8();
                self.bump();
            } else {
                break;
            }
        }
        let source = self.source;
        let word = &source[start..end];

        if (word == "T" || word == "TIME") && self.peek_char() == Some('#') {
            self.bump();
            return Ok(Token::Duration(self.duration(pos)?));
        }

        Ok(match Keyword::from_word(word) {
            Some(keyword) => Token::Keyword(keyword),
            None => Token::Ident(word.to_string()),
        })
    }

    fn digits(&mut self, out: &mut String) {
        while let Some(ch) = self.peek_char() {
            if ch.is_ascii_digit() {
                out.push(ch);
                self.bump();
            } else {
                break;
            }
        }
    }

    /// `\d+(\.\d+)?`
    fn number(&mut self, pos: Pos) -> Result<f64, ParseError> {
        let mut text = String::new();
        self.digits(&mut text);
        if self.peek_char() == Some('.')
            && self.peek_second().is_some_and(|ch| ch.is_ascii_digit())
        {
            text.push('.');
            self.bump();
            self.digits(&mut text);
        }
        text.parse::<f64>().map_err(|_| ParseError::InvalidNumber {
            text: text.clone(),
            line: pos.line,
            column: pos.column,
        })
    }

    /// Unit segments after `T#`, e.g. `1h2m3s400ms`.
    fn duration(&mut self, pos: Pos) -> Result<i64, ParseError> {
        let invalid = |text: String| ParseError::InvalidDuration {
            text,
            line: pos.line,
            column: pos.column,
        };

        let mut total_ms = 0.0_f64;
        let mut text = String::new();
        let mut segments = 0;
        while self.peek_char().is_some_and(|ch| ch.is_ascii_digit()) {
            let amount = self.number(pos)?;
            text.push_str(&amount.to_string());

            let mut unit = String::new();
            while let Some(ch) = self.peek_char() {
                if ch.is_ascii_alphabetic() {
                    unit.push(ch);
                    self.bump();
                } else {
                    break;
                }
            }
            text.push_str(&unit);

            let factor = match unit.to_ascii_lowercase().as_str() {
                "d" => 86_400_000.0,
                "h" => 3_600_000.0,
                "m" => 60_000.0,
                "s" => 1_000.0,
                "ms" => 1.0,
                _ => return Err(invalid(text)),
            };
            total_ms += amount * factor;
            segments += 1;

            // IEC allows `_` between segments.
            if self.peek_char() == Some('_') {
                self.bump();
            }
        }

        if segments == 0 {
            return Err(invalid(text));
        }
        Ok(total_ms.trunc() as i64)
    }

    fn symbol(&mut self, ch: char, pos: Pos) -> Result<Token, ParseError> {
        self.bump();
        let token = match ch {
            ':' => {
                if self.peek_char() == Some('=') {
                    self.bump();
                    Token::Assign
                } else {
                    Token::Colon
                }
            }
            ';' => Token::Semicolon,
            ',' => Token::Comma,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '=' => Token::Eq,
            '>' => {
                if self.peek_char() == Some('=') {
                    self.bump();
                    Token::Ge
                } else {
                    Token::Gt
                }
            }
            '<' => match self.peek_char() {
                Some('=') => {
                    self.bump();
                    Token::Le
                }
                Some('>') => {
                    self.bump();
                    Token::Ne
                }
                _ => Token::Lt,
            },
            other => {
                return Err(ParseError::UnexpectedChar {
                    ch: other,
                    line: pos.line,
                    column: pos.column,
                });
            }
        };
        Ok(token)
    }
}
