use std::collections::VecDeque;

use phf::{phf_map, Map};

use crate::error::Error;
use crate::token::{Keyword, Literal, Operator, Token, Type};

pub struct Scanner;

impl Scanner {
    const KEYWORDS: Map<&'static str, Type> = phf_map! {
        "print" => Type::Keyword(Keyword::Print),
        "input" => Type::Keyword(Keyword::Input),
        "free" => Type::Keyword(Keyword::Free),
        "true" => Type::Bool,
        "false" => Type::Bool,
        "fun" => Type::Keyword(Keyword::Fun),
        "break" => Type::Keyword(Keyword::Break),
        "return" => Type::Keyword(Keyword::Return),
        "call" => Type::Keyword(Keyword::Call),
        "if" => Type::Keyword(Keyword::If),
        "else" => Type::Keyword(Keyword::Else),
        "elif" => Type::Keyword(Keyword::Elif),
        "repeat" => Type::Keyword(Keyword::Repeat),
        "while" => Type::Keyword(Keyword::While),
        "insert" => Type::Keyword(Keyword::Insert),
        "local" => Type::Keyword(Keyword::Local),
        "string" => Type::Keyword(Keyword::String),
        "int" => Type::Keyword(Keyword::Int),
        "float" => Type::Keyword(Keyword::Float),
        "bool" => Type::Keyword(Keyword::Bool),
        "extern" => Type::Keyword(Keyword::Extern),
    };

    const OPERATOR_CHARS: &'static str = "=+-*/%<>!&|";
    const PUNCTUATION: &'static str = ";(){}[],:";

    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Scanner
    }

    pub fn scan_tokens(&mut self, src: &str) -> TokenStream {
        TokenStream::new(src)
    }
}

// What the characters collected in `pending` will become once the token is closed.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Pending {
    Word,
    Int,
    Float,
}

pub struct TokenStream {
    chars: Vec<char>,
    current: usize,
    line: usize,
    col: usize,

    // The bare word or number being accumulated, with the position it started at.
    pending: String,
    pending_kind: Option<Pending>,
    pending_at: (usize, usize),

    // `Some(quote)` while inside a string opened with `quote`
    string: Option<char>,
    comment: bool,

    // A single character can close a pending token and emit one of its own, so tokens are
    // staged here before the iterator hands them out.
    ready: VecDeque<Token>,
    last: Option<Type>,

    // This represents a token's index in the token stream
    index: usize,

    // Set once the eof token has been staged, so the iterator can tell "input exhausted" apart
    // from "eof emitted".
    eof: bool,
    error: Option<Error>,
}

impl TokenStream {
    pub fn new(src: &str) -> Self {
        TokenStream {
            chars: src.chars().collect(),
            current: 0,
            line: 1,
            col: 0,
            pending: String::new(),
            pending_kind: None,
            pending_at: (1, 0),
            string: None,
            comment: false,
            ready: VecDeque::new(),
            last: None,
            index: 0,
            eof: false,
            error: None,
        }
    }

    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    fn scan_char(&mut self) -> Result<(), Error> {
        let c = self.peek();

        if self.comment {
            self.advance();
            if c == '#' {
                self.comment = false;
            }
            return Ok(());
        }

        if let Some(quote) = self.string {
            self.advance();
            if c == quote {
                self.string = None;
                let text = std::mem::take(&mut self.pending);
                self.emit_at(Type::String, format!("{quote}{text}{quote}"), Literal::Str(text));
            } else {
                self.pending.push(c);
            }
            return Ok(());
        }

        match self.pending_kind {
            Some(Pending::Int) | Some(Pending::Float) => {
                if c.is_ascii_digit() || c == '_' {
                    let c = self.advance();
                    self.pending.push(c);
                    return Ok(());
                }
                if c == '.' {
                    let c = self.advance();
                    self.pending.push(c);
                    self.pending_kind = Some(Pending::Float);
                    return Ok(());
                }
                // Anything else ends the number and is then scanned on its own.
                self.flush()?;
            }
            _ => {}
        }

        match c {
            '#' => {
                self.flush()?;
                self.advance();
                self.comment = true;
            }
            '"' | '\'' => {
                self.flush()?;
                self.pending_at = (self.line, self.col);
                self.advance();
                self.string = Some(c);
            }
            c if c.is_whitespace() => {
                self.flush()?;
                self.advance();
            }
            c if Scanner::PUNCTUATION.contains(c) => {
                self.flush()?;
                self.pending_at = (self.line, self.col);
                self.advance();
                let ty = match c {
                    ';' => Type::Separator,
                    '(' => Type::OpenExpression,
                    ')' => Type::CloseExpression,
                    '{' => Type::OpenBlock,
                    '}' => Type::CloseBlock,
                    '[' => Type::OpenIndex,
                    ']' => Type::CloseIndex,
                    ',' => Type::Comma,
                    _ => Type::Colon,
                };
                self.emit_at(ty, c.to_string(), Literal::Nil);
            }
            'π' => {
                self.flush()?;
                self.pending_at = (self.line, self.col);
                self.advance();
                self.emit_at(Type::Name, c.to_string(), Literal::Nil);
            }
            c if self.starts_number(c) => {
                self.pending_at = (self.line, self.col);
                self.pending_kind = Some(Pending::Int);
                let c = self.advance();
                self.pending.push(c);
            }
            c if Scanner::OPERATOR_CHARS.contains(c) => {
                self.flush()?;
                self.operator();
            }
            _ => {
                if self.pending_kind.is_none() {
                    self.pending_at = (self.line, self.col);
                    self.pending_kind = Some(Pending::Word);
                }
                let c = self.advance();
                self.pending.push(c);
            }
        }

        Ok(())
    }

    fn starts_number(&self, c: char) -> bool {
        if self.pending_kind.is_some() {
            return false;
        }
        if c.is_ascii_digit() {
            return true;
        }
        c == '-'
            && self.peek_next().is_ascii_digit()
            && !self.last.map_or(false, Type::is_value_like)
    }

    fn operator(&mut self) {
        self.pending_at = (self.line, self.col);
        let first = self.advance();
        let mut lexeme = first.to_string();

        let next = self.peek();
        if Scanner::OPERATOR_CHARS.contains(next) {
            let pair = format!("{first}{next}");
            if Operator::from_lexeme(&pair).is_some() {
                self.advance();
                lexeme = pair;
            }
        }

        match Operator::from_lexeme(&lexeme) {
            Some(op) => self.emit_at(Type::Operator(op), lexeme, Literal::Nil),
            // A lone `&` or `|` means nothing on its own and is kept as a bare word.
            None => self.emit_at(Type::Name, lexeme, Literal::Nil),
        }
    }

    // Closes whatever bare word or number is pending.
    fn flush(&mut self) -> Result<(), Error> {
        let kind = match self.pending_kind.take() {
            Some(kind) => kind,
            None => return Ok(()),
        };
        let lexeme = std::mem::take(&mut self.pending);

        match kind {
            Pending::Word => match Scanner::KEYWORDS.get(lexeme.as_str()) {
                Some(Type::Bool) => {
                    let value = Literal::Bool(lexeme == "true");
                    self.emit_at(Type::Bool, lexeme, value);
                }
                Some(ty) => self.emit_at(*ty, lexeme, Literal::Nil),
                None => self.emit_at(Type::Name, lexeme, Literal::Nil),
            },
            Pending::Int => {
                let value = Self::digits(&lexeme).parse::<i64>().map_err(|_| {
                    Error::MalformedNumber {
                        lexeme: lexeme.clone(),
                        line: self.pending_at.0,
                    }
                })?;
                self.emit_at(Type::Int, lexeme, Literal::Int(value));
            }
            Pending::Float => {
                let value = Self::digits(&lexeme).parse::<f64>().map_err(|_| {
                    Error::MalformedNumber {
                        lexeme: lexeme.clone(),
                        line: self.pending_at.0,
                    }
                })?;
                self.emit_at(Type::Float, lexeme, Literal::Float(value));
            }
        }

        Ok(())
    }

    fn digits(lexeme: &str) -> String {
        lexeme.chars().filter(|c| *c != '_').collect()
    }

    fn peek(&self) -> char {
        self.chars.get(self.current).copied().unwrap_or('\0')
    }

    fn peek_next(&self) -> char {
        self.chars.get(self.current + 1).copied().unwrap_or('\0')
    }

    fn advance(&mut self) -> char {
        let res = self.peek();
        self.current += 1;
        if res == '\n' {
            self.line += 1;
            self.col = 0;
        } else {
            self.col += 1;
        }
        res
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.chars.len()
    }

    fn emit_at(&mut self, ty: Type, lexeme: String, value: Literal) {
        let (line, col) = self.pending_at;
        let token = Token::new(ty, lexeme, line, col, self.index, value);
        self.index += 1;
        self.last = Some(ty);
        self.ready.push_back(token);
    }

    fn finish(&mut self) -> Result<(), Error> {
        if let Some(quote) = self.string.take() {
            // Unterminated strings are tolerated and keep what was read so far.
            let text = std::mem::take(&mut self.pending);
            let lexeme = format!("{quote}{text}");
            self.emit_at(Type::String, lexeme, Literal::Str(text));
        } else {
            self.flush()?;
        }

        self.pending_at = (self.line, self.col);
        self.emit_at(Type::Eof, String::new(), Literal::Nil);
        Ok(())
    }
}

impl Iterator for TokenStream {
    type Item = Token;

    fn next(&mut self) -> Option<Self::Item> {
        if self.error.is_some() {
            return None;
        }

        while self.ready.is_empty() && !self.eof {
            let res = if self.is_at_end() {
                self.eof = true;
                self.finish()
            } else {
                self.scan_char()
            };

            if let Err(err) = res {
                self.error = Some(err);
                return None;
            }
        }

        self.ready.pop_front()
    }
}
