use std::io;

use tag_core::Error as CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    #[error("[line {line}] parser error: {msg}")]
    ParserError { line: usize, msg: String },

    // A node is missing a child it needs (operand, body block, argument list).
    #[error("[line {line}] spelling error: {msg}")]
    SpellingError { line: usize, msg: String },

    #[error("[line {line}] name error: {msg}")]
    NameError { line: usize, msg: String },

    #[error("[line {line}] arity error: {msg}")]
    ArityError { line: usize, msg: String },

    #[error("[line {line}] operator error: {msg}")]
    OperatorError { line: usize, msg: String },

    // Raised instead of overflowing the native stack on runaway recursion.
    #[error("[line {line}] recursion error: {msg}")]
    RecursionError { line: usize, msg: String },

    #[error("[line {line}] io error: {source}")]
    IoError { line: usize, source: io::Error },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Parser,
    Spelling,
    Name,
    Arity,
    Operator,
    Recursion,
    Io,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ParserError { .. } => ErrorKind::Parser,
            Error::SpellingError { .. } => ErrorKind::Spelling,
            Error::NameError { .. } => ErrorKind::Name,
            Error::ArityError { .. } => ErrorKind::Arity,
            Error::OperatorError { .. } => ErrorKind::Operator,
            Error::RecursionError { .. } => ErrorKind::Recursion,
            Error::IoError { .. } => ErrorKind::Io,
        }
    }

    pub fn line(&self) -> usize {
        match self {
            Error::ParserError { line, .. }
            | Error::SpellingError { line, .. }
            | Error::NameError { line, .. }
            | Error::ArityError { line, .. }
            | Error::OperatorError { line, .. }
            | Error::RecursionError { line, .. }
            | Error::IoError { line, .. } => *line,
        }
    }

    pub(crate) fn parser(line: usize, msg: impl Into<String>) -> Self {
        Error::ParserError {
            line,
            msg: msg.into(),
        }
    }

    pub(crate) fn spelling(line: usize, msg: impl Into<String>) -> Self {
        Error::SpellingError {
            line,
            msg: msg.into(),
        }
    }

    pub(crate) fn name(line: usize, msg: impl Into<String>) -> Self {
        Error::NameError {
            line,
            msg: msg.into(),
        }
    }

    pub(crate) fn arity(line: usize, msg: impl Into<String>) -> Self {
        Error::ArityError {
            line,
            msg: msg.into(),
        }
    }

    pub(crate) fn operator(line: usize, msg: impl Into<String>) -> Self {
        Error::OperatorError {
            line,
            msg: msg.into(),
        }
    }

    pub(crate) fn recursion(line: usize, msg: impl Into<String>) -> Self {
        Error::RecursionError {
            line,
            msg: msg.into(),
        }
    }

    pub(crate) fn io(line: usize, source: io::Error) -> Self {
        Error::IoError { line, source }
    }
}

impl From<CoreError> for Error {
    fn from(value: CoreError) -> Self {
        Error::ParserError {
            line: value.line(),
            msg: value.to_string(),
        }
    }
}

pub type TagResult<T> = Result<T, Error>;
