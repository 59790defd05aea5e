use thiserror::Error;

#[derive(Debug, Error, PartialEq, Clone)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    #[error("malformed number '{lexeme}'")]
    MalformedNumber { lexeme: String, line: usize },
}

impl Error {
    pub fn line(&self) -> usize {
        match self {
            Error::MalformedNumber { line, .. } => *line,
        }
    }
}
