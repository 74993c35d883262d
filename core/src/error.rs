//! Shared error type for the libmtext crates.
//!
//! Every fallible operation in the workspace reports one of the kinds
//! below. Codec failures carry an additional `ConvResult` inside the
//! converter itself; the `Coding` variant here is the `Result`-level
//! surface of the same failure.

use std::fmt;

/// Library-wide error kinds.
#[derive(Debug)]
pub enum Error {
    /// Symbol table misuse (bad name, etc.).
    Symbol(String),
    /// M-text invariant violated.
    MText(String),
    /// Text-property invariant violated.
    TextProp(String),
    /// Invalid character code.
    Char(String),
    /// Char-table misuse.
    CharTable(String),
    /// Charset definition or codec failure.
    Charset(String),
    /// Coding-system definition or conversion failure.
    Coding(String),
    /// Out-of-bounds position or range.
    Range(String),
    /// Plist syntax error with source position.
    Plist {
        line: usize,
        col: usize,
        msg: String,
    },
    /// Database manifest or entry failure.
    Database(String),
    /// Input-method definition or interpreter failure.
    Im(String),
    /// Underlying I/O failure.
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Symbol(m) => write!(f, "symbol: {}", m),
            Error::MText(m) => write!(f, "mtext: {}", m),
            Error::TextProp(m) => write!(f, "text property: {}", m),
            Error::Char(m) => write!(f, "character: {}", m),
            Error::CharTable(m) => write!(f, "char-table: {}", m),
            Error::Charset(m) => write!(f, "charset: {}", m),
            Error::Coding(m) => write!(f, "coding: {}", m),
            Error::Range(m) => write!(f, "range: {}", m),
            Error::Plist { line, col, msg } => {
                write!(f, "plist: {} at line {}, column {}", msg, line, col)
            }
            Error::Database(m) => write!(f, "database: {}", m),
            Error::Im(m) => write!(f, "input method: {}", m),
            Error::Io(e) => write!(f, "io: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_position_for_plist_errors() {
        let e = Error::Plist {
            line: 3,
            col: 14,
            msg: "unterminated string".to_string(),
        };
        let s = e.to_string();
        assert!(s.contains("line 3"));
        assert!(s.contains("column 14"));
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let e: Error = io.into();
        assert!(matches!(e, Error::Io(_)));
    }
}
