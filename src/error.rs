use std::fmt;

use serde::{Deserialize, Serialize};

/// Builds a `SmaliError` of the given kind from a message or a format string.
#[macro_export]
macro_rules! err {
    ($kind:ident, $msg:literal) => {
        $crate::error::SmaliError::new($crate::error::ErrorKind::$kind, $msg)
    };
    ($kind:ident, $fmtstr:literal, $($args:tt)*) => {
        $crate::error::SmaliError::new($crate::error::ErrorKind::$kind, &format!($fmtstr, $($args)*))
    };
    ($kind:ident @ $pos:expr, $msg:literal) => {
        $crate::error::SmaliError::at($crate::error::ErrorKind::$kind, $pos, $msg)
    };
    ($kind:ident @ $pos:expr, $fmtstr:literal, $($args:tt)*) => {
        $crate::error::SmaliError::at($crate::error::ErrorKind::$kind, $pos, &format!($fmtstr, $($args)*))
    };
}

/// Returns early with a `SmaliError`, same arguments as `err!`.
#[macro_export]
macro_rules! fail {
    ($($args:tt)*) => {
        return Err($crate::err!($($args)*))
    };
}

/// Position of a token or line in the source, both values are 1-based.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Self {
        Position { line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

/// The category of a `SmaliError`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed token: unterminated string, bad numeric literal.
    Lex,
    /// Unexpected token or directive for the current reader state.
    Syntax,
    /// A scope was not closed by its `.end` directive.
    Unterminated,
    /// A semantic check failed, only raised with validation enabled.
    Validation,
    /// A delegate does not have the capability set of its holder.
    CapabilityMismatch,
    /// Malformed type or method descriptor.
    Descriptor,
    /// Unparsable literal value.
    Literal,
    /// Raised by a visitor callback to abort the parse.
    Visitor,
    KeyNotFound,
    Decrypt,
    Io,
}

impl ErrorKind {
    /// Errors caused by noisy input which the reader may skip over in `ErrorMode::Ignore`.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Lex | ErrorKind::Syntax | ErrorKind::Unterminated | ErrorKind::Descriptor
        )
    }

    pub fn to_str(&self) -> &str {
        match self {
            ErrorKind::Lex => "lex error",
            ErrorKind::Syntax => "syntax error",
            ErrorKind::Unterminated => "unterminated construct",
            ErrorKind::Validation => "validation error",
            ErrorKind::CapabilityMismatch => "capability mismatch",
            ErrorKind::Descriptor => "invalid descriptor",
            ErrorKind::Literal => "invalid literal",
            ErrorKind::Visitor => "visitor error",
            ErrorKind::KeyNotFound => "key not found",
            ErrorKind::Decrypt => "decrypt error",
            ErrorKind::Io => "i/o error",
        }
    }
}

/* Error type shared by the reader, writer, value model and cipher */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmaliError {
    pub kind: ErrorKind,
    pub details: String,
    pub position: Option<Position>,
}

impl SmaliError {
    pub fn new(kind: ErrorKind, msg: &str) -> SmaliError {
        SmaliError {
            kind,
            details: msg.to_string(),
            position: None,
        }
    }

    pub fn at(kind: ErrorKind, position: Position, msg: &str) -> SmaliError {
        SmaliError {
            kind,
            details: msg.to_string(),
            position: Some(position),
        }
    }

    /// Convenience for visitor implementations that want to stop the reader.
    pub fn visitor(msg: &str) -> SmaliError {
        SmaliError::new(ErrorKind::Visitor, msg)
    }

    /// Attaches a position unless the error already carries one.
    pub fn with_position(mut self, position: Position) -> SmaliError {
        if self.position.is_none() {
            self.position = Some(position);
        }
        self
    }
}

impl fmt::Display for SmaliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind.to_str())?;
        if let Some(p) = &self.position {
            write!(f, " at {}", p)?;
        }
        write!(f, ": {}", self.details)
    }
}

impl std::error::Error for SmaliError {}

impl From<std::io::Error> for SmaliError {
    fn from(e: std::io::Error) -> Self {
        SmaliError::new(ErrorKind::Io, &e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_position() {
        let e = err!(Syntax @ Position::new(3, 1), "unexpected directive '{}'", ".foo");
        assert_eq!(e.to_string(), "syntax error at line 3, column 1: unexpected directive '.foo'");
        let e = err!(Literal, "bad");
        assert_eq!(e.to_string(), "invalid literal: bad");
    }

    #[test]
    fn recoverable_kinds() {
        assert!(ErrorKind::Syntax.is_recoverable());
        assert!(ErrorKind::Unterminated.is_recoverable());
        assert!(!ErrorKind::Validation.is_recoverable());
        assert!(!ErrorKind::Literal.is_recoverable());
        assert!(!ErrorKind::CapabilityMismatch.is_recoverable());
    }

    #[test]
    fn with_position_keeps_first() {
        let e = SmaliError::at(ErrorKind::Lex, Position::new(1, 2), "x").with_position(Position::new(9, 9));
        assert_eq!(e.position, Some(Position::new(1, 2)));
    }
}
