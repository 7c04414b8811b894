use std::fmt;

/// Check the operand count a builtin received, returning `TernError::Arity` on mismatch.
///
/// # Forms
///
/// ```ignore
/// check_arity!(n, "array-get", 2);    // exactly 2
/// check_arity!(n, "-", 1..);          // 1 or more
/// ```
#[macro_export]
macro_rules! check_arity {
    ($n:expr, $name:expr, $exact:literal) => {
        if $n != $exact {
            return Err($crate::TernError::arity($name, stringify!($exact), $n));
        }
    };
    ($n:expr, $name:expr, $lo:literal ..) => {
        if $n < $lo {
            return Err($crate::TernError::arity(
                $name,
                concat!(stringify!($lo), "+"),
                $n,
            ));
        }
    };
}

/// A 1-based source position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub line: usize,
    pub col: usize,
}

impl Span {
    pub fn new(line: usize, col: usize) -> Self {
        Span { line, col }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TernError {
    #[error("Lex error at {span}: {message}")]
    Lex { message: String, span: Span },

    #[error("Read error at {span}: {message}")]
    Read { message: String, span: Span },

    #[error("Compile error: {0}")]
    Compile(String),

    #[error("Type error: expected {expected}, got {got}")]
    Type { expected: String, got: String },

    #[error("Unbound variable: {0}")]
    Unbound(String),

    #[error("Arity error: {name} expects {expected} args, got {got}")]
    Arity {
        name: String,
        expected: String,
        got: usize,
    },

    #[error("Index out of bounds: index {index}, length {len}")]
    IndexOutOfBounds { index: i64, len: usize },

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Stack underflow in {0}")]
    StackUnderflow(&'static str),

    #[error("Jump target {target} outside code block of length {len}")]
    InvalidJump { target: u64, len: usize },

    #[error("Not a cons cell: {0}")]
    NotCons(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl TernError {
    pub fn lex(message: impl Into<String>, span: Span) -> Self {
        TernError::Lex {
            message: message.into(),
            span,
        }
    }

    pub fn read(message: impl Into<String>, span: Span) -> Self {
        TernError::Read {
            message: message.into(),
            span,
        }
    }

    pub fn compile(msg: impl Into<String>) -> Self {
        TernError::Compile(msg.into())
    }

    pub fn codec(msg: impl Into<String>) -> Self {
        TernError::Codec(msg.into())
    }

    pub fn type_error(expected: impl Into<String>, got: impl Into<String>) -> Self {
        TernError::Type {
            expected: expected.into(),
            got: got.into(),
        }
    }

    pub fn arity(name: impl Into<String>, expected: impl Into<String>, got: usize) -> Self {
        TernError::Arity {
            name: name.into(),
            expected: expected.into(),
            got,
        }
    }

    /// True for errors raised while executing code, as opposed to
    /// errors from the lexer, reader, compiler or codec.
    pub fn is_escape(&self) -> bool {
        matches!(
            self,
            TernError::Type { .. }
                | TernError::Unbound(_)
                | TernError::Arity { .. }
                | TernError::IndexOutOfBounds { .. }
                | TernError::DivisionByZero
                | TernError::StackUnderflow(_)
                | TernError::InvalidJump { .. }
                | TernError::NotCons(_)
                | TernError::Unsupported(_)
        )
    }
}

impl From<std::io::Error> for TernError {
    fn from(err: std::io::Error) -> Self {
        TernError::Io(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TernError>;
