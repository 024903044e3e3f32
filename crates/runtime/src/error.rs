//! Runtime error taxonomy.
//!
//! Errors abort the current frame and unwind to the host entrypoint; there
//! is no in-language catch. The runtime records the failure site in an
//! [`ErrorRecord`] the host can read back through `last_error`.

use lingc::{CompileError, LexError, SyntaxError};
use linguine_core::FormatError;
use std::fmt;

/// Everything a `Runtime` call can surface to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    // Load-time
    Lex(LexError),
    Syntax(SyntaxError),
    Compile(CompileError),
    /// A bytecode image failed to decode.
    Format(FormatError),

    // Run-time
    Type(String),
    /// Unbound global symbol.
    Name(String),
    /// Out-of-range array/dict access or missing key.
    Index(String),
    DivideByZero,
    /// Call depth exceeded.
    StackOverflow,
    /// The host set the cancel flag.
    Cancelled,
    /// A native callable reported failure.
    Host(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Lex(e) => write!(f, "{e}"),
            Error::Syntax(e) => write!(f, "{e}"),
            Error::Compile(e) => write!(f, "{e}"),
            Error::Format(e) => write!(f, "{e}"),
            Error::Type(msg) => write!(f, "type error: {msg}"),
            Error::Name(name) => write!(f, "name error: '{name}' is not defined"),
            Error::Index(msg) => write!(f, "index error: {msg}"),
            Error::DivideByZero => write!(f, "division by zero"),
            Error::StackOverflow => write!(f, "call stack overflow"),
            Error::Cancelled => write!(f, "cancelled by host"),
            Error::Host(msg) => write!(f, "host error: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<lingc::Error> for Error {
    fn from(e: lingc::Error) -> Self {
        match e {
            lingc::Error::Lex(e) => Error::Lex(e),
            lingc::Error::Syntax(e) => Error::Syntax(e),
            lingc::Error::Compile(e) => Error::Compile(e),
        }
    }
}

impl From<FormatError> for Error {
    fn from(e: FormatError) -> Self {
        Error::Format(e)
    }
}

/// Where the most recent error happened, for the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    pub file: String,
    pub line: u32,
    pub message: String,
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.file, self.line, self.message)
    }
}
