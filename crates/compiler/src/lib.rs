//! Linguine compiler library.
//!
//! Front end of the Linguine scripting language: source text → tokens →
//! AST → bytecode image. The runtime crate drives this through
//! [`compile`]; tools can also run the stages separately for diagnostics.
//!
//! ```rust
//! let image = lingc::compile("func main() { return 6 * 7; }").unwrap();
//! assert_eq!(image.functions[0].name, "main");
//! ```

pub mod ast;
pub mod error;
pub mod lexer;
pub mod lower;
pub mod parser;

pub use ast::{Program, Span};
pub use error::{CompileError, Error, LexError, SyntaxError};
pub use lexer::{Token, TokenKind, tokenize};
pub use lower::lower;
pub use parser::parse;

use linguine_core::Image;

/// Compile one source text into a bytecode image.
pub fn compile(source: &str) -> Result<Image, Error> {
    let program = parse(source)?;
    let image = lower(&program)?;
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_runs_end_to_end() {
        let image = compile("func main() { return 1 + 2; }").unwrap();
        assert_eq!(image.functions.len(), 1);
        image.functions[0].validate().unwrap();
    }

    #[test]
    fn stage_errors_are_distinguished() {
        assert!(matches!(compile("func main() { @ }"), Err(Error::Lex(_))));
        assert!(matches!(compile("func main() { return; }"), Err(Error::Syntax(_))));
        assert!(matches!(compile("func main() { break; }"), Err(Error::Compile(_))));
    }

    #[test]
    fn error_line_accessor() {
        let err = compile("func main() {\n  return 1 +;\n}").unwrap_err();
        assert_eq!(err.line(), Some(2));
    }
}
