//! Abstract syntax tree.
//!
//! The tree is owned by the compile step: the parser builds it, lowering
//! walks it, and the whole forest is dropped once bytecode exists. Every
//! node records the source range it was parsed from (1-indexed, inclusive).

use std::fmt;

/// Source range of a node, first character to last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub first_line: u32,
    pub first_col: u32,
    pub last_line: u32,
    pub last_col: u32,
}

impl Span {
    pub fn point(line: u32, col: u32) -> Self {
        Span { first_line: line, first_col: col, last_line: line, last_col: col }
    }

    /// Smallest span covering both inputs.
    pub fn to(self, other: Span) -> Span {
        Span {
            first_line: self.first_line,
            first_col: self.first_col,
            last_line: other.last_line,
            last_col: other.last_col,
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.first_line, self.first_col)
    }
}

/// One compilation unit: the function list.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub funcs: Vec<Func>,
}

impl Program {
    pub fn find_func(&self, name: &str) -> Option<&Func> {
        self.funcs.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Func {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub span: Span,
}

/// Statements.
///
/// `Elif` and `Else` are parsed as their own statements, exactly as they
/// appear in the source; lowering stitches an `If`/`Elif`.../`Else` run into
/// one conditional and rejects orphans.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr { expr: Expr, span: Span },
    Assign { target: Expr, value: Expr, span: Span },
    If { cond: Expr, body: Vec<Stmt>, span: Span },
    Elif { cond: Expr, body: Vec<Stmt>, span: Span },
    Else { body: Vec<Stmt>, span: Span },
    While { cond: Expr, body: Vec<Stmt>, span: Span },
    /// `for (k, v in container)`
    ForKV { key: String, value: String, container: Expr, body: Vec<Stmt>, span: Span },
    /// `for (v in container)`
    ForV { value: String, container: Expr, body: Vec<Stmt>, span: Span },
    /// `for (v in from .. to)`, end exclusive
    ForRange { var: String, from: Expr, to: Expr, body: Vec<Stmt>, span: Span },
    Return { expr: Expr, span: Span },
    Break { span: Span },
    Continue { span: Span },
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Expr { span, .. }
            | Stmt::Assign { span, .. }
            | Stmt::If { span, .. }
            | Stmt::Elif { span, .. }
            | Stmt::Else { span, .. }
            | Stmt::While { span, .. }
            | Stmt::ForKV { span, .. }
            | Stmt::ForV { span, .. }
            | Stmt::ForRange { span, .. }
            | Stmt::Return { span, .. }
            | Stmt::Break { span }
            | Stmt::Continue { span } => *span,
        }
    }
}

/// Binary operators, lowest-to-highest precedence tier noted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Or,  // ||
    And, // &&
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

/// Expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int { value: i32, span: Span },
    Float { value: f64, span: Span },
    Str { value: String, span: Span },
    /// Bare identifier: a parameter or a global symbol.
    Symbol { name: String, span: Span },
    Bin { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr>, span: Span },
    /// Unary minus.
    Neg { operand: Box<Expr>, span: Span },
    /// `base[index]`
    Subscript { base: Box<Expr>, index: Box<Expr>, span: Span },
    /// `base.field`
    Dot { base: Box<Expr>, field: String, span: Span },
    /// `callee(args...)`
    Call { callee: Box<Expr>, args: Vec<Expr>, span: Span },
    /// `recv->method(args...)`
    ThisCall { recv: Box<Expr>, method: String, args: Vec<Expr>, span: Span },
    /// `[items...]`
    ArrayLit { items: Vec<Expr>, span: Span },
    /// `{key: value, ...}`
    DictLit { entries: Vec<(String, Expr)>, span: Span },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Int { span, .. }
            | Expr::Float { span, .. }
            | Expr::Str { span, .. }
            | Expr::Symbol { span, .. }
            | Expr::Bin { span, .. }
            | Expr::Neg { span, .. }
            | Expr::Subscript { span, .. }
            | Expr::Dot { span, .. }
            | Expr::Call { span, .. }
            | Expr::ThisCall { span, .. }
            | Expr::ArrayLit { span, .. }
            | Expr::DictLit { span, .. } => *span,
        }
    }
}

// ===========================================================================
//                          Canonical printer
// ===========================================================================
//
// Prints a tree back to source the parser accepts. Binary and unary
// expressions come out fully parenthesized, so the printed form is a fixed
// point: parsing it and printing again yields the same text. Used by tests
// and tooling; whitespace and comments of the original are not preserved.

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, func) in self.funcs.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{func}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "func {}(", self.name)?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", p.name)?;
        }
        writeln!(f, ") {{")?;
        for stmt in &self.body {
            write_stmt(f, stmt, 1)?;
        }
        writeln!(f, "}}")
    }
}

fn indent(f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
    for _ in 0..depth {
        write!(f, "    ")?;
    }
    Ok(())
}

fn write_block(f: &mut fmt::Formatter<'_>, body: &[Stmt], depth: usize) -> fmt::Result {
    writeln!(f, "{{")?;
    for stmt in body {
        write_stmt(f, stmt, depth + 1)?;
    }
    indent(f, depth)?;
    write!(f, "}}")
}

fn write_stmt(f: &mut fmt::Formatter<'_>, stmt: &Stmt, depth: usize) -> fmt::Result {
    indent(f, depth)?;
    match stmt {
        Stmt::Expr { expr, .. } => writeln!(f, "{expr};"),
        Stmt::Assign { target, value, .. } => writeln!(f, "{target} = {value};"),
        Stmt::If { cond, body, .. } => {
            write!(f, "if ({cond}) ")?;
            write_block(f, body, depth)?;
            writeln!(f)
        }
        Stmt::Elif { cond, body, .. } => {
            write!(f, "else if ({cond}) ")?;
            write_block(f, body, depth)?;
            writeln!(f)
        }
        Stmt::Else { body, .. } => {
            write!(f, "else ")?;
            write_block(f, body, depth)?;
            writeln!(f)
        }
        Stmt::While { cond, body, .. } => {
            write!(f, "while ({cond}) ")?;
            write_block(f, body, depth)?;
            writeln!(f)
        }
        Stmt::ForKV { key, value, container, body, .. } => {
            write!(f, "for ({key}, {value} in {container}) ")?;
            write_block(f, body, depth)?;
            writeln!(f)
        }
        Stmt::ForV { value, container, body, .. } => {
            write!(f, "for ({value} in {container}) ")?;
            write_block(f, body, depth)?;
            writeln!(f)
        }
        Stmt::ForRange { var, from, to, body, .. } => {
            write!(f, "for ({var} in {from}..{to}) ")?;
            write_block(f, body, depth)?;
            writeln!(f)
        }
        Stmt::Return { expr, .. } => writeln!(f, "return {expr};"),
        Stmt::Break { .. } => writeln!(f, "break;"),
        Stmt::Continue { .. } => writeln!(f, "continue;"),
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            BinOp::Or => "||",
            BinOp::And => "&&",
            BinOp::Eq => "==",
            BinOp::Neq => "!=",
            BinOp::Lt => "<",
            BinOp::Lte => "<=",
            BinOp::Gt => ">",
            BinOp::Gte => ">=",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
        };
        write!(f, "{op}")
    }
}

fn escape_str(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    write!(f, "\"")?;
    for ch in s.chars() {
        match ch {
            '\\' => write!(f, "\\\\")?,
            '"' => write!(f, "\\\"")?,
            '\n' => write!(f, "\\n")?,
            '\r' => write!(f, "\\r")?,
            '\t' => write!(f, "\\t")?,
            other => write!(f, "{other}")?,
        }
    }
    write!(f, "\"")
}

/// Whether a dictionary key can print bare (it must lex as a SYMBOL).
fn is_bare_key(key: &str) -> bool {
    let keyword = matches!(
        key,
        "func" | "if" | "else" | "while" | "for" | "in" | "return" | "break" | "continue"
    );
    let mut chars = key.chars();
    let head_ok = chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    head_ok && !keyword && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Int { value, .. } => write!(f, "{value}"),
            Expr::Float { value, .. } => {
                if value.fract() == 0.0 && value.is_finite() {
                    write!(f, "{value:.1}")
                } else {
                    write!(f, "{value}")
                }
            }
            Expr::Str { value, .. } => escape_str(f, value),
            Expr::Symbol { name, .. } => write!(f, "{name}"),
            Expr::Bin { op, lhs, rhs, .. } => write!(f, "({lhs} {op} {rhs})"),
            Expr::Neg { operand, .. } => write!(f, "(-{operand})"),
            Expr::Subscript { base, index, .. } => write!(f, "{base}[{index}]"),
            Expr::Dot { base, field, .. } => write!(f, "{base}.{field}"),
            Expr::Call { callee, args, .. } => {
                write!(f, "{callee}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
            Expr::ThisCall { recv, method, args, .. } => {
                write!(f, "{recv}->{method}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
            Expr::ArrayLit { items, .. } => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Expr::DictLit { entries, .. } => {
                write!(f, "{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    if is_bare_key(key) {
                        write!(f, "{key}: {value}")?;
                    } else {
                        escape_str(f, key)?;
                        write!(f, ": {value}")?;
                    }
                }
                write!(f, "}}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[test]
    fn printed_source_is_a_fixed_point() {
        let source = r#"
func update(self, dt) {
    if (self.hp <= 0) { return 0; }
    else if (self.stunned == 1) { self.stunned = 0; }
    else { self.x = self.x + self.vx * dt; }
    while (self.x > 100) { self.x = self.x - 100.0; }
    for (i in 0..3) { self->tick(i); }
    for (k, v in self.flags) { total = total + v; }
    items = [1, -2.5, "sword", {rare: 1, "drop rate": 0.5}];
    return len(items);
}
"#;
        let first = parse(source).unwrap();
        let printed = first.to_string();
        let reparsed = parse(&printed).expect("printer output parses");
        assert_eq!(reparsed.to_string(), printed);
    }

    #[test]
    fn floats_keep_their_type_when_printed() {
        let program = parse("func f() { return 2.0; }").unwrap();
        let printed = program.to_string();
        assert!(printed.contains("2.0"), "{printed}");
        let again = parse(&printed).unwrap();
        let Stmt::Return { expr: Expr::Float { value, .. }, .. } = &again.funcs[0].body[0] else {
            panic!("float became something else: {printed}");
        };
        assert_eq!(*value, 2.0);
    }

    #[test]
    fn dict_keys_quote_only_when_needed() {
        let program = parse(r#"func f() { return {plain: 1, "two words": 2, "func": 3}; }"#).unwrap();
        let printed = program.to_string();
        assert!(printed.contains("plain: 1"));
        assert!(printed.contains(r#""two words": 2"#));
        assert!(printed.contains(r#""func": 3"#));
        parse(&printed).expect("reparses");
    }

    #[test]
    fn strings_escape_on_the_way_out() {
        let program = parse(r#"func f() { return "a\n\"b\"\\"; }"#).unwrap();
        let printed = program.to_string();
        let again = parse(&printed).unwrap();
        assert_eq!(again.to_string(), printed);
        let Stmt::Return { expr: Expr::Str { value, .. }, .. } = &again.funcs[0].body[0] else {
            panic!()
        };
        assert_eq!(value, "a\n\"b\"\\");
    }
}

