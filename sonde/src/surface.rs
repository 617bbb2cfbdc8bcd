//! Surface language.
//!
//! This is the syntax that definition files are written in: a line-oriented
//! list of type definitions and fields, parsed into the tree below before the
//! resolve pass turns it into a type graph.

use codespan_reporting::diagnostic::{Diagnostic, Label};

use crate::files::FileId;
use crate::source::{ByteRange, StringId};

pub mod lexer;
pub mod parser;

pub use parser::parse_module;

/// A parsed definition file.
#[derive(Debug, Clone)]
pub struct Module {
    pub body: Body,
}

/// The items between a pair of braces (or of a whole file).
#[derive(Debug, Clone)]
pub struct Body {
    pub range: ByteRange,
    pub items: Vec<Item>,
}

#[derive(Debug, Clone)]
pub enum Item {
    /// `:Name Type`, `:Name`, `:Name(A, B) Type` or `:Name Base Type`
    TypeDef(TypeDef),
    /// `name Type`, `outer.inner Type` or `list[].name Type`
    Field {
        range: ByteRange,
        path: Vec<PathSegment>,
        ty: Type,
    },
    /// `_ Type`
    AnonField { range: ByteRange, ty: Type },
    /// `name = expr`
    Computed {
        range: ByteRange,
        name: StringId,
        expr: Expr,
    },
    /// `= expr`
    Return { range: ByteRange, expr: Expr },
    /// `!if cond { ... } !else { ... }`
    If(IfItem),
    /// `yield Type`
    Yield { range: ByteRange, ty: Type },
    /// `!save name`
    Save { range: ByteRange, name: StringId },
    /// `!debug name`
    Debug { range: ByteRange, name: StringId },
    /// `!import name`
    Import(Import),
    /// `!symfile name` (accepted and ignored)
    Symfile { range: ByteRange, module: String },
}

#[derive(Debug, Clone)]
pub struct TypeDef {
    pub range: ByteRange,
    pub name: StringId,
    /// Generic parameters, present on `:Name(A, B) Type` definitions.
    pub params: Vec<StringId>,
    /// The parent type of `:Name Base Type` definitions.
    pub base: Option<(ByteRange, StringId)>,
    /// `None` for payload-less token definitions such as `:End`.
    pub ty: Option<Type>,
}

#[derive(Debug, Clone)]
pub struct IfItem {
    pub range: ByteRange,
    pub cond: Expr,
    pub then: Body,
    pub els: Option<Body>,
}

#[derive(Debug, Clone)]
pub struct Import {
    pub range: ByteRange,
    /// Module name as written; the driver maps it to a file.
    pub module: String,
    /// Filled in by the driver once the imported file has been parsed.
    pub body: Option<Body>,
}

/// One step of a field target: `name`, or `name[]` when the field is
/// assigned element-wise across a list.
#[derive(Debug, Clone)]
pub struct PathSegment {
    pub range: ByteRange,
    pub name: StringId,
    pub each: bool,
}

#[derive(Debug, Clone)]
pub enum Type {
    /// `U8`, `Thing`
    Name(ByteRange, StringId),
    /// `Func(A, B)`
    Call {
        range: ByteRange,
        name: StringId,
        args: Vec<Type>,
    },
    /// `{ ... }`
    Struct(ByteRange, Body),
    /// `[len]Elem` or `[]Elem`
    Array {
        range: ByteRange,
        len: Option<Expr>,
        elem: Box<Type>,
    },
    /// `Scrutinee match { ... }` or `Scrutinee char match { ... }`
    Match {
        range: ByteRange,
        scrutinee: Box<Type>,
        char_match: bool,
        branches: Vec<Branch>,
    },
    /// `@addr Target`
    Pointer {
        range: ByteRange,
        addr: Expr,
        target: Box<Type>,
        /// `|@addr Target`: addressed within the surrounding pipe buffer.
        pipe_relative: bool,
    },
    /// `Left | Right`
    Pipe {
        range: ByteRange,
        left: Box<Type>,
        right: Box<Type>,
    },
    /// `Key -> field.path`
    ForeignKey {
        range: ByteRange,
        inner: Box<Type>,
        path: Vec<StringId>,
    },
    /// `"literal"`
    StringLit(ByteRange, String),
}

impl Type {
    pub fn range(&self) -> ByteRange {
        match self {
            Type::Name(range, _) | Type::StringLit(range, _) | Type::Struct(range, _) => *range,
            Type::Call { range, .. }
            | Type::Array { range, .. }
            | Type::Match { range, .. }
            | Type::Pointer { range, .. }
            | Type::Pipe { range, .. }
            | Type::ForeignKey { range, .. } => *range,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Branch {
    pub range: ByteRange,
    /// `None` for auto-incremented keys.
    pub key: Option<MatchKey>,
    pub arm: BranchArm,
}

#[derive(Debug, Clone)]
pub enum MatchKey {
    Int(ByteRange, i64),
    Str(ByteRange, String),
    Range(ByteRange, i64, i64),
    /// `_ => ...` or `name => ...`; a name binds the discriminant.
    Default(ByteRange, Option<StringId>),
}

#[derive(Debug, Clone)]
pub enum BranchArm {
    Type(Type),
    /// `0x00 => :End Terminator`
    TypeDef(TypeDef),
    /// `1 => =value`
    Computed(ByteRange, Expr),
}

#[derive(Debug, Clone)]
pub enum Expr {
    Name(ByteRange, StringId),
    Int(ByteRange, i64),
    Str(ByteRange, String),
    Unary {
        range: ByteRange,
        op: UnOp,
        operand: Box<Expr>,
    },
    Binary {
        range: ByteRange,
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// `base.name`
    Attr {
        range: ByteRange,
        base: Box<Expr>,
        name: StringId,
    },
    /// `base[index]`
    Index {
        range: ByteRange,
        base: Box<Expr>,
        index: Box<Expr>,
    },
}

impl Expr {
    pub fn range(&self) -> ByteRange {
        match self {
            Expr::Name(range, _) | Expr::Int(range, _) | Expr::Str(range, _) => *range,
            Expr::Unary { range, .. }
            | Expr::Binary { range, .. }
            | Expr::Attr { range, .. }
            | Expr::Index { range, .. } => *range,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UnOp {
    Neg,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
        }
    }

    /// Comparison operators produce booleans; the rest produce a value of
    /// their operand type.
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }
}

/// Messages produced when parsing the surface language.
#[derive(Debug, Clone)]
pub enum ParseMessage {
    Lexer(lexer::Error),
    UnexpectedToken {
        range: ByteRange,
        found: &'static str,
        expected: &'static str,
    },
    UnexpectedEof {
        range: ByteRange,
        expected: &'static str,
    },
    InvalidNumberLiteral {
        range: ByteRange,
    },
    InvalidStringLiteral {
        range: ByteRange,
    },
}

impl ParseMessage {
    pub fn to_diagnostic(&self) -> Diagnostic<FileId> {
        match self {
            ParseMessage::Lexer(error) => error.to_diagnostic(),
            ParseMessage::UnexpectedToken {
                range,
                found,
                expected,
            } => Diagnostic::error()
                .with_message(format!("unexpected token, found {found}"))
                .with_labels(vec![Label::primary(range.file_id(), *range)
                    .with_message(format!("expected {expected}"))]),
            ParseMessage::UnexpectedEof { range, expected } => Diagnostic::error()
                .with_message("unexpected end of file")
                .with_labels(vec![Label::primary(range.file_id(), *range)
                    .with_message(format!("expected {expected}"))]),
            ParseMessage::InvalidNumberLiteral { range } => Diagnostic::error()
                .with_message("invalid number literal")
                .with_labels(vec![Label::primary(range.file_id(), *range)]),
            ParseMessage::InvalidStringLiteral { range } => Diagnostic::error()
                .with_message("invalid escape in string literal")
                .with_labels(vec![Label::primary(range.file_id(), *range)]),
        }
    }
}
