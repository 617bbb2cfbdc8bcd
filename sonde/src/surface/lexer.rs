use codespan_reporting::diagnostic::{Diagnostic, Label};
use logos::Logos;

use crate::files::FileId;
use crate::source::{BytePos, ByteRange};

/// Newlines terminate fields, so unlike most of the whitespace they are
/// tokens rather than trivia. Line comments stop *before* the newline for the
/// same reason.
#[derive(Clone, Debug, PartialEq, Logos)]
#[logos(extras = FileId)]
pub enum Token<'source> {
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Name(&'source str),
    #[regex(r"[0-9][0-9_]*")]
    #[regex(r"0x[0-9a-fA-F][0-9a-fA-F_]*")]
    NumberLiteral(&'source str),
    #[regex(r#""([^"\\\n]|\\.)*""#, |lex| &lex.slice()[1..(lex.slice().len() - 1)])]
    #[regex(r#"'([^'\\\n]|\\.)*'"#, |lex| &lex.slice()[1..(lex.slice().len() - 1)])]
    StringLiteral(&'source str),

    #[token("char")]
    KeywordChar,
    #[token("match")]
    KeywordMatch,
    #[token("yield")]
    KeywordYield,

    #[token("!debug")]
    DirectiveDebug,
    #[token("!else")]
    DirectiveElse,
    #[token("!if")]
    DirectiveIf,
    #[token("!import")]
    DirectiveImport,
    #[token("!save")]
    DirectiveSave,
    #[token("!symfile")]
    DirectiveSymfile,

    #[token("@")]
    At,
    #[token(":")]
    Colon,
    #[token(",")]
    Comma,
    #[token("=")]
    Equals,
    #[token("!=")]
    BangEquals,
    #[token("==")]
    EqualsEquals,
    #[token("=>")]
    EqualsGreater,
    #[token(">=")]
    GreaterEquals,
    #[token(">")]
    Greater,
    #[token("<=")]
    LessEquals,
    #[token("<")]
    Less,
    #[token(".")]
    FullStop,
    #[token("..")]
    DotDot,
    #[token("/")]
    ForwardSlash,
    #[token("%")]
    Percent,
    #[token("->")]
    HyphenGreater,
    #[token("-")]
    Minus,
    #[token("|")]
    Pipe,
    #[token("+")]
    Plus,
    #[token("*")]
    Star,
    #[token("{")]
    OpenBrace,
    #[token("}")]
    CloseBrace,
    #[token("[")]
    OpenBracket,
    #[token("]")]
    CloseBracket,
    #[token("(")]
    OpenParen,
    #[token(")")]
    CloseParen,
    #[token("\n")]
    Newline,

    #[error]
    #[regex(r"[ \t\r]+", logos::skip)]
    #[regex(r"//[^\n]*", logos::skip)]
    Error,
}

pub type Spanned<Tok, Loc> = (Loc, Tok, Loc);

#[derive(Clone, Debug)]
pub enum Error {
    UnexpectedCharacter { range: ByteRange },
}

impl Error {
    pub fn range(&self) -> ByteRange {
        match self {
            Error::UnexpectedCharacter { range } => *range,
        }
    }

    pub fn to_diagnostic(&self) -> Diagnostic<FileId> {
        match self {
            Error::UnexpectedCharacter { range } => Diagnostic::error()
                .with_message("unexpected character")
                .with_labels(vec![Label::primary(range.file_id(), *range)]),
        }
    }
}

pub fn tokens(
    file_id: FileId,
    source: &str,
) -> impl Iterator<Item = Result<Spanned<Token<'_>, BytePos>, Error>> {
    assert!(
        source.len() <= u32::MAX as usize,
        "`source` must be less than 4GiB in length"
    );

    Token::lexer_with_extras(source, file_id)
        .spanned()
        .map(move |(token, range)| {
            let start = range.start as BytePos;
            let end = range.end as BytePos;
            match token {
                Token::Error => Err(Error::UnexpectedCharacter {
                    range: ByteRange::new(file_id, start, end),
                }),
                token => Ok((start, token, end)),
            }
        })
}

impl<'source> Token<'source> {
    pub fn description(&self) -> &'static str {
        match self {
            Token::Name(_) => "name",
            Token::NumberLiteral(_) => "number literal",
            Token::StringLiteral(_) => "string literal",
            Token::KeywordChar => "char",
            Token::KeywordMatch => "match",
            Token::KeywordYield => "yield",
            Token::DirectiveDebug => "!debug",
            Token::DirectiveElse => "!else",
            Token::DirectiveIf => "!if",
            Token::DirectiveImport => "!import",
            Token::DirectiveSave => "!save",
            Token::DirectiveSymfile => "!symfile",
            Token::At => "@",
            Token::Colon => ":",
            Token::Comma => ",",
            Token::Equals => "=",
            Token::BangEquals => "!=",
            Token::EqualsEquals => "==",
            Token::EqualsGreater => "=>",
            Token::GreaterEquals => ">=",
            Token::Greater => ">",
            Token::LessEquals => "<=",
            Token::Less => "<",
            Token::FullStop => ".",
            Token::DotDot => "..",
            Token::ForwardSlash => "/",
            Token::Percent => "%",
            Token::HyphenGreater => "->",
            Token::Minus => "-",
            Token::Pipe => "|",
            Token::Plus => "+",
            Token::Star => "*",
            Token::OpenBrace => "{",
            Token::CloseBrace => "}",
            Token::OpenBracket => "[",
            Token::CloseBracket => "]",
            Token::OpenParen => "(",
            Token::CloseParen => ")",
            Token::Newline => "newline",
            Token::Error => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(source: &str) -> Vec<Token<'_>> {
        let file_id = FileId::try_from(1).unwrap();
        tokens(file_id, source)
            .map(|result| result.unwrap().1)
            .collect()
    }

    #[test]
    fn comments_stop_before_the_newline() {
        let tokens = lex("field U8 // trailing\nother U16\n");
        assert_eq!(
            tokens,
            vec![
                Token::Name("field"),
                Token::Name("U8"),
                Token::Newline,
                Token::Name("other"),
                Token::Name("U16"),
                Token::Newline,
            ],
        );
    }

    #[test]
    fn hex_and_decimal_literals() {
        let tokens = lex("@0x1f [10]");
        assert_eq!(
            tokens,
            vec![
                Token::At,
                Token::NumberLiteral("0x1f"),
                Token::OpenBracket,
                Token::NumberLiteral("10"),
                Token::CloseBracket,
            ],
        );
    }

    #[test]
    fn directives_and_ranges() {
        let tokens = lex("!if x { }\n0x00..0x1f");
        assert_eq!(
            tokens,
            vec![
                Token::DirectiveIf,
                Token::Name("x"),
                Token::OpenBrace,
                Token::CloseBrace,
                Token::Newline,
                Token::NumberLiteral("0x00"),
                Token::DotDot,
                Token::NumberLiteral("0x1f"),
            ],
        );
    }
}
