//! Recursive descent parser for definition files.
//!
//! The grammar is line-oriented: newlines separate items, so the parser
//! mostly threads "skip blank lines here, demand a newline there" through a
//! handful of loops. Types and value expressions have separate grammars;
//! `{` never starts an expression, which is what lets `!if cond {` terminate
//! without a keyword.

use crate::files::FileId;
use crate::source::{BytePos, ByteRange, StringId, StringInterner};
use crate::surface::lexer::{self, Token};
use crate::surface::{
    Body, BinOp, Branch, BranchArm, Expr, IfItem, Import, Item, MatchKey, Module, ParseMessage,
    PathSegment, Type, TypeDef, UnOp,
};

/// Parse a whole definition file.
pub fn parse_module(
    interner: &mut StringInterner,
    file_id: FileId,
    source: &str,
) -> Result<Module, ParseMessage> {
    let mut tokens = Vec::new();
    for token in lexer::tokens(file_id, source) {
        tokens.push(token.map_err(ParseMessage::Lexer)?);
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        file_id,
        eof_pos: source.len() as BytePos,
        interner,
    };
    let body = parser.parse_body(false)?;
    Ok(Module { body })
}

struct Parser<'source, 'interner> {
    tokens: Vec<(BytePos, Token<'source>, BytePos)>,
    pos: usize,
    file_id: FileId,
    eof_pos: BytePos,
    interner: &'interner mut StringInterner,
}

impl<'source, 'interner> Parser<'source, 'interner> {
    // ========== Token helpers ==========

    fn peek(&self) -> Option<&Token<'source>> {
        self.tokens.get(self.pos).map(|(_, token, _)| token)
    }

    fn peek_ahead(&self, offset: usize) -> Option<&Token<'source>> {
        self.tokens.get(self.pos + offset).map(|(_, token, _)| token)
    }

    fn peek_range(&self) -> ByteRange {
        match self.tokens.get(self.pos) {
            Some((start, _, end)) => ByteRange::new(self.file_id, *start, *end),
            None => ByteRange::new(self.file_id, self.eof_pos, self.eof_pos),
        }
    }

    fn advance(&mut self) -> Option<(BytePos, Token<'source>, BytePos)> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn at_eof(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn eat(&mut self, token: &Token<'source>) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token<'source>, expected: &'static str) -> Result<ByteRange, ParseMessage> {
        let range = self.peek_range();
        if self.eat(&token) {
            Ok(range)
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn expect_name(&mut self, expected: &'static str) -> Result<(ByteRange, StringId), ParseMessage> {
        let name = match self.peek() {
            Some(Token::Name(name)) => *name,
            _ => return Err(self.unexpected(expected)),
        };
        let range = self.peek_range();
        self.pos += 1;
        Ok((range, self.interner.get_or_intern(name)))
    }

    fn unexpected(&self, expected: &'static str) -> ParseMessage {
        match self.peek() {
            Some(token) => ParseMessage::UnexpectedToken {
                range: self.peek_range(),
                found: token.description(),
                expected,
            },
            None => ParseMessage::UnexpectedEof {
                range: self.peek_range(),
                expected,
            },
        }
    }

    fn skip_newlines(&mut self) {
        while self.eat(&Token::Newline) {}
    }

    /// True at a position where the current item must end.
    fn at_item_end(&self) -> bool {
        matches!(self.peek(), None | Some(Token::Newline) | Some(Token::CloseBrace))
    }

    // ========== Items ==========

    /// Parse items until `}` (inside a block) or end of file (at the top
    /// level of a module).
    fn parse_body(&mut self, in_block: bool) -> Result<Body, ParseMessage> {
        let start = self.peek_range();
        let mut items = Vec::new();
        loop {
            self.skip_newlines();
            match self.peek() {
                None => {
                    if in_block {
                        return Err(self.unexpected("`}`"));
                    }
                    break;
                }
                Some(Token::CloseBrace) if in_block => break,
                _ => {}
            }
            items.push(self.parse_item()?);
            if !self.at_item_end() {
                return Err(self.unexpected("newline"));
            }
        }
        let range = match items.last() {
            Some(_) => start.merge(&self.peek_range()),
            None => start,
        };
        Ok(Body { range, items })
    }

    fn parse_block(&mut self) -> Result<Body, ParseMessage> {
        self.expect(Token::OpenBrace, "`{`")?;
        let body = self.parse_body(true)?;
        self.expect(Token::CloseBrace, "`}`")?;
        Ok(body)
    }

    fn parse_item(&mut self) -> Result<Item, ParseMessage> {
        let start = self.peek_range();
        match self.peek() {
            Some(Token::Colon) => {
                self.pos += 1;
                Ok(Item::TypeDef(self.parse_type_def(start)?))
            }
            Some(Token::DirectiveIf) => {
                self.pos += 1;
                let cond = self.parse_expr()?;
                let then = self.parse_block()?;
                // `!else` may follow on the same line or after blank lines.
                let els = {
                    let saved = self.pos;
                    self.skip_newlines();
                    if self.eat(&Token::DirectiveElse) {
                        Some(self.parse_block()?)
                    } else {
                        self.pos = saved;
                        None
                    }
                };
                let range = start.merge(&self.peek_range());
                Ok(Item::If(IfItem {
                    range,
                    cond,
                    then,
                    els,
                }))
            }
            Some(Token::DirectiveImport) => {
                self.pos += 1;
                let (range, name) = self.expect_name("module name")?;
                Ok(Item::Import(Import {
                    range: start.merge(&range),
                    module: self.interner.lookup(name).to_owned(),
                    body: None,
                }))
            }
            Some(Token::DirectiveSymfile) => {
                self.pos += 1;
                let (mut range, name) = self.expect_name("symbol file name")?;
                let mut module = self.interner.lookup(name).to_owned();
                // File names usually carry an extension (`game.sym`).
                while self.eat(&Token::FullStop) {
                    let (ext_range, ext) = self.expect_name("file extension")?;
                    module.push('.');
                    module.push_str(self.interner.lookup(ext));
                    range = range.merge(&ext_range);
                }
                Ok(Item::Symfile {
                    range: start.merge(&range),
                    module,
                })
            }
            Some(Token::DirectiveSave) => {
                self.pos += 1;
                let (range, name) = self.expect_name("field name")?;
                Ok(Item::Save {
                    range: start.merge(&range),
                    name,
                })
            }
            Some(Token::DirectiveDebug) => {
                self.pos += 1;
                let (range, name) = self.expect_name("field name")?;
                Ok(Item::Debug {
                    range: start.merge(&range),
                    name,
                })
            }
            Some(Token::KeywordYield) => {
                self.pos += 1;
                let ty = self.parse_type()?;
                let range = start.merge(&ty.range());
                Ok(Item::Yield { range, ty })
            }
            Some(Token::Equals) => {
                self.pos += 1;
                let expr = self.parse_expr()?;
                let range = start.merge(&expr.range());
                Ok(Item::Return { range, expr })
            }
            Some(Token::Name("_")) => {
                self.pos += 1;
                let ty = self.parse_type()?;
                let range = start.merge(&ty.range());
                Ok(Item::AnonField { range, ty })
            }
            Some(Token::Name(_)) => self.parse_field(start),
            _ => Err(self.unexpected("a field, type definition, or directive")),
        }
    }

    /// The part of a type definition after the leading `:`.
    fn parse_type_def(&mut self, start: ByteRange) -> Result<TypeDef, ParseMessage> {
        let (_, name) = self.expect_name("type name")?;
        let mut params = Vec::new();
        if self.eat(&Token::OpenParen) {
            loop {
                let (_, param) = self.expect_name("parameter name")?;
                params.push(param);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
            self.expect(Token::CloseParen, "`)`")?;
        }

        if self.at_item_end() {
            // A bare `:Name` declares a payload-less token.
            return Ok(TypeDef {
                range: start.merge(&self.peek_range()),
                name,
                params,
                base: None,
                ty: None,
            });
        }

        let first = self.parse_type()?;
        if self.at_item_end() {
            return Ok(TypeDef {
                range: start.merge(&first.range()),
                name,
                params,
                base: None,
                ty: Some(first),
            });
        }

        // Two types in a row: `:GBColor RGBColor { ... }` declares a subtype.
        let base = match first {
            Type::Name(range, base) => (range, base),
            other => {
                return Err(ParseMessage::UnexpectedToken {
                    range: other.range(),
                    found: "type",
                    expected: "a parent type name",
                })
            }
        };
        let ty = self.parse_type()?;
        Ok(TypeDef {
            range: start.merge(&ty.range()),
            name,
            params,
            base: Some(base),
            ty: Some(ty),
        })
    }

    /// A field: `name Type`, `name = expr`, `outer.inner Type`,
    /// `list[].name Type`.
    fn parse_field(&mut self, start: ByteRange) -> Result<Item, ParseMessage> {
        let (range, name) = self.expect_name("field name")?;
        let mut path = vec![PathSegment {
            range,
            name,
            each: false,
        }];
        loop {
            if self.eat(&Token::FullStop) {
                let (range, name) = self.expect_name("field name")?;
                path.push(PathSegment {
                    range,
                    name,
                    each: false,
                });
            } else if self.peek() == Some(&Token::OpenBracket)
                && self.peek_ahead(1) == Some(&Token::CloseBracket)
                && self.peek_ahead(2) == Some(&Token::FullStop)
            {
                // `[].` is list assignment; a bare `[]` starts an unbounded
                // array type.
                self.pos += 2;
                path.last_mut().unwrap().each = true;
                self.expect(Token::FullStop, "`.`")?;
                let (range, name) = self.expect_name("field name")?;
                path.push(PathSegment {
                    range,
                    name,
                    each: false,
                });
            } else {
                break;
            }
        }

        if self.eat(&Token::Equals) {
            if path.len() != 1 {
                return Err(ParseMessage::UnexpectedToken {
                    range: start,
                    found: "field path",
                    expected: "a plain name on the left of `=`",
                });
            }
            let expr = self.parse_expr()?;
            let range = start.merge(&expr.range());
            return Ok(Item::Computed { range, name, expr });
        }

        let ty = self.parse_type()?;
        let range = start.merge(&ty.range());
        Ok(Item::Field { range, path, ty })
    }

    // ========== Types ==========

    fn parse_type(&mut self) -> Result<Type, ParseMessage> {
        let mut lhs = self.parse_type_foreign()?;
        // `|@` in leading position was already taken by the primary parser,
        // so a `|` here is always the pipe operator.
        while self.eat(&Token::Pipe) {
            let rhs = self.parse_type_foreign()?;
            let range = lhs.range().merge(&rhs.range());
            lhs = Type::Pipe {
                range,
                left: Box::new(lhs),
                right: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_type_foreign(&mut self) -> Result<Type, ParseMessage> {
        let inner = self.parse_type_match()?;
        if !self.eat(&Token::HyphenGreater) {
            return Ok(inner);
        }
        let (mut range, name) = self.expect_name("field path")?;
        let mut path = vec![name];
        while self.eat(&Token::FullStop) {
            let (seg_range, name) = self.expect_name("field name")?;
            path.push(name);
            range = range.merge(&seg_range);
        }
        let range = inner.range().merge(&range);
        Ok(Type::ForeignKey {
            range,
            inner: Box::new(inner),
            path,
        })
    }

    fn parse_type_match(&mut self) -> Result<Type, ParseMessage> {
        let mut ty = self.parse_type_primary()?;
        loop {
            let char_match = match self.peek() {
                Some(Token::KeywordMatch) => {
                    self.pos += 1;
                    false
                }
                Some(Token::KeywordChar) => {
                    self.pos += 1;
                    self.expect(Token::KeywordMatch, "`match`")?;
                    true
                }
                _ => break,
            };
            let branches = self.parse_match_branches()?;
            let range = ty.range().merge(&self.peek_range());
            ty = Type::Match {
                range,
                scrutinee: Box::new(ty),
                char_match,
                branches,
            };
        }
        Ok(ty)
    }

    fn parse_type_primary(&mut self) -> Result<Type, ParseMessage> {
        let start = self.peek_range();
        match self.peek() {
            Some(Token::OpenBrace) => {
                let body = self.parse_block()?;
                let range = start.merge(&self.peek_range());
                Ok(Type::Struct(range, body))
            }
            Some(Token::OpenBracket) => {
                self.pos += 1;
                let len = if self.peek() == Some(&Token::CloseBracket) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.expect(Token::CloseBracket, "`]`")?;
                let elem = self.parse_type_match()?;
                let range = start.merge(&elem.range());
                Ok(Type::Array {
                    range,
                    len,
                    elem: Box::new(elem),
                })
            }
            Some(Token::At) => {
                self.pos += 1;
                let addr = self.parse_addr_expr()?;
                let target = self.parse_type_match()?;
                let range = start.merge(&target.range());
                Ok(Type::Pointer {
                    range,
                    addr,
                    target: Box::new(target),
                    pipe_relative: false,
                })
            }
            Some(Token::Pipe) if self.peek_ahead(1) == Some(&Token::At) => {
                self.pos += 2;
                let addr = self.parse_addr_expr()?;
                let target = self.parse_type_match()?;
                let range = start.merge(&target.range());
                Ok(Type::Pointer {
                    range,
                    addr,
                    target: Box::new(target),
                    pipe_relative: true,
                })
            }
            Some(Token::Name(_)) => {
                let (range, name) = self.expect_name("type name")?;
                if self.eat(&Token::OpenParen) {
                    let mut args = Vec::new();
                    loop {
                        args.push(self.parse_type()?);
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                    }
                    let close = self.expect(Token::CloseParen, "`)`")?;
                    Ok(Type::Call {
                        range: range.merge(&close),
                        name,
                        args,
                    })
                } else {
                    Ok(Type::Name(range, name))
                }
            }
            Some(Token::StringLiteral(text)) => {
                let text = unescape(start, text)?;
                self.pos += 1;
                Ok(Type::StringLit(start, text))
            }
            _ => Err(self.unexpected("a type")),
        }
    }

    fn parse_match_branches(&mut self) -> Result<Vec<Branch>, ParseMessage> {
        self.expect(Token::OpenBrace, "`{`")?;
        let mut branches = Vec::new();
        loop {
            self.skip_newlines();
            if self.peek() == Some(&Token::CloseBrace) {
                break;
            }
            if self.at_eof() {
                return Err(self.unexpected("`}`"));
            }
            branches.push(self.parse_branch()?);
            if !self.at_item_end() {
                return Err(self.unexpected("newline"));
            }
        }
        self.expect(Token::CloseBrace, "`}`")?;
        Ok(branches)
    }

    fn parse_branch(&mut self) -> Result<Branch, ParseMessage> {
        let start = self.peek_range();
        let key = self.try_parse_match_key()?;
        let arm = match self.peek() {
            Some(Token::Colon) => {
                let def_start = self.peek_range();
                self.pos += 1;
                BranchArm::TypeDef(self.parse_type_def(def_start)?)
            }
            Some(Token::Equals) => {
                self.pos += 1;
                let expr = self.parse_expr()?;
                let range = start.merge(&expr.range());
                BranchArm::Computed(range, expr)
            }
            _ => BranchArm::Type(self.parse_type()?),
        };
        let range = start.merge(&self.peek_range());
        Ok(Branch { range, key, arm })
    }

    /// Look for `key =>` at the start of a branch; backtracks when the
    /// branch has an auto-incremented key.
    fn try_parse_match_key(&mut self) -> Result<Option<MatchKey>, ParseMessage> {
        let saved = self.pos;
        let start = self.peek_range();

        let key = match self.peek() {
            Some(Token::NumberLiteral(_)) | Some(Token::Minus) => {
                match self.try_parse_signed_int() {
                    Some(low) => {
                        if self.eat(&Token::DotDot) {
                            match self.try_parse_signed_int() {
                                Some(high) => {
                                    Some(MatchKey::Range(start.merge(&self.peek_range()), low, high))
                                }
                                None => None,
                            }
                        } else {
                            Some(MatchKey::Int(start, low))
                        }
                    }
                    None => None,
                }
            }
            Some(Token::StringLiteral(text)) => {
                let text = unescape(start, text)?;
                self.pos += 1;
                Some(MatchKey::Str(start, text))
            }
            Some(Token::Name("_")) => {
                self.pos += 1;
                Some(MatchKey::Default(start, None))
            }
            Some(Token::Name(name)) if starts_lowercase(name) => {
                let name = *name;
                self.pos += 1;
                Some(MatchKey::Default(start, Some(self.interner.get_or_intern(name))))
            }
            _ => None,
        };

        match key {
            Some(key) if self.eat(&Token::EqualsGreater) => Ok(Some(key)),
            _ => {
                self.pos = saved;
                Ok(None)
            }
        }
    }

    fn try_parse_signed_int(&mut self) -> Option<i64> {
        let negative = self.eat(&Token::Minus);
        match self.peek() {
            Some(Token::NumberLiteral(text)) => {
                let range = self.peek_range();
                match parse_number(range, text) {
                    Ok(value) => {
                        self.pos += 1;
                        Some(if negative { -value } else { value })
                    }
                    Err(_) => None,
                }
            }
            _ => None,
        }
    }

    // ========== Expressions ==========

    fn parse_expr(&mut self) -> Result<Expr, ParseMessage> {
        let mut lhs = self.parse_expr_additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::EqualsEquals) => BinOp::Eq,
                Some(Token::BangEquals) => BinOp::Ne,
                Some(Token::Less) => BinOp::Lt,
                Some(Token::LessEquals) => BinOp::Le,
                Some(Token::Greater) => BinOp::Gt,
                Some(Token::GreaterEquals) => BinOp::Ge,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_expr_additive()?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_expr_additive(&mut self) -> Result<Expr, ParseMessage> {
        let mut lhs = self.parse_expr_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_expr_multiplicative()?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_expr_multiplicative(&mut self) -> Result<Expr, ParseMessage> {
        let mut lhs = self.parse_expr_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::ForwardSlash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Mod,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_expr_unary()?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_expr_unary(&mut self) -> Result<Expr, ParseMessage> {
        let start = self.peek_range();
        if self.eat(&Token::Minus) {
            let operand = self.parse_expr_unary()?;
            let range = start.merge(&operand.range());
            Ok(Expr::Unary {
                range,
                op: UnOp::Neg,
                operand: Box::new(operand),
            })
        } else {
            self.parse_expr_postfix()
        }
    }

    fn parse_expr_postfix(&mut self) -> Result<Expr, ParseMessage> {
        let mut expr = self.parse_expr_atom()?;
        loop {
            if self.eat(&Token::FullStop) {
                let (range, name) = self.expect_name("field name")?;
                let range = expr.range().merge(&range);
                expr = Expr::Attr {
                    range,
                    base: Box::new(expr),
                    name,
                };
            } else if self.eat(&Token::OpenBracket) {
                let index = self.parse_expr()?;
                let close = self.expect(Token::CloseBracket, "`]`")?;
                let range = expr.range().merge(&close);
                expr = Expr::Index {
                    range,
                    base: Box::new(expr),
                    index: Box::new(index),
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_expr_atom(&mut self) -> Result<Expr, ParseMessage> {
        let range = self.peek_range();
        match self.peek() {
            Some(Token::Name(name)) => {
                let name = *name;
                self.pos += 1;
                Ok(Expr::Name(range, self.interner.get_or_intern(name)))
            }
            Some(Token::NumberLiteral(text)) => {
                let value = parse_number(range, text)?;
                self.pos += 1;
                Ok(Expr::Int(range, value))
            }
            Some(Token::StringLiteral(text)) => {
                let text = unescape(range, text)?;
                self.pos += 1;
                Ok(Expr::Str(range, text))
            }
            Some(Token::OpenParen) => {
                self.pos += 1;
                let expr = self.parse_expr()?;
                self.expect(Token::CloseParen, "`)`")?;
                Ok(expr)
            }
            _ => Err(self.unexpected("an expression")),
        }
    }

    /// Pointer addresses are a restricted expression: a name, a number, or a
    /// parenthesised expression, with `.field` postfixes. `[index]` stays
    /// with the target type (`@addr [2]Byte`), so indexed addresses must be
    /// parenthesised: `@(offsets[0]) Byte`.
    fn parse_addr_expr(&mut self) -> Result<Expr, ParseMessage> {
        let start = self.peek_range();
        if self.eat(&Token::Minus) {
            let operand = self.parse_addr_expr()?;
            let range = start.merge(&operand.range());
            return Ok(Expr::Unary {
                range,
                op: UnOp::Neg,
                operand: Box::new(operand),
            });
        }
        let mut expr = self.parse_expr_atom()?;
        while self.eat(&Token::FullStop) {
            let (range, name) = self.expect_name("field name")?;
            let range = expr.range().merge(&range);
            expr = Expr::Attr {
                range,
                base: Box::new(expr),
                name,
            };
        }
        Ok(expr)
    }
}

fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
    let range = lhs.range().merge(&rhs.range());
    Expr::Binary {
        range,
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

fn starts_lowercase(name: &str) -> bool {
    name.chars().next().map_or(false, |c| c.is_lowercase())
}

fn parse_number(range: ByteRange, text: &str) -> Result<i64, ParseMessage> {
    let text = text.replace('_', "");
    let result = match text.strip_prefix("0x") {
        Some(hex) => i64::from_str_radix(hex, 16),
        None => text.parse(),
    };
    result.map_err(|_| ParseMessage::InvalidNumberLiteral { range })
}

fn unescape(range: ByteRange, text: &str) -> Result<String, ParseMessage> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some('\'') => out.push('\''),
            Some('x') => {
                let hi = chars.next();
                let lo = chars.next();
                match (hi, lo) {
                    (Some(hi), Some(lo)) if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit() => {
                        let value = (hi.to_digit(16).unwrap() * 16 + lo.to_digit(16).unwrap()) as u8;
                        out.push(value as char);
                    }
                    _ => return Err(ParseMessage::InvalidStringLiteral { range }),
                }
            }
            _ => return Err(ParseMessage::InvalidStringLiteral { range }),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> (StringInterner, Module) {
        let mut interner = StringInterner::new();
        let file_id = FileId::try_from(1).unwrap();
        let module = parse_module(&mut interner, file_id, source).expect("parse error");
        (interner, module)
    }

    #[test]
    fn fields_and_type_defs() {
        let (interner, module) = parse(":Thing {\n    a U8\n    b U16\n}\nthing Thing\n");
        assert_eq!(module.body.items.len(), 2);
        match &module.body.items[0] {
            Item::TypeDef(def) => {
                assert_eq!(interner.lookup(def.name), "Thing");
                assert!(def.base.is_none());
                assert!(matches!(def.ty, Some(Type::Struct(_, _))));
            }
            item => panic!("expected type def, got {item:?}"),
        }
    }

    #[test]
    fn subtype_definition() {
        let (interner, module) = parse(":GBColor RGBColor { rgb U16 }\n");
        match &module.body.items[0] {
            Item::TypeDef(def) => {
                let (_, base) = def.base.expect("no base");
                assert_eq!(interner.lookup(base), "RGBColor");
            }
            item => panic!("expected type def, got {item:?}"),
        }
    }

    #[test]
    fn array_of_match_binds_per_element() {
        let (_, module) = parse("commands []CommandByte match { 0 => :End Terminator }\n");
        match &module.body.items[0] {
            Item::Field { ty, .. } => match ty {
                Type::Array { len, elem, .. } => {
                    assert!(len.is_none());
                    assert!(matches!(**elem, Type::Match { .. }));
                }
                ty => panic!("expected array, got {ty:?}"),
            },
            item => panic!("expected field, got {item:?}"),
        }
    }

    #[test]
    fn pipe_binds_looser_than_array() {
        let (_, module) = parse("pipedata [6]Byte | { a [2]Byte }\n");
        match &module.body.items[0] {
            Item::Field { ty, .. } => match ty {
                Type::Pipe { left, .. } => {
                    assert!(matches!(**left, Type::Array { .. }))
                }
                ty => panic!("expected pipe, got {ty:?}"),
            },
            item => panic!("expected field, got {item:?}"),
        }
    }

    #[test]
    fn pipe_relative_pointer() {
        let (_, module) = parse("yield |@(-3) [4]Byte\n");
        match &module.body.items[0] {
            Item::Yield { ty, .. } => match ty {
                Type::Pointer {
                    pipe_relative,
                    addr,
                    ..
                } => {
                    assert!(pipe_relative);
                    assert!(matches!(addr, Expr::Unary { .. }));
                }
                ty => panic!("expected pointer, got {ty:?}"),
            },
            item => panic!("expected yield, got {item:?}"),
        }
    }

    #[test]
    fn match_keys() {
        let (_, module) = parse(
            "x U8 match {\n    0 => A\n    1..5 => B\n    other => =other\n    Plain\n}\n",
        );
        match &module.body.items[0] {
            Item::Field { ty, .. } => match ty {
                Type::Match { branches, .. } => {
                    assert!(matches!(branches[0].key, Some(MatchKey::Int(_, 0))));
                    assert!(matches!(branches[1].key, Some(MatchKey::Range(_, 1, 5))));
                    assert!(matches!(branches[2].key, Some(MatchKey::Default(_, Some(_)))));
                    assert!(branches[3].key.is_none());
                }
                ty => panic!("expected match, got {ty:?}"),
            },
            item => panic!("expected field, got {item:?}"),
        }
    }

    #[test]
    fn unbounded_array_fields() {
        let (_, module) = parse("data []U8\n");
        match &module.body.items[0] {
            Item::Field { path, ty, .. } => {
                assert_eq!(path.len(), 1);
                assert!(!path[0].each);
                assert!(matches!(ty, Type::Array { len: None, .. }));
            }
            item => panic!("expected field, got {item:?}"),
        }
    }

    #[test]
    fn pointer_addresses_stop_before_the_target() {
        let (_, module) = parse("yield |@0 [2]Byte\n");
        match &module.body.items[0] {
            Item::Yield { ty, .. } => match ty {
                Type::Pointer { addr, target, .. } => {
                    assert!(matches!(addr, Expr::Int(_, 0)));
                    assert!(matches!(**target, Type::Array { .. }));
                }
                ty => panic!("expected pointer, got {ty:?}"),
            },
            item => panic!("expected yield, got {item:?}"),
        }
    }

    #[test]
    fn foreign_list_assignment() {
        let (interner, module) = parse("stuff[].d [4]U8\n");
        match &module.body.items[0] {
            Item::Field { path, .. } => {
                assert_eq!(path.len(), 2);
                assert_eq!(interner.lookup(path[0].name), "stuff");
                assert!(path[0].each);
                assert!(!path[1].each);
            }
            item => panic!("expected field, got {item:?}"),
        }
    }
}
