//! A pretty printer for result values.
//!
//! Example:
//!
//! ```
//! use sonde::core::pretty::Context;
//! use sonde::core::value::{Value, ValueKind};
//!
//! let value = Value::new(ValueKind::Int(5));
//!
//! let pp = Context::new();
//! println!("{}", pp.value(&value).pretty(80));
//! ```

use pretty::RcDoc;

use crate::core::value::{Value, ValueKind};
use crate::core::ArrayKind;

const INDENT: isize = 4;

pub struct Context {}

impl Context {
    pub fn new() -> Context {
        Context {}
    }

    pub fn value<'doc>(&'doc self, value: &'doc Value) -> RcDoc<'doc> {
        match &value.kind {
            ValueKind::Struct(fields) => self.block(
                "{",
                fields.fields.iter().map(|(name, value)| {
                    RcDoc::concat([
                        RcDoc::text(name.as_str()),
                        RcDoc::text(":"),
                        RcDoc::space(),
                        self.value(value),
                    ])
                }),
                "}",
            ),
            ValueKind::Array { items, kind } => match kind {
                // Strings with embedded control tokens render as text.
                ArrayKind::String => RcDoc::text(value.to_string()),
                _ => self.block(
                    "[",
                    items.iter().map(|item| self.value(item)),
                    "]",
                ),
            },
            ValueKind::Image { tiles, palette } => RcDoc::concat([
                self.value(tiles),
                RcDoc::space(),
                RcDoc::text("|"),
                RcDoc::space(),
                self.value(palette),
            ]),
            ValueKind::Tile(_) => RcDoc::text("<tile>"),
            ValueKind::Foreign(foreign) => {
                RcDoc::text(format!("-> {}[{}]", foreign.path.join("."), foreign.key))
            }
            ValueKind::Error(message) => {
                RcDoc::text(format!("!error {:?}", message.lines().next().unwrap_or("")))
            }
            // Scalars already know how to display themselves.
            _ => RcDoc::text(value.to_string()),
        }
    }

    fn block<'doc>(
        &'doc self,
        open: &'doc str,
        entries: impl Iterator<Item = RcDoc<'doc>>,
        close: &'doc str,
    ) -> RcDoc<'doc> {
        let entries: Vec<_> = entries.collect();
        if entries.is_empty() {
            return RcDoc::text(open).append(RcDoc::text(close));
        }
        RcDoc::concat([
            RcDoc::text(open),
            RcDoc::line()
                .append(RcDoc::intersperse(
                    entries,
                    RcDoc::text(",").append(RcDoc::line()),
                ))
                .nest(INDENT),
            RcDoc::line(),
            RcDoc::text(close),
        ])
        .group()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::StructValue;

    fn render(value: &Value, width: usize) -> String {
        Context::new().value(value).pretty(width).to_string()
    }

    #[test]
    fn flat_structs_fit_on_one_line() {
        let mut fields = StructValue::new();
        fields.set("x", Value::new(ValueKind::Int(16)));
        fields.set("y", Value::new(ValueKind::Int(32)));
        let value = Value::new(ValueKind::Struct(fields));
        assert_eq!(render(&value, 80), "{ x: 16, y: 32 }");
    }

    #[test]
    fn narrow_output_breaks_into_lines() {
        let mut fields = StructValue::new();
        fields.set("first", Value::new(ValueKind::Int(1)));
        fields.set("second", Value::new(ValueKind::Int(2)));
        let value = Value::new(ValueKind::Struct(fields));
        let rendered = render(&value, 10);
        assert_eq!(rendered, "{\n    first: 1,\n    second: 2\n}");
    }
}
