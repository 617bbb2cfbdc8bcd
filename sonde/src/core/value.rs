//! Runtime values.
//!
//! The interpreter produces a tree of [`Value`]s. Values own their field
//! names and labels as plain strings so the tree stays usable after the
//! schema that produced it is gone.

use std::fmt;

use crate::core::{ArrayKind, TypeId};

#[derive(Debug, Clone)]
pub struct Value {
    pub kind: ValueKind,
    /// Display label for values produced by a named definition, rendered as
    /// `<TextSpeed(5)>`.
    pub label: Option<String>,
    pub meta: Meta,
}

/// Provenance recorded while parsing.
#[derive(Debug, Clone, Default)]
pub struct Meta {
    /// Stream address the value was read from.
    pub address: Option<u64>,
    /// Number of bytes the value occupied.
    pub size: Option<u64>,
    /// Dotted path from the root, recorded in rich mode.
    pub path: Option<String>,
    /// For values behind a pointer, the address that was followed.
    pub pointer: Option<u64>,
    /// Set when this value or one of its children failed in lenient mode.
    pub error: bool,
}

#[derive(Debug, Clone)]
pub enum ValueKind {
    Int(i64),
    Bytes(Vec<u8>),
    Str(String),
    /// A unit token; its identity is the type that produced it.
    Token { ty: TypeId, terminator: bool },
    Null,
    Struct(StructValue),
    Array { items: Vec<Value>, kind: ArrayKind },
    Tile(TileValue),
    /// A tileset combined with a palette.
    Image {
        tiles: Box<Value>,
        palette: Box<Value>,
    },
    /// A lazy foreign key; see [`Value::follow`].
    Foreign(ForeignValue),
    /// A handle to a type, produced when expressions name one.
    TypeHandle(TypeId),
    /// Lenient mode only: the message of the error this field failed with.
    Error(String),
}

#[derive(Debug, Clone)]
pub struct StructValue {
    pub fields: Vec<(String, Value)>,
}

impl StructValue {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.fields
            .iter_mut()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    /// Insert or replace a field, keeping declaration order for new ones.
    pub fn set(&mut self, name: &str, value: Value) {
        match self.get_mut(name) {
            Some(slot) => *slot = value,
            None => self.fields.push((name.to_owned(), value)),
        }
    }
}

impl Default for StructValue {
    fn default() -> Self {
        Self::new()
    }
}

/// An 8x8 tile of palette indices, row-major.
#[derive(Debug, Clone)]
pub struct TileValue {
    pub depth: u8,
    pub pixels: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ForeignValue {
    pub key: i64,
    /// Path from the root to the list the key indexes into.
    pub path: Vec<String>,
}

/// A foreign key failed to dereference.
#[derive(Debug, Clone)]
pub struct ForeignKeyError {
    pub message: String,
}

impl fmt::Display for ForeignKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "foreign key error: {}", self.message)
    }
}

impl std::error::Error for ForeignKeyError {}

impl Value {
    pub fn new(kind: ValueKind) -> Self {
        Self {
            kind,
            label: None,
            meta: Meta::default(),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match &self.kind {
            ValueKind::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.kind {
            ValueKind::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.kind {
            ValueKind::Str(text) => Some(text),
            _ => None,
        }
    }

    /// Field access on struct values.
    pub fn get(&self, name: &str) -> Option<&Value> {
        match &self.kind {
            ValueKind::Struct(fields) => fields.get(name),
            _ => None,
        }
    }

    /// Element access on array values.
    pub fn index(&self, index: usize) -> Option<&Value> {
        match &self.kind {
            ValueKind::Array { items, .. } => items.get(index),
            _ => None,
        }
    }

    pub fn fields(&self) -> Option<&[(String, Value)]> {
        match &self.kind {
            ValueKind::Struct(fields) => Some(&fields.fields),
            _ => None,
        }
    }

    pub fn items(&self) -> Option<&[Value]> {
        match &self.kind {
            ValueKind::Array { items, .. } => Some(items),
            _ => None,
        }
    }

    pub fn len(&self) -> Option<usize> {
        match &self.kind {
            ValueKind::Array { items, .. } => Some(items.len()),
            ValueKind::Bytes(bytes) => Some(bytes.len()),
            ValueKind::Str(text) => Some(text.chars().count()),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self.kind, ValueKind::Null)
    }

    pub fn is_terminator(&self) -> bool {
        matches!(self.kind, ValueKind::Token { terminator: true, .. })
    }

    pub fn address(&self) -> Option<u64> {
        self.meta.address
    }

    pub fn size(&self) -> Option<u64> {
        self.meta.size
    }

    pub fn path(&self) -> Option<&str> {
        self.meta.path.as_deref()
    }

    pub fn pointer(&self) -> Option<u64> {
        self.meta.pointer
    }

    /// Whether this value or any of its children failed in lenient mode.
    pub fn has_error(&self) -> bool {
        self.meta.error
    }

    /// Dereference a foreign key against the root of the value tree it was
    /// parsed into. Keys stay unchecked until followed, so a dangling key
    /// only fails here.
    pub fn follow<'a>(&'a self, root: &'a Value) -> Result<&'a Value, ForeignKeyError> {
        let foreign = match &self.kind {
            ValueKind::Foreign(foreign) => foreign,
            _ => {
                return Err(ForeignKeyError {
                    message: "value is not a foreign key".to_owned(),
                })
            }
        };
        let mut current = root;
        for segment in &foreign.path {
            current = current.get(segment).ok_or_else(|| ForeignKeyError {
                message: format!("no field `{segment}` on the way to the foreign list"),
            })?;
        }
        let index = usize::try_from(foreign.key).map_err(|_| ForeignKeyError {
            message: format!("key {} is negative", foreign.key),
        })?;
        current.index(index).ok_or_else(|| ForeignKeyError {
            message: format!(
                "key {} is out of bounds for `{}` (length {})",
                foreign.key,
                foreign.path.join("."),
                current.len().unwrap_or(0),
            ),
        })
    }

    /// String rendering used when values end up inside character output:
    /// strings paste as-is, everything else shows as `<Label>`.
    pub fn render_in_text(&self, out: &mut String) {
        match &self.kind {
            ValueKind::Str(text) => out.push_str(text),
            ValueKind::Array { items, .. } => {
                for item in items {
                    item.render_in_text(out);
                }
            }
            _ => {
                out.push('<');
                match (&self.label, &self.kind) {
                    (Some(label), ValueKind::Int(value)) => {
                        out.push_str(label);
                        out.push('(');
                        out.push_str(&value.to_string());
                        out.push(')');
                    }
                    (Some(label), _) => out.push_str(label),
                    (None, ValueKind::Int(value)) => out.push_str(&value.to_string()),
                    (None, _) => out.push_str("?"),
                }
                out.push('>');
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ValueKind::Int(value) => match &self.label {
                Some(label) => write!(f, "<{label}({value})>"),
                None => write!(f, "{value}"),
            },
            ValueKind::Bytes(bytes) => {
                for byte in bytes {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
            ValueKind::Str(text) => write!(f, "{text}"),
            ValueKind::Token { .. } => match &self.label {
                Some(label) => write!(f, "<{label}>"),
                None => write!(f, "<token>"),
            },
            ValueKind::Null => write!(f, "null"),
            ValueKind::Struct(fields) => write!(f, "{{{} fields}}", fields.fields.len()),
            ValueKind::Array { items, kind } => match kind {
                ArrayKind::String => {
                    let mut out = String::new();
                    self.render_in_text(&mut out);
                    write!(f, "{out}")
                }
                _ => write!(f, "[{} items]", items.len()),
            },
            ValueKind::Tile(tile) => write!(f, "<tile depth {}>", tile.depth),
            ValueKind::Image { .. } => write!(f, "<image>"),
            ValueKind::Foreign(foreign) => {
                write!(f, "-> {}[{}]", foreign.path.join("."), foreign.key)
            }
            ValueKind::TypeHandle(_) => match &self.label {
                Some(label) => write!(f, "{label}"),
                None => write!(f, "<type>"),
            },
            ValueKind::Error(message) => write!(f, "<error: {message}>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(value: i64) -> Value {
        Value::new(ValueKind::Int(value))
    }

    #[test]
    fn struct_fields_keep_order() {
        let mut fields = StructValue::new();
        fields.set("b", int(2));
        fields.set("a", int(1));
        fields.set("b", int(3));
        let value = Value::new(ValueKind::Struct(fields));
        assert_eq!(value.get("b").unwrap().as_int(), Some(3));
        let names: Vec<_> = value
            .fields()
            .unwrap()
            .iter()
            .map(|(name, _)| name.as_str())
            .collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn foreign_keys_follow_lazily() {
        let mut root = StructValue::new();
        root.set(
            "things",
            Value::new(ValueKind::Array {
                items: vec![int(10), int(20)],
                kind: ArrayKind::List,
            }),
        );
        let root = Value::new(ValueKind::Struct(root));

        let key = Value::new(ValueKind::Foreign(ForeignValue {
            key: 1,
            path: vec!["things".to_owned()],
        }));
        assert_eq!(key.follow(&root).unwrap().as_int(), Some(20));

        let dangling = Value::new(ValueKind::Foreign(ForeignValue {
            key: 9,
            path: vec!["things".to_owned()],
        }));
        assert!(dangling.follow(&root).is_err());
    }

    #[test]
    fn labeled_values_render_with_their_type() {
        let mut value = int(5);
        value.label = Some("TextSpeed".to_owned());
        assert_eq!(value.to_string(), "<TextSpeed(5)>");
    }
}
