//! Core language: the resolved type graph.
//!
//! The resolve pass lowers the surface tree into an arena of nodes indexed
//! by [`TypeId`]. Nodes are immutable once resolution finishes, so the graph
//! can be walked by the interpreter any number of times. Recursive and
//! mutually-recursive definitions are ordinary cycles between ids.
//!
//! Value expressions live in the same arena as parseable types: a computed
//! field is just a field whose node reads nothing from the stream. This
//! mirrors how the language treats `x = y + 1` and `x U8` uniformly.

use fxhash::FxHashMap;

use crate::source::{StringId, StringInterner};
use crate::surface::BinOp;

pub mod binary;
pub mod pretty;
pub mod resolve;
pub mod value;

/// Handle into [`Types`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TypeId(u32);

impl TypeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// One node of the type graph.
#[derive(Debug, Clone)]
pub struct Node {
    pub kind: TypeKind,
    /// The name this node was defined under, if any.
    pub name: Option<StringId>,
    /// The type of the values this node produces, fixed by the resolve pass.
    /// `None` means the node is its own final type.
    pub final_ty: Option<TypeId>,
    /// Whether parsing this node writes into the surrounding pipe buffer.
    pub yields: bool,
}

#[derive(Debug, Clone)]
pub enum TypeKind {
    /// Unsigned little-endian integer of the given width.
    UInt { bytes: u8 },
    /// `B1` through `B32`: an unsigned integer read bitwise, LSB first.
    Bits { count: u8 },
    /// Raw bytes: `Byte`, `Short`, `Word`. Multi-byte reads keep stream
    /// order reversed, matching how the integer primitives consume them.
    Bytes { len: u8 },
    /// Abstract integer; the final type of computed numbers.
    Int,
    /// Abstract string; the final type of character output.
    Str,
    /// A unit token. Terminator tokens end unbounded arrays.
    Token { terminator: bool },
    /// Reads nothing, produces nothing.
    Null,
    /// The current stream position.
    Pos,
    /// The index of the array element being parsed.
    ElemIndex,
    /// The byte size of the right side of the enclosing pipe.
    RightSize,
    /// A planar graphics tile.
    Tile(TileFormat),
    /// Abstract color; subtypes provide `r`, `g`, `b` and `max` fields.
    Color,
    /// A literal string with no stream representation.
    StringLit(String),
    Struct(StructType),
    Array(ArrayType),
    Match(MatchType),
    /// `@addr Target` and `|@addr Target`.
    Pointer {
        addr: TypeId,
        target: TypeId,
        pipe_relative: bool,
    },
    /// `Left | Right`: the right side parses bytes produced by the left.
    Pipe { left: TypeId, right: TypeId },
    /// `Left | Right` where the sides combine into a new value instead of
    /// streaming (a tileset and a palette make an image).
    Combine { left: TypeId, right: TypeId },
    /// `yield Type`: parse, then append the bytes to the pipe buffer.
    Yield { inner: TypeId },
    /// `Key -> field.path`: a lazy reference into a sibling list.
    ForeignKey { inner: TypeId, path: Vec<StringId> },
    /// A definition that renames another type: `:TextSpeed U8`, and the
    /// subtype form `:GBColor RGBColor { ... }` where a body is present.
    Named {
        parent: TypeId,
        body: Option<TypeId>,
    },

    // Value expressions.
    /// A lowercase name, looked up in the context stack at parse time.
    FieldRef { name: StringId },
    /// An uppercase name referring to a type, usable in comparisons.
    TypeRef { ty: TypeId },
    IntLit(i64),
    Attr { base: TypeId, name: StringId },
    IndexOf { base: TypeId, index: TypeId },
    Neg { operand: TypeId },
    BinOp {
        op: BinOp,
        lhs: TypeId,
        rhs: TypeId,
    },

    /// Forward-reserved slot; must be filled before resolution finishes.
    Unresolved,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TileFormat {
    /// All bitplanes of a row stored consecutively.
    Planar { depth: u8 },
    /// Bitplanes stored as whole-tile planes.
    PlanarComposite { depth: u8 },
}

impl TileFormat {
    pub fn depth(&self) -> u8 {
        match self {
            TileFormat::Planar { depth } | TileFormat::PlanarComposite { depth } => *depth,
        }
    }

    /// Tiles are always 8x8; a tile occupies one byte per row per plane.
    pub fn byte_len(&self) -> u64 {
        self.depth() as u64 * 8
    }
}

#[derive(Debug, Clone)]
pub struct StructType {
    pub items: Vec<StructItem>,
    /// When an `!import`ed module defines types, they merge into the scope
    /// of the importing struct; the body itself contributes no fields.
    pub embed: bool,
}

#[derive(Debug, Clone)]
pub enum StructItem {
    Field { target: FieldTarget, ty: TypeId },
    /// `!if`: the branch bodies are structs whose fields land in the
    /// enclosing frame.
    If {
        cond: TypeId,
        then: TypeId,
        els: Option<TypeId>,
    },
    Yield { ty: TypeId },
    Save { name: StringId },
    Debug { name: StringId },
    /// `= expr`: the struct evaluates to this instead of its fields.
    Return { expr: TypeId },
}

#[derive(Debug, Clone)]
pub enum FieldTarget {
    Name(StringId),
    /// `outer.inner` / `list[].name` assignment into earlier fields.
    Path(Vec<FieldSeg>),
    /// `_`: parsed and discarded.
    Anon,
}

#[derive(Debug, Copy, Clone)]
pub struct FieldSeg {
    pub name: StringId,
    pub each: bool,
}

#[derive(Debug, Clone)]
pub struct ArrayType {
    pub elem: TypeId,
    pub len: ArrayLen,
    pub kind: ArrayKind,
}

#[derive(Debug, Clone)]
pub enum ArrayLen {
    Fixed(u64),
    Expr(TypeId),
    /// `[]Elem`: parse until a terminator or the end of the stream.
    Unbounded,
}

/// What an array of a given element type collapses into.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ArrayKind {
    List,
    String,
    ByteString,
    Tileset,
    Palette,
}

#[derive(Debug, Clone)]
pub struct MatchType {
    pub scrutinee: TypeId,
    /// `char match`: the scrutinee result is rendered as text and string
    /// keys are matched against it.
    pub char_match: bool,
    pub ints: FxHashMap<i64, TypeId>,
    pub strs: FxHashMap<String, TypeId>,
    /// Checked in order after the exact tables.
    pub ranges: Vec<(i64, i64, TypeId)>,
    /// Fallback branch with its optional capture name.
    pub default: Option<(Option<StringId>, TypeId)>,
    /// Branch types defined inline, addressable as `Match.Name` would be:
    /// resolved name lookups inside expressions consult this.
    pub branch_names: FxHashMap<StringId, TypeId>,
}

/// Ids of the built-in types, interned once at construction.
#[derive(Debug)]
pub struct Prims {
    pub by_name: FxHashMap<StringId, TypeId>,
    /// Abstract integer node used as a final type.
    pub int: TypeId,
    /// Abstract string node used as a final type.
    pub string: TypeId,
}

/// The arena of type nodes.
#[derive(Debug)]
pub struct Types {
    nodes: Vec<Node>,
    pub prims: Prims,
}

impl Types {
    pub fn new(interner: &mut StringInterner) -> Self {
        let mut types = Types {
            nodes: Vec::new(),
            prims: Prims {
                by_name: FxHashMap::default(),
                int: TypeId(0),
                string: TypeId(0),
            },
        };

        types.prims.int = types.add(TypeKind::Int, None);
        types.prims.string = types.add(TypeKind::Str, None);

        let mut prim = |types: &mut Types, name: &str, kind: TypeKind| {
            let name = interner.get_or_intern(name);
            let id = types.add(kind, Some(name));
            types.prims.by_name.insert(name, id);
        };

        prim(&mut types, "U8", TypeKind::UInt { bytes: 1 });
        prim(&mut types, "U16", TypeKind::UInt { bytes: 2 });
        prim(&mut types, "U32", TypeKind::UInt { bytes: 4 });
        for count in 1..=32u8 {
            prim(&mut types, &format!("B{count}"), TypeKind::Bits { count });
        }
        prim(&mut types, "Byte", TypeKind::Bytes { len: 1 });
        prim(&mut types, "Short", TypeKind::Bytes { len: 2 });
        prim(&mut types, "Word", TypeKind::Bytes { len: 4 });
        prim(&mut types, "Terminator", TypeKind::Token { terminator: true });
        prim(&mut types, "Null", TypeKind::Null);
        prim(&mut types, "Pos", TypeKind::Pos);
        prim(&mut types, "I", TypeKind::ElemIndex);
        prim(&mut types, "RightSize", TypeKind::RightSize);
        prim(
            &mut types,
            "Tile1BPP",
            TypeKind::Tile(TileFormat::Planar { depth: 1 }),
        );
        prim(
            &mut types,
            "NESTile",
            TypeKind::Tile(TileFormat::PlanarComposite { depth: 2 }),
        );
        prim(
            &mut types,
            "GBTile",
            TypeKind::Tile(TileFormat::Planar { depth: 2 }),
        );
        prim(&mut types, "RGBColor", TypeKind::Color);

        types
    }

    pub fn add(&mut self, kind: TypeKind, name: Option<StringId>) -> TypeId {
        let id = TypeId(u32::try_from(self.nodes.len()).expect("type graph too large"));
        self.nodes.push(Node {
            kind,
            name,
            final_ty: None,
            yields: false,
        });
        id
    }

    /// Reserve a slot so recursive definitions can refer to themselves
    /// before their body has been resolved.
    pub fn reserve(&mut self, name: Option<StringId>) -> TypeId {
        self.add(TypeKind::Unresolved, name)
    }

    pub fn fill(&mut self, id: TypeId, kind: TypeKind) {
        debug_assert!(matches!(self.nodes[id.index()].kind, TypeKind::Unresolved));
        self.nodes[id.index()].kind = kind;
    }

    pub fn get(&self, id: TypeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn kind(&self, id: TypeId) -> &TypeKind {
        &self.nodes[id.index()].kind
    }

    pub fn name(&self, id: TypeId) -> Option<StringId> {
        self.nodes[id.index()].name
    }

    pub fn set_final(&mut self, id: TypeId, ty: TypeId) {
        self.nodes[id.index()].final_ty = Some(ty);
    }

    pub fn set_yields(&mut self, id: TypeId, yields: bool) {
        self.nodes[id.index()].yields = yields;
    }

    pub fn yields(&self, id: TypeId) -> bool {
        self.nodes[id.index()].yields
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Follow final types to the type this node's values ultimately have.
    pub fn final_of(&self, id: TypeId) -> TypeId {
        let mut current = id;
        // Final chains are resolver-produced and acyclic apart from
        // self-reference.
        loop {
            match self.nodes[current.index()].final_ty {
                Some(next) if next != current => current = next,
                _ => return current,
            }
        }
    }

    /// Strip `Named` wrappers down to a structural node.
    pub fn base_of(&self, id: TypeId) -> TypeId {
        let mut current = id;
        loop {
            match &self.nodes[current.index()].kind {
                TypeKind::Named { body: Some(body), .. } => current = *body,
                TypeKind::Named { parent, .. } => current = *parent,
                _ => return current,
            }
        }
    }

    pub fn base_kind(&self, id: TypeId) -> &TypeKind {
        self.kind(self.base_of(id))
    }

    /// Whether `id` is `ancestor` or renames it, directly or transitively.
    pub fn is_instance(&self, id: TypeId, ancestor: TypeId) -> bool {
        let mut current = id;
        loop {
            if current == ancestor {
                return true;
            }
            match &self.nodes[current.index()].kind {
                TypeKind::Named { parent, .. } => current = *parent,
                _ => return false,
            }
        }
    }

    pub fn is_int(&self, id: TypeId) -> bool {
        matches!(
            self.base_kind(self.final_of(id)),
            TypeKind::UInt { .. }
                | TypeKind::Bits { .. }
                | TypeKind::Int
                | TypeKind::Pos
                | TypeKind::ElemIndex
                | TypeKind::RightSize
        )
    }

    pub fn is_bytes(&self, id: TypeId) -> bool {
        match self.base_kind(self.final_of(id)) {
            TypeKind::Bytes { .. } => true,
            TypeKind::Array(array) => array.kind == ArrayKind::ByteString,
            _ => false,
        }
    }

    pub fn is_stringish(&self, id: TypeId) -> bool {
        matches!(
            self.base_kind(self.final_of(id)),
            TypeKind::Str | TypeKind::StringLit(_)
        ) || matches!(
            self.base_kind(self.final_of(id)),
            TypeKind::Array(array) if array.kind == ArrayKind::String
        )
    }

    pub fn is_terminator(&self, id: TypeId) -> bool {
        matches!(self.base_kind(id), TypeKind::Token { terminator: true })
    }

    /// Chase `Named` parents without descending into subtype bodies; this is
    /// the nominal ancestry, as opposed to [`Types::base_of`] which finds
    /// what actually gets parsed.
    fn ancestry_has(&self, id: TypeId, pred: impl Fn(&TypeKind) -> bool) -> bool {
        let mut current = id;
        loop {
            let kind = &self.nodes[current.index()].kind;
            if pred(kind) {
                return true;
            }
            match kind {
                TypeKind::Named { parent, .. } => current = *parent,
                _ => return false,
            }
        }
    }

    pub fn is_tile(&self, id: TypeId) -> bool {
        self.ancestry_has(id, |kind| matches!(kind, TypeKind::Tile(_)))
    }

    pub fn is_color(&self, id: TypeId) -> bool {
        self.ancestry_has(id, |kind| matches!(kind, TypeKind::Color))
    }

    pub fn is_tileset(&self, id: TypeId) -> bool {
        matches!(
            self.base_kind(self.final_of(id)),
            TypeKind::Array(array) if array.kind == ArrayKind::Tileset
        )
    }

    pub fn is_palette(&self, id: TypeId) -> bool {
        matches!(
            self.base_kind(self.final_of(id)),
            TypeKind::Array(array) if array.kind == ArrayKind::Palette
        )
    }

    /// The array specialization for an element type.
    pub fn array_kind_for(&self, elem: TypeId) -> ArrayKind {
        let elem = self.final_of(elem);
        if self.is_tile(elem) {
            return ArrayKind::Tileset;
        }
        if self.is_color(elem) {
            return ArrayKind::Palette;
        }
        match self.base_kind(elem) {
            TypeKind::Bytes { .. } => ArrayKind::ByteString,
            TypeKind::Str | TypeKind::StringLit(_) => ArrayKind::String,
            TypeKind::Array(inner) if inner.kind == ArrayKind::Tileset => ArrayKind::Tileset,
            TypeKind::Match(match_ty) if match_ty.char_match => ArrayKind::String,
            _ => {
                if self.is_stringish(elem) {
                    ArrayKind::String
                } else {
                    ArrayKind::List
                }
            }
        }
    }

    /// Statically-known byte size of a type, when it has one.
    pub fn static_size(&self, id: TypeId) -> Option<u64> {
        match self.base_kind(id) {
            TypeKind::UInt { bytes } | TypeKind::Bytes { len: bytes } => Some(*bytes as u64),
            TypeKind::Tile(format) => Some(format.byte_len()),
            TypeKind::Null
            | TypeKind::Token { .. }
            | TypeKind::Pos
            | TypeKind::ElemIndex
            | TypeKind::RightSize
            | TypeKind::StringLit(_) => Some(0),
            TypeKind::Array(array) => match array.len {
                ArrayLen::Fixed(len) => Some(len * self.static_size(array.elem)?),
                _ => None,
            },
            TypeKind::Struct(struct_ty) => {
                let mut total = 0;
                for item in &struct_ty.items {
                    match item {
                        StructItem::Field {
                            target: FieldTarget::Name(_) | FieldTarget::Anon,
                            ty,
                        } => total += self.static_size(*ty)?,
                        StructItem::Save { .. } | StructItem::Debug { .. } => {}
                        StructItem::Field { ty, .. } if self.static_size(*ty) == Some(0) => {}
                        _ => return None,
                    }
                }
                Some(total)
            }
            // Computed values read nothing.
            TypeKind::FieldRef { .. }
            | TypeKind::TypeRef { .. }
            | TypeKind::IntLit(_)
            | TypeKind::Attr { .. }
            | TypeKind::IndexOf { .. }
            | TypeKind::Neg { .. }
            | TypeKind::BinOp { .. } => Some(0),
            _ => None,
        }
    }

    /// Whether values of two types may meet in a binary operator.
    pub fn op_compatible(&self, op: BinOp, lhs: TypeId, rhs: TypeId) -> bool {
        if op.is_comparison() {
            return true;
        }
        let (lhs_int, rhs_int) = (self.is_int(lhs), self.is_int(rhs));
        if lhs_int && rhs_int {
            return true;
        }
        // Repetition: bytes * count.
        if op == BinOp::Mul && self.is_bytes(lhs) && rhs_int {
            return true;
        }
        if op == BinOp::Add && self.is_bytes(lhs) && self.is_bytes(rhs) {
            return true;
        }
        if op == BinOp::Add && self.is_stringish(lhs) && self.is_stringish(rhs) {
            return true;
        }
        false
    }

    /// Human-readable name for messages and value labels.
    pub fn type_name(&self, interner: &StringInterner, id: TypeId) -> String {
        if let Some(name) = self.nodes[id.index()].name {
            return interner.lookup(name).to_owned();
        }
        match &self.nodes[id.index()].kind {
            TypeKind::Int => "int".to_owned(),
            TypeKind::Str => "str".to_owned(),
            TypeKind::StringLit(text) => format!("{text:?}"),
            TypeKind::Struct(_) => "{...}".to_owned(),
            TypeKind::Array(array) => match array.kind {
                ArrayKind::ByteString => "bytes".to_owned(),
                ArrayKind::String => "str".to_owned(),
                _ => format!("[{}]", self.type_name(interner, array.elem)),
            },
            TypeKind::Match(match_ty) => {
                format!("{} match", self.type_name(interner, match_ty.scrutinee))
            }
            TypeKind::Pointer { target, .. } => format!("@{}", self.type_name(interner, *target)),
            TypeKind::Pipe { left, right } | TypeKind::Combine { left, right } => format!(
                "{} | {}",
                self.type_name(interner, *left),
                self.type_name(interner, *right)
            ),
            TypeKind::Yield { inner } => format!("yield {}", self.type_name(interner, *inner)),
            TypeKind::ForeignKey { inner, .. } => {
                format!("{} -> ...", self.type_name(interner, *inner))
            }
            _ => "<anonymous>".to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    /// `TypeId` is used a lot. Ensure it doesn't grow accidentally.
    fn type_id_size() {
        assert_eq!(std::mem::size_of::<TypeId>(), 4);
    }

    #[test]
    fn prims_classify() {
        let mut interner = StringInterner::new();
        let types = Types::new(&mut interner);
        let lookup = |name: &str| {
            let name = interner.get(name).unwrap();
            types.prims.by_name[&name]
        };

        assert!(types.is_int(lookup("U8")));
        assert!(types.is_int(lookup("B3")));
        assert!(!types.is_int(lookup("Byte")));
        assert!(types.is_bytes(lookup("Short")));
        assert!(types.is_terminator(lookup("Terminator")));
        assert!(types.is_tile(lookup("GBTile")));
    }

    #[test]
    fn array_specialization() {
        let mut interner = StringInterner::new();
        let mut types = Types::new(&mut interner);
        let byte = {
            let name = interner.get("Byte").unwrap();
            types.prims.by_name[&name]
        };
        let tile = {
            let name = interner.get("NESTile").unwrap();
            types.prims.by_name[&name]
        };
        let u8_ty = {
            let name = interner.get("U8").unwrap();
            types.prims.by_name[&name]
        };

        assert_eq!(types.array_kind_for(byte), ArrayKind::ByteString);
        assert_eq!(types.array_kind_for(tile), ArrayKind::Tileset);
        assert_eq!(types.array_kind_for(u8_ty), ArrayKind::List);

        // A tileset of tilesets: rows of tiles still specialize.
        let row = types.add(
            TypeKind::Array(ArrayType {
                elem: tile,
                len: ArrayLen::Fixed(2),
                kind: ArrayKind::Tileset,
            }),
            None,
        );
        assert_eq!(types.array_kind_for(row), ArrayKind::Tileset);
    }

    #[test]
    fn static_sizes() {
        let mut interner = StringInterner::new();
        let mut types = Types::new(&mut interner);
        let u16_ty = {
            let name = interner.get("U16").unwrap();
            types.prims.by_name[&name]
        };
        assert_eq!(types.static_size(u16_ty), Some(2));

        let array = types.add(
            TypeKind::Array(ArrayType {
                elem: u16_ty,
                len: ArrayLen::Fixed(3),
                kind: ArrayKind::List,
            }),
            None,
        );
        assert_eq!(types.static_size(array), Some(6));

        let unbounded = types.add(
            TypeKind::Array(ArrayType {
                elem: u16_ty,
                len: ArrayLen::Unbounded,
                kind: ArrayKind::List,
            }),
            None,
        );
        assert_eq!(types.static_size(unbounded), None);
    }
}
