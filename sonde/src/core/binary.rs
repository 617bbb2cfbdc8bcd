//! Parsing binary data against the type graph.
//!
//! [`Machine`] walks the graph recursively, reading from a [`stream::Source`]
//! and building [`Value`] trees. Parsing keeps a context stack of frames:
//! one per struct being filled in, plus transient binding frames for match
//! captures and pipe metadata. Name lookups in expressions search the stack
//! from the innermost frame outward.

use std::fmt;

use fxhash::FxHashMap;
use itertools::Itertools;

use crate::core::value::{ForeignValue, StructValue, TileValue, Value, ValueKind};
use crate::core::{
    ArrayKind, ArrayLen, ArrayType, FieldSeg, FieldTarget, MatchType, StructItem, StructType,
    TypeId, TypeKind, Types,
};
use crate::driver::Options;
use crate::gfx;
use crate::source::{StringId, StringInterner};
use crate::surface::BinOp;

pub mod stream;

use stream::{BitReader, PipeBuf, PipeStream, Source};

/// Low-level stream failures.
#[derive(Debug, Clone)]
pub enum ReadError {
    UnexpectedEof { needed: usize, available: usize },
    /// A byte-level read while a bit read was in progress.
    UnalignedRead,
    UnsupportedSeek,
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadError::UnexpectedEof { needed, available } => write!(
                f,
                "unexpected end of data: needed {needed} byte(s), {available} available"
            ),
            ReadError::UnalignedRead => {
                write!(f, "byte read attempted while a bit read is in progress")
            }
            ReadError::UnsupportedSeek => write!(f, "this stream cannot seek"),
        }
    }
}

/// Errors raised while interpreting a schema over data.
#[derive(Debug)]
pub enum BinaryError {
    Read(ReadError),
    /// A match had no branch for the parsed value.
    Match { value: String, path: String },
    /// Something that is not bytes tried to travel through a pipe.
    PipeType { type_name: String, message: String },
    /// Everything else, annotated with the dotted field path.
    Parse { message: String, path: String },
    Io(std::io::Error),
}

impl fmt::Display for BinaryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinaryError::Read(error) => write!(f, "{error}"),
            BinaryError::Match { value, path } => {
                write!(f, "parsed value {value}, but not present in match\nPath: {path}")
            }
            BinaryError::PipeType { type_name, message } => {
                write!(f, "{message} (piping {type_name})")
            }
            BinaryError::Parse { message, path } => write!(f, "{message}\nPath: {path}"),
            BinaryError::Io(error) => write!(f, "{error}"),
        }
    }
}

impl std::error::Error for BinaryError {}

impl From<std::io::Error> for BinaryError {
    fn from(error: std::io::Error) -> Self {
        BinaryError::Io(error)
    }
}

enum Frame {
    /// A struct being filled in.
    Struct(StructValue),
    /// Transient bindings: match captures, pipe metadata.
    Bindings(FxHashMap<StringId, Value>),
}

#[derive(Debug, Clone)]
enum PathSeg {
    Name(String),
    Index(i64),
    Marker(&'static str),
}

impl fmt::Display for PathSeg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSeg::Name(name) => write!(f, "{name}"),
            PathSeg::Index(index) => write!(f, "{index}"),
            PathSeg::Marker(marker) => write!(f, "{marker}"),
        }
    }
}

/// The interpreter.
pub struct Machine<'schema> {
    types: &'schema Types,
    interner: &'schema StringInterner,
    options: &'schema Options,
    ctx: Vec<Frame>,
    path: Vec<PathSeg>,
}

impl<'schema> Machine<'schema> {
    pub fn new(
        types: &'schema Types,
        interner: &'schema StringInterner,
        options: &'schema Options,
    ) -> Self {
        Self {
            types,
            interner,
            options,
            ctx: Vec::new(),
            path: Vec::new(),
        }
    }

    /// Parse `data` from the beginning against the root type.
    pub fn parse(&mut self, root: TypeId, data: &[u8]) -> Result<Value, BinaryError> {
        let mut src = BitReader::new(data);
        self.parse_type(root, &mut src, None, None)
    }

    fn path_string(&self) -> String {
        self.path.iter().join(".")
    }

    fn fail(&self, message: impl Into<String>) -> BinaryError {
        BinaryError::Parse {
            message: message.into(),
            path: self.path_string(),
        }
    }

    pub(crate) fn describe_type(&self, ty: TypeId) -> String {
        self.types.type_name(self.interner, ty)
    }

    fn lookup_str(&self, name: StringId) -> &'schema str {
        self.interner.lookup(name)
    }

    /// Look a name up in the context stack, innermost frame first.
    fn lookup_value(&self, name: StringId) -> Option<Value> {
        if name == self.interner.root {
            return match self.ctx.first() {
                Some(Frame::Struct(fields)) => {
                    Some(Value::new(ValueKind::Struct(fields.clone())))
                }
                _ => None,
            };
        }
        for frame in self.ctx.iter().rev() {
            match frame {
                Frame::Struct(fields) => {
                    if let Some(value) = fields.get(self.lookup_str(name)) {
                        return Some(value.clone());
                    }
                }
                Frame::Bindings(bindings) => {
                    if let Some(value) = bindings.get(&name) {
                        return Some(value.clone());
                    }
                }
            }
        }
        None
    }

    fn parse_type(
        &mut self,
        ty: TypeId,
        src: &mut dyn Source,
        index: Option<i64>,
        mut pipe: Option<&mut PipeBuf>,
    ) -> Result<Value, BinaryError> {
        let types = self.types;
        let start = src.tell();
        let mut value = match types.kind(ty) {
            TypeKind::UInt { bytes } => {
                let read = src.read(self, *bytes as usize)?;
                let mut result = 0u64;
                for (i, byte) in read.iter().enumerate() {
                    result |= (*byte as u64) << (8 * i);
                }
                Value::new(ValueKind::Int(result as i64))
            }
            TypeKind::Bits { count } => {
                let result = src.read_bits(self, *count as u32)?;
                Value::new(ValueKind::Int(result as i64))
            }
            TypeKind::Bytes { len } => {
                let mut read = src.read(self, *len as usize)?;
                // Multi-byte raw reads mirror the integer byte order.
                read.reverse();
                Value::new(ValueKind::Bytes(read))
            }
            TypeKind::Token { terminator } => {
                let mut value = Value::new(ValueKind::Token {
                    ty,
                    terminator: *terminator,
                });
                value.label = types.name(ty).map(|name| self.lookup_str(name).to_owned());
                value
            }
            TypeKind::Null => Value::new(ValueKind::Null),
            TypeKind::Pos => {
                let pos = src
                    .tell()
                    .ok_or_else(|| self.fail("the stream position is not available in a pipe"))?;
                Value::new(ValueKind::Int(pos as i64))
            }
            TypeKind::ElemIndex => {
                let index =
                    index.ok_or_else(|| self.fail("index is only available inside an array"))?;
                Value::new(ValueKind::Int(index))
            }
            TypeKind::RightSize => self
                .lookup_value(self.interner.right_size)
                .unwrap_or_else(|| Value::new(ValueKind::Null)),
            TypeKind::Tile(format) => {
                let read = src.read(self, format.byte_len() as usize)?;
                Value::new(ValueKind::Tile(TileValue {
                    depth: format.depth(),
                    pixels: gfx::decode_tile(*format, &read),
                }))
            }
            TypeKind::Color => {
                return Err(self.fail(
                    "RGBColor is abstract: define a subtype with r, g, b and max fields",
                ))
            }
            TypeKind::StringLit(text) => Value::new(ValueKind::Str(text.clone())),
            TypeKind::Int | TypeKind::Str | TypeKind::Unresolved => {
                return Err(self.fail("internal error: abstract type reached the interpreter"))
            }
            TypeKind::Named { parent, body } => {
                let inner = body.unwrap_or(*parent);
                let mut value = self.parse_type(inner, src, index, pipe)?;
                if let Some(name) = types.name(ty) {
                    value.label = Some(self.lookup_str(name).to_owned());
                }
                value
            }
            TypeKind::Struct(struct_ty) => self.parse_struct(struct_ty, src, index, pipe)?,
            TypeKind::Array(array_ty) => self.parse_array(array_ty, src, pipe)?,
            TypeKind::Match(match_ty) => self.parse_match(match_ty, src, index, pipe)?,
            TypeKind::Pointer {
                addr,
                target,
                pipe_relative,
            } => self.parse_pointer(*addr, *target, *pipe_relative, src, index, pipe)?,
            TypeKind::Pipe { left, right } => {
                let right_size = types.static_size(*right);
                let mut pushed = false;
                if let Some(size) = right_size {
                    let mut bindings = FxHashMap::default();
                    bindings.insert(
                        self.interner.right_size,
                        Value::new(ValueKind::Int(size as i64)),
                    );
                    self.ctx.push(Frame::Bindings(bindings));
                    pushed = true;
                }
                let mut producer = PipeStream::new(&mut *src, *left, types.yields(*left));
                let result = self.parse_type(*right, &mut producer, index, pipe);
                if pushed {
                    self.ctx.pop();
                }
                result?
            }
            TypeKind::Combine { left, right } => {
                let tiles = self.parse_type(*left, src, index, pipe.as_deref_mut())?;
                let palette = self.parse_type(*right, src, index, pipe)?;
                Value::new(ValueKind::Image {
                    tiles: Box::new(tiles),
                    palette: Box::new(palette),
                })
            }
            TypeKind::Yield { inner } => {
                let value = self.parse_type(*inner, src, index, pipe.as_deref_mut())?;
                let buf = match pipe {
                    Some(buf) => buf,
                    None => return Err(self.fail("cannot yield outside of a pipe")),
                };
                match value.kind {
                    ValueKind::Bytes(bytes) => buf.append(&bytes),
                    _ => {
                        return Err(BinaryError::PipeType {
                            type_name: self.describe_type(*inner),
                            message: "only bytes may be yielded through a pipe".to_owned(),
                        })
                    }
                }
                Value::new(ValueKind::Null)
            }
            TypeKind::ForeignKey { inner, path } => {
                let key = self.parse_type(*inner, src, index, pipe)?;
                let key = key
                    .as_int()
                    .ok_or_else(|| self.fail("foreign keys must be integers"))?;
                Value::new(ValueKind::Foreign(ForeignValue {
                    key,
                    path: path
                        .iter()
                        .map(|segment| self.lookup_str(*segment).to_owned())
                        .collect(),
                }))
            }

            // Value expressions.
            TypeKind::FieldRef { name } => self.lookup_value(*name).ok_or_else(|| {
                self.fail(format!("`{}` not found in context", self.lookup_str(*name)))
            })?,
            TypeKind::TypeRef { ty: target } => {
                let mut value = Value::new(ValueKind::TypeHandle(*target));
                value.label = Some(self.describe_type(*target));
                value
            }
            TypeKind::IntLit(value) => Value::new(ValueKind::Int(*value)),
            TypeKind::Attr { base, name } => {
                let base = self.parse_type(*base, src, index, pipe)?;
                self.eval_attr(&base, *name)?
            }
            TypeKind::IndexOf { base, index: index_expr } => {
                let base_value = self.parse_type(*base, src, index, pipe.as_deref_mut())?;
                let index_value = self.parse_type(*index_expr, src, index, pipe)?;
                let i = index_value
                    .as_int()
                    .ok_or_else(|| self.fail("index must be an integer"))?;
                let i = usize::try_from(i)
                    .map_err(|_| self.fail(format!("index {i} is negative")))?;
                base_value
                    .index(i)
                    .cloned()
                    .ok_or_else(|| self.fail(format!("index {i} out of bounds")))?
            }
            TypeKind::Neg { operand } => {
                let operand = self.parse_type(*operand, src, index, pipe)?;
                let value = operand
                    .as_int()
                    .ok_or_else(|| self.fail("negation needs an integer"))?;
                Value::new(ValueKind::Int(-value))
            }
            TypeKind::BinOp { op, lhs, rhs } => {
                let lhs = self.parse_type(*lhs, src, index, pipe.as_deref_mut())?;
                let rhs = self.parse_type(*rhs, src, index, pipe)?;
                self.eval_binop(*op, &lhs, &rhs)?
            }
        };

        if value.meta.address.is_none() {
            value.meta.address = start;
            if let (Some(start), Some(end)) = (start, src.tell()) {
                if end >= start {
                    value.meta.size = Some(end - start);
                }
            }
        }
        if self.options.rich && value.meta.path.is_none() {
            value.meta.path = Some(self.path_string());
        }
        Ok(value)
    }

    // ========== Structs ==========

    fn parse_struct(
        &mut self,
        struct_ty: &'schema StructType,
        src: &mut dyn Source,
        index: Option<i64>,
        pipe: Option<&mut PipeBuf>,
    ) -> Result<Value, BinaryError> {
        self.ctx.push(Frame::Struct(StructValue::new()));
        let result = self.parse_struct_items(&struct_ty.items, src, index, pipe);
        let frame = match self.ctx.pop() {
            Some(Frame::Struct(fields)) => fields,
            _ => unreachable!("struct frame imbalance"),
        };
        let returned = result?;
        match returned {
            Some(value) => Ok(value),
            None => {
                let error = frame.fields.iter().any(|(_, value)| value.meta.error);
                let mut value = Value::new(ValueKind::Struct(frame));
                value.meta.error = error;
                Ok(value)
            }
        }
    }

    /// Parse a run of struct items into the current frame. Returns the
    /// `= expr` value if one was evaluated.
    fn parse_struct_items(
        &mut self,
        items: &'schema [StructItem],
        src: &mut dyn Source,
        index: Option<i64>,
        mut pipe: Option<&mut PipeBuf>,
    ) -> Result<Option<Value>, BinaryError> {
        let mut returned = None;
        for item in items {
            match item {
                StructItem::Field { target, ty } => {
                    self.parse_field(target, *ty, src, index, pipe.as_deref_mut())?;
                }
                StructItem::If { cond, then, els } => {
                    let cond = self.parse_type(*cond, src, index, pipe.as_deref_mut())?;
                    let branch = if self.truthy(&cond)? { Some(*then) } else { *els };
                    if let Some(branch) = branch {
                        let body = match self.types.base_kind(branch) {
                            TypeKind::Struct(body) => body,
                            _ => unreachable!("if branches resolve to structs"),
                        };
                        if let Some(value) =
                            self.parse_struct_items(&body.items, src, index, pipe.as_deref_mut())?
                        {
                            returned = Some(value);
                        }
                    }
                }
                StructItem::Yield { ty } => {
                    self.parse_type(*ty, src, index, pipe.as_deref_mut())?;
                }
                StructItem::Save { name } => self.save_field(*name)?,
                StructItem::Debug { name } => {
                    let value = self
                        .lookup_value(*name)
                        .ok_or_else(|| self.fail(format!(
                            "`{}` not found in context",
                            self.lookup_str(*name)
                        )))?;
                    eprintln!(
                        "{}.{} = {}",
                        self.path_string(),
                        self.lookup_str(*name),
                        value
                    );
                }
                StructItem::Return { expr } => {
                    let value = self.parse_type(*expr, src, index, pipe.as_deref_mut())?;
                    returned = Some(value);
                }
            }
        }
        Ok(returned)
    }

    fn parse_field(
        &mut self,
        target: &'schema FieldTarget,
        ty: TypeId,
        src: &mut dyn Source,
        index: Option<i64>,
        pipe: Option<&mut PipeBuf>,
    ) -> Result<(), BinaryError> {
        match target {
            FieldTarget::Name(name) => self.path.push(PathSeg::Name(
                self.lookup_str(*name).to_owned(),
            )),
            FieldTarget::Path(segs) => self.path.push(PathSeg::Name(
                segs.iter().map(|seg| self.lookup_str(seg.name)).join("."),
            )),
            FieldTarget::Anon => self.path.push(PathSeg::Marker("_")),
        }
        let result = self.parse_type(ty, src, index, pipe);
        self.path.pop();

        let value = match result {
            Ok(value) => value,
            Err(error) if self.options.lenient && !matches!(target, FieldTarget::Anon) => {
                let mut value = Value::new(ValueKind::Error(error.to_string()));
                value.meta.error = true;
                value
            }
            Err(error) => return Err(error),
        };

        match target {
            FieldTarget::Anon => Ok(()),
            _ if value.is_null() => Ok(()),
            FieldTarget::Name(name) => {
                let name = self.lookup_str(*name).to_owned();
                match self.ctx.last_mut() {
                    Some(Frame::Struct(fields)) => {
                        fields.set(&name, value);
                        Ok(())
                    }
                    _ => Err(self.fail("internal error: field outside of a struct")),
                }
            }
            FieldTarget::Path(segs) => self.assign_path(segs, value),
        }
    }

    /// `outer.inner Type` and `list[].name Type` write into already-parsed
    /// fields of the current struct.
    fn assign_path(&mut self, segs: &'schema [FieldSeg], value: Value) -> Result<(), BinaryError> {
        let head = &segs[0];
        let head_name = self.lookup_str(head.name).to_owned();
        let rest = &segs[1..];
        let path = self.path_string();
        let interner = self.interner;
        let frame = match self.ctx.last_mut() {
            Some(Frame::Struct(fields)) => fields,
            _ => return Err(BinaryError::Parse {
                message: "internal error: field outside of a struct".to_owned(),
                path,
            }),
        };
        let target = frame.get_mut(&head_name).ok_or_else(|| BinaryError::Parse {
            message: format!("`{head_name}` not found in context"),
            path: path.clone(),
        })?;
        assign_into(interner, target, head.each, rest, value).map_err(|message| {
            BinaryError::Parse { message, path }
        })
    }

    fn save_field(&mut self, name: StringId) -> Result<(), BinaryError> {
        let value = self.lookup_value(name).ok_or_else(|| {
            self.fail(format!("`{}` not found in context", self.lookup_str(name)))
        })?;
        let dir = match &self.options.output_dir {
            Some(dir) => dir.clone(),
            None => return Err(self.fail("saving requires an output directory")),
        };
        let mut path: Vec<String> = self
            .path
            .iter()
            .filter_map(|seg| match seg {
                PathSeg::Name(name) => Some(name.clone()),
                PathSeg::Index(index) => Some(index.to_string()),
                PathSeg::Marker(_) => None,
            })
            .collect();
        path.push(self.lookup_str(name).to_owned());
        gfx::save_value(&value, &dir, &path).map_err(|error| match error {
            gfx::SaveError::Io(error) => BinaryError::Io(error),
            gfx::SaveError::Unsupported(message) => self.fail(message),
        })
    }

    // ========== Arrays ==========

    fn parse_array(
        &mut self,
        array_ty: &'schema ArrayType,
        src: &mut dyn Source,
        mut pipe: Option<&mut PipeBuf>,
    ) -> Result<Value, BinaryError> {
        let len = match &array_ty.len {
            ArrayLen::Fixed(len) => Some(*len),
            ArrayLen::Expr(expr) => {
                let value = self.parse_type(*expr, src, None, pipe.as_deref_mut())?;
                let len = value
                    .as_int()
                    .ok_or_else(|| self.fail("array length must be an integer"))?;
                Some(u64::try_from(len).map_err(|_| {
                    self.fail(format!("array length {len} is negative"))
                })?)
            }
            ArrayLen::Unbounded => None,
        };

        let mut items = Vec::new();
        let mut index = 0i64;
        loop {
            match len {
                Some(len) if index as u64 >= len => break,
                Some(_) => {}
                // Unbounded arrays stop at the end of the stream.
                None => {
                    if src.at_end(self)? {
                        break;
                    }
                }
            }
            self.path.push(PathSeg::Index(index));
            let result = self.parse_type(array_ty.elem, src, Some(index), pipe.as_deref_mut());
            self.path.pop();
            let value = result?;

            if len.is_none() {
                // A terminator token ends the list and is dropped; a zero
                // integer ends it and is kept.
                if value.is_terminator() {
                    break;
                }
                if value.as_int() == Some(0) {
                    items.push(value);
                    break;
                }
            }
            if !value.is_null() {
                items.push(value);
            }
            index += 1;
        }

        self.collapse_array(items, array_ty.kind)
    }

    /// Apply the array specialization to the collected elements.
    fn collapse_array(
        &self,
        items: Vec<Value>,
        kind: ArrayKind,
    ) -> Result<Value, BinaryError> {
        let error = items.iter().any(|value| value.meta.error);
        let mut value = match kind {
            ArrayKind::ByteString => {
                let mut bytes = Vec::new();
                for item in &items {
                    match &item.kind {
                        ValueKind::Bytes(chunk) => bytes.extend_from_slice(chunk),
                        _ => return Err(self.fail("byte strings may only contain bytes")),
                    }
                }
                Value::new(ValueKind::Bytes(bytes))
            }
            ArrayKind::String
                if items
                    .iter()
                    .all(|item| matches!(item.kind, ValueKind::Str(_))) =>
            {
                let mut text = String::new();
                for item in &items {
                    if let ValueKind::Str(chunk) = &item.kind {
                        text.push_str(chunk);
                    }
                }
                Value::new(ValueKind::Str(text))
            }
            kind => Value::new(ValueKind::Array { items, kind }),
        };
        value.meta.error = error;
        Ok(value)
    }

    // ========== Matches ==========

    fn parse_match(
        &mut self,
        match_ty: &'schema MatchType,
        src: &mut dyn Source,
        index: Option<i64>,
        mut pipe: Option<&mut PipeBuf>,
    ) -> Result<Value, BinaryError> {
        let scrutinee = self.parse_type(match_ty.scrutinee, src, index, pipe.as_deref_mut())?;

        let arm = match &scrutinee.kind {
            ValueKind::Int(value) => match_ty.ints.get(value).copied().or_else(|| {
                match_ty
                    .ranges
                    .iter()
                    .find(|(low, high, _)| low <= value && value <= high)
                    .map(|(_, _, arm)| *arm)
            }),
            ValueKind::Str(text) => match_ty.strs.get(text).copied(),
            _ => None,
        };

        if let Some(arm) = arm {
            return self.parse_type(arm, src, index, pipe);
        }

        match &match_ty.default {
            Some((capture, arm)) => {
                let mut pushed = false;
                if let Some(capture) = capture {
                    let mut bindings = FxHashMap::default();
                    bindings.insert(*capture, scrutinee.clone());
                    self.ctx.push(Frame::Bindings(bindings));
                    pushed = true;
                }
                let result = self.parse_type(*arm, src, index, pipe);
                if pushed {
                    self.ctx.pop();
                }
                result
            }
            None => Err(BinaryError::Match {
                value: scrutinee.to_string(),
                path: self.path_string(),
            }),
        }
    }

    // ========== Pointers and pipes ==========

    fn parse_pointer(
        &mut self,
        addr: TypeId,
        target: TypeId,
        pipe_relative: bool,
        src: &mut dyn Source,
        index: Option<i64>,
        mut pipe: Option<&mut PipeBuf>,
    ) -> Result<Value, BinaryError> {
        self.path.push(PathSeg::Marker("(addr)"));
        let addr_result = self.parse_type(addr, src, index, pipe.as_deref_mut());
        self.path.pop();
        let address = addr_result?
            .as_int()
            .ok_or_else(|| self.fail("pointer address must be an integer"))?;

        if pipe_relative {
            let buf = match pipe {
                Some(buf) => buf,
                None => return Err(self.fail("pipe pointers only work inside a pipe")),
            };
            // Negative addresses count back from the write position.
            let origin = if address < 0 {
                buf.write_pos() as i64 + address
            } else {
                address
            };
            let origin = usize::try_from(origin).map_err(|_| {
                self.fail(format!("pipe pointer address {origin} is before the buffer"))
            })?;
            if origin > buf.data.len() {
                return Err(self.fail(format!(
                    "pipe pointer address {origin} is past the buffer ({} bytes)",
                    buf.data.len()
                )));
            }
            let data = &buf.data[..];
            let mut reader = BitReader::new(data);
            reader.seek(origin as u64)?;
            let mut value = self.parse_type(target, &mut reader, index, None)?;
            value.meta.pointer = Some(origin as u64);
            value.meta.address = Some(origin as u64);
            return Ok(value);
        }

        let address = u64::try_from(address)
            .map_err(|_| self.fail(format!("pointer address {address} is negative")))?;
        let checkpoint = src
            .checkpoint()
            .ok_or_else(|| self.fail("cannot follow an absolute pointer inside a pipe"))?;
        src.seek(address)?;
        let result = self.parse_type(target, src, index, pipe);
        src.restore(checkpoint);
        let mut value = result?;
        value.meta.pointer = Some(address);
        Ok(value)
    }

    /// Run one step of a pipe's producer, appending its output to `buf`.
    /// Called by [`PipeStream`] when the consumer runs short.
    pub(crate) fn run_pipe_producer(
        &mut self,
        left: TypeId,
        outer: &mut dyn Source,
        buf: &mut PipeBuf,
    ) -> Result<(), BinaryError> {
        self.path.push(PathSeg::Marker("<pipe>"));
        let result = self.parse_type(left, outer, None, Some(buf));
        self.path.pop();
        let value = result?;
        if self.types.yields(left) {
            // A yielding producer fills the buffer as a side effect.
            return Ok(());
        }
        match value.kind {
            ValueKind::Bytes(bytes) => {
                buf.append(&bytes);
                Ok(())
            }
            ValueKind::Null => Ok(()),
            _ => Err(BinaryError::PipeType {
                type_name: self.describe_type(left),
                message: "only bytes may be passed through a pipe".to_owned(),
            }),
        }
    }

    // ========== Expressions ==========

    fn truthy(&self, value: &Value) -> Result<bool, BinaryError> {
        match &value.kind {
            ValueKind::Int(value) => Ok(*value != 0),
            ValueKind::Null => Ok(false),
            _ => Err(self.fail("condition must be an integer")),
        }
    }

    fn eval_attr(&self, base: &Value, name: StringId) -> Result<Value, BinaryError> {
        let attr = self.lookup_str(name);
        match &base.kind {
            ValueKind::Struct(fields) => fields.get(attr).cloned().ok_or_else(|| {
                self.fail(format!("no field `{attr}` on {}", base))
            }),
            // Branch types of a match are addressable by name.
            ValueKind::TypeHandle(ty) => match self.types.base_kind(*ty) {
                TypeKind::Match(match_ty) => match match_ty.branch_names.get(&name) {
                    Some(branch) => {
                        let mut value = Value::new(ValueKind::TypeHandle(*branch));
                        value.label = Some(self.describe_type(*branch));
                        Ok(value)
                    }
                    None => Err(self.fail(format!(
                        "`{}` has no branch named `{attr}`",
                        self.describe_type(*ty)
                    ))),
                },
                _ => Err(self.fail(format!(
                    "`{}` has no attribute `{attr}`",
                    self.describe_type(*ty)
                ))),
            },
            _ => Err(self.fail(format!("no attribute `{attr}` on {}", base))),
        }
    }

    fn eval_binop(&self, op: BinOp, lhs: &Value, rhs: &Value) -> Result<Value, BinaryError> {
        use ValueKind::*;

        if op.is_comparison() {
            let equal = self.values_equal(lhs, rhs);
            let result = match op {
                BinOp::Eq => equal,
                BinOp::Ne => !equal,
                _ => {
                    let (a, b) = match (lhs.as_int(), rhs.as_int()) {
                        (Some(a), Some(b)) => (a, b),
                        _ => {
                            return Err(self.fail(format!(
                                "cannot order {} and {}",
                                lhs, rhs
                            )))
                        }
                    };
                    match op {
                        BinOp::Lt => a < b,
                        BinOp::Le => a <= b,
                        BinOp::Gt => a > b,
                        BinOp::Ge => a >= b,
                        _ => unreachable!(),
                    }
                }
            };
            return Ok(Value::new(Int(result as i64)));
        }

        let value = match (&lhs.kind, &rhs.kind) {
            (Int(a), Int(b)) => Int(match op {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::Div => {
                    if *b == 0 {
                        return Err(self.fail("division by zero"));
                    }
                    a.div_euclid(*b)
                }
                BinOp::Mod => {
                    if *b == 0 {
                        return Err(self.fail("division by zero"));
                    }
                    a.rem_euclid(*b)
                }
                _ => unreachable!(),
            }),
            (Bytes(a), Bytes(b)) if op == BinOp::Add => {
                let mut bytes = a.clone();
                bytes.extend_from_slice(b);
                Bytes(bytes)
            }
            (Bytes(a), Int(b)) if op == BinOp::Mul => {
                let count = usize::try_from(*b)
                    .map_err(|_| self.fail("cannot repeat bytes a negative number of times"))?;
                Bytes(a.repeat(count))
            }
            (Str(a), Str(b)) if op == BinOp::Add => {
                let mut text = a.clone();
                text.push_str(b);
                Str(text)
            }
            _ => {
                return Err(self.fail(format!(
                    "unsupported operands for `{}`: {} and {}",
                    op.symbol(),
                    lhs,
                    rhs
                )))
            }
        };
        Ok(Value::new(value))
    }

    fn values_equal(&self, lhs: &Value, rhs: &Value) -> bool {
        match (&lhs.kind, &rhs.kind) {
            (ValueKind::Int(a), ValueKind::Int(b)) => a == b,
            (ValueKind::Str(a), ValueKind::Str(b)) => a == b,
            (ValueKind::Bytes(a), ValueKind::Bytes(b)) => a == b,
            (ValueKind::Null, ValueKind::Null) => true,
            (ValueKind::Token { ty: a, .. }, ValueKind::Token { ty: b, .. }) => a == b,
            (ValueKind::Token { ty, .. }, ValueKind::TypeHandle(handle))
            | (ValueKind::TypeHandle(handle), ValueKind::Token { ty, .. }) => {
                self.types.is_instance(*ty, *handle)
            }
            (ValueKind::TypeHandle(a), ValueKind::TypeHandle(b)) => a == b,
            _ => false,
        }
    }
}

/// Recursive part of foreign field assignment.
fn assign_into(
    interner: &StringInterner,
    target: &mut Value,
    each: bool,
    rest: &[FieldSeg],
    value: Value,
) -> Result<(), String> {
    if each {
        let items = match &mut target.kind {
            ValueKind::Array { items, .. } => items,
            _ => return Err("`[]` assignment needs a list on the left".to_owned()),
        };
        let values = match value.kind {
            ValueKind::Array { items, .. } => items,
            _ => return Err("`[]` assignment needs a list of parsed values".to_owned()),
        };
        if items.len() != values.len() {
            return Err(format!(
                "`[]` assignment length mismatch: {} elements, {} values",
                items.len(),
                values.len()
            ));
        }
        for (item, value) in items.iter_mut().zip(values) {
            assign_field(interner, item, rest, value)?;
        }
        Ok(())
    } else {
        assign_field(interner, target, rest, value)
    }
}

fn assign_field(
    interner: &StringInterner,
    target: &mut Value,
    segs: &[FieldSeg],
    value: Value,
) -> Result<(), String> {
    match segs {
        [] => Err("assignment path is empty".to_owned()),
        [last] if !last.each => {
            let fields = match &mut target.kind {
                ValueKind::Struct(fields) => fields,
                _ => return Err("cannot assign a field into a non-struct value".to_owned()),
            };
            fields.set(interner.lookup(last.name), value);
            Ok(())
        }
        [seg, rest @ ..] => {
            let name = interner.lookup(seg.name);
            let fields = match &mut target.kind {
                ValueKind::Struct(fields) => fields,
                _ => return Err("cannot assign a field into a non-struct value".to_owned()),
            };
            let child = fields
                .get_mut(name)
                .ok_or_else(|| format!("`{name}` not found while assigning"))?;
            assign_into(interner, child, seg.each, rest, value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ArrayKind, ArrayLen, ArrayType};

    fn setup() -> (StringInterner, Types) {
        let mut interner = StringInterner::new();
        let types = Types::new(&mut interner);
        (interner, types)
    }

    fn prim(types: &Types, interner: &StringInterner, name: &str) -> TypeId {
        let name = interner.get(name).unwrap();
        types.prims.by_name[&name]
    }

    fn run(types: &Types, interner: &StringInterner, root: TypeId, data: &[u8]) -> Value {
        let options = Options::default();
        let mut machine = Machine::new(types, interner, &options);
        machine.parse(root, data).unwrap()
    }

    #[test]
    fn integers_read_little_endian() {
        let (interner, types) = setup();
        let u16 = prim(&types, &interner, "U16");
        let value = run(&types, &interner, u16, &[0x34, 0x12]);
        assert_eq!(value.as_int(), Some(0x1234));
        assert_eq!(value.address(), Some(0));
        assert_eq!(value.size(), Some(2));
    }

    #[test]
    fn computed_fields_see_earlier_fields() {
        let (mut interner, mut types) = setup();
        let u8 = prim(&types, &interner, "U8");
        let a = interner.get_or_intern("a");
        let b = interner.get_or_intern("b");
        let sum = interner.get_or_intern("sum");
        let a_ref = types.add(TypeKind::FieldRef { name: a }, None);
        let b_ref = types.add(TypeKind::FieldRef { name: b }, None);
        let sum_expr = types.add(
            TypeKind::BinOp {
                op: BinOp::Add,
                lhs: a_ref,
                rhs: b_ref,
            },
            None,
        );
        let root = types.add(
            TypeKind::Struct(StructType {
                items: vec![
                    StructItem::Field {
                        target: FieldTarget::Name(a),
                        ty: u8,
                    },
                    StructItem::Field {
                        target: FieldTarget::Name(b),
                        ty: u8,
                    },
                    StructItem::Field {
                        target: FieldTarget::Name(sum),
                        ty: sum_expr,
                    },
                ],
                embed: false,
            }),
            None,
        );

        let value = run(&types, &interner, root, &[10, 20]);
        assert_eq!(value.get("a").unwrap().as_int(), Some(10));
        assert_eq!(value.get("sum").unwrap().as_int(), Some(30));
    }

    #[test]
    fn match_default_binds_the_discriminant() {
        let (mut interner, mut types) = setup();
        let u8 = prim(&types, &interner, "U8");
        let other = interner.get_or_intern("other");
        let other_ref = types.add(TypeKind::FieldRef { name: other }, None);
        let one = types.add(TypeKind::IntLit(100), None);
        let root = types.add(
            TypeKind::Match(MatchType {
                scrutinee: u8,
                char_match: false,
                ints: [(1, one)].into_iter().collect(),
                strs: FxHashMap::default(),
                ranges: Vec::new(),
                default: Some((Some(other), other_ref)),
                branch_names: FxHashMap::default(),
            }),
            None,
        );

        assert_eq!(run(&types, &interner, root, &[1]).as_int(), Some(100));
        assert_eq!(run(&types, &interner, root, &[7]).as_int(), Some(7));
    }

    #[test]
    fn match_without_a_branch_reports_the_value() {
        let (interner, types) = setup();
        let u8 = prim(&types, &interner, "U8");
        let mut types = types;
        let root = types.add(
            TypeKind::Match(MatchType {
                scrutinee: u8,
                char_match: false,
                ints: FxHashMap::default(),
                strs: FxHashMap::default(),
                ranges: Vec::new(),
                default: None,
                branch_names: FxHashMap::default(),
            }),
            None,
        );

        let options = Options::default();
        let mut machine = Machine::new(&types, &interner, &options);
        let error = machine.parse(root, &[9]).unwrap_err();
        assert!(matches!(error, BinaryError::Match { ref value, .. } if value == "9"));
    }

    #[test]
    fn pointers_restore_the_stream_position() {
        let (mut interner, mut types) = setup();
        let u8 = prim(&types, &interner, "U8");
        let far = interner.get_or_intern("far");
        let next = interner.get_or_intern("next");
        let pointer = types.add(
            TypeKind::Pointer {
                addr: u8,
                target: u8,
                pipe_relative: false,
            },
            None,
        );
        let root = types.add(
            TypeKind::Struct(StructType {
                items: vec![
                    StructItem::Field {
                        target: FieldTarget::Name(far),
                        ty: pointer,
                    },
                    StructItem::Field {
                        target: FieldTarget::Name(next),
                        ty: u8,
                    },
                ],
                embed: false,
            }),
            None,
        );

        let value = run(&types, &interner, root, &[0x02, 0xaa, 0xbb]);
        let far = value.get("far").unwrap();
        assert_eq!(far.as_int(), Some(0xbb));
        assert_eq!(far.pointer(), Some(2));
        assert_eq!(far.address(), Some(2));
        assert_eq!(value.get("next").unwrap().as_int(), Some(0xaa));
    }

    #[test]
    fn pipes_deliver_bytes_to_the_right_side() {
        let (interner, mut types) = setup();
        let byte = prim(&types, &interner, "Byte");
        let u16 = prim(&types, &interner, "U16");
        let left = types.add(
            TypeKind::Array(ArrayType {
                elem: byte,
                len: ArrayLen::Fixed(2),
                kind: ArrayKind::ByteString,
            }),
            None,
        );
        let root = types.add(TypeKind::Pipe { left, right: u16 }, None);

        let value = run(&types, &interner, root, &[0x34, 0x12]);
        assert_eq!(value.as_int(), Some(0x1234));
    }

    #[test]
    fn yielding_producers_run_once() {
        let (interner, mut types) = setup();
        let byte = prim(&types, &interner, "Byte");
        let u16 = prim(&types, &interner, "U16");
        let bytes = types.add(
            TypeKind::Array(ArrayType {
                elem: byte,
                len: ArrayLen::Fixed(2),
                kind: ArrayKind::ByteString,
            }),
            None,
        );
        let yield_node = types.add(TypeKind::Yield { inner: bytes }, None);
        let left = types.add(
            TypeKind::Struct(StructType {
                items: vec![StructItem::Yield { ty: yield_node }],
                embed: false,
            }),
            None,
        );
        types.set_yields(left, true);
        let root = types.add(TypeKind::Pipe { left, right: u16 }, None);

        let value = run(&types, &interner, root, &[0x34, 0x12]);
        assert_eq!(value.as_int(), Some(0x1234));
    }

    #[test]
    fn unbounded_arrays_keep_their_zero_terminator() {
        let (interner, mut types) = setup();
        let u8 = prim(&types, &interner, "U8");
        let root = types.add(
            TypeKind::Array(ArrayType {
                elem: u8,
                len: ArrayLen::Unbounded,
                kind: ArrayKind::List,
            }),
            None,
        );

        let value = run(&types, &interner, root, &[1, 2, 0, 9]);
        let items = value.items().unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[2].as_int(), Some(0));
    }

    #[test]
    fn lenient_mode_captures_field_errors() {
        let (mut interner, types) = setup();
        let u16 = prim(&types, &interner, "U16");
        let a = interner.get_or_intern("a");
        let mut types = types;
        let root = types.add(
            TypeKind::Struct(StructType {
                items: vec![StructItem::Field {
                    target: FieldTarget::Name(a),
                    ty: u16,
                }],
                embed: false,
            }),
            None,
        );

        let options = Options {
            lenient: true,
            ..Options::default()
        };
        let mut machine = Machine::new(&types, &interner, &options);
        let value = machine.parse(root, &[0x01]).unwrap();
        assert!(value.has_error());
        assert!(matches!(
            value.get("a").unwrap().kind,
            ValueKind::Error(_)
        ));
    }
}
