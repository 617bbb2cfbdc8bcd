//! Types related to source files.

use std::fmt;
use std::ops::{Deref, DerefMut, Range};

use crate::files::FileId;

// Interned strings.
pub type StringId = string_interner::symbol::SymbolU32;

/// String interner.
///
/// Names that the resolver and the interpreter look up on hot paths are
/// interned once at construction time and exposed as fields, so that the
/// interner does not need to be borrowed mutably just to spell `_root`.
pub struct StringInterner {
    strings: string_interner::StringInterner<
        string_interner::backend::BucketBackend<StringId>,
        std::hash::BuildHasherDefault<fxhash::FxHasher32>,
    >,
    /// The `_` placeholder name.
    pub underscore: StringId,
    /// The implicit binding that names the outermost structure.
    pub root: StringId,
    /// The implicit binding consulted by the `RightSize` primitive.
    pub right_size: StringId,
}

impl fmt::Debug for StringInterner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StringInterner")
            .field("len", &self.strings.len())
            .finish_non_exhaustive()
    }
}

impl Deref for StringInterner {
    type Target = string_interner::StringInterner<
        string_interner::backend::BucketBackend<StringId>,
        std::hash::BuildHasherDefault<fxhash::FxHasher32>,
    >;

    fn deref(&self) -> &Self::Target {
        &self.strings
    }
}

impl DerefMut for StringInterner {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.strings
    }
}

impl StringInterner {
    /// Construct a string interner holding only the well-known names.
    pub fn new() -> Self {
        let mut strings = string_interner::StringInterner::new();
        let underscore = strings.get_or_intern_static("_");
        let root = strings.get_or_intern_static("_root");
        let right_size = strings.get_or_intern_static("_right_size");
        Self {
            strings,
            underscore,
            root,
            right_size,
        }
    }

    /// Resolve an id, panicking on ids from a foreign interner.
    pub fn lookup(&self, id: StringId) -> &str {
        self.strings
            .resolve(id)
            .expect("string id not found in interner")
    }
}

impl Default for StringInterner {
    fn default() -> Self {
        Self::new()
    }
}

/// Byte offsets into source files.
pub type BytePos = u32;

/// Byte ranges in source files.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct ByteRange {
    file_id: FileId,
    start: BytePos,
    end: BytePos,
}

impl fmt::Debug for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ByteRange({}, {}..{})", self.file_id, self.start, self.end)
    }
}

impl ByteRange {
    pub const fn new(file_id: FileId, start: BytePos, end: BytePos) -> Self {
        Self {
            file_id,
            start,
            end,
        }
    }

    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    pub const fn start(&self) -> BytePos {
        self.start
    }

    pub const fn end(&self) -> BytePos {
        self.end
    }

    pub fn merge(&self, other: &Self) -> Self {
        Self::new(
            self.file_id,
            self.start.min(other.start),
            self.end.max(other.end),
        )
    }
}

impl From<ByteRange> for Range<usize> {
    fn from(range: ByteRange) -> Self {
        (range.start as usize)..(range.end as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    /// `ByteRange` is used a lot. Ensure it doesn't grow accidentally.
    fn byte_range_size() {
        assert_eq!(std::mem::size_of::<ByteRange>(), 12);
    }
}
