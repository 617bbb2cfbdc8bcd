//! Resolving the surface tree into a closed type graph.
//!
//! Resolution runs once per module, top-down, threading a scope stack. Each
//! struct body contributes a scope holding its locally defined types and the
//! fields resolved so far; names are looked up innermost-first. Type names
//! start uppercase and field names lowercase, which is how a bare name is
//! classified. Definitions in a body are registered (with reserved graph
//! slots) before any of them is resolved, so sibling definitions may refer
//! to each other and to themselves.

use codespan_reporting::diagnostic::{Diagnostic, Label};
use fxhash::FxHashMap;
use levenshtein::levenshtein;

use crate::core::{
    ArrayKind, ArrayLen, ArrayType, FieldSeg, FieldTarget, MatchType, StructItem, StructType,
    TypeId, TypeKind, Types,
};
use crate::files::FileId;
use crate::source::{ByteRange, StringId, StringInterner};
use crate::surface::{
    Body, BranchArm, Expr, Item, MatchKey, Module, Type, TypeDef, UnOp,
};

/// A definition that cannot be turned into a schema. Always fatal; there is
/// no partial resolution.
#[derive(Debug)]
pub struct ResolveError {
    pub message: String,
    pub path: String,
    pub range: Option<ByteRange>,
}

impl std::fmt::Display for ResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}\nPath: {}", self.message, self.path)
        }
    }
}

impl std::error::Error for ResolveError {}

impl ResolveError {
    pub fn to_diagnostic(&self) -> Diagnostic<FileId> {
        let diagnostic = Diagnostic::error().with_message(self.message.clone());
        match self.range {
            Some(range) => diagnostic.with_labels(vec![Label::primary(
                range.file_id(),
                range,
            )]),
            None => diagnostic,
        }
    }
}

#[derive(Clone)]
enum Entry {
    Type(TypeId),
    /// A parametric definition, re-resolved at every call site.
    Func(TypeDef),
}

#[derive(Default)]
struct Scope {
    types: FxHashMap<StringId, Entry>,
    /// Fields resolved so far, for expression lookups and duplicate checks.
    fields: FxHashMap<StringId, TypeId>,
}

/// Resolve a whole module into the type graph, returning the root type.
pub fn resolve_module(
    types: &mut Types,
    interner: &mut StringInterner,
    module: &Module,
) -> Result<TypeId, ResolveError> {
    let mut resolver = Resolver {
        types,
        interner,
        scopes: Vec::new(),
        path: Vec::new(),
    };
    resolver.resolve_body(&module.body, false)
}

struct Resolver<'a> {
    types: &'a mut Types,
    interner: &'a mut StringInterner,
    scopes: Vec<Scope>,
    path: Vec<String>,
}

impl<'a> Resolver<'a> {
    fn fail(&self, range: ByteRange, message: impl Into<String>) -> ResolveError {
        ResolveError {
            message: message.into(),
            path: self.path.join("."),
            range: Some(range),
        }
    }

    fn name(&self, id: StringId) -> &str {
        self.interner.lookup(id)
    }

    // ========== Name lookup ==========

    fn lookup_type(&self, name: StringId) -> Option<Entry> {
        for scope in self.scopes.iter().rev() {
            if let Some(entry) = scope.types.get(&name) {
                return Some(entry.clone());
            }
        }
        self.types.prims.by_name.get(&name).copied().map(Entry::Type)
    }

    fn lookup_field(&self, name: StringId) -> Option<TypeId> {
        for scope in self.scopes.iter().rev() {
            if let Some(ty) = scope.fields.get(&name) {
                return Some(*ty);
            }
        }
        None
    }

    /// A "did you mean" suggestion drawn from everything visible here.
    fn hint(&self, wanted: &str) -> Option<String> {
        let mut best: Option<(usize, String)> = None;
        let mut consider = |candidate: &str| {
            // An exact case-insensitive match outranks every edit-distance
            // neighbor: `u8` suggests `U8`, never `B8`.
            let distance = if wanted.eq_ignore_ascii_case(candidate) {
                0
            } else {
                levenshtein(wanted, candidate)
            };
            if distance <= 2 {
                match &best {
                    Some((current, _)) if *current <= distance => {}
                    _ => best = Some((distance, candidate.to_owned())),
                }
            }
        };
        for scope in &self.scopes {
            for name in scope.types.keys().chain(scope.fields.keys()) {
                consider(self.name(*name));
            }
        }
        for name in self.types.prims.by_name.keys() {
            consider(self.name(*name));
        }
        best.map(|(_, candidate)| candidate)
    }

    fn unknown_name(&self, range: ByteRange, name: StringId) -> ResolveError {
        let wanted = self.name(name).to_owned();
        let message = match self.hint(&wanted) {
            Some(suggestion) => {
                format!("`{wanted}` is not defined; did you mean `{suggestion}`?")
            }
            None => format!("`{wanted}` is not defined"),
        };
        self.fail(range, message)
    }

    fn is_type_name(&self, name: StringId) -> bool {
        self.name(name)
            .chars()
            .next()
            .map(char::is_uppercase)
            .unwrap_or(false)
    }

    /// Whether a type is concrete enough to check operators and addresses
    /// against. Field references into structs we cannot see through stay
    /// unchecked until parse time.
    fn checkable(&self, id: TypeId) -> bool {
        !matches!(
            self.types.base_kind(self.types.final_of(id)),
            TypeKind::Unresolved
                | TypeKind::Struct(_)
                | TypeKind::Match(_)
                | TypeKind::FieldRef { .. }
                | TypeKind::Attr { .. }
                | TypeKind::IndexOf { .. }
                | TypeKind::ForeignKey { .. }
        )
    }

    // ========== Bodies and structs ==========

    fn resolve_body(&mut self, body: &Body, embed: bool) -> Result<TypeId, ResolveError> {
        self.scopes.push(Scope::default());
        let result = self.resolve_items(body, embed);
        self.scopes.pop();
        result
    }

    /// Splice imported bodies in place so their definitions and fields act
    /// as if they were written where the `!import` is.
    fn flatten<'m>(&self, body: &'m Body, out: &mut Vec<&'m Item>) -> Result<(), ResolveError> {
        for item in &body.items {
            match item {
                Item::Import(import) => match &import.body {
                    Some(inner) => self.flatten(inner, out)?,
                    None => {
                        return Err(self.fail(
                            import.range,
                            format!("import `{}` was not loaded", import.module),
                        ))
                    }
                },
                item => out.push(item),
            }
        }
        Ok(())
    }

    fn resolve_items(&mut self, body: &Body, embed: bool) -> Result<TypeId, ResolveError> {
        let mut items = Vec::new();
        self.flatten(body, &mut items)?;

        // Register definitions up front so forward and mutual references
        // work, then resolve their bodies.
        let mut pending = Vec::new();
        for item in &items {
            if let Item::TypeDef(def) = item {
                self.register_def(def, &mut pending)?;
            }
        }
        for (def, id) in pending {
            self.path.push(self.name(def.name).to_owned());
            let result = self.resolve_def(def, id);
            self.path.pop();
            result?;
        }

        let mut struct_items = Vec::new();
        for item in &items {
            self.resolve_item(item, &mut struct_items)?;
        }

        let mut yields = false;
        let mut final_ty = None;
        for item in &struct_items {
            match item {
                StructItem::Yield { .. } => yields = true,
                StructItem::Field { ty, .. } => yields |= self.types.yields(*ty),
                StructItem::If { then, els, .. } => {
                    yields |= self.types.yields(*then);
                    if let Some(els) = els {
                        yields |= self.types.yields(*els);
                    }
                }
                StructItem::Return { expr } => final_ty = Some(self.types.final_of(*expr)),
                StructItem::Save { .. } | StructItem::Debug { .. } => {}
            }
        }

        let id = self.types.add(
            TypeKind::Struct(StructType {
                items: struct_items,
                embed,
            }),
            None,
        );
        if let Some(final_ty) = final_ty {
            self.types.set_final(id, final_ty);
        }
        self.types.set_yields(id, yields);
        Ok(id)
    }

    fn register_def<'m>(
        &mut self,
        def: &'m TypeDef,
        pending: &mut Vec<(&'m TypeDef, TypeId)>,
    ) -> Result<(), ResolveError> {
        if !self.is_type_name(def.name) {
            return Err(self.fail(
                def.range,
                format!("type names start uppercase: `{}`", self.name(def.name)),
            ));
        }
        let scope = self.scopes.last_mut().expect("scope stack imbalance");
        if scope.types.contains_key(&def.name) {
            return Err(self.fail(
                def.range,
                format!("`{}` is defined twice", self.name(def.name)),
            ));
        }
        if def.params.is_empty() {
            let id = self.types.reserve(Some(def.name));
            let scope = self.scopes.last_mut().expect("scope stack imbalance");
            scope.types.insert(def.name, Entry::Type(id));
            pending.push((def, id));
        } else {
            scope.types.insert(def.name, Entry::Func(def.clone()));
        }
        Ok(())
    }

    fn resolve_def(&mut self, def: &TypeDef, id: TypeId) -> Result<(), ResolveError> {
        match (&def.base, &def.ty) {
            // `:End Terminator`, `:FAST`: payload-less tokens get their own
            // node so each token has its own identity.
            (None, None) => {
                self.types.fill(id, TypeKind::Token { terminator: false });
                Ok(())
            }
            (None, Some(ty)) => {
                let inner = self.resolve_type(ty)?;
                match self.types.base_kind(inner) {
                    TypeKind::Token { terminator } => {
                        let terminator = *terminator;
                        self.types.fill(id, TypeKind::Token { terminator });
                    }
                    _ => {
                        self.types.fill(
                            id,
                            TypeKind::Named {
                                parent: inner,
                                body: None,
                            },
                        );
                        let yields = self.types.yields(inner);
                        self.types.set_yields(id, yields);
                    }
                }
                Ok(())
            }
            // `:GBColor RGBColor { ... }`: a subtype carrying a body.
            (Some((base_range, base)), ty) => {
                let parent = match self.lookup_type(*base) {
                    Some(Entry::Type(parent)) => parent,
                    Some(Entry::Func(_)) => {
                        return Err(self.fail(
                            *base_range,
                            format!("`{}` takes arguments", self.name(*base)),
                        ))
                    }
                    None => return Err(self.unknown_name(*base_range, *base)),
                };
                let body = match ty {
                    Some(ty) => Some(self.resolve_type(ty)?),
                    None => None,
                };
                self.types.fill(id, TypeKind::Named { parent, body });
                if let Some(body) = body {
                    let yields = self.types.yields(body);
                    self.types.set_yields(id, yields);
                }
                Ok(())
            }
        }
    }

    fn resolve_item(
        &mut self,
        item: &Item,
        out: &mut Vec<StructItem>,
    ) -> Result<(), ResolveError> {
        match item {
            Item::TypeDef(_) => Ok(()),
            Item::Field { range, path, ty } => {
                let target = self.resolve_target(*range, path)?;
                let name = match &target {
                    FieldTarget::Name(name) => Some(*name),
                    _ => None,
                };
                if let Some(name) = name {
                    self.path.push(self.name(name).to_owned());
                }
                let result = self.resolve_type(ty);
                if name.is_some() {
                    self.path.pop();
                }
                let ty = result?;
                if let Some(name) = name {
                    self.declare_field(*range, name, ty)?;
                }
                out.push(StructItem::Field { target, ty });
                Ok(())
            }
            Item::AnonField { ty, .. } => {
                let ty = self.resolve_type(ty)?;
                out.push(StructItem::Field {
                    target: FieldTarget::Anon,
                    ty,
                });
                Ok(())
            }
            Item::Computed { range, name, expr } => {
                if self.is_type_name(*name) {
                    return Err(self.fail(
                        *range,
                        format!("field names start lowercase: `{}`", self.name(*name)),
                    ));
                }
                let expr = self.resolve_expr(expr)?;
                self.declare_field(*range, *name, expr)?;
                out.push(StructItem::Field {
                    target: FieldTarget::Name(*name),
                    ty: expr,
                });
                Ok(())
            }
            Item::Return { expr, .. } => {
                let expr = self.resolve_expr(expr)?;
                out.push(StructItem::Return { expr });
                Ok(())
            }
            Item::If(if_item) => {
                let cond = self.resolve_expr(&if_item.cond)?;
                // Branch fields resolve into the enclosing scope, which is
                // where they land at parse time.
                let then = self.resolve_embedded(&if_item.then)?;
                let els = match &if_item.els {
                    Some(els) => Some(self.resolve_embedded(els)?),
                    None => None,
                };
                out.push(StructItem::If { cond, then, els });
                Ok(())
            }
            Item::Yield { ty, .. } => {
                let inner = self.resolve_type(ty)?;
                let id = self.types.add(TypeKind::Yield { inner }, None);
                self.types.set_yields(id, true);
                out.push(StructItem::Yield { ty: id });
                Ok(())
            }
            Item::Save { range, name } => {
                if self.lookup_field(*name).is_none() {
                    return Err(self.unknown_name(*range, *name));
                }
                out.push(StructItem::Save { name: *name });
                Ok(())
            }
            Item::Debug { range, name } => {
                if self.lookup_field(*name).is_none() {
                    return Err(self.unknown_name(*range, *name));
                }
                out.push(StructItem::Debug { name: *name });
                Ok(())
            }
            // Symbol files annotate output for other tools; nothing to
            // resolve.
            Item::Symfile { .. } => Ok(()),
            Item::Import(_) => unreachable!("imports are spliced before resolution"),
        }
    }

    /// Resolve an `!if` branch body without pushing a scope, so its fields
    /// and definitions are visible to later siblings.
    fn resolve_embedded(&mut self, body: &Body) -> Result<TypeId, ResolveError> {
        let mut items = Vec::new();
        self.flatten(body, &mut items)?;
        let mut pending = Vec::new();
        for item in &items {
            if let Item::TypeDef(def) = item {
                self.register_def(def, &mut pending)?;
            }
        }
        for (def, id) in pending {
            self.resolve_def(def, id)?;
        }
        let mut struct_items = Vec::new();
        for item in &items {
            self.resolve_item(item, &mut struct_items)?;
        }
        let yields = struct_items.iter().any(|item| match item {
            StructItem::Yield { .. } => true,
            StructItem::Field { ty, .. } => self.types.yields(*ty),
            _ => false,
        });
        let id = self.types.add(
            TypeKind::Struct(StructType {
                items: struct_items,
                embed: true,
            }),
            None,
        );
        self.types.set_yields(id, yields);
        Ok(id)
    }

    fn resolve_target(
        &mut self,
        range: ByteRange,
        path: &[crate::surface::PathSegment],
    ) -> Result<FieldTarget, ResolveError> {
        let head = &path[0];
        if self.is_type_name(head.name) {
            return Err(self.fail(
                head.range,
                format!("field names start lowercase: `{}`", self.name(head.name)),
            ));
        }
        if path.len() == 1 && !head.each {
            return Ok(FieldTarget::Name(head.name));
        }
        // Assignments into an earlier field must name one that exists.
        if self.lookup_field(head.name).is_none() {
            return Err(self.unknown_name(range, head.name));
        }
        Ok(FieldTarget::Path(
            path.iter()
                .map(|seg| FieldSeg {
                    name: seg.name,
                    each: seg.each,
                })
                .collect(),
        ))
    }

    fn declare_field(
        &mut self,
        range: ByteRange,
        name: StringId,
        ty: TypeId,
    ) -> Result<(), ResolveError> {
        let scope = self.scopes.last_mut().expect("scope stack imbalance");
        let existing = scope.fields.insert(name, ty);
        if let Some(existing) = existing {
            // Mutually exclusive `!if`/`!else` branches may bind the same
            // name; only redefinition with a different shape is an error.
            if self.types.final_of(existing) != self.types.final_of(ty) {
                return Err(self.fail(
                    range,
                    format!(
                        "field `{}` is redefined with a different type: `{}` is not `{}`",
                        self.name(name),
                        self.describe(existing),
                        self.describe(ty),
                    ),
                ));
            }
        }
        Ok(())
    }

    // ========== Types ==========

    fn resolve_type(&mut self, ty: &Type) -> Result<TypeId, ResolveError> {
        match ty {
            Type::Name(range, name) => {
                if self.is_type_name(*name) {
                    match self.lookup_type(*name) {
                        Some(Entry::Type(id)) => Ok(id),
                        Some(Entry::Func(def)) => Err(self.fail(
                            *range,
                            format!(
                                "`{}` takes {} argument(s)",
                                self.name(*name),
                                def.params.len()
                            ),
                        )),
                        None => Err(self.unknown_name(*range, *name)),
                    }
                } else {
                    // A lowercase name in type position copies a field.
                    self.resolve_field_ref(*range, *name)
                }
            }
            Type::Call { range, name, args } => self.resolve_call(*range, *name, args),
            Type::Struct(_, body) => self.resolve_body(body, false),
            Type::Array { range, len, elem } => self.resolve_array(*range, len, elem),
            Type::Match {
                scrutinee,
                char_match,
                branches,
                ..
            } => self.resolve_match(scrutinee, *char_match, branches),
            Type::Pointer {
                range,
                addr,
                target,
                pipe_relative,
            } => {
                let addr = self.resolve_expr(addr)?;
                if self.checkable(addr) && !self.types.is_int(addr) {
                    return Err(self.fail(
                        *range,
                        format!(
                            "pointer addresses must be integers, not `{}`; \
                             parenthesize the address if it is a larger expression",
                            self.describe(addr)
                        ),
                    ));
                }
                let target = self.resolve_type(target)?;
                let id = self.types.add(
                    TypeKind::Pointer {
                        addr,
                        target,
                        pipe_relative: *pipe_relative,
                    },
                    None,
                );
                let final_ty = self.types.final_of(target);
                self.types.set_final(id, final_ty);
                let yields = self.types.yields(target);
                self.types.set_yields(id, yields);
                Ok(id)
            }
            Type::Pipe { range, left, right } => self.resolve_pipe(*range, left, right),
            Type::ForeignKey {
                range,
                inner,
                path,
            } => {
                let inner = self.resolve_type(inner)?;
                if self.checkable(inner) && !self.types.is_int(inner) {
                    return Err(self.fail(
                        *range,
                        format!(
                            "foreign keys must be integers, not `{}`",
                            self.describe(inner)
                        ),
                    ));
                }
                Ok(self.types.add(
                    TypeKind::ForeignKey {
                        inner,
                        path: path.clone(),
                    },
                    None,
                ))
            }
            Type::StringLit(_, text) => {
                Ok(self.types.add(TypeKind::StringLit(text.clone()), None))
            }
        }
    }

    fn resolve_call(
        &mut self,
        range: ByteRange,
        name: StringId,
        args: &[Type],
    ) -> Result<TypeId, ResolveError> {
        let def = match self.lookup_type(name) {
            Some(Entry::Func(def)) => def,
            Some(Entry::Type(_)) => {
                return Err(self.fail(
                    range,
                    format!("`{}` takes no arguments", self.name(name)),
                ))
            }
            None => return Err(self.unknown_name(range, name)),
        };
        if def.params.len() != args.len() {
            return Err(self.fail(
                range,
                format!(
                    "`{}` takes {} argument(s), got {}",
                    self.name(name),
                    def.params.len(),
                    args.len()
                ),
            ));
        }
        let mut bindings = FxHashMap::default();
        for (param, arg) in def.params.iter().zip(args) {
            let arg = self.resolve_type(arg)?;
            bindings.insert(*param, Entry::Type(arg));
        }
        let body = match &def.ty {
            Some(body) => body,
            None => {
                return Err(self.fail(
                    range,
                    format!("`{}` has no body to instantiate", self.name(name)),
                ))
            }
        };
        // Each call re-resolves the body against its own arguments, so calls
        // specialize independently.
        self.scopes.push(Scope {
            types: bindings,
            fields: FxHashMap::default(),
        });
        let result = self.resolve_type(body);
        self.scopes.pop();
        let inner = result?;
        let id = self.types.add(
            TypeKind::Named {
                parent: inner,
                body: None,
            },
            Some(name),
        );
        let yields = self.types.yields(inner);
        self.types.set_yields(id, yields);
        Ok(id)
    }

    fn resolve_array(
        &mut self,
        range: ByteRange,
        len: &Option<Expr>,
        elem: &Type,
    ) -> Result<TypeId, ResolveError> {
        let len = match len {
            None => ArrayLen::Unbounded,
            Some(Expr::Int(_, value)) => {
                let value = u64::try_from(*value).map_err(|_| {
                    self.fail(range, format!("array length {value} is negative"))
                })?;
                ArrayLen::Fixed(value)
            }
            Some(expr) => {
                let expr = self.resolve_expr(expr)?;
                if self.checkable(expr) && !self.types.is_int(expr) {
                    return Err(self.fail(
                        range,
                        format!(
                            "array lengths must be integers, not `{}`",
                            self.describe(expr)
                        ),
                    ));
                }
                ArrayLen::Expr(expr)
            }
        };
        let elem = self.resolve_type(elem)?;
        let kind = self.types.array_kind_for(elem);
        let id = self.types.add(
            TypeKind::Array(ArrayType { elem, len, kind }),
            None,
        );
        let yields = self.types.yields(elem);
        self.types.set_yields(id, yields);
        Ok(id)
    }

    fn resolve_match(
        &mut self,
        scrutinee: &Type,
        char_match: bool,
        branches: &[crate::surface::Branch],
    ) -> Result<TypeId, ResolveError> {
        let scrutinee = self.resolve_type(scrutinee)?;
        let mut match_ty = MatchType {
            scrutinee,
            char_match,
            ints: FxHashMap::default(),
            strs: FxHashMap::default(),
            ranges: Vec::new(),
            default: None,
            branch_names: FxHashMap::default(),
        };

        // Missing keys count up from the previous integer key.
        let mut next_int = 0i64;
        let mut finals: Vec<TypeId> = Vec::new();
        let mut yields = false;

        for branch in branches {
            let capture = match &branch.key {
                Some(MatchKey::Default(_, capture)) => *capture,
                _ => None,
            };
            if let Some(capture) = capture {
                let int = self.types.prims.int;
                let scope = self.scopes.last_mut().expect("scope stack imbalance");
                scope.fields.insert(capture, int);
            }
            let arm = self.resolve_branch_arm(&branch.arm, &mut match_ty)?;
            if let Some(capture) = capture {
                let scope = self.scopes.last_mut().expect("scope stack imbalance");
                scope.fields.remove(&capture);
            }

            finals.push(self.types.final_of(arm));
            yields |= self.types.yields(arm);

            match &branch.key {
                None => {
                    self.insert_int_key(branch.range, &mut match_ty, next_int, arm)?;
                    next_int += 1;
                }
                Some(MatchKey::Int(range, value)) => {
                    self.insert_int_key(*range, &mut match_ty, *value, arm)?;
                    next_int = *value + 1;
                }
                Some(MatchKey::Str(range, text)) => {
                    if match_ty.strs.insert(text.clone(), arm).is_some() {
                        return Err(self.fail(
                            *range,
                            format!("match key {text:?} appears twice"),
                        ));
                    }
                }
                Some(MatchKey::Range(range, low, high)) => {
                    if low > high {
                        return Err(self.fail(
                            *range,
                            format!("match range {low}..{high} is empty"),
                        ));
                    }
                    match_ty.ranges.push((*low, *high, arm));
                    next_int = *high + 1;
                }
                Some(MatchKey::Default(range, _)) => {
                    if match_ty.default.is_some() {
                        return Err(self.fail(*range, "a match may only have one default branch"));
                    }
                    match_ty.default = Some((capture, arm));
                }
            }
        }

        let id = self.types.add(TypeKind::Match(match_ty), None);
        if char_match {
            let string = self.types.prims.string;
            self.types.set_final(id, string);
        } else if let Some((first, rest)) = finals.split_first() {
            // A match where every branch lands on the same type presents as
            // that type; diverging branches keep the match opaque.
            if rest.iter().all(|other| other == first) {
                self.types.set_final(id, *first);
            }
        }
        self.types.set_yields(id, yields);
        Ok(id)
    }

    fn insert_int_key(
        &self,
        range: ByteRange,
        match_ty: &mut MatchType,
        key: i64,
        arm: TypeId,
    ) -> Result<(), ResolveError> {
        if match_ty.ints.insert(key, arm).is_some() {
            return Err(self.fail(range, format!("match key {key} appears twice")));
        }
        Ok(())
    }

    fn resolve_branch_arm(
        &mut self,
        arm: &BranchArm,
        match_ty: &mut MatchType,
    ) -> Result<TypeId, ResolveError> {
        match arm {
            BranchArm::Type(ty) => self.resolve_type(ty),
            // `0x00 => :End Terminator`: branch definitions register in the
            // enclosing scope and are addressable through the match.
            BranchArm::TypeDef(def) => {
                let mut pending = Vec::new();
                self.register_def(def, &mut pending)?;
                let id = match pending.first() {
                    Some((_, id)) => *id,
                    None => {
                        return Err(self.fail(
                            def.range,
                            "match branches cannot define parametric types",
                        ))
                    }
                };
                self.resolve_def(def, id)?;
                match_ty.branch_names.insert(def.name, id);
                Ok(id)
            }
            BranchArm::Computed(_, expr) => self.resolve_expr(expr),
        }
    }

    fn resolve_pipe(
        &mut self,
        range: ByteRange,
        left: &Type,
        right: &Type,
    ) -> Result<TypeId, ResolveError> {
        let left = self.resolve_type(left)?;
        let right = self.resolve_type(right)?;

        // A tileset piped into a palette combines into an image rather than
        // streaming bytes.
        if self.types.is_tileset(left) && self.types.is_palette(right) {
            return Ok(self.types.add(TypeKind::Combine { left, right }, None));
        }

        if self.checkable(left) && !self.types.yields(left) && !self.types.is_bytes(left) {
            return Err(self.fail(
                range,
                format!(
                    "the left side of a pipe must produce bytes or yield, not `{}`; \
                     fields spelled with a `_` prefix stay out of the pipe",
                    self.describe(left)
                ),
            ));
        }

        let id = self.types.add(TypeKind::Pipe { left, right }, None);
        let final_ty = self.types.final_of(right);
        self.types.set_final(id, final_ty);
        Ok(id)
    }

    // ========== Expressions ==========

    fn resolve_field_ref(&mut self, range: ByteRange, name: StringId) -> Result<TypeId, ResolveError> {
        if name == self.interner.root || self.name(name).starts_with('_') {
            // `_root` and other underscore bindings exist only at parse time.
            return Ok(self.types.add(TypeKind::FieldRef { name }, None));
        }
        match self.lookup_field(name) {
            Some(ty) => {
                let id = self.types.add(TypeKind::FieldRef { name }, None);
                let final_ty = self.types.final_of(ty);
                self.types.set_final(id, final_ty);
                Ok(id)
            }
            None => Err(self.unknown_name(range, name)),
        }
    }

    fn resolve_expr(&mut self, expr: &Expr) -> Result<TypeId, ResolveError> {
        match expr {
            Expr::Name(range, name) => {
                if self.is_type_name(*name) {
                    match self.lookup_type(*name) {
                        Some(Entry::Type(ty)) => {
                            Ok(self.types.add(TypeKind::TypeRef { ty }, None))
                        }
                        Some(Entry::Func(_)) => Err(self.fail(
                            *range,
                            format!("`{}` takes arguments", self.name(*name)),
                        )),
                        None => Err(self.unknown_name(*range, *name)),
                    }
                } else {
                    self.resolve_field_ref(*range, *name)
                }
            }
            Expr::Int(_, value) => {
                let id = self.types.add(TypeKind::IntLit(*value), None);
                let int = self.types.prims.int;
                self.types.set_final(id, int);
                Ok(id)
            }
            Expr::Str(_, text) => Ok(self.types.add(TypeKind::StringLit(text.clone()), None)),
            Expr::Unary { range, op, operand } => {
                let operand = self.resolve_expr(operand)?;
                match op {
                    UnOp::Neg => {
                        if self.checkable(operand) && !self.types.is_int(operand) {
                            return Err(self.fail(
                                *range,
                                format!("cannot negate `{}`", self.describe(operand)),
                            ));
                        }
                        let id = self.types.add(TypeKind::Neg { operand }, None);
                        let int = self.types.prims.int;
                        self.types.set_final(id, int);
                        Ok(id)
                    }
                }
            }
            Expr::Binary { range, op, lhs, rhs } => {
                let lhs = self.resolve_expr(lhs)?;
                let rhs = self.resolve_expr(rhs)?;
                if self.checkable(lhs)
                    && self.checkable(rhs)
                    && !self.types.op_compatible(*op, lhs, rhs)
                {
                    return Err(self.fail(
                        *range,
                        format!(
                            "unsupported operands for `{}`: `{}` and `{}`",
                            op.symbol(),
                            self.describe(lhs),
                            self.describe(rhs)
                        ),
                    ));
                }
                let id = self.types.add(
                    TypeKind::BinOp {
                        op: *op,
                        lhs,
                        rhs,
                    },
                    None,
                );
                let final_ty = if op.is_comparison() || self.types.is_int(lhs) {
                    self.types.prims.int
                } else if self.types.is_stringish(lhs) {
                    self.types.prims.string
                } else {
                    self.types.final_of(lhs)
                };
                self.types.set_final(id, final_ty);
                Ok(id)
            }
            Expr::Attr { base, name, .. } => {
                let base = self.resolve_expr(base)?;
                Ok(self.types.add(
                    TypeKind::Attr { base, name: *name },
                    None,
                ))
            }
            Expr::Index { base, index, .. } => {
                let base = self.resolve_expr(base)?;
                let index = self.resolve_expr(index)?;
                Ok(self.types.add(TypeKind::IndexOf { base, index }, None))
            }
        }
    }

    fn describe(&self, id: TypeId) -> String {
        self.types.type_name(self.interner, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::parse_module;

    fn resolve(source: &str) -> Result<(StringInterner, Types, TypeId), ResolveError> {
        let mut interner = StringInterner::new();
        let file_id = FileId::try_from(1).unwrap();
        let module = parse_module(&mut interner, file_id, source).expect("parse error");
        let mut types = Types::new(&mut interner);
        let root = resolve_module(&mut types, &mut interner, &module)?;
        Ok((interner, types, root))
    }

    fn root_field(types: &Types, root: TypeId, index: usize) -> TypeId {
        match types.base_kind(root) {
            TypeKind::Struct(struct_ty) => match &struct_ty.items[index] {
                StructItem::Field { ty, .. } => *ty,
                item => panic!("expected a field, got {item:?}"),
            },
            kind => panic!("expected a struct root, got {kind:?}"),
        }
    }

    #[test]
    fn arrays_specialize_by_element() {
        let (_, types, root) = resolve("raw [4]Byte\nnums [4]U8\n").unwrap();
        match types.kind(root_field(&types, root, 0)) {
            TypeKind::Array(array) => assert_eq!(array.kind, ArrayKind::ByteString),
            kind => panic!("expected an array, got {kind:?}"),
        }
        match types.kind(root_field(&types, root, 1)) {
            TypeKind::Array(array) => assert_eq!(array.kind, ArrayKind::List),
            kind => panic!("expected an array, got {kind:?}"),
        }
    }

    #[test]
    fn char_match_arrays_specialize_to_strings() {
        let (_, types, root) = resolve(
            ":Char U8 char match {\n    0x41 => \"A\"\n    0x00 => :End Terminator\n}\ntext []Char\n",
        )
        .unwrap();
        match types.kind(root_field(&types, root, 0)) {
            TypeKind::Array(array) => assert_eq!(array.kind, ArrayKind::String),
            kind => panic!("expected an array, got {kind:?}"),
        }
    }

    #[test]
    fn match_keys_auto_increment() {
        let (_, types, root) = resolve(
            "kind U8 match {\n    =10\n    =20\n    5 => =50\n    =60\n}\n",
        )
        .unwrap();
        match types.kind(root_field(&types, root, 0)) {
            TypeKind::Match(match_ty) => {
                let mut keys: Vec<i64> = match_ty.ints.keys().copied().collect();
                keys.sort_unstable();
                assert_eq!(keys, vec![0, 1, 5, 6]);
            }
            kind => panic!("expected a match, got {kind:?}"),
        }
    }

    #[test]
    fn fields_may_not_change_type_when_redefined() {
        let error = resolve("a U8\na [2]Byte\n").unwrap_err();
        assert!(error.message.contains("redefined with a different type"));
    }

    #[test]
    fn if_branches_may_bind_the_same_names() {
        assert!(resolve("flag U8\n!if flag {\n    x = 1\n    y = 1\n} !else {\n    y = 0\n    x = 0\n}\n").is_ok());
    }

    #[test]
    fn unknown_primitives_get_a_hint() {
        let error = resolve("a u8\n").unwrap_err();
        assert!(error.message.contains("did you mean `U8`?"), "{}", error.message);
    }

    #[test]
    fn forward_references_resolve() {
        let (_, types, root) = resolve(
            ":First {\n    second Second\n}\n:Second U8\nfirst First\n",
        )
        .unwrap();
        assert!(matches!(
            types.base_kind(root_field(&types, root, 0)),
            TypeKind::Struct(_)
        ));
    }

    #[test]
    fn functions_resolve_per_call_site() {
        let (_, types, root) = resolve(
            ":Pair(T) {\n    first T\n    second T\n}\nbytes Pair(Byte)\nnums Pair(U8)\n",
        )
        .unwrap();
        let bytes = types.base_of(root_field(&types, root, 0));
        let nums = types.base_of(root_field(&types, root, 1));
        assert_ne!(bytes, nums);
    }

    #[test]
    fn tileset_piped_into_palette_combines() {
        let (_, types, root) = resolve(
            "image [16]GBTile | [4]RGBColor\n",
        )
        .unwrap();
        assert!(matches!(
            types.kind(root_field(&types, root, 0)),
            TypeKind::Combine { .. }
        ));
    }

    #[test]
    fn pipes_need_a_byte_producing_left_side() {
        let error = resolve("x [4]U8 | U16\n").unwrap_err();
        assert!(error.message.contains("left side of a pipe"), "{}", error.message);
    }

    #[test]
    fn pointer_addresses_must_be_integers() {
        let error = resolve("s [2]Byte\np @s U8\n").unwrap_err();
        assert!(error.message.contains("pointer addresses"), "{}", error.message);
    }

    #[test]
    fn resolving_twice_gives_equal_graphs() {
        let source = "count U8\nitems [count]U8\n";
        let (_, types_a, _) = resolve(source).unwrap();
        let (_, types_b, _) = resolve(source).unwrap();
        assert_eq!(types_a.len(), types_b.len());
    }
}
