//! Types, attributes and locations.

use std::collections::HashMap;
use std::fmt;

use cranelift_entity::PrimaryMap;
use smallvec::SmallVec;

use crate::refs::{PathRef, TypeRef};
use crate::symbol::Symbol;

// ============================================================================
// Location
// ============================================================================

/// Byte range in a source file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// Source location attached to every operation and block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Location {
    pub path: PathRef,
    pub span: Span,
}

impl Location {
    pub const fn new(path: PathRef, span: Span) -> Self {
        Self { path, span }
    }
}

// ============================================================================
// Attribute
// ============================================================================

/// Literal attached to an operation under a symbol key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Attribute {
    Unit,
    Bool(bool),
    Int(i64),
    /// `f64` stored as raw bits so attributes stay `Eq + Hash`.
    FloatBits(u64),
    String(String),
    Type(TypeRef),
    Symbol(Symbol),
    List(Vec<Attribute>),
}

impl Attribute {
    pub fn float(value: f64) -> Self {
        Attribute::FloatBits(value.to_bits())
    }

    pub fn kind(&self) -> AttributeKind {
        match self {
            Attribute::Unit => AttributeKind::Unit,
            Attribute::Bool(_) => AttributeKind::Bool,
            Attribute::Int(_) => AttributeKind::Int,
            Attribute::FloatBits(_) => AttributeKind::Float,
            Attribute::String(_) => AttributeKind::String,
            Attribute::Type(_) => AttributeKind::Type,
            Attribute::Symbol(_) => AttributeKind::Symbol,
            Attribute::List(_) => AttributeKind::List,
        }
    }
}

impl From<i64> for Attribute {
    fn from(value: i64) -> Self {
        Attribute::Int(value)
    }
}

impl From<bool> for Attribute {
    fn from(value: bool) -> Self {
        Attribute::Bool(value)
    }
}

impl From<&str> for Attribute {
    fn from(value: &str) -> Self {
        Attribute::String(value.to_owned())
    }
}

impl From<Symbol> for Attribute {
    fn from(value: Symbol) -> Self {
        Attribute::Symbol(value)
    }
}

impl From<TypeRef> for Attribute {
    fn from(value: TypeRef) -> Self {
        Attribute::Type(value)
    }
}

impl From<Vec<Attribute>> for Attribute {
    fn from(value: Vec<Attribute>) -> Self {
        Attribute::List(value)
    }
}

/// Variant tag of an [`Attribute`], used to validate required attributes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, derive_more::Display)]
pub enum AttributeKind {
    #[display("unit")]
    Unit,
    #[display("bool")]
    Bool,
    #[display("int")]
    Int,
    #[display("float")]
    Float,
    #[display("string")]
    String,
    #[display("type")]
    Type,
    #[display("symbol")]
    Symbol,
    #[display("list")]
    List,
}

// ============================================================================
// TypeData
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, derive_more::Display)]
pub enum ElementType {
    #[display("i1")]
    I1,
    #[display("i8")]
    I8,
    #[display("i16")]
    I16,
    #[display("i32")]
    I32,
    #[display("i64")]
    I64,
    #[display("f16")]
    F16,
    #[display("f32")]
    F32,
    #[display("f64")]
    F64,
    #[display("index")]
    Index,
}

impl ElementType {
    /// Storage size in bytes; `index` is treated as 64-bit.
    pub fn byte_width(self) -> u64 {
        match self {
            ElementType::I1 | ElementType::I8 => 1,
            ElementType::I16 | ElementType::F16 => 2,
            ElementType::I32 | ElementType::F32 => 4,
            ElementType::I64 | ElementType::F64 | ElementType::Index => 8,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Dim {
    Static(u64),
    Dynamic,
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Static(n) => write!(f, "{n}"),
            Dim::Dynamic => f.write_str("?"),
        }
    }
}

pub type Shape = SmallVec<[Dim; 4]>;

/// Memory layout of a buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, derive_more::Display)]
pub enum Layout {
    #[default]
    #[display("rowmajor")]
    RowMajor,
    #[display("colmajor")]
    ColumnMajor,
}

/// Which side of the tensor/buffer boundary a type sits on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Representation {
    /// Abstract tensor-like value; must be converted away.
    Source,
    /// Explicit buffer-like value.
    Target,
    /// Scalars and opaque handles; never converted.
    Neutral,
}

/// Structural data of an interned type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeData {
    Element(ElementType),
    /// `shape == None` is an unranked tensor.
    Tensor {
        element: ElementType,
        shape: Option<Shape>,
    },
    Buffer {
        element: ElementType,
        shape: Shape,
        layout: Layout,
    },
    /// Dialect-defined type the engine never interprets.
    Opaque {
        dialect: Symbol,
        name: Symbol,
        params: SmallVec<[TypeRef; 4]>,
    },
}

impl TypeData {
    pub fn representation(&self) -> Representation {
        match self {
            TypeData::Tensor { .. } => Representation::Source,
            TypeData::Buffer { .. } => Representation::Target,
            TypeData::Element(_) | TypeData::Opaque { .. } => Representation::Neutral,
        }
    }

    /// Ranked tensor with the given static dims.
    pub fn tensor(element: ElementType, dims: &[u64]) -> Self {
        TypeData::Tensor {
            element,
            shape: Some(dims.iter().copied().map(Dim::Static).collect()),
        }
    }

    pub fn buffer(element: ElementType, dims: &[u64], layout: Layout) -> Self {
        TypeData::Buffer {
            element,
            shape: dims.iter().copied().map(Dim::Static).collect(),
            layout,
        }
    }

    pub fn opaque(dialect: impl Into<Symbol>, name: impl Into<Symbol>) -> Self {
        TypeData::Opaque {
            dialect: dialect.into(),
            name: name.into(),
            params: SmallVec::new(),
        }
    }
}

// ============================================================================
// Interners
// ============================================================================

/// Deduplicating type table: equal `TypeData` always yields the same `TypeRef`.
#[derive(Default)]
pub struct TypeInterner {
    types: PrimaryMap<TypeRef, TypeData>,
    dedup: HashMap<TypeData, TypeRef>,
}

impl TypeInterner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, data: TypeData) -> TypeRef {
        if let Some(&existing) = self.dedup.get(&data) {
            return existing;
        }
        let r = self.types.push(data.clone());
        self.dedup.insert(data, r);
        r
    }

    pub fn get(&self, r: TypeRef) -> &TypeData {
        &self.types[r]
    }

    pub fn representation(&self, r: TypeRef) -> Representation {
        self.types[r].representation()
    }

    pub fn is_source(&self, r: TypeRef) -> bool {
        self.representation(r) == Representation::Source
    }

    pub fn is_target(&self, r: TypeRef) -> bool {
        self.representation(r) == Representation::Target
    }
}

#[derive(Default)]
pub struct PathInterner {
    paths: PrimaryMap<PathRef, String>,
    dedup: HashMap<String, PathRef>,
}

impl PathInterner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, path: impl Into<String>) -> PathRef {
        let path = path.into();
        if let Some(&existing) = self.dedup.get(&path) {
            return existing;
        }
        let r = self.paths.push(path.clone());
        self.dedup.insert(path, r);
        r
    }

    pub fn get(&self, r: PathRef) -> &str {
        &self.paths[r]
    }
}
