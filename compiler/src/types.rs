// types.rs — The SNEX type system
//
// A closed set of primitive types (void, int, float, double, block, event)
// plus interned complex types: `span<T, N>` and user/library struct types.
// Implicit conversion follows the numeric widening chain int → float → double;
// narrowing is never implicit.
//
// Preconditions: none (types only, plus pure helpers).
// Postconditions: struct member offsets are slot-aligned and stable.
// Failure modes: none — conversion checks return bool, lookups return Option.
// Side effects: none.

use std::collections::HashMap;
use std::fmt;

use crate::func::FunctionId;

// ── Type ─────────────────────────────────────────────────────────────────

/// Interned id of a struct (complex) type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StructId(pub u32);

/// Interned id of a `span<T, N>` type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpanTypeId(pub u32);

/// A resolved SNEX type.
///
/// `Dynamic` is the unresolved sentinel: legal on nodes only before the
/// symbol/type resolution pass completes, never after.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    Dynamic,
    Void,
    Int,
    Float,
    Double,
    Block,
    Event,
    Struct(StructId),
    Span(SpanTypeId),
}

impl Type {
    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Int | Type::Float | Type::Double)
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, Type::Dynamic)
    }
}

/// Widening rank within the numeric promotion chain.
fn numeric_rank(t: Type) -> Option<u8> {
    match t {
        Type::Int => Some(0),
        Type::Float => Some(1),
        Type::Double => Some(2),
        _ => None,
    }
}

/// Check whether `from` converts to `to` without an explicit cast.
///
/// Identity always converts; numeric types convert along the widening chain
/// int → float → double. Narrowing is never implicit.
pub fn can_implicitly_convert(from: Type, to: Type) -> bool {
    if from == to {
        return true;
    }
    match (numeric_rank(from), numeric_rank(to)) {
        (Some(a), Some(b)) => a < b,
        _ => false,
    }
}

/// The common type of two numeric operands (least upper bound in the
/// widening chain). `None` for non-numeric or mixed incompatible operands.
pub fn common_type(a: Type, b: Type) -> Option<Type> {
    if a == b && a.is_numeric() {
        return Some(a);
    }
    match (numeric_rank(a), numeric_rank(b)) {
        (Some(ra), Some(rb)) => Some(if ra >= rb { a } else { b }),
        _ => None,
    }
}

// ── Compile-time constant values ─────────────────────────────────────────

/// A compile-time constant, produced by literals and constant folding.
///
/// Arithmetic on constants uses the same semantics as the emitted code
/// (f32 math for float, f64 for double, wrapping i64 for int) so folding
/// never changes observable rounding behavior.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstValue {
    Int(i64),
    Float(f32),
    Double(f64),
}

impl ConstValue {
    pub fn type_of(&self) -> Type {
        match self {
            ConstValue::Int(_) => Type::Int,
            ConstValue::Float(_) => Type::Float,
            ConstValue::Double(_) => Type::Double,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            ConstValue::Int(v) => v as f64,
            ConstValue::Float(v) => v as f64,
            ConstValue::Double(v) => v,
        }
    }

    pub fn as_i64(&self) -> i64 {
        match *self {
            ConstValue::Int(v) => v,
            ConstValue::Float(v) => v as i64,
            ConstValue::Double(v) => v as i64,
        }
    }

    pub fn is_zero(&self) -> bool {
        match *self {
            ConstValue::Int(v) => v == 0,
            ConstValue::Float(v) => v == 0.0,
            ConstValue::Double(v) => v == 0.0,
        }
    }

    /// Convert to the given primitive type, with C-style truncation toward
    /// zero for float-to-int.
    pub fn cast_to(&self, to: Type) -> Option<ConstValue> {
        match to {
            Type::Int => Some(ConstValue::Int(self.as_i64())),
            Type::Float => Some(ConstValue::Float(self.as_f64() as f32)),
            Type::Double => Some(ConstValue::Double(self.as_f64())),
            _ => None,
        }
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstValue::Int(v) => write!(f, "{v}"),
            ConstValue::Float(v) => write!(f, "{v}f"),
            ConstValue::Double(v) => write!(f, "{v}"),
        }
    }
}

// ── Internal struct properties ───────────────────────────────────────────

/// Keys for the compiler-internal property bag on struct types.
///
/// These carry composition metadata consumed by later passes and by the
/// wrap library; they never exist at runtime.
pub mod props {
    pub const IS_NODE: &str = "IsNode";
    pub const IS_OBJECT_WRAPPER: &str = "IsObjectWrapper";
    pub const OBJECT_INDEX: &str = "ObjectIndex";
    pub const NUM_CHANNELS: &str = "NumChannels";
    pub const GET_SELF_AS_OBJECT: &str = "GetSelfAsObject";
}

// ── Struct types ─────────────────────────────────────────────────────────

/// Default value for a struct member, materialized at instance creation.
#[derive(Debug, Clone, PartialEq)]
pub enum MemberDefault {
    Scalar(ConstValue),
    /// Fill every element of a span member with one value.
    SpanFill(ConstValue),
}

/// One named member of a struct type.
#[derive(Debug, Clone)]
pub struct Member {
    pub name: String,
    pub ty: Type,
    /// Slot offset from the start of the struct (one slot = 8 bytes).
    pub offset: usize,
    pub default: Option<MemberDefault>,
}

/// A named aggregate type: ordered members with computed offsets, a function
/// class (member functions, possibly compiler-synthesized), and an internal
/// property bag.
#[derive(Debug, Clone)]
pub struct StructType {
    /// Display name, including template arguments for instances
    /// (e.g. `wrap::fix<2, Gain>`).
    pub name: String,
    pub members: Vec<Member>,
    /// Member functions, in registration order.
    pub functions: Vec<FunctionId>,
    pub properties: HashMap<&'static str, i64>,
    pub size_slots: usize,
}

impl StructType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: Vec::new(),
            functions: Vec::new(),
            properties: HashMap::new(),
            size_slots: 0,
        }
    }

    pub fn member(&self, name: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.name == name)
    }

    pub fn has_property(&self, key: &str) -> bool {
        self.properties.contains_key(key)
    }

    pub fn property(&self, key: &str, default: i64) -> i64 {
        self.properties.get(key).copied().unwrap_or(default)
    }

    pub fn set_property(&mut self, key: &'static str, value: i64) {
        self.properties.insert(key, value);
    }
}

// ── Type table ───────────────────────────────────────────────────────────

/// Session-owned intern table for complex types.
///
/// One table exists per compilation session; ids are only meaningful within
/// the session that produced them.
#[derive(Debug, Default)]
pub struct TypeTable {
    structs: Vec<StructType>,
    spans: Vec<(Type, usize)>,
}

impl TypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new struct type, computing member offsets and total size.
    pub fn add_struct(&mut self, mut st: StructType) -> StructId {
        let mut offset = 0;
        for m in &mut st.members {
            m.offset = offset;
            offset += self.size_of(m.ty);
        }
        st.size_slots = offset;
        let id = StructId(self.structs.len() as u32);
        self.structs.push(st);
        id
    }

    pub fn struct_type(&self, id: StructId) -> &StructType {
        &self.structs[id.0 as usize]
    }

    pub fn struct_type_mut(&mut self, id: StructId) -> &mut StructType {
        &mut self.structs[id.0 as usize]
    }

    /// Intern a `span<elem, len>` type.
    pub fn span_type(&mut self, elem: Type, len: usize) -> SpanTypeId {
        if let Some(i) = self.spans.iter().position(|&(e, l)| e == elem && l == len) {
            return SpanTypeId(i as u32);
        }
        let id = SpanTypeId(self.spans.len() as u32);
        self.spans.push((elem, len));
        id
    }

    pub fn span_info(&self, id: SpanTypeId) -> (Type, usize) {
        self.spans[id.0 as usize]
    }

    /// Size of a type in memory slots. Scalars, blocks and events occupy one
    /// slot; spans and structs occupy the sum of their parts.
    pub fn size_of(&self, ty: Type) -> usize {
        match ty {
            Type::Void | Type::Dynamic => 0,
            Type::Int | Type::Float | Type::Double | Type::Block | Type::Event => 1,
            Type::Span(id) => {
                let (elem, len) = self.span_info(id);
                self.size_of(elem) * len
            }
            Type::Struct(id) => self.struct_type(id).size_slots,
        }
    }

    /// Byte offset of a member (slots are 8 bytes wide).
    pub fn byte_offset_of(&self, id: StructId, member: &str) -> Option<usize> {
        self.struct_type(id).member(member).map(|m| m.offset * 8)
    }

    /// Human-readable name for a type.
    pub fn name_of(&self, ty: Type) -> String {
        match ty {
            Type::Dynamic => "dynamic".into(),
            Type::Void => "void".into(),
            Type::Int => "int".into(),
            Type::Float => "float".into(),
            Type::Double => "double".into(),
            Type::Block => "block".into(),
            Type::Event => "event".into(),
            Type::Struct(id) => self.struct_type(id).name.clone(),
            Type::Span(id) => {
                let (elem, len) = self.span_info(id);
                format!("span<{}, {}>", self.name_of(elem), len)
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widening_chain() {
        assert!(can_implicitly_convert(Type::Int, Type::Float));
        assert!(can_implicitly_convert(Type::Int, Type::Double));
        assert!(can_implicitly_convert(Type::Float, Type::Double));
        assert!(can_implicitly_convert(Type::Int, Type::Int));
    }

    #[test]
    fn narrowing_never_implicit() {
        assert!(!can_implicitly_convert(Type::Double, Type::Float));
        assert!(!can_implicitly_convert(Type::Double, Type::Int));
        assert!(!can_implicitly_convert(Type::Float, Type::Int));
    }

    #[test]
    fn non_numeric_never_converts() {
        assert!(!can_implicitly_convert(Type::Block, Type::Int));
        assert!(!can_implicitly_convert(Type::Int, Type::Block));
        assert!(!can_implicitly_convert(Type::Event, Type::Double));
    }

    #[test]
    fn common_type_promotes() {
        assert_eq!(common_type(Type::Int, Type::Double), Some(Type::Double));
        assert_eq!(common_type(Type::Float, Type::Int), Some(Type::Float));
        assert_eq!(common_type(Type::Int, Type::Int), Some(Type::Int));
        assert_eq!(common_type(Type::Block, Type::Int), None);
    }

    #[test]
    fn const_cast_truncates_toward_zero() {
        assert_eq!(
            ConstValue::Double(1.9).cast_to(Type::Int),
            Some(ConstValue::Int(1))
        );
        assert_eq!(
            ConstValue::Float(2.5).cast_to(Type::Double),
            Some(ConstValue::Double(2.5))
        );
    }

    #[test]
    fn struct_offsets_and_size() {
        let mut table = TypeTable::new();
        let span = table.span_type(Type::Float, 19);
        let mut st = StructType::new("LookupTable");
        st.members.push(Member {
            name: "index".into(),
            ty: Type::Int,
            offset: 0,
            default: None,
        });
        st.members.push(Member {
            name: "data".into(),
            ty: Type::Span(span),
            offset: 0,
            default: Some(MemberDefault::SpanFill(ConstValue::Float(182.0))),
        });
        let id = table.add_struct(st);

        let st = table.struct_type(id);
        assert_eq!(st.member("index").unwrap().offset, 0);
        assert_eq!(st.member("data").unwrap().offset, 1);
        assert_eq!(st.size_slots, 20);
        assert_eq!(table.byte_offset_of(id, "data"), Some(8));
    }

    #[test]
    fn span_types_interned() {
        let mut table = TypeTable::new();
        let a = table.span_type(Type::Float, 19);
        let b = table.span_type(Type::Float, 19);
        let c = table.span_type(Type::Float, 4);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn property_bag() {
        let mut st = StructType::new("X");
        assert!(!st.has_property(props::IS_NODE));
        st.set_property(props::IS_NODE, 1);
        assert!(st.has_property(props::IS_NODE));
        assert_eq!(st.property(props::NUM_CHANNELS, 0), 0);
    }
}
