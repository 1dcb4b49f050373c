//! The heterogeneous object graph: tagged ids, the value type references
//! flow through, and the per-kind payloads the marker/sweeper traverse.

use indexmap::IndexMap;
use smol_str::SmolStr;

use super::header::GcHeader;

/// Discriminant over the collectable kinds (spec.md §3.1 `type_tag`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjKind {
    ShortStr,
    LongStr,
    Table,
    Closure,
    Proto,
    Thread,
    Upvalue,
    Userdata,
}

/// Unified object identifier: a type tag plus an arena slot index.
/// Never a shared-ownership pointer — see Design Notes (§9) on why a
/// `Rc`-based list substitute can't model sole-owner list membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GcId {
    ShortStr(u32),
    LongStr(u32),
    Table(u32),
    Closure(u32),
    Proto(u32),
    Thread(u32),
    Upvalue(u32),
    Userdata(u32),
}

impl GcId {
    #[inline]
    pub fn kind(self) -> ObjKind {
        match self {
            GcId::ShortStr(_) => ObjKind::ShortStr,
            GcId::LongStr(_) => ObjKind::LongStr,
            GcId::Table(_) => ObjKind::Table,
            GcId::Closure(_) => ObjKind::Closure,
            GcId::Proto(_) => ObjKind::Proto,
            GcId::Thread(_) => ObjKind::Thread,
            GcId::Upvalue(_) => ObjKind::Upvalue,
            GcId::Userdata(_) => ObjKind::Userdata,
        }
    }

    #[inline]
    pub fn is_string(self) -> bool {
        matches!(self, GcId::ShortStr(_) | GcId::LongStr(_))
    }
}

/// A runtime value. Collectable variants hold a [`GcId`]; everything else
/// is unboxed. Floats are compared/hashed by bit pattern so `Value` can be
/// used as a table key, mirroring how embeddings typically box NaN-safe
/// keys rather than relying on IEEE754 equality.
#[derive(Debug, Clone, Copy)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Obj(GcId),
}

impl Value {
    #[inline]
    pub fn as_gc_id(&self) -> Option<GcId> {
        match self {
            Value::Obj(id) => Some(*id),
            _ => None,
        }
    }

    #[inline]
    pub fn is_collectable(&self) -> bool {
        matches!(self, Value::Obj(_))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Obj(a), Value::Obj(b)) => a == b,
            _ => false,
        }
    }
}
impl Eq for Value {}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Nil => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Obj(id) => id.hash(state),
        }
    }
}

pub type Header = GcHeader<GcId>;

/// `__mode` weak-table kind (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeakMode {
    Strong,
    WeakValue,
    Ephemeron,
    AllWeak,
}

/// Short strings are interned: equal bytes are always the same object
/// (spec.md §3.3). Backed by `SmolStr` so short payloads never heap
/// allocate, matching the short/long split the spec draws.
pub struct ShortStrObj {
    pub header: Header,
    pub bytes: SmolStr,
    pub hash: u64,
}

/// Long strings are never interned; their hash is computed lazily on
/// first request and cached (`lstring.c`'s `extra` flag).
pub struct LongStrObj {
    pub header: Header,
    pub bytes: Box<str>,
    pub hash: Option<u64>,
}

pub type TableMap = IndexMap<Value, Value, ahash::RandomState>;

pub struct TableObj {
    pub header: Header,
    pub array: Vec<Value>,
    pub hash: TableMap,
    pub metatable: Option<GcId>,
    pub weak_mode: WeakMode,
}

impl TableObj {
    pub fn new(header: Header) -> Self {
        TableObj {
            header,
            array: Vec::new(),
            hash: TableMap::default(),
            metatable: None,
            weak_mode: WeakMode::Strong,
        }
    }
}

pub enum ClosureKind {
    /// C-style closure: upvalues only, no nested prototype.
    Light { upvalues: Vec<GcId> },
    /// Lua-style closure over a prototype plus its captured upvalues.
    Heavy { proto: GcId, upvalues: Vec<GcId> },
}

pub struct ClosureObj {
    pub header: Header,
    pub kind: ClosureKind,
}

pub struct ProtoObj {
    pub header: Header,
    pub source_name: Option<GcId>,
    pub constants: Vec<Value>,
    pub upvalue_debug_names: Vec<Option<GcId>>,
    pub nested: Vec<GcId>,
    pub local_names: Vec<Option<GcId>>,
}

pub enum UpvalueState {
    Open { stack_index: usize },
    Closed(Value),
}

pub struct UpvalueObj {
    pub header: Header,
    pub state: UpvalueState,
    /// The thread this upvalue is open on, so `remark_upvals` can find it.
    pub owner_thread: Option<GcId>,
}

impl UpvalueObj {
    pub fn is_open(&self) -> bool {
        matches!(self.state, UpvalueState::Open { .. })
    }
}

pub struct ThreadObj {
    pub header: Header,
    pub stack: Vec<Value>,
    pub top: usize,
    pub open_upvalues: Vec<GcId>,
    /// True while this thread is linked into the `twups` (threads with
    /// open upvalues) registry consulted by `remark_upvals` (§4.7.1 step 4).
    pub in_twups: bool,
}

pub struct UserdataObj {
    pub header: Header,
    pub metatable: Option<GcId>,
    pub user_values: Vec<Value>,
}
