//! Error taxonomy (spec.md §7). Kept as a small `Copy` enum with a
//! hand-written `Display`/`Error` impl, the same shape `lua_vm/lua_error.rs`
//! uses for `LuaError` — no `thiserror`/`anyhow` dependency.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum GcError {
    /// Emergency full GC ran and allocation still can't be satisfied.
    OutOfMemory,
    /// The string table is full (`nuse == u32::MAX`) and a full GC freed
    /// nothing (spec.md §4.8 failure mode).
    StringTableExhausted,
    /// A debug-time invariant (§8 I1-I7) was violated.
    InvariantViolation(&'static str),
}

impl std::fmt::Display for GcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GcError::OutOfMemory => write!(f, "out of memory"),
            GcError::StringTableExhausted => write!(f, "string table exhausted"),
            GcError::InvariantViolation(msg) => write!(f, "GC invariant violated: {msg}"),
        }
    }
}

impl std::error::Error for GcError {}

pub type Result<T> = std::result::Result<T, GcError>;
