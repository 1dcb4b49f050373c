pub mod header;
pub mod types;

pub use header::{Age, GcHeader};
pub use types::{
    ClosureKind, ClosureObj, GcId, Header, LongStrObj, ObjKind, ProtoObj, ShortStrObj, TableMap,
    TableObj, ThreadObj, UpvalueObj, UpvalueState, UserdataObj, Value, WeakMode,
};
