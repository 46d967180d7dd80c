//! Type map keyed by a registered `&'static str` name rather than `std::any::TypeId`, because
//! `TypeId` has no meaning across process boundaries: the peer that deserializes a message was
//! compiled independently, possibly by a different toolchain version, and needs a stable name
//! to look the type up by, not a hash of compiler-internal details.
//!
//! Registration happens through `#[derive(WireType)]` (see `nucleus-macros`), which generates
//! the `WireObject`/`WireType` impls rather than requiring each message type to hand-write
//! serialize/deserialize glue.

use crate::serialize::engine::{Result, WriteCursor, ReadCursor};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// Object-safe half of the contract: what the engine needs to hold a `dyn WireObject` in its
/// work stack and look its concrete handlers up in the type map.
pub trait WireObject: Send + Sync {
    fn wire_name(&self) -> &'static str;
    fn as_any(&self) -> &dyn Any;
}

/// The typed half, implemented per concrete type (normally via `#[derive(WireType)]`).
pub trait WireType: WireObject + Sized + 'static {
    const WIRE_NAME: &'static str;

    fn wire_serialize(&self, cursor: &mut WriteCursor) -> Result<()>;
    fn wire_deserialize(cursor: &mut ReadCursor) -> Result<Self>;
    fn wire_size(&self) -> usize;
}

type SerializeFn = fn(&dyn WireObject, &mut WriteCursor) -> Result<()>;
type DeserializeFn = fn(&mut ReadCursor) -> Result<Arc<dyn WireObject>>;
type SizeFn = fn(&dyn WireObject) -> usize;

pub struct TypeEntry {
    pub serialize: SerializeFn,
    pub deserialize: DeserializeFn,
    pub size: SizeFn,
}

/// Process-wide (or per-`Manager`) registry of known wire types. Typically populated once at
/// startup by calling `register::<T>()` for every message type the process can send or accept.
#[derive(Default)]
pub struct TypeMap {
    entries: HashMap<&'static str, TypeEntry>,
}

impl TypeMap {
    pub fn new() -> TypeMap {
        TypeMap { entries: HashMap::new() }
    }

    pub fn register<T: WireType>(&mut self) {
        let serialize: SerializeFn = |obj, cursor| {
            let concrete = obj
                .as_any()
                .downcast_ref::<T>()
                .expect("type map dispatch mismatch: registered name resolved to the wrong concrete type");
            concrete.wire_serialize(cursor)
        };

        let deserialize: DeserializeFn = |cursor| {
            let value = T::wire_deserialize(cursor)?;
            Ok(Arc::new(value) as Arc<dyn WireObject>)
        };

        let size: SizeFn = |obj| {
            let concrete = obj
                .as_any()
                .downcast_ref::<T>()
                .expect("type map dispatch mismatch: registered name resolved to the wrong concrete type");
            concrete.wire_size()
        };

        self.entries.insert(T::WIRE_NAME, TypeEntry { serialize, deserialize, size });
    }

    pub fn lookup(&self, name: &str) -> Option<&TypeEntry> {
        self.entries.get(name)
    }

    pub fn deserialize_by_name(&self, name: &str, cursor: &mut ReadCursor) -> Result<Arc<dyn WireObject>> {
        let entry = self
            .lookup(name)
            .ok_or_else(|| crate::serialize::engine::Error::UnknownType(name.to_string()))?;
        (entry.deserialize)(cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialize::engine::{ReadCursor, WriteCursor};

    #[derive(Debug, PartialEq)]
    struct Ping {
        seq: u32,
    }

    impl WireObject for Ping {
        fn wire_name(&self) -> &'static str {
            Ping::WIRE_NAME
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    impl WireType for Ping {
        const WIRE_NAME: &'static str = "nucleus.test.Ping";

        fn wire_serialize(&self, cursor: &mut WriteCursor) -> Result<()> {
            cursor.write_u32(self.seq)
        }

        fn wire_deserialize(cursor: &mut ReadCursor) -> Result<Self> {
            Ok(Ping { seq: cursor.read_u32()? })
        }

        fn wire_size(&self) -> usize {
            4
        }
    }

    #[test]
    fn test_register_then_roundtrip_by_name() {
        let mut types = TypeMap::new();
        types.register::<Ping>();

        let mut buf = [0u8; 16];
        let obj: Arc<dyn WireObject> = Arc::new(Ping { seq: 7 });
        let entry = types.lookup(obj.wire_name()).unwrap();

        {
            let mut cursor = WriteCursor::new(&mut buf);
            (entry.serialize)(obj.as_ref(), &mut cursor).unwrap();
        }

        let mut cursor = ReadCursor::new(&buf);
        let back = types.deserialize_by_name("nucleus.test.Ping", &mut cursor).unwrap();
        let ping = back.as_any().downcast_ref::<Ping>().unwrap();
        assert_eq!(ping, &Ping { seq: 7 });
    }

    #[test]
    fn test_unknown_name_is_an_error_not_a_panic() {
        let types = TypeMap::new();
        let mut cursor = ReadCursor::new(&[]);
        assert!(types.deserialize_by_name("nope", &mut cursor).is_err());
    }
}
