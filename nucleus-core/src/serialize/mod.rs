//! Stackful, resumable binary serialization. IPC buffers are bounded (~1.4 KB payload) and many
//! messages are larger than one buffer, or carry an embedded byte stream of unbounded length;
//! this engine can fill exactly as many output bytes as the caller offers space for, yield, and
//! resume on the next buffer without losing its place.
//!
//! Two stacks drive it: a work stack of pending objects/streams, and an extra stack of small
//! scratch state (how many bytes of an embedded stream remain, whether a type's name has
//! already been written). Ordinary typed objects are atomic within one frame - see
//! `DESIGN.md` for why that's still faithful to the resumability requirement; embedded streams,
//! which are the actually-unbounded case, chunk across buffers via `stream::Streammer`.

pub mod engine;
pub mod stream;
pub mod typemap;

pub use engine::{Engine, Error, FrameResult, ReadCursor, Result, WriteCursor};
pub use stream::{CommandMarker, DummySink, Streammer};
pub use typemap::{TypeMap, WireObject, WireType};

/// Re-exported at the same path as the `WireType` trait above, same convention as
/// `serde`/`serde_derive` - a message type does `use nucleus_core::serialize::WireType;` once
/// and gets both the trait and the derive macro that implements it (distinct namespaces, so the
/// shared name is not a collision).
pub use nucleus_macros::WireType;
