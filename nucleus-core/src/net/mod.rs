//! TCP-facing plumbing: chunked buffers and the `Channel` capability that the connection
//! selector (`crate::selector::tcp`) drives.
//!
//! Chunk/ChunkPool/Buffer are unchanged in spirit from the teacher's original networking
//! sketch: a buffer is a deque of fixed-size chunks drawn from a pool, so steady-state
//! send/recv does no allocation.

pub mod buffer;
pub mod channel;
pub mod chunk;
pub mod chunkpool;

pub use buffer::Buffer;
pub use channel::{Channel, IoEvent, TcpChannel};
pub use chunk::Chunk;
pub use chunkpool::ChunkPool;
