//! Reliable-UDP IPC transport: the wire format, per-peer connector state machine, and the
//! Talker object that hosts it inside the core's selector framework.

pub mod config;
pub mod connector;
pub mod packet;
pub mod talker;
pub mod talker_selector;

pub use config::IpcConfig;
pub use connector::{Connector, ConnectorAction, ConnectorState, OutgoingMessage};
pub use packet::{BufferFlags, BufferType, Header};
pub use talker::{Talker, TalkerSink};
pub use talker_selector::TalkerDriver;
