//! Realtime event channel (Socket.IO over a single websocket transport).

pub mod channel;
pub mod packet;
pub mod transport;

pub use channel::{ChannelEvent, ChannelSettings, ChannelState, RealtimeChannel, ReconnectPolicy};
pub use transport::{endpoint, WsConnector};
