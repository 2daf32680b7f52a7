//! Trade Feed Adapters
//!
//! WebSocket transport for the upstream trade feed:
//!
//! - **messages**: JSON wire shapes
//! - **codec**: frame decoding and control-frame encoding
//! - **heartbeat**: ping-based liveness
//! - **transport**: `FeedTransport` implementation over `tokio-tungstenite`

pub mod codec;
pub mod heartbeat;
pub mod messages;
pub mod transport;

pub use codec::{CodecError, FeedCodec};
pub use heartbeat::{HeartbeatAction, HeartbeatConfig, HeartbeatState};
pub use messages::{ControlFrame, ErrorFrame, TradeEntry};
pub use transport::{WebSocketSession, WebSocketTransport};
