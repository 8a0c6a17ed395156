//! Async STOMP 1.0/1.1/1.2 client.

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod frame;
pub mod headers;
pub mod heartbeat;
pub mod ids;
mod parser;
pub mod protocol;
pub mod receipt;
pub mod receiver;
pub mod reliable;
pub mod scope;
pub mod subscription;
pub mod transaction;
pub mod transport;

pub use codec::StompCodec;
pub use config::{ConnectOptions, DEFAULT_PORT, Heartbeat, ReconnectPolicy};
pub use connection::{Connection, State};
pub use error::{Result, StompError};
pub use events::{FrameEvent, LifecycleEvent};
pub use frame::{Body, Command, Frame};
pub use headers::Headers;
pub use heartbeat::{HeartbeatMonitor, HeartbeatPump};
pub use ids::IdGenerator;
pub use protocol::{AckTarget, Version, negotiate_heartbeats, parse_heartbeat_header};
pub use receiver::{Receive, Receiver};
pub use reliable::ReliableConnection;
pub use scope::{HeaderScope, ReceiptScope, Transmit, UnsubscribeTarget};
pub use subscription::{AckMode, MessageCallback, Subscription};
pub use transaction::{Transaction, TransactionState};
pub use transport::{BoxedTransport, Connector, TcpConnector, Transport};
