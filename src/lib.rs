//! # Relay - Serverless Cross-Context Channel Sessions
//!
//! Shared state and events between independent execution contexts joined
//! to the same named channel, with no central coordinator required.
//!
//! ## Features
//!
//! - **Channel sessions**: an eventually-consistent key-value store plus a
//!   best-effort event bus per named channel
//! - **Local echo**: a session observes its own writes and events
//!   immediately, before any transport round trip
//! - **Last-write-wins**: zero-coordination conflict policy, the most
//!   recently applied value per key wins
//! - **Pluggable transport**: in-process hub for tests and single-process
//!   apps, WebSocket relay for everything else
//!
//! ## Quick Start
//!
//! ```rust
//! use relay::{MemoryHub, Session};
//! use serde_json::json;
//!
//! fn main() -> anyhow::Result<()> {
//!     let hub = MemoryHub::new();
//!     let a = Session::join(&hub, "room1")?;
//!     let b = Session::join(&hub, "room1")?;
//!
//!     a.set_value("score", json!("10"));
//!     assert_eq!(a.get_value("score"), Some(json!("10")));
//!     assert_eq!(b.get_value("score"), Some(json!("10")));
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod error;
pub mod message;
pub mod server;
pub mod session;
pub mod transport;

// Re-export main types for library consumers
pub use client::{ChannelClient, JoinStatus, LeaveStatus};
pub use error::{RelayError, TransportError};
pub use message::{ChannelEvent, Message};
pub use session::{DeliveryStatus, ListenerId, Session, SessionConfig};
pub use transport::{Connector, MemoryHub, Subscriber, Transport, WsTransport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
