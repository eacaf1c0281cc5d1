//! # nebulous-client
//!
//! Session client for the Nebulous.io real-time game protocol.
//!
//! The crate is organised the same way the protocol flows:
//!
//! - [`core`]: deterministic generator, field schemas, packet registry,
//!   payload transforms and the typed packet set.
//! - [`protocol`]: handshake construction, the callback dispatcher and the
//!   connection engine (state machine, keep-alive, routing).
//! - [`session`]: the world-state mirror rebuilt from delta records.
//! - [`transport`]: datagram transports (UDP and an in-memory pair).
//! - [`config`], [`error`], [`utils`]: configuration, error taxonomy,
//!   logging/metrics/timeouts.
//!
//! ## Wire Format
//! ```text
//! [Opcode(1)] [Payload(N)]
//! ```
//! The payload is schema-defined per opcode and direction and may be
//! obfuscated by the connection's payload transform.
//!
//! ## Example
//! ```rust,no_run
//! use nebulous_client::config::ClientConfig;
//! use nebulous_client::protocol::connection::Connection;
//! use nebulous_client::protocol::dispatcher::{Dispatcher, Event, EventKind};
//!
//! # async fn run() -> nebulous_client::error::Result<()> {
//! let config = ClientConfig::from_file("client.toml")?;
//!
//! let mut dispatcher = Dispatcher::new();
//! dispatcher.register_sync(EventKind::GameChat, |event| {
//!     if let Event::GameChat(chat) = &event {
//!         tracing::info!(alias = %chat.alias, message = %chat.message, "chat");
//!     }
//!     event
//! });
//!
//! let connection = Connection::udp(config, dispatcher)?;
//! connection.start().await?;
//! connection.send_game_chat("hello").await?;
//! connection.closed().await
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod utils;

pub use crate::core::packet::Packet;
pub use crate::core::registry::{Direction, Registry};
pub use crate::core::rng::JavaRandom;
pub use crate::error::{ErrorKind, ProtocolError, Result};
pub use crate::protocol::connection::{Connection, ConnectionState, Steering, Termination};
pub use crate::protocol::dispatcher::{Dispatcher, Event, EventKind};
pub use crate::session::{Delta, Entity, EntityFields, EntityId, EntityKind, Session, WorldSnapshot};
