//! # Protocol Layer
//!
//! Session-level behaviour on top of the packet codec.
//!
//! ## Components
//! - **handshake**: connect request construction and result verification
//! - **dispatcher**: ordered user handler pipelines per event kind
//! - **connection**: the state machine, keep-alive and routing
//!
//! ## Handshake Flow
//! ```text
//! Client                                   Server
//!   |-- ConnectRequest (shuffled) --------->|
//!   |<-------- ConnectResult (clear) -------|
//!   |   session transforms seeded           |
//!   |<-------- GameData / WorldUpdate ------|
//!   |-- KeepAlive (every interval) -------->|
//!   |<-------- KeepAlive ack ---------------|
//! ```

pub mod connection;
pub mod dispatcher;
pub mod handshake;
