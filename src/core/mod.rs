//! # Core Protocol Components
//!
//! Everything needed to turn datagrams into typed packets and back.
//!
//! ## Components
//! - **rng**: the 48-bit generator shared with the game server
//! - **schema**: field layouts and decoded records
//! - **registry**: `(opcode, direction)` to schema lookup
//! - **transform**: payload obfuscation (keystream, connect shuffle)
//! - **codec**: schema-driven frame encoding/decoding
//! - **packet**: the typed packet set
//!
//! ## Wire Format
//! ```text
//! [Opcode(1)] [Payload(N)]
//! ```
//!
//! ## Safety
//! - Every read is bounds-checked against the remaining payload
//! - List allocations are capped by the bytes actually available
//! - Encode rejects values that do not fit their declared width

pub mod codec;
pub mod packet;
pub mod registry;
pub mod rng;
pub mod schema;
pub mod transform;
