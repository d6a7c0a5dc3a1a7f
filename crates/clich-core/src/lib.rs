//! clich core - Shared types for the relay hub
//!
//! This crate provides the domain types shared between the daemon
//! (clichd), the wire protocol and the terminal client.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod connection;
pub mod error;
pub mod identity;

// Re-exports for convenience
pub use connection::ConnectionId;
pub use error::{IdentityError, IdentityResult};
pub use identity::{ClientIdentity, Principal, MAX_DISPLAY_NAME_LEN, MAX_ID_LEN};
