//! clich protocol - Wire format for hub connections
//!
//! A connection starts with one JSON handshake line carrying the peer's
//! identity. Every line after that is an opaque frame that the hub relays
//! verbatim to the other peers.

pub mod frame;
pub mod handshake;

pub use frame::{read_frame, write_frame, MAX_FRAME_SIZE};
pub use handshake::Handshake;

use clich_core::IdentityError;
use thiserror::Error;

/// Errors produced while decoding the wire format.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed handshake: {0}")]
    Decode(String),

    #[error("Invalid identity: {0}")]
    InvalidIdentity(#[from] IdentityError),

    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
