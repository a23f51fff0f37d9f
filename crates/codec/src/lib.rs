//! Wire codec for the two framings a bridge connection speaks on its UDP
//! socket.
//!
//! [RFC8489]: https://datatracker.ietf.org/doc/html/rfc8489
//!
//! During the STUN phase the socket only ever exchanges a stripped-down
//! subset of the STUN Binding transaction described in [RFC8489]: a request
//! carrying no attributes, and a response carrying a single
//! XOR-MAPPED-ADDRESS. Every other phase the socket speaks the domain's own
//! framed packet format: a small header (packet type, sequence number)
//! followed by a type-specific body.
//!
//! Message integrity and fingerprint attributes are out of scope here; the
//! bridge never authenticates a relayed payload.

pub mod domain;
pub mod stun;

use std::{array::TryFromSliceError, str::Utf8Error};

#[derive(Debug)]
pub enum Error {
    InvalidInput,
    UnexpectedEof,
    UnknownPacketType(u8),
    MagicCookieMismatch,
    Utf8Error(Utf8Error),
    TryFromSliceError(TryFromSliceError),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl From<Utf8Error> for Error {
    fn from(value: Utf8Error) -> Self {
        Self::Utf8Error(value)
    }
}

impl From<TryFromSliceError> for Error {
    fn from(value: TryFromSliceError) -> Self {
        Self::TryFromSliceError(value)
    }
}
