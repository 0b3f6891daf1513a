//! Identifiers for polling connections.
//!
//! Each CONNECT handshake assigns a [`ConnectionId`] that the client echoes
//! in the `SpaceUnicorn-ConnID` header of every later request. On the wire
//! it is 32 lowercase hex characters; parsing also accepts uppercase.

use core::{fmt, str::FromStr};

use thiserror::Error;

const ID_LEN: usize = 16;

/// An opaque, unguessable connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId([u8; ID_LEN]);

impl ConnectionId {
    /// Draw a fresh identifier from the thread RNG.
    #[must_use]
    pub fn generate() -> Self {
        Self(rand::random())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.iter().try_for_each(|byte| write!(f, "{byte:02x}"))
    }
}

/// Why a header value is not a [`ConnectionId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseConnectionIdError {
    /// Wrong number of characters.
    #[error("expected {expected} hex characters, got {0}", expected = ID_LEN * 2)]
    Length(usize),

    /// A character outside `[0-9a-fA-F]`.
    #[error("invalid hex character {found:?} at position {position}")]
    NotHex {
        /// Byte offset into the input.
        position: usize,

        /// The offending byte.
        found: char,
    },
}

impl FromStr for ConnectionId {
    type Err = ParseConnectionIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != ID_LEN * 2 {
            return Err(ParseConnectionIdError::Length(s.len()));
        }

        let nibble = |position: usize| {
            let byte = s.as_bytes()[position];
            char::from(byte)
                .to_digit(16)
                .and_then(|d| u8::try_from(d).ok())
                .ok_or(ParseConnectionIdError::NotHex {
                    position,
                    found: char::from(byte),
                })
        };

        let mut bytes = [0u8; ID_LEN];
        for (i, slot) in bytes.iter_mut().enumerate() {
            *slot = (nibble(2 * i)? << 4) | nibble(2 * i + 1)?;
        }
        Ok(Self(bytes))
    }
}
