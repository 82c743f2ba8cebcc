//! Hello handshake message.
//!
//! The first frame on a fresh session in each direction is a `HELLO`
//! carrying a small JSON body. It pins the protocol version and negotiates
//! the maximum frame payload: each side advertises its own limit and both
//! adopt the minimum, so neither end ever has to accept a frame larger than
//! it asked for.

use serde::{Deserialize, Serialize};

use crate::error::{FilewireError, Result};
use crate::protocol::{ABSOLUTE_MAX_PAYLOAD, MIN_MAX_PAYLOAD};

/// Protocol version string. Peers must agree on the major component.
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// Hello handshake body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    /// Protocol version of the sender.
    pub version: String,
    /// Largest frame payload the sender is willing to receive.
    pub max_payload: u32,
}

impl Hello {
    /// Create a hello advertising this side's payload limit.
    pub fn new(max_payload: u32) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            max_payload: clamp_max_payload(max_payload),
        }
    }

    /// Encode to a JSON payload.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from a JSON payload.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Check the peer's version against ours (major must match).
    pub fn check_version(&self) -> Result<()> {
        let peer_major = self.version.split('.').next().unwrap_or("");
        let our_major = PROTOCOL_VERSION.split('.').next().unwrap_or("");
        if peer_major != our_major {
            return Err(FilewireError::HandshakeRejected(format!(
                "Version mismatch: peer {} vs local {}",
                self.version, PROTOCOL_VERSION
            )));
        }
        Ok(())
    }
}

/// Clamp a configured payload limit into the representable range.
pub fn clamp_max_payload(value: u32) -> u32 {
    value.clamp(MIN_MAX_PAYLOAD, ABSOLUTE_MAX_PAYLOAD)
}

/// Compute the effective payload limit from both sides' advertisements.
pub fn negotiate(ours: u32, theirs: u32) -> u32 {
    clamp_max_payload(ours.min(theirs))
}
