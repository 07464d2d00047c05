//! Control-channel handshake and chunking

use bytes::Bytes;
use contracts::{NegotiationStatus, TransferError};
use serde::{Deserialize, Serialize};

/// Maximum chunk size on the data channel
pub const CHUNK_SIZE: usize = 128 * 1024;

/// Command sent on the control channel once the data subscription is live
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlCommand {
    pub command: String,
}

impl ControlCommand {
    pub const START: &'static str = "start";

    pub fn start() -> Self {
        Self {
            command: Self::START.to_string(),
        }
    }

    pub fn is_start(&self) -> bool {
        self.command == Self::START
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(serde_json::to_vec(self).unwrap_or_default())
    }
}

/// Responder acknowledgement of a control command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlAck {
    pub status: NegotiationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ControlAck {
    pub fn ok() -> Self {
        Self {
            status: NegotiationStatus::Ok,
            reason: None,
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            status: NegotiationStatus::Error,
            reason: Some(reason.into()),
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(serde_json::to_vec(self).unwrap_or_default())
    }

    /// Parse an ack; an error status becomes `Rejected`
    pub fn check(payload: &[u8]) -> Result<(), TransferError> {
        let ack: ControlAck = serde_json::from_slice(payload)
            .map_err(|e| TransferError::malformed(format!("invalid start ack: {e}")))?;
        match ack.status {
            NegotiationStatus::Ok => Ok(()),
            NegotiationStatus::Error => Err(TransferError::Rejected {
                reason: ack
                    .reason
                    .unwrap_or_else(|| "start rejected without reason".to_string()),
            }),
        }
    }
}

/// Split a body into zero-copy chunks of at most `size` bytes
pub fn chunks(body: &Bytes, size: usize) -> impl Iterator<Item = Bytes> + '_ {
    let size = size.max(1);
    (0..body.len())
        .step_by(size)
        .map(move |start| body.slice(start..(start + size).min(body.len())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunks_cover_body() {
        let body = Bytes::from(vec![7u8; CHUNK_SIZE * 2 + 5]);
        let parts: Vec<_> = chunks(&body, CHUNK_SIZE).collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2].len(), 5);
        assert!(chunks(&Bytes::new(), CHUNK_SIZE).next().is_none());
    }

    #[test]
    fn test_ack_check() {
        assert!(ControlAck::check(&ControlAck::ok().to_bytes()).is_ok());
        assert_eq!(
            ControlAck::check(&ControlAck::error("busy").to_bytes()).unwrap_err(),
            TransferError::Rejected {
                reason: "busy".into()
            }
        );
        assert!(ControlAck::check(b"??").is_err());
    }
}
