//! Join server error taxonomy
//!
//! Every variant is local and non-fatal: the dispatch boundary logs it and
//! answers with "no reply". Startup paths (config, provisioning, session
//! replay) use `anyhow` instead.

use thiserror::Error;

use crate::registry::Eui64;

/// Result type for frame handling.
pub type Result<T> = std::result::Result<T, JoinError>;

/// Reasons a frame is dropped without a reply.
#[derive(Error, Debug)]
pub enum JoinError {
    #[error("empty frame")]
    MalformedFrame,

    #[error("JoinRequest must be 23 bytes, got {len}")]
    MalformedJoinRequest { len: usize },

    #[error("unknown device {0}")]
    UnknownDevice(Eui64),

    #[error("MIC check failed for device {0}")]
    IntegrityCheckFailed(Eui64),

    #[error("unsupported LoRaWAN major version {0}")]
    UnsupportedVersion(u8),

    #[error("unknown frame type {0}")]
    UnknownFrameType(u8),

    #[error("failed to persist session for device {dev_eui}: {source}")]
    SessionPersist {
        dev_eui: Eui64,
        #[source]
        source: anyhow::Error,
    },
}

impl JoinError {
    /// Drops that are expected in normal operation (a gateway broadcasting
    /// to several join servers) and only worth a debug line.
    pub fn is_expected(&self) -> bool {
        matches!(self, JoinError::UnknownDevice(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_device_in_display_order() {
        let eui = Eui64::from_wire([0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]);
        let err = JoinError::UnknownDevice(eui);
        assert_eq!(err.to_string(), "unknown device 0102030405060708");
        assert!(err.is_expected());
        assert!(!JoinError::IntegrityCheckFailed(eui).is_expected());
    }

    #[test]
    fn test_malformed_join_request_reports_length() {
        let err = JoinError::MalformedJoinRequest { len: 22 };
        assert_eq!(err.to_string(), "JoinRequest must be 23 bytes, got 22");
    }
}
