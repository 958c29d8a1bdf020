//! Control-channel close codes.
//!
//! The server signals intent through the WebSocket close frame. Only two
//! closes are "expected": a session replaced by a newer one from the same
//! identity, and an identity the server refuses. Everything else is treated
//! as a transport failure and triggers a reconnect.

/// Normal closure.
pub const NORMAL: u16 = 1000;

/// Closed without a close frame (connection dropped or never opened).
///
/// Never sent on the wire; transports synthesize it.
pub const ABNORMAL: u16 = 1006;

/// Identity rejected: the display name is too long or otherwise invalid.
pub const NAME_INVALID: u16 = 1009;

/// Close reason sent with [`NORMAL`] when a newer session took over.
pub const REPLACED_REASON: &str = "Reconnected from another session";

/// Close code and reason as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    /// WebSocket close code.
    pub code: u16,
    /// Close reason text (may be empty).
    pub reason: String,
}

/// What a close means for the reconnect policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// A newer session from the same identity took over. Do not reconnect.
    Replaced,
    /// The server refused the identity. Do not retry with it.
    IdentityRejected,
    /// Anything else. Reconnect.
    Abnormal,
}

impl CloseInfo {
    /// Create close info from a code and reason.
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self { code, reason: reason.into() }
    }

    /// Close synthesized when the socket vanished without a close frame.
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(ABNORMAL, reason)
    }

    /// Classify this close for the reconnect policy.
    pub fn kind(&self) -> CloseKind {
        match self.code {
            NAME_INVALID => CloseKind::IdentityRejected,
            NORMAL if self.reason == REPLACED_REASON => CloseKind::Replaced,
            _ => CloseKind::Abnormal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaced_requires_reason() {
        assert_eq!(CloseInfo::new(NORMAL, REPLACED_REASON).kind(), CloseKind::Replaced);
        assert_eq!(CloseInfo::new(NORMAL, "bye").kind(), CloseKind::Abnormal);
        assert_eq!(CloseInfo::new(NORMAL, "").kind(), CloseKind::Abnormal);
    }

    #[test]
    fn name_invalid_is_identity_rejected() {
        assert_eq!(CloseInfo::new(NAME_INVALID, "name too long").kind(), CloseKind::IdentityRejected);
        assert_eq!(CloseInfo::new(NAME_INVALID, "").kind(), CloseKind::IdentityRejected);
    }

    #[test]
    fn everything_else_is_abnormal() {
        for code in [1001, 1002, 1006, 1011, 4000] {
            assert_eq!(CloseInfo::new(code, REPLACED_REASON).kind(), CloseKind::Abnormal);
        }
        assert_eq!(CloseInfo::abnormal("reset").code, ABNORMAL);
    }
}
