use thiserror::Error;

use crate::{Diagnostic, MAX_TOPIC_LEN};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing provisioning value: {0}")]
    Missing(&'static str),
    #[error("Topic longer than {} bytes", MAX_TOPIC_LEN)]
    TopicTooLong,
    #[error("Server fingerprint is not a 20 byte hex string")]
    Fingerprint,
    #[error("Unknown board variant")]
    Board,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("Clock not synchronized, cannot validate certificates")]
    ClockNotSet,
    #[error("Trust anchors rejected by transport")]
    TrustAnchors,
    #[error("TLS handshake failed: {0}")]
    Transport(Diagnostic),
    #[error("Server certificate chain did not validate")]
    UntrustedChain,
    #[error("Server certificate fingerprint mismatch")]
    FingerprintMismatch,
}

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration Error")]
    Config(#[from] ConfigError),
    #[error("Secure session Error")]
    Handshake(#[from] HandshakeError),
}
