//! Secure channel to the broker. The TLS record layer is a collaborator;
//! this module owns the acceptance policy on top of it: the server must
//! present a chain that validates against the configured anchors *and* a
//! leaf whose fingerprint equals the pinned one. Either alone is a failure.

use core::fmt;

use crate::{Diagnostic, HandshakeError};

/// SHA-1 fingerprint of the expected server certificate
pub type Fingerprint = [u8; 20];

#[derive(Debug, Clone, Copy)]
pub struct Endpoint {
    pub host: &'static str,
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Root certificates plus the pinned server fingerprint, fixed at build time
#[derive(Debug, Clone, Copy)]
pub struct TrustMaterial {
    pub root_certs: &'static str,
    pub fingerprint: Fingerprint,
    pub allow_self_signed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlsBuffers {
    pub rx: usize,
    pub tx: usize,
}

impl Default for TlsBuffers {
    fn default() -> Self {
        Self { rx: 512, tx: 512 }
    }
}

/// What the record layer learned about the server during a handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerCertificate {
    /// Chain validated against the installed anchors at the installed time
    pub chain_valid: bool,
    pub fingerprint: Fingerprint,
}

/// TLS record layer boundary. Must tolerate `connect` being called again
/// after any failure.
pub trait TlsTransport {
    type Error: fmt::Debug;

    fn set_x509_time(&mut self, epoch: u64);
    fn set_trust_anchors(&mut self, pem: &'static str) -> Result<(), Self::Error>;
    fn allow_self_signed(&mut self);
    fn set_buffer_sizes(&mut self, buffers: TlsBuffers);
    fn connect(&mut self, endpoint: &Endpoint) -> Result<PeerCertificate, Self::Error>;
    fn close(&mut self);
    fn last_error(&mut self) -> Diagnostic;
}

pub struct SecureSession {
    endpoint: Endpoint,
    trust: TrustMaterial,
    buffers: TlsBuffers,
    time: Option<u64>,
    last_error: Option<HandshakeError>,
}

impl SecureSession {
    pub fn new(endpoint: Endpoint, trust: TrustMaterial, buffers: TlsBuffers) -> Self {
        Self {
            endpoint,
            trust,
            buffers,
            time: None,
            last_error: None,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn last_error(&self) -> Option<&HandshakeError> {
        self.last_error.as_ref()
    }

    /// Installs time and trust material on the transport. Has to happen
    /// once, after the clock synced and before the first handshake.
    pub fn install<T: TlsTransport>(
        &mut self,
        transport: &mut T,
        epoch: u64,
    ) -> Result<(), HandshakeError> {
        transport.set_x509_time(epoch);
        transport
            .set_trust_anchors(self.trust.root_certs)
            .map_err(|e| {
                log::error!("Transport rejected trust anchors {e:?}");
                HandshakeError::TrustAnchors
            })?;
        if self.trust.allow_self_signed {
            transport.allow_self_signed();
        }
        transport.set_buffer_sizes(self.buffers);
        self.time = Some(epoch);
        Ok(())
    }

    /// One handshake attempt against the configured endpoint. Leaves the
    /// transport open only when the server passed both checks.
    pub fn connect<T: TlsTransport>(&mut self, transport: &mut T) -> Result<(), HandshakeError> {
        let res = self.handshake(transport);
        if let Err(e) = &res {
            transport.close();
            self.last_error = Some(e.clone());
        } else {
            self.last_error = None;
        }
        res
    }

    /// Handshakes once and closes again, reporting the verdict
    pub fn verify<T: TlsTransport>(&mut self, transport: &mut T) -> bool {
        match self.connect(transport) {
            Ok(()) => {
                log::info!("Connection complete, valid cert, valid fingerprint.");
                transport.close();
                true
            }
            Err(e) => {
                log::warn!("Connection failed. TLS verification failed: {e}");
                false
            }
        }
    }

    fn handshake<T: TlsTransport>(&mut self, transport: &mut T) -> Result<(), HandshakeError> {
        if self.time.is_none() {
            return Err(HandshakeError::ClockNotSet);
        }

        transport.close();
        let peer = transport.connect(&self.endpoint).map_err(|e| {
            let detail = transport.last_error();
            log::debug!("Transport error {e:?}");
            HandshakeError::Transport(detail)
        })?;

        if !peer.chain_valid {
            return Err(HandshakeError::UntrustedChain);
        }
        if peer.fingerprint != self.trust.fingerprint {
            return Err(HandshakeError::FingerprintMismatch);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimTransport;

    const PINNED: Fingerprint = [0xAB; 20];

    fn session() -> SecureSession {
        SecureSession::new(
            Endpoint {
                host: "broker.local",
                port: 8883,
            },
            TrustMaterial {
                root_certs: "-----BEGIN CERTIFICATE-----",
                fingerprint: PINNED,
                allow_self_signed: true,
            },
            TlsBuffers::default(),
        )
    }

    #[test]
    fn refuses_before_clock_is_installed() {
        let mut transport = SimTransport::new(PINNED);
        let mut secure = session();
        assert_eq!(
            secure.connect(&mut transport),
            Err(HandshakeError::ClockNotSet)
        );
        assert_eq!(transport.handshakes(), 0);
    }

    #[test]
    fn install_configures_transport() {
        let mut transport = SimTransport::new(PINNED);
        let mut secure = session();
        secure.install(&mut transport, 1_700_000_000).unwrap();

        assert_eq!(transport.x509_time(), Some(1_700_000_000));
        assert!(transport.anchors_installed());
        assert!(transport.self_signed_allowed());
        assert_eq!(transport.buffers(), Some(TlsBuffers { rx: 512, tx: 512 }));
    }

    #[test]
    fn accepts_valid_chain_with_pinned_leaf() {
        let mut transport = SimTransport::new(PINNED);
        let mut secure = session();
        secure.install(&mut transport, 1_700_000_000).unwrap();

        assert_eq!(secure.connect(&mut transport), Ok(()));
        assert!(transport.is_open());
        assert!(secure.last_error().is_none());
    }

    #[test]
    fn fingerprint_alone_is_not_enough() {
        let mut transport = SimTransport::new(PINNED);
        transport.push_handshake(Ok(PeerCertificate {
            chain_valid: false,
            fingerprint: PINNED,
        }));
        let mut secure = session();
        secure.install(&mut transport, 1_700_000_000).unwrap();

        assert_eq!(
            secure.connect(&mut transport),
            Err(HandshakeError::UntrustedChain)
        );
        assert!(!transport.is_open());
    }

    #[test]
    fn valid_chain_to_other_leaf_is_rejected() {
        let mut transport = SimTransport::new(PINNED);
        transport.push_handshake(Ok(PeerCertificate {
            chain_valid: true,
            fingerprint: [0x01; 20],
        }));
        let mut secure = session();
        secure.install(&mut transport, 1_700_000_000).unwrap();

        assert_eq!(
            secure.connect(&mut transport),
            Err(HandshakeError::FingerprintMismatch)
        );
        assert!(!transport.is_open());
        assert_eq!(
            secure.last_error(),
            Some(&HandshakeError::FingerprintMismatch)
        );
    }

    #[test]
    fn transport_failure_carries_detail() {
        let mut transport = SimTransport::new(PINNED);
        transport.push_handshake(Err("Certificate is expired"));
        let mut secure = session();
        secure.install(&mut transport, 1_700_000_000).unwrap();

        match secure.connect(&mut transport) {
            Err(HandshakeError::Transport(detail)) => {
                assert_eq!(detail.as_str(), "Certificate is expired")
            }
            other => panic!("unexpected {other:?}"),
        }

        // re-callable after failure
        assert_eq!(secure.connect(&mut transport), Ok(()));
    }

    #[test]
    fn verify_closes_after_success() {
        let mut transport = SimTransport::new(PINNED);
        let mut secure = session();
        secure.install(&mut transport, 1_700_000_000).unwrap();

        assert!(secure.verify(&mut transport));
        assert!(!transport.is_open());
    }
}
