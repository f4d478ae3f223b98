//! Controller core for a single normally-closed Wi-Fi relay, operated
//! remotely over MQTT on a TLS session.
//!
//! The crate owns the parts of the firmware that decide things: keeping
//! the Wi-Fi link attached, keeping an authenticated broker session up,
//! validating the broker's certificate against a synced clock, and turning
//! inbound command messages into relay transitions plus status replies.
//!
//! Everything below that line is a collaborator reached through a trait:
//! 1. [`LinkDriver`] for the radio / station interface
//! 2. [`TimeSync`] for the network time client
//! 3. [`TlsTransport`] for the TLS record layer
//! 4. [`MqttClient`] for the publish / subscribe wire protocol
//!
//! GPIO and delays go through `embedded-hal` 1.0, so the same code runs on
//! target and under the scripted collaborators in [`sim`].
//!
//! The controller is one cooperative loop, see [`Device`]:
//! 1. link not attached: step the [`LinkSupervisor`] (5 Hz heartbeat)
//! 2. session not connected: step the [`SessionSupervisor`] (slow blink,
//!    ~5 s between attempts)
//! 3. otherwise hand at most one pending message to the [`CommandRouter`]
#![cfg_attr(not(any(test, feature = "std")), no_std)]

mod actuator;
mod clock;
mod config;
mod device;
mod error;
mod indicator;
mod link;
mod router;
mod session;
mod tls;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use actuator::{Actuator, RelayState, Transition};
pub use clock::{formatted_time, IdentityClock, TimeSync};
pub use config::{BoardVariant, DeviceConfig, Topics, RELAY_PIN};
pub use device::{CycleOutcome, Device};
pub use error::{ConfigError, HandshakeError, RelayError};
pub use indicator::Indicator;
pub use link::{LinkCredentials, LinkDriver, LinkPhase, LinkStatus, LinkSupervisor};
pub use router::{Command, CommandRouter, InboundCommand, RouteOutcome};
pub use session::{DeviceIdentity, MqttClient, SessionPhase, SessionState, SessionSupervisor};
pub use tls::{
    Endpoint, Fingerprint, PeerCertificate, SecureSession, TlsBuffers, TlsTransport,
    TrustMaterial,
};

/// Payload that opens the relay
pub const OPEN_COMMAND: &str = "OPEN";
/// Payload that closes the relay
pub const CLOSE_COMMAND: &str = "CLOSE";
/// Published on the status topic once per established session
pub const READY_ANNOUNCEMENT: &str = "READY";

/// Upper bound on `<namespace>/<device-id>/<r|w>`
pub const MAX_TOPIC_LEN: usize = 64;
/// Inbound payloads longer than this can never be a command
pub const MAX_PAYLOAD_LEN: usize = 64;
/// Size of the TLS layer's last-error text
pub const DIAGNOSTIC_LEN: usize = 56;

/// Bounded diagnostic text reported by a lower layer
pub type Diagnostic = heapless::String<DIAGNOSTIC_LEN>;
