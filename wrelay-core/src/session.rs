//! Broker session on top of [`SecureSession`]. The supervisor walks
//! `Disconnected -> Handshaking -> SessionEstablished -> Subscribed -> Ready`
//! once per attempt, waiting the slow-blink interval after each failure and
//! retrying forever.

use core::fmt;
use embedded_hal::{delay::DelayNs, digital::OutputPin};

use crate::{
    InboundCommand, Indicator, SecureSession, TlsTransport, Topics, READY_ANNOUNCEMENT,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Timeout,
    ConnectFailed,
    ConnectionLost,
    Disconnected,
    Connected,
    BadProtocol,
    BadCredentials,
    Unauthorized,
    BadClientId,
    Unavailable,
    Unknown,
}

impl SessionState {
    /// Maps MQTT client state codes (CONNACK return codes are positive)
    pub fn from_code(code: i8) -> Self {
        match code {
            -4 => SessionState::Timeout,
            -3 => SessionState::ConnectionLost,
            -2 => SessionState::ConnectFailed,
            -1 => SessionState::Disconnected,
            0 => SessionState::Connected,
            1 => SessionState::BadProtocol,
            2 => SessionState::BadClientId,
            3 => SessionState::Unavailable,
            4 => SessionState::BadCredentials,
            5 => SessionState::Unauthorized,
            _ => SessionState::Unknown,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            SessionState::Timeout => "Connection timeout.",
            SessionState::ConnectFailed => "Connection failed.",
            SessionState::ConnectionLost => "Connection lost.",
            SessionState::Disconnected => "Disconnected.",
            SessionState::Connected => "Connected.",
            SessionState::BadProtocol => "Bad protocol.",
            SessionState::BadCredentials => "Bad credentials.",
            SessionState::Unauthorized => "Unauthorized.",
            SessionState::BadClientId => "Bad client ID.",
            SessionState::Unavailable => "Unavailable.",
            SessionState::Unknown => "Unknown",
        };
        f.write_str(msg)
    }
}

/// Identity presented on CONNECT; must match the broker's ACLs
#[derive(Debug, Clone, Copy)]
pub struct DeviceIdentity {
    pub client_id: &'static str,
    pub user: &'static str,
    pub password: &'static str,
}

/// Publish / subscribe client boundary. The client owns the TLS transport
/// it speaks over; `connect` runs the MQTT CONNECT exchange on a transport
/// that [`SecureSession::connect`] has already opened.
pub trait MqttClient {
    type Transport: TlsTransport;
    type Error: fmt::Debug;

    fn transport_mut(&mut self) -> &mut Self::Transport;
    fn connect(&mut self, identity: &DeviceIdentity) -> Result<(), Self::Error>;
    fn connected(&mut self) -> bool;
    fn state(&mut self) -> SessionState;
    fn subscribe(&mut self, topic: &str) -> Result<(), Self::Error>;
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), Self::Error>;
    /// Services the connection once and yields at most one message that
    /// arrived on a subscribed topic
    fn poll(&mut self) -> Option<InboundCommand>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Disconnected,
    Handshaking,
    SessionEstablished,
    Subscribed,
    Ready,
}

pub struct SessionSupervisor {
    identity: DeviceIdentity,
    phase: SessionPhase,
    subscribed: bool,
    failed_attempts: u32,
    announcements: u32,
}

impl SessionSupervisor {
    pub fn new(identity: DeviceIdentity) -> Self {
        Self {
            identity,
            phase: SessionPhase::Disconnected,
            subscribed: false,
            failed_attempts: 0,
            announcements: 0,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// False when the last session came up without its command subscription
    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    /// Failed connect attempts since boot
    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    /// Ready announcements published since boot
    pub fn announcements(&self) -> u32 {
        self.announcements
    }

    /// One connect attempt. Must only be called while the link is attached.
    pub fn step<C, P, D>(
        &mut self,
        client: &mut C,
        secure: &mut SecureSession,
        topics: &Topics,
        indicator: &mut Indicator<P, D>,
    ) -> SessionPhase
    where
        C: MqttClient,
        P: OutputPin,
        D: DelayNs,
    {
        if client.connected() {
            if self.phase != SessionPhase::Ready {
                // came up outside an attempt, finish bringing it to ready
                self.establish(client, topics);
            }
            return self.phase;
        }

        if self.phase == SessionPhase::Ready {
            log::warn!("Lost connection with MQTT broker: {}", client.state());
        }
        self.phase = SessionPhase::Handshaking;
        self.subscribed = false;

        log::info!("Connecting to {}...", secure.endpoint());
        if let Err(e) = secure.connect(client.transport_mut()) {
            log::error!("Cannot connect to MQTT server. SSL error: {e}");
            return self.retry_later(indicator);
        }

        if let Err(e) = client.connect(&self.identity) {
            log::error!(
                "Cannot connect to MQTT server {e:?}, client state: {}",
                client.state()
            );
            log::error!("SSL error: {}", client.transport_mut().last_error());
            client.transport_mut().close();
            return self.retry_later(indicator);
        }

        log::info!("Connected as {}", self.identity.client_id);
        self.establish(client, topics);
        self.phase
    }

    /// Steps until the session is ready; returns the failed attempts it took
    pub fn run_until_ready<C, P, D>(
        &mut self,
        client: &mut C,
        secure: &mut SecureSession,
        topics: &Topics,
        indicator: &mut Indicator<P, D>,
    ) -> u32
    where
        C: MqttClient,
        P: OutputPin,
        D: DelayNs,
    {
        let before = self.failed_attempts;
        while self.step(client, secure, topics, indicator) != SessionPhase::Ready {}
        self.failed_attempts - before
    }

    fn establish<C: MqttClient>(&mut self, client: &mut C, topics: &Topics) {
        self.phase = SessionPhase::SessionEstablished;

        match client.subscribe(topics.command()) {
            Ok(()) => {
                log::info!("Subscribed: {}", topics.command());
                self.subscribed = true;
                self.phase = SessionPhase::Subscribed;
            }
            // session stays usable; subscription is retried on the next reconnect
            Err(e) => log::error!("[ERROR] Cannot subscribe to {} {e:?}", topics.command()),
        }

        match client.publish(topics.status(), READY_ANNOUNCEMENT.as_bytes()) {
            Ok(()) => log::info!("READY message sent."),
            Err(e) => log::error!("[ERROR] Cannot publish ready message! {e:?}"),
        }
        self.announcements = self.announcements.saturating_add(1);
        self.phase = SessionPhase::Ready;
    }

    fn retry_later<P: OutputPin, D: DelayNs>(
        &mut self,
        indicator: &mut Indicator<P, D>,
    ) -> SessionPhase {
        self.failed_attempts = self.failed_attempts.saturating_add(1);
        self.phase = SessionPhase::Disconnected;
        log::info!(
            "Retrying in {} ms (attempt {} failed)",
            Indicator::<P, D>::session_retry_ms(),
            self.failed_attempts
        );
        indicator.session_heartbeat();
        self.phase
    }
}
