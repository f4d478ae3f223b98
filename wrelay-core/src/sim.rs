//! Scripted, in-memory collaborators for running the controller off-target.
//!
//! Every type here is a cheap handle over shared state: clone it, move one
//! clone into the [`Device`](crate::Device), and keep the other to script
//! behaviour and inspect what the controller did. Delays are recorded
//! rather than slept.

use std::{cell::RefCell, collections::VecDeque, convert::Infallible, net::Ipv4Addr, rc::Rc};

use embedded_hal::{
    delay::DelayNs,
    digital::{ErrorType, OutputPin},
};

use crate::{
    DeviceConfig, DeviceIdentity, Diagnostic, Endpoint, Fingerprint, InboundCommand,
    LinkCredentials, LinkDriver, LinkStatus, MqttClient, PeerCertificate, SessionState,
    TimeSync, TlsBuffers, TlsTransport, TrustMaterial,
};

/// Fingerprint the simulated broker presents by default
pub const FINGERPRINT: Fingerprint = [
    0x8E, 0xE1, 0x27, 0x9C, 0x31, 0x33, 0x0D, 0xB0, 0x6B, 0xBC, 0x38, 0x52, 0x8F, 0xEA, 0x0E, 0x14,
    0x8D, 0x06, 0xA5, 0x04,
];

/// Provisioning for device `0` under the `wifi-relay` namespace, pinned to
/// [`FINGERPRINT`]
pub fn device_config() -> DeviceConfig {
    DeviceConfig {
        namespace: "wifi-relay",
        device_id: "0",
        identity: DeviceIdentity {
            client_id: "wifi-relay-0",
            user: "wifi-relay-0",
            password: "UserPasswordDefinedOnTheBroker",
        },
        link: LinkCredentials {
            ssid: "YourWifiNetwork",
            password: "YourWifiNetworkPassword",
        },
        endpoint: Endpoint {
            host: "broker.sim",
            port: 8883,
        },
        trust: TrustMaterial {
            root_certs: "-----BEGIN CERTIFICATE-----\n-----END CERTIFICATE-----\n",
            fingerprint: FINGERPRINT,
            allow_self_signed: true,
        },
        tls_buffers: TlsBuffers::default(),
        ntp_server: "pool.ntp.org",
        utc_offset_secs: 3600,
        board: crate::BoardVariant::Esp8266S,
    }
}

/// Output line recording every level written to it (`true` is high)
#[derive(Debug, Clone, Default)]
pub struct SimPin(Rc<RefCell<Vec<bool>>>);

impl SimPin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn level(&self) -> Option<bool> {
        self.0.borrow().last().copied()
    }

    pub fn history(&self) -> Vec<bool> {
        self.0.borrow().clone()
    }
}

impl ErrorType for SimPin {
    type Error = Infallible;
}

impl OutputPin for SimPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.0.borrow_mut().push(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.0.borrow_mut().push(true);
        Ok(())
    }
}

/// Delay that only accumulates the requested time
#[derive(Debug, Clone, Default)]
pub struct SimDelay(Rc<RefCell<u64>>);

impl SimDelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn elapsed_ms(&self) -> u64 {
        *self.0.borrow() / 1_000_000
    }
}

impl DelayNs for SimDelay {
    fn delay_ns(&mut self, ns: u32) {
        *self.0.borrow_mut() += u64::from(ns);
    }

    fn delay_us(&mut self, us: u32) {
        *self.0.borrow_mut() += u64::from(us) * 1_000;
    }

    fn delay_ms(&mut self, ms: u32) {
        *self.0.borrow_mut() += u64::from(ms) * 1_000_000;
    }
}

#[derive(Debug)]
struct LinkInner {
    status: LinkStatus,
    // begin() call count at which the link attaches
    attach_at: u32,
    begin_calls: u32,
    station_mode_calls: u32,
    // status polls that report Connecting after a begin()
    connecting_polls: u32,
    hold_connecting: u32,
    pending: LinkStatus,
}

/// Radio driver that attaches after a scripted number of attempts
#[derive(Debug, Clone)]
pub struct ScriptedLink(Rc<RefCell<LinkInner>>);

impl ScriptedLink {
    pub fn attached() -> Self {
        let link = Self::attach_after(0);
        link.0.borrow_mut().status = LinkStatus::Connected;
        link
    }

    /// Attaches on the `attempts`-th call to `begin`
    pub fn attach_after(attempts: u32) -> Self {
        Self(Rc::new(RefCell::new(LinkInner {
            status: LinkStatus::Disconnected,
            attach_at: attempts,
            begin_calls: 0,
            station_mode_calls: 0,
            connecting_polls: 0,
            hold_connecting: 0,
            pending: LinkStatus::Disconnected,
        })))
    }

    /// Report `Connecting` for this many status polls after each `begin`
    pub fn hold_connecting(&self, polls: u32) {
        self.0.borrow_mut().hold_connecting = polls;
    }

    /// Drops the link; it reattaches after `attempts` more `begin` calls
    pub fn drop_link(&self, attempts: u32) {
        let mut inner = self.0.borrow_mut();
        inner.status = LinkStatus::Disconnected;
        inner.attach_at = inner.begin_calls + attempts;
    }

    pub fn begin_calls(&self) -> u32 {
        self.0.borrow().begin_calls
    }

    pub fn station_mode_calls(&self) -> u32 {
        self.0.borrow().station_mode_calls
    }
}

impl LinkDriver for ScriptedLink {
    type Error = Infallible;

    fn status(&mut self) -> LinkStatus {
        let mut inner = self.0.borrow_mut();
        if inner.connecting_polls > 0 {
            inner.connecting_polls -= 1;
            if inner.connecting_polls == 0 {
                inner.status = inner.pending;
            }
            return LinkStatus::Connecting;
        }
        inner.status
    }

    fn set_station_mode(&mut self) -> Result<(), Self::Error> {
        self.0.borrow_mut().station_mode_calls += 1;
        Ok(())
    }

    fn begin(&mut self, _credentials: &LinkCredentials) -> Result<(), Self::Error> {
        let mut inner = self.0.borrow_mut();
        inner.begin_calls += 1;
        let outcome = if inner.begin_calls >= inner.attach_at {
            LinkStatus::Connected
        } else {
            LinkStatus::Unreachable
        };
        if inner.hold_connecting > 0 {
            inner.connecting_polls = inner.hold_connecting;
            inner.pending = outcome;
        } else {
            inner.status = outcome;
        }
        Ok(())
    }

    fn local_ip(&mut self) -> Option<Ipv4Addr> {
        self.0
            .borrow()
            .status
            .is_attached()
            .then_some(Ipv4Addr::new(192, 168, 1, 42))
    }
}

/// Time client that fails a scripted number of rounds first
#[derive(Debug, Clone)]
pub struct ScriptedClock {
    epoch: u64,
    failures: Rc<RefCell<u32>>,
    attempts: Rc<RefCell<u32>>,
    last_server: Rc<RefCell<Option<String>>>,
}

impl ScriptedClock {
    pub fn new(epoch: u64, failures: u32) -> Self {
        Self {
            epoch,
            failures: Rc::new(RefCell::new(failures)),
            attempts: Rc::new(RefCell::new(0)),
            last_server: Rc::new(RefCell::new(None)),
        }
    }

    pub fn attempts(&self) -> u32 {
        *self.attempts.borrow()
    }

    /// Server named in the most recent round
    pub fn last_server(&self) -> Option<String> {
        self.last_server.borrow().clone()
    }
}

impl TimeSync for ScriptedClock {
    type Error = &'static str;

    fn update(&mut self, server: &str) -> Result<u64, Self::Error> {
        *self.attempts.borrow_mut() += 1;
        *self.last_server.borrow_mut() = Some(server.to_string());
        let mut failures = self.failures.borrow_mut();
        if *failures > 0 {
            *failures -= 1;
            return Err("NTP request timed out");
        }
        Ok(self.epoch)
    }
}

#[derive(Debug, Default)]
struct TransportInner {
    presented: Fingerprint,
    script: VecDeque<Result<PeerCertificate, &'static str>>,
    x509_time: Option<u64>,
    anchors: Option<&'static str>,
    self_signed: bool,
    buffers: Option<TlsBuffers>,
    open: bool,
    handshakes: u32,
    last_error: String,
}

/// TLS layer presenting a valid chain with a given leaf fingerprint unless
/// scripted otherwise
#[derive(Debug, Clone)]
pub struct SimTransport(Rc<RefCell<TransportInner>>);

impl SimTransport {
    pub fn new(presented: Fingerprint) -> Self {
        Self(Rc::new(RefCell::new(TransportInner {
            presented,
            ..TransportInner::default()
        })))
    }

    /// Queues the outcome of the next unscripted handshake
    pub fn push_handshake(&self, outcome: Result<PeerCertificate, &'static str>) {
        self.0.borrow_mut().script.push_back(outcome);
    }

    pub fn handshakes(&self) -> u32 {
        self.0.borrow().handshakes
    }

    pub fn is_open(&self) -> bool {
        self.0.borrow().open
    }

    pub fn x509_time(&self) -> Option<u64> {
        self.0.borrow().x509_time
    }

    pub fn anchors_installed(&self) -> bool {
        self.0.borrow().anchors.is_some()
    }

    pub fn self_signed_allowed(&self) -> bool {
        self.0.borrow().self_signed
    }

    pub fn buffers(&self) -> Option<TlsBuffers> {
        self.0.borrow().buffers
    }
}

impl TlsTransport for SimTransport {
    type Error = &'static str;

    fn set_x509_time(&mut self, epoch: u64) {
        self.0.borrow_mut().x509_time = Some(epoch);
    }

    fn set_trust_anchors(&mut self, pem: &'static str) -> Result<(), Self::Error> {
        if pem.is_empty() {
            return Err("No trust anchors");
        }
        self.0.borrow_mut().anchors = Some(pem);
        Ok(())
    }

    fn allow_self_signed(&mut self) {
        self.0.borrow_mut().self_signed = true;
    }

    fn set_buffer_sizes(&mut self, buffers: TlsBuffers) {
        self.0.borrow_mut().buffers = Some(buffers);
    }

    fn connect(&mut self, _endpoint: &Endpoint) -> Result<PeerCertificate, Self::Error> {
        let mut inner = self.0.borrow_mut();
        inner.handshakes += 1;
        let presented = inner.presented;
        let outcome = inner.script.pop_front().unwrap_or(Ok(PeerCertificate {
            chain_valid: true,
            fingerprint: presented,
        }));
        match outcome {
            Ok(peer) => {
                inner.open = true;
                Ok(peer)
            }
            Err(e) => {
                inner.open = false;
                inner.last_error = e.to_string();
                Err(e)
            }
        }
    }

    fn close(&mut self) {
        self.0.borrow_mut().open = false;
    }

    fn last_error(&mut self) -> Diagnostic {
        let inner = self.0.borrow();
        let mut out = Diagnostic::new();
        for c in inner.last_error.chars() {
            if out.push(c).is_err() {
                break;
            }
        }
        out
    }
}

#[derive(Debug)]
struct BrokerInner {
    connected: bool,
    state: SessionState,
    connect_failures: VecDeque<SessionState>,
    subscribe_failures: u32,
    publish_failures: u32,
    connect_calls: u32,
    publish_calls: u32,
    subscriptions: Vec<String>,
    published: Vec<(String, String)>,
    inbox: VecDeque<(String, Vec<u8>)>,
}

impl BrokerInner {
    fn new() -> Self {
        Self {
            connected: false,
            state: SessionState::Disconnected,
            connect_failures: VecDeque::new(),
            subscribe_failures: 0,
            publish_failures: 0,
            connect_calls: 0,
            publish_calls: 0,
            subscriptions: Vec::new(),
            published: Vec::new(),
            inbox: VecDeque::new(),
        }
    }
}

/// MQTT client talking to an in-memory broker
#[derive(Debug, Clone)]
pub struct SimBroker {
    transport: SimTransport,
    inner: Rc<RefCell<BrokerInner>>,
}

impl SimBroker {
    pub fn new(transport: SimTransport) -> Self {
        Self {
            transport,
            inner: Rc::new(RefCell::new(BrokerInner::new())),
        }
    }

    /// A client whose session is already up, as if connected elsewhere
    pub fn online(transport: SimTransport) -> Self {
        transport.0.borrow_mut().open = true;
        let broker = Self::new(transport);
        {
            let mut inner = broker.inner.borrow_mut();
            inner.connected = true;
            inner.state = SessionState::Connected;
        }
        broker
    }

    pub fn transport(&self) -> &SimTransport {
        &self.transport
    }

    /// The next `count` CONNECTs are refused with `state`
    pub fn fail_connects(&self, count: u32, state: SessionState) {
        let mut inner = self.inner.borrow_mut();
        for _ in 0..count {
            inner.connect_failures.push_back(state);
        }
    }

    pub fn fail_subscribes(&self, count: u32) {
        self.inner.borrow_mut().subscribe_failures = count;
    }

    pub fn fail_publishes(&self, count: u32) {
        self.inner.borrow_mut().publish_failures = count;
    }

    /// Broker side drop: the session and its subscriptions are gone
    pub fn drop_connection(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.connected = false;
        inner.state = SessionState::ConnectionLost;
        inner.subscriptions.clear();
        self.transport.0.borrow_mut().open = false;
    }

    /// Queues a message from another broker client
    pub fn deliver(&self, topic: &str, payload: &[u8]) {
        self.inner
            .borrow_mut()
            .inbox
            .push_back((topic.to_string(), payload.to_vec()));
    }

    pub fn connect_calls(&self) -> u32 {
        self.inner.borrow().connect_calls
    }

    pub fn publish_calls(&self) -> u32 {
        self.inner.borrow().publish_calls
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.inner.borrow().subscriptions.clone()
    }

    /// Successfully published `(topic, payload)` pairs, oldest first
    pub fn published(&self) -> Vec<(String, String)> {
        self.inner.borrow().published.clone()
    }
}

impl MqttClient for SimBroker {
    type Transport = SimTransport;
    type Error = SessionState;

    fn transport_mut(&mut self) -> &mut Self::Transport {
        &mut self.transport
    }

    fn connect(&mut self, _identity: &DeviceIdentity) -> Result<(), Self::Error> {
        let mut inner = self.inner.borrow_mut();
        inner.connect_calls += 1;
        if !self.transport.is_open() {
            inner.state = SessionState::ConnectFailed;
            return Err(inner.state);
        }
        if let Some(state) = inner.connect_failures.pop_front() {
            inner.state = state;
            return Err(state);
        }
        inner.connected = true;
        inner.state = SessionState::Connected;
        Ok(())
    }

    fn connected(&mut self) -> bool {
        self.inner.borrow().connected
    }

    fn state(&mut self) -> SessionState {
        self.inner.borrow().state
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), Self::Error> {
        let mut inner = self.inner.borrow_mut();
        if !inner.connected {
            return Err(inner.state);
        }
        if inner.subscribe_failures > 0 {
            inner.subscribe_failures -= 1;
            return Err(SessionState::Unauthorized);
        }
        inner.subscriptions.push(topic.to_string());
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), Self::Error> {
        let mut inner = self.inner.borrow_mut();
        inner.publish_calls += 1;
        if !inner.connected {
            return Err(inner.state);
        }
        if inner.publish_failures > 0 {
            inner.publish_failures -= 1;
            return Err(SessionState::Unavailable);
        }
        let payload = String::from_utf8_lossy(payload).into_owned();
        inner.published.push((topic.to_string(), payload));
        Ok(())
    }

    fn poll(&mut self) -> Option<InboundCommand> {
        let mut inner = self.inner.borrow_mut();
        if !inner.connected {
            return None;
        }
        let (topic, payload) = inner.inbox.pop_front()?;
        if !inner.subscriptions.contains(&topic) {
            log::debug!("Broker dropped message on unsubscribed topic {topic}");
            return None;
        }
        let msg = InboundCommand::new(&topic, &payload);
        if msg.is_none() {
            log::warn!("Dropping {} byte message, exceeds client buffer", payload.len());
        }
        msg
    }
}
