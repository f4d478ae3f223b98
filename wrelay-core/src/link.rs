//! Wi-Fi attachment. The [`LinkSupervisor`] issues attach attempts and
//! blinks the 5 Hz heartbeat while the driver reports anything other than
//! [`LinkStatus::Connected`]. There is no attempt limit: an unreachable
//! access point is expected to come back.

use core::{fmt, net::Ipv4Addr};
use embedded_hal::{delay::DelayNs, digital::OutputPin};

use crate::Indicator;

// heartbeat windows an attempt may stay in Connecting before it is reissued
const MAX_PENDING_WINDOWS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Connecting,
    Unreachable,
    Connected,
    AuthFailed,
    Disconnected,
    Unknown,
}

impl LinkStatus {
    /// Maps station status codes as reported by the radio driver
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => LinkStatus::Connecting,
            1 => LinkStatus::Unreachable,
            3 => LinkStatus::Connected,
            4 => LinkStatus::AuthFailed,
            6 => LinkStatus::Disconnected,
            _ => LinkStatus::Unknown,
        }
    }

    pub fn is_attached(self) -> bool {
        self == LinkStatus::Connected
    }

    /// The pending attempt has concluded without attaching. `Unknown`
    /// covers lost-connection and idle codes, neither of which will attach
    /// without a new attempt.
    fn attempt_failed(self) -> bool {
        !matches!(self, LinkStatus::Connected | LinkStatus::Connecting)
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            LinkStatus::Connecting => "In process of changing between statuses.",
            LinkStatus::Unreachable => "Configured SSID cannot be reached.",
            LinkStatus::Connected => "Successful connection established.",
            LinkStatus::AuthFailed => "Incorrect network password.",
            LinkStatus::Disconnected => "Disconnected.",
            LinkStatus::Unknown => "Failed to retrieve WIFI status.",
        };
        f.write_str(msg)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LinkCredentials {
    pub ssid: &'static str,
    pub password: &'static str,
}

/// Radio driver boundary. `begin` only starts an attempt; the outcome is
/// observed through later `status` calls.
pub trait LinkDriver {
    type Error: fmt::Debug;

    fn status(&mut self) -> LinkStatus;
    fn set_station_mode(&mut self) -> Result<(), Self::Error>;
    fn begin(&mut self, credentials: &LinkCredentials) -> Result<(), Self::Error>;
    fn local_ip(&mut self) -> Option<Ipv4Addr>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPhase {
    Disconnected,
    Attaching,
    Attached,
}

pub struct LinkSupervisor {
    credentials: LinkCredentials,
    phase: LinkPhase,
    attempts: u32,
    last_attach_attempts: u32,
    pending_windows: u32,
}

impl LinkSupervisor {
    pub fn new(credentials: LinkCredentials) -> Self {
        Self {
            credentials,
            phase: LinkPhase::Disconnected,
            attempts: 0,
            last_attach_attempts: 0,
            pending_windows: 0,
        }
    }

    pub fn phase(&self) -> LinkPhase {
        self.phase
    }

    /// Attach attempts issued since the link was last attached
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// One supervision step: issue an attempt if none is pending, blink one
    /// heartbeat window, then re-read the driver status.
    pub fn step<L, P, D>(&mut self, link: &mut L, indicator: &mut Indicator<P, D>) -> LinkPhase
    where
        L: LinkDriver,
        P: OutputPin,
        D: DelayNs,
    {
        let status = link.status();
        if status.is_attached() {
            self.on_attached(link);
            return self.phase;
        }

        if self.phase == LinkPhase::Attached {
            log::warn!("Link lost, WIFI Status: {status}");
            self.phase = LinkPhase::Disconnected;
        }

        if self.phase == LinkPhase::Disconnected {
            if status == LinkStatus::Disconnected {
                match link.set_station_mode() {
                    Ok(()) => log::debug!("Setting Wifi mode to station: SUCCESS"),
                    Err(e) => log::warn!("Setting Wifi mode to station: FAILURE {e:?}"),
                }
            }

            self.attempts = self.attempts.saturating_add(1);
            log::info!(
                "Connecting to Wifi network {}, attempt {}",
                self.credentials.ssid,
                self.attempts
            );
            self.pending_windows = 0;
            match link.begin(&self.credentials) {
                Ok(()) => self.phase = LinkPhase::Attaching,
                Err(e) => log::error!("Unable to start Wifi attach {e:?}"),
            }
        }

        indicator.link_heartbeat();

        let status = link.status();
        log::info!("WIFI Status: {status}");
        if status.is_attached() {
            self.on_attached(link);
        } else if status.attempt_failed() {
            self.phase = LinkPhase::Disconnected;
        } else if self.phase == LinkPhase::Attaching {
            self.pending_windows = self.pending_windows.saturating_add(1);
            if self.pending_windows >= MAX_PENDING_WINDOWS {
                log::warn!(
                    "Wifi attach still pending after {} windows, reissuing",
                    self.pending_windows
                );
                self.phase = LinkPhase::Disconnected;
            }
        }
        self.phase
    }

    /// Steps until the link is attached; returns the attempts it took
    pub fn run_until_attached<L, P, D>(
        &mut self,
        link: &mut L,
        indicator: &mut Indicator<P, D>,
    ) -> u32
    where
        L: LinkDriver,
        P: OutputPin,
        D: DelayNs,
    {
        while self.step(link, indicator) != LinkPhase::Attached {}
        self.last_attach_attempts
    }

    /// Records an attachment observed outside [`LinkSupervisor::step`]
    pub fn observe_attached<L: LinkDriver>(&mut self, link: &mut L) {
        self.on_attached(link);
    }

    fn on_attached<L: LinkDriver>(&mut self, link: &mut L) {
        if self.phase != LinkPhase::Attached {
            match link.local_ip() {
                Some(ip) => log::info!("Wifi connected, local address {ip}"),
                None => log::info!("Wifi connected, no address assigned yet"),
            }
            self.last_attach_attempts = self.attempts;
        }
        self.phase = LinkPhase::Attached;
        self.attempts = 0;
        self.pending_windows = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{ScriptedLink, SimDelay, SimPin};

    fn creds() -> LinkCredentials {
        LinkCredentials {
            ssid: "YourWifiNetwork",
            password: "YourWifiNetworkPassword",
        }
    }

    #[test]
    fn status_codes_map_to_variants() {
        assert_eq!(LinkStatus::from_code(0), LinkStatus::Connecting);
        assert_eq!(LinkStatus::from_code(1), LinkStatus::Unreachable);
        assert_eq!(LinkStatus::from_code(3), LinkStatus::Connected);
        assert_eq!(LinkStatus::from_code(4), LinkStatus::AuthFailed);
        assert_eq!(LinkStatus::from_code(6), LinkStatus::Disconnected);
        assert_eq!(LinkStatus::from_code(2), LinkStatus::Unknown);
        assert_eq!(LinkStatus::from_code(255), LinkStatus::Unknown);
    }

    #[test]
    fn already_attached_needs_no_attempt() {
        let mut link = ScriptedLink::attached();
        let delay = SimDelay::new();
        let mut led = Indicator::new(SimPin::new(), delay.clone());
        let mut sup = LinkSupervisor::new(creds());

        assert_eq!(sup.step(&mut link, &mut led), LinkPhase::Attached);
        assert_eq!(link.begin_calls(), 0);
        assert_eq!(delay.elapsed_ms(), 0);
    }

    #[test]
    fn attaches_on_first_attempt() {
        let mut link = ScriptedLink::attach_after(1);
        let mut led = Indicator::new(SimPin::new(), SimDelay::new());
        let mut sup = LinkSupervisor::new(creds());

        assert_eq!(sup.run_until_attached(&mut link, &mut led), 1);
        assert_eq!(link.begin_calls(), 1);
        assert_eq!(link.station_mode_calls(), 1);
        assert_eq!(sup.phase(), LinkPhase::Attached);
    }

    #[test]
    fn retries_with_heartbeat_until_attached() {
        let mut link = ScriptedLink::attach_after(4);
        let delay = SimDelay::new();
        let mut led = Indicator::new(SimPin::new(), delay.clone());
        let mut sup = LinkSupervisor::new(creds());

        assert_eq!(sup.step(&mut link, &mut led), LinkPhase::Disconnected);
        assert_eq!(sup.attempts(), 1);

        assert_eq!(sup.run_until_attached(&mut link, &mut led), 4);
        assert_eq!(link.begin_calls(), 4);
        // one heartbeat second per attempt
        assert_eq!(delay.elapsed_ms(), 4000);
        assert_eq!(sup.attempts(), 0);
    }

    #[test]
    fn pending_attempt_is_not_reissued() {
        let mut link = ScriptedLink::attach_after(1);
        link.hold_connecting(3);
        let mut led = Indicator::new(SimPin::new(), SimDelay::new());
        let mut sup = LinkSupervisor::new(creds());

        assert_eq!(sup.step(&mut link, &mut led), LinkPhase::Attaching);
        assert_eq!(sup.step(&mut link, &mut led), LinkPhase::Attaching);
        assert_eq!(sup.step(&mut link, &mut led), LinkPhase::Attached);
        assert_eq!(link.begin_calls(), 1);
    }

    struct StuckLink {
        after_begin: LinkStatus,
        status: LinkStatus,
        begins: u32,
    }

    impl StuckLink {
        fn new(after_begin: LinkStatus) -> Self {
            Self {
                after_begin,
                status: LinkStatus::Disconnected,
                begins: 0,
            }
        }
    }

    impl LinkDriver for StuckLink {
        type Error = core::convert::Infallible;

        fn status(&mut self) -> LinkStatus {
            self.status
        }

        fn set_station_mode(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }

        fn begin(&mut self, _credentials: &LinkCredentials) -> Result<(), Self::Error> {
            self.begins += 1;
            self.status = self.after_begin;
            Ok(())
        }

        fn local_ip(&mut self) -> Option<Ipv4Addr> {
            None
        }
    }

    #[test]
    fn unknown_outcome_reissues_every_window() {
        let mut link = StuckLink::new(LinkStatus::Unknown);
        let delay = SimDelay::new();
        let mut led = Indicator::new(SimPin::new(), delay.clone());
        let mut sup = LinkSupervisor::new(creds());

        for _ in 0..10 {
            assert_eq!(sup.step(&mut link, &mut led), LinkPhase::Disconnected);
        }
        assert_eq!(link.begins, 10);
        assert_eq!(delay.elapsed_ms(), 10_000);
    }

    #[test]
    fn endless_connecting_is_reissued() {
        let mut link = StuckLink::new(LinkStatus::Connecting);
        let mut led = Indicator::new(SimPin::new(), SimDelay::new());
        let mut sup = LinkSupervisor::new(creds());

        for _ in 0..(MAX_PENDING_WINDOWS * 4) {
            sup.step(&mut link, &mut led);
        }
        assert_eq!(link.begins, 4);

        link.after_begin = LinkStatus::Connected;
        assert_eq!(sup.run_until_attached(&mut link, &mut led), 5);
    }

    #[test]
    fn observed_attachment_resyncs_phase() {
        let mut link = StuckLink::new(LinkStatus::Connecting);
        let mut led = Indicator::new(SimPin::new(), SimDelay::new());
        let mut sup = LinkSupervisor::new(creds());
        assert_eq!(sup.step(&mut link, &mut led), LinkPhase::Attaching);

        // link comes up on its own, then drops with a lost-connection code
        link.status = LinkStatus::Connected;
        sup.observe_attached(&mut link);
        assert_eq!(sup.phase(), LinkPhase::Attached);
        link.status = LinkStatus::Unknown;
        link.after_begin = LinkStatus::Unknown;

        assert_eq!(sup.step(&mut link, &mut led), LinkPhase::Disconnected);
        assert_eq!(link.begins, 2);
    }

    #[test]
    fn reattaches_after_drop() {
        let mut link = ScriptedLink::attached();
        let mut led = Indicator::new(SimPin::new(), SimDelay::new());
        let mut sup = LinkSupervisor::new(creds());
        sup.step(&mut link, &mut led);

        link.drop_link(2);
        assert_eq!(sup.step(&mut link, &mut led), LinkPhase::Disconnected);
        assert_eq!(sup.step(&mut link, &mut led), LinkPhase::Attached);
        assert_eq!(link.begin_calls(), 2);
    }
}
