use core::convert::Infallible;

use embedded_hal::{delay::DelayNs, digital::OutputPin};

use crate::{
    Actuator, CommandRouter, DeviceConfig, IdentityClock, Indicator, LinkDriver, LinkPhase,
    LinkSupervisor, MqttClient, RelayError, RelayState, RouteOutcome, SecureSession,
    SessionPhase, SessionSupervisor, TimeSync, Topics,
};

/// What one pass of [`Device::cycle`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Link was down; the link supervisor ran one step
    LinkRecovery(LinkPhase),
    /// Link up, session down; the session supervisor ran one attempt
    SessionRecovery(SessionPhase),
    /// Both up; the client was serviced once
    Serviced(Option<RouteOutcome>),
}

/// The device context: every piece of controller state plus the
/// collaborators it drives, built once at startup and owned by the
/// top-level cycle.
pub struct Device<L, T, C, R, P, D>
where
    L: LinkDriver,
    T: TimeSync,
    C: MqttClient,
    R: OutputPin,
    P: OutputPin,
    D: DelayNs,
{
    topics: Topics,
    link: L,
    link_supervisor: LinkSupervisor,
    time: T,
    clock: IdentityClock,
    client: C,
    secure: SecureSession,
    session: SessionSupervisor,
    router: CommandRouter,
    actuator: Actuator<R>,
    indicator: Indicator<P, D>,
}

impl<L, T, C, R, P, D> Device<L, T, C, R, P, D>
where
    L: LinkDriver,
    T: TimeSync,
    C: MqttClient,
    R: OutputPin,
    P: OutputPin,
    D: DelayNs,
{
    /// Takes the relay line (driving it closed) and the indicator line
    pub fn new(
        config: &DeviceConfig,
        link: L,
        time: T,
        client: C,
        relay_pin: R,
        led_pin: P,
        delay: D,
    ) -> Result<Self, RelayError> {
        let topics = config.topics()?;
        log::info!(
            "Device {} on {}, command topic {}, status topic {}",
            config.identity.client_id,
            config.endpoint,
            topics.command(),
            topics.status()
        );

        Ok(Self {
            topics,
            link,
            link_supervisor: LinkSupervisor::new(config.link),
            time,
            clock: IdentityClock::new(config.ntp_server, config.utc_offset_secs),
            client,
            secure: SecureSession::new(config.endpoint, config.trust, config.tls_buffers),
            session: SessionSupervisor::new(config.identity),
            router: CommandRouter::new(),
            actuator: Actuator::new(relay_pin),
            indicator: Indicator::new(led_pin, delay),
        })
    }

    /// Startup ordering: link, then time, then trust installation, then
    /// the first session. Fails only if the transport rejects the
    /// provisioned trust anchors.
    pub fn boot(&mut self) -> Result<(), RelayError> {
        let attempts = self
            .link_supervisor
            .run_until_attached(&mut self.link, &mut self.indicator);
        log::info!("Link attached after {attempts} attempt(s)");

        log::info!("Setting up time.");
        let epoch = self.clock.current_time(&mut self.time);
        self.secure.install(self.client.transport_mut(), epoch)?;

        let failed = self.session.run_until_ready(
            &mut self.client,
            &mut self.secure,
            &self.topics,
            &mut self.indicator,
        );
        log::info!("Session ready after {failed} failed attempt(s)");
        Ok(())
    }

    /// One pass of the supervisory loop. The session supervisor is only
    /// entered once the link reports attached.
    pub fn cycle(&mut self) -> CycleOutcome {
        if self.link.status().is_attached() {
            self.link_supervisor.observe_attached(&mut self.link);
            self.indicator.idle();
        } else {
            return CycleOutcome::LinkRecovery(
                self.link_supervisor
                    .step(&mut self.link, &mut self.indicator),
            );
        }

        if !self.client.connected() {
            return CycleOutcome::SessionRecovery(self.session.step(
                &mut self.client,
                &mut self.secure,
                &self.topics,
                &mut self.indicator,
            ));
        }

        CycleOutcome::Serviced(self.client.poll().map(|msg| {
            self.router.dispatch(
                &msg,
                &mut self.actuator,
                &mut self.indicator,
                &mut self.client,
                &self.topics,
            )
        }))
    }

    /// Boots and then cycles forever
    pub fn run(mut self) -> Result<Infallible, RelayError> {
        self.boot()?;
        loop {
            self.cycle();
        }
    }

    pub fn relay_state(&self) -> RelayState {
        self.actuator.state()
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn link_phase(&self) -> LinkPhase {
        self.link_supervisor.phase()
    }

    pub fn session(&self) -> &SessionSupervisor {
        &self.session
    }

    pub fn router(&self) -> &CommandRouter {
        &self.router
    }

    pub fn clock(&self) -> &IdentityClock {
        &self.clock
    }
}
