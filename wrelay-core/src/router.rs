//! Inbound command handling. Payloads are matched exactly, bounded by the
//! length the client reported; anything other than the two command
//! literals is dropped without a reply.

use embedded_hal::{delay::DelayNs, digital::OutputPin};

use crate::{
    Actuator, Indicator, MqttClient, Topics, Transition, CLOSE_COMMAND, MAX_PAYLOAD_LEN,
    MAX_TOPIC_LEN, OPEN_COMMAND,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Open,
    Close,
}

impl Command {
    /// Case-sensitive, whole-payload match
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload == OPEN_COMMAND.as_bytes() {
            Some(Command::Open)
        } else if payload == CLOSE_COMMAND.as_bytes() {
            Some(Command::Close)
        } else {
            None
        }
    }

    /// Human readable status published after the command ran
    pub fn status(self, transition: Transition) -> &'static str {
        match (self, transition) {
            (Command::Open, Transition::Transitioned) => "Opening relay.",
            (Command::Open, Transition::NoOp) => "Relay already open.",
            (Command::Close, Transition::Transitioned) => "Closing relay.",
            (Command::Close, Transition::NoOp) => "Relay already closed.",
        }
    }
}

/// A message as handed over by the client. Only valid for the dispatch
/// that receives it. `len` is the length the client reported, which may
/// disagree with the bytes actually buffered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundCommand {
    pub topic: heapless::String<MAX_TOPIC_LEN>,
    pub payload: heapless::Vec<u8, MAX_PAYLOAD_LEN>,
    pub len: usize,
}

impl InboundCommand {
    /// None when the topic or payload do not fit; such a message can never
    /// be a command
    pub fn new(topic: &str, payload: &[u8]) -> Option<Self> {
        Some(Self {
            topic: heapless::String::try_from(topic).ok()?,
            payload: heapless::Vec::from_slice(payload).ok()?,
            len: payload.len(),
        })
    }

    fn body(&self) -> Option<&[u8]> {
        self.payload.get(..self.len)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Ignored,
    Handled {
        command: Command,
        transition: Transition,
        published: bool,
    },
}

#[derive(Debug, Default)]
pub struct CommandRouter {
    handled: u32,
    ignored: u32,
}

impl CommandRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handled(&self) -> u32 {
        self.handled
    }

    pub fn ignored(&self) -> u32 {
        self.ignored
    }

    /// Runs one inbound message to completion: relay transition, status
    /// publication, indicator pulse. Publication failures are logged only.
    pub fn dispatch<R, C, P, D>(
        &mut self,
        msg: &InboundCommand,
        actuator: &mut Actuator<R>,
        indicator: &mut Indicator<P, D>,
        client: &mut C,
        topics: &Topics,
    ) -> RouteOutcome
    where
        R: OutputPin,
        C: MqttClient,
        P: OutputPin,
        D: DelayNs,
    {
        if msg.topic.as_str() != topics.command() {
            log::debug!("Ignoring message on foreign topic {}", msg.topic);
            self.ignored = self.ignored.saturating_add(1);
            return RouteOutcome::Ignored;
        }

        let Some(command) = msg.body().and_then(Command::parse) else {
            log::debug!("Ignoring unrecognized payload ({} bytes)", msg.len);
            self.ignored = self.ignored.saturating_add(1);
            return RouteOutcome::Ignored;
        };

        let transition = match command {
            Command::Open => actuator.open(),
            Command::Close => actuator.close(),
        };

        let status = command.status(transition);
        let published = client
            .publish(topics.status(), status.as_bytes())
            .map_err(|e| {
                log::error!("Unable to publish status \"{status}\" {e:?}");
            })
            .is_ok();

        indicator.active();
        self.handled = self.handled.saturating_add(1);

        RouteOutcome::Handled {
            command,
            transition,
            published,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        sim::{SimBroker, SimDelay, SimPin, SimTransport},
        RelayState,
    };

    struct Rig {
        router: CommandRouter,
        relay_pin: SimPin,
        led_pin: SimPin,
        actuator: Actuator<SimPin>,
        indicator: Indicator<SimPin, SimDelay>,
        client: SimBroker,
        topics: Topics,
    }

    impl Rig {
        fn new() -> Self {
            let relay_pin = SimPin::new();
            let led_pin = SimPin::new();
            Self {
                router: CommandRouter::new(),
                actuator: Actuator::new(relay_pin.clone()),
                indicator: Indicator::new(led_pin.clone(), SimDelay::new()),
                relay_pin,
                led_pin,
                client: SimBroker::online(SimTransport::new([0; 20])),
                topics: Topics::new("wifi-relay", "0").unwrap(),
            }
        }

        fn send(&mut self, payload: &[u8]) -> RouteOutcome {
            let msg = InboundCommand::new("wifi-relay/0/r", payload).unwrap();
            self.send_msg(&msg)
        }

        fn send_msg(&mut self, msg: &InboundCommand) -> RouteOutcome {
            self.router.dispatch(
                msg,
                &mut self.actuator,
                &mut self.indicator,
                &mut self.client,
                &self.topics,
            )
        }
    }

    #[test]
    fn parse_is_exact() {
        assert_eq!(Command::parse(b"OPEN"), Some(Command::Open));
        assert_eq!(Command::parse(b"CLOSE"), Some(Command::Close));
        assert_eq!(Command::parse(b""), None);
        assert_eq!(Command::parse(b"OP"), None);
        assert_eq!(Command::parse(b"open"), None);
        assert_eq!(Command::parse(b"OPEN\0"), None);
        assert_eq!(Command::parse(b"CLOSED"), None);
    }

    #[test]
    fn open_literal_opens_once_and_publishes_once() {
        let mut rig = Rig::new();
        let writes = rig.relay_pin.writes();

        assert_eq!(
            rig.send(b"OPEN"),
            RouteOutcome::Handled {
                command: Command::Open,
                transition: Transition::Transitioned,
                published: true,
            }
        );
        assert_eq!(rig.actuator.state(), RelayState::Open);
        assert_eq!(rig.relay_pin.writes(), writes + 1);
        assert_eq!(
            rig.client.published(),
            vec![("wifi-relay/0/w".to_string(), "Opening relay.".to_string())]
        );
        assert_eq!(rig.led_pin.level(), Some(true));
    }

    #[test]
    fn unrecognized_payloads_do_nothing() {
        let mut rig = Rig::new();
        let writes = rig.relay_pin.writes();

        for payload in [&b""[..], b"OP", b"OPE", b"CLOS", b"open", b"garbage", b"OPEN "] {
            assert_eq!(rig.send(payload), RouteOutcome::Ignored);
        }
        assert_eq!(rig.relay_pin.writes(), writes);
        assert!(rig.client.published().is_empty());
        assert_eq!(rig.led_pin.writes(), 0);
        assert_eq!(rig.router.ignored(), 7);
    }

    #[test]
    fn reported_length_bounds_the_match() {
        let mut rig = Rig::new();

        // buffer holds more than the reported length
        let mut msg = InboundCommand::new("wifi-relay/0/r", b"OPENXYZ").unwrap();
        msg.len = 4;
        assert!(matches!(rig.send_msg(&msg), RouteOutcome::Handled { .. }));

        // reported length cuts the literal short
        let mut msg = InboundCommand::new("wifi-relay/0/r", b"CLOSE").unwrap();
        msg.len = 3;
        assert_eq!(rig.send_msg(&msg), RouteOutcome::Ignored);

        // reported length beyond the buffer
        let mut msg = InboundCommand::new("wifi-relay/0/r", b"CLOSE").unwrap();
        msg.len = 9;
        assert_eq!(rig.send_msg(&msg), RouteOutcome::Ignored);
        assert_eq!(rig.actuator.state(), RelayState::Open);
    }

    #[test]
    fn foreign_topic_is_ignored() {
        let mut rig = Rig::new();
        let msg = InboundCommand::new("wifi-relay/1/r", b"OPEN").unwrap();
        assert_eq!(rig.send_msg(&msg), RouteOutcome::Ignored);
        assert_eq!(rig.actuator.state(), RelayState::Closed);
    }

    #[test]
    fn repeated_commands_report_noop() {
        let mut rig = Rig::new();
        let transitions: Vec<Transition> = [&b"OPEN"[..], b"OPEN", b"CLOSE", b"CLOSE"]
            .into_iter()
            .map(|p| match rig.send(p) {
                RouteOutcome::Handled { transition, .. } => transition,
                RouteOutcome::Ignored => panic!("command ignored"),
            })
            .collect();

        assert_eq!(
            transitions,
            vec![
                Transition::Transitioned,
                Transition::NoOp,
                Transition::Transitioned,
                Transition::NoOp
            ]
        );
        assert_eq!(rig.actuator.state(), RelayState::Closed);
        let statuses: Vec<String> = rig.client.published().into_iter().map(|(_, s)| s).collect();
        assert_eq!(
            statuses,
            vec![
                "Opening relay.",
                "Relay already open.",
                "Closing relay.",
                "Relay already closed."
            ]
        );
    }

    #[test]
    fn publish_failure_is_not_retried() {
        let mut rig = Rig::new();
        rig.client.fail_publishes(1);

        assert_eq!(
            rig.send(b"OPEN"),
            RouteOutcome::Handled {
                command: Command::Open,
                transition: Transition::Transitioned,
                published: false,
            }
        );
        assert_eq!(rig.client.publish_calls(), 1);
        assert_eq!(rig.actuator.state(), RelayState::Open);
    }

    #[test]
    fn oversized_message_cannot_be_built() {
        assert!(InboundCommand::new("wifi-relay/0/r", &[b'A'; MAX_PAYLOAD_LEN + 1]).is_none());
    }
}
