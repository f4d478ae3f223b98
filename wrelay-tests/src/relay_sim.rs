use wrelay_core::{
    sim::{self, ScriptedClock, ScriptedLink, SimBroker, SimDelay, SimPin, SimTransport},
    CycleOutcome, Device, MqttClient, SecureSession, SessionState, RELAY_PIN,
};

const EPOCH: u64 = 1_700_000_000;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::args().any(|a| a == "--probe") {
        return probe();
    }

    let config = sim::device_config();
    log::info!(
        "Initializing simulated relay on board {:?}, relay GPIO {RELAY_PIN}, LED GPIO {}",
        config.board,
        config.board.led_pin()
    );

    let link = ScriptedLink::attach_after(2);
    let client = SimBroker::new(SimTransport::new(sim::FINGERPRINT));
    client.fail_connects(1, SessionState::Unavailable);
    let relay = SimPin::new();
    let delay = SimDelay::new();

    let mut device = Device::new(
        &config,
        link.clone(),
        ScriptedClock::new(EPOCH, 1),
        client.clone(),
        relay.clone(),
        SimPin::new(),
        delay.clone(),
    )?;
    device.boot()?;

    let command = device.topics().command().to_owned();
    for payload in [&b"OPEN"[..], b"OPEN", b"noise", b"CLOSE"] {
        client.deliver(&command, payload);
    }
    drain(&mut device);

    log::info!("Dropping link and broker session");
    link.drop_link(2);
    client.drop_connection();
    client.deliver(&command, b"OPEN");
    for _ in 0..4 {
        log::info!("Cycle: {:?}", device.cycle());
    }
    drain(&mut device);

    log::info!(
        "Relay {:?}, {} handled / {} ignored, {} announcement(s), simulated {} ms",
        device.relay_state(),
        device.router().handled(),
        device.router().ignored(),
        device.session().announcements(),
        delay.elapsed_ms()
    );
    for (topic, payload) in client.published() {
        log::info!("Published {topic}: {payload}");
    }
    log::debug!("Relay line history {:?}", relay.history());

    Ok(())
}

type SimDevice = Device<ScriptedLink, ScriptedClock, SimBroker, SimPin, SimPin, SimDelay>;

fn drain(device: &mut SimDevice) {
    loop {
        match device.cycle() {
            CycleOutcome::Serviced(None) => break,
            outcome => log::info!("Cycle: {outcome:?}"),
        }
    }
}

/// Handshakes against a pinned and a wrong fingerprint without opening a
/// broker session
fn probe() -> Result<(), Box<dyn std::error::Error>> {
    let config = sim::device_config();

    for presented in [sim::FINGERPRINT, [0u8; 20]] {
        let mut client = SimBroker::new(SimTransport::new(presented));
        let mut secure = SecureSession::new(config.endpoint, config.trust, config.tls_buffers);
        secure.install(client.transport_mut(), EPOCH)?;

        let verified = secure.verify(client.transport_mut());
        log::info!("Probe of {} verified: {verified}", secure.endpoint());
        if let Some(e) = secure.last_error() {
            log::info!("Last handshake error: {e}");
        }
    }
    Ok(())
}
