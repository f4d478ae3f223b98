//! Status LED. Retry states are told apart by blink rate: the link
//! supervisor blinks at 5 Hz, the session supervisor toggles every 100 ms
//! for ~5 s between attempts. Steady idle level means operational, a single
//! step to the active level marks a received command.

use embedded_hal::{delay::DelayNs, digital::OutputPin};

const BLINK_STEP_MS: u32 = 100;
// 10 x (100 ms low + 100 ms high) = 1 s of 5 Hz blinking per link check
const LINK_BLINK_CYCLES: u32 = 10;
// one toggle per step, 51 steps ~= 5 s between session attempts
const SESSION_BLINK_STEPS: u32 = 51;

/// Owns the indicator line and the delay source; every wait in the
/// controller happens in one of the heartbeats.
pub struct Indicator<P: OutputPin, D: DelayNs> {
    pin: P,
    delay: D,
}

impl<P: OutputPin, D: DelayNs> Indicator<P, D> {
    pub fn new(pin: P, delay: D) -> Self {
        Self { pin, delay }
    }

    pub fn idle(&mut self) {
        self.pin.set_low().ok();
    }

    pub fn active(&mut self) {
        self.pin.set_high().ok();
    }

    /// One second of 5 Hz blinking while a link attach is pending
    pub fn link_heartbeat(&mut self) {
        for _ in 0..LINK_BLINK_CYCLES {
            log::trace!("*");
            self.pin.set_low().ok();
            self.delay.delay_ms(BLINK_STEP_MS);
            self.pin.set_high().ok();
            self.delay.delay_ms(BLINK_STEP_MS);
        }
    }

    /// The fixed wait between session attempts, toggling each step
    pub fn session_heartbeat(&mut self) {
        let mut on = true;
        for _ in 0..SESSION_BLINK_STEPS {
            if on {
                self.pin.set_high().ok();
            } else {
                self.pin.set_low().ok();
            }
            on = !on;
            self.delay.delay_ms(BLINK_STEP_MS);
        }
    }

    /// Milliseconds spent in [`Indicator::session_heartbeat`]
    pub const fn session_retry_ms() -> u32 {
        SESSION_BLINK_STEPS * BLINK_STEP_MS
    }

    /// Milliseconds spent in [`Indicator::link_heartbeat`]
    pub const fn link_retry_ms() -> u32 {
        LINK_BLINK_CYCLES * 2 * BLINK_STEP_MS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimDelay, SimPin};

    #[test]
    fn link_heartbeat_blinks_at_five_hz() {
        let pin = SimPin::new();
        let delay = SimDelay::new();
        let mut led = Indicator::new(pin.clone(), delay.clone());

        led.link_heartbeat();

        assert_eq!(delay.elapsed_ms(), 1000);
        assert_eq!(
            delay.elapsed_ms(),
            u64::from(Indicator::<SimPin, SimDelay>::link_retry_ms())
        );
        assert_eq!(pin.writes(), 20);
        assert_eq!(pin.history()[..4], [false, true, false, true]);
    }

    #[test]
    fn session_heartbeat_is_slower_and_longer() {
        let pin = SimPin::new();
        let delay = SimDelay::new();
        let mut led = Indicator::new(pin.clone(), delay.clone());

        led.session_heartbeat();

        assert_eq!(delay.elapsed_ms(), 5100);
        assert_eq!(
            delay.elapsed_ms(),
            u64::from(Indicator::<SimPin, SimDelay>::session_retry_ms())
        );
        assert_eq!(pin.writes(), 51);
        assert_eq!(pin.history()[..3], [true, false, true]);
    }

    #[test]
    fn idle_and_active_levels() {
        let pin = SimPin::new();
        let mut led = Indicator::new(pin.clone(), SimDelay::new());
        led.active();
        assert_eq!(pin.level(), Some(true));
        led.idle();
        assert_eq!(pin.level(), Some(false));
    }
}
