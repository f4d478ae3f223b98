//! The relay itself. Wired normally-closed with an active-low coil: driving
//! the line low opens the contact, driving it high closes it.

use embedded_hal::digital::OutputPin;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Open,
    Closed,
}

/// Result of an [`Actuator`] operation. A [`Transition::NoOp`] means the
/// relay was already in the requested state and no hardware write happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Transitioned,
    NoOp,
}

pub struct Actuator<P: OutputPin> {
    pin: P,
    state: RelayState,
}

impl<P: OutputPin> Actuator<P> {
    /// Takes the relay line and drives it to the closed level, matching the
    /// fail-safe power-on state. Relay state is never restored from storage.
    pub fn new(mut pin: P) -> Self {
        if let Err(e) = pin.set_high() {
            log::error!("Unable to drive relay line to closed level {e:?}");
        }
        Self {
            pin,
            state: RelayState::Closed,
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    pub fn open(&mut self) -> Transition {
        if self.state == RelayState::Open {
            log::info!("Relay already open.");
            return Transition::NoOp;
        }

        // the write was still issued, keep tracking the requested state
        if let Err(e) = self.pin.set_low() {
            log::error!("Relay line write reported {e:?}");
        }
        self.state = RelayState::Open;
        log::info!("Opening relay.");
        Transition::Transitioned
    }

    pub fn close(&mut self) -> Transition {
        if self.state == RelayState::Closed {
            log::info!("Relay already closed.");
            return Transition::NoOp;
        }

        if let Err(e) = self.pin.set_high() {
            log::error!("Relay line write reported {e:?}");
        }
        self.state = RelayState::Closed;
        log::info!("Closing relay.");
        Transition::Transitioned
    }
}
