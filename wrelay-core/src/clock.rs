use core::fmt::{Debug, Write};

/// Network time client. `update` performs one synchronization round
/// against `server` and returns the current UTC epoch in seconds.
pub trait TimeSync {
    type Error: Debug;

    fn update(&mut self, server: &str) -> Result<u64, Self::Error>;
}

/// Trusted time for certificate validation. Synchronizes once and then
/// keeps serving that value; there is no periodic re-sync.
pub struct IdentityClock {
    server: &'static str,
    utc_offset_secs: i32,
    synced: Option<u64>,
}

impl IdentityClock {
    pub fn new(server: &'static str, utc_offset_secs: i32) -> Self {
        Self {
            server,
            utc_offset_secs,
            synced: None,
        }
    }

    pub fn is_synced(&self) -> bool {
        self.synced.is_some()
    }

    /// Blocks until the first successful synchronization. Retries are
    /// unbounded and paced only by the time client itself: nothing
    /// downstream can proceed without a trusted clock.
    pub fn current_time<T: TimeSync>(&mut self, source: &mut T) -> u64 {
        if let Some(epoch) = self.synced {
            return epoch;
        }

        let mut attempts: u32 = 0;
        let epoch = loop {
            attempts = attempts.saturating_add(1);
            match source.update(self.server) {
                Ok(epoch) => break epoch,
                Err(e) => log::warn!(
                    "Time sync with {} attempt {attempts} failed {e:?}",
                    self.server
                ),
            }
        };

        log::info!(
            "Time set: {} from {} after {attempts} attempt(s)",
            formatted_time(epoch, self.utc_offset_secs),
            self.server
        );
        self.synced = Some(epoch);
        epoch
    }
}

/// Local wall-clock `HH:MM:SS` for an epoch and UTC offset
pub fn formatted_time(epoch: u64, utc_offset_secs: i32) -> heapless::String<8> {
    let local = (epoch as i64 + i64::from(utc_offset_secs)).rem_euclid(86_400);
    let mut out = heapless::String::new();
    // 8 bytes always fits HH:MM:SS
    write!(
        out,
        "{:02}:{:02}:{:02}",
        local / 3600,
        (local % 3600) / 60,
        local % 60
    )
    .ok();
    out
}
