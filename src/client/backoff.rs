use std::time::Duration;

/// Reconnect delay of one watch stream: every attempt grows the previous
/// delay by a quarter, up to `max`.
#[derive(Debug, Clone)]
pub(crate) struct WatchBackoff {
    current: Duration,
    max: Duration,
    attempts: u32,
}

impl WatchBackoff {
    pub(crate) fn new(
        base: Duration,
        max: Duration,
    ) -> Self {
        Self {
            current: base.min(max),
            max,
            attempts: 0,
        }
    }

    pub(crate) fn next_delay(&mut self) -> Duration {
        self.attempts += 1;
        if self.current < self.max {
            self.current = (self.current + self.current / 4).min(self.max);
        }
        self.current
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempts
    }
}
