//! Liveness probing.
//!
//! The outbound duty sends a Ping every probe interval; the inbound duty
//! holds a read deadline that only a Pong pushes forward. A peer that stops
//! answering probes hits the deadline within one liveness window.

use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Read deadline refreshed by liveness acknowledgments.
#[derive(Debug, Clone)]
pub struct Liveness {
    window: Duration,
    deadline: Instant,
    acks: u64,
}

impl Liveness {
    /// Start a window from now.
    pub fn start(window: Duration) -> Self {
        Self {
            window,
            deadline: Instant::now() + window,
            acks: 0,
        }
    }

    /// A Pong arrived: push the deadline one full window out.
    pub fn acknowledge(&mut self) {
        self.deadline = Instant::now() + self.window;
        self.acks += 1;
    }

    /// Instant by which the next acknowledgment must arrive.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Acknowledgments seen so far.
    pub fn acks(&self) -> u64 {
        self.acks
    }
}

/// Probe ticker. The first tick fires one `period` from now, not
/// immediately, and late ticks are not replayed in a burst.
pub fn probe_interval(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}
