// ! Heartbeat state machine
// !
// ! The initiator probes the peer `ack_timeout` before each interval ends and
// ! fails if no echo arrives in time; the responder echoes every probe and
// ! fails if probes stop arriving. The socket driver owns the timer and
// ! sleeps until [`HeartbeatTimer::deadline`].

use std::time::Duration;
use tokio::time::Instant;

/// Which side of the heartbeat cycle a socket plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatPolicy {
    Disabled,
    /// Sends probes and expects echoes (client side)
    Initiator {
        interval: Duration,
        ack_timeout: Duration,
    },
    /// Echoes probes and expects them at least once per interval (server side)
    Responder { interval: Duration },
}

impl HeartbeatPolicy {
    /// Initiator policy whose ack timeout fits inside the interval.
    ///
    /// An ack timeout at or above the interval is cut to half the interval.
    pub fn initiator(interval: Duration, ack_timeout: Duration) -> Self {
        let ack_timeout = if ack_timeout >= interval {
            interval / 2
        } else {
            ack_timeout
        };
        HeartbeatPolicy::Initiator {
            interval,
            ack_timeout,
        }
    }
}

/// What the driver must do after a heartbeat transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    None,
    /// Send a probe
    Send,
    /// Answer a probe
    Echo,
    /// The peer is gone; error then close
    Fail,
}

#[derive(Debug)]
pub struct HeartbeatTimer {
    policy: HeartbeatPolicy,
    deadline: Option<Instant>,
    awaiting_ack: bool,
}

impl HeartbeatTimer {
    pub fn start(policy: HeartbeatPolicy, now: Instant) -> Self {
        let mut timer = Self {
            policy,
            deadline: None,
            awaiting_ack: false,
        };
        timer.schedule(now);
        timer
    }

    pub fn policy(&self) -> HeartbeatPolicy {
        self.policy
    }

    /// Next instant the driver must call [`Self::on_deadline`], if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// A `heartbeat` event arrived from the peer
    pub fn on_heartbeat(&mut self, now: Instant) -> HeartbeatAction {
        match self.policy {
            HeartbeatPolicy::Disabled => HeartbeatAction::Echo,
            HeartbeatPolicy::Initiator { .. } => {
                self.schedule(now);
                HeartbeatAction::None
            }
            HeartbeatPolicy::Responder { .. } => {
                self.schedule(now);
                HeartbeatAction::Echo
            }
        }
    }

    /// The deadline elapsed
    pub fn on_deadline(&mut self, now: Instant) -> HeartbeatAction {
        match self.policy {
            HeartbeatPolicy::Disabled => HeartbeatAction::None,
            HeartbeatPolicy::Initiator { ack_timeout, .. } => {
                if self.awaiting_ack {
                    self.stop();
                    HeartbeatAction::Fail
                } else {
                    self.awaiting_ack = true;
                    self.deadline = Some(now + ack_timeout);
                    HeartbeatAction::Send
                }
            }
            HeartbeatPolicy::Responder { .. } => {
                self.stop();
                HeartbeatAction::Fail
            }
        }
    }

    /// Cancel the cycle
    pub fn stop(&mut self) {
        self.deadline = None;
        self.awaiting_ack = false;
    }

    fn schedule(&mut self, now: Instant) {
        self.awaiting_ack = false;
        self.deadline = match self.policy {
            HeartbeatPolicy::Disabled => None,
            HeartbeatPolicy::Initiator {
                interval,
                ack_timeout,
            } => Some(now + probe_delay(interval, ack_timeout)),
            HeartbeatPolicy::Responder { interval } => Some(now + interval),
        };
    }
}

/// Quiet time between an echo and the next probe; never zero for a non-zero interval
fn probe_delay(interval: Duration, ack_timeout: Duration) -> Duration {
    if ack_timeout >= interval {
        interval / 2
    } else {
        interval - ack_timeout
    }
}
