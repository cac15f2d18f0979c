//! Per-session read inactivity timer.
//!
//! The timer is a plain value owned by one session; it is never shared, so the
//! only ordering question is inside that session's `select!` loop. Once the
//! timer has fired, [`IdleTimer::touch`] no longer moves the deadline.

use std::time::Duration;

use tokio::time::{Instant, Sleep, sleep_until};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleState {
    /// Counting down to `deadline`.
    Armed,
    /// The deadline passed and the session has been told to close.
    Firing,
    /// No timeout applies.
    Disarmed,
}

#[derive(Debug)]
pub struct IdleTimer {
    timeout: Option<Duration>,
    deadline: Instant,
    state: IdleState,
}

impl IdleTimer {
    pub fn new(timeout: Option<Duration>) -> Self {
        let now = Instant::now();
        match timeout {
            Some(timeout) => Self {
                timeout: Some(timeout),
                deadline: now + timeout,
                state: IdleState::Armed,
            },
            None => Self {
                timeout: None,
                deadline: now,
                state: IdleState::Disarmed,
            },
        }
    }

    pub fn state(&self) -> IdleState {
        self.state
    }

    pub fn is_armed(&self) -> bool {
        self.state == IdleState::Armed
    }

    /// Records read activity, pushing the deadline back while armed.
    pub fn touch(&mut self) {
        if let (IdleState::Armed, Some(timeout)) = (self.state, self.timeout) {
            self.deadline = Instant::now() + timeout;
        }
    }

    /// Sleeps until the current deadline. Only meaningful while armed.
    pub fn expired(&self) -> Sleep {
        sleep_until(self.deadline)
    }

    /// Moves `Armed` to `Firing`. Returns `true` only for that one transition.
    pub fn fire(&mut self) -> bool {
        if self.state == IdleState::Armed {
            self.state = IdleState::Firing;
            true
        } else {
            false
        }
    }

    pub fn disarm(&mut self) {
        self.state = IdleState::Disarmed;
    }
}
