use std::time::Duration;

/// Match-start countdown state.
///
/// Every peer derives this independently from the same inputs; it is never
/// written to the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CountdownState {
    /// Waiting for the session to fill or for everyone to ready up
    #[default]
    Idle,
    /// Session is full, counting down
    CountingDown { remaining: Duration },
    /// Start condition met, waiting for activation
    Starting,
    /// Activation observed (terminal)
    Started,
}

/// Countdown FSM converting "full" or "all ready" into a one-shot start
#[derive(Debug, Clone)]
pub struct MatchStartTimer {
    state: CountdownState,
    duration: Duration,
}

impl MatchStartTimer {
    pub fn new(duration: Duration) -> Self {
        Self {
            state: CountdownState::Idle,
            duration,
        }
    }

    pub fn state(&self) -> CountdownState {
        self.state
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn is_idle(&self) -> bool {
        self.state == CountdownState::Idle
    }

    pub fn is_counting_down(&self) -> bool {
        matches!(self.state, CountdownState::CountingDown { .. })
    }

    pub fn is_starting(&self) -> bool {
        self.state == CountdownState::Starting
    }

    pub fn is_started(&self) -> bool {
        self.state == CountdownState::Started
    }

    /// Time left on the countdown, if one is running
    pub fn remaining(&self) -> Option<Duration> {
        match self.state {
            CountdownState::CountingDown { remaining } => Some(remaining),
            _ => None,
        }
    }

    /// Idle -> CountingDown(D). Returns true if the countdown began.
    pub fn start(&mut self) -> bool {
        if self.state != CountdownState::Idle {
            return false;
        }
        self.state = CountdownState::CountingDown {
            remaining: self.duration,
        };
        true
    }

    /// CountingDown -> Idle. Starting and Started are irreversible.
    pub fn stop(&mut self) -> bool {
        if !self.is_counting_down() {
            return false;
        }
        self.state = CountdownState::Idle;
        true
    }

    /// Advance the countdown. Returns true on the tick it expires.
    pub fn tick(&mut self, dt: Duration) -> bool {
        let CountdownState::CountingDown { remaining } = self.state else {
            return false;
        };

        let remaining = remaining.saturating_sub(dt);
        if remaining.is_zero() {
            self.state = CountdownState::Starting;
            true
        } else {
            self.state = CountdownState::CountingDown { remaining };
            false
        }
    }

    /// Idle | CountingDown -> Starting, skipping whatever wait is left
    pub fn all_ready(&mut self) -> bool {
        match self.state {
            CountdownState::Idle | CountdownState::CountingDown { .. } => {
                self.state = CountdownState::Starting;
                true
            }
            CountdownState::Starting | CountdownState::Started => false,
        }
    }

    /// Enter the terminal state. Returns true only the first time.
    pub fn mark_started(&mut self) -> bool {
        if self.state == CountdownState::Started {
            return false;
        }
        self.state = CountdownState::Started;
        true
    }
}
