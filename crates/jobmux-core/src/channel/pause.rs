//! Channel pause state, re-checked lazily against the wall clock.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum Pause {
    #[default]
    Off,
    /// Until an explicit resume.
    Indefinite,
    Until(Instant),
}

impl Pause {
    /// Zero duration, or one too long to put on the clock, pauses until
    /// `resume`.
    pub(crate) fn for_duration(duration: Duration, now: Instant) -> Self {
        if duration.is_zero() {
            return Pause::Indefinite;
        }
        match now.checked_add(duration) {
            Some(until) => Pause::Until(until),
            None => Pause::Indefinite,
        }
    }

    /// True while paused; an expired timed pause clears itself here.
    pub(crate) fn check(&mut self, now: Instant) -> bool {
        match *self {
            Pause::Off => false,
            Pause::Indefinite => true,
            Pause::Until(deadline) => {
                if now >= deadline {
                    *self = Pause::Off;
                    false
                } else {
                    true
                }
            }
        }
    }

    /// When a timed pause ends.
    pub(crate) fn until(&self) -> Option<Instant> {
        match *self {
            Pause::Until(deadline) => Some(deadline),
            Pause::Off | Pause::Indefinite => None,
        }
    }
}
