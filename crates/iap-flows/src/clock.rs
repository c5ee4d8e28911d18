use chrono::{DateTime, Utc};

/// Source of "now" for controllers that make time-based decisions.
/// Injectable so expiry logic stays testable.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
