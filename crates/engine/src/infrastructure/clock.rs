use chrono::{DateTime, Utc};

use crate::infrastructure::ports::ClockPort;

/// Wall-clock implementation used outside tests.
#[derive(Default)]
pub struct SystemClock;

impl ClockPort for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
