use chrono::{FixedOffset, NaiveDate, NaiveDateTime, Utc};

/// Wall clock expressed in local business time.
///
/// Appointment timestamps are stored as naive local times, so every "now"
/// and "today" comparison goes through this offset.
#[derive(Debug, Clone, Copy)]
pub struct BusinessClock {
    offset: FixedOffset,
}

impl BusinessClock {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    pub fn now(&self) -> NaiveDateTime {
        Utc::now().with_timezone(&self.offset).naive_local()
    }

    pub fn today(&self) -> NaiveDate {
        self.now().date()
    }
}
