use chrono::{Datelike, NaiveDate, Weekday};

use crate::model::{Holiday, Holidays, Span, WeeklySchedule};

/// Weekly opening hours plus date-specific holiday closures.
#[derive(Debug, Clone, Default)]
pub struct CalendarRules {
    schedule: WeeklySchedule,
    holidays: Holidays,
}

impl CalendarRules {
    pub fn new(schedule: WeeklySchedule, holidays: Holidays) -> Self {
        Self { schedule, holidays }
    }

    /// The active holiday on `date`, if any. Inactive entries do not close the day.
    pub fn is_holiday(&self, date: NaiveDate) -> Option<&Holiday> {
        self.holidays.get(&date).filter(|h| h.active)
    }

    /// Opening window for `date`'s weekday. `None` means the salon does not open that weekday.
    ///
    /// Holidays are not consulted; callers check [`CalendarRules::is_holiday`] first.
    pub fn hours_for(&self, date: NaiveDate) -> Option<Span> {
        self.schedule
            .get(date.weekday())
            .filter(|h| h.active && h.open < h.close)
            .map(|h| Span::new(h.open, h.close))
    }
}

pub fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}
