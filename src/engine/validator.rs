use chrono::{Datelike, NaiveDate};
use ulid::Ulid;

use crate::calendar::{weekday_name, CalendarRules};
use crate::model::*;
use crate::slots::generate_slots;

use super::conflict::find_conflict;
use super::EngineError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The slot is bookable; `end` is the derived end time to persist.
    Accept { end: ClockTime },
    Reject(Rejection),
}

/// Business-rule rejection, in the order the checks run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    ClosedDay { date: NaiveDate, reason: String },
    OutsideHours { open: ClockTime, close: ClockTime },
    SlotConflict(Ulid),
}

impl Rejection {
    pub fn kind(&self) -> &'static str {
        match self {
            Rejection::ClosedDay { .. } => "closed_day",
            Rejection::OutsideHours { .. } => "outside_hours",
            Rejection::SlotConflict(_) => "slot_conflict",
        }
    }
}

impl From<Rejection> for EngineError {
    fn from(r: Rejection) -> Self {
        match r {
            Rejection::ClosedDay { date, reason } => EngineError::ClosedDay { date, reason },
            Rejection::OutsideHours { open, close } => {
                EngineError::OutsideHours { open, close }
            }
            Rejection::SlotConflict(id) => EngineError::SlotConflict(id),
        }
    }
}

impl Outcome {
    pub fn into_result(self) -> Result<ClockTime, EngineError> {
        match self {
            Outcome::Accept { end } => Ok(end),
            Outcome::Reject(r) => Err(r.into()),
        }
    }
}

/// Decide whether `request` can be booked for `service`.
///
/// Checks run in a fixed order and stop at the first failure: holiday, weekday
/// hours, derived end time, conflicts. Holiday closure therefore always wins over
/// weekday closure. `same_day` must be freshly read for `request.date`; the
/// appointment named by `request.target` is excluded from the conflict scan.
pub fn validate(
    rules: &CalendarRules,
    request: &BookingRequest,
    service: &Service,
    same_day: &[Appointment],
) -> Outcome {
    let date = request.date;
    let start = request.start_time;

    if let Some(holiday) = rules.is_holiday(date) {
        let reason = holiday
            .reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("salon is closed on {date}"));
        return Outcome::Reject(Rejection::ClosedDay { date, reason });
    }

    let Some(hours) = rules.hours_for(date) else {
        let reason = format!("salon does not open on {}", weekday_name(date.weekday()));
        return Outcome::Reject(Rejection::ClosedDay { date, reason });
    };
    let outside = Rejection::OutsideHours {
        open: hours.start,
        close: hours.end,
    };
    if start < hours.start || start >= hours.end {
        return Outcome::Reject(outside);
    }

    // A service must also finish by closing time.
    let end = match start.add_minutes(service.duration_minutes) {
        Some(end) if end > start && end <= hours.end => end,
        _ => return Outcome::Reject(outside),
    };

    let candidate = Span::new(start, end);
    if let Some(blocker) = find_conflict(&candidate, date, same_day, request.target) {
        return Outcome::Reject(Rejection::SlotConflict(blocker.id));
    }

    Outcome::Accept { end }
}

/// Slots from the candidate grid that would currently be accepted for `service`.
pub fn open_slots(
    rules: &CalendarRules,
    service: &Service,
    date: NaiveDate,
    same_day: &[Appointment],
    exclude: Option<Ulid>,
) -> Vec<ClockTime> {
    generate_slots()
        .filter(|&start_time| {
            let request = BookingRequest {
                service_id: service.id.clone(),
                date,
                start_time,
                note: String::new(),
                target: exclude,
            };
            matches!(validate(rules, &request, service, same_day), Outcome::Accept { .. })
        })
        .collect()
}
