use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

/// First non-cancelled appointment on `date` whose span overlaps `candidate`.
///
/// `exclude` is the appointment under edit; it never conflicts with itself.
pub fn find_conflict<'a>(
    candidate: &Span,
    date: NaiveDate,
    existing: &'a [Appointment],
    exclude: Option<Ulid>,
) -> Option<&'a Appointment> {
    existing.iter().find(|a| {
        a.date == date
            && Some(a.id) != exclude
            && !a.is_cancelled()
            && candidate.start < a.end_time
            && candidate.end > a.start_time
    })
}

pub fn has_conflict(
    candidate_start: ClockTime,
    candidate_end: ClockTime,
    date: NaiveDate,
    existing: &[Appointment],
    exclude: Option<Ulid>,
) -> bool {
    let candidate = Span::new(candidate_start, candidate_end);
    find_conflict(&candidate, date, existing, exclude).is_some()
}
