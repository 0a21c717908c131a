use crate::model::ClockTime;

pub const SLOT_STEP_MINUTES: u16 = 30;
const FIRST_SLOT_MINUTES: u16 = 8 * 60;
const LAST_SLOT_MINUTES: u16 = 20 * 60 + 30;

/// Candidate start times, 08:00 through 20:30 in half-hour steps.
///
/// No business rules are applied here; the grid is the same for every day.
pub fn generate_slots() -> impl Iterator<Item = ClockTime> {
    (FIRST_SLOT_MINUTES..=LAST_SLOT_MINUTES)
        .step_by(SLOT_STEP_MINUTES as usize)
        .filter_map(ClockTime::from_minutes)
}
