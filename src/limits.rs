//! Hard caps on request and storage sizes.

pub const MAX_NOTE_LEN: usize = 1_000;
pub const MAX_CLIENT_ID_LEN: usize = 128;
pub const MAX_SERVICE_ID_LEN: usize = 128;
pub const MAX_APPOINTMENTS_PER_DAY: usize = 500;
pub const MAX_LINE_LEN: usize = 16 * 1024;
/// Longest service the catalog accepts: one full day.
pub const MAX_SERVICE_DURATION_MINUTES: u32 = 24 * 60;
