use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc, Weekday};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ulid::Ulid;

pub const MINUTES_PER_DAY: u16 = 24 * 60;

/// Wall-clock time of day with minute resolution. Encoded as `"HH:MM"` (24h).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClockTime(u16);

impl ClockTime {
    pub fn new(hour: u8, minute: u8) -> Option<Self> {
        if hour >= 24 || minute >= 60 {
            return None;
        }
        Some(Self(hour as u16 * 60 + minute as u16))
    }

    pub fn from_minutes(minutes: u16) -> Option<Self> {
        (minutes < MINUTES_PER_DAY).then_some(Self(minutes))
    }

    /// Minutes since midnight.
    pub fn minutes(self) -> u16 {
        self.0
    }

    pub fn hour(self) -> u8 {
        (self.0 / 60) as u8
    }

    pub fn minute(self) -> u8 {
        (self.0 % 60) as u8
    }

    /// `None` when the result would reach or pass midnight.
    pub fn add_minutes(self, minutes: u32) -> Option<Self> {
        let total = (self.0 as u32).checked_add(minutes)?;
        u16::try_from(total).ok().and_then(Self::from_minutes)
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseClockTimeError(String);

impl fmt::Display for ParseClockTimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid time {:?}: expected HH:MM", self.0)
    }
}

impl std::error::Error for ParseClockTimeError {}

impl FromStr for ClockTime {
    type Err = ParseClockTimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseClockTimeError(s.to_string());
        let (h, m) = s.split_once(':').ok_or_else(err)?;
        if h.len() != 2 || m.len() != 2 {
            return Err(err());
        }
        if !h.bytes().chain(m.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(err());
        }
        let hour: u8 = h.parse().map_err(|_| err())?;
        let minute: u8 = m.parse().map_err(|_| err())?;
        Self::new(hour, minute).ok_or_else(err)
    }
}

impl Serialize for ClockTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ClockTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Half-open interval `[start, end)` within a single day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: ClockTime,
    pub end: ClockTime,
}

impl Span {
    pub fn new(start: ClockTime, end: ClockTime) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_minutes(&self) -> u16 {
        self.end.minutes() - self.start.minutes()
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

// ── Catalog & calendar configuration ─────────────────────

fn default_true() -> bool {
    true
}

/// A bookable service definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub name: String,
    pub duration_minutes: u32,
    pub price: Decimal,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub description: String,
}

impl Service {
    /// Price with exactly two fraction digits, e.g. `"35.00"`.
    pub fn price_display(&self) -> String {
        format_price(self.price)
    }
}

pub fn format_price(price: Decimal) -> String {
    format!("{:.2}", price.round_dp(2))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayHours {
    pub active: bool,
    pub open: ClockTime,
    pub close: ClockTime,
}

/// Operating hours per weekday. A weekday without an entry is closed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeeklySchedule(HashMap<Weekday, DayHours>);

impl WeeklySchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_day(mut self, weekday: Weekday, hours: DayHours) -> Self {
        self.0.insert(weekday, hours);
        self
    }

    pub fn get(&self, weekday: Weekday) -> Option<&DayHours> {
        self.0.get(&weekday)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Weekday, &DayHours)> {
        self.0.iter()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holiday {
    #[serde(alias = "ativo")]
    pub active: bool,
    #[serde(default, alias = "motivo", alias = "nome")]
    pub reason: Option<String>,
}

/// Date-keyed closures. Sparse: a missing date is not a holiday.
pub type Holidays = BTreeMap<NaiveDate, Holiday>;

// ── Appointments ─────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppointmentStatus {
    AwaitingConfirmation,
    Confirmed,
    Cancelled,
    Completed,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 4] = [
        AppointmentStatus::AwaitingConfirmation,
        AppointmentStatus::Confirmed,
        AppointmentStatus::Cancelled,
        AppointmentStatus::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::AwaitingConfirmation => "AwaitingConfirmation",
            AppointmentStatus::Confirmed => "Confirmed",
            AppointmentStatus::Cancelled => "Cancelled",
            AppointmentStatus::Completed => "Completed",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStatusError(String);

impl fmt::Display for ParseStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unrecognized appointment status {:?}", self.0)
    }
}

impl std::error::Error for ParseStatusError {}

impl FromStr for AppointmentStatus {
    type Err = ParseStatusError;

    /// Exact literal match only.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseStatusError(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub client_id: String,
    pub date: NaiveDate,
    pub start_time: ClockTime,
    /// Always `start_time + duration` of the booked service.
    pub end_time: ClockTime,
    pub service_id: String,
    /// Snapshot of the service name when booked or last edited.
    pub service_name: String,
    /// Snapshot of the service price when booked or last edited.
    pub price: Decimal,
    pub status: AppointmentStatus,
    pub note: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Starts at 1 and grows by one with every stored change. A replace must
    /// carry the stored version plus one.
    #[serde(default)]
    pub version: u64,
}

impl Appointment {
    pub fn span(&self) -> Span {
        Span::new(self.start_time, self.end_time)
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == AppointmentStatus::Cancelled
    }
}

/// A client's booking request. Consumed by validation, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub service_id: String,
    pub date: NaiveDate,
    pub start_time: ClockTime,
    #[serde(default)]
    pub note: String,
    /// Set when editing an existing appointment.
    #[serde(default, alias = "appointment_id")]
    pub target: Option<Ulid>,
}

/// Filters for a client's appointment listing. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentFilter {
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub service_id: Option<String>,
}

impl AppointmentFilter {
    pub fn matches(&self, appointment: &Appointment) -> bool {
        self.date.is_none_or(|d| appointment.date == d)
            && self
                .service_id
                .as_deref()
                .is_none_or(|s| appointment.service_id == s)
    }
}

/// Newest date first, later start first within a date.
pub fn sort_newest_first(appointments: &mut [Appointment]) {
    appointments.sort_by(|a, b| {
        b.date
            .cmp(&a.date)
            .then_with(|| b.start_time.cmp(&a.start_time))
    });
}

/// All appointments stored for one date, sorted by `start_time`.
#[derive(Debug, Clone)]
pub struct DayState {
    pub date: NaiveDate,
    pub appointments: Vec<Appointment>,
}

impl DayState {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            appointments: Vec::new(),
        }
    }

    /// Insert maintaining sort order by start_time.
    pub fn insert(&mut self, appointment: Appointment) {
        let pos = self
            .appointments
            .partition_point(|a| a.start_time <= appointment.start_time);
        self.appointments.insert(pos, appointment);
    }

    pub fn remove(&mut self, id: Ulid) -> Option<Appointment> {
        let pos = self.appointments.iter().position(|a| a.id == id)?;
        Some(self.appointments.remove(pos))
    }

    pub fn get(&self, id: Ulid) -> Option<&Appointment> {
        self.appointments.iter().find(|a| a.id == id)
    }

    /// Appointments whose span overlaps `query`, cancelled ones included.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Appointment> {
        let right_bound = self
            .appointments
            .partition_point(|a| a.start_time < query.end);
        self.appointments[..right_bound]
            .iter()
            .filter(move |a| a.end_time > query.start)
    }
}

/// WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    AppointmentCreated { appointment: Appointment },
    AppointmentUpdated { appointment: Appointment },
}

impl Event {
    pub fn appointment(&self) -> &Appointment {
        match self {
            Event::AppointmentCreated { appointment }
            | Event::AppointmentUpdated { appointment } => appointment,
        }
    }
}
