//! Newline-delimited JSON messages exchanged over TCP.
//!
//! Each request is one JSON object on one line, tagged by `op`:
//!
//! ```text
//! {"op":"book","client_id":"ana","service_id":"cut","date":"2024-05-06","start_time":"10:00"}
//! {"ok":true,"data":{"id":"01J...","status":"AwaitingConfirmation",...}}
//! ```
//!
//! Every request gets exactly one response line, except `watch`, which answers
//! once and then streams one `{"event": ...}` line per change.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

use crate::engine::EngineError;
use crate::model::*;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Services,
    Slots {
        date: NaiveDate,
        service_id: String,
        #[serde(default)]
        exclude: Option<Ulid>,
    },
    /// Validate without booking.
    Check {
        #[serde(flatten)]
        request: BookingRequest,
    },
    Book {
        client_id: String,
        #[serde(flatten)]
        request: BookingRequest,
    },
    SetStatus {
        id: Ulid,
        /// Kept as a string so an unknown literal is reported as a bad status
        /// rather than a malformed line.
        status: String,
    },
    ClientAppointments {
        client_id: String,
        #[serde(flatten)]
        filter: AppointmentFilter,
    },
    DayAppointments {
        date: NaiveDate,
    },
    Watch {
        client_id: String,
    },
}

impl Request {
    pub fn parse(line: &str) -> Result<Self, EngineError> {
        serde_json::from_str(line).map_err(|e| EngineError::InvalidRequest(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    pub fn ok(data: impl Serialize) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => Self {
                ok: true,
                data: Some(value),
                error: None,
            },
            Err(e) => Self::error(&EngineError::InvalidRequest(e.to_string())),
        }
    }

    pub fn error(err: &EngineError) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(ErrorBody {
                kind: err.kind().to_string(),
                message: err.to_string(),
            }),
        }
    }

    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"ok":false,"error":{"kind":"internal","message":"unencodable response"}}"#.into()
        })
    }
}

/// A pushed change on a `watch` stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchEvent {
    pub event: Appointment,
}

/// Services as listed to clients, with the price already formatted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceView {
    pub id: String,
    pub name: String,
    pub duration_minutes: u32,
    pub price: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl From<&Service> for ServiceView {
    fn from(s: &Service) -> Self {
        Self {
            id: s.id.clone(),
            name: s.name.clone(),
            duration_minutes: s.duration_minutes,
            price: s.price_display(),
            description: s.description.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub end_time: ClockTime,
}
