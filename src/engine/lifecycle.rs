use chrono::{DateTime, Utc};
use ulid::Ulid;

use crate::model::*;
use crate::model::AppointmentStatus::*;

use super::EngineError;

/// Legal status transitions. Statuses missing from the table are terminal.
const TRANSITIONS: &[(AppointmentStatus, &[AppointmentStatus])] = &[
    (AwaitingConfirmation, &[Confirmed, Cancelled]),
    (Confirmed, &[Cancelled, Completed]),
];

pub fn allowed_next(from: AppointmentStatus) -> &'static [AppointmentStatus] {
    TRANSITIONS
        .iter()
        .find(|(status, _)| *status == from)
        .map(|&(_, next)| next)
        .unwrap_or(&[])
}

pub fn can_transition(from: AppointmentStatus, to: AppointmentStatus) -> bool {
    allowed_next(from).contains(&to)
}

pub fn is_terminal(status: AppointmentStatus) -> bool {
    allowed_next(status).is_empty()
}

/// Only appointments still awaiting confirmation may be edited by their client.
pub fn is_editable(status: AppointmentStatus) -> bool {
    status == AwaitingConfirmation
}

pub fn ensure_editable(appointment: &Appointment) -> Result<(), EngineError> {
    if is_editable(appointment.status) {
        Ok(())
    } else {
        Err(EngineError::InvalidTransition {
            id: appointment.id,
            from: appointment.status,
            attempted: None,
        })
    }
}

/// A fresh booking in `AwaitingConfirmation`, with the service name and price
/// copied in as of now.
pub fn new_appointment(
    id: Ulid,
    client_id: &str,
    request: &BookingRequest,
    service: &Service,
    end_time: ClockTime,
    now: DateTime<Utc>,
) -> Appointment {
    Appointment {
        id,
        client_id: client_id.to_string(),
        date: request.date,
        start_time: request.start_time,
        end_time,
        service_id: service.id.clone(),
        service_name: service.name.clone(),
        price: service.price,
        status: AwaitingConfirmation,
        note: request.note.clone(),
        created_at: now,
        updated_at: now,
        version: 1,
    }
}

/// In-place edit: same id, client, status and creation time; new slot, service
/// snapshot and note. Derived from `existing`, so it carries the next version.
pub fn apply_edit(
    existing: &Appointment,
    request: &BookingRequest,
    service: &Service,
    end_time: ClockTime,
    now: DateTime<Utc>,
) -> Result<Appointment, EngineError> {
    ensure_editable(existing)?;
    Ok(Appointment {
        date: request.date,
        start_time: request.start_time,
        end_time,
        service_id: service.id.clone(),
        service_name: service.name.clone(),
        price: service.price,
        note: request.note.clone(),
        updated_at: now,
        version: existing.version + 1,
        ..existing.clone()
    })
}

pub fn apply_transition(
    existing: &Appointment,
    next: AppointmentStatus,
    now: DateTime<Utc>,
) -> Result<Appointment, EngineError> {
    if !can_transition(existing.status, next) {
        return Err(EngineError::InvalidTransition {
            id: existing.id,
            from: existing.status,
            attempted: Some(next),
        });
    }
    Ok(Appointment {
        status: next,
        updated_at: now,
        version: existing.version + 1,
        ..existing.clone()
    })
}
