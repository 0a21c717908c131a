pub mod conflict;
mod error;
pub mod lifecycle;
pub mod validator;
#[cfg(test)]
mod tests;

pub use conflict::{find_conflict, has_conflict};
pub use error::EngineError;
pub use validator::{open_slots, validate, Outcome, Rejection};

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::calendar::CalendarRules;
use crate::catalog::Catalog;
use crate::limits::*;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability;
use crate::settings::ConfigSource;
use crate::slots::generate_slots;
use crate::store::AppointmentStore;

/// The booking engine: validates requests against the salon's calendar and
/// existing bookings, and drives appointments through their lifecycle.
///
/// Configuration is read from `config` on every call. Same-day appointments are
/// always fetched fresh from `store` right before validation, and the store
/// re-checks conflicts when it commits.
pub struct Engine {
    config: Arc<dyn ConfigSource>,
    store: Arc<dyn AppointmentStore>,
    pub notify: Arc<NotifyHub>,
}

impl Engine {
    pub fn new(
        config: Arc<dyn ConfigSource>,
        store: Arc<dyn AppointmentStore>,
        notify: Arc<NotifyHub>,
    ) -> Self {
        Self {
            config,
            store,
            notify,
        }
    }

    async fn catalog(&self) -> Result<Catalog, EngineError> {
        Ok(Catalog::new(self.config.fetch_active_services().await?))
    }

    async fn rules(&self) -> Result<CalendarRules, EngineError> {
        let schedule = self.config.fetch_weekly_schedule().await?;
        let holidays = self.config.fetch_holidays().await?;
        Ok(CalendarRules::new(schedule, holidays))
    }

    pub async fn services(&self) -> Result<Vec<Service>, EngineError> {
        Ok(self.config.fetch_active_services().await?)
    }

    pub fn candidate_slots(&self) -> Vec<ClockTime> {
        generate_slots().collect()
    }

    /// Candidate slots that would be accepted right now for `service_id` on `date`.
    pub async fn open_slots(
        &self,
        date: NaiveDate,
        service_id: &str,
        exclude: Option<Ulid>,
    ) -> Result<Vec<ClockTime>, EngineError> {
        let catalog = self.catalog().await?;
        let service = catalog
            .get(service_id)
            .ok_or_else(|| EngineError::service_not_found(service_id))?;
        if let Some(id) = exclude {
            self.editable_target(id).await?;
        }
        let rules = self.rules().await?;
        let same_day = self.store.fetch_appointments_for_date(date).await?;
        Ok(open_slots(&rules, service, date, &same_day, exclude))
    }

    /// Run the full validation pipeline without writing anything. Returns the
    /// derived end time. A `target` must exist and still be editable, as for
    /// [`Engine::book`].
    pub async fn check(&self, request: &BookingRequest) -> Result<ClockTime, EngineError> {
        check_request_limits(request)?;
        if let Some(id) = request.target {
            self.editable_target(id).await?;
        }
        let catalog = self.catalog().await?;
        let service = catalog
            .get(&request.service_id)
            .ok_or_else(|| EngineError::service_not_found(&request.service_id))?;
        self.validate_fresh(request, service).await
    }

    async fn editable_target(&self, id: Ulid) -> Result<Appointment, EngineError> {
        let existing = self
            .store
            .fetch_appointment(id)
            .await?
            .ok_or_else(|| EngineError::appointment_not_found(id))?;
        lifecycle::ensure_editable(&existing)?;
        Ok(existing)
    }

    async fn validate_fresh(
        &self,
        request: &BookingRequest,
        service: &Service,
    ) -> Result<ClockTime, EngineError> {
        let rules = self.rules().await?;
        let same_day = self.store.fetch_appointments_for_date(request.date).await?;
        match validate(&rules, request, service, &same_day) {
            Outcome::Accept { end } => Ok(end),
            Outcome::Reject(rejection) => {
                debug!(
                    "rejected {} on {} at {}: {}",
                    request.service_id,
                    request.date,
                    request.start_time,
                    rejection.kind()
                );
                Err(rejection.into())
            }
        }
    }

    /// Create a new appointment, or edit `request.target` when it is set.
    pub async fn book(
        &self,
        client_id: &str,
        request: &BookingRequest,
    ) -> Result<Appointment, EngineError> {
        let result = match request.target {
            Some(id) => self.edit(client_id, id, request).await,
            None => self.create(client_id, request).await,
        };
        let op = if request.target.is_some() { "edit" } else { "create" };
        record_booking(op, &result);
        result
    }

    async fn create(
        &self,
        client_id: &str,
        request: &BookingRequest,
    ) -> Result<Appointment, EngineError> {
        check_client(client_id)?;
        check_request_limits(request)?;
        let catalog = self.catalog().await?;
        let service = catalog
            .get(&request.service_id)
            .ok_or_else(|| EngineError::service_not_found(&request.service_id))?;
        let end = self.validate_fresh(request, service).await?;

        let appointment =
            lifecycle::new_appointment(Ulid::new(), client_id, request, service, end, Utc::now());
        self.commit(&appointment, true).await?;
        info!(
            "booked {} for {client_id}: {} {}-{} {}",
            appointment.id,
            appointment.date,
            appointment.start_time,
            appointment.end_time,
            appointment.service_id
        );
        Ok(appointment)
    }

    async fn edit(
        &self,
        client_id: &str,
        id: Ulid,
        request: &BookingRequest,
    ) -> Result<Appointment, EngineError> {
        check_client(client_id)?;
        check_request_limits(request)?;
        // Other clients' appointments are reported as missing.
        let existing = self
            .store
            .fetch_appointment(id)
            .await?
            .filter(|a| a.client_id == client_id)
            .ok_or_else(|| EngineError::appointment_not_found(id))?;
        lifecycle::ensure_editable(&existing)?;

        let catalog = self.catalog().await?;
        let service = catalog
            .get(&request.service_id)
            .ok_or_else(|| EngineError::service_not_found(&request.service_id))?;
        let request = BookingRequest {
            target: Some(id),
            ..request.clone()
        };
        let end = self.validate_fresh(&request, service).await?;

        let updated = lifecycle::apply_edit(&existing, &request, service, end, Utc::now())?;
        self.commit(&updated, false).await?;
        info!(
            "edited {id} for {client_id}: {} {}-{} {}",
            updated.date, updated.start_time, updated.end_time, updated.service_id
        );
        Ok(updated)
    }

    /// Administrative status change, checked against the transition table.
    pub async fn set_status(
        &self,
        id: Ulid,
        next: AppointmentStatus,
    ) -> Result<Appointment, EngineError> {
        let existing = self
            .store
            .fetch_appointment(id)
            .await?
            .ok_or_else(|| EngineError::appointment_not_found(id))?;
        let updated = lifecycle::apply_transition(&existing, next, Utc::now())?;
        self.commit(&updated, false).await?;
        info!("appointment {id}: {} -> {next}", existing.status);
        metrics::counter!(observability::STATUS_CHANGES_TOTAL, "status" => next.as_str())
            .increment(1);
        Ok(updated)
    }

    async fn commit(&self, appointment: &Appointment, is_new: bool) -> Result<(), EngineError> {
        match self.store.persist_appointment(appointment, is_new).await {
            Ok(()) => {
                self.notify.send(appointment);
                Ok(())
            }
            Err(e) => {
                let err = EngineError::from(e);
                match &err {
                    EngineError::PersistenceConflict(other) => warn!(
                        "lost race for {} {}-{} to {other}",
                        appointment.date, appointment.start_time, appointment.end_time
                    ),
                    EngineError::StaleWrite(id) => {
                        warn!("dropped write to {id}: changed since it was read")
                    }
                    _ => {}
                }
                Err(err)
            }
        }
    }

    /// A client's appointments, newest first.
    pub async fn client_appointments(
        &self,
        client_id: &str,
        filter: &AppointmentFilter,
    ) -> Result<Vec<Appointment>, EngineError> {
        check_client(client_id)?;
        let mut list: Vec<Appointment> = self
            .store
            .fetch_appointments_for_client(client_id)
            .await?
            .into_iter()
            .filter(|a| filter.matches(a))
            .collect();
        sort_newest_first(&mut list);
        Ok(list)
    }

    /// Everything stored for `date`, cancelled included, by start time.
    pub async fn appointments_for_date(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, EngineError> {
        let mut list = self.store.fetch_appointments_for_date(date).await?;
        list.sort_by_key(|a| a.start_time);
        Ok(list)
    }
}

fn check_client(client_id: &str) -> Result<(), EngineError> {
    if client_id.is_empty() {
        return Err(EngineError::InvalidRequest("missing client id".into()));
    }
    if client_id.len() > MAX_CLIENT_ID_LEN {
        return Err(EngineError::LimitExceeded("client id too long"));
    }
    Ok(())
}

fn check_request_limits(request: &BookingRequest) -> Result<(), EngineError> {
    if request.service_id.len() > MAX_SERVICE_ID_LEN {
        return Err(EngineError::LimitExceeded("service id too long"));
    }
    if request.note.len() > MAX_NOTE_LEN {
        return Err(EngineError::LimitExceeded("note too long"));
    }
    Ok(())
}

fn record_booking(op: &'static str, result: &Result<Appointment, EngineError>) {
    let outcome = match result {
        Ok(_) => "accepted",
        Err(e) => e.kind(),
    };
    metrics::counter!(observability::BOOKINGS_TOTAL, "op" => op, "outcome" => outcome).increment(1);
}
