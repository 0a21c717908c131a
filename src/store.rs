use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use crate::engine::conflict::find_conflict;
use crate::limits::MAX_APPOINTMENTS_PER_DAY;
use crate::model::*;
use crate::wal::Wal;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The write overlaps this non-cancelled appointment.
    Conflict(Ulid),
    NotFound(Ulid),
    /// The write was derived from an older copy than the one stored at `version`.
    Stale { id: Ulid, version: u64 },
    DayFull,
    Io(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Conflict(id) => write!(f, "overlaps appointment {id}"),
            StoreError::NotFound(id) => write!(f, "appointment not found: {id}"),
            StoreError::Stale { id, version } => {
                write!(f, "appointment {id} changed concurrently; now at version {version}")
            }
            StoreError::DayFull => write!(f, "too many appointments on date"),
            StoreError::Io(e) => write!(f, "storage I/O: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Appointment persistence.
///
/// `persist_appointment` must check for overlap with the date's other
/// non-cancelled appointments atomically with the write, so that at most one of
/// two racing bookings for the same interval succeeds. The loser gets
/// [`StoreError::Conflict`].
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    async fn fetch_appointments_for_date(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, StoreError>;

    async fn fetch_appointment(&self, id: Ulid) -> Result<Option<Appointment>, StoreError>;

    async fn fetch_appointments_for_client(
        &self,
        client_id: &str,
    ) -> Result<Vec<Appointment>, StoreError>;

    /// Create when `is_new`, otherwise replace the stored appointment with the
    /// same id. A replace must carry the stored `version + 1`, or it fails with
    /// [`StoreError::Stale`].
    async fn persist_appointment(
        &self,
        appointment: &Appointment,
        is_new: bool,
    ) -> Result<(), StoreError>;
}

pub type SharedDay = Arc<RwLock<DayState>>;

// ── Group-commit WAL channel ──────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Owns the WAL. Appends that arrive while a flush is pending are batched
/// behind a single fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        for (_, tx) in batch {
            let _ = tx.send(match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            });
        }

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &[(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let appended = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so stale bytes never leak into the next batch.
    let flushed = wal.flush_sync();
    appended.and(flushed)
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// In-memory appointment store made durable by a write-ahead log.
///
/// Each date has its own lock. A write holds the lock of every date it
/// touches (two when an edit moves an appointment, acquired in date order)
/// while it re-checks conflicts and appends to the log.
pub struct WalStore {
    days: DashMap<NaiveDate, SharedDay>,
    /// Appointment id → date it is stored under.
    index: DashMap<Ulid, NaiveDate>,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Shared by writers, exclusive for compaction so the snapshot matches the log.
    gate: RwLock<()>,
}

impl WalStore {
    /// Replay `wal_path` and start the writer task. Must run inside a Tokio runtime.
    pub fn open(wal_path: &Path) -> io::Result<Self> {
        let events = Wal::replay(wal_path)?;
        let wal = Wal::open(wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = Self {
            days: DashMap::new(),
            index: DashMap::new(),
            wal_tx,
            gate: RwLock::new(()),
        };
        // Sole owner of every lock here, so try_write cannot fail.
        for event in &events {
            let appointment = event.appointment();
            if let Some(previous) = store.index.get(&appointment.id).map(|e| *e.value()) {
                let day = store.day(previous);
                if let Ok(mut guard) = day.try_write() {
                    guard.remove(appointment.id);
                }
            }
            let day = store.day(appointment.date);
            if let Ok(mut guard) = day.try_write() {
                guard.insert(appointment.clone());
            }
            store.index.insert(appointment.id, appointment.date);
        }
        info!(
            "replayed {} events, {} appointments",
            events.len(),
            store.index.len()
        );
        Ok(store)
    }

    fn day(&self, date: NaiveDate) -> SharedDay {
        self.days
            .entry(date)
            .or_insert_with(|| Arc::new(RwLock::new(DayState::new(date))))
            .value()
            .clone()
    }

    async fn wal_append(&self, event: Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event,
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Io("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Io("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Io(e.to_string()))
    }

    pub async fn appends_since_compact(&self) -> Result<u64, StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .map_err(|_| StoreError::Io("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Io("WAL writer dropped response".into()))
    }

    /// Rewrite the log as one creation event per stored appointment.
    pub async fn compact(&self) -> Result<usize, StoreError> {
        let _gate = self.gate.write().await;
        let days: Vec<SharedDay> = self.days.iter().map(|e| e.value().clone()).collect();
        let mut events = Vec::with_capacity(self.index.len());
        for day in days {
            let guard = day.read().await;
            events.extend(guard.appointments.iter().map(|a| Event::AppointmentCreated {
                appointment: a.clone(),
            }));
        }
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Io("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Io("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(count)
    }

    async fn create(&self, appointment: &Appointment) -> Result<(), StoreError> {
        if self.index.contains_key(&appointment.id) {
            return Err(StoreError::Conflict(appointment.id));
        }
        let mut day = self.day(appointment.date).write_owned().await;
        check_room(&day)?;
        check_conflict(&day, appointment)?;
        self.wal_append(Event::AppointmentCreated {
            appointment: appointment.clone(),
        })
        .await?;
        day.insert(appointment.clone());
        self.index.insert(appointment.id, appointment.date);
        Ok(())
    }

    async fn update(&self, appointment: &Appointment) -> Result<(), StoreError> {
        let id = appointment.id;
        loop {
            let previous = self
                .index
                .get(&id)
                .map(|e| *e.value())
                .ok_or(StoreError::NotFound(id))?;

            let (mut source, mut target) = self.lock_pair(previous, appointment.date).await;
            // The appointment moved between the index read and locking; retry.
            let Some(current) = source.get(id) else {
                debug!("appointment {id} moved while locking, retrying");
                continue;
            };
            check_stale(current, appointment)?;

            let destination = target.as_deref().unwrap_or(&*source);
            if target.is_some() {
                check_room(destination)?;
            }
            check_conflict(destination, appointment)?;

            self.wal_append(Event::AppointmentUpdated {
                appointment: appointment.clone(),
            })
            .await?;
            source.remove(id);
            match target.as_mut() {
                Some(t) => t.insert(appointment.clone()),
                None => source.insert(appointment.clone()),
            }
            self.index.insert(id, appointment.date);
            return Ok(());
        }
    }

    /// Write-lock `source`, and `target` too when it is a different date. Locks
    /// are taken in date order.
    async fn lock_pair(
        &self,
        source: NaiveDate,
        target: NaiveDate,
    ) -> (
        OwnedRwLockWriteGuard<DayState>,
        Option<OwnedRwLockWriteGuard<DayState>>,
    ) {
        if source == target {
            return (self.day(source).write_owned().await, None);
        }
        if source < target {
            let s = self.day(source).write_owned().await;
            let t = self.day(target).write_owned().await;
            (s, Some(t))
        } else {
            let t = self.day(target).write_owned().await;
            let s = self.day(source).write_owned().await;
            (s, Some(t))
        }
    }
}

fn check_room(day: &DayState) -> Result<(), StoreError> {
    if day.appointments.len() >= MAX_APPOINTMENTS_PER_DAY {
        return Err(StoreError::DayFull);
    }
    Ok(())
}

fn check_conflict(day: &DayState, appointment: &Appointment) -> Result<(), StoreError> {
    if appointment.is_cancelled() {
        return Ok(());
    }
    let blocker = find_conflict(
        &appointment.span(),
        appointment.date,
        &day.appointments,
        Some(appointment.id),
    );
    match blocker {
        Some(other) => Err(StoreError::Conflict(other.id)),
        None => Ok(()),
    }
}

fn check_stale(current: &Appointment, incoming: &Appointment) -> Result<(), StoreError> {
    if incoming.version == current.version + 1 {
        Ok(())
    } else {
        Err(StoreError::Stale {
            id: current.id,
            version: current.version,
        })
    }
}

#[async_trait]
impl AppointmentStore for WalStore {
    async fn fetch_appointments_for_date(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, StoreError> {
        let Some(day) = self.days.get(&date).map(|e| e.value().clone()) else {
            return Ok(Vec::new());
        };
        let guard = day.read().await;
        Ok(guard.appointments.clone())
    }

    async fn fetch_appointment(&self, id: Ulid) -> Result<Option<Appointment>, StoreError> {
        loop {
            let Some(date) = self.index.get(&id).map(|e| *e.value()) else {
                return Ok(None);
            };
            let day = self.day(date);
            let guard = day.read().await;
            if let Some(a) = guard.get(id) {
                return Ok(Some(a.clone()));
            }
        }
    }

    async fn fetch_appointments_for_client(
        &self,
        client_id: &str,
    ) -> Result<Vec<Appointment>, StoreError> {
        let days: Vec<SharedDay> = self.days.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for day in days {
            let guard = day.read().await;
            out.extend(
                guard
                    .appointments
                    .iter()
                    .filter(|a| a.client_id == client_id)
                    .cloned(),
            );
        }
        Ok(out)
    }

    async fn persist_appointment(
        &self,
        appointment: &Appointment,
        is_new: bool,
    ) -> Result<(), StoreError> {
        let _gate = self.gate.read().await;
        if is_new {
            self.create(appointment).await
        } else {
            self.update(appointment).await
        }
    }
}
