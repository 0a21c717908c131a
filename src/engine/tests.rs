use super::*;
use std::path::PathBuf;

use tokio_test::{assert_err, assert_ok};

use crate::model::fixtures::{d, t};
use crate::settings::{SalonSettings, SettingsSource};
use crate::store::WalStore;
use AppointmentStatus::*;

const MONDAY: &str = "2024-05-06";
const TUESDAY: &str = "2024-05-07";
const WEDNESDAY: &str = "2024-05-08";

const SETTINGS: &str = r#"{
    "services": [
        {"id": "cut", "name": "Cut", "duration_minutes": 30, "price": "35.00"},
        {"id": "color", "name": "Color", "duration_minutes": 45, "price": "80.50"},
        {"id": "perm", "name": "Perm", "duration_minutes": 120, "price": "150.00", "active": false}
    ],
    "schedule": {
        "Mon": {"active": true, "open": "09:00", "close": "18:00"},
        "Tue": {"active": false, "open": "09:00", "close": "18:00"},
        "Wed": {"active": true, "open": "10:00", "close": "16:00"}
    },
    "holidays": {
        "2024-12-25": {"ativo": true, "motivo": "Natal"}
    }
}"#;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("salonbook_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn test_engine(name: &str) -> Engine {
    let settings = SalonSettings::from_json(SETTINGS).unwrap();
    let store = WalStore::open(&test_wal_path(name)).unwrap();
    Engine::new(
        Arc::new(SettingsSource::new(settings)),
        Arc::new(store),
        Arc::new(NotifyHub::new()),
    )
}

fn req(service_id: &str, date: &str, start: &str) -> BookingRequest {
    BookingRequest {
        service_id: service_id.into(),
        date: d(date),
        start_time: t(start),
        note: String::new(),
        target: None,
    }
}

fn edit_of(id: Ulid, service_id: &str, date: &str, start: &str) -> BookingRequest {
    BookingRequest {
        target: Some(id),
        ..req(service_id, date, start)
    }
}

#[tokio::test]
async fn booking_derives_end_and_snapshots_service() {
    let engine = test_engine("derive_end.wal");
    let a = engine.book("ana", &req("color", MONDAY, "10:00")).await.unwrap();
    assert_eq!(a.end_time, t("10:45"));
    assert_eq!(a.status, AwaitingConfirmation);
    assert_eq!(a.service_name, "Color");
    assert_eq!(format_price(a.price), "80.50");
    assert_eq!(a.client_id, "ana");
}

#[tokio::test]
async fn conflict_then_adjacent_slot() {
    let engine = test_engine("conflict_scenario.wal");
    let existing = engine.book("ana", &req("color", MONDAY, "10:00")).await.unwrap();
    engine.set_status(existing.id, Confirmed).await.unwrap();

    let err = engine.book("bia", &req("cut", MONDAY, "10:30")).await.unwrap_err();
    assert_eq!(err, EngineError::SlotConflict(existing.id));
    assert_eq!(err.to_string(), "slot already reserved");

    let ok = engine.book("bia", &req("cut", MONDAY, "10:45")).await.unwrap();
    assert_eq!(ok.end_time, t("11:15"));
}

#[tokio::test]
async fn holiday_reports_reason() {
    let engine = test_engine("holiday.wal");
    let err = engine.book("ana", &req("cut", "2024-12-25", "10:00")).await.unwrap_err();
    assert_eq!(err.kind(), "closed_day");
    assert_eq!(err.to_string(), "Natal");
}

#[tokio::test]
async fn closed_weekday_and_outside_hours() {
    let engine = test_engine("closed_weekday.wal");
    let err = assert_err!(engine.book("ana", &req("cut", TUESDAY, "10:00")).await);
    assert_eq!(err.to_string(), "salon does not open on Tuesday");

    let err = assert_err!(engine.book("ana", &req("cut", WEDNESDAY, "09:30")).await);
    assert_eq!(
        err,
        EngineError::OutsideHours {
            open: t("10:00"),
            close: t("16:00")
        }
    );
    // 45 minutes from 15:30 runs past a 16:00 close.
    let err = assert_err!(engine.book("ana", &req("color", WEDNESDAY, "15:30")).await);
    assert_eq!(err.kind(), "outside_hours");
    assert_ok!(engine.book("ana", &req("color", WEDNESDAY, "15:15")).await);
}

#[tokio::test]
async fn unknown_and_inactive_services() {
    let engine = test_engine("unknown_service.wal");
    let err = engine.book("ana", &req("nails", MONDAY, "10:00")).await.unwrap_err();
    assert_eq!(err, EngineError::service_not_found("nails"));
    let err = engine.book("ana", &req("perm", MONDAY, "10:00")).await.unwrap_err();
    assert_eq!(err.kind(), "not_found");

    let services = engine.services().await.unwrap();
    let ids: Vec<&str> = services.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["cut", "color"]);
}

#[tokio::test]
async fn check_does_not_persist() {
    let engine = test_engine("dry_run.wal");
    let end = engine.check(&req("cut", MONDAY, "11:00")).await.unwrap();
    assert_eq!(end, t("11:30"));
    assert!(engine.appointments_for_date(d(MONDAY)).await.unwrap().is_empty());
}

#[tokio::test]
async fn check_with_target_agrees_with_book() {
    let engine = test_engine("check_target.wal");
    let a = engine.book("ana", &req("cut", MONDAY, "10:00")).await.unwrap();
    let end = engine
        .check(&edit_of(a.id, "cut", MONDAY, "10:15"))
        .await
        .unwrap();
    assert_eq!(end, t("10:45"));

    engine.set_status(a.id, Confirmed).await.unwrap();
    let moved = edit_of(a.id, "cut", MONDAY, "14:00");
    let checked = engine.check(&moved).await.unwrap_err();
    assert_eq!(
        checked,
        EngineError::InvalidTransition {
            id: a.id,
            from: Confirmed,
            attempted: None
        }
    );
    assert_eq!(checked, engine.book("ana", &moved).await.unwrap_err());
    let err = engine
        .open_slots(d(MONDAY), "cut", Some(a.id))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_transition");

    let unknown = Ulid::new();
    assert_eq!(
        engine
            .check(&edit_of(unknown, "cut", MONDAY, "14:00"))
            .await
            .unwrap_err(),
        EngineError::appointment_not_found(unknown)
    );
    let err = engine
        .open_slots(d(MONDAY), "cut", Some(unknown))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "not_found");
}

#[tokio::test]
async fn edit_keeps_id_and_status() {
    let engine = test_engine("edit.wal");
    let a = engine.book("ana", &req("cut", MONDAY, "10:00")).await.unwrap();

    let edited = engine
        .book("ana", &edit_of(a.id, "color", WEDNESDAY, "11:00"))
        .await
        .unwrap();
    assert_eq!(edited.id, a.id);
    assert_eq!(edited.status, AwaitingConfirmation);
    assert_eq!(edited.created_at, a.created_at);
    assert_eq!(edited.end_time, t("11:45"));
    assert_eq!(edited.service_name, "Color");

    assert!(engine.appointments_for_date(d(MONDAY)).await.unwrap().is_empty());
    assert_eq!(engine.appointments_for_date(d(WEDNESDAY)).await.unwrap(), vec![edited]);
}

#[tokio::test]
async fn edit_overlapping_its_own_slot() {
    let engine = test_engine("edit_self.wal");
    let a = engine.book("ana", &req("cut", MONDAY, "10:00")).await.unwrap();
    let moved = engine
        .book("ana", &edit_of(a.id, "cut", MONDAY, "10:15"))
        .await
        .unwrap();
    assert_eq!((moved.start_time, moved.end_time), (t("10:15"), t("10:45")));
}

#[tokio::test]
async fn edit_after_confirmation_is_rejected() {
    let engine = test_engine("edit_confirmed.wal");
    let a = engine.book("ana", &req("cut", MONDAY, "10:00")).await.unwrap();
    engine.set_status(a.id, Confirmed).await.unwrap();

    let err = engine
        .book("ana", &edit_of(a.id, "cut", MONDAY, "14:00"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::InvalidTransition {
            id: a.id,
            from: Confirmed,
            attempted: None
        }
    );
}

#[tokio::test]
async fn edit_of_other_clients_appointment_is_not_found() {
    let engine = test_engine("edit_ownership.wal");
    let a = engine.book("ana", &req("cut", MONDAY, "10:00")).await.unwrap();
    let err = engine
        .book("bia", &edit_of(a.id, "cut", MONDAY, "12:00"))
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::appointment_not_found(a.id));

    let err = engine
        .book("ana", &edit_of(Ulid::new(), "cut", MONDAY, "12:00"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "not_found");
}

#[tokio::test]
async fn cancelled_slot_is_free_again() {
    let engine = test_engine("cancel_rebook.wal");
    let a = engine.book("ana", &req("cut", MONDAY, "10:00")).await.unwrap();
    let cancelled = engine.set_status(a.id, Cancelled).await.unwrap();
    assert!(cancelled.is_cancelled());

    assert_ok!(engine.book("bia", &req("cut", MONDAY, "10:00")).await);
    assert_eq!(engine.appointments_for_date(d(MONDAY)).await.unwrap().len(), 2);
}

#[tokio::test]
async fn status_transitions_follow_table() {
    let engine = test_engine("status.wal");
    let a = engine.book("ana", &req("cut", MONDAY, "10:00")).await.unwrap();

    let err = engine.set_status(a.id, Completed).await.unwrap_err();
    assert_eq!(
        err,
        EngineError::InvalidTransition {
            id: a.id,
            from: AwaitingConfirmation,
            attempted: Some(Completed)
        }
    );

    engine.set_status(a.id, Confirmed).await.unwrap();
    let done = engine.set_status(a.id, Completed).await.unwrap();
    assert_eq!(done.status, Completed);
    assert!(engine.set_status(a.id, Cancelled).await.is_err());

    let err = engine.set_status(Ulid::new(), Confirmed).await.unwrap_err();
    assert_eq!(err.kind(), "not_found");
}

#[tokio::test]
async fn status_change_read_before_an_edit_is_stale() {
    let engine = test_engine("stale_status.wal");
    let a = engine.book("ana", &req("cut", MONDAY, "10:00")).await.unwrap();

    // Derived from `a`, committed only after the client moved it.
    let confirm = lifecycle::apply_transition(&a, Confirmed, Utc::now()).unwrap();
    let mut moved = edit_of(a.id, "cut", MONDAY, "14:00");
    moved.note = "moved".into();
    engine.book("ana", &moved).await.unwrap();

    let err = engine.commit(&confirm, false).await.unwrap_err();
    assert_eq!(err, EngineError::StaleWrite(a.id));
    assert_eq!(err.kind(), "stale_write");

    let stored = engine.store.fetch_appointment(a.id).await.unwrap().unwrap();
    assert_eq!(stored.start_time, t("14:00"));
    assert_eq!(stored.note, "moved");
    assert_eq!(stored.status, AwaitingConfirmation);
    assert_eq!(stored.version, 2);

    let confirmed = assert_ok!(engine.set_status(a.id, Confirmed).await);
    assert_eq!(confirmed.start_time, t("14:00"));
    assert_eq!(confirmed.version, 3);
}

#[tokio::test]
async fn concurrent_bookings_have_one_winner() {
    let engine = Arc::new(test_engine("race.wal"));
    let mut handles = Vec::new();
    for i in 0..12 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .book(&format!("client-{i}"), &req("cut", MONDAY, "15:00"))
                .await
        }));
    }
    let results: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|h| h.unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(err.is_slot_taken(), "unexpected error: {err:?}");
    }
    assert_eq!(engine.appointments_for_date(d(MONDAY)).await.unwrap().len(), 1);
}

#[tokio::test]
async fn client_listing_is_sorted_and_filtered() {
    let engine = test_engine("client_listing.wal");
    engine.book("ana", &req("cut", MONDAY, "09:00")).await.unwrap();
    engine.book("ana", &req("color", MONDAY, "14:00")).await.unwrap();
    engine.book("ana", &req("cut", WEDNESDAY, "10:00")).await.unwrap();
    engine.book("bia", &req("cut", MONDAY, "11:00")).await.unwrap();

    let all = engine
        .client_appointments("ana", &AppointmentFilter::default())
        .await
        .unwrap();
    let order: Vec<(NaiveDate, ClockTime)> = all.iter().map(|a| (a.date, a.start_time)).collect();
    assert_eq!(
        order,
        vec![
            (d(WEDNESDAY), t("10:00")),
            (d(MONDAY), t("14:00")),
            (d(MONDAY), t("09:00")),
        ]
    );

    let filter = AppointmentFilter {
        date: Some(d(MONDAY)),
        service_id: Some("cut".into()),
    };
    let only = engine.client_appointments("ana", &filter).await.unwrap();
    assert_eq!(only.len(), 1);
    assert_eq!(only[0].start_time, t("09:00"));

    assert!(engine
        .client_appointments("nobody", &AppointmentFilter::default())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn open_slots_reflect_bookings() {
    let engine = test_engine("open_slots.wal");
    let before = engine.open_slots(d(MONDAY), "cut", None).await.unwrap();
    assert!(before.contains(&t("10:00")));
    assert_eq!(before.first(), Some(&t("09:00")));
    assert_eq!(before.last(), Some(&t("17:30")));

    let a = engine.book("ana", &req("cut", MONDAY, "10:00")).await.unwrap();
    let after = engine.open_slots(d(MONDAY), "cut", None).await.unwrap();
    assert!(!after.contains(&t("10:00")));
    assert_eq!(after.len(), before.len() - 1);

    let for_edit = engine.open_slots(d(MONDAY), "cut", Some(a.id)).await.unwrap();
    assert_eq!(for_edit, before);

    assert!(engine.open_slots(d(TUESDAY), "cut", None).await.unwrap().is_empty());
    assert_eq!(engine.candidate_slots().len(), 26);
}

#[tokio::test]
async fn watchers_see_their_own_changes() {
    let engine = test_engine("notify.wal");
    let mut ana = engine.notify.subscribe("ana");
    let mut bia = engine.notify.subscribe("bia");

    let a = engine.book("ana", &req("cut", MONDAY, "10:00")).await.unwrap();
    engine.set_status(a.id, Confirmed).await.unwrap();

    let first = ana.recv().await.unwrap();
    assert_eq!(first.id, a.id);
    assert_eq!(first.status, AwaitingConfirmation);
    assert_eq!(ana.recv().await.unwrap().status, Confirmed);
    assert!(bia.try_recv().is_err());
}

#[tokio::test]
async fn rejected_bookings_do_not_notify() {
    let engine = test_engine("notify_rejected.wal");
    let mut rx = engine.notify.subscribe("ana");
    assert_err!(engine.book("ana", &req("cut", TUESDAY, "10:00")).await);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn input_limits() {
    let engine = test_engine("limits.wal");
    let mut long_note = req("cut", MONDAY, "10:00");
    long_note.note = "x".repeat(MAX_NOTE_LEN + 1);
    assert_eq!(
        engine.book("ana", &long_note).await.unwrap_err().kind(),
        "limit_exceeded"
    );

    let long_client = "c".repeat(MAX_CLIENT_ID_LEN + 1);
    assert_eq!(
        engine
            .book(&long_client, &req("cut", MONDAY, "10:00"))
            .await
            .unwrap_err()
            .kind(),
        "limit_exceeded"
    );
    assert_eq!(
        engine.book("", &req("cut", MONDAY, "10:00")).await.unwrap_err().kind(),
        "invalid_request"
    );
}

#[tokio::test]
async fn settings_changes_apply_immediately() {
    let settings = Arc::new(SettingsSource::new(SalonSettings::from_json(SETTINGS).unwrap()));
    let store = WalStore::open(&test_wal_path("live_settings.wal")).unwrap();
    let engine = Engine::new(settings.clone(), Arc::new(store), Arc::new(NotifyHub::new()));
    assert_ok!(engine.check(&req("cut", MONDAY, "10:00")).await);

    let mut closed = SalonSettings::from_json(SETTINGS).unwrap();
    closed.holidays.insert(
        d(MONDAY),
        Holiday {
            active: true,
            reason: Some("Inventory".into()),
        },
    );
    settings.replace(closed).await.unwrap();

    let err = assert_err!(engine.check(&req("cut", MONDAY, "10:00")).await);
    assert_eq!(err.to_string(), "Inventory");
}

#[tokio::test]
async fn bookings_survive_restart() {
    let path = test_wal_path("restart.wal");
    let settings = || Arc::new(SettingsSource::new(SalonSettings::from_json(SETTINGS).unwrap()));
    let booked = {
        let engine = Engine::new(
            settings(),
            Arc::new(WalStore::open(&path).unwrap()),
            Arc::new(NotifyHub::new()),
        );
        let a = engine.book("ana", &req("cut", MONDAY, "10:00")).await.unwrap();
        engine.set_status(a.id, Confirmed).await.unwrap()
    };

    let engine = Engine::new(
        settings(),
        Arc::new(WalStore::open(&path).unwrap()),
        Arc::new(NotifyHub::new()),
    );
    assert_eq!(engine.appointments_for_date(d(MONDAY)).await.unwrap(), vec![booked]);
    let err = engine.book("bia", &req("cut", MONDAY, "10:15")).await.unwrap_err();
    assert!(err.is_slot_taken());
}
