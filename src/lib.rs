pub mod calendar;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod protocol;
pub mod reaper;
pub mod settings;
pub mod slots;
pub mod store;
pub mod wal;
pub mod wire;
