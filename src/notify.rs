use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::Appointment;

const CHANNEL_CAPACITY: usize = 256;

/// Per-client broadcast of appointment changes, for live listings.
pub struct NotifyHub {
    channels: DashMap<String, broadcast::Sender<Appointment>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a client's changes. Creates the channel if needed.
    pub fn subscribe(&self, client_id: &str) -> broadcast::Receiver<Appointment> {
        self.channels
            .entry(client_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// No-op if nobody is listening.
    pub fn send(&self, appointment: &Appointment) {
        if let Some(sender) = self.channels.get(&appointment.client_id) {
            let _ = sender.send(appointment.clone());
        }
    }

    /// Drop channels whose subscribers have all gone away.
    pub fn prune(&self) {
        self.channels.retain(|_, sender| sender.receiver_count() > 0);
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}
