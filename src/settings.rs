use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::limits::{MAX_SERVICE_DURATION_MINUTES, MAX_SERVICE_ID_LEN};
use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    Io(String),
    Malformed(String),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Io(e) => write!(f, "settings I/O: {e}"),
            SourceError::Malformed(e) => write!(f, "malformed settings: {e}"),
        }
    }
}

impl std::error::Error for SourceError {}

/// Where services, weekly hours and holidays come from.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Active services in display order.
    async fn fetch_active_services(&self) -> Result<Vec<Service>, SourceError>;
    async fn fetch_weekly_schedule(&self) -> Result<WeeklySchedule, SourceError>;
    async fn fetch_holidays(&self) -> Result<Holidays, SourceError>;
}

/// Everything the salon administrator configures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalonSettings {
    #[serde(default)]
    pub services: Vec<Service>,
    #[serde(default)]
    pub schedule: WeeklySchedule,
    #[serde(default)]
    pub holidays: Holidays,
}

impl SalonSettings {
    pub fn from_json(raw: &str) -> Result<Self, SourceError> {
        let settings: SalonSettings =
            serde_json::from_str(raw).map_err(|e| SourceError::Malformed(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self, SourceError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SourceError::Io(format!("{}: {e}", path.display())))?;
        Self::from_json(&raw)
    }

    pub fn validate(&self) -> Result<(), SourceError> {
        let mut seen = std::collections::HashSet::new();
        for service in &self.services {
            if service.id.is_empty() || service.id.len() > MAX_SERVICE_ID_LEN {
                return Err(SourceError::Malformed(format!("bad service id {:?}", service.id)));
            }
            if !seen.insert(service.id.as_str()) {
                return Err(SourceError::Malformed(format!("duplicate service id {}", service.id)));
            }
            if service.duration_minutes == 0
                || service.duration_minutes > MAX_SERVICE_DURATION_MINUTES
            {
                return Err(SourceError::Malformed(format!(
                    "service {} has duration {} minutes",
                    service.id, service.duration_minutes
                )));
            }
            if service.price < Decimal::ZERO {
                return Err(SourceError::Malformed(format!(
                    "service {} has a negative price",
                    service.id
                )));
            }
        }
        for (weekday, hours) in self.schedule.iter() {
            if hours.active && hours.open >= hours.close {
                return Err(SourceError::Malformed(format!(
                    "{weekday}: open {} is not before close {}",
                    hours.open, hours.close
                )));
            }
        }
        Ok(())
    }
}

/// Settings held in memory, loaded from a JSON file and swappable at runtime.
pub struct SettingsSource {
    settings: RwLock<SalonSettings>,
}

impl SettingsSource {
    pub fn new(settings: SalonSettings) -> Self {
        Self {
            settings: RwLock::new(settings),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, SourceError> {
        Ok(Self::new(SalonSettings::load(path)?))
    }

    /// Replace the whole configuration after validating it.
    pub async fn replace(&self, settings: SalonSettings) -> Result<(), SourceError> {
        settings.validate()?;
        *self.settings.write().await = settings;
        Ok(())
    }
}

#[async_trait]
impl ConfigSource for SettingsSource {
    async fn fetch_active_services(&self) -> Result<Vec<Service>, SourceError> {
        let settings = self.settings.read().await;
        Ok(settings.services.iter().filter(|s| s.active).cloned().collect())
    }

    async fn fetch_weekly_schedule(&self) -> Result<WeeklySchedule, SourceError> {
        Ok(self.settings.read().await.schedule.clone())
    }

    async fn fetch_holidays(&self) -> Result<Holidays, SourceError> {
        Ok(self.settings.read().await.holidays.clone())
    }
}
