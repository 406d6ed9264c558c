//! Event models

use serde::{Deserialize, Serialize};
use sums_models::EcuRecord;

use crate::errors::LifecycleError;

/// Whether an event declares the software state before or after the update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Source,
    Target,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Source => "SOURCE",
            EventKind::Target => "TARGET",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ECU of an event's software declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ecu {
    pub name: String,
    pub part_number: String,
    pub version: String,
}

impl From<&Ecu> for EcuRecord {
    fn from(ecu: &Ecu) -> Self {
        EcuRecord {
            ecu_name: ecu.name.clone(),
            part_number: ecu.part_number.clone(),
            sw_version: ecu.version.clone(),
        }
    }
}

/// A software state declaration registered with the backend
///
/// Once locked the event is immutable: every mutator returns
/// [`LifecycleError::Immutable`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    event_id: String,
    kind: EventKind,
    vehicle_id: String,
    build_level: String,
    ecu_list: Vec<Ecu>,
    locked: bool,
}

impl Event {
    pub(crate) fn new(
        event_id: String,
        kind: EventKind,
        vehicle_id: String,
        build_level: String,
        ecu_list: Vec<Ecu>,
    ) -> Self {
        Self {
            event_id,
            kind,
            vehicle_id,
            build_level,
            ecu_list,
            locked: false,
        }
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn vehicle_id(&self) -> &str {
        &self.vehicle_id
    }

    pub fn build_level(&self) -> &str {
        &self.build_level
    }

    pub fn ecu_list(&self) -> &[Ecu] {
        &self.ecu_list
    }

    pub fn locked(&self) -> bool {
        self.locked
    }

    /// Copy of this event marked as locked
    pub(crate) fn to_locked(&self) -> Self {
        Self {
            locked: true,
            ..self.clone()
        }
    }

    fn ensure_mutable(&self) -> Result<(), LifecycleError> {
        if self.locked {
            return Err(LifecycleError::Immutable {
                event_id: self.event_id.clone(),
            });
        }
        Ok(())
    }

    /// Replace the ECU list of an unlocked event
    pub fn set_ecu_list(&mut self, ecu_list: Vec<Ecu>) -> Result<(), LifecycleError> {
        self.ensure_mutable()?;
        self.ecu_list = ecu_list;
        Ok(())
    }

    /// Change the build level of an unlocked event
    pub fn set_build_level(&mut self, build_level: impl Into<String>) -> Result<(), LifecycleError> {
        self.ensure_mutable()?;
        self.build_level = build_level.into();
        Ok(())
    }
}
