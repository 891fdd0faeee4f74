//! Boundary to whatever actually fires alerts.
//!
//! The engine never talks to a platform notification center directly; it is
//! handed a [`DeliveryCapability`] and drives it with clear-then-fill runs.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::calendar::stamp_serde;
use crate::planner::SchedulingDirective;

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("pending alert limit of {limit} reached")]
    CapacityExceeded { limit: usize },

    #[error("alert delivery is not authorized")]
    NotAuthorized,

    #[error("alert {identifier} rejected: {reason}")]
    Rejected { identifier: String, reason: String },

    #[error("alert storage failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("alert encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// An alert as held by the delivery side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAlert {
    pub identifier: String,
    #[serde(with = "stamp_serde")]
    pub fire_at: DateTime<Utc>,
    pub title: String,
    pub body: String,
}

impl From<&SchedulingDirective> for PendingAlert {
    fn from(directive: &SchedulingDirective) -> Self {
        Self {
            identifier: directive.identifier.clone(),
            fire_at: directive.fire_at,
            title: directive.title.clone(),
            body: directive.body.clone(),
        }
    }
}

pub trait DeliveryCapability {
    /// Removes every pending alert. Clearing an empty schedule is a no-op.
    fn clear_all(&mut self) -> Result<(), DeliveryError>;

    /// Registers one alert, replacing any pending alert with the same
    /// identifier.
    fn schedule(&mut self, alert: PendingAlert) -> Result<(), DeliveryError>;

    /// Pending alerts ordered by fire time.
    fn pending(&self) -> Result<Vec<PendingAlert>, DeliveryError>;
}

/// In-process delivery; used for dry runs and as a recording test double.
#[derive(Debug, Clone)]
pub struct MemoryDelivery {
    alerts: BTreeMap<String, PendingAlert>,
    capacity: Option<usize>,
    authorized: bool,
    clear_count: usize,
}

impl Default for MemoryDelivery {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDelivery {
    pub fn new() -> Self {
        Self {
            alerts: BTreeMap::new(),
            capacity: None,
            authorized: true,
            clear_count: 0,
        }
    }

    pub fn with_capacity(mut self, limit: usize) -> Self {
        self.capacity = Some(limit);
        self
    }

    pub fn unauthorized(mut self) -> Self {
        self.authorized = false;
        self
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    pub fn get(&self, identifier: &str) -> Option<&PendingAlert> {
        self.alerts.get(identifier)
    }

    /// How many times the schedule has been cleared.
    pub fn clear_count(&self) -> usize {
        self.clear_count
    }
}

impl DeliveryCapability for MemoryDelivery {
    fn clear_all(&mut self) -> Result<(), DeliveryError> {
        debug!(removed = self.alerts.len(), "clearing in-memory alerts");
        self.alerts.clear();
        self.clear_count += 1;
        Ok(())
    }

    fn schedule(&mut self, alert: PendingAlert) -> Result<(), DeliveryError> {
        if !self.authorized {
            return Err(DeliveryError::NotAuthorized);
        }
        check_capacity(self.capacity, &self.alerts, &alert.identifier)?;
        self.alerts.insert(alert.identifier.clone(), alert);
        Ok(())
    }

    fn pending(&self) -> Result<Vec<PendingAlert>, DeliveryError> {
        Ok(sorted_by_fire_time(&self.alerts))
    }
}

/// Rejects a new identifier once `limit` alerts are pending; replacing an
/// existing identifier is always allowed.
pub(crate) fn check_capacity(
    capacity: Option<usize>,
    alerts: &BTreeMap<String, PendingAlert>,
    identifier: &str,
) -> Result<(), DeliveryError> {
    match capacity {
        Some(limit) if alerts.len() >= limit && !alerts.contains_key(identifier) => {
            Err(DeliveryError::CapacityExceeded { limit })
        }
        _ => Ok(()),
    }
}

pub(crate) fn sorted_by_fire_time(alerts: &BTreeMap<String, PendingAlert>) -> Vec<PendingAlert> {
    let mut out: Vec<PendingAlert> = alerts.values().cloned().collect();
    out.sort_by(|a, b| {
        a.fire_at
            .cmp(&b.fire_at)
            .then_with(|| a.identifier.cmp(&b.identifier))
    });
    out
}
