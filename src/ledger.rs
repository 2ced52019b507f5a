//! Resource ledger
//!
//! Arena of facility resource units addressed by id. Every state change goes
//! through [`ResourceLedger::transition`], which holds the unit's own lock for
//! the whole check-and-set, so transitions are linearizable per unit.
//!
//! ```text
//! AVAILABLE --reserve--> RESERVED --commit--> OCCUPIED
//!     ^                     |                    |
//!     +------release--------+--------------------+
//! any --mark_maintenance--> MAINTENANCE --release--> AVAILABLE
//! ```

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::TriageError;
use crate::types::{AlertId, ResourceAvailability, ResourceStatus, ResourceType, ResourceUnit};

#[derive(Debug, Default)]
struct Arena {
    /// Registration order, used for "first available" lookups
    order: Vec<String>,
    units: HashMap<String, Arc<Mutex<ResourceUnit>>>,
}

/// Thread-safe ledger of resource units
#[derive(Debug, Default)]
pub struct ResourceLedger {
    arena: RwLock<Arena>,
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a ledger from a seed list of units
    pub fn with_units(units: impl IntoIterator<Item = ResourceUnit>) -> Result<Self, TriageError> {
        let ledger = Self::new();
        for unit in units {
            ledger.register(unit)?;
        }
        Ok(ledger)
    }

    /// Add a unit; ids must be unique.
    pub fn register(&self, unit: ResourceUnit) -> Result<(), TriageError> {
        let mut arena = self.arena.write();
        if arena.units.contains_key(&unit.id) {
            return Err(TriageError::conflict(&unit.id, "resource already registered"));
        }
        tracing::debug!(
            resource_id = %unit.id,
            resource_type = %unit.resource_type,
            "Resource registered"
        );
        arena.order.push(unit.id.clone());
        arena
            .units
            .insert(unit.id.clone(), Arc::new(Mutex::new(unit)));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.arena.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of one unit
    pub fn get(&self, resource_id: &str) -> Result<ResourceUnit, TriageError> {
        Ok(self.slot(resource_id)?.lock().clone())
    }

    /// Snapshot of all units in registration order
    pub fn units(&self) -> Vec<ResourceUnit> {
        self.slots().iter().map(|slot| slot.lock().clone()).collect()
    }

    /// First AVAILABLE unit of a type, in registration order
    pub fn first_available(&self, resource_type: ResourceType) -> Option<ResourceUnit> {
        self.slots().iter().find_map(|slot| {
            let unit = slot.lock();
            (unit.resource_type == resource_type && unit.status == ResourceStatus::Available)
                .then(|| unit.clone())
        })
    }

    /// Per-type counts for every resource type
    pub fn availability(&self) -> Vec<ResourceAvailability> {
        let mut counts: Vec<ResourceAvailability> = ResourceType::ALL
            .iter()
            .map(|&resource_type| ResourceAvailability {
                resource_type,
                total: 0,
                available: 0,
                reserved: 0,
                occupied: 0,
                maintenance: 0,
            })
            .collect();

        for unit in self.units() {
            if let Some(entry) = counts
                .iter_mut()
                .find(|c| c.resource_type == unit.resource_type)
            {
                entry.total += 1;
                match unit.status {
                    ResourceStatus::Available => entry.available += 1,
                    ResourceStatus::Reserved => entry.reserved += 1,
                    ResourceStatus::Occupied => entry.occupied += 1,
                    ResourceStatus::Maintenance => entry.maintenance += 1,
                }
            }
        }
        counts
    }

    /// AVAILABLE -> RESERVED for an alert. Losing a race yields `Conflict`.
    pub fn reserve(
        &self,
        resource_id: &str,
        alert_id: AlertId,
    ) -> Result<ResourceUnit, TriageError> {
        self.transition(resource_id, "reserve", |unit| {
            if unit.status != ResourceStatus::Available {
                return Err(TriageError::conflict(
                    &unit.id,
                    format!("resource is {}", unit.status),
                ));
            }
            unit.status = ResourceStatus::Reserved;
            unit.assigned_alert_id = Some(alert_id);
            Ok(())
        })
    }

    /// RESERVED -> OCCUPIED
    pub fn commit(&self, resource_id: &str) -> Result<ResourceUnit, TriageError> {
        self.transition(resource_id, "commit", |unit| {
            if unit.status != ResourceStatus::Reserved {
                return Err(TriageError::invalid_state(
                    "resource",
                    &unit.id,
                    format!("cannot commit a {} resource", unit.status),
                ));
            }
            unit.status = ResourceStatus::Occupied;
            Ok(())
        })
    }

    /// RESERVED / OCCUPIED / MAINTENANCE -> AVAILABLE, clearing the assignment
    pub fn release(&self, resource_id: &str) -> Result<ResourceUnit, TriageError> {
        self.transition(resource_id, "release", |unit| {
            if unit.status == ResourceStatus::Available {
                return Err(TriageError::invalid_state(
                    "resource",
                    &unit.id,
                    "resource is already available",
                ));
            }
            unit.status = ResourceStatus::Available;
            unit.assigned_alert_id = None;
            Ok(())
        })
    }

    /// Any state -> MAINTENANCE
    pub fn mark_maintenance(&self, resource_id: &str) -> Result<ResourceUnit, TriageError> {
        self.transition(resource_id, "maintenance", |unit| {
            unit.status = ResourceStatus::Maintenance;
            unit.assigned_alert_id = None;
            Ok(())
        })
    }

    /// Single choke point for unit mutations.
    fn transition<F>(
        &self,
        resource_id: &str,
        operation: &'static str,
        apply: F,
    ) -> Result<ResourceUnit, TriageError>
    where
        F: FnOnce(&mut ResourceUnit) -> Result<(), TriageError>,
    {
        let slot = self.slot(resource_id)?;
        let mut unit = slot.lock();
        let from = unit.status;

        if let Err(e) = apply(&mut *unit) {
            tracing::debug!(resource_id, operation, error = %e, "Resource transition rejected");
            return Err(e);
        }

        tracing::info!(
            resource_id,
            operation,
            from = %from,
            to = %unit.status,
            alert_id = ?unit.assigned_alert_id,
            "Resource transition"
        );
        Ok(unit.clone())
    }

    fn slot(&self, resource_id: &str) -> Result<Arc<Mutex<ResourceUnit>>, TriageError> {
        self.arena
            .read()
            .units
            .get(resource_id)
            .cloned()
            .ok_or_else(|| TriageError::not_found("resource", resource_id))
    }

    fn slots(&self) -> Vec<Arc<Mutex<ResourceUnit>>> {
        let arena = self.arena.read();
        arena
            .order
            .iter()
            .filter_map(|id| arena.units.get(id).cloned())
            .collect()
    }
}
