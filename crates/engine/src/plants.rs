//! Fixed-capacity plant roster.

use heapless::Vec;
use serde::Serialize;

use crate::error::CapacityError;
use crate::model::Thresholds;

/// Number of soil probes one device can serve.
pub const MAX_PLANTS: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlantProfile {
    pub plant_id: String,
    pub sensor_pin: u8,
    /// Per-plant moisture band. `None` until the first successful refresh.
    pub moisture: Option<Thresholds>,
}

impl PlantProfile {
    pub fn new(plant_id: impl Into<String>, sensor_pin: u8) -> Self {
        Self {
            plant_id: plant_id.into(),
            sensor_pin,
            moisture: None,
        }
    }
}

/// Plants indexed by slot. Slots are assigned in insertion order and never
/// move.
#[derive(Debug, Clone, Default)]
pub struct PlantSet {
    plants: Vec<PlantProfile, MAX_PLANTS>,
}

impl PlantSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plant and return its slot.
    pub fn insert(&mut self, profile: PlantProfile) -> Result<usize, CapacityError> {
        if self.plants.iter().any(|p| p.plant_id == profile.plant_id) {
            return Err(CapacityError::Duplicate(profile.plant_id));
        }
        self.plants.push(profile).map_err(|_| CapacityError::Full {
            capacity: MAX_PLANTS,
        })?;
        Ok(self.plants.len() - 1)
    }

    pub fn get(&self, slot: usize) -> Option<&PlantProfile> {
        self.plants.get(slot)
    }

    pub(crate) fn get_mut(&mut self, slot: usize) -> Option<&mut PlantProfile> {
        self.plants.get_mut(slot)
    }

    pub fn slot_of(&self, plant_id: &str) -> Option<usize> {
        self.plants.iter().position(|p| p.plant_id == plant_id)
    }

    /// `(slot, profile)` pairs in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &PlantProfile)> {
        self.plants.iter().enumerate()
    }

    pub fn len(&self) -> usize {
        self.plants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plants.is_empty()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
