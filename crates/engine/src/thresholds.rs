//! Threshold store: the zone's operating bands plus per-plant moisture
//! bands, refreshed from the remote service.
//!
//! The service answers for a whole zone at once with its plant list. Each
//! rostered plant takes its moisture band from its own entry; the zone-wide
//! bands come from the first rostered plant's entry. A refresh is
//! all-or-nothing: if the response is malformed or any rostered plant is
//! missing from it, nothing is committed. Until the first successful
//! refresh, [`ThresholdStore::get`] answers with the caller's defaults.

use serde::Deserialize;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::model::{Quantity, ThresholdSet, Thresholds};
use crate::plants::{PlantSet, MAX_PLANTS};
use crate::ports::RemoteConfigProvider;

// ---------------------------------------------------------------------------
// Wire payload
// ---------------------------------------------------------------------------

/// One entry of the zone's plant list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemotePlant {
    pub plant_id: String,
    /// Probe channel as registered on the server. Informational; the local
    /// roster decides which channel is read.
    #[serde(default)]
    pub moisture_pin: Option<i64>,
    pub thresholds: ThresholdSet,
}

/// Body of `GET /api/v1/zones/{zone}/plants`:
/// `{"plants": [{"plantId", "moisturePin", "thresholds": {...}}, ...]}`.
/// Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ThresholdPayload {
    pub plants: Vec<RemotePlant>,
}

impl ThresholdPayload {
    /// Decode and validate a response body. Either every entry's bands are
    /// usable or the whole payload is rejected.
    pub fn parse(body: &[u8]) -> Result<Self, FetchError> {
        let payload: Self =
            serde_json::from_slice(body).map_err(|e| FetchError::Parse(e.to_string()))?;
        for plant in &payload.plants {
            if let Some(band) = plant.thresholds.first_invalid() {
                return Err(FetchError::Invalid(format!(
                    "plant '{}': {band} band must be finite with min <= max",
                    plant.plant_id
                )));
            }
        }
        Ok(payload)
    }

    pub fn plant(&self, plant_id: &str) -> Option<&RemotePlant> {
        self.plants.iter().find(|p| p.plant_id == plant_id)
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct ThresholdStore {
    zone_id: String,
    current: ThresholdSet,
    plants: PlantSet,
    last_refreshed: Option<OffsetDateTime>,
}

impl ThresholdStore {
    pub fn new(zone_id: impl Into<String>, defaults: ThresholdSet, plants: PlantSet) -> Self {
        Self {
            zone_id: zone_id.into(),
            current: defaults,
            plants,
            last_refreshed: None,
        }
    }

    pub fn zone_id(&self) -> &str {
        &self.zone_id
    }

    /// Zone band for `quantity`. Never fails.
    pub fn get(&self, quantity: Quantity) -> Thresholds {
        self.current.get(quantity)
    }

    pub fn current(&self) -> &ThresholdSet {
        &self.current
    }

    pub fn plants(&self) -> &PlantSet {
        &self.plants
    }

    /// The plant's own moisture band, or the zone's when the plant has none
    /// yet.
    pub fn plant_moisture(&self, slot: usize) -> Thresholds {
        self.plants
            .get(slot)
            .and_then(|p| p.moisture)
            .unwrap_or(self.current.moisture)
    }

    pub fn last_refreshed(&self) -> Option<OffsetDateTime> {
        self.last_refreshed
    }

    /// Whether any refresh has succeeded yet.
    pub fn is_fresh(&self) -> bool {
        self.last_refreshed.is_some()
    }

    /// Fetch the zone's plant list and commit every band from it together.
    pub async fn refresh<R: RemoteConfigProvider>(&mut self, remote: &R) -> Result<(), FetchError> {
        let payload = match remote.fetch_thresholds(&self.zone_id).await {
            Ok(payload) => payload,
            Err(e) => {
                warn!(zone = %self.zone_id, error = %e, "threshold fetch failed; keeping previous values");
                return Err(e);
            }
        };
        debug!(zone = %self.zone_id, entries = payload.plants.len(), "zone plant list fetched");

        let (zone, staged) = match self.stage(&payload) {
            Ok(staged) => staged,
            Err(e) => {
                warn!(zone = %self.zone_id, error = %e, "threshold response rejected; keeping previous values");
                return Err(e);
            }
        };

        self.current = zone;
        for (slot, moisture) in staged {
            if let Some(plant) = self.plants.get_mut(slot) {
                plant.moisture = Some(moisture);
            }
        }
        self.last_refreshed = Some(OffsetDateTime::now_utc());

        info!(
            zone = %self.zone_id,
            plants = self.plants.len(),
            temp_max = self.current.temperature.max,
            light_min = self.current.light.min,
            "thresholds refreshed"
        );
        Ok(())
    }

    /// Match every rostered plant against the response without touching
    /// committed values.
    fn stage(
        &self,
        payload: &ThresholdPayload,
    ) -> Result<(ThresholdSet, heapless::Vec<(usize, Thresholds), MAX_PLANTS>), FetchError> {
        let mut staged: heapless::Vec<(usize, Thresholds), MAX_PLANTS> = heapless::Vec::new();
        let mut zone = None;
        for (slot, profile) in self.plants.iter() {
            let entry = payload.plant(&profile.plant_id).ok_or_else(|| {
                FetchError::Invalid(format!(
                    "plant '{}' missing from zone response",
                    profile.plant_id
                ))
            })?;
            zone.get_or_insert(entry.thresholds);
            // Capacity matches the roster, so this cannot overflow.
            let _ = staged.push((slot, entry.thresholds.moisture));
        }

        let zone = zone
            .or_else(|| payload.plants.first().map(|p| p.thresholds))
            .ok_or_else(|| FetchError::Invalid("zone response lists no plants".into()))?;
        Ok((zone, staged))
    }
}

// ===========================================================================
// Tests
// ===========================================================================
