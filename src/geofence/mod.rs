//! Proximity-trigger registry.
//!
//! Wraps an OS-style geofence transport and remembers, per drop id, which
//! region is active and the content snapshot to hand over when it fires.

mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::drops::DropSnapshot;
use crate::error::TransportError;

pub use self::memory::MemoryGeofenceTransport;

/// Trigger sensitivity for every drop region, independent of the sync radius.
pub const GEOFENCE_RADIUS_METERS: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transition {
    Enter,
}

/// Region as handed to the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeofenceRegion {
    pub id: String,
    pub lat: f64,
    pub lng: f64,
    pub radius_meters: f64,
    pub transition: Transition,
    /// `None` never expires
    pub expiration_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeofenceRegistration {
    pub region: GeofenceRegion,
    pub snapshot: DropSnapshot,
}

impl GeofenceRegistration {
    /// Region centered on the drop itself with the fixed trigger radius.
    pub fn for_drop(snapshot: DropSnapshot) -> Self {
        Self {
            region: GeofenceRegion {
                id: snapshot.drop_id.clone(),
                lat: snapshot.lat,
                lng: snapshot.lng,
                radius_meters: GEOFENCE_RADIUS_METERS,
                transition: Transition::Enter,
                expiration_ms: None,
            },
            snapshot,
        }
    }

    pub fn id(&self) -> &str {
        &self.region.id
    }
}

/// An ENTER event resolved to the drop it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeofenceTrigger {
    pub drop_id: String,
    pub snapshot: DropSnapshot,
}

/// External proximity-trigger service.
///
/// Adding a region whose id is already registered replaces it.
#[async_trait]
pub trait GeofenceTransport: Send + Sync {
    async fn add_geofences(&self, regions: &[GeofenceRegion]) -> Result<(), TransportError>;

    async fn remove_geofences(&self, ids: &[String]) -> Result<(), TransportError>;
}

pub struct GeofenceRegistry {
    transport: Arc<dyn GeofenceTransport>,
    active: Mutex<HashMap<String, GeofenceRegistration>>,
}

impl GeofenceRegistry {
    pub fn new(transport: Arc<dyn GeofenceTransport>) -> Self {
        Self {
            transport,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub async fn add(&self, registration: GeofenceRegistration) -> Result<(), TransportError> {
        self.add_batch(vec![registration]).await.map(|_| ())
    }

    /// Register all regions in one transport call.
    ///
    /// Duplicate ids within the batch collapse to the last one. Returns the
    /// number of distinct regions registered.
    pub async fn add_batch(
        &self,
        registrations: Vec<GeofenceRegistration>,
    ) -> Result<usize, TransportError> {
        let mut by_id: HashMap<String, GeofenceRegistration> = HashMap::new();
        let mut order = Vec::new();
        for registration in registrations {
            if !by_id.contains_key(registration.id()) {
                order.push(registration.id().to_string());
            }
            by_id.insert(registration.id().to_string(), registration);
        }

        if order.is_empty() {
            return Ok(0);
        }

        let regions: Vec<GeofenceRegion> = order
            .iter()
            .filter_map(|id| by_id.get(id))
            .map(|r| r.region.clone())
            .collect();

        self.transport.add_geofences(&regions).await?;

        let count = by_id.len();
        self.active.lock().await.extend(by_id);
        tracing::info!("Registered {} geofence(s)", count);

        Ok(count)
    }

    /// Remove the region for `id`. Unknown ids succeed silently.
    pub async fn remove(&self, id: &str) -> Result<(), TransportError> {
        let known = self.active.lock().await.remove(id).is_some();
        if !known {
            tracing::debug!("Geofence {} not active, nothing to remove", id);
            return Ok(());
        }

        self.transport.remove_geofences(&[id.to_string()]).await
    }

    /// Retract every active region whose id is not in `keep`, in one
    /// transport call. Returns the number retired.
    pub async fn retain(&self, keep: &HashSet<String>) -> Result<usize, TransportError> {
        let stale: Vec<String> = self
            .active
            .lock()
            .await
            .keys()
            .filter(|id| !keep.contains(*id))
            .cloned()
            .collect();

        if stale.is_empty() {
            return Ok(0);
        }

        self.transport.remove_geofences(&stale).await?;

        let mut active = self.active.lock().await;
        for id in &stale {
            active.remove(id);
        }
        tracing::info!("Retired {} stale geofence(s)", stale.len());

        Ok(stale.len())
    }

    /// Resolve triggering ids to their snapshots. Unknown ids are skipped.
    pub async fn on_enter(&self, triggering_ids: &[String]) -> Vec<GeofenceTrigger> {
        let active = self.active.lock().await;
        triggering_ids
            .iter()
            .filter_map(|id| {
                let registration = active.get(id);
                if registration.is_none() {
                    tracing::debug!("ENTER for unregistered geofence {}", id);
                }
                registration.map(|r| GeofenceTrigger {
                    drop_id: id.clone(),
                    snapshot: r.snapshot.clone(),
                })
            })
            .collect()
    }

    pub async fn is_active(&self, id: &str) -> bool {
        self.active.lock().await.contains_key(id)
    }

    pub async fn active_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.active.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}
