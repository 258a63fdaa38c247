use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;

use super::{GeofenceRegion, GeofenceTransport};
use crate::error::TransportError;
use crate::geo::LatLng;

/// In-process transport that evaluates ENTER itself.
///
/// Used for simulation and tests; behaves like the OS service in that
/// re-adding an id replaces the earlier region.
#[derive(Default)]
pub struct MemoryGeofenceTransport {
    regions: Mutex<BTreeMap<String, GeofenceRegion>>,
    fail_adds: AtomicBool,
    fail_removes: AtomicBool,
    add_calls: AtomicUsize,
    remove_calls: AtomicUsize,
}

impl MemoryGeofenceTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_adds(&self, fail: bool) {
        self.fail_adds.store(fail, Ordering::SeqCst);
    }

    pub fn fail_removes(&self, fail: bool) {
        self.fail_removes.store(fail, Ordering::SeqCst);
    }

    pub fn add_calls(&self) -> usize {
        self.add_calls.load(Ordering::SeqCst)
    }

    pub fn remove_calls(&self) -> usize {
        self.remove_calls.load(Ordering::SeqCst)
    }

    pub async fn regions(&self) -> Vec<GeofenceRegion> {
        self.regions.lock().await.values().cloned().collect()
    }

    /// Ids of every region whose circle contains `position`.
    pub async fn evaluate(&self, position: LatLng) -> Vec<String> {
        self.regions
            .lock()
            .await
            .values()
            .filter(|r| LatLng::new(r.lat, r.lng).distance_to(&position) <= r.radius_meters)
            .map(|r| r.id.clone())
            .collect()
    }
}

#[async_trait]
impl GeofenceTransport for MemoryGeofenceTransport {
    async fn add_geofences(&self, regions: &[GeofenceRegion]) -> Result<(), TransportError> {
        self.add_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_adds.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable("geofence service down".into()));
        }

        let mut active = self.regions.lock().await;
        for region in regions {
            active.insert(region.id.clone(), region.clone());
        }
        Ok(())
    }

    async fn remove_geofences(&self, ids: &[String]) -> Result<(), TransportError> {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_removes.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable("geofence service down".into()));
        }

        let mut active = self.regions.lock().await;
        for id in ids {
            active.remove(id);
        }
        Ok(())
    }
}
