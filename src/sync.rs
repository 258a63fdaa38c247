//! Nearby sync: turn the drop catalog into active geofences around a user.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};

use crate::drops::{normalize_groups, DropRecord, DynDropRepository};
use crate::error::TransportError;
use crate::geo::LatLng;
use crate::geofence::{GeofenceRegistration, GeofenceRegistry};
use crate::inventory::DynInventoryStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    /// Number of geofences registered; zero is still a success
    Success(usize),
    MissingPermission,
    NoLocation,
    Error(String),
    /// Superseded by a newer sync before anything was registered
    Cancelled,
}

/// Source of the device's position.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    fn has_permission(&self) -> bool;

    /// Latest fix, `None` when the provider has none yet
    async fn current_location(&self) -> Result<Option<LatLng>, TransportError>;
}

/// Cooperative cancellation shared between a sync and whoever supersedes it.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in self, so wait_for cannot observe a closed channel
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub origin: LatLng,
    pub max_radius_meters: f64,
    /// Normalized group codes; empty means only groupless drops
    pub allowed_groups: BTreeSet<String>,
    pub self_user_id: String,
}

impl SyncRequest {
    pub fn new<I, S>(
        origin: LatLng,
        max_radius_meters: f64,
        allowed_groups: I,
        self_user_id: impl Into<String>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            origin,
            max_radius_meters,
            allowed_groups: normalize_groups(allowed_groups),
            self_user_id: self_user_id.into(),
        }
    }
}

/// Drops eligible for a geofence around `request.origin`.
pub fn select_candidates<'a>(
    catalog: &'a [DropRecord],
    resolved: &HashSet<String>,
    request: &SyncRequest,
) -> Vec<&'a DropRecord> {
    catalog
        .iter()
        .filter(|d| !d.is_deleted)
        .filter(|d| !resolved.contains(&d.id))
        .filter(|d| d.created_by != request.self_user_id)
        .filter(|d| d.visible_to_groups(&request.allowed_groups))
        .filter(|d| d.location().distance_to(&request.origin) <= request.max_radius_meters)
        .collect()
}

pub struct NearbySync {
    catalog: DynDropRepository,
    inventory: DynInventoryStore,
    registry: Arc<GeofenceRegistry>,
    location_retry: Duration,
    current: Mutex<Option<CancelToken>>,
}

impl NearbySync {
    pub fn new(
        catalog: DynDropRepository,
        inventory: DynInventoryStore,
        registry: Arc<GeofenceRegistry>,
        location_retry: Duration,
    ) -> Self {
        Self {
            catalog,
            inventory,
            registry,
            location_retry,
            current: Mutex::new(None),
        }
    }

    /// Cancel whatever sync is in flight and hand out a token for the next one.
    pub async fn supersede(&self) -> CancelToken {
        let token = CancelToken::new();
        if let Some(previous) = self.current.lock().await.replace(token.clone()) {
            previous.cancel();
        }
        token
    }

    /// Sync around known coordinates.
    pub async fn sync(&self, request: &SyncRequest, cancel: &CancelToken) -> SyncStatus {
        let catalog = match self.catalog.fetch_all().await {
            Ok(drops) => drops,
            Err(e) => {
                tracing::error!("Catalog fetch failed: {}", e);
                return SyncStatus::Error(format!("catalog fetch failed: {}", e));
            }
        };

        let resolved = match self.inventory.resolved_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!("Inventory read failed: {}", e);
                return SyncStatus::Error(format!("inventory read failed: {}", e));
            }
        };

        let registrations: Vec<GeofenceRegistration> =
            select_candidates(&catalog, &resolved, request)
                .into_iter()
                .map(|d| GeofenceRegistration::for_drop(d.snapshot()))
                .collect();

        if cancel.is_cancelled() {
            tracing::info!("Sync superseded before registration");
            return SyncStatus::Cancelled;
        }

        // Regions from earlier syncs that are no longer candidates
        let keep: HashSet<String> = registrations.iter().map(|r| r.id().to_string()).collect();
        if let Err(e) = self.registry.retain(&keep).await {
            tracing::warn!("Failed to retire stale geofences: {}", e);
        }

        tracing::info!(
            "{} of {} drops within {}m of ({}, {})",
            registrations.len(),
            catalog.len(),
            request.max_radius_meters,
            request.origin.lat,
            request.origin.lng
        );

        match self.registry.add_batch(registrations).await {
            Ok(count) => SyncStatus::Success(count),
            Err(e) => {
                tracing::error!("Geofence registration failed: {}", e);
                SyncStatus::Error(format!("geofence registration failed: {}", e))
            }
        }
    }

    /// Resolve the current position, retrying once after the configured
    /// delay when no fix is available, then sync around it.
    pub async fn sync_from_location<I, S>(
        &self,
        location: &dyn LocationProvider,
        max_radius_meters: f64,
        allowed_groups: I,
        self_user_id: &str,
        cancel: &CancelToken,
    ) -> SyncStatus
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if !location.has_permission() {
            return SyncStatus::MissingPermission;
        }

        let origin = match self.resolve_fix(location, cancel).await {
            Ok(Some(origin)) => origin,
            Ok(None) if cancel.is_cancelled() => return SyncStatus::Cancelled,
            Ok(None) => {
                tracing::warn!("No location fix after retry");
                return SyncStatus::NoLocation;
            }
            Err(e) => {
                tracing::error!("Location lookup failed: {}", e);
                return SyncStatus::Error(format!("location lookup failed: {}", e));
            }
        };

        let request = SyncRequest::new(origin, max_radius_meters, allowed_groups, self_user_id);
        self.sync(&request, cancel).await
    }

    async fn resolve_fix(
        &self,
        location: &dyn LocationProvider,
        cancel: &CancelToken,
    ) -> Result<Option<LatLng>, TransportError> {
        if let Some(fix) = location.current_location().await? {
            return Ok(Some(fix));
        }

        tracing::debug!("No fix yet, retrying in {:?}", self.location_retry);
        tokio::select! {
            _ = tokio::time::sleep(self.location_retry) => {}
            _ = cancel.cancelled() => return Ok(None),
        }

        location.current_location().await
    }
}
