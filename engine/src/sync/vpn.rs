//! VPN profile manager

use super::reconcile;
use super::scheduler::{Domain, PollOutcome, Scheduler};
use crate::api::{payload, requests, Gateway};
use crate::config::RefreshSettings;
use crate::db::{Cache, VpnProfile};
use crate::error::{ApiError, SyncError};
use crate::observable::Observable;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub(crate) struct VpnDomain {
    gateway: Arc<dyn Gateway>,
    cache: Cache,
    refresh: RefreshSettings,
    profiles: Observable<Vec<VpnProfile>>,
}

impl VpnDomain {
    fn clear(&self) {
        if let Err(e) = self.cache.write(|tx| tx.delete_all_vpn_profiles()) {
            warn!("vpn: failed to clear cache: {}", e);
        }
        self.profiles.set_if_changed(Vec::new());
    }
}

#[async_trait]
impl Domain for VpnDomain {
    type Snapshot = Vec<VpnProfile>;

    fn name(&self) -> &'static str {
        "vpn"
    }

    async fn fetch(&self) -> Result<Vec<VpnProfile>, ApiError> {
        let data = self.gateway.execute(requests::vpn_profiles()).await?;
        payload::vpn_profiles(data)
    }

    fn apply(&self, snapshot: Vec<VpnProfile>) -> Result<PollOutcome, SyncError> {
        debug!("vpn: {} profiles", snapshot.len());
        self.cache
            .write(|tx| reconcile::replace_vpn_profiles(tx, snapshot, Utc::now()))?;
        self.profiles.set(self.cache.vpn_profiles()?);
        Ok(PollOutcome::Reschedule)
    }

    fn poll_failed(&self, error: &SyncError) -> PollOutcome {
        if !error.is_malformed() {
            self.clear();
        }
        PollOutcome::Reschedule
    }

    fn next_delay(&self) -> Duration {
        self.refresh.vpn()
    }

    fn disconnected(&self) {
        self.clear();
    }
}

/// Polls the station's VPN client profiles on a fixed interval
#[derive(Clone)]
pub struct VpnManager {
    scheduler: Scheduler<VpnDomain>,
}

impl VpnManager {
    pub(crate) fn new(gateway: Arc<dyn Gateway>, cache: Cache, refresh: RefreshSettings) -> Self {
        let domain = VpnDomain {
            gateway,
            cache,
            refresh,
            profiles: Observable::new(Vec::new()),
        };
        Self {
            scheduler: Scheduler::new(Arc::new(domain)),
        }
    }

    pub fn profiles(&self) -> &Observable<Vec<VpnProfile>> {
        &self.scheduler.domain().profiles
    }

    /// Whether any profile reports a live connection
    pub fn is_connected(&self) -> bool {
        self.profiles().get().iter().any(VpnProfile::is_connected)
    }

    pub(crate) fn session_changed(&self, connected: bool) {
        self.scheduler.session_changed(connected);
    }
}
