//! Statistic manager: global transfer speeds

use super::reconcile;
use super::scheduler::{Domain, PollOutcome, Scheduler};
use crate::api::{payload, requests, Gateway};
use crate::config::RefreshSettings;
use crate::db::{Cache, Statistic};
use crate::error::{ApiError, SyncError};
use crate::observable::Observable;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub(crate) struct StatisticDomain {
    gateway: Arc<dyn Gateway>,
    cache: Cache,
    refresh: RefreshSettings,
    current: Observable<Option<Statistic>>,
}

impl StatisticDomain {
    /// Drop the stored snapshot so stale speeds are never shown
    fn clear(&self) {
        if let Err(e) = self.cache.write(|tx| tx.delete_all_statistics()) {
            warn!("statistics: failed to clear cache: {}", e);
        }
        self.current.set_if_changed(None);
    }
}

#[async_trait]
impl Domain for StatisticDomain {
    type Snapshot = Statistic;

    fn name(&self) -> &'static str {
        "statistics"
    }

    async fn fetch(&self) -> Result<Statistic, ApiError> {
        let data = self.gateway.execute(requests::statistics()).await?;
        payload::statistic(data)
    }

    fn apply(&self, snapshot: Statistic) -> Result<PollOutcome, SyncError> {
        self.cache
            .write(|tx| reconcile::replace_statistic(tx, snapshot, Utc::now()))?;
        self.current.set(self.cache.statistic()?);
        Ok(PollOutcome::Reschedule)
    }

    fn poll_failed(&self, error: &SyncError) -> PollOutcome {
        if !error.is_malformed() {
            self.clear();
        }
        PollOutcome::Reschedule
    }

    fn next_delay(&self) -> Duration {
        let active = self.cache.has_active_tasks().unwrap_or_else(|e| {
            warn!("statistics: cannot read task activity: {}", e);
            false
        });
        self.refresh.statistics(active)
    }

    fn disconnected(&self) {
        self.clear();
    }
}

/// Polls the station's transfer speed
#[derive(Clone)]
pub struct StatisticManager {
    scheduler: Scheduler<StatisticDomain>,
}

impl StatisticManager {
    pub(crate) fn new(gateway: Arc<dyn Gateway>, cache: Cache, refresh: RefreshSettings) -> Self {
        let domain = StatisticDomain {
            gateway,
            cache,
            refresh,
            current: Observable::new(None),
        };
        Self {
            scheduler: Scheduler::new(Arc::new(domain)),
        }
    }

    /// Latest snapshot, `None` while disconnected or after a failed poll
    pub fn current(&self) -> &Observable<Option<Statistic>> {
        &self.scheduler.domain().current
    }

    pub(crate) fn session_changed(&self, connected: bool) {
        self.scheduler.session_changed(connected);
    }
}
