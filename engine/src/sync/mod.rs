//! Sync managers and their composition
//!
//! [`SyncEngine`] wires one manager per domain (tasks, statistics, VPN
//! profiles, search) to the session so that every session transition starts or
//! cancels all of them at once.

pub mod reconcile;
pub mod scheduler;
mod search;
mod statistics;
mod tasks;
mod vpn;

pub use reconcile::TaskDiff;
pub use scheduler::{Activity, Domain, PollOutcome, Scheduler};
pub use search::{SearchManager, SearchState};
pub use statistics::StatisticManager;
pub use tasks::{TaskManager, TaskState};
pub use vpn::VpnManager;

use crate::api::Gateway;
use crate::config::RefreshSettings;
use crate::db::Cache;
use crate::session::{SessionState, SessionStatus};
use std::sync::Arc;

/// All domain managers bound to one session and cache
pub struct SyncEngine {
    session: Arc<SessionState>,
    cache: Cache,
    tasks: TaskManager,
    statistics: StatisticManager,
    vpn: VpnManager,
    search: SearchManager,
}

impl SyncEngine {
    /// Build the managers and subscribe them to session transitions.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(
        session: Arc<SessionState>,
        gateway: Arc<dyn Gateway>,
        cache: Cache,
        refresh: RefreshSettings,
    ) -> Self {
        let tasks = TaskManager::new(Arc::clone(&gateway), cache.clone(), refresh.clone());
        let statistics =
            StatisticManager::new(Arc::clone(&gateway), cache.clone(), refresh.clone());
        let vpn = VpnManager::new(Arc::clone(&gateway), cache.clone(), refresh.clone());
        let search = SearchManager::new(gateway, cache.clone(), refresh);

        {
            let tasks = tasks.clone();
            let statistics = statistics.clone();
            let vpn = vpn.clone();
            let search = search.clone();
            session.state().observe(move |status| {
                let connected = *status == SessionStatus::Connected;
                tasks.session_changed(connected);
                statistics.session_changed(connected);
                vpn.session_changed(connected);
                search.session_changed(connected);
            });
        }

        Self {
            session,
            cache,
            tasks,
            statistics,
            vpn,
            search,
        }
    }

    pub fn session(&self) -> &Arc<SessionState> {
        &self.session
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn tasks(&self) -> &TaskManager {
        &self.tasks
    }

    pub fn statistics(&self) -> &StatisticManager {
        &self.statistics
    }

    pub fn vpn(&self) -> &VpnManager {
        &self.vpn
    }

    pub fn search(&self) -> &SearchManager {
        &self.search
    }
}
