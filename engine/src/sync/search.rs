//! Search manager: remote torrent search

use super::reconcile;
use super::scheduler::{Activity, Domain, PollOutcome, Scheduler};
use crate::api::payload::{self, SearchPage};
use crate::api::{requests, Gateway};
use crate::config::RefreshSettings;
use crate::db::{Cache, SearchItem};
use crate::error::{ApiError, CacheError, SyncError};
use crate::observable::Observable;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Published state of the search manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchState {
    /// Not connected
    None,
    Idle,
    Error,
    SearchRunning,
    SearchFinished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    Finished,
    Failed,
}

#[derive(Debug)]
struct Progress {
    search_id: Option<String>,
    phase: Phase,
}

impl Progress {
    fn idle() -> Self {
        Self {
            search_id: None,
            phase: Phase::Idle,
        }
    }
}

pub(crate) struct SearchDomain {
    gateway: Arc<dyn Gateway>,
    cache: Cache,
    refresh: RefreshSettings,
    progress: Mutex<Progress>,
    state: Observable<SearchState>,
}

#[async_trait]
impl Domain for SearchDomain {
    /// `None` when no search is running
    type Snapshot = Option<SearchPage>;

    fn name(&self) -> &'static str {
        "search"
    }

    async fn fetch(&self) -> Result<Option<SearchPage>, ApiError> {
        let search_id = match self.progress.lock().search_id.clone() {
            Some(id) => id,
            None => return Ok(None),
        };
        let data = self.gateway.execute(requests::search_list(&search_id)).await?;
        payload::search_page(data).map(Some)
    }

    fn apply(&self, snapshot: Option<SearchPage>) -> Result<PollOutcome, SyncError> {
        let page = match snapshot {
            Some(page) => page,
            None => return Ok(PollOutcome::Stop),
        };

        if page.has_fail {
            warn!("search: station reported a failed search");
            self.progress.lock().phase = Phase::Failed;
            return Ok(PollOutcome::Stop);
        }

        self.cache
            .write(|tx| reconcile::replace_search_items(tx, &page.items))?;
        debug!("search: {} results", page.items.len());

        if page.is_running {
            Ok(PollOutcome::Reschedule)
        } else {
            info!("search: finished with {} results", page.items.len());
            self.progress.lock().phase = Phase::Finished;
            Ok(PollOutcome::Stop)
        }
    }

    fn poll_failed(&self, error: &SyncError) -> PollOutcome {
        if error.is_malformed() {
            return PollOutcome::Reschedule;
        }
        warn!("search: polling results failed: {}", error);
        self.progress.lock().phase = Phase::Failed;
        PollOutcome::Stop
    }

    fn next_delay(&self) -> Duration {
        self.refresh.search()
    }

    fn poll_enabled(&self) -> bool {
        let progress = self.progress.lock();
        progress.search_id.is_some() && progress.phase == Phase::Running
    }

    fn action_completed(&self, result: &Result<Value, SyncError>) {
        let mut progress = self.progress.lock();
        match result {
            Ok(data) => match payload::search_id(data.clone()) {
                Ok(id) => {
                    debug!("search: started {}", id);
                    progress.search_id = Some(id);
                    progress.phase = Phase::Running;
                }
                Err(e) => {
                    warn!("search: no search id in response: {}", e);
                    progress.phase = Phase::Failed;
                }
            },
            Err(_) => progress.phase = Phase::Failed,
        }
    }

    fn connected(&self) {
        *self.progress.lock() = Progress::idle();
    }

    fn disconnected(&self) {
        *self.progress.lock() = Progress::idle();
    }

    fn publish(&self, activity: Activity) {
        let state = if !activity.connected {
            SearchState::None
        } else if activity.pending_actions > 0 {
            SearchState::SearchRunning
        } else {
            match self.progress.lock().phase {
                Phase::Idle => SearchState::Idle,
                Phase::Running => SearchState::SearchRunning,
                Phase::Finished => SearchState::SearchFinished,
                Phase::Failed => SearchState::Error,
            }
        };
        self.state.set_if_changed(state);
    }
}

/// Runs one remote search at a time and polls its results
#[derive(Clone)]
pub struct SearchManager {
    scheduler: Scheduler<SearchDomain>,
}

impl SearchManager {
    pub(crate) fn new(gateway: Arc<dyn Gateway>, cache: Cache, refresh: RefreshSettings) -> Self {
        let domain = SearchDomain {
            gateway,
            cache,
            refresh,
            progress: Mutex::new(Progress::idle()),
            state: Observable::new(SearchState::None),
        };
        Self {
            scheduler: Scheduler::new(Arc::new(domain)),
        }
    }

    pub fn state(&self) -> &Observable<SearchState> {
        &self.scheduler.domain().state
    }

    /// Cached results of the latest search
    pub fn results(&self) -> Result<Vec<SearchItem>, CacheError> {
        self.scheduler.domain().cache.search_items()
    }

    /// Start a search, replacing the previous one and its results
    pub async fn search(&self, keyword: &str) -> Result<(), SyncError> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Err(SyncError::InvalidInput("empty search keyword".into()));
        }
        if !self.scheduler.is_connected() {
            return Err(SyncError::NotConnected);
        }

        let domain = self.scheduler.domain();
        domain
            .cache
            .write(|tx| reconcile::replace_search_items(tx, &[]))?;

        info!("search: starting \"{}\"", keyword);
        let gateway = Arc::clone(&domain.gateway);
        let request = requests::search_start(keyword);
        let result = self
            .scheduler
            .run_action(move || async move { gateway.execute(request).await })
            .await;

        if let Err(e) = &result {
            warn!("search: start failed: {}", e);
        }
        result.map(|_| ())
    }

    pub(crate) fn session_changed(&self, connected: bool) {
        self.scheduler.session_changed(connected);
    }
}
