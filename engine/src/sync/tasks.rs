//! Task manager: remote download jobs

use super::reconcile;
use super::scheduler::{Activity, Domain, PollOutcome, Scheduler};
use crate::api::{payload, requests, ApiRequest, FileUpload, Gateway};
use crate::config::RefreshSettings;
use crate::db::{Cache, Task};
use crate::error::{ApiError, CacheError, SyncError};
use crate::observable::Observable;
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Published state of the task manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Not connected
    None,
    Running,
    /// An action or the first sync after connecting is in progress
    ActionRunning,
}

pub(crate) struct TaskDomain {
    gateway: Arc<dyn Gateway>,
    cache: Cache,
    refresh: RefreshSettings,
    state: Observable<TaskState>,
}

#[async_trait]
impl Domain for TaskDomain {
    type Snapshot = Vec<Task>;

    fn name(&self) -> &'static str {
        "tasks"
    }

    async fn fetch(&self) -> Result<Vec<Task>, ApiError> {
        let data = self.gateway.execute(requests::list_tasks()).await?;
        payload::tasks(data)
    }

    fn apply(&self, snapshot: Vec<Task>) -> Result<PollOutcome, SyncError> {
        let diff = self
            .cache
            .write(|tx| reconcile::reconcile_tasks(tx, snapshot, Utc::now()))?;
        debug!(
            "tasks: reconciled (+{} ~{} -{})",
            diff.inserted, diff.updated, diff.removed
        );
        Ok(PollOutcome::Reschedule)
    }

    fn next_delay(&self) -> Duration {
        let active = self.cache.has_active_tasks().unwrap_or_else(|e| {
            warn!("tasks: cannot read task activity: {}", e);
            false
        });
        self.refresh.tasks(active)
    }

    fn initial_sync_pending(&self) -> bool {
        match self.cache.user() {
            Ok(user) => user.map_or(true, |u| u.task_update_date.is_none()),
            Err(e) => {
                warn!("tasks: cannot read account marker: {}", e);
                true
            }
        }
    }

    fn publish(&self, activity: Activity) {
        let state = if !activity.connected {
            TaskState::None
        } else if activity.busy() {
            TaskState::ActionRunning
        } else {
            TaskState::Running
        };
        self.state.set_if_changed(state);
    }
}

/// Keeps cached tasks in sync and runs task actions
#[derive(Clone)]
pub struct TaskManager {
    scheduler: Scheduler<TaskDomain>,
}

impl TaskManager {
    pub(crate) fn new(gateway: Arc<dyn Gateway>, cache: Cache, refresh: RefreshSettings) -> Self {
        let domain = TaskDomain {
            gateway,
            cache,
            refresh,
            state: Observable::new(TaskState::None),
        };
        Self {
            scheduler: Scheduler::new(Arc::new(domain)),
        }
    }

    pub fn state(&self) -> &Observable<TaskState> {
        &self.scheduler.domain().state
    }

    /// Cached tasks
    pub fn tasks(&self) -> Result<Vec<Task>, CacheError> {
        self.scheduler.domain().cache.tasks()
    }

    /// Create a task from a magnet link
    pub async fn add(&self, uri: &str) -> Result<(), SyncError> {
        let uri = validate_magnet(uri)?;
        self.action(requests::create_task(uri)).await
    }

    /// Create a task from a `.torrent` file
    pub async fn add_torrent(&self, filename: &str, bytes: Vec<u8>) -> Result<(), SyncError> {
        if filename.trim().is_empty() {
            return Err(SyncError::InvalidInput("missing torrent file name".into()));
        }
        if bytes.is_empty() {
            return Err(SyncError::InvalidInput("empty torrent file".into()));
        }
        let file = FileUpload::torrent(filename.trim(), bytes);
        self.action(requests::create_task_from_file(file)).await
    }

    pub async fn delete(&self, ids: &[String]) -> Result<(), SyncError> {
        require_ids(ids)?;
        self.action(requests::delete_tasks(ids)).await
    }

    pub async fn pause(&self, ids: &[String]) -> Result<(), SyncError> {
        require_ids(ids)?;
        self.action(requests::pause_tasks(ids)).await
    }

    pub async fn resume(&self, ids: &[String]) -> Result<(), SyncError> {
        require_ids(ids)?;
        self.action(requests::resume_tasks(ids)).await
    }

    /// Poll now instead of waiting for the next interval; ignored while an action runs
    pub fn refresh(&self) {
        self.scheduler.refresh();
    }

    pub(crate) fn session_changed(&self, connected: bool) {
        self.scheduler.session_changed(connected);
    }

    async fn action(&self, request: ApiRequest) -> Result<(), SyncError> {
        let gateway = Arc::clone(&self.scheduler.domain().gateway);
        let operation = request.operation();
        info!("tasks: running {}", operation);

        let result = self
            .scheduler
            .run_action(move || async move { gateway.execute(request).await })
            .await;

        if let Err(e) = &result {
            warn!("tasks: {} failed: {}", operation, e);
        }
        result.map(|_| ())
    }
}

fn validate_magnet(uri: &str) -> Result<&str, SyncError> {
    let uri = uri.trim();
    if uri.is_empty() {
        return Err(SyncError::InvalidInput("empty URI".into()));
    }

    const SCHEME: &str = "magnet:";
    let is_magnet = uri
        .get(..SCHEME.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(SCHEME));
    if !is_magnet || uri.len() == SCHEME.len() {
        return Err(SyncError::InvalidInput(format!("not a magnet link: {}", uri)));
    }
    Ok(uri)
}

fn require_ids(ids: &[String]) -> Result<(), SyncError> {
    if ids.is_empty() || ids.iter().any(|id| id.trim().is_empty()) {
        return Err(SyncError::InvalidInput("no task ids".into()));
    }
    Ok(())
}
