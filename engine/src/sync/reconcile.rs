//! Merge fetched snapshots into the cache
//!
//! Tasks are diffed so unchanged ids keep their rows; statistics, VPN
//! profiles and search results are replaced wholesale. Callers run these
//! inside one [`Cache::write`](crate::db::Cache::write) transaction.

use crate::db::{CacheTx, SearchItem, Statistic, Task, VpnProfile};
use crate::error::CacheError;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// Row changes made by one task reconciliation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskDiff {
    pub inserted: usize,
    pub updated: usize,
    pub removed: usize,
}

/// Make the cached task set equal to `snapshot` and stamp the account marker
pub fn reconcile_tasks(
    tx: &CacheTx<'_>,
    snapshot: Vec<Task>,
    now: DateTime<Utc>,
) -> Result<TaskDiff, CacheError> {
    let cached: HashSet<String> = tx.task_ids()?.into_iter().collect();
    let removed: Vec<String> = {
        let fresh: HashSet<&str> = snapshot.iter().map(|t| t.id.as_str()).collect();
        cached
            .iter()
            .filter(|id| !fresh.contains(id.as_str()))
            .cloned()
            .collect()
    };

    let mut diff = TaskDiff::default();

    for id in &removed {
        tx.delete_task(id)?;
        diff.removed += 1;
    }

    for mut task in snapshot {
        task.update_date = now;
        if cached.contains(&task.id) {
            diff.updated += 1;
        } else {
            diff.inserted += 1;
        }
        tx.upsert_task(&task)?;
    }

    tx.set_task_update_date(now)?;
    Ok(diff)
}

pub fn replace_statistic(
    tx: &CacheTx<'_>,
    mut stat: Statistic,
    now: DateTime<Utc>,
) -> Result<(), CacheError> {
    stat.update_date = now;
    tx.delete_all_statistics()?;
    tx.insert_statistic(&stat)
}

pub fn replace_vpn_profiles(
    tx: &CacheTx<'_>,
    profiles: Vec<VpnProfile>,
    now: DateTime<Utc>,
) -> Result<(), CacheError> {
    tx.delete_all_vpn_profiles()?;
    for mut profile in profiles {
        profile.update_date = now;
        tx.insert_vpn_profile(&profile)?;
    }
    Ok(())
}

pub fn replace_search_items(tx: &CacheTx<'_>, items: &[SearchItem]) -> Result<(), CacheError> {
    tx.delete_all_search_items()?;
    for item in items {
        tx.insert_search_item(item)?;
    }
    Ok(())
}
