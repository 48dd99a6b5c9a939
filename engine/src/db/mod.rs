//! Local cache of station records on SQLite
//!
//! All writes go through [`Cache::write`], which wraps them in one transaction.
//! `write` is reentrant: calling it again from inside an open write on the same
//! thread joins the outer transaction instead of opening a new one.

mod schema;

pub use schema::*;

use crate::error::CacheError;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, ReentrantMutex};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::cell::Cell;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

type Result<T> = std::result::Result<T, CacheError>;

/// Record type touched by a committed transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheChange {
    User,
    Tasks,
    Statistics,
    VpnProfiles,
    SearchItems,
}

/// Number of stored rows per table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecordCounts {
    pub tasks: usize,
    pub extras: usize,
    pub additionals: usize,
    pub details: usize,
    pub transfers: usize,
    pub statistics: usize,
    pub vpn_profiles: usize,
    pub search_items: usize,
}

struct Store {
    conn: Connection,
    /// Nesting level of `write` calls on the thread holding the lock
    depth: Cell<usize>,
}

/// Transactional object store for tasks, statistics, VPN profiles and search results
#[derive(Clone)]
pub struct Cache {
    store: Arc<ReentrantMutex<Store>>,
    pending: Arc<Mutex<Vec<CacheChange>>>,
    changes_tx: broadcast::Sender<CacheChange>,
}

impl Cache {
    /// Open (or create) the cache database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::from_connection(conn)
    }

    /// Create an in-memory cache (for testing)
    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        initialize_schema(&conn)?;

        let (changes_tx, _) = broadcast::channel(256);
        Ok(Self {
            store: Arc::new(ReentrantMutex::new(Store {
                conn,
                depth: Cell::new(0),
            })),
            pending: Arc::new(Mutex::new(Vec::new())),
            changes_tx,
        })
    }

    /// Subscribe to change notifications, one per record type per committed transaction
    pub fn subscribe(&self) -> broadcast::Receiver<CacheChange> {
        self.changes_tx.subscribe()
    }

    /// Run `f` inside a write transaction, joining an already open one.
    ///
    /// The outermost call commits when `f` succeeds and rolls back otherwise.
    pub fn write<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&CacheTx<'_>) -> Result<R>,
    {
        let store = self.store.lock();
        let outermost = store.depth.get() == 0;

        if outermost {
            store.conn.execute_batch("BEGIN IMMEDIATE")?;
        }
        store.depth.set(store.depth.get() + 1);

        let result = f(&CacheTx {
            conn: &store.conn,
            pending: &self.pending,
        });

        store.depth.set(store.depth.get() - 1);
        if !outermost {
            return result;
        }

        let committed = result.and_then(|value| {
            store.conn.execute_batch("COMMIT")?;
            Ok(value)
        });

        match committed {
            Ok(value) => {
                // Drained under the store lock so a later transaction's changes stay queued
                let changes: Vec<CacheChange> = self.pending.lock().drain(..).collect();
                drop(store);
                self.announce(changes);
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = store.conn.execute_batch("ROLLBACK") {
                    warn!("Cache rollback failed: {}", rollback);
                }
                self.pending.lock().clear();
                Err(e)
            }
        }
    }

    fn announce(&self, changes: Vec<CacheChange>) {
        let mut sent = Vec::with_capacity(changes.len());
        for change in changes {
            if !sent.contains(&change) {
                // No receivers is fine
                let _ = self.changes_tx.send(change);
                sent.push(change);
            }
        }
        if !sent.is_empty() {
            debug!("Cache committed: {:?}", sent);
        }
    }

    /// All cached tasks with their child records
    pub fn tasks(&self) -> Result<Vec<Task>> {
        query_tasks(&self.store.lock().conn, None)
    }

    /// One cached task with its child records
    pub fn task(&self, id: &str) -> Result<Option<Task>> {
        Ok(query_tasks(&self.store.lock().conn, Some(id))?.pop())
    }

    /// Whether any cached task is in a non-terminal status
    pub fn has_active_tasks(&self) -> Result<bool> {
        query_has_active_tasks(&self.store.lock().conn)
    }

    pub fn statistic(&self) -> Result<Option<Statistic>> {
        let store = self.store.lock();
        let stat = store
            .conn
            .query_row(
                "SELECT speed_download, speed_upload, update_date FROM statistics ORDER BY id DESC LIMIT 1",
                [],
                |row| {
                    Ok(Statistic {
                        speed_download: row.get(0)?,
                        speed_upload: row.get(1)?,
                        update_date: parse_date(&row.get::<_, String>(2)?),
                    })
                },
            )
            .optional()?;
        Ok(stat)
    }

    pub fn vpn_profiles(&self) -> Result<Vec<VpnProfile>> {
        let store = self.store.lock();
        let mut stmt = store.conn.prepare(
            r#"
            SELECT id, confname, reconnect, status, uptime, prtl, user, update_date
            FROM vpn_profiles
            ORDER BY confname
            "#,
        )?;

        let profiles = stmt
            .query_map([], |row| {
                Ok(VpnProfile {
                    id: row.get(0)?,
                    confname: row.get(1)?,
                    reconnect: row.get(2)?,
                    status: row.get(3)?,
                    uptime: row.get(4)?,
                    prtl: row.get(5)?,
                    user: row.get(6)?,
                    update_date: parse_date(&row.get::<_, String>(7)?),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(profiles)
    }

    /// Search results, most seeded first
    pub fn search_items(&self) -> Result<Vec<SearchItem>> {
        let store = self.store.lock();
        let mut stmt = store.conn.prepare(
            r#"
            SELECT result_id, title, category, date, dlurl, page, peers, leechs, size
            FROM search_items
            ORDER BY peers DESC, result_id
            "#,
        )?;

        let items = stmt
            .query_map([], |row| {
                Ok(SearchItem {
                    result_id: row.get(0)?,
                    title: row.get(1)?,
                    category: row.get(2)?,
                    date: row.get(3)?,
                    dlurl: row.get(4)?,
                    page: row.get(5)?,
                    peers: row.get(6)?,
                    leechs: row.get(7)?,
                    size: row.get(8)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(items)
    }

    /// The account marker, if an account ever logged in
    pub fn user(&self) -> Result<Option<User>> {
        query_user(&self.store.lock().conn)
    }

    pub fn record_counts(&self) -> Result<RecordCounts> {
        let store = self.store.lock();
        let count = |table: &str| -> Result<usize> {
            let n: i64 = store
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                    row.get(0)
                })?;
            Ok(n as usize)
        };

        Ok(RecordCounts {
            tasks: count("tasks")?,
            extras: count("task_extra")?,
            additionals: count("task_additional")?,
            details: count("task_detail")?,
            transfers: count("task_transfer")?,
            statistics: count("statistics")?,
            vpn_profiles: count("vpn_profiles")?,
            search_items: count("search_items")?,
        })
    }
}

/// Handle to an open write transaction
pub struct CacheTx<'a> {
    conn: &'a Connection,
    pending: &'a Mutex<Vec<CacheChange>>,
}

impl CacheTx<'_> {
    fn touched(&self, change: CacheChange) {
        self.pending.lock().push(change);
    }

    /// Ids of every cached task
    pub fn task_ids(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT id FROM tasks")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    /// Insert or update a task and, transitively, its child records.
    ///
    /// Children absent from `task` are removed.
    pub fn upsert_task(&self, task: &Task) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO tasks (id, title, size, status, task_type, username, update_date)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                size = excluded.size,
                status = excluded.status,
                task_type = excluded.task_type,
                username = excluded.username,
                update_date = excluded.update_date
            "#,
            params![
                task.id,
                task.title,
                task.size,
                task.status.as_str(),
                task.task_type,
                task.username,
                task.update_date.to_rfc3339(),
            ],
        )?;

        match &task.extra {
            Some(extra) => {
                self.conn.execute(
                    r#"
                    INSERT INTO task_extra (task_id, error_detail) VALUES (?1, ?2)
                    ON CONFLICT(task_id) DO UPDATE SET error_detail = excluded.error_detail
                    "#,
                    params![task.id, extra.error_detail],
                )?;
            }
            None => {
                self.conn
                    .execute("DELETE FROM task_extra WHERE task_id = ?1", [&task.id])?;
            }
        }

        match &task.additional {
            Some(additional) => self.upsert_additional(&task.id, additional)?,
            None => self.delete_additional(&task.id)?,
        }

        self.touched(CacheChange::Tasks);
        Ok(())
    }

    fn upsert_additional(&self, task_id: &str, additional: &TaskAdditional) -> Result<()> {
        self.conn.execute(
            "INSERT INTO task_additional (task_id) VALUES (?1) ON CONFLICT(task_id) DO NOTHING",
            [task_id],
        )?;

        match &additional.detail {
            Some(d) => {
                self.conn.execute(
                    r#"
                    INSERT INTO task_detail (
                        task_id, destination, uri, create_time, started_time, completed_time,
                        priority, total_peers, connected_leechers, connected_peers,
                        connected_seeders, waiting_seconds
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                    ON CONFLICT(task_id) DO UPDATE SET
                        destination = excluded.destination,
                        uri = excluded.uri,
                        create_time = excluded.create_time,
                        started_time = excluded.started_time,
                        completed_time = excluded.completed_time,
                        priority = excluded.priority,
                        total_peers = excluded.total_peers,
                        connected_leechers = excluded.connected_leechers,
                        connected_peers = excluded.connected_peers,
                        connected_seeders = excluded.connected_seeders,
                        waiting_seconds = excluded.waiting_seconds
                    "#,
                    params![
                        task_id,
                        d.destination,
                        d.uri,
                        d.create_time,
                        d.started_time,
                        d.completed_time,
                        d.priority,
                        d.total_peers,
                        d.connected_leechers,
                        d.connected_peers,
                        d.connected_seeders,
                        d.waiting_seconds,
                    ],
                )?;
            }
            None => {
                self.conn
                    .execute("DELETE FROM task_detail WHERE task_id = ?1", [task_id])?;
            }
        }

        match &additional.transfer {
            Some(t) => {
                self.conn.execute(
                    r#"
                    INSERT INTO task_transfer (
                        task_id, downloaded_pieces, size_downloaded, size_uploaded,
                        speed_download, speed_upload
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    ON CONFLICT(task_id) DO UPDATE SET
                        downloaded_pieces = excluded.downloaded_pieces,
                        size_downloaded = excluded.size_downloaded,
                        size_uploaded = excluded.size_uploaded,
                        speed_download = excluded.speed_download,
                        speed_upload = excluded.speed_upload
                    "#,
                    params![
                        task_id,
                        t.downloaded_pieces,
                        t.size_downloaded,
                        t.size_uploaded,
                        t.speed_download,
                        t.speed_upload,
                    ],
                )?;
            }
            None => {
                self.conn
                    .execute("DELETE FROM task_transfer WHERE task_id = ?1", [task_id])?;
            }
        }

        Ok(())
    }

    fn delete_additional(&self, task_id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM task_detail WHERE task_id = ?1", [task_id])?;
        self.conn
            .execute("DELETE FROM task_transfer WHERE task_id = ?1", [task_id])?;
        self.conn
            .execute("DELETE FROM task_additional WHERE task_id = ?1", [task_id])?;
        Ok(())
    }

    /// Remove a task and every child record, children first
    pub fn delete_task(&self, task_id: &str) -> Result<()> {
        self.delete_additional(task_id)?;
        self.conn
            .execute("DELETE FROM task_extra WHERE task_id = ?1", [task_id])?;
        self.conn
            .execute("DELETE FROM tasks WHERE id = ?1", [task_id])?;
        self.touched(CacheChange::Tasks);
        Ok(())
    }

    pub fn delete_all_statistics(&self) -> Result<()> {
        self.conn.execute("DELETE FROM statistics", [])?;
        self.touched(CacheChange::Statistics);
        Ok(())
    }

    pub fn insert_statistic(&self, stat: &Statistic) -> Result<()> {
        self.conn.execute(
            "INSERT INTO statistics (speed_download, speed_upload, update_date) VALUES (?1, ?2, ?3)",
            params![
                stat.speed_download,
                stat.speed_upload,
                stat.update_date.to_rfc3339()
            ],
        )?;
        self.touched(CacheChange::Statistics);
        Ok(())
    }

    pub fn delete_all_vpn_profiles(&self) -> Result<()> {
        self.conn.execute("DELETE FROM vpn_profiles", [])?;
        self.touched(CacheChange::VpnProfiles);
        Ok(())
    }

    pub fn insert_vpn_profile(&self, profile: &VpnProfile) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO vpn_profiles (id, confname, reconnect, status, uptime, prtl, user, update_date)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                profile.id,
                profile.confname,
                profile.reconnect,
                profile.status,
                profile.uptime,
                profile.prtl,
                profile.user,
                profile.update_date.to_rfc3339(),
            ],
        )?;
        self.touched(CacheChange::VpnProfiles);
        Ok(())
    }

    pub fn delete_all_search_items(&self) -> Result<()> {
        self.conn.execute("DELETE FROM search_items", [])?;
        self.touched(CacheChange::SearchItems);
        Ok(())
    }

    pub fn insert_search_item(&self, item: &SearchItem) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO search_items (result_id, title, category, date, dlurl, page, peers, leechs, size)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                item.result_id,
                item.title,
                item.category,
                item.date,
                item.dlurl,
                item.page,
                item.peers,
                item.leechs,
                item.size,
            ],
        )?;
        self.touched(CacheChange::SearchItems);
        Ok(())
    }

    pub fn user(&self) -> Result<Option<User>> {
        query_user(self.conn)
    }

    /// Insert or replace the account marker
    pub fn put_user(&self, user: &User) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO user (id, login, task_update_date, created_date) VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                login = excluded.login,
                task_update_date = excluded.task_update_date,
                created_date = excluded.created_date
            "#,
            params![
                USER_ID,
                user.login,
                user.task_update_date.map(|d| d.to_rfc3339()),
                user.created_date.to_rfc3339(),
            ],
        )?;
        self.touched(CacheChange::User);
        Ok(())
    }

    /// Record a completed full task sync on the account marker
    pub fn set_task_update_date(&self, date: DateTime<Utc>) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE user SET task_update_date = ?1 WHERE id = ?2",
            params![date.to_rfc3339(), USER_ID],
        )?;
        if updated == 0 {
            let mut user = User::new("");
            user.task_update_date = Some(date);
            self.put_user(&user)?;
        }
        self.touched(CacheChange::User);
        Ok(())
    }

    /// Delete every record of every type
    pub fn delete_all(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            DELETE FROM task_detail;
            DELETE FROM task_transfer;
            DELETE FROM task_additional;
            DELETE FROM task_extra;
            DELETE FROM tasks;
            DELETE FROM statistics;
            DELETE FROM vpn_profiles;
            DELETE FROM search_items;
            DELETE FROM user;
            "#,
        )?;
        for change in [
            CacheChange::User,
            CacheChange::Tasks,
            CacheChange::Statistics,
            CacheChange::VpnProfiles,
            CacheChange::SearchItems,
        ] {
            self.touched(change);
        }
        Ok(())
    }
}

/// Initialize the database schema
fn initialize_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS user (
            id INTEGER PRIMARY KEY,
            login TEXT NOT NULL,
            task_update_date TEXT,
            created_date TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tasks (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            size INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL,
            task_type TEXT NOT NULL,
            username TEXT NOT NULL,
            update_date TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS task_extra (
            task_id TEXT PRIMARY KEY REFERENCES tasks(id),
            error_detail TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS task_additional (
            task_id TEXT PRIMARY KEY REFERENCES tasks(id)
        );

        CREATE TABLE IF NOT EXISTS task_detail (
            task_id TEXT PRIMARY KEY REFERENCES task_additional(task_id),
            destination TEXT NOT NULL,
            uri TEXT NOT NULL,
            create_time INTEGER NOT NULL,
            started_time INTEGER NOT NULL,
            completed_time INTEGER NOT NULL,
            priority TEXT,
            total_peers INTEGER NOT NULL,
            connected_leechers INTEGER NOT NULL,
            connected_peers INTEGER NOT NULL,
            connected_seeders INTEGER NOT NULL,
            waiting_seconds INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS task_transfer (
            task_id TEXT PRIMARY KEY REFERENCES task_additional(task_id),
            downloaded_pieces INTEGER NOT NULL,
            size_downloaded INTEGER NOT NULL,
            size_uploaded INTEGER NOT NULL,
            speed_download INTEGER NOT NULL,
            speed_upload INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS statistics (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            speed_download INTEGER NOT NULL,
            speed_upload INTEGER NOT NULL,
            update_date TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS vpn_profiles (
            id TEXT PRIMARY KEY,
            confname TEXT NOT NULL,
            reconnect INTEGER NOT NULL,
            status TEXT NOT NULL,
            uptime TEXT NOT NULL,
            prtl TEXT NOT NULL,
            user TEXT NOT NULL,
            update_date TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS search_items (
            result_id INTEGER PRIMARY KEY,
            title TEXT NOT NULL,
            category TEXT NOT NULL,
            date TEXT,
            dlurl TEXT NOT NULL,
            page TEXT NOT NULL,
            peers INTEGER NOT NULL,
            leechs INTEGER NOT NULL,
            size INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
        "#,
    )?;

    Ok(())
}

fn parse_date(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

const TASK_COLUMNS: &str = r#"
    SELECT t.id, t.title, t.size, t.status, t.task_type, t.username, t.update_date,
           e.task_id, e.error_detail,
           a.task_id,
           d.task_id, d.destination, d.uri, d.create_time, d.started_time, d.completed_time,
           d.priority, d.total_peers, d.connected_leechers, d.connected_peers,
           d.connected_seeders, d.waiting_seconds,
           tr.task_id, tr.downloaded_pieces, tr.size_downloaded, tr.size_uploaded,
           tr.speed_download, tr.speed_upload
    FROM tasks t
    LEFT JOIN task_extra e ON e.task_id = t.id
    LEFT JOIN task_additional a ON a.task_id = t.id
    LEFT JOIN task_detail d ON d.task_id = t.id
    LEFT JOIN task_transfer tr ON tr.task_id = t.id
"#;

fn query_tasks(conn: &Connection, id: Option<&str>) -> Result<Vec<Task>> {
    let tasks = match id {
        Some(id) => {
            let mut stmt = conn.prepare(&format!("{} WHERE t.id = ?1", TASK_COLUMNS))?;
            let rows = stmt
                .query_map([id], task_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        }
        None => {
            let mut stmt = conn.prepare(&format!("{} ORDER BY t.id", TASK_COLUMNS))?;
            let rows = stmt
                .query_map([], task_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        }
    };
    Ok(tasks)
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    let extra = match row.get::<_, Option<String>>(7)? {
        Some(_) => Some(TaskExtra {
            error_detail: row.get(8)?,
        }),
        None => None,
    };

    let detail = match row.get::<_, Option<String>>(10)? {
        Some(_) => Some(TaskDetail {
            destination: row.get(11)?,
            uri: row.get(12)?,
            create_time: row.get(13)?,
            started_time: row.get(14)?,
            completed_time: row.get(15)?,
            priority: row.get(16)?,
            total_peers: row.get(17)?,
            connected_leechers: row.get(18)?,
            connected_peers: row.get(19)?,
            connected_seeders: row.get(20)?,
            waiting_seconds: row.get(21)?,
        }),
        None => None,
    };

    let transfer = match row.get::<_, Option<String>>(22)? {
        Some(_) => Some(TaskTransfer {
            downloaded_pieces: row.get(23)?,
            size_downloaded: row.get(24)?,
            size_uploaded: row.get(25)?,
            speed_download: row.get(26)?,
            speed_upload: row.get(27)?,
        }),
        None => None,
    };

    let additional = match row.get::<_, Option<String>>(9)? {
        Some(_) => Some(TaskAdditional { detail, transfer }),
        None => None,
    };

    Ok(Task {
        id: row.get(0)?,
        title: row.get(1)?,
        size: row.get(2)?,
        status: TaskStatus::from_str(&row.get::<_, String>(3)?),
        task_type: row.get(4)?,
        username: row.get(5)?,
        extra,
        additional,
        update_date: parse_date(&row.get::<_, String>(6)?),
    })
}

fn query_has_active_tasks(conn: &Connection) -> Result<bool> {
    let terminal: Vec<&str> = TaskStatus::TERMINAL.iter().map(|s| s.as_str()).collect();
    let active: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM tasks WHERE status NOT IN (?1, ?2, ?3, ?4))",
        params![terminal[0], terminal[1], terminal[2], terminal[3]],
        |row| row.get(0),
    )?;
    Ok(active)
}

fn query_user(conn: &Connection) -> Result<Option<User>> {
    let user = conn
        .query_row(
            "SELECT id, login, task_update_date, created_date FROM user WHERE id = ?1",
            [USER_ID],
            |row| {
                Ok(User {
                    id: row.get(0)?,
                    login: row.get(1)?,
                    task_update_date: row
                        .get::<_, Option<String>>(2)?
                        .map(|s| parse_date(&s)),
                    created_date: parse_date(&row.get::<_, String>(3)?),
                })
            },
        )
        .optional()?;
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn full_task(id: &str, status: TaskStatus) -> Task {
        Task {
            id: id.into(),
            title: format!("{}.iso", id),
            size: 1000,
            status,
            task_type: "bt".into(),
            username: "admin".into(),
            extra: Some(TaskExtra {
                error_detail: String::new(),
            }),
            additional: Some(TaskAdditional {
                detail: Some(TaskDetail {
                    destination: "downloads".into(),
                    uri: "magnet:?xt=urn:btih:abc".into(),
                    priority: Some("auto".into()),
                    ..Default::default()
                }),
                transfer: Some(TaskTransfer {
                    size_downloaded: 250,
                    speed_download: 10,
                    ..Default::default()
                }),
            }),
            update_date: Utc::now(),
        }
    }

    #[test]
    fn task_graph_roundtrips_through_the_store() {
        let cache = Cache::in_memory().unwrap();
        let task = full_task("dbid_1", TaskStatus::Downloading);

        cache.write(|tx| tx.upsert_task(&task)).unwrap();

        let stored = cache.task("dbid_1").unwrap().unwrap();
        assert_eq!(stored.additional, task.additional);
        assert_eq!(stored.extra, task.extra);
        assert_eq!(stored.status, TaskStatus::Downloading);
        assert_eq!(stored.update_date.timestamp(), task.update_date.timestamp());
    }

    #[test]
    fn upsert_drops_children_missing_from_the_new_graph() {
        let cache = Cache::in_memory().unwrap();
        cache
            .write(|tx| tx.upsert_task(&full_task("a", TaskStatus::Downloading)))
            .unwrap();

        let mut bare = full_task("a", TaskStatus::Paused);
        bare.extra = None;
        bare.additional = None;
        cache.write(|tx| tx.upsert_task(&bare)).unwrap();

        let counts = cache.record_counts().unwrap();
        assert_eq!(counts.tasks, 1);
        assert_eq!(counts.extras, 0);
        assert_eq!(counts.additionals, 0);
        assert_eq!(counts.details, 0);
        assert_eq!(counts.transfers, 0);
    }

    #[test]
    fn delete_task_removes_every_child() {
        let cache = Cache::in_memory().unwrap();
        cache
            .write(|tx| {
                tx.upsert_task(&full_task("a", TaskStatus::Downloading))?;
                tx.upsert_task(&full_task("b", TaskStatus::Seeding))
            })
            .unwrap();

        cache.write(|tx| tx.delete_task("a")).unwrap();

        let counts = cache.record_counts().unwrap();
        assert_eq!(counts.tasks, 1);
        assert_eq!(counts.extras, 1);
        assert_eq!(counts.additionals, 1);
        assert_eq!(counts.details, 1);
        assert_eq!(counts.transfers, 1);
    }

    #[test]
    fn parent_cannot_go_before_children() {
        let cache = Cache::in_memory().unwrap();
        cache
            .write(|tx| tx.upsert_task(&full_task("a", TaskStatus::Downloading)))
            .unwrap();

        let result = cache.write(|tx| {
            tx.conn.execute("DELETE FROM tasks WHERE id = 'a'", [])?;
            Ok(())
        });
        assert!(result.is_err());
        assert_eq!(cache.record_counts().unwrap().tasks, 1);
    }

    #[test]
    fn nested_write_joins_the_outer_transaction() {
        let cache = Cache::in_memory().unwrap();

        let result: Result<()> = cache.write(|tx| {
            tx.upsert_task(&full_task("a", TaskStatus::Downloading))?;
            cache.write(|inner| inner.upsert_task(&full_task("b", TaskStatus::Paused)))?;
            tx.conn.execute("INSERT INTO nowhere VALUES (1)", [])?;
            Ok(())
        });

        assert!(result.is_err());
        assert_eq!(cache.record_counts().unwrap().tasks, 0);

        cache
            .write(|tx| {
                tx.upsert_task(&full_task("a", TaskStatus::Downloading))?;
                cache.write(|inner| inner.upsert_task(&full_task("b", TaskStatus::Paused)))
            })
            .unwrap();
        assert_eq!(cache.record_counts().unwrap().tasks, 2);
    }

    #[test]
    fn changes_are_announced_after_commit() {
        let cache = Cache::in_memory().unwrap();
        let mut rx = cache.subscribe();

        cache
            .write(|tx| {
                tx.upsert_task(&full_task("a", TaskStatus::Downloading))?;
                tx.upsert_task(&full_task("b", TaskStatus::Downloading))?;
                tx.delete_all_statistics()
            })
            .unwrap();

        assert_eq!(rx.try_recv().unwrap(), CacheChange::Tasks);
        assert_eq!(rx.try_recv().unwrap(), CacheChange::Statistics);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn rolled_back_writes_announce_nothing() {
        let cache = Cache::in_memory().unwrap();
        let mut rx = cache.subscribe();

        let _ = cache.write(|tx| {
            tx.delete_all_statistics()?;
            tx.conn.execute("INSERT INTO nowhere VALUES (1)", [])?;
            Ok(())
        });

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn failed_commit_leaves_the_cache_writable() {
        let cache = Cache::in_memory().unwrap();
        let mut rx = cache.subscribe();
        cache
            .write(|tx| tx.upsert_task(&full_task("a", TaskStatus::Downloading)))
            .unwrap();
        assert_eq!(rx.try_recv().unwrap(), CacheChange::Tasks);

        // Orphaning the children only fails at COMMIT once foreign keys are deferred
        let result = cache.write(|tx| {
            tx.delete_all_statistics()?;
            tx.conn.execute_batch("PRAGMA defer_foreign_keys = ON")?;
            tx.conn.execute("DELETE FROM tasks WHERE id = 'a'", [])?;
            Ok(())
        });

        assert!(result.is_err());
        assert!(rx.try_recv().is_err());
        assert_eq!(cache.record_counts().unwrap().tasks, 1);

        cache
            .write(|tx| tx.upsert_task(&full_task("b", TaskStatus::Paused)))
            .unwrap();
        assert_eq!(cache.record_counts().unwrap().tasks, 2);
        assert_eq!(rx.try_recv().unwrap(), CacheChange::Tasks);
    }

    #[test]
    fn concurrent_rollbacks_are_never_announced() {
        let cache = Cache::in_memory().unwrap();
        let mut rx = cache.subscribe();

        let committer = {
            let cache = cache.clone();
            std::thread::spawn(move || {
                for _ in 0..200 {
                    cache.write(|tx| tx.delete_all_statistics()).unwrap();
                }
            })
        };
        let failing = {
            let cache = cache.clone();
            std::thread::spawn(move || {
                for _ in 0..200 {
                    let result: Result<()> = cache.write(|tx| {
                        tx.delete_all_vpn_profiles()?;
                        tx.conn.execute("INSERT INTO nowhere VALUES (1)", [])?;
                        Ok(())
                    });
                    assert!(result.is_err());
                }
            })
        };
        committer.join().unwrap();
        failing.join().unwrap();

        let mut announced = 0;
        while let Ok(change) = rx.try_recv() {
            assert_eq!(change, CacheChange::Statistics);
            announced += 1;
        }
        assert_eq!(announced, 200);
    }

    #[test]
    fn active_tasks_ignore_terminal_statuses() {
        let cache = Cache::in_memory().unwrap();
        assert!(!cache.has_active_tasks().unwrap());

        cache
            .write(|tx| {
                tx.upsert_task(&full_task("a", TaskStatus::Paused))?;
                tx.upsert_task(&full_task("b", TaskStatus::Seeding))
            })
            .unwrap();
        assert!(!cache.has_active_tasks().unwrap());

        cache
            .write(|tx| tx.upsert_task(&full_task("c", TaskStatus::Waiting)))
            .unwrap();
        assert!(cache.has_active_tasks().unwrap());
    }

    #[test]
    fn task_update_date_creates_marker_when_missing() {
        let cache = Cache::in_memory().unwrap();
        let now = Utc::now();

        cache.write(|tx| tx.set_task_update_date(now)).unwrap();

        let user = cache.user().unwrap().unwrap();
        assert_eq!(user.id, USER_ID);
        assert_eq!(
            user.task_update_date.map(|d| d.timestamp()),
            Some(now.timestamp())
        );
    }

    #[test]
    fn delete_all_empties_every_table() {
        let cache = Cache::in_memory().unwrap();
        cache
            .write(|tx| {
                tx.put_user(&User::new("admin"))?;
                tx.upsert_task(&full_task("a", TaskStatus::Downloading))?;
                tx.insert_statistic(&Statistic {
                    speed_download: 1,
                    speed_upload: 2,
                    update_date: Utc::now(),
                })
            })
            .unwrap();

        cache.write(|tx| tx.delete_all()).unwrap();

        assert_eq!(cache.record_counts().unwrap(), RecordCounts::default());
        assert!(cache.user().unwrap().is_none());
    }

    #[test]
    fn opens_a_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("cache.db");

        {
            let cache = Cache::open(&path).unwrap();
            cache.write(|tx| tx.put_user(&User::new("admin"))).unwrap();
        }

        let reopened = Cache::open(&path).unwrap();
        assert_eq!(reopened.user().unwrap().unwrap().login, "admin");
    }
}
