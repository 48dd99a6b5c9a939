//! Cached record types
//!
//! The same structs decode the station's JSON (field names follow the wire
//! format, missing fields default) and are stored by the cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

/// Fixed primary key of the singleton account marker
pub const USER_ID: i64 = 0;

/// Remote task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Waiting,
    Downloading,
    Paused,
    Finishing,
    Finished,
    #[serde(alias = "hash checking")]
    HashChecking,
    Seeding,
    #[serde(alias = "filehosting waiting")]
    FilehostingWaiting,
    Extracting,
    Error,
    #[serde(other)]
    Unknown,
}

impl TaskStatus {
    /// Statuses after which a task no longer changes on its own
    pub const TERMINAL: [TaskStatus; 4] = [
        TaskStatus::Paused,
        TaskStatus::Finished,
        TaskStatus::Seeding,
        TaskStatus::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Downloading => "downloading",
            Self::Paused => "paused",
            Self::Finishing => "finishing",
            Self::Finished => "finished",
            Self::HashChecking => "hash_checking",
            Self::Seeding => "seeding",
            Self::FilehostingWaiting => "filehosting_waiting",
            Self::Extracting => "extracting",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "waiting" => Self::Waiting,
            "downloading" => Self::Downloading,
            "paused" => Self::Paused,
            "finishing" => Self::Finishing,
            "finished" => Self::Finished,
            "hash_checking" | "hash checking" => Self::HashChecking,
            "seeding" => Self::Seeding,
            "filehosting_waiting" | "filehosting waiting" => Self::FilehostingWaiting,
            "extracting" => Self::Extracting,
            "error" => Self::Error,
            _ => Self::Unknown,
        }
    }

    pub fn is_terminal(&self) -> bool {
        Self::TERMINAL.contains(self)
    }
}

/// A remote download job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub size: u64,
    pub status: TaskStatus,
    #[serde(rename = "type", default)]
    pub task_type: String,
    #[serde(default)]
    pub username: String,
    #[serde(alias = "status_extra", default)]
    pub extra: Option<TaskExtra>,
    #[serde(default)]
    pub additional: Option<TaskAdditional>,
    /// Time of the sync that produced this record
    #[serde(default = "Utc::now")]
    pub update_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskExtra {
    #[serde(default)]
    pub error_detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskAdditional {
    #[serde(default)]
    pub detail: Option<TaskDetail>,
    #[serde(default)]
    pub transfer: Option<TaskTransfer>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskDetail {
    pub destination: String,
    pub uri: String,
    pub create_time: i64,
    pub started_time: i64,
    pub completed_time: i64,
    pub priority: Option<String>,
    pub total_peers: i64,
    pub connected_leechers: i64,
    pub connected_peers: i64,
    pub connected_seeders: i64,
    pub waiting_seconds: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskTransfer {
    pub downloaded_pieces: u64,
    pub size_downloaded: u64,
    pub size_uploaded: u64,
    pub speed_download: u64,
    pub speed_upload: u64,
}

impl Task {
    fn transfer(&self) -> Option<&TaskTransfer> {
        self.additional.as_ref()?.transfer.as_ref()
    }

    /// Fraction downloaded in `[0, 1]`, `None` when the station sent no additional data
    pub fn progress(&self) -> Option<f64> {
        let additional = self.additional.as_ref()?;

        if additional
            .detail
            .as_ref()
            .is_some_and(|d| d.completed_time > 0)
        {
            return Some(1.0);
        }

        let downloaded = match &additional.transfer {
            Some(transfer) => transfer.size_downloaded,
            None => return Some(0.0),
        };

        if self.size == 0 {
            Some(0.0)
        } else if downloaded >= self.size {
            Some(1.0)
        } else {
            Some((downloaded as f64 / self.size as f64).clamp(0.0, 1.0))
        }
    }

    /// Estimated time left, only known while the task is receiving data
    pub fn remaining_time(&self) -> Option<Duration> {
        let transfer = self.transfer()?;
        if transfer.speed_download == 0 {
            return None;
        }
        let left = self.size.saturating_sub(transfer.size_downloaded);
        Some(Duration::from_secs(left / transfer.speed_download))
    }

    /// Whether the task still changes on the station without user input
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Current transfer speed, download first, `None` when idle
    pub fn speed_label(&self) -> Option<String> {
        let transfer = self.transfer()?;
        if transfer.speed_download > 0 {
            Some(format!("↓ {}/s", format_bytes(transfer.speed_download)))
        } else if transfer.speed_upload > 0 {
            Some(format!("↑ {}/s", format_bytes(transfer.speed_upload)))
        } else {
            None
        }
    }
}

/// Global transfer speed snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistic {
    #[serde(default)]
    pub speed_download: u64,
    #[serde(default)]
    pub speed_upload: u64,
    #[serde(default = "Utc::now")]
    pub update_date: DateTime<Utc>,
}

/// VPN client profile configured on the station
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VpnProfile {
    pub id: String,
    #[serde(default)]
    pub confname: String,
    #[serde(default)]
    pub reconnect: bool,
    #[serde(default)]
    pub status: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub uptime: String,
    #[serde(default)]
    pub prtl: String,
    #[serde(default)]
    pub user: String,
    #[serde(default = "Utc::now")]
    pub update_date: DateTime<Utc>,
}

impl VpnProfile {
    pub fn is_connected(&self) -> bool {
        self.status == "connected"
    }
}

/// Singleton account marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub login: String,
    /// Last completed full task sync, `None` until the first one
    pub task_update_date: Option<DateTime<Utc>>,
    pub created_date: DateTime<Utc>,
}

impl User {
    pub fn new(login: impl Into<String>) -> Self {
        Self {
            id: USER_ID,
            login: login.into(),
            task_update_date: None,
            created_date: Utc::now(),
        }
    }
}

/// One result of a remote torrent search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchItem {
    pub result_id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub dlurl: String,
    #[serde(default)]
    pub page: String,
    #[serde(default)]
    pub peers: i64,
    #[serde(default)]
    pub leechs: i64,
    #[serde(default)]
    pub size: u64,
}

impl SearchItem {
    /// Publication date, the station sends `yyyy-MM-dd HH:mm:ss Z`
    pub fn published_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.date.as_deref()?;
        DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S %z")
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Format a byte count with a binary unit, e.g. `1.50 GB`
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_with(size: u64, additional: Option<TaskAdditional>) -> Task {
        Task {
            id: "dbid_1".into(),
            title: "ubuntu.iso".into(),
            size,
            status: TaskStatus::Downloading,
            task_type: "bt".into(),
            username: "admin".into(),
            extra: None,
            additional,
            update_date: Utc::now(),
        }
    }

    fn transferred(downloaded: u64, speed: u64) -> Option<TaskAdditional> {
        Some(TaskAdditional {
            detail: None,
            transfer: Some(TaskTransfer {
                size_downloaded: downloaded,
                speed_download: speed,
                ..Default::default()
            }),
        })
    }

    #[test]
    fn progress_is_ratio_of_downloaded_bytes() {
        assert_eq!(task_with(1000, transferred(500, 0)).progress(), Some(0.5));
        assert_eq!(task_with(1000, transferred(1000, 0)).progress(), Some(1.0));
        assert_eq!(task_with(1000, transferred(1500, 0)).progress(), Some(1.0));
        assert_eq!(task_with(1000, None).progress(), None);
    }

    #[test]
    fn progress_without_transfer_or_size_is_zero() {
        let no_transfer = task_with(1000, Some(TaskAdditional::default()));
        assert_eq!(no_transfer.progress(), Some(0.0));
        assert_eq!(task_with(0, transferred(0, 0)).progress(), Some(0.0));
    }

    #[test]
    fn completed_time_means_done() {
        let additional = TaskAdditional {
            detail: Some(TaskDetail {
                completed_time: 1_700_000_000,
                ..Default::default()
            }),
            transfer: Some(TaskTransfer::default()),
        };
        assert_eq!(task_with(1000, Some(additional)).progress(), Some(1.0));
    }

    #[test]
    fn remaining_time_needs_download_speed() {
        assert_eq!(
            task_with(1000, transferred(500, 100)).remaining_time(),
            Some(Duration::from_secs(5))
        );
        assert_eq!(task_with(1000, transferred(500, 0)).remaining_time(), None);
        assert_eq!(task_with(1000, None).remaining_time(), None);
    }

    #[test]
    fn terminal_statuses() {
        for status in TaskStatus::TERMINAL {
            assert!(status.is_terminal());
        }
        assert!(!TaskStatus::Downloading.is_terminal());
        assert!(!TaskStatus::Unknown.is_terminal());
    }

    #[test]
    fn decodes_station_task_json() {
        let json = serde_json::json!({
            "id": "dbid_7",
            "size": 2048,
            "status": "hash checking",
            "status_extra": { "error_detail": "broken_link" },
            "title": "debian.iso",
            "type": "bt",
            "username": "admin",
            "additional": {
                "transfer": { "size_downloaded": 1024, "speed_download": 64 }
            }
        });

        let task: Task = serde_json::from_value(json).unwrap();
        assert_eq!(task.status, TaskStatus::HashChecking);
        assert_eq!(task.extra.as_ref().unwrap().error_detail, "broken_link");
        assert_eq!(task.task_type, "bt");
        assert!(task.additional.as_ref().unwrap().detail.is_none());
        assert_eq!(task.progress(), Some(0.5));
    }

    #[test]
    fn unknown_status_is_tolerated() {
        let task: Task =
            serde_json::from_value(serde_json::json!({ "id": "x", "status": "mystery" })).unwrap();
        assert_eq!(task.status, TaskStatus::Unknown);
    }

    #[test]
    fn vpn_uptime_accepts_numbers() {
        let profile: VpnProfile = serde_json::from_value(serde_json::json!({
            "id": "o1", "confname": "home", "status": "connected", "uptime": 3600
        }))
        .unwrap();
        assert_eq!(profile.uptime, "3600");
        assert!(profile.is_connected());
    }

    #[test]
    fn search_item_date_parses() {
        let item = SearchItem {
            result_id: 1,
            title: String::new(),
            category: String::new(),
            date: Some("2020-04-14 10:00:00 +0200".into()),
            dlurl: String::new(),
            page: String::new(),
            peers: 0,
            leechs: 0,
            size: 0,
        };
        assert_eq!(
            item.published_at().unwrap().to_rfc3339(),
            "2020-04-14T08:00:00+00:00"
        );
    }

    #[test]
    fn formats_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.00 GB");
    }
}
